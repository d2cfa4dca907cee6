//! pb-orchestrator: lifecycle orchestration for the managed service
//!
//! Resolves the service configuration from the point-of-sale backend,
//! installs or updates the service from its upstream repository, launches
//! it on its port, and tears everything down on reset. The
//! [`Orchestrator`] facade is the single entry point; the components below
//! it are public for hosts that need finer control.

pub mod flight;
pub mod launcher;
pub mod orchestrator;
pub mod platform;
pub mod ports;
pub mod provision;
pub mod reset;
pub mod resolver;
pub mod runner;
pub mod testing;

pub use flight::{FlightError, SingleFlight};
pub use launcher::{LaunchResult, ServiceLauncher, Supervisor};
pub use orchestrator::{
    EnsureOptions, OperationOutcome, Orchestrator, OrchestratorBuilder, OutcomeStatus,
    RuntimePaths, StatusReport, Trigger,
};
pub use platform::{Platform, Tool};
pub use ports::{is_port_in_use, KillReport, PortReconciler, PortReport};
pub use reset::{ReportStatus, ResetManager, ResetOptions, ResetReport};
pub use resolver::{ConfigResolver, HttpConfigSource, RemoteConfigSource, RemoteResponse};
pub use runner::SystemRunner;
