//! Core trait definitions

mod runner;
mod store;

pub use runner::{ChildHandle, CommandOutput, CommandRunner, CommandSpec};
pub use store::KeyValueStore;
