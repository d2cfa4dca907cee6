//! Single-flight guard
//!
//! At most one execution of an operation runs at a time. Callers arriving
//! while it runs await the same shared future and receive a clone of its
//! result. The work runs on its own task, so a caller that gives up waiting
//! does not cancel an install half way through.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::future::Future;
use thiserror::Error;

/// The shared work ended without producing a result
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("in-flight operation aborted: {0}")]
pub struct FlightError(pub String);

type InFlight<T> = Shared<BoxFuture<'static, Result<T, FlightError>>>;

/// Mutex-guarded in-flight future
pub struct SingleFlight<T: Clone + Send + Sync + 'static> {
    inflight: Mutex<Option<InFlight<T>>>,
}

impl<T: Clone + Send + Sync + 'static> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(None),
        }
    }

    /// Whether an execution is currently running
    pub fn is_in_flight(&self) -> bool {
        self.inflight
            .lock()
            .as_ref()
            .is_some_and(|f| f.peek().is_none())
    }

    /// Run `work`, or join the execution already in flight
    ///
    /// `work` is only invoked when no execution is running.
    pub async fn run<F, Fut>(&self, work: F) -> Result<T, FlightError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (shared, joined) = {
            let mut slot = self.inflight.lock();
            // A finished future left behind by a dropped caller is stale
            let running = slot.as_ref().filter(|f| f.peek().is_none()).cloned();
            match running {
                Some(existing) => (existing, true),
                None => {
                    let handle = tokio::spawn(work());
                    let fut: BoxFuture<'static, Result<T, FlightError>> = async move {
                        handle.await.map_err(|e| FlightError(e.to_string()))
                    }
                    .boxed();
                    let shared = fut.shared();
                    *slot = Some(shared.clone());
                    (shared, false)
                }
            }
        };

        if joined {
            tracing::debug!("Joining operation already in flight");
        }

        let result = shared.clone().await;

        let mut slot = self.inflight.lock();
        if slot.as_ref().is_some_and(|f| f.ptr_eq(&shared)) {
            *slot = None;
        }
        result
    }
}

impl<T: Clone + Send + Sync + 'static> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}
