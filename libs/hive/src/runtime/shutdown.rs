use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::graph::ObjectGraph;
use crate::inject::{Dependency, TypeKey};

#[derive(Default)]
struct ShutdownState {
    requested: bool,
    error: Option<anyhow::Error>,
}

/// Handle any component can use to request a graceful shutdown of the hive.
///
/// Only the first request counts: later calls, with or without an error,
/// are ignored. Clones share the same state.
#[derive(Clone, Default)]
pub struct Shutdowner {
    state: Arc<Mutex<ShutdownState>>,
    token: CancellationToken,
}

impl std::fmt::Debug for Shutdowner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shutdowner")
            .field("requested", &self.is_requested())
            .finish()
    }
}

impl Dependency for Shutdowner {
    fn key() -> TypeKey {
        TypeKey::of::<Shutdowner>()
    }

    fn fetch(graph: &ObjectGraph) -> Option<Self> {
        graph.get::<Shutdowner>().map(|s| (*s).clone())
    }
}

impl Shutdowner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Returns `false` if a shutdown was already requested.
    pub fn shutdown(&self) -> bool {
        self.request(None)
    }

    /// Request shutdown and make the run report `err`.
    pub fn shutdown_with_error(&self, err: anyhow::Error) -> bool {
        self.request(Some(err))
    }

    fn request(&self, error: Option<anyhow::Error>) -> bool {
        {
            let mut state = self.state.lock();
            if state.requested {
                tracing::debug!("shutdown already requested; ignoring");
                return false;
            }
            state.requested = true;
            state.error = error;
            match &state.error {
                Some(err) => tracing::warn!(error = %format!("{err:#}"), "Shutdown requested with error"),
                None => tracing::info!("Shutdown requested"),
            }
        }
        self.token.cancel();
        true
    }

    pub fn is_requested(&self) -> bool {
        self.state.lock().requested
    }

    /// Cancelled once shutdown is requested.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub(crate) fn take_error(&self) -> Option<anyhow::Error> {
        self.state.lock().error.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_request_wins() {
        let s = Shutdowner::new();
        assert!(s.shutdown_with_error(anyhow::anyhow!("disk full")));
        assert!(!s.shutdown());
        assert!(!s.shutdown_with_error(anyhow::anyhow!("later")));
        assert!(s.token().is_cancelled());
        assert_eq!(s.take_error().unwrap().to_string(), "disk full");
    }

    #[test]
    fn plain_shutdown_carries_no_error() {
        let s = Shutdowner::new();
        let clone = s.clone();
        assert!(clone.shutdown());
        assert!(s.is_requested());
        assert!(s.take_error().is_none());
    }
}
