//! Lifecycle coordinator.
//!
//! Constructors append hooks to the [`Lifecycle`] while the object graph is
//! being resolved. The order hooks were appended is the start order; stop
//! runs the hooks that started, in exact reverse.
//!
//! ```text
//! Idle -> Starting -> Running -> Stopping -> Stopped
//!            |                       |
//!            +-------> Failed <------+
//! ```

use std::fmt;
use std::future::Future;
use std::panic::Location;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{HiveError, HookError};
use crate::graph::ObjectGraph;
use crate::inject::{Dependency, TypeKey};
use crate::naming::{self, Symbol};

/// Start/stop pair contributed by a constructed object.
///
/// `start` must return promptly: ongoing work belongs in a spawned task that
/// watches the cancellation token. `stop` must be safe to call even if
/// `start` never ran or failed partway.
#[async_trait]
pub trait HookInterface: Send + Sync {
    async fn start(&self, _cancel: CancellationToken) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&self, _cancel: CancellationToken) -> anyhow::Result<()> {
        Ok(())
    }
}

type HookFn = Box<dyn Fn(CancellationToken) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Closure-based hook.
///
/// ```rust,ignore
/// lc.append(
///     Hook::new()
///         .on_start(move |cancel| async move { spawn_worker(cancel); Ok(()) })
///         .on_stop(|_| async { Ok(()) }),
/// );
/// ```
#[derive(Default)]
pub struct Hook {
    on_start: Option<HookFn>,
    on_stop: Option<HookFn>,
}

impl Hook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_start<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on_start = Some(Box::new(move |cancel| Box::pin(f(cancel))));
        self
    }

    pub fn on_stop<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on_stop = Some(Box::new(move |cancel| Box::pin(f(cancel))));
        self
    }
}

#[async_trait]
impl HookInterface for Hook {
    async fn start(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        match &self.on_start {
            Some(f) => f(cancel).await,
            None => Ok(()),
        }
    }

    async fn stop(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        match &self.on_stop {
            Some(f) => f(cancel).await,
            None => Ok(()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Clone)]
struct HookEntry {
    name: String,
    hook: Arc<dyn HookInterface>,
}

struct LifecycleLog {
    hooks: Vec<HookEntry>,
    /// Provider currently being constructed; hooks appended now belong to it.
    owner: Option<Symbol>,
    num_started: usize,
    state: LifecycleState,
}

/// Handle to the lifecycle log. Constructors take it as a parameter to
/// append hooks; clones share the same log.
#[derive(Clone)]
pub struct Lifecycle {
    inner: Arc<Mutex<LifecycleLog>>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(LifecycleLog {
                hooks: Vec::new(),
                owner: None,
                num_started: 0,
                state: LifecycleState::Idle,
            })),
        }
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let log = self.inner.lock();
        f.debug_struct("Lifecycle")
            .field("hooks", &log.hooks.iter().map(|h| &h.name).collect::<Vec<_>>())
            .field("num_started", &log.num_started)
            .field("state", &log.state)
            .finish()
    }
}

impl Dependency for Lifecycle {
    fn key() -> TypeKey {
        TypeKey::of::<Lifecycle>()
    }

    fn fetch(graph: &ObjectGraph) -> Option<Self> {
        graph.get::<Lifecycle>().map(|lc| (*lc).clone())
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hook. It is named after the provider being constructed and
    /// the location of this call.
    #[track_caller]
    pub fn append(&self, hook: impl HookInterface + 'static) {
        let location = Location::caller();
        let mut log = self.inner.lock();
        let owner = log
            .owner
            .as_ref()
            .map(|o| o.name.clone())
            .unwrap_or_else(|| "hook".to_string());
        let name = naming::func_name_and_location(&Symbol {
            name: owner,
            location: Some(location.into()),
        });
        tracing::debug!(hook = %name, "Appending lifecycle hook");
        log.hooks.push(HookEntry {
            name,
            hook: Arc::new(hook),
        });
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.lock().state
    }

    pub fn len(&self) -> usize {
        self.inner.lock().hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hook names in start order.
    pub fn hook_names(&self) -> Vec<String> {
        self.inner.lock().hooks.iter().map(|h| h.name.clone()).collect()
    }

    pub(crate) fn set_owner(&self, owner: Option<Symbol>) {
        self.inner.lock().owner = owner;
    }

    pub(crate) fn mark_failed(&self) {
        self.inner.lock().state = LifecycleState::Failed;
    }

    fn transition(&self, from: LifecycleState, to: LifecycleState, op: &'static str) -> Result<Vec<HookEntry>, HiveError> {
        let mut log = self.inner.lock();
        if log.state != from {
            return Err(HiveError::InvalidState {
                operation: op,
                state: log.state,
            });
        }
        log.state = to;
        Ok(log.hooks.clone())
    }

    /// Run every start hook in append order.
    ///
    /// On the first failure `cancel` is cancelled, the hooks that already
    /// started are stopped in reverse (stop errors are only logged) and the
    /// start error is returned.
    pub async fn start(&self, cancel: CancellationToken) -> Result<(), HiveError> {
        let hooks = self.transition(LifecycleState::Idle, LifecycleState::Starting, "start")?;
        tracing::info!(hooks = hooks.len(), "Phase: start");

        for (i, entry) in hooks.iter().enumerate() {
            tracing::debug!(hook = %entry.name, "Executing start hook");
            let t0 = Instant::now();
            if let Err(source) = entry.hook.start(cancel.clone()).await {
                tracing::error!(hook = %entry.name, error = %source, "Start hook failed");
                self.inner.lock().state = LifecycleState::Failed;
                // Background work started by earlier hooks waits on this token.
                cancel.cancel();
                for err in stop_in_reverse(&hooks[..i], &cancel).await {
                    tracing::warn!(hook = %err.hook, error = %err.error, "Cleanup stop hook failed");
                }
                return Err(HiveError::StartFailed {
                    hook: entry.name.clone(),
                    source,
                });
            }
            self.inner.lock().num_started = i + 1;
            tracing::info!(hook = %entry.name, duration = ?t0.elapsed(), "Start hook executed");
        }

        self.inner.lock().state = LifecycleState::Running;
        Ok(())
    }

    /// Run the stop hook of every started hook, in reverse start order.
    ///
    /// Individual failures never interrupt the unwind; they are collected
    /// into [`HiveError::StopFailed`].
    pub async fn stop(&self, cancel: CancellationToken) -> Result<(), HiveError> {
        let hooks = {
            let mut log = self.inner.lock();
            match log.state {
                LifecycleState::Running | LifecycleState::Idle => {}
                state => {
                    return Err(HiveError::InvalidState {
                        operation: "stop",
                        state,
                    })
                }
            }
            log.state = LifecycleState::Stopping;
            let started = log.num_started;
            log.num_started = 0;
            log.hooks[..started].to_vec()
        };
        tracing::info!(hooks = hooks.len(), "Phase: stop");

        let errors = stop_in_reverse(&hooks, &cancel).await;
        if errors.is_empty() {
            self.inner.lock().state = LifecycleState::Stopped;
            Ok(())
        } else {
            self.inner.lock().state = LifecycleState::Failed;
            Err(HiveError::StopFailed { errors })
        }
    }
}

async fn stop_in_reverse(hooks: &[HookEntry], cancel: &CancellationToken) -> Vec<HookError> {
    let mut errors = Vec::new();
    for entry in hooks.iter().rev() {
        tracing::debug!(hook = %entry.name, "Executing stop hook");
        let t0 = Instant::now();
        match entry.hook.stop(cancel.clone()).await {
            Ok(()) => {
                tracing::info!(hook = %entry.name, duration = ?t0.elapsed(), "Stop hook executed");
            }
            Err(error) => {
                tracing::warn!(hook = %entry.name, error = %error, "Failed to stop");
                errors.push(HookError {
                    hook: entry.name.clone(),
                    error,
                });
            }
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    type Journal = Arc<Mutex<Vec<String>>>;

    fn recording_hook(journal: &Journal, name: &'static str, fail_start: bool, fail_stop: bool) -> Hook {
        let (j1, j2) = (journal.clone(), journal.clone());
        Hook::new()
            .on_start(move |_| {
                let j = j1.clone();
                async move {
                    if fail_start {
                        anyhow::bail!("{name} refused to start");
                    }
                    j.lock().push(format!("start {name}"));
                    Ok(())
                }
            })
            .on_stop(move |_| {
                let j = j2.clone();
                async move {
                    j.lock().push(format!("stop {name}"));
                    if fail_stop {
                        anyhow::bail!("{name} refused to stop");
                    }
                    Ok(())
                }
            })
    }

    #[tokio::test]
    async fn stop_order_is_reverse_of_start_order() {
        let journal = Journal::default();
        let lc = Lifecycle::new();
        for name in ["a", "b", "c"] {
            lc.append(recording_hook(&journal, name, false, false));
        }

        lc.start(CancellationToken::new()).await.unwrap();
        assert_eq!(lc.state(), LifecycleState::Running);
        lc.stop(CancellationToken::new()).await.unwrap();
        assert_eq!(lc.state(), LifecycleState::Stopped);

        assert_eq!(
            *journal.lock(),
            vec!["start a", "start b", "start c", "stop c", "stop b", "stop a"]
        );
    }

    #[tokio::test]
    async fn failed_start_unwinds_only_started_hooks() {
        let journal = Journal::default();
        let lc = Lifecycle::new();
        lc.append(recording_hook(&journal, "a", false, false));
        lc.append(recording_hook(&journal, "b", false, true));
        lc.append(recording_hook(&journal, "c", true, false));
        lc.append(recording_hook(&journal, "d", false, false));

        let err = lc.start(CancellationToken::new()).await.unwrap_err();
        match err {
            HiveError::StartFailed { source, .. } => {
                assert_eq!(source.to_string(), "c refused to start");
            }
            other => panic!("expected StartFailed, got: {other:?}"),
        }
        assert_eq!(lc.state(), LifecycleState::Failed);
        assert_eq!(
            *journal.lock(),
            vec!["start a", "start b", "stop b", "stop a"]
        );
    }

    #[tokio::test]
    async fn failed_start_cancels_the_token_before_unwinding() {
        let lc = Lifecycle::new();
        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        lc.append(Hook::new().on_stop(move |cancel| {
            let s = s.clone();
            async move {
                *s.lock() = Some(cancel.is_cancelled());
                Ok(())
            }
        }));
        lc.append(Hook::new().on_start(|_| async { Err(anyhow::anyhow!("boom")) }));

        let cancel = CancellationToken::new();
        assert!(lc.start(cancel.clone()).await.is_err());
        assert!(cancel.is_cancelled());
        assert_eq!(*seen.lock(), Some(true));
    }

    #[tokio::test]
    async fn stop_failures_are_collected_without_aborting() {
        let journal = Journal::default();
        let lc = Lifecycle::new();
        lc.append(recording_hook(&journal, "a", false, true));
        lc.append(recording_hook(&journal, "b", false, false));
        lc.append(recording_hook(&journal, "c", false, true));

        lc.start(CancellationToken::new()).await.unwrap();
        let err = lc.stop(CancellationToken::new()).await.unwrap_err();
        match err {
            HiveError::StopFailed { errors } => {
                assert_eq!(errors.len(), 2);
                assert_eq!(errors[0].error.to_string(), "c refused to stop");
                assert_eq!(errors[1].error.to_string(), "a refused to stop");
            }
            other => panic!("expected StopFailed, got: {other:?}"),
        }
        assert_eq!(lc.state(), LifecycleState::Failed);
        assert_eq!(journal.lock().len(), 6);
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let lc = Lifecycle::new();
        lc.start(CancellationToken::new()).await.unwrap();
        let err = lc.start(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            HiveError::InvalidState {
                operation: "start",
                state: LifecycleState::Running
            }
        ));
    }

    #[tokio::test]
    async fn hooks_are_named_after_append_site() {
        let lc = Lifecycle::new();
        lc.append(Hook::new());
        let names = lc.hook_names();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("hook ("), "{}", names[0]);
        assert!(names[0].contains("lifecycle.rs"), "{}", names[0]);
    }

    #[tokio::test]
    async fn stop_without_start_runs_nothing() {
        let journal = Journal::default();
        let lc = Lifecycle::new();
        lc.append(recording_hook(&journal, "a", false, false));
        lc.stop(CancellationToken::new()).await.unwrap();
        assert!(journal.lock().is_empty());
        assert_eq!(lc.state(), LifecycleState::Stopped);
    }
}
