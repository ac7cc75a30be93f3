//! Shutdown triggers for [`crate::Hive::run`].
//!
//! Shutdown can be driven by OS signals, an external `CancellationToken`,
//! or an arbitrary future. Every trigger ends up calling
//! [`Shutdowner::shutdown`], so a component calling it directly and an
//! external trigger race on equal terms: the first one wins.

use std::future::Future;
use std::pin::Pin;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::Shutdowner;

/// How the hive should decide when to stop.
pub enum ShutdownOptions {
    /// Listen for OS signals (Ctrl+C / SIGTERM).
    Signals,
    /// An external `CancellationToken` controls the lifecycle.
    Token(CancellationToken),
    /// An arbitrary future; when it completes, we initiate shutdown.
    Future(Pin<Box<dyn Future<Output = ()> + Send>>),
}

impl std::fmt::Debug for ShutdownOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownOptions::Signals => f.write_str("Signals"),
            ShutdownOptions::Token(_) => f.write_str("Token"),
            ShutdownOptions::Future(_) => f.write_str("Future"),
        }
    }
}

/// Options for [`crate::Hive::run`].
#[derive(Debug)]
pub struct RunOptions {
    pub shutdown: ShutdownOptions,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            shutdown: ShutdownOptions::Signals,
        }
    }
}

impl RunOptions {
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            shutdown: ShutdownOptions::Token(token),
        }
    }

    pub fn with_future<F>(fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            shutdown: ShutdownOptions::Future(Box::pin(fut)),
        }
    }
}

/// Spawn the waiter that turns `opts` into a shutdown request.
pub(crate) fn spawn_trigger(opts: ShutdownOptions, shutdowner: Shutdowner) -> JoinHandle<()> {
    match opts {
        ShutdownOptions::Signals => tokio::spawn(async move {
            match hive_bootstrap::signals::wait_for_shutdown().await {
                Ok(()) => {
                    tracing::info!("shutdown: signal received");
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "shutdown: primary waiter failed; falling back to ctrl_c()"
                    );
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
            shutdowner.shutdown();
        }),
        ShutdownOptions::Token(token) => {
            tracing::info!("shutdown: external token will control lifecycle");
            tokio::spawn(async move {
                token.cancelled().await;
                shutdowner.shutdown();
            })
        }
        ShutdownOptions::Future(waiter) => tokio::spawn(async move {
            waiter.await;
            tracing::info!("shutdown: external future completed");
            shutdowner.shutdown();
        }),
    }
}
