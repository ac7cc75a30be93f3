//! HTTP server cell: `/hello`, `/events` and `/metrics`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use hive::{FlagSet, Flagger, HookInterface, Lifecycle, MetricsRegistry, Shutdowner};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::events::{Event, EventSource};
use crate::metrics::ExampleMetrics;

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub http_host: String,
    pub http_port: u16,
    pub greeting: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_host: "127.0.0.1".to_string(),
            http_port: 8080,
            greeting: "Hello from the hive".to_string(),
        }
    }
}

impl Flagger for ServerConfig {
    fn flags(&self, flags: &mut FlagSet) {
        flags.add("http-host", &self.http_host, "Address for the HTTP server");
        flags.add("http-port", self.http_port, "Port for the HTTP server");
        flags.add("greeting", &self.greeting, "Greeting served on /hello");
    }
}

pub struct Server {
    config: Arc<ServerConfig>,
    events: Arc<EventSource>,
    metrics: Arc<ExampleMetrics>,
    registry: Arc<MetricsRegistry>,
}

impl Server {
    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route("/hello", get(hello))
            .route("/events", get(events))
            .route("/metrics", get(metrics))
            .with_state(self.clone())
    }
}

pub fn new_server(
    config: Arc<ServerConfig>,
    events: Arc<EventSource>,
    metrics: Arc<ExampleMetrics>,
    registry: Arc<MetricsRegistry>,
    lc: Lifecycle,
    shutdowner: Shutdowner,
) -> anyhow::Result<Arc<Server>> {
    let server = Arc::new(Server {
        config,
        events,
        metrics,
        registry,
    });
    lc.append(ServerHook {
        server: server.clone(),
        shutdowner,
        task: Mutex::new(None),
    });
    Ok(server)
}

struct ServerHook {
    server: Arc<Server>,
    shutdowner: Shutdowner,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

#[async_trait]
impl HookInterface for ServerHook {
    async fn start(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        let cfg = &self.server.config;
        let listener = tokio::net::TcpListener::bind((cfg.http_host.as_str(), cfg.http_port))
            .await
            .with_context(|| format!("failed to bind {}:{}", cfg.http_host, cfg.http_port))?;
        let addr = listener.local_addr()?;
        tracing::info!(%addr, "HTTP server listening");

        let router = self.server.router();
        let cancel = cancel.child_token();
        let drain = cancel.clone();
        let shutdowner = self.shutdowner.clone();
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { cancel.cancelled().await });
            if let Err(e) = serve.await {
                tracing::error!(error = %e, "HTTP server failed");
                shutdowner.shutdown_with_error(anyhow::Error::new(e).context("HTTP server failed"));
            }
        });
        *self.task.lock() = Some((drain, handle));
        Ok(())
    }

    async fn stop(&self, _cancel: CancellationToken) -> anyhow::Result<()> {
        let task = self.task.lock().take();
        let Some((drain, handle)) = task else {
            return Ok(());
        };
        drain.cancel();
        let abort = handle.abort_handle();
        match tokio::time::timeout(STOP_TIMEOUT, handle).await {
            Ok(joined) => joined.context("HTTP server task panicked"),
            Err(_) => {
                abort.abort();
                anyhow::bail!("HTTP server did not drain within {:?}", STOP_TIMEOUT)
            }
        }
    }
}

async fn hello(State(server): State<Arc<Server>>) -> String {
    server.metrics.requests.with_label_values(&["/hello"]).inc();
    server.config.greeting.clone()
}

async fn events(State(server): State<Arc<Server>>) -> Json<Vec<Event>> {
    server.metrics.requests.with_label_values(&["/events"]).inc();
    Json(server.events.recent())
}

async fn metrics(State(server): State<Arc<Server>>) -> Response {
    server.metrics.requests.with_label_values(&["/metrics"]).inc();
    match server.registry.gather_text() {
        Ok(body) => ([(header::CONTENT_TYPE, server.registry.content_type())], body).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
