//! Tick event source: a background task emitting numbered events.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hive::{FlagSet, Flagger, Hook, Lifecycle};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::metrics::ExampleMetrics;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventsConfig {
    pub tick_interval_ms: u64,
    pub event_history: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            event_history: 16,
        }
    }
}

impl Flagger for EventsConfig {
    fn flags(&self, flags: &mut FlagSet) {
        flags.add("tick-interval-ms", self.tick_interval_ms, "Interval between tick events");
        flags.add("event-history", self.event_history, "Number of recent events kept");
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Event {
    pub seq: u64,
    pub at: DateTime<Utc>,
}

pub struct EventSource {
    config: Arc<EventsConfig>,
    metrics: Arc<ExampleMetrics>,
    seq: AtomicU64,
    recent: Mutex<VecDeque<Event>>,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

pub fn new_event_source(
    config: Arc<EventsConfig>,
    metrics: Arc<ExampleMetrics>,
    lc: Lifecycle,
) -> anyhow::Result<Arc<EventSource>> {
    if config.event_history == 0 {
        anyhow::bail!("event-history must be at least 1");
    }

    let source = Arc::new(EventSource {
        config,
        metrics,
        seq: AtomicU64::new(0),
        recent: Mutex::new(VecDeque::new()),
        task: Mutex::new(None),
    });

    let (on_start, on_stop) = (source.clone(), source.clone());
    lc.append(
        Hook::new()
            .on_start(move |cancel| {
                let source = on_start.clone();
                async move {
                    source.spawn_ticker(cancel);
                    Ok(())
                }
            })
            .on_stop(move |_| {
                let source = on_stop.clone();
                async move {
                    source.join().await;
                    Ok(())
                }
            }),
    );
    Ok(source)
}

impl EventSource {
    /// Most recent events, oldest first.
    pub fn recent(&self) -> Vec<Event> {
        self.recent.lock().iter().cloned().collect()
    }

    pub fn emitted(&self) -> u64 {
        self.seq.load(Ordering::Relaxed)
    }

    fn emit(&self) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let mut recent = self.recent.lock();
        recent.push_back(Event { seq, at: Utc::now() });
        while recent.len() > self.config.event_history {
            recent.pop_front();
        }
        self.metrics.events_emitted.inc();
        tracing::debug!(seq, "Tick event emitted");
    }

    fn spawn_ticker(self: &Arc<Self>, cancel: CancellationToken) {
        let period = Duration::from_millis(self.config.tick_interval_ms.max(1));
        let source = self.clone();
        let cancel = cancel.child_token();
        let stop = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => source.emit(),
                }
            }
            tracing::info!(emitted = source.emitted(), "Event source stopped");
        });
        *self.task.lock() = Some((stop, handle));
    }

    async fn join(&self) {
        let task = self.task.lock().take();
        if let Some((stop, handle)) = task {
            stop.cancel();
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Event source task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(history: usize) -> EventSource {
        EventSource {
            config: Arc::new(EventsConfig {
                tick_interval_ms: 1,
                event_history: history,
            }),
            metrics: Arc::new(ExampleMetrics::new().unwrap()),
            seq: AtomicU64::new(0),
            recent: Mutex::new(VecDeque::new()),
            task: Mutex::new(None),
        }
    }

    #[test]
    fn history_is_bounded() {
        let s = source(2);
        for _ in 0..5 {
            s.emit();
        }
        let seqs: Vec<u64> = s.recent().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![4, 5]);
        assert_eq!(s.metrics.events_emitted.get(), 5);
    }

    #[tokio::test]
    async fn ticker_stops_on_cancel() {
        let s = Arc::new(source(4));
        let cancel = CancellationToken::new();
        s.spawn_ticker(cancel.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        s.join().await;
        assert!(s.emitted() > 0);
        assert!(s.task.lock().is_none());
    }

    #[tokio::test]
    async fn join_stops_the_ticker_without_outer_cancel() {
        let s = Arc::new(source(4));
        let cancel = CancellationToken::new();
        s.spawn_ticker(cancel.clone());
        tokio::time::timeout(Duration::from_secs(5), s.join())
            .await
            .expect("ticker joined");
        assert!(!cancel.is_cancelled());
        assert!(s.task.lock().is_none());
    }
}
