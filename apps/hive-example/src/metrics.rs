use hive::MetricSet;
use prometheus::core::Collector;
use prometheus::{IntCounter, IntCounterVec, Opts};

/// Request and event counters exposed on `/metrics`.
pub struct ExampleMetrics {
    pub requests: IntCounterVec,
    pub events_emitted: IntCounter,
}

impl ExampleMetrics {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            requests: IntCounterVec::new(
                Opts::new("example_http_requests_total", "HTTP requests by path"),
                &["path"],
            )?,
            events_emitted: IntCounter::new("example_events_emitted_total", "Tick events emitted")?,
        })
    }
}

impl MetricSet for ExampleMetrics {
    fn collectors(&self) -> Vec<Box<dyn Collector>> {
        vec![
            Box::new(self.requests.clone()),
            Box::new(self.events_emitted.clone()),
        ]
    }
}
