//! Metric sets and the built-in metrics registry.
//!
//! A metric set is any value exposing prometheus collectors. It is declared
//! with [`crate::cell::metric`], provided like any other value, and its
//! collectors are registered when the [`MetricsRegistry`] is constructed.
//! Requiring `Arc<MetricsRegistry>` therefore forces every declared set.

use std::sync::Arc;

use anyhow::Context;
use prometheus::core::Collector;
use prometheus::{Encoder, Registry, TextEncoder};

use crate::graph::ObjectGraph;
use crate::inject::{TypeKey, Value};
use crate::registry::MetricEntry;

pub trait MetricSet: Send + Sync + 'static {
    /// Collectors to register. Called once, when the registry is built.
    fn collectors(&self) -> Vec<Box<dyn Collector>>;
}

/// Prometheus registry holding the collectors of every declared metric set.
#[derive(Clone, Default)]
pub struct MetricsRegistry {
    registry: Registry,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("families", &self.registry.gather().len())
            .finish()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn register(&self, set: &dyn MetricSet) -> anyhow::Result<()> {
        for collector in set.collectors() {
            self.registry
                .register(collector)
                .context("failed to register collector")?;
        }
        Ok(())
    }

    /// All gathered metrics in the prometheus text exposition format.
    pub fn gather_text(&self) -> anyhow::Result<String> {
        let families = self.registry.gather();
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&families, &mut buf)
            .context("failed to encode metrics")?;
        Ok(String::from_utf8(buf)?)
    }

    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_string()
    }
}

/// Registers the collectors of an erased metric set of type `M`.
pub(crate) fn register_erased<M: MetricSet>(value: &Value, registry: &Registry) -> anyhow::Result<()> {
    let set = value
        .clone()
        .downcast::<M>()
        .map_err(|_| anyhow::anyhow!("value is not a {}", std::any::type_name::<M>()))?;
    for collector in set.collectors() {
        registry
            .register(collector)
            .with_context(|| format!("failed to register collector of {}", crate::naming::pretty_type::<M>()))?;
    }
    Ok(())
}

/// Builds the metrics registry from already constructed metric sets.
pub(crate) fn build_registry(entries: &[MetricEntry], graph: &ObjectGraph) -> anyhow::Result<Vec<(TypeKey, Value)>> {
    let metrics = MetricsRegistry::new();
    for entry in entries {
        let value = graph
            .get_raw(&entry.key)
            .with_context(|| format!("metric set {} was not constructed", entry.name))?;
        (entry.register)(value, metrics.registry())?;
    }
    tracing::debug!(sets = entries.len(), "Metrics registry built");
    Ok(vec![(TypeKey::of::<MetricsRegistry>(), Arc::new(metrics) as Value)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{IntCounter, IntGauge};

    struct Requests {
        total: IntCounter,
        in_flight: IntGauge,
    }

    impl Requests {
        fn new() -> Self {
            Self {
                total: IntCounter::new("requests_total", "Handled requests").unwrap(),
                in_flight: IntGauge::new("requests_in_flight", "Requests in flight").unwrap(),
            }
        }
    }

    impl MetricSet for Requests {
        fn collectors(&self) -> Vec<Box<dyn Collector>> {
            vec![Box::new(self.total.clone()), Box::new(self.in_flight.clone())]
        }
    }

    #[test]
    fn gathered_text_contains_registered_metrics() {
        let set = Requests::new();
        set.total.inc_by(3);
        let metrics = MetricsRegistry::new();
        metrics.register(&set).unwrap();

        let text = metrics.gather_text().unwrap();
        assert!(text.contains("requests_total 3"), "{text}");
        assert!(text.contains("requests_in_flight 0"), "{text}");
    }

    #[test]
    fn registering_the_same_set_twice_fails() {
        let set = Requests::new();
        let metrics = MetricsRegistry::new();
        metrics.register(&set).unwrap();
        assert!(metrics.register(&set).is_err());
    }

    #[test]
    fn erased_registration_downcasts() {
        let value: Value = Arc::new(Requests::new());
        let registry = Registry::new();
        register_erased::<Requests>(&value, &registry).unwrap();
        assert_eq!(registry.gather().len(), 2);

        let wrong: Value = Arc::new(5u32);
        assert!(register_erased::<Requests>(&wrong, &Registry::new()).is_err());
    }
}
