//! Object graph and the lazy depth-first resolver that populates it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::HiveError;
use crate::inject::{TypeKey, Value};
use crate::lifecycle::Lifecycle;
use crate::metrics;
use crate::registry::{CellRegistry, Construct, InvokeEntry, ProviderEntry};

/// Memoized mapping from declared type to constructed value.
///
/// Written only while the graph is being resolved; afterwards the hive
/// hands out clones of the stored `Arc`s and never mutates it again.
#[derive(Default)]
pub struct ObjectGraph {
    values: HashMap<TypeKey, Value>,
    constructed: Vec<String>,
}

impl std::fmt::Debug for ObjectGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let types: Vec<String> = self.values.keys().map(TypeKey::pretty).collect();
        f.debug_struct("ObjectGraph")
            .field("types", &types)
            .field("constructed", &self.constructed)
            .finish()
    }
}

impl ObjectGraph {
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.values
            .get(&TypeKey::of::<T>())
            .cloned()
            .and_then(|v| v.downcast::<T>().ok())
    }

    pub fn contains(&self, key: &TypeKey) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Names of the providers that ran, in construction order.
    pub fn construction_order(&self) -> &[String] {
        &self.constructed
    }

    pub(crate) fn get_raw(&self, key: &TypeKey) -> Option<&Value> {
        self.values.get(key)
    }

    pub(crate) fn insert(&mut self, key: TypeKey, value: Value) {
        self.values.insert(key, value);
    }

    fn record_constructed(&mut self, provider: &str) {
        self.constructed.push(provider.to_string());
    }
}

/// Where constructed values go. A resolver without a target only plans.
pub(crate) struct Target<'a> {
    pub graph: &'a mut ObjectGraph,
    pub lifecycle: &'a Lifecycle,
    /// Bound configuration sections by type.
    pub config: &'a HashMap<TypeKey, Value>,
}

/// Depth-first resolver over the registry's provider adjacency.
///
/// The same walk serves both the real construction and the dry-run plan
/// printed by the inspection command, so both report missing providers and
/// cycles identically.
pub(crate) struct Resolver<'a> {
    registry: &'a CellRegistry,
    target: Option<Target<'a>>,
    stack: Vec<TypeKey>,
    done: HashSet<usize>,
    order: Vec<String>,
}

impl<'a> Resolver<'a> {
    pub fn planner(registry: &'a CellRegistry) -> Self {
        Self {
            registry,
            target: None,
            stack: Vec::new(),
            done: HashSet::new(),
            order: Vec::new(),
        }
    }

    pub fn constructor(registry: &'a CellRegistry, target: Target<'a>) -> Self {
        Self {
            target: Some(target),
            ..Self::planner(registry)
        }
    }

    /// Provider names in the order they were (or would be) constructed.
    pub fn into_order(self) -> Vec<String> {
        self.order
    }

    /// Resolve the requirements of every invoke function, in registration
    /// order, calling each invoke once its inputs exist.
    pub fn resolve_invokes(&mut self) -> Result<(), HiveError> {
        let registry = self.registry;
        for invoke in registry.invokes() {
            self.resolve_invoke(invoke)?;
        }
        Ok(())
    }

    fn resolve_invoke(&mut self, invoke: &'a InvokeEntry) -> Result<(), HiveError> {
        for input in &invoke.inputs {
            self.visit(&invoke.name, *input)?;
        }

        let Some(target) = self.target.as_mut() else {
            return Ok(());
        };
        tracing::debug!(cell = %invoke.name, "Invoking");
        match (invoke.call)(&*target.graph) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(HiveError::InvokeFailed {
                cell: invoke.name.clone(),
                source,
            }),
            Err(missing) => Err(HiveError::MissingProvider {
                requester: invoke.name.clone(),
                missing: missing.pretty(),
            }),
        }
    }

    fn visit(&mut self, requester: &str, key: TypeKey) -> Result<(), HiveError> {
        if self.registry.is_builtin(&key) {
            return Ok(());
        }
        let registry = self.registry;
        let Some((idx, provider)) = registry.provider_for(&key) else {
            return Err(HiveError::MissingProvider {
                requester: requester.to_string(),
                missing: key.pretty(),
            });
        };
        if self.done.contains(&idx) {
            return Ok(());
        }
        if let Some(pos) = self.stack.iter().position(|k| *k == key) {
            let mut path: Vec<String> = self.stack[pos..].iter().map(TypeKey::pretty).collect();
            path.push(key.pretty());
            return Err(HiveError::CyclicDependency { path });
        }

        self.stack.push(key);
        for input in &provider.inputs {
            self.visit(&provider.name, *input)?;
        }
        self.stack.pop();

        self.construct(provider)?;
        self.done.insert(idx);
        Ok(())
    }

    fn construct(&mut self, provider: &ProviderEntry) -> Result<(), HiveError> {
        self.order.push(provider.name.clone());
        let registry = self.registry;
        let Some(target) = self.target.as_mut() else {
            return Ok(());
        };

        tracing::debug!(cell = %provider.name, "Constructing");
        let values = match &provider.construct {
            Construct::Ctor(ctor) => {
                target.lifecycle.set_owner(Some(provider.symbol.clone()));
                let result = ctor(&*target.graph);
                target.lifecycle.set_owner(None);
                match result {
                    Ok(Ok(values)) => values,
                    Ok(Err(source)) => {
                        return Err(HiveError::ConstructionFailed {
                            cell: provider.name.clone(),
                            source,
                        })
                    }
                    Err(missing) => {
                        return Err(HiveError::MissingProvider {
                            requester: provider.name.clone(),
                            missing: missing.pretty(),
                        })
                    }
                }
            }
            Construct::Config(key) => {
                let value = target.config.get(key).cloned().ok_or_else(|| {
                    HiveError::ConstructionFailed {
                        cell: provider.name.clone(),
                        source: anyhow::anyhow!("configuration section {key} was not bound"),
                    }
                })?;
                vec![(*key, value)]
            }
            Construct::Metrics => metrics::build_registry(registry.metrics(), &*target.graph)
                .map_err(|source| HiveError::ConstructionFailed {
                    cell: provider.name.clone(),
                    source,
                })?,
        };

        for (key, value) in values {
            target.graph.insert(key, value);
        }
        target.graph.record_constructed(&provider.name);
        Ok(())
    }
}
