//! The container: registry, flags, resolution and the lifecycle in one place.
//!
//! Phase order: **bind config → resolve (invokes run) → start → wait → stop**.

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Arc;

use clap::{ArgMatches, Command};
use figment::Figment;
use serde_json::{Map, Value as Json};

use crate::cell::Cell;
use crate::error::HiveError;
use crate::flags::{self, ConfigLayers};
use crate::graph::{ObjectGraph, Resolver, Target};
use crate::inject::{TypeKey, Value};
use crate::lifecycle::Lifecycle;
use crate::registry::CellRegistry;
use crate::runtime::{self, RunOptions, Shutdowner};

/// Name of the inspection sub-command returned by [`Hive::command`].
pub const INSPECT_COMMAND: &str = "hive";

/// A dependency-injection container built from declared cells.
///
/// ```rust,ignore
/// let mut hive = Hive::new(cells)?;
/// let cmd = hive.register_flags(Cli::command());
/// let matches = cmd.get_matches();
/// hive.bind_flags(&matches)?;
/// hive.run(RunOptions::default()).await?;
/// ```
pub struct Hive {
    registry: CellRegistry,
    lifecycle: Lifecycle,
    shutdowner: Shutdowner,
    layers: ConfigLayers,
    graph: ObjectGraph,
    populated: bool,
}

impl std::fmt::Debug for Hive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hive")
            .field("registry", &self.registry)
            .field("lifecycle", &self.lifecycle)
            .field("populated", &self.populated)
            .finish()
    }
}

impl Hive {
    pub fn new(cells: Vec<Cell>) -> Result<Self, HiveError> {
        Ok(Self {
            registry: CellRegistry::build(cells)?,
            lifecycle: Lifecycle::new(),
            shutdowner: Shutdowner::new(),
            layers: ConfigLayers::default(),
            graph: ObjectGraph::default(),
            populated: false,
        })
    }

    pub fn registry(&self) -> &CellRegistry {
        &self.registry
    }

    /// Environment variable prefix for configuration flags (default `HIVE_`).
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.layers.env_prefix = prefix.into();
        self
    }

    /// Config-file layer: values keyed by flag name.
    pub fn with_config_values(mut self, values: Map<String, Json>) -> Self {
        self.layers.file.extend(values);
        self
    }

    /// Config-file layer read from an arbitrary figment.
    pub fn with_config_source(self, source: Figment) -> Result<Self, HiveError> {
        let values: Map<String, Json> = source.extract().map_err(|e| HiveError::Config {
            section: "config source".to_string(),
            source: e.into(),
        })?;
        Ok(self.with_config_values(values))
    }

    /// Register one `--flag` per declared configuration option on `cmd`.
    pub fn register_flags(&self, cmd: Command) -> Command {
        flags::register(cmd, self.registry.configs())
    }

    /// Record the flags given explicitly in `matches`. Flags left at their
    /// defaults do not override the file or environment layers.
    pub fn bind_flags(&mut self, matches: &ArgMatches) -> Result<(), HiveError> {
        self.layers.explicit = flags::collect_explicit(matches, self.registry.configs())?;
        tracing::debug!(explicit = self.layers.explicit.len(), "Configuration flags bound");
        Ok(())
    }

    pub fn shutdowner(&self) -> Shutdowner {
        self.shutdowner.clone()
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn graph(&self) -> &ObjectGraph {
        &self.graph
    }

    /// A constructed value, if the resolution reached it.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.graph.get::<T>()
    }

    /// Providers a run would construct, in construction order. Nothing is
    /// constructed.
    pub fn plan(&self) -> Result<Vec<String>, HiveError> {
        let mut resolver = Resolver::planner(&self.registry);
        resolver.resolve_invokes()?;
        Ok(resolver.into_order())
    }

    fn bind_config(&self) -> Result<HashMap<TypeKey, Value>, HiveError> {
        let mut bound = HashMap::new();
        for section in self.registry.configs() {
            tracing::debug!(cell = %section.name, "Binding configuration section");
            bound.insert(section.key, self.layers.bind(section)?);
        }
        Ok(bound)
    }

    /// Bind configuration and resolve the graph rooted at the invoke
    /// functions, without running the lifecycle. Idempotent.
    pub fn populate(&mut self) -> Result<(), HiveError> {
        if self.populated {
            return Ok(());
        }
        tracing::info!("Phase: bind config");
        let config = self.bind_config()?;

        tracing::info!(invokes = self.registry.invokes().len(), "Phase: resolve");
        self.graph
            .insert(TypeKey::of::<Lifecycle>(), Arc::new(self.lifecycle.clone()));
        self.graph
            .insert(TypeKey::of::<Shutdowner>(), Arc::new(self.shutdowner.clone()));

        let target = Target {
            graph: &mut self.graph,
            lifecycle: &self.lifecycle,
            config: &config,
        };
        let mut resolver = Resolver::constructor(&self.registry, target);
        resolver.resolve_invokes()?;
        let constructed = resolver.into_order().len();

        tracing::info!(constructed, hooks = self.lifecycle.len(), "Object graph resolved");
        self.populated = true;
        Ok(())
    }

    /// Full cycle: bind config → resolve → start → wait for shutdown → stop.
    ///
    /// Returns the first start error, the error a component passed to
    /// [`Shutdowner::shutdown_with_error`], or the aggregated stop errors,
    /// in that order of precedence.
    pub async fn run(&mut self, opts: RunOptions) -> Result<(), HiveError> {
        self.populate()?;

        let trigger = runtime::spawn_trigger(opts.shutdown, self.shutdowner.clone());
        let result = self.run_lifecycle().await;
        trigger.abort();
        result
    }

    async fn run_lifecycle(&self) -> Result<(), HiveError> {
        let cancel = self.shutdowner.token();
        self.lifecycle.start(cancel.clone()).await?;

        tracing::info!("Hive running; waiting for shutdown");
        cancel.cancelled().await;

        let shutdown_error = self.shutdowner.take_error();
        let stopped = self.lifecycle.stop(cancel).await;
        match shutdown_error {
            Some(source) => {
                if let Err(e) = stopped {
                    tracing::warn!(error = %e, "Stop failures superseded by shutdown error");
                }
                self.lifecycle.mark_failed();
                Err(HiveError::ExternalShutdown { source })
            }
            None => {
                if stopped.is_ok() {
                    tracing::info!("Hive stopped");
                }
                stopped
            }
        }
    }

    /// The read-only inspection sub-command.
    pub fn command() -> Command {
        Command::new(INSPECT_COMMAND)
            .about("Print the declared cells and the objects a run would construct")
    }

    /// Print the cell tree and the would-be construction order.
    pub fn print_objects(&self, w: &mut dyn Write) -> io::Result<()> {
        self.registry.write_tree(w)?;
        writeln!(w)?;
        match self.plan() {
            Ok(order) if order.is_empty() => writeln!(w, "Nothing would be constructed.")?,
            Ok(order) => {
                writeln!(w, "Construction order:")?;
                for (i, name) in order.iter().enumerate() {
                    writeln!(w, "  {}. {}", i + 1, name)?;
                }
            }
            Err(e) => writeln!(w, "Resolution would fail: {e}")?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{invoke, provide};

    struct Leaf;

    #[test]
    fn populate_is_idempotent() {
        let mut hive = Hive::new(vec![
            provide(|| -> anyhow::Result<Arc<Leaf>> { Ok(Arc::new(Leaf)) }),
            invoke(|_: Arc<Leaf>| -> anyhow::Result<()> { Ok(()) }),
        ])
        .unwrap();
        hive.populate().unwrap();
        hive.populate().unwrap();
        assert_eq!(hive.graph().construction_order().len(), 1);
        assert!(hive.get::<Leaf>().is_some());
    }

    #[test]
    fn print_objects_reports_plan_failures() {
        let hive = Hive::new(vec![invoke(|_: Arc<Leaf>| -> anyhow::Result<()> { Ok(()) })]).unwrap();
        let mut out = Vec::new();
        hive.print_objects(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Resolution would fail: missing type Leaf"), "{text}");
    }

    #[test]
    fn inspection_command_is_named_hive() {
        assert_eq!(Hive::command().get_name(), "hive");
    }
}
