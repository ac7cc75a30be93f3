//! Cell declarations.
//!
//! A hive is built from a list of [`Cell`]s. Declaring a cell evaluates
//! nothing: constructors only run when the graph is resolved, and only if
//! something an invoke function needs depends on them.
//!
//! ```rust,ignore
//! let cells = vec![
//!     cell::module("example", "Example application", vec![
//!         cell::config(ServerConfig::default()),
//!         cell::provide(new_server),
//!         cell::metric(ExampleMetrics::new),
//!     ]),
//!     cell::invoke(|_: Arc<Server>| Ok(())),
//! ];
//! ```

use std::any::type_name;
use std::panic::Location;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::flags::{self, FlagSet, Flagger};
use crate::graph::ObjectGraph;
use crate::inject::{Injectable, Provides, TypeKey, Value};
use crate::metrics::{self, MetricSet};
use crate::naming::Symbol;

pub(crate) type CtorFn =
    Arc<dyn Fn(&ObjectGraph) -> Result<anyhow::Result<Vec<(TypeKey, Value)>>, TypeKey> + Send + Sync>;
pub(crate) type InvokeFn = Arc<dyn Fn(&ObjectGraph) -> Result<anyhow::Result<()>, TypeKey> + Send + Sync>;
pub(crate) type ExtractFn = fn(&Value, figment::Figment) -> Result<Value, figment::Error>;
pub(crate) type RegisterMetricsFn = fn(&Value, &prometheus::Registry) -> anyhow::Result<()>;

/// A declared unit of the hive.
pub enum Cell {
    Module(Module),
    Group(Vec<Cell>),
    Provider(Provider),
    Invoke(Invoke),
    Config(Config),
    Metric(Metric),
}

/// Named, ordered group of cells. Grouping only affects diagnostics.
pub struct Module {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) cells: Vec<Cell>,
}

pub struct Provider {
    pub(crate) symbol: Symbol,
    pub(crate) inputs: Vec<TypeKey>,
    pub(crate) outputs: Vec<TypeKey>,
    pub(crate) ctor: CtorFn,
}

pub struct Invoke {
    pub(crate) symbol: Symbol,
    pub(crate) inputs: Vec<TypeKey>,
    pub(crate) call: InvokeFn,
}

pub struct Config {
    pub(crate) symbol: Symbol,
    pub(crate) key: TypeKey,
    pub(crate) flags: FlagSet,
    pub(crate) defaults: Value,
    pub(crate) extract: ExtractFn,
}

pub struct Metric {
    pub(crate) symbol: Symbol,
    pub(crate) key: TypeKey,
    pub(crate) ctor: CtorFn,
    pub(crate) register: RegisterMetricsFn,
}

/// Declare a module: an id (`^[a-z][a-z0-9_-]{1,30}$`), a human title and
/// its cells.
pub fn module(id: impl Into<String>, title: impl Into<String>, cells: Vec<Cell>) -> Cell {
    Cell::Module(Module {
        id: id.into(),
        title: title.into(),
        cells,
    })
}

/// Anonymous grouping of cells.
pub fn group(cells: Vec<Cell>) -> Cell {
    Cell::Group(cells)
}

/// Declare a constructor. Its parameters are its requirements and its
/// return value (`Arc<T>` or a tuple of `Arc`s) is what it provides.
#[track_caller]
pub fn provide<Args, R, F>(ctor: F) -> Cell
where
    Args: 'static,
    R: Provides,
    F: Injectable<Args, R>,
{
    Cell::Provider(Provider {
        symbol: Symbol::of::<F>(Location::caller()),
        inputs: F::inputs(),
        outputs: R::keys(),
        ctor: Arc::new(move |graph: &ObjectGraph| {
            ctor.call(graph).map(|res| res.map(Provides::into_values))
        }),
    })
}

/// Declare an invoke function: a resolution root that forces construction
/// of its parameters.
#[track_caller]
pub fn invoke<Args, F>(f: F) -> Cell
where
    Args: 'static,
    F: Injectable<Args, ()>,
{
    Cell::Invoke(Invoke {
        symbol: Symbol::of::<F>(Location::caller()),
        inputs: F::inputs(),
        call: Arc::new(move |graph: &ObjectGraph| f.call(graph)),
    })
}

/// Declare a configuration section. Its flags are registered from the
/// defaults and the bound value is provided as `Arc<C>`.
#[track_caller]
pub fn config<C>(defaults: C) -> Cell
where
    C: Flagger + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let mut flags = FlagSet::default();
    defaults.flags(&mut flags);
    Cell::Config(Config {
        symbol: Symbol::of::<C>(Location::caller()),
        key: TypeKey::of::<C>(),
        flags,
        defaults: Arc::new(defaults),
        extract: flags::extract_section::<C>,
    })
}

/// Declare a metric set. It is provided as `Arc<M>` and its collectors are
/// registered with the hive's [`crate::MetricsRegistry`] when that is built.
#[track_caller]
pub fn metric<M, F>(ctor: F) -> Cell
where
    M: MetricSet,
    F: Fn() -> anyhow::Result<M> + Send + Sync + 'static,
{
    let key = TypeKey::of::<M>();
    let construct = move |_: &ObjectGraph| -> Result<anyhow::Result<Vec<(TypeKey, Value)>>, TypeKey> {
        Ok(ctor().map(|set| vec![(key, Arc::new(set) as Value)]))
    };
    Cell::Metric(Metric {
        symbol: Symbol {
            name: type_name::<M>().to_string(),
            location: Some(Location::caller().into()),
        },
        key,
        ctor: Arc::new(construct),
        register: metrics::register_erased::<M>,
    })
}
