//! # Hive - Dependency Injection and Lifecycle Container
//!
//! Applications are assembled from declared **cells**: constructors that
//! provide typed values, invoke functions that act as resolution roots,
//! configuration sections that become command-line flags, and metric sets.
//!
//! ## Features
//!
//! - **Lazy**: only what an invoke function transitively requires is constructed
//! - **Typed**: requirements and outputs are matched by Rust type, never by name
//! - **Ordered lifecycle**: hooks start in construction order and stop in reverse
//! - **Inspectable**: the `hive` sub-command prints the cell tree and the
//!   would-be construction order without building anything
//!
//! ## Example
//!
//! ```rust,ignore
//! use hive::{cell, Hive, Hook, Lifecycle, RunOptions};
//! use std::sync::Arc;
//!
//! struct Db;
//! struct Server { db: Arc<Db> }
//!
//! fn new_db() -> anyhow::Result<Arc<Db>> {
//!     Ok(Arc::new(Db))
//! }
//!
//! fn new_server(db: Arc<Db>, lc: Lifecycle) -> anyhow::Result<Arc<Server>> {
//!     lc.append(Hook::new().on_start(|_| async { Ok(()) }));
//!     Ok(Arc::new(Server { db }))
//! }
//!
//! let mut hive = Hive::new(vec![
//!     cell::provide(new_db),
//!     cell::provide(new_server),
//!     cell::invoke(|_: Arc<Server>| Ok(())),
//! ])?;
//! hive.run(RunOptions::default()).await?;
//! ```

pub use anyhow::Result;
pub use async_trait::async_trait;

pub mod cell;
pub mod flags;
pub mod lifecycle;
pub mod metrics;
pub mod naming;
pub mod registry;

mod error;
mod graph;
mod hive;
mod inject;
mod runtime;

pub use cell::Cell;
pub use error::{HiveError, HookError};
pub use flags::{FlagSet, Flagger, DEFAULT_ENV_PREFIX};
pub use graph::ObjectGraph;
pub use hive::{Hive, INSPECT_COMMAND};
pub use inject::{Dependency, Injectable, Provides, TypeKey, Value};
pub use lifecycle::{Hook, HookInterface, Lifecycle, LifecycleState};
pub use metrics::{MetricSet, MetricsRegistry};
pub use naming::Symbol;
pub use runtime::{RunOptions, ShutdownOptions, Shutdowner};
