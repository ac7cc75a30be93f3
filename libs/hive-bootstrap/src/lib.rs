//! Process bootstrap for hive applications: layered application config,
//! logging initialization and OS signal handling.

pub mod config;
pub mod logging;
pub mod signals;

pub use config::*;
pub use logging::*;
pub use signals::*;
