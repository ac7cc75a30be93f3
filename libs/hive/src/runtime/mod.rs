mod runner;
mod shutdown;

pub use runner::{RunOptions, ShutdownOptions};
pub(crate) use runner::spawn_trigger;
pub use shutdown::Shutdowner;
