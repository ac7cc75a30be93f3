use std::sync::Arc;

use hive::cell::{config, invoke, metric, module, provide};
use hive::Cell;

use crate::events::{self, EventsConfig};
use crate::jobs::{self, JobsConfig};
use crate::metrics::ExampleMetrics;
use crate::server::{self, Server, ServerConfig};

/// Forces the HTTP server and, through it, everything it depends on.
fn serve(_server: Arc<Server>) -> anyhow::Result<()> {
    Ok(())
}

/// Every cell of the example application.
pub fn cells() -> Vec<Cell> {
    vec![
        module(
            "server",
            "HTTP server",
            vec![config(ServerConfig::default()), provide(server::new_server)],
        ),
        module(
            "events",
            "Tick event source",
            vec![config(EventsConfig::default()), provide(events::new_event_source)],
        ),
        module(
            "jobs",
            "Periodic jobs",
            vec![config(JobsConfig::default()), provide(jobs::new_jobs)],
        ),
        module("metrics", "Example metrics", vec![metric(ExampleMetrics::new)]),
        invoke(serve),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive::Hive;

    #[test]
    fn only_what_the_server_needs_is_planned() {
        let hive = Hive::new(cells()).unwrap();
        let plan = hive.plan().unwrap();

        assert!(plan.iter().any(|p| p.starts_with("new_server (")), "{plan:?}");
        assert!(plan.iter().any(|p| p.starts_with("new_event_source (")), "{plan:?}");
        assert!(!plan.iter().any(|p| p.starts_with("new_jobs (")), "{plan:?}");
        assert!(plan.last().unwrap().starts_with("new_server ("), "{plan:?}");
    }

    #[test]
    fn every_config_option_becomes_a_flag() {
        let hive = Hive::new(cells()).unwrap();
        let cmd = hive.register_flags(clap::Command::new("hive-example"));
        let ids: Vec<&str> = cmd.get_arguments().map(|a| a.get_id().as_str()).collect();
        for flag in [
            "http-host",
            "http-port",
            "greeting",
            "tick-interval-ms",
            "event-history",
            "job-interval-ms",
        ] {
            assert!(ids.contains(&flag), "missing --{flag} in {ids:?}");
        }
    }
}
