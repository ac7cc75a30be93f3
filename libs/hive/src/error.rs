use thiserror::Error;

use crate::lifecycle::LifecycleState;

/// A single failed hook, as collected while stopping.
#[derive(Debug, Error)]
#[error("{hook}: {error:#}")]
pub struct HookError {
    pub hook: String,
    pub error: anyhow::Error,
}

/// Structured errors for registration, resolution and the lifecycle.
#[derive(Debug, Error)]
pub enum HiveError {
    // Registration errors
    #[error("{type_name} is provided by both {first} and {second}")]
    DuplicateProvider {
        type_name: String,
        first: String,
        second: String,
    },
    #[error("flag '--{flag}' is declared by both {first} and {second}")]
    DuplicateFlag {
        flag: String,
        first: String,
        second: String,
    },
    #[error("invalid module id '{id}': must match {pattern}")]
    InvalidModuleId { id: String, pattern: &'static str },

    // Configuration errors
    #[error("invalid value '{value}' for flag '--{flag}': {reason}")]
    InvalidFlagValue {
        flag: String,
        value: String,
        reason: String,
    },
    #[error("failed to bind configuration section {section}")]
    Config {
        section: String,
        #[source]
        source: anyhow::Error,
    },

    // Resolution errors
    #[error("missing type {missing} required by {requester}")]
    MissingProvider { requester: String, missing: String },
    #[error("cyclic dependency detected: {}", path.join(" -> "))]
    CyclicDependency { path: Vec<String> },
    #[error("constructor {cell} failed")]
    ConstructionFailed {
        cell: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("invoke {cell} failed")]
    InvokeFailed {
        cell: String,
        #[source]
        source: anyhow::Error,
    },

    // Lifecycle errors
    #[error("start hook {hook} failed")]
    StartFailed {
        hook: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("{} stop hook(s) failed: {}", errors.len(), join_hook_errors(errors))]
    StopFailed { errors: Vec<HookError> },
    #[error("shutdown requested with error")]
    ExternalShutdown {
        #[source]
        source: anyhow::Error,
    },
    #[error("cannot {operation} lifecycle in state {state}")]
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },
}

fn join_hook_errors(errors: &[HookError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_lists_full_path() {
        let err = HiveError::CyclicDependency {
            path: vec!["A".into(), "B".into(), "A".into()],
        };
        assert_eq!(err.to_string(), "cyclic dependency detected: A -> B -> A");
    }

    #[test]
    fn stop_failed_lists_every_hook() {
        let err = HiveError::StopFailed {
            errors: vec![
                HookError {
                    hook: "b".into(),
                    error: anyhow::anyhow!("boom"),
                },
                HookError {
                    hook: "a".into(),
                    error: anyhow::anyhow!("bang"),
                },
            ],
        };
        assert_eq!(err.to_string(), "2 stop hook(s) failed: b: boom; a: bang");
    }
}
