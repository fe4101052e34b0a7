//! Run triggers and input resolution.
//!
//! A run starts either manually (environment + optional image version) or
//! from a repository event (push or pull request on a matching branch).
//! Inputs are validated here, before any stage executes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::tag::{self, ImageTag};

/// The `on:` block of a pipeline definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerConfig {
    #[serde(default = "default_manual")]
    pub manual: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push: Option<EventFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<EventFilter>,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            manual: default_manual(),
            push: None,
            pull_request: None,
        }
    }
}

fn default_manual() -> bool {
    true
}

/// Branch filter for an event trigger. No branches means every branch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub branches: Vec<String>,
}

impl EventFilter {
    pub fn matches(&self, branch: &str) -> bool {
        self.branches.is_empty()
            || self
                .branches
                .iter()
                .any(|pattern| branch_matches(pattern, branch))
    }
}

fn branch_matches(pattern: &str, branch: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => branch.starts_with(prefix),
        None => pattern == branch,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Manual {
        environment: Option<String>,
        image_version: Option<String>,
    },
    Push {
        branch: String,
    },
    PullRequest {
        branch: String,
    },
}

impl Trigger {
    pub fn kind(&self) -> &'static str {
        match self {
            Trigger::Manual { .. } => "manual",
            Trigger::Push { .. } => "push",
            Trigger::PullRequest { .. } => "pull_request",
        }
    }

    /// Build an event trigger from its CLI name.
    pub fn event(name: &str, branch: impl Into<String>) -> Result<Self> {
        let branch = branch.into();
        if branch.trim().is_empty() {
            return Err(Error::validation_missing_argument(vec!["branch".to_string()]));
        }
        match name {
            "push" => Ok(Trigger::Push { branch }),
            "pull_request" | "pull-request" => Ok(Trigger::PullRequest { branch }),
            other => Err(Error::validation_invalid_argument(
                "event",
                format!("Unknown event '{}'", other),
                Some(other.to_string()),
                Some(vec!["push".to_string(), "pull_request".to_string()]),
            )),
        }
    }
}

/// Validated inputs for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunInputs {
    pub trigger: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub environment: Environment,
    pub image_tag: ImageTag,
}

/// Resolve run inputs for a trigger.
///
/// Returns `Ok(None)` when an event does not match the pipeline's filters.
/// Manual runs against a pipeline without a manual trigger, and manual runs
/// naming an unknown environment, are errors.
pub fn resolve_inputs(
    trigger: &Trigger,
    on: &TriggerConfig,
    default_environment: Environment,
    now: DateTime<Utc>,
) -> Result<Option<RunInputs>> {
    match trigger {
        Trigger::Manual {
            environment,
            image_version,
        } => {
            if !on.manual {
                return Err(Error::validation_invalid_argument(
                    "trigger",
                    "Pipeline does not accept manual runs",
                    None,
                    None,
                ));
            }
            let environment = Environment::select(environment.as_deref(), default_environment)?;
            Ok(Some(RunInputs {
                trigger: trigger.kind().to_string(),
                branch: None,
                environment,
                image_tag: tag::resolve(image_version.as_deref(), now),
            }))
        }
        Trigger::Push { branch } | Trigger::PullRequest { branch } => {
            let filter = match trigger {
                Trigger::Push { .. } => on.push.as_ref(),
                _ => on.pull_request.as_ref(),
            };
            match filter {
                Some(filter) if filter.matches(branch) => Ok(Some(RunInputs {
                    trigger: trigger.kind().to_string(),
                    branch: Some(branch.clone()),
                    environment: default_environment,
                    image_tag: tag::resolve(None, now),
                })),
                _ => Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::TagSource;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap()
    }

    fn on_main() -> TriggerConfig {
        TriggerConfig {
            manual: true,
            push: Some(EventFilter {
                branches: vec!["main".to_string()],
            }),
            pull_request: Some(EventFilter {
                branches: vec!["main".to_string(), "release/*".to_string()],
            }),
        }
    }

    fn manual(env: Option<&str>, version: Option<&str>) -> Trigger {
        Trigger::Manual {
            environment: env.map(String::from),
            image_version: version.map(String::from),
        }
    }

    #[test]
    fn manual_run_defaults_environment_and_generates_tag() {
        let inputs = resolve_inputs(&manual(None, None), &on_main(), Environment::Dev, now())
            .unwrap()
            .unwrap();
        assert_eq!(inputs.environment, Environment::Dev);
        assert_eq!(inputs.image_tag.value, "20260102030405");
        assert_eq!(inputs.image_tag.source, TagSource::Generated);
    }

    #[test]
    fn manual_run_uses_supplied_values() {
        let inputs = resolve_inputs(
            &manual(Some("prod"), Some("hotfix-7")),
            &on_main(),
            Environment::Dev,
            now(),
        )
        .unwrap()
        .unwrap();
        assert_eq!(inputs.environment, Environment::Prod);
        assert_eq!(inputs.image_tag.value, "hotfix-7");
    }

    #[test]
    fn manual_run_rejects_unknown_environment() {
        let err = resolve_inputs(
            &manual(Some("staging"), None),
            &on_main(),
            Environment::Dev,
            now(),
        )
        .unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::ValidationInvalidArgument);
    }

    #[test]
    fn manual_run_rejected_when_not_enabled() {
        let on = TriggerConfig {
            manual: false,
            ..on_main()
        };
        assert!(resolve_inputs(&manual(None, None), &on, Environment::Dev, now()).is_err());
    }

    #[test]
    fn push_on_filtered_branch_is_ignored() {
        let trigger = Trigger::Push {
            branch: "feature/x".to_string(),
        };
        assert!(resolve_inputs(&trigger, &on_main(), Environment::Dev, now())
            .unwrap()
            .is_none());
    }

    #[test]
    fn pull_request_matches_prefix_pattern() {
        let trigger = Trigger::PullRequest {
            branch: "release/2026.1".to_string(),
        };
        let inputs = resolve_inputs(&trigger, &on_main(), Environment::Qa, now())
            .unwrap()
            .unwrap();
        assert_eq!(inputs.trigger, "pull_request");
        assert_eq!(inputs.environment, Environment::Qa);
        assert_eq!(inputs.branch.as_deref(), Some("release/2026.1"));
    }

    #[test]
    fn event_without_trigger_config_is_ignored() {
        let trigger = Trigger::Push {
            branch: "main".to_string(),
        };
        let on = TriggerConfig::default();
        assert!(resolve_inputs(&trigger, &on, Environment::Dev, now())
            .unwrap()
            .is_none());
    }

    #[test]
    fn event_names_are_validated() {
        assert!(Trigger::event("push", "main").is_ok());
        assert!(Trigger::event("pull-request", "main").is_ok());
        assert!(Trigger::event("tag", "main").is_err());
        assert!(Trigger::event("push", " ").is_err());
    }
}
