//! Built-in `uses:` actions.
//!
//! - `image-tag` - publish the run's tag and image reference as step outputs
//! - `require-dir` - fail with `deploy.overlay_missing` unless a directory exists
//! - `cluster-auth` - run an authentication command, failing with
//!   `deploy.cluster_auth_failed`

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::context::Outputs;
use crate::error::{Error, ErrorCode, Result};
use crate::pipeline::CapabilityResolver;
use crate::shell::{CommandOutput, CommandRunner, CommandSpec};

pub const IMAGE_TAG: &str = "image-tag";
pub const REQUIRE_DIR: &str = "require-dir";
pub const CLUSTER_AUTH: &str = "cluster-auth";

/// Everything an action may use. `with` and `vars` are already rendered.
pub struct ActionRequest<'a> {
    pub with: &'a HashMap<String, String>,
    pub vars: &'a HashMap<String, String>,
    pub runner: &'a dyn CommandRunner,
    pub dir: Option<&'a Path>,
    pub env: &'a [(String, String)],
    pub deadline: Option<Instant>,
}

impl ActionRequest<'_> {
    fn arg(&self, key: &str) -> Result<&str> {
        self.with
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| Error::config_missing_key(format!("with.{}", key), None))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ActionOutcome {
    pub output: Option<CommandOutput>,
    pub outputs: Outputs,
}

pub trait Action: Send + Sync {
    fn name(&self) -> &'static str;
    fn required_args(&self) -> &'static [&'static str];
    /// `Err` fails the step with the error's code and message.
    fn execute(&self, request: &ActionRequest<'_>) -> Result<ActionOutcome>;
}

struct ImageTagAction;

impl Action for ImageTagAction {
    fn name(&self) -> &'static str {
        IMAGE_TAG
    }

    fn required_args(&self) -> &'static [&'static str] {
        &[]
    }

    fn execute(&self, request: &ActionRequest<'_>) -> Result<ActionOutcome> {
        let mut outputs = Outputs::new();
        for key in ["image_tag", "image"] {
            let value = request
                .vars
                .get(key)
                .ok_or_else(|| Error::internal_unexpected(format!("run variable '{}' not set", key)))?;
            outputs.insert(key.to_string(), value.clone());
        }
        log_status!("tag", "Image {}", outputs["image"]);
        Ok(ActionOutcome {
            output: None,
            outputs,
        })
    }
}

struct RequireDirAction;

impl Action for RequireDirAction {
    fn name(&self) -> &'static str {
        REQUIRE_DIR
    }

    fn required_args(&self) -> &'static [&'static str] {
        &["path"]
    }

    fn execute(&self, request: &ActionRequest<'_>) -> Result<ActionOutcome> {
        let raw = request.arg("path")?;
        let path = PathBuf::from(shellexpand::tilde(raw).to_string());
        let resolved = match request.dir {
            Some(dir) if path.is_relative() => dir.join(&path),
            _ => path,
        };

        if !resolved.is_dir() {
            return Err(Error::deploy_overlay_missing(raw));
        }

        Ok(ActionOutcome::default())
    }
}

struct ClusterAuthAction;

impl Action for ClusterAuthAction {
    fn name(&self) -> &'static str {
        CLUSTER_AUTH
    }

    fn required_args(&self) -> &'static [&'static str] {
        &["command"]
    }

    fn execute(&self, request: &ActionRequest<'_>) -> Result<ActionOutcome> {
        let command = request.arg("command")?;
        let cluster = request
            .with
            .get("cluster")
            .or_else(|| request.vars.get("cluster"))
            .cloned()
            .unwrap_or_default();

        log_status!("deploy", "Authenticating against {}", cluster);
        let output = request.runner.run(&CommandSpec {
            command,
            dir: request.dir,
            env: request.env,
            deadline: request.deadline,
        });

        if output.timed_out {
            return Err(Error::new(
                ErrorCode::StageTimeout,
                format!("Authentication against '{}' timed out", cluster),
                serde_json::json!({ "cluster": cluster }),
            ));
        }
        if !output.success {
            return Err(Error::deploy_cluster_auth_failed(cluster, output.error_text()));
        }

        Ok(ActionOutcome {
            output: Some(output),
            outputs: Outputs::new(),
        })
    }
}

/// Registry of built-in actions.
pub struct BuiltinActions {
    actions: Vec<Box<dyn Action>>,
}

impl Default for BuiltinActions {
    fn default() -> Self {
        Self {
            actions: vec![
                Box::new(ImageTagAction),
                Box::new(RequireDirAction),
                Box::new(ClusterAuthAction),
            ],
        }
    }
}

impl BuiltinActions {
    pub fn get(&self, name: &str) -> Option<&dyn Action> {
        self.actions
            .iter()
            .find(|action| action.name() == name)
            .map(|action| action.as_ref())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.actions.iter().map(|action| action.name()).collect()
    }
}

impl CapabilityResolver for BuiltinActions {
    fn is_supported(&self, action: &str) -> bool {
        self.get(action).is_some()
    }

    fn available(&self) -> Vec<String> {
        self.names().into_iter().map(String::from).collect()
    }

    fn missing_args(&self, action: &str, with: &BTreeMap<String, String>) -> Vec<String> {
        self.get(action)
            .map(|action| {
                action
                    .required_args()
                    .iter()
                    .filter(|key| with.get(**key).is_none_or(|v| v.trim().is_empty()))
                    .map(|key| key.to_string())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::ShellRunner;

    fn request<'a>(
        with: &'a HashMap<String, String>,
        vars: &'a HashMap<String, String>,
        dir: Option<&'a Path>,
    ) -> ActionRequest<'a> {
        ActionRequest {
            with,
            vars,
            runner: &ShellRunner,
            dir,
            env: &[],
            deadline: None,
        }
    }

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn registry_reports_missing_args() {
        let actions = BuiltinActions::default();
        assert!(actions.is_supported(REQUIRE_DIR));
        assert!(!actions.is_supported("helm"));
        assert_eq!(
            actions.missing_args(CLUSTER_AUTH, &BTreeMap::new()),
            vec!["command".to_string()]
        );
        assert!(actions.missing_args(IMAGE_TAG, &BTreeMap::new()).is_empty());
    }

    #[test]
    fn image_tag_publishes_outputs() {
        let vars = map(&[("image_tag", "20260101000000"), ("image", "r/app:20260101000000")]);
        let with = HashMap::new();
        let outcome = ImageTagAction.execute(&request(&with, &vars, None)).unwrap();
        assert_eq!(outcome.outputs["image_tag"], "20260101000000");
        assert_eq!(outcome.outputs["image"], "r/app:20260101000000");
    }

    #[test]
    fn require_dir_resolves_relative_to_workdir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("k8s/overlays/qa")).unwrap();
        let vars = HashMap::new();

        let present = map(&[("path", "k8s/overlays/qa")]);
        assert!(RequireDirAction
            .execute(&request(&present, &vars, Some(dir.path())))
            .is_ok());

        let absent = map(&[("path", "k8s/overlays/prod")]);
        let err = RequireDirAction
            .execute(&request(&absent, &vars, Some(dir.path())))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::DeployOverlayMissing);
    }

    #[test]
    fn cluster_auth_failure_has_distinct_code() {
        let vars = map(&[("cluster", "qa-dominion-cluster")]);
        let with = map(&[("command", "echo denied >&2; exit 1")]);
        let err = ClusterAuthAction
            .execute(&request(&with, &vars, None))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::DeployClusterAuthFailed);
        assert_eq!(err.details["cluster"], "qa-dominion-cluster");
        assert_eq!(err.details["stderr"], "denied");
    }

    #[test]
    fn cluster_auth_success_keeps_output() {
        let vars = HashMap::new();
        let with = map(&[("command", "echo ok"), ("cluster", "dev-dominion-cluster")]);
        let outcome = ClusterAuthAction.execute(&request(&with, &vars, None)).unwrap();
        assert_eq!(outcome.output.unwrap().stdout.trim(), "ok");
    }
}
