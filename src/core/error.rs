use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigMissingKey,
    ConfigInvalidJson,
    ConfigInvalidYaml,
    ConfigInvalidValue,

    ValidationMissingArgument,
    ValidationInvalidArgument,
    ValidationInvalidJson,

    PipelineNotFound,
    PipelineInvalid,
    PipelineCycle,
    PipelineMissingSecret,

    StageFailed,
    StageTimeout,

    DeployClusterAuthFailed,
    DeployOverlayMissing,

    NotifyFailed,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigMissingKey => "config.missing_key",
            ErrorCode::ConfigInvalidJson => "config.invalid_json",
            ErrorCode::ConfigInvalidYaml => "config.invalid_yaml",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",

            ErrorCode::ValidationMissingArgument => "validation.missing_argument",
            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",
            ErrorCode::ValidationInvalidJson => "validation.invalid_json",

            ErrorCode::PipelineNotFound => "pipeline.not_found",
            ErrorCode::PipelineInvalid => "pipeline.invalid",
            ErrorCode::PipelineCycle => "pipeline.cycle",
            ErrorCode::PipelineMissingSecret => "pipeline.missing_secret",

            ErrorCode::StageFailed => "stage.failed",
            ErrorCode::StageTimeout => "stage.timeout",

            ErrorCode::DeployClusterAuthFailed => "deploy.cluster_auth_failed",
            ErrorCode::DeployOverlayMissing => "deploy.overlay_missing",

            ErrorCode::NotifyFailed => "notify.failed",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMissingKeyDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidFileDetails {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
    pub retryable: Option<bool>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingArgumentDetails {
    pub args: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tried: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalJsonErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageFailedDetails {
    pub stage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
            retryable: None,
        }
    }

    pub fn validation_missing_argument(args: Vec<String>) -> Self {
        Self::new(
            ErrorCode::ValidationMissingArgument,
            "Missing required argument",
            to_details(MissingArgumentDetails { args }),
        )
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        id: Option<String>,
        tried: Option<Vec<String>>,
    ) -> Self {
        let problem = problem.into();
        let details = to_details(InvalidArgumentDetails {
            field: field.into(),
            problem: problem.clone(),
            id,
            tried,
        });

        Self::new(
            ErrorCode::ValidationInvalidArgument,
            format!("Invalid argument: {}", problem),
            details,
        )
    }

    pub fn validation_invalid_json(err: serde_json::Error, context: Option<String>) -> Self {
        let details = serde_json::json!({
            "error": err.to_string(),
            "context": context,
        });

        Self::new(ErrorCode::ValidationInvalidJson, "Invalid JSON", details)
    }

    pub fn config_missing_key(key: impl Into<String>, path: Option<String>) -> Self {
        Self::new(
            ErrorCode::ConfigMissingKey,
            "Missing required configuration key",
            to_details(ConfigMissingKeyDetails {
                key: key.into(),
                path,
            }),
        )
    }

    pub fn config_invalid_json(path: impl Into<String>, err: serde_json::Error) -> Self {
        Self::new(
            ErrorCode::ConfigInvalidJson,
            "Invalid JSON in configuration",
            to_details(ConfigInvalidFileDetails {
                path: path.into(),
                error: err.to_string(),
            }),
        )
    }

    pub fn config_invalid_yaml(path: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ConfigInvalidYaml,
            "Invalid YAML in pipeline definition",
            to_details(ConfigInvalidFileDetails {
                path: path.into(),
                error: error.into(),
            }),
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        Self::new(
            ErrorCode::ConfigInvalidValue,
            "Invalid configuration value",
            to_details(ConfigInvalidValueDetails {
                key: key.into(),
                value,
                problem: problem.into(),
            }),
        )
    }

    pub fn pipeline_not_found(path: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::PipelineNotFound,
            "Pipeline definition not found",
            serde_json::json!({ "path": path.into() }),
        )
        .with_hint("Run 'dominion init' to write the standard pipeline definition")
    }

    pub fn pipeline_invalid(field: impl Into<String>, problem: impl Into<String>) -> Self {
        let problem = problem.into();
        Self::new(
            ErrorCode::PipelineInvalid,
            format!("Invalid pipeline: {}", problem),
            serde_json::json!({ "field": field.into(), "problem": problem }),
        )
    }

    pub fn pipeline_cycle(pending: Vec<String>) -> Self {
        Self::new(
            ErrorCode::PipelineCycle,
            "Stages contain a dependency cycle",
            serde_json::json!({ "stages": pending }),
        )
    }

    pub fn pipeline_missing_secret(names: Vec<String>) -> Self {
        Self::new(
            ErrorCode::PipelineMissingSecret,
            format!("Required secrets not set: {}", names.join(", ")),
            serde_json::json!({ "secrets": names }),
        )
        .with_hint("Export each secret as an environment variable before running")
    }

    pub fn stage_failed(details: StageFailedDetails) -> Self {
        let message = match &details.step {
            Some(step) => format!("Stage '{}' failed at step '{}'", details.stage, step),
            None => format!("Stage '{}' failed", details.stage),
        };
        Self::new(ErrorCode::StageFailed, message, to_details(details))
    }

    pub fn stage_timeout(stage: impl Into<String>, timeout_minutes: u64) -> Self {
        let stage = stage.into();
        Self::new(
            ErrorCode::StageTimeout,
            format!(
                "Stage '{}' exceeded its {} minute timeout",
                stage, timeout_minutes
            ),
            serde_json::json!({ "stage": stage, "timeoutMinutes": timeout_minutes }),
        )
    }

    pub fn deploy_cluster_auth_failed(cluster: impl Into<String>, stderr: impl Into<String>) -> Self {
        let cluster = cluster.into();
        Self::new(
            ErrorCode::DeployClusterAuthFailed,
            format!("Failed to authenticate against cluster '{}'", cluster),
            serde_json::json!({ "cluster": cluster, "stderr": stderr.into() }),
        )
        .with_hint("Check the cloud credentials and that the cluster exists in this account")
    }

    pub fn deploy_overlay_missing(path: impl Into<String>) -> Self {
        let path = path.into();
        Self::new(
            ErrorCode::DeployOverlayMissing,
            format!("Overlay directory '{}' does not exist", path),
            serde_json::json!({ "path": path }),
        )
        .with_hint("Create the overlay for this environment or pick another environment")
    }

    pub fn notify_failed(error: impl Into<String>) -> Self {
        let error = error.into();
        Self::new(
            ErrorCode::NotifyFailed,
            format!("Notification failed: {}", error),
            serde_json::json!({ "error": error }),
        )
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalIoError,
            "IO error",
            to_details(InternalIoErrorDetails {
                error: error.into(),
                context,
            }),
        )
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalJsonError,
            "JSON error",
            to_details(InternalJsonErrorDetails {
                error: error.into(),
                context,
            }),
        )
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalUnexpected,
            "Unexpected error",
            serde_json::json!({ "error": error.into() }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_dotted() {
        assert_eq!(
            ErrorCode::DeployOverlayMissing.as_str(),
            "deploy.overlay_missing"
        );
        assert_eq!(
            ErrorCode::DeployClusterAuthFailed.as_str(),
            "deploy.cluster_auth_failed"
        );
    }

    #[test]
    fn invalid_argument_carries_tried_values() {
        let err = Error::validation_invalid_argument(
            "environment",
            "Unknown environment 'staging'",
            Some("staging".to_string()),
            Some(vec!["dev".to_string(), "qa".to_string()]),
        );
        assert_eq!(err.code, ErrorCode::ValidationInvalidArgument);
        assert_eq!(err.details["tried"][1], "qa");
        assert_eq!(err.details["id"], "staging");
    }

    #[test]
    fn missing_secret_lists_names_and_hint() {
        let err = Error::pipeline_missing_secret(vec!["SONAR_TOKEN".to_string()]);
        assert!(err.message.contains("SONAR_TOKEN"));
        assert_eq!(err.hints.len(), 1);
    }

    #[test]
    fn stage_failed_message_names_step() {
        let err = Error::stage_failed(StageFailedDetails {
            stage: "deploy".to_string(),
            step: Some("apply overlay".to_string()),
            command: None,
            exit_code: 1,
            stdout: String::new(),
            stderr: "boom".to_string(),
        });
        assert_eq!(err.message, "Stage 'deploy' failed at step 'apply overlay'");
        assert_eq!(err.details["exitCode"], 1);
    }
}
