//! Chat notifications for stage and pipeline outcomes.
//!
//! Notifiers are best-effort: the executor records their errors as warnings
//! and never lets them change a run's status.

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;

use crate::defaults::NotifyConfig;
use crate::error::{Error, Result};

/// The `notify:` block of a pipeline definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyPolicy {
    /// Environment variable holding the webhook URL. Falls back to the global default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_env: Option<String>,
    #[serde(default = "default_on")]
    pub on: Vec<NotifyOn>,
    /// Also notify after each stage, not just at the end of the run.
    #[serde(default)]
    pub stages: bool,
}

impl Default for NotifyPolicy {
    fn default() -> Self {
        Self {
            webhook_env: None,
            on: default_on(),
            stages: false,
        }
    }
}

fn default_on() -> Vec<NotifyOn> {
    vec![NotifyOn::Failure]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyOn {
    Success,
    Failure,
    Always,
}

impl NotifyPolicy {
    pub fn wants(&self, succeeded: bool) -> bool {
        self.on.iter().any(|on| match on {
            NotifyOn::Always => true,
            NotifyOn::Success => succeeded,
            NotifyOn::Failure => !succeeded,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub pipeline: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    pub status: String,
    pub succeeded: bool,
    pub environment: String,
    pub image_tag: String,
    pub run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Notification {
    /// One-line chat message.
    pub fn text(&self) -> String {
        let icon = if self.succeeded { "✅" } else { "❌" };
        let scope = match &self.stage {
            Some(stage) => format!("{} / {}", self.pipeline, stage),
            None => self.pipeline.clone(),
        };
        let mut text = format!(
            "{} [dominion] {} {} (env={}, tag={}, run={})",
            icon, scope, self.status, self.environment, self.image_tag, self.run_id
        );
        if let Some(detail) = &self.detail {
            text.push_str(": ");
            text.push_str(detail);
        }
        text
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Posts `{"text": ...}` to an incoming-webhook URL.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::notify_failed(format!("build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, notification: &Notification) -> Result<()> {
        let body = serde_json::json!({ "text": notification.text() });
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .map_err(|e| Error::notify_failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::notify_failed(format!("webhook returned HTTP {}", status)));
        }
        Ok(())
    }
}

/// Drops every notification.
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _notification: &Notification) -> Result<()> {
        Ok(())
    }
}

/// Keeps notifications in memory. Used by dry runs and tests.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: &Notification) -> Result<()> {
        self.sent
            .lock()
            .map_err(|_| Error::internal_unexpected("notification log poisoned"))?
            .push(notification.clone());
        Ok(())
    }
}

/// Pick the notifier for a run from the pipeline policy and global config.
///
/// No policy, or an unset webhook variable, yields a `NullNotifier`.
pub fn from_policy(policy: Option<&NotifyPolicy>, config: &NotifyConfig) -> Result<Box<dyn Notifier>> {
    let Some(policy) = policy else {
        return Ok(Box::new(NullNotifier));
    };

    let env_name = policy
        .webhook_env
        .as_deref()
        .unwrap_or(config.webhook_env.as_str());

    match std::env::var(env_name) {
        Ok(url) if !url.trim().is_empty() => Ok(Box::new(WebhookNotifier::new(
            url.trim(),
            Duration::from_secs(config.timeout_secs),
        )?)),
        _ => {
            log_status!("notify", "{} is not set; notifications disabled", env_name);
            Ok(Box::new(NullNotifier))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(succeeded: bool) -> Notification {
        Notification {
            pipeline: "dominion".to_string(),
            stage: Some("deploy".to_string()),
            status: if succeeded { "success" } else { "failed" }.to_string(),
            succeeded,
            environment: "qa".to_string(),
            image_tag: "20260101000000".to_string(),
            run_id: "r1".to_string(),
            detail: None,
        }
    }

    #[test]
    fn default_policy_only_reports_failures() {
        let policy = NotifyPolicy::default();
        assert!(policy.wants(false));
        assert!(!policy.wants(true));
    }

    #[test]
    fn always_policy_reports_everything() {
        let policy = NotifyPolicy {
            on: vec![NotifyOn::Always],
            ..NotifyPolicy::default()
        };
        assert!(policy.wants(true));
        assert!(policy.wants(false));
    }

    #[test]
    fn text_names_scope_and_inputs() {
        let mut n = sample(false);
        n.detail = Some("cluster auth failed".to_string());
        let text = n.text();
        assert!(text.contains("dominion / deploy failed"));
        assert!(text.contains("env=qa"));
        assert!(text.contains("tag=20260101000000"));
        assert!(text.ends_with(": cluster auth failed"));
    }

    #[test]
    fn recording_notifier_keeps_order() {
        let recorder = RecordingNotifier::new();
        recorder.notify(&sample(true)).unwrap();
        recorder.notify(&sample(false)).unwrap();
        let sent = recorder.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].succeeded);
        assert!(!sent[1].succeeded);
    }

    #[test]
    fn no_policy_means_null_notifier() {
        let config = crate::defaults::builtin_defaults().notify;
        let notifier = from_policy(None, &config).unwrap();
        assert!(notifier.notify(&sample(true)).is_ok());
    }

    #[test]
    fn unreachable_webhook_is_an_error() {
        let notifier =
            WebhookNotifier::new("http://127.0.0.1:9/hook", Duration::from_millis(500)).unwrap();
        let err = notifier.notify(&sample(false)).unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::NotifyFailed);
    }
}
