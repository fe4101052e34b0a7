//! Deployment environments.
//!
//! The set is closed: anything outside `dev`, `qa`, `uat` and `prod` is
//! rejected before a run starts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Dev,
    Qa,
    Uat,
    Prod,
}

impl Environment {
    pub const ALL: [Environment; 4] = [
        Environment::Dev,
        Environment::Qa,
        Environment::Uat,
        Environment::Prod,
    ];

    pub const NAMES: [&'static str; 4] = ["dev", "qa", "uat", "prod"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Qa => "qa",
            Environment::Uat => "uat",
            Environment::Prod => "prod",
        }
    }

    /// Cluster name for this environment, e.g. `qa-dominion-cluster`.
    pub fn cluster_name(&self, suffix: &str) -> String {
        format!("{}{}", self.as_str(), suffix)
    }

    /// Overlay directory for this environment under `overlay_root`.
    pub fn overlay_dir(&self, overlay_root: &str) -> PathBuf {
        let root = shellexpand::tilde(overlay_root).to_string();
        Path::new(&root).join(self.as_str())
    }

    /// Parse an optional user value, falling back to `default` when absent or blank.
    /// Anything else must be an exact name; surrounding whitespace is rejected.
    pub fn select(value: Option<&str>, default: Environment) -> Result<Environment> {
        match value {
            Some(v) if !v.trim().is_empty() => v.parse(),
            _ => Ok(default),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Environment::ALL
            .iter()
            .copied()
            .find(|env| env.as_str() == s)
            .ok_or_else(|| {
                Error::validation_invalid_argument(
                    "environment",
                    format!(
                        "Unknown environment '{}' (expected one of: {})",
                        s,
                        Environment::NAMES.join(", ")
                    ),
                    Some(s.to_string()),
                    Some(Environment::NAMES.iter().map(|n| n.to_string()).collect()),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_known_name() {
        for name in Environment::NAMES {
            let env: Environment = name.parse().unwrap();
            assert_eq!(env.as_str(), name);
        }
    }

    #[test]
    fn rejects_names_outside_the_set() {
        for bad in ["staging", "PROD", "Dev", "production", " qa"] {
            let err = bad.parse::<Environment>().unwrap_err();
            assert_eq!(err.code, crate::ErrorCode::ValidationInvalidArgument);
        }
    }

    #[test]
    fn select_defaults_when_absent_or_blank() {
        assert_eq!(
            Environment::select(None, Environment::Dev).unwrap(),
            Environment::Dev
        );
        assert_eq!(
            Environment::select(Some("  "), Environment::Qa).unwrap(),
            Environment::Qa
        );
        assert_eq!(
            Environment::select(Some("uat"), Environment::Dev).unwrap(),
            Environment::Uat
        );
        assert!(Environment::select(Some("stage"), Environment::Dev).is_err());
    }

    #[test]
    fn select_rejects_padded_names_like_parse() {
        for padded in [" qa", "qa ", "\tprod"] {
            let err = Environment::select(Some(padded), Environment::Dev).unwrap_err();
            assert_eq!(err.code, crate::ErrorCode::ValidationInvalidArgument);
        }
    }

    #[test]
    fn cluster_and_overlay_follow_environment() {
        assert_eq!(
            Environment::Prod.cluster_name("-dominion-cluster"),
            "prod-dominion-cluster"
        );
        assert_eq!(
            Environment::Qa.overlay_dir("k8s/overlays"),
            PathBuf::from("k8s/overlays/qa")
        );
    }
}
