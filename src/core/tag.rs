//! Image tag selection.
//!
//! A supplied image version is used verbatim. Without one, the tag is the
//! current UTC time as `YYYYMMDDHHMMSS`.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TagSource {
    Supplied,
    Generated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageTag {
    pub value: String,
    pub source: TagSource,
}

/// Pick the tag for this run.
///
/// Blank input counts as absent. Non-blank input is never trimmed or rewritten.
pub fn resolve(supplied: Option<&str>, now: DateTime<Utc>) -> ImageTag {
    match supplied.filter(|s| !s.trim().is_empty()) {
        Some(value) => ImageTag {
            value: value.to_string(),
            source: TagSource::Supplied,
        },
        None => ImageTag {
            value: timestamp_tag(now),
            source: TagSource::Generated,
        },
    }
}

pub fn timestamp_tag(now: DateTime<Utc>) -> String {
    now.format(TIMESTAMP_FORMAT).to_string()
}

static TIMESTAMP_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{14}$").unwrap());

pub fn is_timestamp_tag(tag: &str) -> bool {
    TIMESTAMP_PATTERN.is_match(tag)
}

/// Full image reference, `<registry>/<repository>:<tag>`.
pub fn image_reference(registry: &str, repository: &str, tag: &str) -> String {
    let registry = registry.trim_end_matches('/');
    if registry.is_empty() {
        format!("{}:{}", repository, tag)
    } else {
        format!("{}/{}:{}", registry, repository, tag)
    }
}
