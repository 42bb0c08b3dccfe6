//! Shared identifiers and option types used across the pagecarbon crates.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for one browser session (one process + one page).
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier the instrumentation channel assigns to one network transfer.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, Error)]
#[error("unrecognized value: {0}")]
pub struct ParseOptionError(String);

/// Emulated device class for a session.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    #[default]
    Desktop,
    Mobile,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Desktop => "desktop",
            DeviceType::Mobile => "mobile",
        }
    }
}

impl FromStr for DeviceType {
    type Err = ParseOptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "desktop" => Ok(DeviceType::Desktop),
            "mobile" => Ok(DeviceType::Mobile),
            other => Err(ParseOptionError(other.to_string())),
        }
    }
}

/// How much simulated user behavior an analysis run performs.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionLevel {
    Minimal,
    #[default]
    Default,
    Thorough,
}

impl InteractionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionLevel::Minimal => "minimal",
            InteractionLevel::Default => "default",
            InteractionLevel::Thorough => "thorough",
        }
    }

    /// Number of discovery/interaction rounds for this level.
    pub fn interaction_rounds(&self) -> usize {
        match self {
            InteractionLevel::Minimal => 0,
            InteractionLevel::Default => 1,
            InteractionLevel::Thorough => 2,
        }
    }

    /// Upper bound on elements interacted with per round.
    pub fn max_interactions(&self) -> usize {
        match self {
            InteractionLevel::Minimal => 0,
            InteractionLevel::Default => 5,
            InteractionLevel::Thorough => 12,
        }
    }

    /// Upper bound on scroll steps for the scrolling behavior.
    pub fn max_scroll_steps(&self) -> usize {
        match self {
            InteractionLevel::Minimal => 3,
            InteractionLevel::Default => 8,
            InteractionLevel::Thorough => 15,
        }
    }
}

impl FromStr for InteractionLevel {
    type Err = ParseOptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "minimal" => Ok(InteractionLevel::Minimal),
            "default" => Ok(InteractionLevel::Default),
            "thorough" => Ok(InteractionLevel::Thorough),
            other => Err(ParseOptionError(other.to_string())),
        }
    }
}

/// Options accepted by `run_analysis`.
///
/// `max_interactions` and `max_scroll_steps` default to the bounds implied
/// by the interaction level; callers may override them explicitly.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnalysisOptions {
    pub device: DeviceType,
    pub interaction_level: InteractionLevel,
    pub max_interactions: Option<usize>,
    pub max_scroll_steps: Option<usize>,
    #[serde(with = "duration_ms")]
    pub navigation_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub overall_timeout: Duration,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            device: DeviceType::Desktop,
            interaction_level: InteractionLevel::Default,
            max_interactions: None,
            max_scroll_steps: None,
            navigation_timeout: Duration::from_secs(30),
            overall_timeout: Duration::from_secs(120),
        }
    }
}

impl AnalysisOptions {
    pub fn effective_max_interactions(&self) -> usize {
        self.max_interactions
            .unwrap_or_else(|| self.interaction_level.max_interactions())
    }

    pub fn effective_max_scroll_steps(&self) -> usize {
        self.max_scroll_steps
            .unwrap_or_else(|| self.interaction_level.max_scroll_steps())
    }
}

/// Stable cache key derived from the URL plus the semantically relevant
/// subset of options. Timestamps and timeouts never participate.
pub fn options_fingerprint(url: &str, options: &AnalysisOptions) -> String {
    format!(
        "{}|{}|{}|i{}|s{}",
        url.trim_end_matches('/'),
        options.device.as_str(),
        options.interaction_level.as_str(),
        options.effective_max_interactions(),
        options.effective_max_scroll_steps(),
    )
}

/// Millisecond serde representation for durations, shared by every
/// serializable struct that carries one.
pub mod duration_ms {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
