//! Core data model: identifiers and persistent record types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod error;
pub mod job;
pub mod report;
pub mod session;
pub mod usage;

pub use error::*;
pub use job::*;
pub use report::*;
pub use session::*;
pub use usage::*;

/// Opaque, URL-safe job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Server-generated opaque session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Monotonic report identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReportId(pub i64);

impl std::fmt::Display for ReportId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index document identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocId(pub i64);

impl std::fmt::Display for DocId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Origin tag for an index document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocOrigin {
    Report,
    Url,
    Text,
}

impl DocOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocOrigin::Report => "report",
            DocOrigin::Url => "url",
            DocOrigin::Text => "text",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "report" => Some(DocOrigin::Report),
            "url" => Some(DocOrigin::Url),
            "text" => Some(DocOrigin::Text),
            _ => None,
        }
    }
}

/// Cost preference tier driving model selection in the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CostPreference {
    High,
    #[default]
    Low,
    VeryLow,
}

impl CostPreference {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "high" => Some(CostPreference::High),
            "low" => Some(CostPreference::Low),
            "very_low" => Some(CostPreference::VeryLow),
            _ => None,
        }
    }
}

/// Process-wide tool exposure mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServerMode {
    #[default]
    Agent,
    Manual,
    All,
}

impl ServerMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "agent" => Some(ServerMode::Agent),
            "manual" => Some(ServerMode::Manual),
            "all" => Some(ServerMode::All),
            _ => None,
        }
    }
}
