pub mod alerts;
pub mod analysis;
pub mod collector;
pub mod config;
pub mod detector;
pub mod orchestrator;
pub mod pipeline;
pub mod reports;
pub mod storage;

use serde::{Deserialize, Serialize};

/// Urgency classification of a finding, independent of whether it also
/// triggers a scheduled report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warn,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warn => write!(f, "WARN"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INFO" => Ok(Severity::Info),
            "WARN" => Ok(Severity::Warn),
            "CRITICAL" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// Outcome of analyzing one host's retrieval batch.
///
/// Produced by an [`analysis::Analyzer`] collaborator; the pipeline always
/// has one of these in hand, falling back to [`Analysis::fallback`] when
/// the collaborator is unavailable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    /// Overall health of the host, 0 (dead) to 100 (pristine).
    pub health_score: u8,
    pub severity: Severity,
    pub summary: String,
    pub recommendations: String,
}

impl Analysis {
    /// Conservative default used whenever the analyzer is unreachable or
    /// errors. The run continues; an operator is pointed at the raw logs.
    pub fn fallback() -> Self {
        Self {
            health_score: 80,
            severity: Severity::Info,
            summary: "Automated analysis unavailable; manual review of retrieved logs is advised."
                .to_string(),
            recommendations: "Check analyzer availability and review the latest log entries."
                .to_string(),
        }
    }
}

/// Final status of one monitoring run for one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Success => write!(f, "success"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(RunStatus::Success),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}
