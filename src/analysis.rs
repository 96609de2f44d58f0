//! Analysis collaborator seam
//!
//! Content analysis of retrieved logs is an external concern. The pipeline
//! talks to it through the [`Analyzer`] trait and survives its absence:
//! any error is converted into [`Analysis::fallback`] and the run
//! continues.

use std::fmt;

use async_trait::async_trait;

use crate::collector::{LogRetrieval, RetrievalOutcome};
use crate::storage::HostRow;
use crate::{Analysis, Severity};

/// The analysis collaborator is down or errored. Never fatal.
#[derive(Debug)]
pub struct AnalysisUnavailable(pub String);

impl fmt::Display for AnalysisUnavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "analysis unavailable: {}", self.0)
    }
}

impl std::error::Error for AnalysisUnavailable {}

/// Scores one host's retrieval batch.
///
/// `prior_baseline_hash` carries the fingerprint the batch was diffed
/// against, when one existed, so the collaborator can frame its summary as
/// "compared to X" rather than "no baseline yet".
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(
        &self,
        host: &HostRow,
        retrievals: &[LogRetrieval],
        prior_baseline_hash: Option<&str>,
    ) -> Result<Analysis, AnalysisUnavailable>;
}

/// Built-in heuristic analyzer used when no external collaborator is
/// wired up: scores purely from retrieval outcomes.
pub struct BasicAnalyzer;

#[async_trait]
impl Analyzer for BasicAnalyzer {
    async fn analyze(
        &self,
        host: &HostRow,
        retrievals: &[LogRetrieval],
        prior_baseline_hash: Option<&str>,
    ) -> Result<Analysis, AnalysisUnavailable> {
        let total = retrievals.len();
        let mut retrieved = 0usize;
        let mut inaccessible = 0usize;
        let mut failed = 0usize;

        for retrieval in retrievals {
            match retrieval.outcome {
                RetrievalOutcome::Retrieved { .. } => retrieved += 1,
                RetrievalOutcome::Inaccessible { .. } => inaccessible += 1,
                RetrievalOutcome::Failed { .. } => failed += 1,
            }
        }

        let health_score = 100i32
            .saturating_sub(15 * failed as i32)
            .saturating_sub(5 * inaccessible as i32)
            .clamp(0, 100) as u8;

        let severity = if failed > 0 {
            Severity::Warn
        } else {
            Severity::Info
        };

        let framing = match prior_baseline_hash {
            Some(hash) => format!("compared against baseline {}", &hash[..hash.len().min(12)]),
            None => "no prior baseline".to_string(),
        };

        Ok(Analysis {
            health_score,
            severity,
            summary: format!(
                "{}: {retrieved}/{total} log(s) retrieved, {inaccessible} inaccessible, {failed} failed ({framing})",
                host.name
            ),
            recommendations: if failed > 0 {
                "Investigate retrieval failures; check remote file permissions and disk state."
                    .to_string()
            } else {
                "No action required.".to_string()
            },
        })
    }
}
