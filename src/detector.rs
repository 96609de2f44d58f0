//! Baseline-driven change detection
//!
//! Consumes a batch of retrievals plus the current baseline set and emits
//! typed change events. Detection always runs against the baseline state
//! as of the start of the run; the replacements from `baseline_updates`
//! are persisted strictly after detection, as part of the run's unit of
//! work, so a run never diffs against a baseline it just wrote.

use std::sync::Arc;

use tracing::{debug, instrument, trace};

use crate::collector::{LogRetrieval, RetrievalOutcome};
use crate::storage::{
    BaselineUpdate, ChangeType, DetectedChangeRow, StorageBackend, StorageResult,
};
use crate::Severity;

pub struct ChangeDetector {
    storage: Arc<dyn StorageBackend>,
}

impl ChangeDetector {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// Classify every content-bearing retrieval against the active
    /// baselines for `host`. Retrievals without content (inaccessible or
    /// failed) produce no event and do not affect the baseline.
    #[instrument(skip(self, retrievals), fields(host, count = retrievals.len()))]
    pub async fn detect_changes(
        &self,
        host: &str,
        retrievals: &[LogRetrieval],
    ) -> StorageResult<Vec<DetectedChangeRow>> {
        let mut changes = Vec::new();

        for retrieval in retrievals {
            let RetrievalOutcome::Retrieved {
                content_hash,
                line_count,
                file_size,
                ..
            } = &retrieval.outcome
            else {
                trace!("{}: no content, skipping diff", retrieval.path);
                continue;
            };

            match self.storage.active_baseline(host, &retrieval.path).await? {
                None => {
                    changes.push(DetectedChangeRow {
                        change_type: ChangeType::NewLog,
                        severity: Severity::Info,
                        description: format!(
                            "New log file discovered: {} ({} lines, {} bytes)",
                            retrieval.path, line_count, file_size
                        ),
                        log_path: Some(retrieval.path.clone()),
                    });
                }
                Some(baseline) if baseline.content_hash != *content_hash => {
                    changes.push(DetectedChangeRow {
                        change_type: ChangeType::LogModified,
                        severity: Severity::Info,
                        description: format!(
                            "Log content changed: {} ({} -> {} lines, now {} bytes)",
                            retrieval.path, baseline.line_count, line_count, file_size
                        ),
                        log_path: Some(retrieval.path.clone()),
                    });
                }
                Some(_) => {
                    trace!("{}: unchanged", retrieval.path);
                }
            }
        }

        debug!("{host}: {} change(s) detected", changes.len());
        Ok(changes)
    }

}

/// The baseline replacements a batch of retrievals implies: one per
/// content-bearing retrieval, carrying its new fingerprint. Inaccessible
/// and failed retrievals never touch the baseline.
pub fn baseline_updates(retrievals: &[LogRetrieval]) -> Vec<BaselineUpdate> {
    retrievals
        .iter()
        .filter_map(|retrieval| match &retrieval.outcome {
            RetrievalOutcome::Retrieved {
                content_hash,
                line_count,
                ..
            } => Some(BaselineUpdate {
                path: retrieval.path.clone(),
                content_hash: content_hash.clone(),
                line_count: *line_count,
            }),
            _ => None,
        })
        .collect()
}
