//! Signal importer: folds exported signal batches into the receiving
//! workspace's reputation dimensions with decay + EWMA.
//!
//! Every folded signal's [`Signal::observation_key`] is recorded in the
//! state, so re-importing a batch never double-counts while distinct
//! observations are always folded in, whichever remote delivers them and
//! however late they arrive.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use agora_core::reputation::{apply_signal, weighted_score, BASELINE};
use agora_core::store::atomic_write;
use agora_core::{ExportedSignalBatch, ReputationDimension, ReputationParams, Signal, WorkspaceStore};

use crate::error::{io_err, SyncError};

/// Contents of `reputation/dimensions.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReputationState {
    /// Keyed by [`Signal::dimension_key`].
    #[serde(default)]
    pub dimensions: BTreeMap<String, ReputationDimension>,
    /// Observation keys already folded into `dimensions`.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub imported: BTreeSet<String>,
}

impl ReputationState {
    /// Load from the store. Missing file yields an empty state.
    pub fn load(store: &WorkspaceStore) -> Result<Self, SyncError> {
        let path = store.dimensions_path();
        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(io_err(path, err)),
        }
    }

    pub fn save(&self, store: &WorkspaceStore) -> Result<(), SyncError> {
        let json = serde_json::to_string_pretty(self)?;
        atomic_write(&store.dimensions_path(), json.as_bytes())?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&ReputationDimension> {
        self.dimensions.get(key)
    }

    /// Weighted combination of the named dimensions. Dimensions with no
    /// history contribute the baseline.
    pub fn weighted_score(&self, weights: &[(&str, f64)]) -> f64 {
        let parts: Vec<(f64, f64)> = weights
            .iter()
            .map(|(key, weight)| {
                let score = self.get(key).map_or(BASELINE, |d| d.score);
                (score, *weight)
            })
            .collect();
        weighted_score(&parts)
    }
}

/// Outcome of one [`SignalImporter::import`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub applied: usize,
    /// Already folded in by an earlier import.
    pub duplicates: usize,
    /// Non-finite scores.
    pub rejected: usize,
    /// Newest timestamp seen in the batch, whatever its outcome.
    pub max_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SignalImporter {
    params: ReputationParams,
}

impl SignalImporter {
    pub fn new(params: ReputationParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ReputationParams {
        &self.params
    }

    /// Fold `batch` into `state` in timestamp order.
    pub fn import(&self, state: &mut ReputationState, batch: &ExportedSignalBatch) -> ImportReport {
        let mut signals: Vec<&Signal> = batch.signals.iter().collect();
        signals.sort_by_key(|s| s.timestamp);

        let mut report = ImportReport::default();
        for signal in signals {
            report.max_timestamp = report.max_timestamp.max(Some(signal.timestamp));

            if !signal.score.is_finite() {
                tracing::warn!(
                    source = %signal.source,
                    dimension = %signal.dimension,
                    "rejecting signal with non-finite score"
                );
                report.rejected += 1;
                continue;
            }

            if !state.imported.insert(signal.observation_key()) {
                report.duplicates += 1;
                continue;
            }
            let key = signal.dimension_key();
            let updated = apply_signal(
                state.dimensions.get(&key),
                signal.score,
                signal.timestamp,
                &self.params,
            );
            state.dimensions.insert(key, updated);
            report.applied += 1;
        }

        if report.applied > 0 || report.duplicates > 0 {
            tracing::info!(
                applied = report.applied,
                duplicates = report.duplicates,
                rejected = report.rejected,
                "signals imported"
            );
        }
        report
    }
}
