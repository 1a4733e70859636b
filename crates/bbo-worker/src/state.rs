use std::sync::Arc;

use anyhow::{Context, Result};
use bbo_core::{Trial, TrialResult, TrialStatus};
use bbo_storage::TrialStore;

/// Applies trial dispositions to the durable store. The pipeline calls
/// exactly one of these per consumption.
pub struct StateWriter {
    store: Arc<dyn TrialStore>,
}

impl StateWriter {
    pub fn new(store: Arc<dyn TrialStore>) -> Self {
        Self { store }
    }

    /// Success path: populate results, advance status, persist.
    pub fn commit(&self, trial: &mut Trial, results: Vec<TrialResult>) -> Result<()> {
        trial.results = results;
        trial.status = TrialStatus::Completed;
        self.store
            .push_completed_trial(trial)
            .with_context(|| format!("commit trial {}", trial.id.as_str()))?;
        tracing::info!(
            "trial {} completed with {} result(s)",
            trial.id.as_str(),
            trial.results.len()
        );
        Ok(())
    }

    /// Failure path: hand the trial back to the pool. Only the status moves;
    /// results stay as they were.
    pub fn recycle(&self, trial: &mut Trial) -> Result<()> {
        trial.status = TrialStatus::New;
        let matched = self
            .store
            .write_trial(trial)
            .with_context(|| format!("recycle trial {}", trial.id.as_str()))?;
        if !matched {
            tracing::warn!("recycle matched no row for trial {}", trial.id.as_str());
        }
        Ok(())
    }
}
