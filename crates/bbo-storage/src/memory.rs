use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::anyhow;
use bbo_core::{params_digest, Experiment, ExperimentId, Trial, TrialId, TrialStatus};

use crate::traits::TrialStore;

/// In-memory store for tests. Not durable, but mirrors the sqlite semantics
/// and counts disposition writes so pipeline tests can assert on them.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    experiments: HashMap<String, Experiment>,
    trials: HashMap<String, Trial>,
    completed_pushes: usize,
    conditional_writes: usize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `push_completed_trial` calls seen so far.
    pub fn push_count(&self) -> usize {
        self.inner.lock().unwrap().completed_pushes
    }

    /// Number of `write_trial` calls seen so far.
    pub fn write_count(&self) -> usize {
        self.inner.lock().unwrap().conditional_writes
    }
}

impl TrialStore for InMemoryStore {
    fn insert_experiment(&self, experiment: &Experiment) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.experiments.values().any(|e| e.name == experiment.name) {
            return Err(anyhow!("experiment name already registered: {}", experiment.name));
        }
        inner.experiments.insert(experiment.id.0.clone(), experiment.clone());
        Ok(())
    }

    fn find_experiment(&self, name: &str) -> anyhow::Result<Option<Experiment>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.experiments.values().find(|e| e.name == name).cloned())
    }

    fn insert_trial(&self, trial: &Trial) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let digest = params_digest(&trial.params);
        let dup = inner.trials.values().any(|t| {
            t.experiment_id == trial.experiment_id && params_digest(&t.params) == digest
        });
        if dup {
            return Err(anyhow!("duplicate parameter point for experiment"));
        }
        inner.trials.insert(trial.id.0.clone(), trial.clone());
        Ok(())
    }

    fn reserve_next_trial(
        &self,
        experiment_id: &ExperimentId,
        _now_unix: i64,
    ) -> anyhow::Result<Option<Trial>> {
        let mut inner = self.inner.lock().unwrap();
        let candidate = inner
            .trials
            .values()
            .filter(|t| t.experiment_id == *experiment_id && t.status == TrialStatus::New)
            .min_by_key(|t| (t.created_at_unix, t.id.0.clone()))
            .map(|t| t.id.0.clone());
        match candidate {
            Some(key) => {
                let t = inner.trials.get_mut(&key).unwrap();
                t.status = TrialStatus::Running;
                Ok(Some(t.clone()))
            }
            None => Ok(None),
        }
    }

    fn push_completed_trial(&self, trial: &Trial) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.completed_pushes += 1;
        match inner.trials.get_mut(&trial.id.0) {
            Some(t) => {
                t.status = trial.status.clone();
                t.results = trial.results.clone();
                Ok(())
            }
            None => Err(anyhow!("no trial row to complete: {}", trial.id.as_str())),
        }
    }

    fn write_trial(&self, trial: &Trial) -> anyhow::Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        inner.conditional_writes += 1;
        match inner.trials.get_mut(&trial.id.0) {
            Some(t) => {
                t.status = trial.status.clone();
                t.results = trial.results.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn trial(&self, id: &TrialId) -> anyhow::Result<Option<Trial>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.trials.get(&id.0).cloned())
    }

    fn trials(&self, experiment_id: &ExperimentId) -> anyhow::Result<Vec<Trial>> {
        let inner = self.inner.lock().unwrap();
        let mut out: Vec<Trial> = inner
            .trials
            .values()
            .filter(|t| t.experiment_id == *experiment_id)
            .cloned()
            .collect();
        out.sort_by_key(|t| (t.created_at_unix, t.id.0.clone()));
        Ok(out)
    }
}
