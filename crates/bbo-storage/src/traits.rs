use bbo_core::{Experiment, ExperimentId, Trial, TrialId};

pub trait TrialStore: Send + Sync {
    fn insert_experiment(&self, experiment: &Experiment) -> anyhow::Result<()>;
    fn find_experiment(&self, name: &str) -> anyhow::Result<Option<Experiment>>;

    /// Registers a new parameter point. A point whose params digest already
    /// exists within the experiment is rejected.
    fn insert_trial(&self, trial: &Trial) -> anyhow::Result<()>;

    /// Atomically flips the oldest `new` trial of the experiment to `running`
    /// and returns it. Two workers can never reserve the same trial.
    fn reserve_next_trial(
        &self,
        experiment_id: &ExperimentId,
        now_unix: i64,
    ) -> anyhow::Result<Option<Trial>>;

    /// Persists a consumed trial's status and results. The trial row must
    /// already exist; zero matched rows is an error.
    fn push_completed_trial(&self, trial: &Trial) -> anyhow::Result<()>;

    /// Conditional update of status and results scoped to the trial id.
    /// Returns whether a row matched.
    fn write_trial(&self, trial: &Trial) -> anyhow::Result<bool>;

    fn trial(&self, id: &TrialId) -> anyhow::Result<Option<Trial>>;
    fn trials(&self, experiment_id: &ExperimentId) -> anyhow::Result<Vec<Trial>>;
}
