use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use bbo_convert::JsonReader;
use bbo_core::{Experiment, ExperimentId, TrialStatus};
use bbo_space::{load_space_pack, TemplateBuilder};
use bbo_storage::TrialStore;
use bbo_storage_sqlite::SqliteStore;

use crate::config::Config;
use crate::consumer::{ConsumeOutcome, Consumer};
use crate::doctor::doctor;
use crate::state::StateWriter;
use crate::util::now_unix;
use crate::workspace::WorkspaceManager;

const DEFAULT_SPACE_YAML: &str = r#"# Search space and command template for this experiment.
command: ["--config", "{config}"]
dimensions:
  - name: x
    kind: real
"#;

/// One worker process: reserves trials and feeds them through the pipeline.
/// All collaborators are built here; nothing is process-global.
pub struct Worker {
    pub root: PathBuf,
    pub cfg: Config,
    pub store: Arc<dyn TrialStore>,
    pub experiment: Experiment,
    pub consumer: Consumer,
    pub worker_id: String,
}

impl Worker {
    pub fn open(root: PathBuf) -> Result<Self> {
        let cfg = Config::load_from(&Config::config_path(&root))?;

        let store: Arc<dyn TrialStore> = Arc::new(SqliteStore::open(&Config::db_path(&root))?);
        let experiment = store.find_experiment(&cfg.experiment.name)?.ok_or_else(|| {
            anyhow!("experiment not registered: {} (run `bbo init` first)", cfg.experiment.name)
        })?;

        let pack = load_space_pack(&Config::space_path(&root))?;
        let consumer = Consumer::new(
            cfg.script_path(&root),
            cfg.timeout(),
            WorkspaceManager::new(cfg.workspace_base(&root), &experiment.name),
            Box::new(TemplateBuilder::new(&pack)),
            Box::new(JsonReader),
            StateWriter::new(store.clone()),
        );

        Ok(Self {
            root,
            cfg,
            store,
            experiment,
            consumer,
            worker_id: format!("worker-{}", std::process::id()),
        })
    }

    /// One-time setup for a directory: config, space pack, database and the
    /// experiment row. Safe to run again; existing files are left alone.
    pub fn init_dir(root: &Path, name: &str, script: &str) -> Result<()> {
        std::fs::create_dir_all(root.join(".bbo")).ok();

        let cfg_path = Config::config_path(root);
        if !cfg_path.exists() {
            let mut cfg = Config::default_for_dir(name);
            cfg.experiment.user_script = script.to_string();
            cfg.save_to(&cfg_path)?;
        }

        let space_path = Config::space_path(root);
        if !space_path.exists() {
            std::fs::write(&space_path, DEFAULT_SPACE_YAML)
                .with_context(|| format!("write {}", space_path.display()))?;
        }

        let cfg = Config::load_from(&cfg_path)?;
        let store = SqliteStore::open(&Config::db_path(root))?;
        if store.find_experiment(&cfg.experiment.name)?.is_none() {
            store.insert_experiment(&Experiment {
                id: ExperimentId::new(),
                name: cfg.experiment.name.clone(),
                user_script: cfg.experiment.user_script.clone(),
                created_at_unix: now_unix(),
            })?;
        }
        Ok(())
    }

    pub fn doctor(&self) -> Result<()> {
        doctor(&self.root, &self.cfg)
    }

    /// Reserves and consumes one trial. Ok(false) means the pool is empty.
    /// A recycled trial is not an error; the loop keeps going.
    pub fn run_once(&self) -> Result<bool> {
        let mut trial = match self.store.reserve_next_trial(&self.experiment.id, now_unix())? {
            Some(trial) => trial,
            None => return Ok(false),
        };
        tracing::info!("{} consuming trial {}", self.worker_id, trial.id.as_str());
        match self.consumer.consume(&mut trial)? {
            ConsumeOutcome::Committed => {}
            ConsumeOutcome::Recycled => {
                tracing::warn!("{} recycled trial {}", self.worker_id, trial.id.as_str());
            }
        }
        Ok(true)
    }

    /// Consumes until the pool is empty or `max` trials have been attempted.
    /// Returns how many consumptions ran.
    pub fn run(&self, max: Option<usize>) -> Result<usize> {
        let mut done = 0usize;
        loop {
            if let Some(limit) = max {
                if done >= limit {
                    break;
                }
            }
            if !self.run_once()? {
                break;
            }
            done += 1;
        }
        Ok(done)
    }

    /// Trials currently waiting for a worker.
    pub fn pending(&self) -> Result<usize> {
        let trials = self.store.trials(&self.experiment.id)?;
        Ok(trials.iter().filter(|t| t.status == TrialStatus::New).count())
    }
}
