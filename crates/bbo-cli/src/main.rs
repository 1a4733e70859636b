use std::collections::BTreeMap;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use bbo_core::{Trial, TrialId, TrialStatus};
use bbo_storage::TrialStore;
use bbo_worker::{Config, Worker};

#[derive(Parser)]
#[command(name = "bbo", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Initialize bbo in the current directory (creates .bbo/, config, space pack, db)
    Init {
        /// Experiment name
        #[arg(long, default_value = "experiment")]
        name: String,
        /// User script that evaluates one trial
        #[arg(long, default_value = "./evaluate.sh")]
        script: String,
    },

    /// Validate the user script and workspace directories
    Doctor,

    /// Show experiment and trial status
    Status,

    /// Register a parameter point as a new trial
    TrialAdd {
        /// JSON object of parameter values, e.g. '{"x": 3}'
        #[arg(long)]
        params: String,
    },

    /// Consume pending trials
    WorkerRun {
        /// Stop after this many trials
        #[arg(long)]
        max: Option<usize>,
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let root = std::env::current_dir()?;

    match cli.cmd {
        Command::Init { name, script } => {
            Worker::init_dir(&root, &name, &script)?;
            println!("Initialized bbo in {}", root.display());
        }
        Command::Doctor => {
            let w = Worker::open(root)?;
            w.doctor()?;
            println!("OK");
        }
        Command::Status => {
            let w = Worker::open(root)?;
            let trials = w.store.trials(&w.experiment.id)?;
            let count = |s: TrialStatus| trials.iter().filter(|t| t.status == s).count();
            println!("Experiment: {} ({})", w.experiment.name, w.experiment.id.as_str());
            println!(
                "Trials: {} (new {}, running {}, completed {})",
                trials.len(),
                count(TrialStatus::New),
                count(TrialStatus::Running),
                count(TrialStatus::Completed)
            );
            for t in trials {
                let params = serde_json::to_string(&t.params).unwrap_or_default();
                println!("- {} [{:?}] {}", t.id.as_str(), t.status, params);
            }
        }
        Command::TrialAdd { params } => {
            let w = Worker::open(root.clone())?;
            let point: BTreeMap<String, serde_json::Value> =
                serde_json::from_str(&params).context("parse --params as a JSON object")?;
            let pack = bbo_space::load_space_pack(&Config::space_path(&root))?;
            bbo_space::validate_params(&pack, &point)?;

            let trial = Trial {
                id: TrialId::new(),
                experiment_id: w.experiment.id.clone(),
                params: point,
                status: TrialStatus::New,
                results: vec![],
                created_at_unix: bbo_worker::now_unix(),
            };
            w.store.insert_trial(&trial)?;
            println!("Added trial {}", trial.id.as_str());
        }
        Command::WorkerRun { max, dry_run } => {
            let w = Worker::open(root)?;
            w.doctor()?;
            if dry_run {
                println!("DRY RUN: {} trial(s) pending", w.pending()?);
                return Ok(());
            }
            let done = w.run(max)?;
            println!("worker run complete: {} trial(s) consumed", done);
        }
    }

    Ok(())
}
