use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use bbo_convert::ResultReader;
use bbo_core::{Trial, TrialResult};
use bbo_policy::{disposition_for, Disposition, FailureKind};
use bbo_space::CommandBuilder;

use crate::process::launch;
use crate::state::StateWriter;
use crate::workspace::{Workspace, WorkspaceManager};

/// Outcome of one consumption attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// Script succeeded; status and results are durably recorded.
    Committed,
    /// Script failed; the trial went back to the pool.
    Recycled,
}

enum Evaluation {
    Results(Vec<TrialResult>),
    Failed(FailureKind),
}

/// Sequences one trial through workspace, command rendering, the user
/// script, result parsing and disposition. Collaborators are injected so
/// tests can swap any stage.
pub struct Consumer {
    script: PathBuf,
    timeout: Option<Duration>,
    workspaces: WorkspaceManager,
    builder: Box<dyn CommandBuilder>,
    reader: Box<dyn ResultReader>,
    state: StateWriter,
}

impl Consumer {
    pub fn new(
        script: PathBuf,
        timeout: Option<Duration>,
        workspaces: WorkspaceManager,
        builder: Box<dyn CommandBuilder>,
        reader: Box<dyn ResultReader>,
        state: StateWriter,
    ) -> Self {
        Self { script, timeout, workspaces, builder, reader, state }
    }

    /// Consumes one reserved trial end to end. Exactly one store write
    /// happens before an Ok return, and the workspace directory is gone on
    /// every path out of here.
    pub fn consume(&self, trial: &mut Trial) -> Result<ConsumeOutcome> {
        let workspace = match self.workspaces.open() {
            Ok(ws) => ws,
            Err(err) => return self.fail(trial, FailureKind::WorkspaceSetup, err),
        };

        let outcome = match self.evaluate(trial, &workspace) {
            Ok(Evaluation::Results(results)) => match self.state.commit(trial, results) {
                Ok(()) => Ok(ConsumeOutcome::Committed),
                Err(err) => self.fail(trial, FailureKind::StoreWrite, err),
            },
            Ok(Evaluation::Failed(kind)) => self.dispose(trial, kind),
            Err(err) => Err(err),
        };

        // the guard outlives the disposition, then takes the directory with it
        drop(workspace);
        outcome
    }

    /// Runs the script once and classifies what came back. Mutates nothing;
    /// all trial and store updates happen in the disposition step.
    fn evaluate(&self, trial: &Trial, workspace: &Workspace) -> Result<Evaluation> {
        let config_path =
            workspace.alloc_file("trial_", ".conf").with_context(|| "allocate trial config")?;
        let results_path =
            workspace.alloc_file("results_", ".log").with_context(|| "allocate results file")?;

        let args = self.builder.build_to(&config_path, trial)?;

        let process = match launch(&self.script, &args, &results_path) {
            Some(process) => process,
            None => return Ok(Evaluation::Failed(FailureKind::Launch)),
        };

        let code = match self.timeout {
            Some(limit) => process.wait_timeout(limit)?,
            None => process.wait()?,
        };
        if code != 0 {
            tracing::error!("trial {} script exited with code {}", trial.id.as_str(), code);
            return Ok(Evaluation::Failed(FailureKind::NonZeroExit));
        }

        // Only a zero exit earns a parse attempt; a failed script's results
        // file is untrusted.
        match self.reader.parse(&results_path) {
            Ok(results) => Ok(Evaluation::Results(results)),
            Err(err) => {
                let err = anyhow::Error::new(err);
                tracing::error!("trial {} results unreadable: {:#}", trial.id.as_str(), err);
                Ok(Evaluation::Failed(FailureKind::ResultParse))
            }
        }
    }

    /// Applies the failure policy when there is no error value to carry.
    fn dispose(&self, trial: &mut Trial, kind: FailureKind) -> Result<ConsumeOutcome> {
        match disposition_for(kind.clone()) {
            Disposition::Recycle => {
                self.state.recycle(trial)?;
                Ok(ConsumeOutcome::Recycled)
            }
            Disposition::Abort => {
                Err(anyhow!("trial {} hit non-recyclable failure {:?}", trial.id.as_str(), kind))
            }
        }
    }

    /// Applies the failure policy to an error value.
    fn fail(
        &self,
        trial: &mut Trial,
        kind: FailureKind,
        err: anyhow::Error,
    ) -> Result<ConsumeOutcome> {
        match disposition_for(kind) {
            Disposition::Recycle => {
                tracing::error!("trial {} failed: {:#}", trial.id.as_str(), err);
                self.state.recycle(trial)?;
                Ok(ConsumeOutcome::Recycled)
            }
            Disposition::Abort => Err(err),
        }
    }
}
