/// Classification of a trial consumption failure to decide recycle vs abort.
/// This stays pure and testable; the worker applies it to storage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// Script could not be started, or died to a signal before running.
    Launch,
    /// Script ran and exited with a non-zero code.
    NonZeroExit,
    /// Script exited zero but the results file was missing or malformed.
    ResultParse,
    /// Workspace directory or scratch files could not be set up.
    WorkspaceSetup,
    /// Durable trial state could not be written.
    StoreWrite,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Reset the trial to `new` so another consumption can pick it up.
    Recycle,
    /// Surface the error to the caller; the trial stays reserved.
    Abort,
}

/// Disposition policy:
/// - Launch / NonZeroExit: the script is at fault, recycle the trial and
///   keep the worker alive.
/// - ResultParse: a zero exit with unreadable results counts as a script
///   fault too, so it recycles instead of crashing the worker.
/// - WorkspaceSetup / StoreWrite: worker-side faults that must reach the
///   operator.
pub fn disposition_for(kind: FailureKind) -> Disposition {
    match kind {
        FailureKind::Launch | FailureKind::NonZeroExit | FailureKind::ResultParse => {
            Disposition::Recycle
        }
        FailureKind::WorkspaceSetup | FailureKind::StoreWrite => Disposition::Abort,
    }
}
