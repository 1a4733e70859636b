use std::path::Path;
use std::process::{Child, Command, ExitStatus};
use std::time::Duration;

use anyhow::{Context, Result};

/// Environment variable telling the user script where to write its results.
pub const RESULTS_PATH_ENV: &str = "BBO_RESULTS_PATH";

/// Handle to a launched user script.
pub struct ScriptProcess {
    child: Child,
}

/// Spawns the user script with the results path injected into its
/// environment. Returns None when the script could not be started or was
/// already dead to a signal at the first liveness check; both are launch
/// failures, not worker errors.
pub fn launch(script: &Path, args: &[String], results_path: &Path) -> Option<ScriptProcess> {
    let mut cmd = Command::new(script);
    cmd.args(args).env(RESULTS_PATH_ENV, results_path);
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // own process group, so a timeout can take down the whole tree
        cmd.process_group(0);
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::error!("failed to launch {}: {}", script.display(), e);
            return None;
        }
    };

    // A child that died to a signal this early never ran user code. A fast
    // normal exit keeps its handle; wait() returns the stored status.
    match child.try_wait() {
        Ok(Some(status)) if status.code().is_none() => {
            tracing::error!("{} died at launch: {}", script.display(), status);
            None
        }
        _ => Some(ScriptProcess { child }),
    }
}

impl ScriptProcess {
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Blocks until the script exits. Signal deaths normalize to 128+signal
    /// so every outcome is a plain exit code.
    pub fn wait(mut self) -> Result<i32> {
        let status = self.child.wait().with_context(|| "wait for user script")?;
        Ok(normalize_exit(status))
    }

    /// Blocks up to `limit`, then kills the script's process group and reaps
    /// it. The returned code flows through the ordinary non-zero-exit path.
    pub fn wait_timeout(mut self, limit: Duration) -> Result<i32> {
        let start = std::time::Instant::now();
        while start.elapsed() < limit {
            if let Some(status) = self.child.try_wait().with_context(|| "poll user script")? {
                return Ok(normalize_exit(status));
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        tracing::warn!("user script still running after {:?}, killing it", limit);
        kill_group(&mut self.child);
        let status = self.child.wait().with_context(|| "reap user script after kill")?;
        Ok(normalize_exit(status))
    }
}

#[cfg(unix)]
fn kill_group(child: &mut Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;
    if killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL).is_err() {
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child) {
    let _ = child.kill();
}

pub fn normalize_exit(status: ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(code) = status.code() {
            code
        } else if let Some(sig) = status.signal() {
            128 + sig
        } else {
            1
        }
    }
    #[cfg(not(unix))]
    {
        status.code().unwrap_or(1)
    }
}
