use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Hands out one disposable directory per consumption attempt. The base
/// directory is shared between workers; workspaces inside it never are.
pub struct WorkspaceManager {
    base: PathBuf,
    prefix: String,
}

impl WorkspaceManager {
    pub fn new(base: PathBuf, experiment_name: &str) -> Self {
        Self { base, prefix: format!("{}_", experiment_name) }
    }

    /// Opens a fresh workspace. The base directory is created on demand;
    /// `create_dir_all` keeps that idempotent across concurrent workers.
    pub fn open(&self) -> Result<Workspace> {
        std::fs::create_dir_all(&self.base)
            .with_context(|| format!("create workspace base {}", self.base.display()))?;
        // canonical base keeps every path handed to the script absolute
        let base = self
            .base
            .canonicalize()
            .with_context(|| format!("resolve workspace base {}", self.base.display()))?;
        let dir = tempfile::Builder::new()
            .prefix(&self.prefix)
            .tempdir_in(&base)
            .with_context(|| format!("create workspace in {}", base.display()))?;
        Ok(Workspace { dir })
    }
}

/// Disposable trial directory. Dropping the guard removes the directory and
/// anything the script left behind in it.
pub struct Workspace {
    dir: tempfile::TempDir,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Allocates an empty, uniquely named file inside the workspace and
    /// returns its path without holding it open.
    pub fn alloc_file(&self, prefix: &str, suffix: &str) -> Result<PathBuf> {
        let file = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(suffix)
            .tempfile_in(self.dir.path())
            .with_context(|| {
                format!("allocate {}*{} in {}", prefix, suffix, self.dir.path().display())
            })?;
        let path = file.into_temp_path().keep().with_context(|| "persist scratch file")?;
        Ok(path)
    }
}
