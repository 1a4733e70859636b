use anyhow::{anyhow, Result};
use std::path::Path;

use crate::config::Config;

/// Preflight checks with actionable messages. Run before consuming anything.
pub fn doctor(root: &Path, cfg: &Config) -> Result<()> {
    let script = cfg.script_path(root);
    if !script.exists() {
        return Err(anyhow!("user script not found: {}", script.display()));
    }
    if !script.is_file() {
        return Err(anyhow!("user script is not a file: {}", script.display()));
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = script.metadata()?.permissions().mode();
        if mode & 0o111 == 0 {
            return Err(anyhow!(
                "user script is not executable. Run: chmod +x {}",
                script.display()
            ));
        }
    }

    let base = cfg.workspace_base(root);
    std::fs::create_dir_all(&base)
        .map_err(|e| anyhow!("cannot create workspace base {}: {}", base.display(), e))?;

    let data_dir = root.join(".bbo");
    std::fs::create_dir_all(&data_dir)
        .map_err(|e| anyhow!("cannot create data dir {}: {}", data_dir.display(), e))?;

    Ok(())
}
