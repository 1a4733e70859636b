use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub experiment: ExperimentConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub name: String,
    pub user_script: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default)]
    pub base_dir: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Config {
    pub fn default_for_dir(name: &str) -> Self {
        Self {
            experiment: ExperimentConfig {
                name: name.to_string(),
                user_script: "./evaluate.sh".to_string(),
            },
            worker: WorkerConfig { base_dir: None, timeout_secs: None },
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let cfg: Config = toml::from_str(&s).with_context(|| "parse bbo.toml")?;
        Ok(cfg)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let s = toml::to_string_pretty(self).with_context(|| "serialize toml")?;
        std::fs::write(path, s).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    /// User script path with `~` expanded, resolved against `root` when
    /// relative so the worker behaves the same from any working directory.
    pub fn script_path(&self, root: &Path) -> PathBuf {
        let p = PathBuf::from(shellexpand::tilde(&self.experiment.user_script).to_string());
        if p.is_absolute() {
            p
        } else {
            root.join(p)
        }
    }

    /// Base directory holding trial workspaces. Defaults to the system temp
    /// directory.
    pub fn workspace_base(&self, root: &Path) -> PathBuf {
        match &self.worker.base_dir {
            Some(dir) => {
                let p = PathBuf::from(shellexpand::tilde(dir).to_string());
                if p.is_absolute() {
                    p
                } else {
                    root.join(p)
                }
            }
            None => std::env::temp_dir().join("bbo"),
        }
    }

    pub fn timeout(&self) -> Option<std::time::Duration> {
        self.worker.timeout_secs.map(std::time::Duration::from_secs)
    }

    pub fn config_path(root: &Path) -> PathBuf {
        root.join(".bbo").join("bbo.toml")
    }

    pub fn db_path(root: &Path) -> PathBuf {
        root.join(".bbo").join("bbo.db")
    }

    pub fn space_path(root: &Path) -> PathBuf {
        root.join(".bbo").join("space.yaml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = Config::config_path(dir.path());
        let cfg = Config::default_for_dir("tuning");
        cfg.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.experiment.name, "tuning");
        assert_eq!(loaded.experiment.user_script, "./evaluate.sh");
        assert!(loaded.worker.timeout_secs.is_none());
    }

    #[test]
    fn worker_section_is_optional() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bbo.toml");
        std::fs::write(&path, "[experiment]\nname = \"t\"\nuser_script = \"run.sh\"\n").unwrap();
        let cfg = Config::load_from(&path).unwrap();
        assert!(cfg.worker.base_dir.is_none());
        assert!(cfg.timeout().is_none());
    }

    #[test]
    fn relative_script_resolves_against_root() {
        let cfg = Config::default_for_dir("t");
        let resolved = cfg.script_path(Path::new("/srv/exp"));
        assert_eq!(resolved, PathBuf::from("/srv/exp/./evaluate.sh"));
    }
}
