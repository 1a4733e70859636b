use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use bbo_core::Trial;

use crate::pack::SpacePack;

/// Renders a trial into the argument vector for the user script. The full
/// parameter map is written to the trial's config file as a side effect, so
/// scripts can read either the command line or the file.
pub trait CommandBuilder: Send + Sync {
    fn build_to(&self, config_path: &Path, trial: &Trial) -> Result<Vec<String>>;
}

pub struct TemplateBuilder {
    template: Vec<String>,
}

impl TemplateBuilder {
    pub fn new(pack: &SpacePack) -> Self {
        Self { template: pack.command.clone() }
    }
}

impl CommandBuilder for TemplateBuilder {
    fn build_to(&self, config_path: &Path, trial: &Trial) -> Result<Vec<String>> {
        let mut vars: BTreeMap<String, String> = trial
            .params
            .iter()
            .map(|(k, v)| (k.clone(), render_value(v)))
            .collect();
        vars.insert("config".to_string(), config_path.display().to_string());

        let mut args = Vec::with_capacity(self.template.len());
        for arg in &self.template {
            args.push(substitute(arg, &vars)?);
        }

        let yaml =
            serde_yaml::to_string(&trial.params).with_context(|| "render trial config yaml")?;
        std::fs::write(config_path, yaml)
            .with_context(|| format!("write trial config: {}", config_path.display()))?;

        Ok(args)
    }
}

/// Scalar rendering for command-line use: strings drop their JSON quotes,
/// everything else keeps its JSON form.
fn render_value(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn substitute(arg: &str, vars: &BTreeMap<String, String>) -> Result<String> {
    let mut out = String::with_capacity(arg.len());
    let mut rest = arg;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 1..];
        match tail.find('}') {
            Some(len) => {
                let name = &tail[..len];
                match vars.get(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        return Err(anyhow!("no value for placeholder {{{}}} in {}", name, arg))
                    }
                }
                rest = &tail[len + 1..];
            }
            None => return Err(anyhow!("unclosed placeholder in {}", arg)),
        }
    }
    out.push_str(rest);
    Ok(out)
}
