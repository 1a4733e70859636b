use std::collections::{BTreeMap, HashSet};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpacePack {
    #[serde(default)]
    pub experiment: Option<String>,
    pub command: Vec<String>,
    pub dimensions: Vec<Dimension>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub kind: DimensionKind,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DimensionKind {
    Real,
    Integer,
    Categorical,
}

pub fn load_space_pack(path: &std::path::Path) -> Result<SpacePack> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("read space pack: {}", path.display()))?;
    let pack: SpacePack = serde_yaml::from_str(&s).with_context(|| "parse space pack yaml")?;
    validate_space_pack(&pack)?;
    Ok(pack)
}

pub fn validate_space_pack(pack: &SpacePack) -> Result<()> {
    if pack.command.is_empty() {
        return Err(anyhow!("space pack missing command"));
    }
    if pack.dimensions.is_empty() {
        return Err(anyhow!("space pack must declare at least one dimension"));
    }
    let mut seen = HashSet::new();
    for dim in &pack.dimensions {
        if dim.name.trim().is_empty() {
            return Err(anyhow!("space pack dimension with empty name"));
        }
        if dim.name == "config" {
            return Err(anyhow!("dimension name 'config' is reserved"));
        }
        if !seen.insert(dim.name.as_str()) {
            return Err(anyhow!("duplicate dimension name: {}", dim.name));
        }
    }
    for arg in &pack.command {
        for ph in placeholders(arg) {
            if ph != "config" && !seen.contains(ph) {
                return Err(anyhow!("command references unknown placeholder {{{}}}", ph));
            }
        }
    }
    Ok(())
}

/// Checks a proposed parameter point against the declared dimensions: the
/// name sets must match exactly and each value must fit its dimension kind.
pub fn validate_params(
    pack: &SpacePack,
    params: &BTreeMap<String, serde_json::Value>,
) -> Result<()> {
    for dim in &pack.dimensions {
        let value = params
            .get(&dim.name)
            .ok_or_else(|| anyhow!("missing parameter: {}", dim.name))?;
        let fits = match dim.kind {
            DimensionKind::Real => value.is_number(),
            DimensionKind::Integer => value.is_i64() || value.is_u64(),
            DimensionKind::Categorical => value.is_string(),
        };
        if !fits {
            return Err(anyhow!(
                "parameter {} does not fit dimension kind {:?}: {}",
                dim.name,
                dim.kind,
                value
            ));
        }
    }
    for name in params.keys() {
        if !pack.dimensions.iter().any(|d| d.name == *name) {
            return Err(anyhow!("unknown parameter: {}", name));
        }
    }
    Ok(())
}

/// `{name}` occurrences in a template argument, in order.
pub(crate) fn placeholders(arg: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut rest = arg;
    while let Some(start) = rest.find('{') {
        match rest[start + 1..].find('}') {
            Some(len) => {
                out.push(&rest[start + 1..start + 1 + len]);
                rest = &rest[start + 1 + len + 1..];
            }
            None => break,
        }
    }
    out
}
