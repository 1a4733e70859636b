use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{ids::*, model::*};

#[derive(Clone, Debug)]
pub struct Experiment {
    pub id: ExperimentId,
    pub name: String,
    pub user_script: String,
    pub created_at_unix: i64,
}

#[derive(Clone, Debug)]
pub struct Trial {
    pub id: TrialId,
    pub experiment_id: ExperimentId,
    pub params: BTreeMap<String, serde_json::Value>,
    pub status: TrialStatus,
    pub results: Vec<TrialResult>,
    pub created_at_unix: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TrialResult {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ResultKind,
    pub value: serde_json::Value,
}
