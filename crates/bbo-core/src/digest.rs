use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

/// Stable content digest of a parameter point, used to reject duplicate
/// trials within an experiment. `BTreeMap` serializes its keys in sorted
/// order, so equal assignments always produce equal digests.
pub fn params_digest(params: &BTreeMap<String, serde_json::Value>) -> String {
    let bytes = serde_json::to_vec(params).expect("params serializable");
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
