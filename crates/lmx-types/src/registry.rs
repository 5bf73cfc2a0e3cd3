//! The durable (model, backend) load-outcome record.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ModelId;

/// The outcome of one load attempt against one (model, backend) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Outcome {
    Pass,
    Fail,
}

/// One append-only row in the compatibility registry.
///
/// "Latest" for a (model, backend) pair is defined as the record with the
/// greatest `timestamp`; the registry never mutates or deletes a row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompatibilityRecord {
    pub model_id: ModelId,
    pub backend: String,
    pub backend_version: String,
    pub outcome: Outcome,
    pub reason: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}
