//! Admin SSE event envelope published by the event bus (C5).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One event published on the admin SSE bus. No ordering guarantee is made
/// between subscribers; within one subscription, events are delivered in
/// publish order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl ServerEvent {
    pub fn new(event_type: impl Into<String>, data: HashMap<String, serde_json::Value>) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}
