// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::config::ReplicationConfig;
use super::task::ReplicationTask;
use super::ReplicationError;

/// Checkpoint of a replication manager: config, tasks in creation order and
/// the node health table. Plain JSON-compatible data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerSnapshot {
    pub node_id: String,
    pub config: ReplicationConfig,
    pub tasks: Vec<ReplicationTask>,
    pub node_health: BTreeMap<String, f64>,
    #[serde(default)]
    pub taken_at: f64,
}

impl ManagerSnapshot {
    pub fn to_dict(&self) -> Result<serde_json::Value, ReplicationError> {
        serde_json::to_value(self).map_err(|e| ReplicationError::Snapshot(e.to_string()))
    }

    pub fn from_dict(value: serde_json::Value) -> Result<Self, ReplicationError> {
        let snapshot: Self =
            serde_json::from_value(value).map_err(|e| ReplicationError::Snapshot(e.to_string()))?;
        snapshot.config.validate()?;
        Ok(snapshot)
    }
}
