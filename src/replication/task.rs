// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use crate::core::types::now_timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Copy `vector_ids` from `source_node` to every node in `target_nodes`.
///
/// Status only moves forward: pending -> in_progress -> completed | failed.
/// Terminal tasks are never reopened; a retry is a new task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationTask {
    pub task_id: String,
    pub source_node: String,
    pub target_nodes: Vec<String>,
    pub vector_ids: Vec<String>,
    pub status: TaskStatus,
    pub created_at: f64,
    pub started_at: Option<f64>,
    pub completed_at: Option<f64>,
    pub error_message: Option<String>,
    /// 1 for a fresh task, incremented for each caller-driven retry
    #[serde(default = "first_attempt")]
    pub attempt: u32,
    /// Task this one retries, if any
    #[serde(default)]
    pub retry_of: Option<String>,
}

fn first_attempt() -> u32 {
    1
}

impl ReplicationTask {
    pub fn new(source_node: String, target_nodes: Vec<String>, vector_ids: Vec<String>) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            source_node,
            target_nodes,
            vector_ids,
            status: TaskStatus::Pending,
            created_at: now_timestamp(),
            started_at: None,
            completed_at: None,
            error_message: None,
            attempt: first_attempt(),
            retry_of: None,
        }
    }

    /// Fresh pending task repeating this one's transfer
    pub fn retry(&self) -> Self {
        let mut task = Self::new(
            self.source_node.clone(),
            self.target_nodes.clone(),
            self.vector_ids.clone(),
        );
        task.attempt = self.attempt + 1;
        task.retry_of = Some(self.task_id.clone());
        task
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// pending -> in_progress. Returns false if the task was not pending.
    pub fn mark_in_progress(&mut self) -> bool {
        if self.status != TaskStatus::Pending {
            return false;
        }
        self.status = TaskStatus::InProgress;
        self.started_at = Some(now_timestamp());
        true
    }

    pub fn mark_completed(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = TaskStatus::Completed;
        self.completed_at = Some(now_timestamp());
        true
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = TaskStatus::Failed;
        self.completed_at = Some(now_timestamp());
        self.error_message = Some(error.into());
        true
    }

    /// Wall-clock seconds between start and completion, if both happened
    pub fn duration(&self) -> Option<f64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).max(0.0)),
            _ => None,
        }
    }

    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::json!({
            "task_id": self.task_id,
            "source_node": self.source_node,
            "target_nodes": self.target_nodes,
            "vector_ids": self.vector_ids,
            "status": self.status.as_str(),
            "created_at": self.created_at,
            "started_at": self.started_at,
            "completed_at": self.completed_at,
            "error_message": self.error_message,
            "attempt": self.attempt,
            "retry_of": self.retry_of,
        })
    }

    pub fn from_dict(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}
