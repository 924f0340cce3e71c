// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

pub mod config;
pub mod manager;
pub mod snapshot;
pub mod task;
pub mod transport;

use thiserror::Error;

pub use config::ReplicationConfig;
pub use manager::{ClusterHealth, ReplicationManager, NO_TARGETS_AVAILABLE};
pub use snapshot::ManagerSnapshot;
pub use task::{ReplicationTask, TaskStatus};
pub use transport::{ReplicaTransport, SimulatedTransport, TransferError};

/// Synchronous failures of the replication API.
///
/// A replication that fails while running is not an error here; it shows up
/// as a task with `status = failed` and an `error_message`.
#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("Task {0} not found")]
    TaskNotFound(String),

    #[error("Task {task_id} is {status}; only failed tasks can be retried")]
    NotRetryable { task_id: String, status: TaskStatus },

    #[error("Task {task_id} already used {attempts} attempts")]
    RetryLimitExceeded { task_id: String, attempts: u32 },

    #[error("Replication queue is closed")]
    QueueClosed,

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
