// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::trace;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransferError {
    #[error("Transfer to {node} failed: {reason}")]
    Failed { node: String, reason: String },
}

/// Moves vector payloads between nodes.
///
/// Called outside the manager lock, once per available target of a task.
#[async_trait]
pub trait ReplicaTransport: Send + Sync {
    async fn transfer(
        &self,
        source: &str,
        target: &str,
        vector_ids: &[String],
    ) -> Result<(), TransferError>;
}

/// Stand-in transport that only waits, for single-process clusters and tests
#[derive(Debug, Clone)]
pub struct SimulatedTransport {
    latency: Duration,
    use_jitter: bool,
}

impl SimulatedTransport {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            use_jitter: false,
        }
    }

    /// Adds up to 30% random extra latency per transfer
    pub fn with_jitter(latency: Duration) -> Self {
        Self {
            latency,
            use_jitter: true,
        }
    }

    pub fn instant() -> Self {
        Self::new(Duration::ZERO)
    }

    fn delay(&self) -> Duration {
        if !self.use_jitter || self.latency.is_zero() {
            return self.latency;
        }
        let jitter = Duration::from_micros(
            (rand::random::<f64>() * self.latency.as_micros() as f64 * 0.3) as u64,
        );
        self.latency + jitter
    }
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new(Duration::from_millis(10))
    }
}

#[async_trait]
impl ReplicaTransport for SimulatedTransport {
    async fn transfer(
        &self,
        source: &str,
        target: &str,
        vector_ids: &[String],
    ) -> Result<(), TransferError> {
        let delay = self.delay();
        if !delay.is_zero() {
            sleep(delay).await;
        }
        trace!(
            "Simulated transfer of {} vectors {} -> {}",
            vector_ids.len(),
            source,
            target
        );
        Ok(())
    }
}
