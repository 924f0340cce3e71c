// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use crate::placement::DEFAULT_VIRTUAL_NODES;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use super::ReplicationError;

/// Replication tuning. Fixed for the lifetime of a manager; build a new
/// manager to change it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationConfig {
    pub replication_factor: usize,
    pub max_concurrent_replications: usize,
    pub retry_attempts: u32,
    #[serde(with = "duration_serde")]
    pub retry_delay: Duration,
    #[serde(with = "duration_serde")]
    pub health_check_interval: Duration,
    #[serde(with = "duration_serde")]
    pub heartbeat_timeout: Duration,
    #[serde(default = "default_virtual_nodes")]
    pub virtual_nodes: usize,
}

fn default_virtual_nodes() -> usize {
    DEFAULT_VIRTUAL_NODES
}

// Durations travel as fractional seconds so snapshots stay plain JSON numbers
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(seconds).map_err(serde::de::Error::custom)
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            replication_factor: 3,
            max_concurrent_replications: 5,
            retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
            health_check_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(15),
            virtual_nodes: DEFAULT_VIRTUAL_NODES,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_millis(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_millis)
}

impl ReplicationConfig {
    /// Defaults overridden by any `VECTOR_STORE_*` variables that are set
    pub fn from_env() -> Result<Self, ReplicationError> {
        let defaults = Self::default();
        let config = Self {
            replication_factor: env_parse("VECTOR_STORE_REPLICATION_FACTOR")
                .unwrap_or(defaults.replication_factor),
            max_concurrent_replications: env_parse("VECTOR_STORE_MAX_CONCURRENT_REPLICATIONS")
                .unwrap_or(defaults.max_concurrent_replications),
            retry_attempts: env_parse("VECTOR_STORE_RETRY_ATTEMPTS")
                .unwrap_or(defaults.retry_attempts),
            retry_delay: env_millis("VECTOR_STORE_RETRY_DELAY_MS").unwrap_or(defaults.retry_delay),
            health_check_interval: env_millis("VECTOR_STORE_HEALTH_CHECK_INTERVAL_MS")
                .unwrap_or(defaults.health_check_interval),
            heartbeat_timeout: env_millis("VECTOR_STORE_HEARTBEAT_TIMEOUT_MS")
                .unwrap_or(defaults.heartbeat_timeout),
            virtual_nodes: env_parse("VECTOR_STORE_VIRTUAL_NODES").unwrap_or(defaults.virtual_nodes),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    pub fn validate(&self) -> Result<(), ReplicationError> {
        if self.replication_factor == 0 {
            return Err(ReplicationError::InvalidConfig(
                "replication_factor must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent_replications == 0 {
            return Err(ReplicationError::InvalidConfig(
                "max_concurrent_replications must be at least 1".to_string(),
            ));
        }
        if self.health_check_interval.is_zero() {
            return Err(ReplicationError::InvalidConfig(
                "health_check_interval must be positive".to_string(),
            ));
        }
        if self.heartbeat_timeout.is_zero() {
            return Err(ReplicationError::InvalidConfig(
                "heartbeat_timeout must be positive".to_string(),
            ));
        }
        if self.virtual_nodes == 0 {
            return Err(ReplicationError::InvalidConfig(
                "virtual_nodes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn to_dict(&self) -> Result<serde_json::Value, ReplicationError> {
        serde_json::to_value(self).map_err(|e| ReplicationError::Snapshot(e.to_string()))
    }

    pub fn from_dict(value: serde_json::Value) -> Result<Self, ReplicationError> {
        let config: Self =
            serde_json::from_value(value).map_err(|e| ReplicationError::Snapshot(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}
