// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form metadata attached to a vector
pub type Metadata = Map<String, Value>;

/// Metadata key the index stamps with the server-side insertion time
pub const TIMESTAMP_KEY: &str = "timestamp";

/// Current wall-clock time as fractional seconds since the Unix epoch
pub fn now_timestamp() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub metadata: Metadata,
    pub timestamp: f64,
}

impl VectorRecord {
    pub fn new(id: impl Into<String>, vector: Vec<f32>, metadata: Metadata) -> Self {
        Self {
            id: id.into(),
            vector,
            metadata,
            timestamp: now_timestamp(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.vector.len()
    }

    /// Metadata as supplied by the caller, without the injected timestamp
    pub fn user_metadata(&self) -> Metadata {
        let mut metadata = self.metadata.clone();
        metadata.remove(TIMESTAMP_KEY);
        metadata
    }

    /// Rough resident size in bytes, used for tier statistics
    pub fn approx_size(&self) -> usize {
        self.id.len() + self.vector.len() * std::mem::size_of::<f32>() + self.metadata.len() * 32
    }
}
