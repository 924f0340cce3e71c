// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

pub mod index;
pub mod tier;
pub mod types;

pub use index::{IndexConfig, IndexError, IndexStats, VectorIndex, EMBEDDINGS_SCHEMA};
pub use tier::{TierManager, TierMetrics};
pub use types::{now_timestamp, Metadata, VectorRecord, TIMESTAMP_KEY};
