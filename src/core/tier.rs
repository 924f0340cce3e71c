// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Hot tier of the vector store.
//!
//! Holds at most `max_hot_size` records in memory. Eviction is by insertion
//! order: the oldest-inserted record leaves first and reads never refresh a
//! record's position. The cold tier (see [`crate::core::index`]) keeps the
//! durable copy of every record, so eviction never loses data.

use crate::core::types::{Metadata, VectorRecord};
use lru::LruCache;
use std::num::NonZeroUsize;
use tracing::debug;

/// Counters for hot tier activity
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TierMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub insertions: u64,
}

impl TierMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get total number of lookups (hits + misses)
    pub fn total_requests(&self) -> u64 {
        self.hits + self.misses
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// In-memory hot tier.
///
/// Not synchronized; wrap it in a lock when sharing across tasks.
pub struct TierManager {
    hot: LruCache<String, VectorRecord>,
    metrics: TierMetrics,
    max_hot_size: usize,
}

impl TierManager {
    /// Create a hot tier holding at most `max_hot_size` records
    ///
    /// # Panics
    /// Panics if `max_hot_size` is 0
    pub fn new(max_hot_size: usize) -> Self {
        let capacity =
            NonZeroUsize::new(max_hot_size).expect("Hot tier size must be greater than 0");

        Self {
            hot: LruCache::new(capacity),
            metrics: TierMetrics::new(),
            max_hot_size,
        }
    }

    /// Insert a record built from its parts. See [`TierManager::insert`].
    pub fn add_embedding(
        &mut self,
        id: impl Into<String>,
        vector: Vec<f32>,
        metadata: Metadata,
    ) -> Option<VectorRecord> {
        self.insert(VectorRecord::new(id, vector, metadata))
    }

    /// Insert a record into the hot tier.
    ///
    /// Re-inserting an existing id replaces it and counts as a fresh
    /// insertion. Returns the evicted record when the tier overflowed.
    pub fn insert(&mut self, record: VectorRecord) -> Option<VectorRecord> {
        self.metrics.insertions += 1;
        let id = record.id.clone();

        match self.hot.push(id.clone(), record) {
            Some((old_id, _)) if old_id == id => None,
            Some((evicted_id, evicted)) => {
                self.metrics.evictions += 1;
                debug!("Evicted {} from hot tier", evicted_id);
                Some(evicted)
            }
            None => None,
        }
    }

    /// Vector for `id` if it is resident. Does not consult the cold tier and
    /// does not change eviction order.
    pub fn get_embedding(&mut self, id: &str) -> Option<Vec<f32>> {
        self.get_record(id).map(|record| record.vector)
    }

    pub fn get_record(&mut self, id: &str) -> Option<VectorRecord> {
        match self.hot.peek(id) {
            Some(record) => {
                self.metrics.hits += 1;
                Some(record.clone())
            }
            None => {
                self.metrics.misses += 1;
                None
            }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.hot.contains(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<VectorRecord> {
        self.hot.pop(id)
    }

    /// Resident ids, oldest-inserted first
    pub fn ids(&self) -> Vec<String> {
        self.hot.iter().rev().map(|(id, _)| id.clone()).collect()
    }

    /// Resident records, oldest-inserted first
    pub fn records(&self) -> Vec<VectorRecord> {
        self.hot.iter().rev().map(|(_, record)| record.clone()).collect()
    }

    pub fn clear(&mut self) {
        self.hot.clear();
    }

    pub fn len(&self) -> usize {
        self.hot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hot.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_hot_size
    }

    pub fn resident_bytes(&self) -> usize {
        self.hot.iter().map(|(_, record)| record.approx_size()).sum()
    }

    pub fn metrics(&self) -> TierMetrics {
        self.metrics.clone()
    }

    pub fn reset_metrics(&mut self) {
        self.metrics.reset();
    }
}

impl std::fmt::Debug for TierManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TierManager")
            .field("max_hot_size", &self.max_hot_size)
            .field("len", &self.len())
            .field("metrics", &self.metrics)
            .finish()
    }
}
