// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Consistent hashing over virtual nodes.
//!
//! Every physical node owns `virtual_nodes` points on a `u64` ring, keyed by
//! `hash("{node}:{i}")`. A vector's primary replica is the first point at or
//! after `hash(vector_id)`; further replicas come from walking clockwise and
//! skipping nodes that were already picked.
//!
//! The ring is built lazily. It is rebuilt on the next lookup after
//! [`PlacementStrategy::notify_membership_changed`] or when the caller passes a
//! node set that differs from the one the ring was built from, so a stale
//! ring never hands out nodes that are no longer available.

use super::strategy::PlacementStrategy;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use tracing::debug;

pub const DEFAULT_VIRTUAL_NODES: usize = 100;

/// Position of `key` on the ring
pub fn ring_hash(key: &str) -> u64 {
    let hash = blake3::hash(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_be_bytes(prefix)
}

#[derive(Debug)]
struct HashRing {
    entries: Vec<(u64, String)>,
    nodes: Vec<String>,
    version: u64,
}

impl HashRing {
    fn build(nodes: Vec<String>, virtual_nodes: usize, version: u64) -> Self {
        let mut entries = Vec::with_capacity(nodes.len() * virtual_nodes);
        for node in &nodes {
            for i in 0..virtual_nodes {
                entries.push((ring_hash(&format!("{}:{}", node, i)), node.clone()));
            }
        }
        // Tie-break on node id so equal hashes still give a stable order
        entries.sort();

        Self {
            entries,
            nodes,
            version,
        }
    }

    fn walk(&self, vector_id: &str, count: usize) -> Vec<String> {
        let mut selected: Vec<String> = Vec::with_capacity(count);
        if self.entries.is_empty() || count == 0 {
            return selected;
        }

        let key = ring_hash(vector_id);
        let len = self.entries.len();
        let start = self.entries.partition_point(|(hash, _)| *hash < key) % len;

        for offset in 0..len {
            let (_, node) = &self.entries[(start + offset) % len];
            if !selected.contains(node) {
                selected.push(node.clone());
                if selected.len() == count {
                    break;
                }
            }
        }
        selected
    }
}

pub struct ConsistentHashStrategy {
    replication_factor: usize,
    virtual_nodes: usize,
    ring: RwLock<Option<HashRing>>,
    membership_version: AtomicU64,
}

impl ConsistentHashStrategy {
    pub fn new(replication_factor: usize, virtual_nodes: usize) -> Self {
        Self {
            replication_factor,
            virtual_nodes: virtual_nodes.max(1),
            ring: RwLock::new(None),
            membership_version: AtomicU64::new(0),
        }
    }

    pub fn virtual_nodes(&self) -> usize {
        self.virtual_nodes
    }

    /// Drop the current ring; the next lookup rebuilds it
    pub fn force_rebuild(&self) {
        *self.ring.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn membership_version(&self) -> u64 {
        self.membership_version.load(Ordering::Acquire)
    }

    /// Number of points on the current ring (0 before first use)
    pub fn ring_size(&self) -> usize {
        self.ring
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, |ring| ring.entries.len())
    }

    fn is_current(ring: &Option<HashRing>, nodes: &[String], version: u64) -> bool {
        matches!(ring, Some(ring) if ring.version == version && ring.nodes == nodes)
    }
}

impl PlacementStrategy for ConsistentHashStrategy {
    fn select_replicas(&self, vector_id: &str, available_nodes: &[String]) -> Vec<String> {
        let mut nodes: Vec<String> = available_nodes.to_vec();
        nodes.sort();
        nodes.dedup();
        if nodes.is_empty() {
            return Vec::new();
        }

        let version = self.membership_version();
        {
            let ring = self.ring.read().unwrap_or_else(PoisonError::into_inner);
            if Self::is_current(&ring, &nodes, version) {
                if let Some(ring) = ring.as_ref() {
                    return ring.walk(vector_id, self.replication_factor);
                }
            }
        }

        let mut ring = self.ring.write().unwrap_or_else(PoisonError::into_inner);
        if !Self::is_current(&ring, &nodes, version) {
            debug!(
                "Rebuilding hash ring: {} nodes x {} virtual nodes (version {})",
                nodes.len(),
                self.virtual_nodes,
                version
            );
            *ring = Some(HashRing::build(nodes, self.virtual_nodes, version));
        }
        ring.as_ref()
            .map(|ring| ring.walk(vector_id, self.replication_factor))
            .unwrap_or_default()
    }

    fn notify_membership_changed(&self) {
        self.membership_version.fetch_add(1, Ordering::AcqRel);
    }

    fn replication_factor(&self) -> usize {
        self.replication_factor
    }
}

impl std::fmt::Debug for ConsistentHashStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsistentHashStrategy")
            .field("replication_factor", &self.replication_factor)
            .field("virtual_nodes", &self.virtual_nodes)
            .field("ring_size", &self.ring_size())
            .field("membership_version", &self.membership_version())
            .finish()
    }
}
