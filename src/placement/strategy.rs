// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

/// Chooses which nodes hold replicas of a vector
pub trait PlacementStrategy: Send + Sync {
    /// Ordered replica set for `vector_id`, primary first. Returns at most
    /// `replication_factor()` distinct nodes drawn from `available_nodes`.
    fn select_replicas(&self, vector_id: &str, available_nodes: &[String]) -> Vec<String>;

    /// Cluster membership changed; cached placement state is stale
    fn notify_membership_changed(&self);

    fn replication_factor(&self) -> usize;
}
