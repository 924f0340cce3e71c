// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

pub mod consistent_hash;
pub mod strategy;

pub use consistent_hash::{ring_hash, ConsistentHashStrategy, DEFAULT_VIRTUAL_NODES};
pub use strategy::PlacementStrategy;
