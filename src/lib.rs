// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

pub mod api;
pub mod cbor;
pub mod core;
pub mod placement;
pub mod replication;
pub mod storage;
