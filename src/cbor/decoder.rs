// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use super::CborError;
use crate::replication::snapshot::ManagerSnapshot;

pub struct CborDecoder;

impl CborDecoder {
    /// Decode a vector payload read from the cold tier
    pub fn decode_vector(data: &[u8]) -> Result<Vec<f32>, CborError> {
        serde_cbor::from_slice(data)
    }

    pub fn decode_snapshot(data: &[u8]) -> Result<ManagerSnapshot, CborError> {
        serde_cbor::from_slice(data)
    }
}
