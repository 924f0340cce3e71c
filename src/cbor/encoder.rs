// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use serde::Serialize;
use serde_cbor::ser::Serializer;

use super::CborError;
use crate::replication::snapshot::ManagerSnapshot;

pub struct CborEncoder;

impl CborEncoder {
    /// Encode a vector payload for the `embeddings.vector` BLOB column.
    ///
    /// Floats are written as CBOR floats, so the payload decodes back to the
    /// exact same `f32` bits.
    pub fn encode_vector(vector: &[f32]) -> Result<Vec<u8>, CborError> {
        let mut buf = Vec::with_capacity(vector.len() * 5 + 8);
        let mut ser = Serializer::new(&mut buf);
        ser.self_describe()?;
        vector.serialize(&mut ser)?;
        Ok(buf)
    }

    /// Encode a replication manager snapshot for checkpoint files
    pub fn encode_snapshot(snapshot: &ManagerSnapshot) -> Result<Vec<u8>, CborError> {
        let mut buf = Vec::new();
        let mut ser = Serializer::new(&mut buf);
        ser.self_describe()?;
        snapshot.serialize(&mut ser)?;
        Ok(buf)
    }
}
