// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

pub mod encoder;
pub mod decoder;

pub use encoder::CborEncoder;
pub use decoder::CborDecoder;

pub use serde_cbor::Error as CborError;
