// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

pub mod backend;
pub mod factory;
pub mod sqlite;

pub use backend::{Row, SqlValue, StorageBackend, StorageError};
pub use factory::{StorageFactory, StorageLocation, DEFAULT_DB_PATH};
pub use sqlite::{SqliteBackend, IN_MEMORY_PATH};
