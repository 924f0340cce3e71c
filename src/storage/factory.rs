// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use std::env;
use std::sync::Arc;
use tracing::info;

use super::backend::{StorageBackend, StorageError};
use super::sqlite::{SqliteBackend, IN_MEMORY_PATH};

pub const DEFAULT_DB_PATH: &str = "vectors.db";

/// Which durable store to open
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    InMemory,
    File(String),
}

impl StorageLocation {
    pub fn path(&self) -> &str {
        match self {
            StorageLocation::InMemory => IN_MEMORY_PATH,
            StorageLocation::File(path) => path,
        }
    }

    pub fn from_path(path: &str) -> Self {
        if path == IN_MEMORY_PATH {
            StorageLocation::InMemory
        } else {
            StorageLocation::File(path.to_string())
        }
    }
}

pub struct StorageFactory;

impl StorageFactory {
    /// Create an uninitialized backend; the caller runs `init_db`
    pub fn create() -> Arc<dyn StorageBackend> {
        Arc::new(SqliteBackend::new())
    }

    /// Resolve the store location from `VECTOR_STORE_DB_PATH`
    pub fn location_from_env() -> Result<StorageLocation, StorageError> {
        let path = env::var("VECTOR_STORE_DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());
        let path = path.trim();
        if path.is_empty() {
            return Err(StorageError::InvalidPath(
                "VECTOR_STORE_DB_PATH must not be empty".to_string(),
            ));
        }

        let location = StorageLocation::from_path(path);
        info!("Cold tier location: {}", location.path());
        Ok(location)
    }
}
