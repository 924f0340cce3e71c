// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage backend is not initialized")]
    NotInitialized,
    #[error("Storage backend is closed")]
    Closed,
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Invalid database path: {0}")]
    InvalidPath(String),
    #[error("Blocking storage task failed: {0}")]
    BlockingTask(String),
}

/// A single bound parameter or result column
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            SqlValue::Real(v) => Some(*v),
            SqlValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(value: Vec<u8>) -> Self {
        SqlValue::Blob(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Real(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

pub type Row = Vec<SqlValue>;

/// Durable cold-tier persistence.
///
/// `execute` runs one statement and commits it before returning. Failures
/// always surface as [`StorageError`]; implementations never swallow them.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Open (creating if absent) the store at `path` and apply `schema`.
    /// Re-running on an existing store leaves existing objects untouched.
    async fn init_db(&self, path: &str, schema: &str) -> Result<(), StorageError>;

    /// Run a single statement, returning the number of affected rows
    async fn execute(&self, query: &str, params: &[SqlValue]) -> Result<usize, StorageError>;

    /// Run a read statement and collect every row
    async fn query(&self, query: &str, params: &[SqlValue]) -> Result<Vec<Row>, StorageError>;

    async fn close(&self) -> Result<(), StorageError>;

    async fn is_open(&self) -> bool;
}
