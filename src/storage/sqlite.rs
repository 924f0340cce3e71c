// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use async_trait::async_trait;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

use super::backend::{Row, SqlValue, StorageBackend, StorageError};

/// Path that keeps the whole database in memory
pub const IN_MEMORY_PATH: &str = ":memory:";

/// Embedded SQLite cold tier.
///
/// rusqlite is synchronous, so every call runs on tokio's blocking pool
/// and never stalls the async workers on disk IO.
pub struct SqliteBackend {
    conn: Arc<Mutex<Option<Connection>>>,
    closed: Arc<AtomicBool>,
}

impl SqliteBackend {
    pub fn new() -> Self {
        Self {
            conn: Arc::new(Mutex::new(None)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run `op` against the open connection on the blocking pool
    async fn with_conn<T, F>(&self, op: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        let closed = self.closed.clone();
        let result = tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            match guard.as_ref() {
                Some(conn) => op(conn),
                None if closed.load(Ordering::Acquire) => Err(StorageError::Closed),
                None => Err(StorageError::NotInitialized),
            }
        })
        .await;

        match result {
            Ok(inner) => inner,
            Err(e) => Err(StorageError::BlockingTask(e.to_string())),
        }
    }

    fn open_connection(path: &str) -> Result<Connection, StorageError> {
        if path.is_empty() {
            return Err(StorageError::InvalidPath("path is empty".to_string()));
        }
        if path == IN_MEMORY_PATH {
            return Ok(Connection::open_in_memory()?);
        }

        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(conn)
    }
}

impl Default for SqliteBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn to_sql(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(v) => Value::Integer(*v),
        SqlValue::Real(v) => Value::Real(*v),
        SqlValue::Text(v) => Value::Text(v.clone()),
        SqlValue::Blob(v) => Value::Blob(v.clone()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Result<SqlValue, StorageError> {
    Ok(match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(v) => SqlValue::Integer(v),
        ValueRef::Real(v) => SqlValue::Real(v),
        ValueRef::Text(v) => SqlValue::Text(
            std::str::from_utf8(v)
                .map_err(|e| StorageError::SerializationError(e.to_string()))?
                .to_string(),
        ),
        ValueRef::Blob(v) => SqlValue::Blob(v.to_vec()),
    })
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    async fn init_db(&self, path: &str, schema: &str) -> Result<(), StorageError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }

        let conn = self.conn.clone();
        let path = path.to_string();
        let schema = schema.to_string();
        let result = tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            if guard.is_none() {
                *guard = Some(Self::open_connection(&path)?);
                info!("Opened SQLite cold tier at {}", path);
            }
            if let Some(conn) = guard.as_ref() {
                conn.execute_batch(&schema)?;
            }
            Ok::<(), StorageError>(())
        })
        .await;

        match result {
            Ok(inner) => inner,
            Err(e) => Err(StorageError::BlockingTask(e.to_string())),
        }
    }

    async fn execute(&self, query: &str, params: &[SqlValue]) -> Result<usize, StorageError> {
        let query = query.to_string();
        let params: Vec<Value> = params.iter().map(to_sql).collect();

        // Autocommit mode: the statement is durable once execute returns.
        self.with_conn(move |conn| Ok(conn.execute(&query, params_from_iter(params))?))
            .await
    }

    async fn query(&self, query: &str, params: &[SqlValue]) -> Result<Vec<Row>, StorageError> {
        let query = query.to_string();
        let params: Vec<Value> = params.iter().map(to_sql).collect();

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&query)?;
            let columns = stmt.column_count();
            let mut rows = stmt.query(params_from_iter(params))?;

            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut values = Vec::with_capacity(columns);
                for i in 0..columns {
                    values.push(from_sql(row.get_ref(i)?)?);
                }
                out.push(values);
            }
            Ok(out)
        })
        .await
    }

    async fn close(&self) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        let closed = self.closed.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            closed.store(true, Ordering::Release);
            if let Some(conn) = guard.take() {
                conn.close().map_err(|(_, e)| StorageError::Sqlite(e))?;
                debug!("Closed SQLite cold tier");
            }
            Ok::<(), StorageError>(())
        })
        .await;

        match result {
            Ok(inner) => inner,
            Err(e) => Err(StorageError::BlockingTask(e.to_string())),
        }
    }

    async fn is_open(&self) -> bool {
        self.with_conn(|_| Ok(())).await.is_ok()
    }
}
