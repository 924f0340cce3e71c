// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Public storage API: a bounded hot tier in front of a durable cold tier.

use crate::cbor::{CborDecoder, CborEncoder};
use crate::core::tier::{TierManager, TierMetrics};
use crate::core::types::{now_timestamp, Metadata, VectorRecord, TIMESTAMP_KEY};
use crate::storage::{Row, SqlValue, StorageBackend, StorageError, StorageFactory, DEFAULT_DB_PATH};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

pub const EMBEDDINGS_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS embeddings (
    id TEXT PRIMARY KEY,
    vector BLOB NOT NULL,
    metadata TEXT NOT NULL,
    timestamp REAL NOT NULL
);";

const UPSERT_SQL: &str =
    "INSERT OR REPLACE INTO embeddings (id, vector, metadata, timestamp) VALUES (?1, ?2, ?3, ?4)";
const SELECT_SQL: &str = "SELECT id, vector, metadata, timestamp FROM embeddings WHERE id = ?1";

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Vector index is closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    pub db_path: String,
    pub max_hot_size: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            db_path: DEFAULT_DB_PATH.to_string(),
            max_hot_size: 1000,
        }
    }
}

impl IndexConfig {
    pub fn in_memory(max_hot_size: usize) -> Self {
        Self {
            db_path: crate::storage::IN_MEMORY_PATH.to_string(),
            max_hot_size,
        }
    }

    /// Read `VECTOR_STORE_DB_PATH` and `VECTOR_STORE_MAX_HOT_SIZE`, falling
    /// back to defaults for anything unset or unparsable
    pub fn from_env() -> Result<Self, IndexError> {
        let defaults = Self::default();
        let location = StorageFactory::location_from_env()?;

        let config = Self {
            db_path: location.path().to_string(),
            max_hot_size: env::var("VECTOR_STORE_MAX_HOT_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_hot_size),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    pub fn validate(&self) -> Result<(), IndexError> {
        if self.max_hot_size == 0 {
            return Err(IndexError::Validation(
                "max_hot_size must be greater than 0".to_string(),
            ));
        }
        if self.db_path.trim().is_empty() {
            return Err(IndexError::Validation("db_path must not be empty".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub hot_count: usize,
    pub max_hot_size: usize,
    pub cold_count: usize,
    pub resident_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

pub struct VectorIndex {
    tier: RwLock<TierManager>,
    backend: Arc<dyn StorageBackend>,
    closed: AtomicBool,
}

impl VectorIndex {
    /// Open the index described by `config`, creating the cold store if needed
    pub async fn open(config: IndexConfig) -> Result<Self, IndexError> {
        config.validate()?;
        let backend = StorageFactory::create();
        backend.init_db(&config.db_path, EMBEDDINGS_SCHEMA).await?;
        info!(
            "Opened vector index at {} (max_hot_size={})",
            config.db_path, config.max_hot_size
        );
        Ok(Self::from_parts(backend, config.max_hot_size))
    }

    /// Build an index over an already-initialized backend
    pub async fn with_backend(
        backend: Arc<dyn StorageBackend>,
        path: &str,
        max_hot_size: usize,
    ) -> Result<Self, IndexError> {
        if max_hot_size == 0 {
            return Err(IndexError::Validation(
                "max_hot_size must be greater than 0".to_string(),
            ));
        }
        backend.init_db(path, EMBEDDINGS_SCHEMA).await?;
        Ok(Self::from_parts(backend, max_hot_size))
    }

    fn from_parts(backend: Arc<dyn StorageBackend>, max_hot_size: usize) -> Self {
        Self {
            tier: RwLock::new(TierManager::new(max_hot_size)),
            backend,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), IndexError> {
        if self.closed.load(Ordering::Acquire) {
            Err(IndexError::Closed)
        } else {
            Ok(())
        }
    }

    /// Add `ids[i] -> vectors[i]` pairs.
    ///
    /// Every record is written to the cold tier before it becomes visible in
    /// the hot tier, so a record evicted right away is still durable.
    /// Inputs are validated up front; nothing is written if validation fails.
    pub async fn add(
        &self,
        ids: Vec<String>,
        vectors: Vec<Vec<f32>>,
        metadata: Option<Vec<Metadata>>,
    ) -> Result<(), IndexError> {
        self.ensure_open()?;

        if ids.len() != vectors.len() {
            return Err(IndexError::Validation(format!(
                "ids and vectors must have the same length ({} != {})",
                ids.len(),
                vectors.len()
            )));
        }
        if let Some(metadata) = &metadata {
            if metadata.len() != ids.len() {
                return Err(IndexError::Validation(format!(
                    "metadata must match the number of ids ({} != {})",
                    metadata.len(),
                    ids.len()
                )));
            }
        }
        for (id, vector) in ids.iter().zip(vectors.iter()) {
            if id.is_empty() {
                return Err(IndexError::Validation("vector id must not be empty".to_string()));
            }
            if vector.is_empty() {
                return Err(IndexError::Validation(format!("vector '{}' is empty", id)));
            }
        }

        let mut metadata = metadata.unwrap_or_default().into_iter();

        // Held across the cold write and hot insert so the two tiers never
        // disagree on the latest value for an id.
        let mut tier = self.tier.write().await;
        for (id, vector) in ids.into_iter().zip(vectors.into_iter()) {
            let timestamp = now_timestamp();
            let mut meta = metadata.next().unwrap_or_default();
            meta.insert(TIMESTAMP_KEY.to_string(), Value::from(timestamp));

            let record = VectorRecord {
                id,
                vector,
                metadata: meta,
                timestamp,
            };
            self.persist_record(&record).await?;

            if let Some(evicted) = tier.insert(record) {
                debug!("Record {} left the hot tier; cold copy retained", evicted.id);
            }
        }

        Ok(())
    }

    /// Vector for `id` if it is in the hot tier. Hot misses return `None`
    /// even when the cold tier has the record; use [`VectorIndex::get_or_load`]
    /// to fall back to durable storage.
    pub async fn get(&self, id: &str) -> Result<Option<Vec<f32>>, IndexError> {
        self.ensure_open()?;
        Ok(self.tier.write().await.get_embedding(id))
    }

    pub async fn get_record(&self, id: &str) -> Result<Option<VectorRecord>, IndexError> {
        self.ensure_open()?;
        Ok(self.tier.write().await.get_record(id))
    }

    /// Batch form of [`VectorIndex::get`]; output order matches `ids`
    pub async fn search_ids(&self, ids: &[String]) -> Result<Vec<Option<Vec<f32>>>, IndexError> {
        self.ensure_open()?;
        let mut tier = self.tier.write().await;
        Ok(ids.iter().map(|id| tier.get_embedding(id)).collect())
    }

    /// Read a record straight from the cold tier
    pub async fn load_from_cold(&self, id: &str) -> Result<Option<VectorRecord>, IndexError> {
        self.ensure_open()?;
        let rows = self.backend.query(SELECT_SQL, &[SqlValue::from(id)]).await?;
        rows.into_iter().next().map(decode_row).transpose()
    }

    /// Hot-tier lookup with cold fallback; cold hits are promoted
    pub async fn get_or_load(&self, id: &str) -> Result<Option<Vec<f32>>, IndexError> {
        self.ensure_open()?;
        let mut tier = self.tier.write().await;
        if let Some(vector) = tier.get_embedding(id) {
            return Ok(Some(vector));
        }

        match self.load_from_cold(id).await? {
            Some(record) => {
                let vector = record.vector.clone();
                tier.insert(record);
                Ok(Some(vector))
            }
            None => Ok(None),
        }
    }

    /// Promote cold records into the hot tier. Returns how many were found.
    pub async fn prefetch(&self, ids: &[String]) -> Result<usize, IndexError> {
        self.ensure_open()?;
        let mut tier = self.tier.write().await;
        let mut promoted = 0;
        for id in ids {
            if let Some(record) = self.load_from_cold(id).await? {
                tier.insert(record);
                promoted += 1;
            }
        }
        Ok(promoted)
    }

    /// Force-write every hot record to the cold tier. Safe to repeat.
    ///
    /// Writers are blocked until the flush finishes, so a concurrent `add`
    /// cannot be overwritten by an older hot copy.
    pub async fn persist_all(&self) -> Result<usize, IndexError> {
        self.ensure_open()?;
        let tier = self.tier.read().await;
        let records = tier.records();
        for record in &records {
            self.persist_record(record).await?;
        }
        debug!("Persisted {} hot records", records.len());
        Ok(records.len())
    }

    /// Remove a record from both tiers
    pub async fn delete(&self, id: &str) -> Result<bool, IndexError> {
        self.ensure_open()?;
        let mut tier = self.tier.write().await;
        let removed_hot = tier.remove(id).is_some();
        let removed_cold = self
            .backend
            .execute("DELETE FROM embeddings WHERE id = ?1", &[SqlValue::from(id)])
            .await?;
        Ok(removed_hot || removed_cold > 0)
    }

    pub async fn hot_ids(&self) -> Vec<String> {
        self.tier.read().await.ids()
    }

    pub async fn cold_count(&self) -> Result<usize, IndexError> {
        self.ensure_open()?;
        let rows = self.backend.query("SELECT COUNT(*) FROM embeddings", &[]).await?;
        let count = rows
            .first()
            .and_then(|row| row.first())
            .and_then(SqlValue::as_integer)
            .unwrap_or(0);
        Ok(count.max(0) as usize)
    }

    pub async fn tier_metrics(&self) -> TierMetrics {
        self.tier.read().await.metrics()
    }

    pub async fn stats(&self) -> Result<IndexStats, IndexError> {
        let cold_count = self.cold_count().await?;
        let tier = self.tier.read().await;
        let metrics = tier.metrics();
        Ok(IndexStats {
            hot_count: tier.len(),
            max_hot_size: tier.capacity(),
            cold_count,
            resident_bytes: tier.resident_bytes(),
            hits: metrics.hits,
            misses: metrics.misses,
            evictions: metrics.evictions,
        })
    }

    /// Release the cold tier. Every later call fails with [`IndexError::Closed`].
    pub async fn close(&self) -> Result<(), IndexError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.tier.write().await.clear();
        self.backend.close().await?;
        info!("Vector index closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn persist_record(&self, record: &VectorRecord) -> Result<(), IndexError> {
        let blob = CborEncoder::encode_vector(&record.vector)
            .map_err(|e| IndexError::Codec(e.to_string()))?;
        let metadata = serde_json::to_string(&record.metadata)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;

        self.backend
            .execute(
                UPSERT_SQL,
                &[
                    SqlValue::from(record.id.as_str()),
                    SqlValue::Blob(blob),
                    SqlValue::Text(metadata),
                    SqlValue::Real(record.timestamp),
                ],
            )
            .await?;
        Ok(())
    }
}

fn decode_row(row: Row) -> Result<VectorRecord, IndexError> {
    let mut columns = row.into_iter();
    let (id, vector, metadata, timestamp) = match (
        columns.next(),
        columns.next(),
        columns.next(),
        columns.next(),
    ) {
        (Some(SqlValue::Text(id)), Some(SqlValue::Blob(vector)), Some(metadata), Some(timestamp)) => {
            (id, vector, metadata, timestamp)
        }
        _ => return Err(IndexError::Codec("malformed embeddings row".to_string())),
    };

    let vector = CborDecoder::decode_vector(&vector).map_err(|e| IndexError::Codec(e.to_string()))?;
    let metadata: Metadata = match metadata.as_text() {
        Some(text) => serde_json::from_str(text)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?,
        None => Metadata::new(),
    };

    Ok(VectorRecord {
        id,
        vector,
        metadata,
        timestamp: timestamp.as_real().unwrap_or_default(),
    })
}
