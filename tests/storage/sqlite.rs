// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use tempfile::TempDir;
use tiered_vectordb::core::index::EMBEDDINGS_SCHEMA;
use tiered_vectordb::storage::*;

#[cfg(test)]
mod sqlite_backend_tests {
    use super::*;

    #[tokio::test]
    async fn test_creates_missing_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a").join("b").join("cold.db");
        let path = path.to_string_lossy().into_owned();

        let backend = SqliteBackend::new();
        backend.init_db(&path, EMBEDDINGS_SCHEMA).await.unwrap();
        assert!(std::path::Path::new(&path).exists());
        backend.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_committed_rows_visible_to_new_connection() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cold.db").to_string_lossy().into_owned();

        let writer = SqliteBackend::new();
        writer.init_db(&path, EMBEDDINGS_SCHEMA).await.unwrap();
        let changed = writer
            .execute(
                "INSERT OR REPLACE INTO embeddings (id, vector, metadata, timestamp) VALUES (?1, ?2, ?3, ?4)",
                &[
                    SqlValue::from("v1"),
                    SqlValue::Blob(vec![0xa1, 0x01]),
                    SqlValue::Text("{}".to_string()),
                    SqlValue::Real(12.5),
                ],
            )
            .await
            .unwrap();
        assert_eq!(changed, 1);
        writer.close().await.unwrap();

        let reader = SqliteBackend::new();
        reader.init_db(&path, EMBEDDINGS_SCHEMA).await.unwrap();
        let rows = reader
            .query(
                "SELECT id, metadata, timestamp FROM embeddings WHERE id = ?1",
                &[SqlValue::from("v1")],
            )
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0].as_text(), Some("v1"));
        assert_eq!(rows[0][1].as_text(), Some("{}"));
        assert_eq!(rows[0][2].as_real(), Some(12.5));
    }

    #[tokio::test]
    async fn test_sql_errors_propagate() {
        let backend = SqliteBackend::new();
        backend.init_db(IN_MEMORY_PATH, EMBEDDINGS_SCHEMA).await.unwrap();

        let result = backend
            .execute("INSERT INTO no_such_table (x) VALUES (?1)", &[SqlValue::Integer(1)])
            .await;
        assert!(matches!(result, Err(StorageError::Sqlite(_))));
    }

    #[tokio::test]
    async fn test_empty_path_is_rejected() {
        let backend = SqliteBackend::new();
        let result = backend.init_db("", EMBEDDINGS_SCHEMA).await;
        assert!(matches!(result, Err(StorageError::InvalidPath(_))));
    }
}
