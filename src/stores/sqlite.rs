//! SQLite-backed vector store using the `sqlite-vec` extension.
//!
//! Records live in a single `records` table; embeddings are stored as
//! raw little-endian `f32` blobs and ranked with `vec_distance_cosine`.
//! One collection per database file gives a stable on-disk handle that
//! survives process restarts. All access funnels through a single
//! `tokio_rusqlite` connection, whose command thread serializes writers
//! and gives readers a consistent view of each record.

use std::mem::transmute;
use std::os::raw::c_char;
use std::path::Path;
use std::sync::OnceLock;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_rusqlite::{params_from_iter, Connection, OptionalExtension, Transaction, ffi};

use super::{
    FilterOp, IndexedRecord, InsertBatch, MetadataFilter, SearchResult, VectorStore,
};
use crate::types::{PipelineError, Result};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS records (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    metadata TEXT NOT NULL,
    embedding BLOB NOT NULL
);
CREATE TABLE IF NOT EXISTS store_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

/// Persistent vector collection addressed by a database file path.
#[derive(Clone)]
pub struct SqliteVectorStore {
    conn: Connection,
}

impl SqliteVectorStore {
    /// Opens (or creates) the collection at `path`, verifying that the
    /// `sqlite-vec` extension loaded.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::register_sqlite_vec()?;
        let conn = Connection::open(path.as_ref())
            .await
            .map_err(|err| PipelineError::Index(err.to_string()))?;
        conn.call(|conn| {
            conn.query_row("select vec_version()", [], |row| row.get::<_, String>(0))
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
            conn.execute_batch(SCHEMA)
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
            Ok(())
        })
        .await
        .map_err(index_err)?;
        tracing::info!(path = %path.as_ref().display(), "opened vector store");
        Ok(Self { conn })
    }

    /// In-memory collection, useful for tests and ephemeral indexes.
    pub async fn open_in_memory() -> Result<Self> {
        Self::register_sqlite_vec()?;
        let conn = Connection::open_in_memory()
            .await
            .map_err(|err| PipelineError::Index(err.to_string()))?;
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
            Ok(())
        })
        .await
        .map_err(index_err)?;
        Ok(Self { conn })
    }

    /// Registers `sqlite-vec` as an auto extension, once per process.
    fn register_sqlite_vec() -> Result<()> {
        static INIT: OnceLock<std::result::Result<(), String>> = OnceLock::new();

        INIT.get_or_init(|| unsafe {
            type SqliteExtensionInit = unsafe extern "C" fn(
                *mut ffi::sqlite3,
                *mut *mut c_char,
                *const ffi::sqlite3_api_routines,
            ) -> i32;

            let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
            let init_fn: SqliteExtensionInit =
                transmute::<unsafe extern "C" fn(), SqliteExtensionInit>(init);
            let rc = ffi::sqlite3_auto_extension(Some(init_fn));
            if rc != 0 {
                Err(format!(
                    "failed to register sqlite-vec extension (code {rc})"
                ))
            } else {
                Ok(())
            }
        })
        .clone()
        .map_err(PipelineError::Index)
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn insert(&self, batch: InsertBatch) -> Result<Vec<String>> {
        let records = batch.into_records()?;
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let dimension = records[0].vector.len();
        let ids: Vec<String> = records.iter().map(|record| record.id.clone()).collect();
        let count = records.len();

        self.conn
            .call(move |conn| {
                let tx = conn
                    .transaction()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                check_dimension(&tx, dimension)?;
                {
                    let mut stmt = tx
                        .prepare(
                            "INSERT OR REPLACE INTO records (id, content, metadata, embedding) \
                             VALUES (?, ?, ?, ?)",
                        )
                        .map_err(tokio_rusqlite::Error::Rusqlite)?;
                    for record in records {
                        stmt.execute((
                            &record.id,
                            &record.content,
                            Value::Object(record.metadata).to_string(),
                            vector_to_blob(&record.vector),
                        ))
                        .map_err(tokio_rusqlite::Error::Rusqlite)?;
                    }
                }
                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(())
            })
            .await
            .map_err(index_err)?;

        tracing::info!(records = count, "inserted into vector store");
        Ok(ids)
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchResult>> {
        let blob = vector_to_blob(vector);
        let dimension = vector.len();
        let (where_clause, filter_params) = filter_sql(filter);

        self.conn
            .call(move |conn| {
                let tx = conn
                    .transaction()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                if let Some(pinned) = pinned_dimension(&tx)? {
                    if pinned != dimension {
                        return Err(other(format!(
                            "query vector has dimension {dimension} but the store holds {pinned}"
                        )));
                    }
                }

                let sql = format!(
                    "SELECT id, content, metadata, \
                     vec_distance_cosine(embedding, ?) AS distance \
                     FROM records{where_clause} \
                     ORDER BY distance ASC LIMIT ?"
                );
                let mut params: Vec<tokio_rusqlite::types::Value> =
                    vec![tokio_rusqlite::types::Value::Blob(blob)];
                params.extend(filter_params);
                params.push(tokio_rusqlite::types::Value::Integer(top_k as i64));

                let mut results = Vec::new();
                {
                    let mut stmt =
                        tx.prepare(&sql).map_err(tokio_rusqlite::Error::Rusqlite)?;
                    let rows = stmt
                        .query_map(params_from_iter(params), |row| {
                            Ok(SearchResult {
                                id: row.get(0)?,
                                content: row.get(1)?,
                                metadata: parse_metadata(row.get::<_, String>(2)?),
                                distance: Some(row.get::<_, f64>(3)? as f32),
                            })
                        })
                        .map_err(tokio_rusqlite::Error::Rusqlite)?;
                    for row in rows {
                        results.push(row.map_err(tokio_rusqlite::Error::Rusqlite)?);
                    }
                }
                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(results)
            })
            .await
            .map_err(index_err)
    }

    async fn get(&self, id: &str) -> Result<Option<IndexedRecord>> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT id, content, metadata, embedding FROM records WHERE id = ?",
                    [&id],
                    |row| {
                        Ok(IndexedRecord {
                            id: row.get(0)?,
                            content: row.get(1)?,
                            metadata: parse_metadata(row.get::<_, String>(2)?),
                            vector: blob_to_vector(&row.get::<_, Vec<u8>>(3)?),
                        })
                    },
                )
                .optional()
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await
            .map_err(index_err)
    }

    async fn update(
        &self,
        id: &str,
        content: &str,
        metadata: Map<String, Value>,
        vector: Vec<f32>,
    ) -> Result<()> {
        let id = id.to_string();
        let content = content.to_string();
        let dimension = vector.len();
        self.conn
            .call(move |conn| {
                let tx = conn
                    .transaction()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                if let Some(pinned) = pinned_dimension(&tx)? {
                    if pinned != dimension {
                        return Err(other(format!(
                            "replacement vector has dimension {dimension} but the store holds {pinned}"
                        )));
                    }
                }
                let affected = tx
                    .execute(
                        "UPDATE records SET content = ?, metadata = ?, embedding = ? WHERE id = ?",
                        (
                            &content,
                            Value::Object(metadata).to_string(),
                            vector_to_blob(&vector),
                            &id,
                        ),
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                if affected == 0 {
                    return Err(other(format!("no record with id '{id}' to update")));
                }
                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(())
            })
            .await
            .map_err(index_err)
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let ids = ids.to_vec();
        let removed = self
            .conn
            .call(move |conn| {
                let tx = conn
                    .transaction()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut removed = 0usize;
                for id in &ids {
                    // Deleting an absent id is a no-op success, which
                    // keeps retry-driven cleanup idempotent.
                    removed += tx
                        .execute("DELETE FROM records WHERE id = ?", [id])
                        .map_err(tokio_rusqlite::Error::Rusqlite)?;
                }
                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(removed)
            })
            .await
            .map_err(index_err)?;
        tracing::debug!(removed, "deleted from vector store");
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        self.conn
            .call(|conn| {
                let count: i64 = conn
                    .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(count as usize)
            })
            .await
            .map_err(index_err)
    }
}

/// Pins the store's dimensionality on first insert; later inserts must
/// match exactly (never truncated or padded).
fn check_dimension(
    tx: &Transaction<'_>,
    dimension: usize,
) -> std::result::Result<(), tokio_rusqlite::Error> {
    match pinned_dimension(tx)? {
        Some(pinned) => {
            if pinned != dimension {
                return Err(other(format!(
                    "batch vectors have dimension {dimension} but the store holds {pinned}"
                )));
            }
        }
        None => {
            tx.execute(
                "INSERT INTO store_meta (key, value) VALUES ('dimension', ?)",
                [dimension.to_string()],
            )
            .map_err(tokio_rusqlite::Error::Rusqlite)?;
        }
    }
    Ok(())
}

fn pinned_dimension(
    tx: &Transaction<'_>,
) -> std::result::Result<Option<usize>, tokio_rusqlite::Error> {
    let pinned: Option<String> = tx
        .query_row(
            "SELECT value FROM store_meta WHERE key = 'dimension'",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(tokio_rusqlite::Error::Rusqlite)?;
    Ok(pinned.and_then(|value| value.parse().ok()))
}

/// Builds a WHERE clause from the metadata filter, evaluated by SQLite
/// before the distance ordering and LIMIT.
fn filter_sql(
    filter: Option<&MetadataFilter>,
) -> (String, Vec<tokio_rusqlite::types::Value>) {
    let Some(filter) = filter.filter(|f| !f.is_empty()) else {
        return (String::new(), Vec::new());
    };
    let mut conditions = Vec::new();
    let mut params = Vec::new();
    for (key, op) in filter.clauses() {
        match op {
            FilterOp::Eq(value) => {
                conditions.push("json_extract(metadata, ?) = ?".to_string());
                params.push(json_path(key));
                params.push(bind_value(value));
            }
            FilterOp::OneOf(values) => {
                let placeholders = vec!["?"; values.len().max(1)].join(", ");
                conditions.push(format!("json_extract(metadata, ?) IN ({placeholders})"));
                params.push(json_path(key));
                if values.is_empty() {
                    // Empty membership set matches nothing.
                    params.push(tokio_rusqlite::types::Value::Null);
                } else {
                    params.extend(values.iter().map(bind_value));
                }
            }
        }
    }
    (format!(" WHERE {}", conditions.join(" AND ")), params)
}

fn json_path(key: &str) -> tokio_rusqlite::types::Value {
    tokio_rusqlite::types::Value::Text(format!("$.{key}"))
}

fn bind_value(value: &Value) -> tokio_rusqlite::types::Value {
    match value {
        Value::String(s) => tokio_rusqlite::types::Value::Text(s.clone()),
        Value::Number(n) if n.is_i64() => {
            tokio_rusqlite::types::Value::Integer(n.as_i64().unwrap_or(0))
        }
        Value::Number(n) => tokio_rusqlite::types::Value::Real(n.as_f64().unwrap_or(0.0)),
        Value::Bool(b) => tokio_rusqlite::types::Value::Integer(i64::from(*b)),
        other => tokio_rusqlite::types::Value::Text(other.to_string()),
    }
}

fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        .collect()
}

fn parse_metadata(raw: String) -> Map<String, Value> {
    match serde_json::from_str(&raw) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

fn other(message: String) -> tokio_rusqlite::Error {
    tokio_rusqlite::Error::Other(message.into())
}

fn index_err(err: tokio_rusqlite::Error) -> PipelineError {
    PipelineError::Index(err.to_string())
}
