//! libSQL storage layer (offline mode).
//!
//! [`LocalStore`] keeps context documents and response records in a single
//! embedded database file. It implements both [`ContextStore`] and
//! [`ResultStore`], so the pipeline can run without a hosted Postgres.
//!
//! Similarity search is a brute-force cosine scan over the documents of the
//! requested types, returning the same `1 - distance` score the pgvector RPC does.

mod migrations;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobrelay_shared::{
    ContextDocument, ContextMatch, ContextStore, NewResponseRecord, RelayError, ResponseId,
    ResponseRecord, Result, ResultStore,
};
use libsql::{Connection, Database, params};
use serde_json::{Map, Value};

/// Primary storage handle wrapping a libSQL database.
pub struct LocalStore {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

fn db_err(e: libsql::Error) -> RelayError {
    RelayError::Storage(e.to_string())
}

impl LocalStore {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RelayError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;
        let conn = db.connect().map_err(db_err)?;

        let store = Self { db, conn };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        RelayError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Cosine scan over every document whose type is in `document_types`.
    async fn scan_documents(
        &self,
        query_embedding: &[f32],
        match_count: usize,
        document_types: &[&str],
    ) -> Result<Vec<ContextMatch>> {
        if query_embedding.is_empty() {
            return Err(RelayError::validation("query embedding is empty"));
        }
        if document_types.is_empty() {
            return Ok(Vec::new());
        }

        // The type list travels as one JSON array parameter, expanded by
        // json_each into the IN set.
        let types = serde_json::to_string(document_types)
            .map_err(|e| RelayError::Storage(format!("failed to encode document types: {e}")))?;
        let mut rows = self
            .conn
            .query(
                "SELECT id, embedding, context, document_id
                 FROM rag_content
                 WHERE document_type IN (SELECT value FROM json_each(?1))",
                params![types.as_str()],
            )
            .await
            .map_err(db_err)?;

        let mut matches = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let id: String = row.get(0).map_err(db_err)?;
            let embedding = decode_embedding(&row.get::<String>(1).map_err(db_err)?)?;
            let Some(cosine) = cosine_similarity(query_embedding, &embedding) else {
                tracing::warn!(%id, "skipping document with incompatible embedding");
                continue;
            };
            matches.push(ContextMatch {
                id,
                context: row.get(2).map_err(db_err)?,
                document_id: row.get::<String>(3).ok(),
                similarity: cosine.clamp(0.0, 1.0),
            });
        }

        matches.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.id.cmp(&b.id))
        });
        matches.truncate(match_count);
        tracing::debug!(?document_types, hits = matches.len(), "local similarity search");
        Ok(matches)
    }
}

// ---------------------------------------------------------------------------
// Context documents
// ---------------------------------------------------------------------------

#[async_trait]
impl ContextStore for LocalStore {
    async fn find_by_document_id(
        &self,
        document_id: &str,
        document_type: &str,
    ) -> Result<Option<ContextDocument>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, embedding, context, user_id, document_type, document_id, username
                 FROM rag_content WHERE document_id = ?1 AND document_type = ?2
                 ORDER BY id LIMIT 1",
                params![document_id, document_type],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_document(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn match_documents(
        &self,
        query_embedding: &[f32],
        match_count: usize,
        document_type: &str,
    ) -> Result<Vec<ContextMatch>> {
        self.scan_documents(query_embedding, match_count, &[document_type])
            .await
    }

    async fn match_documents_in_types(
        &self,
        query_embedding: &[f32],
        match_count: usize,
        document_types: &[String],
    ) -> Result<Vec<ContextMatch>> {
        let types: Vec<&str> = document_types.iter().map(String::as_str).collect();
        self.scan_documents(query_embedding, match_count, &types)
            .await
    }

    async fn upsert_document(&self, document: &ContextDocument) -> Result<()> {
        if document.embedding.is_empty() {
            return Err(RelayError::validation(format!(
                "document {} has an empty embedding",
                document.id
            )));
        }
        let embedding = serde_json::to_string(&document.embedding)
            .map_err(|e| RelayError::Storage(format!("failed to encode embedding: {e}")))?;

        self.conn
            .execute(
                "INSERT INTO rag_content (id, embedding, context, user_id, document_type, document_id, username)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                   embedding = excluded.embedding,
                   context = excluded.context,
                   user_id = excluded.user_id,
                   document_type = excluded.document_type,
                   document_id = excluded.document_id,
                   username = excluded.username",
                params![
                    document.id.as_str(),
                    embedding.as_str(),
                    document.context.as_str(),
                    document.user_id,
                    document.document_type.as_str(),
                    document.document_id.as_deref(),
                    document.username.as_deref(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Response records
// ---------------------------------------------------------------------------

#[async_trait]
impl ResultStore for LocalStore {
    async fn append(&self, record: NewResponseRecord) -> Result<ResponseRecord> {
        let record = ResponseRecord::mint(record);
        let metadata = encode_metadata(&record.metadata)?;
        let created_at = record.created_at.to_rfc3339();

        self.conn
            .execute(
                "INSERT INTO job_responses (id, job_id, user_query, ai_response, metadata, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.id.to_string(),
                    record.job_id.as_deref(),
                    record.user_query.as_str(),
                    record.ai_response.as_str(),
                    metadata.as_str(),
                    created_at.as_str(),
                    created_at.as_str(),
                ],
            )
            .await
            .map_err(db_err)?;

        tracing::info!(response_id = %record.id, "response stored");
        Ok(record)
    }

    async fn get(&self, id: &ResponseId) -> Result<Option<ResponseRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, job_id, user_query, ai_response, metadata, created_at, updated_at
                 FROM job_responses WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_record(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn amend_metadata(
        &self,
        id: &ResponseId,
        metadata: Map<String, Value>,
    ) -> Result<Option<ResponseRecord>> {
        let encoded = encode_metadata(&metadata)?;
        let now = Utc::now().to_rfc3339();
        let changed = self
            .conn
            .execute(
                "UPDATE job_responses SET metadata = ?1, updated_at = ?2 WHERE id = ?3",
                params![encoded.as_str(), now.as_str(), id.to_string()],
            )
            .await
            .map_err(db_err)?;

        if changed == 0 {
            return Ok(None);
        }
        self.get(id).await
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

/// Cosine similarity of two equal-length, non-zero vectors.
fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f64::EPSILON {
        return None;
    }
    Some(dot / denom)
}

fn decode_embedding(raw: &str) -> Result<Vec<f32>> {
    serde_json::from_str(raw)
        .map_err(|e| RelayError::Storage(format!("invalid stored embedding: {e}")))
}

fn encode_metadata(metadata: &Map<String, Value>) -> Result<String> {
    serde_json::to_string(metadata)
        .map_err(|e| RelayError::Storage(format!("failed to encode metadata: {e}")))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RelayError::Storage(format!("invalid date: {e}")))
}

/// Convert a `rag_content` row to a [`ContextDocument`].
fn row_to_document(row: &libsql::Row) -> Result<ContextDocument> {
    Ok(ContextDocument {
        id: row.get::<String>(0).map_err(db_err)?,
        embedding: decode_embedding(&row.get::<String>(1).map_err(db_err)?)?,
        context: row.get::<String>(2).map_err(db_err)?,
        user_id: row.get::<i64>(3).map_err(db_err)?,
        document_type: row.get::<String>(4).map_err(db_err)?,
        document_id: row.get::<String>(5).ok(),
        username: row.get::<String>(6).ok(),
    })
}

/// Convert a `job_responses` row to a [`ResponseRecord`].
fn row_to_record(row: &libsql::Row) -> Result<ResponseRecord> {
    let id: String = row.get(0).map_err(db_err)?;
    let metadata: String = row.get(4).map_err(db_err)?;
    Ok(ResponseRecord {
        id: id
            .parse()
            .map_err(|e| RelayError::Storage(format!("invalid response id '{id}': {e}")))?,
        job_id: row.get::<String>(1).ok(),
        user_query: row.get::<String>(2).map_err(db_err)?,
        ai_response: row.get::<String>(3).map_err(db_err)?,
        metadata: serde_json::from_str(&metadata)
            .map_err(|e| RelayError::Storage(format!("invalid metadata: {e}")))?,
        created_at: parse_timestamp(&row.get::<String>(5).map_err(db_err)?)?,
        updated_at: parse_timestamp(&row.get::<String>(6).map_err(db_err)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    /// Create a temp file store for testing.
    async fn test_store() -> LocalStore {
        let tmp = std::env::temp_dir().join(format!("jobrelay_test_{}.db", Uuid::now_v7()));
        LocalStore::open(&tmp).await.expect("open test db")
    }

    fn doc(id: &str, document_id: Option<&str>, embedding: Vec<f32>) -> ContextDocument {
        ContextDocument {
            id: id.into(),
            embedding,
            context: format!("context of {id}"),
            user_id: 1,
            document_type: "job".into(),
            document_id: document_id.map(String::from),
            username: None,
        }
    }

    fn new_record(job_id: &str) -> NewResponseRecord {
        NewResponseRecord {
            job_id: Some(job_id.into()),
            user_query: "What are the responsibilities?".into(),
            ai_response: "Shipping features.".into(),
            metadata: Map::new(),
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let store = test_store().await;
        assert_eq!(store.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("jobrelay_test_{}.db", Uuid::now_v7()));
        let s1 = LocalStore::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = LocalStore::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn response_roundtrip() {
        let store = test_store().await;
        let mut metadata = Map::new();
        metadata.insert("request_id".into(), json!("req-1"));
        let stored = store
            .append(NewResponseRecord {
                metadata,
                ..new_record("job-123")
            })
            .await
            .expect("append");

        let found = store.get(&stored.id).await.expect("get").expect("present");
        assert_eq!(found.job_id.as_deref(), Some("job-123"));
        assert_eq!(found.user_query, "What are the responsibilities?");
        assert_eq!(found.ai_response, "Shipping features.");
        assert_eq!(found.metadata["request_id"], "req-1");
        assert_eq!(found.created_at, found.updated_at);
        assert!(found.created_at <= Utc::now());
    }

    #[tokio::test]
    async fn appends_never_overwrite() {
        let store = test_store().await;
        let a = store.append(new_record("job-1")).await.unwrap();
        let b = store.append(new_record("job-1")).await.unwrap();
        assert_ne!(a.id, b.id);
        assert!(store.get(&a.id).await.unwrap().is_some());
        assert!(store.get(&b.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn missing_response_is_none() {
        let store = test_store().await;
        assert!(store.get(&ResponseId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn amend_metadata_bumps_updated_at_only() {
        let store = test_store().await;
        let stored = store.append(new_record("job-1")).await.unwrap();

        let mut metadata = Map::new();
        metadata.insert("reviewed".into(), json!(true));
        let amended = store
            .amend_metadata(&stored.id, metadata)
            .await
            .unwrap()
            .expect("record exists");

        assert_eq!(amended.metadata["reviewed"], true);
        assert_eq!(amended.ai_response, stored.ai_response);
        assert_eq!(amended.created_at, stored.created_at);
        assert!(amended.updated_at >= stored.updated_at);

        let absent = store
            .amend_metadata(&ResponseId::new(), Map::new())
            .await
            .unwrap();
        assert!(absent.is_none());
    }

    #[tokio::test]
    async fn exact_lookup_by_document_id() {
        let store = test_store().await;
        store
            .upsert_document(&doc("job_1", Some("job_1"), vec![1.0, 0.0]))
            .await
            .unwrap();

        let found = store.find_by_document_id("job_1", "job").await.unwrap();
        assert_eq!(found.expect("found").context, "context of job_1");

        let wrong_type = store.find_by_document_id("job_1", "profile").await.unwrap();
        assert!(wrong_type.is_none());
    }

    #[tokio::test]
    async fn upsert_replaces_by_id() {
        let store = test_store().await;
        store
            .upsert_document(&doc("job_1", Some("job_1"), vec![1.0, 0.0]))
            .await
            .unwrap();
        let mut updated = doc("job_1", Some("job_1"), vec![0.0, 1.0]);
        updated.context = "new context".into();
        store.upsert_document(&updated).await.unwrap();

        let found = store.find_by_document_id("job_1", "job").await.unwrap().unwrap();
        assert_eq!(found.context, "new context");
        assert_eq!(found.embedding, vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn similarity_ranks_by_cosine() {
        let store = test_store().await;
        store
            .upsert_document(&doc("near", Some("job_near"), vec![1.0, 0.1]))
            .await
            .unwrap();
        store
            .upsert_document(&doc("far", Some("job_far"), vec![0.0, 1.0]))
            .await
            .unwrap();
        store
            .upsert_document(&doc("opposite", None, vec![-1.0, 0.0]))
            .await
            .unwrap();

        let hits = store.match_documents(&[1.0, 0.0], 3, "job").await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].id, "near");
        assert_eq!(hits[0].document_id.as_deref(), Some("job_near"));
        assert!(hits[0].similarity > hits[1].similarity);
        // Negative cosine clamps to zero.
        assert_eq!(hits[2].similarity, 0.0);

        let top = store.match_documents(&[1.0, 0.0], 1, "job").await.unwrap();
        assert_eq!(top.len(), 1);
    }

    #[tokio::test]
    async fn similarity_skips_mismatched_dimensions() {
        let store = test_store().await;
        store
            .upsert_document(&doc("short", None, vec![1.0]))
            .await
            .unwrap();
        let hits = store.match_documents(&[1.0, 0.0], 5, "job").await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn empty_embedding_rejected() {
        let store = test_store().await;
        let result = store.upsert_document(&doc("x", None, vec![])).await;
        assert!(matches!(result, Err(RelayError::Validation { .. })));
    }

    #[tokio::test]
    async fn multi_type_search_spans_listed_types() {
        let store = test_store().await;
        store
            .upsert_document(&doc("job_a", Some("job_a"), vec![1.0, 0.2]))
            .await
            .unwrap();
        let mut profile = doc("profile_a", Some("profile_a"), vec![1.0, 0.0]);
        profile.document_type = "profile".into();
        store.upsert_document(&profile).await.unwrap();
        let mut note = doc("note_a", None, vec![1.0, 0.0]);
        note.document_type = "note".into();
        store.upsert_document(&note).await.unwrap();

        let types = vec!["job".to_string(), "profile".to_string()];
        let hits = store
            .match_documents_in_types(&[1.0, 0.0], 5, &types)
            .await
            .unwrap();
        let ids: Vec<_> = hits.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["profile_a", "job_a"]);

        let single = store.match_documents(&[1.0, 0.0], 5, "job").await.unwrap();
        assert_eq!(single.len(), 1);

        let none = store
            .match_documents_in_types(&[1.0, 0.0], 5, &[])
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let s = cosine_similarity(&[0.3, 0.4], &[0.3, 0.4]).unwrap();
        assert!((s - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).is_none());
    }
}
