//! Supabase (PostgREST) adapter.
//!
//! Implements [`ContextStore`] and [`ResultStore`] over the REST API of a
//! hosted Postgres project. Nearest-neighbour search is delegated to the
//! `match_documents_by_document_type` and
//! `match_documents_by_document_types_array` RPCs backed by pgvector.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jobrelay_shared::{
    ContextDocument, ContextMatch, ContextStore, NewResponseRecord, RelayError, ResponseId,
    ResponseRecord, Result, ResultStore,
};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, info, instrument};
use url::Url;

/// Table holding similarity-indexed context documents.
pub const CONTEXT_TABLE: &str = "rag_content";

/// Table holding append-only response records.
pub const RESPONSE_TABLE: &str = "job_responses";

/// RPC performing the vector-similarity lookup within one document type.
pub const MATCH_RPC: &str = "match_documents_by_document_type";

/// RPC performing the vector-similarity lookup across a set of document types.
pub const MATCH_MANY_RPC: &str = "match_documents_by_document_types_array";

/// User-Agent string for REST requests.
const USER_AGENT: &str = concat!("jobrelay/", env!("CARGO_PKG_VERSION"));

/// Client for one Supabase project.
#[derive(Debug, Clone)]
pub struct SupabaseClient {
    http: Client,
    rest_base: String,
    key: String,
}

impl SupabaseClient {
    /// Build a client for the project at `url`, authenticating with `key`.
    pub fn new(url: &Url, key: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| RelayError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            rest_base: format!("{}/rest/v1", url.as_str().trim_end_matches('/')),
            key: key.into(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.rest_base)
    }

    /// Attach the auth headers PostgREST expects.
    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.key)
            .bearer_auth(&self.key)
    }

    /// Send a request and decode a JSON body, mapping failures onto the
    /// error taxonomy: unreachable store is `Transport`, a rejected request
    /// or undecodable body is `Storage`.
    async fn send_json<T: DeserializeOwned>(&self, what: &str, builder: RequestBuilder) -> Result<T> {
        let response = self.send(what, builder).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| RelayError::Storage(format!("{what}: invalid response body: {e}")))
    }

    async fn send(&self, what: &str, builder: RequestBuilder) -> Result<Response> {
        let response = self
            .authed(builder)
            .send()
            .await
            .map_err(|e| RelayError::Transport(format!("{what}: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(RelayError::Storage(format!(
            "{what}: HTTP {status}: {}",
            postgrest_message(&body)
        )))
    }

    /// Call a match RPC and normalize its rows.
    async fn rpc_matches<P: Serialize + Sync>(
        &self,
        rpc: &str,
        params: &P,
        match_count: usize,
    ) -> Result<Vec<ContextMatch>> {
        let builder = self
            .http
            .post(self.endpoint(&format!("rpc/{rpc}")))
            .json(params);

        let mut matches: Vec<ContextMatch> = self.send_json("similarity search", builder).await?;
        for m in &mut matches {
            m.similarity = m.similarity.clamp(0.0, 1.0);
        }
        matches.truncate(match_count);
        debug!(rpc, hits = matches.len(), "similarity search");
        Ok(matches)
    }
}

/// Pull the `message` out of a PostgREST error body, falling back to the raw text.
fn postgrest_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(String::from))
        .unwrap_or_else(|| body.chars().take(200).collect())
}

// ---------------------------------------------------------------------------
// Wire rows
// ---------------------------------------------------------------------------

/// `rag_content` row as PostgREST returns it. pgvector columns come back as
/// the text form `"[0.1,0.2]"`; arrays are accepted too.
#[derive(Debug, Deserialize)]
struct ContextRow {
    id: String,
    #[serde(deserialize_with = "vector_from_pg")]
    embedding: Vec<f32>,
    #[serde(default)]
    context: String,
    #[serde(default)]
    user_id: i64,
    document_type: String,
    #[serde(default)]
    document_id: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

impl From<ContextRow> for ContextDocument {
    fn from(row: ContextRow) -> Self {
        Self {
            id: row.id,
            embedding: row.embedding,
            context: row.context,
            user_id: row.user_id,
            document_type: row.document_type,
            document_id: row.document_id,
            username: row.username,
        }
    }
}

fn vector_from_pg<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<f32>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PgVector {
        Array(Vec<f32>),
        Text(String),
    }

    match PgVector::deserialize(deserializer)? {
        PgVector::Array(v) => Ok(v),
        PgVector::Text(s) => serde_json::from_str(&s).map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Serialize)]
struct MatchParams<'a> {
    query_embedding: &'a [f32],
    match_count: usize,
    query_document_type: &'a str,
}

#[derive(Debug, Serialize)]
struct MatchManyParams<'a> {
    query_embedding: &'a [f32],
    match_count: usize,
    query_document_types: &'a [String],
}

// ---------------------------------------------------------------------------
// ContextStore
// ---------------------------------------------------------------------------

#[async_trait]
impl ContextStore for SupabaseClient {
    #[instrument(skip(self))]
    async fn find_by_document_id(
        &self,
        document_id: &str,
        document_type: &str,
    ) -> Result<Option<ContextDocument>> {
        let builder = self.http.get(self.endpoint(CONTEXT_TABLE)).query(&[
            ("select", "*".to_string()),
            ("document_id", format!("eq.{document_id}")),
            ("document_type", format!("eq.{document_type}")),
            ("limit", "1".to_string()),
        ]);

        let rows: Vec<ContextRow> = self.send_json("context lookup", builder).await?;
        debug!(found = !rows.is_empty(), "exact context lookup");
        Ok(rows.into_iter().next().map(ContextDocument::from))
    }

    #[instrument(skip(self, query_embedding), fields(dims = query_embedding.len()))]
    async fn match_documents(
        &self,
        query_embedding: &[f32],
        match_count: usize,
        document_type: &str,
    ) -> Result<Vec<ContextMatch>> {
        let params = MatchParams {
            query_embedding,
            match_count,
            query_document_type: document_type,
        };
        self.rpc_matches(MATCH_RPC, &params, match_count).await
    }

    #[instrument(skip(self, query_embedding), fields(dims = query_embedding.len()))]
    async fn match_documents_in_types(
        &self,
        query_embedding: &[f32],
        match_count: usize,
        document_types: &[String],
    ) -> Result<Vec<ContextMatch>> {
        if document_types.is_empty() {
            return Ok(Vec::new());
        }
        let params = MatchManyParams {
            query_embedding,
            match_count,
            query_document_types: document_types,
        };
        self.rpc_matches(MATCH_MANY_RPC, &params, match_count).await
    }

    async fn upsert_document(&self, document: &ContextDocument) -> Result<()> {
        let builder = self
            .http
            .post(self.endpoint(CONTEXT_TABLE))
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(document);

        self.send("context upsert", builder).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ResultStore
// ---------------------------------------------------------------------------

#[async_trait]
impl ResultStore for SupabaseClient {
    #[instrument(skip_all, fields(job_id = ?record.job_id))]
    async fn append(&self, record: NewResponseRecord) -> Result<ResponseRecord> {
        let record = ResponseRecord::mint(record);
        let builder = self
            .http
            .post(self.endpoint(RESPONSE_TABLE))
            .header("Prefer", "return=representation")
            .json(&record);

        let rows: Vec<ResponseRecord> = self.send_json("response insert", builder).await?;
        let stored = rows
            .into_iter()
            .next()
            .ok_or_else(|| RelayError::Storage("failed to store response: no row returned".into()))?;

        info!(response_id = %stored.id, "response stored");
        Ok(stored)
    }

    async fn get(&self, id: &ResponseId) -> Result<Option<ResponseRecord>> {
        let builder = self.http.get(self.endpoint(RESPONSE_TABLE)).query(&[
            ("select", "*".to_string()),
            ("id", format!("eq.{id}")),
        ]);

        let rows: Vec<ResponseRecord> = self.send_json("response lookup", builder).await?;
        Ok(rows.into_iter().next())
    }

    async fn amend_metadata(
        &self,
        id: &ResponseId,
        metadata: Map<String, Value>,
    ) -> Result<Option<ResponseRecord>> {
        let builder = self
            .http
            .patch(self.endpoint(RESPONSE_TABLE))
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=representation")
            .json(&json!({
                "metadata": metadata,
                "updated_at": Utc::now(),
            }));

        let rows: Vec<ResponseRecord> = self.send_json("metadata amend", builder).await?;
        Ok(rows.into_iter().next())
    }
}
