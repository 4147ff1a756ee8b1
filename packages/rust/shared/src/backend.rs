//! Backend seams: the external systems the pipeline talks to.
//!
//! Each trait is implemented by one adapter crate (Supabase, libSQL, OpenAI,
//! PubNub) and by in-memory fakes in tests.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::types::{
    ContextDocument, ContextMatch, NewResponseRecord, ResponseId, ResponseRecord,
};

/// Similarity-indexed store of context documents.
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Exact lookup by `document_id` within a document type.
    async fn find_by_document_id(
        &self,
        document_id: &str,
        document_type: &str,
    ) -> Result<Option<ContextDocument>>;

    /// Up to `match_count` documents ordered by ascending vector distance.
    async fn match_documents(
        &self,
        query_embedding: &[f32],
        match_count: usize,
        document_type: &str,
    ) -> Result<Vec<ContextMatch>>;

    /// Like [`match_documents`](Self::match_documents), but across every
    /// type in `document_types`. An empty list matches nothing.
    async fn match_documents_in_types(
        &self,
        query_embedding: &[f32],
        match_count: usize,
        document_types: &[String],
    ) -> Result<Vec<ContextMatch>>;

    /// Insert or replace a document by `id`.
    async fn upsert_document(&self, document: &ContextDocument) -> Result<()>;
}

/// Append-only store of response records.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Create exactly one new row and return it with its generated id.
    async fn append(&self, record: NewResponseRecord) -> Result<ResponseRecord>;

    async fn get(&self, id: &ResponseId) -> Result<Option<ResponseRecord>>;

    /// Replace a record's metadata and bump `updated_at`. The only mutation
    /// a stored record ever sees.
    async fn amend_metadata(
        &self,
        id: &ResponseId,
        metadata: Map<String, Value>,
    ) -> Result<Option<ResponseRecord>>;
}

/// Text embedding model.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One message of a chat-completion prompt.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Hosted chat-completion model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// Outbound side of the message channel.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, channel: &str, message: &Value) -> Result<()>;
}

/// Inbound side of the message channel.
#[async_trait]
pub trait Subscriber: Send {
    /// Wait for the next inbound message. `Ok(None)` means the channel closed.
    async fn next_message(&mut self) -> Result<Option<Value>>;
}
