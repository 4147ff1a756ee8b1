//! Core domain types for the job relay pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ResponseId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for stored response identifiers.
///
/// Each appender mints its own id, so concurrent appends never coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponseId(pub Uuid);

impl ResponseId {
    /// Generate a new response identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ResponseId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ResponseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ResponseId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// JobRequest
// ---------------------------------------------------------------------------

/// A validated inbound job request. Consumed once by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_description: Option<String>,
    pub query: String,
}

/// An inbound message that failed validation.
///
/// Keeps whatever `request_id` could be recovered so the error envelope can
/// still be correlated by the sender.
#[derive(Debug)]
pub struct RejectedRequest {
    pub request_id: Option<String>,
    pub error: crate::RelayError,
}

impl JobRequest {
    /// Validate a raw channel message into a [`JobRequest`].
    ///
    /// `request_id` may be a JSON string or number. Blank optional fields are
    /// treated as absent. `query` is required and must not be blank.
    pub fn from_message(message: &Value) -> std::result::Result<Self, RejectedRequest> {
        let Some(obj) = message.as_object() else {
            return Err(RejectedRequest {
                request_id: None,
                error: crate::RelayError::validation("message must be a JSON object"),
            });
        };

        let request_id = id_field(obj, "request_id");
        let query = match obj.get("query") {
            Some(Value::String(q)) if !q.trim().is_empty() => q.clone(),
            Some(Value::String(_)) => {
                return Err(RejectedRequest {
                    request_id,
                    error: crate::RelayError::validation("`query` must not be empty"),
                });
            }
            Some(_) => {
                return Err(RejectedRequest {
                    request_id,
                    error: crate::RelayError::validation("`query` must be a string"),
                });
            }
            None => {
                return Err(RejectedRequest {
                    request_id,
                    error: crate::RelayError::validation("missing required field `query`"),
                });
            }
        };

        Ok(Self {
            request_id,
            job_id: id_field(obj, "job_id"),
            job_description: text_field(obj, "job_description"),
            query,
        })
    }
}

/// Read an identifier-like field that may be a string or a number.
fn id_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn text_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// One snippet of context text with its similarity to the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnippet {
    pub text: String,
    /// Similarity in `[0, 1]`; exact lookups score `1.0`.
    pub similarity_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
}

/// How a [`ResolvedContext`] was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Exact,
    Similarity,
    None,
}

/// Context for one request, ordered by descending similarity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedContext {
    pub snippets: Vec<ContextSnippet>,
    /// Job id the context belongs to (the request's id, or the best match's).
    pub job_id: Option<String>,
    pub resolution: Resolution,
}

impl ResolvedContext {
    /// An empty context, optionally still carrying the requested job id.
    pub fn empty(job_id: Option<String>) -> Self {
        Self {
            snippets: Vec::new(),
            job_id,
            resolution: Resolution::None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.snippets.is_empty()
    }

    /// Similarity of the best snippet, if any.
    pub fn top_similarity(&self) -> Option<f64> {
        self.snippets.first().map(|s| s.similarity_score)
    }
}

/// A row of the similarity-indexed context store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextDocument {
    pub id: String,
    pub embedding: Vec<f32>,
    pub context: String,
    pub user_id: i64,
    pub document_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// A similarity-search hit returned by a context store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextMatch {
    pub id: String,
    pub context: String,
    #[serde(default)]
    pub document_id: Option<String>,
    /// Derived as `1 - cosine distance`, clamped to `[0, 1]`.
    pub similarity: f64,
}

// ---------------------------------------------------------------------------
// Response records
// ---------------------------------------------------------------------------

/// The fields a caller supplies when appending a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewResponseRecord {
    pub job_id: Option<String>,
    pub user_query: String,
    pub ai_response: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// A stored, immutable response record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub id: ResponseId,
    pub job_id: Option<String>,
    pub user_query: String,
    pub ai_response: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResponseRecord {
    /// Mint a fresh record from its caller-supplied fields.
    pub fn mint(record: NewResponseRecord) -> Self {
        let now = Utc::now();
        Self {
            id: ResponseId::new(),
            job_id: record.job_id,
            user_query: record.user_query,
            ai_response: record.ai_response,
            metadata: record.metadata,
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// ResponseEnvelope
// ---------------------------------------------------------------------------

/// Outbound message published once per inbound request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResponseEnvelope {
    Success {
        response_id: ResponseId,
        job_id: Option<String>,
        request_id: Option<String>,
        response: String,
        timestamp: DateTime<Utc>,
    },
    Error {
        error: String,
        request_id: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl ResponseEnvelope {
    /// Success envelope referencing a stored record.
    pub fn success(record: &ResponseRecord, request_id: Option<String>) -> Self {
        Self::Success {
            response_id: record.id,
            job_id: record.job_id.clone(),
            request_id,
            response: record.ai_response.clone(),
            timestamp: record.created_at,
        }
    }

    /// Error envelope carrying a human-readable message.
    pub fn error(error: impl Into<String>, request_id: Option<String>) -> Self {
        Self::Error {
            error: error.into(),
            request_id,
            timestamp: Utc::now(),
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::Success { request_id, .. } | Self::Error { request_id, .. } => {
                request_id.as_deref()
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Error { .. } => "error",
        }
    }
}
