//! In-memory backends for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use jobrelay_shared::{
    ChatMessage, ChatModel, ContextDocument, ContextMatch, ContextStore, Embedder,
    NewResponseRecord, Publisher, RelayError, ResponseId, ResponseRecord, Result, ResultStore,
    Subscriber,
};
use serde_json::{Map, Value};

#[derive(Default)]
pub struct FakeContextStore {
    pub documents: Mutex<Vec<ContextDocument>>,
    pub matches: Mutex<Vec<ContextMatch>>,
    pub fail: bool,
    pub lookups: AtomicUsize,
    pub searches: AtomicUsize,
    /// Document types each similarity search was scoped to.
    pub searched_types: Mutex<Vec<Vec<String>>>,
}

impl FakeContextStore {
    pub fn with_document(id: &str, context: &str) -> Self {
        let store = Self::default();
        store.documents.lock().unwrap().push(ContextDocument {
            id: id.into(),
            embedding: vec![1.0, 0.0],
            context: context.into(),
            user_id: 1,
            document_type: "job".into(),
            document_id: Some(id.into()),
            username: None,
        });
        store
    }

    pub fn with_matches(matches: Vec<(&str, &str, f64)>) -> Self {
        let store = Self::default();
        *store.matches.lock().unwrap() = matches
            .into_iter()
            .map(|(id, context, similarity)| ContextMatch {
                id: id.into(),
                context: context.into(),
                document_id: Some(id.into()),
                similarity,
            })
            .collect();
        store
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl ContextStore for FakeContextStore {
    async fn find_by_document_id(
        &self,
        document_id: &str,
        document_type: &str,
    ) -> Result<Option<ContextDocument>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(RelayError::Storage("store offline".into()));
        }
        Ok(self
            .documents
            .lock()
            .unwrap()
            .iter()
            .find(|d| {
                d.document_id.as_deref() == Some(document_id) && d.document_type == document_type
            })
            .cloned())
    }

    async fn match_documents(
        &self,
        embedding: &[f32],
        match_count: usize,
        document_type: &str,
    ) -> Result<Vec<ContextMatch>> {
        self.match_documents_in_types(embedding, match_count, &[document_type.to_string()])
            .await
    }

    async fn match_documents_in_types(
        &self,
        _embedding: &[f32],
        match_count: usize,
        document_types: &[String],
    ) -> Result<Vec<ContextMatch>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.searched_types
            .lock()
            .unwrap()
            .push(document_types.to_vec());
        if self.fail {
            return Err(RelayError::Storage("store offline".into()));
        }
        let mut matches = self.matches.lock().unwrap().clone();
        matches.truncate(match_count);
        Ok(matches)
    }

    async fn upsert_document(&self, document: &ContextDocument) -> Result<()> {
        if self.fail {
            return Err(RelayError::Storage("store offline".into()));
        }
        let mut docs = self.documents.lock().unwrap();
        docs.retain(|d| d.id != document.id);
        docs.push(document.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeEmbedder {
    pub calls: AtomicUsize,
    pub fail_on: Option<&'static str>,
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on.is_some_and(|needle| text.contains(needle)) {
            return Err(RelayError::Upstream("embeddings: HTTP 500".into()));
        }
        Ok(vec![1.0, 0.0])
    }
}

pub struct FakeChatModel {
    pub reply: Option<String>,
    pub prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl FakeChatModel {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ChatModel for FakeChatModel {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        self.prompts.lock().unwrap().push(messages.to_vec());
        self.reply.clone().ok_or_else(|| {
            RelayError::Upstream("chat/completions: rate limited or quota exceeded (HTTP 429)".into())
        })
    }
}

#[derive(Default)]
pub struct MemoryResultStore {
    pub records: Mutex<Vec<ResponseRecord>>,
    pub fail: bool,
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn append(&self, record: NewResponseRecord) -> Result<ResponseRecord> {
        if self.fail {
            return Err(RelayError::Storage("insert rejected".into()));
        }
        let stored = ResponseRecord::mint(record);
        self.records.lock().unwrap().push(stored.clone());
        Ok(stored)
    }

    async fn get(&self, id: &ResponseId) -> Result<Option<ResponseRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| &r.id == id)
            .cloned())
    }

    async fn amend_metadata(
        &self,
        id: &ResponseId,
        metadata: Map<String, Value>,
    ) -> Result<Option<ResponseRecord>> {
        let mut records = self.records.lock().unwrap();
        Ok(records.iter_mut().find(|r| &r.id == id).map(|r| {
            r.metadata = metadata.clone();
            r.updated_at = chrono::Utc::now();
            r.clone()
        }))
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    pub sent: Mutex<Vec<(String, Value)>>,
    pub fail: bool,
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, channel: &str, message: &Value) -> Result<()> {
        if self.fail {
            return Err(RelayError::Transport("publish: connection reset".into()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((channel.to_string(), message.clone()));
        Ok(())
    }
}

/// Replays a fixed script of subscribe results, then reports the channel closed.
pub struct ScriptedSubscriber {
    pub script: VecDeque<Result<Value>>,
}

impl ScriptedSubscriber {
    pub fn new(script: Vec<Result<Value>>) -> Self {
        Self {
            script: script.into(),
        }
    }
}

#[async_trait]
impl Subscriber for ScriptedSubscriber {
    async fn next_message(&mut self) -> Result<Option<Value>> {
        match self.script.pop_front() {
            Some(Ok(v)) => Ok(Some(v)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}
