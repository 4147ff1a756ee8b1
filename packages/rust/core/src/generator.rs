//! Prompt assembly and response generation.

use std::sync::Arc;

use jobrelay_shared::{ChatMessage, ChatModel, ResolvedContext, Result};
use tracing::instrument;

/// Marker appended to context text cut at the size limit.
const TRUNCATION_MARKER: &str = "\n\n[... context truncated ...]";

/// Separator between multiple context snippets.
const SNIPPET_SEPARATOR: &str = "\n\n---\n\n";

pub struct ResponseGenerator {
    model: Arc<dyn ChatModel>,
    max_context_chars: usize,
}

impl ResponseGenerator {
    pub fn new(model: Arc<dyn ChatModel>, max_context_chars: usize) -> Self {
        Self {
            model,
            max_context_chars,
        }
    }

    /// Answer `query` grounded in `context`. An empty context still produces
    /// an answer; the prompt just says no job context was found.
    #[instrument(skip_all, fields(snippets = context.snippets.len()))]
    pub async fn generate(&self, query: &str, context: &ResolvedContext) -> Result<String> {
        let messages = build_prompt(query, context, self.max_context_chars);
        self.model.complete(&messages).await
    }
}

/// System + user messages for one request.
pub fn build_prompt(query: &str, context: &ResolvedContext, max_context_chars: usize) -> Vec<ChatMessage> {
    let system = if context.is_empty() {
        "You are an expert job matching assistant. No job context was found for this \
         request. Answer the question as helpfully as you can, and say so if the answer \
         depends on details of a specific job."
            .to_string()
    } else {
        let joined = context
            .snippets
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(SNIPPET_SEPARATOR);
        format!(
            "You are an expert job matching assistant. Use the following job context to \
             answer questions:\n\n{}\n\nProvide helpful, accurate information about the job \
             based on the context provided.",
            truncate_content(&joined, max_context_chars)
        )
    };

    vec![ChatMessage::system(system), ChatMessage::user(query)]
}

/// Cut `content` to at most `max_chars` characters, marking the cut.
pub fn truncate_content(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        None => content.to_string(),
        Some((byte_idx, _)) => format!("{}{TRUNCATION_MARKER}", &content[..byte_idx]),
    }
}
