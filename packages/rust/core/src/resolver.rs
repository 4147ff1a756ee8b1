//! Context resolution: exact lookup by job id, or similarity search over the
//! job description.

use std::sync::Arc;

use jobrelay_shared::{
    ContextSnippet, ContextStore, Embedder, JobRequest, Resolution, ResolvedContext,
    ResolverSettings, Result,
};
use tracing::{debug, instrument, warn};

pub struct ContextResolver {
    store: Arc<dyn ContextStore>,
    embedder: Arc<dyn Embedder>,
    settings: ResolverSettings,
}

impl ContextResolver {
    pub fn new(
        store: Arc<dyn ContextStore>,
        embedder: Arc<dyn Embedder>,
        settings: ResolverSettings,
    ) -> Self {
        Self {
            store,
            embedder,
            settings,
        }
    }

    /// Resolve context for `request`.
    ///
    /// A `job_id` always wins: the store is asked for that document only, and a
    /// miss yields an empty context without falling back to similarity search.
    /// Otherwise `job_description` is embedded and matched. With neither field
    /// the context is empty. Backend failures propagate; "no match" does not.
    #[instrument(skip_all, fields(job_id = request.job_id.as_deref()))]
    pub async fn resolve(&self, request: &JobRequest) -> Result<ResolvedContext> {
        if let Some(job_id) = &request.job_id {
            return self.resolve_exact(job_id).await;
        }

        match &request.job_description {
            Some(description) => self.resolve_similar(description).await,
            None => {
                debug!("no job_id or job_description, context is empty");
                Ok(ResolvedContext::empty(None))
            }
        }
    }

    async fn resolve_exact(&self, job_id: &str) -> Result<ResolvedContext> {
        let document = self
            .store
            .find_by_document_id(job_id, &self.settings.document_type)
            .await?;

        let Some(document) = document else {
            warn!(job_id, "no context stored for job id");
            return Ok(ResolvedContext::empty(Some(job_id.to_string())));
        };

        Ok(ResolvedContext {
            snippets: vec![ContextSnippet {
                text: document.context,
                similarity_score: 1.0,
                document_id: document.document_id.or(Some(document.id)),
            }],
            job_id: Some(job_id.to_string()),
            resolution: Resolution::Exact,
        })
    }

    async fn resolve_similar(&self, description: &str) -> Result<ResolvedContext> {
        let embedding = self.embedder.embed(description).await?;
        let top_k = self.settings.top_k;
        let matches = if self.settings.document_types.is_empty() {
            self.store
                .match_documents(&embedding, top_k, &self.settings.document_type)
                .await?
        } else {
            self.store
                .match_documents_in_types(&embedding, top_k, &self.settings.document_types)
                .await?
        };

        let found = matches.len();
        let mut snippets: Vec<ContextSnippet> = matches
            .into_iter()
            .filter(|m| m.similarity >= self.settings.min_similarity)
            .map(|m| ContextSnippet {
                text: m.context,
                similarity_score: m.similarity.clamp(0.0, 1.0),
                document_id: m.document_id.or(Some(m.id)),
            })
            .collect();
        snippets.sort_by(|a, b| b.similarity_score.total_cmp(&a.similarity_score));
        snippets.truncate(self.settings.top_k);

        debug!(found, kept = snippets.len(), "similarity search finished");

        let Some(best) = snippets.first() else {
            return Ok(ResolvedContext::empty(None));
        };
        let job_id = best.document_id.clone();
        Ok(ResolvedContext {
            snippets,
            job_id,
            resolution: Resolution::Similarity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeContextStore, FakeEmbedder};
    use std::sync::atomic::Ordering;

    fn settings(top_k: usize, min_similarity: f64) -> ResolverSettings {
        ResolverSettings {
            document_type: "job".into(),
            document_types: Vec::new(),
            top_k,
            min_similarity,
            max_context_chars: 12_000,
        }
    }

    fn request(job_id: Option<&str>, description: Option<&str>) -> JobRequest {
        JobRequest {
            request_id: None,
            job_id: job_id.map(String::from),
            job_description: description.map(String::from),
            query: "What skills are needed?".into(),
        }
    }

    #[tokio::test]
    async fn job_id_hit_is_exact() {
        let store = Arc::new(FakeContextStore::with_document("job-123", "Senior Rust role"));
        let embedder = Arc::new(FakeEmbedder::default());
        let resolver = ContextResolver::new(store.clone(), embedder.clone(), settings(1, 0.0));

        let ctx = resolver
            .resolve(&request(Some("job-123"), Some("ignored")))
            .await
            .unwrap();

        assert_eq!(ctx.resolution, Resolution::Exact);
        assert_eq!(ctx.snippets[0].text, "Senior Rust role");
        assert_eq!(ctx.job_id.as_deref(), Some("job-123"));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.searches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn job_id_miss_does_not_fall_back() {
        let store = Arc::new(FakeContextStore::with_matches(vec![("job-9", "other", 0.9)]));
        let embedder = Arc::new(FakeEmbedder::default());
        let resolver = ContextResolver::new(store.clone(), embedder.clone(), settings(1, 0.0));

        let ctx = resolver
            .resolve(&request(Some("job-123"), Some("a description")))
            .await
            .unwrap();

        assert!(ctx.is_empty());
        assert_eq!(ctx.resolution, Resolution::None);
        assert_eq!(ctx.job_id.as_deref(), Some("job-123"));
        assert_eq!(store.lookups.load(Ordering::SeqCst), 1);
        assert_eq!(store.searches.load(Ordering::SeqCst), 0);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn description_uses_best_match() {
        let store = Arc::new(FakeContextStore::with_matches(vec![
            ("job-2", "second", 0.4),
            ("job-1", "first", 0.8),
        ]));
        let resolver = ContextResolver::new(
            store,
            Arc::new(FakeEmbedder::default()),
            settings(2, 0.0),
        );

        let ctx = resolver
            .resolve(&request(None, Some("backend engineer")))
            .await
            .unwrap();

        assert_eq!(ctx.resolution, Resolution::Similarity);
        assert_eq!(ctx.snippets.len(), 2);
        assert_eq!(ctx.snippets[0].text, "first");
        assert_eq!(ctx.job_id.as_deref(), Some("job-1"));
        assert_eq!(ctx.top_similarity(), Some(0.8));
    }

    #[tokio::test]
    async fn listed_types_search_across_types() {
        let store = Arc::new(FakeContextStore::with_matches(vec![(
            "profile-7",
            "Name: Ada",
            0.9,
        )]));
        let resolver = ContextResolver::new(
            store.clone(),
            Arc::new(FakeEmbedder::default()),
            ResolverSettings {
                document_types: vec!["job".into(), "profile".into()],
                ..settings(2, 0.0)
            },
        );

        let ctx = resolver.resolve(&request(None, Some("x"))).await.unwrap();
        assert_eq!(ctx.snippets[0].text, "Name: Ada");
        assert_eq!(
            *store.searched_types.lock().unwrap(),
            vec![vec!["job".to_string(), "profile".to_string()]]
        );
    }

    #[tokio::test]
    async fn single_type_search_by_default() {
        let store = Arc::new(FakeContextStore::default());
        let resolver = ContextResolver::new(
            store.clone(),
            Arc::new(FakeEmbedder::default()),
            settings(1, 0.0),
        );

        resolver.resolve(&request(None, Some("x"))).await.unwrap();
        assert_eq!(
            *store.searched_types.lock().unwrap(),
            vec![vec!["job".to_string()]]
        );
    }

    #[tokio::test]
    async fn threshold_filters_weak_matches() {
        let store = Arc::new(FakeContextStore::with_matches(vec![("job-1", "weak", 0.2)]));
        let resolver = ContextResolver::new(
            store,
            Arc::new(FakeEmbedder::default()),
            settings(1, 0.5),
        );

        let ctx = resolver.resolve(&request(None, Some("x"))).await.unwrap();
        assert!(ctx.is_empty());
        assert_eq!(ctx.job_id, None);
    }

    #[tokio::test]
    async fn no_rows_is_empty_context() {
        let resolver = ContextResolver::new(
            Arc::new(FakeContextStore::default()),
            Arc::new(FakeEmbedder::default()),
            settings(1, 0.0),
        );
        let ctx = resolver.resolve(&request(None, Some("x"))).await.unwrap();
        assert!(ctx.is_empty());
    }

    #[tokio::test]
    async fn neither_field_skips_backends() {
        let store = Arc::new(FakeContextStore::default());
        let embedder = Arc::new(FakeEmbedder::default());
        let resolver = ContextResolver::new(store.clone(), embedder.clone(), settings(1, 0.0));

        let ctx = resolver.resolve(&request(None, None)).await.unwrap();
        assert!(ctx.is_empty());
        assert_eq!(store.lookups.load(Ordering::SeqCst), 0);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn store_failure_propagates() {
        let resolver = ContextResolver::new(
            Arc::new(FakeContextStore::failing()),
            Arc::new(FakeEmbedder::default()),
            settings(1, 0.0),
        );
        let err = resolver.resolve(&request(Some("job-1"), None)).await.unwrap_err();
        assert_eq!(err.kind(), "storage");
    }
}
