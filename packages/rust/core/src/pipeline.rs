//! Per-request pipeline: validate → resolve context → generate → persist → relay.
//!
//! [`Pipeline::process`] never fails. Every inbound message yields exactly one
//! [`ResponseEnvelope`], success or error, carrying the request's
//! `request_id` when one could be read.

use std::sync::Arc;
use std::time::Instant;

use jobrelay_shared::{
    JobRequest, NewResponseRecord, RelayError, Resolution, ResolvedContext, ResponseEnvelope,
    ResponseRecord, ResultStore,
};
use serde_json::{Map, Value, json};
use tracing::{error, info, instrument, warn};

use crate::generator::ResponseGenerator;
use crate::lifecycle::{Lifecycle, RequestState, Stage};
use crate::relay::Relay;
use crate::resolver::ContextResolver;

/// What happened to one inbound message.
#[derive(Debug, Clone)]
pub struct Processed {
    pub envelope: ResponseEnvelope,
    pub lifecycle: Lifecycle,
    /// Set by [`Pipeline::handle`] once the envelope reached the channel.
    pub published: bool,
}

impl Processed {
    pub fn state(&self) -> RequestState {
        self.lifecycle.state()
    }
}

pub struct Pipeline {
    resolver: ContextResolver,
    generator: ResponseGenerator,
    results: Arc<dyn ResultStore>,
}

impl Pipeline {
    pub fn new(
        resolver: ContextResolver,
        generator: ResponseGenerator,
        results: Arc<dyn ResultStore>,
    ) -> Self {
        Self {
            resolver,
            generator,
            results,
        }
    }

    /// Run one message through every stage up to persistence.
    #[instrument(skip_all)]
    pub async fn process(&self, message: &Value) -> Processed {
        let start = Instant::now();
        let mut lifecycle = Lifecycle::new();

        let request = match JobRequest::from_message(message) {
            Ok(request) => request,
            Err(rejected) => {
                warn!(
                    request_id = rejected.request_id.as_deref(),
                    error = %rejected.error,
                    "rejected malformed request"
                );
                mark_failed(&mut lifecycle, Stage::Validation);
                return Processed {
                    envelope: ResponseEnvelope::error(
                        rejected.error.to_string(),
                        rejected.request_id,
                    ),
                    lifecycle,
                    published: false,
                };
            }
        };

        let envelope = match self.run(&request, &mut lifecycle).await {
            Ok(record) => {
                info!(
                    request_id = request.request_id.as_deref(),
                    response_id = %record.id,
                    job_id = record.job_id.as_deref(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "request processed"
                );
                ResponseEnvelope::success(&record, request.request_id.clone())
            }
            Err((stage, e)) => {
                error!(
                    request_id = request.request_id.as_deref(),
                    %stage,
                    kind = e.kind(),
                    error = %e,
                    "request failed"
                );
                mark_failed(&mut lifecycle, stage);
                ResponseEnvelope::error(e.to_string(), request.request_id.clone())
            }
        };

        Processed {
            envelope,
            lifecycle,
            published: false,
        }
    }

    /// [`process`](Self::process), then publish the envelope through `relay`.
    ///
    /// A publish failure is logged and recorded on the lifecycle; the
    /// persisted record, if any, stays in place.
    pub async fn handle(&self, message: &Value, relay: &Relay) -> Processed {
        let mut processed = self.process(message).await;

        match relay.publish(&processed.envelope).await {
            Ok(()) => {
                processed.published = true;
                if !processed.state().is_terminal() {
                    mark(&mut processed.lifecycle, RequestState::Relayed);
                }
            }
            Err(e) => {
                error!(
                    request_id = processed.envelope.request_id(),
                    error = %e,
                    "failed to relay response"
                );
                if !processed.state().is_terminal() {
                    mark_failed(&mut processed.lifecycle, Stage::Relay);
                }
            }
        }
        processed
    }

    async fn run(
        &self,
        request: &JobRequest,
        lifecycle: &mut Lifecycle,
    ) -> Result<ResponseRecord, (Stage, RelayError)> {
        let context = self
            .resolver
            .resolve(request)
            .await
            .map_err(|e| (Stage::ContextResolution, e))?;
        mark(lifecycle, RequestState::ContextResolved);

        let answer = self
            .generator
            .generate(&request.query, &context)
            .await
            .map_err(|e| (Stage::ResponseGeneration, e))?;
        mark(lifecycle, RequestState::ResponseGenerated);

        let record = self
            .results
            .append(NewResponseRecord {
                job_id: context.job_id.clone().or_else(|| request.job_id.clone()),
                user_query: request.query.clone(),
                ai_response: answer,
                metadata: record_metadata(request, &context),
            })
            .await
            .map_err(|e| (Stage::Persistence, e))?;
        mark(lifecycle, RequestState::Persisted);

        Ok(record)
    }
}

/// Metadata stored alongside each response. `similarity` is only set when
/// the context came from a vector search.
fn record_metadata(request: &JobRequest, context: &ResolvedContext) -> Map<String, Value> {
    let similarity = match context.resolution {
        Resolution::Similarity => context.top_similarity(),
        Resolution::Exact | Resolution::None => None,
    };
    let mut metadata = Map::new();
    metadata.insert("similarity".into(), json!(similarity));
    metadata.insert("request_id".into(), json!(request.request_id));
    metadata.insert("original_job_id".into(), json!(request.job_id));
    metadata.insert("resolution".into(), json!(context.resolution));
    metadata
}

fn mark(lifecycle: &mut Lifecycle, to: RequestState) {
    if let Err(e) = lifecycle.advance(to) {
        error!(error = %e, "lifecycle violation");
    }
}

fn mark_failed(lifecycle: &mut Lifecycle, stage: Stage) {
    if let Err(e) = lifecycle.fail(stage) {
        error!(error = %e, "lifecycle violation");
    }
}
