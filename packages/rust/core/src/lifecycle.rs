//! Per-request state machine.
//!
//! `Received → ContextResolved → ResponseGenerated → Persisted → Relayed`,
//! with `Failed(stage)` reachable from any non-terminal state.

use serde::Serialize;

/// The pipeline stage a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validation,
    ContextResolution,
    ResponseGeneration,
    Persistence,
    Relay,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Validation => "validation",
            Self::ContextResolution => "context_resolution",
            Self::ResponseGeneration => "response_generation",
            Self::Persistence => "persistence",
            Self::Relay => "relay",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Received,
    ContextResolved,
    ResponseGenerated,
    Persisted,
    Relayed,
    Failed(Stage),
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Relayed | Self::Failed(_))
    }

    /// The only state reachable from `self` on success.
    fn successor(self) -> Option<Self> {
        match self {
            Self::Received => Some(Self::ContextResolved),
            Self::ContextResolved => Some(Self::ResponseGenerated),
            Self::ResponseGenerated => Some(Self::Persisted),
            Self::Persisted => Some(Self::Relayed),
            Self::Relayed | Self::Failed(_) => None,
        }
    }
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Received => f.write_str("received"),
            Self::ContextResolved => f.write_str("context_resolved"),
            Self::ResponseGenerated => f.write_str("response_generated"),
            Self::Persisted => f.write_str("persisted"),
            Self::Relayed => f.write_str("relayed"),
            Self::Failed(stage) => write!(f, "failed({stage})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal transition {from} -> {to}")]
pub struct TransitionError {
    pub from: RequestState,
    pub to: RequestState,
}

/// The states one request has passed through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lifecycle {
    history: Vec<RequestState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            history: vec![RequestState::Received],
        }
    }

    pub fn state(&self) -> RequestState {
        *self
            .history
            .last()
            .unwrap_or(&RequestState::Received)
    }

    pub fn history(&self) -> &[RequestState] {
        &self.history
    }

    /// Move to the next success state. Skipping, reversing, and leaving a
    /// terminal state are rejected.
    pub fn advance(&mut self, to: RequestState) -> Result<(), TransitionError> {
        let from = self.state();
        if from.successor() != Some(to) {
            return Err(TransitionError { from, to });
        }
        self.history.push(to);
        Ok(())
    }

    pub fn fail(&mut self, stage: Stage) -> Result<(), TransitionError> {
        let from = self.state();
        let to = RequestState::Failed(stage);
        if from.is_terminal() {
            return Err(TransitionError { from, to });
        }
        self.history.push(to);
        Ok(())
    }
}
