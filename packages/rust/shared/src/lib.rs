//! Shared types, error model, configuration, and backend traits for jobrelay.
//!
//! This crate is the foundation depended on by all other jobrelay crates.
//! It provides:
//! - [`RelayError`], the unified error type
//! - Domain types ([`JobRequest`], [`ResolvedContext`], [`ResponseRecord`], [`ResponseEnvelope`])
//! - Configuration ([`AppConfig`], [`RelaySettings`], config loading)
//! - Backend seams ([`ContextStore`], [`ResultStore`], [`Embedder`], [`ChatModel`],
//!   [`Publisher`], [`Subscriber`])

pub mod backend;
pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use backend::{
    ChatMessage, ChatModel, ChatRole, ContextStore, Embedder, Publisher, ResultStore, Subscriber,
};
pub use config::{
    AppConfig, OpenAiConfig, OpenAiSettings, PubNubConfig, PubNubSettings, RelaySettings,
    ResolverConfig, ResolverSettings, StoreBackend, StoreConfig, StoreSettings, SupabaseConfig,
    config_dir, config_file_path, init_config, load_config, load_config_from,
};
pub use error::{RelayError, Result};
pub use types::{
    ContextDocument, ContextMatch, ContextSnippet, JobRequest, NewResponseRecord, RejectedRequest,
    Resolution, ResolvedContext, ResponseEnvelope, ResponseId, ResponseRecord,
};
