//! Request pipeline and worker for jobrelay.
//!
//! This crate ties the backends together: context resolution, response
//! generation, persistence, and relay of one envelope per inbound request,
//! plus the long-running worker loop and the bulk context loader.

pub mod backend;
pub mod generator;
pub mod lifecycle;
pub mod loader;
pub mod pipeline;
pub mod relay;
pub mod resolver;
pub mod worker;

#[cfg(test)]
mod testing;

pub use backend::{Backends, channel_settings, connect_channel};
pub use generator::ResponseGenerator;
pub use lifecycle::{Lifecycle, RequestState, Stage};
pub use pipeline::{Pipeline, Processed};
pub use relay::Relay;
pub use resolver::ContextResolver;
pub use worker::{WorkerOptions, WorkerStats, run_worker};
