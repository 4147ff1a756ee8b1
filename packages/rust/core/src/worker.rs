//! Long-running subscriber loop.
//!
//! Messages are handled one at a time, in arrival order. A subscribe failure
//! is a transport problem: the loop waits `reconnect_delay` and polls again.
//! No individual request is retried.

use std::future::Future;
use std::time::Duration;

use jobrelay_shared::Subscriber;
use tracing::{info, warn};

use crate::pipeline::Pipeline;
use crate::relay::Relay;

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub reconnect_delay: Duration,
    /// Stop after this many messages. `None` runs until shutdown.
    pub max_messages: Option<usize>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_millis(1000),
            max_messages: None,
        }
    }
}

/// Counters reported when the worker stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub received: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub relay_failures: usize,
    pub reconnects: usize,
}

/// Consume `subscriber` until `shutdown` resolves, the channel closes, or
/// `max_messages` is reached. A message already being processed when
/// shutdown fires is finished first.
pub async fn run_worker<S, F>(
    subscriber: &mut S,
    pipeline: &Pipeline,
    relay: &Relay,
    options: &WorkerOptions,
    shutdown: F,
) -> WorkerStats
where
    S: Subscriber + ?Sized,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut stats = WorkerStats::default();
    info!(relay_channel = relay.channel(), "worker started");

    loop {
        if options.max_messages.is_some_and(|max| stats.received >= max) {
            break;
        }

        let next = tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown requested");
                break;
            }
            next = subscriber.next_message() => next,
        };

        let message = match next {
            Ok(Some(message)) => message,
            Ok(None) => {
                info!("subscription closed");
                break;
            }
            Err(e) => {
                stats.reconnects += 1;
                warn!(
                    error = %e,
                    delay_ms = options.reconnect_delay.as_millis() as u64,
                    "subscribe failed, reconnecting"
                );
                tokio::select! {
                    _ = &mut shutdown => break,
                    _ = tokio::time::sleep(options.reconnect_delay) => continue,
                }
            }
        };

        stats.received += 1;
        let processed = pipeline.handle(&message, relay).await;
        if processed.envelope.is_success() {
            stats.succeeded += 1;
        } else {
            stats.failed += 1;
        }
        if !processed.published {
            stats.relay_failures += 1;
        }
    }

    info!(
        received = stats.received,
        succeeded = stats.succeeded,
        failed = stats.failed,
        relay_failures = stats.relay_failures,
        "worker stopped"
    );
    stats
}
