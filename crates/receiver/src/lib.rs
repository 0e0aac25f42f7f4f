//! Feedline Receiver - Downstream end of the push protocol
//!
//! A [`Receiver`] accepts connections from transport endpoints, decodes the
//! event batches they push, and asks an installed [`BatchHandler`] whether
//! to accept each one. Accepted batches are acked; rejected or malformed
//! batches are nacked and retried by the sender.
//!
//! Statistics are published every `stats_interval` on a `watch` channel,
//! independent of delivery.
//!
//! # Example
//!
//! ```ignore
//! let receiver = Receiver::new(config.receiver, |source, batch: &EventBatch| {
//!     store.append(source, batch).is_ok()
//! });
//! let mut stats = receiver.stats();
//! tokio::spawn(receiver.run(cancel.clone()));
//! ```

mod error;
mod metrics;
mod receiver;

#[cfg(test)]
mod receiver_test;

pub use error::{ReceiverError, Result};
pub use metrics::{ReceiverMetrics, ReceiverStats};
pub use receiver::{BatchHandler, Receiver};
