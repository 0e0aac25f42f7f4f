//! Feedline Endpoint - Outbound push channels
//!
//! A [`TransportEndpoint`] delivers event batches to one remote receiver
//! over the length-prefixed TCP push protocol and waits for each batch to be
//! acknowledged.
//!
//! # Delivery
//!
//! - Bounded queue: `send()` waits for capacity instead of dropping
//! - Acks: a batch counts as delivered only after the receiver's `Ack`
//! - Retry: failures and `Nack`s retry with exponential backoff
//! - Dead marking: once a batch exhausts its attempts, every later `send()`
//!   fails immediately with [`EndpointError::Dead`]
//! - Keep-alive: idle connections carry periodic `KeepAlive` frames with the
//!   sender's statistics
//!
//! # Example
//!
//! ```ignore
//! let endpoint = TransportEndpoint::spawn("index_eu", EndpointConfig::new("10.0.0.5:9100"));
//! endpoint.send(batch).await?;
//! endpoint.close(CloseMode::Drain).await;
//! ```

mod config;
mod endpoint;
mod error;
mod metrics;
mod reporter;


pub use config::EndpointConfig;
pub use endpoint::{CloseMode, TransportEndpoint};
pub use error::{EndpointError, Result};
pub use metrics::{EndpointMetrics, EndpointMetricsSnapshot};
pub use reporter::StatsReporter;
