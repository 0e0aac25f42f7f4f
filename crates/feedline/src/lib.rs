//! Feedline
//!
//! Routes per-partition change streams from an upstream data store to
//! downstream receivers. Operators start topics on a stream router with a
//! set of collection filters and a destination topology; the router opens
//! the partitions, forwards matching events in order through shared TCP
//! transport endpoints and commits a checkpoint per partition as receivers
//! acknowledge delivery.
//!
//! This crate ties the workspace together:
//!
//! - [`config`], [`protocol`], [`routing`], [`endpoint`], [`receiver`] and
//!   [`router`] re-export the component crates
//! - [`logging::init`] installs the `tracing` subscriber from `[log]`
//! - [`spawn_router`] builds a router from a loaded [`Config`]
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::str::FromStr;
//! use feedline::{Config, MemoryUpstream, PartitionId, spawn_router};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_str("[router]\nflush_interval = \"50ms\"")?;
//! feedline::logging::init(&config.log)?;
//!
//! let upstream = Arc::new(MemoryUpstream::new([PartitionId::new(0)], 1));
//! let client = spawn_router(&config, upstream, CancellationToken::new())?;
//! client.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod logging;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

pub use feedline_config as config;
pub use feedline_endpoint as endpoint;
pub use feedline_protocol as protocol;
pub use feedline_receiver as receiver;
pub use feedline_router as router;
pub use feedline_routing as routing;

pub use feedline_config::{Config, ConfigError, DestinationConfig, Topology};
pub use feedline_protocol::{
    Checkpoint, CheckpointMap, CollectionId, Event, EventBatch, EventKind, PartitionId, TopicId,
};
pub use feedline_receiver::{BatchHandler, Receiver, ReceiverStats};
pub use feedline_router::{
    MemoryUpstream, RouterClient, RouterError, RouterNotice, StoreError, StreamRouter,
    UpstreamSource,
};
pub use feedline_routing::{Filter, MatchPredicate};

/// Spawn a stream router configured by `config`
///
/// Opens the checkpoint store selected by `[checkpoint]` and applies the
/// `[router]` settings. The router stops when `cancel` fires or every
/// client is dropped.
///
/// # Errors
///
/// Returns `StoreError` if the checkpoint store cannot be opened.
pub fn spawn_router(
    config: &Config,
    upstream: Arc<dyn UpstreamSource>,
    cancel: CancellationToken,
) -> Result<RouterClient, StoreError> {
    let store = feedline_router::open_store(&config.checkpoint)?;
    tracing::info!(
        store = config.checkpoint.kind(),
        destinations = config.topology.len(),
        "starting stream router"
    );

    Ok(StreamRouter::new(config.router.clone(), upstream)
        .with_store(store)
        .with_cancellation(cancel)
        .spawn())
}
