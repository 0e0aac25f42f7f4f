//! Feedline Stream Router
//!
//! Reads per-partition change streams from an upstream source and routes
//! their events to downstream receivers, per topic, through shared transport
//! endpoints.
//!
//! # Architecture
//!
//! ```text
//! RouterClient ──ControlRequest──► control task ──ArcSwap<RouteSnapshot>──┐
//!                                      │                                  │
//!                                      │ spawn / Flush / Reopen / Close   ▼
//!                                      └──────────────► partition worker (one per partition)
//!                                                             │
//!                                  UpstreamSource ──events──► │ ──batches──► TransportEndpoint
//!                                                             │
//!                                                  CheckpointStore ◄── committed checkpoints
//! ```
//!
//! - One worker per partition is shared by every topic watching it
//! - Filter changes take effect from the next event; nothing is replayed
//! - Endpoints are shared by address and closed when the last topic
//!   destination releases them
//! - A checkpoint is committed only after every pending batch was flushed
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use feedline_config::{DestinationConfig, RouterConfig, Topology};
//! use feedline_protocol::{Checkpoint, PartitionId, checkpoint_map};
//! use feedline_router::{MemoryUpstream, StreamRouter};
//! use feedline_routing::Filter;
//!
//! # async fn example() -> feedline_router::Result<()> {
//! let p0 = PartitionId::new(0);
//! let upstream = Arc::new(MemoryUpstream::new([p0], 1));
//! let client = StreamRouter::new(RouterConfig::default(), upstream).spawn();
//!
//! let topology = Topology::new().with_destination("D", DestinationConfig::tcp("127.0.0.1:9100"));
//! client
//!     .start_topic(
//!         "orders",
//!         topology,
//!         vec![Filter::new("A", ["D"])],
//!         checkpoint_map([Checkpoint::new(p0, 1, 0)]),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod metrics;
mod registry;
mod router;
mod routes;
mod state;
mod store;
mod upstream;
mod worker;


pub use client::RouterClient;
pub use error::{Result, RouterError, StoreError, UpstreamError};
pub use metrics::{RouterMetrics, RouterMetricsSnapshot};
pub use router::StreamRouter;
pub use state::{
    PartitionState, PartitionStatus, RouterNotice, RouterStats, TopicState, TopicStatus,
};
pub use store::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, open_store};
pub use upstream::{MemoryUpstream, PartitionStream, UpstreamSource};
