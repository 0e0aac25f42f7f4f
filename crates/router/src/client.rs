//! Router client
//!
//! [`RouterClient`] is the administrative handle of a running router. Each
//! method sends a [`ControlRequest`] to the control task and waits for the
//! reply, bounded by the configured request timeout. Clones share the same
//! router; the router shuts down once every client is dropped.
//!
//! All operations are idempotent, so a caller that sees `Timeout` can retry.

use std::sync::Arc;
use std::time::Duration;

use feedline_config::Topology;
use feedline_protocol::{CheckpointMap, CollectionId, PartitionId, TopicId};
use feedline_routing::Filter;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::error::{Result, RouterError};
use crate::metrics::{RouterMetrics, RouterMetricsSnapshot};
use crate::state::{PartitionStatus, RouterNotice, RouterStats, TopicStatus};

/// Request handled by the router control task
pub(crate) enum ControlRequest {
    StartTopic {
        topic: TopicId,
        topology: Topology,
        filters: Vec<Filter>,
        checkpoints: CheckpointMap,
        reply: oneshot::Sender<Result<()>>,
    },
    AddCollections {
        topic: TopicId,
        filters: Vec<Filter>,
        topology: Topology,
        checkpoints: CheckpointMap,
        reply: oneshot::Sender<Result<Vec<Filter>>>,
    },
    DelCollections {
        topic: TopicId,
        collections: Vec<CollectionId>,
        reply: oneshot::Sender<Result<()>>,
    },
    StopTopic {
        topic: TopicId,
        reply: oneshot::Sender<Result<()>>,
    },
    QueryRestartCheckpoints {
        partitions: Vec<PartitionId>,
        reply: oneshot::Sender<Result<CheckpointMap>>,
    },
    TopicStatus {
        topic: TopicId,
        reply: oneshot::Sender<Option<TopicStatus>>,
    },
    PartitionState {
        partition: PartitionId,
        reply: oneshot::Sender<Option<PartitionStatus>>,
    },
    Stats {
        reply: oneshot::Sender<RouterStats>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle for controlling a [`StreamRouter`](crate::StreamRouter)
#[derive(Clone)]
pub struct RouterClient {
    requests: mpsc::Sender<ControlRequest>,
    notices: broadcast::Sender<RouterNotice>,
    metrics: Arc<RouterMetrics>,
    request_timeout: Duration,
}

impl RouterClient {
    pub(crate) fn new(
        requests: mpsc::Sender<ControlRequest>,
        notices: broadcast::Sender<RouterNotice>,
        metrics: Arc<RouterMetrics>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            requests,
            notices,
            metrics,
            request_timeout,
        }
    }

    /// Start streaming a topic
    ///
    /// Validates `topology` and `filters`, then opens every partition in
    /// `checkpoints` that is not already streaming. Starting an active topic
    /// merges like [`add_collections`](Self::add_collections).
    ///
    /// # Errors
    ///
    /// `PartitionUnavailable` when upstream does not own a partition,
    /// `Conflict` or `UnknownDestination` for bad filters,
    /// `ResourceExhausted` past `max_partitions`. The router is unchanged on
    /// any error.
    pub async fn start_topic(
        &self,
        topic: impl Into<TopicId>,
        topology: Topology,
        filters: Vec<Filter>,
        checkpoints: CheckpointMap,
    ) -> Result<()> {
        let topic = topic.into();
        self.request(|reply| ControlRequest::StartTopic {
            topic,
            topology,
            filters,
            checkpoints,
            reply,
        })
        .await?
    }

    /// Add collections to an active topic
    ///
    /// Partitions in `checkpoints` that are not streaming are opened (paused
    /// ones reopened) at the supplied checkpoint; streaming partitions apply
    /// the new filters from their next event. An empty `checkpoints` applies
    /// the collections to every partition of the topic.
    ///
    /// Returns the topic's filters after the merge.
    pub async fn add_collections(
        &self,
        topic: impl Into<TopicId>,
        filters: Vec<Filter>,
        topology: Topology,
        checkpoints: CheckpointMap,
    ) -> Result<Vec<Filter>> {
        let topic = topic.into();
        self.request(|reply| ControlRequest::AddCollections {
            topic,
            filters,
            topology,
            checkpoints,
            reply,
        })
        .await?
    }

    /// Remove collections from a topic; unknown topics and collections are ignored
    pub async fn del_collections(
        &self,
        topic: impl Into<TopicId>,
        collections: Vec<CollectionId>,
    ) -> Result<()> {
        let topic = topic.into();
        self.request(|reply| ControlRequest::DelCollections {
            topic,
            collections,
            reply,
        })
        .await?
    }

    /// Drain and stop a topic; unknown topics are ignored
    pub async fn stop_topic(&self, topic: impl Into<TopicId>) -> Result<()> {
        let topic = topic.into();
        self.request(|reply| ControlRequest::StopTopic { topic, reply })
            .await?
    }

    /// Best known resume position of each partition
    pub async fn query_restart_checkpoints(
        &self,
        partitions: Vec<PartitionId>,
    ) -> Result<CheckpointMap> {
        self.request(|reply| ControlRequest::QueryRestartCheckpoints { partitions, reply })
            .await?
    }

    /// Status of a topic, if the router knows it
    pub async fn topic_status(&self, topic: impl Into<TopicId>) -> Result<Option<TopicStatus>> {
        let topic = topic.into();
        self.request(|reply| ControlRequest::TopicStatus { topic, reply })
            .await
    }

    /// Status of a partition worker, if the partition was ever opened
    pub async fn partition_state(&self, partition: PartitionId) -> Result<Option<PartitionStatus>> {
        self.request(|reply| ControlRequest::PartitionState { partition, reply })
            .await
    }

    pub async fn stats(&self) -> Result<RouterStats> {
        self.request(|reply| ControlRequest::Stats { reply }).await
    }

    /// Subscribe to operator notices
    pub fn subscribe_notices(&self) -> broadcast::Receiver<RouterNotice> {
        self.notices.subscribe()
    }

    /// Current router counters, read without a round trip
    pub fn metrics(&self) -> RouterMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Flush and close every worker and endpoint, then stop the control task
    ///
    /// Shutting down a router that has already stopped is not an error.
    pub async fn shutdown(&self) -> Result<()> {
        match self.request(|reply| ControlRequest::Shutdown { reply }).await {
            Ok(()) | Err(RouterError::RouterClosed) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> ControlRequest,
    ) -> Result<T> {
        let (reply, response) = oneshot::channel();
        let exchange = async {
            self.requests
                .send(make(reply))
                .await
                .map_err(|_| RouterError::RouterClosed)?;
            response.await.map_err(|_| RouterError::RouterClosed)
        };
        tokio::time::timeout(self.request_timeout, exchange)
            .await
            .map_err(|_| RouterError::Timeout)?
    }
}
