//! Upstream change streams
//!
//! The router consumes partitions through [`UpstreamSource`]. Production
//! deployments plug in the data store's replication client;
//! [`MemoryUpstream`] is an in-process implementation with append/follow
//! semantics, used for tests and embedding.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use feedline_protocol::{
    Bytes, Checkpoint, CheckpointOrder, CollectionId, Event, EventKind, PartitionId,
};
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::UpstreamError;

/// Source of per-partition change streams
#[async_trait]
pub trait UpstreamSource: Send + Sync + 'static {
    /// Open a stream delivering the partition's events after `from`
    ///
    /// Fails with `UpstreamError::PartitionUnavailable` when this node does
    /// not own the partition.
    async fn open_stream(
        &self,
        partition: PartitionId,
        from: Checkpoint,
    ) -> Result<Box<dyn PartitionStream>, UpstreamError>;

    /// Latest position the upstream holds for a partition
    async fn latest_checkpoint(
        &self,
        partition: PartitionId,
    ) -> Result<Option<Checkpoint>, UpstreamError>;
}

/// Ordered events of one partition
#[async_trait]
pub trait PartitionStream: Send {
    /// Wait for the next event; `None` once the stream has ended
    ///
    /// Must be cancel safe: dropping the future before it completes must not
    /// lose an event.
    async fn next_event(&mut self) -> Option<Event>;
}

#[derive(Debug, Default)]
struct LogState {
    events: Vec<Event>,
    /// Epoch assigned by `emit`
    epoch: u64,
    closed: bool,
}

/// Append-only event log of one partition
#[derive(Debug, Default)]
struct PartitionLog {
    state: Mutex<LogState>,
    appended: Notify,
}

#[derive(Debug, Default)]
struct MemoryState {
    logs: BTreeMap<PartitionId, Arc<PartitionLog>>,
    owned: BTreeSet<PartitionId>,
    opens: BTreeMap<PartitionId, usize>,
}

/// In-memory upstream with an owned partition set
///
/// Events appended to a partition are delivered to every open stream of that
/// partition, starting after the checkpoint the stream was opened at.
#[derive(Debug, Default)]
pub struct MemoryUpstream {
    state: Mutex<MemoryState>,
}

impl MemoryUpstream {
    /// Create an upstream owning `partitions`, emitting in `epoch`
    pub fn new(partitions: impl IntoIterator<Item = PartitionId>, epoch: u64) -> Self {
        let upstream = Self::default();
        {
            let mut state = upstream.state.lock();
            for partition in partitions {
                state.owned.insert(partition);
                let log = PartitionLog::default();
                log.state.lock().epoch = epoch;
                state.logs.insert(partition, Arc::new(log));
            }
        }
        upstream
    }

    fn log(&self, partition: PartitionId) -> Result<Arc<PartitionLog>, UpstreamError> {
        let state = self.state.lock();
        if !state.owned.contains(&partition) {
            return Err(UpstreamError::PartitionUnavailable { partition });
        }
        state
            .logs
            .get(&partition)
            .cloned()
            .ok_or(UpstreamError::PartitionUnavailable { partition })
    }

    /// Append an event as-is
    pub fn append(&self, event: Event) -> Result<(), UpstreamError> {
        let log = self.log(event.partition())?;
        log.state.lock().events.push(event);
        log.appended.notify_waiters();
        Ok(())
    }

    /// Append an event at the partition's next sequence number
    pub fn emit(
        &self,
        partition: PartitionId,
        collection: impl Into<CollectionId>,
        kind: EventKind,
        key: impl Into<Bytes>,
        payload: impl Into<Bytes>,
    ) -> Result<Checkpoint, UpstreamError> {
        let log = self.log(partition)?;
        let checkpoint = {
            let mut state = log.state.lock();
            let seqno = state
                .events
                .iter()
                .rev()
                .find(|e| e.checkpoint.epoch == state.epoch)
                .map_or(0, |e| e.seqno())
                + 1;
            let checkpoint = Checkpoint::new(partition, state.epoch, seqno);
            state
                .events
                .push(Event::new(checkpoint, collection, kind, key, payload));
            checkpoint
        };
        log.appended.notify_waiters();
        Ok(checkpoint)
    }

    /// Switch the epoch later `emit` calls use, as after an upstream failover
    pub fn set_epoch(&self, partition: PartitionId, epoch: u64) -> Result<(), UpstreamError> {
        self.log(partition)?.state.lock().epoch = epoch;
        Ok(())
    }

    /// End every stream of the partition once its buffered events are read
    pub fn close_partition(&self, partition: PartitionId) -> Result<(), UpstreamError> {
        let log = self.log(partition)?;
        log.state.lock().closed = true;
        log.appended.notify_waiters();
        Ok(())
    }

    /// Stop owning a partition; later opens fail
    pub fn release(&self, partition: PartitionId) {
        self.state.lock().owned.remove(&partition);
    }

    /// Own a partition (again)
    pub fn acquire(&self, partition: PartitionId) {
        let mut state = self.state.lock();
        state.owned.insert(partition);
        state.logs.entry(partition).or_default();
    }

    /// Number of streams opened for a partition
    pub fn opens(&self, partition: PartitionId) -> usize {
        self.state
            .lock()
            .opens
            .get(&partition)
            .copied()
            .unwrap_or_default()
    }
}

#[async_trait]
impl UpstreamSource for MemoryUpstream {
    async fn open_stream(
        &self,
        partition: PartitionId,
        from: Checkpoint,
    ) -> Result<Box<dyn PartitionStream>, UpstreamError> {
        let log = self.log(partition)?;
        let cursor = {
            let state = log.state.lock();
            // Branches logged before the last event of `from`'s epoch are
            // superseded history. Later ones are delivered so the reader can
            // detect the divergence.
            let last_in_epoch = if from.is_unpinned() {
                None
            } else {
                state
                    .events
                    .iter()
                    .rposition(|e| e.checkpoint.epoch == from.epoch)
            };
            state
                .events
                .iter()
                .enumerate()
                .position(|(index, e)| match e.checkpoint.compare(&from) {
                    CheckpointOrder::After => true,
                    CheckpointOrder::Diverged => last_in_epoch.is_none_or(|last| index > last),
                    CheckpointOrder::Before | CheckpointOrder::Equal => false,
                })
                .unwrap_or(state.events.len())
        };
        *self.state.lock().opens.entry(partition).or_default() += 1;
        Ok(Box::new(MemoryStream { log, cursor }))
    }

    async fn latest_checkpoint(
        &self,
        partition: PartitionId,
    ) -> Result<Option<Checkpoint>, UpstreamError> {
        let log = self.log(partition)?;
        let state = log.state.lock();
        Ok(state.events.last().map(|e| e.checkpoint))
    }
}

struct MemoryStream {
    log: Arc<PartitionLog>,
    cursor: usize,
}

#[async_trait]
impl PartitionStream for MemoryStream {
    async fn next_event(&mut self) -> Option<Event> {
        loop {
            // Register before checking so an append in between is not missed
            let appended = self.log.appended.notified();
            {
                let state = self.log.state.lock();
                if let Some(event) = state.events.get(self.cursor) {
                    self.cursor += 1;
                    return Some(event.clone());
                }
                if state.closed {
                    return None;
                }
            }
            appended.await;
        }
    }
}
