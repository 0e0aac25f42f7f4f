//! Partition workers
//!
//! One task per active partition reads the upstream stream and fans events
//! out to every topic interested in the partition. The worker is shared by
//! all topics; which topics it serves is decided by the routing snapshot it
//! loads for each event.
//!
//! ```text
//! next_event → compare with position → route per topic → pending batch
//!                                                            ↓ (full / tick)
//!                     store.persist ← commit checkpoint ← endpoint.send
//! ```
//!
//! Commands from the control task (`Flush`, `Reopen`, `Close`) are handled
//! between events, so a command never observes a half-routed event.
//!
//! A pending batch never grows past what one frame can carry: an event that
//! would overflow it flushes first. Only acknowledged data is committed.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use feedline_endpoint::{EndpointError, TransportEndpoint};
use feedline_protocol::{
    BatchBuilder, Checkpoint, CheckpointOrder, Event, PartitionId, TopicId, max_batch_bytes,
};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::metrics::RouterMetrics;
use crate::routes::RouteSnapshot;
use crate::state::{PartitionCell, PartitionState, PartitionStatus, RouterNotice};
use crate::store::CheckpointStore;
use crate::upstream::PartitionStream;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// State shared by the control task and every worker
pub(crate) struct WorkerContext {
    pub(crate) routes: ArcSwap<RouteSnapshot>,
    pub(crate) store: Arc<dyn CheckpointStore>,
    pub(crate) metrics: Arc<RouterMetrics>,
    pub(crate) notices: broadcast::Sender<RouterNotice>,
    pub(crate) batch_size: usize,
    pub(crate) flush_interval: Duration,
    /// Addresses of dead endpoints already announced
    dead_reported: Mutex<HashSet<String>>,
}

impl WorkerContext {
    pub(crate) fn new(
        store: Arc<dyn CheckpointStore>,
        metrics: Arc<RouterMetrics>,
        notices: broadcast::Sender<RouterNotice>,
        batch_size: usize,
        flush_interval: Duration,
    ) -> Self {
        Self {
            routes: ArcSwap::from_pointee(RouteSnapshot::default()),
            store,
            metrics,
            notices,
            batch_size: batch_size.max(1),
            flush_interval: flush_interval.max(MIN_INTERVAL),
            dead_reported: Mutex::new(HashSet::new()),
        }
    }

    /// Publish a notice; having no subscribers is fine
    pub(crate) fn notify(&self, notice: RouterNotice) {
        let _ = self.notices.send(notice);
    }

    /// Allow a new endpoint at `address` to be announced dead again
    pub(crate) fn forget_endpoint(&self, address: &str) {
        self.dead_reported.lock().remove(address);
    }

    fn report_send_failure(
        &self,
        partition: PartitionId,
        endpoint: &Arc<TransportEndpoint>,
        err: &EndpointError,
    ) {
        self.metrics.record_send_failure();
        match err {
            EndpointError::Dead { .. } => {
                if self.dead_reported.lock().insert(endpoint.address().to_owned()) {
                    let mut destinations = self.routes.load().destinations_of(endpoint);
                    if destinations.is_empty() {
                        destinations.push(endpoint.name().to_owned());
                    }
                    tracing::error!(
                        destinations = ?destinations,
                        address = %endpoint.address(),
                        "endpoint dead, dropping its batches"
                    );
                    self.notify(RouterNotice::EndpointDead {
                        destinations,
                        address: endpoint.address().to_owned(),
                    });
                }
            }
            EndpointError::Closed { .. } => {
                tracing::debug!(%partition, destination = %endpoint.name(), "endpoint closed, batch dropped");
            }
            other => {
                tracing::warn!(%partition, destination = %endpoint.name(), error = %other, "batch send failed");
            }
        }
    }
}

/// Commands from the control task
pub(crate) enum WorkerCommand {
    /// Flush pending batches and report the committed checkpoint
    Flush { reply: oneshot::Sender<Checkpoint> },
    /// Replace the stream of a paused partition and resume from `from`
    Reopen {
        stream: Box<dyn PartitionStream>,
        from: Checkpoint,
        reply: oneshot::Sender<()>,
    },
    /// Flush and stop
    Close { reply: oneshot::Sender<Checkpoint> },
}

/// Control-side handle of a running worker
pub(crate) struct WorkerHandle {
    commands: mpsc::Sender<WorkerCommand>,
    cell: Arc<PartitionCell>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Spawn a worker streaming from `from`
    pub(crate) fn spawn(
        ctx: Arc<WorkerContext>,
        stream: Box<dyn PartitionStream>,
        from: Checkpoint,
        channel_size: usize,
        cancel: CancellationToken,
    ) -> Self {
        let (commands, rx) = mpsc::channel(channel_size.max(1));
        let cell = Arc::new(PartitionCell::new(from));
        ctx.metrics.record_opened();

        let worker = PartitionWorker {
            partition: from.partition,
            ctx,
            cell: Arc::clone(&cell),
            stream,
            position: from,
            committed: from,
            state: PartitionState::Opening,
            pending: Vec::new(),
            commands: rx,
            cancel,
        };
        let task = tokio::spawn(worker.run());

        Self {
            commands,
            cell,
            task,
        }
    }

    pub(crate) fn status(&self) -> PartitionStatus {
        self.cell.get()
    }

    /// Whether the worker task is still running
    pub(crate) fn is_running(&self) -> bool {
        !self.task.is_finished() && self.cell.get().state != PartitionState::Closed
    }

    /// Flush the worker's pending batches; `None` if it has stopped
    pub(crate) async fn flush(&self) -> Option<Checkpoint> {
        let (reply, done) = oneshot::channel();
        self.commands.send(WorkerCommand::Flush { reply }).await.ok()?;
        done.await.ok()
    }

    /// Resume a paused worker on a new stream; `false` if it has stopped
    pub(crate) async fn reopen(&self, stream: Box<dyn PartitionStream>, from: Checkpoint) -> bool {
        let (reply, done) = oneshot::channel();
        let command = WorkerCommand::Reopen {
            stream,
            from,
            reply,
        };
        if self.commands.send(command).await.is_err() {
            return false;
        }
        done.await.is_ok()
    }

    /// Stop the worker after a final flush, returning its committed checkpoint
    pub(crate) async fn close(self) -> Checkpoint {
        let (reply, done) = oneshot::channel();
        if self.commands.send(WorkerCommand::Close { reply }).await.is_ok() {
            let _ = done.await;
        }
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "partition worker task failed");
        }
        self.cell.get().committed
    }
}

/// Pending batch for one `(topic, endpoint)` pair
struct PendingBatch {
    endpoint: Arc<TransportEndpoint>,
    builder: BatchBuilder,
}

struct PartitionWorker {
    partition: PartitionId,
    ctx: Arc<WorkerContext>,
    cell: Arc<PartitionCell>,
    stream: Box<dyn PartitionStream>,
    /// Checkpoint of the last accepted event
    position: Checkpoint,
    /// Checkpoint covered by acknowledged flushes
    committed: Checkpoint,
    state: PartitionState,
    /// In first-use order; flushed in that order
    pending: Vec<PendingBatch>,
    commands: mpsc::Receiver<WorkerCommand>,
    cancel: CancellationToken,
}

impl PartitionWorker {
    async fn run(mut self) {
        self.set_state(PartitionState::Streaming);
        tracing::info!(partition = %self.partition, from = %self.position, "partition worker started");

        let mut ticker = interval(self.ctx.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    self.shutdown("router shutdown").await;
                    return;
                }

                command = self.commands.recv() => match command {
                    Some(WorkerCommand::Flush { reply }) => {
                        self.flush().await;
                        let _ = reply.send(self.committed);
                    }
                    Some(WorkerCommand::Reopen { stream, from, reply }) => {
                        self.reopen(stream, from).await;
                        let _ = reply.send(());
                    }
                    Some(WorkerCommand::Close { reply }) => {
                        self.shutdown("closed").await;
                        let _ = reply.send(self.committed);
                        return;
                    }
                    None => {
                        self.shutdown("control task gone").await;
                        return;
                    }
                },

                _ = ticker.tick() => {
                    if !self.pending.is_empty() || self.position != self.committed {
                        self.flush().await;
                    }
                }

                event = self.stream.next_event() => match event {
                    Some(event) => self.on_event(event).await,
                    None => {
                        self.shutdown("upstream stream ended").await;
                        return;
                    }
                },
            }
        }
    }

    async fn on_event(&mut self, event: Event) {
        self.ctx.metrics.record_received();
        if self.state == PartitionState::Paused {
            self.ctx.metrics.record_paused_drop();
            return;
        }

        match self.position.compare(&event.checkpoint) {
            CheckpointOrder::Before => {}
            CheckpointOrder::Equal | CheckpointOrder::After => {
                self.ctx.metrics.record_stale();
                tracing::debug!(
                    partition = %self.partition,
                    position = %self.position,
                    event = %event.checkpoint,
                    "dropping stale event"
                );
                return;
            }
            CheckpointOrder::Diverged => {
                self.pause(event.checkpoint).await;
                return;
            }
        }

        let routes = self.ctx.routes.load_full();
        let targets: Vec<(&TopicId, &Arc<TransportEndpoint>)> = routes
            .topics
            .iter()
            .flat_map(|route| {
                route
                    .targets(&event)
                    .into_iter()
                    .map(move |endpoint| (&route.topic, endpoint))
            })
            .collect();

        let oversized = targets
            .iter()
            .find(|(topic, _)| event.encoded_len() > max_batch_bytes(topic))
            .map(|(topic, _)| *topic);
        let overflow = targets
            .iter()
            .any(|(topic, endpoint)| !has_room(&self.pending, topic, endpoint, &event));

        if let Some(topic) = oversized {
            self.flush().await;
            if self.state != PartitionState::Paused {
                let reason = format!(
                    "event {} of {} bytes exceeds the batch frame limit of topic '{topic}'",
                    event.checkpoint,
                    event.encoded_len()
                );
                self.stall(reason);
            }
            return;
        }
        if overflow {
            self.flush().await;
        }
        if self.state == PartitionState::Paused {
            self.ctx.metrics.record_paused_drop();
            return;
        }

        self.position = match self.position.advance_to(&event.checkpoint) {
            Ok(position) => position,
            Err(e) => {
                self.ctx.metrics.record_stale();
                tracing::warn!(partition = %self.partition, error = %e, "rejecting event");
                return;
            }
        };
        self.cell.set_position(self.position);

        let routed = !targets.is_empty();
        let mut full = false;
        for (topic, endpoint) in targets {
            full |= append(&mut self.pending, topic, endpoint, event.clone(), self.ctx.batch_size);
        }
        self.ctx.metrics.record_routed(routed);
        tracing::trace!(partition = %self.partition, checkpoint = %event.checkpoint, routed, "event");

        if full {
            self.flush().await;
        }
    }

    /// Send every pending batch, in order, then commit the position
    ///
    /// Batches for dead or closed endpoints are dropped and do not hold the
    /// checkpoint back. Any other failure leaves the batch unacknowledged:
    /// the position is not committed and the partition stalls.
    async fn flush(&mut self) {
        let mut undelivered = None;
        for PendingBatch { endpoint, mut builder } in std::mem::take(&mut self.pending) {
            if builder.is_empty() {
                continue;
            }
            let batch = builder.take();
            let count = batch.len() as u64;
            match endpoint.send(batch).await {
                Ok(()) => self.ctx.metrics.record_sent(count),
                Err(e) => {
                    self.ctx.report_send_failure(self.partition, &endpoint, &e);
                    if !e.is_dead() && !e.is_closed() && undelivered.is_none() {
                        undelivered = Some(format!("batch for '{}' not delivered: {e}", endpoint.name()));
                    }
                }
            }
        }

        match undelivered {
            None => self.commit().await,
            Some(reason) => self.stall(reason),
        }
    }

    async fn commit(&mut self) {
        if self.committed == self.position {
            return;
        }
        self.committed = self.position;
        self.cell.set_committed(self.committed);
        self.ctx.metrics.record_commit();
        if let Err(e) = self.ctx.store.persist(self.committed).await {
            self.ctx.metrics.record_store_error();
            tracing::warn!(partition = %self.partition, error = %e, "failed to persist checkpoint");
        }
    }

    async fn pause(&mut self, upstream: Checkpoint) {
        self.flush().await;
        if self.state == PartitionState::Paused {
            return;
        }
        self.set_state(PartitionState::Paused);
        self.ctx.metrics.record_divergence();
        tracing::warn!(
            partition = %self.partition,
            position = %self.position,
            upstream = %upstream,
            "upstream history diverged, partition paused"
        );
        self.ctx.notify(RouterNotice::PartitionDiverged {
            partition: self.partition,
            position: self.position,
            upstream,
        });
    }

    /// Pause with the committed checkpoint still before undeliverable data
    ///
    /// Routed but uncommitted events are given up; a reopen at `committed`
    /// reads them again.
    fn stall(&mut self, reason: String) {
        self.pending.clear();
        self.position = self.committed;
        self.cell.set_position(self.position);
        self.set_state(PartitionState::Paused);
        self.ctx.metrics.record_stall();
        tracing::error!(
            partition = %self.partition,
            committed = %self.committed,
            reason = %reason,
            "undeliverable data, partition paused"
        );
        self.ctx.notify(RouterNotice::PartitionStalled {
            partition: self.partition,
            committed: self.committed,
            reason,
        });
    }

    async fn reopen(&mut self, stream: Box<dyn PartitionStream>, from: Checkpoint) {
        self.flush().await;
        self.stream = stream;
        self.position = from;
        self.committed = from;
        self.state = PartitionState::Streaming;
        self.cell.reset(from);
        self.ctx.metrics.record_opened();
        if let Err(e) = self.ctx.store.persist(from).await {
            self.ctx.metrics.record_store_error();
            tracing::warn!(partition = %self.partition, error = %e, "failed to persist checkpoint");
        }
        tracing::info!(partition = %self.partition, from = %from, "partition reopened");
    }

    async fn shutdown(&mut self, reason: &'static str) {
        self.flush().await;
        self.set_state(PartitionState::Closed);
        self.ctx.metrics.record_closed();
        tracing::info!(
            partition = %self.partition,
            committed = %self.committed,
            reason,
            "partition worker stopped"
        );
        self.ctx.notify(RouterNotice::PartitionClosed {
            partition: self.partition,
            committed: self.committed,
        });
    }

    fn set_state(&mut self, state: PartitionState) {
        self.state = state;
        self.cell.set_state(state);
    }
}

impl PendingBatch {
    fn is_for(&self, topic: &TopicId, endpoint: &Arc<TransportEndpoint>) -> bool {
        self.builder.topic() == topic && Arc::ptr_eq(&self.endpoint, endpoint)
    }
}

/// Whether `event` fits the pending batch of `(topic, endpoint)`
fn has_room(
    pending: &[PendingBatch],
    topic: &TopicId,
    endpoint: &Arc<TransportEndpoint>,
    event: &Event,
) -> bool {
    pending
        .iter()
        .find(|p| p.is_for(topic, endpoint))
        .is_none_or(|p| p.builder.has_room(event))
}

/// Append to the pending batch of `(topic, endpoint)`; returns whether it is full
fn append(
    pending: &mut Vec<PendingBatch>,
    topic: &TopicId,
    endpoint: &Arc<TransportEndpoint>,
    event: Event,
    batch_size: usize,
) -> bool {
    let index = match pending.iter().position(|p| p.is_for(topic, endpoint)) {
        Some(index) => index,
        None => {
            pending.push(PendingBatch {
                endpoint: Arc::clone(endpoint),
                builder: BatchBuilder::with_max_items(topic.clone(), batch_size),
            });
            pending.len() - 1
        }
    };
    pending[index].builder.add(event)
}
