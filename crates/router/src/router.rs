//! Stream router control task
//!
//! The control task owns every topic, every partition worker handle and the
//! endpoint registry. It processes one [`ControlRequest`] at a time, so
//! control operations are serialized; workers only see their results through
//! routing snapshot swaps and worker commands.
//!
//! Start and add run in two phases. `prepare` performs every fallible step
//! (topology merge, endpoint settings, filter check, partition limits,
//! opening upstream streams)
//! without touching router state. `commit` then applies the plan: filters,
//! interest sets, endpoint references, snapshot publish, workers. A failed
//! call therefore leaves nothing behind.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use feedline_config::{RouterConfig, Topology};
use feedline_endpoint::{CloseMode, TransportEndpoint};
use feedline_protocol::{Checkpoint, CheckpointMap, CollectionId, PartitionId, TopicId};
use feedline_routing::{Filter, FilterTable};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::client::{ControlRequest, RouterClient};
use crate::error::{Result, RouterError};
use crate::metrics::RouterMetrics;
use crate::registry::EndpointRegistry;
use crate::routes::{RouteSnapshot, TopicRoute};
use crate::state::{PartitionState, PartitionStatus, RouterStats, TopicState, TopicStatus};
use crate::store::{CheckpointStore, MemoryCheckpointStore};
use crate::upstream::{PartitionStream, UpstreamSource};
use crate::worker::{WorkerContext, WorkerHandle};

/// Builder for a router instance
///
/// ```no_run
/// # use std::sync::Arc;
/// # use feedline_config::RouterConfig;
/// # use feedline_protocol::PartitionId;
/// # use feedline_router::{MemoryUpstream, StreamRouter};
/// # async fn example() {
/// let upstream = Arc::new(MemoryUpstream::new([PartitionId::new(0)], 1));
/// let client = StreamRouter::new(RouterConfig::default(), upstream).spawn();
/// client.shutdown().await.ok();
/// # }
/// ```
pub struct StreamRouter {
    config: RouterConfig,
    upstream: Arc<dyn UpstreamSource>,
    store: Arc<dyn CheckpointStore>,
    cancel: CancellationToken,
}

impl StreamRouter {
    /// Create a router reading from `upstream`, with an in-memory checkpoint store
    pub fn new(config: RouterConfig, upstream: Arc<dyn UpstreamSource>) -> Self {
        Self {
            config,
            upstream,
            store: Arc::new(MemoryCheckpointStore::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Persist committed checkpoints to `store`
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = store;
        self
    }

    /// Stop the router when `cancel` fires
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Spawn the control task and return its client
    ///
    /// Must be called within a tokio runtime.
    pub fn spawn(self) -> RouterClient {
        let (requests, rx) = mpsc::channel(self.config.control_channel_size.max(1));
        let (notices, _) = broadcast::channel(self.config.notice_capacity.max(1));
        let metrics = Arc::new(RouterMetrics::new());

        let ctx = Arc::new(WorkerContext::new(
            self.store,
            Arc::clone(&metrics),
            notices.clone(),
            self.config.batch_size,
            self.config.flush_interval,
        ));
        let client = RouterClient::new(requests, notices, metrics, self.config.request_timeout);

        let core = RouterCore {
            config: self.config,
            upstream: self.upstream,
            ctx,
            topics: BTreeMap::new(),
            workers: BTreeMap::new(),
            last_closed: BTreeMap::new(),
            registry: EndpointRegistry::new(),
            cancel: self.cancel,
        };
        tokio::spawn(core.run(rx));
        client
    }
}

/// Endpoint reference held by a topic destination
struct HeldEndpoint {
    key: String,
    endpoint: Arc<TransportEndpoint>,
}

struct TopicEntry {
    state: TopicState,
    topology: Topology,
    table: FilterTable,
    /// Watched collections per partition
    partitions: BTreeMap<PartitionId, BTreeSet<CollectionId>>,
    /// By destination name
    endpoints: BTreeMap<String, HeldEndpoint>,
}

impl TopicEntry {
    fn new() -> Self {
        Self {
            state: TopicState::Starting,
            topology: Topology::new(),
            table: FilterTable::new(),
            partitions: BTreeMap::new(),
            endpoints: BTreeMap::new(),
        }
    }

    fn is_active(&self) -> bool {
        self.state == TopicState::Active
    }

    fn route(&self, topic: &TopicId) -> TopicRoute {
        let mut endpoints: Vec<Option<Arc<TransportEndpoint>>> = Vec::new();
        let mut holders = Vec::with_capacity(self.endpoints.len());
        for (name, held) in &self.endpoints {
            holders.push((name.clone(), Arc::clone(&held.endpoint)));
            if let Some(id) = self.table.destination_id(name) {
                let index = id.as_usize();
                if endpoints.len() <= index {
                    endpoints.resize(index + 1, None);
                }
                endpoints[index] = Some(Arc::clone(&held.endpoint));
            }
        }

        TopicRoute {
            topic: topic.clone(),
            filters: self.table.snapshot(),
            endpoints,
            holders,
            interest: self
                .partitions
                .iter()
                .map(|(partition, collections)| (*partition, collections.iter().cloned().collect()))
                .collect(),
        }
    }

    fn status(&self, topic: &TopicId) -> TopicStatus {
        TopicStatus {
            topic: topic.clone(),
            state: self.state,
            filters: self.table.filters(),
            partitions: self
                .partitions
                .iter()
                .map(|(partition, collections)| {
                    (*partition, collections.iter().map(|c| c.as_str().to_owned()).collect())
                })
                .collect(),
            destinations: self.endpoints.keys().cloned().collect(),
        }
    }
}

/// Stream opened by `prepare`, handed to a worker by `commit`
struct OpenedStream {
    partition: PartitionId,
    from: Checkpoint,
    stream: Box<dyn PartitionStream>,
}

/// Validated start/add request
struct Plan {
    topic: TopicId,
    topology: Topology,
    filters: Vec<Filter>,
    /// Partitions whose interest set gains the filters' collections
    partitions: Vec<PartitionId>,
    opened: Vec<OpenedStream>,
}

struct RouterCore {
    config: RouterConfig,
    upstream: Arc<dyn UpstreamSource>,
    ctx: Arc<WorkerContext>,
    topics: BTreeMap<TopicId, TopicEntry>,
    workers: BTreeMap<PartitionId, WorkerHandle>,
    /// Committed checkpoint of partitions whose worker stopped
    last_closed: BTreeMap<PartitionId, Checkpoint>,
    registry: EndpointRegistry,
    cancel: CancellationToken,
}

impl RouterCore {
    async fn run(mut self, mut requests: mpsc::Receiver<ControlRequest>) {
        tracing::info!(
            partition_count = self.config.partition_count,
            max_partitions = self.config.max_partitions,
            "stream router started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                request = requests.recv() => match request {
                    Some(ControlRequest::Shutdown { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        return;
                    }
                    Some(request) => self.handle(request).await,
                    None => break,
                },
            }
        }

        self.shutdown().await;
    }

    async fn handle(&mut self, request: ControlRequest) {
        self.reap_workers();

        match request {
            ControlRequest::StartTopic {
                topic,
                topology,
                filters,
                checkpoints,
                reply,
            } => {
                let result = self.start_topic(topic, topology, filters, checkpoints).await;
                let _ = reply.send(result);
            }
            ControlRequest::AddCollections {
                topic,
                filters,
                topology,
                checkpoints,
                reply,
            } => {
                let result = self.add_collections(topic, filters, topology, checkpoints).await;
                let _ = reply.send(result);
            }
            ControlRequest::DelCollections {
                topic,
                collections,
                reply,
            } => {
                let result = self.del_collections(topic, collections).await;
                let _ = reply.send(result);
            }
            ControlRequest::StopTopic { topic, reply } => {
                let result = self.stop_topic(topic).await;
                let _ = reply.send(result);
            }
            ControlRequest::QueryRestartCheckpoints { partitions, reply } => {
                let result = self.query_restart_checkpoints(partitions).await;
                let _ = reply.send(result);
            }
            ControlRequest::TopicStatus { topic, reply } => {
                let status = self.topics.get(&topic).map(|entry| entry.status(&topic));
                let _ = reply.send(status);
            }
            ControlRequest::PartitionState { partition, reply } => {
                let _ = reply.send(self.partition_state(partition));
            }
            ControlRequest::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            // handled by the run loop
            ControlRequest::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    async fn start_topic(
        &mut self,
        topic: TopicId,
        topology: Topology,
        filters: Vec<Filter>,
        checkpoints: CheckpointMap,
    ) -> Result<()> {
        if self.topics.get(&topic).is_some_and(TopicEntry::is_active) {
            tracing::debug!(%topic, "topic already active, merging");
            return self
                .add_collections(topic, filters, topology, checkpoints)
                .await
                .map(|_| ());
        }

        let entry = TopicEntry::new();
        let plan = self
            .prepare(&topic, &entry, filters, &topology, &checkpoints)
            .await?;
        let opened = plan.opened.len();

        // A stopped entry is replaced by the fresh one
        self.topics.insert(topic.clone(), entry);
        self.commit(plan).await?;

        tracing::info!(%topic, partitions = checkpoints.len(), opened, "topic started");
        Ok(())
    }

    async fn add_collections(
        &mut self,
        topic: TopicId,
        filters: Vec<Filter>,
        topology: Topology,
        checkpoints: CheckpointMap,
    ) -> Result<Vec<Filter>> {
        let entry = self
            .topics
            .get(&topic)
            .filter(|entry| entry.is_active())
            .ok_or_else(|| RouterError::UnknownTopic(topic.clone()))?;
        let plan = self
            .prepare(&topic, entry, filters, &topology, &checkpoints)
            .await?;
        let added = plan.filters.len();

        let filters = self.commit(plan).await?;
        tracing::info!(%topic, added, filters = filters.len(), "collections added");
        Ok(filters)
    }

    /// Run every fallible step of a start/add without changing state
    async fn prepare(
        &self,
        topic: &TopicId,
        entry: &TopicEntry,
        filters: Vec<Filter>,
        additions: &Topology,
        checkpoints: &CheckpointMap,
    ) -> Result<Plan> {
        let mut topology = entry.topology.clone();
        topology.merge(additions)?;
        topology.validate()?;
        topology.require(
            filters
                .iter()
                .flat_map(|f| f.destinations.iter().map(String::as_str)),
        )?;
        for name in filters.iter().flat_map(|f| f.destinations.iter()) {
            if entry.endpoints.contains_key(name) {
                continue;
            }
            if let Some(config) = topology.get(name) {
                self.registry.check(name, config)?;
            }
        }
        entry.table.check_filters(&filters)?;

        let partitions: Vec<PartitionId> = if checkpoints.is_empty() {
            entry.partitions.keys().copied().collect()
        } else {
            checkpoints.keys().copied().collect()
        };
        for &partition in &partitions {
            if partition.get() >= self.config.partition_count {
                return Err(RouterError::UnknownPartition {
                    partition,
                    partition_count: self.config.partition_count,
                });
            }
        }

        let mut wanted = Vec::new();
        for &partition in &partitions {
            let supplied = checkpoints
                .get(&partition)
                .map(|cp| Checkpoint::new(partition, cp.epoch, cp.seqno));
            match self.workers.get(&partition) {
                Some(handle) if handle.is_running() => {
                    if handle.status().state == PartitionState::Paused
                        && let Some(from) = supplied
                    {
                        wanted.push((partition, from));
                    }
                }
                _ => {
                    let from = match supplied {
                        Some(from) => from,
                        None => self.resume_checkpoint(partition).await?,
                    };
                    wanted.push((partition, from));
                }
            }
        }

        let running = self.running_workers();
        let spawning = wanted
            .iter()
            .filter(|(partition, _)| !self.is_running(*partition))
            .count();
        if running + spawning > self.config.max_partitions {
            return Err(RouterError::ResourceExhausted {
                requested: running + spawning,
                limit: self.config.max_partitions,
            });
        }

        let mut opened = Vec::with_capacity(wanted.len());
        for (partition, from) in wanted {
            let stream = self
                .upstream
                .open_stream(partition, from)
                .await
                .inspect_err(|e| tracing::warn!(%topic, %partition, error = %e, "failed to open partition"))?;
            opened.push(OpenedStream {
                partition,
                from,
                stream,
            });
        }

        Ok(Plan {
            topic: topic.clone(),
            topology,
            filters,
            partitions,
            opened,
        })
    }

    /// Apply a prepared plan; returns the topic's filters
    async fn commit(&mut self, plan: Plan) -> Result<Vec<Filter>> {
        let entry = self
            .topics
            .get_mut(&plan.topic)
            .ok_or_else(|| RouterError::UnknownTopic(plan.topic.clone()))?;

        entry.table.add_filters(&plan.filters)?;
        entry.topology = plan.topology;
        for partition in &plan.partitions {
            entry
                .partitions
                .entry(*partition)
                .or_default()
                .extend(plan.filters.iter().map(|f| f.collection.clone()));
        }
        entry.state = TopicState::Active;
        let filters = entry.table.filters();
        let released = sync_endpoints(&mut self.registry, &plan.topic, entry);

        self.publish();
        self.close_endpoints(released).await;

        for opened in plan.opened {
            self.open_worker(opened).await;
        }
        Ok(filters)
    }

    async fn del_collections(&mut self, topic: TopicId, collections: Vec<CollectionId>) -> Result<()> {
        let Some(entry) = self.topics.get_mut(&topic).filter(|entry| entry.is_active()) else {
            tracing::debug!(%topic, "del_collections on inactive topic ignored");
            return Ok(());
        };

        let removed = entry.table.remove_filters(&collections);
        let affected: Vec<PartitionId> = entry.partitions.keys().copied().collect();
        let mut emptied = Vec::new();
        entry.partitions.retain(|partition, watched| {
            for collection in &collections {
                watched.remove(collection);
            }
            if watched.is_empty() {
                emptied.push(*partition);
                return false;
            }
            true
        });
        let released = sync_endpoints(&mut self.registry, &topic, entry);

        self.publish();
        if !released.is_empty() {
            self.flush_workers(&affected).await;
        }
        self.close_endpoints(released).await;
        self.close_unreferenced_workers(&emptied).await;

        tracing::info!(%topic, removed, partitions_left = affected.len() - emptied.len(), "collections removed");
        Ok(())
    }

    async fn stop_topic(&mut self, topic: TopicId) -> Result<()> {
        let Some(entry) = self.topics.get_mut(&topic).filter(|entry| entry.is_active()) else {
            tracing::debug!(%topic, "stop_topic on inactive topic ignored");
            return Ok(());
        };

        entry.state = TopicState::Draining;
        let partitions: Vec<PartitionId> = std::mem::take(&mut entry.partitions).into_keys().collect();
        let held = std::mem::take(&mut entry.endpoints);
        tracing::info!(%topic, partitions = partitions.len(), "topic draining");

        self.publish();
        self.flush_workers(&partitions).await;

        let released: Vec<Arc<TransportEndpoint>> = held
            .into_iter()
            .filter_map(|(name, held)| self.registry.release(&topic, &name, &held.key))
            .collect();
        self.close_endpoints(released).await;
        self.close_unreferenced_workers(&partitions).await;

        if let Some(entry) = self.topics.get_mut(&topic) {
            entry.state = TopicState::Stopped;
        }
        tracing::info!(%topic, "topic stopped");
        Ok(())
    }

    async fn query_restart_checkpoints(&self, partitions: Vec<PartitionId>) -> Result<CheckpointMap> {
        let mut checkpoints = CheckpointMap::new();
        for partition in partitions {
            if partition.get() >= self.config.partition_count {
                return Err(RouterError::UnknownPartition {
                    partition,
                    partition_count: self.config.partition_count,
                });
            }

            let checkpoint = match self.workers.get(&partition) {
                Some(handle) if handle.is_running() => handle.status().committed,
                _ => match self.known_checkpoint(partition).await? {
                    Some(checkpoint) => checkpoint,
                    None => match self.upstream.latest_checkpoint(partition).await {
                        Ok(latest) => latest.unwrap_or(Checkpoint::beginning(partition)),
                        Err(e) => {
                            tracing::debug!(%partition, error = %e, "no upstream position");
                            Checkpoint::beginning(partition)
                        }
                    },
                },
            };
            checkpoints.insert(partition, checkpoint);
        }
        Ok(checkpoints)
    }

    fn partition_state(&self, partition: PartitionId) -> Option<PartitionStatus> {
        if let Some(handle) = self.workers.get(&partition) {
            return Some(handle.status());
        }
        self.last_closed.get(&partition).map(|committed| PartitionStatus {
            partition,
            state: PartitionState::Closed,
            position: *committed,
            committed: *committed,
        })
    }

    fn stats(&self) -> RouterStats {
        let mut partitions_streaming = 0;
        let mut partitions_paused = 0;
        for handle in self.workers.values().filter(|h| h.is_running()) {
            match handle.status().state {
                PartitionState::Opening | PartitionState::Streaming => partitions_streaming += 1,
                PartitionState::Paused => partitions_paused += 1,
                PartitionState::Closed => {}
            }
        }

        RouterStats {
            topics_active: self.topics.values().filter(|e| e.is_active()).count(),
            partitions_streaming,
            partitions_paused,
            endpoints: self.registry.len(),
            metrics: self.ctx.metrics.snapshot(),
        }
    }

    /// Flush and stop every worker, then drain every endpoint
    async fn shutdown(&mut self) {
        tracing::info!(workers = self.workers.len(), "stream router shutting down");

        let workers = std::mem::take(&mut self.workers);
        for (partition, handle) in workers {
            let committed = handle.close().await;
            self.last_closed.insert(partition, committed);
        }
        for entry in self.topics.values_mut() {
            if entry.is_active() {
                entry.state = TopicState::Stopped;
                entry.endpoints.clear();
            }
        }
        self.publish();

        let endpoints = self.registry.drain();
        self.close_endpoints(endpoints).await;
        tracing::info!("stream router stopped");
    }

    /// Spawn a worker for an opened stream, or reopen a paused one
    async fn open_worker(&mut self, opened: OpenedStream) {
        let OpenedStream {
            partition,
            from,
            stream,
        } = opened;

        if let Some(handle) = self.workers.get(&partition)
            && handle.is_running()
        {
            if !handle.reopen(stream, from).await {
                tracing::warn!(%partition, "worker stopped before it could be reopened");
            }
            return;
        }

        let handle = WorkerHandle::spawn(
            Arc::clone(&self.ctx),
            stream,
            from,
            self.config.worker_channel_size,
            self.cancel.child_token(),
        );
        self.workers.insert(partition, handle);
        self.last_closed.remove(&partition);
    }

    async fn flush_workers(&self, partitions: &[PartitionId]) {
        for partition in partitions {
            if let Some(handle) = self.workers.get(partition)
                && handle.flush().await.is_none()
            {
                tracing::debug!(%partition, "worker gone before flush");
            }
        }
    }

    /// Close workers of `partitions` that no active topic watches anymore
    async fn close_unreferenced_workers(&mut self, partitions: &[PartitionId]) {
        let referenced: HashSet<PartitionId> = self
            .topics
            .values()
            .filter(|entry| entry.is_active())
            .flat_map(|entry| entry.partitions.keys().copied())
            .collect();

        for partition in partitions {
            if referenced.contains(partition) {
                continue;
            }
            if let Some(handle) = self.workers.remove(partition) {
                let committed = handle.close().await;
                self.last_closed.insert(*partition, committed);
            }
        }
    }

    async fn close_endpoints(&self, endpoints: Vec<Arc<TransportEndpoint>>) {
        for endpoint in endpoints {
            tracing::debug!(destination = %endpoint.name(), address = %endpoint.address(), "last reference released");
            endpoint.close(CloseMode::Drain).await;
            self.ctx.forget_endpoint(endpoint.address());
        }
    }

    /// Publish the routing state of every active topic
    fn publish(&self) {
        let topics = self
            .topics
            .iter()
            .filter(|(_, entry)| entry.is_active())
            .map(|(topic, entry)| entry.route(topic))
            .collect();
        self.ctx.routes.store(Arc::new(RouteSnapshot { topics }));
    }

    /// Drop handles of workers that stopped on their own
    fn reap_workers(&mut self) {
        let finished: Vec<PartitionId> = self
            .workers
            .iter()
            .filter(|(_, handle)| !handle.is_running())
            .map(|(partition, _)| *partition)
            .collect();
        for partition in finished {
            if let Some(handle) = self.workers.remove(&partition) {
                let status = handle.status();
                tracing::debug!(%partition, committed = %status.committed, "reaped stopped worker");
                self.last_closed.insert(partition, status.committed);
            }
        }
    }

    fn is_running(&self, partition: PartitionId) -> bool {
        self.workers.get(&partition).is_some_and(WorkerHandle::is_running)
    }

    fn running_workers(&self) -> usize {
        self.workers.values().filter(|h| h.is_running()).count()
    }

    /// Where a partition resumes when no checkpoint is supplied
    async fn resume_checkpoint(&self, partition: PartitionId) -> Result<Checkpoint> {
        Ok(self
            .known_checkpoint(partition)
            .await?
            .unwrap_or(Checkpoint::beginning(partition)))
    }

    /// Last committed checkpoint of a stopped worker, else the persisted one
    async fn known_checkpoint(&self, partition: PartitionId) -> Result<Option<Checkpoint>> {
        if let Some(checkpoint) = self.last_closed.get(&partition) {
            return Ok(Some(*checkpoint));
        }
        Ok(self.ctx.store.load(partition).await?)
    }
}

/// Match a topic's endpoint references to the destinations its filters use
///
/// Returns endpoints whose last reference was released.
fn sync_endpoints(
    registry: &mut EndpointRegistry,
    topic: &TopicId,
    entry: &mut TopicEntry,
) -> Vec<Arc<TransportEndpoint>> {
    let wanted: BTreeSet<String> = entry
        .table
        .filters()
        .into_iter()
        .flat_map(|f| f.destinations)
        .collect();

    let mut released = Vec::new();
    entry.endpoints.retain(|name, held| {
        if wanted.contains(name) {
            return true;
        }
        if let Some(endpoint) = registry.release(topic, name, &held.key) {
            released.push(endpoint);
        }
        false
    });

    for name in wanted {
        if entry.endpoints.contains_key(&name) {
            continue;
        }
        let Some(config) = entry.topology.get(&name) else {
            continue;
        };
        let endpoint = registry.acquire(topic, &name, config);
        let key = config.endpoint_key().to_owned();
        entry.endpoints.insert(name, HeldEndpoint { key, endpoint });
    }
    released
}
