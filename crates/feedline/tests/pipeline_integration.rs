//! End-to-end tests: configuration → router → endpoints → receivers
//!
//! Tests: config-driven delivery with file checkpoints, nack-driven dead
//! endpoints, keep-alive statistics

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use feedline::protocol::checkpoint_map;
use feedline::receiver::ReceiverMetrics;
use feedline::router::{CheckpointStore, FileCheckpointStore};
use feedline::{
    Checkpoint, Config, Event, EventBatch, EventKind, Filter, MemoryUpstream, PartitionId,
    Receiver, ReceiverStats, RouterNotice, spawn_router,
};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

struct Downstream {
    addr: SocketAddr,
    events: Arc<Mutex<Vec<Event>>>,
    metrics: Arc<ReceiverMetrics>,
    stats: watch::Receiver<ReceiverStats>,
    cancel: CancellationToken,
}

impl Downstream {
    async fn start(config: &Config, accept: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));

        let recorder = Arc::clone(&events);
        let receiver = Receiver::new(config.receiver.clone(), move |_: SocketAddr, batch: &EventBatch| {
            if accept {
                recorder.lock().extend(batch.events().iter().cloned());
            }
            accept
        });
        let metrics = receiver.metrics();
        let stats = receiver.stats();
        let cancel = CancellationToken::new();
        tokio::spawn(receiver.serve(listener, cancel.clone()));

        Self {
            addr,
            events,
            metrics,
            stats,
            cancel,
        }
    }

    fn seqnos(&self, partition: PartitionId) -> Vec<u64> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.partition() == partition)
            .map(Event::seqno)
            .collect()
    }

    async fn wait_for(&self, count: usize) {
        eventually(|| self.events.lock().len() >= count).await;
    }
}

impl Drop for Downstream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn base_config() -> Config {
    Config::from_str(
        r#"
[router]
batch_size = 2
flush_interval = "10ms"
request_timeout = "5s"

[receiver]
address = "127.0.0.1"
port = 0
stats_interval = "20ms"
"#,
    )
    .unwrap()
}

fn p(id: u16) -> PartitionId {
    PartitionId::new(id)
}

// =============================================================================
// Delivery
// =============================================================================

#[tokio::test]
async fn test_config_driven_delivery_with_file_checkpoints() {
    let dir = tempfile::tempdir().unwrap();
    let checkpoints = dir.path().join("checkpoints.json");
    let receiver_config = base_config();
    let orders = Downstream::start(&receiver_config, true).await;
    let audit = Downstream::start(&receiver_config, true).await;

    let config = Config::from_str(&format!(
        r#"
[router]
batch_size = 2
flush_interval = "10ms"
request_timeout = "5s"

[checkpoint]
type = "file"
path = "{}"

[topology.orders]
type = "tcp"
address = "{}"

[topology.audit]
type = "tcp"
address = "{}"
"#,
        checkpoints.display(),
        orders.addr,
        audit.addr
    ))
    .unwrap();

    let upstream = Arc::new(MemoryUpstream::new([p(0), p(1)], 1));
    let cancel = CancellationToken::new();
    let client = spawn_router(&config, upstream.clone(), cancel.clone()).unwrap();

    client
        .start_topic(
            "shop",
            config.topology.clone(),
            vec![
                Filter::new("order", ["orders", "audit"]),
                Filter::new("refund", ["audit"]),
            ],
            checkpoint_map([Checkpoint::new(p(0), 1, 0), Checkpoint::new(p(1), 1, 0)]),
        )
        .await
        .unwrap();

    for i in 0..5u16 {
        let partition = p(i % 2);
        upstream
            .emit(partition, "order", EventKind::Insert, format!("o{i}"), "{}")
            .unwrap();
        upstream
            .emit(partition, "refund", EventKind::Insert, format!("r{i}"), "{}")
            .unwrap();
    }

    orders.wait_for(5).await;
    audit.wait_for(10).await;

    // per-partition order survives batching
    assert_eq!(orders.seqnos(p(0)), vec![1, 3, 5]);
    assert_eq!(orders.seqnos(p(1)), vec![1, 3]);
    assert_eq!(audit.seqnos(p(0)), vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(audit.seqnos(p(1)), vec![1, 2, 3, 4]);

    let mut stats = audit.stats.clone();
    tokio::time::timeout(WAIT, stats.wait_for(|s| s.events_received >= 10))
        .await
        .expect("stats not published")
        .unwrap();
    assert!(audit.metrics.snapshot(Default::default()).batches_acked >= 5);

    client.shutdown().await.unwrap();

    let store = FileCheckpointStore::open(&checkpoints).unwrap();
    assert_eq!(store.load(p(0)).await.unwrap(), Some(Checkpoint::new(p(0), 1, 6)));
    assert_eq!(store.load(p(1)).await.unwrap(), Some(Checkpoint::new(p(1), 1, 4)));
}

// =============================================================================
// Failure handling
// =============================================================================

#[tokio::test]
async fn test_nacking_receiver_marks_endpoint_dead() {
    let receiver_config = base_config();
    let rejecting = Downstream::start(&receiver_config, false).await;
    let healthy = Downstream::start(&receiver_config, true).await;

    let config = Config::from_str(&format!(
        r#"
[router]
flush_interval = "10ms"
request_timeout = "5s"

[topology.rejecting]
type = "tcp"
address = "{}"
retry_attempts = 2
retry_interval = "1ms"
max_backoff = "5ms"

[topology.healthy]
type = "tcp"
address = "{}"
"#,
        rejecting.addr, healthy.addr
    ))
    .unwrap();

    let upstream = Arc::new(MemoryUpstream::new([p(0)], 1));
    let client = spawn_router(&config, upstream.clone(), CancellationToken::new()).unwrap();
    let mut notices = client.subscribe_notices();

    client
        .start_topic(
            "t1",
            config.topology.clone(),
            vec![Filter::new("A", ["rejecting", "healthy"])],
            checkpoint_map([Checkpoint::new(p(0), 1, 0)]),
        )
        .await
        .unwrap();
    upstream.emit(p(0), "A", EventKind::Insert, "k1", "v").unwrap();

    let notice = tokio::time::timeout(WAIT, async {
        loop {
            match notices.recv().await.unwrap() {
                notice @ RouterNotice::EndpointDead { .. } => return notice,
                _ => continue,
            }
        }
    })
    .await
    .expect("no dead endpoint notice");
    assert_eq!(
        notice,
        RouterNotice::EndpointDead {
            destinations: vec!["rejecting".into()],
            address: rejecting.addr.to_string(),
        }
    );
    assert_eq!(rejecting.metrics.snapshot(Default::default()).batches_nacked, 2);

    // the healthy destination keeps receiving
    upstream.emit(p(0), "A", EventKind::Insert, "k2", "v").unwrap();
    healthy.wait_for(2).await;
    assert_eq!(healthy.seqnos(p(0)), vec![1, 2]);
    assert!(rejecting.events.lock().is_empty());

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_receiver_sees_sender_keepalives() {
    let receiver_config = base_config();
    let downstream = Downstream::start(&receiver_config, true).await;

    let config = Config::from_str(&format!(
        r#"
[router]
flush_interval = "10ms"

[topology.d]
type = "tcp"
address = "{}"
keepalive_interval = "20ms"
"#,
        downstream.addr
    ))
    .unwrap();

    let upstream = Arc::new(MemoryUpstream::new([p(0)], 1));
    let client = spawn_router(&config, upstream.clone(), CancellationToken::new()).unwrap();
    client
        .start_topic(
            "t1",
            config.topology.clone(),
            vec![Filter::new("A", ["d"])],
            checkpoint_map([Checkpoint::new(p(0), 1, 0)]),
        )
        .await
        .unwrap();
    upstream.emit(p(0), "A", EventKind::Insert, "k1", "v").unwrap();
    downstream.wait_for(1).await;

    let mut stats = downstream.stats.clone();
    let reported = tokio::time::timeout(
        WAIT,
        stats.wait_for(|s| s.senders.values().any(|sender| sender.batches_sent >= 1)),
    )
    .await
    .expect("no keep-alive statistics")
    .unwrap()
    .clone();
    assert!(reported.keepalives_received >= 1);
    assert_eq!(reported.connections_active, 1);

    client.shutdown().await.unwrap();
}
