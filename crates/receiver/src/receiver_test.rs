//! Tests for the receiver against raw protocol clients

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use feedline_config::ReceiverConfig;
use feedline_protocol::{
    Checkpoint, Event, EventBatch, EventKind, Frame, FrameDecoder, PartitionId, SenderStats,
    TopicId,
};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{BatchHandler, Receiver, ReceiverMetrics, ReceiverStats};

struct Running {
    addr: SocketAddr,
    metrics: Arc<ReceiverMetrics>,
    stats: watch::Receiver<ReceiverStats>,
    cancel: CancellationToken,
    task: JoinHandle<crate::Result<()>>,
}

fn test_config() -> ReceiverConfig {
    ReceiverConfig {
        address: "127.0.0.1".into(),
        port: 0,
        stats_interval: Duration::from_millis(20),
        ..Default::default()
    }
}

async fn start(config: ReceiverConfig, handler: impl BatchHandler) -> Running {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("failed to bind");
    let addr = listener.local_addr().expect("failed to get addr");
    let receiver = Receiver::new(config, handler);
    let metrics = receiver.metrics();
    let stats = receiver.stats();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(receiver.serve(listener, cancel.clone()));
    Running {
        addr,
        metrics,
        stats,
        cancel,
        task,
    }
}

fn batch(seqnos: std::ops::RangeInclusive<u64>) -> EventBatch {
    let events = seqnos
        .map(|seqno| {
            Event::new(
                Checkpoint::new(PartitionId::new(0), 1, seqno),
                "A",
                EventKind::Insert,
                format!("k{seqno}"),
                "v",
            )
        })
        .collect();
    EventBatch::new(TopicId::new("t1"), events)
}

async fn write_frame(stream: &mut TcpStream, frame: Frame) {
    let bytes = frame.to_bytes().expect("encode");
    stream.write_all(&bytes).await.expect("write");
}

async fn read_reply(stream: &mut TcpStream, buf: &mut BytesMut) -> Option<Frame> {
    let decoder = FrameDecoder::new();
    loop {
        if let Some(frame) = decoder.decode(buf).expect("decode reply") {
            return Some(frame);
        }
        let read = tokio::time::timeout(Duration::from_secs(5), stream.read_buf(buf))
            .await
            .expect("timed out waiting for reply");
        match read {
            Ok(0) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

// =============================================================================
// Acks and nacks
// =============================================================================

#[tokio::test]
async fn test_accepted_batch_is_acked() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let handler = {
        let seen = Arc::clone(&seen);
        move |source: SocketAddr, batch: &EventBatch| {
            seen.lock().push((source, batch.clone()));
            true
        }
    };
    let running = start(test_config(), handler).await;

    let mut stream = TcpStream::connect(running.addr).await.unwrap();
    let local = stream.local_addr().unwrap();
    let mut buf = BytesMut::new();
    write_frame(&mut stream, Frame::Batch { batch_id: 7, batch: batch(1..=5) }).await;

    assert_eq!(read_reply(&mut stream, &mut buf).await, Some(Frame::Ack(7)));

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, local);
    let seqnos: Vec<u64> = seen[0].1.events().iter().map(|e| e.seqno()).collect();
    assert_eq!(seqnos, vec![1, 2, 3, 4, 5]);

    let stats = running.metrics.snapshot(Default::default());
    assert_eq!(stats.batches_acked, 1);
    assert_eq!(stats.events_received, 5);
}

#[tokio::test]
async fn test_rejected_batch_is_nacked() {
    let running = start(test_config(), |_: SocketAddr, _: &EventBatch| false).await;

    let mut stream = TcpStream::connect(running.addr).await.unwrap();
    let mut buf = BytesMut::new();
    write_frame(&mut stream, Frame::Batch { batch_id: 1, batch: batch(1..=2) }).await;
    write_frame(&mut stream, Frame::Batch { batch_id: 2, batch: batch(3..=3) }).await;

    assert_eq!(read_reply(&mut stream, &mut buf).await, Some(Frame::Nack(1)));
    assert_eq!(read_reply(&mut stream, &mut buf).await, Some(Frame::Nack(2)));
    assert_eq!(running.metrics.snapshot(Default::default()).batches_nacked, 2);
}

#[tokio::test]
async fn test_handler_called_once_per_batch() {
    let calls = Arc::new(AtomicUsize::new(0));
    let handler = {
        let calls = Arc::clone(&calls);
        move |_: SocketAddr, _: &EventBatch| calls.fetch_add(1, Ordering::SeqCst) % 2 == 0
    };
    let running = start(test_config(), handler).await;

    let mut stream = TcpStream::connect(running.addr).await.unwrap();
    let mut buf = BytesMut::new();
    for id in 1..=4 {
        write_frame(&mut stream, Frame::Batch { batch_id: id, batch: batch(id..=id) }).await;
    }

    let mut replies = Vec::new();
    for _ in 0..4 {
        replies.push(read_reply(&mut stream, &mut buf).await.unwrap());
    }
    assert_eq!(
        replies,
        vec![Frame::Ack(1), Frame::Nack(2), Frame::Ack(3), Frame::Nack(4)]
    );
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

// =============================================================================
// Malformed input
// =============================================================================

#[tokio::test]
async fn test_malformed_batch_nacked_and_connection_continues() {
    let running = start(test_config(), |_: SocketAddr, _: &EventBatch| true).await;
    let mut stream = TcpStream::connect(running.addr).await.unwrap();
    let mut buf = BytesMut::new();

    // Batch 9 claims one event but carries none
    let mut body = BytesMut::new();
    body.put_u8(1);
    body.put_u64(9);
    body.put_u16(2);
    body.put_slice(b"t1");
    body.put_u32(1);
    let mut raw = BytesMut::new();
    raw.put_u32(body.len() as u32);
    raw.extend_from_slice(&body);
    stream.write_all(&raw).await.unwrap();

    assert_eq!(read_reply(&mut stream, &mut buf).await, Some(Frame::Nack(9)));

    write_frame(&mut stream, Frame::Batch { batch_id: 10, batch: batch(1..=1) }).await;
    assert_eq!(read_reply(&mut stream, &mut buf).await, Some(Frame::Ack(10)));

    let stats = running.metrics.snapshot(Default::default());
    assert_eq!(stats.frames_malformed, 1);
    assert_eq!(stats.batches_nacked, 1);
    assert_eq!(stats.batches_acked, 1);
}

#[tokio::test]
async fn test_oversized_frame_closes_connection() {
    let running = start(test_config(), |_: SocketAddr, _: &EventBatch| true).await;
    let mut stream = TcpStream::connect(running.addr).await.unwrap();
    let mut buf = BytesMut::new();

    stream.write_all(&u32::MAX.to_be_bytes()).await.unwrap();
    assert_eq!(read_reply(&mut stream, &mut buf).await, None);
    assert_eq!(running.metrics.snapshot(Default::default()).frames_malformed, 1);
}

// =============================================================================
// Keep-alive and idle detection
// =============================================================================

#[tokio::test]
async fn test_keepalive_records_sender_stats() {
    let mut running = start(test_config(), |_: SocketAddr, _: &EventBatch| true).await;
    let mut stream = TcpStream::connect(running.addr).await.unwrap();
    let local = stream.local_addr().unwrap();

    let reported = SenderStats {
        batches_sent: 4,
        events_sent: 40,
        bytes_sent: 4000,
        queue_depth: 1,
    };
    write_frame(&mut stream, Frame::KeepAlive(reported)).await;

    let stats = tokio::time::timeout(
        Duration::from_secs(5),
        running.stats.wait_for(|s| s.senders.contains_key(&local)),
    )
    .await
    .expect("keep-alive never published")
    .expect("stats channel closed")
    .clone();
    assert_eq!(stats.senders[&local], reported);
    assert_eq!(stats.keepalives_received, 1);

    drop(stream);
    tokio::time::timeout(
        Duration::from_secs(5),
        running.stats.wait_for(|s| s.senders.is_empty() && s.connections_active == 0),
    )
    .await
    .expect("sender never removed")
    .expect("stats channel closed");
}

#[tokio::test]
async fn test_silent_sender_is_disconnected() {
    let config = ReceiverConfig {
        idle_timeout: Duration::from_millis(100),
        ..test_config()
    };
    let running = start(config, |_: SocketAddr, _: &EventBatch| true).await;
    let mut stream = TcpStream::connect(running.addr).await.unwrap();
    let mut buf = BytesMut::new();

    assert_eq!(read_reply(&mut stream, &mut buf).await, None);
    assert_eq!(running.metrics.snapshot(Default::default()).idle_disconnects, 1);
}

#[tokio::test]
async fn test_keepalives_hold_connection_open() {
    let config = ReceiverConfig {
        idle_timeout: Duration::from_millis(200),
        ..test_config()
    };
    let running = start(config, |_: SocketAddr, _: &EventBatch| true).await;
    let mut stream = TcpStream::connect(running.addr).await.unwrap();
    let mut buf = BytesMut::new();

    for _ in 0..6 {
        write_frame(&mut stream, Frame::KeepAlive(SenderStats::default())).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    write_frame(&mut stream, Frame::Batch { batch_id: 1, batch: batch(1..=1) }).await;
    assert_eq!(read_reply(&mut stream, &mut buf).await, Some(Frame::Ack(1)));
    assert_eq!(running.metrics.snapshot(Default::default()).idle_disconnects, 0);
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_cancel_stops_receiver() {
    let running = start(test_config(), |_: SocketAddr, _: &EventBatch| true).await;
    let mut stream = TcpStream::connect(running.addr).await.unwrap();
    let mut buf = BytesMut::new();

    running.cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), running.task)
        .await
        .expect("receiver did not stop")
        .unwrap()
        .unwrap();

    // Open connections are closed too
    assert_eq!(read_reply(&mut stream, &mut buf).await, None);
}

#[tokio::test]
async fn test_bind_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let config = ReceiverConfig {
        port,
        ..test_config()
    };

    let receiver = Receiver::new(config, |_: SocketAddr, _: &EventBatch| true);
    let err = receiver.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, crate::ReceiverError::Bind { .. }));
}
