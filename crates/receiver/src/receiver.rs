//! TCP receiver for pushed event batches
//!
//! Each accepted connection gets its own task. Batches are decoded straight
//! out of the connection's `BytesMut` read buffer, handed to the installed
//! [`BatchHandler`] once, and answered with `Ack` or `Nack` in the order they
//! arrived.
//!
//! # Failure handling
//!
//! - Handler returns `false`: `Nack`, the sender retries
//! - Malformed batch with intact framing: `Nack`, the connection continues
//! - Oversized length prefix: framing is lost, the connection is closed
//! - No frames for `idle_timeout`: the sender is presumed dead and the
//!   connection is closed

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use feedline_config::ReceiverConfig;
use feedline_protocol::{EventBatch, Frame, FrameDecoder, ProtocolError, SenderStats};
use parking_lot::Mutex;
use socket2::SockRef;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::error::{ReceiverError, Result};
use crate::metrics::{ReceiverMetrics, ReceiverStats};

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Decides whether a received batch is accepted
///
/// Called once per decoded batch, on the connection's task. Returning
/// `false` nacks the batch so the sender retries it.
pub trait BatchHandler: Send + Sync + 'static {
    fn handle(&self, source: SocketAddr, batch: &EventBatch) -> bool;
}

impl<F> BatchHandler for F
where
    F: Fn(SocketAddr, &EventBatch) -> bool + Send + Sync + 'static,
{
    fn handle(&self, source: SocketAddr, batch: &EventBatch) -> bool {
        self(source, batch)
    }
}

/// Receiver application listening for transport endpoints
pub struct Receiver {
    config: ReceiverConfig,
    handler: Arc<dyn BatchHandler>,
    metrics: Arc<ReceiverMetrics>,
    /// Last keep-alive report per connected sender
    senders: Mutex<BTreeMap<SocketAddr, SenderStats>>,
    stats_tx: watch::Sender<ReceiverStats>,
}

impl Receiver {
    /// Create a receiver with the given batch handler
    pub fn new(config: ReceiverConfig, handler: impl BatchHandler) -> Self {
        let (stats_tx, _) = watch::channel(ReceiverStats::default());
        Self {
            config,
            handler: Arc::new(handler),
            metrics: Arc::new(ReceiverMetrics::new()),
            senders: Mutex::new(BTreeMap::new()),
            stats_tx,
        }
    }

    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    /// Shared counters; remain valid after `run()` consumes the receiver
    pub fn metrics(&self) -> Arc<ReceiverMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Subscribe to the periodic statistics snapshots
    pub fn stats(&self) -> watch::Receiver<ReceiverStats> {
        self.stats_tx.subscribe()
    }

    /// Current statistics, including the senders' last reports
    pub fn snapshot(&self) -> ReceiverStats {
        self.metrics.snapshot(self.senders.lock().clone())
    }

    /// Bind the configured address and serve until cancelled
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| ReceiverError::Bind {
                address: bind_addr.clone(),
                source: e,
            })?;
        self.serve(listener, cancel).await
    }

    /// Serve connections from an already bound listener until cancelled
    pub async fn serve(self, listener: TcpListener, cancel: CancellationToken) -> Result<()> {
        let local_addr = listener.local_addr()?;
        tracing::info!(
            address = %local_addr,
            idle_timeout_ms = self.config.idle_timeout.as_millis() as u64,
            "receiver listening"
        );

        let receiver = Arc::new(self);
        let stats_task = tokio::spawn(Arc::clone(&receiver).publish_stats(cancel.child_token()));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = listener.accept() => match result {
                    Ok((stream, peer)) => {
                        receiver.metrics.connection_opened();
                        let receiver = Arc::clone(&receiver);
                        let cancel = cancel.child_token();
                        tokio::spawn(async move {
                            tracing::debug!(peer = %peer, "sender connected");
                            match receiver.handle_connection(stream, peer, cancel).await {
                                Ok(()) => tracing::debug!(peer = %peer, "sender disconnected"),
                                Err(e) if e.is_disconnect() => {
                                    tracing::debug!(peer = %peer, "sender disconnected");
                                }
                                Err(ReceiverError::Idle { idle_ms }) => {
                                    tracing::warn!(peer = %peer, idle_ms, "dead sender, closing connection");
                                }
                                Err(e) => tracing::warn!(peer = %peer, error = %e, "connection error"),
                            }
                            receiver.senders.lock().remove(&peer);
                            receiver.metrics.connection_closed();
                        });
                    }
                    Err(e) => {
                        // Transient accept errors
                        tracing::warn!(error = %e, "accept error");
                    }
                },
            }
        }

        if let Err(e) = stats_task.await {
            tracing::warn!(error = %e, "stats task failed");
        }
        tracing::info!(address = %local_addr, "receiver stopped");
        Ok(())
    }

    async fn handle_connection(
        &self,
        mut stream: TcpStream,
        peer: SocketAddr,
        cancel: CancellationToken,
    ) -> Result<()> {
        self.configure_socket(&stream);

        let decoder = FrameDecoder::new();
        let mut buf = BytesMut::with_capacity(self.config.buffer_size);
        let mut replies = BytesMut::with_capacity(256);
        let mut last_seen = Instant::now();

        loop {
            // Answer every complete frame before reading more
            loop {
                match decoder.decode(&mut buf) {
                    Ok(Some(frame)) => {
                        last_seen = Instant::now();
                        if let Some(reply) = self.process_frame(frame, peer) {
                            reply.encode(&mut replies)?;
                        }
                    }
                    Ok(None) => break,
                    Err(e) if e.is_fatal() => {
                        self.metrics.frame_malformed(false);
                        return Err(e.into());
                    }
                    Err(ProtocolError::MalformedBatch { batch_id, reason }) => {
                        last_seen = Instant::now();
                        self.metrics.frame_malformed(true);
                        tracing::warn!(peer = %peer, batch_id, error = %reason, "malformed batch");
                        Frame::Nack(batch_id).encode(&mut replies)?;
                    }
                    Err(e) => {
                        self.metrics.frame_malformed(false);
                        tracing::debug!(peer = %peer, error = %e, "skipping malformed frame");
                    }
                }
            }

            if !replies.is_empty() {
                stream.write_all(&replies).await?;
                replies.clear();
            }

            let idle_timeout = self.config.idle_timeout;
            let idle = async move {
                if idle_timeout.is_zero() {
                    std::future::pending::<()>().await;
                }
                sleep_until(last_seen + idle_timeout).await;
            };

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = idle => {
                    self.metrics.idle_disconnect();
                    return Err(ReceiverError::Idle {
                        idle_ms: last_seen.elapsed().as_millis() as u64,
                    });
                }
                read = stream.read_buf(&mut buf) => match read? {
                    0 => return Ok(()),
                    n => self.metrics.bytes_read(n as u64),
                },
            }
        }
    }

    /// Apply one decoded frame, returning the reply to write
    fn process_frame(&self, frame: Frame, peer: SocketAddr) -> Option<Frame> {
        match frame {
            Frame::Batch { batch_id, batch } => {
                let accepted = self.handler.handle(peer, &batch);
                self.metrics.batch_handled(batch.len() as u64, accepted);
                if accepted {
                    Some(Frame::Ack(batch_id))
                } else {
                    tracing::debug!(peer = %peer, batch_id, topic = %batch.topic(), "handler rejected batch");
                    Some(Frame::Nack(batch_id))
                }
            }
            Frame::KeepAlive(stats) => {
                self.metrics.keepalive();
                self.senders.lock().insert(peer, stats);
                None
            }
            other => {
                tracing::trace!(peer = %peer, frame = other.name(), "ignoring unexpected frame");
                None
            }
        }
    }

    fn configure_socket(&self, stream: &TcpStream) {
        if self.config.nodelay
            && let Err(e) = stream.set_nodelay(true)
        {
            tracing::debug!(error = %e, "failed to set TCP_NODELAY");
        }
        let sock_ref = SockRef::from(stream);
        if let Err(e) = sock_ref.set_recv_buffer_size(self.config.buffer_size) {
            tracing::debug!(error = %e, "failed to set SO_RCVBUF");
        }
    }

    async fn publish_stats(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = interval(self.config.stats_interval.max(MIN_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let stats = self.snapshot();
                    tracing::info!(
                        connections = stats.connections_active,
                        batches_received = stats.batches_received,
                        events_received = stats.events_received,
                        bytes_received = stats.bytes_received,
                        acked = stats.batches_acked,
                        nacked = stats.batches_nacked,
                        malformed = stats.frames_malformed,
                        senders = stats.senders.len(),
                        "receiver stats"
                    );
                    self.stats_tx.send_replace(stats);
                }
            }
        }

        // Final snapshot so subscribers see the totals at shutdown
        self.stats_tx.send_replace(self.snapshot());
    }
}
