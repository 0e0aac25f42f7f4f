//! Transport endpoint
//!
//! One endpoint owns one outbound connection to a receiver. Callers hand it
//! batches through a bounded queue and wait for the receiver's verdict:
//!
//! ```text
//! [send()] → [bounded queue] → [writer task] → Batch frame → [receiver]
//!    ↑                              │                            │
//!    └──────── oneshot result ──────┴────────── Ack / Nack ──────┘
//! ```
//!
//! The writer task connects lazily, retries failed or rejected batches with
//! exponential backoff and marks the endpoint dead once a batch has used up
//! its attempts. While idle it writes keep-alive frames. A separate reporter
//! task logs statistics and never touches the send path.

use std::io::ErrorKind;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use feedline_protocol::{EventBatch, Frame, FrameDecoder};
use parking_lot::Mutex;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::config::EndpointConfig;
use crate::error::{EndpointError, Result};
use crate::metrics::{EndpointMetrics, EndpointMetricsSnapshot};
use crate::reporter::StatsReporter;

/// Floor for timer periods; `tokio::time::interval` rejects zero
pub(crate) const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// What to do with queued sends when closing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseMode {
    /// Deliver everything already queued, then close
    Drain,
    /// Fail queued sends with `EndpointError::Closed` and close now
    Discard,
}

enum Command {
    Send {
        batch: EventBatch,
        reply: oneshot::Sender<Result<()>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// State shared between the handle and the writer task
#[derive(Debug)]
struct Shared {
    name: String,
    dead: AtomicBool,
    closed: AtomicBool,
    metrics: EndpointMetrics,
}

/// Outbound push channel to one receiver
pub struct TransportEndpoint {
    shared: Arc<Shared>,
    address: String,
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for TransportEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportEndpoint")
            .field("name", &self.shared.name)
            .field("address", &self.address)
            .field("dead", &self.is_dead())
            .finish()
    }
}

impl TransportEndpoint {
    /// Spawn the writer and reporter tasks for a new endpoint
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(name: impl Into<String>, config: EndpointConfig) -> Arc<Self> {
        let name = name.into();
        let (commands, rx) = mpsc::channel(config.queue_size.max(1));
        let shared = Arc::new(Shared {
            name,
            dead: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            metrics: EndpointMetrics::new(),
        });
        let cancel = CancellationToken::new();

        let reporter_token = cancel.child_token();
        let reporter = StatsReporter::new(
            shared.name.clone(),
            config.address.clone(),
            config.stats_interval,
        );
        {
            let shared = Arc::clone(&shared);
            let token = reporter_token.clone();
            tokio::spawn(async move {
                reporter.run(|| shared.metrics.snapshot(), token).await;
            });
        }

        tracing::info!(
            endpoint = %shared.name,
            address = %config.address,
            queue_size = config.queue_size,
            "transport endpoint starting"
        );

        let address = config.address.clone();
        let writer = Writer {
            shared: Arc::clone(&shared),
            config,
            rx,
            stream: None,
            read_buf: BytesMut::with_capacity(256),
            decoder: FrameDecoder::new(),
            next_batch_id: 1,
            cancel: cancel.clone(),
            _reporter: reporter_token.drop_guard(),
        };
        let handle = tokio::spawn(writer.run());

        Arc::new(Self {
            shared,
            address,
            commands,
            cancel,
            writer: Mutex::new(Some(handle)),
        })
    }

    /// Endpoint name for logging
    #[inline]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Receiver address
    #[inline]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Whether delivery attempts were exhausted
    #[inline]
    pub fn is_dead(&self) -> bool {
        self.shared.dead.load(Ordering::Acquire)
    }

    /// Whether `close` was called
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Current counters
    pub fn metrics(&self) -> EndpointMetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Deliver a batch and wait for the receiver's ack
    ///
    /// Waits for queue capacity when the queue is full; never drops.
    ///
    /// # Errors
    ///
    /// - `EndpointError::Dead` if this or an earlier batch exhausted its
    ///   delivery attempts
    /// - `EndpointError::Closed` if the endpoint was closed
    /// - `EndpointError::Protocol` if the batch cannot be framed
    pub async fn send(&self, batch: EventBatch) -> Result<()> {
        if self.is_dead() {
            return Err(EndpointError::dead(self.name()));
        }
        if self.is_closed() {
            return Err(EndpointError::closed(self.name()));
        }

        let Ok(permit) = self.commands.reserve().await else {
            return Err(self.unavailable());
        };
        let (reply, result) = oneshot::channel();
        self.shared.metrics.enqueued();
        permit.send(Command::Send { batch, reply });

        result.await.unwrap_or_else(|_| Err(self.unavailable()))
    }

    /// Close the endpoint
    ///
    /// Idempotent. Returns once the writer task has exited and the socket is
    /// closed.
    pub async fn close(&self, mode: CloseMode) {
        let first = !self.shared.closed.swap(true, Ordering::AcqRel);
        if first {
            tracing::info!(endpoint = %self.name(), mode = ?mode, "closing transport endpoint");
        }

        match mode {
            CloseMode::Drain => {
                let (reply, done) = oneshot::channel();
                if self.commands.send(Command::Close { reply }).await.is_ok() {
                    let _ = done.await;
                }
            }
            CloseMode::Discard => self.cancel.cancel(),
        }

        let handle = self.writer.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::warn!(endpoint = %self.name(), error = %e, "endpoint writer task failed");
        }
    }

    fn unavailable(&self) -> EndpointError {
        if self.is_dead() {
            EndpointError::dead(self.name())
        } else {
            EndpointError::closed(self.name())
        }
    }
}

impl Drop for TransportEndpoint {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Writer task state; owns the socket
struct Writer {
    shared: Arc<Shared>,
    config: EndpointConfig,
    rx: mpsc::Receiver<Command>,
    stream: Option<TcpStream>,
    read_buf: BytesMut,
    decoder: FrameDecoder,
    next_batch_id: u64,
    cancel: CancellationToken,

    /// Stops the stats reporter on every exit path
    _reporter: DropGuard,
}

impl Writer {
    async fn run(mut self) {
        let mut keepalive = interval(self.config.keepalive_interval.max(MIN_INTERVAL));
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        keepalive.reset();

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    self.fail_queued();
                    break;
                }

                command = self.rx.recv() => match command {
                    Some(Command::Send { batch, reply }) => {
                        self.shared.metrics.dequeued();
                        let cancel = self.cancel.clone();
                        let result = tokio::select! {
                            result = self.deliver(batch) => result,
                            _ = cancel.cancelled() => Err(EndpointError::closed(&self.shared.name)),
                        };
                        let _ = reply.send(result);
                        keepalive.reset();
                    }
                    Some(Command::Close { reply }) => {
                        self.fail_queued();
                        let _ = reply.send(());
                        break;
                    }
                    None => break,
                },

                _ = keepalive.tick() => self.send_keepalive().await,
            }
        }

        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }

        let snapshot = self.shared.metrics.snapshot();
        tracing::info!(
            endpoint = %self.shared.name,
            batches_sent = snapshot.batches_sent,
            events_sent = snapshot.events_sent,
            batches_failed = snapshot.batches_failed,
            bytes_sent = snapshot.bytes_sent,
            reconnects = snapshot.reconnect_count,
            "transport endpoint stopped"
        );
    }

    /// Fail everything still queued with `Closed`
    fn fail_queued(&mut self) {
        self.rx.close();
        while let Ok(command) = self.rx.try_recv() {
            match command {
                Command::Send { reply, .. } => {
                    self.shared.metrics.dequeued();
                    let _ = reply.send(Err(EndpointError::closed(&self.shared.name)));
                }
                Command::Close { reply } => {
                    let _ = reply.send(());
                }
            }
        }
    }

    /// Deliver one batch with retry, marking the endpoint dead on exhaustion
    async fn deliver(&mut self, batch: EventBatch) -> Result<()> {
        if self.shared.dead.load(Ordering::Acquire) {
            return Err(EndpointError::dead(&self.shared.name));
        }

        let batch_id = self.next_batch_id;
        self.next_batch_id += 1;
        let event_count = batch.len() as u64;
        let frame = Frame::Batch { batch_id, batch }.to_bytes()?;

        let attempts = self.config.retry_attempts.max(1);
        for attempt in 0..attempts {
            if attempt > 0 {
                self.shared.metrics.record_retry();
                tokio::time::sleep(self.config.backoff(attempt)).await;
            }

            match self.attempt(&frame, batch_id).await {
                Ok(()) => {
                    self.shared
                        .metrics
                        .record_sent(event_count, frame.len() as u64);
                    tracing::trace!(
                        endpoint = %self.shared.name,
                        batch_id,
                        events = event_count,
                        "batch acknowledged"
                    );
                    return Ok(());
                }
                Err(e) => {
                    tracing::debug!(
                        endpoint = %self.shared.name,
                        batch_id,
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        error = %e,
                        "delivery attempt failed"
                    );
                }
            }
        }

        self.shared.dead.store(true, Ordering::Release);
        self.shared.metrics.record_failed();
        tracing::error!(
            endpoint = %self.shared.name,
            address = %self.config.address,
            batch_id,
            attempts,
            "delivery attempts exhausted, endpoint is dead"
        );
        Err(EndpointError::dead(&self.shared.name))
    }

    /// One write-then-await-ack round trip
    async fn attempt(&mut self, frame: &Bytes, batch_id: u64) -> Result<()> {
        if self.stream.is_none() {
            self.connect().await?;
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(EndpointError::Disconnected);
        };

        let written = timeout(self.config.write_timeout, async {
            stream.write_all(frame).await?;
            stream.flush().await
        })
        .await;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.disconnect();
                return Err(EndpointError::Io(e));
            }
            Err(_) => {
                self.disconnect();
                return Err(EndpointError::Timeout);
            }
        }

        let verdict = timeout(
            self.config.ack_timeout,
            read_verdict(stream, &mut self.read_buf, &self.decoder, batch_id),
        )
        .await;
        match verdict {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => {
                self.shared.metrics.record_nack();
                Err(EndpointError::Rejected { batch_id })
            }
            Ok(Err(e)) => {
                self.disconnect();
                Err(e)
            }
            Err(_) => {
                self.disconnect();
                Err(EndpointError::Timeout)
            }
        }
    }

    async fn connect(&mut self) -> Result<()> {
        let address = &self.config.address;
        let stream = match timeout(self.config.connection_timeout, TcpStream::connect(address)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(EndpointError::ConnectionFailed {
                    address: address.clone(),
                    source: e,
                });
            }
            Err(_) => {
                return Err(EndpointError::ConnectionFailed {
                    address: address.clone(),
                    source: std::io::Error::new(ErrorKind::TimedOut, "connection timed out"),
                });
            }
        };

        // Set TCP_NODELAY for lower latency (non-fatal if it fails)
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(
                endpoint = %self.shared.name,
                error = %e,
                "failed to set TCP_NODELAY, continuing with default buffering"
            );
        }

        if let Some(probe_interval) = self.config.tcp_keepalive {
            let sock_ref = SockRef::from(&stream);
            let keepalive = TcpKeepalive::new().with_time(probe_interval);

            #[cfg(target_os = "linux")]
            let keepalive = keepalive.with_interval(probe_interval);

            if let Err(e) = sock_ref.set_tcp_keepalive(&keepalive) {
                tracing::debug!(
                    endpoint = %self.shared.name,
                    error = %e,
                    "failed to set TCP keep-alive, continuing without keep-alive"
                );
            }
        }

        self.shared.metrics.record_reconnect();
        tracing::debug!(endpoint = %self.shared.name, address = %address, "connected to receiver");

        self.read_buf.clear();
        self.stream = Some(stream);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.stream = None;
        self.read_buf.clear();
    }

    /// Write a keep-alive frame if connected
    async fn send_keepalive(&mut self) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };

        let stats = self.shared.metrics.snapshot().sender_stats();
        let frame = match Frame::KeepAlive(stats).to_bytes() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(endpoint = %self.shared.name, error = %e, "failed to encode keep-alive");
                return;
            }
        };

        let written = timeout(self.config.write_timeout, async {
            stream.write_all(&frame).await?;
            stream.flush().await
        })
        .await;
        match written {
            Ok(Ok(())) => self.shared.metrics.record_keepalive(),
            Ok(Err(e)) => {
                tracing::debug!(endpoint = %self.shared.name, error = %e, "keep-alive write failed");
                self.disconnect();
            }
            Err(_) => {
                tracing::debug!(endpoint = %self.shared.name, "keep-alive write timed out");
                self.disconnect();
            }
        }
    }
}

/// Read frames until the verdict for `batch_id` arrives
///
/// Returns `true` for an ack and `false` for a nack. Verdicts for other
/// batch ids (late replies to abandoned attempts) are skipped.
async fn read_verdict(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    decoder: &FrameDecoder,
    batch_id: u64,
) -> Result<bool> {
    loop {
        while let Some(frame) = decoder.decode(buf)? {
            match frame {
                Frame::Ack(id) if id == batch_id => return Ok(true),
                Frame::Nack(id) if id == batch_id => return Ok(false),
                other => {
                    tracing::trace!(frame = other.name(), "skipping unexpected frame");
                }
            }
        }

        if stream.read_buf(buf).await? == 0 {
            return Err(EndpointError::Disconnected);
        }
    }
}
