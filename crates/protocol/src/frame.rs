//! Push protocol frames
//!
//! Every frame is prefixed with its length:
//!
//! ```text
//! [4 bytes: length (big-endian)][1 byte: frame type][body]
//! ```
//!
//! The length counts the type byte and the body. Bodies, all integers
//! big-endian:
//!
//! ```text
//! Batch(1)     batch_id:u64 topic:str count:u32 event*
//! event        partition:u16 epoch:u64 seqno:u64 kind:u8 collection:str key:bytes payload:bytes
//! KeepAlive(2) batches_sent:u64 events_sent:u64 bytes_sent:u64 queue_depth:u32
//! Ack(3)       batch_id:u64
//! Nack(4)      batch_id:u64
//!
//! str   = len:u16 + utf-8
//! bytes = len:u32 + raw
//! ```
//!
//! Transport endpoints write `Batch` and `KeepAlive`; receivers answer each
//! `Batch` with `Ack` or `Nack`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::batch::EventBatch;
use crate::checkpoint::{Checkpoint, PartitionId};
use crate::error::ProtocolError;
use crate::event::{Event, EventKind};
use crate::ids::{CollectionId, TopicId};
use crate::{LENGTH_PREFIX_SIZE, MAX_FRAME_SIZE};

const TYPE_BATCH: u8 = 1;
const TYPE_KEEPALIVE: u8 = 2;
const TYPE_ACK: u8 = 3;
const TYPE_NACK: u8 = 4;

/// Fixed-size part of an encoded event
const EVENT_HEADER_SIZE: usize = 2 + 8 + 8 + 1;

/// Sender statistics carried by keep-alive frames
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderStats {
    pub batches_sent: u64,
    pub events_sent: u64,
    pub bytes_sent: u64,
    pub queue_depth: u32,
}

/// One protocol frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Batch of events awaiting an ack
    Batch { batch_id: u64, batch: EventBatch },
    /// Liveness signal with sender statistics
    KeepAlive(SenderStats),
    /// Batch accepted by the receiver's handler
    Ack(u64),
    /// Batch rejected; the sender retries
    Nack(u64),
}

impl Frame {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::Batch { .. } => "batch",
            Self::KeepAlive(_) => "keepalive",
            Self::Ack(_) => "ack",
            Self::Nack(_) => "nack",
        }
    }

    /// Encode this frame, including its length prefix, onto `buf`
    ///
    /// # Errors
    ///
    /// Returns an error if a string field does not fit its length prefix or
    /// the frame exceeds `MAX_FRAME_SIZE`.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        let start = buf.len();
        buf.put_u32(0);

        if let Err(e) = self.encode_body(buf) {
            buf.truncate(start);
            return Err(e);
        }

        let len = buf.len() - start - LENGTH_PREFIX_SIZE;
        if len > MAX_FRAME_SIZE {
            buf.truncate(start);
            return Err(ProtocolError::frame_too_large(len, MAX_FRAME_SIZE));
        }
        buf[start..start + LENGTH_PREFIX_SIZE].copy_from_slice(&(len as u32).to_be_bytes());
        Ok(())
    }

    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        match self {
            Self::Batch { batch_id, batch } => {
                buf.reserve(1 + 8 + 2 + batch.topic().as_str().len() + 4 + batch.total_bytes());
                buf.put_u8(TYPE_BATCH);
                buf.put_u64(*batch_id);
                put_str(buf, "topic", batch.topic().as_str())?;
                buf.put_u32(batch.len() as u32);
                for event in batch.events() {
                    put_event(buf, event)?;
                }
            }
            Self::KeepAlive(stats) => {
                buf.put_u8(TYPE_KEEPALIVE);
                buf.put_u64(stats.batches_sent);
                buf.put_u64(stats.events_sent);
                buf.put_u64(stats.bytes_sent);
                buf.put_u32(stats.queue_depth);
            }
            Self::Ack(batch_id) => {
                buf.put_u8(TYPE_ACK);
                buf.put_u64(*batch_id);
            }
            Self::Nack(batch_id) => {
                buf.put_u8(TYPE_NACK);
                buf.put_u64(*batch_id);
            }
        }
        Ok(())
    }

    /// Encode this frame into a standalone buffer
    ///
    /// # Errors
    ///
    /// See [`Frame::encode`].
    pub fn to_bytes(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Decode a frame body (type byte onwards, without the length prefix)
    ///
    /// # Errors
    ///
    /// Returns a `ProtocolError` describing the first malformed field. Batch
    /// frames whose id was readable report `ProtocolError::MalformedBatch`.
    pub fn decode_body(mut body: Bytes) -> Result<Self, ProtocolError> {
        need(&body, 1)?;
        let frame_type = body.get_u8();

        let frame = match frame_type {
            TYPE_BATCH => {
                need(&body, 8)?;
                let batch_id = body.get_u64();
                let batch = decode_batch(&mut body).map_err(|e| ProtocolError::MalformedBatch {
                    batch_id,
                    reason: Box::new(e),
                })?;
                if body.has_remaining() {
                    return Err(ProtocolError::MalformedBatch {
                        batch_id,
                        reason: Box::new(ProtocolError::TrailingBytes(body.remaining())),
                    });
                }
                return Ok(Self::Batch { batch_id, batch });
            }
            TYPE_KEEPALIVE => {
                need(&body, 8 + 8 + 8 + 4)?;
                Self::KeepAlive(SenderStats {
                    batches_sent: body.get_u64(),
                    events_sent: body.get_u64(),
                    bytes_sent: body.get_u64(),
                    queue_depth: body.get_u32(),
                })
            }
            TYPE_ACK => {
                need(&body, 8)?;
                Self::Ack(body.get_u64())
            }
            TYPE_NACK => {
                need(&body, 8)?;
                Self::Nack(body.get_u64())
            }
            other => return Err(ProtocolError::InvalidFrameType(other)),
        };

        if body.has_remaining() {
            return Err(ProtocolError::TrailingBytes(body.remaining()));
        }
        Ok(frame)
    }
}

/// Incremental frame decoder over a read buffer
///
/// Bytes are appended to a `BytesMut` by the socket reader; `decode` splits
/// complete frames off the front and leaves partial frames in place.
#[derive(Debug, Clone, Copy)]
pub struct FrameDecoder {
    max_frame_size: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a decoder accepting frames up to `MAX_FRAME_SIZE`
    pub const fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Create a decoder with a custom frame size limit
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.min(MAX_FRAME_SIZE),
        }
    }

    /// Peek at the next frame length without consuming the buffer
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    ///
    /// # Errors
    ///
    /// Returns `FrameTooLarge` (fatal) or `MessageTooShort` for an empty frame.
    pub fn peek_frame_len(&self, buf: &[u8]) -> Result<Option<usize>, ProtocolError> {
        if buf.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }
        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if len > self.max_frame_size {
            return Err(ProtocolError::frame_too_large(len, self.max_frame_size));
        }
        if buf.len() < LENGTH_PREFIX_SIZE + len {
            return Ok(None);
        }
        Ok(Some(len))
    }

    /// Split the next complete frame off `buf` and decode it
    ///
    /// # Errors
    ///
    /// Non-fatal errors (see [`ProtocolError::is_fatal`]) consume the
    /// offending frame, so decoding can continue with the next one.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        let Some(len) = self.peek_frame_len(buf)? else {
            return Ok(None);
        };
        let mut frame = buf.split_to(LENGTH_PREFIX_SIZE + len).freeze();
        frame.advance(LENGTH_PREFIX_SIZE);
        Frame::decode_body(frame).map(Some)
    }
}

fn need(buf: &Bytes, n: usize) -> Result<(), ProtocolError> {
    if buf.remaining() < n {
        return Err(ProtocolError::too_short(n, buf.remaining()));
    }
    Ok(())
}

fn put_str(buf: &mut BytesMut, field: &'static str, value: &str) -> Result<(), ProtocolError> {
    let len = u16::try_from(value.len()).map_err(|_| ProtocolError::FieldTooLong {
        field,
        len: value.len(),
    })?;
    buf.put_u16(len);
    buf.put_slice(value.as_bytes());
    Ok(())
}

fn put_bytes(buf: &mut BytesMut, field: &'static str, value: &[u8]) -> Result<(), ProtocolError> {
    let len = u32::try_from(value.len()).map_err(|_| ProtocolError::FieldTooLong {
        field,
        len: value.len(),
    })?;
    buf.put_u32(len);
    buf.put_slice(value);
    Ok(())
}

fn put_event(buf: &mut BytesMut, event: &Event) -> Result<(), ProtocolError> {
    buf.put_u16(event.checkpoint.partition.get());
    buf.put_u64(event.checkpoint.epoch);
    buf.put_u64(event.checkpoint.seqno);
    buf.put_u8(event.kind.as_u8());
    put_str(buf, "collection", event.collection.as_str())?;
    put_bytes(buf, "key", &event.key)?;
    put_bytes(buf, "payload", &event.payload)
}

fn get_str(buf: &mut Bytes, field: &'static str) -> Result<String, ProtocolError> {
    need(buf, 2)?;
    let len = buf.get_u16() as usize;
    need(buf, len)?;
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidUtf8(field))
}

fn get_bytes(buf: &mut Bytes) -> Result<Bytes, ProtocolError> {
    need(buf, 4)?;
    let len = buf.get_u32() as usize;
    need(buf, len)?;
    Ok(buf.split_to(len))
}

fn decode_batch(body: &mut Bytes) -> Result<EventBatch, ProtocolError> {
    let topic = TopicId::from(get_str(body, "topic")?);
    need(body, 4)?;
    let count = body.get_u32() as usize;

    // Every event takes at least its header; bounds the preallocation
    let mut events = Vec::with_capacity(count.min(body.remaining() / EVENT_HEADER_SIZE));
    for _ in 0..count {
        need(body, EVENT_HEADER_SIZE)?;
        let partition = PartitionId::new(body.get_u16());
        let epoch = body.get_u64();
        let seqno = body.get_u64();
        let kind = EventKind::from_u8(body.get_u8())?;
        let collection = CollectionId::from(get_str(body, "collection")?);
        let key = get_bytes(body)?;
        let payload = get_bytes(body)?;
        events.push(Event {
            checkpoint: Checkpoint::new(partition, epoch, seqno),
            collection,
            kind,
            key,
            payload,
        });
    }

    Ok(EventBatch::new(topic, events))
}
