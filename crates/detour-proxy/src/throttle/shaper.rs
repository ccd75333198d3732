//! Deadline-paced body transmission.
//!
//! The shaper waits out the directive's latency once, then splits the body
//! into small pieces and releases each piece no earlier than
//! `t0 + bytes_sent_so_far / rate`, where `t0` is the end of the latency
//! window. Deadlines are absolute instants on tokio's monotonic clock, so a
//! late wake-up never accumulates drift.

use super::{Leg, Throttle};
use crate::error::ProxyError;
use crate::message::Body;
use crate::metrics;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream;
use futures::StreamExt;
use std::io;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::trace;

/// Pacing resolution: a rate-limited body is released in roughly this many
/// pieces per second.
const PACING_TICKS_PER_SEC: u64 = 100;

const MAX_PIECE_BYTES: u64 = 64 * 1024;

/// Destination of a transmitted body.
#[async_trait]
pub trait BodySink: Send {
    async fn write_chunk(&mut self, chunk: Bytes) -> io::Result<()>;
}

/// In-memory sink for origins that read the request body after it is sent.
#[async_trait]
impl BodySink for BytesMut {
    async fn write_chunk(&mut self, chunk: Bytes) -> io::Result<()> {
        self.extend_from_slice(&chunk);
        Ok(())
    }
}

/// Sending half of [`body_channel`]. Writes wait while the channel is full,
/// so a slow reader holds back the shaper instead of growing a buffer.
pub struct ChannelSink {
    sender: mpsc::Sender<io::Result<Bytes>>,
}

/// A sink and the lazy [`Body`] that yields whatever is written into it.
///
/// At most `capacity` pieces are in flight. The body ends when the sink is
/// dropped, or with an error after [`ChannelSink::abort`].
pub fn body_channel(capacity: usize) -> (ChannelSink, Body) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    let body = Body::from_stream(stream::unfold(receiver, |mut receiver| async move {
        receiver.recv().await.map(|item| (item, receiver))
    }));
    (ChannelSink { sender }, body)
}

impl ChannelSink {
    /// End the body with `err` instead of a clean end of stream.
    pub async fn abort(self, err: io::Error) {
        let _ = self.sender.send(Err(err)).await;
    }
}

#[async_trait]
impl BodySink for ChannelSink {
    async fn write_chunk(&mut self, chunk: Bytes) -> io::Result<()> {
        self.sender
            .send(Ok(chunk))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "body reader went away"))
    }
}

/// Outcome of a completed transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    pub bytes: u64,
    pub elapsed: Duration,
}

/// Size of the pieces a rate-limited body is cut into.
pub(crate) fn piece_size(rate_bytes_per_sec: u64) -> usize {
    (rate_bytes_per_sec / PACING_TICKS_PER_SEC).clamp(1, MAX_PIECE_BYTES) as usize
}

/// Time after `t0` at which `sent` bytes may have left at `rate` bytes/sec.
pub(crate) fn pace_offset(sent: u64, rate_bytes_per_sec: u64) -> Duration {
    let nanos = u128::from(sent) * 1_000_000_000 / u128::from(rate_bytes_per_sec);
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

/// Send `body` into `sink` under `throttle`.
///
/// Without a directive the body is forwarded chunk by chunk as fast as the
/// source and sink allow. A failure abandons the transfer; nothing is retried.
pub async fn transmit<S>(
    body: Body,
    throttle: Option<Throttle>,
    leg: Leg,
    sink: &mut S,
) -> Result<Transfer, ProxyError>
where
    S: BodySink + ?Sized,
{
    let started = Instant::now();
    let throttle = throttle.filter(|t| !t.is_unshaped()).unwrap_or_default();

    let t0 = match throttle.latency_duration() {
        Some(latency) if !latency.is_zero() => {
            trace!(leg = %leg, latency_ms = latency.as_millis() as u64, "holding first byte");
            let t0 = started + latency;
            sleep_until(t0).await;
            t0
        }
        _ => started,
    };

    let mut chunks = body.into_stream();
    let mut sent: u64 = 0;

    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(|e| ProxyError::transport(leg, e))?;

        let Some(rate) = throttle.rate_bytes_per_sec() else {
            sent += chunk.len() as u64;
            sink.write_chunk(chunk)
                .await
                .map_err(|e| ProxyError::transport(leg, e))?;
            // An always-ready source and sink would otherwise never give the
            // scheduler back.
            tokio::task::yield_now().await;
            continue;
        };

        let piece = piece_size(rate);
        let mut rest = chunk;
        while !rest.is_empty() {
            let part = rest.split_to(piece.min(rest.len()));
            sent += part.len() as u64;
            sleep_until(t0 + pace_offset(sent, rate)).await;
            sink.write_chunk(part)
                .await
                .map_err(|e| ProxyError::transport(leg, e))?;
        }
    }

    let transfer = Transfer {
        bytes: sent,
        elapsed: started.elapsed(),
    };
    metrics::record_transfer(leg, transfer.bytes, transfer.elapsed);
    trace!(
        leg = %leg,
        bytes = transfer.bytes,
        elapsed_ms = transfer.elapsed.as_millis() as u64,
        "body transmitted"
    );
    Ok(transfer)
}
