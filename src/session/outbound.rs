//! Outbound scheduler: single-writer serialization of server->client frames.
//!
//! Every task that wants to send enqueues onto one ordered queue; one
//! consumer task owns the socket write half and drains it. Items are tagged
//! with the enqueueing turn's epoch; once the session epoch advances past a
//! tag (turn cancelled), the scheduler drops the item instead of writing it.
//! That is how cancellation reaches the wire without races. Cancel-path
//! frames (`tts_stop`, acknowledgements, errors, status) are tagged
//! always-deliver.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::SessionError;
use crate::protocol::ServerFrame;
use crate::session::metrics::SessionMetrics;

/// One chunk of synthesized audio, ordered within its turn by
/// `(segment_index, chunk_index)`.
#[derive(Debug, Clone)]
pub struct PcmChunk {
    pub turn_id: u64,
    pub segment_index: u32,
    pub chunk_index: u32,
    pub bytes: Vec<u8>,
}

#[derive(Debug)]
pub(crate) enum OutboundPayload {
    Frame(ServerFrame),
    Audio(PcmChunk),
    Pong(Vec<u8>),
}

/// An enqueued item: payload plus the epoch it was produced under.
/// `epoch: None` means always deliver.
#[derive(Debug)]
pub struct OutboundItem {
    pub(crate) epoch: Option<u64>,
    pub(crate) payload: OutboundPayload,
}

fn is_stale(tag: Option<u64>, current: u64) -> bool {
    matches!(tag, Some(e) if e < current)
}

// ---------------------------------------------------------------------------
// Producer handle
// ---------------------------------------------------------------------------

/// Cloneable producer handle onto the outbound queue.
#[derive(Clone)]
pub struct OutboundSender {
    tx: mpsc::Sender<OutboundItem>,
    epoch: Arc<AtomicU64>,
    pcm_stall: Duration,
}

impl OutboundSender {
    /// Build the queue. Returns the producer handle and the receiver for
    /// [`run_scheduler`].
    pub fn channel(
        capacity: usize,
        pcm_stall: Duration,
    ) -> (OutboundSender, mpsc::Receiver<OutboundItem>, Arc<AtomicU64>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let epoch = Arc::new(AtomicU64::new(0));
        (
            OutboundSender {
                tx,
                epoch: epoch.clone(),
                pcm_stall,
            },
            rx,
            epoch,
        )
    }

    /// Current session epoch.
    pub fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Advance the epoch, invalidating all queued items tagged below the new
    /// value. Returns the new epoch.
    pub fn bump_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Enqueue a frame that must reach the client regardless of turn
    /// cancellation (status, acknowledgements, errors, `tts_stop`).
    pub async fn frame(&self, frame: ServerFrame) {
        let _ = self
            .tx
            .send(OutboundItem {
                epoch: None,
                payload: OutboundPayload::Frame(frame),
            })
            .await;
    }

    /// Enqueue a turn-scoped frame; dropped if the turn is cancelled before
    /// it reaches the socket.
    pub async fn turn_frame(&self, epoch: u64, frame: ServerFrame) {
        let _ = self
            .tx
            .send(OutboundItem {
                epoch: Some(epoch),
                payload: OutboundPayload::Frame(frame),
            })
            .await;
    }

    /// Enqueue one PCM chunk, blocking at most the configured stall bound.
    ///
    /// A timeout means the client cannot drain audio fast enough; the caller
    /// must initiate session teardown.
    pub async fn audio(&self, epoch: u64, chunk: PcmChunk) -> Result<(), SessionError> {
        let item = OutboundItem {
            epoch: Some(epoch),
            payload: OutboundPayload::Audio(chunk),
        };
        match self.tx.send_timeout(item, self.pcm_stall).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(SessionError::ClientStalled),
            Err(SendTimeoutError::Closed(_)) => {
                Err(SessionError::ChannelWrite("outbound queue closed".into()))
            }
        }
    }

    /// Enqueue a pong reply to a client ping.
    pub async fn pong(&self, payload: Vec<u8>) {
        let _ = self
            .tx
            .send(OutboundItem {
                epoch: None,
                payload: OutboundPayload::Pong(payload),
            })
            .await;
    }
}

// ---------------------------------------------------------------------------
// Consumer task
// ---------------------------------------------------------------------------

/// Drain the outbound queue to the socket until the session is cancelled or
/// the queue closes. On a write error the session token is cancelled (the
/// client channel is gone). On cancellation, queued text frames get one
/// best-effort drain so final acknowledgements reach the client.
pub async fn run_scheduler<S>(
    mut rx: mpsc::Receiver<OutboundItem>,
    epoch: Arc<AtomicU64>,
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    metrics: Arc<SessionMetrics>,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => break,
            item = rx.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };
        if is_stale(item.epoch, epoch.load(Ordering::SeqCst)) {
            metrics.record_stale_drop();
            continue;
        }
        let msg = match item.payload {
            OutboundPayload::Frame(frame) => match frame.to_json() {
                Ok(json) => Message::Text(json),
                Err(e) => {
                    warn!("dropping unserializable frame: {e}");
                    continue;
                }
            },
            OutboundPayload::Audio(chunk) => {
                metrics.record_pcm_out(chunk.bytes.len());
                Message::Binary(chunk.bytes)
            }
            OutboundPayload::Pong(payload) => Message::Pong(payload),
        };
        if let Err(e) = sink.send(msg).await {
            warn!("client channel write failed: {e}");
            cancel.cancel();
            break;
        }
    }

    // Grace drain: deliver any control frames that were enqueued before the
    // cancellation, skipping audio.
    let current = epoch.load(Ordering::SeqCst);
    while let Ok(item) = rx.try_recv() {
        if is_stale(item.epoch, current) {
            metrics.record_stale_drop();
            continue;
        }
        if let OutboundPayload::Frame(frame) = item.payload {
            if let Ok(json) = frame.to_json() {
                if sink.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
    }
    let _ = sink.close().await;
    debug!("outbound scheduler stopped");
}
