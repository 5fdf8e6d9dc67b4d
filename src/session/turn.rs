//! The transient per-turn task.
//!
//! Spawned when a finalized utterance enters Thinking. Drives the LLM token
//! stream, segments it into speakable units, and synthesizes each segment in
//! order, forwarding audio to the outbound scheduler. Phase transitions stay
//! with the state machine: this task only posts events and enqueues output.
//!
//! Audio framing invariant: one `tts_start` before the first PCM chunk of
//! the turn, one `tts_end` after the last (the interrupt path sends
//! `tts_stop` instead). Chunks go out in `(segment_index, chunk_index)`
//! order because segments are synthesized sequentially.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::adapters::{ChatMessage, LlmAdapter, LlmChunk, TtsAdapter, TtsChunk};
use crate::config::Config;
use crate::errors::{AdapterError, SessionError};
use crate::protocol::{AudioEncoding, ServerFrame};
use crate::session::events::{SessionEvent, TurnDeadline};
use crate::session::outbound::{OutboundSender, PcmChunk};
use crate::session::segmenter::{SentenceSegmenter, SpeechSegment};

/// Everything a turn task needs, captured at spawn time.
pub(crate) struct TurnDeps {
    pub session_id: String,
    pub turn_id: u64,
    pub epoch: u64,
    pub cancel: CancellationToken,
    pub user_text: String,
    /// Prior turns only; the current user text is the prompt.
    pub history: Vec<ChatMessage>,
    pub llm: Arc<dyn LlmAdapter>,
    pub tts: Arc<dyn TtsAdapter>,
    pub outbound: OutboundSender,
    pub mailbox: mpsc::Sender<SessionEvent>,
    pub config: Arc<Config>,
}

/// Run one turn to completion, cancellation, or deadline.
pub(crate) async fn run_turn(deps: TurnDeps) {
    let (seg_tx, seg_rx) = mpsc::channel::<SpeechSegment>(deps.config.queues.segments.max(1));

    let speaker = tokio::spawn(speak_segments(
        SpeakerCtx {
            session_id: deps.session_id.clone(),
            turn_id: deps.turn_id,
            epoch: deps.epoch,
            cancel: deps.cancel.clone(),
            tts: deps.tts.clone(),
            outbound: deps.outbound.clone(),
            mailbox: deps.mailbox.clone(),
            first_chunk_deadline: deps.config.timeouts.tts_first_chunk(),
        },
        seg_rx,
    ));

    tokio::select! {
        _ = deps.cancel.cancelled() => {
            debug!(session_id = %deps.session_id, turn_id = deps.turn_id, "turn cancelled");
        }
        _ = tokio::time::sleep(deps.config.timeouts.turn_deadline()) => {
            post(
                &deps.mailbox,
                SessionEvent::DeadlineExceeded {
                    turn_id: deps.turn_id,
                    epoch: deps.epoch,
                    deadline: TurnDeadline::Turn,
                },
            )
            .await;
        }
        _ = drive_llm(&deps, seg_tx) => {}
    }

    // The speaker exits on its own once the segment channel closes or the
    // turn token fires.
    let _ = speaker.await;
}

async fn post(mailbox: &mpsc::Sender<SessionEvent>, event: SessionEvent) {
    let _ = mailbox.send(event).await;
}

// ---------------------------------------------------------------------------
// LLM side
// ---------------------------------------------------------------------------

async fn drive_llm(deps: &TurnDeps, seg_tx: mpsc::Sender<SpeechSegment>) {
    let stream = match deps
        .llm
        .generate(
            &deps.config.llm.system_prompt,
            &deps.history,
            &deps.user_text,
            deps.cancel.child_token(),
        )
        .await
    {
        Ok(s) => s,
        Err(error) => {
            post(
                &deps.mailbox,
                SessionEvent::LlmFailed {
                    turn_id: deps.turn_id,
                    epoch: deps.epoch,
                    error,
                },
            )
            .await;
            return;
        }
    };

    let mut rx = stream.rx;
    let mut segmenter =
        SentenceSegmenter::new(deps.turn_id, deps.config.segmenter.max_segment_chars);
    let mut full = String::new();
    let mut awaiting_first = true;

    loop {
        let chunk = if awaiting_first {
            match tokio::time::timeout(deps.config.timeouts.llm_first_token(), rx.recv()).await {
                Ok(chunk) => chunk,
                Err(_) => {
                    post(
                        &deps.mailbox,
                        SessionEvent::DeadlineExceeded {
                            turn_id: deps.turn_id,
                            epoch: deps.epoch,
                            deadline: TurnDeadline::LlmFirstToken,
                        },
                    )
                    .await;
                    return;
                }
            }
        } else {
            rx.recv().await
        };

        match chunk {
            Some(LlmChunk::Token(delta)) => {
                awaiting_first = false;
                full.push_str(&delta);
                let segments = segmenter.push(&delta);
                post(
                    &deps.mailbox,
                    SessionEvent::LlmToken {
                        turn_id: deps.turn_id,
                        epoch: deps.epoch,
                        delta,
                    },
                )
                .await;
                for segment in segments {
                    if seg_tx.send(segment).await.is_err() {
                        return;
                    }
                }
            }
            Some(LlmChunk::Done) | None => {
                if let Some(segment) = segmenter.finish() {
                    let _ = seg_tx.send(segment).await;
                }
                post(
                    &deps.mailbox,
                    SessionEvent::LlmFinished {
                        turn_id: deps.turn_id,
                        epoch: deps.epoch,
                        text: full,
                    },
                )
                .await;
                return;
            }
            Some(LlmChunk::Error(error)) => {
                post(
                    &deps.mailbox,
                    SessionEvent::LlmFailed {
                        turn_id: deps.turn_id,
                        epoch: deps.epoch,
                        error,
                    },
                )
                .await;
                return;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// TTS side
// ---------------------------------------------------------------------------

struct SpeakerCtx {
    session_id: String,
    turn_id: u64,
    epoch: u64,
    cancel: CancellationToken,
    tts: Arc<dyn TtsAdapter>,
    outbound: OutboundSender,
    mailbox: mpsc::Sender<SessionEvent>,
    first_chunk_deadline: Duration,
}

enum SegmentOutcome {
    Spoken,
    Failed(AdapterError),
    TimedOut,
    Stalled,
    Cancelled,
}

async fn speak_segments(ctx: SpeakerCtx, mut seg_rx: mpsc::Receiver<SpeechSegment>) {
    let mut started = false;
    let mut spoken = 0u32;
    let mut failed = 0u32;

    loop {
        let segment = tokio::select! {
            _ = ctx.cancel.cancelled() => return,
            seg = seg_rx.recv() => match seg {
                Some(seg) => seg,
                None => break,
            },
        };
        match speak_one(&ctx, &segment, &mut started).await {
            SegmentOutcome::Spoken => spoken += 1,
            SegmentOutcome::Failed(e) => {
                warn!(
                    session_id = %ctx.session_id,
                    turn_id = ctx.turn_id,
                    segment_index = segment.segment_index,
                    "segment synthesis failed: {e}"
                );
                failed += 1;
            }
            SegmentOutcome::TimedOut => {
                post(
                    &ctx.mailbox,
                    SessionEvent::DeadlineExceeded {
                        turn_id: ctx.turn_id,
                        epoch: ctx.epoch,
                        deadline: TurnDeadline::TtsFirstChunk,
                    },
                )
                .await;
                return;
            }
            SegmentOutcome::Stalled => {
                post(&ctx.mailbox, SessionEvent::OutboundStalled).await;
                return;
            }
            SegmentOutcome::Cancelled => return,
        }
    }

    if ctx.cancel.is_cancelled() {
        return;
    }
    if started {
        ctx.outbound
            .turn_frame(
                ctx.epoch,
                ServerFrame::TtsEnd {
                    session_id: ctx.session_id.clone(),
                    turn_id: ctx.turn_id,
                },
            )
            .await;
    }
    post(
        &ctx.mailbox,
        SessionEvent::SpeakingFinished {
            turn_id: ctx.turn_id,
            epoch: ctx.epoch,
            segments_spoken: spoken,
            segments_failed: failed,
        },
    )
    .await;
}

async fn speak_one(
    ctx: &SpeakerCtx,
    segment: &SpeechSegment,
    started: &mut bool,
) -> SegmentOutcome {
    let stream = match ctx
        .tts
        .synthesize(&segment.text, ctx.cancel.child_token())
        .await
    {
        Ok(s) => s,
        Err(e) => return SegmentOutcome::Failed(e),
    };

    let mut rx = stream.rx;
    let mut chunk_index = 0u32;
    let mut awaiting_first = true;

    loop {
        let chunk = tokio::select! {
            _ = ctx.cancel.cancelled() => return SegmentOutcome::Cancelled,
            chunk = async {
                if awaiting_first {
                    tokio::time::timeout(ctx.first_chunk_deadline, rx.recv())
                        .await
                        .map_err(|_| ())
                } else {
                    Ok(rx.recv().await)
                }
            } => match chunk {
                Ok(c) => c,
                Err(()) => return SegmentOutcome::TimedOut,
            },
        };

        match chunk {
            Some(TtsChunk::Pcm(bytes)) => {
                awaiting_first = false;
                if bytes.is_empty() {
                    continue;
                }
                if !*started {
                    *started = true;
                    ctx.outbound
                        .turn_frame(
                            ctx.epoch,
                            ServerFrame::TtsStart {
                                session_id: ctx.session_id.clone(),
                                turn_id: ctx.turn_id,
                                format: AudioEncoding::Pcm,
                            },
                        )
                        .await;
                    post(
                        &ctx.mailbox,
                        SessionEvent::SpeakingStarted {
                            turn_id: ctx.turn_id,
                            epoch: ctx.epoch,
                        },
                    )
                    .await;
                }
                let pcm = PcmChunk {
                    turn_id: ctx.turn_id,
                    segment_index: segment.segment_index,
                    chunk_index,
                    bytes,
                };
                match ctx.outbound.audio(ctx.epoch, pcm).await {
                    Ok(()) => chunk_index += 1,
                    Err(SessionError::ClientStalled) => return SegmentOutcome::Stalled,
                    Err(_) => return SegmentOutcome::Cancelled,
                }
            }
            Some(TtsChunk::Done) | None => return SegmentOutcome::Spoken,
            Some(TtsChunk::Error(e)) => return SegmentOutcome::Failed(e),
        }
    }
}
