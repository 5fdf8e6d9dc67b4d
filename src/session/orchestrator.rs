//! Session state machine driver.
//!
//! Owns every piece of mutable session state: the turn phase, the active
//! turn context, and the conversation history. All mutation flows through
//! the mailbox; the demux, the ASR pump, the outbound scheduler, and the
//! turn task never touch state directly. The current phase is published on a
//! watch channel so the demux-side barge-in gate can evaluate frames without
//! holding state.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::adapters::{AdapterSet, AsrEvent, AudioSpec, Role};
use crate::config::Config;
use crate::errors::{AdapterError, AdapterKind};
use crate::protocol::{ClientCommand, LlmStatusKind, ServerFrame, StatusKind};
use crate::session::events::{SessionEvent, TurnDeadline};
use crate::session::metrics::SessionMetrics;
use crate::session::outbound::OutboundSender;
use crate::session::registry::SessionHandle;
use crate::session::state::{ConversationHistory, TurnContext, TurnPhase};
use crate::session::turn::{run_turn, TurnDeps};

/// Slot through which the demux feeds PCM into the currently open ASR
/// stream. `None` while recognition is closed.
pub type SharedAsrFeed = Arc<std::sync::Mutex<Option<mpsc::Sender<Vec<u8>>>>>;

/// Consecutive failures of one adapter kind before the session is torn down.
const ADAPTER_FATAL_THRESHOLD: u32 = 3;

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// The per-session state machine driver task.
pub struct Orchestrator {
    session: Arc<SessionHandle>,
    config: Arc<Config>,
    adapters: AdapterSet,
    outbound: OutboundSender,
    events_rx: mpsc::Receiver<SessionEvent>,
    events_tx: mpsc::Sender<SessionEvent>,
    phase_tx: watch::Sender<TurnPhase>,
    asr_feed: SharedAsrFeed,
    metrics: Arc<SessionMetrics>,

    phase: TurnPhase,
    turn: Option<TurnContext>,
    next_turn_id: u64,
    history: ConversationHistory,
    turn_task: Option<JoinHandle<()>>,
    asr_pump: Option<JoinHandle<()>>,
    asr_failures: u32,
    llm_failures: u32,
    tts_failures: u32,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: Arc<SessionHandle>,
        config: Arc<Config>,
        adapters: AdapterSet,
        outbound: OutboundSender,
        events_rx: mpsc::Receiver<SessionEvent>,
        events_tx: mpsc::Sender<SessionEvent>,
        phase_tx: watch::Sender<TurnPhase>,
        asr_feed: SharedAsrFeed,
        metrics: Arc<SessionMetrics>,
    ) -> Self {
        Self {
            session,
            config,
            adapters,
            outbound,
            events_rx,
            events_tx,
            phase_tx,
            asr_feed,
            metrics,
            phase: TurnPhase::Idle,
            turn: None,
            next_turn_id: 1,
            history: ConversationHistory::new(),
            turn_task: None,
            asr_pump: None,
            asr_failures: 0,
            llm_failures: 0,
            tts_failures: 0,
        }
    }

    /// Drive the state machine until the session is cancelled or the client
    /// is gone.
    pub async fn run(mut self) {
        loop {
            let event = tokio::select! {
                _ = self.session.cancel.cancelled() => break,
                event = self.events_rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            if self.handle_event(event).await == Flow::Stop {
                break;
            }
        }
        self.shutdown().await;
    }

    // -- dispatch ----------------------------------------------------------

    async fn handle_event(&mut self, event: SessionEvent) -> Flow {
        match event {
            SessionEvent::Command(cmd) => self.handle_command(cmd).await,
            SessionEvent::ProtocolError(e) => {
                self.send_error(e.to_string()).await;
                Flow::Continue
            }
            SessionEvent::AsrPartial(text) => self.on_asr_partial(text).await,
            SessionEvent::AsrFinal(text) => self.on_asr_final(text).await,
            SessionEvent::AsrFailed(e) => self.on_asr_failed(e).await,
            SessionEvent::LlmToken {
                turn_id,
                epoch,
                delta,
            } => self.on_llm_token(turn_id, epoch, delta).await,
            SessionEvent::LlmFinished {
                turn_id,
                epoch,
                text,
            } => self.on_llm_finished(turn_id, epoch, text).await,
            SessionEvent::LlmFailed {
                turn_id,
                epoch,
                error,
            } => {
                let message = format!("turn {turn_id}: {error}");
                self.fail_turn(turn_id, epoch, message, Some(AdapterKind::Llm))
                    .await
            }
            SessionEvent::SpeakingStarted { turn_id, epoch } => {
                self.on_speaking_started(turn_id, epoch)
            }
            SessionEvent::SpeakingFinished {
                turn_id,
                epoch,
                segments_spoken,
                segments_failed,
            } => {
                self.on_speaking_finished(turn_id, epoch, segments_spoken, segments_failed)
                    .await
            }
            SessionEvent::BargeIn => self.on_interrupt(true).await,
            SessionEvent::DeadlineExceeded {
                turn_id,
                epoch,
                deadline,
            } => self.on_deadline(turn_id, epoch, deadline).await,
            SessionEvent::ClientGone => Flow::Stop,
            SessionEvent::OutboundStalled => {
                warn!(
                    session_id = %self.session.session_id,
                    "outbound audio stalled, client too slow"
                );
                Flow::Stop
            }
        }
    }

    async fn handle_command(&mut self, cmd: ClientCommand) -> Flow {
        debug!(session_id = %self.session.session_id, ?cmd, "client command");
        match cmd {
            ClientCommand::Start => self.on_start().await,
            ClientCommand::Stop => self.on_stop().await,
            ClientCommand::Reset => self.on_reset().await,
            ClientCommand::Interrupt => self.on_interrupt(false).await,
            ClientCommand::ClearQueues => self.on_clear_queues().await,
        }
    }

    // -- client commands ---------------------------------------------------

    async fn on_start(&mut self) -> Flow {
        if !matches!(self.phase, TurnPhase::Idle | TurnPhase::Error) {
            debug!(phase = ?self.phase, "start ignored");
            return Flow::Continue;
        }
        if let Err(e) = self.open_asr().await {
            self.asr_failures += 1;
            self.send_error(e.to_string()).await;
            self.set_phase(TurnPhase::Idle);
            if self.asr_failures >= ADAPTER_FATAL_THRESHOLD {
                return self.fatal(AdapterKind::Asr).await;
            }
            return Flow::Continue;
        }
        self.set_phase(TurnPhase::Listening);
        self.send_status(StatusKind::Listening, None).await;
        Flow::Continue
    }

    async fn on_stop(&mut self) -> Flow {
        if self.phase == TurnPhase::Idle {
            // A second stop in a row acknowledges nothing.
            debug!("stop ignored while idle");
            return Flow::Continue;
        }
        self.cancel_turn().await;
        self.close_asr();
        self.outbound
            .frame(ServerFrame::StopAcknowledged {
                session_id: self.session.session_id.clone(),
                queues_cleared: true,
            })
            .await;
        self.send_status(StatusKind::Stopped, None).await;
        self.set_phase(TurnPhase::Idle);
        Flow::Continue
    }

    async fn on_reset(&mut self) -> Flow {
        self.cancel_turn().await;
        self.history.clear();
        self.close_asr();
        self.set_phase(TurnPhase::Idle);
        self.send_status(StatusKind::Idle, None).await;
        Flow::Continue
    }

    async fn on_interrupt(&mut self, from_gate: bool) -> Flow {
        if self.turn.is_none() {
            if from_gate {
                // The gate raced a turn that already ended.
                return Flow::Continue;
            }
            self.outbound
                .frame(ServerFrame::InterruptAcknowledged {
                    session_id: self.session.session_id.clone(),
                })
                .await;
            return Flow::Continue;
        }

        self.cancel_turn().await;
        self.set_phase(TurnPhase::Interrupted);
        self.outbound
            .frame(ServerFrame::InterruptAcknowledged {
                session_id: self.session.session_id.clone(),
            })
            .await;
        self.set_phase(TurnPhase::Listening);
        self.send_status(StatusKind::Listening, None).await;
        Flow::Continue
    }

    async fn on_clear_queues(&mut self) -> Flow {
        if self.turn.is_some() {
            self.cancel_turn().await;
            self.set_phase(TurnPhase::Listening);
        } else {
            self.outbound.bump_epoch();
        }
        info!(session_id = %self.session.session_id, "queues cleared");
        Flow::Continue
    }

    // -- recognition events ------------------------------------------------

    async fn on_asr_partial(&mut self, text: String) -> Flow {
        if text.trim().is_empty() {
            return Flow::Continue;
        }
        match self.phase {
            TurnPhase::Listening => {}
            // After a completed turn the recognizer keeps running; its next
            // hypothesis resumes listening without a fresh client start.
            TurnPhase::Idle if self.asr_is_open() => self.set_phase(TurnPhase::Listening),
            _ => {
                debug!(phase = ?self.phase, "dropping partial transcript");
                return Flow::Continue;
            }
        }
        self.outbound
            .frame(ServerFrame::PartialTranscript {
                session_id: self.session.session_id.clone(),
                turn_id: self.next_turn_id,
                content: text,
            })
            .await;
        Flow::Continue
    }

    async fn on_asr_final(&mut self, text: String) -> Flow {
        if text.trim().is_empty() {
            return Flow::Continue;
        }
        match self.phase {
            TurnPhase::Thinking | TurnPhase::Speaking => {
                // A confirmed utterance while the assistant is responding is
                // barge-in input: cancel the response, then take the
                // utterance as the next turn.
                self.cancel_turn().await;
                self.set_phase(TurnPhase::Interrupted);
                self.outbound
                    .frame(ServerFrame::InterruptAcknowledged {
                        session_id: self.session.session_id.clone(),
                    })
                    .await;
                self.set_phase(TurnPhase::Listening);
                self.send_status(StatusKind::Listening, None).await;
            }
            TurnPhase::Listening => {}
            TurnPhase::Idle if self.asr_is_open() => self.set_phase(TurnPhase::Listening),
            _ => {
                debug!(phase = ?self.phase, "dropping final transcript");
                return Flow::Continue;
            }
        }

        self.asr_failures = 0;
        let turn_id = self.next_turn_id;
        self.next_turn_id += 1;
        self.outbound
            .frame(ServerFrame::FinalTranscript {
                session_id: self.session.session_id.clone(),
                turn_id,
                content: text.clone(),
            })
            .await;
        self.set_phase(TurnPhase::Transcribed);
        self.start_turn(turn_id, text).await;
        Flow::Continue
    }

    async fn on_asr_failed(&mut self, error: AdapterError) -> Flow {
        warn!(
            session_id = %self.session.session_id,
            "recognition stream failed: {error}"
        );
        self.asr_failures += 1;
        self.send_error(error.to_string()).await;
        self.cancel_turn().await;
        self.close_asr();
        self.set_phase(TurnPhase::Idle);
        self.send_status(StatusKind::Idle, None).await;
        if self.asr_failures >= ADAPTER_FATAL_THRESHOLD {
            return self.fatal(AdapterKind::Asr).await;
        }
        Flow::Continue
    }

    // -- turn lifecycle ----------------------------------------------------

    async fn start_turn(&mut self, turn_id: u64, user_text: String) {
        // At most one turn context per session.
        self.cancel_turn().await;
        let epoch = self.outbound.current_epoch();
        let cancel = self.session.cancel.child_token();
        let history = self.history.window(self.config.llm.max_history_messages);
        self.history.push(Role::User, user_text.clone());

        self.turn = Some(TurnContext::new(
            turn_id,
            epoch,
            cancel.clone(),
            user_text.clone(),
        ));

        self.outbound
            .turn_frame(
                epoch,
                ServerFrame::LlmStatus {
                    session_id: self.session.session_id.clone(),
                    turn_id,
                    status: LlmStatusKind::Processing,
                },
            )
            .await;

        let deps = TurnDeps {
            session_id: self.session.session_id.clone(),
            turn_id,
            epoch,
            cancel,
            user_text,
            history,
            llm: self.adapters.llm.clone(),
            tts: self.adapters.tts.clone(),
            outbound: self.outbound.clone(),
            mailbox: self.events_tx.clone(),
            config: self.config.clone(),
        };
        self.turn_task = Some(tokio::spawn(run_turn(deps)));
        self.set_phase(TurnPhase::Thinking);
        info!(
            session_id = %self.session.session_id,
            turn_id, "turn started"
        );
    }

    /// The active turn, if the event's ids match it; logs and yields `None`
    /// for stale or unknown events.
    fn active_turn(&mut self, turn_id: u64, epoch: u64) -> Option<&mut TurnContext> {
        match self.turn.as_mut() {
            Some(t) if t.turn_id == turn_id && t.epoch == epoch => Some(t),
            _ => {
                debug!(turn_id, epoch, "dropping event for stale or unknown turn");
                None
            }
        }
    }

    async fn on_llm_token(&mut self, turn_id: u64, epoch: u64, delta: String) -> Flow {
        let content = match self.active_turn(turn_id, epoch) {
            Some(turn) => {
                turn.assistant_buffer.push_str(&delta);
                turn.assistant_buffer.clone()
            }
            None => return Flow::Continue,
        };
        self.outbound
            .turn_frame(
                epoch,
                ServerFrame::LlmResponse {
                    session_id: self.session.session_id.clone(),
                    turn_id,
                    content,
                    is_complete: false,
                },
            )
            .await;
        Flow::Continue
    }

    async fn on_llm_finished(&mut self, turn_id: u64, epoch: u64, text: String) -> Flow {
        match self.active_turn(turn_id, epoch) {
            Some(turn) => {
                turn.llm_done = true;
                turn.final_text = Some(text);
            }
            None => return Flow::Continue,
        }
        self.llm_failures = 0;
        self.maybe_complete_turn().await;
        Flow::Continue
    }

    fn on_speaking_started(&mut self, turn_id: u64, epoch: u64) -> Flow {
        if let Some(turn) = self.active_turn(turn_id, epoch) {
            turn.speaking_started = true;
            self.set_phase(TurnPhase::Speaking);
        }
        Flow::Continue
    }

    async fn on_speaking_finished(
        &mut self,
        turn_id: u64,
        epoch: u64,
        segments_spoken: u32,
        segments_failed: u32,
    ) -> Flow {
        match self.active_turn(turn_id, epoch) {
            Some(turn) => turn.speaking_done = true,
            None => return Flow::Continue,
        }
        if segments_spoken == 0 && segments_failed > 0 {
            self.tts_failures += 1;
            self.send_error(format!("tts failed for all {segments_failed} segments"))
                .await;
            if self.tts_failures >= ADAPTER_FATAL_THRESHOLD {
                return self.fatal(AdapterKind::Tts).await;
            }
        } else if segments_spoken > 0 {
            self.tts_failures = 0;
        }
        self.maybe_complete_turn().await;
        Flow::Continue
    }

    /// Finish the turn once both the token stream and playback are done:
    /// the completion `llm_response` follows `tts_end` on the wire, and the
    /// assistant message joins the history.
    async fn maybe_complete_turn(&mut self) {
        let complete = matches!(&self.turn, Some(t) if t.is_complete());
        if !complete {
            return;
        }
        if let Some(turn) = self.turn.take() {
            let text = turn
                .final_text
                .unwrap_or_else(|| turn.assistant_buffer.clone());
            self.outbound
                .turn_frame(
                    turn.epoch,
                    ServerFrame::LlmResponse {
                        session_id: self.session.session_id.clone(),
                        turn_id: turn.turn_id,
                        content: text.clone(),
                        is_complete: true,
                    },
                )
                .await;
            if !text.is_empty() {
                self.history.push(Role::Assistant, text);
            }
            self.turn_task = None;
            self.set_phase(TurnPhase::Idle);
            info!(
                session_id = %self.session.session_id,
                turn_id = turn.turn_id,
                "turn complete"
            );
        }
    }

    async fn on_deadline(&mut self, turn_id: u64, epoch: u64, deadline: TurnDeadline) -> Flow {
        let ms = match deadline {
            TurnDeadline::LlmFirstToken => self.config.timeouts.llm_first_token_ms,
            TurnDeadline::TtsFirstChunk => self.config.timeouts.tts_first_chunk_ms,
            TurnDeadline::Turn => self.config.timeouts.turn_deadline_ms,
        };
        let counter = match deadline {
            TurnDeadline::LlmFirstToken => Some(AdapterKind::Llm),
            TurnDeadline::TtsFirstChunk => Some(AdapterKind::Tts),
            TurnDeadline::Turn => None,
        };
        self.fail_turn(turn_id, epoch, deadline.describe(ms), counter)
            .await
    }

    /// Common mid-turn failure path: `error` frame first, then the
    /// cancellation (which closes audio framing), then back to listening.
    async fn fail_turn(
        &mut self,
        turn_id: u64,
        epoch: u64,
        message: String,
        counter: Option<AdapterKind>,
    ) -> Flow {
        if self.active_turn(turn_id, epoch).is_none() {
            return Flow::Continue;
        }
        self.send_error(message).await;
        self.cancel_turn().await;
        self.set_phase(TurnPhase::Listening);
        self.send_status(StatusKind::Listening, None).await;

        match counter {
            Some(AdapterKind::Llm) => {
                self.llm_failures += 1;
                if self.llm_failures >= ADAPTER_FATAL_THRESHOLD {
                    return self.fatal(AdapterKind::Llm).await;
                }
            }
            Some(AdapterKind::Tts) => {
                self.tts_failures += 1;
                if self.tts_failures >= ADAPTER_FATAL_THRESHOLD {
                    return self.fatal(AdapterKind::Tts).await;
                }
            }
            _ => {}
        }
        Flow::Continue
    }

    /// Cancel the active turn: advance the epoch so queued output is
    /// dropped, fire the turn token, and close audio framing with `tts_stop`
    /// if playback had started. Returns whether a turn was active.
    async fn cancel_turn(&mut self) -> bool {
        let turn = match self.turn.take() {
            Some(turn) => turn,
            None => return false,
        };
        self.outbound.bump_epoch();
        turn.cancel.cancel();
        if turn.speaking_started {
            self.outbound
                .frame(ServerFrame::TtsStop {
                    session_id: self.session.session_id.clone(),
                    turn_id: turn.turn_id,
                })
                .await;
        }
        info!(
            session_id = %self.session.session_id,
            turn_id = turn.turn_id,
            "turn cancelled"
        );
        true
    }

    async fn fatal(&mut self, kind: AdapterKind) -> Flow {
        self.send_error(format!("{kind} adapter failed repeatedly, closing session"))
            .await;
        self.set_phase(TurnPhase::Error);
        self.send_status(StatusKind::Error, None).await;
        Flow::Stop
    }

    // -- plumbing ----------------------------------------------------------

    async fn open_asr(&mut self) -> Result<(), AdapterError> {
        if self.asr_is_open() {
            return Ok(());
        }
        let handle = self
            .adapters
            .asr
            .open(
                &self.session.session_id,
                &self.config.audio.language,
                AudioSpec::inbound(),
            )
            .await?;

        if let Ok(mut slot) = self.asr_feed.lock() {
            *slot = Some(handle.audio_tx);
        }

        let events_tx = self.events_tx.clone();
        let mut rx = handle.events;
        self.asr_pump = Some(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let mapped = match event {
                    AsrEvent::Partial(text) => SessionEvent::AsrPartial(text),
                    AsrEvent::Final(text) => SessionEvent::AsrFinal(text),
                    AsrEvent::Error(e) => SessionEvent::AsrFailed(e),
                };
                if events_tx.send(mapped).await.is_err() {
                    break;
                }
            }
        }));
        Ok(())
    }

    fn close_asr(&mut self) {
        if let Ok(mut slot) = self.asr_feed.lock() {
            *slot = None;
        }
        if let Some(pump) = self.asr_pump.take() {
            pump.abort();
        }
    }

    fn asr_is_open(&self) -> bool {
        self.asr_feed
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    fn set_phase(&mut self, phase: TurnPhase) {
        if self.phase != phase {
            debug!(
                session_id = %self.session.session_id,
                from = ?self.phase,
                to = ?phase,
                "phase transition"
            );
        }
        self.phase = phase;
        let _ = self.phase_tx.send(phase);
    }

    async fn send_status(&self, status: StatusKind, message: Option<String>) {
        self.outbound
            .frame(ServerFrame::Status {
                session_id: self.session.session_id.clone(),
                status,
                message,
            })
            .await;
    }

    async fn send_error(&self, message: String) {
        warn!(session_id = %self.session.session_id, "{message}");
        self.outbound
            .frame(ServerFrame::Error {
                session_id: self.session.session_id.clone(),
                message,
            })
            .await;
    }

    async fn shutdown(&mut self) {
        // Wake any producer blocked on a full mailbox so task joins below
        // cannot wedge.
        self.events_rx.close();
        if let Some(turn) = self.turn.take() {
            turn.cancel.cancel();
        }
        self.close_asr();
        self.session.cancel.cancel();
        if let Some(task) = self.turn_task.take() {
            let _ = task.await;
        }
        self.metrics.log_summary(&self.session.session_id);
        info!(
            session_id = %self.session.session_id,
            "session orchestrator stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use crate::adapters::scripted::{ScriptedAsr, ScriptedLlm, ScriptedTts, ScriptedUtterance};
    use crate::session::outbound::{OutboundItem, OutboundPayload};
    use crate::session::registry::SessionRegistry;

    struct Rig {
        events_tx: mpsc::Sender<SessionEvent>,
        outbound_rx: mpsc::Receiver<OutboundItem>,
        phase_rx: watch::Receiver<TurnPhase>,
        session: Arc<SessionHandle>,
        driver: tokio::task::JoinHandle<()>,
    }

    async fn rig(adapters: AdapterSet) -> Rig {
        let registry = SessionRegistry::new(CancellationToken::new());
        let session = registry.create().await;
        let config = Arc::new(Config::default());
        let (outbound, outbound_rx, _epoch) =
            OutboundSender::channel(256, Duration::from_millis(200));
        let (events_tx, events_rx) = mpsc::channel(64);
        let (phase_tx, phase_rx) = watch::channel(TurnPhase::Idle);
        let asr_feed: SharedAsrFeed = Arc::new(std::sync::Mutex::new(None));
        let metrics = Arc::new(SessionMetrics::new());

        let orchestrator = Orchestrator::new(
            session.clone(),
            config,
            adapters,
            outbound,
            events_rx,
            events_tx.clone(),
            phase_tx,
            asr_feed,
            metrics,
        );
        let driver = tokio::spawn(orchestrator.run());
        Rig {
            events_tx,
            outbound_rx,
            phase_rx,
            session,
            driver,
        }
    }

    fn adapters() -> AdapterSet {
        AdapterSet {
            asr: Arc::new(ScriptedAsr::new(
                vec![ScriptedUtterance::new(&["hel"], "hello")],
                1_000_000,
            )),
            llm: Arc::new(
                ScriptedLlm::with_replies(vec![vec!["Hi", " there."]])
                    .with_token_delay(Duration::ZERO),
            ),
            tts: Arc::new(ScriptedTts::new().with_chunk_delay(Duration::ZERO)),
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    fn drain(rx: &mut mpsc::Receiver<OutboundItem>) -> Vec<ServerFrame> {
        let mut frames = Vec::new();
        while let Ok(item) = rx.try_recv() {
            if let OutboundPayload::Frame(f) = item.payload {
                frames.push(f);
            }
        }
        frames
    }

    #[tokio::test]
    async fn test_start_enters_listening() {
        let mut r = rig(adapters()).await;
        r.events_tx
            .send(SessionEvent::Command(ClientCommand::Start))
            .await
            .unwrap();
        settle().await;

        assert_eq!(*r.phase_rx.borrow(), TurnPhase::Listening);
        let frames = drain(&mut r.outbound_rx);
        assert!(frames.iter().any(|f| matches!(
            f,
            ServerFrame::Status { status: StatusKind::Listening, .. }
        )));

        r.session.cancel.cancel();
        let _ = r.driver.await;
    }

    #[tokio::test]
    async fn test_double_stop_acknowledges_once() {
        let mut r = rig(adapters()).await;
        r.events_tx
            .send(SessionEvent::Command(ClientCommand::Start))
            .await
            .unwrap();
        r.events_tx
            .send(SessionEvent::Command(ClientCommand::Stop))
            .await
            .unwrap();
        r.events_tx
            .send(SessionEvent::Command(ClientCommand::Stop))
            .await
            .unwrap();
        settle().await;

        let frames = drain(&mut r.outbound_rx);
        let acks = frames
            .iter()
            .filter(|f| matches!(f, ServerFrame::StopAcknowledged { .. }))
            .count();
        assert_eq!(acks, 1);
        assert_eq!(*r.phase_rx.borrow(), TurnPhase::Idle);

        r.session.cancel.cancel();
        let _ = r.driver.await;
    }

    #[tokio::test]
    async fn test_interrupt_without_turn_just_acknowledges() {
        let mut r = rig(adapters()).await;
        r.events_tx
            .send(SessionEvent::Command(ClientCommand::Interrupt))
            .await
            .unwrap();
        settle().await;

        let frames = drain(&mut r.outbound_rx);
        assert!(frames
            .iter()
            .any(|f| matches!(f, ServerFrame::InterruptAcknowledged { .. })));
        assert!(!frames
            .iter()
            .any(|f| matches!(f, ServerFrame::TtsStop { .. })));

        r.session.cancel.cancel();
        let _ = r.driver.await;
    }

    #[tokio::test]
    async fn test_final_transcript_starts_turn_and_completes() {
        let mut r = rig(adapters()).await;
        r.events_tx
            .send(SessionEvent::Command(ClientCommand::Start))
            .await
            .unwrap();
        r.events_tx
            .send(SessionEvent::AsrFinal("hello".into()))
            .await
            .unwrap();
        settle().await;

        let frames = drain(&mut r.outbound_rx);
        assert!(frames.iter().any(|f| matches!(
            f,
            ServerFrame::FinalTranscript { content, .. } if content == "hello"
        )));
        assert!(frames
            .iter()
            .any(|f| matches!(f, ServerFrame::LlmStatus { .. })));
        assert!(frames.iter().any(|f| matches!(
            f,
            ServerFrame::LlmResponse { is_complete: true, content, .. } if content == "Hi there."
        )));
        // Turn completed, back to idle.
        assert_eq!(*r.phase_rx.borrow(), TurnPhase::Idle);

        r.session.cancel.cancel();
        let _ = r.driver.await;
    }

    #[tokio::test]
    async fn test_stale_llm_token_is_dropped() {
        let mut r = rig(adapters()).await;
        r.events_tx
            .send(SessionEvent::LlmToken {
                turn_id: 42,
                epoch: 0,
                delta: "ghost".into(),
            })
            .await
            .unwrap();
        settle().await;

        let frames = drain(&mut r.outbound_rx);
        assert!(!frames
            .iter()
            .any(|f| matches!(f, ServerFrame::LlmResponse { .. })));

        r.session.cancel.cancel();
        let _ = r.driver.await;
    }

    #[tokio::test]
    async fn test_empty_final_transcript_ignored() {
        let mut r = rig(adapters()).await;
        r.events_tx
            .send(SessionEvent::Command(ClientCommand::Start))
            .await
            .unwrap();
        r.events_tx
            .send(SessionEvent::AsrFinal("   ".into()))
            .await
            .unwrap();
        settle().await;

        let frames = drain(&mut r.outbound_rx);
        assert!(!frames
            .iter()
            .any(|f| matches!(f, ServerFrame::FinalTranscript { .. })));

        r.session.cancel.cancel();
        let _ = r.driver.await;
    }
}
