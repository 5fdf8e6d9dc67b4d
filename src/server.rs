//! WebSocket server: accept loop and per-connection session wiring.
//!
//! Each accepted socket becomes one session with four cooperating tasks:
//! the inbound demux (this module, runs on the connection task), the state
//! machine driver, the outbound scheduler, and the ASR event pump (spawned
//! by the driver when recognition opens). Teardown cancels the session token
//! and awaits every task before retiring the session from the registry.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::SplitStream;
use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adapters::AdapterSet;
use crate::config::Config;
use crate::protocol::{ClientCommand, InboundAudioFrame};
use crate::session::bargein::BargeInGate;
use crate::session::events::SessionEvent;
use crate::session::metrics::SessionMetrics;
use crate::session::orchestrator::{Orchestrator, SharedAsrFeed};
use crate::session::outbound::{run_scheduler, OutboundSender};
use crate::session::registry::{SessionHandle, SessionRegistry};
use crate::session::state::TurnPhase;

/// How often the demux logs intake counters while audio flows.
const AUDIO_REPORT_INTERVAL: Duration = Duration::from_secs(30);

/// The speech-to-speech WebSocket server.
pub struct VoiceServer {
    config: Arc<Config>,
    adapters: AdapterSet,
    registry: Arc<SessionRegistry>,
    root: CancellationToken,
    listener: TcpListener,
    addr: SocketAddr,
}

impl VoiceServer {
    /// Bind the listener. Port 0 picks an ephemeral port; the bound address
    /// is available from [`local_addr`](Self::local_addr).
    pub async fn bind(config: Config, adapters: AdapterSet) -> anyhow::Result<Self> {
        let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
        let listener = TcpListener::bind(&addr).await?;
        let addr = listener.local_addr()?;
        let root = CancellationToken::new();
        let registry = Arc::new(SessionRegistry::new(root.clone()));
        Ok(Self {
            config: Arc::new(config),
            adapters,
            registry,
            root,
            listener,
            addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Token that stops the accept loop and cancels every session.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.root.clone()
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    /// Accept connections until the shutdown token fires.
    pub async fn run(self) {
        info!("voxserve listening on ws://{}", self.addr);
        let reaper = self.registry.spawn_reaper(
            self.config.timeouts.reaper_interval(),
            self.config.timeouts.idle_session(),
        );

        loop {
            tokio::select! {
                _ = self.root.cancelled() => {
                    info!("server shutting down");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        info!("new connection from {peer}");
                        let config = self.config.clone();
                        let adapters = self.adapters.clone();
                        let registry = self.registry.clone();
                        tokio::spawn(async move {
                            if let Err(e) =
                                handle_connection(stream, config, adapters, registry).await
                            {
                                error!("connection error from {peer}: {e}");
                            }
                        });
                    }
                    Err(e) => {
                        error!("failed to accept connection: {e}");
                    }
                }
            }
        }
        let _ = reaper.await;
    }
}

// ---------------------------------------------------------------------------
// Per-connection wiring
// ---------------------------------------------------------------------------

async fn handle_connection(
    stream: TcpStream,
    config: Arc<Config>,
    adapters: AdapterSet,
    registry: Arc<SessionRegistry>,
) -> anyhow::Result<()> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let session = registry.create().await;
    let session_id = session.session_id.clone();
    let metrics = Arc::new(SessionMetrics::new());

    let (sink, mut ws_rx) = ws.split();

    let (outbound, outbound_rx, epoch) = OutboundSender::channel(
        config.queues.outbound,
        config.timeouts.pcm_send_stall(),
    );
    let scheduler = tokio::spawn(run_scheduler(
        outbound_rx,
        epoch,
        sink,
        metrics.clone(),
        session.cancel.clone(),
    ));

    let (events_tx, events_rx) = mpsc::channel(config.queues.mailbox.max(1));
    let (phase_tx, phase_rx) = watch::channel(TurnPhase::Idle);
    let asr_feed: SharedAsrFeed = Arc::new(std::sync::Mutex::new(None));

    let driver = tokio::spawn(
        Orchestrator::new(
            session.clone(),
            config.clone(),
            adapters,
            outbound.clone(),
            events_rx,
            events_tx.clone(),
            phase_tx,
            asr_feed.clone(),
            metrics.clone(),
        )
        .run(),
    );

    let mut gate = BargeInGate::new(&config.barge_in);
    demux(
        &mut ws_rx,
        &session,
        &events_tx,
        &outbound,
        &phase_rx,
        &asr_feed,
        &mut gate,
        &metrics,
    )
    .await;

    // Teardown: cancel everything in parallel, await exits, then retire.
    session.cancel.cancel();
    let _ = driver.await;
    let _ = scheduler.await;
    registry.remove(&session_id).await;
    info!(%session_id, "connection closed");
    Ok(())
}

/// Inbound demux: routes text frames to the state machine and binary frames
/// to the recognizer, running the barge-in gate on the way past.
#[allow(clippy::too_many_arguments)]
async fn demux(
    ws_rx: &mut SplitStream<WebSocketStream<TcpStream>>,
    session: &SessionHandle,
    events_tx: &mpsc::Sender<SessionEvent>,
    outbound: &OutboundSender,
    phase_rx: &watch::Receiver<TurnPhase>,
    asr_feed: &SharedAsrFeed,
    gate: &mut BargeInGate,
    metrics: &SessionMetrics,
) {
    let mut last_report = Instant::now();
    loop {
        let msg = tokio::select! {
            _ = session.cancel.cancelled() => break,
            msg = ws_rx.next() => match msg {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    warn!(session_id = %session.session_id, "websocket read error: {e}");
                    break;
                }
                None => break,
            },
        };
        session.touch();

        match msg {
            Message::Text(text) => match ClientCommand::parse(&text) {
                Ok(cmd) => {
                    if events_tx.send(SessionEvent::Command(cmd)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    metrics.record_malformed();
                    let _ = events_tx.send(SessionEvent::ProtocolError(e)).await;
                }
            },
            Message::Binary(data) => {
                metrics.record_inbound(data.len());
                match InboundAudioFrame::decode(&data) {
                    Ok(frame) => {
                        if phase_rx.borrow().accepts_barge_in() && gate.observe(&frame) {
                            info!(session_id = %session.session_id, "barge-in detected");
                            let _ = events_tx.send(SessionEvent::BargeIn).await;
                        }
                        // FIFO with backpressure into the recognizer; quietly
                        // discarded while recognition is closed. Header-only
                        // frames carry nothing worth forwarding.
                        let feed = if frame.pcm.is_empty() {
                            None
                        } else {
                            asr_feed.lock().ok().and_then(|slot| slot.clone())
                        };
                        if let Some(tx) = feed {
                            tokio::select! {
                                _ = session.cancel.cancelled() => break,
                                sent = tx.send(frame.pcm) => {
                                    if sent.is_err() {
                                        debug!(session_id = %session.session_id, "asr feed closed");
                                    }
                                }
                            }
                        }
                    }
                    Err(e) => {
                        metrics.record_malformed();
                        let _ = events_tx.send(SessionEvent::ProtocolError(e)).await;
                    }
                }
                if last_report.elapsed() > AUDIO_REPORT_INTERVAL {
                    metrics.log_summary(&session.session_id);
                    last_report = Instant::now();
                }
            }
            Message::Ping(payload) => outbound.pong(payload).await,
            Message::Close(_) => {
                info!(session_id = %session.session_id, "client closed channel");
                break;
            }
            _ => {}
        }
    }
    let _ = events_tx.send(SessionEvent::ClientGone).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::scripted::{ScriptedAsr, ScriptedLlm, ScriptedTts};

    fn test_adapters() -> AdapterSet {
        AdapterSet {
            asr: Arc::new(ScriptedAsr::new(vec![], 1_000_000)),
            llm: Arc::new(ScriptedLlm::echo()),
            tts: Arc::new(ScriptedTts::new()),
        }
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.server.port = 0;
        config
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let server = VoiceServer::bind(test_config(), test_adapters())
            .await
            .unwrap();
        assert_ne!(server.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_accept_loop() {
        let server = VoiceServer::bind(test_config(), test_adapters())
            .await
            .unwrap();
        let token = server.shutdown_token();
        let handle = tokio::spawn(server.run());
        token.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("server should stop promptly")
            .unwrap();
    }

    #[tokio::test]
    async fn test_connection_creates_and_retires_session() {
        let server = VoiceServer::bind(test_config(), test_adapters())
            .await
            .unwrap();
        let addr = server.local_addr();
        let registry = server.registry();
        let token = server.shutdown_token();
        tokio::spawn(server.run());

        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(registry.len().await, 1);

        drop(ws);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(registry.is_empty().await);

        token.cancel();
    }
}
