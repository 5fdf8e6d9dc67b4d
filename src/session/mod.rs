//! Per-session dialogue orchestration.
//!
//! One connected client maps to one session: a state-machine driver task that
//! owns all mutable session state, an outbound scheduler that owns the socket
//! write half, an ASR event pump, and one transient task per conversation
//! turn. Everything else communicates with the driver by posting events to
//! its mailbox.

pub mod bargein;
pub mod events;
pub mod metrics;
pub mod orchestrator;
pub mod outbound;
pub mod registry;
pub mod segmenter;
pub mod state;
pub mod turn;

pub use bargein::BargeInGate;
pub use events::{SessionEvent, TurnDeadline};
pub use metrics::SessionMetrics;
pub use orchestrator::Orchestrator;
pub use outbound::{run_scheduler, OutboundSender, PcmChunk};
pub use registry::{SessionHandle, SessionRegistry};
pub use segmenter::{SentenceSegmenter, SpeechSegment};
pub use state::{ConversationHistory, TurnContext, TurnPhase};
