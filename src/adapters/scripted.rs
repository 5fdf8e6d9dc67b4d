//! Deterministic scripted adapters.
//!
//! These back the integration test suite and `serve`'s demo mode: the ASR
//! script fires utterances after a fixed volume of fed audio, the LLM plays
//! back canned token sequences (or echoes), and the TTS emits synthetic PCM
//! proportional to the segment length. All three honor cancellation the same
//! way real providers are required to.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::adapters::base::{
    AsrAdapter, AsrEvent, AsrHandle, AudioSpec, ChatMessage, LlmAdapter, LlmChunk, LlmStream,
    TtsAdapter, TtsChunk, TtsStream,
};
use crate::errors::{AdapterError, AdapterKind};

// ---------------------------------------------------------------------------
// ASR
// ---------------------------------------------------------------------------

/// One scripted utterance: interim hypotheses followed by the final text.
#[derive(Debug, Clone)]
pub struct ScriptedUtterance {
    pub partials: Vec<String>,
    pub final_text: String,
}

impl ScriptedUtterance {
    pub fn new(partials: &[&str], final_text: &str) -> Self {
        Self {
            partials: partials.iter().map(|s| s.to_string()).collect(),
            final_text: final_text.to_string(),
        }
    }
}

/// Scripted recognizer: after every `trigger_bytes` of fed PCM it emits the
/// next utterance from its queue (partials, then the final).
pub struct ScriptedAsr {
    script: Arc<Mutex<VecDeque<ScriptedUtterance>>>,
    trigger_bytes: usize,
}

impl ScriptedAsr {
    pub fn new(utterances: Vec<ScriptedUtterance>, trigger_bytes: usize) -> Self {
        Self {
            script: Arc::new(Mutex::new(utterances.into_iter().collect())),
            trigger_bytes,
        }
    }

    /// A single-utterance script with two partial hypotheses.
    pub fn single(text: &str, trigger_bytes: usize) -> Self {
        let half: String = text.chars().take(text.chars().count() / 2).collect();
        Self::new(
            vec![ScriptedUtterance::new(&[half.as_str(), text], text)],
            trigger_bytes,
        )
    }

    fn pop_next(script: &Mutex<VecDeque<ScriptedUtterance>>) -> Option<ScriptedUtterance> {
        script.lock().ok().and_then(|mut q| q.pop_front())
    }
}

#[async_trait]
impl AsrAdapter for ScriptedAsr {
    async fn open(
        &self,
        session_id: &str,
        _language: &str,
        _spec: AudioSpec,
    ) -> Result<AsrHandle, AdapterError> {
        let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<u8>>(64);
        let (event_tx, events) = mpsc::channel(64);
        let script = self.script.clone();
        let trigger = self.trigger_bytes.max(1);

        debug!(session_id, "scripted asr stream opened");
        tokio::spawn(async move {
            let mut fed = 0usize;
            while let Some(chunk) = audio_rx.recv().await {
                fed += chunk.len();
                while fed >= trigger {
                    fed -= trigger;
                    match Self::pop_next(&script) {
                        Some(u) => {
                            for p in &u.partials {
                                if event_tx.send(AsrEvent::Partial(p.clone())).await.is_err() {
                                    return;
                                }
                            }
                            if event_tx
                                .send(AsrEvent::Final(u.final_text.clone()))
                                .await
                                .is_err()
                            {
                                return;
                            }
                        }
                        None => {
                            // Script exhausted: keep absorbing audio quietly.
                            fed = 0;
                        }
                    }
                }
            }
        });

        Ok(AsrHandle { audio_tx, events })
    }
}

// ---------------------------------------------------------------------------
// LLM
// ---------------------------------------------------------------------------

enum LlmScript {
    /// Canned token sequences, one per generation, in order.
    Replies(Mutex<VecDeque<Vec<String>>>),
    /// Echo the user text back.
    Echo,
    /// Never emit anything (deadline testing).
    Silent,
}

/// Scripted generator.
pub struct ScriptedLlm {
    script: LlmScript,
    token_delay: Duration,
    fail_marker: Option<String>,
}

impl ScriptedLlm {
    pub fn echo() -> Self {
        Self {
            script: LlmScript::Echo,
            token_delay: Duration::from_millis(5),
            fail_marker: None,
        }
    }

    pub fn with_replies(replies: Vec<Vec<&str>>) -> Self {
        let replies = replies
            .into_iter()
            .map(|r| r.into_iter().map(|t| t.to_string()).collect())
            .collect();
        Self {
            script: LlmScript::Replies(Mutex::new(replies)),
            token_delay: Duration::from_millis(5),
            fail_marker: None,
        }
    }

    /// A generator that never produces a token.
    pub fn silent() -> Self {
        Self {
            script: LlmScript::Silent,
            token_delay: Duration::ZERO,
            fail_marker: None,
        }
    }

    /// Delay between emitted tokens.
    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }

    /// Fail the generation stream when the user text contains `marker`.
    pub fn with_fail_marker(mut self, marker: &str) -> Self {
        self.fail_marker = Some(marker.to_string());
        self
    }

    fn next_tokens(&self, user_text: &str) -> Vec<String> {
        match &self.script {
            LlmScript::Replies(q) => {
                if let Some(tokens) = q.lock().ok().and_then(|mut q| q.pop_front()) {
                    return tokens;
                }
                vec![format!("You said {user_text}.")]
            }
            LlmScript::Echo => vec![
                "You said ".to_string(),
                user_text.to_string(),
                ".".to_string(),
            ],
            LlmScript::Silent => Vec::new(),
        }
    }
}

#[async_trait]
impl LlmAdapter for ScriptedLlm {
    async fn generate(
        &self,
        _system_prompt: &str,
        _history: &[ChatMessage],
        user_text: &str,
        cancel: CancellationToken,
    ) -> Result<LlmStream, AdapterError> {
        let (tx, rx) = mpsc::channel(64);

        if let Some(marker) = &self.fail_marker {
            if user_text.contains(marker.as_str()) {
                let _ = tx
                    .send(LlmChunk::Error(AdapterError::stream(
                        AdapterKind::Llm,
                        "scripted generation failure",
                    )))
                    .await;
                return Ok(LlmStream { rx });
            }
        }

        if matches!(self.script, LlmScript::Silent) {
            tokio::spawn(async move {
                // Hold the sender open so the stream stays pending.
                cancel.cancelled().await;
                drop(tx);
            });
            return Ok(LlmStream { rx });
        }

        let tokens = self.next_tokens(user_text);
        let delay = self.token_delay;
        tokio::spawn(async move {
            for token in tokens {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                if tx.send(LlmChunk::Token(token)).await.is_err() {
                    return;
                }
            }
            let _ = tx.send(LlmChunk::Done).await;
        });

        Ok(LlmStream { rx })
    }
}

// ---------------------------------------------------------------------------
// TTS
// ---------------------------------------------------------------------------

/// Scripted synthesizer: emits silence PCM proportional to the text length.
pub struct ScriptedTts {
    bytes_per_char: usize,
    chunk_bytes: usize,
    chunk_delay: Duration,
    first_chunk_delay: Duration,
    fail_marker: Option<String>,
}

impl ScriptedTts {
    pub fn new() -> Self {
        Self {
            bytes_per_char: 64,
            chunk_bytes: 960,
            chunk_delay: Duration::from_millis(5),
            first_chunk_delay: Duration::ZERO,
            fail_marker: None,
        }
    }

    /// Delay between PCM chunks (controls how long playback streams).
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Extra delay before the first chunk (deadline testing).
    pub fn with_first_chunk_delay(mut self, delay: Duration) -> Self {
        self.first_chunk_delay = delay;
        self
    }

    /// Fail synthesis when the segment text contains `marker`.
    pub fn with_fail_marker(mut self, marker: &str) -> Self {
        self.fail_marker = Some(marker.to_string());
        self
    }
}

impl Default for ScriptedTts {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TtsAdapter for ScriptedTts {
    async fn synthesize(
        &self,
        text: &str,
        cancel: CancellationToken,
    ) -> Result<TtsStream, AdapterError> {
        let (tx, rx) = mpsc::channel(16);

        if let Some(marker) = &self.fail_marker {
            if text.contains(marker.as_str()) {
                let _ = tx
                    .send(TtsChunk::Error(AdapterError::stream(
                        AdapterKind::Tts,
                        "scripted synthesis failure",
                    )))
                    .await;
                return Ok(TtsStream { rx });
            }
        }

        // Round up to whole chunks of whole samples.
        let total = (text.len().max(1) * self.bytes_per_char + 1) & !1;
        let chunk_bytes = self.chunk_bytes.max(2) & !1;
        let chunk_delay = self.chunk_delay;
        let first_delay = self.first_chunk_delay;

        tokio::spawn(async move {
            if !first_delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(first_delay) => {}
                }
            }
            let mut remaining = total;
            while remaining > 0 {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(chunk_delay) => {}
                }
                let n = remaining.min(chunk_bytes);
                remaining -= n;
                if tx.send(TtsChunk::Pcm(vec![0u8; n])).await.is_err() {
                    return;
                }
            }
            let _ = tx.send(TtsChunk::Done).await;
        });

        Ok(TtsStream { rx })
    }
}
