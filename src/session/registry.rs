//! Session registry: creation, lookup, retirement, idle reaping.
//!
//! The only process-wide mutable state. Entries are `Arc`-counted so
//! in-flight operations keep a stable handle even while the session is being
//! retired. Cancellation is hierarchical: the registry root token is the
//! parent of every session token.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Liveness record for one connected client.
#[derive(Debug)]
pub struct SessionHandle {
    pub session_id: String,
    pub created_at: DateTime<Local>,
    /// Session root token; child of the server root, parent of turn tokens.
    pub cancel: CancellationToken,
    last_activity: Mutex<Instant>,
}

impl SessionHandle {
    fn new(session_id: String, cancel: CancellationToken) -> Self {
        Self {
            session_id,
            created_at: Local::now(),
            cancel,
            last_activity: Mutex::new(Instant::now()),
        }
    }

    /// Record client activity (any inbound frame).
    pub fn touch(&self) {
        if let Ok(mut t) = self.last_activity.lock() {
            *t = Instant::now();
        }
    }

    /// Time since the last inbound frame.
    pub fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO)
    }
}

/// Process-wide mapping from session id to live sessions.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
    root: CancellationToken,
}

impl SessionRegistry {
    pub fn new(root: CancellationToken) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            root,
        }
    }

    /// Create and register a new session with a fresh id.
    pub async fn create(&self) -> Arc<SessionHandle> {
        let session_id = Uuid::new_v4().to_string();
        let handle = Arc::new(SessionHandle::new(
            session_id.clone(),
            self.root.child_token(),
        ));
        self.sessions
            .write()
            .await
            .insert(session_id.clone(), handle.clone());
        info!(%session_id, "session created");
        handle
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Retire a session. In-flight holders of the `Arc` stay valid.
    pub async fn remove(&self, session_id: &str) -> Option<Arc<SessionHandle>> {
        let removed = self.sessions.write().await.remove(session_id);
        if removed.is_some() {
            info!(%session_id, "session removed");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Cancel and retire every session idle past `max_idle`. Returns how many
    /// were reaped.
    pub async fn reap_idle(&self, max_idle: Duration) -> usize {
        let idle: Vec<Arc<SessionHandle>> = {
            let sessions = self.sessions.read().await;
            sessions
                .values()
                .filter(|h| h.idle_for() > max_idle)
                .cloned()
                .collect()
        };

        for handle in &idle {
            info!(
                session_id = %handle.session_id,
                idle_secs = handle.idle_for().as_secs(),
                "reaping idle session"
            );
            handle.cancel.cancel();
            self.remove(&handle.session_id).await;
        }
        idle.len()
    }

    /// Spawn the periodic idle sweep. Runs until the root token fires.
    pub fn spawn_reaper(
        self: &Arc<Self>,
        interval: Duration,
        max_idle: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        let root = self.root.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = root.cancelled() => break,
                    _ = ticker.tick() => {
                        let reaped = registry.reap_idle(max_idle).await;
                        if reaped > 0 {
                            debug!(reaped, "idle session sweep");
                        }
                    }
                }
            }
        })
    }
}
