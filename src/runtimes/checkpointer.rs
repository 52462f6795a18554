//! Checkpoint persistence for workflow sessions.
//!
//! The engine saves a checkpoint synchronously after every node execution,
//! so a crash between steps loses at most the in-flight node. Saves are
//! step-ordered: a checkpoint with a lower step than the stored one is
//! ignored, which makes retried saves and racing writers harmless.
//!
//! Checkpoints carry an expiry deadline; expired sessions read as absent
//! and are physically removed by [`Checkpointer::sweep_expired`].

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use miette::Diagnostic;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::state::WorkflowState;

/// Default checkpoint retention: seven days.
pub const DEFAULT_CHECKPOINT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// One durable snapshot of a session's progress.
#[derive(Clone, Debug, PartialEq)]
pub struct Checkpoint {
    pub session_id: String,
    /// Mirror of `state.step`; used for save ordering.
    pub step: u64,
    pub state: WorkflowState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Snapshot the given state with an expiry `ttl` from now.
    #[must_use]
    pub fn from_state(state: &WorkflowState, ttl: Duration) -> Self {
        let now = Utc::now();
        let ttl = ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::days(7));
        Self {
            session_id: state.session_id.clone(),
            step: state.step,
            state: state.clone(),
            created_at: now,
            expires_at: now + ttl,
        }
    }

    /// Whether this checkpoint has passed its expiry deadline.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Errors surfaced by checkpoint backends.
#[derive(Debug, Error, Diagnostic)]
pub enum CheckpointerError {
    #[error("checkpoint backend error: {message}")]
    #[diagnostic(
        code(taskloom::checkpoint::backend),
        help("Check that the backing store is reachable and writable.")
    )]
    Backend { message: String },

    #[error("checkpoint serialization failed: {source}")]
    #[diagnostic(code(taskloom::checkpoint::serde))]
    Serde {
        #[source]
        source: serde_json::Error,
    },

    #[error("checkpoint error: {message}")]
    #[diagnostic(code(taskloom::checkpoint::other))]
    Other { message: String },
}

pub type Result<T> = std::result::Result<T, CheckpointerError>;

/// Durable storage for session checkpoints.
///
/// Implementations must honor save ordering (a lower step never
/// overwrites a higher one) and treat expired checkpoints as absent.
#[async_trait]
pub trait Checkpointer: Send + Sync + fmt::Debug {
    /// Persist a checkpoint, keeping only the latest step per session.
    async fn save(&self, checkpoint: Checkpoint) -> Result<()>;

    /// Load the latest unexpired checkpoint for a session.
    async fn load_latest(&self, session_id: &str) -> Result<Option<Checkpoint>>;

    /// Session ids with an unexpired checkpoint.
    async fn list_sessions(&self) -> Result<Vec<String>>;

    /// Physically remove expired checkpoints; returns the count removed.
    async fn sweep_expired(&self) -> Result<u64>;
}

/// Process-local checkpoint store for tests and ephemeral deployments.
#[derive(Default)]
pub struct InMemoryCheckpointer {
    inner: Mutex<FxHashMap<String, Checkpoint>>,
}

impl InMemoryCheckpointer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl fmt::Debug for InMemoryCheckpointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryCheckpointer")
            .field("sessions", &self.inner.lock().len())
            .finish()
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn save(&self, checkpoint: Checkpoint) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.get(&checkpoint.session_id)
            && existing.step > checkpoint.step
        {
            tracing::debug!(
                session_id = %checkpoint.session_id,
                stored = existing.step,
                incoming = checkpoint.step,
                "stale checkpoint save ignored"
            );
            return Ok(());
        }
        inner.insert(checkpoint.session_id.clone(), checkpoint);
        Ok(())
    }

    async fn load_latest(&self, session_id: &str) -> Result<Option<Checkpoint>> {
        let now = Utc::now();
        Ok(self
            .inner
            .lock()
            .get(session_id)
            .filter(|cp| !cp.is_expired(now))
            .cloned())
    }

    async fn list_sessions(&self) -> Result<Vec<String>> {
        let now = Utc::now();
        let mut sessions: Vec<String> = self
            .inner
            .lock()
            .values()
            .filter(|cp| !cp.is_expired(now))
            .map(|cp| cp.session_id.clone())
            .collect();
        sessions.sort();
        Ok(sessions)
    }

    async fn sweep_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        let before = inner.len();
        inner.retain(|_, cp| !cp.is_expired(now));
        Ok((before - inner.len()) as u64)
    }
}
