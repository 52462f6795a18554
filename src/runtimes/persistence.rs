//! Serde-friendly persisted shapes for checkpoints.
//!
//! Pure data transformation: backends serialize through these structs so
//! the stored JSON stays decoupled from the in-memory types. Timestamps
//! persist as RFC3339 strings to keep `chrono::DateTime` out of the
//! serialized shape. No I/O happens here.

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::checkpointer::Checkpoint;
use crate::state::WorkflowState;

/// Persisted checkpoint representation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedCheckpoint {
    pub session_id: String,
    pub step: u64,
    pub state: WorkflowState,
    /// RFC3339 creation time.
    pub created_at: String,
    /// RFC3339 expiry deadline.
    pub expires_at: String,
}

/// Conversion and serialization errors for persistence models.
#[derive(Debug, Error, Diagnostic)]
pub enum PersistenceError {
    #[error("invalid {field} timestamp: {value}")]
    #[diagnostic(
        code(taskloom::persistence::timestamp),
        help("Timestamps must be RFC3339 strings.")
    )]
    Timestamp { field: &'static str, value: String },

    #[error("JSON serialization/deserialization failed: {source}")]
    #[diagnostic(code(taskloom::persistence::serde))]
    Serde {
        #[source]
        source: serde_json::Error,
    },
}

impl PersistedCheckpoint {
    pub fn to_json_string(&self) -> Result<String, PersistenceError> {
        serde_json::to_string(self).map_err(|source| PersistenceError::Serde { source })
    }

    pub fn from_json_str(s: &str) -> Result<Self, PersistenceError> {
        serde_json::from_str(s).map_err(|source| PersistenceError::Serde { source })
    }
}

impl From<&Checkpoint> for PersistedCheckpoint {
    fn from(cp: &Checkpoint) -> Self {
        PersistedCheckpoint {
            session_id: cp.session_id.clone(),
            step: cp.step,
            state: cp.state.clone(),
            created_at: cp.created_at.to_rfc3339(),
            expires_at: cp.expires_at.to_rfc3339(),
        }
    }
}

impl TryFrom<PersistedCheckpoint> for Checkpoint {
    type Error = PersistenceError;

    fn try_from(p: PersistedCheckpoint) -> Result<Self, PersistenceError> {
        let created_at = parse_rfc3339("created_at", &p.created_at)?;
        let expires_at = parse_rfc3339("expires_at", &p.expires_at)?;
        Ok(Checkpoint {
            session_id: p.session_id,
            step: p.step,
            state: p.state,
            created_at,
            expires_at,
        })
    }
}

fn parse_rfc3339(field: &'static str, value: &str) -> Result<DateTime<Utc>, PersistenceError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| PersistenceError::Timestamp {
            field,
            value: value.to_string(),
        })
}
