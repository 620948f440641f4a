use chrono::{DateTime, Utc};
use rusqlite;
use serde::Serialize;
use std::fmt;
use std::io;
use thiserror::Error;

/// One requested file that is already held by another agent's live chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictEntry {
    pub file: String,
    pub chain_id: String,
    pub agent_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Full detail of a rejected claim, so the caller can wait, retry a subset, or abort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimConflict {
    pub requested_by: String,
    pub conflicts: Vec<ConflictEntry>,
}

impl ClaimConflict {
    pub fn files(&self) -> Vec<&str> {
        self.conflicts.iter().map(|c| c.file.as_str()).collect()
    }

    pub fn owner_of(&self, file: &str) -> Option<&ConflictEntry> {
        self.conflicts.iter().find(|c| c.file == file)
    }
}

impl fmt::Display for ClaimConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} requested {} file(s) already claimed:",
            self.requested_by,
            self.conflicts.len()
        )?;
        for c in &self.conflicts {
            write!(
                f,
                " {} (chain {}, agent {}, until {})",
                c.file,
                c.chain_id,
                c.agent_id,
                c.expires_at.to_rfc3339()
            )?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum BoardError {
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Config error: {0}")]
    ConfigError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Claim conflict: {0}")]
    Conflict(ClaimConflict),
    #[error("Agent {agent_id} does not own claim chain {chain_id}")]
    Unauthorized { agent_id: String, chain_id: String },
    #[error("Invalid {entity} transition: {from} -> {to}")]
    InvalidTransition {
        entity: String,
        from: String,
        to: String,
    },
    #[error("Corrupt event log at byte {offset}: {reason}")]
    CorruptLog { offset: u64, reason: String },
    #[error("Event sequence gap: expected {expected}, found {found}")]
    SequenceGap { expected: u64, found: u64 },
}

impl BoardError {
    /// Storage failures and log corruption; everything else is an expected, recoverable outcome.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BoardError::RusqliteError(_)
                | BoardError::IoError(_)
                | BoardError::CorruptLog { .. }
                | BoardError::SequenceGap { .. }
        )
    }

    pub fn as_conflict(&self) -> Option<&ClaimConflict> {
        match self {
            BoardError::Conflict(c) => Some(c),
            _ => None,
        }
    }
}
