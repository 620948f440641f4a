//! Journaled state changes.
//!
//! Every mutation of the board is one [`Event`] wrapped in an [`EventRecord`]
//! carrying its sequence number, timestamp, and a SHA-256 checksum over both.
//! Replay trusts nothing it cannot verify: a record whose checksum does not
//! match is corruption, not a skippable line.

use crate::core::error::BoardError;
use crate::core::model::{AgentStatus, FindingKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    RegisterAgent {
        agent_id: String,
        task: String,
        interests: BTreeSet<String>,
    },
    UpdateAgentStatus {
        agent_id: String,
        status: AgentStatus,
    },
    AddFinding {
        finding_id: u64,
        agent_id: String,
        kind: FindingKind,
        content: String,
        tags: BTreeSet<String>,
    },
    ClaimChain {
        chain_id: String,
        agent_id: String,
        files: BTreeSet<String>,
        reason: String,
        ttl_secs: u64,
        expires_at: DateTime<Utc>,
        /// Chains of the same agent folded into this one (renewal).
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        supersedes: Vec<String>,
    },
    ReleaseChain {
        chain_id: String,
        released_by: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        forced: bool,
    },
    ExpireChain {
        chain_id: String,
    },
    AddTask {
        task_id: u64,
        description: String,
        priority: i64,
    },
    ClaimTask {
        task_id: u64,
        agent_id: String,
    },
    CompleteTask {
        task_id: u64,
    },
    Reset,
}

impl Event {
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::RegisterAgent { .. } => "register_agent",
            Event::UpdateAgentStatus { .. } => "update_agent_status",
            Event::AddFinding { .. } => "add_finding",
            Event::ClaimChain { .. } => "claim_chain",
            Event::ReleaseChain { .. } => "release_chain",
            Event::ExpireChain { .. } => "expire_chain",
            Event::AddTask { .. } => "add_task",
            Event::ClaimTask { .. } => "claim_task",
            Event::CompleteTask { .. } => "complete_task",
            Event::Reset => "reset",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub event: Event,
    pub checksum: String,
}

#[derive(Serialize)]
struct RecordBody<'a> {
    sequence: u64,
    timestamp: &'a DateTime<Utc>,
    event: &'a Event,
}

fn body_checksum(
    sequence: u64,
    timestamp: &DateTime<Utc>,
    event: &Event,
) -> Result<String, BoardError> {
    let body = serde_json::to_vec(&RecordBody {
        sequence,
        timestamp,
        event,
    })?;
    Ok(format!("{:x}", Sha256::digest(&body)))
}

impl EventRecord {
    pub fn seal(sequence: u64, timestamp: DateTime<Utc>, event: Event) -> Result<Self, BoardError> {
        let checksum = body_checksum(sequence, &timestamp, &event)?;
        Ok(Self {
            sequence,
            timestamp,
            event,
            checksum,
        })
    }

    pub fn verify(&self) -> Result<(), String> {
        let expected = body_checksum(self.sequence, &self.timestamp, &self.event)
            .map_err(|e| e.to_string())?;
        if expected == self.checksum {
            Ok(())
        } else {
            Err(format!(
                "checksum mismatch for sequence {} (recorded {}, computed {})",
                self.sequence, self.checksum, expected
            ))
        }
    }

    /// One complete log line, newline included.
    pub fn to_line(&self) -> Result<Vec<u8>, BoardError> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }

    /// Parses and verifies one log line found at byte `offset`.
    pub fn parse_line(line: &str, offset: u64) -> Result<Self, BoardError> {
        let record: EventRecord =
            serde_json::from_str(line).map_err(|e| BoardError::CorruptLog {
                offset,
                reason: format!("unparseable record: {}", e),
            })?;
        record
            .verify()
            .map_err(|reason| BoardError::CorruptLog { offset, reason })?;
        Ok(record)
    }
}
