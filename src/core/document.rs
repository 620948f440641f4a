//! Representation A: the sectioned board document (`board.json`).
//!
//! Sections are fixed (agents, findings, claims, tasks) and each is sorted by
//! id, so rendering the same state always yields the same bytes.

use crate::core::backend::Backend;
use crate::core::error::BoardError;
use crate::core::model::{Agent, ClaimChain, Finding, Task};
use crate::core::state::BoardState;
use serde::{Deserialize, Serialize};

pub const DOCUMENT_FORMAT: &str = "claimboard.board/1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardDocument {
    pub format: String,
    /// Sequence of the last event reflected in this document.
    pub sequence: u64,
    pub agents: Vec<Agent>,
    pub findings: Vec<Finding>,
    pub claims: Vec<ClaimChain>,
    pub tasks: Vec<Task>,
}

impl BoardDocument {
    pub fn empty() -> Self {
        Self::from_state(&BoardState::new())
    }

    pub fn from_state(state: &BoardState) -> Self {
        Self {
            format: DOCUMENT_FORMAT.to_string(),
            sequence: state.sequence,
            agents: state.agents.values().cloned().collect(),
            findings: state.findings.values().cloned().collect(),
            claims: state.chains.values().cloned().collect(),
            tasks: state.tasks.values().cloned().collect(),
        }
    }

    pub fn render(&self) -> Result<Vec<u8>, BoardError> {
        let mut body = serde_json::to_vec_pretty(self)?;
        body.push(b'\n');
        Ok(body)
    }

    pub fn parse(body: &[u8]) -> Result<Self, BoardError> {
        let doc: BoardDocument = serde_json::from_slice(body)?;
        if doc.format != DOCUMENT_FORMAT {
            return Err(BoardError::ValidationError(format!(
                "unsupported board document format '{}'",
                doc.format
            )));
        }
        Ok(doc)
    }
}

/// Writes the document for `state`. Replaces the previous one atomically.
pub fn write_document(backend: &dyn Backend, state: &BoardState) -> Result<(), BoardError> {
    backend.write_document(&BoardDocument::from_state(state).render()?)
}

/// `None` when no document has been written yet.
pub fn read_document(backend: &dyn Backend) -> Result<Option<BoardDocument>, BoardError> {
    match backend.read_document()? {
        Some(body) => BoardDocument::parse(&body).map(Some),
        None => Ok(None),
    }
}
