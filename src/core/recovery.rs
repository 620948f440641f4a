//! Startup recovery, checkpoints, and replay.
//!
//! Recovery rebuilds the in-memory projection from the event log (optionally
//! starting at a checkpoint), repairs a torn final record, finishes any dual
//! write a crash interrupted, and records the expiration of chains whose
//! deadline passed while nobody was looking.

use crate::core::document::{self, BoardDocument};
use crate::core::dual_write::{self, BoardTxn};
use crate::core::error::BoardError;
use crate::core::event_log::{EventLog, LogTail};
use crate::core::events::Event;
use crate::core::state::{self, BoardState};
use crate::core::store::Board;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const CHECKPOINT_FORMAT: &str = "claimboard.checkpoint/1";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub from_checkpoint: bool,
    pub events_replayed: u64,
    pub last_sequence: u64,
    pub torn_bytes_discarded: u64,
    pub expired_chains: Vec<String>,
    pub document_rewritten: bool,
    pub index_events_applied: u64,
    pub index_rebuilt: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckpointInfo {
    pub sequence: u64,
    pub log_offset: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Checkpoint {
    format: String,
    sequence: u64,
    log_offset: u64,
    created_at: DateTime<Utc>,
    state: BoardState,
}

/// A checkpoint that cannot be read is ignored; the log alone is authoritative.
fn load_checkpoint(board: &Board) -> Result<Option<Checkpoint>, BoardError> {
    let Some(body) = board.backend.read_checkpoint()? else {
        return Ok(None);
    };
    match serde_json::from_slice::<Checkpoint>(&body) {
        Ok(cp) if cp.format == CHECKPOINT_FORMAT && cp.state.sequence == cp.sequence => {
            Ok(Some(cp))
        }
        Ok(cp) => {
            warn!(format = %cp.format, sequence = cp.sequence, "ignoring inconsistent checkpoint");
            Ok(None)
        }
        Err(e) => {
            warn!(error = %e, "ignoring unreadable checkpoint");
            Ok(None)
        }
    }
}

pub fn recover(board: &Board) -> Result<RecoveryReport, BoardError> {
    let mut guard = board.lock_state()?;
    let mut report = RecoveryReport::default();

    let mut state = BoardState::new();
    let mut start = LogTail::default();
    if let Some(cp) = load_checkpoint(board)? {
        state = cp.state;
        state.reindex();
        start = LogTail {
            sequence: cp.sequence,
            offset: cp.log_offset,
        };
        report.from_checkpoint = true;
    }

    board.log.resume_at(start);
    let mut writer = match board.log.lock() {
        Ok(w) => w,
        Err(e) if report.from_checkpoint && e.is_fatal() => {
            warn!(error = %e, "checkpoint does not match the event log; replaying from the start");
            report.from_checkpoint = false;
            state = BoardState::new();
            board.log.resume_at(LogTail::default());
            board.log.lock()?
        }
        Err(e) => return Err(e),
    };
    report.torn_bytes_discarded = writer.torn_bytes();
    for record in writer.take_pending() {
        if state.apply(&record)? {
            report.events_replayed += 1;
        }
    }
    let tail = writer.tail();
    report.last_sequence = tail.sequence;

    let expected = BoardDocument::from_state(&state);
    let current = match board.backend.read_document()? {
        Some(body) => BoardDocument::parse(&body).ok(),
        None => None,
    };
    if current.as_ref() != Some(&expected) {
        document::write_document(&*board.backend, &state)?;
        report.document_rewritten = true;
    }

    if board.index.applied_sequence()? > tail.sequence {
        report.index_events_applied = board.index.rebuild(board.log.read_from(0)?)?;
        report.index_rebuilt = true;
    } else {
        report.index_events_applied = dual_write::sync_index(&board.log, &board.index, tail.sequence)?;
        if board.index.load_document()? != expected {
            report.index_events_applied = board.index.rebuild(board.log.read_from(0)?)?;
            report.index_rebuilt = true;
        }
    }

    let now = board.now();
    let expired = state.expired_active_chains(now);
    let mut txn = BoardTxn {
        writer,
        log: &board.log,
        backend: &*board.backend,
        index: &board.index,
        state: &mut state,
        now,
    };
    for chain_id in expired {
        txn.commit(Event::ExpireChain {
            chain_id: chain_id.clone(),
        })?;
        report.expired_chains.push(chain_id);
    }
    let last_sequence = txn.state().sequence;
    drop(txn);
    report.last_sequence = last_sequence;
    *guard = state;

    info!(
        backend = %board.backend.describe(),
        from_checkpoint = report.from_checkpoint,
        replayed = report.events_replayed,
        sequence = report.last_sequence,
        torn_bytes = report.torn_bytes_discarded,
        expired = report.expired_chains.len(),
        document_rewritten = report.document_rewritten,
        index_rebuilt = report.index_rebuilt,
        "board recovered"
    );
    Ok(report)
}

/// Snapshots the derived state at the current end of the log.
/// The log itself is kept whole, so replay from sequence 1 stays valid.
pub fn checkpoint(board: &Board) -> Result<CheckpointInfo, BoardError> {
    board.mutate(|txn| {
        let tail = txn.writer.tail();
        let cp = Checkpoint {
            format: CHECKPOINT_FORMAT.to_string(),
            sequence: tail.sequence,
            log_offset: tail.offset,
            created_at: txn.now(),
            state: txn.state().clone(),
        };
        let mut body = serde_json::to_vec_pretty(&cp)?;
        body.push(b'\n');
        txn.backend.write_checkpoint(&body)?;
        info!(sequence = cp.sequence, offset = cp.log_offset, "checkpoint written");
        Ok(CheckpointInfo {
            sequence: cp.sequence,
            log_offset: cp.log_offset,
            created_at: cp.created_at,
        })
    })
}

/// Derived state from every record in the log, starting at sequence 1.
pub fn replay_from_scratch(log: &EventLog) -> Result<BoardState, BoardError> {
    state::replay(log.read_from(0)?)
}
