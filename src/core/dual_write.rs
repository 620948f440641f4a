//! The commit pipeline every mutation goes through.
//!
//! Order is fixed: append to the log (durable), fold into the in-memory
//! state, write the document, then bring the index up to the same sequence.
//! If the process dies anywhere after the append, the log already holds the
//! event and recovery finishes the remaining writes.

use crate::core::backend::Backend;
use crate::core::document;
use crate::core::error::BoardError;
use crate::core::event_log::{EventLog, LogWriter};
use crate::core::events::{Event, EventRecord};
use crate::core::index::IndexStore;
use crate::core::state::BoardState;
use chrono::{DateTime, Utc};
use tracing::debug;

/// Brings the index up to `target`, reading missing records from the log.
/// Returns how many records were applied.
pub fn sync_index(log: &EventLog, index: &IndexStore, target: u64) -> Result<u64, BoardError> {
    let applied = index.applied_sequence()?;
    if applied > target {
        return Err(BoardError::ValidationError(format!(
            "board.db is at sequence {} but the event log ends at {}",
            applied, target
        )));
    }
    if applied == target {
        return Ok(0);
    }
    let mut count = 0u64;
    for record in log.read_from(applied + 1)? {
        let record = record?;
        if record.sequence > target {
            break;
        }
        if index.apply(&record)? {
            count += 1;
        }
    }
    if count > 0 {
        debug!(from = applied, to = target, events = count, "caught up board index");
    }
    Ok(count)
}

/// One locked mutation window. Every event committed through it is journaled,
/// then reflected in both representations before `commit` returns.
pub struct BoardTxn<'a> {
    pub(crate) writer: LogWriter<'a>,
    pub(crate) log: &'a EventLog,
    pub(crate) backend: &'a dyn Backend,
    pub(crate) index: &'a IndexStore,
    pub(crate) state: &'a mut BoardState,
    pub(crate) now: DateTime<Utc>,
}

impl<'a> BoardTxn<'a> {
    /// Clock reading taken when the window opened. Every event in it shares this time.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Derived state, current with every event in the log.
    pub fn state(&self) -> &BoardState {
        self.state
    }

    pub fn commit(&mut self, event: Event) -> Result<EventRecord, BoardError> {
        let record = self.writer.append(event, self.now)?;
        self.state.apply(&record)?;
        document::write_document(self.backend, self.state)?;
        let applied = self.index.applied_sequence()?;
        if applied + 1 == record.sequence {
            self.index.apply(&record)?;
        } else {
            sync_index(self.log, self.index, record.sequence)?;
        }
        debug!(
            sequence = record.sequence,
            event = record.event.event_type(),
            "committed event"
        );
        Ok(record)
    }
}
