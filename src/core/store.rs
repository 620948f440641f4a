//! The board handle every component is given.
//!
//! A `Board` owns one storage backend, an injected clock, the in-memory
//! projection of the event log, and its index connection. There is no ambient
//! global: callers pass `&Board` to the claim, findings and task operations, and
//! several boards can live side by side in one process.
//!
//! Writers are serialized at two levels: the projection mutex orders threads
//! sharing this handle, and the backend writer lock orders every handle and
//! process sharing the same storage.

use crate::core::backend::{Backend, FileBackend, MemoryBackend};
use crate::core::config::BoardConfig;
use crate::core::dual_write::BoardTxn;
use crate::core::error::BoardError;
use crate::core::event_log::EventLog;
use crate::core::events::{Event, EventRecord};
use crate::core::index::IndexStore;
use crate::core::recovery::{self, CheckpointInfo, RecoveryReport};
use crate::core::state::BoardState;
use crate::core::time::{Clock, SystemClock};
use crate::core::validate::{self, ConsistencyReport};
use chrono::{DateTime, SubsecRound, Utc};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

pub struct Board {
    pub(crate) config: BoardConfig,
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) log: EventLog,
    pub(crate) index: IndexStore,
    pub(crate) state: Mutex<BoardState>,
}

impl fmt::Debug for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Board")
            .field("backend", &self.backend.describe())
            .field("default_ttl_secs", &self.config.default_ttl_secs)
            .finish_non_exhaustive()
    }
}

impl Board {
    /// Opens (creating if needed) the file-backed board at `config.root` and recovers it.
    pub fn open(config: BoardConfig) -> Result<Self, BoardError> {
        Self::open_with_clock(config, Arc::new(SystemClock))
    }

    pub fn open_with_clock(config: BoardConfig, clock: Arc<dyn Clock>) -> Result<Self, BoardError> {
        let backend = FileBackend::open(&config.root, config.fsync)?;
        Self::with_backend(config, Arc::new(backend), clock)
    }

    /// A board that never touches the filesystem.
    pub fn in_memory(clock: Arc<dyn Clock>) -> Result<Self, BoardError> {
        Self::with_backend(BoardConfig::default(), Arc::new(MemoryBackend::new()), clock)
    }

    pub fn with_backend(
        config: BoardConfig,
        backend: Arc<dyn Backend>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, BoardError> {
        let index = IndexStore::open(&*backend)?;
        let board = Self {
            config,
            log: EventLog::new(backend.clone()),
            backend,
            clock,
            index,
            state: Mutex::new(BoardState::new()),
        };
        board.recover()?;
        Ok(board)
    }

    pub fn config(&self) -> &BoardConfig {
        &self.config
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn backend(&self) -> &dyn Backend {
        &*self.backend
    }

    /// Clock reading at the millisecond precision both representations store.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now().trunc_subsecs(3)
    }

    pub(crate) fn index(&self) -> &IndexStore {
        &self.index
    }

    pub(crate) fn lock_state(&self) -> Result<MutexGuard<'_, BoardState>, BoardError> {
        self.state
            .lock()
            .map_err(|_| BoardError::ValidationError("board state lock poisoned".to_string()))
    }

    /// Runs `f` as the only writer of this board.
    ///
    /// Records appended elsewhere since the last call are folded in first, so
    /// `f` decides against the whole log. Events it commits are durable and
    /// reflected in both representations before this returns.
    pub fn mutate<T, F>(&self, f: F) -> Result<T, BoardError>
    where
        F: FnOnce(&mut BoardTxn<'_>) -> Result<T, BoardError>,
    {
        let mut state = self.lock_state()?;
        let mut writer = self.log.lock()?;
        for record in writer.take_pending() {
            state.apply(&record)?;
        }
        let mut txn = BoardTxn {
            writer,
            log: &self.log,
            backend: &*self.backend,
            index: &self.index,
            state: &mut *state,
            now: self.now(),
        };
        f(&mut txn)
    }

    /// Current derived state, including records appended by other handles.
    pub fn snapshot(&self) -> Result<BoardState, BoardError> {
        self.mutate(|txn| Ok(txn.state().clone()))
    }

    /// Clears agents, findings, claims and tasks. Journaled like any other change.
    pub fn reset(&self) -> Result<EventRecord, BoardError> {
        self.mutate(|txn| txn.commit(Event::Reset))
    }

    pub fn recover(&self) -> Result<RecoveryReport, BoardError> {
        recovery::recover(self)
    }

    pub fn checkpoint(&self) -> Result<CheckpointInfo, BoardError> {
        recovery::checkpoint(self)
    }

    /// Full replay from sequence 1, ignoring any checkpoint and the live projection.
    pub fn replay_from_scratch(&self) -> Result<BoardState, BoardError> {
        recovery::replay_from_scratch(&self.log)
    }

    pub fn validate_state_consistency(&self) -> Result<ConsistencyReport, BoardError> {
        validate::validate_state_consistency(self)
    }
}
