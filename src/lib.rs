//! Claimboard: a crash-tolerant coordination blackboard for concurrent agents.
//!
//! Agents working on the same repository use the board to stay out of each
//! other's way and to share what they learn:
//!
//! - **Claims**: an agent claims a set of files for a bounded time. A claim is
//!   all-or-nothing, and no file is ever covered by two live claims.
//! - **Findings**: agents post facts, hypotheses, blockers and questions, tagged
//!   so that other agents receive the ones matching their interests.
//! - **Tasks**: a shared priority queue with an atomic pop.
//!
//! # Architecture
//!
//! ## Event log first
//!
//! Every state change is one typed event appended to `events.jsonl` under a
//! cross-process writer lock. Sequence numbers are gap-free and each record is
//! checksummed. The log is the single source of truth.
//!
//! ## Dual representations
//!
//! After the append, the change is written to two independent stores:
//!
//! - `board.json`: a sectioned document (agents, findings, claims, tasks)
//!   readable without this crate
//! - `board.db`: a SQLite index serving the filtered and ordered queries
//!
//! `Board::validate_state_consistency` diffs the two. `Board::recover` replays
//! the log to repair them after a crash.
//!
//! # Examples
//!
//! ```no_run
//! use claimboard::{Board, BoardConfig, plugins::claims, plugins::findings};
//!
//! let board = Board::open(BoardConfig::new(".claimboard"))?;
//! findings::register_agent(&board, "agent-1", "refactor auth", ["auth"])?;
//! let chain = claims::claim(&board, "agent-1", ["src/auth.rs", "src/session.rs"], "refactor", None)?;
//! claims::release(&board, "agent-1", &chain.chain_id)?;
//! # Ok::<(), claimboard::BoardError>(())
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: event log, state projection, both representations, recovery
//! - [`plugins`]: claims, findings and tasks

pub mod core;
pub mod plugins;

mod cli;
mod subsystems;

pub use crate::core::config::BoardConfig;
pub use crate::core::error::{BoardError, ClaimConflict, ConflictEntry};
pub use crate::core::store::Board;
pub use cli::{EXIT_CONFLICT, EXIT_DIVERGED};

use clap::Parser;
use std::process::ExitCode;

/// Entry point of the `claimboard` binary.
pub fn run() -> anyhow::Result<ExitCode> {
    let cli = cli::Cli::parse();
    cli::run_cli(cli)
}
