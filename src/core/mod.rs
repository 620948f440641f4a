//! The coordination substrate.
//!
//! The event log is the single source of truth. Everything else here is
//! derived from it: the in-memory projection, the board document, and the
//! SQLite index, each kept convergent by the commit pipeline and by recovery.

pub mod backend;
pub mod config;
pub mod db;
pub mod document;
pub mod dual_write;
pub mod error;
pub mod event_log;
pub mod events;
pub mod index;
pub mod model;
pub mod recovery;
pub mod schemas;
pub mod state;
pub mod store;
pub mod time;
pub mod validate;
