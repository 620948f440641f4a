//! Subsystems built on the board: claims, findings and the task queue.
//!
//! Each is a set of free functions taking `&Board`; every mutation goes
//! through `Board::mutate`, every list query is served by the index.

pub mod claims;
pub mod findings;
pub mod tasks;
