//! Subsystem registration. Centralizes the schema each subsystem advertises.
//!
//! Adding a new subsystem: append one entry to `SUBSYSTEMS`.

use crate::plugins::{claims, findings, tasks};

pub(crate) struct SubsystemInfo {
    pub name: &'static str,
    pub schema: fn() -> serde_json::Value,
}

pub(crate) const SUBSYSTEMS: &[SubsystemInfo] = &[
    SubsystemInfo { name: "claims", schema: claims::schema },
    SubsystemInfo { name: "findings", schema: findings::schema },
    SubsystemInfo { name: "tasks", schema: tasks::schema },
];

/// Every subsystem schema keyed by name, as reported by `claimboard capabilities`.
pub(crate) fn capabilities() -> serde_json::Value {
    let mut out = serde_json::Map::new();
    for sub in SUBSYSTEMS {
        out.insert(sub.name.to_string(), (sub.schema)());
    }
    serde_json::Value::Object(out)
}
