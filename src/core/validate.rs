//! Consistency check between the board document (A) and the index (B).
//!
//! Read-only: divergences are reported, never repaired here. Either side may be
//! the stale one, so the operator chooses between `recover` and manual repair.

use crate::core::document::BoardDocument;
use crate::core::error::BoardError;
use crate::core::store::Board;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Divergence {
    /// `board`, `agent`, `finding`, `claim` or `task`.
    pub entity: String,
    pub id: String,
    pub field: String,
    pub document: JsonValue,
    pub index: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsistencyReport {
    pub consistent: bool,
    pub document_sequence: u64,
    pub index_sequence: u64,
    pub divergences: Vec<Divergence>,
}

pub fn validate_state_consistency(board: &Board) -> Result<ConsistencyReport, BoardError> {
    // Hold both locks so no writer is between its document and index writes.
    let _state = board.lock_state()?;
    let _writer = board.backend.lock()?;

    let mut divergences = Vec::new();
    let document = match board.backend.read_document()? {
        None => BoardDocument::empty(),
        Some(body) => match BoardDocument::parse(&body) {
            Ok(doc) => doc,
            Err(e) => {
                divergences.push(Divergence {
                    entity: "board".to_string(),
                    id: "-".to_string(),
                    field: "document".to_string(),
                    document: JsonValue::String(e.to_string()),
                    index: JsonValue::Null,
                });
                BoardDocument::empty()
            }
        },
    };
    let index = board.index.load_document()?;
    divergences.extend(diff_documents(&document, &index)?);

    Ok(ConsistencyReport {
        consistent: divergences.is_empty(),
        document_sequence: document.sequence,
        index_sequence: index.sequence,
        divergences,
    })
}

/// Field-level differences between two documents, keyed by entity and id.
pub fn diff_documents(
    document: &BoardDocument,
    index: &BoardDocument,
) -> Result<Vec<Divergence>, BoardError> {
    let mut out = Vec::new();
    if document.sequence != index.sequence {
        out.push(Divergence {
            entity: "board".to_string(),
            id: "-".to_string(),
            field: "sequence".to_string(),
            document: JsonValue::from(document.sequence),
            index: JsonValue::from(index.sequence),
        });
    }
    diff_section(
        "agent",
        keyed(&document.agents, |a| a.id.clone())?,
        keyed(&index.agents, |a| a.id.clone())?,
        &mut out,
    );
    diff_section(
        "finding",
        keyed(&document.findings, |f| f.id.to_string())?,
        keyed(&index.findings, |f| f.id.to_string())?,
        &mut out,
    );
    diff_section(
        "claim",
        keyed(&document.claims, |c| c.chain_id.clone())?,
        keyed(&index.claims, |c| c.chain_id.clone())?,
        &mut out,
    );
    diff_section(
        "task",
        keyed(&document.tasks, |t| t.id.to_string())?,
        keyed(&index.tasks, |t| t.id.to_string())?,
        &mut out,
    );
    Ok(out)
}

fn keyed<T: Serialize>(
    items: &[T],
    key: impl Fn(&T) -> String,
) -> Result<BTreeMap<String, JsonValue>, BoardError> {
    let mut out = BTreeMap::new();
    for item in items {
        out.insert(key(item), serde_json::to_value(item)?);
    }
    Ok(out)
}

fn diff_section(
    entity: &str,
    document: BTreeMap<String, JsonValue>,
    index: BTreeMap<String, JsonValue>,
    out: &mut Vec<Divergence>,
) {
    let ids: BTreeSet<&String> = document.keys().chain(index.keys()).collect();
    for id in ids {
        match (document.get(id), index.get(id)) {
            (Some(a), Some(b)) if a == b => {}
            (Some(JsonValue::Object(a)), Some(JsonValue::Object(b))) => {
                let fields: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
                for field in fields {
                    let (va, vb) = (a.get(field), b.get(field));
                    if va != vb {
                        out.push(Divergence {
                            entity: entity.to_string(),
                            id: id.clone(),
                            field: field.clone(),
                            document: va.cloned().unwrap_or(JsonValue::Null),
                            index: vb.cloned().unwrap_or(JsonValue::Null),
                        });
                    }
                }
            }
            (a, b) => out.push(Divergence {
                entity: entity.to_string(),
                id: id.clone(),
                field: "*".to_string(),
                document: a.cloned().unwrap_or(JsonValue::Null),
                index: b.cloned().unwrap_or(JsonValue::Null),
            }),
        }
    }
}
