//! Claim registry: time-bounded, all-or-nothing locks over sets of files.
//!
//! A claim chain groups every file an agent asked for in one request. The
//! registry guarantees that at any instant a file is covered by at most one
//! live chain. Expiration is lazy: whoever first observes a chain past its
//! deadline journals `expire_chain` for it, and from then on it blocks nothing.

use crate::core::dual_write::BoardTxn;
use crate::core::error::{BoardError, ClaimConflict, ConflictEntry};
use crate::core::events::Event;
use crate::core::model::{self, ChainStatus, ClaimChain};
use crate::core::store::Board;
use crate::core::time;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, warn};

/// Journals `expire_chain` for each given chain that is active but past its deadline.
fn expire_if_due(txn: &mut BoardTxn<'_>, chain_ids: &[String]) -> Result<Vec<String>, BoardError> {
    let now = txn.now();
    let mut expired = Vec::new();
    for chain_id in chain_ids {
        let due = txn
            .state()
            .chain(chain_id)
            .is_some_and(|c| c.status == ChainStatus::Active && c.is_expired_at(now));
        if due {
            txn.commit(Event::ExpireChain {
                chain_id: chain_id.clone(),
            })?;
            debug!(chain_id = %chain_id, "claim chain expired");
            expired.push(chain_id.clone());
        }
    }
    Ok(expired)
}

/// Claims every file in `files` for `agent_id`, or none of them.
///
/// Files already held by the same agent are not conflicts: the agent's
/// overlapping chains are folded into the new one, which then covers the union
/// of their files. On conflict nothing is journaled and the error lists every
/// blocking file with its owning chain and agent.
pub fn claim<I, S>(
    board: &Board,
    agent_id: &str,
    files: I,
    reason: &str,
    ttl: Option<Duration>,
) -> Result<ClaimChain, BoardError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    model::validate_agent_id(agent_id)?;
    let requested = model::normalize_paths(files)?;
    if requested.is_empty() {
        return Err(BoardError::ValidationError(
            "a claim must name at least one file".to_string(),
        ));
    }
    let (ttl_secs, ttl_delta) = time::ttl_delta(ttl.unwrap_or_else(|| board.config.default_ttl()))?;

    board.mutate(|txn| {
        if txn.state().agent(agent_id).is_none() {
            return Err(BoardError::NotFound(format!("agent {}", agent_id)));
        }

        let covering: Vec<String> = txn
            .state()
            .covering_chains(&requested)
            .into_iter()
            .map(|c| c.chain_id.clone())
            .collect();
        expire_if_due(txn, &covering)?;

        let now = txn.now();
        let mut conflicts = Vec::new();
        let mut superseded: Vec<String> = Vec::new();
        for file in &requested {
            let Some(chain) = txn.state().active_chain_for(file) else {
                continue;
            };
            if !chain.is_live_at(now) {
                continue;
            }
            if chain.agent_id == agent_id {
                if !superseded.contains(&chain.chain_id) {
                    superseded.push(chain.chain_id.clone());
                }
            } else {
                conflicts.push(ConflictEntry {
                    file: file.clone(),
                    chain_id: chain.chain_id.clone(),
                    agent_id: chain.agent_id.clone(),
                    expires_at: chain.expires_at,
                });
            }
        }
        if !conflicts.is_empty() {
            debug!(agent_id, conflicts = conflicts.len(), "claim rejected");
            return Err(BoardError::Conflict(ClaimConflict {
                requested_by: agent_id.to_string(),
                conflicts,
            }));
        }

        let mut covered: BTreeSet<String> = requested.clone();
        for chain_id in &superseded {
            if let Some(old) = txn.state().chain(chain_id) {
                covered.extend(old.files.iter().cloned());
            }
        }
        let expires_at = time::expiry_after(now, ttl_secs, ttl_delta)?;
        let chain_id = time::new_chain_id();
        txn.commit(Event::ClaimChain {
            chain_id: chain_id.clone(),
            agent_id: agent_id.to_string(),
            files: covered,
            reason: reason.to_string(),
            ttl_secs,
            expires_at,
            supersedes: superseded,
        })?;
        txn.state()
            .chain(&chain_id)
            .cloned()
            .ok_or_else(|| BoardError::NotFound(format!("claim chain {}", chain_id)))
    })
}

/// Releases a chain on behalf of its owner.
///
/// Releasing a chain that is already released or expired is a no-op. Anyone
/// other than the owner is refused without touching the log.
pub fn release(board: &Board, agent_id: &str, chain_id: &str) -> Result<ClaimChain, BoardError> {
    board.mutate(|txn| {
        let chain = txn
            .state()
            .chain(chain_id)
            .ok_or_else(|| BoardError::NotFound(format!("claim chain {}", chain_id)))?;
        if chain.agent_id != agent_id {
            return Err(BoardError::Unauthorized {
                agent_id: agent_id.to_string(),
                chain_id: chain_id.to_string(),
            });
        }
        expire_if_due(txn, &[chain_id.to_string()])?;
        close(txn, chain_id, agent_id, false)
    })
}

/// Operator override: releases any chain regardless of owner. Journaled as forced.
pub fn force_release(board: &Board, chain_id: &str, operator: &str) -> Result<ClaimChain, BoardError> {
    board.mutate(|txn| {
        if txn.state().chain(chain_id).is_none() {
            return Err(BoardError::NotFound(format!("claim chain {}", chain_id)));
        }
        expire_if_due(txn, &[chain_id.to_string()])?;
        let chain = close(txn, chain_id, operator, true)?;
        warn!(chain_id, operator, owner = %chain.agent_id, "claim chain force-released");
        Ok(chain)
    })
}

fn close(
    txn: &mut BoardTxn<'_>,
    chain_id: &str,
    released_by: &str,
    forced: bool,
) -> Result<ClaimChain, BoardError> {
    let active = txn
        .state()
        .chain(chain_id)
        .is_some_and(|c| c.status == ChainStatus::Active);
    if active {
        txn.commit(Event::ReleaseChain {
            chain_id: chain_id.to_string(),
            released_by: released_by.to_string(),
            forced,
        })?;
    }
    txn.state()
        .chain(chain_id)
        .cloned()
        .ok_or_else(|| BoardError::NotFound(format!("claim chain {}", chain_id)))
}

/// True once the chain's deadline has passed. Records the expiration on first observation.
pub fn is_expired(board: &Board, chain_id: &str) -> Result<bool, BoardError> {
    board.mutate(|txn| {
        if txn.state().chain(chain_id).is_none() {
            return Err(BoardError::NotFound(format!("claim chain {}", chain_id)));
        }
        expire_if_due(txn, &[chain_id.to_string()])?;
        Ok(txn
            .state()
            .chain(chain_id)
            .is_some_and(|c| c.status == ChainStatus::Expired))
    })
}

/// The live chain covering `path`, if any. Expired chains count as absent.
pub fn claims_for_file(board: &Board, path: &str) -> Result<Option<ClaimChain>, BoardError> {
    let path = model::normalize_path(path)?;
    board.mutate(|txn| {
        let Some(chain_id) = txn
            .state()
            .active_chain_for(&path)
            .map(|c| c.chain_id.clone())
        else {
            return Ok(None);
        };
        expire_if_due(txn, std::slice::from_ref(&chain_id))?;
        Ok(txn.state().active_chain_for(&path).cloned())
    })
}

pub fn get_chain(board: &Board, chain_id: &str) -> Result<Option<ClaimChain>, BoardError> {
    board.mutate(|txn| {
        if txn.state().chain(chain_id).is_none() {
            return Ok(None);
        }
        expire_if_due(txn, &[chain_id.to_string()])?;
        Ok(txn.state().chain(chain_id).cloned())
    })
}

/// Chains from the index, oldest first. Chains past their deadline but not yet
/// observed still show as `active` here; `sweep_expired` records them.
pub fn list_claims(board: &Board, status: Option<ChainStatus>) -> Result<Vec<ClaimChain>, BoardError> {
    board.index().chains(status)
}

/// Records every overdue chain at once. Returns the ids expired.
pub fn sweep_expired(board: &Board) -> Result<Vec<String>, BoardError> {
    board.mutate(|txn| {
        let due = txn.state().expired_active_chains(txn.now());
        expire_if_due(txn, &due)
    })
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "claims",
        "version": "0.1.0",
        "description": "All-or-nothing, time-bounded claims over sets of files",
        "commands": [
            { "name": "acquire", "parameters": ["agent", "files", "reason", "ttl_secs"] },
            { "name": "release", "parameters": ["agent", "chain"] },
            { "name": "force-release", "parameters": ["chain", "operator"] },
            { "name": "show", "parameters": ["chain", "file"] },
            { "name": "list", "parameters": ["status"] },
            { "name": "sweep", "parameters": [] }
        ],
        "events": ["claim_chain", "release_chain", "expire_chain"],
        "storage": ["events.jsonl", "board.json", "board.db"]
    })
}
