//! In-memory derived state: the fold of the event log.
//!
//! Replay is the only way this state changes. `apply` is deterministic and
//! idempotent per sequence number, so feeding the same record twice is a no-op
//! and feeding records out of order is an error.

use crate::core::error::BoardError;
use crate::core::events::{Event, EventRecord};
use crate::core::model::{
    Agent, AgentStatus, ChainStatus, ClaimChain, Finding, Task, TaskStatus,
};
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardState {
    /// Sequence of the last applied record; 0 for an empty board.
    pub sequence: u64,
    pub agents: BTreeMap<String, Agent>,
    pub findings: BTreeMap<u64, Finding>,
    pub chains: BTreeMap<String, ClaimChain>,
    pub tasks: BTreeMap<u64, Task>,
    /// Last id handed out. Survives `reset` so ids are never reused.
    pub next_finding_id: u64,
    pub next_task_id: u64,
    /// path -> chain id of the active chain holding it.
    #[serde(skip)]
    file_index: FxHashMap<String, String>,
}

impl BoardState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores the file index after deserializing a checkpoint.
    pub fn reindex(&mut self) {
        self.file_index.clear();
        for chain in self.chains.values() {
            if chain.status == ChainStatus::Active {
                for f in &chain.files {
                    self.file_index.insert(f.clone(), chain.chain_id.clone());
                }
            }
        }
    }

    /// Applies one record. Returns `false` if it was already applied.
    pub fn apply(&mut self, record: &EventRecord) -> Result<bool, BoardError> {
        if record.sequence <= self.sequence {
            return Ok(false);
        }
        if record.sequence != self.sequence + 1 {
            return Err(BoardError::SequenceGap {
                expected: self.sequence + 1,
                found: record.sequence,
            });
        }
        self.apply_event(&record.event, record.timestamp);
        self.sequence = record.sequence;
        Ok(true)
    }

    fn apply_event(&mut self, event: &Event, at: DateTime<Utc>) {
        match event {
            Event::RegisterAgent {
                agent_id,
                task,
                interests,
            } => {
                self.agents
                    .entry(agent_id.clone())
                    .and_modify(|a| {
                        a.task = task.clone();
                        a.interests = interests.clone();
                    })
                    .or_insert_with(|| Agent {
                        id: agent_id.clone(),
                        task: task.clone(),
                        interests: interests.clone(),
                        status: AgentStatus::Active,
                        registered_at: at,
                    });
            }
            Event::UpdateAgentStatus { agent_id, status } => {
                if let Some(agent) = self.agents.get_mut(agent_id) {
                    agent.status = *status;
                }
            }
            Event::AddFinding {
                finding_id,
                agent_id,
                kind,
                content,
                tags,
            } => {
                self.next_finding_id = self.next_finding_id.max(*finding_id);
                self.findings.insert(
                    *finding_id,
                    Finding {
                        id: *finding_id,
                        agent_id: agent_id.clone(),
                        kind: *kind,
                        content: content.clone(),
                        tags: tags.clone(),
                        created_at: at,
                    },
                );
            }
            Event::ClaimChain {
                chain_id,
                agent_id,
                files,
                reason,
                ttl_secs,
                expires_at,
                supersedes,
            } => {
                for old in supersedes {
                    self.close_chain(old, ChainStatus::Released);
                }
                for f in files {
                    self.file_index.insert(f.clone(), chain_id.clone());
                }
                self.chains.insert(
                    chain_id.clone(),
                    ClaimChain {
                        chain_id: chain_id.clone(),
                        agent_id: agent_id.clone(),
                        files: files.clone(),
                        reason: reason.clone(),
                        ttl_secs: *ttl_secs,
                        created_at: at,
                        expires_at: *expires_at,
                        status: ChainStatus::Active,
                    },
                );
            }
            Event::ReleaseChain { chain_id, .. } => {
                self.close_chain(chain_id, ChainStatus::Released);
            }
            Event::ExpireChain { chain_id } => {
                self.close_chain(chain_id, ChainStatus::Expired);
            }
            Event::AddTask {
                task_id,
                description,
                priority,
            } => {
                self.next_task_id = self.next_task_id.max(*task_id);
                self.tasks.insert(
                    *task_id,
                    Task {
                        id: *task_id,
                        priority: *priority,
                        description: description.clone(),
                        status: TaskStatus::Pending,
                        created_at: at,
                        claimed_by: None,
                    },
                );
            }
            Event::ClaimTask { task_id, agent_id } => {
                if let Some(task) = self.tasks.get_mut(task_id)
                    && task.status == TaskStatus::Pending
                {
                    task.status = TaskStatus::Claimed;
                    task.claimed_by = Some(agent_id.clone());
                }
            }
            Event::CompleteTask { task_id } => {
                if let Some(task) = self.tasks.get_mut(task_id) {
                    task.status = TaskStatus::Done;
                }
            }
            Event::Reset => {
                self.agents.clear();
                self.findings.clear();
                self.chains.clear();
                self.tasks.clear();
                self.file_index.clear();
            }
        }
    }

    fn close_chain(&mut self, chain_id: &str, to: ChainStatus) {
        let Some(chain) = self.chains.get_mut(chain_id) else {
            return;
        };
        if chain.status != ChainStatus::Active {
            return;
        }
        chain.status = to;
        for f in &chain.files {
            if self.file_index.get(f).map(String::as_str) == Some(chain_id) {
                self.file_index.remove(f);
            }
        }
    }

    pub fn agent(&self, agent_id: &str) -> Option<&Agent> {
        self.agents.get(agent_id)
    }

    pub fn chain(&self, chain_id: &str) -> Option<&ClaimChain> {
        self.chains.get(chain_id)
    }

    /// Chain recorded active for `file`, regardless of its deadline.
    pub fn active_chain_for(&self, file: &str) -> Option<&ClaimChain> {
        self.file_index
            .get(file)
            .and_then(|id| self.chains.get(id))
    }

    /// Recorded-active chains whose deadline passed before `now`.
    pub fn expired_active_chains(&self, now: DateTime<Utc>) -> Vec<String> {
        self.chains
            .values()
            .filter(|c| c.status == ChainStatus::Active && c.is_expired_at(now))
            .map(|c| c.chain_id.clone())
            .collect()
    }

    /// Distinct active chains covering any of `files`, in chain id order.
    pub fn covering_chains<'a, I>(&self, files: I) -> Vec<&ClaimChain>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut ids: Vec<&String> = files
            .into_iter()
            .filter_map(|f| self.file_index.get(f))
            .collect();
        ids.sort();
        ids.dedup();
        ids.into_iter().filter_map(|id| self.chains.get(id)).collect()
    }

    /// Highest priority first; ties go to the oldest task.
    pub fn next_pending_task(&self) -> Option<&Task> {
        self.tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .max_by(|a, b| a.priority.cmp(&b.priority).then(b.id.cmp(&a.id)))
    }
}

/// Folds a full record stream into a fresh state.
pub fn replay<I>(records: I) -> Result<BoardState, BoardError>
where
    I: IntoIterator<Item = Result<EventRecord, BoardError>>,
{
    let mut state = BoardState::new();
    for record in records {
        state.apply(&record?)?;
    }
    Ok(state)
}
