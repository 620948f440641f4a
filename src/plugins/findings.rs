//! Findings board: the agent registry and the tagged knowledge agents post.
//!
//! Findings are immutable once posted. Agents declare `interests` at
//! registration, and `findings_for_agent` routes to them every finding whose
//! tags intersect those interests.

use crate::core::error::BoardError;
use crate::core::events::Event;
use crate::core::model::{self, Agent, AgentStatus, Finding, FindingKind};
use crate::core::store::Board;
use std::collections::BTreeSet;

/// Registers `agent_id`, or updates its task and interests if already known.
/// Status, registration time and findings history are kept. Journals nothing
/// when the registration is unchanged.
pub fn register_agent<I, S>(
    board: &Board,
    agent_id: &str,
    task: &str,
    interests: I,
) -> Result<Agent, BoardError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    model::validate_agent_id(agent_id)?;
    let interests = model::normalize_tags(interests)?;
    board.mutate(|txn| {
        let unchanged = txn
            .state()
            .agent(agent_id)
            .is_some_and(|a| a.task == task && a.interests == interests);
        if !unchanged {
            txn.commit(Event::RegisterAgent {
                agent_id: agent_id.to_string(),
                task: task.to_string(),
                interests: interests.clone(),
            })?;
        }
        txn.state()
            .agent(agent_id)
            .cloned()
            .ok_or_else(|| BoardError::NotFound(format!("agent {}", agent_id)))
    })
}

/// Only `active -> completed` and `active -> stopped` are allowed. Setting the
/// current status again is a no-op. Stopping an agent does not release its claims.
pub fn update_agent_status(
    board: &Board,
    agent_id: &str,
    status: AgentStatus,
) -> Result<Agent, BoardError> {
    board.mutate(|txn| {
        let current = txn
            .state()
            .agent(agent_id)
            .ok_or_else(|| BoardError::NotFound(format!("agent {}", agent_id)))?
            .status;
        if current == status {
            return txn
                .state()
                .agent(agent_id)
                .cloned()
                .ok_or_else(|| BoardError::NotFound(format!("agent {}", agent_id)));
        }
        if current.is_terminal() || status == AgentStatus::Active {
            return Err(BoardError::InvalidTransition {
                entity: "agent".to_string(),
                from: current.to_string(),
                to: status.to_string(),
            });
        }
        txn.commit(Event::UpdateAgentStatus {
            agent_id: agent_id.to_string(),
            status,
        })?;
        txn.state()
            .agent(agent_id)
            .cloned()
            .ok_or_else(|| BoardError::NotFound(format!("agent {}", agent_id)))
    })
}

pub fn add_finding<I, S>(
    board: &Board,
    agent_id: &str,
    kind: FindingKind,
    content: &str,
    tags: I,
) -> Result<Finding, BoardError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    if content.trim().is_empty() {
        return Err(BoardError::ValidationError(
            "finding content must not be empty".to_string(),
        ));
    }
    let tags = model::normalize_tags(tags)?;
    board.mutate(|txn| {
        if txn.state().agent(agent_id).is_none() {
            return Err(BoardError::NotFound(format!("agent {}", agent_id)));
        }
        let finding_id = txn.state().next_finding_id + 1;
        txn.commit(Event::AddFinding {
            finding_id,
            agent_id: agent_id.to_string(),
            kind,
            content: content.to_string(),
            tags,
        })?;
        txn.state()
            .findings
            .get(&finding_id)
            .cloned()
            .ok_or_else(|| BoardError::NotFound(format!("finding {}", finding_id)))
    })
}

/// Findings carrying any of `tags`, oldest first. An empty filter returns every finding.
pub fn get_findings<I, S>(board: &Board, tags: I) -> Result<Vec<Finding>, BoardError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let tags = model::normalize_tags(tags)?;
    board.index().findings(&tags)
}

pub fn findings_by_kind(board: &Board, kind: FindingKind) -> Result<Vec<Finding>, BoardError> {
    board.index().findings_by_kind(kind)
}

/// Findings routed to `agent_id` through its interests. No interests, no findings.
pub fn findings_for_agent(board: &Board, agent_id: &str) -> Result<Vec<Finding>, BoardError> {
    let agent = board
        .index()
        .agent(agent_id)?
        .ok_or_else(|| BoardError::NotFound(format!("agent {}", agent_id)))?;
    if agent.interests.is_empty() {
        return Ok(Vec::new());
    }
    board.index().findings(&agent.interests)
}

pub fn get_agent(board: &Board, agent_id: &str) -> Result<Option<Agent>, BoardError> {
    board.index().agent(agent_id)
}

pub fn get_active_agents(board: &Board) -> Result<Vec<Agent>, BoardError> {
    board.index().agents(Some(AgentStatus::Active))
}

pub fn list_agents(board: &Board) -> Result<Vec<Agent>, BoardError> {
    board.index().agents(None)
}

/// Tags in use across all findings, for operators exploring the board.
pub fn known_tags(board: &Board) -> Result<BTreeSet<String>, BoardError> {
    Ok(board
        .index()
        .findings(&BTreeSet::new())?
        .into_iter()
        .flat_map(|f| f.tags)
        .collect())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "findings",
        "version": "0.1.0",
        "description": "Agent registry and tagged findings routed by interest",
        "commands": [
            { "name": "agent.register", "parameters": ["agent", "task", "interests"] },
            { "name": "agent.status", "parameters": ["agent", "status"] },
            { "name": "agent.list", "parameters": ["active"] },
            { "name": "add", "parameters": ["agent", "kind", "content", "tags"] },
            { "name": "list", "parameters": ["tags", "kind", "for_agent"] }
        ],
        "kinds": ["fact", "hypothesis", "blocker", "question"],
        "events": ["register_agent", "update_agent_status", "add_finding"],
        "storage": ["events.jsonl", "board.json", "board.db"]
    })
}
