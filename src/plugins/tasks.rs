//! Priority task queue shared by all agents.
//!
//! Pops take the highest priority first and break ties by age (lowest id).
//! A pop runs inside the board's writer window, so two callers never receive
//! the same task.

use crate::core::error::BoardError;
use crate::core::events::Event;
use crate::core::model::{Task, TaskStatus};
use crate::core::store::Board;

pub fn add_task(board: &Board, description: &str, priority: i64) -> Result<Task, BoardError> {
    if description.trim().is_empty() {
        return Err(BoardError::ValidationError(
            "task description must not be empty".to_string(),
        ));
    }
    board.mutate(|txn| {
        let task_id = txn.state().next_task_id + 1;
        txn.commit(Event::AddTask {
            task_id,
            description: description.to_string(),
            priority,
        })?;
        txn.state()
            .tasks
            .get(&task_id)
            .cloned()
            .ok_or_else(|| BoardError::NotFound(format!("task {}", task_id)))
    })
}

/// Claims the next pending task for `agent_id`. `None` when the queue is empty.
pub fn pop_highest_priority_task(board: &Board, agent_id: &str) -> Result<Option<Task>, BoardError> {
    board.mutate(|txn| {
        if txn.state().agent(agent_id).is_none() {
            return Err(BoardError::NotFound(format!("agent {}", agent_id)));
        }
        let Some(task_id) = txn.state().next_pending_task().map(|t| t.id) else {
            return Ok(None);
        };
        txn.commit(Event::ClaimTask {
            task_id,
            agent_id: agent_id.to_string(),
        })?;
        Ok(txn.state().tasks.get(&task_id).cloned())
    })
}

/// `claimed -> done`. Completing a task twice is a no-op.
pub fn complete_task(board: &Board, task_id: u64) -> Result<Task, BoardError> {
    board.mutate(|txn| {
        let status = txn
            .state()
            .tasks
            .get(&task_id)
            .ok_or_else(|| BoardError::NotFound(format!("task {}", task_id)))?
            .status;
        match status {
            TaskStatus::Claimed => {
                txn.commit(Event::CompleteTask { task_id })?;
            }
            TaskStatus::Done => {}
            TaskStatus::Pending => {
                return Err(BoardError::InvalidTransition {
                    entity: "task".to_string(),
                    from: status.to_string(),
                    to: TaskStatus::Done.to_string(),
                });
            }
        }
        txn.state()
            .tasks
            .get(&task_id)
            .cloned()
            .ok_or_else(|| BoardError::NotFound(format!("task {}", task_id)))
    })
}

/// Tasks in queue order: priority descending, then id.
pub fn list_tasks(board: &Board, status: Option<TaskStatus>) -> Result<Vec<Task>, BoardError> {
    board.index().tasks(status)
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "tasks",
        "version": "0.1.0",
        "description": "Priority task queue with atomic pop",
        "commands": [
            { "name": "add", "parameters": ["description", "priority"] },
            { "name": "pop", "parameters": ["agent"] },
            { "name": "done", "parameters": ["id"] },
            { "name": "list", "parameters": ["status"] }
        ],
        "events": ["add_task", "claim_task", "complete_task"],
        "storage": ["events.jsonl", "board.json", "board.db"]
    })
}
