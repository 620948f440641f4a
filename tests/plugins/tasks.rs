use claimboard::core::error::BoardError;
use claimboard::core::model::TaskStatus;
use claimboard::core::time::ManualClock;
use claimboard::plugins::{findings, tasks};
use claimboard::Board;
use std::collections::BTreeSet;
use std::sync::{Arc, Barrier};
use std::thread;

fn board_with_agents(agents: &[String]) -> Board {
    let board = Board::in_memory(Arc::new(ManualClock::default())).unwrap();
    for agent in agents {
        findings::register_agent(&board, agent, "work", ["queue"]).unwrap();
    }
    board
}

#[test]
fn pop_takes_highest_priority_then_oldest() {
    let board = board_with_agents(&["a".to_string()]);
    for (desc, priority) in [("low", 1), ("high-old", 9), ("mid", 5), ("high-new", 9), ("negative", -3)] {
        tasks::add_task(&board, desc, priority).unwrap();
    }

    let order: Vec<String> = std::iter::from_fn(|| tasks::pop_highest_priority_task(&board, "a").unwrap())
        .map(|t| t.description)
        .collect();
    assert_eq!(order, vec!["high-old", "high-new", "mid", "low", "negative"]);
    assert!(tasks::pop_highest_priority_task(&board, "a").unwrap().is_none());
}

#[test]
fn popped_task_is_claimed_by_caller() {
    let board = board_with_agents(&["a".to_string()]);
    let added = tasks::add_task(&board, "index repo", 2).unwrap();
    assert_eq!(added.status, TaskStatus::Pending);
    assert_eq!(added.claimed_by, None);

    let popped = tasks::pop_highest_priority_task(&board, "a").unwrap().unwrap();
    assert_eq!(popped.id, added.id);
    assert_eq!(popped.status, TaskStatus::Claimed);
    assert_eq!(popped.claimed_by.as_deref(), Some("a"));

    let listed = tasks::list_tasks(&board, Some(TaskStatus::Claimed)).unwrap();
    assert_eq!(listed, vec![popped]);
    assert!(tasks::list_tasks(&board, Some(TaskStatus::Pending)).unwrap().is_empty());
}

#[test]
fn completion_follows_the_lifecycle() {
    let board = board_with_agents(&["a".to_string()]);
    let task = tasks::add_task(&board, "write docs", 0).unwrap();
    assert!(matches!(
        tasks::complete_task(&board, task.id),
        Err(BoardError::InvalidTransition { .. })
    ));

    tasks::pop_highest_priority_task(&board, "a").unwrap();
    let done = tasks::complete_task(&board, task.id).unwrap();
    assert_eq!(done.status, TaskStatus::Done);
    let sequence = board.snapshot().unwrap().sequence;
    assert_eq!(tasks::complete_task(&board, task.id).unwrap().status, TaskStatus::Done);
    assert_eq!(board.snapshot().unwrap().sequence, sequence);

    assert!(matches!(tasks::complete_task(&board, 99), Err(BoardError::NotFound(_))));
}

#[test]
fn invalid_requests_are_refused() {
    let board = board_with_agents(&["a".to_string()]);
    assert!(matches!(
        tasks::add_task(&board, "  ", 1),
        Err(BoardError::ValidationError(_))
    ));
    tasks::add_task(&board, "real", 1).unwrap();
    assert!(matches!(
        tasks::pop_highest_priority_task(&board, "ghost"),
        Err(BoardError::NotFound(_))
    ));
    assert_eq!(tasks::list_tasks(&board, Some(TaskStatus::Pending)).unwrap().len(), 1);
}

#[test]
fn concurrent_pops_never_share_a_task() {
    let agents: Vec<String> = (0..8).map(|i| format!("agent-{}", i)).collect();
    let board = board_with_agents(&agents);
    for i in 0..20 {
        tasks::add_task(&board, &format!("task {}", i), i % 4).unwrap();
    }
    let board = Arc::new(board);
    let barrier = Arc::new(Barrier::new(agents.len()));

    let handles: Vec<_> = agents
        .iter()
        .cloned()
        .map(|agent| {
            let board = board.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                let mut got = Vec::new();
                while let Some(task) = tasks::pop_highest_priority_task(&board, &agent).unwrap() {
                    assert_eq!(task.claimed_by.as_deref(), Some(agent.as_str()));
                    got.push(task.id);
                }
                got
            })
        })
        .collect();

    let popped: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
    let distinct: BTreeSet<u64> = popped.iter().copied().collect();
    assert_eq!(popped.len(), 20);
    assert_eq!(distinct.len(), 20);
    assert!(tasks::list_tasks(&board, Some(TaskStatus::Pending)).unwrap().is_empty());
}
