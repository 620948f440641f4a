use claimboard::core::error::BoardError;
use claimboard::core::model::{AgentStatus, FindingKind};
use claimboard::core::time::ManualClock;
use claimboard::plugins::findings;
use claimboard::Board;
use std::collections::BTreeSet;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn board() -> (Board, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    (Board::in_memory(clock.clone()).unwrap(), clock)
}

#[test]
fn empty_board_has_nothing_to_report() {
    let (board, _clock) = board();
    assert!(findings::get_findings(&board, Vec::<String>::new()).unwrap().is_empty());
    assert!(findings::get_findings(&board, ["auth"]).unwrap().is_empty());
    assert!(findings::list_agents(&board).unwrap().is_empty());
    assert!(findings::get_agent(&board, "nobody").unwrap().is_none());
    assert!(findings::known_tags(&board).unwrap().is_empty());
}

#[test]
fn findings_route_by_interest() {
    let (board, clock) = board();
    findings::register_agent(&board, "auth-agent", "auth", ["auth", "security"]).unwrap();
    findings::register_agent(&board, "db-agent", "db", ["db"]).unwrap();
    findings::register_agent(&board, "quiet", "docs", Vec::<String>::new()).unwrap();

    findings::add_finding(&board, "db-agent", FindingKind::Fact, "sessions live in redis", ["auth", "db"]).unwrap();
    clock.advance(Duration::from_secs(1));
    findings::add_finding(&board, "auth-agent", FindingKind::Blocker, "jwt secret missing", ["Security"]).unwrap();
    clock.advance(Duration::from_secs(1));
    findings::add_finding(&board, "auth-agent", FindingKind::Question, "who owns migrations?", ["db"]).unwrap();

    let ids = |agent: &str| -> Vec<u64> {
        findings::findings_for_agent(&board, agent)
            .unwrap()
            .into_iter()
            .map(|f| f.id)
            .collect()
    };
    assert_eq!(ids("auth-agent"), vec![1, 2]);
    assert_eq!(ids("db-agent"), vec![1, 3]);
    assert!(ids("quiet").is_empty());
    assert!(matches!(
        findings::findings_for_agent(&board, "ghost"),
        Err(BoardError::NotFound(_))
    ));

    let blockers = findings::findings_by_kind(&board, FindingKind::Blocker).unwrap();
    assert_eq!(blockers.len(), 1);
    assert_eq!(blockers[0].content, "jwt secret missing");
    assert_eq!(blockers[0].tags, BTreeSet::from(["security".to_string()]));

    let all = findings::get_findings(&board, Vec::<String>::new()).unwrap();
    assert_eq!(all.iter().map(|f| f.id).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(
        findings::known_tags(&board).unwrap().into_iter().collect::<Vec<_>>(),
        vec!["auth", "db", "security"]
    );
}

#[test]
fn finding_needs_content_and_an_author() {
    let (board, _clock) = board();
    findings::register_agent(&board, "a", "t", ["auth"]).unwrap();
    assert!(matches!(
        findings::add_finding(&board, "a", FindingKind::Fact, "   ", ["auth"]),
        Err(BoardError::ValidationError(_))
    ));
    assert!(matches!(
        findings::add_finding(&board, "ghost", FindingKind::Fact, "x", ["auth"]),
        Err(BoardError::NotFound(_))
    ));
    assert!(matches!(
        findings::add_finding(&board, "a", FindingKind::Fact, "x", ["not a tag"]),
        Err(BoardError::ValidationError(_))
    ));
    assert_eq!(board.snapshot().unwrap().sequence, 1);
}

#[test]
fn registration_is_idempotent_and_keeps_history() {
    let (board, clock) = board();
    let first = findings::register_agent(&board, "a", "auth", ["auth"]).unwrap();
    findings::add_finding(&board, "a", FindingKind::Hypothesis, "cache is stale", ["auth"]).unwrap();
    let sequence = board.snapshot().unwrap().sequence;

    clock.advance(Duration::from_secs(30));
    let same = findings::register_agent(&board, "a", "auth", ["AUTH"]).unwrap();
    assert_eq!(same, first);
    assert_eq!(board.snapshot().unwrap().sequence, sequence);

    let updated = findings::register_agent(&board, "a", "auth and db", ["auth", "db"]).unwrap();
    assert_eq!(updated.registered_at, first.registered_at);
    assert_eq!(updated.interests.len(), 2);
    assert_eq!(findings::get_findings(&board, ["auth"]).unwrap().len(), 1);

    assert!(matches!(
        findings::register_agent(&board, "bad id", "t", ["auth"]),
        Err(BoardError::ValidationError(_))
    ));
}

#[test]
fn agent_status_moves_forward_only() {
    let (board, _clock) = board();
    findings::register_agent(&board, "a", "t", ["auth"]).unwrap();
    findings::register_agent(&board, "b", "t", ["auth"]).unwrap();

    let done = findings::update_agent_status(&board, "a", AgentStatus::Completed).unwrap();
    assert_eq!(done.status, AgentStatus::Completed);
    assert!(findings::update_agent_status(&board, "a", AgentStatus::Completed).is_ok());
    assert!(matches!(
        findings::update_agent_status(&board, "a", AgentStatus::Active),
        Err(BoardError::InvalidTransition { .. })
    ));
    assert!(matches!(
        findings::update_agent_status(&board, "a", AgentStatus::Stopped),
        Err(BoardError::InvalidTransition { .. })
    ));

    let active: Vec<String> = findings::get_active_agents(&board)
        .unwrap()
        .into_iter()
        .map(|a| a.id)
        .collect();
    assert_eq!(active, vec!["b"]);
    assert_eq!(findings::list_agents(&board).unwrap().len(), 2);
}

#[test]
fn concurrent_posts_get_distinct_ids() {
    let (board, _clock) = board();
    let writers = 6;
    let per_writer = 10;
    for w in 0..writers {
        findings::register_agent(&board, &format!("w{}", w), "t", ["shared"]).unwrap();
    }
    let board = Arc::new(board);
    let barrier = Arc::new(Barrier::new(writers));

    let handles: Vec<_> = (0..writers)
        .map(|w| {
            let board = board.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let agent = format!("w{}", w);
                barrier.wait();
                for i in 0..per_writer {
                    findings::add_finding(&board, &agent, FindingKind::Fact, &format!("note {}", i), ["shared"])
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let ids: Vec<u64> = findings::get_findings(&board, ["shared"])
        .unwrap()
        .into_iter()
        .map(|f| f.id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    assert_eq!(ids, (1..=(writers * per_writer) as u64).collect::<Vec<_>>());
    assert!(board.validate_state_consistency().unwrap().consistent);
}
