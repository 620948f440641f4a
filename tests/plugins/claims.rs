use claimboard::core::error::BoardError;
use claimboard::core::events::Event;
use claimboard::core::model::{AgentStatus, ChainStatus};
use claimboard::core::time::ManualClock;
use claimboard::plugins::{claims, findings};
use claimboard::Board;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn board_with_agents(agents: &[&str]) -> (Board, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let board = Board::in_memory(clock.clone()).unwrap();
    for agent in agents {
        findings::register_agent(&board, agent, "work", ["auth"]).unwrap();
    }
    (board, clock)
}

fn secs(n: u64) -> Option<Duration> {
    Some(Duration::from_secs(n))
}

fn count_events(board: &Board, pred: impl Fn(&Event) -> bool) -> usize {
    board
        .log()
        .read_from(0)
        .unwrap()
        .filter(|r| pred(&r.as_ref().unwrap().event))
        .count()
}

#[test]
fn overlapping_claim_is_rejected_until_expiry() {
    let (board, clock) = board_with_agents(&["a", "b"]);
    let held = claims::claim(&board, "a", ["src/x.rs", "src/y.rs"], "refactor", secs(60)).unwrap();

    let err = claims::claim(&board, "b", ["src/y.rs", "src/z.rs"], "fix", secs(60)).unwrap_err();
    let conflict = err.as_conflict().unwrap();
    assert_eq!(conflict.files(), vec!["src/y.rs"]);
    assert_eq!(conflict.owner_of("src/y.rs").map(|c| c.agent_id.as_str()), Some("a"));
    assert_eq!(conflict.conflicts[0].chain_id, held.chain_id);
    assert!(claims::claims_for_file(&board, "src/z.rs").unwrap().is_none());

    clock.advance(Duration::from_secs(61));
    let taken = claims::claim(&board, "b", ["src/y.rs", "src/z.rs"], "fix", secs(60)).unwrap();
    assert_eq!(taken.agent_id, "b");
    assert_eq!(
        claims::get_chain(&board, &held.chain_id).unwrap().unwrap().status,
        ChainStatus::Expired
    );
    // x.rs was in the expired chain and is free again.
    assert!(claims::claims_for_file(&board, "src/x.rs").unwrap().is_none());
}

#[test]
fn rejected_claim_journals_nothing() {
    let (board, _clock) = board_with_agents(&["a", "b"]);
    claims::claim(&board, "a", ["src/x.rs"], "", secs(60)).unwrap();
    let before = board.snapshot().unwrap().sequence;

    let err = claims::claim(&board, "b", ["src/free.rs", "src/x.rs"], "", secs(60)).unwrap_err();
    assert!(matches!(err, BoardError::Conflict(_)));
    assert_eq!(board.snapshot().unwrap().sequence, before);
    assert!(claims::claims_for_file(&board, "src/free.rs").unwrap().is_none());
}

#[test]
fn expired_chain_never_comes_back() {
    let (board, clock) = board_with_agents(&["a", "b"]);
    let chain = claims::claim(&board, "a", ["src/x.rs"], "", secs(10)).unwrap();
    assert!(!claims::is_expired(&board, &chain.chain_id).unwrap());

    clock.advance(Duration::from_secs(11));
    assert!(claims::is_expired(&board, &chain.chain_id).unwrap());
    assert!(claims::is_expired(&board, &chain.chain_id).unwrap());
    assert_eq!(
        count_events(&board, |e| matches!(e, Event::ExpireChain { .. })),
        1
    );

    // Releasing an expired chain changes nothing.
    let released = claims::release(&board, "a", &chain.chain_id).unwrap();
    assert_eq!(released.status, ChainStatus::Expired);
    assert!(claims::claim(&board, "b", ["src/x.rs"], "", secs(10)).is_ok());
}

#[test]
fn claim_at_exact_deadline_is_still_blocked() {
    let (board, clock) = board_with_agents(&["a", "b"]);
    claims::claim(&board, "a", ["src/x.rs"], "", secs(30)).unwrap();
    clock.advance(Duration::from_secs(30));
    assert!(claims::claim(&board, "b", ["src/x.rs"], "", secs(30)).is_err());
    clock.advance(Duration::from_secs(1));
    assert!(claims::claim(&board, "b", ["src/x.rs"], "", secs(30)).is_ok());
}

#[test]
fn only_the_owner_may_release() {
    let (board, _clock) = board_with_agents(&["a", "b"]);
    let chain = claims::claim(&board, "a", ["src/x.rs"], "", secs(60)).unwrap();
    let before = board.snapshot().unwrap().sequence;

    let err = claims::release(&board, "b", &chain.chain_id).unwrap_err();
    assert!(matches!(err, BoardError::Unauthorized { .. }));
    assert_eq!(board.snapshot().unwrap().sequence, before);

    let released = claims::release(&board, "a", &chain.chain_id).unwrap();
    assert_eq!(released.status, ChainStatus::Released);
    let again = claims::release(&board, "a", &chain.chain_id).unwrap();
    assert_eq!(again.status, ChainStatus::Released);
    assert_eq!(board.snapshot().unwrap().sequence, before + 1);

    assert!(matches!(
        claims::release(&board, "a", "no-such-chain"),
        Err(BoardError::NotFound(_))
    ));
}

#[test]
fn force_release_overrides_ownership() {
    let (board, _clock) = board_with_agents(&["a", "b"]);
    let chain = claims::claim(&board, "a", ["src/x.rs"], "", secs(600)).unwrap();

    let released = claims::force_release(&board, &chain.chain_id, "operator").unwrap();
    assert_eq!(released.status, ChainStatus::Released);
    assert_eq!(
        count_events(&board, |e| matches!(
            e,
            Event::ReleaseChain { forced: true, released_by, .. } if released_by == "operator"
        )),
        1
    );
    assert!(claims::claim(&board, "b", ["src/x.rs"], "", secs(60)).is_ok());
}

#[test]
fn reclaiming_own_files_extends_the_chain() {
    let (board, clock) = board_with_agents(&["a", "b"]);
    let first = claims::claim(&board, "a", ["src/x.rs", "src/y.rs"], "", secs(30)).unwrap();
    clock.advance(Duration::from_secs(20));

    let renewed = claims::claim(&board, "a", ["src/y.rs", "src/z.rs"], "", secs(30)).unwrap();
    assert_ne!(renewed.chain_id, first.chain_id);
    assert_eq!(
        renewed.files.iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["src/x.rs", "src/y.rs", "src/z.rs"]
    );
    assert_eq!(
        claims::get_chain(&board, &first.chain_id).unwrap().unwrap().status,
        ChainStatus::Released
    );

    // Past the first deadline, the renewed chain still holds every file.
    clock.advance(Duration::from_secs(20));
    let err = claims::claim(&board, "b", ["src/x.rs"], "", secs(30)).unwrap_err();
    assert_eq!(err.as_conflict().unwrap().owner_of("src/x.rs").map(|c| c.agent_id.as_str()), Some("a"));
}

#[test]
fn claim_requires_registered_agent_and_files() {
    let (board, _clock) = board_with_agents(&["a"]);
    assert!(matches!(
        claims::claim(&board, "ghost", ["src/x.rs"], "", None),
        Err(BoardError::NotFound(_))
    ));
    assert!(matches!(
        claims::claim(&board, "a", Vec::<String>::new(), "", None),
        Err(BoardError::ValidationError(_))
    ));
    assert!(matches!(
        claims::claim(&board, "a", ["src/x.rs"], "", secs(0)),
        Err(BoardError::ValidationError(_))
    ));
}

#[test]
fn equivalent_paths_collide() {
    let (board, _clock) = board_with_agents(&["a", "b"]);
    claims::claim(&board, "a", ["./src//lib.rs"], "", secs(60)).unwrap();
    let err = claims::claim(&board, "b", ["src/lib.rs"], "", secs(60)).unwrap_err();
    assert_eq!(err.as_conflict().unwrap().files(), vec!["src/lib.rs"]);
}

#[test]
fn stopped_agent_keeps_its_claims() {
    let (board, _clock) = board_with_agents(&["a", "b"]);
    let chain = claims::claim(&board, "a", ["src/x.rs"], "", secs(60)).unwrap();
    findings::update_agent_status(&board, "a", AgentStatus::Stopped).unwrap();

    let held = claims::claims_for_file(&board, "src/x.rs").unwrap().unwrap();
    assert_eq!(held.chain_id, chain.chain_id);
    assert!(claims::claim(&board, "b", ["src/x.rs"], "", secs(60)).is_err());
}

#[test]
fn sweep_records_every_overdue_chain() {
    let (board, clock) = board_with_agents(&["a", "b"]);
    let short = claims::claim(&board, "a", ["src/x.rs"], "", secs(5)).unwrap();
    let long = claims::claim(&board, "b", ["src/y.rs"], "", secs(500)).unwrap();
    clock.advance(Duration::from_secs(6));

    assert_eq!(
        claims::list_claims(&board, Some(ChainStatus::Active)).unwrap().len(),
        2
    );
    let swept = claims::sweep_expired(&board).unwrap();
    assert_eq!(swept, vec![short.chain_id.clone()]);
    assert!(claims::sweep_expired(&board).unwrap().is_empty());

    let active = claims::list_claims(&board, Some(ChainStatus::Active)).unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].chain_id, long.chain_id);
    assert_eq!(
        claims::list_claims(&board, Some(ChainStatus::Expired)).unwrap()[0].chain_id,
        short.chain_id
    );
}

#[test]
fn racing_claims_on_one_file_have_one_winner() {
    let agents: Vec<String> = (0..8).map(|i| format!("agent-{}", i)).collect();
    let refs: Vec<&str> = agents.iter().map(String::as_str).collect();
    let (board, _clock) = board_with_agents(&refs);
    let board = Arc::new(board);
    let barrier = Arc::new(Barrier::new(agents.len()));

    let handles: Vec<_> = agents
        .iter()
        .cloned()
        .map(|agent| {
            let board = board.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let own = format!("src/{}.rs", agent);
                barrier.wait();
                claims::claim(&board, &agent, ["src/shared.rs", own.as_str()], "", secs(60))
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    for r in &results {
        if let Err(e) = r {
            let conflict = e.as_conflict().unwrap();
            assert_eq!(conflict.files(), vec!["src/shared.rs"]);
            assert_eq!(conflict.owner_of("src/shared.rs").map(|c| c.agent_id.as_str()), Some(winners[0].agent_id.as_str()));
        }
    }
    assert_eq!(
        count_events(&board, |e| matches!(e, Event::ClaimChain { .. })),
        1
    );
}
