use claimboard::core::backend::{Backend, FileBackend};
use claimboard::core::config::BoardConfig;
use claimboard::core::document::{BoardDocument, DOCUMENT_FORMAT};
use claimboard::core::error::BoardError;
use claimboard::core::event_log::EventLog;
use claimboard::core::events::Event;
use claimboard::core::model::FindingKind;
use claimboard::core::schemas;
use claimboard::core::time::{Clock, ManualClock};
use chrono::{DateTime, SubsecRound, Utc};
use claimboard::plugins::{claims, findings, tasks};
use claimboard::Board;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

fn config(root: &Path) -> BoardConfig {
    let mut config = BoardConfig::new(root);
    config.fsync = false;
    config
}

fn open(root: &Path, clock: &Arc<ManualClock>) -> Board {
    Board::open_with_clock(config(root), clock.clone()).unwrap()
}

fn task_event(n: u64) -> Event {
    Event::AddTask {
        task_id: n,
        description: format!("task {}", n),
        priority: 0,
    }
}

fn populate(board: &Board) {
    findings::register_agent(board, "alpha", "auth rewrite", ["auth"]).unwrap();
    findings::register_agent(board, "beta", "db migration", ["db", "auth"]).unwrap();
    claims::claim(board, "alpha", ["src/auth.rs", "src/session.rs"], "rewrite", None).unwrap();
    findings::add_finding(board, "alpha", FindingKind::Fact, "tokens are cached", ["auth"]).unwrap();
    findings::add_finding(board, "beta", FindingKind::Blocker, "schema lock", ["db"]).unwrap();
    tasks::add_task(board, "write migration", 5).unwrap();
    tasks::add_task(board, "update docs", 1).unwrap();
    tasks::pop_highest_priority_task(board, "beta").unwrap();
}

#[test]
fn concurrent_appenders_get_gap_free_sequences() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().to_path_buf();
    let writers = 4;
    let per_writer = 25;
    let barrier = Arc::new(Barrier::new(writers));

    let handles: Vec<_> = (0..writers)
        .map(|w| {
            let root = root.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let log = EventLog::new(Arc::new(FileBackend::open(&root, false).unwrap()));
                let clock = ManualClock::default();
                barrier.wait();
                (0..per_writer)
                    .map(|i| log.append(task_event((w * per_writer + i) as u64), clock.now()).unwrap().sequence)
                    .collect::<Vec<u64>>()
            })
        })
        .collect();

    let mut assigned: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
    assigned.sort_unstable();
    let expected: Vec<u64> = (1..=(writers * per_writer) as u64).collect();
    assert_eq!(assigned, expected);

    let log = EventLog::new(Arc::new(FileBackend::open(&root, false).unwrap()));
    let read: Vec<u64> = log
        .read_from(0)
        .unwrap()
        .map(|r| r.unwrap().sequence)
        .collect();
    assert_eq!(read, expected);
}

#[test]
fn read_from_is_restartable() {
    let tmp = tempdir().unwrap();
    let log = EventLog::new(Arc::new(FileBackend::open(tmp.path(), false).unwrap()));
    let clock = ManualClock::default();
    for n in 1..=10 {
        log.append(task_event(n), clock.now()).unwrap();
    }

    let first: Vec<u64> = log
        .read_from(4)
        .unwrap()
        .take(3)
        .map(|r| r.unwrap().sequence)
        .collect();
    assert_eq!(first, vec![4, 5, 6]);

    let resumed: Vec<u64> = log
        .read_from(7)
        .unwrap()
        .map(|r| r.unwrap().sequence)
        .collect();
    assert_eq!(resumed, vec![7, 8, 9, 10]);
    assert_eq!(log.read_from(0).unwrap().count(), log.read_from(1).unwrap().count());
}

#[test]
fn torn_append_leaves_no_trace_after_recovery() {
    let tmp = tempdir().unwrap();
    let clock = Arc::new(ManualClock::default());
    let board = open(tmp.path(), &clock);
    findings::register_agent(&board, "alpha", "t", ["auth"]).unwrap();

    let events = tmp.path().join(schemas::EVENTS_NAME);
    let clean = fs::read(&events).unwrap();
    let mut f = OpenOptions::new().append(true).open(&events).unwrap();
    f.write_all(br#"{"sequence":2,"timestamp":"2025-10-09T"#).unwrap();
    drop(f);

    let report = board.recover().unwrap();
    assert!(report.torn_bytes_discarded > 0);
    assert_eq!(report.last_sequence, 1);
    assert_eq!(fs::read(&events).unwrap(), clean);

    let finding =
        findings::add_finding(&board, "alpha", FindingKind::Fact, "after repair", ["auth"]).unwrap();
    assert_eq!(finding.id, 1);
    assert_eq!(board.snapshot().unwrap().sequence, 2);
}

#[test]
fn corrupt_record_is_fatal_on_open() {
    let tmp = tempdir().unwrap();
    let clock = Arc::new(ManualClock::default());
    {
        let board = open(tmp.path(), &clock);
        findings::register_agent(&board, "alpha", "first task", ["auth"]).unwrap();
        findings::register_agent(&board, "beta", "second task", ["db"]).unwrap();
    }
    let events = tmp.path().join(schemas::EVENTS_NAME);
    let body = fs::read_to_string(&events).unwrap();
    fs::write(&events, body.replace("first task", "first tasK")).unwrap();

    let err = Board::open_with_clock(config(tmp.path()), clock).unwrap_err();
    assert!(matches!(err, BoardError::CorruptLog { offset: 0, .. }), "got {err}");
    assert!(err.is_fatal());
}

#[test]
fn sequence_skip_in_log_is_corruption() {
    let tmp = tempdir().unwrap();
    let backend = FileBackend::open(tmp.path(), false).unwrap();
    let log = EventLog::new(Arc::new(backend.clone()));
    let clock = ManualClock::default();
    log.append(task_event(1), clock.now()).unwrap();
    let record = claimboard::core::events::EventRecord::seal(3, clock.now(), task_event(2)).unwrap();
    backend.append_log(&record.to_line().unwrap()).unwrap();

    let results: Vec<_> = log.read_from(0).unwrap().collect();
    assert_eq!(results.len(), 2);
    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(BoardError::CorruptLog { .. })));
}

#[test]
fn replay_is_bit_for_bit_deterministic() {
    let tmp = tempdir().unwrap();
    let clock = Arc::new(ManualClock::default());
    let board = open(tmp.path(), &clock);
    populate(&board);

    let first = serde_json::to_vec(&board.replay_from_scratch().unwrap()).unwrap();
    let second = serde_json::to_vec(&board.replay_from_scratch().unwrap()).unwrap();
    assert_eq!(first, second);
    assert_eq!(board.replay_from_scratch().unwrap(), board.snapshot().unwrap());

    // A second handle on the same directory derives the same state.
    let other = open(tmp.path(), &clock);
    assert_eq!(other.snapshot().unwrap(), board.snapshot().unwrap());
}

#[test]
fn checkpoint_then_tail_matches_full_replay() {
    let tmp = tempdir().unwrap();
    let clock = Arc::new(ManualClock::default());
    let board = open(tmp.path(), &clock);
    populate(&board);
    let info = board.checkpoint().unwrap();
    assert_eq!(info.sequence, board.snapshot().unwrap().sequence);
    tasks::add_task(&board, "after checkpoint", 9).unwrap();
    claims::claim(&board, "beta", ["migrations/001.sql"], "", None).unwrap();
    drop(board);

    let reopened = open(tmp.path(), &clock);
    let report = reopened.recover().unwrap();
    assert!(report.from_checkpoint);
    assert_eq!(report.events_replayed, 2);
    assert_eq!(reopened.snapshot().unwrap(), reopened.replay_from_scratch().unwrap());
    assert!(reopened.validate_state_consistency().unwrap().consistent);
}

#[test]
fn document_keeps_fixed_sections() {
    let tmp = tempdir().unwrap();
    let clock = Arc::new(ManualClock::default());
    let board = open(tmp.path(), &clock);
    populate(&board);

    let body = fs::read_to_string(tmp.path().join(schemas::DOCUMENT_NAME)).unwrap();
    let positions: Vec<usize> = ["format", "sequence", "agents", "findings", "claims", "tasks"]
        .iter()
        .map(|k| body.find(&format!("\n  \"{}\": ", k)).unwrap())
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]), "sections out of order");

    let doc = BoardDocument::parse(body.as_bytes()).unwrap();
    assert_eq!(doc.format, DOCUMENT_FORMAT);
    assert_eq!(doc.agents.iter().map(|a| a.id.as_str()).collect::<Vec<_>>(), vec!["alpha", "beta"]);
    assert_eq!(doc.findings.len(), 2);
    assert_eq!(doc.claims.len(), 1);
    assert_eq!(doc.tasks.len(), 2);
}

#[test]
fn reset_is_journaled_and_ids_keep_climbing() {
    let tmp = tempdir().unwrap();
    let clock = Arc::new(ManualClock::default());
    let board = open(tmp.path(), &clock);
    populate(&board);
    board.reset().unwrap();

    let state = board.snapshot().unwrap();
    assert!(state.agents.is_empty() && state.findings.is_empty());
    assert!(state.chains.is_empty() && state.tasks.is_empty());
    let last = board.log().read_from(state.sequence).unwrap().next().unwrap().unwrap();
    assert_eq!(last.event, Event::Reset);

    findings::register_agent(&board, "alpha", "t", ["auth"]).unwrap();
    let f = findings::add_finding(&board, "alpha", FindingKind::Fact, "again", ["auth"]).unwrap();
    assert_eq!(f.id, 3);
    assert_eq!(tasks::add_task(&board, "again", 0).unwrap().id, 3);
    assert!(board.validate_state_consistency().unwrap().consistent);
}

#[test]
fn board_toml_sets_default_ttl() {
    let tmp = tempdir().unwrap();
    fs::write(
        tmp.path().join(schemas::CONFIG_FILE_NAME),
        "default_ttl_secs = 42\nfsync = false\n",
    )
    .unwrap();
    let config = BoardConfig::parse(&fs::read_to_string(tmp.path().join(schemas::CONFIG_FILE_NAME)).unwrap())
        .unwrap();
    assert_eq!(config.default_ttl(), Duration::from_secs(42));

    let mut config = config;
    config.root = tmp.path().to_path_buf();
    let clock = Arc::new(ManualClock::default());
    let board = Board::open_with_clock(config, clock).unwrap();
    findings::register_agent(&board, "alpha", "t", ["auth"]).unwrap();
    let chain = claims::claim(&board, "alpha", ["a.rs"], "", None).unwrap();
    assert_eq!(chain.ttl_secs, 42);
}

#[test]
fn recovery_expires_chains_that_lapsed_while_closed() {
    let tmp = tempdir().unwrap();
    let clock = Arc::new(ManualClock::default());
    let chain_id = {
        let board = open(tmp.path(), &clock);
        findings::register_agent(&board, "alpha", "t", ["auth"]).unwrap();
        claims::claim(&board, "alpha", ["a.rs"], "", Some(Duration::from_secs(30)))
            .unwrap()
            .chain_id
    };
    clock.advance(Duration::from_secs(31));

    let board = open(tmp.path(), &clock);
    let chain = board.snapshot().unwrap().chain(&chain_id).cloned().unwrap();
    assert_eq!(chain.status, claimboard::core::model::ChainStatus::Expired);
    let expire_events = board
        .log()
        .read_from(0)
        .unwrap()
        .filter(|r| matches!(r.as_ref().unwrap().event, Event::ExpireChain { .. }))
        .count();
    assert_eq!(expire_events, 1);
}

/// Reports time at nanosecond precision, finer than either representation keeps.
struct NanoClock;

impl Clock for NanoClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_760_000_000, 123_456_789).unwrap()
    }
}

#[test]
fn fine_grained_clock_keeps_representations_in_step() {
    let tmp = tempdir().unwrap();
    let board = Board::open_with_clock(config(tmp.path()), Arc::new(NanoClock)).unwrap();
    findings::register_agent(&board, "alpha", "t", ["auth"]).unwrap();
    findings::add_finding(&board, "alpha", FindingKind::Fact, "seen", ["auth"]).unwrap();
    claims::claim(&board, "alpha", ["src/lib.rs"], "", None).unwrap();
    let task = tasks::add_task(&board, "index", 1).unwrap();

    assert_eq!(task.created_at, NanoClock.now().trunc_subsecs(3));
    assert_eq!(board.now(), task.created_at);
    let report = board.validate_state_consistency().unwrap();
    assert!(report.consistent, "divergences: {:?}", report.divergences);

    drop(board);
    let board = Board::open_with_clock(config(tmp.path()), Arc::new(NanoClock)).unwrap();
    assert!(board.validate_state_consistency().unwrap().consistent);
}
