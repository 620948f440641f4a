//! Representation B: the SQLite index (`board.db`).
//!
//! Each journaled event is applied inside one SQLite transaction together with
//! the `applied_sequence` watermark, so after a crash the index is exactly at
//! some prefix of the log and recovery knows where to resume.

use crate::core::backend::Backend;
use crate::core::db;
use crate::core::document::BoardDocument;
use crate::core::error::BoardError;
use crate::core::events::{Event, EventRecord};
use crate::core::model::{
    Agent, AgentStatus, ChainStatus, ClaimChain, Finding, FindingKind, Task, TaskStatus,
};
use crate::core::schemas;
use crate::core::time::{format_ts, parse_ts};
use rusqlite::{Connection, OptionalExtension, Row, ToSql, params, params_from_iter};
use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug)]
pub struct IndexStore {
    conn: Mutex<Connection>,
}

fn conversion_error(e: BoardError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
}

fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<chrono::DateTime<chrono::Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).map_err(conversion_error)
}

fn parsed_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = BoardError>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(conversion_error)
}

fn to_i64(v: u64) -> Result<i64, BoardError> {
    i64::try_from(v).map_err(|_| BoardError::ValidationError(format!("value {} out of range", v)))
}

const AGENT_COLUMNS: &str = "id, task, status, registered_at";
const FINDING_COLUMNS: &str = "f.id, f.agent_id, f.kind, f.content, f.created_at";
const CHAIN_COLUMNS: &str = "chain_id, agent_id, reason, ttl_secs, created_at, expires_at, status";
const TASK_COLUMNS: &str = "id, priority, description, status, created_at, claimed_by";

fn agent_row(row: &Row<'_>) -> rusqlite::Result<Agent> {
    Ok(Agent {
        id: row.get(0)?,
        task: row.get(1)?,
        interests: BTreeSet::new(),
        status: parsed_col(row, 2)?,
        registered_at: ts_col(row, 3)?,
    })
}

fn finding_row(row: &Row<'_>) -> rusqlite::Result<Finding> {
    let id: i64 = row.get(0)?;
    Ok(Finding {
        id: id as u64,
        agent_id: row.get(1)?,
        kind: parsed_col(row, 2)?,
        content: row.get(3)?,
        tags: BTreeSet::new(),
        created_at: ts_col(row, 4)?,
    })
}

fn chain_row(row: &Row<'_>) -> rusqlite::Result<ClaimChain> {
    let ttl: i64 = row.get(3)?;
    Ok(ClaimChain {
        chain_id: row.get(0)?,
        agent_id: row.get(1)?,
        files: BTreeSet::new(),
        reason: row.get(2)?,
        ttl_secs: ttl as u64,
        created_at: ts_col(row, 4)?,
        expires_at: ts_col(row, 5)?,
        status: parsed_col(row, 6)?,
    })
}

fn task_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let id: i64 = row.get(0)?;
    Ok(Task {
        id: id as u64,
        priority: row.get(1)?,
        description: row.get(2)?,
        status: parsed_col(row, 3)?,
        created_at: ts_col(row, 4)?,
        claimed_by: row.get(5)?,
    })
}

fn string_set<K: ToSql>(conn: &Connection, sql: &str, key: K) -> Result<BTreeSet<String>, BoardError> {
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt.query_map(params![key], |row| row.get::<_, String>(0))?;
    let mut out = BTreeSet::new();
    for r in rows {
        out.insert(r?);
    }
    Ok(out)
}

fn read_applied(conn: &Connection) -> Result<u64, BoardError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'applied_sequence'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    match raw {
        None => Ok(0),
        Some(v) => v.parse::<u64>().map_err(|_| {
            BoardError::ValidationError(format!("board.db applied_sequence '{}' is not a number", v))
        }),
    }
}

fn write_applied(conn: &Connection, sequence: u64) -> Result<(), BoardError> {
    conn.execute(
        "INSERT INTO meta(key, value) VALUES('applied_sequence', ?1)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![sequence.to_string()],
    )?;
    Ok(())
}

fn close_chain(conn: &Connection, chain_id: &str, to: ChainStatus) -> Result<(), BoardError> {
    conn.execute(
        "UPDATE claim_chains SET status = ?2 WHERE chain_id = ?1 AND status = 'active'",
        params![chain_id, to.as_str()],
    )?;
    Ok(())
}

/// Mirrors `BoardState::apply_event` row for row.
fn apply_event(conn: &Connection, record: &EventRecord) -> Result<(), BoardError> {
    let at = format_ts(&record.timestamp);
    match &record.event {
        Event::RegisterAgent {
            agent_id,
            task,
            interests,
        } => {
            conn.execute(
                "INSERT INTO agents(id, task, status, registered_at) VALUES(?1, ?2, 'active', ?3)
                 ON CONFLICT(id) DO UPDATE SET task = excluded.task",
                params![agent_id, task, at],
            )?;
            conn.execute(
                "DELETE FROM agent_interests WHERE agent_id = ?1",
                params![agent_id],
            )?;
            for tag in interests {
                conn.execute(
                    "INSERT INTO agent_interests(agent_id, tag) VALUES(?1, ?2)",
                    params![agent_id, tag],
                )?;
            }
        }
        Event::UpdateAgentStatus { agent_id, status } => {
            conn.execute(
                "UPDATE agents SET status = ?2 WHERE id = ?1",
                params![agent_id, status.as_str()],
            )?;
        }
        Event::AddFinding {
            finding_id,
            agent_id,
            kind,
            content,
            tags,
        } => {
            let id = to_i64(*finding_id)?;
            conn.execute(
                "INSERT INTO findings(id, agent_id, kind, content, created_at) VALUES(?1, ?2, ?3, ?4, ?5)",
                params![id, agent_id, kind.as_str(), content, at],
            )?;
            for tag in tags {
                conn.execute(
                    "INSERT INTO finding_tags(finding_id, tag) VALUES(?1, ?2)",
                    params![id, tag],
                )?;
            }
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
                close_chain(conn, old, ChainStatus::Released)?;
            }
            conn.execute(
                "INSERT INTO claim_chains(chain_id, agent_id, reason, ttl_secs, created_at, expires_at, status)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, 'active')",
                params![
                    chain_id,
                    agent_id,
                    reason,
                    to_i64(*ttl_secs)?,
                    at,
                    format_ts(expires_at)
                ],
            )?;
            for path in files {
                conn.execute(
                    "INSERT INTO chain_files(chain_id, path) VALUES(?1, ?2)",
                    params![chain_id, path],
                )?;
            }
        }
        Event::ReleaseChain { chain_id, .. } => close_chain(conn, chain_id, ChainStatus::Released)?,
        Event::ExpireChain { chain_id } => close_chain(conn, chain_id, ChainStatus::Expired)?,
        Event::AddTask {
            task_id,
            description,
            priority,
        } => {
            conn.execute(
                "INSERT INTO tasks(id, priority, description, status, created_at, claimed_by)
                 VALUES(?1, ?2, ?3, 'pending', ?4, NULL)",
                params![to_i64(*task_id)?, priority, description, at],
            )?;
        }
        Event::ClaimTask { task_id, agent_id } => {
            conn.execute(
                "UPDATE tasks SET status = 'claimed', claimed_by = ?2 WHERE id = ?1 AND status = 'pending'",
                params![to_i64(*task_id)?, agent_id],
            )?;
        }
        Event::CompleteTask { task_id } => {
            conn.execute(
                "UPDATE tasks SET status = 'done' WHERE id = ?1",
                params![to_i64(*task_id)?],
            )?;
        }
        Event::Reset => clear_tables(conn)?,
    }
    Ok(())
}

fn clear_tables(conn: &Connection) -> Result<(), BoardError> {
    for table in schemas::INDEX_DB_TABLES_CLEAR_ORDER {
        conn.execute(&format!("DELETE FROM {}", table), [])?;
    }
    Ok(())
}

impl IndexStore {
    pub fn open(backend: &dyn Backend) -> Result<Self, BoardError> {
        let conn = backend.open_index()?;
        db::ensure_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, BoardError> {
        self.conn
            .lock()
            .map_err(|_| BoardError::ValidationError("index connection lock poisoned".to_string()))
    }

    /// Sequence of the last event reflected in the index.
    pub fn applied_sequence(&self) -> Result<u64, BoardError> {
        let conn = self.conn()?;
        read_applied(&conn)
    }

    /// Applies one record atomically. Returns `false` if it was already applied.
    pub fn apply(&self, record: &EventRecord) -> Result<bool, BoardError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let applied = read_applied(&tx)?;
        if record.sequence <= applied {
            return Ok(false);
        }
        if record.sequence != applied + 1 {
            return Err(BoardError::SequenceGap {
                expected: applied + 1,
                found: record.sequence,
            });
        }
        apply_event(&tx, record)?;
        write_applied(&tx, record.sequence)?;
        tx.commit()?;
        Ok(true)
    }

    /// Clears every row and re-applies `records` from the start. Returns how many were applied.
    pub fn rebuild<I>(&self, records: I) -> Result<u64, BoardError>
    where
        I: IntoIterator<Item = Result<EventRecord, BoardError>>,
    {
        {
            let mut conn = self.conn()?;
            let tx = conn.transaction()?;
            clear_tables(&tx)?;
            write_applied(&tx, 0)?;
            tx.commit()?;
        }
        let mut count = 0u64;
        for record in records {
            if self.apply(&record?)? {
                count += 1;
            }
        }
        debug!(events = count, "rebuilt board index from event log");
        Ok(count)
    }

    pub fn agent(&self, agent_id: &str) -> Result<Option<Agent>, BoardError> {
        let conn = self.conn()?;
        let agent = conn
            .query_row(
                &format!("SELECT {} FROM agents WHERE id = ?1", AGENT_COLUMNS),
                params![agent_id],
                agent_row,
            )
            .optional()?;
        match agent {
            Some(mut a) => {
                a.interests = string_set(
                    &conn,
                    "SELECT tag FROM agent_interests WHERE agent_id = ?1 ORDER BY tag",
                    &a.id,
                )?;
                Ok(Some(a))
            }
            None => Ok(None),
        }
    }

    /// Agents ordered by id, optionally restricted to one status.
    pub fn agents(&self, status: Option<AgentStatus>) -> Result<Vec<Agent>, BoardError> {
        let conn = self.conn()?;
        query_agents(&conn, status)
    }

    /// Findings carrying any of `tags` (all findings when `tags` is empty), oldest first.
    pub fn findings(&self, tags: &BTreeSet<String>) -> Result<Vec<Finding>, BoardError> {
        let conn = self.conn()?;
        query_findings(&conn, tags, None)
    }

    pub fn findings_by_kind(&self, kind: FindingKind) -> Result<Vec<Finding>, BoardError> {
        let conn = self.conn()?;
        query_findings(&conn, &BTreeSet::new(), Some(kind))
    }

    /// Chains ordered by creation, optionally restricted to one status.
    pub fn chains(&self, status: Option<ChainStatus>) -> Result<Vec<ClaimChain>, BoardError> {
        let conn = self.conn()?;
        query_chains(&conn, status)
    }

    /// Queue order: highest priority first, then oldest.
    pub fn tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Task>, BoardError> {
        let conn = self.conn()?;
        query_tasks(&conn, status, "priority DESC, id ASC")
    }

    /// The whole index as a board document, read in one transaction.
    pub fn load_document(&self) -> Result<BoardDocument, BoardError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut doc = BoardDocument::empty();
        doc.sequence = read_applied(&tx)?;
        doc.agents = query_agents(&tx, None)?;
        let mut findings = query_findings(&tx, &BTreeSet::new(), None)?;
        findings.sort_by_key(|f| f.id);
        doc.findings = findings;
        let mut chains = query_chains(&tx, None)?;
        chains.sort_by(|a, b| a.chain_id.cmp(&b.chain_id));
        doc.claims = chains;
        doc.tasks = query_tasks(&tx, None, "id ASC")?;
        tx.commit()?;
        Ok(doc)
    }
}

fn query_agents(conn: &Connection, status: Option<AgentStatus>) -> Result<Vec<Agent>, BoardError> {
    let mut sql = format!("SELECT {} FROM agents", AGENT_COLUMNS);
    let mut args: Vec<String> = Vec::new();
    if let Some(s) = status {
        sql.push_str(" WHERE status = ?1");
        args.push(s.as_str().to_string());
    }
    sql.push_str(" ORDER BY id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(args.iter()), agent_row)?;
    let mut out = Vec::new();
    for r in rows {
        let mut agent = r?;
        agent.interests = string_set(
            conn,
            "SELECT tag FROM agent_interests WHERE agent_id = ?1 ORDER BY tag",
            &agent.id,
        )?;
        out.push(agent);
    }
    Ok(out)
}

fn query_findings(
    conn: &Connection,
    tags: &BTreeSet<String>,
    kind: Option<FindingKind>,
) -> Result<Vec<Finding>, BoardError> {
    let mut sql = format!("SELECT {} FROM findings f", FINDING_COLUMNS);
    let mut clauses: Vec<String> = Vec::new();
    let mut args: Vec<String> = Vec::new();
    if !tags.is_empty() {
        let placeholders = (1..=tags.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        clauses.push(format!(
            "EXISTS (SELECT 1 FROM finding_tags t WHERE t.finding_id = f.id AND t.tag IN ({}))",
            placeholders
        ));
        args.extend(tags.iter().cloned());
    }
    if let Some(k) = kind {
        args.push(k.as_str().to_string());
        clauses.push(format!("f.kind = ?{}", args.len()));
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY f.created_at ASC, f.id ASC");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(args.iter()), finding_row)?;
    let mut out = Vec::new();
    for r in rows {
        let mut finding = r?;
        finding.tags = string_set(
            conn,
            "SELECT tag FROM finding_tags WHERE finding_id = ?1 ORDER BY tag",
            to_i64(finding.id)?,
        )?;
        out.push(finding);
    }
    Ok(out)
}

fn query_chains(conn: &Connection, status: Option<ChainStatus>) -> Result<Vec<ClaimChain>, BoardError> {
    let mut sql = format!("SELECT {} FROM claim_chains", CHAIN_COLUMNS);
    let mut args: Vec<String> = Vec::new();
    if let Some(s) = status {
        sql.push_str(" WHERE status = ?1");
        args.push(s.as_str().to_string());
    }
    sql.push_str(" ORDER BY created_at ASC, chain_id ASC");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(args.iter()), chain_row)?;
    let mut out = Vec::new();
    for r in rows {
        let mut chain = r?;
        chain.files = string_set(
            conn,
            "SELECT path FROM chain_files WHERE chain_id = ?1 ORDER BY path",
            &chain.chain_id,
        )?;
        out.push(chain);
    }
    Ok(out)
}

fn query_tasks(
    conn: &Connection,
    status: Option<TaskStatus>,
    order: &str,
) -> Result<Vec<Task>, BoardError> {
    let mut sql = format!("SELECT {} FROM tasks", TASK_COLUMNS);
    let mut args: Vec<String> = Vec::new();
    if let Some(s) = status {
        sql.push_str(" WHERE status = ?1");
        args.push(s.as_str().to_string());
    }
    sql.push_str(&format!(" ORDER BY {}", order));
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(args.iter()), task_row)?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}
