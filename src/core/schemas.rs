//! Storage names and the schema of the indexed store (`board.db`).
//!
//! A board directory holds:
//! 1. events.jsonl: the append-only event log, the single source of ordering truth.
//! 2. board.json: the sectioned, human/agent-readable document.
//! 3. board.db: the SQLite index serving filtered and ordered queries.
//! 4. checkpoint.json: optional snapshot of derived state at a log position.
//! 5. board.lock: cross-process writer lock.

pub const EVENTS_NAME: &str = "events.jsonl";
pub const DOCUMENT_NAME: &str = "board.json";
pub const BOARD_DB_NAME: &str = "board.db";
pub const CHECKPOINT_NAME: &str = "checkpoint.json";
pub const LOCK_NAME: &str = "board.lock";
pub const CONFIG_FILE_NAME: &str = "board.toml";

pub const INDEX_SCHEMA_VERSION: u32 = 1;

pub const INDEX_DB_SCHEMA_META: &str = "
    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
";

pub const INDEX_DB_SCHEMA_AGENTS: &str = "
    CREATE TABLE IF NOT EXISTS agents (
        id TEXT PRIMARY KEY,
        task TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'active',
        registered_at TEXT NOT NULL
    )
";

pub const INDEX_DB_SCHEMA_AGENT_INTERESTS: &str = "
    CREATE TABLE IF NOT EXISTS agent_interests (
        agent_id TEXT NOT NULL,
        tag TEXT NOT NULL,
        PRIMARY KEY(agent_id, tag),
        FOREIGN KEY(agent_id) REFERENCES agents(id) ON DELETE CASCADE
    )
";

pub const INDEX_DB_SCHEMA_FINDINGS: &str = "
    CREATE TABLE IF NOT EXISTS findings (
        id INTEGER PRIMARY KEY,
        agent_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
";

pub const INDEX_DB_SCHEMA_FINDING_TAGS: &str = "
    CREATE TABLE IF NOT EXISTS finding_tags (
        finding_id INTEGER NOT NULL,
        tag TEXT NOT NULL,
        PRIMARY KEY(finding_id, tag),
        FOREIGN KEY(finding_id) REFERENCES findings(id) ON DELETE CASCADE
    )
";

pub const INDEX_DB_SCHEMA_CLAIM_CHAINS: &str = "
    CREATE TABLE IF NOT EXISTS claim_chains (
        chain_id TEXT PRIMARY KEY,
        agent_id TEXT NOT NULL,
        reason TEXT NOT NULL,
        ttl_secs INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        expires_at TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'active'
    )
";

pub const INDEX_DB_SCHEMA_CHAIN_FILES: &str = "
    CREATE TABLE IF NOT EXISTS chain_files (
        chain_id TEXT NOT NULL,
        path TEXT NOT NULL,
        PRIMARY KEY(chain_id, path),
        FOREIGN KEY(chain_id) REFERENCES claim_chains(chain_id) ON DELETE CASCADE
    )
";

pub const INDEX_DB_SCHEMA_TASKS: &str = "
    CREATE TABLE IF NOT EXISTS tasks (
        id INTEGER PRIMARY KEY,
        priority INTEGER NOT NULL,
        description TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        created_at TEXT NOT NULL,
        claimed_by TEXT
    )
";

pub const INDEX_DB_SCHEMA_INDEX_FINDING_TAGS: &str =
    "CREATE INDEX IF NOT EXISTS idx_finding_tags_tag ON finding_tags(tag)";
pub const INDEX_DB_SCHEMA_INDEX_FINDINGS_CREATED: &str =
    "CREATE INDEX IF NOT EXISTS idx_findings_created ON findings(created_at, id)";
pub const INDEX_DB_SCHEMA_INDEX_CHAIN_FILES_PATH: &str =
    "CREATE INDEX IF NOT EXISTS idx_chain_files_path ON chain_files(path)";
pub const INDEX_DB_SCHEMA_INDEX_CHAINS_STATUS: &str =
    "CREATE INDEX IF NOT EXISTS idx_claim_chains_status ON claim_chains(status)";
pub const INDEX_DB_SCHEMA_INDEX_TASKS_QUEUE: &str =
    "CREATE INDEX IF NOT EXISTS idx_tasks_queue ON tasks(status, priority DESC, id)";

/// Creation order matters: parents before children.
pub const INDEX_DB_SCHEMA: &[&str] = &[
    INDEX_DB_SCHEMA_META,
    INDEX_DB_SCHEMA_AGENTS,
    INDEX_DB_SCHEMA_AGENT_INTERESTS,
    INDEX_DB_SCHEMA_FINDINGS,
    INDEX_DB_SCHEMA_FINDING_TAGS,
    INDEX_DB_SCHEMA_CLAIM_CHAINS,
    INDEX_DB_SCHEMA_CHAIN_FILES,
    INDEX_DB_SCHEMA_TASKS,
    INDEX_DB_SCHEMA_INDEX_FINDING_TAGS,
    INDEX_DB_SCHEMA_INDEX_FINDINGS_CREATED,
    INDEX_DB_SCHEMA_INDEX_CHAIN_FILES_PATH,
    INDEX_DB_SCHEMA_INDEX_CHAINS_STATUS,
    INDEX_DB_SCHEMA_INDEX_TASKS_QUEUE,
];

/// Children before parents, for `reset`.
pub const INDEX_DB_TABLES_CLEAR_ORDER: &[&str] = &[
    "agent_interests",
    "finding_tags",
    "chain_files",
    "agents",
    "findings",
    "claim_chains",
    "tasks",
];
