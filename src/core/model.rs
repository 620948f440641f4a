//! Board entities and the normalization rules applied before anything is journaled.

use crate::core::error::BoardError;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Completed,
    Stopped,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Active => "active",
            AgentStatus::Completed => "completed",
            AgentStatus::Stopped => "stopped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, AgentStatus::Active)
    }
}

impl FromStr for AgentStatus {
    type Err = BoardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AgentStatus::Active),
            "completed" => Ok(AgentStatus::Completed),
            "stopped" => Ok(AgentStatus::Stopped),
            other => Err(BoardError::ValidationError(format!(
                "unknown agent status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    Fact,
    Hypothesis,
    Blocker,
    Question,
}

impl FindingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingKind::Fact => "fact",
            FindingKind::Hypothesis => "hypothesis",
            FindingKind::Blocker => "blocker",
            FindingKind::Question => "question",
        }
    }
}

impl FromStr for FindingKind {
    type Err = BoardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fact" => Ok(FindingKind::Fact),
            "hypothesis" => Ok(FindingKind::Hypothesis),
            "blocker" => Ok(FindingKind::Blocker),
            "question" => Ok(FindingKind::Question),
            other => Err(BoardError::ValidationError(format!(
                "unknown finding kind '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainStatus {
    Active,
    Released,
    Expired,
}

impl ChainStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainStatus::Active => "active",
            ChainStatus::Released => "released",
            ChainStatus::Expired => "expired",
        }
    }
}

impl FromStr for ChainStatus {
    type Err = BoardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ChainStatus::Active),
            "released" => Ok(ChainStatus::Released),
            "expired" => Ok(ChainStatus::Expired),
            other => Err(BoardError::ValidationError(format!(
                "unknown chain status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Claimed,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Claimed => "claimed",
            TaskStatus::Done => "done",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = BoardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "claimed" => Ok(TaskStatus::Claimed),
            "done" => Ok(TaskStatus::Done),
            other => Err(BoardError::ValidationError(format!(
                "unknown task status '{}'",
                other
            ))),
        }
    }
}

macro_rules! display_as_str {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.pad(self.as_str())
            }
        })*
    };
}

display_as_str!(AgentStatus, FindingKind, ChainStatus, TaskStatus);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub task: String,
    pub interests: BTreeSet<String>,
    pub status: AgentStatus,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub id: u64,
    pub agent_id: String,
    pub kind: FindingKind,
    pub content: String,
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimChain {
    pub chain_id: String,
    pub agent_id: String,
    pub files: BTreeSet<String>,
    pub reason: String,
    pub ttl_secs: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: ChainStatus,
}

impl ClaimChain {
    /// Active and not yet past its deadline: the only state that blocks other claims.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.status == ChainStatus::Active && now <= self.expires_at
    }

    /// Recorded as expired, or still recorded active but past its deadline.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            ChainStatus::Expired => true,
            ChainStatus::Active => now > self.expires_at,
            ChainStatus::Released => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: u64,
    pub priority: i64,
    pub description: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub claimed_by: Option<String>,
}

fn agent_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._:@-]{0,127}$").expect("static pattern"))
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9._:/-]{0,63}$").expect("static pattern"))
}

pub fn validate_agent_id(agent_id: &str) -> Result<(), BoardError> {
    if agent_id_re().is_match(agent_id) {
        Ok(())
    } else {
        Err(BoardError::ValidationError(format!(
            "invalid agent id '{}': use letters, digits, '.', '_', ':', '@' or '-'",
            agent_id
        )))
    }
}

/// Trims and lowercases tags; an empty input yields an empty set.
pub fn normalize_tags<I, S>(tags: I) -> Result<BTreeSet<String>, BoardError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = BTreeSet::new();
    for tag in tags {
        let tag = tag.as_ref().trim().to_lowercase();
        if tag.is_empty() {
            continue;
        }
        if !tag_re().is_match(&tag) {
            return Err(BoardError::ValidationError(format!("invalid tag '{}'", tag)));
        }
        out.insert(tag);
    }
    Ok(out)
}

/// `./src//lib.rs` and `src\lib.rs` both name `src/lib.rs`.
pub fn normalize_path(raw: &str) -> Result<String, BoardError> {
    let unified = raw.trim().replace('\\', "/");
    if unified.contains('\0') {
        return Err(BoardError::ValidationError(format!(
            "invalid resource path {:?}",
            raw
        )));
    }
    let absolute = unified.starts_with('/');
    let parts: Vec<&str> = unified
        .split('/')
        .filter(|p| !p.is_empty() && *p != ".")
        .collect();
    if parts.is_empty() {
        return Err(BoardError::ValidationError(format!(
            "invalid resource path {:?}",
            raw
        )));
    }
    let joined = parts.join("/");
    Ok(if absolute { format!("/{}", joined) } else { joined })
}

pub fn normalize_paths<I, S>(files: I) -> Result<BTreeSet<String>, BoardError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = BTreeSet::new();
    for f in files {
        out.insert(normalize_path(f.as_ref())?);
    }
    Ok(out)
}
