//! CLI struct definitions and dispatch for the claimboard command-line interface.
//!
//! Every command opens the board (which runs recovery), performs one
//! operation, and prints either plain text or a JSON command envelope.

use crate::core::config::BoardConfig;
use crate::core::error::BoardError;
use crate::core::model::{AgentStatus, ChainStatus, ClaimChain, FindingKind, TaskStatus};
use crate::core::store::Board;
use crate::core::time::{command_envelope, format_ts};
use crate::core::validate::ConsistencyReport;
use crate::plugins::{claims, findings, tasks};
use crate::subsystems;
use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::{Value as JsonValue, json};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

/// Exit status for a claim rejected because another agent holds a requested file.
pub const EXIT_CONFLICT: u8 = 3;
/// Exit status for `board validate` when the two representations diverge.
pub const EXIT_DIVERGED: u8 = 2;

#[derive(Parser, Debug)]
#[clap(
    name = "claimboard",
    version = env!("CARGO_PKG_VERSION"),
    about = "Coordination blackboard for concurrent agents: file claims, findings, and a task queue."
)]
pub(crate) struct Cli {
    /// Board directory (defaults to $CLAIMBOARD_DIR, then ./.claimboard).
    #[clap(long, global = true)]
    pub dir: Option<PathBuf>,
    /// Output format: 'text' or 'json'.
    #[clap(long, global = true, default_value = "text")]
    pub format: String,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Agent registry
    Agent(AgentCli),
    /// File claim chains
    Claim(ClaimCli),
    /// Tagged findings
    Finding(FindingCli),
    /// Priority task queue
    Task(TaskCli),
    /// Board maintenance: consistency, recovery, checkpoints
    Board(BoardCli),
    /// Print every subsystem's command schema as JSON
    Capabilities,
}

#[derive(clap::Args, Debug)]
pub(crate) struct AgentCli {
    #[clap(subcommand)]
    pub command: AgentCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum AgentCommand {
    /// Register an agent, or update its task and interests
    Register {
        agent: String,
        #[clap(long, default_value = "")]
        task: String,
        /// Tags this agent wants findings for (repeatable or comma-separated).
        #[clap(long = "interest", value_delimiter = ',')]
        interests: Vec<String>,
    },
    /// Move an active agent to 'completed' or 'stopped'
    Status { agent: String, status: String },
    /// List agents
    List {
        #[clap(long)]
        active: bool,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct ClaimCli {
    #[clap(subcommand)]
    pub command: ClaimCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum ClaimCommand {
    /// Claim all of the given files, or none of them
    Acquire {
        #[clap(long)]
        agent: String,
        #[clap(required = true)]
        files: Vec<String>,
        #[clap(long, default_value = "")]
        reason: String,
        /// Seconds until the claim expires (board default when omitted).
        #[clap(long)]
        ttl_secs: Option<u64>,
    },
    /// Release a chain you own
    Release {
        #[clap(long)]
        agent: String,
        chain: String,
    },
    /// Operator override: release any chain
    ForceRelease {
        chain: String,
        #[clap(long, default_value = "operator")]
        operator: String,
    },
    /// Show a chain by id, or the live chain covering a file
    Show {
        #[clap(long, conflicts_with = "file", required_unless_present = "file")]
        chain: Option<String>,
        #[clap(long)]
        file: Option<String>,
    },
    /// List chains
    List {
        /// active, released or expired
        #[clap(long)]
        status: Option<String>,
    },
    /// Record the expiration of every overdue chain
    Sweep,
}

#[derive(clap::Args, Debug)]
pub(crate) struct FindingCli {
    #[clap(subcommand)]
    pub command: FindingCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum FindingCommand {
    /// Post a finding
    Add {
        #[clap(long)]
        agent: String,
        /// fact, hypothesis, blocker or question
        #[clap(long, default_value = "fact")]
        kind: String,
        content: String,
        #[clap(long = "tag", value_delimiter = ',')]
        tags: Vec<String>,
    },
    /// List findings, oldest first
    List {
        #[clap(long = "tag", value_delimiter = ',')]
        tags: Vec<String>,
        #[clap(long, conflicts_with_all = ["tags", "for_agent"])]
        kind: Option<String>,
        /// Findings routed to this agent through its interests.
        #[clap(long, conflicts_with = "tags")]
        for_agent: Option<String>,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct TaskCli {
    #[clap(subcommand)]
    pub command: TaskCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum TaskCommand {
    /// Queue a task
    Add {
        description: String,
        #[clap(long, default_value_t = 0, allow_negative_numbers = true)]
        priority: i64,
    },
    /// Claim the highest-priority pending task
    Pop {
        #[clap(long)]
        agent: String,
    },
    /// Mark a claimed task done
    Done { id: u64 },
    /// List tasks in queue order
    List {
        /// pending, claimed or done
        #[clap(long)]
        status: Option<String>,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct BoardCli {
    #[clap(subcommand)]
    pub command: BoardCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum BoardCommand {
    /// Diff board.json against board.db (read-only)
    Validate,
    /// Replay the event log and repair both representations
    Recover,
    /// Snapshot derived state at the current end of the log
    Checkpoint,
    /// Clear all agents, findings, claims and tasks (journaled)
    Reset {
        #[clap(long)]
        yes: bool,
    },
    /// Print event log records
    Log {
        #[clap(long, default_value_t = 0)]
        from: u64,
        #[clap(long)]
        limit: Option<usize>,
    },
}

struct Output {
    json: bool,
}

impl Output {
    fn emit(&self, cmd: &str, status: &str, body: JsonValue, text: String) -> anyhow::Result<()> {
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&command_envelope(cmd, status, body))?
            );
        } else if !text.is_empty() {
            println!("{}", text);
        }
        Ok(())
    }
}

fn open_board(dir: Option<PathBuf>) -> anyhow::Result<Board> {
    let config = match dir {
        Some(d) => BoardConfig::load(&d)?,
        None => BoardConfig::from_env()?,
    };
    let root = config.root.clone();
    Board::open(config).with_context(|| format!("opening board at {}", root.display()))
}

fn chain_line(c: &ClaimChain) -> String {
    let files: Vec<&str> = c.files.iter().map(String::as_str).collect();
    format!(
        "{}  {:<8}  {}  until {}  [{}]",
        c.chain_id,
        c.status,
        c.agent_id,
        format_ts(&c.expires_at),
        files.join(", ")
    )
}

fn lines<T>(items: &[T], f: impl Fn(&T) -> String) -> String {
    items.iter().map(f).collect::<Vec<_>>().join("\n")
}

fn render_report(report: &ConsistencyReport) -> String {
    use colored::Colorize;

    if report.consistent {
        return format!(
            "{} board.json and board.db agree at sequence {}",
            "✓".bright_green().bold(),
            report.index_sequence
        );
    }
    let mut out = vec![format!(
        "{} {} divergence(s): board.json at sequence {}, board.db at sequence {}",
        "✗".bright_red().bold(),
        report.divergences.len(),
        report.document_sequence,
        report.index_sequence
    )];
    for d in &report.divergences {
        out.push(format!(
            "  {} {}.{}.{}  document={}  index={}",
            "▸".bright_yellow(),
            d.entity,
            d.id,
            d.field.bright_cyan(),
            d.document,
            d.index
        ));
    }
    out.join("\n")
}

pub(crate) fn run_cli(cli: Cli) -> anyhow::Result<ExitCode> {
    let out = Output {
        json: match cli.format.as_str() {
            "json" => true,
            "text" => false,
            other => anyhow::bail!("unknown output format '{}': use 'text' or 'json'", other),
        },
    };

    if let Command::Capabilities = cli.command {
        println!("{}", serde_json::to_string_pretty(&subsystems::capabilities())?);
        return Ok(ExitCode::SUCCESS);
    }

    let board = open_board(cli.dir)?;
    match cli.command {
        Command::Capabilities => {}
        Command::Agent(agent_cli) => run_agent(&board, &out, agent_cli.command)?,
        Command::Claim(claim_cli) => return run_claim(&board, &out, claim_cli.command),
        Command::Finding(finding_cli) => run_finding(&board, &out, finding_cli.command)?,
        Command::Task(task_cli) => run_task(&board, &out, task_cli.command)?,
        Command::Board(board_cli) => return run_board(&board, &out, board_cli.command),
    }
    Ok(ExitCode::SUCCESS)
}

fn run_agent(board: &Board, out: &Output, cmd: AgentCommand) -> anyhow::Result<()> {
    match cmd {
        AgentCommand::Register {
            agent,
            task,
            interests,
        } => {
            let a = findings::register_agent(board, &agent, &task, &interests)?;
            out.emit("agent.register", "ok", json!({ "agent": a }), format!("registered {}", a.id))
        }
        AgentCommand::Status { agent, status } => {
            let status: AgentStatus = status.parse()?;
            let a = findings::update_agent_status(board, &agent, status)?;
            out.emit(
                "agent.status",
                "ok",
                json!({ "agent": a }),
                format!("{} is {}", a.id, a.status),
            )
        }
        AgentCommand::List { active } => {
            let agents = if active {
                findings::get_active_agents(board)?
            } else {
                findings::list_agents(board)?
            };
            let text = lines(&agents, |a| {
                let interests: Vec<&str> = a.interests.iter().map(String::as_str).collect();
                format!("{}  {:<9}  {}  [{}]", a.id, a.status, a.task, interests.join(", "))
            });
            out.emit("agent.list", "ok", json!({ "agents": agents }), text)
        }
    }
}

fn run_claim(board: &Board, out: &Output, cmd: ClaimCommand) -> anyhow::Result<ExitCode> {
    match cmd {
        ClaimCommand::Acquire {
            agent,
            files,
            reason,
            ttl_secs,
        } => {
            let ttl = ttl_secs.map(Duration::from_secs);
            match claims::claim(board, &agent, &files, &reason, ttl) {
                Ok(chain) => {
                    let text = chain_line(&chain);
                    out.emit("claim.acquire", "ok", json!({ "chain": chain }), text)?;
                }
                Err(BoardError::Conflict(conflict)) => {
                    if out.json {
                        out.emit("claim.acquire", "conflict", json!({ "conflict": conflict }), String::new())?;
                    } else {
                        eprintln!("{}", conflict);
                    }
                    return Ok(ExitCode::from(EXIT_CONFLICT));
                }
                Err(e) => return Err(e.into()),
            }
        }
        ClaimCommand::Release { agent, chain } => {
            let c = claims::release(board, &agent, &chain)?;
            let text = chain_line(&c);
            out.emit("claim.release", "ok", json!({ "chain": c }), text)?;
        }
        ClaimCommand::ForceRelease { chain, operator } => {
            let c = claims::force_release(board, &chain, &operator)?;
            let text = chain_line(&c);
            out.emit("claim.force_release", "ok", json!({ "chain": c }), text)?;
        }
        ClaimCommand::Show { chain, file } => {
            let found = match (chain, file) {
                (Some(id), _) => claims::get_chain(board, &id)?,
                (None, Some(path)) => claims::claims_for_file(board, &path)?,
                (None, None) => None,
            };
            let text = found
                .as_ref()
                .map(chain_line)
                .unwrap_or_else(|| "no claim".to_string());
            out.emit("claim.show", "ok", json!({ "chain": found }), text)?;
        }
        ClaimCommand::List { status } => {
            let status = status.map(|s| s.parse::<ChainStatus>()).transpose()?;
            let chains = claims::list_claims(board, status)?;
            let text = lines(&chains, chain_line);
            out.emit("claim.list", "ok", json!({ "chains": chains }), text)?;
        }
        ClaimCommand::Sweep => {
            let expired = claims::sweep_expired(board)?;
            let text = format!("expired {} chain(s)", expired.len());
            out.emit("claim.sweep", "ok", json!({ "expired": expired }), text)?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_finding(board: &Board, out: &Output, cmd: FindingCommand) -> anyhow::Result<()> {
    match cmd {
        FindingCommand::Add {
            agent,
            kind,
            content,
            tags,
        } => {
            let kind: FindingKind = kind.parse()?;
            let f = findings::add_finding(board, &agent, kind, &content, &tags)?;
            let text = format!("finding {} posted", f.id);
            out.emit("finding.add", "ok", json!({ "finding": f }), text)
        }
        FindingCommand::List {
            tags,
            kind,
            for_agent,
        } => {
            let list = match (kind, for_agent) {
                (Some(k), _) => findings::findings_by_kind(board, k.parse::<FindingKind>()?)?,
                (None, Some(agent)) => findings::findings_for_agent(board, &agent)?,
                (None, None) => findings::get_findings(board, &tags)?,
            };
            let text = lines(&list, |f| {
                let tags: Vec<&str> = f.tags.iter().map(String::as_str).collect();
                format!(
                    "#{}  {}  {:<10}  {}  [{}]  {}",
                    f.id,
                    format_ts(&f.created_at),
                    f.kind,
                    f.agent_id,
                    tags.join(", "),
                    f.content
                )
            });
            out.emit("finding.list", "ok", json!({ "findings": list }), text)
        }
    }
}

fn run_task(board: &Board, out: &Output, cmd: TaskCommand) -> anyhow::Result<()> {
    match cmd {
        TaskCommand::Add {
            description,
            priority,
        } => {
            let t = tasks::add_task(board, &description, priority)?;
            let text = format!("task {} queued at priority {}", t.id, t.priority);
            out.emit("task.add", "ok", json!({ "task": t }), text)
        }
        TaskCommand::Pop { agent } => {
            let t = tasks::pop_highest_priority_task(board, &agent)?;
            let text = match &t {
                Some(t) => format!("task {} (priority {}): {}", t.id, t.priority, t.description),
                None => "queue is empty".to_string(),
            };
            out.emit("task.pop", "ok", json!({ "task": t }), text)
        }
        TaskCommand::Done { id } => {
            let t = tasks::complete_task(board, id)?;
            out.emit("task.done", "ok", json!({ "task": t }), format!("task {} done", t.id))
        }
        TaskCommand::List { status } => {
            let status = status.map(|s| s.parse::<TaskStatus>()).transpose()?;
            let list = tasks::list_tasks(board, status)?;
            let text = lines(&list, |t| {
                format!(
                    "{}  p{}  {:<8}  {}  {}",
                    t.id,
                    t.priority,
                    t.status,
                    t.claimed_by.as_deref().unwrap_or("-"),
                    t.description
                )
            });
            out.emit("task.list", "ok", json!({ "tasks": list }), text)
        }
    }
}

fn run_board(board: &Board, out: &Output, cmd: BoardCommand) -> anyhow::Result<ExitCode> {
    match cmd {
        BoardCommand::Validate => {
            let report = board.validate_state_consistency()?;
            let status = if report.consistent { "ok" } else { "diverged" };
            let text = render_report(&report);
            out.emit("board.validate", status, json!({ "report": report }), text)?;
            if !report.consistent {
                return Ok(ExitCode::from(EXIT_DIVERGED));
            }
        }
        BoardCommand::Recover => {
            let report = board.recover()?;
            let text = format!(
                "recovered to sequence {} ({} events replayed, {} chains expired)",
                report.last_sequence,
                report.events_replayed,
                report.expired_chains.len()
            );
            out.emit("board.recover", "ok", json!({ "report": report }), text)?;
        }
        BoardCommand::Checkpoint => {
            let info = board.checkpoint()?;
            let text = format!("checkpoint at sequence {}", info.sequence);
            out.emit("board.checkpoint", "ok", json!({ "checkpoint": info }), text)?;
        }
        BoardCommand::Reset { yes } => {
            if !yes {
                anyhow::bail!("refusing to reset without --yes");
            }
            let record = board.reset()?;
            let text = format!("board reset at sequence {}", record.sequence);
            out.emit("board.reset", "ok", json!({ "sequence": record.sequence }), text)?;
        }
        BoardCommand::Log { from, limit } => {
            let mut records = Vec::new();
            for record in board.log().read_from(from)?.take(limit.unwrap_or(usize::MAX)) {
                records.push(record?);
            }
            if out.json {
                out.emit("board.log", "ok", json!({ "events": records }), String::new())?;
            } else {
                for r in &records {
                    println!("{}", serde_json::to_string(r)?);
                }
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}
