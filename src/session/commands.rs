use anyhow::{bail, Result};

use crate::models::{SessionRecord, SessionSnapshot};

use super::SessionManager;

const DEFAULT_HISTORY_LIMIT: usize = 100;

/// One line typed into the control loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start { project: String, goal: String },
    Pause,
    Resume,
    Stop,
    Status,
    Verticals,
    AddVertical(String),
    History(usize),
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  start <project> <goal...>   start a manual session (quote multi-word projects)
  pause | resume | stop       control the active session
  status                      show the active session
  verticals                   list projects
  add-vertical <name>         register a project
  history [n]                 show the latest sessions
  quit                        stop any session and exit";

/// Parses a control-loop line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "start" => {
            let (project, goal) = split_project(rest)?;
            Command::Start { project, goal }
        }
        "pause" => Command::Pause,
        "resume" => Command::Resume,
        "stop" => Command::Stop,
        "status" => Command::Status,
        "verticals" | "projects" => Command::Verticals,
        "add-vertical" => {
            if rest.is_empty() {
                bail!("usage: add-vertical <name>");
            }
            Command::AddVertical(rest.to_string())
        }
        "history" => {
            let limit = if rest.is_empty() {
                DEFAULT_HISTORY_LIMIT
            } else {
                rest.parse()
                    .map_err(|_| anyhow::anyhow!("history limit must be a number"))?
            };
            Command::History(limit)
        }
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => bail!("unknown command '{other}' (try 'help')"),
    };
    Ok(Some(command))
}

fn split_project(rest: &str) -> Result<(String, String)> {
    let (project, goal) = if let Some(quoted) = rest.strip_prefix('"') {
        match quoted.split_once('"') {
            Some((project, goal)) => (project, goal),
            None => bail!("unterminated quote in project name"),
        }
    } else {
        rest.split_once(char::is_whitespace).unwrap_or((rest, ""))
    };

    let (project, goal) = (project.trim(), goal.trim());
    if project.is_empty() || goal.is_empty() {
        bail!("usage: start <project> <goal...>");
    }
    Ok((project.to_string(), goal.to_string()))
}

/// Runs a parsed command and renders its outcome for the terminal.
pub async fn execute(manager: &SessionManager, command: Command) -> Result<String> {
    let output = match command {
        Command::Start { project, goal } => {
            if manager.start(&project, &goal).await? {
                let status = manager.status().await;
                match status {
                    Some(status) => format!("started {}", render_status(&status)),
                    None => "started".to_string(),
                }
            } else {
                "not started: a session is already active, or the project/goal is invalid"
                    .to_string()
            }
        }
        Command::Pause => outcome(manager.pause().await, "paused", "nothing running to pause"),
        Command::Resume => outcome(manager.resume().await, "resumed", "nothing paused to resume"),
        Command::Stop => outcome(manager.stop().await?, "stopped", "no active session"),
        Command::Status => match manager.status().await {
            Some(status) => render_status(&status),
            None => "idle".to_string(),
        },
        Command::Verticals => manager.verticals().list().join("\n"),
        Command::AddVertical(name) => outcome(
            manager.verticals().add(&name)?,
            "added",
            "already registered",
        ),
        Command::History(limit) => {
            let rows = manager.history(limit).await?;
            if rows.is_empty() {
                "no sessions recorded".to_string()
            } else {
                rows.iter().map(render_record).collect::<Vec<_>>().join("\n")
            }
        }
        Command::Help => HELP.to_string(),
        Command::Quit => "bye".to_string(),
    };
    Ok(output)
}

fn outcome(ok: bool, yes: &str, no: &str) -> String {
    let text = if ok { yes } else { no };
    text.to_string()
}

pub fn format_clock(total_secs: u64) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        total_secs / 3600,
        (total_secs % 3600) / 60,
        total_secs % 60
    )
}

pub fn render_status(status: &SessionSnapshot) -> String {
    let state = if status.paused { "paused" } else { "running" };
    let timeout = status
        .timeout_remaining_secs
        .map(|secs| format!(", times out in {}", format_clock(secs)))
        .unwrap_or_default();
    format!(
        "[{}] {} | {} | {} {}{}",
        status.session_type.as_str(),
        status.project,
        status.goal,
        format_clock(status.elapsed_secs),
        state,
        timeout
    )
}

pub fn render_record(record: &SessionRecord) -> String {
    let end = record
        .end_time
        .map(|end| end.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string());
    format!(
        "{} {}-{} {:>7.2}m {:<11} {} | {}{}",
        record.start_time.format("%Y-%m-%d"),
        record.start_time.format("%H:%M:%S"),
        end,
        record.duration_minutes,
        record.status.as_str(),
        record.project,
        record.goal,
        if record.auto_closed { " (timed out)" } else { "" }
    )
}
