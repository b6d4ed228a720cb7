use anyhow::{anyhow, Result};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    /// User-initiated; carries a timeout.
    Manual,
    /// System-initiated (presence); never times out.
    Auto,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Manual => "manual",
            SessionType::Auto => "auto",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value.trim() {
            "manual" => Ok(SessionType::Manual),
            "auto" => Ok(SessionType::Auto),
            other => Err(anyhow!("unknown session type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value.trim() {
            "in_progress" => Ok(SessionStatus::InProgress),
            "closed" => Ok(SessionStatus::Closed),
            other => Err(anyhow!("unknown session status '{other}'")),
        }
    }
}

/// Why a session ended. Only [`CloseReason::Timeout`] marks a row auto-closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ManualStop,
    Timeout,
    Shutdown,
    ScreenLocked,
    Recovered,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::ManualStop => "manual stop",
            CloseReason::Timeout => "timeout",
            CloseReason::Shutdown => "system shutdown",
            CloseReason::ScreenLocked => "screen locked",
            CloseReason::Recovered => "crash recovery",
        }
    }

    pub fn auto_closed(&self) -> bool {
        matches!(self, CloseReason::Timeout)
    }
}

/// One row of the durable session log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub start_time: DateTime<FixedOffset>,
    pub end_time: Option<DateTime<FixedOffset>>,
    pub duration_minutes: f64,
    pub project: String,
    pub goal: String,
    pub session_type: SessionType,
    pub status: SessionStatus,
    pub auto_closed: bool,
}

impl SessionRecord {
    pub fn open(
        id: String,
        start_time: DateTime<FixedOffset>,
        project: String,
        goal: String,
        session_type: SessionType,
    ) -> Self {
        Self {
            id,
            start_time,
            end_time: None,
            duration_minutes: 0.0,
            project,
            goal,
            session_type,
            status: SessionStatus::InProgress,
            auto_closed: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == SessionStatus::InProgress
    }
}

/// Field values written when a session row is closed.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionClose {
    pub end_time: DateTime<FixedOffset>,
    pub duration_minutes: f64,
    pub auto_closed: bool,
}

/// Read-only view of the active session, safe to poll.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: String,
    pub project: String,
    pub goal: String,
    pub session_type: SessionType,
    pub start_time: DateTime<FixedOffset>,
    pub elapsed_secs: u64,
    pub paused: bool,
    pub timeout_remaining_secs: Option<u64>,
}
