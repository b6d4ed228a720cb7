use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use anyhow::Result;
use chrono::{DateTime, FixedOffset};
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::{sync::Mutex, time::Instant};
use uuid::Uuid;

use crate::{
    db::SessionLog,
    models::{CloseReason, SessionClose, SessionRecord, SessionSnapshot, SessionType},
    settings::{RecoveryPolicy, Settings},
    verticals::VerticalsStore,
};

use super::{
    clock::{Clock, SystemClock},
    state::ActiveSession,
};

/// Delay before a timeout whose close could not be persisted is retried.
const TIMEOUT_RETRY_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub manual_timeout: Duration,
    pub strict_verticals: bool,
    pub recovery: RecoveryPolicy,
    /// Project and goal used for sessions started by the presence source.
    pub auto_project: String,
    pub auto_goal: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for ManagerConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            manual_timeout: settings.manual_timeout(),
            strict_verticals: settings.strict_verticals,
            recovery: settings.recovery,
            auto_project: settings.presence.auto_project.clone(),
            auto_goal: settings.presence.auto_goal.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryReport {
    pub closed: Vec<String>,
    pub resumed: Option<String>,
    /// Open rows that could not be parsed and were left in the log as-is.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unreadable: Vec<String>,
}

#[derive(Debug, Default)]
struct ManagerState {
    active: Option<ActiveSession>,
    shut_down: bool,
}

struct ManagerInner {
    state: Mutex<ManagerState>,
    log: SessionLog,
    verticals: Arc<VerticalsStore>,
    config: ManagerConfig,
    clock: Arc<dyn Clock>,
}

/// Single-active-session lifecycle manager.
///
/// Every operation, including timeout callbacks, runs under one mutex, and
/// each transition that changes a row is written to the session log before
/// the in-memory state changes. A failed write leaves the state untouched.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

impl SessionManager {
    pub fn new(log: SessionLog, verticals: Arc<VerticalsStore>, config: ManagerConfig) -> Self {
        Self::with_clock(log, verticals, config, Arc::new(SystemClock))
    }

    /// Session timestamps and active time are read from `clock`; the timeout
    /// timer always runs on tokio's monotonic clock.
    pub fn with_clock(
        log: SessionLog,
        verticals: Arc<VerticalsStore>,
        config: ManagerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                state: Mutex::new(ManagerState::default()),
                log,
                verticals,
                config,
                clock,
            }),
        }
    }

    pub fn log(&self) -> &SessionLog {
        &self.inner.log
    }

    pub fn verticals(&self) -> &VerticalsStore {
        &self.inner.verticals
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Starts a manual session with the configured timeout.
    pub async fn start(&self, project: &str, goal: &str) -> Result<bool> {
        self.inner
            .start_session(project, goal, SessionType::Manual)
            .await
    }

    /// Starts a system-initiated session. Auto sessions never time out.
    pub async fn start_auto(&self, project: &str, goal: &str) -> Result<bool> {
        self.inner
            .start_session(project, goal, SessionType::Auto)
            .await
    }

    pub async fn pause(&self) -> bool {
        let mut state = self.inner.state.lock().await;
        let Some(session) = state.active.as_mut() else {
            return false;
        };
        if !session.pause(self.inner.wall_now()) {
            return false;
        }
        if let Some(handle) = session.disarm() {
            handle.abort();
        }
        info!("Paused session {}", session.id());
        true
    }

    pub async fn resume(&self) -> bool {
        let mut state = self.inner.state.lock().await;
        let Some(session) = state.active.as_mut() else {
            return false;
        };
        if !session.resume(self.inner.wall_now()) {
            return false;
        }
        // The timeout restarts with its full budget.
        if let Some(budget) = session.budget() {
            self.inner.arm_timer(session, budget);
        }
        info!("Resumed session {}", session.id());
        true
    }

    pub async fn stop(&self) -> Result<bool> {
        let mut state = self.inner.state.lock().await;
        self.inner
            .close_locked(&mut state, CloseReason::ManualStop)
            .await
    }

    /// Stops the active session only if it is an auto session.
    pub async fn stop_auto(&self) -> Result<bool> {
        let mut state = self.inner.state.lock().await;
        let is_auto = state
            .active
            .as_ref()
            .is_some_and(|session| session.session_type() == SessionType::Auto);
        if !is_auto {
            return Ok(false);
        }
        self.inner
            .close_locked(&mut state, CloseReason::ScreenLocked)
            .await
    }

    /// Presence callback: the screen locked. Ends an auto session; manual
    /// sessions are left to their own timeout.
    pub async fn on_screen_locked(&self) -> Result<bool> {
        let stopped = self.stop_auto().await?;
        if stopped {
            info!("Screen locked; auto session stopped");
        }
        Ok(stopped)
    }

    /// Presence callback: the screen unlocked. Starts an auto session when
    /// nothing is being tracked.
    pub async fn on_screen_unlocked(&self) -> Result<bool> {
        if self.is_active().await {
            return Ok(false);
        }
        let config = &self.inner.config;
        self.start_auto(&config.auto_project, &config.auto_goal).await
    }

    pub async fn status(&self) -> Option<SessionSnapshot> {
        let state = self.inner.state.lock().await;
        state
            .active
            .as_ref()
            .map(|session| session.snapshot(Instant::now(), self.inner.wall_now()))
    }

    pub async fn is_active(&self) -> bool {
        self.inner.state.lock().await.active.is_some()
    }

    /// Closes any active session as a system shutdown and refuses further
    /// starts. Safe to call more than once.
    pub async fn shutdown(&self) -> Result<bool> {
        let mut state = self.inner.state.lock().await;
        state.shut_down = true;
        let closed = self
            .inner
            .close_locked(&mut state, CloseReason::Shutdown)
            .await?;
        info!("Session manager shut down");
        Ok(closed)
    }

    /// Reconciles `in_progress` rows left by a previous process. Meant to run
    /// once, before any other operation.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        self.inner.recover().await
    }

    pub async fn history(&self, limit: usize) -> Result<Vec<SessionRecord>> {
        self.inner.log.history(limit).await
    }

    #[cfg(test)]
    pub(crate) async fn fire_timeout(&self, session_id: &str, generation: u64) -> Result<bool> {
        self.inner.handle_timeout(session_id, generation).await
    }

    #[cfg(test)]
    pub(crate) async fn armed_generation(&self) -> Option<u64> {
        let state = self.inner.state.lock().await;
        state.active.as_ref().map(|s| s.current_generation())
    }
}

impl ManagerInner {
    fn wall_now(&self) -> DateTime<FixedOffset> {
        self.clock.now().with_timezone(self.log.offset())
    }

    fn validate(&self, project: &str, goal: &str) -> bool {
        if project.is_empty() || goal.is_empty() {
            warn!("Rejected start: project and goal must be non-empty");
            return false;
        }
        if self.config.strict_verticals && !self.verticals.contains(project) {
            warn!("Rejected start: '{project}' is not a registered vertical");
            return false;
        }
        true
    }

    async fn start_session(
        self: &Arc<Self>,
        project: &str,
        goal: &str,
        session_type: SessionType,
    ) -> Result<bool> {
        let (project, goal) = (project.trim(), goal.trim());
        if !self.validate(project, goal) {
            return Ok(false);
        }

        let mut state = self.state.lock().await;
        if state.shut_down {
            warn!("Rejected start: session manager is shut down");
            return Ok(false);
        }
        if let Some(active) = state.active.as_ref() {
            debug!("Rejected start: session {} already active", active.id());
            return Ok(false);
        }

        let record = SessionRecord::open(
            Uuid::new_v4().to_string(),
            self.wall_now(),
            project.to_string(),
            goal.to_string(),
            session_type,
        );
        self.log.insert_session(&record).await?;

        let budget = match session_type {
            SessionType::Manual => Some(self.config.manual_timeout),
            SessionType::Auto => None,
        };
        info!(
            "Started {} session {} for '{}'",
            session_type.as_str(),
            record.id,
            record.project
        );
        let mut session = ActiveSession::new(record, budget);
        if let Some(budget) = budget {
            self.arm_timer(&mut session, budget);
        }
        state.active = Some(session);
        Ok(true)
    }

    /// Persists the close of the active session, then drops it from memory.
    async fn close_locked(&self, state: &mut ManagerState, reason: CloseReason) -> Result<bool> {
        let Some(session) = state.active.as_ref() else {
            return Ok(false);
        };

        let close = session.close_values(self.wall_now(), reason);
        let minutes = close.duration_minutes;
        let found = self.log.close_session(session.id(), close).await?;
        if !found {
            warn!(
                "Session {} had no row in the session log; dropping it anyway",
                session.id()
            );
        }

        if let Some(mut session) = state.active.take() {
            if let Some(handle) = session.disarm() {
                handle.abort();
            }
            info!(
                "Closed session {} ({}, {:.2} active minutes)",
                session.id(),
                reason.as_str(),
                minutes
            );
        }
        Ok(true)
    }

    async fn handle_timeout(self: &Arc<Self>, session_id: &str, generation: u64) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.active.as_mut() {
            Some(session) if session.owns_timer(session_id, generation) => {
                // Dropped rather than aborted: this task is the timer.
                drop(session.disarm());
            }
            _ => {
                debug!("Ignoring stale timeout for session {session_id} (generation {generation})");
                return Ok(false);
            }
        }

        match self.close_locked(&mut state, CloseReason::Timeout).await {
            Ok(closed) => Ok(closed),
            Err(err) => {
                error!("Failed to auto-close session {session_id}: {err:#}; retrying");
                if let Some(session) = state.active.as_mut() {
                    self.arm_timer(session, TIMEOUT_RETRY_DELAY);
                }
                Err(err)
            }
        }
    }

    fn arm_timer(self: &Arc<Self>, session: &mut ActiveSession, delay: Duration) {
        if let Some(previous) = session.disarm() {
            previous.abort();
        }
        let generation = session.arm(Instant::now(), delay);
        let session_id = session.id().to_string();
        let manager: Weak<Self> = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(manager) = manager.upgrade() else {
                return;
            };
            if let Err(err) = manager.handle_timeout(&session_id, generation).await {
                error!("Timeout handling failed for session {session_id}: {err:#}");
            }
        });
        session.attach_timer(generation, handle);
    }

    async fn recover(self: &Arc<Self>) -> Result<RecoveryReport> {
        let mut state = self.state.lock().await;
        let mut report = RecoveryReport::default();
        if state.active.is_some() {
            return Ok(report);
        }

        report.unreadable = self.log.unreadable_open_rows().await?;
        if !report.unreadable.is_empty() {
            warn!(
                "{} open session row(s) could not be parsed and were left in the log",
                report.unreadable.len()
            );
        }

        let mut open = self.log.incomplete_sessions().await?;
        let resume = match self.config.recovery {
            RecoveryPolicy::Resume => open.pop(),
            RecoveryPolicy::Close => None,
        };

        for row in open {
            let wall_now = self.wall_now();
            let mut elapsed = (wall_now - row.start_time)
                .to_std()
                .unwrap_or(Duration::ZERO);
            if row.session_type == SessionType::Manual {
                elapsed = elapsed.min(self.config.manual_timeout);
            }
            let close = SessionClose {
                end_time: wall_now,
                duration_minutes: elapsed.as_secs_f64() / 60.0,
                auto_closed: CloseReason::Recovered.auto_closed(),
            };
            self.log.close_session(&row.id, close).await?;
            warn!(
                "Recovered incomplete session {}; marked closed ({:.2} minutes)",
                row.id,
                elapsed.as_secs_f64() / 60.0
            );
            report.closed.push(row.id);
        }

        if let Some(row) = resume {
            let budget = match row.session_type {
                SessionType::Manual => Some(self.config.manual_timeout),
                SessionType::Auto => None,
            };
            let id = row.id.clone();
            let mut session = ActiveSession::new(row, budget);
            if let Some(budget) = budget {
                self.arm_timer(&mut session, budget);
            }
            warn!("Resumed incomplete session {id} from the session log");
            state.active = Some(session);
            report.resumed = Some(id);
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db::helpers::now_in, models::SessionStatus, session::clock::testing::TokioClock};
    use chrono::{Duration as ChronoDuration, Offset, Utc};
    use std::fs;
    use tempfile::TempDir;

    const BUDGET: Duration = Duration::from_secs(20 * 60);

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn config() -> ManagerConfig {
        ManagerConfig {
            manual_timeout: BUDGET,
            ..ManagerConfig::default()
        }
    }

    fn open_log(dir: &TempDir) -> SessionLog {
        SessionLog::open(dir.path().join("sessions.csv"), Utc.fix()).unwrap()
    }

    fn manager_on(dir: &TempDir, config: ManagerConfig, clock: Arc<TokioClock>) -> SessionManager {
        let verticals = VerticalsStore::load(dir.path().join("verticals.json")).unwrap();
        verticals.add("Proj1").unwrap();
        verticals.add("Proj2").unwrap();
        SessionManager::with_clock(open_log(dir), Arc::new(verticals), config, clock)
    }

    fn manager_with(dir: &TempDir, config: ManagerConfig) -> SessionManager {
        manager_on(dir, config, Arc::new(TokioClock::new()))
    }

    fn manager(dir: &TempDir) -> SessionManager {
        manager_with(dir, config())
    }

    async fn only_row(manager: &SessionManager) -> SessionRecord {
        let rows = manager.log().list_sessions().await.unwrap();
        assert_eq!(rows.len(), 1);
        rows.into_iter().next().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn pause_resume_stop_records_active_minutes() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);

        assert!(manager.start("Proj1", "Write docs").await.unwrap());
        tokio::time::advance(secs(5)).await;

        let status = manager.status().await.unwrap();
        assert_eq!(status.elapsed_secs, 5);
        assert!(!status.paused);
        assert_eq!(status.project, "Proj1");
        assert_eq!(status.session_type, SessionType::Manual);

        assert!(manager.pause().await);
        tokio::time::advance(secs(10)).await;
        let status = manager.status().await.unwrap();
        assert!(status.paused);
        assert_eq!(status.elapsed_secs, 5);
        assert_eq!(status.timeout_remaining_secs, None);

        assert!(manager.resume().await);
        tokio::time::advance(secs(5)).await;
        assert!(manager.stop().await.unwrap());
        assert!(manager.status().await.is_none());

        let row = only_row(&manager).await;
        assert_eq!(row.status, SessionStatus::Closed);
        assert!(row.end_time.is_some());
        assert!(!row.auto_closed);
        assert!((row.duration_minutes - 0.17).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_rejected_and_first_survives() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);

        assert!(manager.start("Proj1", "first").await.unwrap());
        let first = manager.status().await.unwrap();
        assert!(!manager.start("Proj2", "second").await.unwrap());

        let still = manager.status().await.unwrap();
        assert_eq!(still.id, first.id);
        assert_eq!(still.goal, "first");
        assert_eq!(manager.log().incomplete_sessions().await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_state_calls_return_false() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);

        assert!(!manager.pause().await);
        assert!(!manager.resume().await);
        assert!(!manager.stop().await.unwrap());

        manager.start("Proj1", "goal").await.unwrap();
        assert!(!manager.resume().await);
        assert!(manager.pause().await);
        assert!(!manager.pause().await);
    }

    #[tokio::test(start_paused = true)]
    async fn validation_rejects_before_touching_the_log() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);

        assert!(!manager.start("", "goal").await.unwrap());
        assert!(!manager.start("Proj1", "   ").await.unwrap());
        assert!(!manager.start("Unknown", "goal").await.unwrap());
        assert!(manager.log().list_sessions().await.unwrap().is_empty());

        let dir = TempDir::new().unwrap();
        let relaxed = manager_with(
            &dir,
            ManagerConfig {
                strict_verticals: false,
                ..config()
            },
        );
        assert!(relaxed.start("Unknown", "goal").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn untouched_manual_session_times_out() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        manager.start("Proj1", "long task").await.unwrap();

        tokio::time::sleep(BUDGET - secs(1)).await;
        assert!(manager.status().await.is_some());

        tokio::time::sleep(secs(2)).await;
        assert!(manager.status().await.is_none());

        let row = only_row(&manager).await;
        assert_eq!(row.status, SessionStatus::Closed);
        assert!(row.auto_closed);
        assert!((row.duration_minutes - 20.0).abs() < 0.02);
    }

    #[tokio::test(start_paused = true)]
    async fn resume_rearms_the_full_budget() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        manager.start("Proj1", "goal").await.unwrap();

        tokio::time::sleep(secs(5 * 60)).await;
        assert!(manager.pause().await);
        tokio::time::sleep(secs(30 * 60)).await;
        assert!(manager.status().await.is_some());

        assert!(manager.resume().await);
        let status = manager.status().await.unwrap();
        assert_eq!(status.timeout_remaining_secs, Some(BUDGET.as_secs()));

        // Past start + budget + pause span, but short of resume + budget.
        tokio::time::sleep(secs(19 * 60)).await;
        assert!(manager.status().await.is_some());

        tokio::time::sleep(secs(2 * 60)).await;
        assert!(manager.status().await.is_none());

        let row = only_row(&manager).await;
        assert!(row.auto_closed);
        assert!((row.duration_minutes - 25.0).abs() < 0.02);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_timer_does_not_close_a_newer_session() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);

        manager.start("Proj1", "A").await.unwrap();
        let a = manager.status().await.unwrap().id;
        let a_generation = manager.armed_generation().await.unwrap();
        manager.stop().await.unwrap();

        manager.start("Proj2", "B").await.unwrap();
        let b = manager.status().await.unwrap().id;
        assert_ne!(a, b);

        assert!(!manager.fire_timeout(&a, a_generation).await.unwrap());
        assert_eq!(manager.status().await.unwrap().id, b);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_from_before_a_pause_is_stale() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        manager.start("Proj1", "goal").await.unwrap();
        let id = manager.status().await.unwrap().id;
        let before = manager.armed_generation().await.unwrap();

        manager.pause().await;
        assert!(!manager.fire_timeout(&id, before).await.unwrap());
        manager.resume().await;
        let after = manager.armed_generation().await.unwrap();
        assert_ne!(before, after);

        assert!(!manager.fire_timeout(&id, before).await.unwrap());
        assert!(manager.status().await.is_some());
        assert!(manager.fire_timeout(&id, after).await.unwrap());
        assert!(manager.status().await.is_none());
        assert!(only_row(&manager).await.auto_closed);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_writes_leave_state_uncommitted() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        manager.start("Proj1", "goal").await.unwrap();

        let path = manager.log().path().to_path_buf();
        fs::remove_file(&path).unwrap();
        assert!(manager.stop().await.is_err());
        assert!(manager.status().await.is_some());

        let dir = TempDir::new().unwrap();
        let manager = manager_with(&dir, config());
        fs::remove_file(manager.log().path()).unwrap();
        assert!(manager.start("Proj1", "goal").await.is_err());
        assert!(manager.status().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_closes_and_refuses_new_sessions() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        manager.start("Proj1", "goal").await.unwrap();
        manager.pause().await;

        assert!(manager.shutdown().await.unwrap());
        assert!(!manager.shutdown().await.unwrap());
        assert!(!manager.start("Proj1", "again").await.unwrap());

        let row = only_row(&manager).await;
        assert_eq!(row.status, SessionStatus::Closed);
        assert!(!row.auto_closed);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_starts_admit_exactly_one() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);

        let mut tasks = Vec::new();
        for i in 0..8 {
            let manager = manager.clone();
            tasks.push(tokio::spawn(async move {
                manager.start("Proj1", &format!("goal {i}")).await.unwrap()
            }));
        }
        let mut started = 0;
        for task in tasks {
            if task.await.unwrap() {
                started += 1;
            }
        }

        assert_eq!(started, 1);
        assert_eq!(manager.log().incomplete_sessions().await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn presence_callbacks_drive_auto_sessions_only() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);

        assert!(manager.on_screen_unlocked().await.unwrap());
        let status = manager.status().await.unwrap();
        assert_eq!(status.session_type, SessionType::Auto);
        assert_eq!(status.project, "systemOn");
        assert_eq!(status.timeout_remaining_secs, None);
        assert!(!manager.on_screen_unlocked().await.unwrap());

        assert!(manager.on_screen_locked().await.unwrap());
        assert!(manager.status().await.is_none());

        manager.start("Proj1", "manual work").await.unwrap();
        assert!(!manager.on_screen_locked().await.unwrap());
        assert_eq!(
            manager.status().await.unwrap().session_type,
            SessionType::Manual
        );
    }

    async fn seed_open_row(dir: &TempDir, id: &str, minutes_ago: i64) {
        let log = open_log(dir);
        let start = now_in(log.offset()) - ChronoDuration::minutes(minutes_ago);
        let row = SessionRecord::open(
            id.into(),
            start,
            "Proj1".into(),
            "left open".into(),
            SessionType::Manual,
        );
        log.insert_session(&row).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_closes_crashed_sessions_with_capped_duration() {
        let dir = TempDir::new().unwrap();
        seed_open_row(&dir, "crashed", 45).await;

        let manager = manager(&dir);
        let report = manager.recover().await.unwrap();
        assert_eq!(report.closed, vec!["crashed".to_string()]);
        assert!(report.resumed.is_none());
        assert!(manager.status().await.is_none());

        let row = only_row(&manager).await;
        assert_eq!(row.status, SessionStatus::Closed);
        assert!(!row.auto_closed);
        assert!((row.duration_minutes - 20.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_can_resume_the_newest_open_session() {
        let dir = TempDir::new().unwrap();
        seed_open_row(&dir, "older", 90).await;
        seed_open_row(&dir, "newer", 5).await;

        let manager = manager_with(
            &dir,
            ManagerConfig {
                recovery: RecoveryPolicy::Resume,
                ..config()
            },
        );
        let report = manager.recover().await.unwrap();
        assert_eq!(report.closed, vec!["older".to_string()]);
        assert_eq!(report.resumed.as_deref(), Some("newer"));

        let status = manager.status().await.unwrap();
        assert_eq!(status.id, "newer");
        assert!((300..=302).contains(&status.elapsed_secs));

        assert!(manager.stop().await.unwrap());
        assert!(manager.log().incomplete_sessions().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn suspended_time_counts_like_the_recorded_timestamps() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(TokioClock::new());
        let manager = manager_on(&dir, config(), clock.clone());
        manager.start("Proj1", "goal").await.unwrap();

        // An hour of host sleep moves the wall clock but not tokio's timers.
        clock.jump(ChronoDuration::minutes(60));
        tokio::time::advance(secs(10 * 60)).await;
        assert!(manager.stop().await.unwrap());

        let row = only_row(&manager).await;
        let end = row.end_time.unwrap();
        let recorded = (end - row.start_time).num_seconds() as f64 / 60.0;
        assert!((row.duration_minutes - 70.0).abs() < 0.02);
        assert!((row.duration_minutes - recorded).abs() < 0.02);
        assert!(!row.auto_closed);
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_reports_open_rows_it_cannot_parse() {
        let dir = TempDir::new().unwrap();
        seed_open_row(&dir, "crashed", 10).await;
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(dir.path().join("sessions.csv"))
            .unwrap();
        std::io::Write::write_all(
            &mut file,
            b"mangled,yesterday,,,Proj1,goal,manual,in_progress,False\n",
        )
        .unwrap();
        drop(file);

        let manager = manager(&dir);
        let report = manager.recover().await.unwrap();
        assert_eq!(report.closed, vec!["crashed".to_string()]);
        assert_eq!(report.unreadable, vec!["mangled".to_string()]);

        let contents = fs::read_to_string(dir.path().join("sessions.csv")).unwrap();
        assert!(contents.contains("mangled,yesterday,,,Proj1,goal,manual,in_progress,False"));
    }
}
