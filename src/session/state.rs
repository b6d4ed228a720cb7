use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use tokio::{task::JoinHandle, time::Instant};

use crate::models::{CloseReason, SessionClose, SessionRecord, SessionSnapshot, SessionType};

/// The armed one-shot timeout of a running session.
#[derive(Debug)]
struct ArmedTimer {
    generation: u64,
    deadline: Instant,
    handle: Option<JoinHandle<()>>,
}

/// In-memory mirror of the `in_progress` log row plus pause accounting.
///
/// Active time is derived from the row's wall-clock `start_time` minus the
/// accumulated pause spans, never accumulated tick by tick, so polling it does
/// not drift. Only the timeout deadline uses the monotonic clock.
#[derive(Debug)]
pub struct ActiveSession {
    record: SessionRecord,
    paused_since: Option<DateTime<FixedOffset>>,
    total_paused: Duration,
    budget: Option<Duration>,
    timer_generation: u64,
    timer: Option<ArmedTimer>,
}

/// Non-negative span between two wall-clock readings.
fn span(from: &DateTime<FixedOffset>, to: &DateTime<FixedOffset>) -> Duration {
    (*to - *from).to_std().unwrap_or(Duration::ZERO)
}

impl ActiveSession {
    /// Wraps an `in_progress` row, fresh or read back from the log. Elapsed
    /// time counts from the row's `start_time`; a start in the future reads
    /// as zero.
    pub fn new(record: SessionRecord, budget: Option<Duration>) -> Self {
        Self {
            record,
            paused_since: None,
            total_paused: Duration::ZERO,
            budget,
            timer_generation: 0,
            timer: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn record(&self) -> &SessionRecord {
        &self.record
    }

    pub fn session_type(&self) -> SessionType {
        self.record.session_type
    }

    pub fn budget(&self) -> Option<Duration> {
        self.budget
    }

    pub fn is_paused(&self) -> bool {
        self.paused_since.is_some()
    }

    /// Running -> Paused. Returns `false` if already paused.
    pub fn pause(&mut self, now: DateTime<FixedOffset>) -> bool {
        if self.is_paused() {
            return false;
        }
        self.paused_since = Some(now);
        true
    }

    /// Paused -> Running. Returns `false` if not paused.
    pub fn resume(&mut self, now: DateTime<FixedOffset>) -> bool {
        let Some(since) = self.paused_since.take() else {
            return false;
        };
        self.total_paused += span(&since, &now);
        true
    }

    /// Pause time including the in-progress pause span, if any.
    pub fn paused_duration(&self, now: DateTime<FixedOffset>) -> Duration {
        let current = self
            .paused_since
            .map(|since| span(&since, &now))
            .unwrap_or(Duration::ZERO);
        self.total_paused + current
    }

    /// Wall-clock elapsed minus all paused intervals, clamped at zero.
    pub fn active_duration(&self, now: DateTime<FixedOffset>) -> Duration {
        span(&self.record.start_time, &now).saturating_sub(self.paused_duration(now))
    }

    /// Next generation for a timer about to be armed. Any callback carrying an
    /// older generation is stale.
    pub fn arm(&mut self, now: Instant, delay: Duration) -> u64 {
        self.timer_generation += 1;
        self.timer = Some(ArmedTimer {
            generation: self.timer_generation,
            deadline: now + delay,
            handle: None,
        });
        self.timer_generation
    }

    pub fn attach_timer(&mut self, generation: u64, handle: JoinHandle<()>) {
        match self.timer.as_mut() {
            Some(timer) if timer.generation == generation => timer.handle = Some(handle),
            _ => handle.abort(),
        }
    }

    /// Forgets the armed timer and returns its task handle so the caller can
    /// abort it (or drop it when called from the timer task itself).
    pub fn disarm(&mut self) -> Option<JoinHandle<()>> {
        self.timer.take().and_then(|timer| timer.handle)
    }

    pub fn current_generation(&self) -> u64 {
        self.timer_generation
    }

    pub fn is_armed(&self) -> bool {
        self.timer.is_some()
    }

    /// Whether a firing timer tagged `(session_id, generation)` is the one
    /// currently armed for this running session.
    pub fn owns_timer(&self, session_id: &str, generation: u64) -> bool {
        self.record.id == session_id
            && !self.is_paused()
            && self
                .timer
                .as_ref()
                .is_some_and(|timer| timer.generation == generation)
    }

    pub fn timeout_remaining(&self, now: Instant) -> Option<Duration> {
        if self.is_paused() {
            return None;
        }
        self.timer
            .as_ref()
            .map(|timer| timer.deadline.saturating_duration_since(now))
    }

    pub fn close_values(&self, end_time: DateTime<FixedOffset>, reason: CloseReason) -> SessionClose {
        SessionClose {
            end_time,
            duration_minutes: self.active_duration(end_time).as_secs_f64() / 60.0,
            auto_closed: reason.auto_closed(),
        }
    }

    pub fn snapshot(&self, now: Instant, wall_now: DateTime<FixedOffset>) -> SessionSnapshot {
        SessionSnapshot {
            id: self.record.id.clone(),
            project: self.record.project.clone(),
            goal: self.record.goal.clone(),
            session_type: self.record.session_type,
            start_time: self.record.start_time,
            elapsed_secs: self.active_duration(wall_now).as_secs(),
            paused: self.is_paused(),
            timeout_remaining_secs: self.timeout_remaining(now).map(|d| d.as_secs()),
        }
    }
}
