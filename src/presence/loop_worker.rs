use std::sync::Arc;

use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::session::SessionManager;

use super::probe::PresenceProbe;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceEvent {
    Locked,
    Unlocked,
}

/// Turns lock samples into edges. Starts out "unlocked", so only a real
/// unlock after a lock produces [`PresenceEvent::Unlocked`].
#[derive(Debug, Default)]
pub struct EdgeDetector {
    last_locked: bool,
}

impl EdgeDetector {
    pub fn observe(&mut self, locked: bool) -> Option<PresenceEvent> {
        let event = match (self.last_locked, locked) {
            (false, true) => Some(PresenceEvent::Locked),
            (true, false) => Some(PresenceEvent::Unlocked),
            _ => None,
        };
        self.last_locked = locked;
        event
    }
}

pub async fn presence_loop(
    manager: SessionManager,
    probe: Arc<dyn PresenceProbe>,
    poll_interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut edges = EdgeDetector::default();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let locked = match probe.is_locked().await {
                    Ok(locked) => locked,
                    Err(err) => {
                        log_warn!("presence check failed: {err:#}");
                        continue;
                    }
                };

                let result = match edges.observe(locked) {
                    Some(PresenceEvent::Locked) => {
                        log_info!("screen locked");
                        manager.on_screen_locked().await
                    }
                    Some(PresenceEvent::Unlocked) => {
                        log_info!("screen unlocked");
                        manager.on_screen_unlocked().await
                    }
                    None => continue,
                };

                if let Err(err) = result {
                    log_error!("presence transition failed: {err:#}");
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("presence loop shutting down");
                break;
            }
        }
    }
}
