use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::info;
use tokio::{task::JoinHandle, time::Duration};
use tokio_util::sync::CancellationToken;

use crate::session::SessionManager;

use super::{loop_worker::presence_loop, probe::PresenceProbe};

/// Owns the background presence polling task.
#[derive(Default)]
pub struct PresenceController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl PresenceController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn start(
        &mut self,
        manager: SessionManager,
        probe: Arc<dyn PresenceProbe>,
        poll_interval: Duration,
    ) -> Result<()> {
        if self.handle.is_some() {
            bail!("presence monitoring already active");
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(presence_loop(
            manager,
            probe,
            poll_interval,
            cancel_token.clone(),
        ));

        info!("Presence monitoring started (every {:?})", poll_interval);
        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("presence loop task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}
