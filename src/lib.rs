pub mod cli;
pub mod db;
pub mod models;
pub mod presence;
pub mod session;
pub mod settings;
pub mod utils;
pub mod verticals;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};

use db::{DataDirLock, SessionLog};
use presence::{PresenceController, PresenceProbe};
use session::{ManagerConfig, SessionManager};
use settings::{debug_enabled, DataPaths, SettingsStore};
use verticals::VerticalsStore;

/// Owns the session manager and the optional presence loop for one process.
pub struct App {
    settings: SettingsStore,
    manager: SessionManager,
    presence: PresenceController,
    // Declared last so it is released after the log worker has shut down.
    lock: Option<DataDirLock>,
}

impl App {
    /// Opens the data directory for writing. Fails if another process holds
    /// it, so only one process ever owns the session log.
    pub fn open(paths: &DataPaths) -> Result<Self> {
        let lock = DataDirLock::acquire(&paths.lock_file())?;
        let app = Self::build(paths, Some(lock))?;
        app.settings.write_defaults_if_missing()?;
        Ok(app)
    }

    /// Opens the data directory for reads only (history, listing) without
    /// taking the lock. Must not be used to start or close sessions.
    pub fn open_read_only(paths: &DataPaths) -> Result<Self> {
        Self::build(paths, None)
    }

    fn build(paths: &DataPaths, lock: Option<DataDirLock>) -> Result<Self> {
        let settings = SettingsStore::new(paths.settings_json())?;
        let current = settings.get();

        let log = SessionLog::open(paths.sessions_csv(), current.offset()?)?;
        let verticals = Arc::new(VerticalsStore::load(paths.verticals_json())?);
        let manager = SessionManager::new(log, verticals, ManagerConfig::from(&current));

        Ok(Self {
            settings,
            manager,
            presence: PresenceController::new(),
            lock,
        })
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// Starts screen-lock polling. Must be called from inside a runtime.
    pub fn start_presence(&mut self, probe: Arc<dyn PresenceProbe>) -> Result<()> {
        let interval = self.settings.get().presence_poll_interval();
        self.presence.start(self.manager.clone(), probe, interval)
    }

    /// Stops presence polling, then closes any active session as a shutdown.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.presence.stop().await?;
        self.manager.shutdown().await?;
        Ok(())
    }
}

pub fn run() {
    utils::logging::init_logger(debug_enabled());
    let cli = cli::Cli::parse();

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("logon")
        .build()
        .context("failed to build async runtime")
        .and_then(|runtime| runtime.block_on(cli::dispatch(cli)));

    match result {
        Ok(()) => info!("logon exiting"),
        Err(err) => {
            error!("{err:#}");
            std::process::exit(1);
        }
    }
}
