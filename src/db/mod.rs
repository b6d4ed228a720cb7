use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use chrono::FixedOffset;
use log::{error, info};
use tokio::sync::oneshot;

mod csv_log;
mod lock;
pub mod helpers;
mod repositories;

pub use csv_log::{CsvLog, Table, COLUMNS};
pub use lock::DataDirLock;

type LogTask = Box<dyn FnOnce(&mut CsvLog) + Send + 'static>;

enum LogCommand {
    Execute(LogTask),
    Shutdown,
}

struct SessionLogInner {
    sender: mpsc::Sender<LogCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for SessionLogInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(LogCommand::Shutdown) {
                error!("Failed to send shutdown to session log thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join session log thread: {join_err:?}");
            }
        }
    }
}

/// Durable session log. Every read and write runs on one worker thread that
/// owns the CSV file, so file access is serialized and blocking I/O stays off
/// the async runtime.
#[derive(Clone)]
pub struct SessionLog {
    inner: Arc<SessionLogInner>,
    path: Arc<PathBuf>,
    offset: FixedOffset,
}

impl SessionLog {
    pub fn open(path: PathBuf, offset: FixedOffset) -> Result<Self> {
        let (command_tx, command_rx) = mpsc::channel::<LogCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = path.clone();

        let worker = thread::Builder::new()
            .name("logon-log".into())
            .spawn(move || {
                let mut log = match CsvLog::open(path_for_thread, offset) {
                    Ok(log) => {
                        let _ = ready_tx.send(Ok(()));
                        log
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err.context("failed to open session log")));
                        return;
                    }
                };

                while let Ok(command) = command_rx.recv() {
                    match command {
                        LogCommand::Execute(task) => task(&mut log),
                        LogCommand::Shutdown => break,
                    }
                }

                info!("Session log thread shutting down");
            })
            .with_context(|| "failed to spawn session log worker thread")?;

        if let Err(err) = ready_rx
            .recv()
            .context("session log worker exited before signaling readiness")
            .and_then(|result| result)
        {
            let _ = worker.join();
            return Err(err);
        }

        info!("Session log ready at {}", path.display());

        Ok(Self {
            inner: Arc::new(SessionLogInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            path: Arc::new(path),
            offset,
        })
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    pub fn offset(&self) -> &FixedOffset {
        &self.offset
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut CsvLog) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = LogCommand::Execute(Box::new(move |log| {
            let result = task(log);
            if reply_tx.send(result).is_err() {
                error!("Session log caller dropped before receiving result");
            }
        }));

        self.inner
            .sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to session log thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("session log thread terminated unexpectedly"))?
    }
}
