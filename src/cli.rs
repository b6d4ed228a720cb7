//! Command-line surface: a long-running control loop plus a few one-shot
//! maintenance commands.

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use crate::{
    presence::CommandProbe,
    session::{
        commands::{execute, parse_command, render_record, Command, HELP},
        SessionManager,
    },
    settings::DataPaths,
    App,
};

#[derive(Parser, Debug)]
#[command(name = "logon")]
#[command(about = "Work session tracker with a durable CSV log")]
#[command(version)]
pub struct Cli {
    /// Directory holding the session log, verticals and settings
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Track sessions interactively, reading commands from stdin (default)
    Run {
        /// Start and stop auto sessions on screen unlock/lock
        #[arg(long)]
        presence: bool,
    },

    /// List or register verticals (projects)
    Verticals {
        #[command(subcommand)]
        action: Option<VerticalsAction>,
    },

    /// Print the latest sessions, newest first
    History {
        #[arg(long, short, default_value_t = 100)]
        limit: usize,
    },

    /// Reconcile sessions left open by a previous run
    Recover,
}

impl Commands {
    /// Commands that only read and so may run next to a live `logon run`.
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            Commands::History { .. } | Commands::Verticals { action: None }
        )
    }
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum VerticalsAction {
    Add { name: String },
}

pub async fn dispatch(cli: Cli) -> Result<()> {
    let paths = DataPaths::resolve(cli.data_dir)?;
    let command = cli.command.unwrap_or(Commands::Run { presence: false });
    let mut app = if command.is_read_only() {
        App::open_read_only(&paths)?
    } else {
        App::open(&paths)?
    };
    info!("Data directory: {}", paths.root.display());

    match command {
        Commands::Run { presence } => run_interactive(&mut app, presence).await,
        Commands::Verticals { action: None } => {
            for name in app.manager().verticals().list() {
                println!("{name}");
            }
            Ok(())
        }
        Commands::Verticals {
            action: Some(VerticalsAction::Add { name }),
        } => {
            if app.manager().verticals().add(&name)? {
                println!("added {}", name.trim());
            } else {
                println!("{} is already registered", name.trim());
            }
            Ok(())
        }
        Commands::History { limit } => {
            for record in app.manager().history(limit).await? {
                println!("{}", render_record(&record));
            }
            Ok(())
        }
        Commands::Recover => {
            let report = app.manager().recover().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

async fn run_interactive(app: &mut App, presence_flag: bool) -> Result<()> {
    let report = app.manager().recover().await?;
    if !report.closed.is_empty() {
        println!("closed {} session(s) left open by a previous run", report.closed.len());
    }
    if let Some(id) = &report.resumed {
        println!("resumed session {id}");
    }
    for label in &report.unreadable {
        println!("session {label} is open in the log but unreadable; fix it by hand");
    }

    if presence_flag || app.settings().get().presence.enabled {
        app.start_presence(Arc::new(CommandProbe::new()))?;
    }

    println!("logon ready; type 'help' for commands");
    let stdin = BufReader::new(tokio::io::stdin());
    let result = control_loop(app.manager(), stdin, terminate_signal()).await;

    // Shut down even when the loop failed, then report the first error.
    let shutdown = app.shutdown().await;
    result.and(shutdown)
}

/// Reads commands until `quit`, end of input, or `stop_signal` resolves.
pub async fn control_loop<R, S>(manager: &SessionManager, input: R, stop_signal: S) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    S: std::future::Future<Output = ()>,
{
    let mut lines = input.lines();
    tokio::pin!(stop_signal);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read command input")? else {
                    break;
                };
                match parse_command(&line) {
                    Ok(None) => {}
                    Ok(Some(Command::Quit)) => break,
                    Ok(Some(Command::Help)) => println!("{HELP}"),
                    Ok(Some(command)) => match execute(manager, command).await {
                        Ok(output) => println!("{output}"),
                        Err(err) => println!("error: {err:#}"),
                    },
                    Err(err) => println!("{err}"),
                }
            }
            _ = &mut stop_signal => {
                info!("Termination signal received");
                break;
            }
        }
    }
    Ok(())
}

async fn terminate_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!("Cannot listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
