//! commune-presenced: keeps a user's presence alive from a terminal.
//!
//! `run` activates a presence session, streams everyone's presence changes
//! and maps stdin commands onto host visibility signals. Ctrl-C is treated
//! as the host terminating. `list` prints the presence table.

mod platform;
mod terminal;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use commune_common::CommuneError;
use commune_config::CommuneConfig;
use commune_presence::presence::{ChannelHost, PresenceDirectory, PresenceSession};
use commune_presence::Identity;

use crate::platform::{rest_client, settings_from, Backend};
use crate::terminal::{format_change, format_record, parse_command, Command, HELP};

#[derive(Parser)]
#[command(name = "commune-presenced", about = "Presence heartbeat client for commune")]
struct Args {
    /// Config file (defaults to the platform config directory).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use an in-process platform instead of the configured backend.
    #[arg(long)]
    offline: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Go online and stream presence changes until Ctrl-C or `quit`.
    Run {
        /// Act as this user instead of the one the access token belongs to.
        #[arg(long)]
        user_id: Option<String>,

        #[arg(long)]
        display_name: Option<String>,
    },
    /// Print presence records with their effective status.
    List {
        /// Only this user.
        #[arg(long)]
        user: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match commune_config::load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("commune-presenced: {e}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config);

    let result = match args.command {
        Cmd::Run {
            user_id,
            display_name,
        } => run(&config, args.offline, user_id, display_name).await,
        Cmd::List { user } => list(&config, args.offline, user).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "commune-presenced failed");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(config: &CommuneConfig) {
    let default = ["commune_presenced", "commune_presence", "commune_config"]
        .iter()
        .map(|target| config.logging.directive(target))
        .collect::<Vec<_>>()
        .join(",");
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with_writer(std::io::stderr)
        .init();
}

async fn run(
    config: &CommuneConfig,
    offline: bool,
    user_id: Option<String>,
    display_name: Option<String>,
) -> Result<(), CommuneError> {
    if !config.presence.enabled {
        warn!("Presence is disabled in config; nothing to do");
        return Ok(());
    }

    let explicit = user_id.map(|id| {
        let name = display_name.unwrap_or_else(|| id.clone());
        let mut identity = Identity::new(id, name);
        identity.access_token = config.platform.access_token.clone();
        identity
    });

    let host = Arc::new(ChannelHost::default());
    let backend = if offline {
        let user = explicit
            .clone()
            .unwrap_or_else(|| Identity::new("local", "Local user"));
        Backend::offline(Some(user), host.clone())
    } else {
        Backend::connect(config, host.clone())?
    };

    let settings = settings_from(&config.presence);
    let directory = match PresenceDirectory::load(backend.deps.store.as_ref(), &settings).await {
        Ok(directory) => directory,
        Err(e) => {
            warn!(error = %e, "Could not load presence table; starting empty");
            PresenceDirectory::new(&settings)
        }
    };

    let session = PresenceSession::new(backend.deps.clone(), settings.clone());
    let view = directory.clone();
    let stale_after = settings.stale_after;
    session.on_change(move |change| {
        view.apply(&change);
        println!("{}", format_change(&change, Utc::now(), stale_after));
    });

    match explicit {
        Some(identity) if !offline => session.activate(identity).await,
        _ => {
            if !session.activate_current_user().await? {
                backend.shutdown().await;
                return Err(CommuneError::Presence(
                    "no signed-in user: set an access token or pass --user-id".into(),
                ));
            }
        }
    }

    if let Some(user) = session.current_user() {
        info!(user_id = %user.user_id, display_name = %user.display_name, "Online");
    }
    println!("{HELP}");

    let mut commands = spawn_stdin_reader();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            command = commands.recv(), if stdin_open => match command {
                Some(Command::Away) => {
                    host.background();
                }
                Some(Command::Back) => {
                    host.foreground();
                }
                Some(Command::Status(status)) => session.set_status(status).await,
                Some(Command::Who) => {
                    let now = Utc::now();
                    for record in directory.online_users(now) {
                        println!("{}", format_record(&record, now, stale_after));
                    }
                }
                Some(Command::Help) => println!("{HELP}"),
                Some(Command::Quit) => break,
                None => {
                    // Detached from a terminal; keep running until Ctrl-C.
                    stdin_open = false;
                    info!("stdin closed; press Ctrl-C to go offline");
                }
            },
        }
    }

    // The terminate signal and the explicit call race; the session releases
    // once either way.
    host.terminate();
    session.deactivate().await;
    backend.shutdown().await;
    info!("Offline");
    Ok(())
}

async fn list(
    config: &CommuneConfig,
    offline: bool,
    user: Option<String>,
) -> Result<(), CommuneError> {
    let settings = settings_from(&config.presence);
    let now = Utc::now();

    if offline {
        println!("(offline platform has no stored presence)");
        return Ok(());
    }
    let store = rest_client(config)?;

    match user {
        Some(user_id) => {
            let directory = PresenceDirectory::new(&settings);
            match directory.fetch(&store, &user_id).await? {
                Some(record) => println!("{}", format_record(&record, now, settings.stale_after)),
                None => println!("{user_id}: no presence record"),
            }
        }
        None => {
            let directory = PresenceDirectory::load(&store, &settings).await?;
            for record in directory.all() {
                println!("{}", format_record(&record, now, settings.stale_after));
            }
            info!(
                total = directory.len(),
                online = directory.online_users(now).len(),
                "Presence listed"
            );
        }
    }
    Ok(())
}

/// Forward parsed stdin lines. The channel closes when stdin does.
fn spawn_stdin_reader() -> mpsc::Receiver<Command> {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match parse_command(&line) {
                    Ok(Some(command)) => {
                        if tx.send(command).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(message) => eprintln!("{message}"),
                },
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "stdin read failed");
                    break;
                }
            }
        }
    });
    rx
}
