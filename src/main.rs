//! GroupTech CLI - terminal client for GroupTech channels and direct messages
//!
//! Live conversations, notifications and presence from the command line.

mod api;
mod composer;
mod config;
mod models;
mod notifications;
mod presence;
mod realtime;
mod reconciler;
mod session;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;
use models::{PresenceStatus, Route};
use notifications::MuteReason;

#[derive(Parser)]
#[command(name = "grouptech")]
#[command(about = "Terminal client for GroupTech", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or change configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Show the configured user's profile
    Whoami,

    /// List users
    Users,

    /// Read messages from a conversation
    Read {
        /// Channel id (5), direct key (dm_1_2) or peer (dm_2)
        route: Route,

        /// Maximum number of messages to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Send a message
    Send {
        /// Channel id (5), direct key (dm_1_2) or peer (dm_2)
        #[arg(short, long)]
        to: Route,

        /// Message content
        #[arg(default_value = "")]
        message: String,

        /// Attach a file (repeatable)
        #[arg(short, long = "attach")]
        attach: Vec<PathBuf>,
    },

    /// Interactive session with live updates
    Watch {
        /// Conversation to open on start
        route: Option<Route>,
    },

    /// List or manage stored notifications
    Notifications {
        #[command(subcommand)]
        action: Option<NotificationAction>,
    },

    /// Mute or unmute notification toasts
    Mute {
        /// on or off
        #[arg(default_value = "on")]
        state: Toggle,
    },

    /// Set presence status: online, away, dnd, invisible, offline
    Status { status: PresenceStatus },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the configuration
    Show,
    /// Set a key (empty value clears optional keys)
    Set { key: String, value: String },
    /// Print the config file path
    Path,
}

#[derive(Subcommand)]
enum NotificationAction {
    /// List conversations with notifications, newest first
    List,
    /// Mark a conversation read
    Read { route: Route },
    /// Remove a conversation's notification
    Clear { route: Route },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = Config::load()?;

    match cli.command {
        Commands::Config { action } => match action.unwrap_or(ConfigAction::Show) {
            ConfigAction::Show => print!("{}", toml::to_string_pretty(&config)?),
            ConfigAction::Set { key, value } => {
                let mut config = config;
                config.set(&key, &value)?;
                config.save()?;
                println!("Saved {}", key);
            }
            ConfigAction::Path => println!("{}", Config::config_path()?.display()),
        },
        Commands::Whoami => {
            api::whoami(&config).await?;
        }
        Commands::Users => {
            api::list_users(&config).await?;
        }
        Commands::Read { route, limit } => {
            api::read_messages(&config, route, limit).await?;
        }
        Commands::Send {
            to,
            message,
            attach,
        } => {
            tracing::info!("Sending message...");
            api::send_message(&config, to, &message, &attach).await?;
        }
        Commands::Watch { route } => {
            session::run(config, route).await?;
        }
        Commands::Notifications { action } => {
            let mut store = session::open_notifications(&config)?;
            let me = config.user.id;
            match action.unwrap_or(NotificationAction::List) {
                NotificationAction::List => {
                    let items = store.items_by_recency();
                    if items.is_empty() {
                        println!("(no notifications)");
                    }
                    for item in items {
                        println!("{}", session::render::format_item(item));
                    }
                }
                NotificationAction::Read { route } => {
                    store.mark_read(resolve_route(route, me)?);
                }
                NotificationAction::Clear { route } => {
                    store.clear_conversation(resolve_route(route, me)?);
                }
            }
        }
        Commands::Mute { state } => {
            let mut store = session::open_notifications(&config)?;
            store.set_muted(matches!(state, Toggle::On), MuteReason::Manual);
            println!(
                "Notifications {}",
                if store.is_muted() { "muted" } else { "unmuted" }
            );
        }
        Commands::Status { status } => {
            tracing::info!("Setting status to {}...", status);
            api::set_status(&config, status).await?;
            session::open_notifications(&config)?.apply_local_status(status);
        }
    }

    Ok(())
}

fn resolve_route(route: Route, me: Option<u64>) -> Result<models::ConversationId> {
    route
        .resolve(me)
        .ok_or_else(|| anyhow::anyhow!("dm_<peer> needs user.id to be configured"))
}
