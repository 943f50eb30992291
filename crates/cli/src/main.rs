mod config_commands;
mod conversation_commands;
mod db_commands;
mod run_command;

use std::path::PathBuf;

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    courier_config::CourierConfig,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "courier", about = "Courier: chat conversations to agent runs")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file to load instead of discovering one.
    #[arg(long, global = true, env = "COURIER_CONFIG")]
    config: Option<PathBuf>,
    /// Custom config directory (overrides default ~/.config/courier/).
    #[arg(long, global = true, env = "COURIER_CONFIG_DIR")]
    config_dir: Option<PathBuf>,
    /// Custom data directory (overrides default data dir).
    #[arg(long, global = true, env = "COURIER_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect the transport and dispatch conversations (default).
    Run,
    /// Conversation allow-list management.
    Conversations {
        #[command(subcommand)]
        action: conversation_commands::ConversationAction,
    },
    /// Database management.
    Db {
        #[command(subcommand)]
        action: db_commands::DbAction,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Apply directory overrides, then load `--config` or discover a file.
fn load_config(cli: &Cli) -> anyhow::Result<CourierConfig> {
    if let Some(ref dir) = cli.config_dir {
        courier_config::set_config_dir(dir.clone());
    }
    if let Some(ref dir) = cli.data_dir {
        courier_config::set_data_dir(dir.clone());
    }
    match cli.config {
        Some(ref path) => courier_config::load_config(path)
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(courier_config::discover_and_load()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "courier starting");

    let config = load_config(&cli)?;

    match cli.command {
        None | Some(Commands::Run) => run_command::run(config).await,
        Some(Commands::Conversations { action }) => {
            conversation_commands::handle_conversations(&config, action).await
        },
        Some(Commands::Db { action }) => db_commands::handle_db(&config, action).await,
        Some(Commands::Config { action }) => {
            config_commands::handle_config(cli.config.as_deref(), &config, action)
        },
    }
}
