//! recipe-session - drives the session and realtime subsystem from a terminal.

mod app;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use session_config_and_utils::{init_logging, Config, Paths};

/// Recipe session command-line interface.
#[derive(Parser)]
#[command(name = "recipe-session")]
#[command(about = "Sign in, call the recipe API and follow live recipe updates")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error). Defaults to the configured level
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for runtime files (vault, logs, config). Defaults to ~/.recipe-session
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Mirror logs to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with email and password
    Login {
        #[arg(short, long)]
        email: String,
        /// Read from stdin when omitted
        #[arg(short, long, env = "RECIPE_SESSION_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Sign out and wipe stored credentials
    Logout,
    /// Show session and connectivity status
    Status,
    /// Send an authenticated API request
    Request {
        /// HTTP method (GET, POST, PUT, PATCH, DELETE)
        method: String,
        /// Path relative to the API base URL
        path: String,
        /// JSON request body
        #[arg(short, long)]
        data: Option<String>,
    },
    /// Print live updates for one or more recipes until interrupted
    Listen {
        #[arg(required = true)]
        recipe_ids: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    paths.ensure_dirs()?;
    let config = Config::load(&paths)?;

    let level = cli.log_level.unwrap_or_else(|| config.log_level.clone());
    init_logging(&level, &paths, cli.verbose);

    let runtime = app::SessionRuntime::start(config, paths)?;

    let result = match cli.command {
        Commands::Login { email, password } => app::login(&runtime, &email, password).await,
        Commands::Logout => app::logout(&runtime),
        Commands::Status => app::status(&runtime),
        Commands::Request { method, path, data } => {
            app::request(&runtime, &method, &path, data).await
        }
        Commands::Listen { recipe_ids } => app::listen(&runtime, recipe_ids).await,
    };

    runtime.shutdown();
    result
}
