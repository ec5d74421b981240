mod config;
mod http;
mod serve_cmd;
mod show_cmd;
mod status_cmd;
mod submit_cmd;

use anyhow::Result;
use clap::{Parser, Subcommand};

use config::KernelConfig;
use taskgraph_db::pool;

#[derive(Parser)]
#[command(name = "taskgraph", about = "Persistent dependency-DAG task scheduler")]
struct Cli {
    /// Path to the SQLite database file (overrides DB_PATH env var)
    #[arg(long, global = true)]
    db_path: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run migrations, start the scheduler, and serve the HTTP surface
    /// until SIGINT.
    Serve,
    /// Submit a single task or batch from a JSON file, without starting
    /// the scheduler.
    Submit {
        /// Path to a JSON file: a single task spec, or `{"tasks": [...]}`.
        file: String,
    },
    /// List tasks, optionally filtered by status.
    Status {
        /// One of queued, running, completed, failed, blocked.
        #[arg(long)]
        status: Option<String>,
    },
    /// Show one task's full row and its dependency ids.
    Show {
        /// Task id to show.
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = KernelConfig::resolve(cli.db_path.as_deref());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.clone())),
        )
        .init();

    let db_pool = pool::create_pool(&config.db_config).await?;
    pool::run_migrations(&db_pool).await?;

    match cli.command {
        Commands::Serve => {
            serve_cmd::run_serve(db_pool.clone(), &config).await?;
        }
        Commands::Submit { file } => {
            submit_cmd::run_submit(&db_pool, &file, config.max_attempts).await?;
        }
        Commands::Status { status } => {
            status_cmd::run_status(&db_pool, status.as_deref()).await?;
        }
        Commands::Show { id } => {
            show_cmd::run_show(&db_pool, &id).await?;
        }
    }

    db_pool.close().await;
    Ok(())
}
