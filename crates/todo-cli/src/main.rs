use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{info, warn};

use todo_core::config::StorageBackend;
use todo_core::domain::{
    StoreError, TaskAttributes, TaskStatus, UserError, UserLoginRequest, UserRequest,
};
use todo_core::logging::init_logging;
use todo_core::{App, AppBuilder, AppConfig};

const DEMO_EMAIL: &str = "demo@example.com";
const DEMO_PASSWORD: &str = "demo-password";

/// Task / user management with batched tombstone compaction
#[derive(Parser)]
#[command(name = "todo")]
#[command(version, long_about = None)]
struct Cli {
    /// Configuration file (TOML / JSON / YAML, by extension)
    #[arg(long, global = true, env = "TODO_CONFIG")]
    config: Option<PathBuf>,

    /// Tombstone notifications that trigger a compaction
    #[arg(long, global = true)]
    capacity: Option<usize>,

    /// How often the compactor checks for saturation
    #[arg(long, global = true)]
    tick_interval_ms: Option<u64>,

    /// Deadline for a single purge call
    #[arg(long, global = true)]
    store_timeout_ms: Option<u64>,

    #[arg(long, global = true, value_enum)]
    storage: Option<StorageArg>,

    /// SQLite database file (implies --storage sqlite when set alone)
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the compactor and wait for Ctrl-C
    Run,

    /// Create and delete some tasks, then shut down
    Demo {
        /// Number of tasks to create and delete
        #[arg(long, default_value_t = 25)]
        tasks: usize,

        /// Pause between deletions
        #[arg(long, default_value_t = 100)]
        pause_ms: u64,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum StorageArg {
    Memory,
    Sqlite,
}

impl Cli {
    /// Command-line flags override file and env settings.
    fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(capacity) = self.capacity {
            config.compactor.capacity = capacity;
        }
        if let Some(ms) = self.tick_interval_ms {
            config.compactor.tick_interval_ms = ms;
        }
        if let Some(ms) = self.store_timeout_ms {
            config.compactor.store_timeout_ms = ms;
        }
        if let Some(path) = &self.db_path {
            config.storage.path = Some(path.clone());
            if self.storage.is_none() {
                config.storage.backend = StorageBackend::Sqlite;
            }
        }
        match self.storage {
            Some(StorageArg::Memory) => config.storage.backend = StorageBackend::Memory,
            Some(StorageArg::Sqlite) => config.storage.backend = StorageBackend::Sqlite,
            None => {}
        }
        if let Some(level) = &self.log_level {
            config.log.level = level.clone();
        }
        if self.json_logs {
            config.log.json = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
    cli.apply_overrides(&mut config);

    if let Commands::Config = cli.command {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    init_logging(&config.log.level, config.log.json);

    let app = AppBuilder::new(config)
        .build()
        .context("building application")?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    app.start(shutdown_rx)?;

    let outcome = match cli.command {
        Commands::Run => {
            tokio::signal::ctrl_c()
                .await
                .context("waiting for Ctrl-C")?;
            info!("shutdown requested");
            Ok(())
        }
        Commands::Demo { tasks, pause_ms } => {
            run_demo(&app, tasks, Duration::from_millis(pause_ms)).await
        }
        Commands::Config => Ok(()),
    };

    let _ = shutdown_tx.send(true);
    if let Err(err) = app.shutdown().await {
        warn!(error = %err, "continuing teardown after failed final compaction");
    }
    println!("{}", serde_json::to_string_pretty(&app.status())?);

    outcome
}

async fn run_demo(app: &App, n: usize, pause: Duration) -> Result<()> {
    let request = UserRequest::new("demo", DEMO_EMAIL, DEMO_PASSWORD);
    let user = match app.users.register(request).await {
        Ok(user) => user,
        // 永続ストアでは前回の demo ユーザーが残っている
        Err(UserError::Store(StoreError::AlreadyExists(_))) => {
            app.users
                .login(UserLoginRequest::new(DEMO_EMAIL, DEMO_PASSWORD))
                .await?
        }
        Err(err) => return Err(err.into()),
    };

    for i in 0..n {
        let title = format!("demo task {i}");
        let task_id = app
            .tasks
            .create_task(TaskAttributes::new(TaskStatus::New, title, ""), user.id)
            .await?;
        app.tasks.delete_task(&task_id.to_string(), user.id).await?;

        let status = app.status();
        info!(
            pending = status.pending,
            capacity = status.capacity,
            purged_total = status.purged_total,
            "task {i} tombstoned"
        );
        tokio::time::sleep(pause).await;
    }

    info!(
        remaining = app.tasks.list_tasks(user.id).await?.len(),
        "demo finished"
    );
    Ok(())
}
