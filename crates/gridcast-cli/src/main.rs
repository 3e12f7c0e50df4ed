mod config;
mod layout;
mod logging;
mod watch;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use config::{resolve_credentials, resolve_db_path, resolve_log_config, ConnectArgs};
use gridcast_core::WidgetContentStore;
use gridcast_realtime::{RealtimeClient, RealtimeOptions, SubscriptionSpec, WsConnector};
use gridcast_storage::{DashboardPersistence, SqliteKvStore};
use layout::{LayoutCommand, Workspace};
use serde_json::Value;
use std::io;
use std::time::Duration;
use tracing::{debug, error};

#[derive(Parser, Debug)]
#[command(name = "gridcast")]
#[command(about = "Grid dashboard layouts and live data feeds", long_about = None)]
struct Cli {
    /// Directory for log files (GRIDCAST_LOG_DIR)
    #[arg(long, global = true)]
    log_dir: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Edit the stored dashboard layout
    Layout {
        /// SQLite file holding the dashboard (GRIDCAST_DB)
        #[arg(long)]
        db: Option<String>,
        #[command(subcommand)]
        action: LayoutCommand,
    },
    /// Subscribe to a realtime query and print each item
    Watch {
        #[command(flatten)]
        connection: ConnectionFlags,
        query: String,
        /// JSON object of query variables
        #[arg(long, default_value = "{}")]
        variables: String,
        /// Dotted path applied to every payload, e.g. data.onTick
        #[arg(long)]
        path: Option<String>,
        /// Stop after this many items
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Follow an AI job until it finishes
    WatchJob {
        #[command(flatten)]
        connection: ConnectionFlags,
        job_id: String,
    },
}

#[derive(Args, Debug)]
struct ConnectionFlags {
    /// Realtime endpoint, ws:// or wss:// (GRIDCAST_ENDPOINT)
    #[arg(long)]
    endpoint: Option<String>,
    /// API key credential (GRIDCAST_API_KEY)
    #[arg(long)]
    api_key: Option<String>,
    /// Bearer token credential (GRIDCAST_TOKEN)
    #[arg(long)]
    token: Option<String>,
    /// Seconds to wait for connection_ack
    #[arg(long, default_value_t = 10)]
    handshake_timeout: u64,
}

impl ConnectionFlags {
    fn as_args(&self) -> ConnectArgs<'_> {
        ConnectArgs {
            endpoint: self.endpoint.as_deref(),
            api_key: self.api_key.as_deref(),
            token: self.token.as_deref(),
        }
    }

    fn options(&self) -> RealtimeOptions {
        RealtimeOptions {
            handshake_timeout: Duration::from_secs(self.handshake_timeout.max(1)),
            ..RealtimeOptions::default()
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let _log_guard = logging::init_logging(&resolve_log_config(cli.log_dir.as_deref()));

    if let Err(err) = run(cli.command).await {
        error!("command_failed: {err:#}");
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Layout { db, action } => {
            let path = resolve_db_path(db.as_deref());
            if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create {}", parent.display()))?;
            }
            let store = SqliteKvStore::open(&path)
                .with_context(|| format!("open dashboard database {}", path.display()))?;
            debug!(db = %path.display(), "layout_db_opened");
            let mut workspace =
                Workspace::open(DashboardPersistence::new(store, WidgetContentStore::new()));
            let output = workspace.execute(action)?;
            println!("{output}");
            Ok(())
        }
        Commands::Watch {
            connection,
            query,
            variables,
            path,
            limit,
        } => {
            let credentials = resolve_credentials(&connection.as_args())?;
            let variables: Value =
                serde_json::from_str(&variables).context("--variables must be JSON")?;
            let (mut spec, events) = SubscriptionSpec::channel(query, variables);
            if let Some(path) = path {
                spec = spec.with_path(path);
            }
            let (client, task) = RealtimeClient::spawn(WsConnector, connection.options());
            let mut stdout = io::stdout();
            let result = watch::watch(
                &client,
                credentials,
                spec,
                events,
                limit,
                &mut stdout,
                interrupted(),
            )
            .await;
            client.shutdown().await;
            let _ = task.await;
            result.map(|seen| debug!(items = seen, "watch_finished"))
        }
        Commands::WatchJob { connection, job_id } => {
            let credentials = resolve_credentials(&connection.as_args())?;
            let (client, task) = RealtimeClient::spawn(WsConnector, connection.options());
            let mut stdout = io::stdout();
            let result =
                watch::watch_job(&client, credentials, &job_id, &mut stdout, interrupted()).await;
            client.shutdown().await;
            let _ = task.await;
            watch::job_exit_status(result?)
        }
    }
}

async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}
