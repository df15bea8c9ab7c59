use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use fixity_core::database::SqliteDatabase;
use fixity_core::graph::{build_segments, render};
use fixity_model::GraphFormat;
use fixity_server::{
    AppState,
    infra::config::{Config, ConfigLoad, ConfigLoader},
    routes::create_app,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "fixity-server")]
#[command(about = "Ingest and query service for the Fixity file-integrity monitor")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, global = true, env = "FIXITY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(ClapArgs, Debug, Clone, Default)]
struct ServeArgs {
    /// Server port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long)]
    host: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP service (default)
    Serve,
    #[command(subcommand)]
    Db(DbCommand),
    #[command(subcommand)]
    Token(TokenCommand),
    /// Print the provenance graph of a digest
    Graph {
        sha256: String,
        #[arg(long, default_value = "ascii")]
        format: GraphFormat,
        #[arg(long, default_value_t = 20_000)]
        limit: i64,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    /// Apply database migrations and exit
    Migrate,
}

#[derive(Debug, Subcommand)]
enum TokenCommand {
    /// Issue (or rotate) the token for a machine and print it
    Create { machine_name: String },
    /// List machines that hold a token
    List,
    /// Revoke a machine's token
    Delete { machine_name: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_runtime_config(cli.config.as_ref(), &cli.serve)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => run_server(config).await,
        Command::Db(DbCommand::Migrate) => {
            open_database(&config).await?;
            info!("Database migrations applied successfully");
            Ok(())
        }
        Command::Token(command) => run_token_command(&config, command).await,
        Command::Graph {
            sha256,
            format,
            limit,
        } => run_graph_command(&config, &sha256, format, limit).await,
    }
}

fn load_runtime_config(
    config_path: Option<&PathBuf>,
    args: &ServeArgs,
) -> anyhow::Result<Arc<Config>> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = config_path {
        loader = loader.with_config_path(path);
    }
    let ConfigLoad {
        mut config,
        warnings,
    } = loader.load().context("failed to load configuration")?;

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host.clone() {
        config.server.host = host;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                // Override via RUST_LOG.
                "info,tower_http=warn,sqlx=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "configuration file loaded");
    }

    for warning in &warnings.items {
        match &warning.hint {
            Some(hint) => {
                warn!(message = %warning.message, hint = %hint, "configuration warning")
            }
            None => {
                warn!(message = %warning.message, "configuration warning")
            }
        }
    }

    info!(
        ingest.flush_interval_ms = config.ingest.flush_interval_ms,
        ingest.flush_max_rows = config.ingest.flush_max_rows,
        ingest.max_pending_rows = config.ingest.max_pending_rows,
        ingest.max_records_per_request = config.ingest.max_records_per_request,
        "ingest configuration in effect"
    );

    Ok(Arc::new(config))
}

async fn open_database(config: &Config) -> anyhow::Result<SqliteDatabase> {
    let database = SqliteDatabase::connect(&config.database.options())
        .await
        .context("failed to open SQLite database")?;
    database
        .migrate()
        .await
        .context("database migration failed")?;
    Ok(database)
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    let database = open_database(&config).await?;
    let state = AppState::new(Arc::clone(&config), database);

    let shutdown = CancellationToken::new();
    let flush_worker = state.spawn_flush_worker(shutdown.clone());

    let addr = config
        .bind_address()
        .context("invalid server host/port")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(
        "Starting Fixity server (HTTP) on {}:{}",
        config.server.host, config.server.port
    );

    let make_service = create_app(state.clone())
        .into_make_service_with_connect_info::<SocketAddr>();
    let served = axum::serve(listener, make_service)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    info!(
        pending_rows = state.buffer().pending_count(),
        "HTTP server stopped; draining ingest buffer"
    );
    shutdown.cancel();
    if let Err(err) = flush_worker.await {
        warn!("Flush worker task failed: {:?}", err);
    }

    served.context("HTTP server error")?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
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
    info!("shutdown signal received");
}

async fn run_token_command(
    config: &Config,
    command: TokenCommand,
) -> anyhow::Result<()> {
    let database = open_database(config).await?;
    let tokens = database.tokens();

    match command {
        TokenCommand::Create { machine_name } => {
            let token = tokens
                .create_or_rotate(&machine_name)
                .await
                .context("failed to issue token")?;
            println!("{token}");
        }
        TokenCommand::List => {
            for summary in tokens.list().await.context("failed to list tokens")? {
                println!(
                    "{}\t{}\tcreated {}\tupdated {}",
                    summary.machine_id,
                    summary.machine_name,
                    summary.created_at.to_rfc3339(),
                    summary.updated_at.to_rfc3339()
                );
            }
        }
        TokenCommand::Delete { machine_name } => {
            if tokens
                .delete(&machine_name)
                .await
                .context("failed to delete token")?
            {
                info!(machine_name = %machine_name, "token deleted");
            } else {
                anyhow::bail!("no token exists for machine '{machine_name}'");
            }
        }
    }
    Ok(())
}

async fn run_graph_command(
    config: &Config,
    sha256: &str,
    format: GraphFormat,
    limit: i64,
) -> anyhow::Result<()> {
    let sha256 = sha256.trim().to_ascii_lowercase();
    if !fixity_model::is_sha256_hex(&sha256) {
        anyhow::bail!("sha256 must be 64 hex characters");
    }

    let database = open_database(config).await?;
    let rows = database
        .file_records()
        .graph_rows(&sha256, limit.clamp(1, config.query.graph.max))
        .await
        .context("failed to load graph rows")?;
    let rendered = render(format, &sha256, build_segments(&rows))
        .context("failed to render graph")?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_invocation_serves() {
        let cli = Cli::try_parse_from(["fixity-server", "--port", "9000"])
            .expect("parses");
        assert!(cli.command.is_none());
        assert_eq!(cli.serve.port, Some(9000));
    }

    #[test]
    fn admin_subcommands_parse() {
        let cli = Cli::try_parse_from(["fixity-server", "token", "create", "nas-01"])
            .expect("parses");
        assert!(matches!(
            cli.command,
            Some(Command::Token(TokenCommand::Create { ref machine_name })) if machine_name == "nas-01"
        ));

        let sha = "a".repeat(64);
        let cli = Cli::try_parse_from([
            "fixity-server",
            "graph",
            sha.as_str(),
            "--format",
            "mermaid",
            "--limit",
            "50",
        ])
        .expect("parses");
        match cli.command {
            Some(Command::Graph { format, limit, .. }) => {
                assert_eq!(format, GraphFormat::Mermaid);
                assert_eq!(limit, 50);
            }
            other => panic!("expected graph command, got {other:?}"),
        }

        assert!(
            Cli::try_parse_from(["fixity-server", "graph", "x", "--format", "svg"])
                .is_err()
        );
    }
}
