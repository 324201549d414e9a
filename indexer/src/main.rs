use std::sync::Arc;

use anyhow::{bail, Context};
use chain_mirror::cli::{self, Command};
use chain_mirror::config::{Config, LogFormat, LoggingConfig};
use chain_mirror::database::queries::{BlockQueries, GapQueries};
use chain_mirror::database::{Database, PersistenceEngine};
use chain_mirror::indexer::IndexerService;
use chain_mirror::rpc_client::RpcClient;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::parse_args();

    // Load configuration (defaults unless a config file is provided)
    let mut config = match &args.config_path {
        Some(path) => Config::load(path).with_context(|| format!("Failed to load {}", path.display()))?,
        None => Config::default(),
    };
    config.apply_cli_overrides(&args);
    config.apply_env_overrides();
    config.validate().context("Invalid configuration")?;

    init_logging(&config.logging);

    info!("Database path: {:?}", config.database.path);
    let database = Database::connect(&config.database)
        .await
        .context("Failed to open database")?;
    database.migrate().await.context("Failed to create tables")?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(config, database).await,
        Command::Rewind { height } => {
            let report = PersistenceEngine::new(&database).rewind(height).await?;
            info!("Rewound to height {} ({} deletes)", height, report.deletes);
            Ok(())
        }
        Command::Reset { yes } => {
            if !yes {
                bail!("Refusing to empty the mirror without --yes");
            }
            PersistenceEngine::new(&database).reset().await?;
            info!("All tables emptied");
            Ok(())
        }
        Command::Gaps => {
            let pool = database.pool();
            let missing = GapQueries::missing_ranges(pool).await?;
            match BlockQueries::tip(pool).await? {
                Some(tip) => println!("tip: #{} {}", tip.height, tip.hash),
                None => println!("tip: none"),
            }
            println!("blocks: {}", BlockQueries::count(pool).await?);
            if missing.is_empty() {
                println!("no gaps");
            }
            for range in missing {
                println!("{}..={} ({} blocks)", range.lower_bound, range.upper_bound, range.len());
            }
            Ok(())
        }
    }
}

async fn run(config: Config, database: Database) -> anyhow::Result<()> {
    info!("Connecting to node at {}", config.node.url);
    let source = Arc::new(RpcClient::new(&config.node));
    let service = IndexerService::new(database, source, config.sync.clone());

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down..."),
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
        let _ = shutdown_tx.send(());
    });

    service.run(shutdown_rx).await.context("Indexer stopped")?;
    info!("Chain mirror stopped gracefully");
    Ok(())
}

fn init_logging(logging: &LoggingConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    match logging.format {
        LogFormat::Text => fmt().with_env_filter(filter).with_target(true).init(),
        LogFormat::Json => fmt().json().with_env_filter(filter).with_target(true).init(),
    }
}
