use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crawl_scheduler::config::Config;
use crawl_scheduler::database::Database;
use crawl_scheduler::executor::HttpExecutor;
use crawl_scheduler::scheduler::{Consumer, Enqueuer, LeaseManager, SchedulerService, ShardClock};
use crawl_scheduler::sources::SqlEligibilitySource;
use crawl_scheduler::web::WebServer;

#[derive(Parser)]
#[command(name = "crawl-scheduler")]
#[command(about = "Sharded crawl/enrichment job scheduler")]
struct Cli {
    /// Host address to bind the web server to
    #[arg(long)]
    host: Option<String>,

    /// Port to bind the web server to
    #[arg(long)]
    port: Option<u16>,

    /// Database URL override
    #[arg(long)]
    database_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("crawl_scheduler={},tower_http=warn", cli.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::load()?;
    if let Some(host) = cli.host {
        config.web.host = host;
    }
    if let Some(port) = cli.port {
        config.web.port = port;
    }
    if let Some(database_url) = cli.database_url {
        config.database.url = database_url;
    }

    tracing::info!("Starting crawl-scheduler");

    let database = Database::new(&config.database).await?;
    database.migrate().await?;

    let source = Arc::new(SqlEligibilitySource::new(database.clone()));
    let enqueuer = Enqueuer::new(database.clone(), source, &config.scheduler);

    let executor = Arc::new(HttpExecutor::new(&config.executor)?);
    let clock = ShardClock::new(
        config.scheduler.shard_count,
        config.scheduler.rotation_period_minutes,
    );
    let lease_manager = LeaseManager::new(database.clone(), config.scheduler.lease_minutes);
    let consumer = Consumer::new(
        lease_manager,
        executor,
        clock,
        config.scheduler.batch_size,
        Duration::from_secs(config.executor.timeout_seconds),
    );

    let scheduler = Arc::new(SchedulerService::new(
        database.clone(),
        enqueuer,
        consumer,
        &config.scheduler,
    )?);

    let scheduler_handle = scheduler.clone();
    tokio::spawn(async move {
        if let Err(e) = scheduler_handle.start().await {
            tracing::error!("Scheduler service exited: {}", e);
        }
    });

    let web_server = WebServer::new(&config, database, scheduler)?;
    web_server.run().await
}
