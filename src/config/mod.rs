use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub web: WebConfig,
    pub scheduler: SchedulerConfig,
    pub executor: ExecutorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of shards the item space is partitioned into. Changing this
    /// requires re-assigning every item, so treat it as fixed once deployed.
    pub shard_count: u32,
    /// Minutes each shard window lasts; all shards are visited once per
    /// `shard_count * rotation_period_minutes` minutes.
    pub rotation_period_minutes: u32,
    /// Maximum jobs claimed per consumer tick.
    pub batch_size: u32,
    /// How long a lease lasts before it is considered abandoned.
    pub lease_minutes: u32,
    /// Retry budget applied to newly enqueued jobs.
    pub max_attempts: u32,
    /// Seconds between consumer ticks.
    pub consume_interval_seconds: u64,
    /// Cron expression for the enqueuer cadence (daily by default).
    pub enqueue_cron: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Hard per-job timeout budget, in seconds.
    pub timeout_seconds: u64,
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://./crawl-scheduler.db".to_string(),
                max_connections: Some(10),
            },
            web: WebConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            scheduler: SchedulerConfig {
                shard_count: 16,
                rotation_period_minutes: 5,
                batch_size: 10,
                lease_minutes: 8,
                max_attempts: 4,
                consume_interval_seconds: 300,
                enqueue_cron: "0 0 0 * * * *".to_string(),
            },
            executor: ExecutorConfig {
                timeout_seconds: 30,
                user_agent: "crawl-scheduler/0.1".to_string(),
            },
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_file =
            std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string());

        if std::path::Path::new(&config_file).exists() {
            let contents = std::fs::read_to_string(&config_file)?;
            Ok(toml::from_str(&contents)?)
        } else {
            let default_config = Self::default();
            let contents = toml::to_string_pretty(&default_config)?;
            std::fs::write(&config_file, contents)?;
            Ok(default_config)
        }
    }
}
