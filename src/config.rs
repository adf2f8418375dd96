use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub registry: RegistryConfig,
    pub polling: PollingConfig,
    pub accounting: AccountingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_pool_size: u32,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Optional cron expression for VACUUM (e.g. "0 0 3 * * *" = 03:00 daily). Uses local time.
    #[serde(default)]
    pub vacuum_schedule: Option<String>,
    /// Run VACUUM every N seconds when vacuum_schedule is not set.
    #[serde(default = "default_vacuum_interval_secs")]
    pub vacuum_interval_secs: u64,
}

fn default_vacuum_interval_secs() -> u64 {
    24 * 60 * 60
}

fn default_retention_days() -> u32 {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// TOML file declaring the monitored nodes.
    pub path: String,
    /// How often to re-read the node file (real seconds).
    pub reload_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    pub timeout_ms: u64,
    /// Consecutive poll failures before a node is declared offline.
    #[serde(default = "default_offline_threshold")]
    pub offline_threshold: u32,
}

fn default_interval_ms() -> u64 {
    1500
}

fn default_offline_threshold() -> u32 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountingConfig {
    /// Cadence of the ledger delta tick (real seconds).
    #[serde(default = "default_delta_interval_secs")]
    pub delta_interval_secs: u64,
    /// How often to sweep expired ring/ledger rows (real seconds).
    pub prune_interval_secs: u64,
    /// How often to log app stats (polls issued, transitions) at INFO level.
    pub stats_log_interval_secs: u64,
}

fn default_delta_interval_secs() -> u64 {
    30
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.database.path.is_empty(),
            "database.path must be non-empty"
        );
        anyhow::ensure!(
            self.database.max_pool_size > 0,
            "database.max_pool_size must be > 0, got {}",
            self.database.max_pool_size
        );
        anyhow::ensure!(
            self.database.retention_days > 0,
            "database.retention_days must be > 0, got {}",
            self.database.retention_days
        );
        anyhow::ensure!(
            self.database.vacuum_interval_secs > 0,
            "database.vacuum_interval_secs must be > 0, got {}",
            self.database.vacuum_interval_secs
        );
        anyhow::ensure!(
            !self.registry.path.is_empty(),
            "registry.path must be non-empty"
        );
        anyhow::ensure!(
            self.registry.reload_interval_secs > 0,
            "registry.reload_interval_secs must be > 0, got {}",
            self.registry.reload_interval_secs
        );
        anyhow::ensure!(
            self.polling.interval_ms > 0,
            "polling.interval_ms must be > 0, got {}",
            self.polling.interval_ms
        );
        anyhow::ensure!(
            self.polling.timeout_ms > 0,
            "polling.timeout_ms must be > 0, got {}",
            self.polling.timeout_ms
        );
        anyhow::ensure!(
            self.polling.offline_threshold > 0,
            "polling.offline_threshold must be > 0, got {}",
            self.polling.offline_threshold
        );
        anyhow::ensure!(
            self.accounting.delta_interval_secs > 0,
            "accounting.delta_interval_secs must be > 0, got {}",
            self.accounting.delta_interval_secs
        );
        anyhow::ensure!(
            self.accounting.prune_interval_secs > 0,
            "accounting.prune_interval_secs must be > 0, got {}",
            self.accounting.prune_interval_secs
        );
        anyhow::ensure!(
            self.accounting.stats_log_interval_secs > 0,
            "accounting.stats_log_interval_secs must be > 0, got {}",
            self.accounting.stats_log_interval_secs
        );
        Ok(())
    }
}
