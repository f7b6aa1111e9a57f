use serde::Deserialize;
use std::time::Duration;

use crate::core::engine::{ActivityOptions, RetryPolicy};
use crate::domain::entities::Placement;
use crate::error::{AppError, Result};

/// 6128 GiB
pub const DEFAULT_PLATFORM_MAX_RAM_MIB: u32 = 6_275_072;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mongodb_uri: String,
    pub mongodb_database: String,
    pub port: u16,
    pub log_format: String,
    /// Run on the in-memory store and sandbox backends
    pub sandbox: bool,

    /// Control-plane URL embedded in node bootstrap scripts
    pub pipeline_url: String,
    pub platform_max_ram_mib: u32,
    pub master_ready_timeout_secs: u64,

    pub activity_workers: usize,
    pub schedule_to_start_secs: u64,
    pub start_to_close_secs: u64,
    pub schedule_to_close_secs: u64,
    pub max_attempts: u32,
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    pub backoff_coefficient: f64,

    pub folder: String,
    pub resource_pool: String,
    pub datastore: String,
}

/// Optional YAML file named by `VMKUBE_CONFIG`; set keys override the
/// environment.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigOverlay {
    mongodb_uri: Option<String>,
    mongodb_database: Option<String>,
    port: Option<u16>,
    log_format: Option<String>,
    sandbox: Option<bool>,
    pipeline_url: Option<String>,
    platform_max_ram_mib: Option<u32>,
    master_ready_timeout_secs: Option<u64>,
    activity_workers: Option<usize>,
    schedule_to_start_secs: Option<u64>,
    start_to_close_secs: Option<u64>,
    schedule_to_close_secs: Option<u64>,
    max_attempts: Option<u32>,
    initial_interval_ms: Option<u64>,
    max_interval_ms: Option<u64>,
    backoff_coefficient: Option<f64>,
    folder: Option<String>,
    resource_pool: Option<String>,
    datastore: Option<String>,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| AppError::validation(format!("{} has an invalid value {:?}", key, raw))),
        Err(_) => Ok(default),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mongodb_uri: "mongodb://localhost:27017".to_owned(),
            mongodb_database: "vmkube".to_owned(),
            port: 8000,
            log_format: "compact".to_owned(),
            sandbox: false,
            pipeline_url: "http://localhost:8000".to_owned(),
            platform_max_ram_mib: DEFAULT_PLATFORM_MAX_RAM_MIB,
            master_ready_timeout_secs: 3600,
            activity_workers: 32,
            schedule_to_start_secs: 10 * 60,
            start_to_close_secs: 20 * 60,
            schedule_to_close_secs: 30 * 60,
            max_attempts: 5,
            initial_interval_ms: 2_000,
            max_interval_ms: 60_000,
            backoff_coefficient: 2.0,
            folder: "vmkube".to_owned(),
            resource_pool: "Resources".to_owned(),
            datastore: "datastore1".to_owned(),
        }
    }
}

impl Config {
    pub fn init() -> Result<Config> {
        dotenv::dotenv().ok();

        let defaults = Config::default();
        let mut config = Config {
            mongodb_uri: env_or("MONGODB_URI", &defaults.mongodb_uri),
            mongodb_database: env_or("MONGODB_DATABASE", &defaults.mongodb_database),
            port: env_parse("PORT", defaults.port)?,
            log_format: env_or("LOG_FORMAT", &defaults.log_format),
            sandbox: env_parse("VMKUBE_SANDBOX", defaults.sandbox)?,
            pipeline_url: env_or("PIPELINE_URL", &defaults.pipeline_url),
            platform_max_ram_mib: env_parse("PLATFORM_MAX_RAM_MIB", defaults.platform_max_ram_mib)?,
            master_ready_timeout_secs: env_parse(
                "MASTER_READY_TIMEOUT_SECS",
                defaults.master_ready_timeout_secs,
            )?,
            activity_workers: env_parse("ACTIVITY_WORKERS", defaults.activity_workers)?,
            schedule_to_start_secs: env_parse("ACTIVITY_SCHEDULE_TO_START_SECS", defaults.schedule_to_start_secs)?,
            start_to_close_secs: env_parse("ACTIVITY_START_TO_CLOSE_SECS", defaults.start_to_close_secs)?,
            schedule_to_close_secs: env_parse("ACTIVITY_SCHEDULE_TO_CLOSE_SECS", defaults.schedule_to_close_secs)?,
            max_attempts: env_parse("ACTIVITY_MAX_ATTEMPTS", defaults.max_attempts)?,
            initial_interval_ms: env_parse("ACTIVITY_INITIAL_INTERVAL_MS", defaults.initial_interval_ms)?,
            max_interval_ms: env_parse("ACTIVITY_MAX_INTERVAL_MS", defaults.max_interval_ms)?,
            backoff_coefficient: env_parse("ACTIVITY_BACKOFF_COEFFICIENT", defaults.backoff_coefficient)?,
            folder: env_or("VSPHERE_FOLDER", &defaults.folder),
            resource_pool: env_or("VSPHERE_RESOURCE_POOL", &defaults.resource_pool),
            datastore: env_or("VSPHERE_DATASTORE", &defaults.datastore),
        };

        if let Ok(path) = std::env::var("VMKUBE_CONFIG") {
            let raw = std::fs::read_to_string(&path)?;
            config.apply_yaml(&raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Override fields with the keys present in a YAML document
    pub fn apply_yaml(&mut self, raw: &str) -> Result<()> {
        let overlay: ConfigOverlay = serde_yaml::from_str(raw)?;

        macro_rules! overlay {
            ($($field:ident),*) => {
                $(if let Some(value) = overlay.$field {
                    self.$field = value;
                })*
            };
        }

        overlay!(
            mongodb_uri,
            mongodb_database,
            port,
            log_format,
            sandbox,
            pipeline_url,
            platform_max_ram_mib,
            master_ready_timeout_secs,
            activity_workers,
            schedule_to_start_secs,
            start_to_close_secs,
            schedule_to_close_secs,
            max_attempts,
            initial_interval_ms,
            max_interval_ms,
            backoff_coefficient,
            folder,
            resource_pool,
            datastore
        );
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.activity_workers == 0 {
            return Err(AppError::validation("activity_workers must be greater than 0"));
        }
        if self.platform_max_ram_mib == 0 {
            return Err(AppError::validation("platform_max_ram_mib must be greater than 0"));
        }
        if self.platform_max_ram_mib % 4 != 0 {
            return Err(AppError::validation("platform_max_ram_mib must be a multiple of 4"));
        }
        if self.max_attempts == 0 {
            return Err(AppError::validation("max_attempts must be greater than 0"));
        }
        Ok(())
    }

    pub fn activity_options(&self) -> ActivityOptions {
        ActivityOptions {
            schedule_to_start: Duration::from_secs(self.schedule_to_start_secs),
            start_to_close: Duration::from_secs(self.start_to_close_secs),
            schedule_to_close: Duration::from_secs(self.schedule_to_close_secs),
            retry_policy: RetryPolicy {
                max_attempts: self.max_attempts,
                initial_interval: Duration::from_millis(self.initial_interval_ms),
                max_interval: Duration::from_millis(self.max_interval_ms),
                backoff_coefficient: self.backoff_coefficient,
                use_jitter: true,
            },
        }
    }

    pub fn master_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.master_ready_timeout_secs)
    }

    /// Placement used for clusters that do not name their own
    pub fn default_placement(&self) -> Placement {
        Placement {
            folder: self.folder.clone(),
            resource_pool: self.resource_pool.clone(),
            datastore: self.datastore.clone(),
        }
    }
}
