use std::net::SocketAddr;
use std::time::Duration;

use delete_common::config::{EnvMsDuration, QueueConfig};
use envconfig::Envconfig;
use tracing::Level;

#[derive(Envconfig, Clone)]
pub struct Config {
    /// Run with an in-memory queue and dedup store instead of postgres and redis.
    #[envconfig(default = "false")]
    pub print_sink: bool,

    #[envconfig(default = "127.0.0.1:3310")]
    pub address: SocketAddr,

    #[envconfig(default = "redis://localhost:6379/")]
    pub redis_url: String,

    pub redis_key_prefix: Option<String>,

    #[envconfig(default = "500")]
    pub redis_timeout: EnvMsDuration,

    #[envconfig(default = "1440")]
    pub dedup_system_window_minutes: u64,

    #[envconfig(default = "60")]
    pub dedup_user_window_minutes: u64,

    /// Upper bound (exclusive) of the random delay applied to each ingested batch.
    #[envconfig(default = "1440")]
    pub max_visibility_minutes: u32,

    // Disabled when used as a library in tests, a global recorder can only be installed once.
    #[envconfig(default = "true")]
    pub export_prometheus: bool,

    #[envconfig(default = "info")]
    pub log_level: Level,

    #[envconfig(nested = true)]
    pub queue: QueueConfig,
}

impl Config {
    pub fn system_window(&self) -> Duration {
        Duration::from_secs(self.dedup_system_window_minutes * 60)
    }

    pub fn user_window(&self) -> Duration {
        Duration::from_secs(self.dedup_user_window_minutes * 60)
    }
}
