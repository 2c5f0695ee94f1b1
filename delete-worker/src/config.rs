use delete_common::config::{CommaSeparated, EnvMsDuration, QueueConfig};
use envconfig::Envconfig;
use tracing::Level;

use crate::signal::DEFAULT_DATA_CATEGORIES;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3311")]
    pub port: u16,

    #[envconfig(default = "delete-worker")]
    pub worker_name: String,

    #[envconfig(default = "1000")]
    pub poll_interval: EnvMsDuration,

    /// Most items consumed from the pool per drain.
    #[envconfig(default = "32")]
    pub drain_batch_size: u32,

    #[envconfig(default = "5000")]
    pub request_timeout: EnvMsDuration,

    #[envconfig(default = "http://localhost:8080")]
    pub verifier_url: String,

    #[envconfig(default = "http://localhost:8081")]
    pub command_url: String,

    /// Data categories each delete is fanned out to. Empty means the default set.
    #[envconfig(default = "")]
    pub data_categories: CommaSeparated,

    #[envconfig(default = "info")]
    pub log_level: Level,

    #[envconfig(nested = true)]
    pub queue: QueueConfig,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn data_types(&self) -> Vec<String> {
        if self.data_categories.0.is_empty() {
            DEFAULT_DATA_CATEGORIES
                .iter()
                .map(|category| category.to_string())
                .collect()
        } else {
            self.data_categories.0.clone()
        }
    }
}
