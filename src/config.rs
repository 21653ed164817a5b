use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    /// PostgreSQL connection URL for the durable ledger store.
    /// When absent, the runner falls back to the in-memory store.
    #[serde(default)]
    pub postgres_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PipelineSettings {
    /// Worker tasks pulling confirmation/reversal jobs.
    pub workers: usize,
    /// Retry budget per job.
    pub max_attempts: u32,
    /// Base delay for exponential backoff, in milliseconds.
    pub backoff_base_ms: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            max_attempts: 3,
            backoff_base_ms: 2000,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "logs".to_string(),
            log_file: "wallet_pipeline.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
            pipeline: PipelineSettings::default(),
            postgres_url: None,
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Self {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .unwrap_or_else(|_| panic!("Failed to read config file: {}", config_path));
        serde_yaml::from_str(&content).expect("Failed to parse config yaml")
    }
}
