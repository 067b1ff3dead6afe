/*!
common/src/lib.rs

Shared configuration types and DB helper functions for newsbrief.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader that merges a default config file with an override file
- A helper to initialize an SQLite connection pool
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

/// Database configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the sqlite database file (e.g. "data/newsbrief.db")
    pub path: String,
}

/// Scheduler (daily run times) configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// List of UTC wall-clock times in "HH:MM" 24h format when a full run should start
    #[serde(default)]
    pub times: Vec<String>,
}

/// News search collector configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectorConfig {
    #[serde(default)]
    pub keywords: Vec<String>,
    pub display_per_keyword: Option<u32>,
    pub api_url: Option<String>,
    pub client_id_env: Option<String>,
    pub client_secret_env: Option<String>,
    pub timeout_seconds: Option<u64>,
}

impl CollectorConfig {
    pub fn display_per_keyword(&self) -> u32 {
        self.display_per_keyword.unwrap_or(30).clamp(1, 100)
    }
}

/// Remote LLM endpoint config (OpenAI-compatible)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteLlmConfig {
    pub api_url: Option<String>,
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_tokens: Option<usize>,
}

/// LLM top-level config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub adapter: Option<String>, // "remote", "none"
    /// Generation backend used for classification, scoring and summaries
    pub remote: Option<RemoteLlmConfig>,
    /// Embedding backend used for near-duplicate detection
    pub embedding: Option<RemoteLlmConfig>,
}

/// Duplicate detection settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DedupConfig {
    pub window_days: Option<i64>,
    pub similarity_threshold: Option<f32>,
}

impl DedupConfig {
    pub fn window_days(&self) -> i64 {
        self.window_days.unwrap_or(7)
    }

    pub fn similarity_threshold(&self) -> f32 {
        self.similarity_threshold.unwrap_or(0.85)
    }
}

/// Article analysis settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub batch_limit: Option<i64>,
    pub summary_chars: Option<usize>,
}

impl AnalysisConfig {
    pub fn batch_limit(&self) -> i64 {
        self.batch_limit.unwrap_or(100)
    }

    pub fn summary_chars(&self) -> usize {
        self.summary_chars.unwrap_or(200)
    }
}

/// Outbound mail settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryConfig {
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub username: Option<String>,
    pub password_env: Option<String>,
    pub from_address: Option<String>,
    pub sender_name: Option<String>,
    pub subject_prefix: Option<String>,
    pub top_n: Option<usize>,
    pub send_timeout_seconds: Option<u64>,
}

impl DeliveryConfig {
    pub fn top_n(&self) -> usize {
        self.top_n.unwrap_or(5)
    }

    pub fn send_timeout_seconds(&self) -> u64 {
        self.send_timeout_seconds.unwrap_or(30)
    }

    pub fn subject_prefix(&self) -> &str {
        self.subject_prefix.as_deref().unwrap_or("NewsBrief")
    }
}

/// Operator alert settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertConfig {
    pub enabled: Option<bool>,
    pub admin_email: Option<String>,
}

/// Recipient seeded from the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientConfig {
    pub email: String,
    pub name: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    pub llm: Option<LlmConfig>,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub recipients: Vec<RecipientConfig>,
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    ///
    /// Example:
    ///   let cfg = Config::from_file("config.toml").await?;
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(default_path: Option<&Path>, override_path: Option<&Path>) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        for path in [default_path, override_path].into_iter().flatten() {
            if !path.exists() {
                continue;
            }
            let data = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let val: toml::Value = toml::from_str(&data)
                .with_context(|| format!("Failed to parse configuration: {}", path.display()))?;
            merge_toml(&mut config_value, val);
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        Ok(cfg)
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Read a secret from the environment variable named in the config.
/// Empty values are treated as missing.
pub fn secret_from_env(var_name: Option<&str>) -> Option<String> {
    let name = var_name?;
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Initialize an SQLite connection pool.
///
/// Creates the parent directory if necessary and opens the DB in WAL mode.
/// Defaults are conservative for small hosts:
/// - max_connections: 5
/// - connection timeout default provided by `sqlx`
pub async fn init_db_pool(path: &str) -> Result<SqlitePool> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create DB parent directory: {}", parent.display())
            })?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to sqlite database at path: {}", path))?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn config_from_string_and_db_pool() {
        let toml = r#"
            [database]
            path = "data/test.db"

            [scheduler]
            times = ["08:00"]

            [collector]
            keywords = ["digital health", "diagnostics"]
            display_per_keyword = 500

            [[recipients]]
            email = "alice@example.com"
            name = "Alice"
        "#;

        let cfg: Config = toml::from_str(toml).expect("parse config");
        assert_eq!(cfg.scheduler.times.len(), 1);
        assert_eq!(cfg.collector.keywords.len(), 2);
        assert_eq!(cfg.collector.display_per_keyword(), 100);
        assert_eq!(cfg.dedup.window_days(), 7);
        assert!((cfg.dedup.similarity_threshold() - 0.85).abs() < f32::EPSILON);
        assert_eq!(cfg.delivery.top_n(), 5);
        assert_eq!(cfg.recipients[0].email, "alice@example.com");

        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("nested").join("newsbrief.db");
        let db_path_str = db_path.to_string_lossy().to_string();

        let pool = init_db_pool(&db_path_str).await.expect("init pool");
        let conn = pool.acquire().await.expect("acquire conn");
        drop(conn);
    }

    #[tokio::test]
    async fn override_file_takes_precedence() {
        let dir = tempfile::tempdir().expect("tempdir");
        let default_path = dir.path().join("config.default.toml");
        let override_path = dir.path().join("config.toml");

        tokio::fs::write(
            &default_path,
            "[database]\npath = \"data/default.db\"\n\n[dedup]\nwindow_days = 7\nsimilarity_threshold = 0.85\n",
        )
        .await
        .unwrap();
        tokio::fs::write(&override_path, "[dedup]\nwindow_days = 3\n")
            .await
            .unwrap();

        let cfg = Config::load_with_defaults(Some(&default_path), Some(&override_path))
            .await
            .expect("merged config");

        assert_eq!(cfg.database.path, "data/default.db");
        assert_eq!(cfg.dedup.window_days(), 3);
        assert!((cfg.dedup.similarity_threshold() - 0.85).abs() < f32::EPSILON);
    }

    #[test]
    fn empty_secret_is_missing() {
        std::env::set_var("NEWSBRIEF_TEST_EMPTY_SECRET", "  ");
        assert!(secret_from_env(Some("NEWSBRIEF_TEST_EMPTY_SECRET")).is_none());
        assert!(secret_from_env(None).is_none());
    }
}
