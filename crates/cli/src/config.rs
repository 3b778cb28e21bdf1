//! Runtime settings: clap flags and `INFERWATCH_*` env vars over an optional
//! JSON file over built-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use inferwatch_netclient::{NetConfig, DEFAULT_CHAIN_API, DEFAULT_EMISSIONS_VERSION, DEFAULT_FORGE_BASE};
use inferwatch_sync::{MonitorConfig, SyncConfig};
use serde::Deserialize;

#[derive(Args, Debug, Default, Clone)]
pub struct Overrides {
    /// HTTP listen port
    #[arg(long, env = "INFERWATCH_PORT", global = true)]
    pub port: Option<u16>,
    /// Directory holding the SQLite database
    #[arg(long = "data-dir", env = "INFERWATCH_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,
    /// Chain REST endpoint
    #[arg(long = "chain-api", env = "INFERWATCH_CHAIN_API", global = true)]
    pub chain_api: Option<String>,
    /// Emissions module API version segment, e.g. v9
    #[arg(long = "emissions-version", env = "INFERWATCH_EMISSIONS_VERSION", global = true)]
    pub emissions_version: Option<String>,
    /// Forge site base URL (leaderboards and competitions)
    #[arg(long = "forge-base", env = "INFERWATCH_FORGE_BASE", global = true)]
    pub forge_base: Option<String>,
    #[arg(long = "http-timeout-secs", env = "INFERWATCH_HTTP_TIMEOUT_SECS", global = true)]
    pub http_timeout_secs: Option<u64>,
    #[arg(long = "topic-interval-secs", env = "INFERWATCH_TOPIC_INTERVAL_SECS", global = true)]
    pub topic_interval_secs: Option<u64>,
    #[arg(long = "competition-interval-secs", env = "INFERWATCH_COMPETITION_INTERVAL_SECS", global = true)]
    pub competition_interval_secs: Option<u64>,
    #[arg(long = "retention-days", env = "INFERWATCH_RETENTION_DAYS", global = true)]
    pub retention_days: Option<u64>,
    #[arg(long = "leaderboard-page-cap", env = "INFERWATCH_LEADERBOARD_PAGE_CAP", global = true)]
    pub leaderboard_page_cap: Option<usize>,
    /// Serialize concurrent refreshes of one topic (true/false)
    #[arg(long = "serialize-topic-refreshes", env = "INFERWATCH_SERIALIZE_TOPIC_REFRESHES", global = true)]
    pub serialize_topic_refreshes: Option<bool>,
    /// Comma-separated topics to track before the first competition pass
    #[arg(long = "topics", env = "INFERWATCH_TOPICS", value_delimiter = ',', global = true)]
    pub topics: Option<Vec<String>>,
}

/// Shape of the `--config` JSON file. Every field is optional.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub port: Option<u16>,
    pub data_dir: Option<PathBuf>,
    pub chain_api: Option<String>,
    pub emissions_version: Option<String>,
    pub forge_base: Option<String>,
    pub http_timeout_secs: Option<u64>,
    pub topic_interval_secs: Option<u64>,
    pub competition_interval_secs: Option<u64>,
    pub retention_days: Option<u64>,
    pub leaderboard_page_cap: Option<usize>,
    pub serialize_topic_refreshes: Option<bool>,
    pub topics: Option<Vec<String>>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub data_dir: PathBuf,
    pub net: NetConfig,
    pub sync: SyncConfig,
    pub monitor: MonitorConfig,
    pub topics: Vec<String>,
}

impl Settings {
    pub fn resolve(flags: Overrides, file: FileConfig) -> Self {
        let secs = |flag: Option<u64>, file: Option<u64>, default: u64| Duration::from_secs(flag.or(file).unwrap_or(default).max(1));
        Self {
            port: flags.port.or(file.port).unwrap_or(8080),
            data_dir: flags.data_dir.or(file.data_dir).unwrap_or_else(|| PathBuf::from("data")),
            net: NetConfig {
                chain_api: flags.chain_api.or(file.chain_api).unwrap_or_else(|| DEFAULT_CHAIN_API.to_string()),
                emissions_version: flags
                    .emissions_version
                    .or(file.emissions_version)
                    .unwrap_or_else(|| DEFAULT_EMISSIONS_VERSION.to_string()),
                forge_base: flags.forge_base.or(file.forge_base).unwrap_or_else(|| DEFAULT_FORGE_BASE.to_string()),
                timeout: secs(flags.http_timeout_secs, file.http_timeout_secs, 30),
            },
            sync: SyncConfig {
                topic_interval: secs(flags.topic_interval_secs, file.topic_interval_secs, 60),
                leaderboard_page_cap: flags.leaderboard_page_cap.or(file.leaderboard_page_cap).unwrap_or(100),
                serialize_topic_refreshes: flags.serialize_topic_refreshes.or(file.serialize_topic_refreshes).unwrap_or(true),
            },
            monitor: MonitorConfig {
                interval: secs(flags.competition_interval_secs, file.competition_interval_secs, 60 * 60),
                retention: Duration::from_secs(flags.retention_days.or(file.retention_days).unwrap_or(30) * 24 * 60 * 60),
            },
            topics: flags
                .topics
                .or(file.topics)
                .unwrap_or_default()
                .into_iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let s = Settings::resolve(Overrides::default(), FileConfig::default());
        assert_eq!(s.port, 8080);
        assert_eq!(s.data_dir, PathBuf::from("data"));
        assert_eq!(s.net.emissions_version, "v9");
        assert_eq!(s.net.timeout, Duration::from_secs(30));
        assert_eq!(s.sync.topic_interval, Duration::from_secs(60));
        assert_eq!(s.sync.leaderboard_page_cap, 100);
        assert!(s.sync.serialize_topic_refreshes);
        assert_eq!(s.monitor.interval, Duration::from_secs(3600));
        assert_eq!(s.monitor.retention, Duration::from_secs(30 * 86_400));
        assert!(s.topics.is_empty());
    }

    #[test]
    fn flags_win_over_file_values() {
        let file: FileConfig =
            serde_json::from_str(r#"{"port": 9000, "retention_days": 7, "topics": ["13", " "], "chain_api": "http://file"}"#).unwrap();
        let flags = Overrides { port: Some(9100), chain_api: None, ..Overrides::default() };
        let s = Settings::resolve(flags, file);
        assert_eq!(s.port, 9100);
        assert_eq!(s.net.chain_api, "http://file");
        assert_eq!(s.monitor.retention, Duration::from_secs(7 * 86_400));
        assert_eq!(s.topics, vec!["13".to_string()]);
    }

    #[test]
    fn unknown_file_keys_are_rejected() {
        assert!(serde_json::from_str::<FileConfig>(r#"{"prot": 1}"#).is_err());
    }
}
