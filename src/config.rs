//! Run configuration: an optional TOML file overridden by command-line flags.
//!
//! The config file is optional. A missing or empty file yields
//! `Config::default()`. Unknown keys are accepted but logged as warnings,
//! since they are most likely typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::feed::ParserKind;

/// Fixed aggregator endpoint fetched on every run.
pub const DEFAULT_AGGREGATOR_URL: &str =
    "https://momoyu.cc/api/hot/rss?code=MSw0NywyLDYsOTIsOSwzOCwyOSw0NSw4LDMyLDM2LDExLDgzLDQz";

/// Desktop browser user agent; several feed hosts refuse obvious bots.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Settings for one batch run.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory receiving `archive.json`, `latest-24h.json` and
    /// `source-status.json`.
    pub output_dir: PathBuf,

    /// Size of the rolling window, echoed in the latest payload.
    pub window_hours: u32,

    /// Archive retention in days.
    pub archive_days: u32,

    /// OPML subscription list. Unset or empty disables subscription feeds.
    pub rss_opml: Option<PathBuf>,

    /// Fetch at most this many subscription feeds (0 = all).
    pub rss_max_feeds: usize,

    /// Endpoint of the fixed aggregator feed.
    pub aggregator_url: String,

    /// Feed parser implementation.
    pub parser: ParserKind,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data"),
            window_hours: 24,
            archive_days: 7,
            rss_opml: None,
            rss_max_feeds: 0,
            aggregator_url: DEFAULT_AGGREGATOR_URL.to_string(),
            parser: ParserKind::default(),
            request_timeout_secs: 12,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Command-line flags that override the config file.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct CliOverrides {
    /// Directory for output JSON files
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Rolling window size in hours
    #[arg(long, value_name = "HOURS")]
    pub window_hours: Option<u32>,

    /// Keep archive records for N days
    #[arg(long, value_name = "DAYS")]
    pub archive_days: Option<u32>,

    /// OPML file listing RSS subscriptions
    #[arg(long, value_name = "FILE")]
    pub rss_opml: Option<PathBuf>,

    /// Fetch at most N subscription feeds (0 means all)
    #[arg(long, value_name = "N")]
    pub rss_max_feeds: Option<usize>,

    /// Feed parser implementation
    #[arg(long, value_enum)]
    pub parser: Option<ParserKind>,
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 9] = [
        "output_dir",
        "window_hours",
        "archive_days",
        "rss_opml",
        "rss_max_feeds",
        "aggregator_url",
        "parser",
        "request_timeout_secs",
        "user_agent",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check the size before reading so a huge file is never pulled into memory.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Applies command-line flags on top of the file/default values.
    pub fn apply_cli(&mut self, cli: &CliOverrides) {
        if let Some(dir) = &cli.output_dir {
            self.output_dir = dir.clone();
        }
        if let Some(hours) = cli.window_hours {
            self.window_hours = hours;
        }
        if let Some(days) = cli.archive_days {
            self.archive_days = days;
        }
        if let Some(opml) = &cli.rss_opml {
            self.rss_opml = Some(opml.clone());
        }
        if let Some(max) = cli.rss_max_feeds {
            self.rss_max_feeds = max;
        }
        if let Some(parser) = cli.parser {
            self.parser = parser;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.aggregator_url.trim().is_empty() {
            return Err(ConfigError::Invalid("aggregator_url must not be empty".to_string()));
        }
        Ok(())
    }

    /// The subscription list path with a leading `~` expanded, or `None` when
    /// subscription feeds are disabled.
    pub fn opml_path(&self) -> Option<PathBuf> {
        let path = self.rss_opml.as_deref()?;
        if path.as_os_str().is_empty() {
            return None;
        }
        Some(expand_home(path))
    }
}

fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(rest),
        None => path.to_path_buf(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.output_dir, PathBuf::from("data"));
        assert_eq!(config.window_hours, 24);
        assert_eq!(config.archive_days, 7);
        assert_eq!(config.rss_opml, None);
        assert_eq!(config.rss_max_feeds, 0);
        assert_eq!(config.parser, ParserKind::Structured);
        assert_eq!(config.request_timeout_secs, 12);
        assert!(config.user_agent.starts_with("Mozilla/5.0"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_empty_file_returns_default() {
        let (_dir, path) = write_config("   \n  \n  ");
        assert_eq!(Config::load(&path).unwrap(), Config::default());
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let (_dir, path) = write_config("archive_days = 3\nparser = \"xml\"\n");

        let config = Config::load(&path).unwrap();
        assert_eq!(config.archive_days, 3);
        assert_eq!(config.parser, ParserKind::Xml);
        assert_eq!(config.window_hours, 24);
    }

    #[test]
    fn test_full_config() {
        let (_dir, path) = write_config(
            r#"
output_dir = "out"
window_hours = 48
archive_days = 14
rss_opml = "subs.opml"
rss_max_feeds = 30
aggregator_url = "https://agg.example/rss"
parser = "structured"
request_timeout_secs = 5
user_agent = "custom"
"#,
        );

        let config = Config::load(&path).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert_eq!(config.window_hours, 48);
        assert_eq!(config.archive_days, 14);
        assert_eq!(config.rss_opml, Some(PathBuf::from("subs.opml")));
        assert_eq!(config.rss_max_feeds, 30);
        assert_eq!(config.aggregator_url, "https://agg.example/rss");
        assert_eq!(config.request_timeout_secs, 5);
        assert_eq!(config.user_agent, "custom");
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let (_dir, path) = write_config("this is not [valid toml");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let (_dir, path) = write_config("window_hours = 6\ntotally_fake_key = \"x\"\n");
        assert_eq!(Config::load(&path).unwrap().window_hours, 6);
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let (_dir, path) = write_config("window_hours = \"many\"\n");
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_unknown_parser_rejected() {
        let (_dir, path) = write_config("parser = \"regex\"\n");
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let (_dir, path) = write_config("request_timeout_secs = 0\n");
        assert!(matches!(Config::load(&path), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_too_large_file_rejected() {
        let (_dir, path) = write_config(&"a".repeat(1_048_577));
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_cli_overrides_file_values() {
        let mut config = Config {
            window_hours: 48,
            archive_days: 14,
            ..Config::default()
        };
        config.apply_cli(&CliOverrides {
            output_dir: Some(PathBuf::from("elsewhere")),
            archive_days: Some(2),
            rss_opml: Some(PathBuf::from("list.opml")),
            parser: Some(ParserKind::Xml),
            ..CliOverrides::default()
        });

        assert_eq!(config.output_dir, PathBuf::from("elsewhere"));
        assert_eq!(config.window_hours, 48);
        assert_eq!(config.archive_days, 2);
        assert_eq!(config.rss_opml, Some(PathBuf::from("list.opml")));
        assert_eq!(config.parser, ParserKind::Xml);
    }

    #[test]
    fn test_opml_path() {
        let mut config = Config::default();
        assert_eq!(config.opml_path(), None);

        config.rss_opml = Some(PathBuf::new());
        assert_eq!(config.opml_path(), None);

        config.rss_opml = Some(PathBuf::from("/abs/subs.opml"));
        assert_eq!(config.opml_path(), Some(PathBuf::from("/abs/subs.opml")));
    }
}
