//! Optional `board.toml` configuration. Every key has a default.
//!
//! ```toml
//! data_file = "board.json"
//! log_filter = "makerspace_board=info"
//!
//! [notify]
//! webhook_url = "https://chat.example.org/hooks/volunteers"
//! timeout_ms = 5000
//!
//! [feed]
//! capacity = 256
//! poll_interval_ms = 1000
//! retry_delay_ms = 500
//! ```

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BoardError, Result};
use crate::notify::{Dispatcher, LogNotifier, Notifier, WebhookNotifier};
use crate::store::local::DEFAULT_FEED_CAPACITY;

pub const DATA_DIR_NAME: &str = ".makerspace";
pub const DATA_FILE_NAME: &str = "board.json";
pub const CONFIG_FILE_NAME: &str = "board.toml";

/// `$HOME/.makerspace`, or `./.makerspace` when `HOME` is unset.
pub fn default_dir() -> PathBuf {
    let home = std::env::var_os("HOME").map_or_else(|| PathBuf::from("."), PathBuf::from);
    home.join(DATA_DIR_NAME)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BoardConfig {
    /// Data file; relative paths are taken from the config file's directory.
    pub data_file: Option<PathBuf>,
    /// Tracing filter used when `RUST_LOG` is unset.
    pub log_filter: Option<String>,
    pub notify: NotifyConfig,
    pub feed: FeedConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NotifyConfig {
    /// Chat webhook. Announcements are only logged when unset.
    pub webhook_url: Option<String>,
    pub timeout_ms: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        NotifyConfig {
            webhook_url: None,
            timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeedConfig {
    /// Buffered change events per collection before a slow view lags.
    pub capacity: usize,
    /// How often `watch` checks the data file for writes from other processes.
    pub poll_interval_ms: u64,
    /// Pause between failed view refreshes.
    pub retry_delay_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        FeedConfig {
            capacity: DEFAULT_FEED_CAPACITY,
            poll_interval_ms: 1_000,
            retry_delay_ms: 500,
        }
    }
}

impl BoardConfig {
    /// Load `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(BoardError::config(format!("reading {}: {e}", path.display()), None)),
        };
        Self::parse(&text).map_err(|e| match e {
            BoardError::Config { message, source } => {
                BoardError::config(format!("{}: {message}", path.display()), source)
            }
            other => other,
        })
    }

    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| BoardError::config(e.message().to_string(), Some(e)))
    }

    /// The data file to open, given the directory the config was found in.
    pub fn data_file(&self, dir: &Path) -> PathBuf {
        match &self.data_file {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => dir.join(path),
            None => dir.join(DATA_FILE_NAME),
        }
    }
}

impl NotifyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// A dispatcher posting to the webhook if one is configured, logging otherwise.
    pub fn dispatcher(&self) -> Result<Dispatcher> {
        let notifier: Arc<dyn Notifier> = match &self.webhook_url {
            Some(url) => Arc::new(WebhookNotifier::new(url.clone(), self.timeout())?),
            None => Arc::new(LogNotifier),
        };
        Ok(Dispatcher::new(notifier, self.timeout()))
    }
}

impl FeedConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_file_gives_defaults() {
        let config = BoardConfig::parse("").unwrap();
        assert_eq!(config, BoardConfig::default());
        assert_eq!(config.notify.timeout(), Duration::from_secs(5));
        assert_eq!(config.feed.capacity, 256);
        assert_eq!(config.feed.retry_delay(), Duration::from_millis(500));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = BoardConfig::parse(
            r#"
            log_filter = "debug"

            [notify]
            webhook_url = "https://chat.example.org/hook"

            [feed]
            poll_interval_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.log_filter.as_deref(), Some("debug"));
        assert_eq!(config.notify.webhook_url.as_deref(), Some("https://chat.example.org/hook"));
        assert_eq!(config.notify.timeout_ms, 5_000);
        assert_eq!(config.feed.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.feed.capacity, 256);
    }

    #[test]
    fn unknown_keys_and_bad_types_are_errors() {
        assert!(matches!(BoardConfig::parse("colour = \"red\""), Err(BoardError::Config { .. })));
        assert!(matches!(
            BoardConfig::parse("[feed]\ncapacity = \"lots\""),
            Err(BoardError::Config { source: Some(_), .. })
        ));
    }

    #[test]
    fn data_file_resolves_against_config_dir() {
        let dir = Path::new("/srv/board");
        assert_eq!(BoardConfig::default().data_file(dir), dir.join("board.json"));

        let relative = BoardConfig {
            data_file: Some("spring.json".into()),
            ..BoardConfig::default()
        };
        assert_eq!(relative.data_file(dir), dir.join("spring.json"));

        let absolute = BoardConfig {
            data_file: Some("/tmp/other.json".into()),
            ..BoardConfig::default()
        };
        assert_eq!(absolute.data_file(dir), PathBuf::from("/tmp/other.json"));
    }

    #[test]
    fn load_reads_file_and_tolerates_absence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        assert_eq!(BoardConfig::load(&path).unwrap(), BoardConfig::default());

        fs::write(&path, "[notify]\ntimeout_ms = 100\n").unwrap();
        assert_eq!(BoardConfig::load(&path).unwrap().notify.timeout_ms, 100);

        fs::write(&path, "[notify\n").unwrap();
        let err = BoardConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("board.toml"));
    }

    #[test]
    fn webhook_config_builds_a_dispatcher() {
        let notify = NotifyConfig {
            webhook_url: Some("http://127.0.0.1:9/hook".into()),
            timeout_ms: 50,
        };
        assert!(notify.dispatcher().is_ok());
        assert!(NotifyConfig::default().dispatcher().is_ok());
    }
}
