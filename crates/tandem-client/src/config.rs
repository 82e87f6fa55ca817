//! Client configuration loaded from environment variables.
//!
//! Every setting has a default, so an embedding UI can start with zero
//! configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tandem_shared::constants::{
    MAX_IMAGE_SIZE, RECENT_CONVERSATION_LIMIT, UNREAD_RECOUNT_SECS, UNREAD_WINDOW_MS,
};

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// SQLite file backing the local cache and private key.
    /// Env: `TANDEM_DB_PATH`
    /// Default: platform data directory (see `Database::new`).
    pub db_path: Option<PathBuf>,

    /// Directory for uploaded attachments.
    /// Env: `TANDEM_BLOB_PATH`
    /// Default: `./blobs`
    pub blob_path: PathBuf,

    /// Public URL prefix under which attachments are served.
    /// Env: `TANDEM_BLOB_BASE_URL`
    /// Default: `http://localhost:8080/blobs`
    pub blob_base_url: String,

    /// How many recently touched conversations are tracked by the list and
    /// the unread badge.
    /// Env: `TANDEM_RECENT_CONVERSATIONS`
    /// Default: `20`
    pub recent_conversations: usize,

    /// Unread messages older than this stop counting toward the badge.
    /// Env: `TANDEM_UNREAD_WINDOW_HOURS`
    /// Default: `24`
    pub unread_window: Duration,

    /// Largest accepted image attachment.
    /// Env: `TANDEM_MAX_IMAGE_BYTES`
    /// Default: 8 MiB
    pub max_image_bytes: usize,

    /// How often the live unread badge re-evaluates the window without a
    /// remote change.
    /// Env: `TANDEM_UNREAD_RECOUNT_SECS`
    /// Default: `60`
    pub unread_recount: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            blob_path: PathBuf::from("./blobs"),
            blob_base_url: "http://localhost:8080/blobs".to_string(),
            recent_conversations: RECENT_CONVERSATION_LIMIT,
            unread_window: Duration::from_millis(UNREAD_WINDOW_MS as u64),
            max_image_bytes: MAX_IMAGE_SIZE,
            unread_recount: Duration::from_secs(UNREAD_RECOUNT_SECS),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup("TANDEM_DB_PATH") {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Some(path) = lookup("TANDEM_BLOB_PATH") {
            config.blob_path = PathBuf::from(path);
        }

        if let Some(url) = lookup("TANDEM_BLOB_BASE_URL") {
            config.blob_base_url = url;
        }

        if let Some(n) = parse_var::<usize>(&lookup, "TANDEM_RECENT_CONVERSATIONS") {
            if n == 0 {
                tracing::warn!("TANDEM_RECENT_CONVERSATIONS must be positive, using default");
            } else {
                config.recent_conversations = n;
            }
        }

        if let Some(hours) = parse_var::<u64>(&lookup, "TANDEM_UNREAD_WINDOW_HOURS") {
            config.unread_window = Duration::from_secs(hours * 60 * 60);
        }

        if let Some(bytes) = parse_var::<usize>(&lookup, "TANDEM_MAX_IMAGE_BYTES") {
            config.max_image_bytes = bytes;
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "TANDEM_UNREAD_RECOUNT_SECS") {
            if secs == 0 {
                tracing::warn!("TANDEM_UNREAD_RECOUNT_SECS must be positive, using default");
            } else {
                config.unread_recount = Duration::from_secs(secs);
            }
        }

        config
    }

    pub fn unread_window_ms(&self) -> i64 {
        self.unread_window.as_millis() as i64
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid value, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::from_lookup(|_| None);
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.recent_conversations, 20);
        assert_eq!(config.unread_window_ms(), 24 * 60 * 60 * 1000);
        assert_eq!(config.max_image_bytes, 8 * 1024 * 1024);
    }

    #[test]
    fn test_overrides() {
        let config = ClientConfig::from_lookup(lookup_from(&[
            ("TANDEM_DB_PATH", "/tmp/t.db"),
            ("TANDEM_RECENT_CONVERSATIONS", "5"),
            ("TANDEM_UNREAD_WINDOW_HOURS", "48"),
            ("TANDEM_MAX_IMAGE_BYTES", "1024"),
        ]));
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/t.db")));
        assert_eq!(config.recent_conversations, 5);
        assert_eq!(config.unread_window, Duration::from_secs(48 * 3600));
        assert_eq!(config.max_image_bytes, 1024);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = ClientConfig::from_lookup(lookup_from(&[
            ("TANDEM_RECENT_CONVERSATIONS", "0"),
            ("TANDEM_UNREAD_WINDOW_HOURS", "soon"),
            ("TANDEM_UNREAD_RECOUNT_SECS", "0"),
        ]));
        assert_eq!(config.recent_conversations, 20);
        assert_eq!(config.unread_window, ClientConfig::default().unread_window);
        assert_eq!(config.unread_recount, Duration::from_secs(60));
    }
}
