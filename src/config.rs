//! Runtime configuration.
//!
//! Resolution order:
//! 1) `$MACRON_MONITOR_CONFIG` (TOML; must exist when set)
//! 2) `config/monitor.toml`
//! 3) built-in defaults
//!
//! Environment overrides are applied on top, then values are sanitized.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::alerts::DEFAULT_EDIT_SUMMARY;
use crate::articles::petscan::WPNZ_PETSCAN_QUERY;
use crate::detectors::{LinkPipePolicy, DEFAULT_ALERT_PAGE, DEFAULT_LINK_ALERT_PAGE};
use crate::retry::RetryPolicy;
use crate::stream::{DEFAULT_SERVER_NAME, DEFAULT_STREAM_URL};

pub const ENV_CONFIG_PATH: &str = "MACRON_MONITOR_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/monitor.toml";

pub const DEFAULT_WIKI_API_URL: &str = "https://en.wikipedia.org/w/api.php";
pub const DEFAULT_USER_AGENT: &str =
    "MacronMonitor/0.1 (https://en.wikipedia.org/wiki/User:MacronMonitor)";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub stream_url: String,
    pub server_name: String,
    pub wiki_api_url: String,
    /// OAuth 2 owner-only token; alerts cannot be written without it.
    pub access_token: Option<String>,
    pub user_agent: String,
    pub petscan_query_url: String,

    pub refresh_interval_secs: u64,
    pub http_timeout_secs: u64,
    pub initial_population_attempts: u32,
    pub retry_base_delay_ms: u64,

    pub word_alert_page: String,
    pub macron_alert_page: String,
    pub link_alert_page: String,
    pub link_pipe_policy: String,
    pub restrict_removed_to_articles: bool,
    pub edit_summary: String,

    pub metrics_addr: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            stream_url: DEFAULT_STREAM_URL.to_string(),
            server_name: DEFAULT_SERVER_NAME.to_string(),
            wiki_api_url: DEFAULT_WIKI_API_URL.to_string(),
            access_token: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            petscan_query_url: WPNZ_PETSCAN_QUERY.to_string(),
            refresh_interval_secs: 3600,
            http_timeout_secs: 30,
            initial_population_attempts: 5,
            retry_base_delay_ms: 500,
            word_alert_page: DEFAULT_ALERT_PAGE.to_string(),
            macron_alert_page: DEFAULT_ALERT_PAGE.to_string(),
            link_alert_page: DEFAULT_LINK_ALERT_PAGE.to_string(),
            link_pipe_policy: "fewer".to_string(),
            restrict_removed_to_articles: false,
            edit_summary: DEFAULT_EDIT_SUMMARY.to_string(),
            metrics_addr: "0.0.0.0:8420".to_string(),
        }
    }
}

impl MonitorConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(s).context("parsing monitor config")?;
        cfg.sanitized()
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// File (env path, default path, or nothing) plus environment overrides.
    pub fn load() -> Result<Self> {
        let base = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else {
            let default = PathBuf::from(DEFAULT_CONFIG_PATH);
            if default.exists() {
                Self::load_from(&default)?
            } else {
                Self::default()
            }
        };
        base.with_env_overrides()?.sanitized()
    }

    fn with_env_overrides(mut self) -> Result<Self> {
        let var = |k: &str| std::env::var(k).ok().filter(|v| !v.trim().is_empty());
        if let Some(v) = var("STREAM_URL") {
            self.stream_url = v;
        }
        if let Some(v) = var("WIKI_API_URL") {
            self.wiki_api_url = v;
        }
        if let Some(v) = var("WIKI_ACCESS_TOKEN") {
            self.access_token = Some(v);
        }
        if let Some(v) = var("PETSCAN_QUERY_URL") {
            self.petscan_query_url = v;
        }
        if let Some(v) = var("METRICS_ADDR") {
            self.metrics_addr = v;
        }
        if let Some(v) = var("LINK_PIPE_POLICY") {
            self.link_pipe_policy = v;
        }
        if let Some(v) = var("REFRESH_INTERVAL_SECS") {
            self.refresh_interval_secs = v
                .trim()
                .parse()
                .with_context(|| format!("REFRESH_INTERVAL_SECS={v}"))?;
        }
        if let Some(v) = var("HTTP_TIMEOUT_SECS") {
            self.http_timeout_secs = v
                .trim()
                .parse()
                .with_context(|| format!("HTTP_TIMEOUT_SECS={v}"))?;
        }
        Ok(self)
    }

    /// Lift zero durations/counts to 1 and reject values that cannot work.
    fn sanitized(mut self) -> Result<Self> {
        self.refresh_interval_secs = self.refresh_interval_secs.max(1);
        self.http_timeout_secs = self.http_timeout_secs.max(1);
        self.initial_population_attempts = self.initial_population_attempts.max(1);
        self.access_token = self.access_token.filter(|t| !t.trim().is_empty());
        self.link_pipe_policy()?;
        self.metrics_addr()?;
        Ok(self)
    }

    pub fn link_pipe_policy(&self) -> Result<LinkPipePolicy> {
        self.link_pipe_policy
            .parse()
            .map_err(|e| anyhow!("link_pipe_policy: {e}"))
    }

    pub fn metrics_addr(&self) -> Result<SocketAddr> {
        self.metrics_addr
            .parse()
            .with_context(|| format!("metrics_addr `{}`", self.metrics_addr))
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn population_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.initial_population_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
        )
    }

    pub fn request_retry(&self) -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(self.retry_base_delay_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs};

    const OVERRIDES: [&str; 8] = [
        "STREAM_URL",
        "WIKI_API_URL",
        "WIKI_ACCESS_TOKEN",
        "PETSCAN_QUERY_URL",
        "METRICS_ADDR",
        "REFRESH_INTERVAL_SECS",
        "HTTP_TIMEOUT_SECS",
        "LINK_PIPE_POLICY",
    ];

    fn clear_env() {
        env::remove_var(ENV_CONFIG_PATH);
        for k in OVERRIDES {
            env::remove_var(k);
        }
    }

    #[test]
    fn partial_toml_keeps_defaults_and_lifts_zeroes() {
        let cfg = MonitorConfig::from_toml_str(
            r#"
            server_name = "test.wikipedia.org"
            refresh_interval_secs = 0
            link_pipe_policy = "stripped"
            access_token = "  "
            "#,
        )
        .unwrap();
        assert_eq!(cfg.server_name, "test.wikipedia.org");
        assert_eq!(cfg.refresh_interval(), Duration::from_secs(1));
        assert_eq!(cfg.http_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.link_pipe_policy().unwrap(), LinkPipePolicy::Stripped);
        assert_eq!(cfg.access_token, None);
        assert_eq!(cfg.word_alert_page, DEFAULT_ALERT_PAGE);
        assert_eq!(cfg.link_alert_page, DEFAULT_LINK_ALERT_PAGE);
    }

    #[test]
    fn rejects_unknown_policy_and_bad_addr() {
        assert!(MonitorConfig::from_toml_str(r#"link_pipe_policy = "sometimes""#).is_err());
        assert!(MonitorConfig::from_toml_str(r#"metrics_addr = "nowhere""#).is_err());
    }

    #[serial_test::serial]
    #[test]
    fn load_uses_env_path_then_fallbacks_then_overrides() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();
        clear_env();

        // nothing on disk → defaults
        let cfg = MonitorConfig::load().unwrap();
        assert_eq!(cfg.stream_url, DEFAULT_STREAM_URL);
        assert_eq!(cfg.refresh_interval_secs, 3600);

        // config/monitor.toml is picked up
        fs::create_dir_all(tmp.path().join("config")).unwrap();
        fs::write(
            tmp.path().join(DEFAULT_CONFIG_PATH),
            "refresh_interval_secs = 60\n",
        )
        .unwrap();
        assert_eq!(MonitorConfig::load().unwrap().refresh_interval_secs, 60);

        // env path wins over the default file
        let custom = tmp.path().join("custom.toml");
        fs::write(&custom, "refresh_interval_secs = 120\n").unwrap();
        env::set_var(ENV_CONFIG_PATH, custom.display().to_string());
        assert_eq!(MonitorConfig::load().unwrap().refresh_interval_secs, 120);

        // variables override the file
        env::set_var("REFRESH_INTERVAL_SECS", "7");
        env::set_var("WIKI_ACCESS_TOKEN", "secret");
        let cfg = MonitorConfig::load().unwrap();
        assert_eq!(cfg.refresh_interval_secs, 7);
        assert_eq!(cfg.access_token.as_deref(), Some("secret"));

        env::set_var("REFRESH_INTERVAL_SECS", "soon");
        assert!(MonitorConfig::load().is_err());

        // missing env path is an error
        env::remove_var("REFRESH_INTERVAL_SECS");
        env::set_var(ENV_CONFIG_PATH, tmp.path().join("nope.toml").display().to_string());
        assert!(MonitorConfig::load().is_err());

        clear_env();
        env::set_current_dir(&old).unwrap();
    }
}
