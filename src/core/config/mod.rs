use anyhow::{bail, Context};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const ENV_PREFIX: &str = "LEARNPORTAL_";
pub const CONFIG_PATH_VAR: &str = "LEARNPORTAL_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "learnportal.toml";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub rewards: RewardsConfig,
    pub notifications: NotificationsConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Supabase,
    Memory,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Project URL, e.g. `https://<ref>.supabase.co`
    pub url: String,
    pub anon_key: String,
    pub assets_bucket: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Supabase,
            url: String::new(),
            anon_key: String::new(),
            assets_bucket: "assets".to_string(),
        }
    }
}

/// Point values handed out by the reconciler. Badge values live on the badge
/// registry itself.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardsConfig {
    pub module_points: u32,
    pub completion_points: u32,
}

impl Default for RewardsConfig {
    fn default() -> Self {
        Self {
            module_points: 10,
            completion_points: 100,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    pub poll_interval_seconds: u64,
    pub channel_capacity: usize,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 15,
            channel_capacity: 64,
        }
    }
}

impl AppConfig {
    /// Loads `.env`, then layers defaults, the TOML file and `LEARNPORTAL_*`
    /// environment variables (nested keys split on `__`).
    pub fn load() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let path = std::env::var(CONFIG_PATH_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));

        if path.exists() {
            debug!("Reading configuration from {}", path.display());
        } else {
            debug!("No configuration file at {}, using defaults and env", path.display());
        }

        Self::from_figment(Self::figment(path))
    }

    pub fn figment(path: PathBuf) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, anyhow::Error> {
        let config: AppConfig = figment
            .extract()
            .context("Failed to parse learnportal configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.backend.kind == BackendKind::Supabase {
            if self.backend.url.trim().is_empty() || self.backend.anon_key.trim().is_empty() {
                bail!(
                    "The backend service is not configured: set {ENV_PREFIX}BACKEND__URL and {ENV_PREFIX}BACKEND__ANON_KEY"
                );
            }
            if !self.backend.url.starts_with("http://") && !self.backend.url.starts_with("https://") {
                bail!("Backend url must be an http(s) URL, got {}", self.backend.url);
            }
        }
        if self.backend.assets_bucket.trim().is_empty() {
            bail!("backend.assets_bucket cannot be empty");
        }
        if self.notifications.poll_interval_seconds == 0 {
            bail!("notifications.poll_interval_seconds must be at least 1");
        }
        if self.notifications.channel_capacity == 0 {
            bail!("notifications.channel_capacity must be at least 1");
        }
        if self.rewards.module_points == 0 || self.rewards.completion_points == 0 {
            warn!("A reward value is set to zero; the matching award will be skipped");
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(toml: &str) -> Result<AppConfig, anyhow::Error> {
        AppConfig::from_figment(
            Figment::from(Serialized::defaults(AppConfig::default())).merge(Toml::string(toml)),
        )
    }

    #[test]
    fn test_defaults_require_backend_settings() {
        let err = from_toml("").unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }

    #[test]
    fn test_memory_backend_needs_no_credentials() {
        let config = from_toml("[backend]\nkind = \"memory\"\n").unwrap();
        assert_eq!(config.backend.kind, BackendKind::Memory);
        assert_eq!(config.rewards.module_points, 10);
        assert_eq!(config.rewards.completion_points, 100);
        assert_eq!(config.bind_address(), "127.0.0.1:8080");
    }

    #[test]
    fn test_supabase_backend_from_toml() {
        let config = from_toml(
            r#"
            [server]
            port = 9000

            [backend]
            kind = "supabase"
            url = "https://example.supabase.co"
            anon_key = "anon"

            [notifications]
            poll_interval_seconds = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.backend.assets_bucket, "assets");
        assert_eq!(config.notifications.poll_interval_seconds, 5);
    }

    #[test]
    fn test_rejects_zero_poll_interval() {
        let err = from_toml(
            "[backend]\nkind = \"memory\"\n[notifications]\npoll_interval_seconds = 0\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("poll_interval_seconds"));
    }

    #[test]
    fn test_rejects_non_http_url() {
        let err = from_toml("[backend]\nurl = \"ftp://x\"\nanon_key = \"k\"\n").unwrap_err();
        assert!(err.to_string().contains("http(s)"));
    }

    #[test]
    fn test_reads_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("learnportal.toml");
        std::fs::write(&path, "[backend]\nkind = \"memory\"\n[rewards]\nmodule_points = 5\n").unwrap();

        let figment = Figment::from(Serialized::defaults(AppConfig::default())).merge(Toml::file(path));
        let config = AppConfig::from_figment(figment).unwrap();
        assert_eq!(config.rewards.module_points, 5);
    }
}
