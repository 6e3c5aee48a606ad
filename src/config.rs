use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// Prefix of every environment variable the service reads.
const ENV_PREFIX: &str = "FYI_";

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Config {
    #[serde(default = "default_debug")]
    pub debug: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Shared secret expected in the webhook `token` field. Empty disables the check.
    #[serde(default)]
    pub token: String,
    /// Tags accepted in commands. Empty means any tag is accepted and none is required.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Base URL of the Grafana instance, e.g. `https://grafana.example.com`
    #[serde(default)]
    pub grafana_host: String,
    #[serde(default)]
    pub grafana_api_key: String,
    /// Display name attached to every reply
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_icon_url")]
    pub icon_url: String,
}

fn default_debug() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8888
}

fn default_username() -> String {
    "ForYourInformation".to_string()
}

fn default_icon_url() -> String {
    "https://avatars2.githubusercontent.com/u/757902?s=460&v=4".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: default_debug(),
            host: default_host(),
            port: default_port(),
            token: String::new(),
            tags: Vec::new(),
            grafana_host: String::new(),
            grafana_api_key: String::new(),
            username: default_username(),
            icon_url: default_icon_url(),
        }
    }
}

impl Config {
    /// Build the configuration from defaults, the optional TOML file and
    /// the `FYI_*` environment, then validate it.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Config::default(),
        };
        config.apply_env(prefixed_vars(std::env::vars_os())?)?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Override fields from `FYI_*` variables. Unrelated variables are ignored.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name {
                "DEBUG" => {
                    self.debug =
                        parse_bool(&value).with_context(|| format!("Invalid {key}: {value:?}"))?
                }
                "HOST" => self.host = value,
                "PORT" => {
                    self.port = value
                        .parse()
                        .with_context(|| format!("Invalid {key}: {value:?}"))?
                }
                "TOKEN" => self.token = value,
                "TAGS" => self.tags = split_tags(&value),
                "GRAFANA_HOST" => self.grafana_host = value,
                "GRAFANA_API_KEY" => self.grafana_api_key = value,
                "USERNAME" => self.username = value,
                "ICON_URL" | "ICONURL" => self.icon_url = value,
                _ => {}
            }
        }
        Ok(())
    }

    /// Checks that everything needed to reach Grafana is set.
    pub fn validate(&self) -> Result<()> {
        if self.grafana_host.is_empty() {
            bail!("must have a grafana url (FYI_GRAFANA_HOST)");
        }
        let url = reqwest::Url::parse(&self.grafana_host)
            .with_context(|| format!("Invalid grafana url: {}", self.grafana_host))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!(
                "grafana url must use http or https, got {}: {}",
                url.scheme(),
                self.grafana_host
            );
        }
        if self.grafana_api_key.is_empty() {
            bail!("must have a grafana api key (FYI_GRAFANA_API_KEY)");
        }
        Ok(())
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// `host:port` of the Grafana server, for reachability checks.
    /// Falls back to port 80 when the URL carries none and the scheme has no default.
    pub fn grafana_dial_address(&self) -> Option<String> {
        let url = reqwest::Url::parse(&self.grafana_host).ok()?;
        let host = url.host_str()?;
        let port = url.port_or_known_default().unwrap_or(80);
        Some(format!("{host}:{port}"))
    }

    /// Default tracing filter when `RUST_LOG` is not set.
    pub fn log_filter(&self) -> &'static str {
        if self.debug {
            "info,fyi=debug"
        } else {
            "info"
        }
    }
}

/// Keep the `FYI_*` variables. Anything else may hold arbitrary bytes and
/// is skipped; a non UTF-8 `FYI_*` value is an error.
fn prefixed_vars<I>(vars: I) -> Result<Vec<(String, String)>>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    let mut selected = Vec::new();
    for (key, value) in vars {
        let Some(key) = key.to_str() else {
            continue;
        };
        if !key.starts_with(ENV_PREFIX) {
            continue;
        }
        let value = value
            .into_string()
            .map_err(|_| anyhow!("{key} is not valid UTF-8"))?;
        selected.push((key.to_string(), value));
    }
    Ok(selected)
}

fn split_tags(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(value: &str) -> Result<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        other => bail!("expected a boolean, got {other:?}"),
    }
}

/// The active configuration, swappable at runtime.
///
/// Readers take a cheap `Arc` snapshot per request; a reload validates the
/// new configuration first and only then replaces the snapshot, so a bad
/// reload leaves the running configuration untouched.
pub struct ConfigStore {
    path: Option<PathBuf>,
    current: RwLock<Arc<Config>>,
}

impl ConfigStore {
    pub fn new(path: Option<PathBuf>, config: Config) -> Self {
        Self {
            path,
            current: RwLock::new(Arc::new(config)),
        }
    }

    pub fn current(&self) -> Arc<Config> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Re-read the file and environment and swap in the result.
    pub fn reload(&self) -> Result<Arc<Config>> {
        let fresh = Config::load(self.path.as_deref()).context("Configuration reload failed")?;
        self.replace(fresh)
    }

    pub fn replace(&self, config: Config) -> Result<Arc<Config>> {
        config.validate()?;
        let fresh = Arc::new(config);

        let mut current = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if current.listen_address() != fresh.listen_address() {
            warn!(
                "Listen address changed from {} to {}; restart to apply it",
                current.listen_address(),
                fresh.listen_address()
            );
        }
        *current = Arc::clone(&fresh);

        info!("Configuration reloaded");
        info!("  Grafana: {}", fresh.grafana_host);
        info!("  Tags: {:?}", fresh.tags);
        Ok(fresh)
    }
}

/// Reload the configuration every time the process receives SIGHUP.
#[cfg(unix)]
pub async fn reload_on_hangup(store: Arc<ConfigStore>) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangups =
        signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
    while hangups.recv().await.is_some() {
        info!("SIGHUP received, reloading configuration");
        if let Err(e) = store.reload() {
            warn!("Keeping previous configuration: {:#}", e);
        }
    }
    Ok(())
}
