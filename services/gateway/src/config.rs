//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Provider API keys are either inline (`api_key`) or read from the
//! environment variable named by `api_key_env`, which wins when set.

use common::Secret;
use failover::{FailoverPolicy, ProviderRecord};
use serde::Deserialize;
use std::collections::HashSet;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub failover: FailoverPolicy,
    #[serde(default)]
    pub providers: Vec<ProviderRecord>,
}

/// HTTP listener settings
///
/// `listen_addr` wins over `host` + `port` when both are present. `host` may
/// be an IP literal or a name; a name binds to its first resolved address.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: Option<SocketAddr>,
    pub host: String,
    pub port: u16,
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: None,
            host: "127.0.0.1".to_string(),
            port: 8888,
            max_connections: 1000,
        }
    }
}

impl ServerConfig {
    /// Address to bind. Always set once `Config::load` has succeeded.
    pub fn bind_addr(&self) -> SocketAddr {
        self.listen_addr
            .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], self.port)))
    }

    fn resolve_listen_addr(&mut self) -> common::Result<()> {
        if self.listen_addr.is_some() {
            return Ok(());
        }
        // IP literals parse directly; names go through the system resolver
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| {
                common::Error::Config(format!("server.host '{}' does not resolve: {e}", self.host))
            })?
            .next()
            .ok_or_else(|| {
                common::Error::Config(format!(
                    "server.host '{}' resolved to no addresses",
                    self.host
                ))
            })?;
        self.listen_addr = Some(addr);
        Ok(())
    }
}

impl Config {
    /// Load configuration from a TOML file (or JSON when the extension is
    /// `.json`), resolve provider keys from the environment, then validate.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = if is_json(path) {
            serde_json::from_str(&contents)?
        } else {
            toml::from_str(&contents)?
        };

        config.server.resolve_listen_addr()?;

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        let mut seen = HashSet::new();
        for provider in config.providers.iter_mut().filter(|p| p.enabled) {
            if provider.name.trim().is_empty() {
                return Err(common::Error::Config("provider name must not be empty".into()));
            }
            if !seen.insert(provider.name.clone()) {
                return Err(common::Error::Config(format!(
                    "duplicate provider name: {}",
                    provider.name
                )));
            }
            validate_provider(provider)?;
        }

        if seen.is_empty() {
            tracing::warn!("no enabled providers configured, every request will fail with 503");
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("gateway.toml")
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

fn validate_provider(provider: &mut ProviderRecord) -> common::Result<()> {
    if !provider.base_url.starts_with("http://") && !provider.base_url.starts_with("https://") {
        return Err(common::Error::Config(format!(
            "provider '{}': base_url must start with http:// or https://, got: {}",
            provider.name, provider.base_url
        )));
    }

    if provider.timeout_seconds == 0 {
        return Err(common::Error::Config(format!(
            "provider '{}': timeout_seconds must be greater than 0",
            provider.name
        )));
    }

    // Env var takes precedence over the inline key
    if let Some(ref var) = provider.api_key_env {
        match std::env::var(var) {
            Ok(key) if !key.trim().is_empty() => {
                provider.api_key = Secret::new(key.trim().to_owned());
            }
            _ if !provider.api_key.is_blank() => {}
            _ => {
                return Err(common::Error::Config(format!(
                    "provider '{}': environment variable {var} is not set and no api_key is configured",
                    provider.name
                )));
            }
        }
    }

    if provider.api_key.is_blank() {
        return Err(common::Error::Config(format!(
            "provider '{}': missing api_key",
            provider.name
        )));
    }

    Ok(())
}
