//! Provider records and the immutable registry built from them
//!
//! The registry is constructed once from the configured provider list and is
//! never mutated afterwards. Disabled records are dropped at construction and
//! cannot reappear. Declaration order is preserved: it is the tie-breaker for
//! equal priorities.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use common::Secret;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{FailoverError, Result};

/// Request/response convention spoken by an upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum Protocol {
    /// Messages API (`x-api-key` + `anthropic-version`). Records without a
    /// protocol field default to this.
    #[default]
    Anthropic,
    /// Chat completions API (`Authorization: Bearer`).
    OpenAi,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Anthropic => "anthropic",
            Protocol::OpenAi => "openai",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("anthropic") {
            Ok(Protocol::Anthropic)
        } else if s.eq_ignore_ascii_case("openai") {
            Ok(Protocol::OpenAi)
        } else {
            Err(format!(
                "unknown protocol '{s}' (expected 'anthropic' or 'openai')"
            ))
        }
    }
}

impl TryFrom<String> for Protocol {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

/// One configured upstream provider.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderRecord {
    pub name: String,
    #[serde(default)]
    pub protocol: Protocol,
    pub base_url: String,
    /// Filled from `api_key_env` by the config loader when that is set.
    #[serde(default)]
    pub api_key: Secret<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default)]
    pub models: HashMap<String, String>,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default = "default_timeout", alias = "timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// `Some(true)`: `base_url` is the complete endpoint. `Some(false)`: the
    /// target path is always appended. `None`: inferred from the URL shape.
    #[serde(default)]
    pub full_endpoint: Option<bool>,
}

fn default_priority() -> i64 {
    999
}

fn default_timeout() -> u64 {
    60
}

fn default_enabled() -> bool {
    true
}

impl ProviderRecord {
    /// Minimal enabled record with defaults for everything optional.
    pub fn new(
        name: impl Into<String>,
        protocol: Protocol,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            protocol,
            base_url: base_url.into(),
            api_key: Secret::new(api_key.into()),
            api_key_env: None,
            priority: default_priority(),
            models: HashMap::new(),
            default_model: None,
            timeout_seconds: default_timeout(),
            enabled: true,
            full_endpoint: None,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }
}

/// Enabled providers in declaration order, names unique.
#[derive(Debug, Default)]
pub struct Registry {
    providers: Vec<ProviderRecord>,
}

impl Registry {
    /// Build the registry, dropping disabled records.
    ///
    /// Fails if two enabled records share a name.
    pub fn new(records: Vec<ProviderRecord>) -> Result<Self> {
        let mut providers = Vec::with_capacity(records.len());
        let mut names = HashSet::new();

        for record in records {
            if !record.enabled {
                debug!(provider = %record.name, "skipping disabled provider");
                continue;
            }
            if !names.insert(record.name.clone()) {
                return Err(FailoverError::InvalidRegistry(format!(
                    "duplicate provider name: {}",
                    record.name
                )));
            }
            providers.push(record);
        }

        info!(
            providers = providers.len(),
            names = ?providers.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            "provider registry loaded"
        );
        Ok(Self { providers })
    }

    /// Providers in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &ProviderRecord> {
        self.providers.iter()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
