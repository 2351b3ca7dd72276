//! scalerd.toml configuration parser.
//!
//! The file is decoded into string-typed records first, then every scaler
//! is validated into a [`ScalerSpec`]. Invalid scalers are reported one by
//! one so a single bad policy does not keep the others from running.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;
use crate::error::{ConfigError, ConfigResult};
use crate::types::{ActionSpec, DelayType, ScalerSpec};

const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(15);
const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_LISTEN: &str = "0.0.0.0:8600";
const DEFAULT_NODE_ID: &str = "scalerd";
const DEFAULT_ACTION_METHOD: &str = "POST";
const DEFAULT_ACTION_DELAY: Duration = Duration::from_millis(100);
const DEFAULT_ACTION_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub backend: BackendConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default, rename = "scaler")]
    pub scalers: Vec<ScalerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the Prometheus-compatible query API.
    pub address: String,
    pub timeout: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub node_id: Option<String>,
    pub lease_ttl: Option<String>,
    /// Postgres database shared by every instance. Without it leases live
    /// in a local redb file and only this instance is coordinated.
    pub database_url: Option<String>,
    pub state_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpConfig {
    pub listen: Option<String>,
    pub action_timeout: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalerConfig {
    pub id: String,
    pub query: String,
    pub interval: String,
    pub duration: String,
    pub cooldown: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub actions: Vec<ActionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionConfig {
    pub url: String,
    pub method: Option<String>,
    pub delay: Option<String>,
    pub delay_type: Option<String>,
    pub attempts: Option<u32>,
}

fn default_active() -> bool {
    true
}

impl Config {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> ConfigResult<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Validate every scaler, returning the valid specs and one error per
    /// rejected scaler. Later duplicates of an id are rejected; ids are
    /// compared after trimming, as they are used.
    pub fn validate_scalers(&self) -> (Vec<ScalerSpec>, Vec<ConfigError>) {
        let mut seen = HashSet::new();
        let mut specs = Vec::new();
        let mut errors = Vec::new();

        for scaler in &self.scalers {
            let id = scaler.id.trim();
            if !id.is_empty() && !seen.insert(id.to_string()) {
                errors.push(ConfigError::DuplicateId(id.to_string()));
                continue;
            }
            match scaler.validate() {
                Ok(spec) => specs.push(spec),
                Err(e) => errors.push(e),
            }
        }

        (specs, errors)
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> ConfigResult<Duration> {
        setting_duration("backend.timeout", self.timeout.as_deref(), DEFAULT_BACKEND_TIMEOUT)
    }
}

impl ClusterConfig {
    pub fn node_id(&self) -> &str {
        self.node_id.as_deref().unwrap_or(DEFAULT_NODE_ID)
    }

    /// The shared lease database, if this instance runs in a cluster.
    pub fn database_url(&self) -> ConfigResult<Option<&str>> {
        let Some(url) = self.database_url.as_deref().map(str::trim) else {
            return Ok(None);
        };
        if !(url.starts_with("postgres://") || url.starts_with("postgresql://")) {
            return Err(ConfigError::InvalidSetting {
                field: "cluster.database_url",
                reason: "expected a postgres:// or postgresql:// URL".to_string(),
            });
        }
        Ok(Some(url))
    }

    pub fn lease_ttl(&self) -> ConfigResult<Duration> {
        let ttl = setting_duration("cluster.lease_ttl", self.lease_ttl.as_deref(), DEFAULT_LEASE_TTL)?;
        if ttl.is_zero() {
            return Err(ConfigError::InvalidSetting {
                field: "cluster.lease_ttl",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(ttl)
    }
}

impl HttpConfig {
    pub fn listen(&self) -> &str {
        self.listen.as_deref().unwrap_or(DEFAULT_LISTEN)
    }

    pub fn action_timeout(&self) -> ConfigResult<Duration> {
        setting_duration("http.action_timeout", self.action_timeout.as_deref(), DEFAULT_ACTION_TIMEOUT)
    }
}

fn setting_duration(field: &'static str, value: Option<&str>, default: Duration) -> ConfigResult<Duration> {
    match value {
        Some(v) => parse_duration(v).map_err(|e| ConfigError::InvalidSetting {
            field,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

impl ScalerConfig {
    /// Validate this record into a [`ScalerSpec`].
    pub fn validate(&self) -> ConfigResult<ScalerSpec> {
        let id = self.id.trim();
        if id.is_empty() {
            return Err(ConfigError::InvalidScaler {
                scaler: self.id.clone(),
                reason: "id must not be empty".to_string(),
            });
        }
        if self.query.trim().is_empty() {
            return Err(self.invalid("query must not be empty"));
        }

        let interval = self.parse_field("interval", &self.interval)?;
        if interval.is_zero() {
            return Err(self.invalid("interval must be greater than zero"));
        }
        let duration = self.parse_field("duration", &self.duration)?;
        let cooldown = self.parse_field("cooldown", &self.cooldown)?;

        if self.actions.is_empty() {
            return Err(self.invalid("at least one action is required"));
        }
        let actions = self
            .actions
            .iter()
            .enumerate()
            .map(|(index, action)| {
                action.validate().map_err(|reason| ConfigError::InvalidAction {
                    scaler: self.id.clone(),
                    index,
                    reason,
                })
            })
            .collect::<ConfigResult<Vec<_>>>()?;

        Ok(ScalerSpec {
            id: id.to_string(),
            query: self.query.clone(),
            interval,
            duration,
            cooldown,
            active: self.active,
            actions,
        })
    }

    fn parse_field(&self, field: &'static str, value: &str) -> ConfigResult<Duration> {
        parse_duration(value).map_err(|source| ConfigError::Duration {
            scaler: self.id.clone(),
            field,
            value: value.to_string(),
            source,
        })
    }

    fn invalid(&self, reason: &str) -> ConfigError {
        ConfigError::InvalidScaler {
            scaler: self.id.clone(),
            reason: reason.to_string(),
        }
    }
}

impl ActionConfig {
    fn validate(&self) -> Result<ActionSpec, String> {
        let uri: http::Uri = self
            .url
            .parse()
            .map_err(|e| format!("invalid url {:?}: {e}", self.url))?;
        match uri.scheme_str() {
            Some("http") | Some("https") => {}
            _ => return Err(format!("url {:?} must be an absolute http or https URL", self.url)),
        }
        if uri.host().is_none() {
            return Err(format!("url {:?} has no host", self.url));
        }

        let method_str = self.method.as_deref().unwrap_or(DEFAULT_ACTION_METHOD);
        let method = http::Method::from_bytes(method_str.trim().to_ascii_uppercase().as_bytes())
            .map_err(|_| format!("invalid method {method_str:?}"))?;

        let delay = match &self.delay {
            Some(d) => parse_duration(d).map_err(|e| format!("invalid delay {d:?}: {e}"))?,
            None => DEFAULT_ACTION_DELAY,
        };

        let delay_type = match &self.delay_type {
            Some(t) => t.parse::<DelayType>()?,
            None => DelayType::default(),
        };

        let attempts = self.attempts.unwrap_or(DEFAULT_ACTION_ATTEMPTS);
        if attempts == 0 {
            return Err("attempts must be at least 1".to_string());
        }

        Ok(ActionSpec {
            url: self.url.clone(),
            method,
            delay,
            delay_type,
            attempts,
        })
    }
}
