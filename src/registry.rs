//! Server registry: per-server connection settings and the default server.
//!
//! Entries come from `servers.json`, an object keyed by server id. Keys that
//! start with `_` are documentation and ignored; entries missing one of
//! `name`, `host`, `port` or `password` are reported and skipped. Unknown
//! fields are kept as metadata and written back unchanged.
//!
//! Environment overrides (`RCON_PASSWORD_<ID>`, `RCON_HOST_<ID>`,
//! `RCON_PORT_<ID>`, with the id upper-cased and `-` mapped to `_`) are applied
//! when an [`Endpoint`] is resolved. They never reach the persisted document.

use std::collections::BTreeMap;
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ConfigError, GatewayError, RegistryError};
use crate::logutil::redact;
use crate::rcon::Endpoint;
use crate::validation::validate_server_id;

const REQUIRED_FIELDS: [&str; 4] = ["name", "host", "port", "password"];

/// Upper bound for `connection_timeout`, in seconds.
pub const MAX_CONNECTION_TIMEOUT_SECS: u64 = 600;

fn default_enabled() -> bool {
    true
}

fn default_connection_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(skip)]
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub default: bool,
    /// Inner timeout in seconds.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
    #[serde(flatten)]
    pub metadata: BTreeMap<String, Value>,
}

impl ServerConfig {
    /// Parse one `servers.json` entry.
    pub fn from_value(id: &str, value: &Value) -> Result<Self, ConfigError> {
        let obj = value
            .as_object()
            .ok_or_else(|| ConfigError::NotAnObject(id.to_string()))?;
        for field in REQUIRED_FIELDS {
            if !obj.contains_key(field) {
                return Err(ConfigError::MissingField {
                    server: id.to_string(),
                    field,
                });
            }
        }
        validate_server_id(id).map_err(|reason| ConfigError::InvalidField {
            server: id.to_string(),
            field: "id",
            reason,
        })?;
        let mut cfg: ServerConfig =
            serde_json::from_value(value.clone()).map_err(|e| ConfigError::InvalidField {
                server: id.to_string(),
                field: "entry",
                reason: e.to_string(),
            })?;
        if !(1..=MAX_CONNECTION_TIMEOUT_SECS).contains(&cfg.connection_timeout) {
            return Err(ConfigError::InvalidField {
                server: id.to_string(),
                field: "connection_timeout",
                reason: format!("must be between 1 and {} seconds", MAX_CONNECTION_TIMEOUT_SECS),
            });
        }
        cfg.id = id.to_string();
        Ok(cfg)
    }

    pub fn inner_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout)
    }
}

/// Per-server values taken from the environment at load time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct EnvOverride {
    password: Option<String>,
    host: Option<String>,
    port: Option<u16>,
}

impl EnvOverride {
    fn lookup(id: &str, env: &dyn Fn(&str) -> Option<String>) -> Self {
        let suffix = id.to_ascii_uppercase().replace('-', "_");
        let nonempty = |key: String| env(&key).filter(|v| !v.trim().is_empty());
        let port = nonempty(format!("RCON_PORT_{}", suffix)).and_then(|p| match p.trim().parse::<u16>() {
            Ok(port) => Some(port),
            Err(_) => {
                warn!("ignoring RCON_PORT_{}: '{}' is not a port number", suffix, p);
                None
            }
        });
        Self {
            password: nonempty(format!("RCON_PASSWORD_{}", suffix)),
            host: nonempty(format!("RCON_HOST_{}", suffix)),
            port,
        }
    }

    fn is_empty(&self) -> bool {
        self.password.is_none() && self.host.is_none() && self.port.is_none()
    }
}

#[derive(Debug, Default)]
pub struct ServerRegistry {
    servers: BTreeMap<String, ServerConfig>,
    overrides: BTreeMap<String, EnvOverride>,
    default_id: Option<String>,
}

impl ServerRegistry {
    /// Build from the raw `servers.json` document. Invalid entries are returned
    /// alongside the registry so the caller can report them.
    pub fn from_document(
        doc: &serde_json::Map<String, Value>,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> (Self, Vec<ConfigError>) {
        let mut servers = BTreeMap::new();
        let mut overrides = BTreeMap::new();
        let mut errors = Vec::new();
        for (id, value) in doc {
            if id.starts_with('_') {
                continue;
            }
            match ServerConfig::from_value(id, value) {
                Ok(cfg) => {
                    let ov = EnvOverride::lookup(id, env);
                    if !ov.is_empty() {
                        info!("server {}: connection settings overridden from environment", id);
                        overrides.insert(id.clone(), ov);
                    }
                    info!(
                        "loaded server {} ({}) at {}:{}, password {}",
                        id,
                        cfg.name,
                        cfg.host,
                        cfg.port,
                        redact(&cfg.password)
                    );
                    servers.insert(id.clone(), cfg);
                }
                Err(ConfigError::NotAnObject(_)) => {}
                Err(e) => {
                    warn!("skipping server entry: {}", e);
                    errors.push(e);
                }
            }
        }
        let mut reg = Self {
            servers,
            overrides,
            default_id: None,
        };
        reg.resolve_default();
        (reg, errors)
    }

    /// First enabled server flagged default, in id order; otherwise the first enabled server.
    fn resolve_default(&mut self) {
        let flagged: Vec<&str> = self
            .servers
            .values()
            .filter(|s| s.enabled && s.default)
            .map(|s| s.id.as_str())
            .collect();
        if flagged.len() > 1 {
            warn!(
                "{} servers are flagged default ({}); using {}",
                flagged.len(),
                flagged.join(", "),
                flagged[0]
            );
        }
        self.default_id = flagged
            .first()
            .map(|s| s.to_string())
            .or_else(|| {
                self.servers
                    .values()
                    .find(|s| s.enabled)
                    .map(|s| s.id.clone())
            });
        // Keep the persisted flags consistent with the resolution.
        let chosen = self.default_id.clone();
        for s in self.servers.values_mut() {
            s.default = chosen.as_deref() == Some(s.id.as_str());
        }
        match &self.default_id {
            Some(id) => info!("default server: {}", id),
            None => warn!("no enabled servers configured"),
        }
    }

    pub fn get(&self, id: &str) -> Option<&ServerConfig> {
        self.servers.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServerConfig> {
        self.servers.values()
    }

    /// Enabled server ids in ascending order.
    pub fn enabled_ids(&self) -> Vec<String> {
        self.servers
            .values()
            .filter(|s| s.enabled)
            .map(|s| s.id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn enabled_count(&self) -> usize {
        self.servers.values().filter(|s| s.enabled).count()
    }

    pub fn default_server(&self) -> Option<&str> {
        self.default_id.as_deref()
    }

    /// Designate a new default. Unknown and disabled servers are rejected.
    pub fn set_default(&mut self, id: &str) -> Result<(), RegistryError> {
        match self.servers.get(id) {
            None => return Err(RegistryError::UnknownServer(id.to_string())),
            Some(s) if !s.enabled => return Err(RegistryError::DisabledServer(id.to_string())),
            Some(_) => {}
        }
        for s in self.servers.values_mut() {
            s.default = s.id == id;
        }
        self.default_id = Some(id.to_string());
        Ok(())
    }

    /// Resolve connection details for an enabled server, environment overrides applied.
    pub fn endpoint(&self, id: &str) -> Result<Endpoint, GatewayError> {
        let cfg = self
            .servers
            .get(id)
            .filter(|s| s.enabled)
            .ok_or_else(|| GatewayError::Disabled(id.to_string()))?;
        let ov = self.overrides.get(id).cloned().unwrap_or_default();
        Ok(Endpoint {
            server_id: cfg.id.clone(),
            host: ov.host.unwrap_or_else(|| cfg.host.clone()),
            port: ov.port.unwrap_or(cfg.port),
            password: ov.password.unwrap_or_else(|| cfg.password.clone()),
            timeout: cfg.inner_timeout(),
        })
    }

    /// The document written back to `servers.json` (file values, no overrides).
    pub fn to_document(&self) -> BTreeMap<String, ServerConfig> {
        self.servers.clone()
    }
}
