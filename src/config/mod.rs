use crate::inject::{ArgName, ArgSet, NEXT, SignatureCache};
use crate::middleware::CONTEXT;
use crate::routing::ConverterRegistry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::sync::Arc;

/// Prefix of the environment variables read by [`ConfigService::from_env`].
pub const ENV_PREFIX: &str = "WEFT_";

/// Builtin argument names, always available to every stage.
pub const BUILTINS: [&str; 6] = ["request", "_route", "_application", "_dispatch_state", NEXT, CONTEXT];

/// Key/value configuration store
#[derive(Clone, Default)]
pub struct ConfigService {
    config: Arc<DashMap<String, String>>,
}

impl ConfigService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `WEFT_*` environment variable, keyed without the prefix
    /// and lowercased (`WEFT_PORT` becomes `port`).
    pub fn from_env() -> Self {
        let service = Self::default();
        for (key, value) in env::vars() {
            if let Some(key) = key.strip_prefix(ENV_PREFIX) {
                service.set(&key.to_ascii_lowercase(), &value);
            }
        }
        service
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.config.get(key).map(|v| v.clone())
    }

    pub fn set(&self, key: &str, value: &str) {
        self.config.insert(key.to_string(), value.to_string());
    }

    /// Parse `key`, falling back to `default` when absent or malformed.
    pub fn get_or<T: FromStr>(&self, key: &str, default: T) -> T {
        match self.get(key) {
            None => default,
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!(key, value = %raw, "ignoring malformed config value");
                default
            }),
        }
    }
}

/// Where and how the HTTP adapter listens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub debug: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            debug: false,
        }
    }
}

impl ServerConfig {
    pub fn from_config(config: &ConfigService) -> Self {
        let defaults = Self::default();
        Self {
            host: config.get("host").unwrap_or(defaults.host),
            port: config.get_or("port", defaults.port),
            debug: config.get_or("debug", defaults.debug),
        }
    }

    pub fn from_env() -> Self {
        Self::from_config(&ConfigService::from_env())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Everything the binder consults besides the routes themselves.
///
/// Owned per application, so two applications in one process can use
/// different converters without seeing each other's.
pub struct BindConfig {
    pub converters: ConverterRegistry,
    pub signatures: SignatureCache,
    builtins: ArgSet,
}

impl Default for BindConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl BindConfig {
    pub fn new() -> Self {
        Self {
            converters: ConverterRegistry::default(),
            signatures: SignatureCache::new(),
            builtins: BUILTINS.iter().map(|n| ArgName::from(*n)).collect(),
        }
    }

    pub fn with_converters(converters: ConverterRegistry) -> Self {
        Self {
            converters,
            ..Self::new()
        }
    }

    pub fn builtins(&self) -> &ArgSet {
        &self.builtins
    }

    /// Names no resource, capture or middleware may provide.
    pub fn is_reserved(&self, name: &str) -> bool {
        name == NEXT || name == CONTEXT
    }
}

impl std::fmt::Debug for BindConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindConfig")
            .field("converters", &self.converters)
            .field("builtins", &self.builtins)
            .field("cached_signatures", &self.signatures.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_from_values() {
        let config = ConfigService::new();
        config.set("host", "0.0.0.0");
        config.set("port", "9000");
        config.set("debug", "true");

        let server = ServerConfig::from_config(&config);
        assert_eq!(server.addr(), "0.0.0.0:9000");
        assert!(server.debug);
    }

    #[test]
    fn test_malformed_values_fall_back() {
        let config = ConfigService::new();
        config.set("port", "not-a-port");
        assert_eq!(ServerConfig::from_config(&config), ServerConfig::default());
    }

    #[test]
    fn test_server_config_from_json() {
        let server: ServerConfig = serde_json::from_str(r#"{"port": 3000}"#).unwrap();
        assert_eq!(server.addr(), "127.0.0.1:3000");
        assert!(!server.debug);
    }

    #[test]
    fn test_bind_config_builtins() {
        let config = BindConfig::new();
        assert!(config.builtins().contains("request"));
        assert!(config.builtins().contains("_dispatch_state"));
        assert!(config.is_reserved("context"));
        assert!(!config.is_reserved("request"));
        assert!(config.converters.get("int").is_some());
    }
}
