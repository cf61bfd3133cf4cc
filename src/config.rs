//! Configuration management for Ratewarden.
//!
//! Configuration is read once at startup and turned into explicit values
//! (a [`PolicySet`], store settings, server settings). Nothing downstream
//! reads the environment.
//!
//! Sources, lowest precedence first:
//! 1. built-in defaults
//! 2. an optional YAML file
//! 3. `RATEWARDEN__<SECTION>__<FIELD>` environment variables

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{Result, WardenError};
use crate::ratelimit::{parse_token_list, LimitPolicy, PolicySet};

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "RATEWARDEN";

/// Main configuration for the Ratewarden service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WardenConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Limit policies
    #[serde(default)]
    pub limiter: LimiterConfig,
}

/// What the HTTP layer does when the counter store fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreFailureMode {
    /// Respond 500 Internal Server Error
    #[default]
    ServerError,
    /// Fail closed: respond as if the request were rate limited
    Deny,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Request header carrying the caller's API token
    #[serde(default = "default_token_header")]
    pub token_header: String,

    /// Deadline for one admission check against the store, 0 for none
    #[serde(default)]
    pub store_timeout_ms: u64,

    /// Response policy on store failure
    #[serde(default)]
    pub on_store_error: StoreFailureMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            token_header: default_token_header(),
            store_timeout_ms: 0,
            on_store_error: StoreFailureMode::default(),
        }
    }
}

impl ServerConfig {
    pub fn store_timeout(&self) -> Option<Duration> {
        (self.store_timeout_ms > 0).then(|| Duration::from_millis(self.store_timeout_ms))
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_token_header() -> String {
    "API_KEY".to_string()
}

/// Which counter store implementation to run against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis connection URL, used by the `redis` backend
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Prefix for every Redis key
    #[serde(default)]
    pub key_prefix: String,

    /// How often the memory backend reclaims expired entries, 0 to disable
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_url: default_redis_url(),
            key_prefix: String::new(),
            sweep_interval_ms: default_sweep_interval(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379/0".to_string()
}

fn default_sweep_interval() -> u64 {
    1000
}

/// A single limit as written in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Requests allowed per one-second window
    pub requests_per_second: u64,
    /// Block duration after exceeding the limit
    pub block_duration_secs: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 5,
            block_duration_secs: 300,
        }
    }
}

impl From<PolicyConfig> for LimitPolicy {
    fn from(config: PolicyConfig) -> Self {
        LimitPolicy::per_second(config.requests_per_second, config.block_duration_secs)
    }
}

/// Limit policy configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Default policy, applied per caller address
    #[serde(default)]
    pub ip: PolicyConfig,

    /// Token value -> policy
    #[serde(default)]
    pub tokens: HashMap<String, PolicyConfig>,

    /// Compact `token:rps:block_secs,...` list merged over `tokens`
    #[serde(default)]
    pub token_list: Option<String>,
}

impl WardenConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration file");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| WardenError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load defaults, then the optional file, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env = config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true);
        Self::load_with_env(path, env)
    }

    fn load_with_env(path: Option<&Path>, env: config::Environment) -> Result<Self> {
        let mut loaded = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        // Token map keys stay case-sensitive because only scalar overrides
        // pass through the `config` crate, which lowercases keys.
        let overrides: EnvOverrides = config::Config::builder()
            .add_source(env)
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| WardenError::Config(format!("Invalid environment override: {}", e)))?;
        overrides.apply(&mut loaded);

        Ok(loaded)
    }

    /// Build the policy set the admission engine enforces.
    pub fn policies(&self) -> PolicySet {
        let limiter = &self.limiter;
        let mut policies = PolicySet::new(limiter.ip.into());

        for (token, policy) in &limiter.tokens {
            policies.tokens.insert(token.clone(), (*policy).into());
        }
        if let Some(list) = &limiter.token_list {
            policies.tokens.extend(parse_token_list(list));
        }

        if policies.ip.requests_per_window == 0 {
            warn!("Default address limit is 0; every request without a token will be denied");
        }
        for (token, policy) in &policies.tokens {
            if token.is_empty() {
                warn!("Ignoring policy configured for an empty token");
            } else if policy.requests_per_window == 0 {
                warn!(token = %token, "Token limit is 0; every request with it will be denied");
            }
        }
        policies.tokens.remove("");

        policies
    }
}

#[derive(Debug, Default, Deserialize)]
struct EnvOverrides {
    #[serde(default)]
    server: ServerOverrides,
    #[serde(default)]
    store: StoreOverrides,
    #[serde(default)]
    limiter: LimiterOverrides,
}

#[derive(Debug, Default, Deserialize)]
struct ServerOverrides {
    listen_addr: Option<SocketAddr>,
    token_header: Option<String>,
    store_timeout_ms: Option<u64>,
    on_store_error: Option<StoreFailureMode>,
}

#[derive(Debug, Default, Deserialize)]
struct StoreOverrides {
    backend: Option<StoreBackend>,
    redis_url: Option<String>,
    key_prefix: Option<String>,
    sweep_interval_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LimiterOverrides {
    #[serde(default)]
    ip: PolicyOverrides,
    token_list: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PolicyOverrides {
    requests_per_second: Option<u64>,
    block_duration_secs: Option<u64>,
}

fn set<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

impl EnvOverrides {
    fn apply(self, config: &mut WardenConfig) {
        let server = &mut config.server;
        set(&mut server.listen_addr, self.server.listen_addr);
        set(&mut server.token_header, self.server.token_header);
        set(&mut server.store_timeout_ms, self.server.store_timeout_ms);
        set(&mut server.on_store_error, self.server.on_store_error);

        let store = &mut config.store;
        set(&mut store.backend, self.store.backend);
        set(&mut store.redis_url, self.store.redis_url);
        set(&mut store.key_prefix, self.store.key_prefix);
        set(&mut store.sweep_interval_ms, self.store.sweep_interval_ms);

        let limiter = &mut config.limiter;
        set(&mut limiter.ip.requests_per_second, self.limiter.ip.requests_per_second);
        set(&mut limiter.ip.block_duration_secs, self.limiter.ip.block_duration_secs);
        if self.limiter.token_list.is_some() {
            limiter.token_list = self.limiter.token_list;
        }
    }
}
