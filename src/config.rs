//! Configuration resolution for the rate limiter.
//!
//! A [`LimiterConfig`] is built once per middleware instance by merging
//! explicitly supplied options, environment variables, and built-in
//! defaults. The environment is read through an [`EnvSnapshot`] taken at
//! resolution time, so resolution is deterministic and testable with an
//! injected mapping.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, TurnpikeError};
use crate::response::{DefaultResponseWriter, ResponseWriter};
use crate::storage::{MemoryStorageAdapter, RedisStorageAdapter, StorageAdapter};

const ENV_IP_MAX_REQUESTS: &str = "RATE_LIMITER_IP_MAX_REQUESTS";
const ENV_IP_BLOCK_TIME: &str = "RATE_LIMITER_IP_BLOCK_TIME";
const ENV_TOKEN_MAX_REQUESTS: &str = "RATE_LIMITER_TOKEN_MAX_REQUESTS";
const ENV_TOKEN_BLOCK_TIME: &str = "RATE_LIMITER_TOKEN_BLOCK_TIME";
const ENV_DEBUG: &str = "RATE_LIMITER_DEBUG";
const ENV_USE_REDIS: &str = "RATE_LIMITER_USE_REDIS";
const ENV_REDIS_ADDRESS: &str = "RATE_LIMITER_REDIS_ADDRESS";
const ENV_REDIS_PASSWORD: &str = "RATE_LIMITER_REDIS_PASSWORD";
const ENV_REDIS_DB: &str = "RATE_LIMITER_REDIS_DB";

/// Pattern matched against environment variable names to discover
/// per-token overrides.
const TOKEN_OVERRIDE_PATTERN: &str = "^RATE_LIMITER_TOKEN_(.*)_(MAX_REQUESTS|BLOCK_TIME)$";

/// One quota policy: how many requests fit in the rolling one-second
/// window, and how long an identity is locked out after exceeding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateConfig {
    pub max_requests_per_second: i64,
    pub block_time_ms: i64,
}

impl RateConfig {
    pub fn new(max_requests_per_second: i64, block_time_ms: i64) -> Self {
        Self {
            max_requests_per_second,
            block_time_ms,
        }
    }
}

fn default_ip_rate() -> RateConfig {
    RateConfig::new(100, 1_000)
}

fn default_token_rate() -> RateConfig {
    RateConfig::new(200, 500)
}

/// Immutable snapshot of the environment taken at resolution time.
///
/// An unset variable, an empty value, and an unparseable value all count
/// as absent, falling through to the next precedence level.
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    /// Capture the live process environment.
    pub fn from_process() -> Self {
        std::env::vars().collect()
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get_string(key)? {
            "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
            "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
            _ => None,
        }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get_string(key)?.parse().ok()
    }

    fn keys(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EnvSnapshot {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Partially-filled limiter configuration supplied by the caller.
///
/// Every unset field falls back to an environment override (unless
/// `disable_env` is set) and then to the built-in default. Custom-token
/// values may be `None`, in which case the token inherits the resolved
/// default token policy.
#[derive(Default)]
pub struct LimiterOptions {
    pub ip: Option<RateConfig>,
    pub token: Option<RateConfig>,
    pub custom_tokens: HashMap<String, Option<RateConfig>>,
    pub storage: Option<Arc<dyn StorageAdapter>>,
    pub response_writer: Option<Arc<dyn ResponseWriter>>,
    pub debug: bool,
    pub disable_env: bool,
}

/// Fully-resolved limiter configuration.
///
/// Built once, then shared read-only across all concurrent requests for
/// the lifetime of the middleware.
pub struct LimiterConfig {
    pub ip: RateConfig,
    pub token: RateConfig,
    pub custom_tokens: HashMap<String, RateConfig>,
    pub storage: Arc<dyn StorageAdapter>,
    pub response_writer: Arc<dyn ResponseWriter>,
    pub debug: bool,
}

impl LimiterConfig {
    /// Resolve a full configuration from optional caller-supplied options
    /// and an environment snapshot.
    ///
    /// Returns a configuration error when the environment selects the
    /// redis backend without supplying its address; the process must not
    /// proceed with a half-configured adapter.
    pub fn resolve(options: Option<LimiterOptions>, env: &EnvSnapshot) -> Result<Self> {
        let options = options.unwrap_or_default();
        let env_enabled = !options.disable_env;

        let mut debug = options.debug;
        if env_enabled {
            if let Some(value) = env.get_bool(ENV_DEBUG) {
                debug = value;
                resolution_log(debug, &format!("using env {ENV_DEBUG}"));
            }
        }

        let ip = resolve_rate(
            options.ip,
            default_ip_rate(),
            ENV_IP_MAX_REQUESTS,
            ENV_IP_BLOCK_TIME,
            env_enabled,
            env,
            debug,
        );
        let token = resolve_rate(
            options.token,
            default_token_rate(),
            ENV_TOKEN_MAX_REQUESTS,
            ENV_TOKEN_BLOCK_TIME,
            env_enabled,
            env,
            debug,
        );
        let custom_tokens =
            resolve_custom_tokens(options.custom_tokens, token, env_enabled, env, debug);
        let storage = resolve_storage(options.storage, env_enabled, env, debug)?;
        let response_writer = resolve_response_writer(options.response_writer, debug);

        if debug {
            let dump = serde_json::json!({
                "ip": ip,
                "token": token,
                "tokens": custom_tokens,
                "debug": debug,
            });
            debug!(target: "turnpike", "using configuration: {dump}");
        }

        Ok(Self {
            ip,
            token,
            custom_tokens,
            storage,
            response_writer,
            debug,
        })
    }

    /// Look up the policy for a token: its custom override when one is
    /// configured, else the default token policy. The boolean reports
    /// whether an override applied.
    pub fn rate_config_for_token(&self, token: &str) -> (RateConfig, bool) {
        match self.custom_tokens.get(token) {
            Some(rate) => (*rate, true),
            None => (self.token, false),
        }
    }
}

fn resolve_rate(
    explicit: Option<RateConfig>,
    default: RateConfig,
    max_env: &str,
    block_env: &str,
    env_enabled: bool,
    env: &EnvSnapshot,
    debug: bool,
) -> RateConfig {
    let mut rate = explicit.unwrap_or(default);

    if env_enabled {
        if let Some(value) = env.get_i64(max_env) {
            rate.max_requests_per_second = value;
            resolution_log(debug, &format!("using env {max_env}"));
        }
        if let Some(value) = env.get_i64(block_env) {
            rate.block_time_ms = value;
            resolution_log(debug, &format!("using env {block_env}"));
        }
    }

    rate
}

fn resolve_custom_tokens(
    input: HashMap<String, Option<RateConfig>>,
    token_rate: RateConfig,
    env_enabled: bool,
    env: &EnvSnapshot,
    debug: bool,
) -> HashMap<String, RateConfig> {
    let mut resolved = HashMap::new();
    let mut explicit = HashSet::new();

    for (name, policy) in input {
        match policy {
            Some(rate) => {
                explicit.insert(name.clone());
                resolved.insert(name, rate);
            }
            // A listed token with no policy inherits the resolved token
            // policy (and stays eligible for env-provided fields below).
            None => {
                resolved.insert(name, token_rate);
            }
        }
    }

    if !env_enabled {
        return resolved;
    }

    // Discovery is additive: it fills in tokens named by the environment
    // but never overrides an explicitly supplied policy.
    for name in discover_named_overrides(env) {
        if explicit.contains(&name) {
            continue;
        }

        resolution_log(debug, &format!("configuring custom token \"{name}\""));

        let max_key = format!("RATE_LIMITER_TOKEN_{name}_MAX_REQUESTS");
        let max_requests = env.get_i64(&max_key).unwrap_or_else(|| {
            resolution_log(
                debug,
                &format!(
                    "env \"{max_key}\" not found: using default value {}",
                    token_rate.max_requests_per_second
                ),
            );
            token_rate.max_requests_per_second
        });

        let block_key = format!("RATE_LIMITER_TOKEN_{name}_BLOCK_TIME");
        let block_time = env.get_i64(&block_key).unwrap_or_else(|| {
            resolution_log(
                debug,
                &format!(
                    "env \"{block_key}\" not found: using default value {}",
                    token_rate.block_time_ms
                ),
            );
            token_rate.block_time_ms
        });

        resolved.insert(name, RateConfig::new(max_requests, block_time));
    }

    resolved
}

/// Scan the snapshot for variables matching the per-token naming
/// convention and return the token names found.
pub fn discover_named_overrides(env: &EnvSnapshot) -> BTreeSet<String> {
    let pattern = Regex::new(TOKEN_OVERRIDE_PATTERN).expect("token override pattern is valid");

    env.keys()
        .filter_map(|key| pattern.captures(key))
        .map(|captures| captures[1].to_string())
        .collect()
}

fn resolve_storage(
    explicit: Option<Arc<dyn StorageAdapter>>,
    env_enabled: bool,
    env: &EnvSnapshot,
    debug: bool,
) -> Result<Arc<dyn StorageAdapter>> {
    if env_enabled && env.get_bool(ENV_USE_REDIS).unwrap_or(false) {
        resolution_log(debug, "using StorageAdapter Redis");

        let address = env.get_string(ENV_REDIS_ADDRESS).ok_or_else(|| {
            TurnpikeError::Config(format!(
                "{ENV_REDIS_ADDRESS} is required when the redis storage adapter is enabled"
            ))
        })?;
        let password = env.get_string(ENV_REDIS_PASSWORD).unwrap_or("");
        let db = env.get_i64(ENV_REDIS_DB).unwrap_or(0);

        let adapter = RedisStorageAdapter::new(address, password, db)
            .map_err(|err| TurnpikeError::Config(err.to_string()))?;
        return Ok(Arc::new(adapter));
    }

    match explicit {
        Some(storage) => {
            resolution_log(debug, "using StorageAdapter Custom");
            Ok(storage)
        }
        None => {
            resolution_log(debug, "using StorageAdapter Default");
            Ok(Arc::new(MemoryStorageAdapter::new()))
        }
    }
}

fn resolve_response_writer(
    explicit: Option<Arc<dyn ResponseWriter>>,
    debug: bool,
) -> Arc<dyn ResponseWriter> {
    match explicit {
        Some(writer) => {
            resolution_log(debug, "using ResponseWriter Custom");
            writer
        }
        None => {
            resolution_log(debug, "using ResponseWriter Default");
            Arc::new(DefaultResponseWriter::new())
        }
    }
}

fn resolution_log(debug: bool, message: &str) {
    if debug {
        debug!(target: "turnpike", "{message}");
    }
}
