//! Guard configuration, read from the environment.

use std::time::Duration as StdDuration;

use crate::error::ConfigError;
use crate::rate_limit::RateLimit;
use crate::risk::{PositionLookupPolicy, RiskCaps};
use crate::session::SessionWindow;

/// Longest accepted duration setting, one year.
pub const MAX_DURATION_SECS: i64 = 365 * 24 * 60 * 60;

/// Paths that bypass the guard entirely.
pub const DEFAULT_ALLOWLIST: [&str; 10] = [
    "/",
    "/health",
    "/healthz",
    "/ready",
    "/metrics",
    "/status",
    "/account",
    "/bars",
    "/validate",
    "/limits",
];

#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub shared_secret: Option<String>,
    pub skew_secs: i64,
    pub require_v2: bool,
    pub idempotency_ttl_secs: i64,
    pub rate_limit: RateLimit,
    pub global_rate_limit: RateLimit,
    pub session: SessionWindow,
    pub caps: RiskCaps,
    pub position_policy: PositionLookupPolicy,
    pub position_lookup_timeout: StdDuration,
    pub max_body_bytes: usize,
    pub intent_path: String,
    pub allowlist: Vec<String>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            shared_secret: None,
            skew_secs: 90,
            require_v2: false,
            idempotency_ttl_secs: 900,
            rate_limit: RateLimit::new(15, 10),
            global_rate_limit: RateLimit::new(60, 10),
            session: SessionWindow::parse("Europe/London", "14:35", "20:30")
                .expect("default session window is valid"),
            caps: RiskCaps::default(),
            position_policy: PositionLookupPolicy::FailOpen,
            position_lookup_timeout: StdDuration::from_secs(8),
            max_body_bytes: 1024 * 1024,
            intent_path: "/intent".to_string(),
            allowlist: DEFAULT_ALLOWLIST.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl GuardConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any key lookup; unset keys take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let session = SessionWindow::parse(
            &get("SESSION_TZ").unwrap_or_else(|| "Europe/London".into()),
            &get("SESSION_START").unwrap_or_else(|| "14:35".into()),
            &get("SESSION_END").unwrap_or_else(|| "20:30".into()),
        )?;

        let position_policy = match get("POSITION_LOOKUP_POLICY") {
            Some(v) => v.parse()?,
            None => defaults.position_policy,
        };

        let intent_path = get("INTENT_PATH")
            .map(|p| normalize_path(&p).to_string())
            .unwrap_or(defaults.intent_path);

        Ok(Self {
            shared_secret: get("SHARED_SECRET"),
            skew_secs: parse_secs(&get, "SIG_TS_SKEW", defaults.skew_secs, 0)?,
            require_v2: get("REQUIRE_V2_SIGNATURE")
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.require_v2),
            idempotency_ttl_secs: parse_secs(
                &get,
                "IDEMP_TTL_SECONDS",
                defaults.idempotency_ttl_secs,
                0,
            )?,
            rate_limit: RateLimit::new(
                parse_or(&get, "RL_MAX_REQ", 15)?,
                parse_secs(&get, "RL_WINDOW_S", 10, 1)?,
            ),
            global_rate_limit: RateLimit::new(
                parse_or(&get, "RL_GLOBAL_MAX_REQ", 60)?,
                parse_secs(&get, "RL_GLOBAL_WINDOW_S", 10, 1)?,
            ),
            session,
            caps: RiskCaps {
                max_positions: parse_or(&get, "MAX_POSITIONS", defaults.caps.max_positions)?,
                max_trades_day: parse_or(&get, "MAX_TRADES_DAY", defaults.caps.max_trades_day)?,
            },
            position_policy,
            position_lookup_timeout: defaults.position_lookup_timeout,
            max_body_bytes: parse_or(&get, "MAX_BODY_BYTES", defaults.max_body_bytes)?,
            intent_path,
            allowlist: defaults.allowlist,
        })
    }

    pub fn is_allowlisted(&self, path: &str) -> bool {
        let path = normalize_path(path);
        self.allowlist.iter().any(|p| p == path)
    }

    pub fn is_intent_path(&self, path: &str) -> bool {
        normalize_path(path) == self.intent_path
    }
}

/// Strip trailing slashes, keeping "/" itself.
fn normalize_path(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

fn parse_flag(v: &str) -> bool {
    matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

fn parse_or<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(v) => v.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            var,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

/// A duration in whole seconds within `min..=MAX_DURATION_SECS`.
fn parse_secs<G>(get: &G, var: &'static str, default: i64, min: i64) -> Result<i64, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let secs = parse_or(get, var, default)?;
    if !(min..=MAX_DURATION_SECS).contains(&secs) {
        return Err(ConfigError::InvalidValue {
            var,
            reason: format!("{} outside {}..={} seconds", secs, min, MAX_DURATION_SECS),
        });
    }
    Ok(secs)
}
