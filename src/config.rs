//! Run configuration, built once at startup and passed by reference afterwards.
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::util::env::{env_opt, init_env, parse_flag, redact_value};

pub const DEFAULT_API_VERSION: &str = "2025-01";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SLEEP_BETWEEN_CALLS_SECS: f64 = 0.12;
pub const DEFAULT_DB_PORT: u16 = 5432;
pub const DEFAULT_DB_SSLMODE: &str = "prefer";

/// One row per promotion; rows for the same product are merged after the read.
pub const DEFAULT_PROMO_QUERY: &str = "SELECT product_id, sale_start_date, sale_end_date, \
     pi_start_date, pi_end_date FROM promo_banner_dates";

const SSL_MODES: [&str; 6] = [
    "disable",
    "allow",
    "prefer",
    "require",
    "verify-ca",
    "verify-full",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {key}: expected {expected}")]
    Invalid {
        key: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Lead/fallback day offsets applied by the date resolver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OffsetConfig {
    /// X: days a sale banner appears before the sale starts.
    pub sale_pre_days: u32,
    /// Y: days a price-increase banner appears before the increase starts.
    pub pi_pre_days: u32,
    /// Z: days after the increase start that an open-ended banner disappears.
    pub pi_post_days: u32,
}

/// What the reconciler is allowed to do with its decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// `DB_ONLY=1`: compute and report, never talk to the shop.
    ReadOnly,
    /// `DRY_RUN=1`: compute and log every intended call, never issue it.
    Simulate,
    /// Issue the real writes and deletes.
    Apply,
}

impl ExecutionMode {
    pub fn from_flags(db_only: bool, dry_run: bool) -> Self {
        match (db_only, dry_run) {
            (true, _) => Self::ReadOnly,
            (false, true) => Self::Simulate,
            (false, false) => Self::Apply,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadOnly => "read_only",
            Self::Simulate => "simulate",
            Self::Apply => "apply",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone)]
pub struct ShopifySettings {
    /// Bare shop domain, e.g. `example.myshopify.com`.
    pub shop: String,
    pub token: String,
    pub api_version: String,
    pub request_timeout: Duration,
}

impl fmt::Debug for ShopifySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShopifySettings")
            .field("shop", &self.shop)
            .field("token", &"***")
            .field("api_version", &self.api_version)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum DbTarget {
    /// Full DSN from `DATABASE_URL`.
    Url(String),
    Parts {
        server: String,
        database: String,
        user: String,
        password: Option<String>,
        port: u16,
        ssl_mode: String,
    },
}

impl fmt::Debug for DbTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => f
                .debug_tuple("Url")
                .field(&redact_value("DATABASE_URL", url))
                .finish(),
            Self::Parts {
                server,
                database,
                user,
                password,
                port,
                ssl_mode,
            } => f
                .debug_struct("Parts")
                .field("server", server)
                .field("database", database)
                .field("user", user)
                .field("password", &password.as_ref().map(|_| "***"))
                .field("port", port)
                .field("ssl_mode", ssl_mode)
                .finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbSettings {
    pub target: DbTarget,
    pub query: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub offsets: OffsetConfig,
    pub mode: ExecutionMode,
    /// `None` only in `ReadOnly` mode, where the shop is never contacted.
    pub shopify: Option<ShopifySettings>,
    pub db: DbSettings,
    /// Pause after each product in `Apply` mode.
    pub pacing: Duration,
}

impl Config {
    /// Load `.env`, then read every setting from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        init_env();
        Self::from_lookup(env_opt)
    }

    /// Build the configuration from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let offsets = OffsetConfig {
            sale_pre_days: parse_or(&get, "SALE_PRE_DAYS", 0u32, "a non-negative integer")?,
            pi_pre_days: parse_or(&get, "PI_PRE_DAYS", 0u32, "a non-negative integer")?,
            pi_post_days: parse_or(&get, "PI_POST_DAYS", 0u32, "a non-negative integer")?,
        };

        // DRY_RUN defaults on so an unconfigured run never writes.
        let dry_run = flag_or(&get, "DRY_RUN", true)?;
        let db_only = flag_or(&get, "DB_ONLY", false)?;
        let mode = ExecutionMode::from_flags(db_only, dry_run);

        let shopify = if mode == ExecutionMode::ReadOnly {
            None
        } else {
            let raw_shop = get("SHOPIFY_SHOP").ok_or(ConfigError::Missing("SHOPIFY_SHOP"))?;
            let shop = normalize_shop_domain(&raw_shop).ok_or_else(|| ConfigError::Invalid {
                key: "SHOPIFY_SHOP",
                value: raw_shop.clone(),
                expected: "a shop domain such as example.myshopify.com",
            })?;
            let token = get("SHOPIFY_TOKEN").ok_or(ConfigError::Missing("SHOPIFY_TOKEN"))?;
            let timeout_secs = parse_or(
                &get,
                "REQUEST_TIMEOUT",
                DEFAULT_REQUEST_TIMEOUT_SECS,
                "a whole number of seconds",
            )?;
            Some(ShopifySettings {
                shop,
                token,
                api_version: get("SHOPIFY_API_VERSION")
                    .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
                request_timeout: Duration::from_secs(timeout_secs),
            })
        };

        let target = match get("DATABASE_URL") {
            Some(url) => DbTarget::Url(url),
            None => {
                let ssl_mode = get("DB_SSLMODE")
                    .map(|v| v.to_ascii_lowercase())
                    .unwrap_or_else(|| DEFAULT_DB_SSLMODE.to_string());
                if !SSL_MODES.iter().any(|m| *m == ssl_mode) {
                    return Err(ConfigError::Invalid {
                        key: "DB_SSLMODE",
                        value: ssl_mode,
                        expected: "one of disable, allow, prefer, require, verify-ca, verify-full",
                    });
                }
                DbTarget::Parts {
                    server: get("DB_SERVER").ok_or(ConfigError::Missing("DB_SERVER"))?,
                    database: get("DB_NAME").ok_or(ConfigError::Missing("DB_NAME"))?,
                    user: get("DB_USER").ok_or(ConfigError::Missing("DB_USER"))?,
                    password: get("DB_PASSWORD"),
                    port: parse_or(&get, "DB_PORT", DEFAULT_DB_PORT, "a TCP port")?,
                    ssl_mode,
                }
            }
        };
        let db = DbSettings {
            target,
            query: get("PROMO_QUERY").unwrap_or_else(|| DEFAULT_PROMO_QUERY.to_string()),
        };

        let pacing_secs: f64 = parse_or(
            &get,
            "SLEEP_BETWEEN_CALLS",
            DEFAULT_SLEEP_BETWEEN_CALLS_SECS,
            "a non-negative number of seconds",
        )?;
        let pacing = Duration::try_from_secs_f64(pacing_secs).map_err(|_| ConfigError::Invalid {
            key: "SLEEP_BETWEEN_CALLS",
            value: pacing_secs.to_string(),
            expected: "a non-negative number of seconds",
        })?;

        Ok(Self {
            offsets,
            mode,
            shopify,
            db,
            pacing,
        })
    }

    /// Log a redacted snapshot of the effective configuration.
    pub fn log_snapshot(&self) {
        info!(
            target: "preflight",
            mode = %self.mode,
            sale_pre_days = self.offsets.sale_pre_days,
            pi_pre_days = self.offsets.pi_pre_days,
            pi_post_days = self.offsets.pi_post_days,
            shopify = ?self.shopify,
            db = ?self.db.target,
            custom_query = self.db.query != DEFAULT_PROMO_QUERY,
            pacing_ms = self.pacing.as_millis() as u64,
            "configuration snapshot"
        );
    }
}

fn parse_or<T, G>(
    get: &G,
    key: &'static str,
    default: T,
    expected: &'static str,
) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.parse::<T>().map_err(|_| ConfigError::Invalid {
            key,
            value: raw,
            expected,
        }),
    }
}

fn flag_or<G>(get: &G, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => parse_flag(&raw).ok_or(ConfigError::Invalid {
            key,
            value: raw,
            expected: "a boolean flag (1/0, true/false, yes/no, on/off)",
        }),
    }
}

/// Accept `example.myshopify.com` as well as `https://example.myshopify.com/`.
pub fn normalize_shop_domain(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    let parsed = url::Url::parse(&with_scheme).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    match parsed.port() {
        Some(port) => Some(format!("{host}:{port}")),
        None => Some(host),
    }
}
