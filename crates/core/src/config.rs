//! Service configuration.
//!
//! Every knob is env-overridable with a default, and a TOML profile can
//! be supplied for local setups. Thresholds are read once at startup and
//! immutable for the process lifetime.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Inbound price topics, one per venue.
pub const MOS_ESPA_PRICES_TOPIC: &str = "tatooine-mos-espa-prices";
pub const BLACK_SPIRE_PRICES_TOPIC: &str = "batuu-black-spire-outpost-price-stream";

/// Environment variable names.
mod env {
    pub const MAX_TICK_AGE_SECONDS: &str = "MAX_TICK_AGE_SECONDS";
    pub const ACTIVATION_THRESHOLD_PCT: &str = "ACTIVATION_THRESHOLD_PCT";
    pub const LIQUIDATION_THRESHOLD_PCT: &str = "LIQUIDATION_THRESHOLD_PCT";
    pub const LIQUIDATION_WORKERS: &str = "LIQUIDATION_WORKERS";
    pub const VENUE_HTTP_TIMEOUT_MS: &str = "VENUE_HTTP_TIMEOUT_MS";
    pub const VENUE_RETRY_CAP_MS: &str = "VENUE_RETRY_CAP_MS";
    pub const BUS_ENDPOINT: &str = "BUS_ENDPOINT";
    pub const VENUE_A_URL: &str = "VENUE_A_URL";
    pub const VENUE_B_URL: &str = "VENUE_B_URL";
    pub const BUS_LOAN_EVENTS_TOPIC: &str = "BUS_LOAN_EVENTS_TOPIC";
    pub const HTTP_BIND: &str = "HTTP_BIND";
    pub const CONFIG_FILE: &str = "CONFIG_FILE";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Ticks older than this are stale (seconds)
    #[serde(default = "default_max_tick_age_seconds")]
    pub max_tick_age_seconds: u64,

    /// New loans activate at or below this LTV (percent)
    #[serde(default = "default_activation_threshold_pct")]
    pub activation_threshold_pct: u32,

    /// Active loans liquidate at or above this LTV (percent)
    #[serde(default = "default_liquidation_threshold_pct")]
    pub liquidation_threshold_pct: u32,

    /// Size of the liquidation worker pool
    #[serde(default = "default_liquidation_workers")]
    pub liquidation_workers: usize,

    /// Total timeout for a venue order call (milliseconds)
    #[serde(default = "default_venue_http_timeout_ms")]
    pub venue_http_timeout_ms: u64,

    /// Trade retry backoff cap (milliseconds)
    #[serde(default = "default_venue_retry_cap_ms")]
    pub venue_retry_cap_ms: u64,

    /// Message bus endpoint
    #[serde(default = "default_bus_endpoint")]
    pub bus_endpoint: String,

    /// Mos Espa order endpoint
    #[serde(default = "default_venue_a_url")]
    pub venue_a_url: String,

    /// Black Spire order endpoint
    #[serde(default = "default_venue_b_url")]
    pub venue_b_url: String,

    /// Outbound lifecycle event topic
    #[serde(default = "default_loan_events_topic")]
    pub loan_events_topic: String,

    /// Inbound HTTP bind address
    #[serde(default = "default_http_bind")]
    pub http_bind: String,
}

fn default_max_tick_age_seconds() -> u64 {
    30
}
fn default_activation_threshold_pct() -> u32 {
    50
}
fn default_liquidation_threshold_pct() -> u32 {
    80
}
fn default_liquidation_workers() -> usize {
    16
}
fn default_venue_http_timeout_ms() -> u64 {
    15_000
}
fn default_venue_retry_cap_ms() -> u64 {
    30_000
}
fn default_bus_endpoint() -> String {
    "http://localhost:9324".to_string()
}
fn default_venue_a_url() -> String {
    "http://localhost:9081".to_string()
}
fn default_venue_b_url() -> String {
    "http://localhost:9082".to_string()
}
fn default_loan_events_topic() -> String {
    "coruscant-bank-loan-events".to_string()
}
fn default_http_bind() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_tick_age_seconds: default_max_tick_age_seconds(),
            activation_threshold_pct: default_activation_threshold_pct(),
            liquidation_threshold_pct: default_liquidation_threshold_pct(),
            liquidation_workers: default_liquidation_workers(),
            venue_http_timeout_ms: default_venue_http_timeout_ms(),
            venue_retry_cap_ms: default_venue_retry_cap_ms(),
            bus_endpoint: default_bus_endpoint(),
            venue_a_url: default_venue_a_url(),
            venue_b_url: default_venue_b_url(),
            loan_events_topic: default_loan_events_topic(),
            http_bind: default_http_bind(),
        }
    }
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string(name: &str, default: String) -> String {
    std::env::var(name).unwrap_or(default)
}

impl AppConfig {
    /// Load from a TOML profile file.
    pub fn from_file(path: &str) -> Result<Self, String> {
        let content =
            std::fs::read_to_string(path).map_err(|e| format!("read {path}: {e}"))?;
        toml::from_str(&content).map_err(|e| format!("parse {path}: {e}"))
    }

    /// Load from the environment: a `CONFIG_FILE` profile if given, then
    /// individual variable overrides on top of it.
    pub fn from_env() -> Self {
        let base = match std::env::var(env::CONFIG_FILE) {
            Ok(path) => match Self::from_file(&path) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(error = %e, "config profile unusable, using defaults");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        };

        Self {
            max_tick_age_seconds: env_parse(env::MAX_TICK_AGE_SECONDS, base.max_tick_age_seconds),
            activation_threshold_pct: env_parse(
                env::ACTIVATION_THRESHOLD_PCT,
                base.activation_threshold_pct,
            ),
            liquidation_threshold_pct: env_parse(
                env::LIQUIDATION_THRESHOLD_PCT,
                base.liquidation_threshold_pct,
            ),
            liquidation_workers: env_parse(env::LIQUIDATION_WORKERS, base.liquidation_workers),
            venue_http_timeout_ms: env_parse(
                env::VENUE_HTTP_TIMEOUT_MS,
                base.venue_http_timeout_ms,
            ),
            venue_retry_cap_ms: env_parse(env::VENUE_RETRY_CAP_MS, base.venue_retry_cap_ms),
            bus_endpoint: env_string(env::BUS_ENDPOINT, base.bus_endpoint),
            venue_a_url: env_string(env::VENUE_A_URL, base.venue_a_url),
            venue_b_url: env_string(env::VENUE_B_URL, base.venue_b_url),
            loan_events_topic: env_string(env::BUS_LOAN_EVENTS_TOPIC, base.loan_events_topic),
            http_bind: env_string(env::HTTP_BIND, base.http_bind),
        }
    }

    pub fn max_tick_age(&self) -> Duration {
        Duration::from_secs(self.max_tick_age_seconds)
    }

    pub fn venue_http_timeout(&self) -> Duration {
        Duration::from_millis(self.venue_http_timeout_ms)
    }

    pub fn venue_retry_cap(&self) -> Duration {
        Duration::from_millis(self.venue_retry_cap_ms)
    }

    /// Activation threshold as an LTV fraction (50 → 0.5).
    pub fn activation_threshold(&self) -> Decimal {
        Decimal::from(self.activation_threshold_pct) / Decimal::ONE_HUNDRED
    }

    /// Liquidation threshold as an LTV fraction (80 → 0.8).
    pub fn liquidation_threshold(&self) -> Decimal {
        Decimal::from(self.liquidation_threshold_pct) / Decimal::ONE_HUNDRED
    }

    /// Log the effective configuration at startup.
    pub fn log_config(&self) {
        tracing::info!(
            max_tick_age_s = self.max_tick_age_seconds,
            activation_pct = self.activation_threshold_pct,
            liquidation_pct = self.liquidation_threshold_pct,
            workers = self.liquidation_workers,
            "policy configuration"
        );
        tracing::info!(
            bus = %self.bus_endpoint,
            venue_a = %self.venue_a_url,
            venue_b = %self.venue_b_url,
            topic = %self.loan_events_topic,
            bind = %self.http_bind,
            "endpoint configuration"
        );
    }
}
