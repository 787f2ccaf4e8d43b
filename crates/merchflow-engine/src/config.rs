//! # Engine Configuration
//!
//! Configuration for pricing rules, checkout, refunds, discount limits,
//! commission fallback, background sweepers and the HTTP server.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     MERCHFLOW_GATEWAY_KEY_SECRET=...                                   │
//! │     MERCHFLOW_PORT=8080                                                │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/merchflow/merchflow.toml (Linux)                         │
//! │     ~/Library/Application Support/com.merchflow.merchflow/... (macOS)  │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     18% GST, 15 minute payment window, 30% production deduction        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [pricing]
//! gst_bps = 1800
//! origin_state = "Karnataka"
//! free_delivery_threshold_cents = 99900
//! standard_delivery_fee_cents = 4900
//! express_delivery_fee_cents = 14900
//!
//! [checkout]
//! payment_timeout_secs = 900
//! gateway_timeout_secs = 10
//! gateway_key_secret = "change-me"
//!
//! [orders]
//! production_deduction_bps = 3000
//! refund_eta_days = 7
//!
//! [sweeper]
//! payment_sweep_interval_secs = 30
//! settlement_period_days = 7
//! settlement_lease_secs = 900
//!
//! [server]
//! port = 8080
//! database_path = "./merchflow.db"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use merchflow_core::discount::DiscountLimit;
use merchflow_core::money::{Money, Rate};
use merchflow_core::order::RefundPolicy;
use merchflow_core::pricing::PricingRules;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("No config path available")]
    NoPath,
}

pub type ConfigResult<T> = Result<T, ConfigError>;

// =============================================================================
// Pricing
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingSettings {
    #[serde(default = "default_gst_bps")]
    pub gst_bps: u32,

    /// Seller state. Same-state deliveries book CGST + SGST.
    #[serde(default = "default_origin_state")]
    pub origin_state: String,

    #[serde(default = "default_free_delivery_threshold")]
    pub free_delivery_threshold_cents: i64,

    #[serde(default = "default_standard_fee")]
    pub standard_delivery_fee_cents: i64,

    #[serde(default = "default_express_fee")]
    pub express_delivery_fee_cents: i64,
}

fn default_gst_bps() -> u32 {
    1800
}
fn default_origin_state() -> String {
    "Karnataka".to_string()
}
fn default_free_delivery_threshold() -> i64 {
    99_900
}
fn default_standard_fee() -> i64 {
    4_900
}
fn default_express_fee() -> i64 {
    14_900
}

impl Default for PricingSettings {
    fn default() -> Self {
        PricingSettings {
            gst_bps: default_gst_bps(),
            origin_state: default_origin_state(),
            free_delivery_threshold_cents: default_free_delivery_threshold(),
            standard_delivery_fee_cents: default_standard_fee(),
            express_delivery_fee_cents: default_express_fee(),
        }
    }
}

// =============================================================================
// Checkout
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSettings {
    /// How long a payment intent stays open before the sweeper fails it.
    #[serde(default = "default_payment_timeout")]
    pub payment_timeout_secs: u64,

    /// Upper bound on any single gateway call.
    #[serde(default = "default_gateway_timeout")]
    pub gateway_timeout_secs: u64,

    /// Shared secret for payment signatures.
    #[serde(default)]
    pub gateway_key_secret: String,
}

fn default_payment_timeout() -> u64 {
    900
}
fn default_gateway_timeout() -> u64 {
    10
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        CheckoutSettings {
            payment_timeout_secs: default_payment_timeout(),
            gateway_timeout_secs: default_gateway_timeout(),
            gateway_key_secret: String::new(),
        }
    }
}

// =============================================================================
// Orders, Discounts, Commission
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSettings {
    /// Share retained when an in-production order is cancelled.
    #[serde(default = "default_production_deduction")]
    pub production_deduction_bps: u32,

    #[serde(default = "default_refund_eta_days")]
    pub refund_eta_days: i64,
}

fn default_production_deduction() -> u32 {
    3000
}
fn default_refund_eta_days() -> i64 {
    7
}

impl Default for OrderSettings {
    fn default() -> Self {
        OrderSettings {
            production_deduction_bps: default_production_deduction(),
            refund_eta_days: default_refund_eta_days(),
        }
    }
}

/// Used when `discount_limits` has neither a category nor a global row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscountSettings {
    #[serde(default = "default_discount_min")]
    pub default_min_bps: u32,

    #[serde(default = "default_discount_max")]
    pub default_max_bps: u32,
}

fn default_discount_min() -> u32 {
    100
}
fn default_discount_max() -> u32 {
    5000
}

impl Default for DiscountSettings {
    fn default() -> Self {
        DiscountSettings {
            default_min_bps: default_discount_min(),
            default_max_bps: default_discount_max(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommissionSettings {
    /// Rate used when no tier matches or no default config exists.
    #[serde(default = "default_fallback_rate")]
    pub fallback_rate_bps: u32,
}

fn default_fallback_rate() -> u32 {
    1500
}

impl Default for CommissionSettings {
    fn default() -> Self {
        CommissionSettings {
            fallback_rate_bps: default_fallback_rate(),
        }
    }
}

// =============================================================================
// Sweeper
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperSettings {
    #[serde(default = "default_payment_sweep_interval")]
    pub payment_sweep_interval_secs: u64,

    #[serde(default = "default_cart_sweep_interval")]
    pub cart_sweep_interval_secs: u64,

    #[serde(default = "default_stale_cart_days")]
    pub stale_cart_days: i64,

    #[serde(default = "default_settlement_interval")]
    pub settlement_interval_secs: u64,

    /// Length of one settlement period, aligned to UTC midnight.
    #[serde(default = "default_settlement_period_days")]
    pub settlement_period_days: i64,

    /// FAILED settlements are retried until they reach this many attempts.
    #[serde(default = "default_max_settlement_attempts")]
    pub max_settlement_attempts: u32,

    /// A PROCESSING settlement untouched this long lost its payout and is
    /// moved back to FAILED.
    #[serde(default = "default_settlement_lease")]
    pub settlement_lease_secs: u64,

    /// Rows handled per sweep pass.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

fn default_payment_sweep_interval() -> u64 {
    30
}
fn default_cart_sweep_interval() -> u64 {
    3600
}
fn default_stale_cart_days() -> i64 {
    30
}
fn default_settlement_interval() -> u64 {
    3600
}
fn default_settlement_period_days() -> i64 {
    7
}
fn default_max_settlement_attempts() -> u32 {
    5
}
fn default_settlement_lease() -> u64 {
    900
}
fn default_batch_size() -> u32 {
    100
}

impl Default for SweeperSettings {
    fn default() -> Self {
        SweeperSettings {
            payment_sweep_interval_secs: default_payment_sweep_interval(),
            cart_sweep_interval_secs: default_cart_sweep_interval(),
            stale_cart_days: default_stale_cart_days(),
            settlement_interval_secs: default_settlement_interval(),
            settlement_period_days: default_settlement_period_days(),
            max_settlement_attempts: default_max_settlement_attempts(),
            settlement_lease_secs: default_settlement_lease(),
            batch_size: default_batch_size(),
        }
    }
}

// =============================================================================
// Server
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_database_path() -> PathBuf {
    PathBuf::from("./merchflow.db")
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            bind_addr: default_bind_addr(),
            port: default_port(),
            database_path: default_database_path(),
        }
    }
}

impl ServerSettings {
    /// `bind_addr:port`
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

// =============================================================================
// Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub pricing: PricingSettings,

    #[serde(default)]
    pub checkout: CheckoutSettings,

    #[serde(default)]
    pub orders: OrderSettings,

    #[serde(default)]
    pub discounts: DiscountSettings,

    #[serde(default)]
    pub commission: CommissionSettings,

    #[serde(default)]
    pub sweeper: SweeperSettings,

    #[serde(default)]
    pub server: ServerSettings,
}

impl EngineConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (merchflow.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> ConfigResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load engine config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Writes the configuration as TOML.
    pub fn save(&self, config_path: Option<PathBuf>) -> ConfigResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or(ConfigError::NoPath)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(&path, toml::to_string_pretty(self)?)?;
        info!(?path, "Engine config saved");
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.pricing.gst_bps > 10_000 {
            return invalid("pricing.gst_bps must be at most 10000");
        }
        if self.pricing.origin_state.trim().is_empty() {
            return invalid("pricing.origin_state must not be empty");
        }
        if self.pricing.free_delivery_threshold_cents < 0
            || self.pricing.standard_delivery_fee_cents < 0
            || self.pricing.express_delivery_fee_cents < 0
        {
            return invalid("delivery amounts must not be negative");
        }
        if self.checkout.payment_timeout_secs == 0 || self.checkout.gateway_timeout_secs == 0 {
            return invalid("checkout timeouts must be greater than 0");
        }
        if self.orders.production_deduction_bps > 10_000 {
            return invalid("orders.production_deduction_bps must be at most 10000");
        }
        if self.discounts.default_min_bps > self.discounts.default_max_bps
            || self.discounts.default_max_bps > 10_000
        {
            return invalid("discount defaults must satisfy min <= max <= 10000");
        }
        if self.commission.fallback_rate_bps > 10_000 {
            return invalid("commission.fallback_rate_bps must be at most 10000");
        }
        if self.sweeper.settlement_period_days < 1 || self.sweeper.stale_cart_days < 1 {
            return invalid("sweeper day counts must be at least 1");
        }
        if self.sweeper.settlement_lease_secs <= self.checkout.gateway_timeout_secs {
            return invalid("sweeper.settlement_lease_secs must exceed checkout.gateway_timeout_secs");
        }
        if self.sweeper.batch_size == 0 {
            return invalid("sweeper.batch_size must be greater than 0");
        }

        if self.checkout.gateway_key_secret.is_empty() {
            warn!("checkout.gateway_key_secret is empty; payment signatures are forgeable");
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(secret) = std::env::var("MERCHFLOW_GATEWAY_KEY_SECRET") {
            debug!("Overriding gateway key secret from environment");
            self.checkout.gateway_key_secret = secret;
        }

        if let Ok(path) = std::env::var("MERCHFLOW_DATABASE_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.server.database_path = PathBuf::from(path);
        }

        if let Ok(addr) = std::env::var("MERCHFLOW_BIND_ADDR") {
            self.server.bind_addr = addr;
        }

        if let Ok(port) = std::env::var("MERCHFLOW_PORT") {
            match port.parse::<u16>() {
                Ok(p) => {
                    debug!(port = p, "Overriding server port from environment");
                    self.server.port = p;
                }
                Err(_) => warn!(port = %port, "Ignoring invalid MERCHFLOW_PORT"),
            }
        }

        if let Ok(state) = std::env::var("MERCHFLOW_ORIGIN_STATE") {
            self.pricing.origin_state = state;
        }

        if let Ok(secs) = std::env::var("MERCHFLOW_PAYMENT_TIMEOUT_SECS") {
            if let Ok(s) = secs.parse::<u64>() {
                self.checkout.payment_timeout_secs = s;
            }
        }
    }

    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "merchflow", "merchflow")
            .map(|dirs| dirs.config_dir().join("merchflow.toml"))
    }

    // =========================================================================
    // Conversions
    // =========================================================================

    pub fn pricing_rules(&self) -> PricingRules {
        PricingRules {
            gst_rate: Rate::from_bps(self.pricing.gst_bps),
            origin_state: self.pricing.origin_state.clone(),
            free_delivery_threshold: Money::from_cents(self.pricing.free_delivery_threshold_cents),
            standard_delivery_fee: Money::from_cents(self.pricing.standard_delivery_fee_cents),
            express_delivery_fee: Money::from_cents(self.pricing.express_delivery_fee_cents),
        }
    }

    pub fn refund_policy(&self) -> RefundPolicy {
        RefundPolicy {
            production_deduction: Rate::from_bps(self.orders.production_deduction_bps),
            refund_eta_days: self.orders.refund_eta_days,
        }
    }

    pub fn builtin_discount_limit(&self) -> DiscountLimit {
        DiscountLimit {
            category: None,
            min: Rate::from_bps(self.discounts.default_min_bps),
            max: Rate::from_bps(self.discounts.default_max_bps),
        }
    }

    pub fn fallback_rate(&self) -> Rate {
        Rate::from_bps(self.commission.fallback_rate_bps)
    }

    pub fn payment_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.checkout.payment_timeout_secs as i64)
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.checkout.gateway_timeout_secs)
    }
}
