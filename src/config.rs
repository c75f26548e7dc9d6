use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_JOB_QUEUE_BACKEND: &str = "in-memory";
const DEFAULT_JOB_QUEUE_NAMESPACE: &str = "bistro:jobs";
const DEV_DEFAULT_JWT_SECRET: &str =
    "this_is_a_development_secret_key_that_is_at_least_64_characters_long_for_testing";

/// What happens at booking time to a guest over the no-show limit.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoShowAction {
    Block,
    RequirePrepayment,
}

impl Default for NoShowAction {
    fn default() -> Self {
        NoShowAction::Block
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Redis connection URL (job queue backend)
    pub redis_url: String,

    /// JWT secret used to verify bearer tokens
    #[validate(length(min = 64), custom = "validate_jwt_secret")]
    pub jwt_secret: String,

    /// Server host address
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default = "default_true_bool")]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,

    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Request timeout applied to every HTTP route
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// ISO currency used when the client does not send one
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3))]
    pub default_currency: String,

    /// Additive tax rate applied to the subtotal (0.0 - 1.0)
    #[serde(default)]
    #[validate(custom = "validate_tax_rate")]
    pub tax_rate: f64,

    /// Cumulative tip total (cents) a customer needs before the loyalty discount applies
    #[serde(default = "default_loyalty_tip_threshold_cents")]
    #[validate(range(min = 0))]
    pub loyalty_tip_threshold_cents: i64,

    /// Fixed loyalty discount in cents
    #[serde(default = "default_loyalty_discount_cents")]
    #[validate(range(min = 0))]
    pub loyalty_discount_cents: i64,

    /// Payment provider API key; checkout runs in simulation mode when unset
    #[serde(default)]
    pub payment_provider_secret_key: Option<String>,

    #[serde(default = "default_payment_provider_base_url")]
    pub payment_provider_base_url: String,

    #[serde(default = "default_payment_provider_timeout_secs")]
    #[validate(range(min = 1, max = 60))]
    pub payment_provider_timeout_secs: u64,

    /// Shared secret for webhook HMAC verification
    #[serde(default)]
    pub payment_webhook_secret: Option<String>,

    #[serde(default = "default_checkout_success_url")]
    pub checkout_success_url: String,

    #[serde(default = "default_checkout_cancel_url")]
    pub checkout_cancel_url: String,

    /// Job queue backend: "in-memory" or "redis"
    #[serde(default = "default_job_queue_backend")]
    #[validate(custom = "validate_job_queue_backend")]
    pub job_queue_backend: String,

    #[serde(default = "default_job_queue_namespace")]
    pub job_queue_namespace: String,

    /// Dashboard broadcast buffer
    #[serde(default = "default_event_channel_capacity")]
    #[validate(range(min = 1))]
    pub event_channel_capacity: usize,

    /// Flat reservation deposit in cents (0 disables)
    #[serde(default)]
    #[validate(range(min = 0))]
    pub deposit_flat_cents: i64,

    /// Per-seat reservation deposit in cents (0 disables)
    #[serde(default)]
    #[validate(range(min = 0))]
    pub deposit_per_seat_cents: i64,

    #[serde(default = "default_max_overlapping_reservations")]
    #[validate(range(min = 1))]
    pub max_overlapping_reservations: u32,

    /// No-shows within the lookback window that trigger `no_show_action` (0 disables)
    #[serde(default = "default_no_show_limit")]
    pub no_show_limit: u32,

    #[serde(default = "default_no_show_lookback_days")]
    #[validate(range(min = 1))]
    pub no_show_lookback_days: i64,

    #[serde(default)]
    pub no_show_action: NoShowAction,

    /// Minimum deposit demanded when `no_show_action` is `require_prepayment`
    #[serde(default = "default_no_show_prepayment_cents")]
    #[validate(range(min = 1))]
    pub no_show_prepayment_cents: i64,

    /// Minutes after start before an unseated reservation becomes a no-show
    #[serde(default = "default_no_show_grace_minutes")]
    #[validate(range(min = 0))]
    pub no_show_grace_minutes: i64,

    /// Minutes a table stays busy after a dine-in payment
    #[serde(default = "default_turnover_hold_minutes")]
    #[validate(range(min = 1))]
    pub turnover_hold_minutes: i64,

    /// Interval between background sweeps
    #[serde(default = "default_sweep_interval_secs")]
    #[validate(range(min = 1))]
    pub sweep_interval_secs: u64,
}

/// Inputs of the pricing engine, derived from [`AppConfig`].
#[derive(Clone, Debug, PartialEq)]
pub struct PricingConfig {
    pub tax_rate: Decimal,
    pub loyalty_tip_threshold_cents: i64,
    pub loyalty_discount_cents: i64,
    pub default_currency: String,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            tax_rate: Decimal::ZERO,
            loyalty_tip_threshold_cents: default_loyalty_tip_threshold_cents(),
            loyalty_discount_cents: default_loyalty_discount_cents(),
            default_currency: default_currency(),
        }
    }
}

/// Inputs of the reservation guard, derived from [`AppConfig`].
#[derive(Clone, Debug, PartialEq)]
pub struct ReservationPolicy {
    pub deposit_flat_cents: i64,
    pub deposit_per_seat_cents: i64,
    pub max_overlapping_reservations: u32,
    pub no_show_limit: u32,
    pub no_show_lookback: chrono::Duration,
    pub no_show_action: NoShowAction,
    pub no_show_prepayment_cents: i64,
    pub no_show_grace: chrono::Duration,
    pub turnover_hold: chrono::Duration,
}

impl Default for ReservationPolicy {
    fn default() -> Self {
        Self {
            deposit_flat_cents: 0,
            deposit_per_seat_cents: 0,
            max_overlapping_reservations: default_max_overlapping_reservations(),
            no_show_limit: default_no_show_limit(),
            no_show_lookback: chrono::Duration::days(default_no_show_lookback_days()),
            no_show_action: NoShowAction::Block,
            no_show_prepayment_cents: default_no_show_prepayment_cents(),
            no_show_grace: chrono::Duration::minutes(default_no_show_grace_minutes()),
            turnover_hold: chrono::Duration::minutes(default_turnover_hold_minutes()),
        }
    }
}

impl ReservationPolicy {
    /// Deposit owed for a party, flat amount plus per-seat amount.
    pub fn deposit_for(&self, party_size: i32) -> i64 {
        let seats = i64::from(party_size.max(0));
        self.deposit_flat_cents + self.deposit_per_seat_cents * seats
    }
}

impl AppConfig {
    /// Minimal configuration with every optional knob at its default.
    pub fn new(database_url: String, jwt_secret: String, environment: String) -> Self {
        Self {
            database_url,
            redis_url: "redis://localhost:6379".to_string(),
            jwt_secret,
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: true,
            cors_allowed_origins: None,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            default_currency: default_currency(),
            tax_rate: 0.0,
            loyalty_tip_threshold_cents: default_loyalty_tip_threshold_cents(),
            loyalty_discount_cents: default_loyalty_discount_cents(),
            payment_provider_secret_key: None,
            payment_provider_base_url: default_payment_provider_base_url(),
            payment_provider_timeout_secs: default_payment_provider_timeout_secs(),
            payment_webhook_secret: None,
            checkout_success_url: default_checkout_success_url(),
            checkout_cancel_url: default_checkout_cancel_url(),
            job_queue_backend: default_job_queue_backend(),
            job_queue_namespace: default_job_queue_namespace(),
            event_channel_capacity: default_event_channel_capacity(),
            deposit_flat_cents: 0,
            deposit_per_seat_cents: 0,
            max_overlapping_reservations: default_max_overlapping_reservations(),
            no_show_limit: default_no_show_limit(),
            no_show_lookback_days: default_no_show_lookback_days(),
            no_show_action: NoShowAction::Block,
            no_show_prepayment_cents: default_no_show_prepayment_cents(),
            no_show_grace_minutes: default_no_show_grace_minutes(),
            turnover_hold_minutes: default_turnover_hold_minutes(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Simulation mode is active when no provider key is configured.
    pub fn payment_simulation_mode(&self) -> bool {
        self.payment_provider_secret_key
            .as_deref()
            .map_or(true, |key| key.trim().is_empty())
    }

    pub fn payment_provider_timeout(&self) -> Duration {
        Duration::from_secs(self.payment_provider_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn pricing(&self) -> PricingConfig {
        let tax_rate = Decimal::try_from(self.tax_rate)
            .map(|rate| rate.round_dp(6))
            .unwrap_or(Decimal::ZERO);
        PricingConfig {
            tax_rate,
            loyalty_tip_threshold_cents: self.loyalty_tip_threshold_cents,
            loyalty_discount_cents: self.loyalty_discount_cents,
            default_currency: self.default_currency.to_ascii_lowercase(),
        }
    }

    pub fn reservation_policy(&self) -> ReservationPolicy {
        ReservationPolicy {
            deposit_flat_cents: self.deposit_flat_cents,
            deposit_per_seat_cents: self.deposit_per_seat_cents,
            max_overlapping_reservations: self.max_overlapping_reservations,
            no_show_limit: self.no_show_limit,
            no_show_lookback: chrono::Duration::days(self.no_show_lookback_days),
            no_show_action: self.no_show_action,
            no_show_prepayment_cents: self.no_show_prepayment_cents,
            no_show_grace: chrono::Duration::minutes(self.no_show_grace_minutes),
            turnover_hold: chrono::Duration::minutes(self.turnover_hold_minutes),
        }
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.is_development() && self.jwt_secret.trim() == DEV_DEFAULT_JWT_SECRET {
            let mut err = ValidationError::new("jwt_secret_default_dev");
            err.message = Some(
                "The bundled development JWT secret must not be used outside development. Set APP__JWT_SECRET to a unique, secure value."
                    .into(),
            );
            errors.add("jwt_secret", err);
        }

        if self.is_production() && self.payment_simulation_mode() {
            let mut err = ValidationError::new("payment_provider_secret_key_required");
            err.message =
                Some("Simulation mode is not allowed in production; set APP__PAYMENT_PROVIDER_SECRET_KEY".into());
            errors.add("payment_provider_secret_key", err);
        }

        if !self.payment_simulation_mode() && self.payment_webhook_secret.is_none() {
            let mut err = ValidationError::new("payment_webhook_secret_required");
            err.message = Some("A webhook secret is required when a provider key is set".into());
            errors.add("payment_webhook_secret", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_true_bool() -> bool {
    true
}
fn default_db_max_connections() -> u32 {
    20
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    10
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_currency() -> String {
    "usd".to_string()
}
fn default_loyalty_tip_threshold_cents() -> i64 {
    5_000
}
fn default_loyalty_discount_cents() -> i64 {
    500
}
fn default_payment_provider_base_url() -> String {
    "https://api.stripe.com".to_string()
}
fn default_payment_provider_timeout_secs() -> u64 {
    10
}
fn default_checkout_success_url() -> String {
    "http://localhost:3000/checkout/success".to_string()
}
fn default_checkout_cancel_url() -> String {
    "http://localhost:3000/checkout/cancel".to_string()
}
fn default_job_queue_backend() -> String {
    DEFAULT_JOB_QUEUE_BACKEND.to_string()
}
fn default_job_queue_namespace() -> String {
    DEFAULT_JOB_QUEUE_NAMESPACE.to_string()
}
fn default_event_channel_capacity() -> usize {
    256
}
fn default_max_overlapping_reservations() -> u32 {
    1
}
fn default_no_show_prepayment_cents() -> i64 {
    2_000
}

fn default_no_show_limit() -> u32 {
    3
}
fn default_no_show_lookback_days() -> i64 {
    90
}
fn default_no_show_grace_minutes() -> i64 {
    15
}
fn default_turnover_hold_minutes() -> i64 {
    20
}
fn default_sweep_interval_secs() -> u64 {
    60
}

fn validate_job_queue_backend(value: &str) -> Result<(), ValidationError> {
    match value.to_ascii_lowercase().as_str() {
        "in-memory" | "redis" => Ok(()),
        _ => {
            let mut err = ValidationError::new("job_queue_backend");
            err.message = Some("Must be one of: in-memory, redis".into());
            Err(err)
        }
    }
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_jwt_secret(secret: &str) -> Result<(), ValidationError> {
    let trimmed = secret.trim();

    if let Some(first) = trimmed.chars().next() {
        if trimmed.chars().all(|c| c == first) {
            let mut err = ValidationError::new("jwt_secret");
            err.message = Some("JWT secret cannot be a repeated character sequence".into());
            return Err(err);
        }
    }

    let lower = trimmed.to_ascii_lowercase();
    let weak_fragments = ["changeme", "password", "12345"];
    if weak_fragments.iter().any(|pattern| lower.contains(pattern)) {
        let mut err = ValidationError::new("jwt_secret");
        err.message = Some(
            "JWT secret appears to be weak; use a cryptographically strong random string".into(),
        );
        return Err(err);
    }

    Ok(())
}

fn validate_tax_rate(rate: f64) -> Result<(), ValidationError> {
    if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
        let mut err = ValidationError::new("tax_rate");
        err.message = Some("tax_rate must be a finite value between 0.0 and 1.0".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("bistro_api={},tower_http=debug", level);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);
    load_config_from(Path::new(CONFIG_DIR), &run_env)
}

/// [`load_config`] against an explicit config directory.
pub fn load_config_from(config_dir: &Path, run_env: &str) -> Result<AppConfig, AppConfigError> {
    if !config_dir.exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            config_dir.display()
        );
    }

    let default_file = config_dir.join("default");
    let env_file = config_dir.join(run_env);
    let config = Config::builder()
        .set_default("database_url", "sqlite://bistro.db?mode=rwc")?
        .set_default("redis_url", "redis://localhost:6379")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", i64::from(DEFAULT_PORT))?
        .set_default("environment", run_env)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&default_file.to_string_lossy()).required(false))
        .add_source(File::with_name(&env_file.to_string_lossy()).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    if config.get_string("jwt_secret").is_err() {
        error!("JWT secret is not configured. Set APP__JWT_SECRET (minimum 64 characters).");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "jwt_secret is required but not configured. Set APP__JWT_SECRET environment variable."
                .into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!(
        simulation_mode = app_config.payment_simulation_mode(),
        job_queue = %app_config.job_queue_backend,
        "Configuration loaded successfully"
    );
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::prelude::FromStr;

    fn base_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            "k3y_f0r_t3sts_Q9wE7rT5yU1iO3pA8sD6fG4hJ2kL0zX9cV7bN5mQ3wE1rT8yU6iO4p".into(),
            "production".into(),
        )
    }

    #[test]
    fn production_rejects_simulation_mode() {
        let cfg = base_config();
        let errors = cfg.validate_additional_constraints().unwrap_err();
        assert!(errors
            .field_errors()
            .contains_key("payment_provider_secret_key"));
    }

    #[test]
    fn provider_key_requires_webhook_secret() {
        let mut cfg = base_config();
        cfg.payment_provider_secret_key = Some("sk_live_x".into());
        assert!(cfg.validate_additional_constraints().is_err());

        cfg.payment_webhook_secret = Some("whsec".into());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn blank_provider_key_means_simulation() {
        let mut cfg = base_config();
        cfg.payment_provider_secret_key = Some("   ".into());
        assert!(cfg.payment_simulation_mode());
    }

    #[test]
    fn tax_rate_out_of_range_fails_validation() {
        let mut cfg = base_config();
        cfg.tax_rate = 1.5;
        let errors = cfg.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("tax_rate"));
    }

    #[test]
    fn pricing_config_converts_tax_rate_exactly() {
        let mut cfg = base_config();
        cfg.tax_rate = 0.0825;
        assert_eq!(
            cfg.pricing().tax_rate,
            Decimal::from_str("0.0825").unwrap()
        );
    }

    #[test]
    fn deposit_combines_flat_and_per_seat() {
        let policy = ReservationPolicy {
            deposit_flat_cents: 1_000,
            deposit_per_seat_cents: 250,
            ..ReservationPolicy::default()
        };
        assert_eq!(policy.deposit_for(4), 2_000);
        assert_eq!(ReservationPolicy::default().deposit_for(4), 0);
    }

    fn write_config(dir: &Path, name: &str, body: &str) {
        std::fs::write(dir.join(format!("{}.toml", name)), body).unwrap();
    }

    const FILE_SECRET: &str =
        "f1le_s3cret_Xq7Wm2Lp9Rt4Vz8Kc1Hn6Bd3Gs5Jy0Fa7Ue2Io9Pk4Tl8Mw1Qr6Ze3Nb5Cx";

    #[test]
    fn environment_file_overrides_default_file() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            "default",
            &format!(
                "jwt_secret = \"{}\"\ntax_rate = 0.1\ndeposit_flat_cents = 1500\nport = 8000\n",
                FILE_SECRET
            ),
        );
        write_config(dir.path(), "development", "port = 9090\n");

        let cfg = load_config_from(dir.path(), "development").unwrap();
        assert_eq!(cfg.port, 9090);
        assert_eq!(cfg.environment, "development");
        assert_eq!(cfg.reservation_policy().deposit_flat_cents, 1_500);
        assert_eq!(cfg.pricing().tax_rate, Decimal::from_str("0.1").unwrap());
        assert!(cfg.payment_simulation_mode());
    }

    #[test]
    fn unknown_queue_backend_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            "default",
            &format!("jwt_secret = \"{}\"\njob_queue_backend = \"kafka\"\n", FILE_SECRET),
        );

        let result = load_config_from(dir.path(), "development");
        assert!(matches!(result, Err(AppConfigError::Validation(_))));
    }

    #[test]
    fn no_show_action_deserializes_snake_case() {
        let action: NoShowAction = serde_json::from_str("\"require_prepayment\"").unwrap();
        assert_eq!(action, NoShowAction::RequirePrepayment);
    }
}
