use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
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
const DEV_DEFAULT_JWT_SECRET: &str =
    "storefront_development_secret_key_that_is_long_enough_for_local_testing_only_0123456789";

/// Delivery fee per zone for the two home delivery methods.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ZoneRates {
    pub standard: Decimal,
    pub priority: Decimal,
}

#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ShippingConfig {
    /// Zone name (as stored on provinces) to delivery fees
    #[serde(default = "default_zone_rates")]
    #[validate(custom = "validate_zone_rates")]
    pub zones: HashMap<String, ZoneRates>,
}

impl Default for ShippingConfig {
    fn default() -> Self {
        Self {
            zones: default_zone_rates(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PaymentConfig {
    /// Base URL of the payment processor. When unset the sandbox processor is used.
    #[serde(default)]
    #[validate(url)]
    pub gateway_url: Option<String>,

    /// Hosted payment page used by the sandbox processor
    #[serde(default = "default_sandbox_checkout_url")]
    #[validate(url)]
    pub sandbox_checkout_url: String,

    /// Upper bound for a single initiation call (seconds)
    #[serde(default = "default_payment_timeout_secs")]
    #[validate(range(min = 1, max = 120))]
    pub timeout_secs: u64,

    /// Shared secret for HMAC-signed payment callbacks
    #[serde(default)]
    pub callback_secret: Option<String>,

    /// Accepted clock skew for callback timestamps (seconds)
    #[serde(default = "default_callback_tolerance_secs")]
    pub callback_tolerance_secs: u64,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            gateway_url: None,
            sandbox_checkout_url: default_sandbox_checkout_url(),
            timeout_secs: default_payment_timeout_secs(),
            callback_secret: None,
            callback_tolerance_secs: default_callback_tolerance_secs(),
        }
    }
}

impl PaymentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// JWT secret key used to verify bearer tokens
    #[validate(custom = "validate_jwt_secret")]
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
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS fallback
    #[serde(default)]
    pub cors_allow_any_origin: bool,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Whole-request timeout applied by the HTTP layer (seconds)
    #[serde(default = "default_request_timeout_secs")]
    #[validate(range(min = 1, max = 300))]
    pub request_timeout_secs: u64,

    #[serde(default = "default_event_channel_capacity")]
    #[validate(range(min = 16, max = 100000))]
    pub event_channel_capacity: usize,

    #[serde(default = "default_api_page_size")]
    pub api_default_page_size: u64,
    #[serde(default = "default_api_max_page_size")]
    pub api_max_page_size: u64,

    #[serde(default)]
    #[validate]
    pub payment: PaymentConfig,

    #[serde(default)]
    #[validate]
    pub shipping: ShippingConfig,
}

impl AppConfig {
    /// Creates a configuration with defaults for everything but the essentials.
    pub fn new(
        database_url: String,
        jwt_secret: String,
        host: String,
        port: u16,
        environment: String,
    ) -> Self {
        Self {
            database_url,
            jwt_secret,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            api_default_page_size: default_api_page_size(),
            api_max_page_size: default_api_max_page_size(),
            payment: PaymentConfig::default(),
            shipping: ShippingConfig::default(),
        }
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Returns true if explicit CORS origins are configured
    pub fn has_cors_allowed_origins(&self) -> bool {
        self.cors_allowed_origins
            .as_ref()
            .map(|raw| raw.split(',').any(|origin| !origin.trim().is_empty()))
            .unwrap_or(false)
    }

    /// Whether we should fall back to permissive CORS
    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.should_allow_permissive_cors() && !self.has_cors_allowed_origins() {
            let mut err = ValidationError::new("cors_allowed_origins_required");
            err.message = Some(
                "Set APP__CORS_ALLOWED_ORIGINS for non-development environments or explicitly opt-in via APP__CORS_ALLOW_ANY_ORIGIN=true".into(),
            );
            errors.add("cors_allowed_origins", err);
        }

        if !self.is_development() && self.jwt_secret.trim() == DEV_DEFAULT_JWT_SECRET {
            let mut err = ValidationError::new("jwt_secret_default_dev");
            err.message = Some(
                "The bundled development JWT secret must not be used outside development. Set APP__JWT_SECRET to a unique, secure value."
                    .into(),
            );
            errors.add("jwt_secret", err);
        }

        if self.is_production()
            && self
                .payment
                .callback_secret
                .as_deref()
                .map(str::trim)
                .unwrap_or_default()
                .is_empty()
        {
            let mut err = ValidationError::new("payment_callback_secret_required");
            err.message =
                Some("Payment callbacks must be signed in production. Set APP__PAYMENT__CALLBACK_SECRET.".into());
            errors.add("payment", err);
        }

        if self.db_min_connections > self.db_max_connections {
            let mut err = ValidationError::new("db_pool_bounds");
            err.message = Some("db_min_connections cannot exceed db_max_connections".into());
            errors.add("db_min_connections", err);
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
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_api_page_size() -> u64 {
    20
}

fn default_api_max_page_size() -> u64 {
    100
}

fn default_payment_timeout_secs() -> u64 {
    10
}

fn default_callback_tolerance_secs() -> u64 {
    300
}

fn default_sandbox_checkout_url() -> String {
    "http://localhost:8080/sandbox/pay".to_string()
}

fn default_zone_rates() -> HashMap<String, ZoneRates> {
    [
        ("metro", dec!(150), dec!(250)),
        ("luzon", dec!(200), dec!(350)),
        ("visayas", dec!(250), dec!(400)),
        ("mindanao", dec!(300), dec!(450)),
    ]
    .into_iter()
    .map(|(zone, standard, priority)| (zone.to_string(), ZoneRates { standard, priority }))
    .collect()
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

    if trimmed.len() < 32 {
        let mut err = ValidationError::new("jwt_secret");
        err.message = Some("JWT secret must be at least 32 characters".into());
        return Err(err);
    }

    if let Some(first) = trimmed.chars().next() {
        if trimmed.chars().all(|c| c == first) {
            let mut err = ValidationError::new("jwt_secret");
            err.message = Some("JWT secret cannot be a repeated character sequence".into());
            return Err(err);
        }
    }

    let unique_chars: std::collections::HashSet<char> = trimmed.chars().collect();
    if unique_chars.len() < 10 {
        let mut err = ValidationError::new("jwt_secret");
        err.message =
            Some("JWT secret must have at least 10 unique characters for adequate entropy".into());
        return Err(err);
    }

    Ok(())
}

fn validate_zone_rates(zones: &HashMap<String, ZoneRates>) -> Result<(), ValidationError> {
    if zones.is_empty() {
        let mut err = ValidationError::new("shipping_zones");
        err.message = Some("At least one shipping zone must be configured".into());
        return Err(err);
    }
    let negative = zones
        .values()
        .any(|rates| rates.standard.is_sign_negative() || rates.priority.is_sign_negative());
    if negative {
        let mut err = ValidationError::new("shipping_zones");
        err.message = Some("Shipping fees cannot be negative".into());
        return Err(err);
    }
    Ok(())
}

/// Installs the global tracing subscriber. `RUST_LOG` overrides `level`.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("storefront_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::new(filter_directive);
    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

pub fn load_config() -> Result<AppConfig, AppConfigError> {
    load_config_from(Path::new(CONFIG_DIR))
}

/// Layers defaults, `<dir>/default`, `<dir>/<APP_ENV>` and `APP__*` variables.
pub fn load_config_from(config_dir: &Path) -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("APP_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !config_dir.exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            config_dir.display()
        );
    }

    let mut builder = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", i64::from(DEFAULT_PORT))?
        .set_default("environment", run_env.as_str())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::from(config_dir.join("default")).required(false))
        .add_source(File::from(config_dir.join(&run_env)).required(false));

    if run_env.eq_ignore_ascii_case(DEFAULT_ENV) {
        builder = builder.set_default("jwt_secret", DEV_DEFAULT_JWT_SECRET)?;
    }

    let config = builder
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    if config.get_string("jwt_secret").is_err() {
        error!("JWT secret is not configured. Set APP__JWT_SECRET.");
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

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn base_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            "a_perfectly_reasonable_test_secret_with_variety_42".into(),
            "127.0.0.1".into(),
            8080,
            "production".into(),
        )
    }

    #[test]
    fn non_dev_requires_cors_origins() {
        let mut cfg = base_config();
        cfg.payment.callback_secret = Some("whsec".into());
        assert!(cfg.validate_additional_constraints().is_err());

        cfg.cors_allowed_origins = Some("https://shop.example.com".into());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn production_requires_signed_callbacks() {
        let mut cfg = base_config();
        cfg.cors_allowed_origins = Some("https://shop.example.com".into());
        let errors = cfg.validate_additional_constraints().unwrap_err();
        assert!(errors.errors().contains_key("payment"));
    }

    #[test]
    fn development_allows_permissive_by_default() {
        let mut cfg = base_config();
        cfg.environment = "development".into();
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn default_rate_table_covers_all_zones() {
        let shipping = ShippingConfig::default();
        assert!(shipping.validate().is_ok());
        assert_eq!(
            shipping.zones.get("metro"),
            Some(&ZoneRates {
                standard: dec!(150),
                priority: dec!(250)
            })
        );
        assert_eq!(shipping.zones.len(), 4);
    }

    #[test]
    fn negative_zone_fee_is_rejected() {
        let mut shipping = ShippingConfig::default();
        shipping.zones.insert(
            "island".into(),
            ZoneRates {
                standard: dec!(-1),
                priority: dec!(10),
            },
        );
        assert!(shipping.validate().is_err());
    }

    #[test]
    fn payment_timeout_is_bounded() {
        let mut cfg = base_config();
        cfg.payment.timeout_secs = 0;
        assert!(cfg.validate().is_err());
        cfg.payment.timeout_secs = 5;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn loads_file_overrides() {
        let dir = TempDir::new().unwrap();
        let mut file = std::fs::File::create(dir.path().join("default.toml")).unwrap();
        writeln!(
            file,
            r#"
            port = 9191
            auto_migrate = true

            [payment]
            timeout_secs = 3

            [shipping.zones.metro]
            standard = 99
            priority = 120
            "#
        )
        .unwrap();

        let cfg = load_config_from(dir.path()).unwrap();
        assert_eq!(cfg.port, 9191);
        assert!(cfg.auto_migrate);
        assert_eq!(cfg.payment.timeout_secs, 3);
        assert_eq!(cfg.shipping.zones["metro"].standard, dec!(99));
    }
}
