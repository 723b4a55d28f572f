//! Application configuration loaded from environment variables.

use chrono::Duration;

use checkout::CheckoutConfig;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `DATABASE_URL` — PostgreSQL connection string; absent means the
///   in-memory stores are used
/// - `GATEWAY_SECRET` — shared secret for gateway notification
///   signatures (default: `"dev-gateway-secret"`)
/// - `SESSION_TTL_SECS` — checkout session lifetime (default: 1800)
/// - `RESERVATION_HOLD_SECS` — stock hold window (default: 900)
/// - `PAYMENT_WINDOW_SECS` — pending payment window (default: 900)
/// - `IDEMPOTENCY_TTL_SECS` — idempotency record lifetime (default: 3600)
/// - `SWEEP_INTERVAL_SECS` — expiry sweep cadence (default: 60)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub gateway_secret: String,
    pub session_ttl_secs: i64,
    pub reservation_hold_secs: i64,
    pub payment_window_secs: i64,
    pub idempotency_ttl_secs: i64,
    pub sweep_interval_secs: u64,
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_parse("PORT", 3000),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            database_url: std::env::var("DATABASE_URL").ok(),
            gateway_secret: std::env::var("GATEWAY_SECRET")
                .unwrap_or_else(|_| "dev-gateway-secret".to_string()),
            session_ttl_secs: env_parse("SESSION_TTL_SECS", 1800),
            reservation_hold_secs: env_parse("RESERVATION_HOLD_SECS", 900),
            payment_window_secs: env_parse("PAYMENT_WINDOW_SECS", 900),
            idempotency_ttl_secs: env_parse("IDEMPOTENCY_TTL_SECS", 3600),
            sweep_interval_secs: env_parse("SWEEP_INTERVAL_SECS", 60),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The timing windows handed to the checkout components.
    pub fn checkout_config(&self) -> CheckoutConfig {
        CheckoutConfig {
            session_ttl: Duration::seconds(self.session_ttl_secs),
            reservation_hold: Duration::seconds(self.reservation_hold_secs),
            payment_window: Duration::seconds(self.payment_window_secs),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            gateway_secret: "dev-gateway-secret".to_string(),
            session_ttl_secs: 1800,
            reservation_hold_secs: 900,
            payment_window_secs: 900,
            idempotency_ttl_secs: 3600,
            sweep_interval_secs: 60,
        }
    }
}
