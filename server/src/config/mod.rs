use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use thiserror::Error;

use crate::pricing::{LoyaltyPolicy, PricingError};

pub mod cors;
pub mod security;

pub use cors::create_cors_layer;
pub use security::create_security_headers_layer;

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_CURRENCY: &str = "LKR";
const DEFAULT_MAX_TICKETS_PER_BOOKING: i32 = 10;
pub const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:3000,http://localhost:5173";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid loyalty settings: {0}")]
    Loyalty(#[from] PricingError),
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string. Without it the server runs on the
    /// in-memory store.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub host: IpAddr,
    pub port: u16,
    pub currency: String,
    pub loyalty_policy: LoyaltyPolicy,
    pub max_tickets_per_booking: i32,
    /// Exposes `POST /api/tickets/:id/mark-paid`.
    pub enable_debug_endpoints: bool,
    pub production: bool,
    pub cors_allowed_origins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            database_max_connections: DEFAULT_MAX_CONNECTIONS,
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            currency: DEFAULT_CURRENCY.to_string(),
            loyalty_policy: LoyaltyPolicy::default(),
            max_tickets_per_booking: DEFAULT_MAX_TICKETS_PER_BOOKING,
            enable_debug_endpoints: false,
            production: false,
            cors_allowed_origins: split_origins(DEFAULT_ALLOWED_ORIGINS),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key/value source, falling back to
    /// defaults for missing keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let policy = defaults.loyalty_policy;

        let earn_rate = parse_or(&lookup, "LOYALTY_EARN_RATE", policy.earn_rate())?;
        let max_redemption_ratio = parse_or(
            &lookup,
            "LOYALTY_MAX_REDEMPTION_RATIO",
            policy.max_redemption_ratio(),
        )?;

        let max_tickets_per_booking = parse_or(
            &lookup,
            "MAX_TICKETS_PER_BOOKING",
            defaults.max_tickets_per_booking,
        )?;
        if max_tickets_per_booking < 1 {
            return Err(ConfigError::Invalid {
                key: "MAX_TICKETS_PER_BOOKING",
                value: max_tickets_per_booking.to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            database_max_connections: parse_or(
                &lookup,
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            )?,
            host: parse_or(&lookup, "SERVER_HOST", defaults.host)?,
            port: parse_or(&lookup, "SERVER_PORT", defaults.port)?,
            currency: lookup("CURRENCY")
                .map(|c| c.trim().to_uppercase())
                .filter(|c| !c.is_empty())
                .unwrap_or(defaults.currency),
            loyalty_policy: LoyaltyPolicy::new(earn_rate, max_redemption_ratio)?,
            max_tickets_per_booking,
            enable_debug_endpoints: parse_or(&lookup, "ENABLE_DEBUG_ENDPOINTS", false)?,
            production: lookup("RUST_ENV")
                .map(|v| v.to_lowercase() == "production")
                .unwrap_or(false),
            cors_allowed_origins: lookup("CORS_ALLOWED_ORIGINS")
                .map(|v| split_origins(&v))
                .unwrap_or(defaults.cors_allowed_origins),
        })
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn split_origins(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert!(config.database_url.is_none());
        assert_eq!(config.port, 5000);
        assert_eq!(config.currency, "LKR");
        assert_eq!(config.loyalty_policy, LoyaltyPolicy::default());
        assert!(!config.enable_debug_endpoints);
        assert!(!config.production);
        assert_eq!(config.cors_allowed_origins.len(), 2);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/tickets"),
            ("SERVER_PORT", "8080"),
            ("LOYALTY_EARN_RATE", "0.05"),
            ("LOYALTY_MAX_REDEMPTION_RATIO", "0.25"),
            ("ENABLE_DEBUG_ENDPOINTS", "true"),
            ("RUST_ENV", "Production"),
            ("CURRENCY", " usd "),
            ("CORS_ALLOWED_ORIGINS", "https://tickets.example.com, ,"),
        ]))
        .unwrap();

        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/tickets")
        );
        assert_eq!(config.bind_addr().port(), 8080);
        assert_eq!(config.loyalty_policy.earn_rate(), Decimal::new(5, 2));
        assert_eq!(
            config.loyalty_policy.max_redemption_ratio(),
            Decimal::new(25, 2)
        );
        assert!(config.enable_debug_endpoints);
        assert!(config.production);
        assert_eq!(config.currency, "USD");
        assert_eq!(config.cors_allowed_origins, vec!["https://tickets.example.com"]);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            Config::from_lookup(lookup(&[("SERVER_PORT", "http")])),
            Err(ConfigError::Invalid { key: "SERVER_PORT", .. })
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("LOYALTY_EARN_RATE", "2")])),
            Err(ConfigError::Loyalty(_))
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("MAX_TICKETS_PER_BOOKING", "0")])),
            Err(ConfigError::Invalid { .. })
        ));
    }
}
