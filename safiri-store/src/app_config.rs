use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    pub auth: AuthConfig,
    pub business_rules: BusinessRules,
    pub providers: ProvidersConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    /// How long an unpaid reservation may hold capacity.
    #[serde(default = "default_reservation_ttl")]
    pub reservation_ttl_minutes: u64,
    pub sweep_interval_seconds: u64,
    pub booking_max_retries: u32,
    pub payment_poll_interval_seconds: u64,
    pub payment_poll_max_attempts: u32,
    pub currency: String,
}

fn default_reservation_ttl() -> u64 { 15 }

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_expiration_seconds: u64,
    pub webhook_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
}

/// Provider credentials are optional: a missing section swaps in the mock
/// gateway so local stacks run without Daraja/Airtel accounts.
#[derive(Debug, Deserialize, Clone)]
pub struct ProvidersConfig {
    pub mpesa: Option<MpesaSettings>,
    pub airtel: Option<AirtelSettings>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MpesaSettings {
    pub base_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    pub shortcode: String,
    pub passkey: String,
    pub callback_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AirtelSettings {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub country: String,
    pub currency: String,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            // Start off by merging in the "default" configuration file
            .add_source(config::File::with_name("config/default"))
            // Add in the current environment file
            // Default to 'development' env
            // Note that this file is _optional_
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add in a local configuration file
            // This file shouldn't be checked in to git
            .add_source(config::File::with_name("config/local").required(false))
            // Add in settings from the environment (with a prefix of SAFIRI)
            // Eg.. `SAFIRI__SERVER__PORT=8080` would set the server port
            .add_source(config::Environment::with_prefix("SAFIRI").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
