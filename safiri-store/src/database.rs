use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;
use tracing::info;
use serde_json::Value;

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

impl DbClient {
    pub async fn new(connection_string: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .connect(connection_string)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&self.pool)
            .await?;
        info!("Migrations completed successfully.");
        Ok(())
    }

    /// Operational overrides for the booking/payment rules, keyed rows in
    /// the business_rules table. Missing keys keep the config defaults.
    pub async fn fetch_business_rules(
        &self,
        defaults: crate::app_config::BusinessRules,
    ) -> Result<crate::app_config::BusinessRules, sqlx::Error> {
        #[derive(sqlx::FromRow)]
        struct RuleRow {
            rule_key: String,
            rule_value: serde_json::Value,
        }

        let rows: Vec<RuleRow> =
            sqlx::query_as("SELECT rule_key, rule_value FROM business_rules")
                .fetch_all(&self.pool)
                .await?;

        let mut rules = defaults;

        for row in rows {
            let val = row.rule_value;

            // Expected format: {"value": <number/string>}
            if let Some(v) = val.get("value") {
                match row.rule_key.as_str() {
                    "reservation_ttl_minutes" => {
                        if let Some(u) = Value::as_u64(v) {
                            rules.reservation_ttl_minutes = u;
                        }
                    }
                    "sweep_interval_seconds" => {
                        if let Some(u) = Value::as_u64(v) {
                            rules.sweep_interval_seconds = u;
                        }
                    }
                    "booking_max_retries" => {
                        if let Some(u) = Value::as_u64(v) {
                            rules.booking_max_retries = u as u32;
                        }
                    }
                    "payment_poll_interval_seconds" => {
                        if let Some(u) = Value::as_u64(v) {
                            rules.payment_poll_interval_seconds = u;
                        }
                    }
                    "payment_poll_max_attempts" => {
                        if let Some(u) = Value::as_u64(v) {
                            rules.payment_poll_max_attempts = u as u32;
                        }
                    }
                    "currency" => {
                        if let Some(s) = v.as_str() {
                            rules.currency = String::from(s);
                        }
                    }
                    _ => {}
                }
            }
        }

        Ok(rules)
    }
}
