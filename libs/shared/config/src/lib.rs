use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_path: String,
    pub bind_address: String,
    pub dispatch_interval_seconds: u64,
    pub dispatch_batch_size: u32,
    pub dispatch_concurrency: usize,
    pub dispatch_max_retries: u32,
    pub dispatch_backoff_base_seconds: u64,
    pub dispatch_backoff_max_seconds: u64,
    pub dispatch_send_timeout_seconds: u64,
    pub dispatch_claim_ttl_seconds: u64,
    pub reminder_lead_minutes: Vec<u32>,
    pub email_gateway_url: Option<String>,
    pub sms_gateway_url: Option<String>,
    pub push_gateway_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: "clinic.db".to_string(),
            bind_address: "0.0.0.0:3000".to_string(),
            dispatch_interval_seconds: 30,
            dispatch_batch_size: 50,
            dispatch_concurrency: 4,
            dispatch_max_retries: 3,
            dispatch_backoff_base_seconds: 60,
            dispatch_backoff_max_seconds: 3600,
            dispatch_send_timeout_seconds: 10,
            dispatch_claim_ttl_seconds: 300,
            reminder_lead_minutes: vec![1440, 120],
            email_gateway_url: None,
            sms_gateway_url: None,
            push_gateway_url: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| {
                    warn!("DATABASE_PATH not set, using {}", defaults.database_path);
                    defaults.database_path.clone()
                }),
            bind_address: env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| defaults.bind_address.clone()),
            dispatch_interval_seconds: number_var("DISPATCH_INTERVAL_SECONDS", defaults.dispatch_interval_seconds),
            dispatch_batch_size: number_var("DISPATCH_BATCH_SIZE", defaults.dispatch_batch_size),
            dispatch_concurrency: number_var("DISPATCH_CONCURRENCY", defaults.dispatch_concurrency),
            dispatch_max_retries: number_var("DISPATCH_MAX_RETRIES", defaults.dispatch_max_retries),
            dispatch_backoff_base_seconds: number_var("DISPATCH_BACKOFF_BASE_SECONDS", defaults.dispatch_backoff_base_seconds),
            dispatch_backoff_max_seconds: number_var("DISPATCH_BACKOFF_MAX_SECONDS", defaults.dispatch_backoff_max_seconds),
            dispatch_send_timeout_seconds: number_var("DISPATCH_SEND_TIMEOUT_SECONDS", defaults.dispatch_send_timeout_seconds),
            dispatch_claim_ttl_seconds: number_var("DISPATCH_CLAIM_TTL_SECONDS", defaults.dispatch_claim_ttl_seconds),
            reminder_lead_minutes: match env::var("REMINDER_LEAD_MINUTES") {
                Ok(raw) => parse_lead_minutes(&raw).unwrap_or_else(|| {
                    warn!("REMINDER_LEAD_MINUTES is malformed ({}), using defaults", raw);
                    defaults.reminder_lead_minutes.clone()
                }),
                Err(_) => defaults.reminder_lead_minutes.clone(),
            },
            email_gateway_url: optional_var("EMAIL_GATEWAY_URL"),
            sms_gateway_url: optional_var("SMS_GATEWAY_URL"),
            push_gateway_url: optional_var("PUSH_GATEWAY_URL"),
        };

        if !config.has_delivery_gateways() {
            warn!("No delivery gateways configured - only in-app notifications will be delivered");
        }

        config
    }

    pub fn has_delivery_gateways(&self) -> bool {
        self.email_gateway_url.is_some()
            || self.sms_gateway_url.is_some()
            || self.push_gateway_url.is_some()
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_secs(self.dispatch_interval_seconds.max(1))
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_send_timeout_seconds.max(1))
    }
}

fn number_var<T>(name: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} is not a valid number ({}), using {}", name, raw, default);
            default
        }),
        Err(_) => default,
    }
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

/// Parses a comma separated list of reminder lead times in minutes, e.g. `1440,120`.
pub fn parse_lead_minutes(raw: &str) -> Option<Vec<u32>> {
    let leads = raw
        .split(',')
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<u32>().ok().filter(|minutes| *minutes > 0))
        .collect::<Option<Vec<u32>>>()?;

    if leads.is_empty() {
        None
    } else {
        Some(leads)
    }
}
