use std::env;

/// Process-wide configuration, read once at startup from the environment.
///
/// Mirrors the reference service's `from_env()`-with-defaults idiom: every
/// variable is optional and falls back to a sane default so the crate runs
/// out of the box in development.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub bus_partitions: usize,
    pub token_secret: String,
    pub token_ttl_secs: i64,
    pub dlq_max_retries: u32,
    pub message_ttl_days: i64,
    pub retention_interval_secs: u64,
    pub rate_limit_submit_per_min: usize,
    pub rate_limit_status_per_min: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: "chat_core.db".to_string(),
            bus_partitions: 8,
            token_secret: "dev-only-insecure-secret-change-me".to_string(),
            token_ttl_secs: 86_400,
            dlq_max_retries: 5,
            message_ttl_days: 365,
            retention_interval_secs: 3_600,
            rate_limit_submit_per_min: 120,
            rate_limit_status_per_min: 240,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var("CHAT_DB_PATH") {
            config.db_path = val;
        }
        if let Ok(val) = env::var("CHAT_BUS_PARTITIONS")
            && let Ok(n) = val.parse::<usize>()
            && n > 0
        {
            config.bus_partitions = n;
        }
        if let Ok(val) = env::var("CHAT_TOKEN_SECRET") {
            config.token_secret = val;
        } else {
            eprintln!(
                "WARN: CHAT_TOKEN_SECRET not set, using insecure development default"
            );
        }
        if let Ok(val) = env::var("CHAT_TOKEN_TTL_SECS")
            && let Ok(n) = val.parse::<i64>()
        {
            config.token_ttl_secs = n;
        }
        if let Ok(val) = env::var("CHAT_DLQ_MAX_RETRIES")
            && let Ok(n) = val.parse::<u32>()
        {
            config.dlq_max_retries = n;
        }
        if let Ok(val) = env::var("CHAT_MESSAGE_TTL_DAYS")
            && let Ok(n) = val.parse::<i64>()
        {
            config.message_ttl_days = n;
        }
        if let Ok(val) = env::var("CHAT_RETENTION_INTERVAL_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.retention_interval_secs = n;
        }
        if let Ok(val) = env::var("CHAT_RATE_LIMIT_SUBMIT")
            && let Ok(n) = val.parse::<usize>()
        {
            config.rate_limit_submit_per_min = n;
        }
        if let Ok(val) = env::var("CHAT_RATE_LIMIT_STATUS")
            && let Ok(n) = val.parse::<usize>()
        {
            config.rate_limit_status_per_min = n;
        }

        config
    }
}
