//! Process configuration, loaded once at startup from the environment.
//! Plain env lookups with typed defaults, no config file, `dotenv`
//! loaded first.

use anyhow::Result;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub aws_region: String,

    pub influxdb_endpoint: String,
    pub influxdb_port: u16,
    pub influxdb_database: String,
    pub influxdb_secret_arn: String,

    pub data_bucket: String,
    pub fetch_news_content: bool,

    pub api_keys_secret_arn: String,

    pub massive_base_url: String,
    pub massive_ws_url: String,
    pub massive_delayed_ws_url: String,

    pub default_watchlist: Vec<String>,

    pub health_check_port: u16,
    pub enable_realtime: bool,
    pub enable_scheduler: bool,
    pub log_level: String,
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn env_u16(key: &str, default: u16) -> u16 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let default_watchlist = env_string("DEFAULT_WATCHLIST", "AAPL,TSLA,NVDA,AMZN,GOOGL")
            .split(',')
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            aws_region: env_string("AWS_REGION", "us-west-2"),

            influxdb_endpoint: env_string("INFLUXDB_ENDPOINT", ""),
            influxdb_port: env_u16("INFLUXDB_PORT", 8181),
            influxdb_database: env_string("INFLUXDB_DATABASE", "market_data"),
            influxdb_secret_arn: env_string("INFLUXDB_SECRET_ARN", ""),

            data_bucket: env_string("DATA_BUCKET", ""),
            fetch_news_content: env_bool("FETCH_NEWS_CONTENT", false),

            api_keys_secret_arn: env_string("API_KEYS_SECRET_ARN", "wavepilot/api-keys"),

            massive_base_url: env_string("MASSIVE_BASE_URL", "https://api.massive.com"),
            massive_ws_url: env_string("MASSIVE_WS_URL", "wss://stream.massive.com/v2/iex"),
            massive_delayed_ws_url: env_string(
                "MASSIVE_DELAYED_WS_URL",
                "wss://delayed.massive.com/stocks",
            ),

            default_watchlist,

            health_check_port: env_u16("HEALTH_CHECK_PORT", 8080),
            enable_realtime: env_bool("ENABLE_REALTIME", true),
            enable_scheduler: env_bool("ENABLE_SCHEDULER", true),
            log_level: env_string("LOG_LEVEL", "info"),
        })
    }

    pub fn has_timeseries_store(&self) -> bool {
        !self.influxdb_endpoint.is_empty()
    }

    pub fn has_object_store(&self) -> bool {
        !self.data_bucket.is_empty()
    }
}

/// HTTP timeout applied to every upstream REST call.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_watchlist_parses_and_uppercases() {
        env::remove_var("DEFAULT_WATCHLIST");
        let cfg = Config::from_env().unwrap();
        assert_eq!(
            cfg.default_watchlist,
            vec!["AAPL", "TSLA", "NVDA", "AMZN", "GOOGL"]
        );
    }

    #[test]
    fn health_port_defaults_to_8080() {
        env::remove_var("HEALTH_CHECK_PORT");
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.health_check_port, 8080);
    }
}
