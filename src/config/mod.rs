use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Unused by the ticker.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Redis connection string for durable jobs. In-memory store when unset.
    pub redis_url: Option<String>,

    /// Base URL of the member/contact API (e.g., "https://api.example.com/v1/")
    pub api_base_url: String,

    /// Bearer token for the member/contact API
    pub api_key: String,

    /// Timeout applied to every downstream request
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,

    /// Delay between items when a submission does not specify one
    #[serde(default = "default_delay_seconds")]
    pub default_delay_seconds: u64,

    /// How often the ticker binary sweeps durable jobs
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_step_timeout_secs() -> u64 {
    30
}

fn default_delay_seconds() -> u64 {
    1
}

fn default_tick_interval_ms() -> u64 {
    2000
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_apply() {
        let config: AppConfig = envy::from_iter(vars(&[
            ("API_BASE_URL", "https://api.example.com/v1/"),
            ("API_KEY", "secret"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.redis_url, None);
        assert_eq!(config.step_timeout(), Duration::from_secs(30));
        assert_eq!(config.default_delay_seconds, 1);
        assert_eq!(config.tick_interval(), Duration::from_millis(2000));
    }

    #[test]
    fn test_overrides_and_missing_keys() {
        let config: AppConfig = envy::from_iter(vars(&[
            ("API_BASE_URL", "http://localhost:9000/"),
            ("API_KEY", "k"),
            ("REDIS_URL", "redis://127.0.0.1/"),
            ("STEP_TIMEOUT_SECS", "5"),
            ("DEFAULT_DELAY_SECONDS", "0"),
        ]))
        .unwrap();
        assert_eq!(config.redis_url.as_deref(), Some("redis://127.0.0.1/"));
        assert_eq!(config.step_timeout_secs, 5);
        assert_eq!(config.default_delay_seconds, 0);

        let missing = envy::from_iter::<_, AppConfig>(vars(&[("API_KEY", "k")]));
        assert!(missing.is_err());
    }
}
