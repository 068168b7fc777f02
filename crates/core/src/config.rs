use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `AUTOPILOT__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub savings: SavingsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_max_concurrent_rules")]
    pub max_concurrent_rules: usize,
    #[serde(default = "default_max_concurrent_entities")]
    pub max_concurrent_entities_per_rule: usize,
    /// Upper bound on every metric fetch, platform call and store write.
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SavingsStrategy {
    /// Spend avoided by pauses and budget reductions.
    SpendAvoided,
    /// Flat amount per applied action.
    FixedPerAction,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SavingsConfig {
    #[serde(default = "default_savings_strategy")]
    pub strategy: SavingsStrategy,
    #[serde(default = "default_fixed_amount")]
    pub fixed_amount: f64,
}

// Default functions
fn default_node_id() -> String {
    "autopilot-01".to_string()
}
fn default_tick_interval_secs() -> u64 {
    60
}
fn default_max_concurrent_rules() -> usize {
    8
}
fn default_max_concurrent_entities() -> usize {
    4
}
fn default_io_timeout_ms() -> u64 {
    10_000
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_savings_strategy() -> SavingsStrategy {
    SavingsStrategy::SpendAvoided
}
fn default_fixed_amount() -> f64 {
    10.0
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            max_concurrent_rules: default_max_concurrent_rules(),
            max_concurrent_entities_per_rule: default_max_concurrent_entities(),
            io_timeout_ms: default_io_timeout_ms(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl Default for SavingsConfig {
    fn default() -> Self {
        Self {
            strategy: default_savings_strategy(),
            fixed_amount: default_fixed_amount(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            scheduler: SchedulerConfig::default(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            savings: SavingsConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("AUTOPILOT")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.scheduler.tick_interval_secs, 60);
        assert_eq!(config.scheduler.max_concurrent_rules, 8);
        assert_eq!(config.scheduler.max_concurrent_entities_per_rule, 4);
        assert_eq!(config.savings.strategy, SavingsStrategy::SpendAvoided);
    }

    #[test]
    fn test_partial_section_uses_field_defaults() {
        let config: AppConfig = serde_json::from_value(serde_json::json!({
            "scheduler": { "tick_interval_secs": 5 },
            "savings": { "strategy": "fixed_per_action", "fixed_amount": 2.5 }
        }))
        .unwrap();
        assert_eq!(config.scheduler.tick_interval_secs, 5);
        assert_eq!(config.scheduler.io_timeout_ms, 10_000);
        assert_eq!(config.savings.strategy, SavingsStrategy::FixedPerAction);
        assert_eq!(config.api.http_port, 8080);
    }
}
