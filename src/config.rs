use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub enable_tracing: bool,
    pub gateway: GatewayConfig,
    /// PostgreSQL connection URL for durable stores. Absent means the
    /// in-memory stores (mock-api builds only).
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub deposit: DepositConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WebhookConfig {
    /// Shared secret appended to the canonical payload before hashing.
    pub secret: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: "dev-secret".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DepositConfig {
    pub poll_interval_secs: u64,
    pub max_attempts: i32,
    pub window_limit: u32,
    /// Custodial receive address the indexer is queried for.
    pub receive_address: String,
    pub indexer_url: String,
    pub lease_ttl_secs: u64,
}

impl Default for DepositConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            max_attempts: 20,
            window_limit: 100,
            receive_address: String::new(),
            indexer_url: "http://localhost:8081".to_string(),
            lease_ttl_secs: 50,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SettlementConfig {
    pub price_feed_url: String,
    pub rpc_url: String,
    pub fallback_rpc_url: Option<String>,
    pub signing_key: String,
    /// Flat network fee in native nano-units.
    pub network_fee_nano: i64,
    pub confirm_interval_ms: u64,
    pub confirm_max_attempts: u32,
    pub recovery_scan_secs: u64,
    pub stale_threshold_secs: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            price_feed_url: "http://localhost:8082/rate".to_string(),
            rpc_url: "http://localhost:8083".to_string(),
            fallback_rpc_url: None,
            signing_key: String::new(),
            network_fee_nano: 10_000_000,
            confirm_interval_ms: 3000,
            confirm_max_attempts: 20,
            recovery_scan_secs: 30,
            stale_threshold_secs: 300,
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Self {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .unwrap_or_else(|_| panic!("Failed to read config file: {}", config_path));
        serde_yaml::from_str(&content).expect("Failed to parse config yaml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_yaml_parses_with_defaults() {
        let yaml = r#"
log_level: info
log_dir: logs
log_file: settlecore.log
use_json: false
rotation: daily
enable_tracing: true
gateway:
  host: 127.0.0.1
  port: 8080
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.gateway.port, 8080);
        assert!(config.postgres_url.is_none());
        assert_eq!(config.deposit.max_attempts, 20);
        assert_eq!(config.settlement.confirm_max_attempts, 20);
        assert_eq!(config.webhook.secret, "dev-secret");
    }
}
