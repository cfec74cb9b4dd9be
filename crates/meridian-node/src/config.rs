//! Node configuration loading and management.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use meridian_core::{validate_address, AccountId, AccountInfo, Relation};
use meridian_routing::{BroadcasterConfig, DefaultRoute, RelationPolicy, RoutingSecret, StaticRoute};

/// Full configuration for the Meridian node.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MeridianConfig {
    /// Addressing settings.
    #[serde(default)]
    pub node: NodeConfig,

    /// API server settings.
    #[serde(default)]
    pub api: ApiConfig,

    /// Route exchange settings.
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Peer HTTP transport settings.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Directly connected accounts.
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,

    /// Static routes.
    #[serde(default)]
    pub routes: Vec<StaticRoute>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// This node's own address.
    #[serde(default = "default_address")]
    pub address: String,
    /// Prefix shared by every address in the network.
    #[serde(default = "default_global_prefix")]
    pub global_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API listen address.
    #[serde(default = "default_api_addr")]
    pub listen_addr: String,
    /// API port.
    #[serde(default = "default_api_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default = "default_true")]
    pub broadcast_enabled: bool,
    #[serde(default = "default_broadcast_interval_ms")]
    pub broadcast_interval_ms: u64,
    /// Hold-down time advertised to peers.
    #[serde(default = "default_route_expiry_ms")]
    pub route_expiry_ms: u64,
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,
    #[serde(default = "default_route_control_retry_ms")]
    pub route_control_retry_ms: u64,
    /// `"auto"`, an account id, or empty for no default route.
    #[serde(default = "default_default_route")]
    pub default_route: String,
    /// Hex-encoded 32-byte secret. Random per process when unset.
    #[serde(default)]
    pub routing_secret: Option<String>,
    #[serde(default)]
    pub relation_policy: RelationPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (text, json).
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// How often each peer's health endpoint is polled.
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
    /// Timeout for a single HTTP request to a peer.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub id: String,
    pub relation: Relation,
    /// Base URL of the peer's node. Accounts without one are never connected.
    #[serde(default)]
    pub url: Option<String>,
    /// The id the peer knows us by. Defaults to the last segment of our address.
    #[serde(default)]
    pub remote_account_id: Option<String>,
    #[serde(default)]
    pub send_routes: Option<bool>,
    #[serde(default)]
    pub receive_routes: Option<bool>,
}

// Default value functions
fn default_address() -> String {
    "g.meridian".into()
}
fn default_global_prefix() -> String {
    "g".into()
}
fn default_api_addr() -> String {
    "127.0.0.1".into()
}
fn default_api_port() -> u16 {
    7770
}
fn default_true() -> bool {
    true
}
fn default_broadcast_interval_ms() -> u64 {
    30_000
}
fn default_route_expiry_ms() -> u64 {
    45_000
}
fn default_cleanup_interval_ms() -> u64 {
    1_000
}
fn default_route_control_retry_ms() -> u64 {
    30_000
}
fn default_default_route() -> String {
    "auto".into()
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}
fn default_probe_interval_ms() -> u64 {
    5_000
}
fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            global_prefix: default_global_prefix(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_api_addr(),
            port: default_api_port(),
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            broadcast_enabled: true,
            broadcast_interval_ms: default_broadcast_interval_ms(),
            route_expiry_ms: default_route_expiry_ms(),
            cleanup_interval_ms: default_cleanup_interval_ms(),
            route_control_retry_ms: default_route_control_retry_ms(),
            default_route: default_default_route(),
            routing_secret: None,
            relation_policy: RelationPolicy::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: default_probe_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl AccountConfig {
    /// Header value identifying us to this peer.
    pub fn remote_id(&self, own_address: &str) -> String {
        self.remote_account_id.clone().unwrap_or_else(|| {
            own_address
                .rsplit('.')
                .next()
                .unwrap_or(own_address)
                .to_string()
        })
    }
}

impl MeridianConfig {
    /// Load config from a TOML file, falling back to defaults for missing fields.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: MeridianConfig = toml::from_str(&contents)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save the current config to a TOML file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the API socket address string.
    pub fn api_addr(&self) -> String {
        format!("{}:{}", self.api.listen_addr, self.api.port)
    }

    /// Validated account list for the account registry.
    pub fn account_infos(&self) -> anyhow::Result<Vec<AccountInfo>> {
        self.accounts
            .iter()
            .map(|account| -> anyhow::Result<AccountInfo> {
                let id = AccountId::new(account.id.clone())?;
                Ok(AccountInfo {
                    send_routes: account.send_routes,
                    receive_routes: account.receive_routes,
                    ..AccountInfo::new(id, account.relation)
                })
            })
            .collect()
    }

    /// Validated settings for the route broadcaster.
    pub fn broadcaster_config(&self) -> anyhow::Result<BroadcasterConfig> {
        validate_address(&self.node.address)?;
        validate_address(&self.node.global_prefix)?;
        if !self.node.address.starts_with(&self.node.global_prefix) {
            anyhow::bail!(
                "node address {} is outside the global prefix {}",
                self.node.address,
                self.node.global_prefix
            );
        }
        self.routing.relation_policy.validate()?;
        let routing_secret = self
            .routing
            .routing_secret
            .as_deref()
            .map(RoutingSecret::from_hex)
            .transpose()?;

        Ok(BroadcasterConfig {
            own_address: self.node.address.clone(),
            global_prefix: self.node.global_prefix.clone(),
            broadcast_enabled: self.routing.broadcast_enabled,
            broadcast_interval: Duration::from_millis(self.routing.broadcast_interval_ms),
            route_expiry: Duration::from_millis(self.routing.route_expiry_ms),
            cleanup_interval: Duration::from_millis(self.routing.cleanup_interval_ms),
            route_control_retry: Duration::from_millis(self.routing.route_control_retry_ms),
            default_route: DefaultRoute::parse(&self.routing.default_route),
            static_routes: self.routes.clone(),
            relation_policy: self.routing.relation_policy,
            routing_secret,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MeridianConfig::default();
        assert_eq!(config.node.address, "g.meridian");
        assert_eq!(config.node.global_prefix, "g");
        assert_eq!(config.api.port, 7770);
        assert_eq!(config.routing.broadcast_interval_ms, 30_000);
        assert_eq!(config.routing.route_expiry_ms, 45_000);
        assert_eq!(config.routing.default_route, "auto");
        assert_eq!(config.logging.level, "info");
        assert!(config.accounts.is_empty());
    }

    #[test]
    fn test_api_addr() {
        let config = MeridianConfig::default();
        assert_eq!(config.api_addr(), "127.0.0.1:7770");
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = MeridianConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let decoded: MeridianConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(decoded.node.address, config.node.address);
        assert_eq!(decoded.api.port, config.api.port);
    }

    #[test]
    fn test_config_load_nonexistent_uses_defaults() {
        let config = MeridianConfig::load(Path::new("/nonexistent/meridian.toml")).unwrap();
        assert_eq!(config.api.port, 7770);
    }

    #[test]
    fn test_config_from_toml_partial() {
        let toml_str = r#"
[node]
address = "g.hub"

[routing]
broadcast_interval_ms = 5000
default_route = ""

[routing.relation_policy]
child = 10

[[accounts]]
id = "upstream"
relation = "parent"
url = "http://127.0.0.1:7771"

[[accounts]]
id = "alice"
relation = "child"
receive_routes = true

[[routes]]
target_prefix = "g.partner"
peer_id = "upstream"
"#;
        let config: MeridianConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.node.address, "g.hub");
        assert_eq!(config.node.global_prefix, "g");
        assert_eq!(config.routing.route_expiry_ms, 45_000);
        assert_eq!(config.routing.relation_policy.child, 10);
        assert_eq!(config.routing.relation_policy.peer, 1);
        assert_eq!(config.accounts.len(), 2);
        assert_eq!(config.accounts[1].receive_routes, Some(true));

        let broadcaster = config.broadcaster_config().unwrap();
        assert_eq!(broadcaster.broadcast_interval, Duration::from_secs(5));
        assert_eq!(broadcaster.default_route, DefaultRoute::Disabled);
        assert_eq!(broadcaster.static_routes[0].peer_id.as_str(), "upstream");

        let accounts = config.account_infos().unwrap();
        assert_eq!(accounts[0].relation, Relation::Parent);
        assert!(accounts[1].receives_routes());
        assert!(!accounts[1].sends_routes());
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let mut config = MeridianConfig::default();
        config.routing.routing_secret = Some("abcd".into());
        assert!(config.broadcaster_config().is_err());

        let mut config = MeridianConfig::default();
        config.routing.relation_policy.parent = 5;
        assert!(config.broadcaster_config().is_err());

        let mut config = MeridianConfig::default();
        config.node.address = "x.elsewhere".into();
        assert!(config.broadcaster_config().is_err());
    }

    #[test]
    fn test_remote_id_defaults_to_last_segment() {
        let account = AccountConfig {
            id: "upstream".into(),
            relation: Relation::Parent,
            url: None,
            remote_account_id: None,
            send_routes: None,
            receive_routes: None,
        };
        assert_eq!(account.remote_id("g.hub"), "hub");
    }
}
