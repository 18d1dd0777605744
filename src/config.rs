//! Server configuration.
//!
//! Every section carries `#[serde(default)]`, so a JSON document only needs
//! the keys it wants to override:
//!
//! ```json
//! { "application_uri": "urn:plant:server",
//!   "subscriptions": { "max_subscriptions_per_session": 10 },
//!   "history": { "default_capacity": 5000 } }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::model::{ids, NodeId};
use crate::{Error, Result};

// =============================================================================
// ServerConfig
// =============================================================================

/// Top-level configuration of a [`ServerRuntime`](crate::ServerRuntime).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Application URI; becomes namespace 1.
    pub application_uri: String,
    /// Human readable server name, used as the registry key.
    pub application_name: String,
    /// Additional namespace URIs registered at startup (index 2 onwards).
    pub namespaces: Vec<String>,
    /// Pause between loop iterations of the async run loop, in milliseconds.
    pub iterate_interval_ms: u64,
    pub address_space: AddressSpaceConfig,
    pub subscriptions: SubscriptionLimits,
    pub history: HistoryConfig,
    pub sessions: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            application_uri: "urn:opcua-engine:server".to_string(),
            application_name: "opcua-engine".to_string(),
            namespaces: Vec::new(),
            iterate_interval_ms: 50,
            address_space: AddressSpaceConfig::default(),
            subscriptions: SubscriptionLimits::default(),
            history: HistoryConfig::default(),
            sessions: SessionConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a JSON document and validate.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: ServerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn with_application_uri(mut self, uri: impl Into<String>) -> Self {
        self.application_uri = uri.into();
        self
    }

    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    pub fn with_history(mut self, history: HistoryConfig) -> Self {
        self.history = history;
        self
    }

    pub fn with_subscriptions(mut self, limits: SubscriptionLimits) -> Self {
        self.subscriptions = limits;
        self
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.application_uri.is_empty() {
            return Err(Error::Config("application_uri must not be empty".into()));
        }
        if self.address_space.default_namespace == 0 {
            return Err(Error::Config("default_namespace 0 is reserved".into()));
        }
        if self.address_space.hierarchical_delete_types.is_empty() {
            return Err(Error::Config("hierarchical_delete_types must not be empty".into()));
        }
        self.subscriptions.validate()?;
        self.history.validate()?;
        if self.sessions.max_sessions == 0 {
            return Err(Error::Config("max_sessions must be positive".into()));
        }
        if self.sessions.default_timeout_ms <= 0.0
            || self.sessions.default_timeout_ms > self.sessions.max_timeout_ms
        {
            return Err(Error::Config("session default_timeout_ms out of range".into()));
        }
        Ok(())
    }
}

// =============================================================================
// AddressSpaceConfig
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressSpaceConfig {
    /// Namespace for generated node ids.
    pub default_namespace: u16,
    /// First numeric identifier handed out for generated ids.
    pub first_generated_id: u32,
    /// Reference types followed when deleting a subtree.
    pub hierarchical_delete_types: Vec<NodeId>,
}

impl Default for AddressSpaceConfig {
    fn default() -> Self {
        Self {
            default_namespace: 1,
            first_generated_id: 1000,
            hierarchical_delete_types: vec![
                ids::HAS_COMPONENT,
                ids::HAS_ORDERED_COMPONENT,
                ids::HAS_PROPERTY,
                ids::ORGANIZES,
            ],
        }
    }
}

// =============================================================================
// SubscriptionLimits
// =============================================================================

/// Bounds the server revises subscription and monitored-item requests into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionLimits {
    pub min_publishing_interval_ms: f64,
    pub max_publishing_interval_ms: f64,
    pub min_sampling_interval_ms: f64,
    pub max_sampling_interval_ms: f64,
    pub max_keep_alive_count: u32,
    pub max_lifetime_count: u32,
    /// Upper bound on notifications per message; also used when a client
    /// asks for 0 (no limit).
    pub max_notifications_per_publish: u32,
    pub max_subscriptions_per_session: usize,
    pub max_monitored_items_per_subscription: usize,
    pub max_queue_size: u32,
    pub max_publish_requests_per_session: usize,
    /// Sent messages kept for Republish until acknowledged.
    pub max_retransmission_queue: usize,
}

impl Default for SubscriptionLimits {
    fn default() -> Self {
        Self {
            min_publishing_interval_ms: 10.0,
            max_publishing_interval_ms: 3_600_000.0,
            min_sampling_interval_ms: 0.0,
            max_sampling_interval_ms: 3_600_000.0,
            max_keep_alive_count: 10_000,
            max_lifetime_count: 30_000,
            max_notifications_per_publish: 1000,
            max_subscriptions_per_session: 100,
            max_monitored_items_per_subscription: 1000,
            max_queue_size: 100,
            max_publish_requests_per_session: 10,
            max_retransmission_queue: 10,
        }
    }
}

impl SubscriptionLimits {
    fn validate(&self) -> Result<()> {
        if self.min_publishing_interval_ms <= 0.0
            || self.min_publishing_interval_ms > self.max_publishing_interval_ms
        {
            return Err(Error::Config("publishing interval bounds are inconsistent".into()));
        }
        if self.min_sampling_interval_ms < 0.0
            || self.min_sampling_interval_ms > self.max_sampling_interval_ms
        {
            return Err(Error::Config("sampling interval bounds are inconsistent".into()));
        }
        if self.max_keep_alive_count == 0 || self.max_lifetime_count < 3 {
            return Err(Error::Config("keep-alive/lifetime bounds too small".into()));
        }
        if self.max_queue_size == 0 || self.max_notifications_per_publish == 0 {
            return Err(Error::Config("queue and message sizes must be positive".into()));
        }
        Ok(())
    }
}

// =============================================================================
// HistoryConfig
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Ring-buffer capacity per node unless overridden at registration.
    pub default_capacity: usize,
    /// Maximum values returned per `read_raw` call.
    pub page_size: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { default_capacity: 1000, page_size: 1000 }
    }
}

impl HistoryConfig {
    fn validate(&self) -> Result<()> {
        if self.default_capacity == 0 || self.page_size == 0 {
            return Err(Error::Config("history capacity and page size must be positive".into()));
        }
        Ok(())
    }
}

// =============================================================================
// SessionConfig
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub max_sessions: usize,
    pub default_timeout_ms: f64,
    pub max_timeout_ms: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { max_sessions: 100, default_timeout_ms: 60_000.0, max_timeout_ms: 3_600_000.0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        ServerConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = ServerConfig::from_json_str(
            r#"{ "application_uri": "urn:plant", "history": { "default_capacity": 5 } }"#,
        )
        .unwrap();
        assert_eq!(config.application_uri, "urn:plant");
        assert_eq!(config.history.default_capacity, 5);
        assert_eq!(config.history.page_size, 1000);
        assert_eq!(config.address_space.default_namespace, 1);
    }

    #[test]
    fn test_validate_rejects_bad_bounds() {
        let mut config = ServerConfig::default();
        config.history.page_size = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let err = ServerConfig::from_json_str(r#"{ "address_space": { "default_namespace": 0 } }"#);
        assert!(matches!(err, Err(Error::Config(_))));
    }

    #[test]
    fn test_json_round_trip() {
        let config = ServerConfig::default().with_application_uri("urn:x");
        let text = config.to_json_string().unwrap();
        assert_eq!(ServerConfig::from_json_str(&text).unwrap(), config);
    }
}
