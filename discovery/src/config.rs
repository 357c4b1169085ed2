// Copyright (c) 2024 Botho Foundation

//! Configuration for the discovery context.

use crate::{
    error::{DiscoveryError, DiscoveryResult},
    messages::PARTICIPANT_INFO_TOPIC,
};
use serde::{Deserialize, Serialize};

/// How long published membership records stay available to new subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Durability {
    /// The channel keeps the last `history_depth` records of every publisher
    /// and replays them to late joiners.
    #[default]
    TransientLocal,
    /// Only subscribers present at publish time receive a record.
    Volatile,
}

/// What the listener does when its wait or take primitives fail.
///
/// A process that silently stops learning about the fleet serves stale
/// listings forever, so a loop fault is never swallowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FaultEscalation {
    /// Log and abort the process.
    #[default]
    Abort,
    /// Log and panic the worker thread only. The listener then reports itself
    /// stopped and `join()` returns a stop error.
    ///
    /// Only settable through [`DiscoveryConfigBuilder`]; config files always
    /// abort.
    #[serde(skip_deserializing)]
    Panic,
}

/// Configuration for the discovery context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Name of the membership topic records are published on
    pub membership_topic: String,

    /// Records retained per publisher for late joiners
    pub history_depth: usize,

    /// Durability of the membership channel
    pub durability: Durability,

    /// Name given to the listener worker thread
    pub listener_thread_name: String,

    /// Escalation policy for faults inside the listener loop
    pub fault_escalation: FaultEscalation,

    /// Default entry limit for query results (`None` for unbounded)
    pub query_capacity: Option<usize>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            membership_topic: PARTICIPANT_INFO_TOPIC.to_string(),
            history_depth: 1,
            durability: Durability::default(),
            listener_thread_name: "graph-listener".to_string(),
            fault_escalation: FaultEscalation::default(),
            query_capacity: None,
        }
    }
}

impl DiscoveryConfig {
    /// Parse a config from TOML and validate it.
    pub fn from_toml_str(src: &str) -> DiscoveryResult<Self> {
        let config: Self = toml::from_str(src)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the config for values the listener and channel cannot honor.
    pub fn validate(&self) -> DiscoveryResult<()> {
        if self.membership_topic.is_empty() {
            return Err(DiscoveryError::Config(
                "membership_topic must not be empty".to_string(),
            ));
        }
        if self.history_depth == 0 {
            return Err(DiscoveryError::Config(
                "history_depth must be at least 1".to_string(),
            ));
        }
        if self.listener_thread_name.contains('\0') {
            return Err(DiscoveryError::Config(
                "listener_thread_name must not contain NUL".to_string(),
            ));
        }
        if self.query_capacity == Some(0) {
            return Err(DiscoveryError::Config(
                "query_capacity must be positive when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for DiscoveryConfig.
#[derive(Debug, Default)]
pub struct DiscoveryConfigBuilder {
    config: DiscoveryConfig,
}

impl DiscoveryConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the membership topic.
    pub fn membership_topic(mut self, topic: impl Into<String>) -> Self {
        self.config.membership_topic = topic.into();
        self
    }

    /// Set the history depth.
    pub fn history_depth(mut self, depth: usize) -> Self {
        self.config.history_depth = depth;
        self
    }

    /// Set the durability.
    pub fn durability(mut self, durability: Durability) -> Self {
        self.config.durability = durability;
        self
    }

    /// Set the listener thread name.
    pub fn listener_thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.listener_thread_name = name.into();
        self
    }

    /// Set the fault escalation policy.
    pub fn fault_escalation(mut self, escalation: FaultEscalation) -> Self {
        self.config.fault_escalation = escalation;
        self
    }

    /// Set the default query capacity.
    pub fn query_capacity(mut self, capacity: Option<usize>) -> Self {
        self.config.query_capacity = capacity;
        self
    }

    /// Build the config.
    pub fn build(self) -> DiscoveryConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DiscoveryConfig::default();
        assert_eq!(config.membership_topic, "_participant_info");
        assert_eq!(config.history_depth, 1);
        assert_eq!(config.durability, Durability::TransientLocal);
        assert_eq!(config.fault_escalation, FaultEscalation::Abort);
        assert!(config.query_capacity.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = DiscoveryConfigBuilder::new()
            .history_depth(4)
            .durability(Durability::Volatile)
            .fault_escalation(FaultEscalation::Panic)
            .listener_thread_name("listener-a")
            .query_capacity(Some(16))
            .build();

        assert_eq!(config.history_depth, 4);
        assert_eq!(config.durability, Durability::Volatile);
        assert_eq!(config.fault_escalation, FaultEscalation::Panic);
        assert_eq!(config.listener_thread_name, "listener-a");
        assert_eq!(config.query_capacity, Some(16));
    }

    #[test]
    fn test_config_from_toml() {
        let config = DiscoveryConfig::from_toml_str(
            r#"
            history_depth = 2
            durability = "volatile"
            fault_escalation = "abort"
            "#,
        )
        .unwrap();

        assert_eq!(config.history_depth, 2);
        assert_eq!(config.durability, Durability::Volatile);
        assert_eq!(config.fault_escalation, FaultEscalation::Abort);
        // Unset fields fall back to defaults
        assert_eq!(config.membership_topic, "_participant_info");
    }

    #[test]
    fn test_config_validation() {
        let zero_depth = DiscoveryConfigBuilder::new().history_depth(0).build();
        assert!(matches!(
            zero_depth.validate(),
            Err(DiscoveryError::Config(_))
        ));

        let empty_topic = DiscoveryConfigBuilder::new().membership_topic("").build();
        assert!(empty_topic.validate().is_err());

        assert!(DiscoveryConfig::from_toml_str("history_depth = 0").is_err());
        assert!(DiscoveryConfig::from_toml_str("durability = \"forever\"").is_err());
    }

    #[test]
    fn test_config_file_cannot_disable_abort() {
        assert!(matches!(
            DiscoveryConfig::from_toml_str("fault_escalation = \"panic\""),
            Err(DiscoveryError::Config(_))
        ));
    }
}
