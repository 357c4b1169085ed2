// Copyright (c) 2024 Botho Foundation

//! Error types for the discovery module.

use displaydoc::Display;
use thiserror::Error;

/// Errors that can occur in the discovery module.
#[derive(Debug, Display, Error)]
pub enum DiscoveryError {
    /// Invalid argument: {0}
    InvalidArgument(String),

    /// Failed to start the discovery listener: {0}
    Start(String),

    /// Failed to stop the discovery listener: {0}
    Stop(String),

    /// Discovery listener is already running
    AlreadyRunning,

    /// Discovery listener is not running
    NotRunning,

    /// No {0} left to allocate
    ResourceExhausted(&'static str),

    /// Wait set is full (capacity {0})
    WaitSetFull(usize),

    /// Wait set has nothing to wait on
    WaitSetEmpty,

    /// Membership channel closed
    ChannelClosed,

    /// Result container is full (capacity {0})
    CapacityExceeded(usize),

    /// Node not found: {0}
    NodeNotFound(String),

    /// Node already exists: {0}
    NodeExists(String),

    /// Invalid configuration: {0}
    Config(String),
}

impl From<toml::de::Error> for DiscoveryError {
    fn from(err: toml::de::Error) -> Self {
        DiscoveryError::Config(err.to_string())
    }
}

/// Result type for discovery operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;
