// Copyright (c) 2024 Botho Foundation

//! Membership discovery and a replicated entity graph.
//!
//! Every participant keeps a local, eventually consistent view of which
//! participants, nodes and endpoints exist. This crate provides:
//!
//! - **Discovery Listener**: a background thread folding the membership
//!   records of all other participants into the local graph
//! - **Graph Cache**: the replicated graph itself, with last-writer-wins
//!   replacement per participant and suppression of looped-back local records
//! - **Graph Queries**: topic, service and node listings read straight from
//!   the cache, with optional demangling of middleware names
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                        DiscoveryContext                        │
//! ├────────────────────────────────────────────────────────────────┤
//! │  ┌───────────────────┐  ┌────────────┐  ┌───────────────────┐  │
//! │  │ DiscoveryListener │─►│ GraphCache │◄─│ GraphQueryService │  │
//! │  │  (worker thread)  │  │ (the graph)│  │    (listings)     │  │
//! │  └─────────▲─────────┘  └─────▲──────┘  └───────────────────┘  │
//! │            │ take             │ local edits                    │
//! │  ┌─────────┴──────────────────┴────────┐                       │
//! │  │ MembershipChannel (publish / take)  │                       │
//! │  └─────────────────────────────────────┘                       │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use rgraph_discovery::{DiscoveryConfig, DiscoveryContext, LoopbackBus};
//!
//! let config = DiscoveryConfig::default();
//! let bus = LoopbackBus::new(&config);
//! let context = DiscoveryContext::init(config, local_id, Arc::new(bus.endpoint()))?;
//!
//! context.create_node("talker", "/")?;
//! context.add_publisher("talker", "/", "/chatter", "std_msgs/msg/String")?;
//!
//! let mut topics = context.query().names_and_types();
//! context.query().list_topics(true, &mut topics)?;
//!
//! context.shutdown()?;
//! ```
//!
//! # Membership Records
//!
//! Participants publish full snapshots, never deltas:
//!
//! - [`EntityInfoRecord`]: the originating participant and all its nodes
//! - [`NodeEntry`]: a node and the readers and writers it owns
//!
//! # Configuration
//!
//! See [`DiscoveryConfig`] for the membership topic, channel durability and
//! history depth, listener thread name, fault escalation policy and default
//! query capacity.

#![warn(missing_docs)]
#![warn(unused_extern_crates)]

pub mod cache;
pub mod channel;
pub mod config;
pub mod context;
pub mod demangle;
pub mod error;
pub mod listener;
pub mod messages;
pub mod names_and_types;
pub mod query;
pub mod resources;
pub mod waitset;

// Re-export main types for convenience
pub use cache::GraphCache;
pub use channel::{BusEndpoint, LoopbackBus, MembershipChannel};
pub use config::{DiscoveryConfig, DiscoveryConfigBuilder, Durability, FaultEscalation};
pub use context::DiscoveryContext;
pub use demangle::DemangleFn;
pub use error::{DiscoveryError, DiscoveryResult};
pub use listener::{DiscoveryListener, WAIT_SET_CAPACITY};
pub use messages::{
    EndpointInfo, EndpointKind, EntityInfoRecord, NodeEntry, NodeName, PARTICIPANT_INFO_TOPIC,
};
pub use names_and_types::NamesAndTypes;
pub use query::GraphQueryService;
pub use resources::{ResourceCounter, ResourceToken};
pub use waitset::{GuardCondition, ReadySet, WaitSet, Waitable};
