// Copyright (c) 2024 Botho Foundation

//! Read-only graph queries.
//!
//! Everything here reads the live [`GraphCache`] without blocking on the
//! network, so queries are safe to call from any thread while the listener
//! keeps applying records.

use crate::{
    cache::GraphCache,
    demangle::{self, DemangleFn, TOPIC_PREFIX},
    error::{DiscoveryError, DiscoveryResult},
    messages::NodeName,
    names_and_types::NamesAndTypes,
};
use std::sync::Arc;

/// Check that a topic name is absolute and well formed.
pub fn validate_topic_name(topic_name: &str) -> DiscoveryResult<()> {
    let reason = if topic_name.is_empty() {
        "must not be empty"
    } else if !topic_name.starts_with('/') {
        "must be absolute"
    } else if topic_name.len() > 1 && topic_name.ends_with('/') {
        "must not end with '/'"
    } else if topic_name.contains("//") {
        "must not contain empty segments"
    } else {
        return Ok(());
    };
    Err(DiscoveryError::InvalidArgument(format!(
        "topic name '{topic_name}' {reason}"
    )))
}

/// Façade translating cache contents into name listings.
#[derive(Debug, Clone)]
pub struct GraphQueryService {
    cache: Arc<GraphCache>,
    default_capacity: Option<usize>,
}

impl GraphQueryService {
    /// Query `cache` with unbounded default containers.
    pub fn new(cache: Arc<GraphCache>) -> Self {
        Self {
            cache,
            default_capacity: None,
        }
    }

    /// Use `capacity` for containers made by [`names_and_types`](Self::names_and_types).
    pub fn with_default_capacity(mut self, capacity: Option<usize>) -> Self {
        self.default_capacity = capacity;
        self
    }

    /// An empty result container using the configured capacity.
    pub fn names_and_types(&self) -> NamesAndTypes {
        match self.default_capacity {
            Some(capacity) => NamesAndTypes::with_capacity(capacity),
            None => NamesAndTypes::new(),
        }
    }

    /// The cache being queried.
    pub fn cache(&self) -> &Arc<GraphCache> {
        &self.cache
    }

    /// List topics and their types.
    ///
    /// With `demangle` only plain topics are listed, with the topic prefix and
    /// type mangling removed. Without it every endpoint's raw names are listed.
    pub fn list_topics(&self, demangle: bool, out: &mut NamesAndTypes) -> DiscoveryResult<()> {
        let (demangle_topic, demangle_type): (DemangleFn, DemangleFn) = if demangle {
            (demangle::topic_from_dds, demangle::type_from_dds)
        } else {
            (demangle::identity, demangle::identity)
        };
        self.cache
            .get_names_and_types(demangle_topic, demangle_type, out)
    }

    /// List services and their types.
    pub fn list_services(&self, out: &mut NamesAndTypes) -> DiscoveryResult<()> {
        self.cache.get_names_and_types(
            demangle::service_from_topic,
            demangle::service_type_from_dds,
            out,
        )
    }

    /// Every node in the graph, sorted by namespace and name.
    pub fn list_nodes(&self) -> Vec<NodeName> {
        let mut nodes = self.cache.node_names();
        nodes.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
        nodes
    }

    /// Number of publishers on a topic.
    pub fn count_publishers(&self, topic_name: &str) -> DiscoveryResult<usize> {
        validate_topic_name(topic_name)?;
        Ok(self.cache.count_publishers(&mangle_topic(topic_name)))
    }

    /// Number of subscribers on a topic.
    pub fn count_subscribers(&self, topic_name: &str) -> DiscoveryResult<usize> {
        validate_topic_name(topic_name)?;
        Ok(self.cache.count_subscribers(&mangle_topic(topic_name)))
    }
}

fn mangle_topic(topic_name: &str) -> String {
    demangle::mangle_topic(TOPIC_PREFIX, topic_name)
}
