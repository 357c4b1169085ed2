// Copyright (c) 2024 Botho Foundation

//! Per-participant discovery context.
//!
//! A [`DiscoveryContext`] bundles everything one participant needs: the graph
//! cache seeded with its own id, the membership channel, the running listener
//! and a query service. Local node and endpoint changes go through the context
//! so that each one is followed by a fresh snapshot on the channel.

use crate::{
    cache::GraphCache,
    channel::MembershipChannel,
    config::DiscoveryConfig,
    demangle::{self, SERVICE_REQUEST_PREFIX, SERVICE_RESPONSE_PREFIX, TOPIC_PREFIX},
    error::DiscoveryResult,
    listener::DiscoveryListener,
    messages::{EndpointInfo, EndpointKind, EntityInfoRecord},
    query::{validate_topic_name, GraphQueryService},
};
use rgraph_common::EntityId;
use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc, Mutex, PoisonError,
};
use tracing::{debug, info};

/// One participant's discovery state.
pub struct DiscoveryContext {
    // Declared first so the worker is joined before anything else is dropped.
    listener: DiscoveryListener,
    config: DiscoveryConfig,
    local_id: EntityId,
    cache: Arc<GraphCache>,
    channel: Arc<dyn MembershipChannel>,
    query: GraphQueryService,
    next_entity_key: AtomicU32,
    // Serializes "edit cache, publish snapshot" so snapshots go out in order.
    update_lock: Mutex<()>,
}

impl DiscoveryContext {
    /// Seed the cache, start the listener and announce the participant.
    pub fn init(
        config: DiscoveryConfig,
        local_id: EntityId,
        channel: Arc<dyn MembershipChannel>,
    ) -> DiscoveryResult<Self> {
        config.validate()?;

        let cache = Arc::new(GraphCache::new());
        cache.add_local_entry(local_id);

        let query =
            GraphQueryService::new(cache.clone()).with_default_capacity(config.query_capacity);
        let mut listener = DiscoveryListener::new(&config, cache.clone(), channel.clone());
        listener.start()?;

        let context = Self {
            listener,
            config,
            local_id,
            cache,
            channel,
            query,
            next_entity_key: AtomicU32::new(1),
            update_lock: Mutex::new(()),
        };
        context.announce()?;

        info!(
            participant = %local_id,
            topic = %context.config.membership_topic,
            "Discovery context initialized"
        );
        Ok(context)
    }

    /// The local participant id.
    pub fn local_id(&self) -> EntityId {
        self.local_id
    }

    /// The config the context was created with.
    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// The local graph cache.
    pub fn cache(&self) -> &Arc<GraphCache> {
        &self.cache
    }

    /// Queries over the local graph cache.
    pub fn query(&self) -> &GraphQueryService {
        &self.query
    }

    /// Whether the listener is running.
    pub fn is_running(&self) -> bool {
        self.listener.is_running()
    }

    fn update<F>(&self, edit: F) -> DiscoveryResult<EntityInfoRecord>
    where
        F: FnOnce(&GraphCache) -> DiscoveryResult<EntityInfoRecord>,
    {
        let _guard = self.update_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let record = edit(&self.cache)?;
        self.channel.publish(&record)?;
        debug!(
            participant = %self.local_id,
            nodes = record.node_entries.len(),
            "Published participant snapshot"
        );
        Ok(record)
    }

    /// Publish the current local snapshot again.
    pub fn announce(&self) -> DiscoveryResult<EntityInfoRecord> {
        self.update(GraphCache::local_record)
    }

    /// Register a node.
    pub fn create_node(&self, node_name: &str, node_namespace: &str) -> DiscoveryResult<()> {
        self.update(|cache| cache.add_node(node_name, node_namespace))?;
        info!(node_name, node_namespace, "Created node");
        Ok(())
    }

    /// Unregister a node and forget the endpoints it owned.
    pub fn destroy_node(&self, node_name: &str, node_namespace: &str) -> DiscoveryResult<()> {
        self.update(|cache| {
            let owned: Vec<EntityId> = cache
                .node_entries(&self.local_id)
                .unwrap_or_default()
                .into_iter()
                .filter(|entry| entry.is_node(node_name, node_namespace))
                .flat_map(|entry| entry.writer_gids.into_iter().chain(entry.reader_gids))
                .collect();

            let record = cache.remove_node(node_name, node_namespace)?;
            for gid in &owned {
                cache.remove_endpoint(gid);
            }
            Ok(record)
        })?;
        info!(node_name, node_namespace, "Destroyed node");
        Ok(())
    }

    fn next_gid(&self) -> EntityId {
        let key = self.next_entity_key.fetch_add(1, Ordering::Relaxed);
        self.local_id.derive_endpoint(key)
    }

    fn add_endpoint(
        &self,
        node_name: &str,
        node_namespace: &str,
        topic_name: String,
        type_name: String,
        kind: EndpointKind,
    ) -> DiscoveryResult<EndpointInfo> {
        let info = EndpointInfo::new(self.next_gid(), self.local_id, topic_name, type_name, kind);

        self.update(|cache| {
            let record = match kind {
                EndpointKind::Writer => cache.associate_writer(info.gid, node_name, node_namespace),
                EndpointKind::Reader => cache.associate_reader(info.gid, node_name, node_namespace),
            }?;
            cache.add_endpoint(info.clone());
            Ok(record)
        })?;

        debug!(
            endpoint = %info.gid,
            topic = %info.topic_name,
            kind = ?kind,
            "Added local endpoint"
        );
        Ok(info)
    }

    fn remove_endpoint(
        &self,
        gid: &EntityId,
        node_name: &str,
        node_namespace: &str,
        kind: EndpointKind,
    ) -> DiscoveryResult<()> {
        self.update(|cache| {
            let record = match kind {
                EndpointKind::Writer => cache.dissociate_writer(gid, node_name, node_namespace),
                EndpointKind::Reader => cache.dissociate_reader(gid, node_name, node_namespace),
            }?;
            cache.remove_endpoint(gid);
            Ok(record)
        })?;
        Ok(())
    }

    /// Create a publisher on `topic_name` (e.g. `/chatter`) carrying
    /// `type_name` (e.g. `std_msgs/msg/String`).
    ///
    /// The returned metadata is what endpoint discovery reports to other
    /// participants.
    pub fn add_publisher(
        &self,
        node_name: &str,
        node_namespace: &str,
        topic_name: &str,
        type_name: &str,
    ) -> DiscoveryResult<EndpointInfo> {
        validate_topic_name(topic_name)?;
        self.add_endpoint(
            node_name,
            node_namespace,
            demangle::mangle_topic(TOPIC_PREFIX, topic_name),
            demangle::mangle_type(type_name),
            EndpointKind::Writer,
        )
    }

    /// Create a subscription; see [`add_publisher`](Self::add_publisher).
    pub fn add_subscription(
        &self,
        node_name: &str,
        node_namespace: &str,
        topic_name: &str,
        type_name: &str,
    ) -> DiscoveryResult<EndpointInfo> {
        validate_topic_name(topic_name)?;
        self.add_endpoint(
            node_name,
            node_namespace,
            demangle::mangle_topic(TOPIC_PREFIX, topic_name),
            demangle::mangle_type(type_name),
            EndpointKind::Reader,
        )
    }

    /// Create a service server: a request reader and a response writer.
    pub fn add_service_server(
        &self,
        node_name: &str,
        node_namespace: &str,
        service_name: &str,
        service_type: &str,
    ) -> DiscoveryResult<[EndpointInfo; 2]> {
        validate_topic_name(service_name)?;
        let request = self.add_endpoint(
            node_name,
            node_namespace,
            format!("{SERVICE_REQUEST_PREFIX}{service_name}Request"),
            demangle::mangle_type(&format!("{service_type}_Request")),
            EndpointKind::Reader,
        )?;
        let response = self.add_endpoint(
            node_name,
            node_namespace,
            format!("{SERVICE_RESPONSE_PREFIX}{service_name}Reply"),
            demangle::mangle_type(&format!("{service_type}_Response")),
            EndpointKind::Writer,
        )?;
        Ok([request, response])
    }

    /// Remove a publisher created by [`add_publisher`](Self::add_publisher).
    pub fn remove_publisher(
        &self,
        gid: &EntityId,
        node_name: &str,
        node_namespace: &str,
    ) -> DiscoveryResult<()> {
        self.remove_endpoint(gid, node_name, node_namespace, EndpointKind::Writer)
    }

    /// Remove a subscription created by
    /// [`add_subscription`](Self::add_subscription).
    pub fn remove_subscription(
        &self,
        gid: &EntityId,
        node_name: &str,
        node_namespace: &str,
    ) -> DiscoveryResult<()> {
        self.remove_endpoint(gid, node_name, node_namespace, EndpointKind::Reader)
    }

    /// Stop the listener, then release the channel.
    pub fn shutdown(mut self) -> DiscoveryResult<()> {
        self.listener.join()?;
        info!(participant = %self.local_id, "Discovery context shut down");
        Ok(())
    }
}
