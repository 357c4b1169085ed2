// Copyright (c) 2024 Botho Foundation

//! The replicated entity graph.
//!
//! The `GraphCache` holds one [`NodeEntry`] list per known participant plus
//! the topic metadata of every known endpoint. Remote participants' lists are
//! replaced wholesale by each [`EntityInfoRecord`] they publish; the local
//! participant's list is edited in place and returned as the record to
//! publish next.

use crate::{
    error::{DiscoveryError, DiscoveryResult},
    messages::{EndpointInfo, EndpointKind, EntityInfoRecord, NodeEntry, NodeName},
    names_and_types::NamesAndTypes,
};
use rgraph_common::EntityId;
use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct GraphState {
    local_id: Option<EntityId>,
    participants: HashMap<EntityId, Vec<NodeEntry>>,
    endpoints: HashMap<EntityId, EndpointInfo>,
}

/// Thread-safe graph of participants, nodes and endpoints.
#[derive(Debug, Default)]
pub struct GraphCache {
    state: RwLock<GraphState>,
}

/// Check a node name and namespace before they enter the graph.
pub fn validate_node_name(node_name: &str, node_namespace: &str) -> DiscoveryResult<()> {
    if node_name.is_empty() {
        return Err(DiscoveryError::InvalidArgument(
            "node name must not be empty".to_string(),
        ));
    }
    if node_name.contains('/') {
        return Err(DiscoveryError::InvalidArgument(format!(
            "node name '{node_name}' must not contain '/'"
        )));
    }
    if !node_namespace.starts_with('/') {
        return Err(DiscoveryError::InvalidArgument(format!(
            "node namespace '{node_namespace}' must be absolute"
        )));
    }
    Ok(())
}

impl GraphCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    // A panicking writer leaves every map internally consistent, so a
    // poisoned lock is still safe to use.
    fn read(&self) -> RwLockReadGuard<'_, GraphState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, GraphState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register the local participant.
    ///
    /// Records originating from `id` are ignored by [`apply`](Self::apply)
    /// from now on.
    pub fn add_local_entry(&self, id: EntityId) {
        let mut state = self.write();
        if let Some(previous) = state.local_id.replace(id) {
            if previous != id {
                warn!(%previous, local = %id, "Replacing local participant id");
                state.participants.remove(&previous);
            }
        }
        state.participants.entry(id).or_default();
        debug!(local = %id, "Registered local participant");
    }

    /// The local participant, if registered.
    pub fn local_id(&self) -> Option<EntityId> {
        self.read().local_id
    }

    /// Absorb a remote participant's snapshot.
    ///
    /// Returns `false` if the record came from the local participant, in which
    /// case the cache is untouched.
    pub fn apply(&self, record: EntityInfoRecord) -> bool {
        let mut state = self.write();
        if state.local_id == Some(record.originator) {
            return false;
        }

        debug!(
            participant = %record.originator,
            nodes = record.node_entries.len(),
            "Updating participant entities"
        );
        state
            .participants
            .insert(record.originator, record.node_entries);
        true
    }

    /// Forget a departed participant and its endpoints.
    ///
    /// The local participant cannot be removed this way.
    pub fn remove_participant(&self, id: &EntityId) -> bool {
        let mut state = self.write();
        if state.local_id.as_ref() == Some(id) {
            return false;
        }

        let removed = state.participants.remove(id).is_some();
        state.endpoints.retain(|_, info| &info.participant != id);
        if removed {
            debug!(participant = %id, "Removed participant");
        }
        removed
    }

    fn update_local<F>(&self, edit: F) -> DiscoveryResult<EntityInfoRecord>
    where
        F: FnOnce(&mut Vec<NodeEntry>) -> DiscoveryResult<()>,
    {
        let mut state = self.write();
        let local_id = state.local_id.ok_or_else(|| {
            DiscoveryError::InvalidArgument("no local participant registered".to_string())
        })?;
        let entries = state.participants.entry(local_id).or_default();
        edit(entries)?;
        Ok(EntityInfoRecord::new(local_id, entries.clone()))
    }

    /// Snapshot of the local participant, ready to publish.
    pub fn local_record(&self) -> DiscoveryResult<EntityInfoRecord> {
        self.update_local(|_| Ok(()))
    }

    /// Add a node to the local participant.
    pub fn add_node(
        &self,
        node_name: &str,
        node_namespace: &str,
    ) -> DiscoveryResult<EntityInfoRecord> {
        validate_node_name(node_name, node_namespace)?;
        self.update_local(|entries| {
            if entries.iter().any(|e| e.is_node(node_name, node_namespace)) {
                return Err(DiscoveryError::NodeExists(
                    NodeName::new(node_name, node_namespace).to_string(),
                ));
            }
            entries.push(NodeEntry::new(node_name, node_namespace));
            Ok(())
        })
    }

    /// Remove a node, and the endpoints it owned, from the local participant.
    pub fn remove_node(
        &self,
        node_name: &str,
        node_namespace: &str,
    ) -> DiscoveryResult<EntityInfoRecord> {
        self.update_local(|entries| {
            let position = entries
                .iter()
                .position(|e| e.is_node(node_name, node_namespace))
                .ok_or_else(|| not_found(node_name, node_namespace))?;
            entries.remove(position);
            Ok(())
        })
    }

    /// Record that a local node owns the writer `gid`.
    pub fn associate_writer(
        &self,
        gid: EntityId,
        node_name: &str,
        node_namespace: &str,
    ) -> DiscoveryResult<EntityInfoRecord> {
        self.update_local(|entries| {
            find_node(entries, node_name, node_namespace)?
                .writer_gids
                .insert(gid);
            Ok(())
        })
    }

    /// Record that a local node owns the reader `gid`.
    pub fn associate_reader(
        &self,
        gid: EntityId,
        node_name: &str,
        node_namespace: &str,
    ) -> DiscoveryResult<EntityInfoRecord> {
        self.update_local(|entries| {
            find_node(entries, node_name, node_namespace)?
                .reader_gids
                .insert(gid);
            Ok(())
        })
    }

    /// Record that a local node no longer owns the writer `gid`.
    pub fn dissociate_writer(
        &self,
        gid: &EntityId,
        node_name: &str,
        node_namespace: &str,
    ) -> DiscoveryResult<EntityInfoRecord> {
        self.update_local(|entries| {
            find_node(entries, node_name, node_namespace)?
                .writer_gids
                .remove(gid);
            Ok(())
        })
    }

    /// Record that a local node no longer owns the reader `gid`.
    pub fn dissociate_reader(
        &self,
        gid: &EntityId,
        node_name: &str,
        node_namespace: &str,
    ) -> DiscoveryResult<EntityInfoRecord> {
        self.update_local(|entries| {
            find_node(entries, node_name, node_namespace)?
                .reader_gids
                .remove(gid);
            Ok(())
        })
    }

    /// Add or replace topic metadata for an endpoint.
    ///
    /// Returns `true` if the graph changed.
    pub fn add_endpoint(&self, info: EndpointInfo) -> bool {
        let mut state = self.write();
        if state.endpoints.get(&info.gid) == Some(&info) {
            return false;
        }
        debug!(
            endpoint = %info.gid,
            topic = %info.topic_name,
            kind = ?info.kind,
            "Adding endpoint"
        );
        state.endpoints.insert(info.gid, info);
        true
    }

    /// Forget an endpoint's topic metadata.
    pub fn remove_endpoint(&self, gid: &EntityId) -> Option<EndpointInfo> {
        let removed = self.write().endpoints.remove(gid);
        if let Some(info) = &removed {
            debug!(endpoint = %gid, topic = %info.topic_name, "Removed endpoint");
        }
        removed
    }

    /// Fill `out` with every topic and the types seen on it.
    ///
    /// Both functions may drop an entry by returning `None`. `out` must be
    /// empty on entry and is left empty on error.
    pub fn get_names_and_types<T, Y>(
        &self,
        demangle_topic: T,
        demangle_type: Y,
        out: &mut NamesAndTypes,
    ) -> DiscoveryResult<()>
    where
        T: Fn(&str) -> Option<String>,
        Y: Fn(&str) -> Option<String>,
    {
        out.ensure_empty()?;

        let state = self.read();
        for info in state.endpoints.values() {
            let Some(topic) = demangle_topic(&info.topic_name) else {
                continue;
            };
            let Some(type_name) = demangle_type(&info.type_name) else {
                continue;
            };
            if let Err(err) = out.insert(topic, type_name) {
                out.clear();
                return Err(err);
            }
        }
        Ok(())
    }

    /// Name and namespace of every node in the graph, sorted.
    pub fn node_names(&self) -> Vec<NodeName> {
        let state = self.read();
        let mut names: Vec<NodeName> = state
            .participants
            .values()
            .flatten()
            .map(NodeEntry::name)
            .collect();
        names.sort();
        names
    }

    fn count_endpoints(&self, topic_name: &str, kind: EndpointKind) -> usize {
        self.read()
            .endpoints
            .values()
            .filter(|info| info.kind == kind && info.topic_name == topic_name)
            .count()
    }

    /// Number of writers on a raw topic name.
    pub fn count_publishers(&self, topic_name: &str) -> usize {
        self.count_endpoints(topic_name, EndpointKind::Writer)
    }

    /// Number of readers on a raw topic name.
    pub fn count_subscribers(&self, topic_name: &str) -> usize {
        self.count_endpoints(topic_name, EndpointKind::Reader)
    }

    /// Number of known participants, the local one included.
    pub fn participant_count(&self) -> usize {
        self.read().participants.len()
    }

    /// The nodes last announced by a participant.
    pub fn node_entries(&self, id: &EntityId) -> Option<Vec<NodeEntry>> {
        self.read().participants.get(id).cloned()
    }
}

fn not_found(node_name: &str, node_namespace: &str) -> DiscoveryError {
    DiscoveryError::NodeNotFound(NodeName::new(node_name, node_namespace).to_string())
}

fn find_node<'a>(
    entries: &'a mut [NodeEntry],
    node_name: &str,
    node_namespace: &str,
) -> DiscoveryResult<&'a mut NodeEntry> {
    entries
        .iter_mut()
        .find(|e| e.is_node(node_name, node_namespace))
        .ok_or_else(|| not_found(node_name, node_namespace))
}

fn write_gids<'a>(
    f: &mut fmt::Formatter<'_>,
    label: &str,
    gids: impl IntoIterator<Item = &'a EntityId>,
) -> fmt::Result {
    write!(f, "      {label}:")?;
    for gid in gids {
        write!(f, " {gid}")?;
    }
    writeln!(f)
}

impl fmt::Display for GraphCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        let participants: BTreeMap<_, _> = state.participants.iter().collect();
        let endpoints: BTreeMap<_, _> = state.endpoints.iter().collect();

        writeln!(f, "---------------------------------")?;
        writeln!(f, "Graph cache")?;
        writeln!(f, "  Participants:")?;
        for (id, entries) in participants {
            let marker = if state.local_id.as_ref() == Some(id) {
                " (local)"
            } else {
                ""
            };
            writeln!(f, "    {id}{marker}")?;
            for entry in entries {
                writeln!(f, "     {}", entry.name())?;
                write_gids(f, "writers", &entry.writer_gids)?;
                write_gids(f, "readers", &entry.reader_gids)?;
            }
        }
        writeln!(f, "  Endpoints:")?;
        for (gid, info) in endpoints {
            let kind = match info.kind {
                EndpointKind::Reader => "reader",
                EndpointKind::Writer => "writer",
            };
            writeln!(
                f,
                "    {gid} {kind} {} [{}]",
                info.topic_name, info.type_name
            )?;
        }
        write!(f, "---------------------------------")
    }
}
