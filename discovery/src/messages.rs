// Copyright (c) 2024 Botho Foundation

//! Membership message types exchanged between participants.
//!
//! Every participant publishes an [`EntityInfoRecord`] describing all of its
//! nodes and the endpoints they own. Records are full snapshots rather than
//! deltas, so a lost or duplicated record is repaired by the next one and a
//! late joiner only needs the latest record of each participant.

use rgraph_common::EntityId;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt};

/// Topic the membership records travel on.
pub const PARTICIPANT_INFO_TOPIC: &str = "_participant_info";

/// A node and the endpoints it owns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeEntry {
    /// Node namespace, e.g. `/` or `/robot1`
    pub node_namespace: String,

    /// Node name without namespace
    pub node_name: String,

    /// Readers (subscriptions) owned by the node
    pub reader_gids: BTreeSet<EntityId>,

    /// Writers (publishers) owned by the node
    pub writer_gids: BTreeSet<EntityId>,
}

impl NodeEntry {
    /// Create a node entry with no endpoints.
    pub fn new(node_name: impl Into<String>, node_namespace: impl Into<String>) -> Self {
        Self {
            node_namespace: node_namespace.into(),
            node_name: node_name.into(),
            reader_gids: BTreeSet::new(),
            writer_gids: BTreeSet::new(),
        }
    }

    /// Check whether this entry describes the given node.
    pub fn is_node(&self, node_name: &str, node_namespace: &str) -> bool {
        self.node_name == node_name && self.node_namespace == node_namespace
    }

    /// The name and namespace of the node.
    pub fn name(&self) -> NodeName {
        NodeName::new(self.node_name.clone(), self.node_namespace.clone())
    }
}

/// One participant's membership announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityInfoRecord {
    /// Participant that published the record
    pub originator: EntityId,

    /// Every node living in that participant
    pub node_entries: Vec<NodeEntry>,
}

impl EntityInfoRecord {
    /// Create a record from its parts.
    pub fn new(originator: EntityId, node_entries: Vec<NodeEntry>) -> Self {
        Self {
            originator,
            node_entries,
        }
    }

    /// A record announcing a participant with no nodes.
    pub fn empty(originator: EntityId) -> Self {
        Self::new(originator, Vec::new())
    }
}

/// Direction of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    /// Subscription side
    Reader,
    /// Publication side
    Writer,
}

/// Topic metadata of one endpoint, as reported by endpoint discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointInfo {
    /// Endpoint identifier
    pub gid: EntityId,

    /// Participant owning the endpoint
    pub participant: EntityId,

    /// Raw (mangled) topic name
    pub topic_name: String,

    /// Raw (mangled) type name
    pub type_name: String,

    /// Reader or writer
    pub kind: EndpointKind,
}

impl EndpointInfo {
    /// Create endpoint metadata.
    pub fn new(
        gid: EntityId,
        participant: EntityId,
        topic_name: impl Into<String>,
        type_name: impl Into<String>,
        kind: EndpointKind,
    ) -> Self {
        Self {
            gid,
            participant,
            topic_name: topic_name.into(),
            type_name: type_name.into(),
            kind,
        }
    }
}

/// Name and namespace of a node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeName {
    /// Node name
    pub name: String,
    /// Node namespace
    pub namespace: String,
}

impl NodeName {
    /// Create a node name.
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Fully qualified name, e.g. `/robot1/talker`.
    pub fn fully_qualified(&self) -> String {
        if self.namespace.ends_with('/') {
            format!("{}{}", self.namespace, self.name)
        } else {
            format!("{}/{}", self.namespace, self.name)
        }
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fully_qualified())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_name_fully_qualified() {
        assert_eq!(NodeName::new("talker", "/").fully_qualified(), "/talker");
        assert_eq!(
            NodeName::new("talker", "/robot1").fully_qualified(),
            "/robot1/talker"
        );
        assert_eq!(NodeName::new("talker", "/robot1/").to_string(), "/robot1/talker");
    }

    #[test]
    fn test_node_entry_identity() {
        let entry = NodeEntry::new("listener", "/");
        assert!(entry.is_node("listener", "/"));
        assert!(!entry.is_node("listener", "/other"));
        assert!(entry.reader_gids.is_empty());
        assert!(entry.writer_gids.is_empty());
        assert_eq!(entry.name(), NodeName::new("listener", "/"));
    }

    #[test]
    fn test_record_serialization() {
        let originator = EntityId::from_bytes([3u8; 24]);
        let mut entry = NodeEntry::new("talker", "/");
        entry.writer_gids.insert(originator.derive_endpoint(1));
        let record = EntityInfoRecord::new(originator, vec![entry]);

        let json = serde_json::to_string(&record).unwrap();
        let parsed: EntityInfoRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
    }
}
