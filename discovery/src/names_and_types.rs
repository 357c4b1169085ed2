// Copyright (c) 2024 Botho Foundation

//! Caller-supplied result container for name and type listings.

use crate::error::{DiscoveryError, DiscoveryResult};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Topic (or service) names mapped to the set of types seen on them.
///
/// The container carries its own capacity policy: once `capacity` distinct
/// names are stored, adding another fails with `CapacityExceeded`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NamesAndTypes {
    #[serde(flatten)]
    entries: BTreeMap<String, BTreeSet<String>>,
    #[serde(skip)]
    capacity: Option<usize>,
}

impl NamesAndTypes {
    /// An unbounded, empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty container holding at most `capacity` names.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            capacity: Some(capacity),
        }
    }

    /// Fail unless the container is empty, as queries require on entry.
    pub(crate) fn ensure_empty(&self) -> DiscoveryResult<()> {
        if self.entries.is_empty() {
            Ok(())
        } else {
            Err(DiscoveryError::InvalidArgument(
                "names and types container must be empty".to_string(),
            ))
        }
    }

    /// Record that `name` carries `type_name`.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        type_name: impl Into<String>,
    ) -> DiscoveryResult<()> {
        let name = name.into();
        if let Some(capacity) = self.capacity {
            if self.entries.len() >= capacity && !self.entries.contains_key(&name) {
                return Err(DiscoveryError::CapacityExceeded(capacity));
            }
        }
        self.entries
            .entry(name)
            .or_default()
            .insert(type_name.into());
        Ok(())
    }

    /// Drop every entry, keeping the capacity policy.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of distinct names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no name is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Types seen on `name`.
    pub fn types(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.entries.get(name)
    }

    /// Whether `name` is listed.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Listed names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Name and type set pairs in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.entries.iter().map(|(name, types)| (name.as_str(), types))
    }
}
