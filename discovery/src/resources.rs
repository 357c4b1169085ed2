// Copyright (c) 2024 Botho Foundation

//! Accounting for listener-owned primitives.
//!
//! Guard conditions and wait sets each hold a [`ResourceToken`] drawn from a
//! [`ResourceCounter`]. The counter knows how many are alive, and an optional
//! limit makes allocation fail once it is reached.

use crate::error::{DiscoveryError, DiscoveryResult};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// Counts live instances of one kind of primitive.
#[derive(Debug, Clone)]
pub struct ResourceCounter {
    kind: &'static str,
    live: Arc<AtomicUsize>,
    limit: Option<usize>,
}

impl ResourceCounter {
    /// An unbounded counter.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            live: Arc::new(AtomicUsize::new(0)),
            limit: None,
        }
    }

    /// A counter refusing to hand out more than `limit` tokens at a time.
    pub fn bounded(kind: &'static str, limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::new(kind)
        }
    }

    /// Take a token, failing with `ResourceExhausted` at the limit.
    pub fn acquire(&self) -> DiscoveryResult<ResourceToken> {
        let limit = self.limit.unwrap_or(usize::MAX);
        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < limit).then_some(live + 1)
            })
            .map_err(|_| DiscoveryError::ResourceExhausted(self.kind))?;

        Ok(ResourceToken {
            live: self.live.clone(),
        })
    }

    /// Number of tokens currently alive.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// What this counter counts.
    pub fn kind(&self) -> &'static str {
        self.kind
    }
}

/// Proof of one live primitive. Dropping it releases the slot.
#[derive(Debug)]
pub struct ResourceToken {
    live: Arc<AtomicUsize>,
}

impl Drop for ResourceToken {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}
