// Copyright (c) 2024 Botho Foundation

//! The membership channel and its in-process loopback implementation.
//!
//! Each participant owns one endpoint on the membership topic. It publishes
//! its own [`EntityInfoRecord`] snapshots through it and takes everybody
//! else's (including, by loopback, its own) from it.

use crate::{
    config::{DiscoveryConfig, Durability},
    error::{DiscoveryError, DiscoveryResult},
    messages::EntityInfoRecord,
    waitset::Waitable,
};
use crossbeam_channel::{unbounded, Receiver, Select, Sender, TryRecvError};
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, PoisonError, RwLock,
    },
};
use tracing::{debug, trace};

/// A pub/sub endpoint carrying membership records.
///
/// Both operations are non-blocking. Readiness for [`take`](Self::take) is
/// observed by adding [`waitable`](Self::waitable) to a wait set.
pub trait MembershipChannel: Send + Sync {
    /// Publish a record to every subscriber of the topic.
    fn publish(&self, record: &EntityInfoRecord) -> DiscoveryResult<()>;

    /// Take the next pending record, or `None` if nothing is pending.
    fn take(&self) -> DiscoveryResult<Option<EntityInfoRecord>>;

    /// The receive side, for use in a wait set.
    fn waitable(&self) -> &dyn Waitable;
}

struct BusState {
    subscribers: HashMap<u64, Sender<EntityInfoRecord>>,
    history: HashMap<u64, VecDeque<EntityInfoRecord>>,
}

struct BusInner {
    topic: String,
    durability: Durability,
    history_depth: usize,
    next_endpoint: AtomicU64,
    state: RwLock<BusState>,
}

/// In-process membership bus shared by a simulated fleet.
///
/// Delivery is FIFO per subscriber. With [`Durability::TransientLocal`] the
/// last `history_depth` records of every live endpoint are replayed to
/// endpoints created later.
#[derive(Clone)]
pub struct LoopbackBus {
    inner: Arc<BusInner>,
}

impl LoopbackBus {
    /// Create a bus using the topic and QoS settings of `config`.
    pub fn new(config: &DiscoveryConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                topic: config.membership_topic.clone(),
                durability: config.durability,
                history_depth: config.history_depth,
                next_endpoint: AtomicU64::new(0),
                state: RwLock::new(BusState {
                    subscribers: HashMap::new(),
                    history: HashMap::new(),
                }),
            }),
        }
    }

    /// The topic this bus carries.
    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    /// Open a new endpoint, receiving any retained history first.
    pub fn endpoint(&self) -> BusEndpoint {
        let id = self.inner.next_endpoint.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = unbounded();

        let mut state = self.inner.write();
        let mut replayed = 0;
        for record in state.history.values().flatten() {
            // The receiver is held right here, so this cannot fail.
            let _ = tx.send(record.clone());
            replayed += 1;
        }
        state.subscribers.insert(id, tx);
        drop(state);

        debug!(
            topic = %self.inner.topic,
            endpoint = id,
            replayed,
            "Opened membership endpoint"
        );

        BusEndpoint {
            id,
            bus: self.inner.clone(),
            rx,
        }
    }

    /// Number of live endpoints.
    pub fn endpoint_count(&self) -> usize {
        self.inner.read().subscribers.len()
    }
}

impl BusInner {
    fn read(&self) -> std::sync::RwLockReadGuard<'_, BusState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BusState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, from: u64, record: &EntityInfoRecord) {
        let mut state = self.write();

        if self.durability == Durability::TransientLocal {
            let history = state.history.entry(from).or_default();
            history.push_back(record.clone());
            while history.len() > self.history_depth {
                history.pop_front();
            }
        }

        for tx in state.subscribers.values() {
            // A subscriber mid-drop has already stopped listening.
            let _ = tx.send(record.clone());
        }

        trace!(
            topic = %self.topic,
            endpoint = from,
            originator = %record.originator,
            subscribers = state.subscribers.len(),
            "Published membership record"
        );
    }

    fn close(&self, id: u64) {
        let mut state = self.write();
        state.subscribers.remove(&id);
        state.history.remove(&id);
    }
}

/// One participant's endpoint on a [`LoopbackBus`].
///
/// Dropping the endpoint unsubscribes it and discards its retained history.
pub struct BusEndpoint {
    id: u64,
    bus: Arc<BusInner>,
    rx: Receiver<EntityInfoRecord>,
}

impl BusEndpoint {
    /// Records waiting to be taken.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

impl MembershipChannel for BusEndpoint {
    fn publish(&self, record: &EntityInfoRecord) -> DiscoveryResult<()> {
        self.bus.publish(self.id, record);
        Ok(())
    }

    fn take(&self) -> DiscoveryResult<Option<EntityInfoRecord>> {
        match self.rx.try_recv() {
            Ok(record) => Ok(Some(record)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(DiscoveryError::ChannelClosed),
        }
    }

    fn waitable(&self) -> &dyn Waitable {
        self
    }
}

impl Waitable for BusEndpoint {
    fn register<'a>(&'a self, select: &mut Select<'a>) -> usize {
        select.recv(&self.rx)
    }

    fn is_ready(&self) -> bool {
        !self.rx.is_empty()
    }
}

impl Drop for BusEndpoint {
    fn drop(&mut self) {
        self.bus.close(self.id);
        debug!(topic = %self.bus.topic, endpoint = self.id, "Closed membership endpoint");
    }
}
