// Copyright (c) 2024 Botho Foundation

//! Test helpers for the discovery crate.
//!
//! - deterministic entity ids, node entries and records
//! - [`FaultyChannel`], a membership channel that can fail or wake spuriously
//! - [`Fleet`], several discovery contexts sharing one loopback bus

#![warn(missing_docs)]

use crossbeam_channel::{unbounded, Receiver, Select, Sender};
use rand::{rngs::StdRng, RngCore, SeedableRng};
use rgraph_common::{EntityId, GID_STORAGE_SIZE};
use rgraph_discovery::{
    DiscoveryConfig, DiscoveryContext, DiscoveryError, DiscoveryResult, EndpointInfo,
    EntityInfoRecord, LoopbackBus, MembershipChannel, NodeEntry, Waitable,
};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
    thread,
    time::{Duration, Instant},
};

/// A deterministic entity id for `seed`.
pub fn test_entity_id(seed: u64) -> EntityId {
    let mut rng = StdRng::seed_from_u64(seed);
    random_entity_id(&mut rng)
}

/// A random entity id.
pub fn random_entity_id<R: RngCore>(rng: &mut R) -> EntityId {
    let mut bytes = [0u8; GID_STORAGE_SIZE];
    rng.fill_bytes(&mut bytes);
    EntityId::from_bytes(bytes)
}

/// A node owning `writers` writers and `readers` readers of `participant`.
///
/// Endpoint keys start at `first_key` so several nodes of one participant
/// can be built without collisions.
pub fn test_node_entry(
    participant: &EntityId,
    node_name: &str,
    node_namespace: &str,
    first_key: u32,
    writers: u32,
    readers: u32,
) -> NodeEntry {
    let mut entry = NodeEntry::new(node_name, node_namespace);
    entry.writer_gids = (first_key..first_key + writers)
        .map(|key| participant.derive_endpoint(key))
        .collect();
    entry.reader_gids = (first_key + writers..first_key + writers + readers)
        .map(|key| participant.derive_endpoint(key))
        .collect();
    entry
}

/// A record for `originator` with one endpoint-less node per name, all in
/// namespace `/`.
pub fn test_record(originator: EntityId, node_names: &[&str]) -> EntityInfoRecord {
    let entries = node_names
        .iter()
        .map(|name| NodeEntry::new(*name, "/"))
        .collect();
    EntityInfoRecord::new(originator, entries)
}

/// Poll `check` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    check()
}

/// Membership channel with injectable records, spurious wake-ups and take
/// failures.
pub struct FaultyChannel {
    tx: Sender<Option<EntityInfoRecord>>,
    rx: Receiver<Option<EntityInfoRecord>>,
    fail_takes: AtomicBool,
    takes: AtomicUsize,
    published: Mutex<Vec<EntityInfoRecord>>,
}

impl Default for FaultyChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl FaultyChannel {
    /// A channel with nothing pending.
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            fail_takes: AtomicBool::new(false),
            takes: AtomicUsize::new(0),
            published: Mutex::new(Vec::new()),
        }
    }

    /// Queue a record for the next take.
    pub fn inject(&self, record: EntityInfoRecord) {
        let _ = self.tx.send(Some(record));
    }

    /// Make the receive side ready without any record behind it.
    pub fn wake(&self) {
        let _ = self.tx.send(None);
    }

    /// Make every take from now on fail, then wake the reader.
    pub fn fail_takes(&self) {
        self.fail_takes.store(true, Ordering::SeqCst);
        self.wake();
    }

    /// Number of takes attempted so far.
    pub fn takes(&self) -> usize {
        self.takes.load(Ordering::SeqCst)
    }

    /// Number of injected records and wake-ups not yet taken.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Records published through this channel.
    pub fn published(&self) -> Vec<EntityInfoRecord> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl MembershipChannel for FaultyChannel {
    fn publish(&self, record: &EntityInfoRecord) -> DiscoveryResult<()> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }

    fn take(&self) -> DiscoveryResult<Option<EntityInfoRecord>> {
        self.takes.fetch_add(1, Ordering::SeqCst);
        if self.fail_takes.load(Ordering::SeqCst) {
            return Err(DiscoveryError::ChannelClosed);
        }
        Ok(self.rx.try_recv().ok().flatten())
    }

    fn waitable(&self) -> &dyn Waitable {
        self
    }
}

impl Waitable for FaultyChannel {
    fn register<'a>(&'a self, select: &mut Select<'a>) -> usize {
        select.recv(&self.rx)
    }

    fn is_ready(&self) -> bool {
        !self.rx.is_empty()
    }
}

/// Several discovery contexts sharing one [`LoopbackBus`].
///
/// The fleet also plays the endpoint discovery role, handing endpoint
/// metadata to every member's cache.
pub struct Fleet {
    bus: LoopbackBus,
    contexts: Vec<DiscoveryContext>,
}

impl Fleet {
    /// Start `size` participants with ids `test_entity_id(0..size)`.
    pub fn new(size: usize, config: &DiscoveryConfig) -> DiscoveryResult<Self> {
        let bus = LoopbackBus::new(config);
        let mut fleet = Self {
            bus,
            contexts: Vec::with_capacity(size),
        };
        for _ in 0..size {
            fleet.join(config)?;
        }
        Ok(fleet)
    }

    /// Add one more participant, returning its index.
    pub fn join(&mut self, config: &DiscoveryConfig) -> DiscoveryResult<usize> {
        let index = self.contexts.len();
        let context = DiscoveryContext::init(
            config.clone(),
            test_entity_id(index as u64),
            Arc::new(self.bus.endpoint()),
        )?;
        tracing::debug!(index, participant = %context.local_id(), "Fleet member joined");
        self.contexts.push(context);
        Ok(index)
    }

    /// The shared bus.
    pub fn bus(&self) -> &LoopbackBus {
        &self.bus
    }

    /// Number of participants.
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// Whether the fleet is empty.
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// The participant at `index`.
    pub fn get(&self, index: usize) -> &DiscoveryContext {
        &self.contexts[index]
    }

    /// All participants.
    pub fn contexts(&self) -> &[DiscoveryContext] {
        &self.contexts
    }

    /// Hand endpoint metadata to every other participant's cache.
    pub fn announce_endpoint(&self, info: &EndpointInfo) {
        for context in &self.contexts {
            if context.local_id() != info.participant {
                context.cache().add_endpoint(info.clone());
            }
        }
    }

    /// Wait until every participant knows every other one and all agree on
    /// the node list.
    pub fn wait_converged(&self, timeout: Duration) -> bool {
        wait_until(timeout, || {
            let Some(first) = self.contexts.first() else {
                return true;
            };
            let nodes = first.query().list_nodes();
            self.contexts.iter().all(|context| {
                context.cache().participant_count() == self.contexts.len()
                    && context.query().list_nodes() == nodes
            })
        })
    }

    /// Shut every participant down, reporting the first failure.
    pub fn shutdown(self) -> DiscoveryResult<()> {
        let mut result = Ok(());
        for context in self.contexts {
            if let Err(err) = context.shutdown() {
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        result
    }
}
