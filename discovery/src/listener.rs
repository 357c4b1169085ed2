// Copyright (c) 2024 Botho Foundation

//! The discovery listener thread.
//!
//! The listener owns one worker thread that blocks on a two-entry wait set:
//! the membership receive endpoint and a guard condition. Each wake-up takes
//! at most one record and folds it into the [`GraphCache`]; a trigger of the
//! guard condition lets the worker observe the cleared running flag and exit.
//!
//! ```text
//!   start()                         join()
//!     │ running = true                │ running = false
//!     │ allocate guard condition      │ trigger guard condition ──┐
//!     │ spawn worker ─────┐           │ join worker               │
//!     ▼                   ▼           ▼ release guard condition   │
//!                   ┌───────────┐                                 │
//!                   │  wait set │◄────────────────────────────────┘
//!                   └─────┬─────┘
//!                         │ data ready: take one record
//!                         ▼
//!              originator == local? ── yes ──► drop
//!                         │ no
//!                         ▼
//!                   GraphCache::apply
//! ```

use crate::{
    cache::GraphCache,
    channel::MembershipChannel,
    config::{DiscoveryConfig, FaultEscalation},
    error::{DiscoveryError, DiscoveryResult},
    resources::ResourceCounter,
    waitset::{GuardCondition, WaitSet},
};
use std::{
    any::Any,
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};
use tracing::{debug, error, info, warn, Level};

/// Entries in the per-iteration wait set: the receive endpoint and the guard
/// condition.
pub const WAIT_SET_CAPACITY: usize = 2;

impl FaultEscalation {
    /// Log a fatal listener fault and leave the loop for good.
    pub(crate) fn escalate(self, what: &str, err: &DiscoveryError) -> ! {
        error!(error = %err, "{what}, terminating discovery listener");
        match self {
            FaultEscalation::Abort => std::process::abort(),
            FaultEscalation::Panic => panic!("{what}: {err}"),
        }
    }
}

trait OrEscalate<T> {
    fn or_escalate(self, escalation: FaultEscalation, what: &str) -> T;
}

impl<T> OrEscalate<T> for DiscoveryResult<T> {
    fn or_escalate(self, escalation: FaultEscalation, what: &str) -> T {
        match self {
            Ok(value) => value,
            Err(err) => escalation.escalate(what, &err),
        }
    }
}

struct Worker {
    cancel: Arc<GuardCondition>,
    handle: JoinHandle<()>,
}

/// Lifecycle owner of the discovery worker thread.
///
/// `start` and `join` take `&mut self`, so they can never race each other.
pub struct DiscoveryListener {
    thread_name: String,
    escalation: FaultEscalation,
    cache: Arc<GraphCache>,
    channel: Arc<dyn MembershipChannel>,
    running: Arc<AtomicBool>,
    guard_conditions: ResourceCounter,
    wait_sets: ResourceCounter,
    worker: Option<Worker>,
}

impl DiscoveryListener {
    /// Create an idle listener feeding `cache` from `channel`.
    pub fn new(
        config: &DiscoveryConfig,
        cache: Arc<GraphCache>,
        channel: Arc<dyn MembershipChannel>,
    ) -> Self {
        Self {
            thread_name: config.listener_thread_name.clone(),
            escalation: config.fault_escalation,
            cache,
            channel,
            running: Arc::new(AtomicBool::new(false)),
            guard_conditions: ResourceCounter::new("guard condition"),
            wait_sets: ResourceCounter::new("wait set"),
            worker: None,
        }
    }

    /// Draw guard conditions and wait sets from the given counters.
    pub fn with_resource_counters(
        mut self,
        guard_conditions: ResourceCounter,
        wait_sets: ResourceCounter,
    ) -> Self {
        self.guard_conditions = guard_conditions;
        self.wait_sets = wait_sets;
        self
    }

    /// Counter of live guard conditions.
    pub fn guard_conditions(&self) -> &ResourceCounter {
        &self.guard_conditions
    }

    /// Counter of live wait sets.
    pub fn wait_sets(&self) -> &ResourceCounter {
        &self.wait_sets
    }

    /// Whether a worker has been started, has not been joined and is still
    /// alive.
    ///
    /// A worker that died on a loop fault reports `false` even before
    /// [`join`](Self::join) collects it.
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
            && self.running.load(Ordering::SeqCst)
    }

    /// Spawn the worker thread.
    pub fn start(&mut self) -> DiscoveryResult<()> {
        if self.worker.is_some() {
            return Err(DiscoveryError::AlreadyRunning);
        }

        self.running.store(true, Ordering::SeqCst);

        let cancel = match GuardCondition::new(&self.guard_conditions) {
            Ok(gc) => Arc::new(gc),
            Err(err) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(DiscoveryError::Start(format!(
                    "failed to create {}: {err}",
                    self.guard_conditions.kind()
                )));
            }
        };

        let task = ListenerTask {
            running: self.running.clone(),
            cancel: cancel.clone(),
            cache: self.cache.clone(),
            channel: self.channel.clone(),
            wait_sets: self.wait_sets.clone(),
            escalation: self.escalation,
        };

        // std panics on interior NUL in thread names instead of failing.
        let spawned = if self.thread_name.contains('\0') {
            Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "thread name contains NUL",
            ))
        } else {
            thread::Builder::new()
                .name(self.thread_name.clone())
                .spawn(move || task.run())
        };

        match spawned {
            Ok(handle) => {
                info!(thread = %self.thread_name, "Started discovery listener");
                self.worker = Some(Worker { cancel, handle });
                Ok(())
            }
            Err(err) => {
                self.running.store(false, Ordering::SeqCst);
                drop(cancel);
                Err(DiscoveryError::Start(format!(
                    "failed to spawn listener thread: {err}"
                )))
            }
        }
    }

    /// Stop the worker thread and wait for it to exit.
    pub fn join(&mut self) -> DiscoveryResult<()> {
        let Some(worker) = self.worker.take() else {
            return Err(DiscoveryError::NotRunning);
        };

        self.running.store(false, Ordering::SeqCst);

        if let Err(err) = worker.cancel.trigger() {
            // Keep the worker so a later join can try again.
            self.worker = Some(worker);
            return Err(DiscoveryError::Stop(format!(
                "failed to trigger guard condition: {err}"
            )));
        }

        let Worker { cancel, handle } = worker;
        let joined = handle.join();
        drop(cancel);

        match joined {
            Ok(()) => {
                info!(thread = %self.thread_name, "Stopped discovery listener");
                Ok(())
            }
            Err(panic) => Err(DiscoveryError::Stop(format!(
                "listener thread panicked: {}",
                panic_message(panic.as_ref())
            ))),
        }
    }
}

impl Drop for DiscoveryListener {
    fn drop(&mut self) {
        if self.worker.is_some() {
            if let Err(err) = self.join() {
                warn!(error = %err, "Discovery listener did not stop cleanly");
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown panic"
    }
}

/// State moved into the worker thread.
struct ListenerTask {
    running: Arc<AtomicBool>,
    cancel: Arc<GuardCondition>,
    cache: Arc<GraphCache>,
    channel: Arc<dyn MembershipChannel>,
    wait_sets: ResourceCounter,
    escalation: FaultEscalation,
}

impl ListenerTask {
    fn run(self) {
        debug!("Discovery listener loop entered");
        while self.running.load(Ordering::SeqCst) {
            self.step();
        }
        debug!("Discovery listener loop exited");
    }

    fn step(&self) {
        let escalation = self.escalation;

        let mut wait_set = WaitSet::new(WAIT_SET_CAPACITY, &self.wait_sets)
            .or_escalate(escalation, "failed to create wait set");
        let data = wait_set
            .add(self.channel.waitable())
            .or_escalate(escalation, "failed to add subscription to wait set");
        wait_set
            .add(self.cancel.as_ref())
            .or_escalate(escalation, "failed to add guard condition to wait set");

        let ready = wait_set
            .wait(None)
            .or_escalate(escalation, "failed to wait on wait set");
        if !ready.is_ready(data) {
            return;
        }

        let Some(record) = self
            .channel
            .take()
            .or_escalate(escalation, "failed to take from participant info channel")
        else {
            return;
        };

        if !self.cache.apply(record) {
            return;
        }

        if tracing::enabled!(Level::DEBUG) {
            debug!("\n{}", self.cache);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::LoopbackBus,
        config::DiscoveryConfigBuilder,
        messages::{EntityInfoRecord, NodeEntry},
    };
    use rgraph_common::EntityId;
    use rgraph_discovery_test_utils::wait_until;
    use std::time::Duration;

    fn id(n: u8) -> EntityId {
        EntityId::from_bytes([n; 24])
    }

    fn listener(bus: &LoopbackBus, config: &DiscoveryConfig) -> (DiscoveryListener, Arc<GraphCache>) {
        let cache = Arc::new(GraphCache::new());
        cache.add_local_entry(id(0));
        let listener = DiscoveryListener::new(config, cache.clone(), Arc::new(bus.endpoint()));
        (listener, cache)
    }

    #[test]
    fn test_start_join_without_traffic() {
        let config = DiscoveryConfig::default();
        let bus = LoopbackBus::new(&config);
        let (mut listener, _) = listener(&bus, &config);

        listener.start().unwrap();
        assert!(listener.is_running());
        assert_eq!(listener.guard_conditions().live(), 1);

        listener.join().unwrap();
        assert!(!listener.is_running());
        assert_eq!(listener.guard_conditions().live(), 0);
        assert_eq!(listener.wait_sets().live(), 0);
    }

    #[test]
    fn test_state_machine_misuse() {
        let config = DiscoveryConfig::default();
        let bus = LoopbackBus::new(&config);
        let (mut listener, _) = listener(&bus, &config);

        assert!(matches!(listener.join(), Err(DiscoveryError::NotRunning)));
        listener.start().unwrap();
        assert!(matches!(listener.start(), Err(DiscoveryError::AlreadyRunning)));
        listener.join().unwrap();
        assert!(matches!(listener.join(), Err(DiscoveryError::NotRunning)));

        // A joined listener can be started again
        listener.start().unwrap();
        listener.join().unwrap();
    }

    #[test]
    fn test_remote_records_are_applied() {
        let config = DiscoveryConfig::default();
        let bus = LoopbackBus::new(&config);
        let (mut listener, cache) = listener(&bus, &config);
        let remote = bus.endpoint();

        listener.start().unwrap();
        remote
            .publish(&EntityInfoRecord::new(id(1), vec![NodeEntry::new("talker", "/")]))
            .unwrap();

        assert!(wait_until(Duration::from_secs(5), || {
            cache.participant_count() == 2
        }));
        listener.join().unwrap();
    }

    #[test]
    fn test_local_records_are_dropped() {
        let config = DiscoveryConfig::default();
        let bus = LoopbackBus::new(&config);
        let (mut listener, cache) = listener(&bus, &config);
        let remote = bus.endpoint();

        listener.start().unwrap();
        remote
            .publish(&EntityInfoRecord::new(id(0), vec![NodeEntry::new("bogus", "/")]))
            .unwrap();
        // A later remote record proves the earlier one was consumed
        remote.publish(&EntityInfoRecord::empty(id(1))).unwrap();

        assert!(wait_until(Duration::from_secs(5), || {
            cache.participant_count() == 2
        }));
        assert!(cache.node_names().is_empty());
        listener.join().unwrap();
    }

    #[test]
    fn test_guard_condition_failure_rolls_back() {
        let config = DiscoveryConfig::default();
        let bus = LoopbackBus::new(&config);
        let (listener, _) = listener(&bus, &config);
        let mut listener = listener.with_resource_counters(
            ResourceCounter::bounded("guard condition", 0),
            ResourceCounter::new("wait set"),
        );

        assert!(matches!(
            listener.start(),
            Err(DiscoveryError::Start(msg)) if msg.contains("guard condition")
        ));
        assert!(!listener.is_running());
        assert!(matches!(listener.join(), Err(DiscoveryError::NotRunning)));
    }

    #[test]
    fn test_spawn_failure_rolls_back() {
        let config = DiscoveryConfigBuilder::new()
            .listener_thread_name("bad\0name")
            .build();
        let bus = LoopbackBus::new(&config);
        let (mut listener, _) = listener(&bus, &config);

        assert!(matches!(listener.start(), Err(DiscoveryError::Start(_))));
        assert!(!listener.is_running());
        assert_eq!(listener.guard_conditions().live(), 0);
    }

    #[test]
    fn test_wait_set_failure_panics_worker() {
        let config = DiscoveryConfigBuilder::new()
            .fault_escalation(FaultEscalation::Panic)
            .build();
        let bus = LoopbackBus::new(&config);
        let (listener, _) = listener(&bus, &config);
        let mut listener = listener.with_resource_counters(
            ResourceCounter::new("guard condition"),
            ResourceCounter::bounded("wait set", 0),
        );

        listener.start().unwrap();
        // The worker dies on its first wait set allocation
        assert!(wait_until(Duration::from_secs(5), || !listener.is_running()));

        let err = listener.join().unwrap_err();
        assert!(matches!(err, DiscoveryError::Stop(msg) if msg.contains("wait set")));
        assert_eq!(listener.guard_conditions().live(), 0);
        assert_eq!(listener.wait_sets().live(), 0);
    }

    #[test]
    fn test_drop_joins_worker() {
        let config = DiscoveryConfig::default();
        let bus = LoopbackBus::new(&config);
        let (mut listener, _) = listener(&bus, &config);
        let guard_conditions = listener.guard_conditions().clone();

        listener.start().unwrap();
        drop(listener);
        assert_eq!(guard_conditions.live(), 0);
    }
}
