// Copyright (c) 2024 Botho Foundation

//! Wait primitives used by the discovery listener.
//!
//! A [`WaitSet`] blocks the calling thread until one of a fixed number of
//! [`Waitable`]s is ready. The listener puts exactly two things in it: the
//! membership receive endpoint and a [`GuardCondition`] that `join()` triggers
//! to wake the worker.

use crate::{
    error::{DiscoveryError, DiscoveryResult},
    resources::{ResourceCounter, ResourceToken},
};
use crossbeam_channel::{bounded, Receiver, Select, Sender, TrySendError};
use std::time::Duration;

/// Something a wait set can block on.
pub trait Waitable: Send + Sync {
    /// Register the readiness source with `select`, returning its operation
    /// index.
    fn register<'a>(&'a self, select: &mut Select<'a>) -> usize;

    /// Whether the waitable currently has something to consume.
    fn is_ready(&self) -> bool;

    /// Called by the wait set after reporting this waitable ready.
    fn acknowledge(&self) {}
}

/// A manually triggered waitable.
///
/// Triggering is idempotent until a wait consumes the trigger.
#[derive(Debug)]
pub struct GuardCondition {
    tx: Sender<()>,
    rx: Receiver<()>,
    _token: ResourceToken,
}

impl GuardCondition {
    /// Allocate a guard condition, accounted against `counter`.
    pub fn new(counter: &ResourceCounter) -> DiscoveryResult<Self> {
        let token = counter.acquire()?;
        let (tx, rx) = bounded(1);
        Ok(Self {
            tx,
            rx,
            _token: token,
        })
    }

    /// Wake any wait set this guard condition is part of.
    pub fn trigger(&self) -> DiscoveryResult<()> {
        match self.tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => Ok(()),
            Err(TrySendError::Disconnected(())) => Err(DiscoveryError::ChannelClosed),
        }
    }

    /// Whether a trigger is pending.
    pub fn is_triggered(&self) -> bool {
        !self.rx.is_empty()
    }
}

impl Waitable for GuardCondition {
    fn register<'a>(&'a self, select: &mut Select<'a>) -> usize {
        select.recv(&self.rx)
    }

    fn is_ready(&self) -> bool {
        self.is_triggered()
    }

    fn acknowledge(&self) {
        while self.rx.try_recv().is_ok() {}
    }
}

/// Readiness of each waitable, indexed in the order they were added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadySet {
    ready: Vec<bool>,
}

impl ReadySet {
    /// Whether the waitable at `index` was ready.
    pub fn is_ready(&self, index: usize) -> bool {
        self.ready.get(index).copied().unwrap_or(false)
    }

    /// Whether nothing was ready (the wait timed out).
    pub fn is_empty(&self) -> bool {
        !self.ready.iter().any(|r| *r)
    }
}

/// Fixed-capacity set of waitables.
pub struct WaitSet<'a> {
    capacity: usize,
    entries: Vec<&'a dyn Waitable>,
    _token: ResourceToken,
}

impl<'a> WaitSet<'a> {
    /// Allocate a wait set able to hold `capacity` waitables.
    pub fn new(capacity: usize, counter: &ResourceCounter) -> DiscoveryResult<Self> {
        let token = counter.acquire()?;
        Ok(Self {
            capacity,
            entries: Vec::with_capacity(capacity),
            _token: token,
        })
    }

    /// Add a waitable, returning the index its readiness is reported at.
    pub fn add(&mut self, waitable: &'a dyn Waitable) -> DiscoveryResult<usize> {
        if self.entries.len() >= self.capacity {
            return Err(DiscoveryError::WaitSetFull(self.capacity));
        }
        self.entries.push(waitable);
        Ok(self.entries.len() - 1)
    }

    /// Number of waitables added so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no waitable was added.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Block until a waitable is ready or `timeout` elapses.
    ///
    /// `None` blocks indefinitely. Guard conditions reported ready are reset.
    pub fn wait(&self, timeout: Option<Duration>) -> DiscoveryResult<ReadySet> {
        if self.entries.is_empty() {
            return Err(DiscoveryError::WaitSetEmpty);
        }

        let mut select = Select::new();
        let indices: Vec<usize> = self
            .entries
            .iter()
            .map(|waitable| waitable.register(&mut select))
            .collect();

        let fired = match timeout {
            None => Some(select.ready()),
            Some(timeout) => select.ready_timeout(timeout).ok(),
        };

        // Select may wake spuriously, so readiness is re-checked per entry.
        let ready: Vec<bool> = self
            .entries
            .iter()
            .zip(&indices)
            .map(|(waitable, index)| waitable.is_ready() || fired == Some(*index))
            .collect();

        for (waitable, is_ready) in self.entries.iter().zip(&ready) {
            if *is_ready {
                waitable.acknowledge();
            }
        }

        Ok(ReadySet { ready })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread, time::Instant};

    fn counters() -> (ResourceCounter, ResourceCounter) {
        (
            ResourceCounter::new("guard condition"),
            ResourceCounter::new("wait set"),
        )
    }

    #[test]
    fn test_guard_condition_trigger_is_idempotent() {
        let (gcs, _) = counters();
        let gc = GuardCondition::new(&gcs).unwrap();
        assert!(!gc.is_triggered());

        gc.trigger().unwrap();
        gc.trigger().unwrap();
        assert!(gc.is_triggered());

        gc.acknowledge();
        assert!(!gc.is_triggered());
    }

    #[test]
    fn test_wait_returns_triggered_guard_condition() {
        let (gcs, wss) = counters();
        let first = GuardCondition::new(&gcs).unwrap();
        let second = GuardCondition::new(&gcs).unwrap();

        let mut wait_set = WaitSet::new(2, &wss).unwrap();
        let a = wait_set.add(&first).unwrap();
        let b = wait_set.add(&second).unwrap();

        second.trigger().unwrap();
        let ready = wait_set.wait(None).unwrap();
        assert!(!ready.is_ready(a));
        assert!(ready.is_ready(b));

        // The wait consumed the trigger
        assert!(!second.is_triggered());
    }

    #[test]
    fn test_wait_times_out() {
        let (gcs, wss) = counters();
        let gc = GuardCondition::new(&gcs).unwrap();
        let mut wait_set = WaitSet::new(1, &wss).unwrap();
        wait_set.add(&gc).unwrap();

        let started = Instant::now();
        let ready = wait_set.wait(Some(Duration::from_millis(20))).unwrap();
        assert!(ready.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_wait_is_woken_from_another_thread() {
        let (gcs, wss) = counters();
        let gc = Arc::new(GuardCondition::new(&gcs).unwrap());

        let trigger = gc.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            trigger.trigger().unwrap();
        });

        let mut wait_set = WaitSet::new(1, &wss).unwrap();
        let index = wait_set.add(gc.as_ref()).unwrap();
        let ready = wait_set.wait(Some(Duration::from_secs(5))).unwrap();
        assert!(ready.is_ready(index));

        handle.join().unwrap();
    }

    #[test]
    fn test_capacity_is_enforced() {
        let (gcs, wss) = counters();
        let gc = GuardCondition::new(&gcs).unwrap();
        let mut wait_set = WaitSet::new(1, &wss).unwrap();

        wait_set.add(&gc).unwrap();
        assert!(matches!(
            wait_set.add(&gc),
            Err(DiscoveryError::WaitSetFull(1))
        ));
        assert_eq!(wait_set.len(), 1);
    }

    #[test]
    fn test_empty_wait_set_cannot_wait() {
        let (_, wss) = counters();
        let wait_set = WaitSet::new(2, &wss).unwrap();
        assert!(wait_set.is_empty());
        assert!(matches!(
            wait_set.wait(None),
            Err(DiscoveryError::WaitSetEmpty)
        ));
    }

    #[test]
    fn test_primitives_release_their_tokens() {
        let (gcs, wss) = counters();
        {
            let gc = GuardCondition::new(&gcs).unwrap();
            let mut wait_set = WaitSet::new(1, &wss).unwrap();
            wait_set.add(&gc).unwrap();
            assert_eq!(gcs.live(), 1);
            assert_eq!(wss.live(), 1);
        }
        assert_eq!(gcs.live(), 0);
        assert_eq!(wss.live(), 0);
    }
}
