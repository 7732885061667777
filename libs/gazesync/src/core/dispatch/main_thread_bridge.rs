// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! MainThreadBridge - Serializes work from producer threads onto one host thread.
//!
//! The host thread (render/UI loop) claims the bridge, then calls
//! [`MainThreadBridge::drain_queue`] once per tick. Other threads hand it
//! closures with [`MainThreadBridge::run_on_host`], which blocks until the
//! closure has run, or [`MainThreadBridge::post`], which does not.
//!
//! The host identity sits behind its own lock and is held for reading while
//! a call is enqueued, so [`MainThreadBridge::shutdown`] can never interleave
//! with an enqueue: every call either lands before teardown (and is released
//! by it) or observes the torn-down bridge and returns at once.

use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::thread::{self, ThreadId};

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
pub struct MainThreadBridge {
    host: RwLock<Option<ThreadId>>,
    queue: Mutex<VecDeque<Job>>,
}

impl MainThreadBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Designate the calling thread as the host.
    pub fn claim_host(&self) {
        let id = thread::current().id();
        let previous = self.host.write().replace(id);
        tracing::info!(thread = ?id, ?previous, "Host thread claimed bridge");
    }

    pub fn is_host(&self) -> bool {
        *self.host.read() == Some(thread::current().id())
    }

    /// Whether a host is attached and the bridge has not been shut down.
    pub fn is_attached(&self) -> bool {
        self.host.read().is_some()
    }

    /// Calls waiting for the next drain.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Run `f` on the host thread and wait for its result.
    ///
    /// Runs inline when called from the host itself. Returns `None` without
    /// blocking if no host is attached, and `None` if the bridge is shut down
    /// while the call is queued.
    pub fn run_on_host<F, T>(&self, f: F) -> Option<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let host = self.host.read();
        let designated = *host;
        match designated {
            None => {
                tracing::trace!("Bridge has no host, skipping call");
                return None;
            }
            Some(id) if id == thread::current().id() => {
                drop(host);
                return Some(f());
            }
            Some(_) => {}
        }

        let (tx, rx) = crossbeam_channel::bounded(1);
        self.queue.lock().push_back(Box::new(move || {
            let _ = tx.send(f());
        }));
        drop(host);

        rx.recv().ok()
    }

    /// Queue `f` for the host thread without waiting. Returns false if no
    /// host is attached.
    pub fn post<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let host = self.host.read();
        if host.is_none() {
            return false;
        }
        self.queue.lock().push_back(Box::new(f));
        true
    }

    /// Run every call queued before this one, in FIFO order.
    ///
    /// Host thread only. Calls queued while draining wait for the next tick.
    /// Returns how many calls ran.
    pub fn drain_queue(&self) -> usize {
        if !self.is_host() {
            tracing::warn!(thread = ?thread::current().id(), "drain_queue called off the host thread");
            return 0;
        }
        let jobs = std::mem::take(&mut *self.queue.lock());
        let count = jobs.len();
        for job in jobs {
            job();
        }
        count
    }

    /// Detach the host. Queued calls are dropped and their callers released
    /// with `None`; later calls return `None` immediately.
    pub fn shutdown(&self) {
        let mut host = self.host.write();
        let previous = host.take();
        let dropped = std::mem::take(&mut *self.queue.lock());
        drop(host);
        tracing::info!(host = ?previous, dropped = dropped.len(), "Main thread bridge shut down");
        drop(dropped);
    }
}

impl std::fmt::Debug for MainThreadBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainThreadBridge")
            .field("host", &*self.host.read())
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_host_runs_inline() {
        let bridge = MainThreadBridge::new();
        bridge.claim_host();
        assert!(bridge.is_host());
        assert_eq!(bridge.run_on_host(|| 42), Some(42));
        assert_eq!(bridge.pending(), 0);
    }

    #[test]
    fn test_no_host_returns_none() {
        let bridge = MainThreadBridge::new();
        assert_eq!(bridge.run_on_host(|| 1), None);
        assert!(!bridge.post(|| {}));
    }

    #[test]
    fn test_worker_blocks_until_drain() {
        let bridge = Arc::new(MainThreadBridge::new());
        bridge.claim_host();

        let worker = {
            let bridge = Arc::clone(&bridge);
            thread::spawn(move || bridge.run_on_host(|| thread::current().name().map(String::from)))
        };
        wait_until(|| bridge.pending() == 1);
        assert_eq!(bridge.drain_queue(), 1);

        let host_name = thread::current().name().map(String::from);
        assert_eq!(worker.join().unwrap(), Some(host_name));
    }

    #[test]
    fn test_fifo_order() {
        let bridge = Arc::new(MainThreadBridge::new());
        bridge.claim_host();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for i in 0..5 {
            let order = Arc::clone(&order);
            assert!(bridge.post(move || order.lock().push(i)));
        }
        assert_eq!(bridge.drain_queue(), 5);
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_calls_queued_during_drain_wait_for_next_tick() {
        let bridge = Arc::new(MainThreadBridge::new());
        bridge.claim_host();
        let ran = Arc::new(AtomicUsize::new(0));

        {
            let inner_bridge = Arc::clone(&bridge);
            let ran = Arc::clone(&ran);
            bridge.post(move || {
                let ran = Arc::clone(&ran);
                inner_bridge.post(move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                });
            });
        }
        assert_eq!(bridge.drain_queue(), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(bridge.drain_queue(), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drain_off_host_does_nothing() {
        let bridge = Arc::new(MainThreadBridge::new());
        bridge.claim_host();
        bridge.post(|| {});
        let other = Arc::clone(&bridge);
        assert_eq!(thread::spawn(move || other.drain_queue()).join().unwrap(), 0);
        assert_eq!(bridge.pending(), 1);
    }

    #[test]
    fn test_shutdown_releases_blocked_callers() {
        let bridge = Arc::new(MainThreadBridge::new());
        bridge.claim_host();

        let worker = {
            let bridge = Arc::clone(&bridge);
            thread::spawn(move || bridge.run_on_host(|| 7))
        };
        wait_until(|| bridge.pending() == 1);
        bridge.shutdown();
        assert_eq!(worker.join().unwrap(), None);
        assert!(!bridge.is_attached());

        let started = Instant::now();
        assert_eq!(bridge.run_on_host(|| 8), None);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
