// Copyright 2025 the Formpane Authors
// SPDX-License-Identifier: Apache-2.0

//! Time source and timers for the session.
//!
//! `TokioClock` drives real sessions. `ManualClock` only moves when told
//! to, which makes gate timing and refresh timers deterministic in tests
//! and in hosts that pump their own frame clock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Callback run when a timer fires
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Identifies a scheduled timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

/// Millisecond clock with one-shot timers
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;

    fn set_timeout(&self, delay: Duration, callback: TimerCallback) -> TimerHandle;

    /// Cancel a timer. Unknown or already-fired handles are ignored.
    fn clear_timeout(&self, handle: TimerHandle);
}

/// Acquire a mutex, recovering from poison.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("Clock mutex was poisoned, recovering");
        poisoned.into_inner()
    })
}

// ============================================================================
// TOKIO CLOCK
// ============================================================================

/// Wall clock backed by tokio timers.
///
/// `set_timeout` spawns onto the current tokio runtime, so it must be
/// called from within one.
#[derive(Debug)]
pub struct TokioClock {
    start: Instant,
    next_id: AtomicU64,
    timers: Mutex<HashMap<u64, JoinHandle<()>>>,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            next_id: AtomicU64::new(1),
            timers: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn set_timeout(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        });

        let mut timers = lock(&self.timers);
        timers.retain(|_, task| !task.is_finished());
        timers.insert(id, task);
        TimerHandle(id)
    }

    fn clear_timeout(&self, handle: TimerHandle) {
        if let Some(task) = lock(&self.timers).remove(&handle.0) {
            task.abort();
        }
    }
}

// ============================================================================
// MANUAL CLOCK
// ============================================================================

struct PendingTimer {
    id: u64,
    due_ms: u64,
    callback: TimerCallback,
}

/// Clock that advances only through [`ManualClock::advance`]
#[derive(Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
    next_id: AtomicU64,
    timers: Mutex<Vec<PendingTimer>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward and run every timer that came due, in due order.
    pub fn advance(&self, delta: Duration) {
        let now = self.now_ms.load(Ordering::SeqCst) + delta.as_millis() as u64;
        self.now_ms.store(now, Ordering::SeqCst);

        let mut due: Vec<PendingTimer> = {
            let mut timers = lock(&self.timers);
            let (due, waiting): (Vec<_>, Vec<_>) = timers.drain(..).partition(|t| t.due_ms <= now);
            *timers = waiting;
            due
        };
        due.sort_by_key(|t| (t.due_ms, t.id));
        for timer in due {
            (timer.callback)();
        }
    }

    /// Number of timers not yet fired or cleared
    pub fn pending_timers(&self) -> usize {
        lock(&self.timers).len()
    }
}

impl std::fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualClock")
            .field("now_ms", &self.now_ms.load(Ordering::SeqCst))
            .field("pending_timers", &self.pending_timers())
            .finish()
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }

    fn set_timeout(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let due_ms = self.now_ms() + delay.as_millis() as u64;
        lock(&self.timers).push(PendingTimer { id, due_ms, callback });
        TimerHandle(id)
    }

    fn clear_timeout(&self, handle: TimerHandle) {
        lock(&self.timers).retain(|t| t.id != handle.0);
    }
}
