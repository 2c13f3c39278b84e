//! One-shot synchronization timer
//!
//! Used by the TCP and UDP channel state machines to block a requesting
//! thread until either a timed deadline elapses or the network reader
//! thread cancels the wait because the awaited event arrived. This is the
//! primitive called out in the design notes as replacing a
//! condition-variable-plus-atomic-bool-pair implementation: a `Condvar`
//! over a small `Mutex`-guarded state is sufficient and keeps the three-way
//! return contract.
//!
//! `SyncTimer<T>` is generic over an optional payload delivered alongside
//! cancellation. The payload lives under the same lock as the signal flag,
//! so a channel's "latest decoded frame" slot can be folded into the timer
//! itself instead of a second, separately-locked `Mutex<Option<T>>`: a
//! signal delivered before the next `start` call is never clobbered by that
//! call resetting unrelated state.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
/// Outcome of a [`SyncTimer::start`] call
pub enum TimerState {
    /// The wall-clock deadline elapsed before any cancellation arrived
    Timeout,
    /// Another thread called [`SyncTimer::signal`] (or [`SyncTimer::shutdown`])
    /// before the deadline
    Cancelled,
    /// Defensive default; a timer that was never started reports this.
    /// A live caller of `start` never observes it.
    Idle,
}

#[derive(Debug)]
struct Inner<T> {
    payload: Option<T>,
    signalled: bool,
    shutdown: bool,
}

/// A one-shot, three-outcome wait primitive that carries a single event
/// payload of type `T` under its own lock.
///
/// Two threads must not call [`SyncTimer::start`] concurrently on the same
/// instance; the caller thread starts it, the reader thread signals it. A
/// running `start` unblocks promptly once [`SyncTimer::shutdown`] is called,
/// which is how channel teardown guarantees callers don't hang forever.
pub struct SyncTimer<T = ()> {
    inner: Arc<(Mutex<Inner<T>>, Condvar)>,
}

impl<T> Clone for SyncTimer<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T> std::fmt::Debug for SyncTimer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncTimer").finish_non_exhaustive()
    }
}

impl<T> Default for SyncTimer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SyncTimer<T> {
    /// Creates a new, idle timer with an empty payload slot
    pub fn new() -> Self {
        Self {
            inner: Arc::new((
                Mutex::new(Inner {
                    payload: None,
                    signalled: false,
                    shutdown: false,
                }),
                Condvar::new(),
            )),
        }
    }

    /// Blocks the calling thread for up to `duration`, returning early if
    /// [`SyncTimer::signal`] or [`SyncTimer::shutdown`] is called from
    /// another thread in the meantime. The returned payload is whatever is
    /// currently in the slot, taken atomically with the signal check: a
    /// `signal` that landed before this call even started is still
    /// observed, and a `Timeout` result with `Some` payload can only happen
    /// if the signal arrived in the same instant the deadline did.
    pub fn start(&self, duration: Duration) -> (TimerState, Option<T>) {
        let (lock, cvar) = &*self.inner;
        let mut guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        let deadline = Instant::now() + duration;
        loop {
            if guard.shutdown {
                return (TimerState::Cancelled, guard.payload.take());
            }
            if guard.signalled {
                guard.signalled = false;
                return (TimerState::Cancelled, guard.payload.take());
            }
            let now = Instant::now();
            if now >= deadline {
                return (TimerState::Timeout, guard.payload.take());
            }
            let (g, timeout_result) = cvar
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            guard = g;
            if timeout_result.timed_out() && !guard.signalled && !guard.shutdown {
                return (TimerState::Timeout, guard.payload.take());
            }
        }
    }

    /// Idempotently cancels a currently running (or about to run) `start`,
    /// depositing `value` into the payload slot atomically with the signal.
    pub fn signal(&self, value: T) {
        let (lock, cvar) = &*self.inner;
        let mut guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        guard.payload = Some(value);
        guard.signalled = true;
        cvar.notify_all();
    }

    /// Permanently cancels the timer; every future `start` call returns
    /// immediately with [`TimerState::Cancelled`]. Used when a channel is
    /// torn down, so any thread blocked in `start` unblocks within one
    /// timer quantum.
    pub fn shutdown(&self) {
        let (lock, cvar) = &*self.inner;
        let mut guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        guard.shutdown = true;
        cvar.notify_all();
    }
}

impl SyncTimer<()> {
    /// Cancels a currently running `start` with no payload attached;
    /// sugar for `signal(())` used by timers that only need the three-way
    /// wait contract (e.g. the UDP discovery window).
    pub fn stop(&self) {
        self.signal(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn timeout_fires_without_cancellation() {
        let timer: SyncTimer = SyncTimer::new();
        let start = Instant::now();
        let (state, payload) = timer.start(Duration::from_millis(30));
        assert_eq!(state, TimerState::Timeout);
        assert_eq!(payload, None);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn stop_cancels_before_deadline() {
        let timer: SyncTimer = SyncTimer::new();
        let timer2 = timer.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            timer2.stop();
        });
        let (state, _) = timer.start(Duration::from_secs(5));
        handle.join().unwrap();
        assert_eq!(state, TimerState::Cancelled);
    }

    #[test]
    fn shutdown_unblocks_promptly() {
        let timer: SyncTimer = SyncTimer::new();
        let timer2 = timer.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            timer2.shutdown();
        });
        let start = Instant::now();
        let (state, _) = timer.start(Duration::from_secs(30));
        handle.join().unwrap();
        assert_eq!(state, TimerState::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn stop_is_idempotent() {
        let timer: SyncTimer = SyncTimer::new();
        timer.stop();
        timer.stop();
        let (state, _) = timer.start(Duration::from_millis(5));
        assert_eq!(state, TimerState::Cancelled);
    }

    #[test]
    fn restart_after_previous_returns_works() {
        let timer: SyncTimer = SyncTimer::new();
        assert_eq!(timer.start(Duration::from_millis(5)).0, TimerState::Timeout);
        let timer2 = timer.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            timer2.stop();
        });
        assert_eq!(timer.start(Duration::from_secs(5)).0, TimerState::Cancelled);
        handle.join().unwrap();
    }

    #[test]
    fn signal_before_start_is_not_lost() {
        let timer: SyncTimer<u32> = SyncTimer::new();
        timer.signal(42);
        let (state, payload) = timer.start(Duration::from_millis(50));
        assert_eq!(state, TimerState::Cancelled);
        assert_eq!(payload, Some(42));
    }
}
