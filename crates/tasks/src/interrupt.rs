//! Early-stop handle for running tasks.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

type Listener = Box<dyn Fn() + Send>;

/// Stops a task between iterations.
///
/// A foreground task sleeping between iterations wakes up immediately; a
/// caller blocked on a background task returns without waiting for the next
/// tick. Either way `run` reports `Ok(false)` and the task ends in
/// [`TaskState::Interrupted`](crate::TaskState::Interrupted). An iteration
/// already executing is never pre-empted.
#[derive(Clone, Default)]
pub struct Interrupter {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    wake: Condvar,
}

#[derive(Default)]
struct State {
    interrupted: bool,
    next_listener: u64,
    listeners: Vec<(u64, Listener)>,
}

impl Interrupter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        let mut state = self.lock();
        if state.interrupted {
            return;
        }
        state.interrupted = true;
        for (_, listener) in state.listeners.drain(..) {
            listener();
        }
        self.inner.wake.notify_all();
    }

    pub fn is_interrupted(&self) -> bool {
        self.lock().interrupted
    }

    /// Sleep for `duration` unless interrupted first. Returns `true` when
    /// interrupted.
    pub(crate) fn sleep(&self, duration: Duration) -> bool {
        let state = self.lock();
        if duration.is_zero() {
            return state.interrupted;
        }

        let (state, _) = self
            .inner
            .wake
            .wait_timeout_while(state, duration, |s| !s.interrupted)
            .unwrap_or_else(PoisonError::into_inner);
        state.interrupted
    }

    /// Run `listener` once on interrupt, or right away if already interrupted.
    /// The listener is dropped with the returned guard.
    pub(crate) fn on_interrupt(&self, listener: impl Fn() + Send + 'static) -> ListenerGuard {
        let mut state = self.lock();
        let id = state.next_listener;
        state.next_listener += 1;

        if state.interrupted {
            drop(state);
            listener();
        } else {
            state.listeners.push((id, Box::new(listener)));
        }

        ListenerGuard {
            interrupter: self.clone(),
            id,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Interrupter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Interrupter")
            .field("interrupted", &state.interrupted)
            .field("listeners", &state.listeners.len())
            .finish()
    }
}

/// Deregisters an interrupt listener on drop.
pub(crate) struct ListenerGuard {
    interrupter: Interrupter,
    id: u64,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.interrupter
            .lock()
            .listeners
            .retain(|(id, _)| *id != self.id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;
    use std::time::Instant;

    use super::*;

    #[test]
    fn sleep_runs_full_duration_without_interrupt() {
        let interrupter = Interrupter::new();
        let started = Instant::now();

        assert!(!interrupter.sleep(Duration::from_millis(20)));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn interrupt_wakes_sleeper() {
        let interrupter = Interrupter::new();
        let remote = interrupter.clone();
        let started = Instant::now();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.interrupt();
        });

        assert!(interrupter.sleep(Duration::from_secs(30)));
        assert!(started.elapsed() < Duration::from_secs(10));
        handle.join().unwrap();
    }

    #[test]
    fn listeners_fire_once_and_unregister_on_drop() {
        let interrupter = Interrupter::new();
        let fired = Arc::new(AtomicU32::new(0));

        let kept = {
            let fired = fired.clone();
            interrupter.on_interrupt(move || {
                fired.fetch_add(1, Ordering::SeqCst);
            })
        };
        {
            let fired = fired.clone();
            let _dropped = interrupter.on_interrupt(move || {
                fired.fetch_add(10, Ordering::SeqCst);
            });
        }

        interrupter.interrupt();
        interrupter.interrupt();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        drop(kept);
    }

    #[test]
    fn late_listener_fires_immediately() {
        let interrupter = Interrupter::new();
        interrupter.interrupt();

        let fired = Arc::new(AtomicU32::new(0));
        let counter = fired.clone();
        let _guard = interrupter.on_interrupt(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(interrupter.sleep(Duration::ZERO));
    }
}
