//! Thread-backed scheduler.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace};

use super::{Job, JobControl, Repeat, ScheduledHandle, Scheduler, SchedulerError};

/// Deadline-ordered job queue served by a fixed set of named worker threads.
///
/// A job is off the queue while it executes, so it never runs concurrently
/// with itself even with several workers. Jobs sharing a single worker run
/// one after another; a slow job delays the others.
pub struct ThreadScheduler {
    name: String,
    queue: Arc<Queue>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

struct Queue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

struct QueueState {
    entries: BinaryHeap<Entry>,
    next_seq: u64,
    shutdown: bool,
}

struct Entry {
    /// `None` when the delay overflows the clock: parked until cancelled.
    deadline: Option<Instant>,
    seq: u64,
    name: String,
    delay: Duration,
    control: Arc<JobControl>,
    job: Job,
}

fn due_after(delay: Duration) -> Option<Instant> {
    Instant::now().checked_add(delay)
}

/// Earliest first; parked entries sort after every timed one.
fn cmp_deadlines(a: Option<Instant>, b: Option<Instant>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

// Reversed so the max-heap yields the earliest deadline, FIFO among equals.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_deadlines(other.deadline, self.deadline).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl Queue {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, state: &mut QueueState, mut entry: Entry) {
        entry.seq = state.next_seq;
        state.next_seq += 1;
        state.entries.push(entry);
        self.ready.notify_one();
    }

    /// Block until an entry is due. `None` once shut down.
    fn next_due(&self) -> Option<Entry> {
        let mut state = self.lock();
        loop {
            if state.shutdown {
                return None;
            }

            let now = Instant::now();
            let wait = match state.entries.peek().and_then(|entry| entry.deadline) {
                None => None,
                Some(deadline) if deadline <= now => return state.entries.pop(),
                Some(deadline) => Some(deadline - now),
            };

            state = match wait {
                None => self.ready.wait(state).unwrap_or_else(PoisonError::into_inner),
                Some(timeout) => {
                    self.ready
                        .wait_timeout(state, timeout)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    fn purge_cancelled(&self) {
        self.lock()
            .entries
            .retain(|entry| !entry.control.is_cancelled());
    }
}

impl ThreadScheduler {
    /// Scheduler with a single worker thread.
    pub fn new(name: impl Into<String>) -> Result<Self, SchedulerError> {
        Self::with_workers(name, 1)
    }

    pub fn with_workers(name: impl Into<String>, workers: usize) -> Result<Self, SchedulerError> {
        let name = name.into();
        let queue = Arc::new(Queue {
            state: Mutex::new(QueueState {
                entries: BinaryHeap::new(),
                next_seq: 0,
                shutdown: false,
            }),
            ready: Condvar::new(),
        });

        let scheduler = Self {
            name: name.clone(),
            queue: queue.clone(),
            workers: Mutex::new(Vec::new()),
        };

        for index in 0..workers.max(1) {
            let queue = queue.clone();
            let worker_name = format!("{name}-{index}");
            let thread_name = worker_name.clone();
            let join = thread::Builder::new()
                .name(thread_name)
                .spawn(move || worker_loop(&worker_name, &queue))
                .map_err(|e| SchedulerError::Spawn(e.to_string()))?;
            scheduler.lock_workers().push(join);
        }

        info!(scheduler = %name, workers = workers.max(1), "scheduler started");
        Ok(scheduler)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of jobs waiting for their next deadline.
    pub fn pending(&self) -> usize {
        self.queue.lock().entries.len()
    }

    pub fn is_shutdown(&self) -> bool {
        self.queue.lock().shutdown
    }

    /// Drop every queued job and join the workers. A job executing right now
    /// finishes its current execution first. Idempotent.
    pub fn shutdown(&self) {
        let dropped = {
            let mut state = self.queue.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            std::mem::take(&mut state.entries)
        };
        self.queue.ready.notify_all();

        let pending = dropped.len();
        drop(dropped);

        let me = thread::current().id();
        for join in self.lock_workers().drain(..) {
            if join.thread().id() == me {
                continue;
            }
            if join.join().is_err() {
                error!(scheduler = %self.name, "scheduler worker panicked");
            }
        }

        info!(scheduler = %self.name, dropped = pending, "scheduler stopped");
    }

    fn lock_workers(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Scheduler for ThreadScheduler {
    fn schedule_with_fixed_delay(
        &self,
        name: &str,
        initial_delay: Duration,
        delay: Duration,
        job: Job,
    ) -> Result<ScheduledHandle, SchedulerError> {
        let control = JobControl::new();

        {
            let mut state = self.queue.lock();
            if state.shutdown {
                return Err(SchedulerError::Shutdown(self.name.clone()));
            }
            let entry = Entry {
                deadline: due_after(initial_delay),
                seq: 0,
                name: name.to_string(),
                delay,
                control: control.clone(),
                job,
            };
            self.queue.push(&mut state, entry);
        }

        trace!(
            scheduler = %self.name,
            job = %name,
            initial_delay_ms = initial_delay.as_millis() as u64,
            delay_ms = delay.as_millis() as u64,
            "job scheduled"
        );

        let queue: Weak<Queue> = Arc::downgrade(&self.queue);
        Ok(ScheduledHandle::new(name, control).with_purge(move || {
            if let Some(queue) = queue.upgrade() {
                queue.purge_cancelled();
            }
        }))
    }
}

impl Drop for ThreadScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for ThreadScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadScheduler")
            .field("name", &self.name)
            .field("pending", &self.pending())
            .finish()
    }
}

fn worker_loop(worker: &str, queue: &Queue) {
    debug!(worker = %worker, "scheduler worker started");

    while let Some(mut entry) = queue.next_due() {
        if !entry.control.enter() {
            trace!(worker = %worker, job = %entry.name, "dropping cancelled job");
            continue;
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (entry.job)()));
        entry.control.exit();

        match outcome {
            Ok(Repeat::Continue) => {
                let mut state = queue.lock();
                // Checked under the queue lock so a concurrent purge can't miss it.
                if state.shutdown || entry.control.is_cancelled() {
                    continue;
                }
                entry.deadline = due_after(entry.delay);
                queue.push(&mut state, entry);
            }
            Ok(Repeat::Stop) => {
                trace!(worker = %worker, job = %entry.name, "job stopped");
            }
            Err(_) => {
                error!(worker = %worker, job = %entry.name, "scheduled job panicked; dropping it");
            }
        }
    }

    debug!(worker = %worker, "scheduler worker stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
    use std::sync::mpsc;

    use super::*;

    fn counting_job(counter: Arc<AtomicU32>, stop_at: u32) -> Job {
        Box::new(move || {
            if counter.fetch_add(1, AtomicOrdering::SeqCst) + 1 >= stop_at {
                Repeat::Stop
            } else {
                Repeat::Continue
            }
        })
    }

    #[test]
    fn repeats_until_job_stops() {
        let scheduler = ThreadScheduler::new("test-scheduler").unwrap();
        let counter = Arc::new(AtomicU32::new(0));
        let (tx, rx) = mpsc::channel();

        let inner = counter.clone();
        let job: Job = Box::new(move || {
            let n = inner.fetch_add(1, AtomicOrdering::SeqCst) + 1;
            if n == 3 {
                tx.send(()).unwrap();
                Repeat::Stop
            } else {
                Repeat::Continue
            }
        });
        scheduler
            .schedule_with_fixed_delay("count", Duration::ZERO, Duration::from_millis(5), job)
            .unwrap();

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(counter.load(AtomicOrdering::SeqCst), 3);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn honours_initial_delay_and_ordering() {
        let scheduler = ThreadScheduler::new("ordering").unwrap();
        let (tx, rx) = mpsc::channel();

        for (label, delay_ms) in [("late", 60u64), ("early", 10)] {
            let tx = tx.clone();
            scheduler
                .schedule_with_fixed_delay(
                    label,
                    Duration::from_millis(delay_ms),
                    Duration::from_secs(1),
                    Box::new(move || {
                        tx.send((label, Instant::now())).unwrap();
                        Repeat::Stop
                    }),
                )
                .unwrap();
        }

        let started = Instant::now();
        let (first, _) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let (second, at) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first, "early");
        assert_eq!(second, "late");
        assert!(at.duration_since(started) >= Duration::from_millis(40));
    }

    #[test]
    fn cancel_removes_queued_job() {
        let scheduler = ThreadScheduler::new("cancel").unwrap();
        let counter = Arc::new(AtomicU32::new(0));

        let handle = scheduler
            .schedule_with_fixed_delay(
                "never",
                Duration::from_secs(60),
                Duration::from_secs(60),
                counting_job(counter.clone(), u32::MAX),
            )
            .unwrap();
        assert_eq!(scheduler.pending(), 1);

        handle.cancel();
        assert_eq!(scheduler.pending(), 0);
        assert_eq!(counter.load(AtomicOrdering::SeqCst), 0);
    }

    #[test]
    fn rejects_after_shutdown() {
        let scheduler = ThreadScheduler::with_workers("stopped", 2).unwrap();
        scheduler.shutdown();
        scheduler.shutdown();

        let err = scheduler
            .schedule_with_fixed_delay(
                "late",
                Duration::ZERO,
                Duration::ZERO,
                counting_job(Arc::new(AtomicU32::new(0)), 1),
            )
            .unwrap_err();
        assert_eq!(err, SchedulerError::Shutdown("stopped".to_string()));
    }

    #[test]
    fn panicking_job_does_not_kill_worker() {
        let scheduler = ThreadScheduler::new("panics").unwrap();
        scheduler
            .schedule_with_fixed_delay(
                "boom",
                Duration::ZERO,
                Duration::ZERO,
                Box::new(|| -> Repeat { panic!("boom") }),
            )
            .unwrap();

        let (tx, rx) = mpsc::channel();
        scheduler
            .schedule_with_fixed_delay(
                "after",
                Duration::from_millis(10),
                Duration::ZERO,
                Box::new(move || {
                    tx.send(()).unwrap();
                    Repeat::Stop
                }),
            )
            .unwrap();

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn unbounded_delays_park_instead_of_killing_worker() {
        let scheduler = ThreadScheduler::new("unbounded").unwrap();
        let counter = Arc::new(AtomicU32::new(0));

        let never = scheduler
            .schedule_with_fixed_delay(
                "never",
                Duration::MAX,
                Duration::ZERO,
                counting_job(counter.clone(), u32::MAX),
            )
            .unwrap();
        let (tx, rx) = mpsc::channel();
        let once = scheduler
            .schedule_with_fixed_delay(
                "once",
                Duration::ZERO,
                Duration::MAX,
                Box::new(move || {
                    tx.send(()).unwrap();
                    Repeat::Continue
                }),
            )
            .unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let (tx, rx) = mpsc::channel();
        scheduler
            .schedule_with_fixed_delay(
                "after",
                Duration::from_millis(10),
                Duration::ZERO,
                Box::new(move || {
                    tx.send(()).unwrap();
                    Repeat::Stop
                }),
            )
            .unwrap();

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(counter.load(AtomicOrdering::SeqCst), 0);
        assert_eq!(scheduler.pending(), 2);

        never.cancel();
        once.cancel();
        assert_eq!(scheduler.pending(), 0);
    }
}
