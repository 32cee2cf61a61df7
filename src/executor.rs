//! Actor executor.
//!
//! A small, bounded, thread-based runtime: a fixed pool of named worker
//! threads, each draining one job lane. An actor is bound to exactly one
//! lane at spawn, so all of its handlers run serially and two sends from
//! the same handler arrive in order. Cooperation comes from splitting work
//! across messages; a handler runs to completion before the next job.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

type Job = Box<dyn FnOnce() + Send>;

const WORKER_TICK: Duration = Duration::from_millis(100);

/// Fixed-size pool of executor threads.
pub struct ExecutorPool {
    lanes: Vec<Sender<Job>>,
    next_lane: AtomicUsize,
    running: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ExecutorPool {
    /// Start `threads` workers (at least one).
    #[must_use]
    pub fn start(threads: usize) -> Self {
        let threads = threads.max(1);
        let running = Arc::new(AtomicBool::new(true));
        let mut lanes = Vec::with_capacity(threads);
        let mut workers = Vec::with_capacity(threads);
        for idx in 0..threads {
            let (tx, rx) = unbounded::<Job>();
            let thread_name = format!("entail-executor-{idx}");
            let thread_running = Arc::clone(&running);
            let handle = thread::Builder::new()
                .name(thread_name)
                .spawn(move || worker_loop(&rx, &thread_running))
                .expect("failed to spawn entail executor");
            lanes.push(tx);
            workers.push(handle);
        }
        Self {
            lanes,
            next_lane: AtomicUsize::new(0),
            running,
            workers: Mutex::new(workers),
        }
    }

    /// Spawn an actor bound to one lane.
    ///
    /// The build function receives the actor's own driver, so the state can
    /// capture it for outgoing sends. The state cell is held locked until
    /// the build returns; jobs scheduled during construction run afterwards.
    pub fn spawn<N, F>(&self, poison: Arc<AtomicBool>, build: F) -> Driver<N>
    where
        N: Send + 'static,
        F: FnOnce(&Driver<N>) -> N,
    {
        let lane = self.next_lane.fetch_add(1, Ordering::Relaxed) % self.lanes.len();
        let driver = Driver {
            cell: Arc::new(Mutex::new(None)),
            lane: self.lanes[lane].clone(),
            poison,
        };
        {
            let mut guard = match driver.cell.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *guard = Some(build(&driver));
        }
        driver
    }

    /// Stop the workers and join their threads.
    ///
    /// Outstanding drivers keep their lane senders; their sends after
    /// shutdown go nowhere. Idempotent, and a worker reaching this through
    /// a drop chain skips joining itself.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        let current = thread::current().id();
        let mut workers = match self.workers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for handle in workers.drain(..) {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for ExecutorPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(rx: &Receiver<Job>, running: &AtomicBool) {
    loop {
        match rx.recv_timeout(WORKER_TICK) {
            Ok(job) => job(),
            Err(RecvTimeoutError::Timeout) => {
                if !running.load(Ordering::Acquire) {
                    return;
                }
            }
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

/// Handle binding an actor of state `N` to its lane.
///
/// Cloning the driver shares the same actor. The poison flag belongs to the
/// owning registry: once set, scheduled closures are dropped unexecuted.
pub struct Driver<N> {
    cell: Arc<Mutex<Option<N>>>,
    lane: Sender<Job>,
    poison: Arc<AtomicBool>,
}

impl<N> Clone for Driver<N> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
            lane: self.lane.clone(),
            poison: Arc::clone(&self.poison),
        }
    }
}

impl<N: Send + 'static> Driver<N> {
    /// Schedule `f` onto the actor's lane.
    ///
    /// Dropped silently when the registry has been poisoned or the pool has
    /// shut down; after a terminate there is nobody left to observe results.
    pub fn execute(&self, f: impl FnOnce(&mut N) + Send + 'static) {
        let cell = Arc::clone(&self.cell);
        let poison = Arc::clone(&self.poison);
        let job: Job = Box::new(move || {
            if poison.load(Ordering::Acquire) {
                return;
            }
            let Ok(mut guard) = cell.lock() else { return };
            if let Some(state) = guard.as_mut() {
                f(state);
            }
        });
        let _ = self.lane.send(job);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::time::Duration;

    struct Counter {
        value: u64,
        observed: Arc<AtomicU64>,
    }

    fn unpoisoned() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    #[test]
    fn jobs_for_one_actor_run_serially_in_order() {
        let pool = ExecutorPool::start(4);
        let observed = Arc::new(AtomicU64::new(0));
        let driver = pool.spawn(unpoisoned(), |_| Counter {
            value: 0,
            observed: Arc::clone(&observed),
        });

        for i in 0..1000u64 {
            driver.execute(move |c| {
                // Serial execution means we always see the previous value.
                assert_eq!(c.value, i);
                c.value += 1;
                c.observed.store(c.value, Ordering::SeqCst);
            });
        }

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while observed.load(Ordering::SeqCst) < 1000 {
            assert!(std::time::Instant::now() < deadline, "executor stalled");
            thread::yield_now();
        }
    }

    #[test]
    fn poisoned_jobs_are_dropped() {
        let pool = ExecutorPool::start(1);
        let poison = unpoisoned();
        let observed = Arc::new(AtomicU64::new(0));
        let driver = pool.spawn(Arc::clone(&poison), |_| Counter {
            value: 0,
            observed: Arc::clone(&observed),
        });

        poison.store(true, Ordering::Release);
        driver.execute(|c| {
            c.observed.store(99, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(50));
        assert_eq!(observed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn build_sees_driver_before_first_job() {
        let pool = ExecutorPool::start(2);
        let observed = Arc::new(AtomicU64::new(0));
        let observed_clone = Arc::clone(&observed);
        let _driver = pool.spawn(unpoisoned(), move |driver| {
            // Scheduling during construction must not run against an empty cell.
            driver.execute(|c: &mut Counter| {
                c.value += 1;
                c.observed.store(c.value, Ordering::SeqCst);
            });
            Counter {
                value: 0,
                observed: observed_clone,
            }
        });

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while observed.load(Ordering::SeqCst) < 1 {
            assert!(std::time::Instant::now() < deadline, "executor stalled");
            thread::yield_now();
        }
    }
}
