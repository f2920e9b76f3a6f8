use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::timer::TimerQueue;
use super::{Action, Task, TaskState, event};

#[derive(Clone)]
struct Entry {
    task: Arc<dyn Task>,
    state: Arc<TaskState>,
}

/// A fixed-size worker pool that drives [`Task`]s to completion.
///
/// Mirrors the concurrency primitives the rest of the crate already uses
/// (`parking_lot::Mutex` + condvar-style signalling, plain
/// `std::thread::spawn` workers) rather than pulling in an async runtime.
pub struct WorkerPool {
    queue: Arc<Mutex<VecDeque<Entry>>>,
    not_empty: Arc<Condvar>,
    timers: Arc<TimerQueue>,
    running: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// A handle used by task owners to deliver events, without exposing the
/// pool's internal queue.
#[derive(Clone)]
pub struct TaskHandle {
    entry: Entry,
    queue: Arc<Mutex<VecDeque<Entry>>>,
    not_empty: Arc<Condvar>,
    timers: Arc<TimerQueue>,
}

impl TaskHandle {
    /// Merge an event into the task's pending set; enqueue it if it is
    /// not already queued or running.
    pub fn signal(&self, events: u8) {
        self.entry.state.merge(events);
        enqueue_if_idle(&self.queue, &self.not_empty, self.entry.clone());
    }

    fn schedule_wakeup(&self, millis: u64) {
        let handle = self.clone();
        self.timers.schedule(millis, move || handle.signal(event::TIMEOUT));
    }
}

fn enqueue_if_idle(queue: &Mutex<VecDeque<Entry>>, not_empty: &Condvar, entry: Entry) {
    if entry.state.try_acquire() {
        queue.lock().push_back(entry);
        not_empty.notify_one();
    }
}

impl WorkerPool {
    /// Start `worker_count` threads (minimum 1). A `worker_count` of 0
    /// is treated as "number of available cores".
    pub fn start(worker_count: usize) -> Arc<Self> {
        let worker_count = if worker_count == 0 {
            thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            worker_count
        };

        let pool = Arc::new(Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            not_empty: Arc::new(Condvar::new()),
            timers: TimerQueue::start(),
            running: Arc::new(AtomicBool::new(true)),
            workers: Mutex::new(Vec::with_capacity(worker_count)),
        });

        let mut workers = Vec::with_capacity(worker_count);
        for idx in 0..worker_count.max(1) {
            let queue = pool.queue.clone();
            let not_empty = pool.not_empty.clone();
            let running = pool.running.clone();
            let timers = pool.timers.clone();
            workers.push(
                thread::Builder::new()
                    .name(format!("reflector-worker-{idx}"))
                    .spawn(move || worker_loop(queue, not_empty, timers, running))
                    .expect("failed to spawn worker thread"),
            );
        }
        *pool.workers.lock() = workers;
        pool
    }

    /// Register a task with the pool and return a handle the owner can
    /// use to signal it. The task is scheduled for an initial
    /// [`event::START`] run.
    pub fn spawn(self: &Arc<Self>, task: Arc<dyn Task>) -> TaskHandle {
        let entry = Entry {
            task,
            state: Arc::new(TaskState::default()),
        };
        let handle = TaskHandle {
            entry: entry.clone(),
            queue: self.queue.clone(),
            not_empty: self.not_empty.clone(),
            timers: self.timers.clone(),
        };
        enqueue_if_idle(&self.queue, &self.not_empty, entry);
        handle
    }

    /// Stop accepting new work and join worker threads. Already-queued
    /// tasks are allowed to drain; no new signals should arrive once
    /// callers stop holding handles.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.not_empty.notify_all();
        self.timers.shutdown();
        let mut workers = self.workers.lock();
        for w in workers.drain(..) {
            let _ = w.join();
        }
    }
}

fn worker_loop(
    queue: Arc<Mutex<VecDeque<Entry>>>,
    not_empty: Arc<Condvar>,
    timers: Arc<TimerQueue>,
    running: Arc<AtomicBool>,
) {
    loop {
        let entry = {
            let mut q = queue.lock();
            loop {
                if let Some(entry) = q.pop_front() {
                    break Some(entry);
                }
                if !running.load(Ordering::SeqCst) {
                    break None;
                }
                not_empty.wait_for(&mut q, Duration::from_millis(200));
            }
        };

        let Some(entry) = entry else {
            return;
        };

        let events = entry.state.take();
        let action = entry.task.run(events);
        entry.state.release();

        match action {
            Action::Continue => {
                enqueue_if_idle(&queue, &not_empty, entry);
            }
            Action::DeleteSelf => {
                tracing::trace!(task = entry.task.name(), "task deleted");
            }
            Action::SleepForever => {
                // Only re-enqueues on a future `signal`.
            }
            Action::SleepMillis(millis) => {
                let handle = TaskHandle {
                    entry: entry.clone(),
                    queue: queue.clone(),
                    not_empty: not_empty.clone(),
                    timers: timers.clone(),
                };
                handle.schedule_wakeup(millis);
            }
        }

        // A signal may have arrived while `run` executed and lost the
        // race with `release` above; re-check and requeue only if
        // something is actually pending, otherwise `SleepForever` and
        // `SleepMillis` tasks would spin in a tight loop.
        if action != Action::DeleteSelf && entry.state.has_pending() {
            enqueue_if_idle(&queue, &not_empty, entry);
        }
    }
}
