use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A min-heap of pending timer callbacks, serviced by one background
/// thread. Used by [`super::pool::WorkerPool`] to implement
/// [`super::Action::SleepMillis`] without requiring every task to poll.
pub(crate) struct TimerQueue {
    heap: Mutex<BinaryHeap<Entry>>,
    wake: Condvar,
    running: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
}

struct Entry {
    deadline: Instant,
    callback: Box<dyn FnOnce() + Send>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline
    }
}
impl Eq for Entry {}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap is a max-heap; reverse so the earliest deadline sorts first.
        other.deadline.cmp(&self.deadline)
    }
}

impl TimerQueue {
    pub fn start() -> Arc<Self> {
        let queue = Arc::new(Self {
            heap: Mutex::new(BinaryHeap::new()),
            wake: Condvar::new(),
            running: AtomicBool::new(true),
            thread: Mutex::new(None),
        });

        let worker = {
            let queue = queue.clone();
            thread::Builder::new()
                .name("reflector-timer".into())
                .spawn(move || timer_loop(queue))
                .expect("failed to spawn timer thread")
        };
        *queue.thread.lock() = Some(worker);
        queue
    }

    /// Schedule `callback` to run no earlier than `millis` from now. The
    /// runtime may run it slightly later but never materially earlier.
    pub fn schedule(&self, millis: u64, callback: impl FnOnce() + Send + 'static) {
        let deadline = Instant::now() + Duration::from_millis(millis);
        self.heap.lock().push(Entry {
            deadline,
            callback: Box::new(callback),
        });
        self.wake.notify_one();
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.wake.notify_one();
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

fn timer_loop(queue: Arc<TimerQueue>) {
    loop {
        let due = {
            let mut heap = queue.heap.lock();
            loop {
                if !queue.running.load(Ordering::SeqCst) {
                    return;
                }
                match heap.peek() {
                    None => {
                        queue.wake.wait(&mut heap);
                    }
                    Some(top) => {
                        let now = Instant::now();
                        if top.deadline <= now {
                            break heap.pop().unwrap();
                        }
                        let wait = top.deadline - now;
                        queue.wake.wait_for(&mut heap, wait);
                    }
                }
            }
        };
        (due.callback)();
    }
}
