//! Fixed-size worker thread pool.
//!
//! A bounded set of workers shares one task queue. `post` enqueues without
//! blocking the caller; `join` waits until no queued or in-flight work
//! remains and every worker has stopped. Callers must ensure posted tasks
//! are finite: `join` waits indefinitely on a task that never finishes.
//!
//! A parallel backend computes disjoint populations and projections on this
//! pool; the single-threaded backend is the degenerate one-worker case run
//! synchronously and does not use it.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Errors from pool operations.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("thread pool already joined")]
    Joined,
}

#[derive(Default)]
struct PoolQueue {
    tasks: VecDeque<Task>,
    in_flight: usize,
    shutting_down: bool,
}

#[derive(Default)]
struct PoolShared {
    queue: Mutex<PoolQueue>,
    /// Workers park here while the queue is empty.
    work_available: Condvar,
    /// `join` parks here until queued + in-flight work drains.
    work_done: Condvar,
}

/// A reusable pool of `n` worker threads over one shared task queue.
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Spawn a pool with `num_threads` workers.
    ///
    /// # Panics
    /// Panics if `num_threads` is zero.
    pub fn new(num_threads: usize) -> Self {
        assert!(num_threads > 0, "a pool needs at least one worker");
        let shared = Arc::new(PoolShared::default());
        let workers = (0..num_threads)
            .map(|index| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("spikeflow-worker-{index}"))
                    .spawn(move || worker_loop(&shared))
                    .expect("failed to spawn pool worker")
            })
            .collect();
        ThreadPool { shared, workers }
    }

    /// Enqueue a task without blocking. Fails once the pool has been joined.
    pub fn post(&self, task: impl FnOnce() + Send + 'static) -> Result<(), PoolError> {
        let mut queue = self.shared.queue.lock().unwrap();
        if queue.shutting_down {
            return Err(PoolError::Joined);
        }
        queue.tasks.push_back(Box::new(task));
        drop(queue);
        self.shared.work_available.notify_one();
        Ok(())
    }

    /// Block until all outstanding and in-flight work has finished, then
    /// stop every worker. Idempotent.
    pub fn join(&mut self) {
        {
            let mut queue = self.shared.queue.lock().unwrap();
            while !queue.tasks.is_empty() || queue.in_flight > 0 {
                queue = self.shared.work_done.wait(queue).unwrap();
            }
            queue.shutting_down = true;
        }
        self.shared.work_available.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.join();
    }
}

fn worker_loop(shared: &PoolShared) {
    loop {
        let task = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if let Some(task) = queue.tasks.pop_front() {
                    queue.in_flight += 1;
                    break task;
                }
                if queue.shutting_down {
                    return;
                }
                queue = shared.work_available.wait(queue).unwrap();
            }
        };

        task();

        let mut queue = shared.queue.lock().unwrap();
        queue.in_flight -= 1;
        if queue.tasks.is_empty() && queue.in_flight == 0 {
            shared.work_done.notify_all();
        }
    }
}
