//-
// Copyright (c) 2020, Jason Lingle
//
// This file is part of Mboxstore.
//
// Mboxstore is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Mboxstore is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Mboxstore. If not, see <http://www.gnu.org/licenses/>.

//! Utilities for running whole-folder passes off the caller's thread.
//!
//! Scans and compactions are rare and bursty, so rather than keeping a pool
//! of threads around, each `TaskQueue` runs at most one worker thread, which
//! is spawned on demand and exits as soon as the queue drains.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam::channel;
use log::error;

type Task = Box<dyn FnOnce() + Send>;

/// A queue of background work owned by whatever owns the store.
///
/// If `None`, no worker thread is currently running.
pub struct TaskQueue {
    work: Arc<Mutex<Option<VecDeque<Task>>>>,
    limit: usize,
}

/// Shared flag through which a running task can be asked to stop.
///
/// Tasks poll this at convenient boundaries; setting it does not interrupt
/// anything by itself.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Handle to a task submitted to a `TaskQueue`.
///
/// Dropping the handle does not cancel the task; it keeps running until done
/// and its result is discarded.
pub struct TaskHandle<T> {
    result: channel::Receiver<T>,
    cancel: CancelToken,
}

impl<T> TaskHandle<T> {
    /// Request that the task stop at its next opportunity.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Block until the task completes and return its result.
    ///
    /// Returns `None` if the task panicked.
    pub fn wait(self) -> Option<T> {
        self.result.recv().ok()
    }

    /// Return the result if the task has already completed.
    pub fn try_result(&self) -> Option<T> {
        self.result.try_recv().ok()
    }
}

impl TaskQueue {
    /// Create a queue which accepts up to `limit` pending tasks.
    ///
    /// Submissions beyond that are run synchronously on the submitting
    /// thread, which provides back-pressure.
    pub fn new(limit: usize) -> Self {
        TaskQueue {
            work: Arc::new(Mutex::new(None)),
            limit,
        }
    }

    /// Run the given task in the background.
    ///
    /// In ideal cases, this call returns immediately and `task` runs at some
    /// point in the future on the worker thread. Tasks run in submission
    /// order. `task` is given the cancellation token also reachable through
    /// the returned handle.
    pub fn submit<T: Send + 'static>(
        &self,
        task: impl FnOnce(&CancelToken) -> T + Send + 'static,
    ) -> TaskHandle<T> {
        let (send, recv) = channel::bounded(1);
        let cancel = CancelToken::new();
        let handle = TaskHandle {
            result: recv,
            cancel: cancel.clone(),
        };

        let run = move || {
            // A panicking task drops `send`, which is what `wait()` reports
            // as `None`. The worker itself must survive to drain the queue.
            match panic::catch_unwind(AssertUnwindSafe(|| task(&cancel))) {
                // The receiver may be gone already; nobody wants the result
                Ok(result) => {
                    let _ = send.send(result);
                }
                Err(_) => error!("Background task panicked"),
            }
        };

        {
            let mut work = self.work.lock().unwrap();
            if work.as_ref().map_or(0, |w| w.len()) < self.limit {
                let work = work.get_or_insert_with(|| {
                    let queue = Arc::clone(&self.work);
                    std::thread::spawn(move || run_background_work(&queue));
                    VecDeque::new()
                });
                work.push_back(Box::new(run));
                return handle;
            }
        }

        // Too much work queued, run synchronously
        run();
        handle
    }
}

fn run_background_work(queue: &Mutex<Option<VecDeque<Task>>>) {
    loop {
        let task = {
            let mut work = queue.lock().unwrap();
            let popped = work.as_mut().and_then(|w| w.pop_front());
            match popped {
                Some(task) => task,
                None => {
                    *work = None;
                    break;
                }
            }
        };

        task()
    }
}
