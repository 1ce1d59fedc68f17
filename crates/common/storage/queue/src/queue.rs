// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Main queue struct and blocking access.
//!
//! The [`Queue`] is the only entry point to a queue directory. It owns:
//! - The buffer/pointer state machine behind a single mutex
//! - Condition variables for "not empty", "not full" and "all done"
//! - Work-queue style completion tracking (`task_done` / `join`)
//!
//! ## Usage
//!
//! ```ignore
//! let queue: Queue<String> = QueueBuilder::new("/var/lib/app", "jobs")
//!     .cache_size(1000)
//!     .max_size(100_000)
//!     .build()?;
//!
//! queue.put("hello".to_string(), Blocking::Forever)?;
//! let item = queue.get(Blocking::Timeout(Duration::from_secs(1)))?;
//! queue.task_done()?;
//!
//! // Give unconsumed items back to disk before exiting.
//! queue.sync()?;
//! queue.close()?;
//! ```

use std::{
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex, MutexGuard};
use snafu::{OptionExt, ensure};
use tracing::{debug, error, info};

use crate::{
    Blocking, Item, QueueConfig, QueueError, Result,
    error::{ClosedSnafu, EmptySnafu, FullSnafu, InvalidStateSnafu, OutOfRangeSnafu},
    index::Pointers,
    recovery::{RecoveryInfo, open_state},
    state::QueueState,
};

/// Point-in-time view of a queue's internals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub pointers:     Pointers,
    pub put_buffered: usize,
    pub get_buffered: usize,
    /// Approximate length, see [`Queue::len`].
    pub len:          usize,
    pub unfinished:   usize,
}

struct Inner<T> {
    state:      QueueState<T>,
    /// Items put but not yet acknowledged with `task_done`.
    unfinished: usize,
    closed:     bool,
}

/// A disk-backed FIFO queue shared between threads.
///
/// All methods take `&self`; wrap the queue in an `Arc` to share it.
pub struct Queue<T: Item> {
    config:    QueueConfig,
    dir:       PathBuf,
    recovery:  RecoveryInfo,
    inner:     Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full:  Condvar,
    all_done:  Condvar,
}

/// Upper bound on a wait, resolved once per call.
#[derive(Clone, Copy)]
enum Deadline {
    Never,
    At(Instant),
}

impl Deadline {
    fn after(timeout: Duration) -> Self {
        Instant::now()
            .checked_add(timeout)
            .map_or(Self::Never, Self::At)
    }

    /// Waits on `condvar` until notified or the deadline passes. Returns
    /// `false` without waiting if the deadline has already passed.
    fn wait<T>(self, condvar: &Condvar, guard: &mut MutexGuard<'_, Inner<T>>) -> bool {
        match self {
            Self::Never => {
                condvar.wait(guard);
                true
            }
            Self::At(deadline) => {
                if Instant::now() >= deadline {
                    return false;
                }
                let _ = condvar.wait_until(guard, deadline);
                true
            }
        }
    }
}

impl<T: Item> Queue<T> {
    /// Opens the queue directory `config.base_path/config.name`, creating it
    /// on first use and recovering the previous state otherwise.
    pub fn open(config: QueueConfig) -> Result<Self> {
        config.validate()?;
        let (state, recovery) = open_state(&config)?;
        let dir = config.queue_dir();

        info!(
            path = ?dir,
            cache_size = config.cache_size,
            max_size = ?config.max_size,
            recovered = recovery.recovered,
            head = recovery.current.head,
            tail = recovery.current.tail,
            "Queue opened"
        );

        Ok(Self {
            config,
            dir,
            recovery,
            inner: Mutex::new(Inner {
                state,
                unfinished: 0,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            all_done: Condvar::new(),
        })
    }

    /// Adds `item` to the back of the queue.
    ///
    /// With a `max_size`, waits for room according to `mode` and fails with
    /// `Full` if none frees up in time.
    pub fn put(&self, item: T, mode: Blocking) -> Result<()> {
        let deadline = match mode {
            Blocking::Timeout(timeout) => Some(Deadline::after(timeout)),
            Blocking::Forever => Some(Deadline::Never),
            Blocking::NoWait => None,
        };

        let mut inner = self.inner.lock();
        loop {
            ensure!(!inner.closed, ClosedSnafu);
            let Some(max_size) = self.config.max_size else {
                break;
            };
            if inner.state.len() < max_size {
                break;
            }
            let waited = deadline.is_some_and(|d| d.wait(&self.not_full, &mut inner));
            if !waited {
                return FullSnafu { max_size }.fail();
            }
        }

        if let Err(e) = inner.state.enqueue(item) {
            // Pass the wakeup on; the room this caller was woken for is still there.
            self.not_full.notify_one();
            return Err(e);
        }
        inner.unfinished += 1;
        self.not_empty.notify_one();
        Ok(())
    }

    pub fn put_nowait(&self, item: T) -> Result<()> { self.put(item, Blocking::NoWait) }

    pub fn put_timeout(&self, item: T, timeout: Duration) -> Result<()> {
        self.put(item, Blocking::Timeout(timeout))
    }

    /// Removes and returns the item at the front of the queue.
    ///
    /// Waits for an item according to `mode` and fails with `Empty` if none
    /// arrives in time.
    pub fn get(&self, mode: Blocking) -> Result<T> {
        let deadline = match mode {
            Blocking::Timeout(timeout) => Some(Deadline::after(timeout)),
            Blocking::Forever => Some(Deadline::Never),
            Blocking::NoWait => None,
        };

        let mut inner = self.inner.lock();
        loop {
            ensure!(!inner.closed, ClosedSnafu);
            let before = inner.state.len();
            match inner.state.dequeue() {
                Ok(item) => {
                    // Loading a short chunk can shrink the estimate by more
                    // than one item, which may make room for several puts.
                    if before.saturating_sub(inner.state.len()) > 1 {
                        self.not_full.notify_all();
                    } else {
                        self.not_full.notify_one();
                    }
                    return Ok(item);
                }
                Err(QueueError::Empty) => {
                    let waited = deadline.is_some_and(|d| d.wait(&self.not_empty, &mut inner));
                    if !waited {
                        return EmptySnafu.fail();
                    }
                }
                Err(e) => {
                    self.not_empty.notify_one();
                    return Err(e);
                }
            }
        }
    }

    pub fn get_nowait(&self) -> Result<T> { self.get(Blocking::NoWait) }

    pub fn get_timeout(&self, timeout: Duration) -> Result<T> {
        self.get(Blocking::Timeout(timeout))
    }

    /// Returns the next `count` items without removing them.
    ///
    /// Fails with `OutOfRange` if fewer than `count` items are queued, and
    /// with `InvalidArgument` if `count` is zero. Never deletes a chunk file
    /// or moves a pointer.
    pub fn peek(&self, count: usize) -> Result<Vec<T>> {
        let inner = self.inner.lock();
        ensure!(!inner.closed, ClosedSnafu);
        inner.state.peek(count)
    }

    /// Returns the item at the front without removing it.
    pub fn peek_front(&self) -> Result<T> {
        self.peek(1)?.pop().context(OutOfRangeSnafu {
            requested: 1_usize,
            available: 0_usize,
        })
    }

    /// Writes both buffers to chunk files so that a later open recovers
    /// every item still queued, including items already loaded for
    /// consumption but not yet returned by `get`.
    pub fn sync(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        ensure!(!inner.closed, ClosedSnafu);
        inner.state.sync()?;
        debug!(
            head = inner.state.pointers().head,
            tail = inner.state.pointers().tail,
            "Queue synced"
        );
        Ok(())
    }

    /// Approximate number of queued items.
    ///
    /// Each pending chunk file counts as `cache_size` items, so the value
    /// overestimates after `sync` wrote short chunks.
    pub fn len(&self) -> usize { self.inner.lock().state.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Marks one previously fetched item as processed.
    ///
    /// Fails with `InvalidState` if called more times than items were put.
    pub fn task_done(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        ensure!(
            inner.unfinished > 0,
            InvalidStateSnafu {
                reason: "task_done() called more times than items were put",
            }
        );
        inner.unfinished -= 1;
        if inner.unfinished == 0 {
            self.all_done.notify_all();
        }
        Ok(())
    }

    /// Waits until every item put has been marked with `task_done`.
    pub fn join(&self) -> Result<()> { self.wait_all_done(Deadline::Never).map(|_| ()) }

    /// Like [`join`](Self::join) but gives up after `timeout`. Returns
    /// `true` when all tasks are done.
    pub fn join_timeout(&self, timeout: Duration) -> Result<bool> {
        self.wait_all_done(Deadline::after(timeout))
    }

    fn wait_all_done(&self, deadline: Deadline) -> Result<bool> {
        let mut inner = self.inner.lock();
        loop {
            if inner.unfinished == 0 {
                return Ok(true);
            }
            ensure!(!inner.closed, ClosedSnafu);
            if !deadline.wait(&self.all_done, &mut inner) {
                return Ok(false);
            }
        }
    }

    pub fn unfinished_tasks(&self) -> usize { self.inner.lock().unfinished }

    /// Closes the queue. Blocked and later calls fail with `Closed`.
    ///
    /// Runs `sync` first when `sync_on_close` is set. On-disk state is left
    /// in place. Closing an already closed queue does nothing.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Ok(());
        }
        inner.closed = true;

        let synced = if self.config.sync_on_close {
            inner.state.sync()
        } else {
            Ok(())
        };

        self.not_empty.notify_all();
        self.not_full.notify_all();
        self.all_done.notify_all();

        info!(
            path = ?self.dir,
            head = inner.state.pointers().head,
            tail = inner.state.pointers().tail,
            "Queue closed"
        );
        synced
    }

    pub fn is_closed(&self) -> bool { self.inner.lock().closed }

    pub fn pointers(&self) -> Pointers { self.inner.lock().state.pointers() }

    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock();
        QueueStats {
            pointers:     inner.state.pointers(),
            put_buffered: inner.state.put_buffered(),
            get_buffered: inner.state.get_buffered(),
            len:          inner.state.len(),
            unfinished:   inner.unfinished,
        }
    }

    /// What the open found on disk.
    pub const fn recovery_info(&self) -> RecoveryInfo { self.recovery }

    /// Directory holding the index and chunk files.
    pub fn path(&self) -> &Path { &self.dir }

    pub const fn config(&self) -> &QueueConfig { &self.config }
}

impl<T: Item> Drop for Queue<T> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if inner.closed {
            return;
        }
        inner.closed = true;
        if self.config.sync_on_close
            && let Err(e) = inner.state.sync()
        {
            error!(path = ?self.dir, error = %e, "Failed to sync queue on drop");
        }
        debug!(path = ?self.dir, "Queue dropped without close");
    }
}
