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

//! Buffer and pointer state machine.
//!
//! [`QueueState`] owns the two in-memory buffers, the head/tail pointers and
//! the files backing them. It has no locking and never blocks; the
//! [`Queue`](crate::Queue) wraps it in a mutex and adds waiting.
//!
//! Items always come out in this order:
//!
//! ```text
//!   get_buffer  <  chunk[head] < ... < chunk[tail - 1]  <  put_buffer
//! ```
//!
//! Every pointer change is persisted to the index before it is applied in
//! memory, so a failed write leaves the state exactly as it was.

use std::collections::VecDeque;

use snafu::ensure;
use tracing::{debug, warn};

use crate::{
    Item, Result,
    chunk::ChunkStore,
    error::{EmptySnafu, InvalidArgumentSnafu, OutOfRangeSnafu},
    index::{IndexFile, Pointers},
};

/// Where the next item for a consumer comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Regime {
    /// The get buffer already holds items.
    Buffered,
    /// No chunk files are pending; the put buffer is handed over directly.
    InMemory,
    /// Chunk files `head..tail` are waiting; the next one is loaded.
    DiskPending,
}

pub(crate) struct QueueState<T> {
    cache_size: usize,
    pointers:   Pointers,
    put_buffer: VecDeque<T>,
    get_buffer: VecDeque<T>,
    index:      IndexFile,
    chunks:     ChunkStore,
}

impl<T: Item> QueueState<T> {
    pub(crate) fn new(
        cache_size: usize,
        pointers: Pointers,
        index: IndexFile,
        chunks: ChunkStore,
    ) -> Self {
        Self {
            cache_size,
            pointers,
            put_buffer: VecDeque::with_capacity(cache_size),
            get_buffer: VecDeque::new(),
            index,
            chunks,
        }
    }

    pub(crate) const fn pointers(&self) -> Pointers { self.pointers }

    pub(crate) fn put_buffered(&self) -> usize { self.put_buffer.len() }

    pub(crate) fn get_buffered(&self) -> usize { self.get_buffer.len() }

    /// Approximate number of queued items.
    ///
    /// Counts every pending chunk as `cache_size` items, which is exact
    /// unless chunks were written short by `sync`.
    pub(crate) fn len(&self) -> usize {
        let pending = usize::try_from(self.pointers.pending_chunks()).unwrap_or(usize::MAX);
        pending
            .saturating_mul(self.cache_size)
            .saturating_add(self.get_buffer.len())
            .saturating_add(self.put_buffer.len())
    }

    pub(crate) fn regime(&self) -> Regime {
        if !self.get_buffer.is_empty() {
            Regime::Buffered
        } else if self.pointers.is_drained() {
            Regime::InMemory
        } else {
            Regime::DiskPending
        }
    }

    /// Appends `item`, first spilling a full put buffer to chunk `tail`.
    pub(crate) fn enqueue(&mut self, item: T) -> Result<()> {
        if self.put_buffer.len() >= self.cache_size {
            self.flush_put_buffer()?;
        }
        self.put_buffer.push_back(item);
        Ok(())
    }

    /// Removes and returns the oldest item, or `Empty`.
    pub(crate) fn dequeue(&mut self) -> Result<T> {
        loop {
            match self.regime() {
                Regime::Buffered => {
                    if let Some(item) = self.get_buffer.pop_front() {
                        return Ok(item);
                    }
                }
                Regime::InMemory => {
                    if self.put_buffer.is_empty() {
                        return EmptySnafu.fail();
                    }
                    std::mem::swap(&mut self.get_buffer, &mut self.put_buffer);
                    debug!(
                        items = self.get_buffer.len(),
                        "Handed put buffer over to get buffer"
                    );
                }
                Regime::DiskPending => self.load_head_chunk()?,
            }
        }
    }

    /// Loads chunks from `head` until the get buffer has items or no chunk
    /// files remain. Used when reopening a queue directory.
    pub(crate) fn load_pending(&mut self) -> Result<()> {
        while self.regime() == Regime::DiskPending {
            self.load_head_chunk()?;
        }
        Ok(())
    }

    /// Writes the put buffer as chunk `tail` and advances `tail`.
    fn flush_put_buffer(&mut self) -> Result<()> {
        let next = Pointers::new(self.pointers.head, self.pointers.tail + 1);

        self.chunks.write_chunk(self.pointers.tail, &self.put_buffer)?;
        self.index.write(next)?;

        debug!(
            index = self.pointers.tail,
            items = self.put_buffer.len(),
            tail = next.tail,
            "Flushed put buffer"
        );
        self.put_buffer.clear();
        self.pointers = next;
        Ok(())
    }

    /// Moves chunk `head` into the get buffer and advances `head`.
    ///
    /// The chunk is read without deleting it, `head + 1` is persisted, and
    /// only then is the file removed. A missing chunk is skipped.
    fn load_head_chunk(&mut self) -> Result<()> {
        debug_assert!(self.get_buffer.is_empty());
        let index = self.pointers.head;
        let next = Pointers::new(index + 1, self.pointers.tail);

        let loaded = self.chunks.read_chunk::<T>(index, false)?;
        self.index.write(next)?;
        self.pointers = next;

        match loaded {
            Some(items) => {
                debug!(index, items = items.len(), head = next.head, "Loaded chunk");
                self.get_buffer = items;
                self.chunks.remove_chunk(index);
            }
            None => warn!(index, head = next.head, "Pending chunk file missing, skipped"),
        }
        Ok(())
    }

    /// Flushes both buffers to chunk files without losing or reordering
    /// anything.
    ///
    /// The put buffer becomes chunk `tail` (and `tail` advances). Unconsumed
    /// get-buffer items are given back as chunk `head - 1` (and `head`
    /// steps back), or merged into the front of chunk 0 when there is no slot
    /// before it. Empty buffers write nothing.
    pub(crate) fn sync(&mut self) -> Result<()> {
        if self.pointers.head == 0 && self.pointers.is_drained() && !self.get_buffer.is_empty() {
            // Nothing precedes chunk 0, so the get items lead the put chunk.
            let mut merged = std::mem::take(&mut self.get_buffer);
            merged.append(&mut self.put_buffer);
            self.put_buffer = merged;
        }

        if !self.put_buffer.is_empty() {
            self.flush_put_buffer()?;
        }

        if self.get_buffer.is_empty() {
            return Ok(());
        }

        if self.pointers.head > 0 {
            let index = self.pointers.head - 1;
            let next = Pointers::new(index, self.pointers.tail);

            self.chunks.write_chunk(index, &self.get_buffer)?;
            self.index.write(next)?;

            debug!(
                index,
                items = self.get_buffer.len(),
                head = next.head,
                "Gave get buffer back to disk"
            );
            self.get_buffer.clear();
            self.pointers = next;
        } else {
            let mut merged = self.get_buffer.clone();
            if let Some(mut front) = self.chunks.read_chunk::<T>(0, false)? {
                merged.append(&mut front);
            }
            self.chunks.write_chunk(0, &merged)?;

            debug!(
                items = self.get_buffer.len(),
                "Merged get buffer into the front of chunk 0"
            );
            self.get_buffer.clear();
        }
        Ok(())
    }

    /// Returns clones of the next `count` items without moving anything.
    ///
    /// Walks the get buffer, then chunk files `head..tail` read in place,
    /// then the put buffer.
    pub(crate) fn peek(&self, count: usize) -> Result<Vec<T>> {
        ensure!(
            count > 0,
            InvalidArgumentSnafu {
                reason: "peek count must be greater than zero",
            }
        );

        let mut items: Vec<T> = self.get_buffer.iter().take(count).cloned().collect();

        let mut index = self.pointers.head;
        while items.len() < count && index < self.pointers.tail {
            if let Some(chunk) = self.chunks.read_chunk::<T>(index, false)? {
                let wanted = count - items.len();
                items.extend(chunk.into_iter().take(wanted));
            }
            index += 1;
        }

        let wanted = count - items.len();
        items.extend(self.put_buffer.iter().take(wanted).cloned());

        ensure!(
            items.len() == count,
            OutOfRangeSnafu {
                requested: count,
                available: items.len(),
            }
        );
        Ok(items)
    }
}
