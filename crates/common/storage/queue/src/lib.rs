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

//! A disk-backed FIFO queue.
//!
//! Producers append to an in-memory put buffer; once it holds `cache_size`
//! items it is written out as a numbered chunk file. Consumers drain an
//! in-memory get buffer that is refilled from the oldest chunk file, or
//! directly from the put buffer when nothing is waiting on disk. A small
//! index file named `000` records which chunk files are pending, and is
//! all that is needed to pick up where a previous process left off.
//!
//! ```text
//!  put ──▶ put_buffer ──flush──▶ chunk[tail]  ...  chunk[head] ──load──▶ get_buffer ──▶ get
//!              │                                                            ▲
//!              └──────────────── handover when head == tail ────────────────┘
//! ```

pub mod builder;
pub mod chunk;
pub mod config;
pub(crate) mod crc;
pub mod error;
pub mod index;
pub mod path;
pub mod queue;
pub mod recovery;
pub(crate) mod state;

pub use builder::QueueBuilder;
pub use chunk::ChunkStore;
pub use config::{Blocking, QueueConfig};
pub use error::{QueueError, Result};
pub use index::{IndexFile, Pointers};
pub use queue::{Queue, QueueStats};
pub use recovery::RecoveryInfo;
use serde::{Serialize, de::DeserializeOwned};

/// Anything that can be stored in a [`Queue`].
///
/// Items are serialized as MessagePack when a buffer is written to a chunk
/// file, and cloned when peeked.
pub trait Item: Serialize + DeserializeOwned + Clone {}

impl<T: Serialize + DeserializeOwned + Clone> Item for T {}
