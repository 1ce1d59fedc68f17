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

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use snafu::ensure;

use crate::{Result, error::InvalidArgumentSnafu};

/// Per-instance queue settings. Nothing here is persisted.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Parent directory holding one sub-directory per queue.
    pub base_path:     PathBuf,
    /// Queue name, used as the sub-directory name.
    pub name:          String,
    /// Buffer capacity in items; a full put buffer spills to a chunk file.
    pub cache_size:    usize,
    /// Upper bound on the (approximate) queue length. `None` is unbounded.
    pub max_size:      Option<usize>,
    /// Run `sync()` when the queue is closed.
    pub sync_on_close: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            base_path:     PathBuf::from("./queue_data"),
            name:          "default".to_string(),
            cache_size:    1024,
            max_size:      None,
            sync_on_close: false,
        }
    }
}

impl QueueConfig {
    /// Directory that holds the index file and the chunk files.
    #[must_use]
    pub fn queue_dir(&self) -> PathBuf { self.base_path.join(&self.name) }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.cache_size > 0,
            InvalidArgumentSnafu {
                reason: "cache_size must be greater than zero",
            }
        );
        ensure!(
            self.max_size != Some(0),
            InvalidArgumentSnafu {
                reason: "max_size must be greater than zero when set",
            }
        );
        ensure!(
            is_plain_name(&self.name),
            InvalidArgumentSnafu {
                reason: format!("queue name {:?} must be a single path component", self.name),
            }
        );
        Ok(())
    }
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && Path::new(name).components().count() == 1
        && !name.contains(['/', '\\'])
}

/// How long a `put` or `get` may wait for room or for an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Blocking {
    /// Fail immediately with `Empty` / `Full`.
    NoWait,
    /// Wait until the operation can proceed or the queue is closed.
    #[default]
    Forever,
    /// Wait up to the given duration, then fail with `Empty` / `Full`.
    Timeout(Duration),
}

impl Blocking {
    /// Builds a mode from the `block` / `timeout` pair used by work-queue
    /// style APIs: `block = false` ignores the timeout.
    #[must_use]
    pub const fn from_parts(block: bool, timeout: Option<Duration>) -> Self {
        match (block, timeout) {
            (false, _) => Self::NoWait,
            (true, None) => Self::Forever,
            (true, Some(timeout)) => Self::Timeout(timeout),
        }
    }
}
