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

use std::{io, path::PathBuf};

use snafu::Snafu;

/// Queue operation errors.
///
/// `Empty` and `Full` are the ordinary outcomes of non-blocking or timed-out
/// calls. Everything else is a real failure of the operation in progress.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum QueueError {
    /// No item was available before the call gave up.
    #[snafu(display("Queue is empty"))]
    Empty,

    /// The queue stayed at `max_size` until the call gave up.
    #[snafu(display("Queue is full (max_size = {max_size})"))]
    Full { max_size: usize },

    /// The queue was closed while the call was pending, or before it started.
    #[snafu(display("Queue is closed"))]
    Closed,

    /// Index file missing or unparsable in an existing queue directory.
    #[snafu(display("Corrupt index file {}: {reason}", path.display()))]
    CorruptIndex { path: PathBuf, reason: String },

    /// Chunk file with a bad header, checksum or item count.
    #[snafu(display("Corrupt chunk {index}: {reason}"))]
    CorruptChunk { index: u64, reason: String },

    /// Peek asked for more items than the queue holds.
    #[snafu(display("Requested {requested} items but only {available} are queued"))]
    OutOfRange { requested: usize, available: usize },

    /// Completion signalled more often than items were enqueued.
    #[snafu(display("Invalid state: {reason}"))]
    InvalidState { reason: String },

    #[snafu(display("Invalid argument: {reason}"))]
    InvalidArgument { reason: String },

    /// Filesystem I/O failure on the given path.
    #[snafu(display("IO error on {}: {source}", path.display()))]
    Io { path: PathBuf, source: io::Error },

    #[snafu(display("Failed to encode chunk {index}: {source}"))]
    Encode {
        index:  u64,
        source: rmp_serde::encode::Error,
    },

    #[snafu(display("Failed to decode chunk {index}: {source}"))]
    Decode {
        index:  u64,
        source: rmp_serde::decode::Error,
    },
}

impl QueueError {
    /// `true` for the non-blocking / timed-out "nothing to get" outcome.
    #[must_use]
    pub const fn is_empty_queue(&self) -> bool { matches!(self, Self::Empty) }

    /// `true` for the non-blocking / timed-out "no room to put" outcome.
    #[must_use]
    pub const fn is_full_queue(&self) -> bool { matches!(self, Self::Full { .. }) }

    #[must_use]
    pub const fn is_closed(&self) -> bool { matches!(self, Self::Closed) }
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicates() {
        assert!(QueueError::Empty.is_empty_queue());
        assert!(!QueueError::Empty.is_full_queue());
        assert!(QueueError::Full { max_size: 3 }.is_full_queue());
        assert!(QueueError::Closed.is_closed());
        assert!(!QueueError::Closed.is_empty_queue());
    }

    #[test]
    fn test_display_carries_context() {
        let err = QueueError::CorruptIndex {
            path:   PathBuf::from("/q/jobs/000"),
            reason: "expected two fields".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Corrupt index file /q/jobs/000: expected two fields"
        );

        let err = QueueError::OutOfRange {
            requested: 5,
            available: 2,
        };
        assert_eq!(err.to_string(), "Requested 5 items but only 2 are queued");
    }
}
