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

//! The head/tail index file.
//!
//! The index is the only crash-recoverable state of a queue. It holds two
//! integers as ASCII text:
//!
//! ```text
//! <head>,<tail>
//! ```
//!
//! - **head**: oldest chunk file not yet loaded into the get buffer
//! - **tail**: chunk file the next put-buffer flush will be written to
//!
//! Chunk files `head..tail` are the ones waiting on disk. Every pointer
//! change goes through [`IndexFile::write`] before it is applied in memory.

use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use snafu::{IntoError, ensure};
use tracing::debug;

use crate::{
    Result,
    error::{CorruptIndexSnafu, IoSnafu},
    path::{index_file_path, write_durable},
};

/// The head/tail chunk pointers of a queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pointers {
    /// Sequence number of the oldest chunk not yet loaded.
    pub head: u64,
    /// Sequence number the next full put buffer is written to.
    pub tail: u64,
}

impl Pointers {
    #[must_use]
    pub const fn new(head: u64, tail: u64) -> Self { Self { head, tail } }

    /// Number of chunk files between head and tail.
    #[must_use]
    pub const fn pending_chunks(&self) -> u64 { self.tail.saturating_sub(self.head) }

    /// `true` when no chunk files are pending and items can move between the
    /// buffers without touching disk.
    #[must_use]
    pub const fn is_drained(&self) -> bool { self.head == self.tail }
}

impl fmt::Display for Pointers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.head, self.tail)
    }
}

/// Parse failure of the index text; turned into `CorruptIndex` by the caller
/// that knows the path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsePointersError(String);

impl fmt::Display for ParsePointersError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl FromStr for Pointers {
    type Err = ParsePointersError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut fields = s.trim().split(',');
        let (Some(head), Some(tail), None) = (fields.next(), fields.next(), fields.next()) else {
            return Err(ParsePointersError(format!(
                "expected \"<head>,<tail>\", found {s:?}"
            )));
        };

        let parse = |field: &str, what: &str| {
            field
                .trim()
                .parse::<u64>()
                .map_err(|e| ParsePointersError(format!("invalid {what} {field:?}: {e}")))
        };
        let pointers = Self::new(parse(head, "head")?, parse(tail, "tail")?);

        if pointers.tail < pointers.head {
            return Err(ParsePointersError(format!(
                "tail {} is behind head {}",
                pointers.tail, pointers.head
            )));
        }
        Ok(pointers)
    }
}

/// Reads and durably rewrites the index file of one queue directory.
#[derive(Debug)]
pub struct IndexFile {
    path: PathBuf,
}

impl IndexFile {
    pub fn new<P: AsRef<Path>>(queue_dir: P) -> Self {
        Self {
            path: index_file_path(queue_dir),
        }
    }

    pub fn path(&self) -> &Path { &self.path }

    /// Reads the pointers. A missing or malformed file is `CorruptIndex`.
    pub fn read(&self) -> Result<Pointers> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return CorruptIndexSnafu {
                    path:   &self.path,
                    reason: "index file is missing",
                }
                .fail();
            }
            Err(e) => return Err(IoSnafu { path: &self.path }.into_error(e)),
        };

        ensure!(
            !text.trim().is_empty(),
            CorruptIndexSnafu {
                path:   &self.path,
                reason: "index file is empty",
            }
        );

        text.parse::<Pointers>().map_err(|e| {
            CorruptIndexSnafu {
                path:   &self.path,
                reason: e.to_string(),
            }
            .build()
        })
    }

    /// Replaces the file contents with `pointers`; returns once the new
    /// contents are on stable storage.
    pub fn write(&self, pointers: Pointers) -> Result<()> {
        write_durable(&self.path, pointers.to_string().as_bytes())?;
        debug!(head = pointers.head, tail = pointers.tail, "Index written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use test_case::test_case;

    use super::*;
    use crate::QueueError;

    #[test]
    fn test_pointers_display_and_parse() {
        let pointers = Pointers::new(3, 7);
        assert_eq!(pointers.to_string(), "3,7");
        assert_eq!("3,7".parse::<Pointers>().unwrap(), pointers);
        assert_eq!(" 3 , 7\n".parse::<Pointers>().unwrap(), pointers);
        assert_eq!(pointers.pending_chunks(), 4);
        assert!(!pointers.is_drained());
        assert!(Pointers::new(2, 2).is_drained());
    }

    #[test_case("" ; "empty")]
    #[test_case("5" ; "one field")]
    #[test_case("1,2,3" ; "three fields")]
    #[test_case("a,2" ; "non numeric head")]
    #[test_case("1,-2" ; "negative tail")]
    #[test_case("4,3" ; "tail behind head")]
    fn test_parse_rejects(text: &str) { assert!(text.parse::<Pointers>().is_err()); }

    #[test]
    fn test_write_then_read() {
        let temp_dir = TempDir::new().unwrap();
        let index = IndexFile::new(temp_dir.path());

        index.write(Pointers::new(0, 0)).unwrap();
        assert_eq!(std::fs::read_to_string(index.path()).unwrap(), "0,0");

        index.write(Pointers::new(12, 40)).unwrap();
        assert_eq!(index.read().unwrap(), Pointers::new(12, 40));
        assert_eq!(std::fs::read_to_string(index.path()).unwrap(), "12,40");
    }

    #[test]
    fn test_read_missing_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let index = IndexFile::new(temp_dir.path());
        assert!(matches!(
            index.read(),
            Err(QueueError::CorruptIndex { .. })
        ));
    }

    #[test]
    fn test_read_garbage_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let index = IndexFile::new(temp_dir.path());
        std::fs::write(index.path(), "not an index").unwrap();
        assert!(matches!(
            index.read(),
            Err(QueueError::CorruptIndex { .. })
        ));
    }
}
