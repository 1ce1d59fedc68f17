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

//! Chunk files: one serialized batch of items per file.
//!
//! ## On-Disk Chunk Format
//!
//! ```text
//! ┌──────────────┬──────────────────┬──────────────────┬───────────────────┐
//! │ magic (4B)   │ count (4B)       │ CRC32 (4B)       │ body (variable)   │
//! │ "DQCK"       │ u32 little-endian│ u32 little-endian│ MessagePack array │
//! └──────────────┴──────────────────┴──────────────────┴───────────────────┘
//! ```
//!
//! The body is self-describing, so items whose `Deserialize` relies on
//! `deserialize_any` (untagged enums, flattened fields) read back intact.
//!
//! A chunk is always written as a whole (see
//! [`write_durable`](crate::path::write_durable)), never appended to.

use std::{
    collections::VecDeque,
    io,
    path::{Path, PathBuf},
};

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use snafu::{IntoError, ResultExt, ensure};
use tracing::{debug, warn};

use crate::{
    Result,
    crc::{calculate_chunk_crc, verify_chunk_crc},
    error::{CorruptChunkSnafu, DecodeSnafu, EncodeSnafu, IoSnafu},
    path::{chunk_file_path, write_durable},
};

/// Magic bytes identifying a chunk file: "DQCK"
pub const CHUNK_MAGIC: [u8; 4] = *b"DQCK";

/// Size of the chunk header in bytes.
pub const CHUNK_HEADER_SIZE: usize = 12;

/// Maps chunk sequence numbers to chunk files inside one queue directory.
#[derive(Debug)]
pub struct ChunkStore {
    dir: PathBuf,
    #[cfg(test)]
    pub(crate) fail_removals: bool,
}

impl ChunkStore {
    pub fn new<P: AsRef<Path>>(queue_dir: P) -> Self {
        Self {
            dir: queue_dir.as_ref().to_path_buf(),
            #[cfg(test)]
            fail_removals: false,
        }
    }

    pub fn chunk_path(&self, index: u64) -> PathBuf { chunk_file_path(&self.dir, index) }

    /// Writes `items` as chunk `index`, replacing whatever was there.
    pub fn write_chunk<T: Serialize>(&self, index: u64, items: &VecDeque<T>) -> Result<()> {
        let blob = encode_chunk(index, items)?;
        write_durable(&self.chunk_path(index), &blob)?;
        debug!(index, items = items.len(), bytes = blob.len(), "Chunk written");
        Ok(())
    }

    /// Reads chunk `index`.
    ///
    /// Returns `Ok(None)` when the file does not exist, which is the normal
    /// case when items moved between buffers without touching disk. With
    /// `delete_after`, the file is removed once it has been decoded; a failed
    /// removal is logged and otherwise ignored.
    pub fn read_chunk<T: DeserializeOwned>(
        &self,
        index: u64,
        delete_after: bool,
    ) -> Result<Option<VecDeque<T>>> {
        let path = self.chunk_path(index);
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(IoSnafu { path }.into_error(e)),
        };

        let items = decode_chunk(index, &data)?;
        debug!(index, items = items.len(), delete_after, "Chunk read");

        if delete_after {
            self.remove_chunk(index);
        }
        Ok(Some(items))
    }

    /// Removes chunk `index`. Returns `true` if a file was deleted.
    ///
    /// A leftover chunk is harmless (it is either below `head` and never read
    /// again, or overwritten by a later write), so failures are only logged.
    pub fn remove_chunk(&self, index: u64) -> bool {
        let path = self.chunk_path(index);
        match self.unlink(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!(index, path = ?path, error = %e, "Failed to remove chunk file");
                false
            }
        }
    }

    #[cfg_attr(not(test), allow(clippy::unused_self))]
    fn unlink(&self, path: &Path) -> io::Result<()> {
        #[cfg(test)]
        if self.fail_removals {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied));
        }
        std::fs::remove_file(path)
    }
}

fn encode_chunk<T: Serialize>(index: u64, items: &VecDeque<T>) -> Result<Vec<u8>> {
    let count = u32::try_from(items.len()).map_err(|_| {
        CorruptChunkSnafu {
            index,
            reason: format!("{} items do not fit in one chunk", items.len()),
        }
        .build()
    })?;
    let body = rmp_serde::to_vec_named(items).context(EncodeSnafu { index })?;

    let mut blob = BytesMut::with_capacity(CHUNK_HEADER_SIZE + body.len());
    blob.put_slice(&CHUNK_MAGIC);
    blob.put_u32_le(count);
    blob.put_u32_le(calculate_chunk_crc(count, &body));
    blob.put_slice(&body);
    Ok(blob.to_vec())
}

fn decode_chunk<T: DeserializeOwned>(index: u64, data: &[u8]) -> Result<VecDeque<T>> {
    ensure!(
        data.len() >= CHUNK_HEADER_SIZE,
        CorruptChunkSnafu {
            index,
            reason: format!(
                "data too short: {} bytes, expected at least {CHUNK_HEADER_SIZE}",
                data.len()
            ),
        }
    );

    let (header, body) = data.split_at(CHUNK_HEADER_SIZE);
    ensure!(
        header[0..4] == CHUNK_MAGIC,
        CorruptChunkSnafu {
            index,
            reason: format!("invalid magic: {:?}", &header[0..4]),
        }
    );

    let count = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    let stored_crc = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
    ensure!(
        verify_chunk_crc(count, body, stored_crc),
        CorruptChunkSnafu {
            index,
            reason: format!(
                "checksum mismatch: stored={stored_crc:#x}, computed={:#x}",
                calculate_chunk_crc(count, body)
            ),
        }
    );

    let mut rest = body;
    let items = {
        let mut de = rmp_serde::Deserializer::new(&mut rest);
        VecDeque::<T>::deserialize(&mut de).context(DecodeSnafu { index })?
    };
    ensure!(
        rest.is_empty(),
        CorruptChunkSnafu {
            index,
            reason: format!("{} trailing bytes after items", rest.len()),
        }
    );
    ensure!(
        items.len() == count as usize,
        CorruptChunkSnafu {
            index,
            reason: format!("header says {count} items, body holds {}", items.len()),
        }
    );
    Ok(items)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use test_case::test_case;

    use super::*;
    use crate::QueueError;

    fn items(range: std::ops::Range<u32>) -> VecDeque<u32> { range.collect() }

    #[test]
    fn test_write_then_read_keeps_order() {
        let temp_dir = TempDir::new().unwrap();
        let store = ChunkStore::new(temp_dir.path());

        store.write_chunk(3, &items(0..10)).unwrap();
        let read: VecDeque<u32> = store.read_chunk(3, false).unwrap().unwrap();

        assert_eq!(read, items(0..10));
        assert!(store.chunk_path(3).exists());
    }

    #[test]
    fn test_read_with_delete_removes_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = ChunkStore::new(temp_dir.path());

        store.write_chunk(0, &items(0..4)).unwrap();
        let read: VecDeque<u32> = store.read_chunk(0, true).unwrap().unwrap();

        assert_eq!(read.len(), 4);
        assert!(!store.chunk_path(0).exists());
    }

    #[test]
    fn test_read_missing_chunk_is_none() {
        let temp_dir = TempDir::new().unwrap();
        let store = ChunkStore::new(temp_dir.path());
        assert!(store.read_chunk::<u32>(9, true).unwrap().is_none());
    }

    #[test]
    fn test_write_overwrites_previous_chunk() {
        let temp_dir = TempDir::new().unwrap();
        let store = ChunkStore::new(temp_dir.path());

        store.write_chunk(1, &items(0..10)).unwrap();
        store.write_chunk(1, &items(100..102)).unwrap();

        let read: VecDeque<u32> = store.read_chunk(1, false).unwrap().unwrap();
        assert_eq!(read, items(100..102));
    }

    #[test]
    fn test_structured_items() {
        #[derive(Debug, PartialEq, Serialize, serde::Deserialize)]
        struct Job {
            id:   u64,
            name: String,
        }

        let temp_dir = TempDir::new().unwrap();
        let store = ChunkStore::new(temp_dir.path());
        let jobs: VecDeque<Job> = (0..3)
            .map(|id| Job {
                id,
                name: format!("job-{id}"),
            })
            .collect();

        store.write_chunk(0, &jobs).unwrap();
        let read: VecDeque<Job> = store.read_chunk(0, false).unwrap().unwrap();
        assert_eq!(read, jobs);
    }

    #[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
    #[serde(untagged)]
    enum Field {
        Int(i64),
        Text(String),
        List(Vec<i64>),
        Pair { key: String, value: i64 },
    }

    #[derive(Debug, PartialEq, Serialize, serde::Deserialize)]
    struct Meta {
        source: String,
    }

    #[derive(Debug, PartialEq, Serialize, serde::Deserialize)]
    struct Tagged {
        id:   u64,
        #[serde(flatten)]
        meta: Meta,
    }

    #[test]
    fn test_untagged_items_read_back() {
        let temp_dir = TempDir::new().unwrap();
        let store = ChunkStore::new(temp_dir.path());
        let fields: VecDeque<Field> = VecDeque::from(vec![
            Field::Int(-7),
            Field::Text("seven".to_string()),
            Field::List(vec![1, 2, 3]),
            Field::Pair {
                key:   "k".to_string(),
                value: 7,
            },
        ]);

        store.write_chunk(0, &fields).unwrap();
        let read: VecDeque<Field> = store.read_chunk(0, true).unwrap().unwrap();
        assert_eq!(read, fields);
    }

    #[test]
    fn test_flattened_items_read_back() {
        let temp_dir = TempDir::new().unwrap();
        let store = ChunkStore::new(temp_dir.path());
        let tagged: VecDeque<Tagged> = (0..3)
            .map(|id| Tagged {
                id,
                meta: Meta {
                    source: format!("src-{id}"),
                },
            })
            .collect();

        store.write_chunk(2, &tagged).unwrap();
        let read: VecDeque<Tagged> = store.read_chunk(2, false).unwrap().unwrap();
        assert_eq!(read, tagged);
    }

    fn corrupt_magic(bytes: &mut Vec<u8>) { bytes[0] = 0xFF; }

    fn corrupt_count(bytes: &mut Vec<u8>) { bytes[4] ^= 0x01; }

    fn corrupt_body(bytes: &mut Vec<u8>) {
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
    }

    fn truncate_header(bytes: &mut Vec<u8>) { bytes.truncate(CHUNK_HEADER_SIZE - 1); }

    #[test_case(corrupt_magic ; "invalid magic")]
    #[test_case(corrupt_count ; "count mismatch")]
    #[test_case(corrupt_body ; "body checksum")]
    #[test_case(truncate_header ; "short file")]
    fn test_corrupted_chunk_is_rejected(corrupt_fn: fn(&mut Vec<u8>)) {
        let temp_dir = TempDir::new().unwrap();
        let store = ChunkStore::new(temp_dir.path());
        store.write_chunk(0, &items(0..5)).unwrap();

        let mut bytes = std::fs::read(store.chunk_path(0)).unwrap();
        corrupt_fn(&mut bytes);
        std::fs::write(store.chunk_path(0), bytes).unwrap();

        assert!(matches!(
            store.read_chunk::<u32>(0, true),
            Err(QueueError::CorruptChunk { index: 0, .. })
        ));
        // A chunk that failed to decode is never deleted.
        assert!(store.chunk_path(0).exists());
    }

    #[test]
    fn test_remove_missing_chunk_is_quiet() {
        let temp_dir = TempDir::new().unwrap();
        let store = ChunkStore::new(temp_dir.path());
        assert!(!store.remove_chunk(5));
    }

    #[test]
    fn test_failed_remove_is_swallowed() {
        let temp_dir = TempDir::new().unwrap();
        let store = ChunkStore::new(temp_dir.path());

        // A non-empty directory where the chunk should be makes unlink fail
        // with something other than NotFound.
        std::fs::create_dir(store.chunk_path(4)).unwrap();
        std::fs::write(store.chunk_path(4).join("keep"), b"x").unwrap();

        assert!(!store.remove_chunk(4));
        assert!(store.chunk_path(4).is_dir());
    }
}
