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

//! Opening a queue directory.
//!
//! - **Fresh directory**: create it and durably write `0,0` before any chunk
//!   file can exist.
//! - **Existing directory**: read the index, then perform exactly one
//!   get-style load: chunk `head` becomes the get buffer, `head + 1` is
//!   persisted and the chunk file is deleted. `head` is never advanced past
//!   a chunk that was not consumed, so an empty queue reopens as `0,0`.

use snafu::ResultExt;
use tracing::info;

use crate::{
    Item, QueueConfig, Result,
    chunk::ChunkStore,
    error::IoSnafu,
    index::{IndexFile, Pointers},
    path::{scan_chunk_files, sync_dir},
    state::QueueState,
};

/// What [`open_state`] found on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryInfo {
    /// `false` when the directory was created by this open.
    pub recovered: bool,
    /// Pointers as read from the index, before the recovery load.
    pub stored:    Pointers,
    /// Pointers after the recovery load.
    pub current:   Pointers,
    /// Items moved into the get buffer by the recovery load.
    pub loaded:    usize,
}

pub(crate) fn open_state<T: Item>(config: &QueueConfig) -> Result<(QueueState<T>, RecoveryInfo)> {
    let dir = config.queue_dir();
    let index = IndexFile::new(&dir);
    let chunks = ChunkStore::new(&dir);

    if !dir.exists() {
        std::fs::create_dir_all(&dir).context(IoSnafu { path: &dir })?;
        if let Some(parent) = dir.parent() {
            sync_dir(parent)?;
        }
        index.write(Pointers::default())?;

        info!(path = ?dir, "Created queue directory");
        let state = QueueState::new(config.cache_size, Pointers::default(), index, chunks);
        return Ok((
            state,
            RecoveryInfo {
                recovered: false,
                stored:    Pointers::default(),
                current:   Pointers::default(),
                loaded:    0,
            },
        ));
    }

    let stored = index.read()?;
    info!(
        path = ?dir,
        head = stored.head,
        tail = stored.tail,
        chunk_files = scan_chunk_files(&dir)?.len(),
        "Starting queue recovery"
    );

    let mut state = QueueState::new(config.cache_size, stored, index, chunks);
    state.load_pending()?;

    let info = RecoveryInfo {
        recovered: true,
        stored,
        current: state.pointers(),
        loaded: state.get_buffered(),
    };
    info!(
        head = info.current.head,
        tail = info.current.tail,
        loaded = info.loaded,
        "Queue recovery complete"
    );
    Ok((state, info))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::QueueError;

    fn config(dir: &TempDir, cache_size: usize) -> QueueConfig {
        QueueConfig {
            base_path: dir.path().to_path_buf(),
            name: "testq".to_string(),
            cache_size,
            ..Default::default()
        }
    }

    #[test]
    fn test_fresh_directory_writes_zero_index() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(&temp_dir, 10);

        let (state, info) = open_state::<u32>(&config).unwrap();

        assert!(!info.recovered);
        assert_eq!(state.pointers(), Pointers::new(0, 0));
        assert_eq!(
            std::fs::read_to_string(config.queue_dir().join("000")).unwrap(),
            "0,0"
        );
    }

    #[test]
    fn test_reopen_empty_queue_keeps_pointers() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(&temp_dir, 10);

        drop(open_state::<u32>(&config).unwrap());
        let (state, info) = open_state::<u32>(&config).unwrap();

        assert!(info.recovered);
        assert_eq!(info.loaded, 0);
        assert_eq!(state.pointers(), Pointers::new(0, 0));
    }

    #[test]
    fn test_reopen_loads_exactly_one_chunk() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(&temp_dir, 5);

        {
            let (mut state, _) = open_state::<u32>(&config).unwrap();
            for i in 0..17 {
                state.enqueue(i).unwrap();
            }
            assert_eq!(state.pointers(), Pointers::new(0, 3));
        }

        let (mut state, info) = open_state::<u32>(&config).unwrap();
        assert_eq!(info.stored, Pointers::new(0, 3));
        assert_eq!(info.current, Pointers::new(1, 3));
        assert_eq!(info.loaded, 5);
        assert!(!config.queue_dir().join("0").exists());

        // Unsynced put-buffer items (15, 16) are lost; flushed chunks are not.
        let mut drained = Vec::new();
        while let Ok(item) = state.dequeue() {
            drained.push(item);
        }
        assert_eq!(drained, (0..15).collect::<Vec<_>>());
    }

    #[test]
    fn test_missing_index_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(&temp_dir, 5);
        std::fs::create_dir_all(config.queue_dir()).unwrap();

        assert!(matches!(
            open_state::<u32>(&config),
            Err(QueueError::CorruptIndex { .. })
        ));
    }
}
