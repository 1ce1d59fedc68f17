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

//! File naming and durable whole-file writes for a queue directory.
//!
//! ```text
//! <base>/<name>/000   index file, ASCII "<head>,<tail>"
//! <base>/<name>/<N>   chunk file N
//! ```

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use snafu::ResultExt;

use crate::{Result, error::IoSnafu};

/// Fixed name of the index file inside a queue directory.
pub const INDEX_FILE_NAME: &str = "000";

const TMP_SUFFIX: &str = "tmp";

/// Returns the index file path: `dir/000`.
pub fn index_file_path<P: AsRef<Path>>(dir: P) -> PathBuf { dir.as_ref().join(INDEX_FILE_NAME) }

/// Returns a chunk file path: `dir/<index>` in plain decimal.
pub fn chunk_file_path<P: AsRef<Path>>(dir: P, index: u64) -> PathBuf {
    dir.as_ref().join(index.to_string())
}

/// Lists the chunk indices present in `dir`, sorted ascending.
///
/// Only plain decimal names count; the index file and temporary files are
/// ignored.
pub fn scan_chunk_files<P: AsRef<Path>>(dir: P) -> Result<Vec<u64>> {
    let dir = dir.as_ref();
    let mut indices = Vec::new();

    for entry in std::fs::read_dir(dir).context(IoSnafu { path: dir })? {
        let entry = entry.context(IoSnafu { path: dir })?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name == INDEX_FILE_NAME || !name.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        if let Ok(index) = name.parse::<u64>() {
            indices.push(index);
        }
    }

    indices.sort_unstable();
    Ok(indices)
}

/// Replaces `path` with `data` so that readers see either the old or the new
/// contents, and the new contents are on stable storage when this returns.
///
/// Writes a sibling temp file, syncs it, renames it over `path`, then syncs
/// the parent directory so the rename itself survives a crash.
pub fn write_durable(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension(TMP_SUFFIX);

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)
        .context(IoSnafu { path: &tmp_path })?;
    file.write_all(data).context(IoSnafu { path: &tmp_path })?;
    file.sync_all().context(IoSnafu { path: &tmp_path })?;
    drop(file);

    std::fs::rename(&tmp_path, path).context(IoSnafu { path })?;

    if let Some(parent) = path.parent() {
        sync_dir(parent)?;
    }
    Ok(())
}

/// Flushes directory metadata (new names, renames, removals).
#[cfg(unix)]
pub fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .context(IoSnafu { path: dir })
}

/// Directory handles cannot be synced here; the rename is as durable as the
/// platform makes it.
#[cfg(not(unix))]
pub fn sync_dir(_dir: &Path) -> Result<()> { Ok(()) }
