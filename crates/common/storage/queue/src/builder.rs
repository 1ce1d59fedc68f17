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

use std::path::PathBuf;

use crate::{Item, Queue, QueueConfig, Result};

pub struct QueueBuilder {
    config: QueueConfig,
}

impl QueueBuilder {
    pub fn new<P: Into<PathBuf>, S: Into<String>>(base_path: P, name: S) -> Self {
        Self {
            config: QueueConfig {
                base_path: base_path.into(),
                name: name.into(),
                ..Default::default()
            },
        }
    }

    #[must_use]
    pub const fn cache_size(mut self, cache_size: usize) -> Self {
        self.config.cache_size = cache_size;
        self
    }

    #[must_use]
    pub const fn max_size(mut self, max_size: usize) -> Self {
        self.config.max_size = Some(max_size);
        self
    }

    #[must_use]
    pub const fn unbounded(mut self) -> Self {
        self.config.max_size = None;
        self
    }

    #[must_use]
    pub const fn sync_on_close(mut self, sync_on_close: bool) -> Self {
        self.config.sync_on_close = sync_on_close;
        self
    }

    pub const fn config(&self) -> &QueueConfig { &self.config }

    pub fn build<T: Item>(self) -> Result<Queue<T>> { Queue::open(self.config) }
}

impl From<QueueConfig> for QueueBuilder {
    fn from(config: QueueConfig) -> Self { Self { config } }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::QueueError;

    #[test]
    fn test_builder_default_config() {
        let builder = QueueBuilder::new("/tmp/test_queue", "jobs");
        assert_eq!(builder.config.base_path, PathBuf::from("/tmp/test_queue"));
        assert_eq!(builder.config.name, "jobs");
        assert_eq!(builder.config.cache_size, 1024);
        assert_eq!(builder.config.max_size, None);
        assert!(!builder.config.sync_on_close);
        assert_eq!(
            builder.config().queue_dir(),
            PathBuf::from("/tmp/test_queue/jobs")
        );
    }

    #[test]
    fn test_builder_custom_config() {
        let builder = QueueBuilder::new("/tmp/test_queue", "jobs")
            .cache_size(16)
            .max_size(1000)
            .sync_on_close(true);

        assert_eq!(builder.config.cache_size, 16);
        assert_eq!(builder.config.max_size, Some(1000));
        assert!(builder.config.sync_on_close);
        assert_eq!(builder.unbounded().config.max_size, None);
    }

    #[test]
    fn test_build_opens_queue_directory() {
        let temp_dir = TempDir::new().unwrap();
        let queue: Queue<String> = QueueBuilder::new(temp_dir.path(), "jobs")
            .cache_size(4)
            .build()
            .unwrap();

        assert!(queue.path().join("000").exists());
        assert_eq!(queue.config().cache_size, 4);
    }

    #[test]
    fn test_build_rejects_zero_cache_size() {
        let temp_dir = TempDir::new().unwrap();
        let result = QueueBuilder::new(temp_dir.path(), "jobs")
            .cache_size(0)
            .build::<u32>();

        assert!(matches!(result, Err(QueueError::InvalidArgument { .. })));
        assert!(!temp_dir.path().join("jobs").exists());
    }
}
