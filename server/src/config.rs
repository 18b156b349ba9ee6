use std::path::{Path, PathBuf};

use chrono::Duration;

pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 500 * 1024 * 1024; // 500MB
pub const DEFAULT_MAX_CONCURRENT_PROJECTS: usize = 3;
pub const DEFAULT_MAX_CONCURRENT_MODULES: usize = 10;
pub const DEFAULT_MAX_MODULE_QUEUE_PER_OWNER: u64 = 5;
pub const DEFAULT_SESSION_IDLE_SECS: i64 = 24 * 60 * 60;

/// Upload engine settings, assembled from CLI/env arguments in `main`.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Root directory; temp containers and permanent files live below it.
    pub storage_root: PathBuf,
    pub max_upload_size: u64,
    /// Global concurrency for project uploads; extra sessions wait in FIFO order.
    pub max_concurrent_projects: usize,
    /// Global concurrency for module uploads; extra sessions are rejected.
    pub max_concurrent_modules: usize,
    /// Non-terminal module sessions one owner may hold at a time.
    pub max_module_queue_per_owner: u64,
    /// Idle deadline, pushed forward on every accepted chunk.
    pub session_idle_timeout: Duration,
    /// Base URL used when building resumable upload locations.
    pub public_base_path: String,
}

impl UploadConfig {
    pub fn new(storage_root: impl AsRef<Path>) -> Self {
        Self {
            storage_root: storage_root.as_ref().to_path_buf(),
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            max_concurrent_projects: DEFAULT_MAX_CONCURRENT_PROJECTS,
            max_concurrent_modules: DEFAULT_MAX_CONCURRENT_MODULES,
            max_module_queue_per_owner: DEFAULT_MAX_MODULE_QUEUE_PER_OWNER,
            session_idle_timeout: Duration::seconds(DEFAULT_SESSION_IDLE_SECS),
            public_base_path: "/api/uploads".to_string(),
        }
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.storage_root.join("tmp")
    }

    pub fn projects_dir(&self) -> PathBuf {
        self.storage_root.join("projects")
    }

    pub fn modules_dir(&self) -> PathBuf {
        self.storage_root.join("modules")
    }
}
