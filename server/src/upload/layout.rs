//! Permanent file layout: one random subdirectory per completed upload.

use std::path::{Path, PathBuf};

use rand::Rng;
use tokio::fs;

const DIR_NAME_LEN: usize = 16;
const MAX_FILE_STEM_LEN: usize = 100;

/// Allocates directories under a per-kind base directory.
#[derive(Debug, Clone)]
pub struct FileLayout {
    base: PathBuf,
}

impl FileLayout {
    pub fn new(base: impl AsRef<Path>) -> Self {
        Self {
            base: base.as_ref().to_path_buf(),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Create a fresh, empty, randomly named subdirectory. The returned guard
    /// removes it again unless [`AllocatedDir::commit`] is called.
    pub async fn allocate_dir(&self) -> std::io::Result<AllocatedDir> {
        fs::create_dir_all(&self.base).await?;
        loop {
            let path = self.base.join(random_dir_name());
            match fs::create_dir(&path).await {
                Ok(()) => return Ok(AllocatedDir { path, armed: true }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Delete a previously stored file and its directory when left empty.
    /// Paths outside the base directory are ignored.
    pub async fn delete_file(&self, path: &Path) -> std::io::Result<()> {
        if !path.starts_with(&self.base) {
            tracing::warn!("Refusing to delete file outside storage: {}", path.display());
            return Ok(());
        }
        match fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        if let Some(parent) = path.parent() {
            if parent != self.base {
                // Fails while other files remain, which is fine.
                let _ = fs::remove_dir(parent).await;
            }
        }
        Ok(())
    }
}

fn random_dir_name() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(DIR_NAME_LEN)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

/// Reduce a display name to a safe file name with the given extension.
pub fn file_name_for(display_name: &str, extension: &str) -> String {
    let stem: String = display_name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .take(MAX_FILE_STEM_LEN)
        .collect();
    let stem = stem.trim_matches('_');
    let stem = if stem.is_empty() { "upload" } else { stem };
    format!("{stem}.{extension}")
}

/// A directory created for one completion attempt.
#[derive(Debug)]
pub struct AllocatedDir {
    path: PathBuf,
    armed: bool,
}

impl AllocatedDir {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_path(&self, file_name: &str) -> PathBuf {
        self.path.join(file_name)
    }

    /// Keep the directory; the guard no longer cleans it up.
    pub fn commit(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for AllocatedDir {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => tracing::debug!("Cleaned up upload directory {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                "Failed to clean up upload directory {}: {e}",
                self.path.display()
            ),
        }
    }
}
