//! Resumable upload protocol on top of the chunk store and admission queues.
//!
//! The manager knows nothing about owners or domain entities. It enforces the
//! offset-exact-match rule, serializes work per session, tracks the phase of
//! sessions it is working on, and exposes the per-scope queues and file layouts.
//!
//! Phase and lock entries exist only while a session is in flight. Terminal
//! state lives in the durable record; callers [`UploadManager::forget`] a
//! session once that record reflects the outcome.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{ManagerError, ManagerResult, StoreError};
use crate::upload::layout::{AllocatedDir, FileLayout};
use crate::upload::queue::{AdmissionPolicy, AdmissionQueue, SlotStatus};
use crate::upload::store::{ChunkReader, ChunkStat, ChunkStore};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Open,
    /// Bytes moved to their permanent path, waiting for the caller to confirm.
    Finalized { path: PathBuf, size: u64 },
    Cancelled,
}

struct Scope {
    queue: AdmissionQueue,
    layout: FileLayout,
}

/// Exclusive access to one session. Chunk writes and finalize require it.
pub struct SessionGuard {
    id: String,
    _lock: OwnedMutexGuard<()>,
}

impl SessionGuard {
    pub fn id(&self) -> &str {
        &self.id
    }
}

pub struct UploadManager {
    store: Arc<dyn ChunkStore>,
    scopes: HashMap<&'static str, Scope>,
    max_upload_size: u64,
    locks: DashMap<String, Arc<Mutex<()>>>,
    phases: DashMap<String, Phase>,
}

impl UploadManager {
    pub fn new(store: Arc<dyn ChunkStore>, max_upload_size: u64) -> Self {
        Self {
            store,
            scopes: HashMap::new(),
            max_upload_size,
            locks: DashMap::new(),
            phases: DashMap::new(),
        }
    }

    /// Register an upload scope (one per entity kind).
    pub fn with_scope(mut self, queue: AdmissionQueue, layout: FileLayout) -> Self {
        self.scopes.insert(queue.scope(), Scope { queue, layout });
        self
    }

    fn scope(&self, name: &str) -> ManagerResult<&Scope> {
        self.scopes
            .get(name)
            .ok_or_else(|| ManagerError::UnknownScope(name.to_string()))
    }

    pub fn validate_size(&self, declared_size: u64) -> ManagerResult<()> {
        if declared_size == 0 {
            return Err(ManagerError::InvalidSize);
        }
        if declared_size > self.max_upload_size {
            return Err(ManagerError::PayloadTooLarge {
                size: declared_size,
                max: self.max_upload_size,
            });
        }
        Ok(())
    }

    /// Open temporary storage for a new session. Does not take a slot.
    pub async fn initiate(
        &self,
        id: &str,
        declared_size: u64,
        metadata: &HashMap<String, String>,
    ) -> ManagerResult<()> {
        self.validate_size(declared_size)?;
        self.store.open(id, declared_size, metadata).await?;
        self.phases.insert(id.to_string(), Phase::Open);
        tracing::info!("Upload {id} initiated ({declared_size} bytes)");
        Ok(())
    }

    pub async fn lock(&self, id: &str) -> SessionGuard {
        let lock = self
            .locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        SessionGuard {
            id: id.to_string(),
            _lock: lock.lock_owned().await,
        }
    }

    fn phase(&self, id: &str) -> Phase {
        self.phases
            .get(id)
            .map(|p| p.value().clone())
            .unwrap_or(Phase::Open)
    }

    fn ensure_open(&self, id: &str) -> ManagerResult<()> {
        match self.phase(id) {
            Phase::Open => Ok(()),
            Phase::Finalized { size, .. } => Err(ManagerError::Completed { size }),
            Phase::Cancelled => Err(ManagerError::Inactive),
        }
    }

    /// A missing container means the session was cancelled underneath us,
    /// or it never existed.
    fn missing(&self, id: &str) -> ManagerError {
        match self.phase(id) {
            Phase::Cancelled => ManagerError::Inactive,
            _ => ManagerError::NotFound(id.to_string()),
        }
    }

    async fn stat_existing(&self, id: &str) -> ManagerResult<ChunkStat> {
        self.store.stat(id).await.map_err(|e| match e {
            StoreError::NotFound(_) => self.missing(id),
            other => other.into(),
        })
    }

    /// Append one chunk. `offset` must equal the stored length exactly.
    pub async fn handle_chunk(
        &self,
        guard: &SessionGuard,
        offset: u64,
        reader: ChunkReader<'_>,
    ) -> ManagerResult<u64> {
        let id = guard.id();
        self.ensure_open(id)?;

        let stat = self.stat_existing(id).await?;
        if offset != stat.offset {
            return Err(ManagerError::OffsetMismatch {
                expected: stat.offset,
            });
        }

        let new_offset = match self.store.write_at(id, offset, reader).await {
            Ok(new_offset) => new_offset,
            Err(StoreError::NotFound(_)) => return Err(self.missing(id)),
            Err(e) => return Err(e.into()),
        };

        // A cancel may have landed while the bytes were in flight.
        if self.phase(id) == Phase::Cancelled {
            return Err(ManagerError::Inactive);
        }
        tracing::debug!("Upload {id}: {offset} -> {new_offset} of {}", stat.declared_size);
        Ok(new_offset)
    }

    /// Move the completed bytes to `permanent_path`. On failure nothing
    /// changes and the call may be retried.
    pub async fn finalize(&self, guard: &SessionGuard, permanent_path: &Path) -> ManagerResult<()> {
        let id = guard.id();
        self.ensure_open(id)?;

        let stat = self.stat_existing(id).await?;
        if stat.offset != stat.declared_size {
            return Err(ManagerError::Incomplete {
                offset: stat.offset,
                declared: stat.declared_size,
            });
        }

        self.store.finalize(id, permanent_path).await?;
        self.phases.insert(
            id.to_string(),
            Phase::Finalized {
                path: permanent_path.to_path_buf(),
                size: stat.declared_size,
            },
        );
        tracing::info!("Upload {id} finalized to {}", permanent_path.display());
        Ok(())
    }

    /// Undo [`UploadManager::finalize`] after a failed completion so the
    /// session can be completed again without re-uploading.
    pub async fn restore(&self, guard: &SessionGuard) -> ManagerResult<()> {
        let id = guard.id();
        let Phase::Finalized { path, .. } = self.phase(id) else {
            return Ok(());
        };
        self.store.restore(id, &path).await?;
        self.phases.insert(id.to_string(), Phase::Open);
        tracing::warn!("Upload {id} restored to temporary storage after failed completion");
        Ok(())
    }

    /// Confirm a finalized session. Temporary data and in-memory state are
    /// dropped; the durable record must already say completed.
    pub async fn complete(&self, guard: SessionGuard) -> ManagerResult<()> {
        let id = guard.id().to_string();
        match self.phase(&id) {
            Phase::Finalized { .. } => {}
            Phase::Open => {
                let stat = self.stat_existing(&id).await?;
                return Err(ManagerError::Incomplete {
                    offset: stat.offset,
                    declared: stat.declared_size,
                });
            }
            Phase::Cancelled => return Err(ManagerError::Inactive),
        }
        if let Err(e) = self.store.discard(&id).await {
            tracing::warn!("Failed to drop temporary data for upload {id}: {e}");
        }
        drop(guard);
        self.phases.remove(&id);
        self.locks.remove(&id);
        Ok(())
    }

    /// Cancel a session that has not completed. Safe to call repeatedly.
    /// Does not take the session lock, so a writer in flight sees the
    /// cancellation as soon as it checks. Call [`UploadManager::forget`]
    /// once the durable record is updated.
    pub async fn cancel(&self, id: &str) -> ManagerResult<()> {
        if let Phase::Finalized { size, .. } = self.phase(id) {
            return Err(ManagerError::Completed { size });
        }
        self.phases.insert(id.to_string(), Phase::Cancelled);
        self.store.discard(id).await?;
        tracing::info!("Upload {id} cancelled");
        Ok(())
    }

    /// Drop the in-memory phase and lock of a session that reached a
    /// terminal state. Writers still holding the old lock finish against
    /// the durable record, which no longer accepts their offsets. A
    /// finalized session is left to its completion, which owns the cleanup.
    pub fn forget(&self, id: &str) {
        if matches!(self.phase(id), Phase::Finalized { .. }) {
            return;
        }
        self.phases.remove(id);
        self.locks.remove(id);
    }

    pub async fn status(&self, id: &str) -> ManagerResult<ChunkStat> {
        match self.phase(id) {
            Phase::Finalized { size, .. } => Ok(ChunkStat {
                offset: size,
                declared_size: size,
            }),
            Phase::Cancelled => Err(ManagerError::Inactive),
            Phase::Open => self.stat_existing(id).await,
        }
    }

    // ─── Admission ───

    pub fn policy(&self, scope: &str) -> ManagerResult<AdmissionPolicy> {
        Ok(self.scope(scope)?.queue.policy())
    }

    pub async fn check_slot(&self, scope: &str) -> ManagerResult<SlotStatus> {
        Ok(self.scope(scope)?.queue.snapshot().await)
    }

    pub async fn acquire_slot(&self, scope: &str, id: &str) -> ManagerResult<bool> {
        Ok(self.scope(scope)?.queue.try_acquire(id).await)
    }

    /// Free the session's slot; returns the session promoted into it, if any.
    pub async fn release_slot(&self, scope: &str, id: &str) -> ManagerResult<Option<String>> {
        let promoted = self.scope(scope)?.queue.release(id).await;
        if let Some(next) = &promoted {
            tracing::info!("Upload {next} may start ({scope} slot freed by {id})");
        }
        Ok(promoted)
    }

    pub async fn queue_position(&self, scope: &str, id: &str) -> ManagerResult<Option<usize>> {
        Ok(self.scope(scope)?.queue.queue_position(id).await)
    }

    /// Operator override: force-cancel the given sessions and free their
    /// slots. Completed sessions are skipped. Returns promoted session ids.
    pub async fn reset_sessions(&self, scope: &str, ids: &[String]) -> ManagerResult<Vec<String>> {
        let queue = &self.scope(scope)?.queue;
        let mut promoted = Vec::new();
        for id in ids {
            match self.cancel(id).await {
                Ok(()) => {}
                Err(ManagerError::Completed { .. }) => continue,
                Err(e) => tracing::warn!("Reset of upload {id} could not discard storage: {e}"),
            }
            if let Some(next) = queue.release(id).await {
                promoted.push(next);
            }
        }
        Ok(promoted)
    }

    // ─── Layout ───

    pub async fn allocate_dir(&self, scope: &str) -> ManagerResult<AllocatedDir> {
        let layout = &self.scope(scope)?.layout;
        Ok(layout
            .allocate_dir()
            .await
            .map_err(StoreError::from)?)
    }

    pub async fn delete_file(&self, scope: &str, path: &Path) -> ManagerResult<()> {
        let layout = &self.scope(scope)?.layout;
        Ok(layout.delete_file(path).await.map_err(StoreError::from)?)
    }
}
