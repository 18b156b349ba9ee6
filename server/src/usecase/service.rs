//! Upload usecases shared by every target kind.
//!
//! The durable session row is authoritative: every decision (ownership,
//! status, expected offset) is made from it, and the manager's in-process
//! state is brought in line with it.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::{ManagerError, UploadError, UploadResult};
use crate::models::{
    format_timestamp, progress_percent, InitiatedUpload, SlotAvailability, UploadInfo,
    UploadProgress, UploadSession, UploadStatus, UploadType,
};
use crate::repos::UploadSessionRepo;
use crate::upload::layout::file_name_for;
use crate::upload::{AdmissionPolicy, ChunkReader, SessionGuard, UploadManager};
use crate::usecase::metadata::parse_upload_metadata;
use crate::usecase::target::{OwnerLimit, StoredFile, UploadTarget};

pub struct UploadService<T: UploadTarget> {
    target: T,
    sessions: Arc<dyn UploadSessionRepo>,
    manager: Arc<UploadManager>,
    idle_timeout: Duration,
    base_url: String,
    /// Serializes admission per owner so the per-owner cap is counted and
    /// claimed in one step.
    owner_locks: DashMap<String, Arc<Mutex<()>>>,
}

fn terminal_error(row: &UploadSession) -> UploadError {
    match row.status() {
        UploadStatus::Completed => UploadError::AlreadyCompleted { size: row.size() },
        other => UploadError::Inactive(other.to_string()),
    }
}

impl<T: UploadTarget> UploadService<T> {
    pub fn new(
        target: T,
        sessions: Arc<dyn UploadSessionRepo>,
        manager: Arc<UploadManager>,
        idle_timeout: Duration,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            target,
            sessions,
            manager,
            idle_timeout,
            base_url: base_url.into(),
            owner_locks: DashMap::new(),
        }
    }

    pub fn kind(&self) -> &'static str {
        T::KIND
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    fn upload_url(&self, id: &str) -> String {
        format!("{}/{}/{id}", self.base_url.trim_end_matches('/'), T::SCOPE)
    }

    // ─── Admission ───

    pub async fn check_slot(&self, owner_id: &str) -> UploadResult<SlotAvailability> {
        if let OwnerLimit::Capped(cap) = self.target.owner_limit() {
            let active = self.sessions.count_active_by_owner(owner_id).await?;
            let available = active < cap;
            let message = if available {
                format!("{} of {cap} upload slots free", cap - active)
            } else {
                format!(
                    "upload limit reached: {active} of {cap} uploads in progress, finish or cancel one first"
                )
            };
            return Ok(SlotAvailability {
                available,
                message,
                active: active as usize,
                queued: 0,
                max: cap as usize,
            });
        }

        let slots = self.manager.check_slot(T::SCOPE).await?;
        let message = if slots.available {
            "upload slot available".to_string()
        } else if self.manager.policy(T::SCOPE)? == AdmissionPolicy::Queue {
            format!(
                "all {} upload slots busy, new uploads wait in line ({} queued)",
                slots.max, slots.queued
            )
        } else {
            format!("all {} upload slots busy, try again later", slots.max)
        };
        Ok(SlotAvailability {
            available: slots.available,
            message,
            active: slots.active,
            queued: slots.queued,
            max: slots.max,
        })
    }

    async fn lock_owner(&self, owner_id: &str) -> Option<OwnedMutexGuard<()>> {
        if self.target.owner_limit() == OwnerLimit::Unlimited {
            return None;
        }
        let lock = self
            .owner_locks
            .entry(owner_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        Some(lock.lock_owned().await)
    }

    fn rejects_when_full(&self) -> UploadResult<bool> {
        Ok(matches!(self.target.owner_limit(), OwnerLimit::Capped(_))
            || self.manager.policy(T::SCOPE)? == AdmissionPolicy::Reject)
    }

    /// Re-register surviving sessions with the admission queue, oldest
    /// first. Run once at startup.
    pub async fn readmit(&self) -> UploadResult<usize> {
        let ids = self.sessions.get_active_ids().await?;
        for id in &ids {
            self.manager.acquire_slot(T::SCOPE, id).await?;
        }
        if !ids.is_empty() {
            tracing::info!("Re-admitted {} {} upload(s)", ids.len(), T::KIND);
        }
        Ok(ids.len())
    }

    // ─── Initiate ───

    /// Start a session. With `target_entity_id`, completion replaces that
    /// entity's file instead of creating a new entity.
    pub async fn initiate(
        &self,
        owner_id: &str,
        declared_size: u64,
        raw_metadata: &str,
        target_entity_id: Option<&str>,
    ) -> UploadResult<InitiatedUpload> {
        let existing = match target_entity_id {
            Some(entity_id) => Some(self.owned_entity(owner_id, entity_id).await?),
            None => None,
        };
        let fields = parse_upload_metadata(raw_metadata)?;
        let metadata = self.target.parse_metadata(&fields, existing.as_ref())?;
        self.manager.validate_size(declared_size)?;

        // Held until the row exists, so concurrent initiates see each other.
        let _admission = self.lock_owner(owner_id).await;
        let slot = self.check_slot(owner_id).await?;
        if !slot.available && self.rejects_when_full()? {
            return Err(UploadError::Conflict(slot.message));
        }

        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let upload_type = if existing.is_some() {
            UploadType::Update
        } else {
            UploadType::Create
        };
        let session = UploadSession {
            id: id.clone(),
            owner_id: owner_id.to_string(),
            target_kind: T::KIND.to_string(),
            target_entity_id: existing.as_ref().map(|e| T::entity_id(e).to_string()),
            upload_type: upload_type.as_str().to_string(),
            declared_size: declared_size as i64,
            current_offset: 0,
            status: UploadStatus::Pending.as_str().to_string(),
            progress: 0.0,
            metadata: serde_json::to_string(&metadata).map_err(UploadError::internal)?,
            file_path: None,
            expires_at: format_timestamp(now + self.idle_timeout),
            created_at: format_timestamp(now),
            updated_at: format_timestamp(now),
        };
        self.sessions.create(session).await?;

        if let Err(e) = self.manager.initiate(&id, declared_size, &fields).await {
            self.delete_row(&id).await;
            return Err(e.into());
        }

        let granted = match self.manager.acquire_slot(T::SCOPE, &id).await {
            Ok(granted) => granted,
            Err(e) => {
                self.abandon(&id).await;
                return Err(e.into());
            }
        };
        if !granted && self.manager.policy(T::SCOPE)? == AdmissionPolicy::Reject {
            self.abandon(&id).await;
            return Err(UploadError::Conflict(
                "all upload slots are busy, try again later".into(),
            ));
        }
        let queue_position = if granted {
            None
        } else {
            self.manager.queue_position(T::SCOPE, &id).await?
        };

        tracing::info!(
            "{} upload {id} initiated by {owner_id} ({declared_size} bytes, {}{})",
            T::KIND,
            upload_type.as_str(),
            if granted { "" } else { ", queued" }
        );
        Ok(InitiatedUpload {
            url: self.upload_url(&id),
            id,
            offset: 0,
            declared_size,
            status: UploadStatus::Pending,
            queued: !granted,
            queue_position,
        })
    }

    async fn delete_row(&self, id: &str) {
        if let Err(e) = self.sessions.delete(id).await {
            tracing::error!("Failed to delete upload session {id}: {e}");
        }
    }

    /// Undo a half-initiated session.
    async fn abandon(&self, id: &str) {
        if let Err(e) = self.manager.cancel(id).await {
            tracing::warn!("Failed to discard storage for upload {id}: {e}");
        }
        if let Err(e) = self.manager.release_slot(T::SCOPE, id).await {
            tracing::warn!("Failed to release slot for upload {id}: {e}");
        }
        self.delete_row(id).await;
        self.manager.forget(id);
    }

    // ─── Lookups ───

    async fn owned_entity(&self, owner_id: &str, entity_id: &str) -> UploadResult<T::Entity> {
        let entity = self
            .target
            .find_entity(entity_id)
            .await?
            .ok_or_else(|| UploadError::NotFound(format!("{} {entity_id}", T::KIND)))?;
        if T::entity_owner(&entity) != owner_id {
            return Err(UploadError::Forbidden);
        }
        Ok(entity)
    }

    async fn load(&self, id: &str) -> UploadResult<UploadSession> {
        self.sessions
            .get_by_id(id)
            .await?
            .ok_or_else(|| UploadError::NotFound(format!("upload session {id}")))
    }

    async fn load_owned(
        &self,
        id: &str,
        owner_id: &str,
        expected_entity: Option<&str>,
    ) -> UploadResult<UploadSession> {
        let row = self.load(id).await?;
        if row.owner_id != owner_id {
            return Err(UploadError::Forbidden);
        }
        if let Some(expected) = expected_entity {
            if row.target_entity_id.as_deref() != Some(expected) {
                return Err(UploadError::Forbidden);
            }
        }
        Ok(row)
    }

    /// Error describing why `id` no longer accepts work.
    async fn current_state_error(&self, id: &str) -> UploadError {
        match self.sessions.get_by_id(id).await {
            Ok(Some(row)) if row.status().is_terminal() => terminal_error(&row),
            Ok(_) => UploadError::Inactive("no longer active".into()),
            Err(e) => e.into(),
        }
    }

    pub async fn status(
        &self,
        id: &str,
        owner_id: &str,
        expected_entity: Option<&str>,
    ) -> UploadResult<UploadProgress> {
        let row = self.load_owned(id, owner_id, expected_entity).await?;
        Ok(UploadProgress {
            offset: row.offset(),
            declared_size: row.size(),
        })
    }

    pub async fn info(
        &self,
        id: &str,
        owner_id: &str,
        expected_entity: Option<&str>,
    ) -> UploadResult<UploadInfo> {
        Ok(self.load_owned(id, owner_id, expected_entity).await?.into())
    }

    // ─── Chunks ───

    /// Append one chunk at `offset` and return the new offset. The chunk
    /// that reaches the declared size also completes the upload.
    pub async fn handle_chunk(
        &self,
        id: &str,
        owner_id: &str,
        offset: u64,
        reader: ChunkReader<'_>,
        expected_entity: Option<&str>,
    ) -> UploadResult<u64> {
        let row = self.load_owned(id, owner_id, expected_entity).await?;
        if row.status().is_terminal() {
            return Err(terminal_error(&row));
        }
        let guard = self.manager.lock(id).await;

        // Re-read under the lock; another request may have moved the row.
        let mut row = self.load(id).await?;
        if row.status().is_terminal() {
            drop(guard);
            self.manager.forget(id);
            return Err(terminal_error(&row));
        }
        self.reconcile(&mut row).await?;
        if offset != row.offset() {
            return Err(UploadError::OffsetMismatch {
                offset: row.offset(),
            });
        }

        if !self.manager.acquire_slot(T::SCOPE, id).await? {
            let message = match self.manager.queue_position(T::SCOPE, id).await? {
                Some(position) => format!("upload is waiting for a slot (position {position})"),
                None => "no upload slot available".to_string(),
            };
            return Err(UploadError::Conflict(message));
        }

        let new_offset = match self.manager.handle_chunk(&guard, offset, reader).await {
            Ok(new_offset) => new_offset,
            Err(ManagerError::Inactive | ManagerError::NotFound(_)) => {
                return Err(self.current_state_error(id).await)
            }
            Err(e) => return Err(e.into()),
        };

        if new_offset > 0 && row.status() == UploadStatus::Pending {
            self.sessions
                .update_status(id, &[UploadStatus::Pending], UploadStatus::Uploading)
                .await?;
            row.status = UploadStatus::Uploading.as_str().to_string();
        }

        let expires_at = Utc::now() + self.idle_timeout;
        let progress = progress_percent(new_offset, row.size());
        if !self
            .sessions
            .update_offset(id, new_offset, progress, expires_at)
            .await?
        {
            return Err(self.current_state_error(id).await);
        }
        row.current_offset = new_offset as i64;

        if new_offset >= row.size() {
            self.complete(guard, &row).await?;
        }
        Ok(new_offset)
    }

    /// Bring the row in line with what storage actually holds. Storage can
    /// only be ahead when a previous offset update was lost; bytes that are
    /// on disk are kept. Storage behind the row means data is gone.
    async fn reconcile(&self, row: &mut UploadSession) -> UploadResult<()> {
        let stored = match self.manager.status(&row.id).await {
            Ok(stat) => Some(stat.offset),
            Err(ManagerError::Inactive) => return Err(self.current_state_error(&row.id).await),
            Err(ManagerError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };

        match stored {
            Some(stored) if stored == row.offset() => Ok(()),
            Some(stored) if stored > row.offset() => {
                tracing::warn!(
                    "Upload {}: storage holds {stored} bytes but session recorded {}, catching up",
                    row.id,
                    row.offset()
                );
                let expires_at = Utc::now() + self.idle_timeout;
                let progress = progress_percent(stored, row.size());
                self.sessions
                    .update_offset(&row.id, stored, progress, expires_at)
                    .await?;
                row.current_offset = stored as i64;
                Ok(())
            }
            _ => {
                tracing::error!(
                    "Upload {}: temporary data missing ({} bytes recorded), marking failed",
                    row.id,
                    row.offset()
                );
                self.fail(&row.id).await?;
                Err(self.current_state_error(&row.id).await)
            }
        }
    }

    /// Temporary data of a failed session is left on disk for inspection.
    async fn fail(&self, id: &str) -> UploadResult<()> {
        self.sessions
            .update_status(id, &UploadStatus::ACTIVE, UploadStatus::Failed)
            .await?;
        self.manager.release_slot(T::SCOPE, id).await?;
        self.manager.forget(id);
        Ok(())
    }

    // ─── Completion ───

    async fn complete(&self, guard: SessionGuard, row: &UploadSession) -> UploadResult<()> {
        let metadata: T::Metadata =
            serde_json::from_str(&row.metadata).map_err(UploadError::internal)?;
        let dir = self.manager.allocate_dir(T::SCOPE).await?;
        let path = dir.file_path(&file_name_for(
            T::display_name(&metadata),
            T::FILE_EXTENSION,
        ));
        self.manager.finalize(&guard, &path).await?;

        let file = StoredFile {
            path: path.to_string_lossy().into_owned(),
            size: row.size(),
        };
        let replaced = match self.materialize(row, metadata, &file).await {
            Ok(replaced) => replaced,
            Err(e) => {
                if let Err(restore) = self.manager.restore(&guard).await {
                    tracing::error!(
                        "Upload {}: could not restore data after failed completion: {restore}",
                        row.id
                    );
                    if let Err(fail) = self.fail(&row.id).await {
                        tracing::error!("Upload {}: could not mark failed: {fail}", row.id);
                    }
                } else if matches!(e, UploadError::Inactive(_)) {
                    // Cancelled while completing; the restored bytes have no owner left.
                    if let Err(discard) = self.manager.cancel(&row.id).await {
                        tracing::warn!("Upload {}: {discard}", row.id);
                    }
                    drop(guard);
                    self.manager.forget(&row.id);
                } else {
                    tracing::warn!(
                        "Upload {} completion failed, kept at offset {}: {e}",
                        row.id,
                        row.offset()
                    );
                }
                return Err(e);
            }
        };

        if let Err(e) = self.manager.complete(guard).await {
            tracing::warn!("Upload {}: {e}", row.id);
        }
        self.manager.release_slot(T::SCOPE, &row.id).await?;
        dir.commit();

        if let Some(old) = replaced.filter(|old| *old != file.path) {
            if let Err(e) = self.manager.delete_file(T::SCOPE, Path::new(&old)).await {
                tracing::warn!("Failed to delete replaced file {old}: {e}");
            }
        }
        tracing::info!(
            "{} upload {} completed ({} bytes at {})",
            T::KIND,
            row.id,
            file.size,
            file.path
        );
        Ok(())
    }

    /// Create or update the entity and mark the row completed. Returns the
    /// file an update replaced. Undoes its own entity change on failure.
    async fn materialize(
        &self,
        row: &UploadSession,
        metadata: T::Metadata,
        file: &StoredFile,
    ) -> UploadResult<Option<String>> {
        match row.upload_type() {
            UploadType::Create => {
                let entity = self
                    .target
                    .create_entity(&row.owner_id, metadata, file)
                    .await?;
                let entity_id = T::entity_id(&entity).to_string();
                if let Err(e) = self.mark_completed(&row.id, &entity_id, &file.path).await {
                    if let Err(cleanup) = self.target.delete_entity(&entity_id).await {
                        tracing::error!(
                            "Upload {}: could not remove {} {entity_id}: {cleanup}",
                            row.id,
                            T::KIND
                        );
                    }
                    return Err(e);
                }
                Ok(None)
            }
            UploadType::Update => {
                let entity_id = row.target_entity_id.as_deref().ok_or_else(|| {
                    UploadError::internal(format!("update session {} has no target", row.id))
                })?;
                let existing = self.owned_entity(&row.owner_id, entity_id).await?;
                let previous = existing.clone();
                let old_file = T::entity_file(&existing).to_string();

                self.target.update_entity(existing, metadata, file).await?;
                if let Err(e) = self.mark_completed(&row.id, entity_id, &file.path).await {
                    if let Err(cleanup) = self.target.save_entity(previous).await {
                        tracing::error!(
                            "Upload {}: could not revert {} {entity_id}: {cleanup}",
                            row.id,
                            T::KIND
                        );
                    }
                    return Err(e);
                }
                Ok(Some(old_file))
            }
        }
    }

    async fn mark_completed(&self, id: &str, entity_id: &str, path: &str) -> UploadResult<()> {
        if !self.sessions.complete(id, entity_id, path).await? {
            return Err(self.current_state_error(id).await);
        }
        Ok(())
    }

    // ─── Cancellation ───

    pub async fn cancel(
        &self,
        id: &str,
        owner_id: &str,
        expected_entity: Option<&str>,
    ) -> UploadResult<()> {
        let row = self.load_owned(id, owner_id, expected_entity).await?;
        if row.status().is_terminal() {
            return Err(terminal_error(&row));
        }

        self.manager.cancel(id).await?;
        self.manager.release_slot(T::SCOPE, id).await?;
        let cancelled = self
            .sessions
            .update_status(id, &UploadStatus::ACTIVE, UploadStatus::Cancelled)
            .await;
        self.manager.forget(id);
        if !cancelled? {
            return Err(self.current_state_error(id).await);
        }
        tracing::info!("{} upload {id} cancelled by {owner_id}", T::KIND);
        Ok(())
    }

    /// Force-cancel every active session the owner holds in this scope.
    pub async fn reset_queue(&self, owner_id: &str) -> UploadResult<usize> {
        let ids: Vec<String> = self
            .sessions
            .get_active_by_owner(owner_id)
            .await?
            .into_iter()
            .map(|row| row.id)
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }

        self.manager.reset_sessions(T::SCOPE, &ids).await?;
        let mut cancelled = 0;
        for id in &ids {
            if self
                .sessions
                .update_status(id, &UploadStatus::ACTIVE, UploadStatus::Cancelled)
                .await?
            {
                cancelled += 1;
                self.manager.forget(id);
            }
        }
        tracing::info!("Reset {cancelled} {} upload(s) for {owner_id}", T::KIND);
        Ok(cancelled)
    }

    // ─── Reaper ───

    pub async fn expired_sessions(&self, now: DateTime<Utc>) -> UploadResult<Vec<UploadSession>> {
        Ok(self.sessions.get_expired_before(now).await?)
    }

    pub async fn abandoned_sessions(&self, older_than: Duration) -> UploadResult<Vec<UploadSession>> {
        Ok(self.sessions.get_abandoned_older_than(older_than).await?)
    }

    /// Cancel a session regardless of owner. Returns false when there was
    /// nothing left to reclaim.
    pub async fn reclaim(&self, id: &str) -> UploadResult<bool> {
        match self.manager.cancel(id).await {
            Ok(()) => {}
            Err(ManagerError::Completed { .. }) => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        self.manager.release_slot(T::SCOPE, id).await?;
        let reclaimed = self
            .sessions
            .update_status(id, &UploadStatus::ACTIVE, UploadStatus::Cancelled)
            .await;
        self.manager.forget(id);
        let reclaimed = reclaimed?;
        if reclaimed {
            tracing::info!("Reclaimed idle {} upload {id}", T::KIND);
        }
        Ok(reclaimed)
    }

    /// Reclaim every session past its deadline or idle for `abandoned_after`.
    pub async fn reap(&self, now: DateTime<Utc>, abandoned_after: Duration) -> UploadResult<usize> {
        let expired = self.expired_sessions(now).await?;
        let abandoned = self.abandoned_sessions(abandoned_after).await?;

        let mut seen = HashSet::new();
        let mut reclaimed = 0;
        for row in expired.into_iter().chain(abandoned) {
            if !seen.insert(row.id.clone()) {
                continue;
            }
            match self.reclaim(&row.id).await {
                Ok(true) => reclaimed += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!("Failed to reclaim upload {}: {e}", row.id),
            }
        }
        Ok(reclaimed)
    }
}
