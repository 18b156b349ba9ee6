use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::UploadResult;
use crate::usecase::metadata::MetadataFields;

/// A completed upload's permanent file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub path: String,
    pub size: u64,
}

/// How new sessions of a kind are admitted beyond the global queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerLimit {
    /// Only the admission queue bounds concurrency.
    Unlimited,
    /// Each owner may hold at most this many non-terminal sessions.
    Capped(u64),
}

/// One kind of entity an upload can create or replace the file of.
///
/// The generic [`UploadService`](crate::usecase::UploadService) drives the
/// protocol; implementations supply the metadata rules and entity persistence.
#[async_trait]
pub trait UploadTarget: Send + Sync + 'static {
    /// Validated, kind-specific metadata. Stored as JSON on the session row.
    type Metadata: Serialize + DeserializeOwned + Clone + Send + Sync;
    type Entity: Clone + Send + Sync;

    /// Value of `upload_sessions.target_kind`.
    const KIND: &'static str;
    /// Admission queue and file layout scope.
    const SCOPE: &'static str;
    const FILE_EXTENSION: &'static str;

    fn owner_limit(&self) -> OwnerLimit;

    /// Validate decoded fields. With `existing` set (an update), omitted
    /// fields keep the entity's current values.
    fn parse_metadata(
        &self,
        fields: &MetadataFields,
        existing: Option<&Self::Entity>,
    ) -> UploadResult<Self::Metadata>;

    /// Human-readable name the permanent file is named after.
    fn display_name(metadata: &Self::Metadata) -> &str;

    fn entity_id(entity: &Self::Entity) -> &str;
    fn entity_owner(entity: &Self::Entity) -> &str;
    fn entity_file(entity: &Self::Entity) -> &str;

    async fn find_entity(&self, id: &str) -> UploadResult<Option<Self::Entity>>;

    async fn create_entity(
        &self,
        owner_id: &str,
        metadata: Self::Metadata,
        file: &StoredFile,
    ) -> UploadResult<Self::Entity>;

    /// Apply new metadata and file to `existing` and persist it.
    async fn update_entity(
        &self,
        existing: Self::Entity,
        metadata: Self::Metadata,
        file: &StoredFile,
    ) -> UploadResult<Self::Entity>;

    /// Persist `entity` unchanged. Used to roll back a failed update.
    async fn save_entity(&self, entity: Self::Entity) -> UploadResult<()>;

    async fn delete_entity(&self, id: &str) -> UploadResult<()>;
}
