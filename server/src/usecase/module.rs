//! Course module documents: a per-owner cap on top of a rejecting queue.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::UploadResult;
use crate::models::{format_timestamp, Module};
use crate::repos::ModuleRepo;
use crate::usecase::metadata::{text_field, MetadataFields};
use crate::usecase::target::{OwnerLimit, StoredFile, UploadTarget};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleMetadata {
    pub title: String,
    pub description: String,
}

pub struct ModuleTarget {
    repo: Arc<dyn ModuleRepo>,
    max_per_owner: u64,
}

impl ModuleTarget {
    pub fn new(repo: Arc<dyn ModuleRepo>, max_per_owner: u64) -> Self {
        Self {
            repo,
            max_per_owner,
        }
    }
}

#[async_trait]
impl UploadTarget for ModuleTarget {
    type Metadata = ModuleMetadata;
    type Entity = Module;

    const KIND: &'static str = "module";
    const SCOPE: &'static str = "modules";
    const FILE_EXTENSION: &'static str = "pdf";

    fn owner_limit(&self) -> OwnerLimit {
        OwnerLimit::Capped(self.max_per_owner)
    }

    fn parse_metadata(
        &self,
        fields: &MetadataFields,
        existing: Option<&Module>,
    ) -> UploadResult<ModuleMetadata> {
        // Description is optional even on create.
        let description_fallback = existing.map(|m| m.description.as_str()).unwrap_or("");
        Ok(ModuleMetadata {
            title: text_field(fields, "judul", 3, 255, existing.map(|m| m.title.as_str()))?,
            description: text_field(fields, "deskripsi", 0, 2000, Some(description_fallback))?,
        })
    }

    fn display_name(metadata: &ModuleMetadata) -> &str {
        &metadata.title
    }

    fn entity_id(entity: &Module) -> &str {
        &entity.id
    }

    fn entity_owner(entity: &Module) -> &str {
        &entity.owner_id
    }

    fn entity_file(entity: &Module) -> &str {
        &entity.file_path
    }

    async fn find_entity(&self, id: &str) -> UploadResult<Option<Module>> {
        Ok(self.repo.get_by_id(id).await?)
    }

    async fn create_entity(
        &self,
        owner_id: &str,
        metadata: ModuleMetadata,
        file: &StoredFile,
    ) -> UploadResult<Module> {
        let module = Module {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            title: metadata.title,
            description: metadata.description,
            file_path: file.path.clone(),
            file_size: file.size as i64,
            created_at: format_timestamp(Utc::now()),
            updated_at: None,
        };
        Ok(self.repo.create(module).await?)
    }

    async fn update_entity(
        &self,
        mut existing: Module,
        metadata: ModuleMetadata,
        file: &StoredFile,
    ) -> UploadResult<Module> {
        existing.title = metadata.title;
        existing.description = metadata.description;
        existing.file_path = file.path.clone();
        existing.file_size = file.size as i64;
        existing.updated_at = Some(format_timestamp(Utc::now()));
        Ok(self.repo.update(existing).await?)
    }

    async fn save_entity(&self, entity: Module) -> UploadResult<()> {
        self.repo.update(entity).await?;
        Ok(())
    }

    async fn delete_entity(&self, id: &str) -> UploadResult<()> {
        Ok(self.repo.delete(id).await?)
    }
}
