//! Project archives: admitted through a global FIFO queue.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::UploadResult;
use crate::models::{format_timestamp, Project};
use crate::repos::ProjectRepo;
use crate::usecase::metadata::{int_field, text_field, MetadataFields};
use crate::usecase::target::{OwnerLimit, StoredFile, UploadTarget};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectMetadata {
    pub name: String,
    pub category: String,
    pub semester: i32,
}

pub struct ProjectTarget {
    repo: Arc<dyn ProjectRepo>,
}

impl ProjectTarget {
    pub fn new(repo: Arc<dyn ProjectRepo>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl UploadTarget for ProjectTarget {
    type Metadata = ProjectMetadata;
    type Entity = Project;

    const KIND: &'static str = "project";
    const SCOPE: &'static str = "projects";
    const FILE_EXTENSION: &'static str = "zip";

    fn owner_limit(&self) -> OwnerLimit {
        OwnerLimit::Unlimited
    }

    fn parse_metadata(
        &self,
        fields: &MetadataFields,
        existing: Option<&Project>,
    ) -> UploadResult<ProjectMetadata> {
        Ok(ProjectMetadata {
            name: text_field(fields, "nama_proyek", 3, 255, existing.map(|p| p.name.as_str()))?,
            category: text_field(
                fields,
                "kategori",
                1,
                100,
                existing.map(|p| p.category.as_str()),
            )?,
            semester: int_field(fields, "semester", 1, 14, existing.map(|p| p.semester))?,
        })
    }

    fn display_name(metadata: &ProjectMetadata) -> &str {
        &metadata.name
    }

    fn entity_id(entity: &Project) -> &str {
        &entity.id
    }

    fn entity_owner(entity: &Project) -> &str {
        &entity.owner_id
    }

    fn entity_file(entity: &Project) -> &str {
        &entity.file_path
    }

    async fn find_entity(&self, id: &str) -> UploadResult<Option<Project>> {
        Ok(self.repo.get_by_id(id).await?)
    }

    async fn create_entity(
        &self,
        owner_id: &str,
        metadata: ProjectMetadata,
        file: &StoredFile,
    ) -> UploadResult<Project> {
        let project = Project {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            name: metadata.name,
            category: metadata.category,
            semester: metadata.semester,
            file_path: file.path.clone(),
            file_size: file.size as i64,
            created_at: format_timestamp(Utc::now()),
            updated_at: None,
        };
        Ok(self.repo.create(project).await?)
    }

    async fn update_entity(
        &self,
        mut existing: Project,
        metadata: ProjectMetadata,
        file: &StoredFile,
    ) -> UploadResult<Project> {
        existing.name = metadata.name;
        existing.category = metadata.category;
        existing.semester = metadata.semester;
        existing.file_path = file.path.clone();
        existing.file_size = file.size as i64;
        existing.updated_at = Some(format_timestamp(Utc::now()));
        Ok(self.repo.update(existing).await?)
    }

    async fn save_entity(&self, entity: Project) -> UploadResult<()> {
        self.repo.update(entity).await?;
        Ok(())
    }

    async fn delete_entity(&self, id: &str) -> UploadResult<()> {
        Ok(self.repo.delete(id).await?)
    }
}
