use async_trait::async_trait;
use sea_orm::*;

use crate::entities::project;
use crate::models::Project;

#[async_trait]
pub trait ProjectRepo: Send + Sync {
    async fn create(&self, project: Project) -> Result<Project, DbErr>;
    async fn update(&self, project: Project) -> Result<Project, DbErr>;
    async fn get_by_id(&self, id: &str) -> Result<Option<Project>, DbErr>;
    async fn delete(&self, id: &str) -> Result<(), DbErr>;
}

pub struct SeaOrmProjectRepo {
    db: DatabaseConnection,
}

impl SeaOrmProjectRepo {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn active_model(p: Project) -> project::ActiveModel {
    project::ActiveModel {
        id: Set(p.id),
        owner_id: Set(p.owner_id),
        name: Set(p.name),
        category: Set(p.category),
        semester: Set(p.semester),
        file_path: Set(p.file_path),
        file_size: Set(p.file_size),
        created_at: Set(p.created_at),
        updated_at: Set(p.updated_at),
    }
}

#[async_trait]
impl ProjectRepo for SeaOrmProjectRepo {
    async fn create(&self, project: Project) -> Result<Project, DbErr> {
        project::Entity::insert(active_model(project.clone()))
            .exec(&self.db)
            .await?;
        Ok(project)
    }

    async fn update(&self, project: Project) -> Result<Project, DbErr> {
        active_model(project).update(&self.db).await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Project>, DbErr> {
        project::Entity::find_by_id(id).one(&self.db).await
    }

    async fn delete(&self, id: &str) -> Result<(), DbErr> {
        project::Entity::delete_by_id(id).exec(&self.db).await?;
        Ok(())
    }
}
