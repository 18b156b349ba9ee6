use async_trait::async_trait;
use sea_orm::*;

use crate::entities::module;
use crate::models::Module;

#[async_trait]
pub trait ModuleRepo: Send + Sync {
    async fn create(&self, module: Module) -> Result<Module, DbErr>;
    async fn update(&self, module: Module) -> Result<Module, DbErr>;
    async fn get_by_id(&self, id: &str) -> Result<Option<Module>, DbErr>;
    async fn delete(&self, id: &str) -> Result<(), DbErr>;
}

pub struct SeaOrmModuleRepo {
    db: DatabaseConnection,
}

impl SeaOrmModuleRepo {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn active_model(m: Module) -> module::ActiveModel {
    module::ActiveModel {
        id: Set(m.id),
        owner_id: Set(m.owner_id),
        title: Set(m.title),
        description: Set(m.description),
        file_path: Set(m.file_path),
        file_size: Set(m.file_size),
        created_at: Set(m.created_at),
        updated_at: Set(m.updated_at),
    }
}

#[async_trait]
impl ModuleRepo for SeaOrmModuleRepo {
    async fn create(&self, module: Module) -> Result<Module, DbErr> {
        module::Entity::insert(active_model(module.clone()))
            .exec(&self.db)
            .await?;
        Ok(module)
    }

    async fn update(&self, module: Module) -> Result<Module, DbErr> {
        active_model(module).update(&self.db).await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Module>, DbErr> {
        module::Entity::find_by_id(id).one(&self.db).await
    }

    async fn delete(&self, id: &str) -> Result<(), DbErr> {
        module::Entity::delete_by_id(id).exec(&self.db).await?;
        Ok(())
    }
}
