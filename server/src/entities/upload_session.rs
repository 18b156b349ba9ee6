use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "upload_sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub owner_id: String,
    pub target_kind: String, // "project" | "module"
    pub target_entity_id: Option<String>,
    pub upload_type: String, // "create" | "update"
    pub declared_size: i64,
    pub current_offset: i64,
    pub status: String,
    pub progress: f64,
    /// JSON object of the decoded Upload-Metadata fields
    pub metadata: String,
    pub file_path: Option<String>,
    pub expires_at: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
