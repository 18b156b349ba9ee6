use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sea_orm::prelude::Expr;
use sea_orm::*;

use crate::entities::upload_session;
use crate::models::{format_timestamp, UploadSession, UploadStatus};

/// Durable upload sessions for one target kind.
///
/// Status-changing writes are conditional on the current status, so a
/// terminal row can never be moved again. They report whether a row changed.
#[async_trait]
pub trait UploadSessionRepo: Send + Sync {
    async fn create(&self, session: UploadSession) -> Result<(), DbErr>;

    async fn get_by_id(&self, id: &str) -> Result<Option<UploadSession>, DbErr>;

    /// Record accepted bytes and push the idle deadline forward.
    /// Never moves the offset backwards and never touches terminal rows.
    async fn update_offset(
        &self,
        id: &str,
        offset: u64,
        progress: f64,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, DbErr>;

    async fn update_status(
        &self,
        id: &str,
        from: &[UploadStatus],
        to: UploadStatus,
    ) -> Result<bool, DbErr>;

    /// `Uploading -> Completed`, recording the entity and its file.
    async fn complete(&self, id: &str, entity_id: &str, file_path: &str) -> Result<bool, DbErr>;

    async fn delete(&self, id: &str) -> Result<(), DbErr>;

    async fn count_active_by_owner(&self, owner_id: &str) -> Result<u64, DbErr>;

    async fn get_active_by_owner(&self, owner_id: &str) -> Result<Vec<UploadSession>, DbErr>;

    async fn get_expired_before(&self, at: DateTime<Utc>) -> Result<Vec<UploadSession>, DbErr>;

    /// Active sessions with no activity for at least `age`.
    async fn get_abandoned_older_than(&self, age: Duration) -> Result<Vec<UploadSession>, DbErr>;

    /// Oldest first.
    async fn get_active_ids(&self) -> Result<Vec<String>, DbErr>;
}

pub struct SeaOrmUploadSessionRepo {
    db: DatabaseConnection,
    kind: &'static str,
}

impl SeaOrmUploadSessionRepo {
    pub fn new(db: DatabaseConnection, kind: &'static str) -> Self {
        Self { db, kind }
    }

    fn scoped(&self) -> Select<upload_session::Entity> {
        upload_session::Entity::find().filter(upload_session::Column::TargetKind.eq(self.kind))
    }

    fn active(&self) -> Select<upload_session::Entity> {
        self.scoped()
            .filter(upload_session::Column::Status.is_in(status_values(&UploadStatus::ACTIVE)))
    }
}

fn status_values(statuses: &[UploadStatus]) -> Vec<&'static str> {
    statuses.iter().map(|s| s.as_str()).collect()
}

fn now() -> String {
    format_timestamp(Utc::now())
}

#[async_trait]
impl UploadSessionRepo for SeaOrmUploadSessionRepo {
    async fn create(&self, s: UploadSession) -> Result<(), DbErr> {
        let row = upload_session::ActiveModel {
            id: Set(s.id),
            owner_id: Set(s.owner_id),
            target_kind: Set(s.target_kind),
            target_entity_id: Set(s.target_entity_id),
            upload_type: Set(s.upload_type),
            declared_size: Set(s.declared_size),
            current_offset: Set(s.current_offset),
            status: Set(s.status),
            progress: Set(s.progress),
            metadata: Set(s.metadata),
            file_path: Set(s.file_path),
            expires_at: Set(s.expires_at),
            created_at: Set(s.created_at),
            updated_at: Set(s.updated_at),
        };
        upload_session::Entity::insert(row).exec(&self.db).await?;
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<UploadSession>, DbErr> {
        self.scoped()
            .filter(upload_session::Column::Id.eq(id))
            .one(&self.db)
            .await
    }

    async fn update_offset(
        &self,
        id: &str,
        offset: u64,
        progress: f64,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, DbErr> {
        let offset = offset as i64;
        let result = upload_session::Entity::update_many()
            .col_expr(upload_session::Column::CurrentOffset, Expr::value(offset))
            .col_expr(upload_session::Column::Progress, Expr::value(progress))
            .col_expr(
                upload_session::Column::ExpiresAt,
                Expr::value(format_timestamp(expires_at)),
            )
            .col_expr(upload_session::Column::UpdatedAt, Expr::value(now()))
            .filter(upload_session::Column::Id.eq(id))
            .filter(upload_session::Column::TargetKind.eq(self.kind))
            .filter(upload_session::Column::Status.is_in(status_values(&UploadStatus::ACTIVE)))
            .filter(upload_session::Column::CurrentOffset.lte(offset))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn update_status(
        &self,
        id: &str,
        from: &[UploadStatus],
        to: UploadStatus,
    ) -> Result<bool, DbErr> {
        let allowed: Vec<UploadStatus> = from
            .iter()
            .copied()
            .filter(|f| f.can_transition_to(to))
            .collect();
        if allowed.is_empty() {
            return Ok(false);
        }
        let result = upload_session::Entity::update_many()
            .col_expr(upload_session::Column::Status, Expr::value(to.as_str()))
            .col_expr(upload_session::Column::UpdatedAt, Expr::value(now()))
            .filter(upload_session::Column::Id.eq(id))
            .filter(upload_session::Column::TargetKind.eq(self.kind))
            .filter(upload_session::Column::Status.is_in(status_values(&allowed)))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn complete(&self, id: &str, entity_id: &str, file_path: &str) -> Result<bool, DbErr> {
        let result = upload_session::Entity::update_many()
            .col_expr(
                upload_session::Column::Status,
                Expr::value(UploadStatus::Completed.as_str()),
            )
            .col_expr(upload_session::Column::TargetEntityId, Expr::value(entity_id))
            .col_expr(upload_session::Column::FilePath, Expr::value(file_path))
            .col_expr(upload_session::Column::Progress, Expr::value(100.0_f64))
            .col_expr(upload_session::Column::UpdatedAt, Expr::value(now()))
            .filter(upload_session::Column::Id.eq(id))
            .filter(upload_session::Column::TargetKind.eq(self.kind))
            .filter(upload_session::Column::Status.eq(UploadStatus::Uploading.as_str()))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn delete(&self, id: &str) -> Result<(), DbErr> {
        upload_session::Entity::delete_many()
            .filter(upload_session::Column::Id.eq(id))
            .filter(upload_session::Column::TargetKind.eq(self.kind))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn count_active_by_owner(&self, owner_id: &str) -> Result<u64, DbErr> {
        self.active()
            .filter(upload_session::Column::OwnerId.eq(owner_id))
            .count(&self.db)
            .await
    }

    async fn get_active_by_owner(&self, owner_id: &str) -> Result<Vec<UploadSession>, DbErr> {
        self.active()
            .filter(upload_session::Column::OwnerId.eq(owner_id))
            .order_by_asc(upload_session::Column::CreatedAt)
            .all(&self.db)
            .await
    }

    async fn get_expired_before(&self, at: DateTime<Utc>) -> Result<Vec<UploadSession>, DbErr> {
        self.active()
            .filter(upload_session::Column::ExpiresAt.lt(format_timestamp(at)))
            .order_by_asc(upload_session::Column::ExpiresAt)
            .all(&self.db)
            .await
    }

    async fn get_abandoned_older_than(&self, age: Duration) -> Result<Vec<UploadSession>, DbErr> {
        let cutoff = format_timestamp(Utc::now() - age);
        self.active()
            .filter(upload_session::Column::UpdatedAt.lt(cutoff))
            .order_by_asc(upload_session::Column::UpdatedAt)
            .all(&self.db)
            .await
    }

    async fn get_active_ids(&self) -> Result<Vec<String>, DbErr> {
        self.active()
            .select_only()
            .column(upload_session::Column::Id)
            .order_by_asc(upload_session::Column::CreatedAt)
            .into_tuple::<String>()
            .all(&self.db)
            .await
    }
}
