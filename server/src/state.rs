use std::sync::Arc;

use axum::Router;
use sea_orm::DatabaseConnection;
use tower_http::cors::CorsLayer;

use crate::config::UploadConfig;
use crate::error::UploadResult;
use crate::repos::{SeaOrmModuleRepo, SeaOrmProjectRepo, SeaOrmUploadSessionRepo};
use crate::routes::uploads::{self, UploadRoutes};
use crate::upload::{AdmissionPolicy, AdmissionQueue, FileLayout, FilesystemChunkStore, UploadManager};
use crate::usecase::{
    ModuleTarget, ModuleUploads, ProjectTarget, ProjectUploads, UploadService, UploadTarget,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: Arc<UploadConfig>,
    pub manager: Arc<UploadManager>,
    pub projects: Arc<ProjectUploads>,
    pub modules: Arc<ModuleUploads>,
    /// JWT verification secret
    pub jwt_secret: Arc<str>,
}

impl AppState {
    /// Wire storage, queues and usecases for both upload kinds.
    pub async fn new(
        db: DatabaseConnection,
        config: UploadConfig,
        jwt_secret: String,
    ) -> UploadResult<Self> {
        let store = FilesystemChunkStore::new(config.temp_dir()).await?;
        let manager = Arc::new(
            UploadManager::new(Arc::new(store), config.max_upload_size)
                .with_scope(
                    AdmissionQueue::new(
                        ProjectTarget::SCOPE,
                        config.max_concurrent_projects,
                        AdmissionPolicy::Queue,
                    ),
                    FileLayout::new(config.projects_dir()),
                )
                .with_scope(
                    AdmissionQueue::new(
                        ModuleTarget::SCOPE,
                        config.max_concurrent_modules,
                        AdmissionPolicy::Reject,
                    ),
                    FileLayout::new(config.modules_dir()),
                ),
        );

        let projects = UploadService::new(
            ProjectTarget::new(Arc::new(SeaOrmProjectRepo::new(db.clone()))),
            Arc::new(SeaOrmUploadSessionRepo::new(db.clone(), ProjectTarget::KIND)),
            manager.clone(),
            config.session_idle_timeout,
            config.public_base_path.clone(),
        );
        let modules = UploadService::new(
            ModuleTarget::new(
                Arc::new(SeaOrmModuleRepo::new(db.clone())),
                config.max_module_queue_per_owner,
            ),
            Arc::new(SeaOrmUploadSessionRepo::new(db.clone(), ModuleTarget::KIND)),
            manager.clone(),
            config.session_idle_timeout,
            config.public_base_path.clone(),
        );

        Ok(Self {
            db,
            config: Arc::new(config),
            manager,
            projects: Arc::new(projects),
            modules: Arc::new(modules),
            jwt_secret: jwt_secret.into(),
        })
    }

    /// Put sessions that survived a restart back into their queues.
    pub async fn readmit(&self) -> UploadResult<()> {
        self.projects.readmit().await?;
        self.modules.readmit().await?;
        Ok(())
    }

    /// Reclaim expired and idle sessions of both kinds.
    pub async fn reap(&self) -> UploadResult<usize> {
        let now = chrono::Utc::now();
        let idle = self.config.session_idle_timeout;
        Ok(self.projects.reap(now, idle).await? + self.modules.reap(now, idle).await?)
    }

    pub fn router(&self) -> Router {
        Router::new()
            .merge(uploads::router(UploadRoutes {
                service: self.projects.clone(),
                jwt_secret: self.jwt_secret.clone(),
            }))
            .merge(uploads::router(UploadRoutes {
                service: self.modules.clone(),
                jwt_secret: self.jwt_secret.clone(),
            }))
            .layer(CorsLayer::permissive())
    }
}
