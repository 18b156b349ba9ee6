//! Persistence seams consumed by the upload usecases.

pub mod modules;
pub mod projects;
pub mod upload_sessions;

pub use modules::{ModuleRepo, SeaOrmModuleRepo};
pub use projects::{ProjectRepo, SeaOrmProjectRepo};
pub use upload_sessions::{SeaOrmUploadSessionRepo, UploadSessionRepo};
