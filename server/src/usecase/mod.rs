pub mod metadata;
pub mod module;
pub mod project;
pub mod service;
pub mod target;

pub use module::{ModuleMetadata, ModuleTarget};
pub use project::{ProjectMetadata, ProjectTarget};
pub use service::UploadService;
pub use target::{OwnerLimit, StoredFile, UploadTarget};

pub type ProjectUploads = UploadService<ProjectTarget>;
pub type ModuleUploads = UploadService<ModuleTarget>;
