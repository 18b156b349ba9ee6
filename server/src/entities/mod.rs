pub mod module;
pub mod project;
pub mod upload_session;
