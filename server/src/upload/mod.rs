pub mod layout;
pub mod manager;
pub mod queue;
pub mod store;

pub use layout::{AllocatedDir, FileLayout};
pub use manager::{SessionGuard, UploadManager};
pub use queue::{AdmissionPolicy, AdmissionQueue, SlotStatus};
pub use store::{ChunkReader, ChunkStat, ChunkStore, FilesystemChunkStore};
