use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use crate::entities::module::Model as Module;
pub use crate::entities::project::Model as Project;
pub use crate::entities::upload_session::Model as UploadSession;

/// Fixed-width microseconds, so sessions created within the same second
/// still sort in creation order.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Timestamps are stored as sortable UTC text, so string comparison matches time order.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

// ─── Session state ───

/// Upload session state machine:
/// `Pending -> Uploading -> {Completed | Cancelled | Failed}`, plus `Pending -> Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Completed,
    Cancelled,
    Failed,
}

impl UploadStatus {
    pub const ACTIVE: [UploadStatus; 2] = [UploadStatus::Pending, UploadStatus::Uploading];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Uploading => "uploading",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Uploading)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: UploadStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Uploading)
                | (Self::Pending, Self::Cancelled)
                | (Self::Pending, Self::Failed)
                | (Self::Uploading, Self::Completed)
                | (Self::Uploading, Self::Cancelled)
                | (Self::Uploading, Self::Failed)
        )
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "uploading" => Ok(Self::Uploading),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown upload status: {other}")),
        }
    }
}

/// Whether completion creates a new entity or replaces an existing entity's file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadType {
    Create,
    Update,
}

impl UploadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
        }
    }
}

impl FromStr for UploadType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            other => Err(format!("unknown upload type: {other}")),
        }
    }
}

impl UploadSession {
    pub fn status(&self) -> UploadStatus {
        // Rows are only ever written through UploadStatus::as_str.
        self.status.parse().unwrap_or(UploadStatus::Failed)
    }

    pub fn upload_type(&self) -> UploadType {
        self.upload_type.parse().unwrap_or(UploadType::Create)
    }

    pub fn offset(&self) -> u64 {
        self.current_offset.max(0) as u64
    }

    pub fn size(&self) -> u64 {
        self.declared_size.max(0) as u64
    }

    pub fn metadata_value(&self) -> serde_json::Value {
        serde_json::from_str(&self.metadata).unwrap_or(serde_json::Value::Null)
    }
}

pub fn progress_percent(offset: u64, declared_size: u64) -> f64 {
    if declared_size == 0 {
        return 0.0;
    }
    (offset as f64 / declared_size as f64 * 100.0).min(100.0)
}

// ─── Responses ───

#[derive(Debug, Clone, Serialize)]
pub struct InitiatedUpload {
    pub id: String,
    pub url: String,
    pub offset: u64,
    pub declared_size: u64,
    pub status: UploadStatus,
    /// True while the session waits for an admission slot.
    pub queued: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotAvailability {
    pub available: bool,
    pub message: String,
    pub active: usize,
    pub queued: usize,
    pub max: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UploadProgress {
    pub offset: u64,
    pub declared_size: u64,
}

/// Read-only projection of an upload session.
#[derive(Debug, Clone, Serialize)]
pub struct UploadInfo {
    pub id: String,
    pub kind: String,
    pub upload_type: UploadType,
    pub status: UploadStatus,
    pub offset: u64,
    pub declared_size: u64,
    pub progress: f64,
    pub target_entity_id: Option<String>,
    pub metadata: serde_json::Value,
    pub expires_at: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<UploadSession> for UploadInfo {
    fn from(row: UploadSession) -> Self {
        Self {
            status: row.status(),
            upload_type: row.upload_type(),
            offset: row.offset(),
            declared_size: row.size(),
            metadata: row.metadata_value(),
            id: row.id,
            kind: row.target_kind,
            progress: row.progress,
            target_entity_id: row.target_entity_id,
            expires_at: row.expires_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [
            UploadStatus::Pending,
            UploadStatus::Uploading,
            UploadStatus::Completed,
            UploadStatus::Cancelled,
            UploadStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<UploadStatus>().unwrap(), status);
        }
        assert!("done".parse::<UploadStatus>().is_err());
    }

    #[test]
    fn test_state_machine_only_moves_forward() {
        use UploadStatus::*;
        assert!(Pending.can_transition_to(Uploading));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Uploading.can_transition_to(Completed));
        assert!(Uploading.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Uploading.can_transition_to(Pending));
        assert!(!Cancelled.can_transition_to(Uploading));
    }

    #[test]
    fn test_progress_percent() {
        assert!((progress_percent(1024, 3072) - 33.333).abs() < 0.01);
        assert_eq!(progress_percent(3072, 3072), 100.0);
        assert_eq!(progress_percent(0, 0), 0.0);
    }

    #[test]
    fn test_timestamps_sort_lexically() {
        let now = Utc::now();
        let early = format_timestamp(now);
        let late = format_timestamp(now + chrono::Duration::hours(1));
        assert!(early < late);

        // Same second, different microsecond.
        let next = format_timestamp(now + chrono::Duration::microseconds(1));
        assert!(early < next);
        assert_eq!(early.len(), next.len());
    }
}
