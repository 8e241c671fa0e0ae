use serde::{Deserialize, Serialize};

/// Derived runtime status (spec.md §4.5, §9 "state machine vs. flags"):
/// computed from live supervisor state plus the persisted `success` field,
/// never itself the thing persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingStatus {
    Scheduled,
    Starting,
    Recording,
    Retrying,
    Cancelled,
    Completed,
    Failed,
}

impl RecordingStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RecordingStatus::Cancelled | RecordingStatus::Completed | RecordingStatus::Failed
        )
    }
}
