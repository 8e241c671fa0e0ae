use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

fn is_empty_extra(extra: &Map<String, Value>) -> bool {
    extra.is_empty()
}

/// A persisted Recording row (spec.md §3, §6 "Persisted document shapes").
///
/// `extra` captures any field this build does not know about so that
/// `load(save(D)) = D` holds even across schema drift (spec.md §8).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecordingRecord {
    pub id: String,
    pub name: String,
    pub rtsp_url: String,
    pub start_time: DateTime<Utc>,
    pub duration: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(flatten, default, skip_serializing_if = "is_empty_extra")]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RecordingsDocument {
    pub recordings: Vec<RecordingRecord>,
}

/// A persisted SavedStream row (spec.md §3, §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SavedStreamRecord {
    pub id: String,
    pub name: String,
    pub rtsp_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favorite: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten, default, skip_serializing_if = "is_empty_extra")]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StreamsDocument {
    pub streams: Vec<SavedStreamRecord>,
}
