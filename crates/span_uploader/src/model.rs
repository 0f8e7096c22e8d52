//! Wire records handed to the exporter.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A span in the form the ingestion endpoint expects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadSpan {
    pub started_at_micros: i64,
    /// Custom log id, identifying one query
    pub log_id: String,
    pub span_id: String,
    pub parent_id: String,
    pub trace_id: String,
    pub duration_micros: i64,
    pub service_name: String,
    pub workspace_id: String,
    pub span_name: String,
    pub span_type: String,
    pub status_code: i32,
    pub input: String,
    pub output: String,
    /// JSON-encoded [`ObjectStorage`], empty when nothing was uploaded
    pub object_storage: String,
    pub system_tags_string: HashMap<String, String>,
    pub system_tags_long: HashMap<String, i64>,
    pub system_tags_double: HashMap<String, f64>,
    pub tags_string: HashMap<String, String>,
    pub tags_long: HashMap<String, i64>,
    pub tags_double: HashMap<String, f64>,
    pub tags_bool: HashMap<String, bool>,
}

/// Request body of the span ingestion endpoint.
#[derive(Debug, Serialize)]
pub(crate) struct UploadSpanData<'a> {
    pub spans: &'a [UploadSpan],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadType {
    /// Oversized text moved out of a tag value
    LongText,
    /// Image or file extracted from multi-modal content
    MultiModality,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Text,
    Image,
    File,
}

impl FileType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::File => "file",
        }
    }
}

/// Content stored out-of-band, referenced from the span by `key`.
#[derive(Clone, PartialEq, Eq)]
pub struct UploadFile {
    /// Object storage key
    pub key: String,
    pub data: Vec<u8>,
    pub upload_type: UploadType,
    /// `input` or `output`
    pub tag_key: String,
    pub name: String,
    pub file_type: FileType,
    pub workspace_id: String,
}

impl std::fmt::Debug for UploadFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadFile")
            .field("key", &self.key)
            .field("data_len", &self.data.len())
            .field("upload_type", &self.upload_type)
            .field("tag_key", &self.tag_key)
            .field("name", &self.name)
            .field("file_type", &self.file_type)
            .field("workspace_id", &self.workspace_id)
            .finish()
    }
}

/// Summary of where a span's oversized or binary content went.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStorage {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub input_tos_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output_tos_key: String,
    #[serde(rename = "Attachments", default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub field: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// text, image or file
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub file_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tos_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_storage_wire_shape() {
        let storage = ObjectStorage {
            input_tos_key: "k_in".into(),
            output_tos_key: String::new(),
            attachments: vec![Attachment {
                field: "output".into(),
                name: "cat.png".into(),
                file_type: "image".into(),
                tos_key: "k_img".into(),
            }],
        };
        let json = serde_json::to_value(&storage).unwrap();
        assert_eq!(json["input_tos_key"], "k_in");
        assert!(json.get("output_tos_key").is_none());
        assert_eq!(json["Attachments"][0]["type"], "image");
        assert_eq!(json["Attachments"][0]["tos_key"], "k_img");
    }

    #[test]
    fn test_upload_span_field_names() {
        let span = UploadSpan {
            started_at_micros: 1,
            trace_id: "t".into(),
            ..UploadSpan::default()
        };
        let json = serde_json::to_value(UploadSpanData {
            spans: std::slice::from_ref(&span),
        })
        .unwrap();
        assert_eq!(json["spans"][0]["started_at_micros"], 1);
        assert_eq!(json["spans"][0]["trace_id"], "t");
        assert!(json["spans"][0]["tags_bool"].is_object());
    }
}
