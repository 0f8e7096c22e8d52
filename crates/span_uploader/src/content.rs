//! Structured model input/output carried in the `input` / `output` tags.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Input of a model span (tag key `input`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelInput {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<ModelMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ModelTool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ModelToolChoice>,
}

/// Output of a model span (tag key `output`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelOutput {
    #[serde(default)]
    pub choices: Vec<ModelChoice>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelChoice {
    #[serde(default)]
    pub finish_reason: String,
    #[serde(default)]
    pub index: i64,
    #[serde(default)]
    pub message: Option<ModelMessage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    /// Only present on outputs
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reasoning_content: String,
    /// Multi-modal content
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<ModelMessagePart>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ModelToolCall>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tool_call_id: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl ModelMessage {
    /// Whether any part carries an image or a file.
    pub fn has_attachments(&self) -> bool {
        self.parts.iter().any(|p| {
            matches!(
                p.part_type,
                ModelMessagePartType::Image | ModelMessagePartType::File
            )
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelMessagePartType {
    #[default]
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "image_url")]
    Image,
    #[serde(rename = "file_url")]
    File,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelMessagePart {
    #[serde(rename = "type")]
    pub part_type: ModelMessagePartType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<ModelImageUrl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<ModelFileUrl>,
}

impl ModelMessagePart {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            part_type: ModelMessagePartType::Text,
            text: text.into(),
            ..Self::default()
        }
    }

    /// `url` is either an external URL or (MDN) base64 data.
    pub fn image(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            part_type: ModelMessagePartType::Image,
            image_url: Some(ModelImageUrl {
                name: name.into(),
                url: url.into(),
                detail: String::new(),
            }),
            ..Self::default()
        }
    }

    /// `url` is either an external URL or (MDN) base64 data.
    pub fn file(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            part_type: ModelMessagePartType::File,
            file_url: Some(ModelFileUrl {
                name: name.into(),
                url: url.into(),
                ..ModelFileUrl::default()
            }),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelImageUrl {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelFileUrl {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub suffix: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelToolCall {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Always "function"
    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub call_type: String,
    #[serde(default)]
    pub function: Option<ModelToolCallFunction>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelToolCallFunction {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub arguments: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelTool {
    /// Always "function"
    #[serde(default, rename = "type")]
    pub tool_type: String,
    #[serde(default)]
    pub function: Option<ModelToolFunction>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelToolFunction {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema, passed through verbatim
    #[serde(default)]
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelToolChoice {
    #[serde(default, rename = "type")]
    pub choice_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<ModelToolCallFunction>,
}

impl ModelInput {
    pub fn has_attachments(&self) -> bool {
        self.messages.iter().any(ModelMessage::has_attachments)
    }

    /// All message parts, for in-place rewriting.
    pub(crate) fn parts_mut(&mut self) -> impl Iterator<Item = &mut ModelMessagePart> {
        self.messages.iter_mut().flat_map(|m| m.parts.iter_mut())
    }
}

impl ModelOutput {
    pub fn has_attachments(&self) -> bool {
        self.choices
            .iter()
            .filter_map(|c| c.message.as_ref())
            .any(ModelMessage::has_attachments)
    }

    pub(crate) fn parts_mut(&mut self) -> impl Iterator<Item = &mut ModelMessagePart> {
        self.choices
            .iter_mut()
            .filter_map(|c| c.message.as_mut())
            .flat_map(|m| m.parts.iter_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_type_wire_names() {
        let part = ModelMessagePart::image("cat.png", "https://example.com/cat.png");
        let json = serde_json::to_value(&part).unwrap();
        assert_eq!(json["type"], "image_url");
        assert_eq!(json["image_url"]["url"], "https://example.com/cat.png");
        assert!(json.get("text").is_none());
    }

    #[test]
    fn test_output_keeps_empty_choices() {
        let json = serde_json::to_string(&ModelOutput::default()).unwrap();
        assert_eq!(json, r#"{"choices":[]}"#);
    }

    #[test]
    fn test_attachment_detection() {
        let mut input = ModelInput::default();
        input.messages.push(ModelMessage {
            role: "user".into(),
            parts: vec![ModelMessagePart::text("hi")],
            ..ModelMessage::default()
        });
        assert!(!input.has_attachments());

        input.messages[0]
            .parts
            .push(ModelMessagePart::file("a.pdf", "aGVsbG8="));
        assert!(input.has_attachments());
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let raw = r#"{"choices":[{"finish_reason":"stop","index":0,"message":{"role":"assistant","content":"ok","extra":1}}]}"#;
        let output: ModelOutput = serde_json::from_str(raw).unwrap();
        assert_eq!(output.choices[0].message.as_ref().unwrap().content, "ok");
    }
}
