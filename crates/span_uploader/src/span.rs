use crate::content::{ModelInput, ModelOutput};
use crate::id::{gen_16_char_id, gen_32_char_id};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Tag key of a span's input.
pub const TAG_INPUT: &str = "input";
/// Tag key of a span's output.
pub const TAG_OUTPUT: &str = "output";

/// Fixed per-span overhead counted towards `byte_size`
const SPAN_BASE_BYTES: usize = 128;

/// Tag value types for span metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl TagValue {
    /// Approximate encoded size
    fn byte_size(&self) -> usize {
        match self {
            Self::String(s) => s.len(),
            Self::Int(_) | Self::Float(_) => 8,
            Self::Bool(_) => 1,
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
        }
    }
}

impl From<String> for TagValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for TagValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<i64> for TagValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for TagValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u32> for TagValue {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for TagValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for TagValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// One recorded unit of traced work.
///
/// Built and mutated by the tracing layer; once handed to
/// [`BatchSpanProcessor::on_span_end`](crate::processor::BatchSpanProcessor::on_span_end)
/// it is frozen behind an `Arc` and shared between queues.
#[derive(Debug, Clone)]
pub struct Span {
    /// 32 hex chars
    pub trace_id: String,
    /// 16 hex chars
    pub span_id: String,
    /// Empty or "0" for a root span
    pub parent_id: String,
    pub log_id: String,
    pub workspace_id: String,
    pub service_name: String,
    pub span_name: String,
    pub span_type: String,
    pub status_code: i32,
    pub started_at: SystemTime,
    pub duration: Duration,
    tags: HashMap<String, TagValue>,
    system_tags: HashMap<String, TagValue>,
    multi_modality_keys: HashSet<String>,
    byte_size: usize,
}

impl Span {
    /// Creates a span starting now.
    pub fn new(
        trace_id: impl Into<String>,
        span_id: impl Into<String>,
        parent_id: impl Into<String>,
        span_name: impl Into<String>,
        span_type: impl Into<String>,
    ) -> Self {
        let mut span = Self {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
            parent_id: parent_id.into(),
            log_id: String::new(),
            workspace_id: String::new(),
            service_name: String::new(),
            span_name: span_name.into(),
            span_type: span_type.into(),
            status_code: 0,
            started_at: SystemTime::now(),
            duration: Duration::ZERO,
            tags: HashMap::new(),
            system_tags: HashMap::new(),
            multi_modality_keys: HashSet::new(),
            byte_size: 0,
        };
        span.byte_size = SPAN_BASE_BYTES
            + span.trace_id.len()
            + span.span_id.len()
            + span.parent_id.len()
            + span.span_name.len()
            + span.span_type.len();
        span
    }

    /// A root span of a fresh trace with random ids.
    pub fn root(span_name: impl Into<String>, span_type: impl Into<String>) -> Self {
        Self::new(gen_32_char_id(), gen_16_char_id(), "0", span_name, span_type)
    }

    /// A child of `self` in the same trace, with a random span id.
    pub fn child(&self, span_name: impl Into<String>, span_type: impl Into<String>) -> Self {
        let mut child = Self::new(
            self.trace_id.clone(),
            gen_16_char_id(),
            self.span_id.clone(),
            span_name,
            span_type,
        );
        child.workspace_id = self.workspace_id.clone();
        child.service_name = self.service_name.clone();
        child.log_id = self.log_id.clone();
        child
    }

    pub fn with_workspace_id(mut self, workspace_id: impl Into<String>) -> Self {
        self.workspace_id = workspace_id.into();
        self
    }

    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = service_name.into();
        self
    }

    pub fn with_log_id(mut self, log_id: impl Into<String>) -> Self {
        self.log_id = log_id.into();
        self
    }

    /// Sets a user tag. Overwriting a key replaces its value.
    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<TagValue>) {
        let key = key.into();
        let value = value.into();
        let added = key.len() + value.byte_size();
        let removed = self
            .tags
            .insert(key.clone(), value)
            .map_or(0, |old| key.len() + old.byte_size());
        self.byte_size = (self.byte_size + added).saturating_sub(removed);
    }

    /// Sets a system-reserved tag.
    pub fn set_system_tag(&mut self, key: impl Into<String>, value: impl Into<TagValue>) {
        let key = key.into();
        let value = value.into();
        let added = key.len() + value.byte_size();
        let removed = self
            .system_tags
            .insert(key.clone(), value)
            .map_or(0, |old| key.len() + old.byte_size());
        self.byte_size = (self.byte_size + added).saturating_sub(removed);
    }

    /// Plain-text input.
    pub fn set_input(&mut self, input: impl Into<String>) {
        self.multi_modality_keys.remove(TAG_INPUT);
        self.set_tag(TAG_INPUT, TagValue::String(input.into()));
    }

    /// Plain-text output.
    pub fn set_output(&mut self, output: impl Into<String>) {
        self.multi_modality_keys.remove(TAG_OUTPUT);
        self.set_tag(TAG_OUTPUT, TagValue::String(output.into()));
    }

    /// Structured model input; marked multi-modal when it carries attachments.
    pub fn set_model_input(&mut self, input: &ModelInput) -> Result<(), serde_json::Error> {
        let json = serde_json::to_string(input)?;
        self.set_tag(TAG_INPUT, TagValue::String(json));
        if input.has_attachments() {
            self.multi_modality_keys.insert(TAG_INPUT.to_string());
        } else {
            self.multi_modality_keys.remove(TAG_INPUT);
        }
        Ok(())
    }

    /// Structured model output; marked multi-modal when it carries attachments.
    pub fn set_model_output(&mut self, output: &ModelOutput) -> Result<(), serde_json::Error> {
        let json = serde_json::to_string(output)?;
        self.set_tag(TAG_OUTPUT, TagValue::String(json));
        if output.has_attachments() {
            self.multi_modality_keys.insert(TAG_OUTPUT.to_string());
        } else {
            self.multi_modality_keys.remove(TAG_OUTPUT);
        }
        Ok(())
    }

    /// Already-serialised model content for `input` or `output`, parsed at
    /// export time.
    pub fn set_multi_modality_tag(&mut self, key: &str, json: impl Into<String>) {
        self.set_tag(key, TagValue::String(json.into()));
        self.multi_modality_keys.insert(key.to_string());
    }

    /// Marks the span as completed, fixing its duration.
    pub fn finish(&mut self, status_code: i32) {
        self.duration = self.started_at.elapsed().unwrap_or_default();
        self.status_code = status_code;
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_empty() || self.parent_id == "0"
    }

    pub fn tags(&self) -> &HashMap<String, TagValue> {
        &self.tags
    }

    pub fn system_tags(&self) -> &HashMap<String, TagValue> {
        &self.system_tags
    }

    pub fn tag(&self, key: &str) -> Option<&TagValue> {
        self.tags.get(key)
    }

    pub fn is_multi_modality(&self, key: &str) -> bool {
        self.multi_modality_keys.contains(key)
    }

    /// Approximate size used for queue accounting.
    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    pub fn started_at_micros(&self) -> i64 {
        self.started_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or_default()
    }

    pub fn duration_micros(&self) -> i64 {
        self.duration.as_micros() as i64
    }
}
