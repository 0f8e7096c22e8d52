//! Span to upload-record conversion.
//!
//! Every span becomes one [`UploadSpan`]. The `input` / `output` tags get
//! special treatment:
//!
//! - plain text over [`MAX_BYTES_OF_INPUT_OUTPUT`] is truncated to
//!   [`TEXT_TRUNCATE_CHAR_LENGTH`] characters and the full text becomes a
//!   long-text [`UploadFile`]
//! - multi-modal content has every inline image/file part decoded into an
//!   [`UploadFile`] and replaced by its storage key; if the re-encoded content
//!   is still oversized, the text path applies on top
//!
//! With `ultra_large_report` off, values are still truncated but no files are
//! produced and inline parts stay in place.

use crate::content::{ModelInput, ModelMessagePart, ModelMessagePartType, ModelOutput};
use crate::error::ConvertError;
use crate::id::gen_16_char_id;
use crate::model::{Attachment, FileType, ObjectStorage, UploadFile, UploadSpan, UploadType};
use crate::span::{Span, TagValue, TAG_INPUT, TAG_OUTPUT};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, warn};
use url::Url;

/// Size above which an input/output value is moved to object storage.
pub const MAX_BYTES_OF_INPUT_OUTPUT: usize = 1024 * 1024;
/// Characters kept in the span when a value is moved out.
pub const TEXT_TRUNCATE_CHAR_LENGTH: usize = 1000;

#[derive(Debug, Clone, Copy, Default)]
pub struct ConvertOptions {
    pub ultra_large_report: bool,
}

/// Converts a batch. Spans that fail to convert are logged and skipped.
pub fn to_upload(spans: &[Arc<Span>], opts: ConvertOptions) -> (Vec<UploadSpan>, Vec<UploadFile>) {
    let mut upload_spans = Vec::with_capacity(spans.len());
    let mut upload_files = Vec::new();

    for span in spans {
        match convert_span(span, opts) {
            Ok((upload_span, files)) => {
                upload_spans.push(upload_span);
                upload_files.extend(files);
            }
            Err(e) => {
                error!(
                    trace_id = %span.trace_id,
                    span_id = %span.span_id,
                    error = %e,
                    "span conversion failed, skipping"
                );
            }
        }
    }

    (upload_spans, upload_files)
}

/// Converts one span into its wire record plus any files it spills.
pub fn convert_span(
    span: &Span,
    opts: ConvertOptions,
) -> Result<(UploadSpan, Vec<UploadFile>), ConvertError> {
    let (input, mut files) = convert_tag(span, TAG_INPUT, opts)?;
    let (output, output_files) = convert_tag(span, TAG_OUTPUT, opts)?;
    files.extend(output_files);

    let object_storage = object_storage_json(&files);
    let tags = TagMaps::split(span.tags(), false);
    let system_tags = TagMaps::split(span.system_tags(), true);

    let upload_span = UploadSpan {
        started_at_micros: span.started_at_micros(),
        log_id: span.log_id.clone(),
        span_id: span.span_id.clone(),
        parent_id: span.parent_id.clone(),
        trace_id: span.trace_id.clone(),
        duration_micros: span.duration_micros(),
        service_name: span.service_name.clone(),
        workspace_id: span.workspace_id.clone(),
        span_name: span.span_name.clone(),
        span_type: span.span_type.clone(),
        status_code: span.status_code,
        input,
        output,
        object_storage,
        system_tags_string: system_tags.string,
        system_tags_long: system_tags.long,
        system_tags_double: system_tags.double,
        tags_string: tags.string,
        tags_long: tags.long,
        tags_double: tags.double,
        tags_bool: tags.bool,
    };

    Ok((upload_span, files))
}

fn convert_tag(
    span: &Span,
    tag_key: &str,
    opts: ConvertOptions,
) -> Result<(String, Vec<UploadFile>), ConvertError> {
    let Some(value) = span.tag(tag_key) else {
        return Ok((String::new(), Vec::new()));
    };

    if !span.is_multi_modality(tag_key) {
        let (text, file) = transfer_text(value.to_string(), span, tag_key, opts);
        return Ok((text, file.into_iter().collect()));
    }

    let raw = match value {
        TagValue::String(s) => s.clone(),
        other => other.to_string(),
    };
    let mut files = Vec::new();
    let encoded = if tag_key == TAG_INPUT {
        let mut content: ModelInput = parse(&raw, tag_key)?;
        for part in content.parts_mut() {
            files.extend(transfer_part(part, span, tag_key, opts));
        }
        encode(&content, tag_key)?
    } else {
        let mut content: ModelOutput = parse(&raw, tag_key)?;
        for part in content.parts_mut() {
            files.extend(transfer_part(part, span, tag_key, opts));
        }
        encode(&content, tag_key)?
    };

    // Extraction can leave large text parts behind
    let (text, file) = transfer_text(encoded, span, tag_key, opts);
    files.extend(file);
    Ok((text, files))
}

fn parse<T: serde::de::DeserializeOwned>(raw: &str, tag_key: &str) -> Result<T, ConvertError> {
    serde_json::from_str(raw).map_err(|source| ConvertError::MalformedContent {
        tag: tag_key.to_string(),
        source,
    })
}

fn encode<T: serde::Serialize>(content: &T, tag_key: &str) -> Result<String, ConvertError> {
    serde_json::to_string(content).map_err(|source| ConvertError::Encode {
        tag: tag_key.to_string(),
        source,
    })
}

fn transfer_text(
    src: String,
    span: &Span,
    tag_key: &str,
    opts: ConvertOptions,
) -> (String, Option<UploadFile>) {
    if src.len() <= MAX_BYTES_OF_INPUT_OUTPUT {
        return (src, None);
    }

    let truncated = truncate_chars(&src, TEXT_TRUNCATE_CHAR_LENGTH);
    if !opts.ultra_large_report {
        return (truncated, None);
    }

    let key = format!(
        "{}_{}_{}_{}_large_text",
        span.trace_id,
        span.span_id,
        tag_key,
        FileType::Text.as_str()
    );
    let file = UploadFile {
        key,
        data: src.into_bytes(),
        upload_type: UploadType::LongText,
        tag_key: tag_key.to_string(),
        name: String::new(),
        file_type: FileType::Text,
        workspace_id: span.workspace_id.clone(),
    };
    (truncated, Some(file))
}

fn transfer_part(
    part: &mut ModelMessagePart,
    span: &Span,
    tag_key: &str,
    opts: ConvertOptions,
) -> Option<UploadFile> {
    if !opts.ultra_large_report {
        return None;
    }

    match part.part_type {
        ModelMessagePartType::Image => {
            let image = part.image_url.as_mut()?;
            extract_inline(&mut image.url, &image.name, FileType::Image, span, tag_key)
        }
        ModelMessagePartType::File => {
            let file = part.file_url.as_mut()?;
            extract_inline(&mut file.url, &file.name, FileType::File, span, tag_key)
        }
        ModelMessagePartType::Text => None,
    }
}

/// Replaces inline data in `url` by a storage key and returns the file to upload.
fn extract_inline(
    url: &mut String,
    name: &str,
    file_type: FileType,
    span: &Span,
    tag_key: &str,
) -> Option<UploadFile> {
    if url.is_empty() || is_valid_url(url) {
        return None;
    }

    let data = match decode_inline(url) {
        Ok(data) => data,
        Err(e) => {
            warn!(
                span_id = %span.span_id,
                tag = tag_key,
                error = %e,
                "inline attachment is not valid base64, leaving it in place"
            );
            return None;
        }
    };

    let key = format!(
        "{}_{}_{}_{}_{}",
        span.trace_id,
        span.span_id,
        tag_key,
        file_type.as_str(),
        gen_16_char_id()
    );
    url.clone_from(&key);

    Some(UploadFile {
        key,
        data,
        upload_type: UploadType::MultiModality,
        tag_key: tag_key.to_string(),
        name: name.to_string(),
        file_type,
        workspace_id: span.workspace_id.clone(),
    })
}

/// An external URL: parses and has both a scheme and a host.
fn is_valid_url(s: &str) -> bool {
    Url::parse(s).is_ok_and(|u| u.has_host() && !u.scheme().is_empty())
}

/// Raw base64, or an MDN data URL (`data:<mime>;base64,<payload>`).
fn decode_inline(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let payload = match s.strip_prefix("data:").and_then(|rest| rest.split_once(',')) {
        Some((_, payload)) => payload,
        None => s,
    };
    STANDARD.decode(payload)
}

fn truncate_chars(s: &str, n: usize) -> String {
    match s.char_indices().nth(n) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

fn object_storage_json(files: &[UploadFile]) -> String {
    if files.is_empty() {
        return String::new();
    }

    let mut storage = ObjectStorage::default();
    for file in files {
        match file.upload_type {
            UploadType::LongText if file.tag_key == TAG_INPUT => {
                storage.input_tos_key.clone_from(&file.key);
            }
            UploadType::LongText if file.tag_key == TAG_OUTPUT => {
                storage.output_tos_key.clone_from(&file.key);
            }
            UploadType::LongText => {}
            UploadType::MultiModality => storage.attachments.push(Attachment {
                field: file.tag_key.clone(),
                name: file.name.clone(),
                file_type: file.file_type.as_str().to_string(),
                tos_key: file.key.clone(),
            }),
        }
    }

    serde_json::to_string(&storage).unwrap_or_default()
}

/// Tag values split by type, as the wire record wants them.
#[derive(Default)]
struct TagMaps {
    string: HashMap<String, String>,
    long: HashMap<String, i64>,
    double: HashMap<String, f64>,
    bool: HashMap<String, bool>,
}

impl TagMaps {
    /// System tags have no bool map; their bools are sent as strings.
    fn split(tags: &HashMap<String, TagValue>, system: bool) -> Self {
        let mut maps = Self::default();
        for (key, value) in tags {
            if key == TAG_INPUT || key == TAG_OUTPUT {
                continue;
            }
            match value {
                TagValue::String(v) => {
                    maps.string.insert(key.clone(), v.clone());
                }
                TagValue::Int(v) => {
                    maps.long.insert(key.clone(), *v);
                }
                TagValue::Float(v) => {
                    maps.double.insert(key.clone(), *v);
                }
                TagValue::Bool(v) if system => {
                    maps.string.insert(key.clone(), v.to_string());
                }
                TagValue::Bool(v) => {
                    maps.bool.insert(key.clone(), *v);
                }
            }
        }
        maps
    }
}
