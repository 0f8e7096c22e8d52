//! Span Uploader
//!
//! Batching and export pipeline for trace spans and the attachments derived
//! from them. Application code hands finished spans to a
//! [`BatchSpanProcessor`]; four bounded queues (span, span retry, file, file
//! retry) batch them by count, byte size and time and deliver them through an
//! [`Exporter`], by default the [`HttpExporter`].
//!
//! Submitting a span never blocks and never fails. Overflow, export failures
//! and latencies are reported out of band through finish events.
//!
//! # Native async traits
//!
//! Extension points use native async fn in traits (no `#[async_trait]`
//! macro); [`ExporterBoxed`] is the object-safe form.

pub mod backoff;
pub mod config;
pub mod content;
pub mod convert;
pub mod error;
pub mod event;
pub mod exporter;
pub mod http;
pub mod id;
pub mod model;
pub mod processor;
pub mod queue;
pub mod span;

// Re-export main types
pub use backoff::BackoffConfig;
pub use config::{HttpExporterConfig, ProcessorConfig, QueueConf, QueueOptions};
pub use content::{
    ModelChoice, ModelFileUrl, ModelImageUrl, ModelInput, ModelMessage, ModelMessagePart,
    ModelMessagePartType, ModelOutput, ModelTool, ModelToolCall, ModelToolCallFunction,
    ModelToolChoice, ModelToolFunction,
};
pub use error::{ConvertError, ExportError, PipelineError};
pub use event::{FinishEventExtra, FinishEventInfo, FinishEventProcessor, FinishEventType};
pub use exporter::{Exporter, ExporterBoxed, NullExporter};
pub use http::HttpExporter;
pub use model::{Attachment, FileType, ObjectStorage, UploadFile, UploadSpan, UploadType};
pub use processor::BatchSpanProcessor;
pub use queue::{BatchExporter, BatchQueueManager, QueueItem, QueueMetrics};
pub use span::{Span, TagValue, TAG_INPUT, TAG_OUTPUT};
