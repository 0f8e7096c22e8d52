//! Queue, processor and transport configuration.

use crate::backoff::BackoffConfig;
use crate::event::FinishEventProcessor;
use std::env;
use std::fmt;
use std::time::Duration;

pub const QUEUE_NAME_SPAN: &str = "span";
pub const QUEUE_NAME_SPAN_RETRY: &str = "span_retry";
pub const QUEUE_NAME_FILE: &str = "file";
pub const QUEUE_NAME_FILE_RETRY: &str = "file_retry";

pub const DEFAULT_MAX_QUEUE_LENGTH: usize = 1024;
pub const DEFAULT_MAX_RETRY_QUEUE_LENGTH: usize = 512;
pub const DEFAULT_MAX_EXPORT_BATCH_LENGTH: usize = 100;
pub const DEFAULT_MAX_EXPORT_BATCH_BYTE_SIZE: usize = 4 * 1024 * 1024;
pub const MAX_RETRY_EXPORT_BATCH_LENGTH: usize = 50;
pub const DEFAULT_SCHEDULE_DELAY: Duration = Duration::from_millis(1000);

pub const MAX_FILE_QUEUE_LENGTH: usize = 512;
pub const MAX_FILE_EXPORT_BATCH_LENGTH: usize = 1;
pub const MAX_FILE_EXPORT_BATCH_BYTE_SIZE: usize = 100 * 1024 * 1024;
pub const FILE_SCHEDULE_DELAY: Duration = Duration::from_millis(5000);

pub const DEFAULT_BASE_URL: &str = "https://api.coze.cn";
pub const DEFAULT_SPAN_UPLOAD_PATH: &str = "/v1/loop/traces/ingest";
pub const DEFAULT_FILE_UPLOAD_PATH: &str = "/v1/loop/files/upload";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Thresholds of a single batch queue. Fixed at construction.
#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// Queue name used in logs and finish-event details
    pub name: &'static str,
    /// Channel capacity; enqueues beyond it are dropped
    pub max_queue_length: usize,
    /// Export as soon as the batch holds this many items
    pub max_export_batch_length: usize,
    /// Export as soon as the accumulated byte size reaches this
    pub max_export_batch_byte_size: usize,
    /// Export whatever is pending after this long without an export
    pub batch_timeout: Duration,
}

impl QueueOptions {
    /// Primary span queue, with optional overrides from [`QueueConf`].
    pub fn span(conf: &QueueConf) -> Self {
        Self {
            name: QUEUE_NAME_SPAN,
            max_queue_length: conf
                .span_queue_length
                .filter(|&n| n > 0)
                .unwrap_or(DEFAULT_MAX_QUEUE_LENGTH),
            max_export_batch_length: conf
                .span_max_export_batch_length
                .filter(|&n| n > 0)
                .unwrap_or(DEFAULT_MAX_EXPORT_BATCH_LENGTH),
            max_export_batch_byte_size: DEFAULT_MAX_EXPORT_BATCH_BYTE_SIZE,
            batch_timeout: DEFAULT_SCHEDULE_DELAY,
        }
    }

    pub fn span_retry() -> Self {
        Self {
            name: QUEUE_NAME_SPAN_RETRY,
            max_queue_length: DEFAULT_MAX_RETRY_QUEUE_LENGTH,
            max_export_batch_length: MAX_RETRY_EXPORT_BATCH_LENGTH,
            max_export_batch_byte_size: DEFAULT_MAX_EXPORT_BATCH_BYTE_SIZE,
            batch_timeout: DEFAULT_SCHEDULE_DELAY,
        }
    }

    /// File queue: one file per export.
    pub fn file() -> Self {
        Self {
            name: QUEUE_NAME_FILE,
            max_queue_length: MAX_FILE_QUEUE_LENGTH,
            max_export_batch_length: MAX_FILE_EXPORT_BATCH_LENGTH,
            max_export_batch_byte_size: MAX_FILE_EXPORT_BATCH_BYTE_SIZE,
            batch_timeout: FILE_SCHEDULE_DELAY,
        }
    }

    pub fn file_retry() -> Self {
        Self {
            name: QUEUE_NAME_FILE_RETRY,
            ..Self::file()
        }
    }

    /// Sets the channel capacity.
    pub fn with_max_queue_length(mut self, n: usize) -> Self {
        self.max_queue_length = n;
        self
    }

    /// Sets the batch length threshold.
    pub fn with_max_export_batch_length(mut self, n: usize) -> Self {
        self.max_export_batch_length = n;
        self
    }

    /// Sets the batch byte-size threshold.
    pub fn with_max_export_batch_byte_size(mut self, n: usize) -> Self {
        self.max_export_batch_byte_size = n;
        self
    }

    /// Sets the batch timeout.
    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }
}

/// Overrides for the primary span queue. `None` or zero keeps the default.
#[derive(Debug, Clone, Default)]
pub struct QueueConf {
    pub span_queue_length: Option<usize>,
    pub span_max_export_batch_length: Option<usize>,
}

/// Configuration of a [`BatchSpanProcessor`](crate::processor::BatchSpanProcessor).
#[derive(Clone, Default)]
pub struct ProcessorConfig {
    /// Upload oversized text and inline attachments as files. When off,
    /// oversized values are truncated and nothing is uploaded.
    pub ultra_large_report: bool,
    /// Span queue overrides
    pub queue_conf: QueueConf,
    /// Called after the built-in logging processor for every finish event
    pub finish_event_processor: Option<FinishEventProcessor>,
}

impl fmt::Debug for ProcessorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorConfig")
            .field("ultra_large_report", &self.ultra_large_report)
            .field("queue_conf", &self.queue_conf)
            .field(
                "finish_event_processor",
                &self.finish_event_processor.as_ref().map(|_| "<fn>"),
            )
            .finish()
    }
}

impl ProcessorConfig {
    pub fn with_ultra_large_report(mut self, enable: bool) -> Self {
        self.ultra_large_report = enable;
        self
    }

    pub fn with_queue_conf(mut self, conf: QueueConf) -> Self {
        self.queue_conf = conf;
        self
    }

    pub fn with_finish_event_processor(mut self, processor: FinishEventProcessor) -> Self {
        self.finish_event_processor = Some(processor);
        self
    }
}

/// Configuration of the HTTP exporter.
#[derive(Debug, Clone)]
pub struct HttpExporterConfig {
    /// Backend base URL, without trailing slash
    pub base_url: String,
    /// Bearer token sent on every request
    pub api_token: Option<String>,
    pub span_upload_path: String,
    pub file_upload_path: String,
    /// Timeout for span ingestion requests
    pub timeout: Duration,
    /// Timeout for file uploads
    pub upload_timeout: Duration,
    /// Request-level retry policy
    pub retry: BackoffConfig,
}

impl Default for HttpExporterConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_token: None,
            span_upload_path: DEFAULT_SPAN_UPLOAD_PATH.to_string(),
            file_upload_path: DEFAULT_FILE_UPLOAD_PATH.to_string(),
            timeout: DEFAULT_TIMEOUT,
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
            retry: BackoffConfig::default(),
        }
    }
}

impl HttpExporterConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `SPAN_UPLOADER_API_BASE_URL`: backend base URL (default: https://api.coze.cn)
    /// - `SPAN_UPLOADER_API_TOKEN`: bearer token
    /// - `SPAN_UPLOADER_SPAN_UPLOAD_PATH`: span ingestion path override
    /// - `SPAN_UPLOADER_FILE_UPLOAD_PATH`: file upload path override
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(url) = non_empty_var("SPAN_UPLOADER_API_BASE_URL") {
            config.base_url = url;
        }
        config.api_token = non_empty_var("SPAN_UPLOADER_API_TOKEN");
        if let Some(path) = non_empty_var("SPAN_UPLOADER_SPAN_UPLOAD_PATH") {
            config.span_upload_path = path;
        }
        if let Some(path) = non_empty_var("SPAN_UPLOADER_FILE_UPLOAD_PATH") {
            config.file_upload_path = path;
        }
        config.normalized()
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self.normalized()
    }

    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn with_retry(mut self, retry: BackoffConfig) -> Self {
        self.retry = retry;
        self
    }

    fn normalized(mut self) -> Self {
        self.base_url = self.base_url.trim().trim_end_matches('/').to_string();
        self
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
