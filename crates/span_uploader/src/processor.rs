//! The four-queue span pipeline.
//!
//! ```text
//! on_span_end ──> span ──fail──> span_retry ──fail──> (dropped)
//!                  │                 │
//!                  └──ok: files──────┴──> file ──fail──> file_retry ──fail──> (dropped)
//! ```
//!
//! Each export attempt emits one finish event with its latency. A retry
//! queue never feeds a further queue: its failures are terminal.

use crate::config::{ProcessorConfig, QueueOptions};
use crate::convert::{self, ConvertOptions};
use crate::error::PipelineError;
use crate::event::{self, FinishEventExtra, FinishEventInfo, FinishEventProcessor, FinishEventType};
use crate::exporter::ExporterBoxed;
use crate::model::UploadFile;
use crate::queue::{BatchExporter, BatchQueueManager, QueueMetrics};
use crate::span::Span;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

type SpanQueue = Arc<BatchQueueManager<Arc<Span>>>;
type FileQueue = Arc<BatchQueueManager<UploadFile>>;

/// Entry point of the pipeline. Create one per process and pass it around.
pub struct BatchSpanProcessor {
    span_queue: SpanQueue,
    span_retry_queue: SpanQueue,
    file_queue: FileQueue,
    file_retry_queue: FileQueue,
    stopped: AtomicBool,
}

impl BatchSpanProcessor {
    /// Builds the queues and spawns their workers.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(exporter: Arc<dyn ExporterBoxed>, config: ProcessorConfig) -> Self {
        let events = event::compose(config.finish_event_processor);
        let convert = ConvertOptions {
            ultra_large_report: config.ultra_large_report,
        };

        // Built back to front: each queue needs the ones it routes into
        let file_retry_queue = Arc::new(BatchQueueManager::new(
            QueueOptions::file_retry(),
            FileBatchExport {
                exporter: Arc::clone(&exporter),
                retry: None,
                events: Arc::clone(&events),
            },
            Arc::clone(&events),
        ));
        let file_queue = Arc::new(BatchQueueManager::new(
            QueueOptions::file(),
            FileBatchExport {
                exporter: Arc::clone(&exporter),
                retry: Some(Arc::clone(&file_retry_queue)),
                events: Arc::clone(&events),
            },
            Arc::clone(&events),
        ));
        let span_retry_queue = Arc::new(BatchQueueManager::new(
            QueueOptions::span_retry(),
            SpanBatchExport {
                exporter: Arc::clone(&exporter),
                retry: None,
                files: Arc::clone(&file_queue),
                events: Arc::clone(&events),
                convert,
            },
            Arc::clone(&events),
        ));
        let span_queue = Arc::new(BatchQueueManager::new(
            QueueOptions::span(&config.queue_conf),
            SpanBatchExport {
                exporter,
                retry: Some(Arc::clone(&span_retry_queue)),
                files: Arc::clone(&file_queue),
                events: Arc::clone(&events),
                convert,
            },
            events,
        ));

        Self {
            span_queue,
            span_retry_queue,
            file_queue,
            file_retry_queue,
            stopped: AtomicBool::new(false),
        }
    }

    /// Submits a finished span. Never blocks; failures only show up as
    /// finish events.
    pub fn on_span_end(&self, span: impl Into<Arc<Span>>) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        let span = span.into();
        let byte_size = span.byte_size();
        self.span_queue.enqueue(span, byte_size);
    }

    /// Waits until everything queued so far has been exported, including
    /// retries and files derived from it.
    ///
    /// Every queue is flushed even if an earlier one fails; the first error
    /// is returned.
    pub async fn force_flush(&self, cancel: &CancellationToken) -> Result<(), PipelineError> {
        [
            self.span_queue.force_flush(cancel).await,
            self.span_retry_queue.force_flush(cancel).await,
            self.file_queue.force_flush(cancel).await,
            self.file_retry_queue.force_flush(cancel).await,
        ]
        .into_iter()
        .collect()
    }

    /// Stops accepting spans and shuts every queue down in pipeline order,
    /// so items routed downstream during the drain are still delivered.
    pub async fn shutdown(&self, cancel: &CancellationToken) -> Result<(), PipelineError> {
        self.stopped.store(true, Ordering::Release);
        [
            self.span_queue.shutdown(cancel).await,
            self.span_retry_queue.shutdown(cancel).await,
            self.file_queue.shutdown(cancel).await,
            self.file_retry_queue.shutdown(cancel).await,
        ]
        .into_iter()
        .collect()
    }

    /// Counters of every queue, in pipeline order.
    pub fn queue_metrics(&self) -> [(&'static str, &QueueMetrics); 4] {
        [
            (self.span_queue.name(), self.span_queue.metrics()),
            (self.span_retry_queue.name(), self.span_retry_queue.metrics()),
            (self.file_queue.name(), self.file_queue.metrics()),
            (self.file_retry_queue.name(), self.file_retry_queue.metrics()),
        ]
    }
}

/// Export step of the span and span-retry queues.
struct SpanBatchExport {
    exporter: Arc<dyn ExporterBoxed>,
    /// `None` for the retry queue itself
    retry: Option<SpanQueue>,
    files: FileQueue,
    events: FinishEventProcessor,
    convert: ConvertOptions,
}

impl BatchExporter<Arc<Span>> for SpanBatchExport {
    async fn export_batch(&self, batch: Vec<Arc<Span>>) {
        let (upload_spans, upload_files) = convert::to_upload(&batch, self.convert);

        let started = Instant::now();
        let result = self.exporter.export_spans_boxed(&upload_spans).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let detail_msg = match result {
            Ok(()) => {
                for file in upload_files {
                    let size = file.data.len();
                    self.files.enqueue(file, size);
                }
                None
            }
            Err(e) => Some(match &self.retry {
                Some(retry) => {
                    for span in batch {
                        let size = span.byte_size();
                        retry.enqueue(span, size);
                    }
                    format!("{e}, retry later")
                }
                None => format!("{e}, retry second time failed"),
            }),
        };

        (self.events)(&FinishEventInfo {
            event_type: FinishEventType::FlushSpanRate,
            is_event_fail: detail_msg.is_some(),
            item_num: upload_spans.len(),
            detail_msg: detail_msg.unwrap_or_default(),
            extra: Some(FinishEventExtra {
                is_root_span: false,
                latency_ms,
            }),
        });
    }
}

/// Export step of the file and file-retry queues.
struct FileBatchExport {
    exporter: Arc<dyn ExporterBoxed>,
    retry: Option<FileQueue>,
    events: FinishEventProcessor,
}

impl BatchExporter<UploadFile> for FileBatchExport {
    async fn export_batch(&self, batch: Vec<UploadFile>) {
        let started = Instant::now();
        let result = self.exporter.export_files_boxed(&batch).await;
        let latency_ms = started.elapsed().as_millis() as u64;
        let item_num = batch.len();

        let detail_msg = result.err().map(|e| match &self.retry {
            Some(retry) => {
                for file in batch {
                    let size = file.data.len();
                    retry.enqueue(file, size);
                }
                format!("{e}, retry later")
            }
            None => format!("{e}, retry second time failed"),
        });

        (self.events)(&FinishEventInfo {
            event_type: FinishEventType::FlushFileRate,
            is_event_fail: detail_msg.is_some(),
            item_num,
            detail_msg: detail_msg.unwrap_or_default(),
            extra: Some(FinishEventExtra {
                is_root_span: false,
                latency_ms,
            }),
        });
    }
}
