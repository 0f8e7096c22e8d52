use crate::error::ExportError;
use crate::model::{UploadFile, UploadSpan};
use std::future::Future;
use std::pin::Pin;

/// Delivers converted spans and files to the remote backend.
///
/// Uses native async fn in traits instead of `#[async_trait]`. The return
/// types are not object-safe; the processor holds an
/// `Arc<dyn ExporterBoxed>` instead, which every `Exporter` gets for free.
pub trait Exporter: Send + Sync {
    /// Sends one batch of spans. An empty batch is a successful no-op.
    fn export_spans(
        &self,
        spans: &[UploadSpan],
    ) -> impl Future<Output = Result<(), ExportError>> + Send;

    /// Uploads files one by one, stopping at the first failure. An empty
    /// batch is a successful no-op.
    fn export_files(
        &self,
        files: &[UploadFile],
    ) -> impl Future<Output = Result<(), ExportError>> + Send;

    /// Returns the exporter name for debugging.
    fn name(&self) -> &str;
}

type BoxedExport<'a> = Pin<Box<dyn Future<Output = Result<(), ExportError>> + Send + 'a>>;

/// Object-safe version of [`Exporter`] for dynamic dispatch.
pub trait ExporterBoxed: Send + Sync {
    fn export_spans_boxed<'a>(&'a self, spans: &'a [UploadSpan]) -> BoxedExport<'a>;

    fn export_files_boxed<'a>(&'a self, files: &'a [UploadFile]) -> BoxedExport<'a>;

    fn name(&self) -> &str;
}

impl<T: Exporter> ExporterBoxed for T {
    fn export_spans_boxed<'a>(&'a self, spans: &'a [UploadSpan]) -> BoxedExport<'a> {
        Box::pin(self.export_spans(spans))
    }

    fn export_files_boxed<'a>(&'a self, files: &'a [UploadFile]) -> BoxedExport<'a> {
        Box::pin(self.export_files(files))
    }

    fn name(&self) -> &str {
        Exporter::name(self)
    }
}

/// Exporter that discards everything (for benchmarking)
pub struct NullExporter;

impl Exporter for NullExporter {
    async fn export_spans(&self, _spans: &[UploadSpan]) -> Result<(), ExportError> {
        Ok(())
    }

    async fn export_files(&self, _files: &[UploadFile]) -> Result<(), ExportError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// Test exporter that records every batch and can be told to fail.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct TestExporter {
    span_batches: std::sync::Mutex<Vec<Vec<UploadSpan>>>,
    file_batches: std::sync::Mutex<Vec<Vec<UploadFile>>>,
    span_failures: std::sync::atomic::AtomicUsize,
    file_failures: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl TestExporter {
    /// The next `n` span exports fail with a retryable error.
    pub fn fail_spans(&self, n: usize) {
        self.span_failures
            .store(n, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn fail_files(&self, n: usize) {
        self.file_failures
            .store(n, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn span_batches(&self) -> Vec<Vec<UploadSpan>> {
        self.span_batches.lock().unwrap().clone()
    }

    pub fn file_batches(&self) -> Vec<Vec<UploadFile>> {
        self.file_batches.lock().unwrap().clone()
    }

    fn take_failure(counter: &std::sync::atomic::AtomicUsize) -> bool {
        use std::sync::atomic::Ordering;
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[cfg(test)]
impl Exporter for TestExporter {
    async fn export_spans(&self, spans: &[UploadSpan]) -> Result<(), ExportError> {
        if Self::take_failure(&self.span_failures) {
            return Err(ExportError::Transport("span backend down".into()));
        }
        self.span_batches.lock().unwrap().push(spans.to_vec());
        Ok(())
    }

    async fn export_files(&self, files: &[UploadFile]) -> Result<(), ExportError> {
        if Self::take_failure(&self.file_failures) {
            return Err(ExportError::Transport("file backend down".into()));
        }
        self.file_batches.lock().unwrap().push(files.to_vec());
        Ok(())
    }

    fn name(&self) -> &str {
        "test"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_boxed_dispatch() {
        let exporter: Arc<dyn ExporterBoxed> = Arc::new(NullExporter);
        assert!(exporter.export_spans_boxed(&[]).await.is_ok());
        assert!(exporter.export_files_boxed(&[]).await.is_ok());
        assert_eq!(exporter.name(), "null");
    }

    #[tokio::test]
    async fn test_exporter_failures_are_consumed() {
        let exporter = TestExporter::default();
        exporter.fail_spans(1);
        let span = UploadSpan::default();

        assert!(exporter.export_spans(std::slice::from_ref(&span)).await.is_err());
        assert!(exporter.export_spans(std::slice::from_ref(&span)).await.is_ok());
        assert_eq!(exporter.span_batches().len(), 1);

        exporter.fail_files(1);
        assert!(exporter.export_files(&[]).await.is_err());
        assert!(exporter.export_files(&[]).await.is_ok());
        assert_eq!(exporter.file_batches().len(), 1);
    }
}
