//! Batch queue manager - one bounded queue plus its batching worker.
//!
//! Producers call [`BatchQueueManager::enqueue`] from anywhere; it never
//! blocks and never fails (overflow is dropped and reported as a finish
//! event). A single worker task owns the pending batch and hands it to a
//! [`BatchExporter`] whenever one of the thresholds is reached:
//!
//! - batch length >= `max_export_batch_length`
//! - accumulated byte size >= `max_export_batch_byte_size`
//! - `batch_timeout` elapsed since the last export
//!
//! Control requests travel through the same channel as data
//! ([`QueueMessage::Flush`]), so a flush observes every item enqueued before
//! it.

use crate::config::QueueOptions;
use crate::error::PipelineError;
use crate::event::{FinishEventExtra, FinishEventInfo, FinishEventProcessor, FinishEventType};
use crate::model::UploadFile;
use crate::span::Span;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep, Instant, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Something a queue can carry.
pub trait QueueItem: Send + 'static {
    /// Event type reported for enqueue and drop of this item kind.
    const ENTRY_EVENT: FinishEventType;

    /// Root-span flag attached to entry events, for span items.
    fn is_root_span(&self) -> Option<bool> {
        None
    }
}

impl QueueItem for Arc<Span> {
    const ENTRY_EVENT: FinishEventType = FinishEventType::SpanQueueEntryRate;

    fn is_root_span(&self) -> Option<bool> {
        Some(self.is_root())
    }
}

impl QueueItem for UploadFile {
    const ENTRY_EVENT: FinishEventType = FinishEventType::FileQueueEntryRate;
}

/// Consumer of full batches. Owns the outcome: failures are routed or
/// reported by the implementation, never returned to the queue.
pub trait BatchExporter<T>: Send + Sync + 'static {
    fn export_batch(&self, batch: Vec<T>) -> impl Future<Output = ()> + Send;
}

/// Message carried by the queue channel.
enum QueueMessage<T> {
    Item(T),
    /// Drain everything, export, then acknowledge
    Flush(oneshot::Sender<()>),
}

/// Per-queue counters (atomic, shared with the worker).
///
/// `exported_batches` and `exported_items` count batches handed to the
/// exporter, successful or not. Export outcomes are reported through the
/// finish events.
#[derive(Debug, Default)]
pub struct QueueMetrics {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    exported_batches: AtomicU64,
    exported_items: AtomicU64,
}

impl QueueMetrics {
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn exported_batches(&self) -> u64 {
        self.exported_batches.load(Ordering::Relaxed)
    }

    pub fn exported_items(&self) -> u64 {
        self.exported_items.load(Ordering::Relaxed)
    }

    fn record_export(&self, items: usize) {
        self.exported_batches.fetch_add(1, Ordering::Relaxed);
        self.exported_items.fetch_add(items as u64, Ordering::Relaxed);
    }
}

/// Handle to one batching queue. Cheap to share behind an `Arc`.
pub struct BatchQueueManager<T> {
    name: &'static str,
    tx: mpsc::Sender<QueueMessage<T>>,
    /// Bytes enqueued since the last export; reset by the worker
    batch_bytes: Arc<AtomicUsize>,
    stopped: AtomicBool,
    stop: CancellationToken,
    done: watch::Receiver<bool>,
    metrics: Arc<QueueMetrics>,
    events: FinishEventProcessor,
}

impl<T: QueueItem> BatchQueueManager<T> {
    /// Creates the queue and spawns its worker.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<E>(options: QueueOptions, exporter: E, events: FinishEventProcessor) -> Self
    where
        E: BatchExporter<T>,
    {
        let (tx, rx) = mpsc::channel(options.max_queue_length.max(1));
        let (done_tx, done) = watch::channel(false);
        let batch_bytes = Arc::new(AtomicUsize::new(0));
        let metrics = Arc::new(QueueMetrics::default());
        let stop = CancellationToken::new();

        let worker = Worker {
            timer: Box::pin(sleep(options.batch_timeout)),
            options: options.clone(),
            rx,
            exporter,
            batch: Vec::new(),
            batch_bytes: Arc::clone(&batch_bytes),
            metrics: Arc::clone(&metrics),
        };
        tokio::spawn(worker.run(stop.clone(), done_tx));

        Self {
            name: options.name,
            tx,
            batch_bytes,
            stopped: AtomicBool::new(false),
            stop,
            done,
            metrics,
            events,
        }
    }

    /// Offers an item without blocking. A full queue drops it; a stopped
    /// queue ignores it. If the worker exited without a shutdown the item is
    /// counted as dropped.
    pub fn enqueue(&self, item: T, byte_size: usize) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }

        let is_root_span = item.is_root_span();
        let (is_event_fail, detail_msg) = match self.tx.try_send(QueueMessage::Item(item)) {
            Ok(()) => {
                self.batch_bytes.fetch_add(byte_size, Ordering::Relaxed);
                self.metrics.enqueued.fetch_add(1, Ordering::Relaxed);
                let len = self.tx.max_capacity() - self.tx.capacity();
                (false, format!("{} enqueue, queue length: {len}", self.name))
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
                (true, format!("{} queue is full, dropped item", self.name))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                if self.stopped.load(Ordering::Acquire) {
                    return;
                }
                self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
                (true, format!("{} queue worker stopped, dropped item", self.name))
            }
        };

        (self.events)(&FinishEventInfo {
            event_type: T::ENTRY_EVENT,
            is_event_fail,
            item_num: 1,
            detail_msg,
            extra: is_root_span.map(|is_root_span| FinishEventExtra {
                is_root_span,
                latency_ms: 0,
            }),
        });
    }

    /// Waits until every item enqueued before this call has been exported.
    ///
    /// Items enqueued concurrently with the flush may or may not be
    /// included. A stopped queue returns immediately.
    pub async fn force_flush(&self, cancel: &CancellationToken) -> Result<(), PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        if self.stopped.load(Ordering::Acquire) {
            return Ok(());
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        tokio::select! {
            res = self.tx.send(QueueMessage::Flush(ack_tx)) => {
                if res.is_err() {
                    return self.gone();
                }
            }
            () = cancel.cancelled() => return Err(PipelineError::Cancelled),
        }

        tokio::select! {
            res = ack_rx => match res {
                Ok(()) => Ok(()),
                Err(_) => self.gone(),
            },
            () = cancel.cancelled() => Err(PipelineError::Cancelled),
        }
    }

    /// Stops accepting items, drains what is queued and waits for the worker
    /// to exit. Only the first call stops the worker; every caller waits for
    /// it to finish or for its own token.
    pub async fn shutdown(&self, cancel: &CancellationToken) -> Result<(), PipelineError> {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            debug!(queue = self.name, "shutting down");
            self.stop.cancel();
        }

        let mut done = self.done.clone();
        tokio::select! {
            res = done.wait_for(|finished| *finished) => {
                res.map(|_| ()).map_err(|_| PipelineError::WorkerStopped)
            }
            () = cancel.cancelled() => Err(PipelineError::Cancelled),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn metrics(&self) -> &QueueMetrics {
        &self.metrics
    }

    /// The worker dropped its end. Fine during shutdown, an error otherwise.
    fn gone(&self) -> Result<(), PipelineError> {
        if self.stopped.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(PipelineError::WorkerStopped)
        }
    }
}

/// Owns the pending batch. Only this task mutates it.
struct Worker<T, E> {
    options: QueueOptions,
    rx: mpsc::Receiver<QueueMessage<T>>,
    exporter: E,
    batch: Vec<T>,
    batch_bytes: Arc<AtomicUsize>,
    metrics: Arc<QueueMetrics>,
    timer: Pin<Box<Sleep>>,
}

impl<T: QueueItem, E: BatchExporter<T>> Worker<T, E> {
    async fn run(mut self, stop: CancellationToken, done: watch::Sender<bool>) {
        loop {
            tokio::select! {
                biased;
                () = stop.cancelled() => break,
                () = &mut self.timer => {
                    if !self.batch.is_empty() {
                        debug!(
                            queue = self.options.name,
                            batch_len = self.batch.len(),
                            queue_len = self.rx.len(),
                            "time out"
                        );
                    }
                    self.export().await;
                }
                msg = self.rx.recv() => match msg {
                    Some(QueueMessage::Item(item)) => {
                        self.batch.push(item);
                        if self.should_export() {
                            debug!(
                                queue = self.options.name,
                                batch_len = self.batch.len(),
                                queue_len = self.rx.len(),
                                "batch out"
                            );
                            self.export().await;
                        }
                    }
                    Some(QueueMessage::Flush(ack)) => {
                        self.drain().await;
                        let _ = ack.send(());
                    }
                    None => break,
                },
            }
        }

        // late senders now see `Closed`; buffered messages stay readable
        self.rx.close();
        self.drain().await;
        let _ = done.send(true);
        debug!(queue = self.options.name, "worker stopped");
    }

    fn should_export(&self) -> bool {
        self.batch.len() >= self.options.max_export_batch_length
            || self.batch_bytes.load(Ordering::Relaxed) >= self.options.max_export_batch_byte_size
    }

    /// Empties the channel without waiting, exporting each full batch and
    /// whatever remains at the end. Flush requests found on the way are
    /// acknowledged after the final export.
    async fn drain(&mut self) {
        let mut acks = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(QueueMessage::Item(item)) => {
                    self.batch.push(item);
                    if self.batch.len() >= self.options.max_export_batch_length {
                        self.export().await;
                    }
                }
                Ok(QueueMessage::Flush(ack)) => acks.push(ack),
                Err(_) => break,
            }
        }
        self.export().await;
        for ack in acks {
            let _ = ack.send(());
        }
    }

    async fn export(&mut self) {
        let deadline = Instant::now() + self.options.batch_timeout;
        self.timer.as_mut().reset(deadline);
        if self.batch.is_empty() {
            return;
        }

        let batch = std::mem::take(&mut self.batch);
        self.batch_bytes.store(0, Ordering::Relaxed);
        self.metrics.record_export(batch.len());
        self.exporter.export_batch(batch).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventLog;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::{Notify, Semaphore};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Item(u32);

    impl QueueItem for Item {
        const ENTRY_EVENT: FinishEventType = FinishEventType::FileQueueEntryRate;
    }

    /// Records batches; optionally blocks each export until a permit is added.
    #[derive(Clone, Default)]
    struct Recorder {
        batches: Arc<Mutex<Vec<Vec<u32>>>>,
        exported: Arc<Notify>,
        entered: Arc<Notify>,
        gate: Option<Arc<Semaphore>>,
    }

    impl Recorder {
        fn gated() -> (Self, Arc<Semaphore>) {
            let gate = Arc::new(Semaphore::new(0));
            let recorder = Self {
                gate: Some(Arc::clone(&gate)),
                ..Self::default()
            };
            (recorder, gate)
        }

        fn batches(&self) -> Vec<Vec<u32>> {
            self.batches.lock().unwrap().clone()
        }

        fn items(&self) -> Vec<u32> {
            self.batches().into_iter().flatten().collect()
        }

        async fn wait_export(&self) {
            tokio::time::timeout(Duration::from_secs(5), self.exported.notified())
                .await
                .expect("no export within timeout");
        }

        async fn wait_entered(&self) {
            tokio::time::timeout(Duration::from_secs(5), self.entered.notified())
                .await
                .expect("exporter never entered");
        }
    }

    impl BatchExporter<Item> for Recorder {
        async fn export_batch(&self, batch: Vec<Item>) {
            self.entered.notify_one();
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            self.batches
                .lock()
                .unwrap()
                .push(batch.into_iter().map(|i| i.0).collect());
            self.exported.notify_one();
        }
    }

    fn options(queue_len: usize, batch_len: usize) -> QueueOptions {
        QueueOptions::file()
            .with_max_queue_length(queue_len)
            .with_max_export_batch_length(batch_len)
            .with_batch_timeout(Duration::from_secs(3600))
    }

    fn quiet() -> FinishEventProcessor {
        Arc::new(|_: &FinishEventInfo| {})
    }

    #[tokio::test]
    async fn test_every_item_exported_once() {
        let recorder = Recorder::default();
        let queue = BatchQueueManager::new(options(128, 10), recorder.clone(), quiet());

        for i in 0..95 {
            queue.enqueue(Item(i), 1);
        }
        queue.force_flush(&CancellationToken::new()).await.unwrap();

        assert_eq!(recorder.items(), (0..95).collect::<Vec<_>>());
        assert!(recorder.batches().iter().all(|b| b.len() <= 10));
        assert_eq!(queue.metrics().enqueued(), 95);
        assert_eq!(queue.metrics().exported_items(), 95);
        assert_eq!(queue.metrics().dropped(), 0);
    }

    #[tokio::test]
    async fn test_overflow_drops_exact_excess() {
        let (recorder, gate) = Recorder::gated();
        let log = Arc::new(EventLog::default());
        let queue = BatchQueueManager::new(options(4, 1), recorder.clone(), log.processor());

        // worker takes the first item and blocks inside the exporter
        queue.enqueue(Item(0), 1);
        recorder.wait_entered().await;

        for i in 1..=7 {
            queue.enqueue(Item(i), 1);
        }
        assert_eq!(queue.metrics().dropped(), 3);

        let drops: Vec<_> = log
            .of_type(FinishEventType::FileQueueEntryRate)
            .into_iter()
            .filter(|e| e.is_event_fail)
            .collect();
        assert_eq!(drops.len(), 3);
        assert_eq!(drops[0].detail_msg, "file queue is full, dropped item");

        gate.add_permits(100);
        queue.force_flush(&CancellationToken::new()).await.unwrap();
        assert_eq!(recorder.items(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_count_threshold_triggers_export() {
        let recorder = Recorder::default();
        let queue = BatchQueueManager::new(options(64, 5), recorder.clone(), quiet());

        for i in 0..4 {
            queue.enqueue(Item(i), 1);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(recorder.batches().is_empty());

        queue.enqueue(Item(4), 1);
        recorder.wait_export().await;
        assert_eq!(recorder.batches(), vec![vec![0, 1, 2, 3, 4]]);
    }

    #[tokio::test]
    async fn test_byte_threshold_triggers_export() {
        let recorder = Recorder::default();
        let queue = BatchQueueManager::new(
            options(64, 100).with_max_export_batch_byte_size(1000),
            recorder.clone(),
            quiet(),
        );

        queue.enqueue(Item(0), 600);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(recorder.batches().is_empty());

        queue.enqueue(Item(1), 600);
        recorder.wait_export().await;
        assert_eq!(recorder.batches(), vec![vec![0, 1]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_triggers_export() {
        let recorder = Recorder::default();
        let queue = BatchQueueManager::new(
            options(64, 100).with_batch_timeout(Duration::from_secs(1)),
            recorder.clone(),
            quiet(),
        );

        for i in 0..3 {
            queue.enqueue(Item(i), 1);
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(recorder.batches().is_empty());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(recorder.batches(), vec![vec![0, 1, 2]]);
    }

    #[tokio::test]
    async fn test_flush_of_empty_queue_exports_nothing() {
        let recorder = Recorder::default();
        let queue = BatchQueueManager::new(options(8, 2), recorder.clone(), quiet());

        queue.force_flush(&CancellationToken::new()).await.unwrap();
        assert!(recorder.batches().is_empty());
        assert_eq!(queue.metrics().exported_batches(), 0);
    }

    #[tokio::test]
    async fn test_flush_exports_partial_batch() {
        let recorder = Recorder::default();
        let queue = BatchQueueManager::new(options(8, 100), recorder.clone(), quiet());

        for i in 0..3 {
            queue.enqueue(Item(i), 1);
        }
        queue.force_flush(&CancellationToken::new()).await.unwrap();
        assert_eq!(recorder.batches(), vec![vec![0, 1, 2]]);
    }

    #[tokio::test]
    async fn test_concurrent_shutdown_is_idempotent() {
        let recorder = Recorder::default();
        let queue = Arc::new(BatchQueueManager::new(options(8, 100), recorder.clone(), quiet()));
        queue.enqueue(Item(1), 1);

        let cancel = CancellationToken::new();
        let (a, b) = tokio::join!(queue.shutdown(&cancel), queue.shutdown(&cancel));
        assert_eq!(a, Ok(()));
        assert_eq!(b, Ok(()));
        assert_eq!(recorder.items(), vec![1]);

        queue.enqueue(Item(2), 1);
        queue.force_flush(&cancel).await.unwrap();
        assert_eq!(recorder.items(), vec![1]);
        assert_eq!(queue.metrics().enqueued(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_shutdown_returns_promptly() {
        let (recorder, gate) = Recorder::gated();
        let queue = BatchQueueManager::new(options(8, 1), recorder.clone(), quiet());
        queue.enqueue(Item(0), 1);
        recorder.wait_entered().await;

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        assert_eq!(queue.shutdown(&cancel).await, Err(PipelineError::Cancelled));

        gate.add_permits(10);
        assert_eq!(queue.shutdown(&CancellationToken::new()).await, Ok(()));
        assert_eq!(recorder.items(), vec![0]);
    }

    #[tokio::test]
    async fn test_flush_with_cancelled_token() {
        let queue = BatchQueueManager::new(options(8, 1), Recorder::default(), quiet());
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(queue.force_flush(&cancel).await, Err(PipelineError::Cancelled));
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_flush() {
        let (recorder, gate) = Recorder::gated();
        let queue = BatchQueueManager::new(options(8, 1), recorder.clone(), quiet());
        queue.enqueue(Item(0), 1);
        recorder.wait_entered().await;

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        assert_eq!(queue.force_flush(&cancel).await, Err(PipelineError::Cancelled));

        gate.add_permits(10);
        assert_eq!(queue.force_flush(&CancellationToken::new()).await, Ok(()));
        assert_eq!(recorder.items(), vec![0]);
    }

    #[tokio::test]
    async fn test_item_after_worker_stop_is_dropped() {
        let (recorder, gate) = Recorder::gated();
        let log = Arc::new(EventLog::default());
        let queue = BatchQueueManager::new(options(8, 1), recorder.clone(), log.processor());

        queue.enqueue(Item(0), 1);
        recorder.wait_entered().await;
        queue.enqueue(Item(1), 1);

        // stop the worker without marking the handle stopped
        queue.stop.cancel();
        gate.add_permits(1);
        // worker is now exporting Item(1) from its final drain
        recorder.wait_entered().await;

        queue.enqueue(Item(2), 1);
        assert_eq!(queue.metrics().enqueued(), 2);
        assert_eq!(queue.metrics().dropped(), 1);

        let drops: Vec<_> = log
            .of_type(FinishEventType::FileQueueEntryRate)
            .into_iter()
            .filter(|e| e.is_event_fail)
            .collect();
        assert_eq!(drops.len(), 1);
        assert_eq!(drops[0].detail_msg, "file queue worker stopped, dropped item");

        gate.add_permits(10);
        let mut done = queue.done.clone();
        tokio::time::timeout(Duration::from_secs(5), done.wait_for(|d| *d))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(recorder.items(), vec![0, 1]);
    }

    struct Crashing;

    impl BatchExporter<Item> for Crashing {
        async fn export_batch(&self, _batch: Vec<Item>) {
            panic!("exporter crashed");
        }
    }

    #[tokio::test]
    async fn test_crashed_worker_reports_drops() {
        let queue = BatchQueueManager::new(options(8, 1), Crashing, quiet());
        queue.enqueue(Item(0), 1);

        assert_eq!(
            queue.force_flush(&CancellationToken::new()).await,
            Err(PipelineError::WorkerStopped)
        );

        queue.enqueue(Item(1), 1);
        assert_eq!(queue.metrics().enqueued(), 1);
        assert_eq!(queue.metrics().dropped(), 1);
    }
}
