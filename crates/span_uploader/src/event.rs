//! Finish events: observational records of enqueue, drop and export outcomes.
//!
//! Nothing in the pipeline reacts to these; they exist so the embedding
//! application can feed its own metrics.

use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Kind of a finish event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FinishEventType {
    /// An item was offered to a span queue (primary or retry)
    SpanQueueEntryRate,
    /// An item was offered to a file queue (primary or retry)
    FileQueueEntryRate,
    /// A span batch export attempt finished
    FlushSpanRate,
    /// A file batch export attempt finished
    FlushFileRate,
}

impl FinishEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SpanQueueEntryRate => "queue_manager.span_entry.rate",
            Self::FileQueueEntryRate => "queue_manager.file_entry.rate",
            Self::FlushSpanRate => "exporter.span_flush.rate",
            Self::FlushFileRate => "exporter.file_flush.rate",
        }
    }
}

impl fmt::Display for FinishEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional fields attached to some events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinishEventExtra {
    /// Set on span-queue entry events
    pub is_root_span: bool,
    /// Set on export events
    pub latency_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishEventInfo {
    pub event_type: FinishEventType,
    pub is_event_fail: bool,
    /// One event may cover a whole batch
    pub item_num: usize,
    pub detail_msg: String,
    pub extra: Option<FinishEventExtra>,
}

/// Callback receiving every finish event. Must not block.
pub type FinishEventProcessor = Arc<dyn Fn(&FinishEventInfo) + Send + Sync>;

/// Built-in processor: logs failures at `warn`, everything else at `debug`.
pub fn log_finish_event(info: &FinishEventInfo) {
    if info.is_event_fail {
        warn!(
            event = %info.event_type,
            items = info.item_num,
            detail = %info.detail_msg,
            "finish event failed"
        );
    } else {
        debug!(
            event = %info.event_type,
            items = info.item_num,
            detail = %info.detail_msg,
            "finish event"
        );
    }
}

/// The built-in logger, followed by the user's processor when one is given.
pub fn compose(user: Option<FinishEventProcessor>) -> FinishEventProcessor {
    match user {
        Some(user) => Arc::new(move |info: &FinishEventInfo| {
            log_finish_event(info);
            user(info);
        }),
        None => Arc::new(log_finish_event),
    }
}

/// Collects events in memory, for tests.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct EventLog {
    events: std::sync::Mutex<Vec<FinishEventInfo>>,
}

#[cfg(test)]
impl EventLog {
    pub(crate) fn processor(self: &Arc<Self>) -> FinishEventProcessor {
        let log = Arc::clone(self);
        Arc::new(move |info: &FinishEventInfo| log.events.lock().unwrap().push(info.clone()))
    }

    pub(crate) fn of_type(&self, event_type: FinishEventType) -> Vec<FinishEventInfo> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_event_names() {
        assert_eq!(
            FinishEventType::SpanQueueEntryRate.to_string(),
            "queue_manager.span_entry.rate"
        );
        assert_eq!(FinishEventType::FlushFileRate.as_str(), "exporter.file_flush.rate");
    }

    #[test]
    fn test_compose_calls_user_processor() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        let processor = compose(Some(Arc::new(move |info: &FinishEventInfo| {
            seen_clone.fetch_add(info.item_num, Ordering::SeqCst);
        })));

        processor(&FinishEventInfo {
            event_type: FinishEventType::FlushSpanRate,
            is_event_fail: false,
            item_num: 7,
            detail_msg: String::new(),
            extra: None,
        });

        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }
}
