use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tokio::sync::oneshot;

use crate::error::LoadError;
use crate::log_for;
use crate::types::{AssetId, BatchId, BatchOutcome, BatchProgress, LoadOptions, ProgressCallback};

pub type BatchReply = oneshot::Sender<Result<BatchOutcome, LoadError>>;

/// Trim, drop blanks, and dedup while keeping first-seen order.
pub fn normalize_tags<S: AsRef<str>>(tags: &[S]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.as_ref().trim();
        if !tag.is_empty() && !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    out
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// One `load_by_tags` request.
pub struct Batch {
    pub id: BatchId,
    pub tags: Vec<String>,
    pub priority: i32,
    pub total: usize,
    pub loaded: usize,
    pub error: Option<LoadError>,
    pub cancelled: bool,
    pub phase: Option<String>,
    reply: Option<BatchReply>,
    on_progress: Option<ProgressCallback>,
}

impl Batch {
    pub fn new(id: BatchId, tags: Vec<String>, options: LoadOptions, reply: BatchReply) -> Self {
        Self {
            id,
            tags,
            priority: options.priority,
            total: 0,
            loaded: 0,
            error: None,
            cancelled: false,
            phase: options.phase,
            reply: Some(reply),
            on_progress: options.on_progress,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.loaded >= self.total
    }

    /// Count one finished asset. The first failure sticks.
    pub fn record(&mut self, asset: AssetId, failure: Option<&str>) {
        self.loaded += 1;
        if let (None, Some(message)) = (&self.error, failure) {
            self.error = Some(LoadError::AssetFailed {
                asset,
                message: message.to_string(),
            });
        }
    }

    pub fn progress(&self) -> BatchProgress {
        BatchProgress {
            id: self.id,
            loaded: self.loaded,
            total: self.total,
            tags: self.tags.clone(),
            phase: self.phase.clone(),
        }
    }

    /// Invoke the caller's progress callback, if any.
    ///
    /// The callback runs on the scheduler task, so a panic is caught and logged
    /// instead of taking every other batch down with it.
    pub fn notify(&self, progress: &BatchProgress) {
        let Some(callback) = &self.on_progress else {
            return;
        };
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(progress))) {
            log_for!(
                Warn,
                self.id,
                "progress callback panicked: {}",
                panic_message(panic.as_ref())
            );
        }
    }

    /// Resolve or reject the batch future. Only the first call has an effect.
    pub fn settle(&mut self) {
        let Some(reply) = self.reply.take() else {
            return;
        };
        let result = if self.cancelled {
            Err(LoadError::Cancelled)
        } else if let Some(err) = &self.error {
            Err(err.clone())
        } else {
            Ok(BatchOutcome {
                id: self.id,
                loaded: self.loaded,
                total: self.total,
                tags: self.tags.clone(),
                phase: self.phase.clone(),
            })
        };
        // Caller may have dropped its ticket.
        let _ = reply.send(result);
    }

    pub fn cancel(&mut self) {
        self.cancelled = true;
        self.settle();
    }
}

/// Live batches keyed by id. A batch leaves the tracker as soon as it settles.
#[derive(Default)]
pub struct BatchTracker {
    batches: BTreeMap<BatchId, Batch>,
    next_id: u64,
}

impl BatchTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate_id(&mut self) -> BatchId {
        self.next_id += 1;
        BatchId(self.next_id)
    }

    pub fn insert(&mut self, batch: Batch) {
        self.batches.insert(batch.id, batch);
    }

    pub fn get_mut(&mut self, id: BatchId) -> Option<&mut Batch> {
        self.batches.get_mut(&id)
    }

    pub fn remove(&mut self, id: BatchId) -> Option<Batch> {
        self.batches.remove(&id)
    }

    /// Cancel and remove every live batch. Returns how many were cancelled.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.batches.len();
        for (_, mut batch) in std::mem::take(&mut self.batches) {
            batch.cancel();
        }
        count
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_batch(id: u64) -> (Batch, oneshot::Receiver<Result<BatchOutcome, LoadError>>) {
        let (tx, rx) = oneshot::channel();
        let batch = Batch::new(
            BatchId(id),
            vec!["level-1".to_string()],
            LoadOptions::default().phase("boot"),
            tx,
        );
        (batch, rx)
    }

    #[test]
    fn normalize_tags_trims_dedups_and_drops_blanks() {
        let tags = normalize_tags(&[" a", "b", "", "a", "  ", "c "]);
        assert_eq!(tags, vec!["a", "b", "c"]);
        assert!(normalize_tags::<&str>(&[]).is_empty());
    }

    #[test]
    fn first_error_is_sticky() {
        let (mut batch, _rx) = make_batch(1);
        batch.total = 3;
        batch.record(AssetId(1), None);
        batch.record(AssetId(2), Some("404"));
        batch.record(AssetId(3), Some("timeout"));

        assert!(batch.is_complete());
        assert_eq!(
            batch.error,
            Some(LoadError::AssetFailed {
                asset: AssetId(2),
                message: "404".to_string()
            })
        );
    }

    #[test]
    fn settle_resolves_with_outcome() {
        let (mut batch, mut rx) = make_batch(5);
        batch.total = 1;
        batch.record(AssetId(1), None);
        batch.settle();

        let outcome = rx.try_recv().unwrap().unwrap();
        assert_eq!(outcome.id, BatchId(5));
        assert_eq!(outcome.loaded, 1);
        assert_eq!(outcome.total, 1);
        assert_eq!(outcome.tags, vec!["level-1"]);
        assert_eq!(outcome.phase.as_deref(), Some("boot"));
    }

    #[test]
    fn settle_is_idempotent() {
        let (mut batch, mut rx) = make_batch(1);
        batch.settle();
        batch.cancel();
        assert!(rx.try_recv().unwrap().is_ok());
    }

    #[test]
    fn cancel_rejects_with_cancelled() {
        let (mut batch, mut rx) = make_batch(1);
        batch.total = 2;
        batch.cancel();
        assert_eq!(rx.try_recv().unwrap(), Err(LoadError::Cancelled));
    }

    #[test]
    fn tracker_allocates_increasing_ids_and_cancels_all() {
        let mut tracker = BatchTracker::new();
        assert_eq!(tracker.allocate_id(), BatchId(1));
        assert_eq!(tracker.allocate_id(), BatchId(2));

        let (a, mut rx_a) = make_batch(1);
        let (b, mut rx_b) = make_batch(2);
        tracker.insert(a);
        tracker.insert(b);
        assert_eq!(tracker.len(), 2);

        assert_eq!(tracker.cancel_all(), 2);
        assert!(tracker.is_empty());
        assert!(rx_a.try_recv().unwrap().unwrap_err().is_cancelled());
        assert!(rx_b.try_recv().unwrap().unwrap_err().is_cancelled());
    }

    #[test]
    fn panicking_callback_is_contained() {
        let (tx, _rx) = oneshot::channel();
        let batch = Batch::new(
            BatchId(3),
            vec!["x".to_string()],
            LoadOptions::default().on_progress(|p| panic!("hud gone at {}", p.loaded)),
            tx,
        );
        batch.notify(&batch.progress());
        batch.notify(&batch.progress());
    }

    #[test]
    fn panic_message_reads_str_and_string_payloads() {
        let literal: Box<dyn std::any::Any + Send> = Box::new("static");
        let owned: Box<dyn std::any::Any + Send> = Box::new("owned".to_string());
        let other: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(literal.as_ref()), "static");
        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }

    #[test]
    fn progress_callback_receives_snapshot() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        let (tx, _rx) = oneshot::channel();
        let mut batch = Batch::new(
            BatchId(1),
            vec!["x".to_string()],
            LoadOptions::default().on_progress(move |p| {
                seen_clone.store(p.loaded, Ordering::SeqCst);
            }),
            tx,
        );
        batch.total = 2;
        batch.record(AssetId(1), None);
        batch.notify(&batch.progress());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
