//! Parallel extraction dispatch across independent compute workers.
//!
//! A batch is split into contiguous slices proportional to each worker's
//! reported resource budget, the slices run concurrently on scoped threads,
//! and a failing slice is retried once on the fallback worker. Results are
//! reassembled in input order regardless of completion order or which
//! worker handled which slice.

use std::ops::Range;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::constants::dispatch::{NO_WORKER_REASON, WORKER_PANIC_REASON};
use crate::embedder::ExtractionWorker;
use crate::errors::CleanerError;
use crate::types::{FeatureVector, ImagePath, WorkerId};

/// Per-worker dispatch telemetry.
#[derive(Clone, Debug, Default)]
pub struct WorkerDispatchStats {
    /// Size of the most recent slice handed to this worker.
    pub last_batch_size: usize,
    /// Duration of the most recent slice in milliseconds.
    pub last_batch_ms: u128,
    /// Throughput estimate from the most recent slice.
    pub last_vectors_per_sec: f64,
    /// Most recent failure message, if any.
    pub last_error: Option<String>,
    /// Total extraction failures seen on this worker.
    pub error_count: u64,
    /// Number of slices this worker failed that the fallback recovered.
    pub fallback_count: u64,
}

/// One unrecovered slice failure within a dispatched batch.
#[derive(Clone, Debug)]
pub struct SliceFailure {
    /// Worker originally assigned the slice.
    pub worker_id: WorkerId,
    /// Offset of the slice within the dispatched batch.
    pub start: usize,
    /// Length of the slice.
    pub len: usize,
    /// Final failure description (fallback error when one was attempted).
    pub reason: String,
}

/// Outcome of a dispatched batch that tolerates partial failure.
///
/// `vectors` has one slot per input path, in input order; slots covered by
/// an entry in `failures` are `None`, everything else is extracted.
#[derive(Debug, Default)]
pub struct PartialExtraction {
    /// Per-input extraction results, input order.
    pub vectors: Vec<Option<FeatureVector>>,
    /// Slices that failed even after the fallback retry.
    pub failures: Vec<SliceFailure>,
}

impl PartialExtraction {
    /// Returns `true` when every slot was extracted.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// The failure covering input `slot`, if any.
    pub fn failure_for(&self, slot: usize) -> Option<&SliceFailure> {
        self.failures
            .iter()
            .find(|failure| slot >= failure.start && slot < failure.start + failure.len)
    }
}

/// Snapshot of the dispatcher's worker roster.
#[derive(Clone, Debug)]
pub struct DispatcherInfo {
    /// Registered workers with their currently-reported budgets.
    pub workers: Vec<(WorkerId, u64)>,
    /// Whether a fallback worker is configured.
    pub has_fallback: bool,
    /// Batch size at or below which no split happens.
    pub per_worker_batch_size: usize,
}

struct WorkerSlot {
    worker: Box<dyn ExtractionWorker>,
    stats: WorkerDispatchStats,
}

/// Schedules batched feature extraction over a fixed pool of workers.
pub struct ExtractionDispatcher {
    workers: Vec<WorkerSlot>,
    fallback: Option<Box<dyn ExtractionWorker>>,
    per_worker_batch_size: usize,
}

impl ExtractionDispatcher {
    /// Create a dispatcher with no workers registered yet.
    pub fn new(per_worker_batch_size: usize) -> Self {
        Self {
            workers: Vec::new(),
            fallback: None,
            per_worker_batch_size: per_worker_batch_size.max(1),
        }
    }

    /// Register a primary worker. Registration order is the slice order for
    /// split batches.
    pub fn register_worker(&mut self, worker: Box<dyn ExtractionWorker>) {
        self.workers.push(WorkerSlot {
            worker,
            stats: WorkerDispatchStats::default(),
        });
    }

    /// Install the fallback worker used to retry failed slices once.
    pub fn set_fallback(&mut self, worker: Box<dyn ExtractionWorker>) {
        self.fallback = Some(worker);
    }

    /// Number of registered primary workers.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Returns `true` when a fallback worker is installed.
    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// Latest dispatch telemetry for each registered worker.
    pub fn worker_stats(&self) -> Vec<(WorkerId, WorkerDispatchStats)> {
        self.workers
            .iter()
            .map(|slot| (slot.worker.id().to_string(), slot.stats.clone()))
            .collect()
    }

    /// Snapshot of the roster and split settings.
    pub fn info(&self) -> DispatcherInfo {
        DispatcherInfo {
            workers: self
                .workers
                .iter()
                .map(|slot| (slot.worker.id().to_string(), slot.worker.available_budget()))
                .collect(),
            has_fallback: self.fallback.is_some(),
            per_worker_batch_size: self.per_worker_batch_size,
        }
    }

    /// Extract a batch, requiring every slice to succeed.
    ///
    /// All slices are collected (including fallback retries) before a
    /// failure is raised, so a single bad worker cannot abort the others
    /// mid-flight.
    pub fn extract_batch(
        &mut self,
        paths: &[ImagePath],
    ) -> Result<Vec<FeatureVector>, CleanerError> {
        let PartialExtraction { vectors, failures } = self.extract_batch_partial(paths);
        if let Some(failure) = failures.into_iter().next() {
            return Err(CleanerError::Extraction {
                worker_id: failure.worker_id,
                reason: failure.reason,
            });
        }
        Ok(vectors
            .into_iter()
            .map(|vector| vector.expect("complete extraction fills every slot"))
            .collect())
    }

    /// Extract a batch, degrading failed slices to `None` slots instead of
    /// raising. Already-completed slices are always preserved.
    pub fn extract_batch_partial(&mut self, paths: &[ImagePath]) -> PartialExtraction {
        if paths.is_empty() {
            return PartialExtraction::default();
        }
        let plan = self.allocation_plan(paths.len());
        if plan.is_empty() {
            return self.fallback_only(paths);
        }

        let workers = &self.workers;
        let outcomes: Vec<(usize, Range<usize>, Result<Vec<FeatureVector>, CleanerError>, Duration)> =
            thread::scope(|scope| {
                let handles: Vec<_> = plan
                    .iter()
                    .map(|(worker_idx, range)| {
                        let worker = workers[*worker_idx].worker.as_ref();
                        let slice = &paths[range.clone()];
                        let handle = scope.spawn(move || {
                            let start = Instant::now();
                            let result = worker.extract_batch(slice);
                            (result, start.elapsed())
                        });
                        (*worker_idx, range.clone(), handle)
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|(worker_idx, range, handle)| match handle.join() {
                        Ok((result, elapsed)) => (worker_idx, range, result, elapsed),
                        Err(_) => (
                            worker_idx,
                            range,
                            Err(CleanerError::Extraction {
                                worker_id: workers[worker_idx].worker.id().to_string(),
                                reason: WORKER_PANIC_REASON.to_string(),
                            }),
                            Duration::ZERO,
                        ),
                    })
                    .collect()
            });

        let mut vectors: Vec<Option<FeatureVector>> = vec![None; paths.len()];
        let mut retries: Vec<(usize, Range<usize>, String)> = Vec::new();
        for (worker_idx, range, result, elapsed) in outcomes {
            let slot = &mut self.workers[worker_idx];
            slot.stats.last_batch_size = range.len();
            slot.stats.last_batch_ms = elapsed.as_millis();
            let seconds = elapsed.as_secs_f64();
            slot.stats.last_vectors_per_sec = if seconds > 0.0 {
                range.len() as f64 / seconds
            } else {
                0.0
            };
            let checked = result.and_then(|extracted| {
                if extracted.len() == range.len() {
                    Ok(extracted)
                } else {
                    Err(CleanerError::Extraction {
                        worker_id: slot.worker.id().to_string(),
                        reason: format!(
                            "worker returned {} vectors for {} inputs",
                            extracted.len(),
                            range.len()
                        ),
                    })
                }
            });
            match checked {
                Ok(extracted) => {
                    slot.stats.last_error = None;
                    debug!(
                        worker = %slot.worker.id(),
                        batch = range.len(),
                        batch_ms = elapsed.as_millis(),
                        "extraction slice completed"
                    );
                    for (position, vector) in range.zip(extracted) {
                        vectors[position] = Some(vector);
                    }
                }
                Err(err) => {
                    slot.stats.last_error = Some(err.to_string());
                    slot.stats.error_count = slot.stats.error_count.saturating_add(1);
                    warn!(
                        worker = %slot.worker.id(),
                        error = %err,
                        "extraction slice failed, retrying on fallback"
                    );
                    retries.push((worker_idx, range, err.to_string()));
                }
            }
        }

        let mut failures = Vec::new();
        for (worker_idx, range, reason) in retries {
            let worker_id = self.workers[worker_idx].worker.id().to_string();
            let recovered = match &self.fallback {
                Some(fallback) => match fallback.extract_batch(&paths[range.clone()]) {
                    Ok(extracted) if extracted.len() == range.len() => Ok(extracted),
                    Ok(extracted) => Err(format!(
                        "fallback '{}' returned {} vectors for {} inputs",
                        fallback.id(),
                        extracted.len(),
                        range.len()
                    )),
                    Err(err) => Err(err.to_string()),
                },
                None => Err(reason),
            };
            match recovered {
                Ok(extracted) => {
                    self.workers[worker_idx].stats.fallback_count = self.workers[worker_idx]
                        .stats
                        .fallback_count
                        .saturating_add(1);
                    debug!(
                        worker = %worker_id,
                        batch = range.len(),
                        "extraction slice recovered on fallback"
                    );
                    for (position, vector) in range.zip(extracted) {
                        vectors[position] = Some(vector);
                    }
                }
                Err(final_reason) => {
                    failures.push(SliceFailure {
                        worker_id,
                        start: range.start,
                        len: range.len(),
                        reason: final_reason,
                    });
                }
            }
        }

        PartialExtraction { vectors, failures }
    }

    /// Plan contiguous slice assignments for a batch of `len` inputs.
    ///
    /// Single-worker batches and batches no larger than the per-worker
    /// batch size are never split. Otherwise each worker's share is
    /// proportional to its reported budget (at least one input each), with
    /// the integer-division remainder assigned to the largest budget.
    fn allocation_plan(&self, len: usize) -> Vec<(usize, Range<usize>)> {
        if self.workers.is_empty() {
            return Vec::new();
        }
        if self.workers.len() == 1 || len <= self.per_worker_batch_size {
            return vec![(0, 0..len)];
        }
        let budgets: Vec<u64> = self
            .workers
            .iter()
            .map(|slot| slot.worker.available_budget())
            .collect();
        let total: u128 = budgets.iter().map(|budget| *budget as u128).sum();
        let mut shares: Vec<usize> = if total == 0 {
            vec![(len / self.workers.len()).max(1); self.workers.len()]
        } else {
            budgets
                .iter()
                .map(|budget| {
                    let share = (len as u128 * *budget as u128 / total) as usize;
                    share.max(1)
                })
                .collect()
        };
        let allocated: usize = shares.iter().sum();
        if allocated < len {
            let largest = budgets
                .iter()
                .enumerate()
                .max_by_key(|(_, budget)| **budget)
                .map(|(idx, _)| idx)
                .unwrap_or(0);
            shares[largest] += len - allocated;
        }

        let mut plan = Vec::new();
        let mut start = 0;
        for (worker_idx, share) in shares.iter().enumerate() {
            if start >= len {
                break;
            }
            let end = (start + share).min(len);
            if end > start {
                plan.push((worker_idx, start..end));
            }
            start = end;
        }
        plan
    }

    fn fallback_only(&mut self, paths: &[ImagePath]) -> PartialExtraction {
        let Some(fallback) = &self.fallback else {
            return PartialExtraction {
                vectors: vec![None; paths.len()],
                failures: vec![SliceFailure {
                    worker_id: "dispatcher".to_string(),
                    start: 0,
                    len: paths.len(),
                    reason: NO_WORKER_REASON.to_string(),
                }],
            };
        };
        match fallback.extract_batch(paths) {
            Ok(extracted) if extracted.len() == paths.len() => PartialExtraction {
                vectors: extracted.into_iter().map(Some).collect(),
                failures: Vec::new(),
            },
            Ok(extracted) => PartialExtraction {
                vectors: vec![None; paths.len()],
                failures: vec![SliceFailure {
                    worker_id: fallback.id().to_string(),
                    start: 0,
                    len: paths.len(),
                    reason: format!(
                        "fallback returned {} vectors for {} inputs",
                        extracted.len(),
                        paths.len()
                    ),
                }],
            },
            Err(err) => PartialExtraction {
                vectors: vec![None; paths.len()],
                failures: vec![SliceFailure {
                    worker_id: fallback.id().to_string(),
                    start: 0,
                    len: paths.len(),
                    reason: err.to_string(),
                }],
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Worker that encodes each path's trailing number into its vector.
    struct ScriptedWorker {
        id: WorkerId,
        budget: u64,
        calls: Arc<AtomicUsize>,
        failures_left: AtomicUsize,
    }

    impl ScriptedWorker {
        fn new(id: &str, budget: u64) -> Self {
            Self {
                id: id.to_string(),
                budget,
                calls: Arc::new(AtomicUsize::new(0)),
                failures_left: AtomicUsize::new(0),
            }
        }

        fn failing(id: &str, budget: u64, failures: usize) -> Self {
            let worker = Self::new(id, budget);
            worker.failures_left.store(failures, Ordering::SeqCst);
            worker
        }

        fn calls(&self) -> Arc<AtomicUsize> {
            Arc::clone(&self.calls)
        }
    }

    fn path_number(path: &str) -> f32 {
        path.trim_end_matches(".jpg")
            .rsplit('/')
            .next()
            .unwrap()
            .parse()
            .unwrap()
    }

    impl ExtractionWorker for ScriptedWorker {
        fn id(&self) -> &str {
            &self.id
        }

        fn available_budget(&self) -> u64 {
            self.budget
        }

        fn extract_batch(&self, paths: &[ImagePath]) -> Result<Vec<FeatureVector>, CleanerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok()
            {
                return Err(CleanerError::Extraction {
                    worker_id: self.id.clone(),
                    reason: "device out of memory".into(),
                });
            }
            Ok(paths
                .iter()
                .map(|path| vec![path_number(path), 0.0])
                .collect())
        }
    }

    struct PanicWorker {
        id: WorkerId,
    }

    impl ExtractionWorker for PanicWorker {
        fn id(&self) -> &str {
            &self.id
        }

        fn available_budget(&self) -> u64 {
            1
        }

        fn extract_batch(&self, _paths: &[ImagePath]) -> Result<Vec<FeatureVector>, CleanerError> {
            panic!("worker crashed mid-batch")
        }
    }

    fn numbered_paths(count: usize) -> Vec<ImagePath> {
        (0..count).map(|idx| format!("img/{idx}.jpg")).collect()
    }

    fn assert_input_order(vectors: &[FeatureVector]) {
        for (idx, vector) in vectors.iter().enumerate() {
            assert!(
                (vector[0] - idx as f32).abs() < f32::EPSILON,
                "slot {idx} holds vector for input {}",
                vector[0]
            );
        }
    }

    #[test]
    fn empty_batch_invokes_no_worker() {
        let worker = ScriptedWorker::new("cuda:0", 100);
        let calls = worker.calls();
        let mut dispatcher = ExtractionDispatcher::new(4);
        dispatcher.register_worker(Box::new(worker));

        let vectors = dispatcher.extract_batch(&[]).unwrap();
        assert!(vectors.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn small_batch_stays_on_a_single_worker() {
        let first = ScriptedWorker::new("cuda:0", 1);
        let second = ScriptedWorker::new("cuda:1", 1_000);
        let first_calls = first.calls();
        let second_calls = second.calls();
        let mut dispatcher = ExtractionDispatcher::new(8);
        dispatcher.register_worker(Box::new(first));
        dispatcher.register_worker(Box::new(second));

        let vectors = dispatcher.extract_batch(&numbered_paths(8)).unwrap();
        assert_eq!(vectors.len(), 8);
        assert_input_order(&vectors);
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn large_batch_splits_proportionally_and_preserves_order() {
        let first = ScriptedWorker::new("cuda:0", 300);
        let second = ScriptedWorker::new("cuda:1", 100);
        let first_calls = first.calls();
        let second_calls = second.calls();
        let mut dispatcher = ExtractionDispatcher::new(4);
        dispatcher.register_worker(Box::new(first));
        dispatcher.register_worker(Box::new(second));

        let vectors = dispatcher.extract_batch(&numbered_paths(12)).unwrap();
        assert_eq!(vectors.len(), 12);
        assert_input_order(&vectors);
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);

        let stats = dispatcher.worker_stats();
        let sizes: Vec<usize> = stats.iter().map(|(_, s)| s.last_batch_size).collect();
        // 3:1 budget split of 12 inputs.
        assert_eq!(sizes, vec![9, 3]);
    }

    #[test]
    fn failed_slice_is_recovered_on_the_fallback_in_order() {
        let healthy = ScriptedWorker::new("cuda:0", 100);
        let flaky = ScriptedWorker::failing("cuda:1", 100, 1);
        let mut dispatcher = ExtractionDispatcher::new(2);
        dispatcher.register_worker(Box::new(healthy));
        dispatcher.register_worker(Box::new(flaky));
        dispatcher.set_fallback(Box::new(ScriptedWorker::new("cpu", 1)));

        let vectors = dispatcher.extract_batch(&numbered_paths(10)).unwrap();
        assert_eq!(vectors.len(), 10);
        assert_input_order(&vectors);

        let stats = dispatcher.worker_stats();
        let flaky_stats = &stats[1].1;
        assert_eq!(flaky_stats.error_count, 1);
        assert_eq!(flaky_stats.fallback_count, 1);
        assert!(flaky_stats.last_error.is_some());
    }

    #[test]
    fn panicking_worker_is_contained_and_recovered() {
        let mut dispatcher = ExtractionDispatcher::new(2);
        dispatcher.register_worker(Box::new(ScriptedWorker::new("cuda:0", 100)));
        dispatcher.register_worker(Box::new(PanicWorker {
            id: "cuda:1".into(),
        }));
        dispatcher.set_fallback(Box::new(ScriptedWorker::new("cpu", 1)));

        let vectors = dispatcher.extract_batch(&numbered_paths(10)).unwrap();
        assert_input_order(&vectors);
        let stats = dispatcher.worker_stats();
        assert_eq!(stats[1].1.error_count, 1);
        assert!(stats[1]
            .1
            .last_error
            .as_deref()
            .is_some_and(|msg| msg.contains("panicked")));
    }

    #[test]
    fn unrecovered_slice_keeps_completed_work_and_reports_the_failure() {
        let healthy = ScriptedWorker::new("cuda:0", 100);
        let broken = ScriptedWorker::failing("cuda:1", 100, 2);
        let mut dispatcher = ExtractionDispatcher::new(2);
        dispatcher.register_worker(Box::new(healthy));
        dispatcher.register_worker(Box::new(broken));
        dispatcher.set_fallback(Box::new(ScriptedWorker::failing("cpu", 1, 2)));

        let partial = dispatcher.extract_batch_partial(&numbered_paths(10));
        assert!(!partial.is_complete());
        assert_eq!(partial.failures.len(), 1);
        assert_eq!(partial.failures[0].worker_id, "cuda:1");

        let completed = partial.vectors.iter().filter(|slot| slot.is_some()).count();
        assert!(completed >= 5, "healthy worker's slice must be preserved");
        for slot in partial.failures[0].start..partial.failures[0].start + partial.failures[0].len {
            assert!(partial.vectors[slot].is_none());
            assert!(partial.failure_for(slot).is_some());
        }

        // The strict path surfaces the same failure as an error.
        let err = dispatcher.extract_batch(&numbered_paths(10)).unwrap_err();
        assert!(matches!(err, CleanerError::Extraction { .. }));
    }

    #[test]
    fn no_workers_falls_back_or_fails() {
        let mut empty = ExtractionDispatcher::new(2);
        let partial = empty.extract_batch_partial(&numbered_paths(3));
        assert_eq!(partial.failures.len(), 1);
        assert!(partial.failures[0].reason.contains("no extraction worker"));

        let mut with_fallback = ExtractionDispatcher::new(2);
        with_fallback.set_fallback(Box::new(ScriptedWorker::new("cpu", 1)));
        let vectors = with_fallback.extract_batch(&numbered_paths(3)).unwrap();
        assert_input_order(&vectors);
    }

    #[test]
    fn info_reports_roster_and_settings() {
        let mut dispatcher = ExtractionDispatcher::new(16);
        dispatcher.register_worker(Box::new(ScriptedWorker::new("cuda:0", 123)));
        dispatcher.set_fallback(Box::new(ScriptedWorker::new("cpu", 1)));

        let info = dispatcher.info();
        assert_eq!(info.workers, vec![("cuda:0".to_string(), 123)]);
        assert!(info.has_fallback);
        assert_eq!(info.per_worker_batch_size, 16);
    }
}
