//! Cleaning pipeline driver: batch iteration, input probing, result
//! persistence, and run summaries.

use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::CleanerConfig;
use crate::constants::cleaner::{EMPTY_PATH_MSG, MISSING_FILE_MSG, UNREADABLE_FILE_MSG};
use crate::data::{CleaningResult, ImageRecord};
use crate::dispatch::ExtractionDispatcher;
use crate::errors::CleanerError;
use crate::index::VectorIndex;
use crate::metrics::{DecisionCounts, RunSummary};
use crate::stats::ClassStatsCache;
use crate::types::{FeatureVector, ImagePath};
use crate::validator::BatchValidator;

/// Destination for per-batch cleaning results.
///
/// Batches are appended strictly in run order; a run aborted between
/// batches leaves every previously appended batch intact.
pub trait ResultSink {
    /// Append one batch of results.
    fn append_batch(&mut self, results: &[CleaningResult]) -> Result<(), CleanerError>;
}

/// Sink writing one JSON object per record, one record per line.
pub struct JsonLinesSink {
    path: PathBuf,
    writer: io::BufWriter<File>,
}

impl JsonLinesSink {
    /// Create (or truncate) the sink file, creating parent directories as
    /// needed.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, CleanerError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let writer = io::BufWriter::new(File::create(&path)?);
        Ok(Self { path, writer })
    }

    /// Path of the sink file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResultSink for JsonLinesSink {
    fn append_batch(&mut self, results: &[CleaningResult]) -> Result<(), CleanerError> {
        for result in results {
            let line = serde_json::to_string(result)
                .map_err(|err| CleanerError::Sink(err.to_string()))?;
            writeln!(self.writer, "{line}")?;
        }
        // Flush per batch so an abort between batches loses nothing.
        self.writer.flush()?;
        Ok(())
    }
}

/// In-memory sink collecting every result, for small runs and tests.
#[derive(Default)]
pub struct VecSink {
    /// Accumulated results in run order.
    pub results: Vec<CleaningResult>,
}

impl ResultSink for VecSink {
    fn append_batch(&mut self, results: &[CleaningResult]) -> Result<(), CleanerError> {
        self.results.extend_from_slice(results);
        Ok(())
    }
}

/// Load image records from a JSON array file.
pub fn records_from_json<P: AsRef<Path>>(path: P) -> Result<Vec<ImageRecord>, CleanerError> {
    let file = File::open(path.as_ref())?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|err| CleanerError::Input(format!("invalid record file: {err}")))
}

/// Build label-less records for every image file under `dir`.
///
/// `extensions` are matched case-insensitively against file extensions
/// (for example `["jpg", "jpeg", "png"]`). Records are sorted by path so
/// the output is stable across filesystems.
pub fn records_from_dir<P: AsRef<Path>>(
    dir: P,
    extensions: &[&str],
) -> Result<Vec<ImageRecord>, CleanerError> {
    let dir = dir.as_ref();
    let mut records = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry.map_err(|err| CleanerError::Input(err.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let matches = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                extensions
                    .iter()
                    .any(|candidate| candidate.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false);
        if !matches {
            continue;
        }
        let id = entry
            .path()
            .strip_prefix(dir)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .into_owned();
        records.push(ImageRecord {
            id,
            path: entry.path().to_string_lossy().into_owned(),
            labels: Vec::new(),
        });
    }
    records.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(records)
}

enum FileProbe {
    EmptyPath,
    Missing,
    Unreadable(String),
    Readable,
}

fn probe_file(path: &str) -> FileProbe {
    if path.is_empty() {
        return FileProbe::EmptyPath;
    }
    match File::open(path) {
        Ok(_) => FileProbe::Readable,
        Err(err) if err.kind() == io::ErrorKind::NotFound => FileProbe::Missing,
        Err(err) => FileProbe::Unreadable(format!("{UNREADABLE_FILE_MSG}: {err}")),
    }
}

/// Drives a full cleaning run: batch iteration, extraction dispatch,
/// validation, and persistence.
pub struct DataCleaner {
    dispatcher: ExtractionDispatcher,
    validator: BatchValidator,
    stats: Arc<ClassStatsCache>,
    config: CleanerConfig,
}

impl DataCleaner {
    /// Build a cleaner over `index` using the given dispatcher.
    ///
    /// Fails fast on invalid configuration or an empty worker roster,
    /// before any batch is processed.
    pub fn new(
        index: Arc<dyn VectorIndex>,
        dispatcher: ExtractionDispatcher,
        config: CleanerConfig,
    ) -> Result<Self, CleanerError> {
        let config = config.validated()?;
        if dispatcher.worker_count() == 0 && !dispatcher.has_fallback() {
            return Err(CleanerError::Configuration(
                "at least one extraction worker or a fallback must be registered".into(),
            ));
        }
        let stats = Arc::new(ClassStatsCache::new(Arc::clone(&index)));
        let validator = BatchValidator::new(index, Arc::clone(&stats), config.clone());
        Ok(Self {
            dispatcher,
            validator,
            stats,
            config,
        })
    }

    /// The run-lifetime class statistics cache.
    pub fn statistics_cache(&self) -> &Arc<ClassStatsCache> {
        &self.stats
    }

    /// The extraction dispatcher (for telemetry inspection).
    pub fn dispatcher(&self) -> &ExtractionDispatcher {
        &self.dispatcher
    }

    /// Drop cached class statistics. Call between independent runs; never
    /// needed within one.
    pub fn clear_statistics(&self) {
        self.stats.clear();
    }

    /// Clean every record, appending each batch's results to `sink`.
    ///
    /// Emits exactly one result per input record. Batches are processed
    /// strictly in sequence; per-batch intermediate state is released
    /// before the next batch starts, so memory use is bounded by one
    /// batch's working set plus the statistics cache.
    pub fn clean(
        &mut self,
        records: &[ImageRecord],
        sink: &mut dyn ResultSink,
    ) -> Result<RunSummary, CleanerError> {
        let mut counts = DecisionCounts::default();
        for (batch_index, batch) in records.chunks(self.config.batch_size).enumerate() {
            let results = self.clean_batch(batch);
            for result in &results {
                counts.observe(result);
            }
            sink.append_batch(&results)?;
            debug!(
                batch_index,
                size = batch.len(),
                processed = counts.total(),
                "batch cleaned and persisted"
            );
        }
        let summary = RunSummary::from_counts(counts);
        info!(
            total = summary.total,
            accepted = summary.accepted,
            rejected = summary.rejected,
            review = summary.review,
            dropped = summary.dropped,
            "cleaning run finished"
        );
        Ok(summary)
    }

    /// Clean a single record through the same machinery as a batch.
    pub fn clean_single(&mut self, record: &ImageRecord) -> Result<CleaningResult, CleanerError> {
        let mut sink = VecSink::default();
        self.clean(std::slice::from_ref(record), &mut sink)?;
        Ok(sink
            .results
            .pop()
            .expect("one result per input record"))
    }

    fn clean_batch(&mut self, batch: &[ImageRecord]) -> Vec<CleaningResult> {
        let mut slots: Vec<Option<CleaningResult>> = vec![None; batch.len()];
        let mut live_positions: Vec<usize> = Vec::new();
        let mut live_paths: Vec<ImagePath> = Vec::new();
        for (idx, record) in batch.iter().enumerate() {
            match probe_file(&record.path) {
                FileProbe::EmptyPath => {
                    slots[idx] = Some(CleaningResult::dropped(record, EMPTY_PATH_MSG));
                }
                FileProbe::Missing => {
                    slots[idx] = Some(CleaningResult::dropped(record, MISSING_FILE_MSG));
                }
                FileProbe::Unreadable(reason) => {
                    slots[idx] = Some(CleaningResult::rejected(record, reason));
                }
                FileProbe::Readable => {
                    live_positions.push(idx);
                    live_paths.push(record.path.clone());
                }
            }
        }

        let mut partial = self.dispatcher.extract_batch_partial(&live_paths);
        let failure_reasons: Vec<Option<String>> = (0..live_positions.len())
            .map(|slot| {
                partial.failure_for(slot).map(|failure| {
                    format!(
                        "extraction failed on worker '{}': {}",
                        failure.worker_id, failure.reason
                    )
                })
            })
            .collect();

        let mut ok_records: Vec<ImageRecord> = Vec::new();
        let mut ok_vectors: Vec<FeatureVector> = Vec::new();
        let mut ok_positions: Vec<usize> = Vec::new();
        for (slot, &position) in live_positions.iter().enumerate() {
            match partial.vectors[slot].take() {
                Some(vector) => {
                    ok_records.push(batch[position].clone());
                    ok_vectors.push(vector);
                    ok_positions.push(position);
                }
                None => {
                    let reason = failure_reasons[slot]
                        .clone()
                        .unwrap_or_else(|| "extraction produced no vector".to_string());
                    slots[position] = Some(CleaningResult::rejected(&batch[position], reason));
                }
            }
        }

        let validated = self.validator.validate_batch(&ok_records, &ok_vectors);
        for (result, position) in validated.into_iter().zip(ok_positions) {
            slots[position] = Some(result);
        }

        slots
            .into_iter()
            .map(|slot| slot.expect("every record resolves to a cleaning result"))
            .collect()
    }
}
