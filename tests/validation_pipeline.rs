use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use labelgate::{
    CleanerConfig, CleanerError, CleaningResult, DataCleaner, Decision, ExtractionDispatcher,
    ExtractionWorker, FeatureVector, ImagePath, ImageRecord, InMemoryIndex, JsonLinesSink,
    SampleMetadata, VecSink,
};

/// Worker serving vectors from a path-keyed table.
struct TableWorker {
    id: String,
    budget: u64,
    table: Arc<HashMap<ImagePath, FeatureVector>>,
    seen: Arc<Mutex<Vec<ImagePath>>>,
    failures_left: AtomicUsize,
}

impl TableWorker {
    fn new(id: &str, budget: u64, table: Arc<HashMap<ImagePath, FeatureVector>>) -> Self {
        Self {
            id: id.to_string(),
            budget,
            table,
            seen: Arc::new(Mutex::new(Vec::new())),
            failures_left: AtomicUsize::new(0),
        }
    }

    fn failing(id: &str, budget: u64, table: Arc<HashMap<ImagePath, FeatureVector>>, failures: usize) -> Self {
        let worker = Self::new(id, budget, table);
        worker.failures_left.store(failures, Ordering::SeqCst);
        worker
    }
}

impl ExtractionWorker for TableWorker {
    fn id(&self) -> &str {
        &self.id
    }

    fn available_budget(&self) -> u64 {
        self.budget
    }

    fn extract_batch(&self, paths: &[ImagePath]) -> Result<Vec<FeatureVector>, CleanerError> {
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
        self.seen
            .lock()
            .expect("seen lock poisoned")
            .extend(paths.iter().cloned());
        paths
            .iter()
            .map(|path| {
                self.table
                    .get(path)
                    .cloned()
                    .ok_or_else(|| CleanerError::Extraction {
                        worker_id: self.id.clone(),
                        reason: format!("no vector scripted for {path}"),
                    })
            })
            .collect()
    }
}

/// Reference index with tight clusters for a handful of labels.
fn reference_index() -> Arc<InMemoryIndex> {
    let mut index = InMemoryIndex::new();
    let clusters: &[(&str, [f32; 2])] = &[
        ("BUS", [0.0, 0.0]),
        ("CAR", [4.0, 0.0]),
        ("POLICE", [0.0, 4.0]),
    ];
    for (label, center) in clusters {
        for step in 0..12 {
            let offset = step as f32 * 0.01;
            index.insert(
                vec![center[0] + offset, center[1]],
                SampleMetadata::with_labels([*label]),
            );
        }
    }
    Arc::new(index)
}

struct Fixture {
    dir: tempfile::TempDir,
    table: HashMap<ImagePath, FeatureVector>,
    records: Vec<ImageRecord>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("temp dir"),
            table: HashMap::new(),
            records: Vec::new(),
        }
    }

    fn add_record(&mut self, id: &str, labels: &[&str], vector: FeatureVector) -> ImagePath {
        let path = self.dir.path().join(format!("{id}.jpg"));
        let mut file = fs::File::create(&path).expect("create image file");
        file.write_all(b"jpeg bytes").expect("write image file");
        let path = path.to_string_lossy().into_owned();
        self.table.insert(path.clone(), vector);
        self.records.push(ImageRecord {
            id: id.to_string(),
            path: path.clone(),
            labels: labels.iter().map(|label| label.to_string()).collect(),
        });
        path
    }

    fn add_missing_record(&mut self, id: &str, labels: &[&str]) {
        let path = self
            .dir
            .path()
            .join(format!("{id}.jpg"))
            .to_string_lossy()
            .into_owned();
        self.records.push(ImageRecord {
            id: id.to_string(),
            path,
            labels: labels.iter().map(|label| label.to_string()).collect(),
        });
    }

    fn cleaner(&self, config: CleanerConfig) -> DataCleaner {
        let table = Arc::new(self.table.clone());
        let mut dispatcher = ExtractionDispatcher::new(config.per_worker_batch_size);
        dispatcher.register_worker(Box::new(TableWorker::new("cuda:0", 100, table)));
        DataCleaner::new(reference_index(), dispatcher, config).expect("cleaner construction")
    }
}

#[test]
fn full_run_produces_one_result_per_record_with_expected_decisions() {
    let mut fixture = Fixture::new();
    // Sits inside the BUS cluster: accepted.
    fixture.add_record("bus_member", &["BUS"], vec![0.05, 0.0]);
    // Far from the CAR cluster: rejected.
    fixture.add_record("car_outlier", &["CAR"], vec![0.0, 0.0]);
    // No labels at all: review.
    fixture.add_record("unlabeled", &[], vec![0.05, 0.0]);
    // Missing file: dropped before extraction.
    fixture.add_missing_record("ghost", &["BUS"]);

    let mut cleaner = fixture.cleaner(CleanerConfig::default());
    let mut sink = VecSink::default();
    let summary = cleaner.clean(&fixture.records, &mut sink).unwrap();

    assert_eq!(sink.results.len(), fixture.records.len());
    let by_id: HashMap<&str, &CleaningResult> = sink
        .results
        .iter()
        .map(|result| (result.id.as_str(), result))
        .collect();

    assert_eq!(by_id["bus_member"].decision, Decision::Accept);
    assert_eq!(by_id["bus_member"].validated_categories, 1);
    assert!(by_id["bus_member"].score > 0.4);

    assert_eq!(by_id["car_outlier"].decision, Decision::Reject);
    assert_eq!(by_id["unlabeled"].decision, Decision::Review);
    assert!(by_id["unlabeled"].error.is_some());
    assert_eq!(by_id["ghost"].decision, Decision::Drop);

    assert_eq!(summary.total, 4);
    assert_eq!(summary.accepted, 1);
    assert_eq!(summary.rejected, 1);
    assert_eq!(summary.review, 1);
    assert_eq!(summary.dropped, 1);
    assert!((summary.accept_rate - 0.25).abs() < 1e-9);
}

#[test]
fn allow_list_validates_only_labels_of_interest() {
    let mut fixture = Fixture::new();
    // CAR would reject at this position, but only POLICE is of interest.
    fixture.add_record("patrol", &["CAR", "POLICE"], vec![0.05, 4.0]);

    let config = CleanerConfig {
        labels_of_interest: vec!["POLICE".to_string()],
        ..CleanerConfig::default()
    };
    let mut cleaner = fixture.cleaner(config);
    let result = cleaner.clean_single(&fixture.records[0]).unwrap();

    assert_eq!(result.decision, Decision::Accept);
    assert_eq!(result.total_categories, 2);
    assert_eq!(result.validated_categories, 1);
    assert_eq!(result.categories.len(), 1);
    assert_eq!(result.categories[0].label, "POLICE");
    assert!(result.categories[0].score > 0.4);
}

#[test]
fn mixed_label_record_merges_to_reject() {
    let mut fixture = Fixture::new();
    // Inside BUS, far from CAR: accept + reject merges to reject.
    fixture.add_record("contradiction", &["BUS", "CAR"], vec![0.05, 0.0]);

    let mut cleaner = fixture.cleaner(CleanerConfig::default());
    let result = cleaner.clean_single(&fixture.records[0]).unwrap();

    assert_eq!(result.categories.len(), 2);
    let decisions: Vec<Decision> = result
        .categories
        .iter()
        .map(|category| category.decision)
        .collect();
    assert!(decisions.contains(&Decision::Accept));
    assert!(decisions.contains(&Decision::Reject));
    assert_eq!(result.decision, Decision::Reject);

    let mean = result
        .categories
        .iter()
        .map(|category| category.score)
        .sum::<f32>()
        / result.categories.len() as f32;
    assert!((result.score - mean).abs() < 1e-6);
}

#[test]
fn persistent_extraction_failure_rejects_the_affected_records_only() {
    let mut fixture = Fixture::new();
    for idx in 0..6 {
        fixture.add_record(&format!("r{idx}"), &["BUS"], vec![0.05, 0.0]);
    }

    let table = Arc::new(fixture.table.clone());
    let mut dispatcher = ExtractionDispatcher::new(3);
    dispatcher.register_worker(Box::new(TableWorker::new(
        "cuda:0",
        100,
        Arc::clone(&table),
    )));
    // This worker fails on the dispatch attempt and again on every retry.
    dispatcher.register_worker(Box::new(TableWorker::failing(
        "cuda:1",
        100,
        Arc::clone(&table),
        usize::MAX,
    )));
    dispatcher.set_fallback(Box::new(TableWorker::failing(
        "cpu",
        1,
        Arc::clone(&table),
        usize::MAX,
    )));

    let mut cleaner =
        DataCleaner::new(reference_index(), dispatcher, CleanerConfig::default()).unwrap();
    let mut sink = VecSink::default();
    let summary = cleaner.clean(&fixture.records, &mut sink).unwrap();

    assert_eq!(sink.results.len(), 6);
    let rejected_by_extraction: Vec<&CleaningResult> = sink
        .results
        .iter()
        .filter(|result| {
            result
                .error
                .as_deref()
                .is_some_and(|msg| msg.contains("extraction failed"))
        })
        .collect();
    assert_eq!(rejected_by_extraction.len(), 3);
    assert!(rejected_by_extraction
        .iter()
        .all(|result| result.decision == Decision::Reject));
    assert_eq!(summary.accepted, 3);
    assert_eq!(summary.rejected, 3);
}

#[test]
fn json_lines_sink_persists_every_batch_of_the_run() {
    let mut fixture = Fixture::new();
    for idx in 0..5 {
        fixture.add_record(&format!("r{idx}"), &["BUS"], vec![0.05, 0.0]);
    }

    // batch_size 2 forces three appended batches.
    let config = CleanerConfig {
        batch_size: 2,
        ..CleanerConfig::default()
    };
    let out_path = fixture.dir.path().join("results.jsonl");
    let mut sink = JsonLinesSink::create(&out_path).unwrap();
    let mut cleaner = fixture.cleaner(config);
    let summary = cleaner.clean(&fixture.records, &mut sink).unwrap();
    assert_eq!(summary.total, 5);

    let contents = fs::read_to_string(&out_path).unwrap();
    let parsed: Vec<CleaningResult> = contents
        .lines()
        .map(|line| serde_json::from_str(line).expect("valid result line"))
        .collect();
    assert_eq!(parsed.len(), 5);
    let ids: Vec<&str> = parsed.iter().map(|result| result.id.as_str()).collect();
    assert_eq!(ids, vec!["r0", "r1", "r2", "r3", "r4"]);
}

#[test]
fn statistics_cache_is_reused_across_batches_of_one_run() {
    let mut fixture = Fixture::new();
    for idx in 0..4 {
        fixture.add_record(&format!("r{idx}"), &["BUS"], vec![0.05, 0.0]);
    }
    let config = CleanerConfig {
        batch_size: 1,
        ..CleanerConfig::default()
    };
    let mut cleaner = fixture.cleaner(config);
    let mut sink = VecSink::default();
    cleaner.clean(&fixture.records, &mut sink).unwrap();

    assert!(cleaner.statistics_cache().contains("BUS"));
    assert_eq!(cleaner.statistics_cache().len(), 1);

    cleaner.clear_statistics();
    assert!(cleaner.statistics_cache().is_empty());
}
