//! 분류 워커 -- 큐에서 파일을 하나씩 꺼내 분류하고 결과 파일을 씁니다.
//!
//! 워커는 blocking 스레드 하나에서 순차적으로 동작합니다. 파일 처리 순서는 큐 순서와
//! 같고, [`QueueItem::Shutdown`]을 받으면 루프를 끝냅니다.
//!
//! # 파일 하나의 처리 단계
//! 1. 읽기 → CSV 파싱 → 특성 변환 → 예측
//! 2. 원본 컬럼 + `Prediction` 컬럼을 `processed_{파일명}`으로 원자적 기록
//!
//! 파일이 잠겨 있으면 `retry_delay` 후 전체 단계를 한 번 더 시도합니다.
//! 그 외 실패는 그 파일만 건너뛰고 다음 항목으로 넘어갑니다.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use flowwatch_core::error::ClassificationError;
use flowwatch_core::fs::FileSystem;
use flowwatch_core::metrics as m;
use flowwatch_core::table::FlowTable;

use crate::alert::{PREDICTION_COLUMN, is_positive};
use crate::config::PipelineConfig;
use crate::error::ClassifierError;
use crate::feature::FeatureAdapter;
use crate::model::{Classifier, ModelArtifacts};
use crate::queue::{QueueItem, QueueReceiver};

/// 결과 파일 이름 접두어
pub const OUTPUT_PREFIX: &str = "processed_";

/// 파일 하나의 분류 결과 요약
#[derive(Debug, Clone, Serialize)]
pub struct FileVerdict {
    /// 결과 고유 ID
    pub id: String,
    /// 입력 플로우 파일
    pub source: PathBuf,
    /// 기록된 결과 파일
    pub output: PathBuf,
    /// 분류된 행 수
    pub rows: usize,
    /// 양성으로 예측된 행 수
    pub positives: usize,
    /// 클래스별 행 수
    pub class_counts: BTreeMap<String, usize>,
    pub processed_at: DateTime<Utc>,
}

impl FileVerdict {
    /// 양성 행이 하나라도 있으면 알림 대상
    pub fn is_alert(&self) -> bool {
        self.positives > 0
    }
}

/// 분류 워커
pub struct ClassificationWorker {
    fs: Arc<dyn FileSystem>,
    adapter: FeatureAdapter,
    classifier: Arc<dyn Classifier>,
    processed_dir: PathBuf,
    retry_delay: Duration,
    benign_labels: Vec<String>,
    verdict_tx: Option<mpsc::Sender<FileVerdict>>,
}

impl ClassificationWorker {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        artifacts: &ModelArtifacts,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            fs,
            adapter: FeatureAdapter::new(config.port_policy, Arc::clone(&artifacts.encoders)),
            classifier: Arc::clone(&artifacts.classifier),
            processed_dir: config.processed_dir.clone(),
            retry_delay: config.retry_delay,
            benign_labels: config.benign_labels.clone(),
            verdict_tx: None,
        }
    }

    /// 처리 결과를 보낼 채널을 지정합니다.
    pub fn with_verdict_sender(mut self, tx: mpsc::Sender<FileVerdict>) -> Self {
        self.verdict_tx = Some(tx);
        self
    }

    /// 입력 파일의 결과 파일 경로
    pub fn output_path(&self, input: &Path) -> PathBuf {
        let name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.processed_dir.join(format!("{OUTPUT_PREFIX}{name}"))
    }

    /// 종료 신호를 받거나 큐가 닫힐 때까지 항목을 처리합니다.
    ///
    /// blocking 스레드에서 호출해야 합니다. 성공적으로 처리한 파일 수를 반환합니다.
    pub fn run(self, mut queue: QueueReceiver) -> usize {
        let mut processed = 0;
        while let Some(item) = queue.blocking_recv() {
            match item {
                QueueItem::Process(path) => {
                    if self.handle(&path) {
                        processed += 1;
                    }
                }
                QueueItem::Shutdown => {
                    debug!("worker received shutdown");
                    break;
                }
            }
        }
        info!(processed, "classification worker exited");
        processed
    }

    /// 파일 하나를 처리하고 결과를 기록/전송합니다. 실패는 로그만 남깁니다.
    pub fn handle(&self, path: &Path) -> bool {
        let started = Instant::now();
        match self.process_file(path) {
            Ok(verdict) => {
                metrics::counter!(m::CLASSIFIER_FILES_PROCESSED_TOTAL).increment(1);
                metrics::histogram!(m::CLASSIFIER_FILE_DURATION_SECONDS)
                    .record(started.elapsed().as_secs_f64());
                self.report(verdict);
                true
            }
            Err(e) => {
                metrics::counter!(m::CLASSIFIER_FILES_SKIPPED_TOTAL, m::LABEL_REASON => e.reason())
                    .increment(1);
                warn!(file = %path.display(), reason = e.reason(), error = %e, "skipping flow file");
                false
            }
        }
    }

    /// 파일 하나를 분류하고 결과 파일을 씁니다.
    ///
    /// 잠긴 파일 때문에 실패하면 `retry_delay`만큼 기다린 뒤 전체 과정을 한 번 더 시도합니다.
    ///
    /// # 에러
    /// - 재시도 후에도 잠긴 파일, 읽기/쓰기 실패
    /// - 헤더 누락, 필수 컬럼 누락, 숫자가 아닌 값
    /// - 분류기 실패
    pub fn process_file(&self, path: &Path) -> Result<FileVerdict, ClassifierError> {
        match self.classify_once(path) {
            Err(e) if e.is_locked() => {
                metrics::counter!(m::CLASSIFIER_RETRIES_TOTAL).increment(1);
                warn!(
                    file = %path.display(),
                    delay_ms = self.retry_delay.as_millis() as u64,
                    "flow file locked, retrying once"
                );
                std::thread::sleep(self.retry_delay);
                self.classify_once(path)
            }
            result => result,
        }
    }

    fn classify_once(&self, path: &Path) -> Result<FileVerdict, ClassifierError> {
        let text = self.fs.read_to_string(path)?;
        let mut table = FlowTable::parse(&text)?;

        let features = self.adapter.convert_table(&table)?;
        let predictions = if features.is_empty() {
            Vec::new()
        } else {
            self.classifier.predict(&features)?
        };
        if predictions.len() != features.len() {
            return Err(ClassificationError::Predict(format!(
                "classifier returned {} labels for {} rows",
                predictions.len(),
                features.len()
            ))
            .into());
        }

        let mut class_counts = BTreeMap::new();
        let mut positives = 0;
        for label in &predictions {
            *class_counts.entry(label.clone()).or_insert(0) += 1;
            if is_positive(label, &self.benign_labels) {
                positives += 1;
            }
        }

        let rows = predictions.len();
        table.append_column(PREDICTION_COLUMN, predictions)?;

        let output = self.output_path(path);
        self.fs.write_atomic(&output, table.to_csv().as_bytes())?;

        for (class, count) in &class_counts {
            metrics::counter!(m::CLASSIFIER_ROWS_TOTAL, m::LABEL_CLASS => class.clone())
                .increment(*count as u64);
        }
        metrics::counter!(m::CLASSIFIER_POSITIVE_ROWS_TOTAL).increment(positives as u64);

        Ok(FileVerdict {
            id: Uuid::new_v4().to_string(),
            source: path.to_path_buf(),
            output,
            rows,
            positives,
            class_counts,
            processed_at: Utc::now(),
        })
    }

    fn report(&self, verdict: FileVerdict) {
        info!(
            file = %verdict.source.display(),
            output = %verdict.output.display(),
            rows = verdict.rows,
            positives = verdict.positives,
            "flow file classified"
        );
        for (class, count) in &verdict.class_counts {
            debug!(class = %class, count, "prediction breakdown");
        }

        if verdict.is_alert() {
            metrics::counter!(m::CLASSIFIER_ALERTS_TOTAL).increment(1);
            warn!(
                file = %verdict.source.display(),
                positives = verdict.positives,
                rows = verdict.rows,
                "suspicious flows detected"
            );
        }

        if let Some(tx) = &self.verdict_tx {
            if let Err(e) = tx.try_send(verdict) {
                debug!(error = %e, "verdict channel unavailable, dropping verdict");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::{ENCODERS_JSON, FOREST_JSON};
    use crate::queue::work_queue;
    use flowwatch_core::fs::MemoryFileSystem;

    const FLOWS: &str = "\
Src IP,Dst IP,Src Port,Dst Port,Protocol,State Flags,Duration (s),Total Packets,Total Bytes,Out Bytes
10.0.0.1,10.0.0.2,51000,80,6,\"SYN, ACK\",0.5,3,350,250
10.0.0.3,10.0.0.4,51001,443,6,FIN,4.0,10,5000,1000
";

    fn setup() -> (MemoryFileSystem, ClassificationWorker) {
        let fs = MemoryFileSystem::new();
        fs.add_file("/models/forest.json", FOREST_JSON);
        fs.add_file("/models/enc.json", ENCODERS_JSON);
        let artifacts =
            ModelArtifacts::load(&fs, Path::new("/models"), "forest.json", "enc.json").unwrap();
        let config = PipelineConfig {
            watch_dir: PathBuf::from("/flows"),
            processed_dir: PathBuf::from("/processed"),
            retry_delay: Duration::from_millis(10),
            ..PipelineConfig::default()
        };
        let worker = ClassificationWorker::new(Arc::new(fs.clone()), &artifacts, &config);
        (fs, worker)
    }

    #[test]
    fn classifies_and_appends_prediction_column() {
        let (fs, worker) = setup();
        fs.add_file("/flows/flows_1.csv", FLOWS);

        let verdict = worker.process_file(Path::new("/flows/flows_1.csv")).unwrap();
        assert_eq!(verdict.rows, 2);
        assert_eq!(verdict.positives, 1);
        assert!(verdict.is_alert());
        assert_eq!(verdict.class_counts.get("0"), Some(&1));
        assert_eq!(verdict.class_counts.get("1"), Some(&1));
        assert_eq!(verdict.output, PathBuf::from("/processed/processed_flows_1.csv"));

        let out = FlowTable::parse(&fs.contents(&verdict.output).unwrap()).unwrap();
        assert_eq!(out.headers().last().map(String::as_str), Some("Prediction"));
        assert_eq!(out.record(0).unwrap().get("Prediction"), Some("0"));
        assert_eq!(out.record(1).unwrap().get("Prediction"), Some("1"));
        assert_eq!(out.record(0).unwrap().get("State Flags"), Some("SYN, ACK"));
    }

    #[test]
    fn locked_file_is_retried_once() {
        let (fs, worker) = setup();
        fs.add_file("/flows/locked.csv", FLOWS);
        fs.lock("/flows/locked.csv", 1);

        let verdict = worker.process_file(Path::new("/flows/locked.csv")).unwrap();
        assert_eq!(verdict.rows, 2);
        assert_eq!(fs.read_attempts(Path::new("/flows/locked.csv")), 2);
    }

    #[test]
    fn file_locked_twice_is_skipped() {
        let (fs, worker) = setup();
        fs.add_file("/flows/locked.csv", FLOWS);
        fs.lock("/flows/locked.csv", 2);

        let err = worker.process_file(Path::new("/flows/locked.csv")).unwrap_err();
        assert!(err.is_locked());
        assert_eq!(fs.read_attempts(Path::new("/flows/locked.csv")), 2);
        assert!(!worker.handle(Path::new("/flows/other_missing.csv")));
        assert!(fs.contents(Path::new("/processed/processed_locked.csv")).is_none());
    }

    #[test]
    fn missing_required_column_skips_file() {
        let (fs, worker) = setup();
        fs.add_file("/flows/bad.csv", "Src IP,Dst IP\n1.1.1.1,2.2.2.2\n");
        let err = worker.process_file(Path::new("/flows/bad.csv")).unwrap_err();
        assert_eq!(err.reason(), "schema");
    }

    #[test]
    fn header_only_file_produces_empty_output() {
        let (fs, worker) = setup();
        let header = FLOWS.lines().next().unwrap();
        fs.add_file("/flows/empty.csv", format!("{header}\n"));
        let verdict = worker.process_file(Path::new("/flows/empty.csv")).unwrap();
        assert_eq!(verdict.rows, 0);
        assert!(!verdict.is_alert());
        let out = fs
            .contents(Path::new("/processed/processed_empty.csv"))
            .unwrap();
        assert!(out.starts_with("Src IP,"));
        assert!(out.trim_end().ends_with("Prediction"));
    }

    #[test]
    fn run_processes_in_order_until_shutdown() {
        let (fs, worker) = setup();
        fs.add_file("/flows/a.csv", FLOWS);
        fs.add_file("/flows/b.csv", "garbage\n\"open");
        fs.add_file("/flows/c.csv", FLOWS);

        let (verdict_tx, mut verdict_rx) = mpsc::channel(8);
        let worker = worker.with_verdict_sender(verdict_tx);

        let (tx, rx) = work_queue();
        for name in ["a.csv", "b.csv", "c.csv"] {
            tx.push(QueueItem::Process(PathBuf::from("/flows").join(name)))
                .unwrap();
        }
        tx.push(QueueItem::Shutdown).unwrap();
        tx.push(QueueItem::Process(PathBuf::from("/flows/after.csv")))
            .unwrap();

        assert_eq!(worker.run(rx), 2);

        let first = verdict_rx.try_recv().unwrap();
        let second = verdict_rx.try_recv().unwrap();
        assert_eq!(first.source, PathBuf::from("/flows/a.csv"));
        assert_eq!(second.source, PathBuf::from("/flows/c.csv"));
        assert_ne!(first.id, second.id);
        assert!(verdict_rx.try_recv().is_err());
    }

    #[test]
    fn full_verdict_channel_does_not_block() {
        let (fs, worker) = setup();
        fs.add_file("/flows/a.csv", FLOWS);
        fs.add_file("/flows/b.csv", FLOWS);
        let (verdict_tx, mut verdict_rx) = mpsc::channel(1);
        let worker = worker.with_verdict_sender(verdict_tx);

        assert!(worker.handle(Path::new("/flows/a.csv")));
        assert!(worker.handle(Path::new("/flows/b.csv")));
        assert!(verdict_rx.try_recv().is_ok());
        assert!(verdict_rx.try_recv().is_err());
    }
}
