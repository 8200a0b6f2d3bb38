//! 알림 집계 -- 분류 결과 디렉토리를 스캔해 알림 통계를 계산합니다.
//!
//! [`AlertAggregator`]는 캐시 없이 요청마다 결과 디렉토리의 모든 파일을 다시 읽습니다.
//! 캡처 정지 시 결과 디렉토리가 비워지므로 통계는 현재 캡처 주기 기준입니다.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use flowwatch_core::fs::FileSystem;
use flowwatch_core::table::FlowTable;

/// 예측 결과 컬럼 이름
pub const PREDICTION_COLUMN: &str = "Prediction";

/// 알림 통계
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertStats {
    /// 분류된 전체 연결 수
    pub total_connections: u64,
    /// 양성(비정상)으로 예측된 연결 수
    pub predicted_alerts: u64,
    /// `predicted_alerts / total_connections` (연결이 없으면 0)
    pub ratio: f64,
}

/// 양성으로 예측된 연결
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertEntry {
    pub src_ip: String,
    pub dst_ip: String,
}

/// 통계와 양성 연결 목록
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertReport {
    pub alerts: Vec<AlertEntry>,
    pub stats: AlertStats,
}

/// 예측 레이블이 양성(알림 대상)인지 판정합니다.
///
/// 0이 아닌 숫자이거나, `benign_labels`(소문자)에 없는 문자열 레이블이면 양성입니다.
pub fn is_positive(prediction: &str, benign_labels: &[String]) -> bool {
    let prediction = prediction.trim();
    if prediction.is_empty() {
        return false;
    }
    if let Ok(value) = prediction.parse::<f64>() {
        return value != 0.0;
    }
    let lower = prediction.to_lowercase();
    !benign_labels.iter().any(|b| *b == lower)
}

/// 분류 결과 디렉토리 알림 집계기
#[derive(Clone)]
pub struct AlertAggregator {
    fs: Arc<dyn FileSystem>,
    processed_dir: PathBuf,
    suffix: String,
    benign_labels: Vec<String>,
}

impl AlertAggregator {
    /// 새 집계기를 생성합니다. `benign_labels`는 대소문자를 구분하지 않습니다.
    pub fn new(
        fs: Arc<dyn FileSystem>,
        processed_dir: impl Into<PathBuf>,
        benign_labels: &[String],
    ) -> Self {
        Self {
            fs,
            processed_dir: processed_dir.into(),
            suffix: ".csv".to_owned(),
            benign_labels: benign_labels.iter().map(|l| l.trim().to_lowercase()).collect(),
        }
    }

    /// 스캔할 파일 접미어를 지정합니다 (기본: `.csv`).
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    pub fn processed_dir(&self) -> &Path {
        &self.processed_dir
    }

    /// 통계만 계산합니다.
    pub fn compute_stats(&self) -> AlertStats {
        self.scan(false).stats
    }

    /// 통계와 양성 연결 목록을 계산합니다.
    pub fn compute_report(&self) -> AlertReport {
        self.scan(true)
    }

    fn scan(&self, collect: bool) -> AlertReport {
        let mut report = AlertReport::default();

        let files = match self.fs.list_files(&self.processed_dir, &self.suffix) {
            Ok(files) => files,
            Err(e) if e.is_not_found() => {
                debug!(dir = %self.processed_dir.display(), "processed directory missing");
                return report;
            }
            Err(e) => {
                warn!(error = %e, "failed to list processed directory");
                return report;
            }
        };

        for path in files {
            let table = match self
                .fs
                .read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|text| FlowTable::parse(&text).map_err(|e| e.to_string()))
            {
                Ok(table) => table,
                Err(reason) => {
                    warn!(file = %path.display(), error = %reason, "skipping unreadable result file");
                    continue;
                }
            };

            for record in table.records() {
                report.stats.total_connections += 1;
                let positive = record
                    .get(PREDICTION_COLUMN)
                    .is_some_and(|p| is_positive(p, &self.benign_labels));
                if !positive {
                    continue;
                }
                report.stats.predicted_alerts += 1;
                if collect {
                    report.alerts.push(AlertEntry {
                        src_ip: record.get("Src IP").unwrap_or("N/A").to_owned(),
                        dst_ip: record.get("Dst IP").unwrap_or("N/A").to_owned(),
                    });
                }
            }
        }

        if report.stats.total_connections > 0 {
            report.stats.ratio =
                report.stats.predicted_alerts as f64 / report.stats.total_connections as f64;
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowwatch_core::fs::MemoryFileSystem;

    fn benign() -> Vec<String> {
        vec!["benign".to_owned(), "normal".to_owned(), "background".to_owned()]
    }

    #[test]
    fn positive_predictions() {
        let labels = benign();
        assert!(is_positive("1", &labels));
        assert!(is_positive("2", &labels));
        assert!(is_positive("1.0", &labels));
        assert!(!is_positive("0", &labels));
        assert!(!is_positive("", &labels));
        assert!(!is_positive("Benign", &labels));
        assert!(!is_positive("BACKGROUND", &labels));
        assert!(is_positive("Botnet", &labels));
    }

    #[test]
    fn stats_over_all_processed_files() {
        let fs = MemoryFileSystem::new();
        fs.add_file(
            "/processed/processed_a.csv",
            "Src IP,Dst IP,Prediction\n10.0.0.1,10.0.0.2,0\n10.0.0.3,10.0.0.4,1\n",
        );
        fs.add_file(
            "/processed/processed_b.csv",
            "Src IP,Dst IP,Prediction\n10.0.0.5,10.0.0.6,Botnet\n10.0.0.7,10.0.0.8,normal\n",
        );
        fs.add_file("/processed/notes.txt", "ignored");

        let aggregator = AlertAggregator::new(Arc::new(fs), "/processed", &benign());
        let report = aggregator.compute_report();
        assert_eq!(report.stats.total_connections, 4);
        assert_eq!(report.stats.predicted_alerts, 2);
        assert_eq!(report.stats.ratio, 0.5);
        assert_eq!(
            report.alerts,
            vec![
                AlertEntry {
                    src_ip: "10.0.0.3".to_owned(),
                    dst_ip: "10.0.0.4".to_owned()
                },
                AlertEntry {
                    src_ip: "10.0.0.5".to_owned(),
                    dst_ip: "10.0.0.6".to_owned()
                },
            ]
        );
        assert_eq!(aggregator.compute_stats(), report.stats);
    }

    #[test]
    fn ten_rows_two_alerts_gives_one_fifth() {
        let mut csv = String::from("Src IP,Dst IP,Prediction\n");
        for i in 0..10 {
            let label = if i == 3 || i == 7 { "1" } else { "0" };
            csv.push_str(&format!("10.0.0.{i},10.0.1.{i},{label}\n"));
        }
        let fs = MemoryFileSystem::new();
        fs.add_file("/processed/processed_flows.csv", csv);

        let aggregator = AlertAggregator::new(Arc::new(fs), "/processed", &benign());
        let report = aggregator.compute_report();
        assert_eq!(
            report.stats,
            AlertStats {
                total_connections: 10,
                predicted_alerts: 2,
                ratio: 0.2,
            }
        );
        assert_eq!(report.alerts.len(), 2);
        assert_eq!(report.alerts[0].src_ip, "10.0.0.3");
        assert_eq!(report.alerts[1].src_ip, "10.0.0.7");
    }

    #[test]
    fn missing_directory_yields_zero_stats() {
        let aggregator =
            AlertAggregator::new(Arc::new(MemoryFileSystem::new()), "/nowhere", &benign());
        assert_eq!(aggregator.compute_stats(), AlertStats::default());
    }

    #[test]
    fn unreadable_files_are_skipped() {
        let fs = MemoryFileSystem::new();
        fs.add_file("/processed/bad.csv", "a,b\n\"unterminated\n");
        fs.add_file("/processed/good.csv", "Src IP,Dst IP,Prediction\n1.1.1.1,2.2.2.2,1\n");
        fs.lock("/processed/locked.csv", 10);
        fs.add_file("/processed/locked.csv", "Src IP,Dst IP,Prediction\n1,2,1\n");

        let aggregator = AlertAggregator::new(Arc::new(fs), "/processed", &benign());
        let stats = aggregator.compute_stats();
        assert_eq!(stats.total_connections, 1);
        assert_eq!(stats.predicted_alerts, 1);
    }

    #[test]
    fn rows_without_prediction_count_as_connections_only() {
        let fs = MemoryFileSystem::new();
        fs.add_file("/processed/x.csv", "Src IP,Dst IP\n1.1.1.1,2.2.2.2\n");
        let aggregator = AlertAggregator::new(Arc::new(fs), "/processed", &benign());
        let stats = aggregator.compute_stats();
        assert_eq!(stats.total_connections, 1);
        assert_eq!(stats.predicted_alerts, 0);
        assert_eq!(stats.ratio, 0.0);
    }
}
