//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`
//! 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `flowwatch_`
//! - 모듈명: `capture_`, `classifier_`, `daemon_`
//! - 접미어: `_total` (counter), `_seconds` (histogram/latency), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(flowwatch_core::metrics::CAPTURE_PACKETS_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 예측 클래스 레이블 키
pub const LABEL_CLASS: &str = "class";

/// 건너뛴 사유 레이블 키 (locked, schema, io, classification)
pub const LABEL_REASON: &str = "reason";

// ─── Capture 메트릭 ─────────────────────────────────────────────────

/// Capture: 트래커에 반영된 패킷 수 (counter)
pub const CAPTURE_PACKETS_TOTAL: &str = "flowwatch_capture_packets_total";

/// Capture: 트래커에 반영된 바이트 수 (counter)
pub const CAPTURE_BYTES_TOTAL: &str = "flowwatch_capture_bytes_total";

/// Capture: 현재 추적 중인 연결 수 (gauge)
pub const CAPTURE_ACTIVE_FLOWS: &str = "flowwatch_capture_active_flows";

/// Capture: 완료된 캡처 윈도우 수 (counter)
pub const CAPTURE_WINDOWS_TOTAL: &str = "flowwatch_capture_windows_total";

/// Capture: 캡처 루프 에러 수 (counter)
pub const CAPTURE_ERRORS_TOTAL: &str = "flowwatch_capture_errors_total";

/// Capture: 내보낸 플로우 파일 수 (counter)
pub const CAPTURE_FILES_EXPORTED_TOTAL: &str = "flowwatch_capture_files_exported_total";

/// Capture: 내보낸 플로우 레코드 수 (counter)
pub const CAPTURE_RECORDS_EXPORTED_TOTAL: &str = "flowwatch_capture_records_exported_total";

// ─── Classifier 메트릭 ──────────────────────────────────────────────

/// Classifier: 큐에 넣은 파일 수 (counter)
pub const CLASSIFIER_FILES_ENQUEUED_TOTAL: &str = "flowwatch_classifier_files_enqueued_total";

/// Classifier: 중복으로 무시한 파일 알림 수 (counter)
pub const CLASSIFIER_DUPLICATES_TOTAL: &str = "flowwatch_classifier_duplicates_total";

/// Classifier: 현재 큐 깊이 (gauge)
pub const CLASSIFIER_QUEUE_DEPTH: &str = "flowwatch_classifier_queue_depth";

/// Classifier: 이미 본 경로 집합 크기 (gauge)
pub const CLASSIFIER_SEEN_PATHS: &str = "flowwatch_classifier_seen_paths";

/// Classifier: 처리 완료된 파일 수 (counter)
pub const CLASSIFIER_FILES_PROCESSED_TOTAL: &str = "flowwatch_classifier_files_processed_total";

/// Classifier: 건너뛴 파일 수 (counter, label: reason)
pub const CLASSIFIER_FILES_SKIPPED_TOTAL: &str = "flowwatch_classifier_files_skipped_total";

/// Classifier: 잠긴 파일 재시도 수 (counter)
pub const CLASSIFIER_RETRIES_TOTAL: &str = "flowwatch_classifier_retries_total";

/// Classifier: 분류된 행 수 (counter, label: class)
pub const CLASSIFIER_ROWS_TOTAL: &str = "flowwatch_classifier_rows_total";

/// Classifier: 악성으로 예측된 행 수 (counter)
pub const CLASSIFIER_POSITIVE_ROWS_TOTAL: &str = "flowwatch_classifier_positive_rows_total";

/// Classifier: 발생한 알림 수 (counter)
pub const CLASSIFIER_ALERTS_TOTAL: &str = "flowwatch_classifier_alerts_total";

/// Classifier: 파일 하나 처리 시간 (histogram, 초)
pub const CLASSIFIER_FILE_DURATION_SECONDS: &str = "flowwatch_classifier_file_duration_seconds";

// ─── Daemon 메트릭 ──────────────────────────────────────────────────

/// Daemon: 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "flowwatch_daemon_uptime_seconds";

/// Daemon: 빌드 정보 (gauge, label: version)
pub const DAEMON_BUILD_INFO: &str = "flowwatch_daemon_build_info";

/// 모든 메트릭의 설명을 등록합니다.
///
/// 메트릭 레코더 설치 직후 한 번 호출합니다.
/// `metrics::describe_counter!()`, `describe_gauge!()`, `describe_histogram!()`을
/// 사용하여 Prometheus HELP 텍스트를 설정합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    // Capture
    describe_counter!(
        CAPTURE_PACKETS_TOTAL,
        "Total number of packets folded into flow records"
    );
    describe_counter!(
        CAPTURE_BYTES_TOTAL,
        "Total bytes of packets folded into flow records"
    );
    describe_gauge!(
        CAPTURE_ACTIVE_FLOWS,
        "Number of connections currently tracked"
    );
    describe_counter!(
        CAPTURE_WINDOWS_TOTAL,
        "Total number of completed capture windows"
    );
    describe_counter!(CAPTURE_ERRORS_TOTAL, "Total number of capture loop errors");
    describe_counter!(
        CAPTURE_FILES_EXPORTED_TOTAL,
        "Total number of flow files written"
    );
    describe_counter!(
        CAPTURE_RECORDS_EXPORTED_TOTAL,
        "Total number of flow records written to flow files"
    );

    // Classifier
    describe_counter!(
        CLASSIFIER_FILES_ENQUEUED_TOTAL,
        "Total number of flow files enqueued for classification"
    );
    describe_counter!(
        CLASSIFIER_DUPLICATES_TOTAL,
        "Total number of file notifications ignored as already seen"
    );
    describe_gauge!(
        CLASSIFIER_QUEUE_DEPTH,
        "Number of flow files waiting for the classification worker"
    );
    describe_gauge!(
        CLASSIFIER_SEEN_PATHS,
        "Number of paths remembered by the ingest watcher"
    );
    describe_counter!(
        CLASSIFIER_FILES_PROCESSED_TOTAL,
        "Total number of flow files classified and written"
    );
    describe_counter!(
        CLASSIFIER_FILES_SKIPPED_TOTAL,
        "Total number of flow files skipped after an error"
    );
    describe_counter!(
        CLASSIFIER_RETRIES_TOTAL,
        "Total number of retries after a locked flow file"
    );
    describe_counter!(CLASSIFIER_ROWS_TOTAL, "Classified rows per predicted class");
    describe_counter!(
        CLASSIFIER_POSITIVE_ROWS_TOTAL,
        "Total number of rows predicted malicious"
    );
    describe_counter!(
        CLASSIFIER_ALERTS_TOTAL,
        "Total number of files that raised an alert"
    );
    describe_histogram!(
        CLASSIFIER_FILE_DURATION_SECONDS,
        "Time to classify one flow file in seconds"
    );

    // Daemon
    describe_gauge!(DAEMON_UPTIME_SECONDS, "Flowwatch daemon uptime in seconds");
    describe_gauge!(
        DAEMON_BUILD_INFO,
        "Build information (always 1, labeled with version)"
    );
}
