//! 설정 관리 -- flowwatch.toml 파싱 및 런타임 설정
//!
//! [`FlowwatchConfig`]는 모든 모듈의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`FLOWWATCH_CAPTURE_INTERFACE=eth0` 형식)
//! 3. 설정 파일 (`flowwatch.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), flowwatch_core::error::FlowwatchError> {
//! use flowwatch_core::config::FlowwatchConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = FlowwatchConfig::load("flowwatch.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = FlowwatchConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, FlowwatchError};

/// Flowwatch 통합 설정
///
/// `flowwatch.toml` 파일의 최상위 구조를 나타냅니다.
/// 각 모듈은 자기 섹션만 읽어 사용합니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowwatchConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 패킷 캡처/플로우 집계 설정
    #[serde(default)]
    pub capture: CaptureConfig,
    /// 분류 파이프라인 설정
    #[serde(default)]
    pub pipeline: ClassifierConfig,
    /// 모델 아티팩트 설정
    #[serde(default)]
    pub model: ModelConfig,
    /// Prometheus 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// 대시보드 상태 파일 설정
    #[serde(default)]
    pub status: StatusConfig,
}

impl FlowwatchConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, FlowwatchError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, FlowwatchError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FlowwatchError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                FlowwatchError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, FlowwatchError> {
        toml::from_str(toml_str).map_err(|e| {
            FlowwatchError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `FLOWWATCH_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "FLOWWATCH_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "FLOWWATCH_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.data_dir, "FLOWWATCH_GENERAL_DATA_DIR");
        override_string(&mut self.general.pid_file, "FLOWWATCH_GENERAL_PID_FILE");

        // Capture
        override_bool(&mut self.capture.enabled, "FLOWWATCH_CAPTURE_ENABLED");
        override_string(&mut self.capture.interface, "FLOWWATCH_CAPTURE_INTERFACE");
        override_string(&mut self.capture.pcap_file, "FLOWWATCH_CAPTURE_PCAP_FILE");
        override_u64(&mut self.capture.window_secs, "FLOWWATCH_CAPTURE_WINDOW_SECS");
        override_string(&mut self.capture.output_dir, "FLOWWATCH_CAPTURE_OUTPUT_DIR");
        override_string(&mut self.capture.file_prefix, "FLOWWATCH_CAPTURE_FILE_PREFIX");
        override_u64(
            &mut self.capture.rotate_interval_secs,
            "FLOWWATCH_CAPTURE_ROTATE_INTERVAL_SECS",
        );
        override_bool(
            &mut self.capture.clear_processed_on_stop,
            "FLOWWATCH_CAPTURE_CLEAR_PROCESSED_ON_STOP",
        );

        // Classification pipeline
        override_bool(&mut self.pipeline.enabled, "FLOWWATCH_PIPELINE_ENABLED");
        override_string(&mut self.pipeline.watch_dir, "FLOWWATCH_PIPELINE_WATCH_DIR");
        override_string(
            &mut self.pipeline.processed_dir,
            "FLOWWATCH_PIPELINE_PROCESSED_DIR",
        );
        override_string(&mut self.pipeline.file_suffix, "FLOWWATCH_PIPELINE_FILE_SUFFIX");
        override_u64(
            &mut self.pipeline.retry_delay_ms,
            "FLOWWATCH_PIPELINE_RETRY_DELAY_MS",
        );
        override_string(&mut self.pipeline.port_policy, "FLOWWATCH_PIPELINE_PORT_POLICY");
        override_csv(
            &mut self.pipeline.benign_labels,
            "FLOWWATCH_PIPELINE_BENIGN_LABELS",
        );
        override_usize(
            &mut self.pipeline.queue_warn_depth,
            "FLOWWATCH_PIPELINE_QUEUE_WARN_DEPTH",
        );

        // Model
        override_string(&mut self.model.model_dir, "FLOWWATCH_MODEL_MODEL_DIR");
        override_string(&mut self.model.model_file, "FLOWWATCH_MODEL_MODEL_FILE");
        override_string(&mut self.model.encoders_file, "FLOWWATCH_MODEL_ENCODERS_FILE");

        // Metrics
        override_bool(&mut self.metrics.enabled, "FLOWWATCH_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "FLOWWATCH_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "FLOWWATCH_METRICS_PORT");

        // Status
        override_bool(&mut self.status.enabled, "FLOWWATCH_STATUS_ENABLED");
        override_string(&mut self.status.path, "FLOWWATCH_STATUS_PATH");
        override_u64(&mut self.status.interval_secs, "FLOWWATCH_STATUS_INTERVAL_SECS");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), FlowwatchError> {
        one_of(
            "general.log_level",
            &self.general.log_level,
            &["trace", "debug", "info", "warn", "error"],
        )?;
        one_of(
            "general.log_format",
            &self.general.log_format,
            &["json", "pretty"],
        )?;

        if self.capture.enabled {
            if self.capture.window_secs == 0 {
                return Err(invalid("capture.window_secs", "must be greater than 0"));
            }
            if self.capture.output_dir.is_empty() {
                return Err(invalid("capture.output_dir", "must not be empty"));
            }
            if self.capture.file_prefix.is_empty() {
                return Err(invalid("capture.file_prefix", "must not be empty"));
            }
            if self.capture.interface.is_empty() && self.capture.pcap_file.is_empty() {
                return Err(invalid(
                    "capture.interface",
                    "either an interface or a pcap_file is required",
                ));
            }
        }

        if self.pipeline.enabled {
            one_of(
                "pipeline.port_policy",
                &self.pipeline.port_policy,
                &["allow_list", "hex"],
            )?;
            if self.pipeline.watch_dir.is_empty() {
                return Err(invalid("pipeline.watch_dir", "must not be empty"));
            }
            if self.pipeline.processed_dir.is_empty() {
                return Err(invalid("pipeline.processed_dir", "must not be empty"));
            }
            if self.pipeline.watch_dir == self.pipeline.processed_dir {
                return Err(invalid(
                    "pipeline.processed_dir",
                    "must differ from pipeline.watch_dir",
                ));
            }
            if self.pipeline.queue_warn_depth == 0 {
                return Err(invalid("pipeline.queue_warn_depth", "must be greater than 0"));
            }
        }

        if self.status.enabled && self.status.interval_secs == 0 {
            return Err(invalid("status.interval_secs", "must be greater than 0"));
        }

        Ok(())
    }
}

fn one_of(field: &str, value: &str, allowed: &[&str]) -> Result<(), FlowwatchError> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(invalid(field, &format!("must be one of: {}", allowed.join(", "))))
    }
}

fn invalid(field: &str, reason: &str) -> FlowwatchError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason: reason.to_owned(),
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// 데이터 디렉토리
    pub data_dir: String,
    /// PID 파일 경로 (빈 문자열이면 기록하지 않음)
    pub pid_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            data_dir: "/var/lib/flowwatch".to_owned(),
            pid_file: "/var/run/flowwatch.pid".to_owned(),
        }
    }
}

/// 패킷 캡처 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 라이브 캡처 인터페이스
    pub interface: String,
    /// 재생할 pcap 파일 (지정 시 interface보다 우선)
    pub pcap_file: String,
    /// 캡처 윈도우 길이 (초)
    pub window_secs: u64,
    /// 플로우 파일 출력 디렉토리 (분류 파이프라인의 감시 디렉토리)
    pub output_dir: String,
    /// 플로우 파일 이름 접두어
    pub file_prefix: String,
    /// 캡처 중 주기적 내보내기 간격 (초, 0이면 비활성)
    pub rotate_interval_secs: u64,
    /// 캡처 정지 시 분류 결과 디렉토리 비우기
    pub clear_processed_on_stop: bool,
    /// pcap 스냅샷 길이
    pub snaplen: i32,
    /// promiscuous 모드
    pub promiscuous: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interface: "eth0".to_owned(),
            pcap_file: String::new(),
            window_secs: 5,
            output_dir: "/var/lib/flowwatch/flows".to_owned(),
            file_prefix: "network_traffic".to_owned(),
            rotate_interval_secs: 0,
            clear_processed_on_stop: true,
            snaplen: 65535,
            promiscuous: true,
        }
    }
}

/// 분류 파이프라인 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 새 플로우 파일을 감시할 디렉토리
    pub watch_dir: String,
    /// 분류 결과 파일 디렉토리
    pub processed_dir: String,
    /// 처리 대상 파일 접미어
    pub file_suffix: String,
    /// 잠긴 파일 재시도 대기 시간 (밀리초)
    pub retry_delay_ms: u64,
    /// 포트 정규화 정책 (allow_list, hex)
    pub port_policy: String,
    /// 양성(정상)으로 간주하는 예측 레이블
    pub benign_labels: Vec<String>,
    /// 큐 깊이 경고 임계값
    pub queue_warn_depth: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            watch_dir: "/var/lib/flowwatch/flows".to_owned(),
            processed_dir: "/var/lib/flowwatch/processed".to_owned(),
            file_suffix: ".csv".to_owned(),
            retry_delay_ms: 2000,
            port_policy: "allow_list".to_owned(),
            benign_labels: vec![
                "benign".to_owned(),
                "normal".to_owned(),
                "background".to_owned(),
            ],
            queue_warn_depth: 100,
        }
    }
}

/// 모델 아티팩트 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// 아티팩트 디렉토리
    pub model_dir: String,
    /// 결정 포레스트 파일
    pub model_file: String,
    /// 카테고리 인코더 파일
    pub encoders_file: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_dir: "/var/lib/flowwatch/models".to_owned(),
            model_file: "random_forest_model.json".to_owned(),
            encoders_file: "label_encoders.json".to_owned(),
        }
    }
}

/// Prometheus 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 바인드 주소
    pub listen_addr: String,
    /// 포트
    pub port: u16,
    /// 스크레이프 경로
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9100,
            endpoint: "/metrics".to_owned(),
        }
    }
}

/// 대시보드 상태 파일 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// JSON 스냅샷 경로
    pub path: String,
    /// 갱신 주기 (초)
    pub interval_secs: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "/var/lib/flowwatch/status.json".to_owned(),
            interval_secs: 5,
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_parsed<T: std::str::FromStr>(target: &mut T, env_key: &str, type_name: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                expected = type_name,
                "failed to parse env var, ignoring"
            ),
        }
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    override_parsed(target, env_key, "bool");
}

fn override_usize(target: &mut usize, env_key: &str) {
    override_parsed(target, env_key, "usize");
}

fn override_u16(target: &mut u16, env_key: &str) {
    override_parsed(target, env_key, "u16");
}

fn override_u64(target: &mut u64, env_key: &str) {
    override_parsed(target, env_key, "u64");
}

fn override_csv(target: &mut Vec<String>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect();
    }
}
