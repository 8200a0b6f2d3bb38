//! 에러 타입 -- 도메인별 에러 정의

use crate::fs::FsError;

/// Flowwatch 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum FlowwatchError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 파이프라인 생명주기 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// 패킷 캡처 에러
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    /// 플로우 파일 스키마 에러
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// 분류기 에러
    #[error("classification error: {0}")]
    Classification(#[from] ClassificationError),

    /// 파일시스템 에러
    #[error("fs error: {0}")]
    Fs(#[from] FsError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 파이프라인 생명주기 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 채널 전송 실패
    #[error("channel send failed: {0}")]
    ChannelSend(String),

    /// 파이프라인 초기화 실패
    #[error("pipeline init failed: {0}")]
    InitFailed(String),

    /// 백그라운드 태스크 비정상 종료
    #[error("background task failed: {0}")]
    TaskFailed(String),

    /// 이미 실행 중
    #[error("pipeline is already running")]
    AlreadyRunning,

    /// 실행 중이 아님
    #[error("pipeline is not running")]
    NotRunning,
}

/// 패킷 캡처 에러
///
/// 캡처 컨트롤러에 치명적이며 호출자에게 그대로 전달됩니다.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CaptureError {
    /// 캡처 소스를 사용할 수 없음 (feature 미포함, 장치 없음 등)
    #[error("capture source unavailable: {0}")]
    Unavailable(String),

    /// 권한 부족
    #[error("insufficient privilege: {0}")]
    PermissionDenied(String),

    /// 캡처 장치 오류
    #[error("capture device failure: {0}")]
    Device(String),

    /// 입력 채널이 닫힘
    #[error("packet source closed")]
    Closed,
}

/// 플로우 파일 스키마 에러 -- 해당 파일 하나만 중단합니다.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// 필수 컬럼 누락
    #[error("missing required column '{column}'")]
    MissingColumn { column: String },

    /// 숫자로 해석할 수 없는 값
    #[error("invalid value '{value}' in column '{column}' at row {row}")]
    InvalidValue {
        column: String,
        row: usize,
        value: String,
    },

    /// 헤더와 컬럼 수가 맞지 않는 행
    #[error("row {row} has {actual} fields, expected {expected}")]
    RowWidth {
        row: usize,
        expected: usize,
        actual: usize,
    },

    /// 헤더 행이 없음
    #[error("file has no header row")]
    MissingHeader,

    /// 닫히지 않은 따옴표
    #[error("unterminated quoted field at line {line}")]
    UnterminatedQuote { line: usize },
}

/// 분류기 에러
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClassificationError {
    /// 모델/인코더 아티팩트 파일 없음 (시작 시 치명적)
    #[error("model artifact not found: {path}")]
    ArtifactMissing { path: String },

    /// 아티팩트 형식 오류
    #[error("invalid model artifact {path}: {reason}")]
    ArtifactInvalid { path: String, reason: String },

    /// 인코더 메타데이터에 컬럼 없음
    #[error("no category encoder for column '{column}'")]
    EncoderMissing { column: String },

    /// 예측 실패
    #[error("prediction failed: {0}")]
    Predict(String),
}
