//! 플로우 엔진 에러 타입
//!
//! [`FlowEngineError`]는 캡처 루프, 플로우 파일 내보내기, 설정 검증에서 발생합니다.
//! `From<FlowEngineError> for FlowwatchError`가 구현되어 있어 상위 레이어에서
//! `?`로 전파할 수 있습니다.

use flowwatch_core::error::{CaptureError, ConfigError, FlowwatchError, PipelineError};
use flowwatch_core::fs::FsError;

/// 플로우 엔진 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum FlowEngineError {
    /// 패킷 소스 에러
    #[error("capture: {0}")]
    Capture(#[from] CaptureError),

    /// 플로우 파일 쓰기 또는 디렉토리 정리 실패
    #[error("flow file: {0}")]
    Fs(#[from] FsError),

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 문제 필드
        field: String,
        /// 사유
        reason: String,
    },

    /// 캡처 스레드가 비정상 종료됨
    #[error("capture task failed: {0}")]
    Task(String),
}

impl From<FlowEngineError> for FlowwatchError {
    fn from(err: FlowEngineError) -> Self {
        match err {
            FlowEngineError::Capture(e) => FlowwatchError::Capture(e),
            FlowEngineError::Fs(e) => FlowwatchError::Fs(e),
            FlowEngineError::Config { field, reason } => {
                FlowwatchError::Config(ConfigError::InvalidValue { field, reason })
            }
            FlowEngineError::Task(reason) => {
                FlowwatchError::Pipeline(PipelineError::TaskFailed(reason))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_error_keeps_its_kind_upward() {
        let err: FlowwatchError =
            FlowEngineError::Capture(CaptureError::PermissionDenied("eth0".to_owned())).into();
        assert!(matches!(
            err,
            FlowwatchError::Capture(CaptureError::PermissionDenied(_))
        ));
    }

    #[test]
    fn config_error_maps_to_invalid_value() {
        let err: FlowwatchError = FlowEngineError::Config {
            field: "window".to_owned(),
            reason: "zero".to_owned(),
        }
        .into();
        assert!(err.to_string().contains("window"));
    }
}
