//! 분류 파이프라인 에러 타입
//!
//! [`ClassifierError`]는 감시, 파일 처리, 모델 로드 과정의 에러를 표현합니다.
//! 파일 하나의 처리 실패는 워커가 로그로 남기고 다음 항목으로 넘어가며,
//! 시작 시점의 실패(아티팩트 누락, 감시 등록 실패)만 호출자에게 전달됩니다.

use flowwatch_core::error::{
    ClassificationError, ConfigError, FlowwatchError, PipelineError, SchemaError,
};
use flowwatch_core::fs::FsError;

/// 분류 파이프라인 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    /// 플로우 파일 형식 에러
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// 모델/인코더 에러
    #[error("classification error: {0}")]
    Classification(#[from] ClassificationError),

    /// 파일 읽기/쓰기 에러
    #[error("file error: {0}")]
    Fs(#[from] FsError),

    /// 디렉토리 감시 등록 실패
    #[error("watch error: {path}: {reason}")]
    Watch {
        /// 감시 대상 경로
        path: String,
        /// 실패 사유
        reason: String,
    },

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 작업 큐가 닫힘
    #[error("channel error: {0}")]
    Channel(String),
}

impl ClassifierError {
    /// 잠긴 파일 때문에 실패했는지 여부 (재시도 대상)
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Fs(e) if e.is_locked())
    }

    /// 메트릭/로그용 짧은 분류 이름
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Schema(_) => "schema",
            Self::Classification(_) => "classification",
            Self::Fs(e) if e.is_locked() => "locked",
            Self::Fs(_) => "io",
            Self::Watch { .. } => "watch",
            Self::Config { .. } => "config",
            Self::Channel(_) => "channel",
        }
    }
}

impl From<ClassifierError> for FlowwatchError {
    fn from(err: ClassifierError) -> Self {
        match err {
            ClassifierError::Schema(e) => FlowwatchError::Schema(e),
            ClassifierError::Classification(e) => FlowwatchError::Classification(e),
            ClassifierError::Fs(e) => FlowwatchError::Fs(e),
            ClassifierError::Config { field, reason } => {
                FlowwatchError::Config(ConfigError::InvalidValue { field, reason })
            }
            other => FlowwatchError::Pipeline(PipelineError::InitFailed(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_error_display() {
        let err = ClassifierError::Watch {
            path: "/var/lib/flowwatch/flows".to_owned(),
            reason: "no such directory".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("/var/lib/flowwatch/flows"));
        assert!(msg.contains("no such directory"));
    }

    #[test]
    fn artifact_error_keeps_kind_upward() {
        let err: FlowwatchError = ClassifierError::Classification(
            ClassificationError::ArtifactMissing {
                path: "models/forest.json".to_owned(),
            },
        )
        .into();
        assert!(matches!(
            err,
            FlowwatchError::Classification(ClassificationError::ArtifactMissing { .. })
        ));
    }

    #[test]
    fn channel_error_becomes_pipeline_error() {
        let err: FlowwatchError = ClassifierError::Channel("queue closed".to_owned()).into();
        assert!(matches!(err, FlowwatchError::Pipeline(_)));
    }

    #[test]
    fn reason_names_are_short() {
        let err = ClassifierError::Schema(SchemaError::MissingHeader);
        assert_eq!(err.reason(), "schema");
        assert!(!err.is_locked());
    }
}
