//! 플로우 엔진 설정
//!
//! [`EngineConfig`]는 core의 [`CaptureConfig`]에서 파생되며, 캡처 정지 시
//! 비울 분류 결과 디렉토리를 분류 파이프라인 설정에서 함께 가져옵니다.

use std::path::PathBuf;
use std::time::Duration;

use flowwatch_core::config::{CaptureConfig, ClassifierConfig};
use flowwatch_core::fs::absolute_dir;

use crate::error::FlowEngineError;

/// 캡처 대상
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureTarget {
    /// 네트워크 인터페이스 라이브 캡처
    Interface(String),
    /// 저장된 pcap 파일 재생
    File(PathBuf),
}

/// 플로우 엔진 설정
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// 캡처 대상
    pub target: CaptureTarget,
    /// 캡처 윈도우 길이. 정지 플래그는 윈도우 경계에서만 확인됩니다.
    pub window: Duration,
    /// 플로우 파일 출력 디렉토리
    pub output_dir: PathBuf,
    /// 플로우 파일 이름 접두어
    pub file_prefix: String,
    /// 정지 시 내용을 비울 분류 결과 디렉토리
    pub processed_dir: Option<PathBuf>,
    /// pcap 스냅샷 길이
    pub snaplen: i32,
    /// promiscuous 모드
    pub promiscuous: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_core(&CaptureConfig::default(), &ClassifierConfig::default())
    }
}

impl EngineConfig {
    /// core 설정에서 엔진 설정을 생성합니다.
    pub fn from_core(capture: &CaptureConfig, pipeline: &ClassifierConfig) -> Self {
        let target = if capture.pcap_file.is_empty() {
            CaptureTarget::Interface(capture.interface.clone())
        } else {
            CaptureTarget::File(PathBuf::from(&capture.pcap_file))
        };
        let processed_dir = (capture.clear_processed_on_stop
            && !pipeline.processed_dir.is_empty())
        .then(|| absolute_dir(&pipeline.processed_dir));

        Self {
            target,
            window: Duration::from_secs(capture.window_secs),
            output_dir: absolute_dir(&capture.output_dir),
            file_prefix: capture.file_prefix.clone(),
            processed_dir,
            snaplen: capture.snaplen,
            promiscuous: capture.promiscuous,
        }
    }

    /// 설정 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), FlowEngineError> {
        if self.window.is_zero() {
            return Err(FlowEngineError::Config {
                field: "window".to_owned(),
                reason: "capture window must be greater than 0".to_owned(),
            });
        }
        if self.file_prefix.is_empty() || self.file_prefix.contains(['/', '\\']) {
            return Err(FlowEngineError::Config {
                field: "file_prefix".to_owned(),
                reason: "must be a non-empty file name fragment".to_owned(),
            });
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(FlowEngineError::Config {
                field: "output_dir".to_owned(),
                reason: "must not be empty".to_owned(),
            });
        }
        if self.processed_dir.as_ref() == Some(&self.output_dir) {
            return Err(FlowEngineError::Config {
                field: "processed_dir".to_owned(),
                reason: "clearing the flow output directory would delete pending flow files"
                    .to_owned(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_core_prefers_pcap_file_over_interface() {
        let capture = CaptureConfig {
            pcap_file: "/tmp/trace.pcap".to_owned(),
            ..CaptureConfig::default()
        };
        let config = EngineConfig::from_core(&capture, &ClassifierConfig::default());
        assert_eq!(
            config.target,
            CaptureTarget::File(PathBuf::from("/tmp/trace.pcap"))
        );
    }

    #[test]
    fn from_core_maps_window_and_processed_dir() {
        let config = EngineConfig::default();
        assert_eq!(config.window, Duration::from_secs(5));
        assert_eq!(
            config.processed_dir,
            Some(PathBuf::from("/var/lib/flowwatch/processed"))
        );
    }

    #[test]
    fn relative_output_dir_matches_watch_path() {
        let capture = CaptureConfig {
            output_dir: "data/flows".to_owned(),
            ..CaptureConfig::default()
        };
        let pipeline = ClassifierConfig {
            processed_dir: "data/processed".to_owned(),
            ..ClassifierConfig::default()
        };
        let config = EngineConfig::from_core(&capture, &pipeline);
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(config.output_dir, cwd.join("data/flows"));
        assert_eq!(config.processed_dir, Some(cwd.join("data/processed")));
    }

    #[test]
    fn processed_dir_is_none_when_clearing_disabled() {
        let capture = CaptureConfig {
            clear_processed_on_stop: false,
            ..CaptureConfig::default()
        };
        let config = EngineConfig::from_core(&capture, &ClassifierConfig::default());
        assert!(config.processed_dir.is_none());
    }

    #[test]
    fn validate_rejects_zero_window() {
        let config = EngineConfig {
            window: Duration::ZERO,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_prefix_with_separator() {
        let config = EngineConfig {
            file_prefix: "../flows".to_owned(),
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_clearing_output_dir() {
        let mut config = EngineConfig::default();
        config.processed_dir = Some(config.output_dir.clone());
        assert!(config.validate().is_err());
    }
}
