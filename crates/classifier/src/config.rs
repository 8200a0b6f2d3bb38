//! 분류 파이프라인 설정
//!
//! [`PipelineConfig`]는 core의 [`ClassifierConfig`]와 [`ModelConfig`]를 합쳐
//! 파이프라인 내부에서 쓰는 타입(경로, `Duration`, [`PortPolicy`])으로 변환한 것입니다.
//!
//! # 사용 예시
//! ```ignore
//! use flowwatch_core::config::FlowwatchConfig;
//! use flowwatch_classifier::config::PipelineConfig;
//!
//! let core_config = FlowwatchConfig::default();
//! let config = PipelineConfig::from_core(&core_config.pipeline, &core_config.model)?;
//! ```

use std::path::PathBuf;
use std::time::Duration;

use flowwatch_core::config::{ClassifierConfig, ModelConfig};
use flowwatch_core::fs::absolute_dir;

use crate::error::ClassifierError;
use crate::feature::PortPolicy;

/// 분류 파이프라인 설정
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// 감시 디렉토리 (비재귀)
    pub watch_dir: PathBuf,
    /// 분류 결과 출력 디렉토리
    pub processed_dir: PathBuf,
    /// 처리 대상 파일 접미어
    pub file_suffix: String,
    /// 잠긴 파일 재시도 전 대기 시간
    pub retry_delay: Duration,
    /// 포트 정규화 정책
    pub port_policy: PortPolicy,
    /// 정상으로 간주하는 예측 레이블 (소문자)
    pub benign_labels: Vec<String>,
    /// 이 깊이를 넘으면 health가 Degraded
    pub queue_warn_depth: usize,
    /// 모델 아티팩트 디렉토리
    pub model_dir: PathBuf,
    /// 결정 포레스트 파일 이름
    pub model_file: String,
    /// 카테고리 인코더 파일 이름
    pub encoders_file: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let core = ClassifierConfig::default();
        let model = ModelConfig::default();
        Self {
            watch_dir: absolute_dir(&core.watch_dir),
            processed_dir: absolute_dir(&core.processed_dir),
            file_suffix: core.file_suffix,
            retry_delay: Duration::from_millis(core.retry_delay_ms),
            port_policy: PortPolicy::AllowList,
            benign_labels: lowercase(&core.benign_labels),
            queue_warn_depth: core.queue_warn_depth,
            model_dir: PathBuf::from(model.model_dir),
            model_file: model.model_file,
            encoders_file: model.encoders_file,
        }
    }
}

impl PipelineConfig {
    /// core 설정에서 파이프라인 설정을 생성합니다.
    ///
    /// # 에러
    /// 알 수 없는 포트 정책 이름
    pub fn from_core(
        core: &ClassifierConfig,
        model: &ModelConfig,
    ) -> Result<Self, ClassifierError> {
        let port_policy = core.port_policy.parse().map_err(|reason| ClassifierError::Config {
            field: "pipeline.port_policy".to_owned(),
            reason,
        })?;

        Ok(Self {
            watch_dir: absolute_dir(&core.watch_dir),
            processed_dir: absolute_dir(&core.processed_dir),
            file_suffix: core.file_suffix.clone(),
            retry_delay: Duration::from_millis(core.retry_delay_ms),
            port_policy,
            benign_labels: lowercase(&core.benign_labels),
            queue_warn_depth: core.queue_warn_depth,
            model_dir: PathBuf::from(&model.model_dir),
            model_file: model.model_file.clone(),
            encoders_file: model.encoders_file.clone(),
        })
    }

    /// 모델 파일 전체 경로
    pub fn model_path(&self) -> PathBuf {
        self.model_dir.join(&self.model_file)
    }

    /// 인코더 파일 전체 경로
    pub fn encoders_path(&self) -> PathBuf {
        self.model_dir.join(&self.encoders_file)
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), ClassifierError> {
        if self.watch_dir.as_os_str().is_empty() {
            return Err(config_err("watch_dir", "must not be empty"));
        }
        if self.processed_dir.as_os_str().is_empty() {
            return Err(config_err("processed_dir", "must not be empty"));
        }
        if self.watch_dir == self.processed_dir {
            return Err(config_err(
                "processed_dir",
                "must differ from watch_dir, outputs would be re-enqueued",
            ));
        }
        if self.file_suffix.is_empty() {
            return Err(config_err("file_suffix", "must not be empty"));
        }
        if self.queue_warn_depth == 0 {
            return Err(config_err("queue_warn_depth", "must be greater than 0"));
        }
        Ok(())
    }
}

fn config_err(field: &str, reason: &str) -> ClassifierError {
    ClassifierError::Config {
        field: field.to_owned(),
        reason: reason.to_owned(),
    }
}

fn lowercase(labels: &[String]) -> Vec<String> {
    labels.iter().map(|l| l.trim().to_lowercase()).collect()
}
