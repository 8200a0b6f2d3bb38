#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! - [`watcher`]: 감시 디렉토리 알림 수신, 접미어 필터, 중복 제거
//! - [`queue`]: 감시기와 워커 사이의 FIFO 작업 큐
//! - [`feature`]: 플로우 파일 행 → 분류기 입력 벡터 변환
//! - [`model`]: 분류기 trait, 결정 포레스트, 카테고리 인코더
//! - [`worker`]: 파일 단위 분류 및 결과 파일 기록
//! - [`alert`]: 결과 디렉토리 기반 알림 통계
//! - [`pipeline`]: 전체 파이프라인 오케스트레이션 (Pipeline trait 구현)
//! - [`config`]: 파이프라인 설정 (core 설정 변환)
//! - [`error`]: 도메인 에러 타입
//!
//! # 아키텍처
//!
//! ```text
//! IngestWatcher -> work queue -> ClassificationWorker -> processed_dir -> AlertAggregator
//!      |                               |
//!   notify                 FeatureAdapter + Classifier
//! ```

pub mod alert;
pub mod config;
pub mod error;
pub mod feature;
pub mod model;
pub mod pipeline;
pub mod queue;
pub mod watcher;
pub mod worker;

// --- 주요 타입 re-export ---

// 파이프라인
pub use pipeline::{ClassificationPipeline, ClassificationPipelineBuilder};

// 설정
pub use config::PipelineConfig;

// 에러
pub use error::ClassifierError;

// 특성 변환
pub use feature::{FEATURE_NAMES, FeatureAdapter, FeatureVector, PortPolicy};

// 모델
pub use model::{CategoryEncoders, Classifier, DecisionTree, ModelArtifacts, RandomForest};

// 워커
pub use worker::{ClassificationWorker, FileVerdict};

// 알림
pub use alert::{AlertAggregator, AlertEntry, AlertReport, AlertStats};

// 큐/감시
pub use queue::{QueueItem, QueueReceiver, QueueSender, work_queue};
pub use watcher::{IngestFilter, IngestWatcher};
