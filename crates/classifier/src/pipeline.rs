//! 파이프라인 오케스트레이션 -- 감시/큐/워커/알림 집계의 전체 흐름을 관리합니다.
//!
//! [`ClassificationPipeline`]은 core의 [`Pipeline`] trait을 구현하여
//! `flowwatch-daemon`에서 캡처 컨트롤러와 동일한 생명주기로 관리됩니다.
//!
//! # 내부 아키텍처
//! ```text
//! watch_dir --notify--> IngestWatcher --> work queue --> ClassificationWorker --> processed_dir
//!                                                               │
//!                                                               └─ mpsc ─> FileVerdict (downstream)
//! ```

use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use flowwatch_core::error::{FlowwatchError, PipelineError};
use flowwatch_core::fs::{FileSystem, RealFileSystem};
use flowwatch_core::pipeline::{HealthStatus, Pipeline};

use crate::alert::AlertAggregator;
use crate::config::PipelineConfig;
use crate::error::ClassifierError;
use crate::model::ModelArtifacts;
use crate::queue::{QueueItem, QueueSender, work_queue};
use crate::watcher::{IngestFilter, IngestWatcher};
use crate::worker::{ClassificationWorker, FileVerdict};

/// 파이프라인 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineState {
    /// 초기화됨, 아직 시작하지 않음
    Initialized,
    /// 실행 중
    Running,
    /// 정지됨
    Stopped,
}

/// 분류 파이프라인
///
/// # 사용 예시
/// ```ignore
/// use flowwatch_classifier::ClassificationPipeline;
///
/// let (mut pipeline, verdict_rx) = ClassificationPipeline::builder()
///     .config(config)
///     .build()?;
///
/// pipeline.start().await?;
/// ```
pub struct ClassificationPipeline {
    config: PipelineConfig,
    state: PipelineState,
    fs: Arc<dyn FileSystem>,
    artifacts: ModelArtifacts,
    filter: Arc<IngestFilter>,
    verdict_tx: mpsc::Sender<FileVerdict>,
    queue: Option<QueueSender>,
    watcher: Option<IngestWatcher>,
    worker: Option<JoinHandle<usize>>,
}

impl ClassificationPipeline {
    /// 새 빌더를 생성합니다.
    pub fn builder() -> ClassificationPipelineBuilder {
        ClassificationPipelineBuilder::new()
    }

    /// 현재 상태 이름
    pub fn state_name(&self) -> &str {
        match self.state {
            PipelineState::Initialized => "initialized",
            PipelineState::Running => "running",
            PipelineState::Stopped => "stopped",
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 대기 중인 파일 수
    pub fn queue_depth(&self) -> usize {
        self.queue.as_ref().map_or(0, QueueSender::depth)
    }

    /// 지금까지 받아들인 서로 다른 파일 수
    pub fn seen_count(&self) -> usize {
        self.filter.seen_count()
    }

    /// 결과 디렉토리 기준 알림 집계기
    pub fn aggregator(&self) -> AlertAggregator {
        AlertAggregator::new(
            Arc::clone(&self.fs),
            self.config.processed_dir.clone(),
            &self.config.benign_labels,
        )
    }

    /// 감시 이벤트 없이 파일을 직접 큐에 넣습니다.
    ///
    /// 감시로 이미 들어온 경로면 `Ok(false)`를 반환합니다.
    ///
    /// # 에러
    /// 실행 중이 아닐 때
    pub fn submit(&self, path: &Path) -> Result<bool, ClassifierError> {
        match (&self.watcher, self.state) {
            (Some(watcher), PipelineState::Running) => Ok(watcher.submit(path)),
            _ => Err(ClassifierError::Channel(
                "pipeline is not running".to_owned(),
            )),
        }
    }
}

impl Pipeline for ClassificationPipeline {
    async fn start(&mut self) -> Result<(), FlowwatchError> {
        if self.state == PipelineState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }

        info!(
            watch_dir = %self.config.watch_dir.display(),
            processed_dir = %self.config.processed_dir.display(),
            "starting classification pipeline"
        );

        // 1. 결과 디렉토리 준비
        self.fs
            .create_dir_all(&self.config.processed_dir)
            .map_err(ClassifierError::from)?;

        // 2. 감시 등록 (실패하면 워커를 띄우지 않음)
        let (queue_tx, queue_rx) = work_queue();
        let mut watcher = IngestWatcher::new(Arc::clone(&self.filter), queue_tx.clone());
        watcher.start(&self.config.watch_dir)?;

        // 3. 워커 스폰
        let worker = ClassificationWorker::new(Arc::clone(&self.fs), &self.artifacts, &self.config)
            .with_verdict_sender(self.verdict_tx.clone());
        self.worker = Some(tokio::task::spawn_blocking(move || worker.run(queue_rx)));

        self.queue = Some(queue_tx);
        self.watcher = Some(watcher);
        self.state = PipelineState::Running;
        info!("classification pipeline started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), FlowwatchError> {
        if self.state != PipelineState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        info!(pending = self.queue_depth(), "stopping classification pipeline");

        // 1. 새 이벤트 차단
        if let Some(mut watcher) = self.watcher.take() {
            watcher.stop();
        }

        // 2. 종료 신호: 이미 큐에 있는 파일은 모두 처리된 뒤 워커가 끝남
        if let Some(queue) = self.queue.take() {
            if let Err(e) = queue.push(QueueItem::Shutdown) {
                warn!(error = %e, "worker already gone");
            }
        }

        // 3. 워커 종료 대기
        if let Some(worker) = self.worker.take() {
            match worker.await {
                Ok(processed) => info!(processed, "classification worker joined"),
                Err(e) => warn!(error = %e, "classification worker panicked"),
            }
        }

        self.state = PipelineState::Stopped;
        info!("classification pipeline stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            PipelineState::Running => {
                if self.worker.as_ref().is_some_and(JoinHandle::is_finished) {
                    return HealthStatus::Unhealthy("worker exited".to_owned());
                }
                let depth = self.queue_depth();
                if depth > self.config.queue_warn_depth {
                    HealthStatus::Degraded(format!("queue depth high: {depth} files pending"))
                } else {
                    HealthStatus::Healthy
                }
            }
            PipelineState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            PipelineState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

/// 분류 파이프라인 빌더
///
/// 아티팩트를 지정하지 않으면 설정의 모델 디렉토리에서 로드합니다.
pub struct ClassificationPipelineBuilder {
    config: PipelineConfig,
    artifacts: Option<ModelArtifacts>,
    fs: Option<Arc<dyn FileSystem>>,
    verdict_tx: Option<mpsc::Sender<FileVerdict>>,
    verdict_channel_capacity: usize,
}

impl ClassificationPipelineBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
            artifacts: None,
            fs: None,
            verdict_tx: None,
            verdict_channel_capacity: 256,
        }
    }

    /// 파이프라인 설정을 지정합니다.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// 미리 로드한 모델 아티팩트를 지정합니다.
    pub fn artifacts(mut self, artifacts: ModelArtifacts) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    /// 파일 입출력에 쓸 파일시스템을 지정합니다 (기본: 실제 파일시스템).
    pub fn file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = Some(fs);
        self
    }

    /// 외부 결과 전송 채널을 설정합니다.
    ///
    /// 설정하지 않으면 빌더가 새 채널을 생성합니다.
    pub fn verdict_sender(mut self, tx: mpsc::Sender<FileVerdict>) -> Self {
        self.verdict_tx = Some(tx);
        self
    }

    /// 결과 채널 용량을 설정합니다 (외부 채널 미사용 시).
    pub fn verdict_channel_capacity(mut self, capacity: usize) -> Self {
        self.verdict_channel_capacity = capacity;
        self
    }

    /// 파이프라인을 빌드합니다.
    ///
    /// # Returns
    /// - `ClassificationPipeline`: 파이프라인 인스턴스
    /// - `Option<mpsc::Receiver<FileVerdict>>`: 결과 수신 채널
    ///   (외부 verdict_sender를 설정한 경우 None)
    ///
    /// # 에러
    /// 설정 검증 실패, 모델 아티팩트 누락/손상
    pub fn build(
        self,
    ) -> Result<(ClassificationPipeline, Option<mpsc::Receiver<FileVerdict>>), ClassifierError>
    {
        self.config.validate()?;
        if self.verdict_channel_capacity == 0 {
            return Err(ClassifierError::Config {
                field: "verdict_channel_capacity".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }

        let fs = self
            .fs
            .unwrap_or_else(|| Arc::new(RealFileSystem) as Arc<dyn FileSystem>);

        let artifacts = match self.artifacts {
            Some(artifacts) => artifacts,
            None => ModelArtifacts::load(
                fs.as_ref(),
                &self.config.model_dir,
                &self.config.model_file,
                &self.config.encoders_file,
            )?,
        };

        let (verdict_tx, verdict_rx) = match self.verdict_tx {
            Some(tx) => (tx, None),
            None => {
                let (tx, rx) = mpsc::channel(self.verdict_channel_capacity);
                (tx, Some(rx))
            }
        };

        let pipeline = ClassificationPipeline {
            filter: Arc::new(IngestFilter::new(self.config.file_suffix.clone())),
            config: self.config,
            state: PipelineState::Initialized,
            fs,
            artifacts,
            verdict_tx,
            queue: None,
            watcher: None,
            worker: None,
        };

        Ok((pipeline, verdict_rx))
    }
}

impl Default for ClassificationPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
