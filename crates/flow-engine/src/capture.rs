//! 캡처 컨트롤러 -- 캡처 루프 생명주기와 플로우 파일 내보내기
//!
//! [`CaptureController`]는 `Idle → Capturing → Idle` 상태를 관리합니다.
//! 빌더 패턴([`CaptureControllerBuilder`])으로 생성하며, [`Pipeline`] trait을 구현합니다.
//!
//! # 아키텍처
//! ```text
//! ┌──────────────┐ window  ┌─────────────┐ drain  ┌──────────┐
//! │ PacketSource │────────▶│ FlowTracker │───────▶│ FlowSink │──▶ {prefix}_{ts}.csv
//! │ (blocking)   │         │ (Mutex)     │        └──────────┘
//! └──────────────┘         └──────┬──────┘
//!                                 │ snapshot
//!                          CaptureHandle (대시보드)
//! ```
//!
//! # 사용 예시
//! ```ignore
//! let mut controller = CaptureController::builder()
//!     .config(engine_config)
//!     .source(source)
//!     .build()?;
//!
//! controller.start_capture().await?;
//! // ...
//! let exported = controller.stop_capture().await?;
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use flowwatch_core::error::{CaptureError, FlowwatchError, PipelineError};
use flowwatch_core::fs::{FileSystem, RealFileSystem};
use flowwatch_core::metrics as m;
use flowwatch_core::pipeline::{HealthStatus, Pipeline};
use flowwatch_core::types::ConnectionKey;

use crate::config::EngineConfig;
use crate::error::FlowEngineError;
use crate::rates::LiveFlow;
use crate::sink::FlowSink;
use crate::source::{self, PacketSource};
use crate::tracker::{FlowRecord, FlowTracker};

/// 캡처 루프와 읽기 핸들이 공유하는 상태
#[derive(Debug, Default)]
struct Shared {
    tracker: FlowTracker,
    capturing: AtomicBool,
    last_error: Mutex<Option<CaptureError>>,
}

impl Shared {
    fn last_error(&self) -> MutexGuard<'_, Option<CaptureError>> {
        self.last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// 캡처 상태 읽기 전용 핸들
///
/// 복제해서 대시보드/상태 작성기 등 여러 곳에서 동시에 사용할 수 있습니다.
#[derive(Debug, Clone)]
pub struct CaptureHandle {
    shared: Arc<Shared>,
}

impl CaptureHandle {
    /// 캡처 중인지 여부
    pub fn is_capturing(&self) -> bool {
        self.shared.capturing.load(Ordering::Acquire)
    }

    /// 현재 플로우 레코드 복사본
    pub fn snapshot(&self) -> Vec<(ConnectionKey, FlowRecord)> {
        self.shared.tracker.snapshot()
    }

    /// 대시보드 표시용 플로우 목록
    pub fn live_flows(&self) -> Vec<LiveFlow> {
        self.snapshot()
            .iter()
            .filter_map(|(key, record)| LiveFlow::from_record(key, record))
            .collect()
    }

    /// 캡처 루프를 종료시킨 마지막 에러
    pub fn last_error(&self) -> Option<CaptureError> {
        self.shared.last_error().clone()
    }
}

/// 패킷 캡처 및 플로우 내보내기 컨트롤러
pub struct CaptureController {
    config: EngineConfig,
    fs: Arc<dyn FileSystem>,
    sink: FlowSink,
    shared: Arc<Shared>,
    /// 유휴 상태에서 보관하는 패킷 소스. 캡처 중에는 루프 스레드가 소유합니다.
    ///
    /// 소스는 `Send`만 보장하므로 `Mutex`로 감싸 컨트롤러를 `Sync`로 유지합니다.
    source: Mutex<Option<Box<dyn PacketSource>>>,
    task: Option<JoinHandle<Box<dyn PacketSource>>>,
}

/// 캡처 컨트롤러 빌더
pub struct CaptureControllerBuilder {
    config: Option<EngineConfig>,
    source: Option<Box<dyn PacketSource>>,
    fs: Option<Arc<dyn FileSystem>>,
}

impl CaptureControllerBuilder {
    fn new() -> Self {
        Self {
            config: None,
            source: None,
            fs: None,
        }
    }

    /// 엔진 설정을 지정합니다.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// 패킷 소스를 지정합니다.
    ///
    /// 지정하지 않으면 설정의 캡처 대상으로 libpcap 소스를 생성합니다.
    pub fn source(mut self, source: impl PacketSource) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// 파일시스템을 지정합니다 (기본: [`RealFileSystem`]).
    pub fn file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = Some(fs);
        self
    }

    /// 컨트롤러를 생성합니다.
    ///
    /// # 에러
    /// - 설정 검증 실패
    /// - 소스 미지정 상태에서 libpcap 소스를 만들 수 없는 경우
    pub fn build(self) -> Result<CaptureController, FlowEngineError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let source = match self.source {
            Some(source) => source,
            None => source::pcap_source(&config)?,
        };
        let fs = self.fs.unwrap_or_else(|| Arc::new(RealFileSystem));
        let sink = FlowSink::new(
            Arc::clone(&fs),
            config.output_dir.clone(),
            config.file_prefix.clone(),
        );

        Ok(CaptureController {
            config,
            fs,
            sink,
            shared: Arc::new(Shared::default()),
            source: Mutex::new(Some(source)),
            task: None,
        })
    }
}

impl CaptureController {
    /// 빌더를 반환합니다.
    pub fn builder() -> CaptureControllerBuilder {
        CaptureControllerBuilder::new()
    }

    /// 현재 설정
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// 읽기 전용 핸들
    pub fn handle(&self) -> CaptureHandle {
        CaptureHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// 캡처 중인지 여부
    pub fn is_capturing(&self) -> bool {
        self.shared.capturing.load(Ordering::Acquire)
    }

    /// 캡처를 시작합니다.
    ///
    /// 이미 캡처 중이면 아무것도 하지 않고 `Ok(false)`를 반환합니다.
    /// 소스 열기 실패는 [`FlowEngineError::Capture`]로 반환됩니다.
    pub async fn start_capture(&mut self) -> Result<bool, FlowEngineError> {
        if self.is_capturing() {
            debug!("capture already running");
            return Ok(false);
        }
        // 에러로 끝난 이전 루프가 있으면 소스를 회수합니다.
        self.reap_loop().await?;

        let mut source = self
            .idle_source()
            .take()
            .ok_or_else(|| FlowEngineError::Task("packet source was lost".to_owned()))?;
        if let Err(e) = source.open() {
            error!(source = source.name(), error = %e, "failed to open packet source");
            *self.idle_source() = Some(source);
            return Err(e.into());
        }

        *self.shared.last_error() = None;
        self.shared.capturing.store(true, Ordering::Release);

        info!(
            source = source.name(),
            window_secs = self.config.window.as_secs_f64(),
            "capture started"
        );

        let shared = Arc::clone(&self.shared);
        let window = self.config.window;
        self.task = Some(tokio::task::spawn_blocking(move || {
            run_capture_loop(source, &shared, window)
        }));
        Ok(true)
    }

    /// 캡처를 정지하고 누적된 플로우를 파일로 내보냅니다.
    ///
    /// 유휴 상태면 `Ok(None)`을 반환합니다. 정지 요청은 윈도우 경계에서 반영되므로
    /// 최대 한 윈도우만큼 대기합니다.
    pub async fn stop_capture(&mut self) -> Result<Option<PathBuf>, FlowEngineError> {
        if self.task.is_none() {
            debug!("capture is not running");
            return Ok(None);
        }

        self.shared.capturing.store(false, Ordering::Release);
        self.reap_loop().await?;

        // 새 파일을 내보내기 전에 비워야 새 파일의 분류 결과가 남습니다.
        if let Some(dir) = &self.config.processed_dir {
            let removed = self.fs.clear_dir(dir)?;
            debug!(dir = %dir.display(), removed, "processed directory cleared");
        }

        let records = self.shared.tracker.drain();
        let path = self.sink.export(&records)?;

        if let Some(e) = self.shared.last_error().as_ref() {
            warn!(error = %e, path = %path.display(), "capture had stopped on error before stop");
        }
        info!(path = %path.display(), flows = records.len(), "capture stopped");
        Ok(Some(path))
    }

    /// 캡처를 멈추지 않고 지금까지의 플로우를 내보냅니다.
    ///
    /// 추적 중인 플로우가 없으면 `Ok(None)`입니다.
    pub fn checkpoint(&self) -> Result<Option<PathBuf>, FlowEngineError> {
        if self.shared.tracker.is_empty() {
            return Ok(None);
        }
        let records = self.shared.tracker.drain();
        let path = self.sink.export(&records)?;
        debug!(path = %path.display(), flows = records.len(), "capture checkpoint");
        Ok(Some(path))
    }

    /// 종료된 캡처 루프를 기다려 소스를 회수합니다.
    async fn reap_loop(&mut self) -> Result<(), FlowEngineError> {
        if let Some(task) = self.task.take() {
            let source = task
                .await
                .map_err(|e| FlowEngineError::Task(e.to_string()))?;
            *self.idle_source() = Some(source);
        }
        Ok(())
    }

    fn idle_source(&self) -> MutexGuard<'_, Option<Box<dyn PacketSource>>> {
        self.source
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// 캡처 플래그가 내려갈 때까지 윈도우를 반복합니다.
fn run_capture_loop(
    mut source: Box<dyn PacketSource>,
    shared: &Shared,
    window: Duration,
) -> Box<dyn PacketSource> {
    while shared.capturing.load(Ordering::Acquire) {
        let tracker = &shared.tracker;
        match source.capture_window(window, &mut |event| tracker.observe(&event)) {
            Ok(packets) => {
                metrics::counter!(m::CAPTURE_WINDOWS_TOTAL).increment(1);
                debug!(packets, flows = tracker.len(), "capture window complete");
            }
            Err(e) => {
                error!(source = source.name(), error = %e, "capture loop failed");
                metrics::counter!(m::CAPTURE_ERRORS_TOTAL).increment(1);
                *shared.last_error() = Some(e);
                shared.capturing.store(false, Ordering::Release);
                break;
            }
        }
    }
    source
}

impl Pipeline for CaptureController {
    async fn start(&mut self) -> Result<(), FlowwatchError> {
        if !self.start_capture().await? {
            return Err(PipelineError::AlreadyRunning.into());
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), FlowwatchError> {
        match self.stop_capture().await? {
            Some(_) => Ok(()),
            None => Err(PipelineError::NotRunning.into()),
        }
    }

    async fn health_check(&self) -> HealthStatus {
        if let Some(e) = self.shared.last_error().as_ref() {
            return HealthStatus::Unhealthy(format!("capture failed: {e}"));
        }
        if !self.is_capturing() {
            return HealthStatus::Unhealthy("not running".to_owned());
        }
        HealthStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{CaptureInput, ChannelSource};
    use chrono::Utc;
    use flowwatch_core::fs::{FsError, MemoryFileSystem};
    use std::path::Path;
    use flowwatch_core::table::FlowTable;
    use flowwatch_core::types::{PacketEvent, TcpFlags};

    fn test_config() -> EngineConfig {
        EngineConfig {
            window: Duration::from_millis(20),
            output_dir: PathBuf::from("/flows"),
            processed_dir: Some(PathBuf::from("/processed")),
            ..EngineConfig::default()
        }
    }

    fn event(src_port: u16, length: u64) -> PacketEvent {
        PacketEvent {
            src_ip: "10.0.0.1".parse().unwrap(),
            dst_ip: "10.0.0.2".parse().unwrap(),
            src_port: Some(src_port),
            dst_port: Some(80),
            protocol: 6,
            tos: 0,
            length,
            flags: TcpFlags::empty(),
            timestamp: Utc::now(),
        }
    }

    /// 매 윈도우마다 실패하는 소스
    struct FailingSource;

    impl PacketSource for FailingSource {
        fn name(&self) -> &str {
            "failing"
        }
        fn open(&mut self) -> Result<(), CaptureError> {
            Ok(())
        }
        fn capture_window(
            &mut self,
            _window: Duration,
            _on_packet: &mut dyn FnMut(PacketEvent),
        ) -> Result<usize, CaptureError> {
            Err(CaptureError::Device("link down".to_owned()))
        }
    }

    /// 열기에 실패하는 소스
    struct DeniedSource;

    impl PacketSource for DeniedSource {
        fn name(&self) -> &str {
            "denied"
        }
        fn open(&mut self) -> Result<(), CaptureError> {
            Err(CaptureError::PermissionDenied("need CAP_NET_RAW".to_owned()))
        }
        fn capture_window(
            &mut self,
            _window: Duration,
            _on_packet: &mut dyn FnMut(PacketEvent),
        ) -> Result<usize, CaptureError> {
            Ok(0)
        }
    }

    /// 플로우 파일이 쓰이는 즉시 분류 결과를 남기는 파일시스템
    ///
    /// 워처와 워커가 내보내기보다 먼저 끝나는 경우를 재현합니다.
    struct InstantClassifyFs {
        inner: MemoryFileSystem,
    }

    impl FileSystem for InstantClassifyFs {
        fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<(), FsError> {
            self.inner.write_atomic(path, data)?;
            if path.starts_with("/flows") {
                if let Some(name) = path.file_name() {
                    let out = Path::new("/processed")
                        .join(format!("processed_{}", name.to_string_lossy()));
                    self.inner.write_atomic(&out, b"Label\nBenign\n")?;
                }
            }
            Ok(())
        }
        fn read_to_string(&self, path: &Path) -> Result<String, FsError> {
            self.inner.read_to_string(path)
        }
        fn list_files(&self, dir: &Path, suffix: &str) -> Result<Vec<PathBuf>, FsError> {
            self.inner.list_files(dir, suffix)
        }
        fn remove_file(&self, path: &Path) -> Result<(), FsError> {
            self.inner.remove_file(path)
        }
        fn exists(&self, path: &Path) -> bool {
            self.inner.exists(path)
        }
        fn create_dir_all(&self, path: &Path) -> Result<(), FsError> {
            self.inner.create_dir_all(path)
        }
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn start_stop_exports_captured_flows() {
        let fs = MemoryFileSystem::new();
        fs.add_file("/processed/processed_old.csv", "x\n1\n");
        let (source, tx) = ChannelSource::new();
        let mut controller = CaptureController::builder()
            .config(test_config())
            .source(source)
            .file_system(Arc::new(fs.clone()))
            .build()
            .unwrap();

        assert!(controller.start_capture().await.unwrap());
        assert!(!controller.start_capture().await.unwrap());

        tx.send(CaptureInput::Packet(event(1000, 100))).unwrap();
        tx.send(CaptureInput::Packet(event(1000, 200))).unwrap();
        let handle = controller.handle();
        wait_until(|| handle.snapshot().first().is_some_and(|f| f.1.total_packets == 2)).await;
        assert_eq!(handle.live_flows().len(), 1);

        let path = controller.stop_capture().await.unwrap().unwrap();
        assert!(!controller.is_capturing());
        assert!(path.starts_with("/flows"));

        let table = FlowTable::parse(&fs.contents(&path).unwrap()).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.record(0).unwrap().get("In Bytes"), Some("100"));
        assert_eq!(table.record(0).unwrap().get("Out Bytes"), Some("200"));

        assert!(fs.contents(std::path::Path::new("/processed/processed_old.csv")).is_none());
        assert!(handle.snapshot().is_empty());
    }

    #[tokio::test]
    async fn stop_keeps_output_of_the_exported_file() {
        let inner = MemoryFileSystem::new();
        inner.add_file("/processed/processed_old.csv", "Label\nBotnet\n");
        let fs = InstantClassifyFs {
            inner: inner.clone(),
        };
        let (source, tx) = ChannelSource::new();
        let mut controller = CaptureController::builder()
            .config(test_config())
            .source(source)
            .file_system(Arc::new(fs))
            .build()
            .unwrap();

        controller.start_capture().await.unwrap();
        tx.send(CaptureInput::Packet(event(2000, 64))).unwrap();
        let handle = controller.handle();
        wait_until(|| !handle.snapshot().is_empty()).await;

        let path = controller.stop_capture().await.unwrap().unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        let output = std::path::Path::new("/processed").join(format!("processed_{name}"));

        assert!(inner.contents(&output).is_some(), "new output was cleared");
        assert!(
            inner
                .contents(std::path::Path::new("/processed/processed_old.csv"))
                .is_none()
        );
    }

    #[tokio::test]
    async fn stop_when_idle_is_noop() {
        let (source, _tx) = ChannelSource::new();
        let mut controller = CaptureController::builder()
            .config(test_config())
            .source(source)
            .file_system(Arc::new(MemoryFileSystem::new()))
            .build()
            .unwrap();
        assert!(controller.stop_capture().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn open_failure_is_surfaced_and_state_stays_idle() {
        let mut controller = CaptureController::builder()
            .config(test_config())
            .source(DeniedSource)
            .file_system(Arc::new(MemoryFileSystem::new()))
            .build()
            .unwrap();

        let err = controller.start_capture().await.unwrap_err();
        assert!(matches!(
            err,
            FlowEngineError::Capture(CaptureError::PermissionDenied(_))
        ));
        assert!(!controller.is_capturing());
        // 소스는 회수되어 재시도할 수 있습니다.
        assert!(controller.start_capture().await.is_err());
    }

    #[tokio::test]
    async fn mid_loop_error_goes_idle_and_is_reported() {
        let mut controller = CaptureController::builder()
            .config(test_config())
            .source(FailingSource)
            .file_system(Arc::new(MemoryFileSystem::new()))
            .build()
            .unwrap();

        controller.start_capture().await.unwrap();
        let handle = controller.handle();
        wait_until(|| handle.last_error().is_some()).await;
        assert!(!handle.is_capturing());
        assert!(controller.health_check().await.is_unhealthy());

        // 정지는 여전히 지금까지의 플로우를 내보냅니다.
        assert!(controller.stop_capture().await.unwrap().is_some());
        // 회수된 소스로 다시 시작할 수 있습니다.
        assert!(controller.start_capture().await.unwrap());
        let _ = controller.stop_capture().await;
    }

    #[tokio::test]
    async fn checkpoint_exports_without_stopping() {
        let fs = MemoryFileSystem::new();
        let (source, tx) = ChannelSource::new();
        let mut controller = CaptureController::builder()
            .config(test_config())
            .source(source)
            .file_system(Arc::new(fs.clone()))
            .build()
            .unwrap();

        assert!(controller.checkpoint().unwrap().is_none());

        controller.start_capture().await.unwrap();
        tx.send(CaptureInput::Packet(event(1, 60))).unwrap();
        let handle = controller.handle();
        wait_until(|| !handle.snapshot().is_empty()).await;

        let path = controller.checkpoint().unwrap().unwrap();
        assert!(controller.is_capturing());
        assert!(handle.snapshot().is_empty());
        assert_eq!(FlowTable::parse(&fs.contents(&path).unwrap()).unwrap().len(), 1);

        controller.stop_capture().await.unwrap();
    }

    #[tokio::test]
    async fn pipeline_trait_lifecycle() {
        let (source, _tx) = ChannelSource::new();
        let mut controller = CaptureController::builder()
            .config(test_config())
            .source(source)
            .file_system(Arc::new(MemoryFileSystem::new()))
            .build()
            .unwrap();

        assert!(controller.health_check().await.is_unhealthy());
        Pipeline::start(&mut controller).await.unwrap();
        assert!(controller.health_check().await.is_healthy());
        assert!(Pipeline::start(&mut controller).await.is_err());
        Pipeline::stop(&mut controller).await.unwrap();
        assert!(Pipeline::stop(&mut controller).await.is_err());
    }

    #[test]
    fn controller_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CaptureController>();
    }

    #[test]
    fn build_rejects_invalid_config() {
        let result = CaptureController::builder()
            .config(EngineConfig {
                window: Duration::ZERO,
                ..EngineConfig::default()
            })
            .source(ChannelSource::new().0)
            .build();
        assert!(result.is_err());
    }
}
