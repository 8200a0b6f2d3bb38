//! Module orchestration -- assembly, lifecycle management, and the main loop.
//!
//! The [`Orchestrator`] is the central coordinator of `flowwatch-daemon`.
//! It builds the enabled modules from configuration, starts them in order,
//! runs background tasks, and shuts everything down gracefully.
//!
//! # Startup Order (consumer first)
//!
//! 1. Classification pipeline (watches the flow directory)
//! 2. Capture controller (writes flow files into the watched directory)
//!
//! Starting the pipeline first means no flow file exported by capture can be
//! missed by the watcher.
//!
//! # Shutdown Order
//!
//! 1. Capture controller (exports the final flow file)
//! 2. The final file is submitted to the pipeline directly
//! 3. Classification pipeline (worker drains everything already queued)
//! 4. Background tasks (status writer writes a last snapshot)

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use flowwatch_classifier::{ClassificationPipeline, FileVerdict, PipelineConfig};
use flowwatch_core::config::FlowwatchConfig;
use flowwatch_core::fs::{FileSystem, RealFileSystem};
use flowwatch_core::metrics as m;
use flowwatch_core::pipeline::{HealthStatus, Pipeline};
use flowwatch_flow_engine::{CaptureController, EngineConfig, PacketSource};

use crate::health::{DaemonHealth, ModuleHealth, aggregate_status};
use crate::metrics_server;
use crate::status;

/// Verdict channel capacity between the worker and the verdict logger.
const VERDICT_CHANNEL_CAPACITY: usize = 256;

/// Uptime gauge refresh period.
const UPTIME_UPDATE_INTERVAL: Duration = Duration::from_secs(10);

/// The main daemon orchestrator.
pub struct Orchestrator {
    /// Loaded and validated configuration.
    config: FlowwatchConfig,
    /// File system shared by capture export, status writes, and alert scans.
    fs: Arc<dyn FileSystem>,
    /// Classification pipeline, when `[pipeline] enabled`.
    pipeline: Option<ClassificationPipeline>,
    /// Capture controller, when `[capture] enabled`.
    capture: Option<CaptureController>,
    /// Verdict receiver, handed to the verdict logger on start.
    verdict_rx: Option<mpsc::Receiver<FileVerdict>>,
    /// Shutdown broadcast sender (signals all background tasks).
    shutdown_tx: broadcast::Sender<()>,
    /// Background tasks awaited on shutdown.
    tasks: Vec<JoinHandle<()>>,
    /// PID file guard, held while running.
    pid_file: Option<PidFile>,
    /// Daemon start time (for uptime reporting).
    start_time: Instant,
    running: bool,
}

impl Orchestrator {
    /// Load configuration from `config_path` and build the orchestrator.
    ///
    /// Environment variable overrides are applied before validation.
    ///
    /// # Errors
    ///
    /// - Configuration file cannot be read, parsed, or validated
    /// - Model artifacts are missing or invalid
    /// - Packet source is unavailable for the configured capture target
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = FlowwatchConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config)
    }

    /// Build from an already-loaded configuration.
    ///
    /// The packet source is chosen from `[capture]` (libpcap interface or file).
    pub fn build_from_config(config: FlowwatchConfig) -> Result<Self> {
        Self::build_with_source(config, None)
    }

    /// Build with an explicit packet source instead of libpcap.
    ///
    /// Used for embedding and tests with a `ChannelSource`.
    pub fn build_with_source(
        config: FlowwatchConfig,
        source: Option<Box<dyn PacketSource>>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
            tracing::info!(port = config.metrics.port, "metrics endpoint enabled");
        }

        let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
        let (shutdown_tx, _) = broadcast::channel(16);

        let mut pipeline = None;
        let mut verdict_rx = None;
        if config.pipeline.enabled {
            tracing::info!("initializing classification pipeline");
            let pipeline_config = PipelineConfig::from_core(&config.pipeline, &config.model)
                .map_err(|e| anyhow::anyhow!("invalid pipeline config: {}", e))?;
            let (built, rx) = ClassificationPipeline::builder()
                .config(pipeline_config)
                .file_system(Arc::clone(&fs))
                .verdict_channel_capacity(VERDICT_CHANNEL_CAPACITY)
                .build()
                .map_err(|e| anyhow::anyhow!("failed to build classification pipeline: {}", e))?;
            pipeline = Some(built);
            verdict_rx = rx;
        }

        let mut capture = None;
        if config.capture.enabled {
            tracing::info!("initializing capture controller");
            let engine_config = EngineConfig::from_core(&config.capture, &config.pipeline);
            let mut builder = CaptureController::builder()
                .config(engine_config)
                .file_system(Arc::clone(&fs));
            if let Some(source) = source {
                builder = builder.source(source);
            }
            let built = builder
                .build()
                .map_err(|e| anyhow::anyhow!("failed to build capture controller: {}", e))?;
            capture = Some(built);
        }

        if pipeline.is_none() && capture.is_none() {
            tracing::warn!("no modules enabled; the daemon will idle until shutdown");
        }

        let module_count = usize::from(pipeline.is_some()) + usize::from(capture.is_some());
        record_daemon_metrics(module_count);

        Ok(Self {
            config,
            fs,
            pipeline,
            capture,
            verdict_rx,
            shutdown_tx,
            tasks: Vec::new(),
            pid_file: None,
            start_time: Instant::now(),
            running: false,
        })
    }

    /// Start all enabled modules and background tasks.
    ///
    /// On failure, modules that already started are stopped again and the
    /// PID file is released.
    pub async fn start(&mut self) -> Result<()> {
        if self.running {
            return Err(anyhow::anyhow!("orchestrator is already running"));
        }

        if !self.config.general.pid_file.is_empty() {
            self.pid_file = Some(PidFile::create(Path::new(&self.config.general.pid_file))?);
        }

        if let Err(e) = self.start_modules().await {
            tracing::error!(error = %e, "startup failed, rolling back");
            self.stop_modules().await;
            self.pid_file = None;
            return Err(e);
        }

        self.spawn_background_tasks();
        self.running = true;
        tracing::info!(
            capture = self.capture.is_some(),
            pipeline = self.pipeline.is_some(),
            "flowwatch daemon started"
        );
        Ok(())
    }

    /// Start modules, wait for SIGTERM/SIGINT, then shut down.
    pub async fn run(&mut self) -> Result<()> {
        self.run_until(wait_for_shutdown_signal()).await
    }

    /// Start modules and run the main loop until `shutdown` resolves.
    ///
    /// The loop also drives flow-file rotation when
    /// `capture.rotate_interval_secs` is non-zero.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = Result<&'static str>>,
    {
        self.start().await?;

        let mut rotation = self.rotation_interval();
        tokio::pin!(shutdown);

        tracing::info!("entering main event loop");
        loop {
            tokio::select! {
                signal = &mut shutdown => {
                    match signal {
                        Ok(name) => tracing::info!(signal = name, "shutdown signal received"),
                        Err(e) => tracing::error!(error = %e, "shutdown signal handler failed"),
                    }
                    break;
                }
                Some(_) = next_tick(rotation.as_mut()) => self.rotate(),
            }
        }

        self.shutdown().await
    }

    /// Stop modules in shutdown order and wait for background tasks.
    pub async fn shutdown(&mut self) -> Result<()> {
        if !self.running {
            return Ok(());
        }
        tracing::info!("shutting down");

        self.stop_modules().await;

        tracing::debug!("broadcasting shutdown signal to background tasks");
        let _ = self.shutdown_tx.send(());
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "background task failed");
            }
        }

        self.pid_file = None;
        self.running = false;
        tracing::info!(
            uptime_secs = self.start_time.elapsed().as_secs(),
            "flowwatch daemon stopped"
        );
        Ok(())
    }

    /// Get the current aggregated health status.
    pub async fn health(&self) -> DaemonHealth {
        let mut modules = Vec::with_capacity(2);

        modules.push(ModuleHealth {
            name: "capture".to_owned(),
            enabled: self.capture.is_some(),
            status: match &self.capture {
                Some(capture) => capture.health_check().await,
                None => HealthStatus::Healthy,
            },
        });
        modules.push(ModuleHealth {
            name: "classifier".to_owned(),
            enabled: self.pipeline.is_some(),
            status: match &self.pipeline {
                Some(pipeline) => pipeline.health_check().await,
                None => HealthStatus::Healthy,
            },
        });

        let uptime_secs = self.start_time.elapsed().as_secs();
        if self.config.metrics.enabled {
            #[allow(clippy::cast_precision_loss)]
            metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(uptime_secs as f64);
        }

        DaemonHealth {
            status: aggregate_status(&modules),
            uptime_secs,
            modules,
        }
    }

    /// Get a reference to the loaded configuration.
    pub fn config(&self) -> &FlowwatchConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Capture controller, when enabled.
    pub fn capture(&self) -> Option<&CaptureController> {
        self.capture.as_ref()
    }

    /// Classification pipeline, when enabled.
    pub fn pipeline(&self) -> Option<&ClassificationPipeline> {
        self.pipeline.as_ref()
    }

    async fn start_modules(&mut self) -> Result<()> {
        if let Some(pipeline) = self.pipeline.as_mut() {
            // The watch directory must exist before the watcher registers.
            self.fs
                .create_dir_all(&pipeline.config().watch_dir)
                .map_err(|e| anyhow::anyhow!("failed to create watch directory: {}", e))?;
            pipeline
                .start()
                .await
                .map_err(|e| anyhow::anyhow!("failed to start classification pipeline: {}", e))?;
            tracing::info!("classification pipeline started");
        }

        if let Some(capture) = self.capture.as_mut() {
            capture
                .start_capture()
                .await
                .map_err(|e| anyhow::anyhow!("failed to start capture: {}", e))?;
            tracing::info!("capture started");
        }
        Ok(())
    }

    /// Stop whatever is running. Errors are logged, not returned.
    async fn stop_modules(&mut self) {
        let mut final_file = None;
        if let Some(capture) = self.capture.as_mut() {
            match capture.stop_capture().await {
                Ok(path) => final_file = path,
                Err(e) => tracing::error!(error = %e, "failed to stop capture"),
            }
        }

        if let Some(pipeline) = self.pipeline.as_mut() {
            if let Some(path) = final_file {
                match pipeline.submit(&path) {
                    Ok(true) => tracing::info!(path = %path.display(), "final flow file submitted"),
                    Ok(false) => {
                        tracing::debug!(path = %path.display(), "final flow file already queued");
                    }
                    Err(e) => tracing::debug!(error = %e, "final flow file not submitted"),
                }
            }
            match pipeline.stop().await {
                Ok(()) => tracing::info!("classification pipeline stopped"),
                Err(e) => tracing::debug!(error = %e, "classification pipeline was not running"),
            }
        }
    }

    fn spawn_background_tasks(&mut self) {
        if let Some(verdict_rx) = self.verdict_rx.take() {
            let shutdown_rx = self.shutdown_tx.subscribe();
            self.tasks.push(spawn_verdict_logger(verdict_rx, shutdown_rx));
        }

        if self.config.metrics.enabled {
            let shutdown_rx = self.shutdown_tx.subscribe();
            self.tasks
                .push(spawn_uptime_updater(self.start_time, shutdown_rx));
        }

        if self.config.status.enabled {
            let shutdown_rx = self.shutdown_tx.subscribe();
            self.tasks.push(status::spawn_status_writer(
                self.capture.as_ref().map(CaptureController::handle),
                self.pipeline.as_ref().map(ClassificationPipeline::aggregator),
                Arc::clone(&self.fs),
                PathBuf::from(&self.config.status.path),
                Duration::from_secs(self.config.status.interval_secs),
                shutdown_rx,
            ));
            tracing::info!(path = %self.config.status.path, "status writer enabled");
        }
    }

    fn rotation_interval(&self) -> Option<tokio::time::Interval> {
        let secs = self.config.capture.rotate_interval_secs;
        if self.capture.is_none() || secs == 0 {
            return None;
        }
        let period = Duration::from_secs(secs);
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        Some(interval)
    }

    /// Export accumulated flows without stopping capture.
    fn rotate(&self) {
        let Some(capture) = &self.capture else {
            return;
        };
        match capture.checkpoint() {
            Ok(Some(path)) => tracing::info!(path = %path.display(), "flow file rotated"),
            Ok(None) => tracing::debug!("rotation skipped, no flows tracked"),
            Err(e) => tracing::error!(error = %e, "flow file rotation failed"),
        }
    }
}

/// Resolve on the next tick, or never when rotation is disabled.
async fn next_tick(interval: Option<&mut tokio::time::Interval>) -> Option<tokio::time::Instant> {
    match interval {
        Some(interval) => Some(interval.tick().await),
        None => std::future::pending().await,
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
///
/// # Errors
///
/// Returns an error if signal handlers cannot be installed.
pub async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// PID file held for the lifetime of the daemon.
///
/// Creation fails if the file already exists, which guards against a second
/// instance. The file is removed when the guard is dropped.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Create the PID file with the current process id.
    ///
    /// The parent directory is created with mode 0o700 and the file with 0o600.
    /// `create_new` makes the existence check and creation a single step.
    ///
    /// # Errors
    ///
    /// - The file already exists (another instance may be running)
    /// - The path is not a regular file after creation
    /// - Any I/O failure
    pub fn create(path: &Path) -> Result<Self> {
        use std::fs::{self, OpenOptions};
        use std::io::{ErrorKind, Write};

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            #[cfg(unix)]
            {
                use std::os::unix::fs::DirBuilderExt;
                fs::DirBuilder::new()
                    .mode(0o700)
                    .recursive(true)
                    .create(parent)?;
            }
            #[cfg(not(unix))]
            fs::create_dir_all(parent)?;
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let existing = fs::read_to_string(path).unwrap_or_else(|_| "unknown".to_owned());
                return Err(anyhow::anyhow!(
                    "PID file {} already exists with PID: {}. Is another instance running?",
                    path.display(),
                    existing.trim()
                ));
            }
            Err(e) => return Err(e.into()),
        };

        if !file.metadata()?.is_file() {
            let _ = fs::remove_file(path);
            return Err(anyhow::anyhow!(
                "PID file {} is not a regular file",
                path.display()
            ));
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))?;
        }

        let pid = std::process::id();
        writeln!(file, "{pid}")?;
        tracing::info!(pid, path = %path.display(), "PID file written");

        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::info!(path = %self.path.display(), "PID file removed"),
            Err(e) => tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "failed to remove PID file"
            ),
        }
    }
}

/// Spawn a background task that logs classification verdicts.
///
/// On shutdown, verdicts already in the channel are logged before exiting.
fn spawn_verdict_logger(
    mut verdict_rx: mpsc::Receiver<FileVerdict>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                verdict = verdict_rx.recv() => {
                    match verdict {
                        Some(verdict) => log_verdict(&verdict),
                        None => {
                            tracing::debug!("verdict channel closed, exiting logger");
                            break;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    while let Ok(verdict) = verdict_rx.try_recv() {
                        log_verdict(&verdict);
                    }
                    tracing::debug!("verdict logger shutting down");
                    break;
                }
            }
        }
    })
}

fn log_verdict(verdict: &FileVerdict) {
    tracing::info!(
        verdict_id = %verdict.id,
        source = %verdict.source.display(),
        output = %verdict.output.display(),
        rows = verdict.rows,
        positives = verdict.positives,
        alert = verdict.is_alert(),
        "flow file classified"
    );
}

/// Record daemon-level metrics (build info).
fn record_daemon_metrics(module_count: usize) {
    metrics::gauge!(m::DAEMON_BUILD_INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);
    tracing::debug!(
        module_count,
        version = env!("CARGO_PKG_VERSION"),
        "daemon metrics recorded"
    );
}

/// Spawn a background task that periodically updates the uptime metric.
fn spawn_uptime_updater(
    start_time: Instant,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(UPTIME_UPDATE_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    #[allow(clippy::cast_precision_loss)]
                    metrics::gauge!(m::DAEMON_UPTIME_SECONDS)
                        .set(start_time.elapsed().as_secs() as f64);
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("uptime updater shutting down");
                    break;
                }
            }
        }
    })
}
