//! Dashboard status snapshot.
//!
//! The daemon periodically serializes a [`DashboardSnapshot`] (live flows,
//! capture state, alert report) to a JSON file so an external dashboard can
//! poll it. The file is replaced atomically on every write.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;

use flowwatch_classifier::{AlertAggregator, AlertReport};
use flowwatch_core::fs::FileSystem;
use flowwatch_flow_engine::{CaptureHandle, LiveFlow};

/// Point-in-time view consumed by the dashboard.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DashboardSnapshot {
    /// Flows currently tracked by the capture engine.
    pub table_data: Vec<LiveFlow>,
    /// Whether a capture loop is running.
    pub is_capturing: bool,
    /// Alert statistics over the processed-output directory.
    pub alerts: AlertReport,
}

impl DashboardSnapshot {
    /// Build a snapshot from whichever modules are enabled.
    ///
    /// Disabled modules contribute empty data.
    pub fn collect(capture: Option<&CaptureHandle>, aggregator: Option<&AlertAggregator>) -> Self {
        Self {
            table_data: capture.map(CaptureHandle::live_flows).unwrap_or_default(),
            is_capturing: capture.is_some_and(CaptureHandle::is_capturing),
            alerts: aggregator
                .map(AlertAggregator::compute_report)
                .unwrap_or_default(),
        }
    }
}

/// Serialize and atomically write a snapshot.
pub fn write_snapshot(
    fs: &dyn FileSystem,
    path: &Path,
    snapshot: &DashboardSnapshot,
) -> anyhow::Result<()> {
    let json = serde_json::to_vec_pretty(snapshot)?;
    fs.write_atomic(path, &json)?;
    Ok(())
}

/// Spawn a background task that rewrites the status file every `interval`.
///
/// A final snapshot is written when the shutdown signal arrives.
pub fn spawn_status_writer(
    capture: Option<CaptureHandle>,
    aggregator: Option<AlertAggregator>,
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            let stopping = tokio::select! {
                _ = ticker.tick() => false,
                _ = shutdown_rx.recv() => true,
            };

            let capture = capture.clone();
            let aggregator = aggregator.clone();
            let fs = Arc::clone(&fs);
            let path = path.clone();
            let result = tokio::task::spawn_blocking(move || {
                let snapshot = DashboardSnapshot::collect(capture.as_ref(), aggregator.as_ref());
                write_snapshot(fs.as_ref(), &path, &snapshot)
            })
            .await;

            match result {
                Ok(Ok(())) => tracing::trace!("status snapshot written"),
                Ok(Err(e)) => tracing::warn!(error = %e, "failed to write status snapshot"),
                Err(e) => tracing::warn!(error = %e, "status snapshot task failed"),
            }

            if stopping {
                tracing::debug!("status writer shutting down");
                break;
            }
        }
    })
}
