//! Daemon health for the capture controller and the classification pipeline.
//!
//! [`Orchestrator::health`](crate::orchestrator::Orchestrator::health) asks the
//! two modules for their state and folds the answers into one [`DaemonHealth`].
//! A capture loop that died on a device error shows up as `Unhealthy`; a work
//! queue deeper than `pipeline.queue_warn_depth` shows up as `Degraded`.
//!
//! The daemon reports the worst module state. A module disabled in
//! `flowwatch.toml` is listed but never affects the overall status, so a
//! classifier-only deployment stays `Healthy` without a capture loop.

use serde::Serialize;

use flowwatch_core::pipeline::HealthStatus;

/// Health report returned by `Orchestrator::health`.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonHealth {
    /// Worst state among enabled modules.
    pub status: HealthStatus,
    pub uptime_secs: u64,
    /// Always `capture` then `classifier`.
    pub modules: Vec<ModuleHealth>,
}

/// One module's entry in [`DaemonHealth`].
///
/// `capture` goes unhealthy when it is idle or its loop stopped on a source
/// error. `classifier` is degraded while its queue backs up and unhealthy once
/// the worker has exited.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleHealth {
    /// `"capture"` or `"classifier"`.
    pub name: String,
    /// `[capture] enabled` / `[pipeline] enabled` from the config.
    pub enabled: bool,
    pub status: HealthStatus,
}

/// Fold module states into the daemon state (Unhealthy > Degraded > Healthy).
///
/// Reasons are prefixed with the module name and joined with `"; "`, e.g.
/// `capture: not running; classifier: worker exited`.
pub fn aggregate_status(modules: &[ModuleHealth]) -> HealthStatus {
    let enabled = modules.iter().filter(|m| m.enabled);

    let mut degraded = Vec::new();
    let mut unhealthy = Vec::new();

    for module in enabled {
        match &module.status {
            HealthStatus::Healthy => {}
            HealthStatus::Degraded(reason) => {
                degraded.push(format!("{}: {}", module.name, reason));
            }
            HealthStatus::Unhealthy(reason) => {
                unhealthy.push(format!("{}: {}", module.name, reason));
            }
        }
    }

    if !unhealthy.is_empty() {
        HealthStatus::Unhealthy(unhealthy.join("; "))
    } else if !degraded.is_empty() {
        HealthStatus::Degraded(degraded.join("; "))
    } else {
        HealthStatus::Healthy
    }
}
