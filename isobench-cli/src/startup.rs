//! Process setup before timed work
//!
//! CPU placement and priority are process-global. They are applied once,
//! before calibration, and never restored.

use anyhow::Context;
use isobench_cpu::{
    AffinityOutcome, CapabilityLayer, CpuSet, PriorityOutcome, SystemPaths, apply_affinity,
    elevate_priority, isolated_cpus_in,
};

/// Requested CPU placement, after CLI flags have overridden the config file
#[derive(Debug, Clone, Default)]
pub struct CpuSettings {
    /// Explicit CPU list
    pub affinity: Option<CpuSet>,
    /// Fall back to isolated CPUs when no explicit list is given
    pub use_isolated: bool,
    /// Ask for the highest scheduling priority
    pub elevate_priority: bool,
}

/// What [`configure_process`] did
#[derive(Debug, Clone, Default)]
pub struct StartupReport {
    /// CPUs requested and the outcome, when pinning was attempted
    pub affinity: Option<(CpuSet, AffinityOutcome)>,
    /// Outcome of priority elevation, when requested
    pub priority: Option<PriorityOutcome>,
}

/// Apply CPU settings to the current process.
///
/// Pins to the explicit list if one is given, else to the isolated CPUs when
/// `use_isolated` is set and the kernel reports some. Capability gaps are
/// logged and reported; only hard OS failures are errors.
pub fn configure_process(
    settings: &CpuSettings,
    paths: &SystemPaths,
    layer: &CapabilityLayer,
) -> anyhow::Result<StartupReport> {
    let mut report = StartupReport::default();

    let target = match &settings.affinity {
        Some(cpus) => Some(cpus.clone()),
        None if settings.use_isolated => {
            let isolated = isolated_cpus_in(paths);
            match &isolated {
                Some(cpus) => tracing::debug!("isolated CPUs: {}", cpus),
                None => tracing::debug!("no isolated CPUs found"),
            }
            isolated.filter(|cpus| !cpus.is_empty())
        }
        None => None,
    };

    if let Some(cpus) = target {
        let outcome = apply_affinity(&cpus, layer)
            .with_context(|| format!("failed to pin process to CPUs {cpus}"))?;
        match &outcome {
            AffinityOutcome::Applied { mechanism } => {
                tracing::info!("pinned to CPUs {} ({:?})", cpus, mechanism)
            }
            AffinityOutcome::NotApplied { reason } => {
                tracing::warn!("CPU affinity not applied: {}", reason)
            }
        }
        report.affinity = Some((cpus, outcome));
    }

    if settings.elevate_priority {
        let outcome = elevate_priority(layer).context("failed to raise process priority")?;
        match &outcome {
            PriorityOutcome::Applied => tracing::info!("process priority raised"),
            PriorityOutcome::NotApplied { reason } => {
                tracing::warn!("priority not raised: {}", reason)
            }
        }
        report.priority = Some(outcome);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_system() -> (tempfile::TempDir, SystemPaths) {
        let root = tempfile::tempdir().unwrap();
        let paths = SystemPaths::with_root(root.path());
        (root, paths)
    }

    #[test]
    fn test_nothing_requested() {
        let (_root, paths) = empty_system();
        let report =
            configure_process(&CpuSettings::default(), &paths, &CapabilityLayer::Absent).unwrap();
        assert!(report.affinity.is_none());
        assert!(report.priority.is_none());
    }

    #[test]
    fn test_undetermined_isolation_skips_pinning() {
        let (_root, paths) = empty_system();
        let settings = CpuSettings {
            use_isolated: true,
            ..Default::default()
        };
        let report = configure_process(&settings, &paths, &CapabilityLayer::Absent).unwrap();
        assert!(report.affinity.is_none());
    }

    #[test]
    fn test_priority_without_layer_is_soft() {
        let (_root, paths) = empty_system();
        let settings = CpuSettings {
            elevate_priority: true,
            ..Default::default()
        };
        let report = configure_process(&settings, &paths, &CapabilityLayer::Absent).unwrap();
        assert!(matches!(
            report.priority,
            Some(PriorityOutcome::NotApplied { .. })
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_explicit_affinity_reapplies_current_set() {
        let (_root, paths) = empty_system();
        let current = isobench_cpu::current_affinity().unwrap();
        let settings = CpuSettings {
            affinity: Some(current.clone()),
            ..Default::default()
        };
        let report = configure_process(&settings, &paths, &CapabilityLayer::Absent).unwrap();
        let (cpus, outcome) = report.affinity.unwrap();
        assert_eq!(cpus, current);
        assert!(outcome.is_applied());
    }
}
