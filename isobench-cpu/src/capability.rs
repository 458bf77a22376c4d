//! Optional capability layer
//!
//! Third-party crates that can pin the process or raise its priority on
//! platforms where the native calls in [`crate::affinity`] are unavailable.
//! The layer is either present or explicitly [`CapabilityLayer::Absent`];
//! callers check before use and degrade to "not applied".

use crate::topology::CpuSet;
use std::fmt;

/// Outcome of a single capability request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityOutcome {
    /// The request took effect
    Applied,
    /// The platform has no such facility
    Unsupported {
        /// Why the facility is unavailable
        reason: String,
    },
    /// The facility exists but the process lacks permission
    AccessDenied {
        /// Why the request was refused
        reason: String,
    },
}

/// A failure the capability layer did not anticipate
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct CapabilityFailure(
    /// Failure description
    pub String,
);

/// Affinity and priority facilities offered by a capability layer
pub trait Capabilities: Send + Sync {
    /// Short name for diagnostics
    fn name(&self) -> &'static str;

    /// Restrict the calling process (or thread) to `cpus`
    fn set_affinity(&self, cpus: &CpuSet) -> Result<CapabilityOutcome, CapabilityFailure>;

    /// Request the highest (real-time where available) scheduling priority
    fn set_highest_priority(&self) -> Result<CapabilityOutcome, CapabilityFailure>;
}

/// Either a usable capability layer or the explicit absence of one
pub enum CapabilityLayer {
    /// No layer; callers report "not applied"
    Absent,
    /// A usable layer
    Present(Box<dyn Capabilities>),
}

impl CapabilityLayer {
    /// The layer compiled into this build (cargo features `core-affinity`
    /// and `thread-priority`), or `Absent` when both are disabled.
    pub fn detect() -> Self {
        if cfg!(any(feature = "core-affinity", feature = "thread-priority")) {
            CapabilityLayer::Present(Box::new(CrateCapabilities))
        } else {
            CapabilityLayer::Absent
        }
    }

    /// Whether a layer is available
    pub fn is_present(&self) -> bool {
        matches!(self, CapabilityLayer::Present(_))
    }

    /// Borrow the layer if present
    pub fn get(&self) -> Option<&dyn Capabilities> {
        match self {
            CapabilityLayer::Absent => None,
            CapabilityLayer::Present(layer) => Some(layer.as_ref()),
        }
    }
}

impl fmt::Debug for CapabilityLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityLayer::Absent => f.write_str("Absent"),
            CapabilityLayer::Present(layer) => write!(f, "Present({})", layer.name()),
        }
    }
}

/// Capability layer backed by the `core_affinity` and `thread-priority` crates.
#[derive(Debug, Clone, Copy, Default)]
pub struct CrateCapabilities;

impl Capabilities for CrateCapabilities {
    fn name(&self) -> &'static str {
        "core_affinity/thread-priority"
    }

    #[cfg(feature = "core-affinity")]
    fn set_affinity(&self, cpus: &CpuSet) -> Result<CapabilityOutcome, CapabilityFailure> {
        // core_affinity pins the calling thread to exactly one core
        let cpu = match (cpus.len(), cpus.first()) {
            (1, Some(cpu)) => cpu,
            _ => {
                return Ok(CapabilityOutcome::Unsupported {
                    reason: format!("core_affinity can only pin to a single CPU, got {cpus}"),
                });
            }
        };

        let known = core_affinity::get_core_ids().unwrap_or_default();
        if known.is_empty() {
            return Ok(CapabilityOutcome::Unsupported {
                reason: "core_affinity reports no CPU cores on this platform".to_string(),
            });
        }
        if !known.iter().any(|core| core.id == cpu) {
            return Err(CapabilityFailure(format!("CPU {cpu} is not available")));
        }

        if core_affinity::set_for_current(core_affinity::CoreId { id: cpu }) {
            Ok(CapabilityOutcome::Applied)
        } else {
            Err(CapabilityFailure(format!("could not pin to CPU {cpu}")))
        }
    }

    #[cfg(not(feature = "core-affinity"))]
    fn set_affinity(&self, _cpus: &CpuSet) -> Result<CapabilityOutcome, CapabilityFailure> {
        Ok(CapabilityOutcome::Unsupported {
            reason: "built without the core-affinity feature".to_string(),
        })
    }

    #[cfg(feature = "thread-priority")]
    fn set_highest_priority(&self) -> Result<CapabilityOutcome, CapabilityFailure> {
        use thread_priority::{Error, ThreadPriority};

        match thread_priority::set_current_thread_priority(ThreadPriority::Max) {
            Ok(()) => Ok(CapabilityOutcome::Applied),
            Err(Error::OS(code)) if is_access_denied(code) => Ok(CapabilityOutcome::AccessDenied {
                reason: format!(
                    "raising priority requires elevated privileges: {}",
                    std::io::Error::from_raw_os_error(code)
                ),
            }),
            Err(e) => Err(CapabilityFailure(format!(
                "failed to set highest thread priority: {e:?}"
            ))),
        }
    }

    #[cfg(not(feature = "thread-priority"))]
    fn set_highest_priority(&self) -> Result<CapabilityOutcome, CapabilityFailure> {
        Ok(CapabilityOutcome::Unsupported {
            reason: "built without the thread-priority feature".to_string(),
        })
    }
}

#[cfg(all(feature = "thread-priority", unix))]
fn is_access_denied(code: i32) -> bool {
    code == libc::EPERM || code == libc::EACCES
}

#[cfg(all(feature = "thread-priority", windows))]
fn is_access_denied(code: i32) -> bool {
    // ERROR_ACCESS_DENIED
    code == 5
}

#[cfg(all(feature = "thread-priority", not(any(unix, windows))))]
fn is_access_denied(_code: i32) -> bool {
    false
}
