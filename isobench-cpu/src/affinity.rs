//! CPU affinity control
//!
//! Pins the benchmarking process to a CPU set (typically the isolated CPUs)
//! once at startup. Pinning is a precision optimization: platforms without a
//! usable mechanism report [`AffinityOutcome::NotApplied`] rather than fail.
//!
//! # Platform Behavior
//!
//! - **Linux**: `sched_setaffinity` on the calling process, enforced by the kernel.
//! - **Other platforms**: falls back to the capability layer (`core_affinity`),
//!   which can only pin to a single CPU.
//!
//! The previous affinity is never restored; a fresh process is expected for
//! every measurement run.

use crate::capability::{CapabilityFailure, CapabilityLayer, CapabilityOutcome};
use crate::topology::CpuSet;
use thiserror::Error;

/// How an affinity request was honoured
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AffinityMechanism {
    /// The OS affinity call
    Native,
    /// The named capability layer
    Capability(&'static str),
}

/// Native OS hook that pins the process to a CPU set
type NativeSetAffinity = fn(&CpuSet) -> Result<(), AffinityError>;

/// Result of attempting to pin the process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AffinityOutcome {
    /// The process is now restricted to the requested CPUs
    Applied {
        /// Which mechanism performed the pinning
        mechanism: AffinityMechanism,
    },
    /// No mechanism was available; the process keeps its current affinity
    NotApplied {
        /// Human-readable explanation of why pinning was not possible
        reason: String,
    },
}

impl AffinityOutcome {
    /// Whether the process was pinned
    pub fn is_applied(&self) -> bool {
        matches!(self, AffinityOutcome::Applied { .. })
    }
}

/// Errors raised when an affinity mechanism rejects the request
#[derive(Debug, Error)]
pub enum AffinityError {
    /// The requested CPU set was empty
    #[error("cannot set CPU affinity to an empty CPU set")]
    EmptySet,

    /// A CPU id does not fit the native affinity mask
    #[error("CPU {cpu} exceeds the maximum supported CPU id {max}")]
    CpuOutOfRange {
        /// Offending CPU id
        cpu: usize,
        /// Highest CPU id the mask can hold
        max: usize,
    },

    /// The OS affinity call failed
    #[error("sched_setaffinity({cpus}) failed: {source}")]
    Os {
        /// Requested CPUs as a range list
        cpus: String,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// The capability layer failed unexpectedly
    #[error("capability layer failed to set affinity: {0}")]
    Capability(#[from] CapabilityFailure),
}

/// Restrict the current process to `cpus`.
///
/// Tries the native OS call first, then the capability layer. Returns
/// `NotApplied` when neither exists. A mechanism that exists but rejects the
/// request is an error.
pub fn apply_affinity(
    cpus: &CpuSet,
    layer: &CapabilityLayer,
) -> Result<AffinityOutcome, AffinityError> {
    apply_affinity_with(native::SET_AFFINITY, cpus, layer)
}

fn apply_affinity_with(
    native: Option<NativeSetAffinity>,
    cpus: &CpuSet,
    layer: &CapabilityLayer,
) -> Result<AffinityOutcome, AffinityError> {
    if cpus.is_empty() {
        return Err(AffinityError::EmptySet);
    }

    if let Some(set_affinity) = native {
        set_affinity(cpus)?;
        tracing::debug!("Pinned process to CPUs {} (sched_setaffinity)", cpus);
        return Ok(AffinityOutcome::Applied {
            mechanism: AffinityMechanism::Native,
        });
    }

    let Some(capabilities) = layer.get() else {
        return Ok(AffinityOutcome::NotApplied {
            reason: "no CPU affinity mechanism on this platform".to_string(),
        });
    };

    match capabilities.set_affinity(cpus)? {
        CapabilityOutcome::Applied => {
            tracing::debug!("Pinned process to CPUs {} ({})", cpus, capabilities.name());
            Ok(AffinityOutcome::Applied {
                mechanism: AffinityMechanism::Capability(capabilities.name()),
            })
        }
        CapabilityOutcome::Unsupported { reason } | CapabilityOutcome::AccessDenied { reason } => {
            Ok(AffinityOutcome::NotApplied { reason })
        }
    }
}

/// CPUs the current process may run on, when the OS can report it.
pub fn current_affinity() -> Option<CpuSet> {
    native::get_affinity()
}

#[cfg(target_os = "linux")]
mod native {
    use super::{AffinityError, NativeSetAffinity};
    use crate::topology::CpuSet;
    use std::mem::MaybeUninit;

    const MAX_CPUS: usize = libc::CPU_SETSIZE as usize;

    pub(super) const SET_AFFINITY: Option<NativeSetAffinity> = Some(set_affinity);

    fn set_affinity(cpus: &CpuSet) -> Result<(), AffinityError> {
        if let Some(cpu) = cpus.last().filter(|&cpu| cpu >= MAX_CPUS) {
            return Err(AffinityError::CpuOutOfRange {
                cpu,
                max: MAX_CPUS - 1,
            });
        }

        unsafe {
            let mut set = MaybeUninit::<libc::cpu_set_t>::zeroed();
            let set_ref = set.assume_init_mut();
            libc::CPU_ZERO(set_ref);
            for cpu in cpus.iter() {
                libc::CPU_SET(cpu, set_ref);
            }

            let result = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), set_ref);
            if result == 0 {
                Ok(())
            } else {
                Err(AffinityError::Os {
                    cpus: cpus.to_string(),
                    source: std::io::Error::last_os_error(),
                })
            }
        }
    }

    pub(super) fn get_affinity() -> Option<CpuSet> {
        unsafe {
            let mut set = MaybeUninit::<libc::cpu_set_t>::zeroed();
            let result =
                libc::sched_getaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), set.as_mut_ptr());
            if result != 0 {
                return None;
            }
            let set = set.assume_init();
            Some((0..MAX_CPUS).filter(|&cpu| libc::CPU_ISSET(cpu, &set)).collect())
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod native {
    use super::NativeSetAffinity;
    use crate::topology::CpuSet;

    pub(super) const SET_AFFINITY: Option<NativeSetAffinity> = None;

    pub(super) fn get_affinity() -> Option<CpuSet> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Capabilities;

    /// Capability layer returning a fixed affinity result
    struct FixedAffinity(Result<CapabilityOutcome, CapabilityFailure>);

    impl Capabilities for FixedAffinity {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn set_affinity(&self, _cpus: &CpuSet) -> Result<CapabilityOutcome, CapabilityFailure> {
            self.0.clone()
        }

        fn set_highest_priority(&self) -> Result<CapabilityOutcome, CapabilityFailure> {
            Ok(CapabilityOutcome::Applied)
        }
    }

    fn layer(result: Result<CapabilityOutcome, CapabilityFailure>) -> CapabilityLayer {
        CapabilityLayer::Present(Box::new(FixedAffinity(result)))
    }

    fn native_ok(_cpus: &CpuSet) -> Result<(), AffinityError> {
        Ok(())
    }

    #[test]
    fn test_native_preferred_over_layer() {
        let outcome = apply_affinity_with(
            Some(native_ok),
            &CpuSet::from([0]),
            &layer(Err(CapabilityFailure("must not be called".to_string()))),
        )
        .unwrap();
        assert_eq!(
            outcome,
            AffinityOutcome::Applied {
                mechanism: AffinityMechanism::Native
            }
        );
    }

    #[test]
    fn test_layer_applied_without_native() {
        let outcome =
            apply_affinity_with(None, &CpuSet::from([0]), &layer(Ok(CapabilityOutcome::Applied)))
                .unwrap();
        assert_eq!(
            outcome,
            AffinityOutcome::Applied {
                mechanism: AffinityMechanism::Capability("fixed")
            }
        );
    }

    #[test]
    fn test_layer_unsupported_not_applied() {
        let outcome = apply_affinity_with(
            None,
            &CpuSet::from([0, 1]),
            &layer(Ok(CapabilityOutcome::Unsupported {
                reason: "single CPU only".to_string(),
            })),
        )
        .unwrap();
        assert_eq!(
            outcome,
            AffinityOutcome::NotApplied {
                reason: "single CPU only".to_string()
            }
        );
    }

    #[test]
    fn test_layer_access_denied_not_applied() {
        let outcome = apply_affinity_with(
            None,
            &CpuSet::from([0]),
            &layer(Ok(CapabilityOutcome::AccessDenied {
                reason: "EPERM".to_string(),
            })),
        )
        .unwrap();
        assert!(!outcome.is_applied());
    }

    #[test]
    fn test_layer_failure_propagates() {
        let result = apply_affinity_with(
            None,
            &CpuSet::from([0]),
            &layer(Err(CapabilityFailure("ffi error".to_string()))),
        );
        assert!(matches!(result, Err(AffinityError::Capability(_))));
    }

    #[test]
    fn test_no_mechanism_not_applied() {
        let outcome = apply_affinity_with(None, &CpuSet::from([0]), &CapabilityLayer::Absent).unwrap();
        assert!(matches!(outcome, AffinityOutcome::NotApplied { .. }));
    }

    #[test]
    fn test_empty_set_rejected() {
        let result = apply_affinity(&CpuSet::new(), &CapabilityLayer::Absent);
        assert!(matches!(result, Err(AffinityError::EmptySet)));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_reapply_current_affinity() {
        // Re-applying the current mask must succeed and leave it unchanged
        let current = current_affinity().expect("sched_getaffinity should work on Linux");
        assert!(!current.is_empty());

        let outcome = apply_affinity(&current, &CapabilityLayer::Absent).unwrap();
        assert_eq!(
            outcome,
            AffinityOutcome::Applied {
                mechanism: AffinityMechanism::Native
            }
        );
        assert_eq!(current_affinity(), Some(current));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_out_of_range_cpu() {
        let result = apply_affinity(&CpuSet::from([100_000]), &CapabilityLayer::Absent);
        assert!(matches!(result, Err(AffinityError::CpuOutOfRange { cpu: 100_000, .. })));
    }
}
