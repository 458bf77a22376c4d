//! Scheduling priority elevation
//!
//! Raising priority reduces preemption by other processes during measurement.
//! Elevation goes through the capability layer only. An absent layer, an
//! unsupported platform and a permission refusal are all expected outcomes
//! and reported as [`PriorityOutcome::NotApplied`]; anything else is an error
//! so that new platform failures surface instead of being silently ignored.

use crate::capability::{CapabilityFailure, CapabilityLayer, CapabilityOutcome};
use thiserror::Error;

/// Result of attempting to elevate priority
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PriorityOutcome {
    /// Priority raised to the highest level the layer offers
    Applied,
    /// Priority left unchanged
    NotApplied {
        /// Human-readable explanation of why elevation was not possible
        reason: String,
    },
}

impl PriorityOutcome {
    /// Whether priority was raised
    pub fn is_applied(&self) -> bool {
        matches!(self, PriorityOutcome::Applied)
    }
}

/// Unexpected failures while raising priority
#[derive(Debug, Error)]
pub enum PriorityError {
    /// The capability layer failed in an unanticipated way
    #[error("unexpected failure raising process priority: {0}")]
    Capability(#[from] CapabilityFailure),
}

/// Raise the current process to the highest scheduling priority available.
pub fn elevate_priority(layer: &CapabilityLayer) -> Result<PriorityOutcome, PriorityError> {
    let Some(capabilities) = layer.get() else {
        return Ok(PriorityOutcome::NotApplied {
            reason: "no priority capability layer available".to_string(),
        });
    };

    match capabilities.set_highest_priority()? {
        CapabilityOutcome::Applied => {
            tracing::debug!("Raised process priority ({})", capabilities.name());
            Ok(PriorityOutcome::Applied)
        }
        CapabilityOutcome::Unsupported { reason } => Ok(PriorityOutcome::NotApplied { reason }),
        CapabilityOutcome::AccessDenied { reason } => {
            tracing::debug!("Priority elevation denied: {}", reason);
            Ok(PriorityOutcome::NotApplied { reason })
        }
    }
}
