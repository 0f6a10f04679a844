//! Job lifecycle state management.
//!
//! The transition table is the single source of truth for legal status
//! changes; repository adapters call [`verify_transition`] before persisting
//! and reject anything else with a `StateTransition` error.

pub mod states;

pub use states::{ExecutionStatus, JobStatus};

use crate::error::{MoldockError, Result};

/// Verify a direct status change is in the legal transition set.
pub fn verify_transition(from: JobStatus, to: JobStatus) -> Result<()> {
    let legal = matches!(
        (from, to),
        (JobStatus::Pending, JobStatus::Running)
            | (JobStatus::Running, JobStatus::Completed)
            | (JobStatus::Running, JobStatus::Failed)
            | (JobStatus::Pending, JobStatus::Cancelled)
            | (JobStatus::Running, JobStatus::Cancelled)
    );

    if legal {
        Ok(())
    } else {
        Err(MoldockError::StateTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
