//! Structured error handling for the orchestration core.
//!
//! The taxonomy distinguishes caller errors (validation, quota), engine
//! failures (unavailable, timeout, execution), internal invariant violations
//! (state transitions), and security events (tenant isolation) so that the
//! orchestrator and worker loop can classify retryability without string
//! matching.

use thiserror::Error;

/// A single parameter or input violation. Validation reports every
/// violation it finds, not just the first.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ValidationViolation {
    pub field: String,
    pub message: String,
}

impl ValidationViolation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Debug, Error)]
pub enum MoldockError {
    /// Caller-supplied inputs or parameters fail the task's declared schema.
    /// Rejected at the boundary before any persistence.
    #[error("validation failed: {}", format_violations(.0))]
    Validation(Vec<ValidationViolation>),

    /// No adapter is registered under the requested engine name.
    #[error("unknown engine: {0}")]
    UnknownEngine(String),

    /// The engine exists but is administratively disabled. A configuration
    /// error, not retryable.
    #[error("engine is disabled: {0}")]
    EngineDisabled(String),

    /// The engine exists but its health probe failed. Retryable.
    #[error("engine unavailable: {name}: {reason}")]
    EngineUnavailable { name: String, reason: String },

    /// Engine call exceeded its deadline. Retryable up to the configured
    /// bound.
    #[error("execution timed out after {timeout_secs}s")]
    ExecutionTimeout { timeout_secs: u64 },

    /// Engine ran but reported failure. Terminal; diagnostic output is
    /// preserved verbatim.
    #[error("engine execution failed: {detail}")]
    EngineExecution { detail: String },

    /// Retry budget exhausted for a retryable failure class.
    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// Illegal job status transition. Always a bug signal; the operation is
    /// rejected, never coerced.
    #[error("illegal status transition: {from} -> {to}")]
    StateTransition { from: String, to: String },

    /// Access attempt crossing organization boundaries. Treated as a
    /// security event by callers.
    #[error("tenant isolation violation for organization {organization_id}")]
    TenantIsolation { organization_id: uuid::Uuid },

    /// Lookup miss, including cross-tenant lookups (indistinguishable by
    /// design so existence does not leak).
    #[error("{resource} not found")]
    NotFound { resource: String },

    /// Organization quota would be exceeded by this submission.
    #[error("quota exceeded for organization {organization_id}: {detail}")]
    QuotaExceeded {
        organization_id: uuid::Uuid,
        detail: String,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl MoldockError {
    /// Whether the orchestrator may retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::EngineUnavailable { .. } | Self::ExecutionTimeout { .. } | Self::Queue(_)
        )
    }

    /// Whether this error class must never create or mutate a job record.
    pub fn is_boundary_rejection(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::TenantIsolation { .. } | Self::QuotaExceeded { .. }
        )
    }

    /// Convenience constructor for a not-found of a given resource kind.
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }
}

fn format_violations(violations: &[ValidationViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, MoldockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(MoldockError::ExecutionTimeout { timeout_secs: 5 }.is_retryable());
        assert!(MoldockError::EngineUnavailable {
            name: "vina".into(),
            reason: "probe failed".into()
        }
        .is_retryable());

        assert!(!MoldockError::EngineDisabled("vina".into()).is_retryable());
        assert!(!MoldockError::EngineExecution {
            detail: "exit status 1".into()
        }
        .is_retryable());
        assert!(!MoldockError::Validation(vec![]).is_retryable());
    }

    #[test]
    fn test_boundary_rejections_have_no_side_effects_class() {
        let err = MoldockError::Validation(vec![ValidationViolation::new(
            "ligand",
            "required input missing",
        )]);
        assert!(err.is_boundary_rejection());
        assert!(!MoldockError::ExecutionTimeout { timeout_secs: 1 }.is_boundary_rejection());
    }

    #[test]
    fn test_validation_display_lists_all_violations() {
        let err = MoldockError::Validation(vec![
            ValidationViolation::new("exhaustiveness", "must be between 1 and 64"),
            ValidationViolation::new("ligand", "required input missing"),
        ]);
        let rendered = err.to_string();
        assert!(rendered.contains("exhaustiveness"));
        assert!(rendered.contains("ligand"));
    }
}
