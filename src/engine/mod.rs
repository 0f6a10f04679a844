//! # Engine Port
//!
//! Uniform contract every docking engine adapter satisfies, whether it
//! wraps a local subprocess (Vina, Smina, GNINA) or a remote service. The
//! orchestration layer depends only on this trait; concrete adapters are
//! resolved by name through the [`registry::EngineRegistry`].
//!
//! Adapters own their side effects: a failed, timed-out, or cancelled call
//! must leave no orphaned subprocesses, containers, or scratch files behind.
//! That cleanup guarantee is a correctness requirement of the port, not an
//! optimization.

pub mod command_line;
pub mod registry;

pub use command_line::{CommandLineEngine, EngineFlavor};
pub use registry::EngineRegistry;

use crate::error::{Result, ValidationViolation};
use crate::models::DockingOutcome;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

/// Everything an adapter needs to run one docking invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineInput {
    pub job_id: Uuid,
    pub organization_id: Uuid,
    /// Input slot name -> URI; the adapter materializes local paths
    pub inputs: BTreeMap<String, String>,
    /// Schema-normalized parameters
    pub params: Map<String, Value>,
}

/// Static engine metadata surfaced through the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineInfo {
    pub name: String,
    pub version: String,
    pub capabilities: Vec<String>,
    /// Inclusive numeric bounds the engine accepts, by parameter name
    pub parameter_ranges: BTreeMap<String, (f64, f64)>,
}

/// Successful engine invocation output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineOutput {
    pub outcome: DockingOutcome,
    pub execution_time: Duration,
    /// Raw engine diagnostics (stdout/stderr tail) for operator inspection
    pub diagnostics: Option<String>,
}

/// Uniform contract over heterogeneous docking engines.
///
/// Failures surface through the crate error taxonomy: timeouts as
/// `ExecutionTimeout` (retryable), engine crashes and non-zero exits as
/// `EngineExecution` (terminal, diagnostics preserved verbatim), probe
/// failures as `EngineUnavailable` (retryable).
#[async_trait]
pub trait EnginePort: Send + Sync {
    /// Engine name, version, and accepted parameter ranges.
    fn engine_info(&self) -> EngineInfo;

    /// Pure input validation against engine capabilities; returns every
    /// violation, not just the first. No I/O side effects.
    fn validate_input(&self, input: &EngineInput) -> Vec<ValidationViolation>;

    /// Run the engine. The adapter enforces `timeout` itself and guarantees
    /// subprocess/scratch cleanup on timeout or cancellation.
    async fn execute(&self, input: &EngineInput, timeout: Duration) -> Result<EngineOutput>;

    /// Cheap liveness probe.
    async fn health_check(&self) -> bool;

    /// Terminate an in-flight invocation for the given job. Returns true if
    /// something was actually cancelled.
    async fn cancel(&self, job_id: Uuid) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_input_round_trips_through_json() {
        let mut inputs = BTreeMap::new();
        inputs.insert("ligand".to_string(), "uri://l1".to_string());

        let input = EngineInput {
            job_id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            inputs,
            params: Map::new(),
        };
        let json = serde_json::to_string(&input).unwrap();
        let parsed: EngineInput = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.job_id, input.job_id);
        assert_eq!(parsed.inputs["ligand"], "uri://l1");
    }
}
