//! # TaskResult Model
//!
//! Engine-agnostic output of a completed execution. Immutable once written,
//! one-to-one with the execution that produced it. The payload is the
//! docking outcome serialized under a schema version so result readers can
//! evolve independently of the engines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current payload schema version written by this crate.
pub const RESULT_SCHEMA_VERSION: u32 = 1;

/// Individual docking pose, ranked by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DockingPose {
    pub rank: u32,
    /// Binding affinity in kcal/mol; lower is tighter binding
    pub affinity_kcal_mol: f64,
    pub rmsd_lb: Option<f64>,
    pub rmsd_ub: Option<f64>,
    /// Engine-native confidence for this pose, when the engine reports one
    /// (e.g. a CNN score)
    pub confidence: Option<f64>,
}

/// Structured engine output for one docking run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DockingOutcome {
    pub poses: Vec<DockingPose>,
    pub engine_version: Option<String>,
    /// Output artifact references (URIs), e.g. pose files
    pub output_refs: Vec<String>,
}

impl DockingOutcome {
    /// Best pose by binding affinity (minimum kcal/mol).
    pub fn best_pose(&self) -> Option<&DockingPose> {
        self.poses
            .iter()
            .min_by(|a, b| a.affinity_kcal_mol.total_cmp(&b.affinity_kcal_mol))
    }

    /// Reuse confidence for this outcome.
    ///
    /// Uses the best pose's engine-reported confidence when present;
    /// otherwise a deterministic affinity-derived fallback (logistic in the
    /// binding affinity, so tighter binding scores higher). Empty outcomes
    /// score zero.
    pub fn confidence_score(&self) -> f64 {
        match self.best_pose() {
            Some(pose) => pose
                .confidence
                .unwrap_or_else(|| affinity_confidence(pose.affinity_kcal_mol))
                .clamp(0.0, 1.0),
            None => 0.0,
        }
    }
}

fn affinity_confidence(affinity_kcal_mol: f64) -> f64 {
    1.0 / (1.0 + (affinity_kcal_mol + 6.0).exp())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub job_id: Uuid,
    pub organization_id: Uuid,
    pub schema_version: u32,
    /// Serialized [`DockingOutcome`]
    pub payload: serde_json::Value,
    /// 0-1 reuse confidence recorded at completion time
    pub confidence_score: f64,
    pub execution_time_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl TaskResult {
    pub fn outcome(&self) -> crate::error::Result<DockingOutcome> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}
