//! # TaskDefinition Model
//!
//! Versioned, engine-agnostic task specification. A definition is immutable
//! once published; changed behavior ships as a new version so cached results
//! keyed on (name, version, signature) stay valid. A definition is owned by
//! one organization or marked shared for all tenants.

use crate::validation::ParameterSchema;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub id: Uuid,
    /// Task identity, e.g. "dock-v1"
    pub name: String,
    /// Semantic version of the task behavior, e.g. "1.0.0"
    pub version: String,
    /// Declared parameter schema; drives validation and canonicalization
    pub parameter_schema: ParameterSchema,
    /// Input slots the caller must provide as URIs, e.g. ["ligand", "protein"]
    pub required_inputs: Vec<String>,
    /// Target engine name resolved through the registry at dispatch time
    pub engine: String,
    /// Owning tenant; None marks a shared, system-wide definition
    pub organization_id: Option<Uuid>,
    /// Per-task engine timeout override in seconds
    pub timeout_secs: Option<u64>,
    /// Per-task cache confidence threshold override
    pub cache_confidence_threshold: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl TaskDefinition {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        parameter_schema: ParameterSchema,
        required_inputs: Vec<String>,
        engine: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            version: version.into(),
            parameter_schema,
            required_inputs,
            engine: engine.into(),
            organization_id: None,
            timeout_secs: None,
            cache_confidence_threshold: None,
            created_at: Utc::now(),
        }
    }

    pub fn owned_by(mut self, organization_id: Uuid) -> Self {
        self.organization_id = Some(organization_id);
        self
    }

    /// Whether the given tenant may submit against this definition.
    pub fn visible_to(&self, organization_id: Uuid) -> bool {
        match self.organization_id {
            None => true,
            Some(owner) => owner == organization_id,
        }
    }
}
