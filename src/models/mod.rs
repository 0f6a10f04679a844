//! Data layer for the docking orchestration core.
//!
//! Entities are plain serde structs; persistence adapters in
//! [`crate::repository`] and [`crate::cache`] own the row mapping.

pub mod cache_entry;
pub mod job;
pub mod job_event;
pub mod organization;
pub mod task_definition;
pub mod task_execution;
pub mod task_result;

pub use cache_entry::CacheEntry;
pub use job::{CacheProvenance, Job, NewJob};
pub use job_event::JobEvent;
pub use organization::{Organization, OrganizationStatus, ResourceQuotas};
pub use task_definition::TaskDefinition;
pub use task_execution::{NewTaskExecution, TaskExecution};
pub use task_result::{DockingOutcome, DockingPose, TaskResult, RESULT_SCHEMA_VERSION};
