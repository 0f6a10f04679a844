//! # Organization Model
//!
//! Tenant boundary for the platform. Every job, execution, and event is
//! scoped to exactly one organization; the repository layer refuses
//! unscoped access. Organizations are never hard-deleted, only moved to
//! `Deleted` status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrganizationStatus {
    Active,
    Suspended,
    Deleted,
}

impl OrganizationStatus {
    /// Suspended and deleted organizations cannot submit new work.
    pub fn can_submit(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for OrganizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Suspended => write!(f, "suspended"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

impl std::str::FromStr for OrganizationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "suspended" => Ok(Self::Suspended),
            "deleted" => Ok(Self::Deleted),
            _ => Err(format!("Invalid organization status: {s}")),
        }
    }
}

/// Per-tenant resource limits, mutated only by admin provisioning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceQuotas {
    /// Jobs allowed in PENDING or RUNNING at once
    pub max_concurrent_jobs: i64,
    pub max_storage_bytes: i64,
    pub monthly_compute_seconds: i64,
}

impl Default for ResourceQuotas {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 25,
            max_storage_bytes: 50 * 1024 * 1024 * 1024,
            monthly_compute_seconds: 100 * 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub status: OrganizationStatus,
    pub quotas: ResourceQuotas,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Organization {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            status: OrganizationStatus::Active,
            quotas: ResourceQuotas::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_quotas(mut self, quotas: ResourceQuotas) -> Self {
        self.quotas = quotas;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_active_orgs_can_submit() {
        assert!(OrganizationStatus::Active.can_submit());
        assert!(!OrganizationStatus::Suspended.can_submit());
        assert!(!OrganizationStatus::Deleted.can_submit());
    }

    #[test]
    fn test_new_organization_defaults() {
        let org = Organization::new("chem-lab");
        assert_eq!(org.status, OrganizationStatus::Active);
        assert_eq!(org.quotas.max_concurrent_jobs, 25);
    }
}
