//! # Catalog
//!
//! Lookup port for organizations and task definitions. Task definitions are
//! either shared (no owning organization) or private to one tenant; the
//! resolve path applies that visibility rule so a private definition is
//! `NotFound` to everyone else, the same answer as for a definition that
//! does not exist.

use crate::error::{MoldockError, Result};
use crate::models::{Organization, OrganizationStatus, TaskDefinition};
use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn get_organization(&self, organization_id: Uuid) -> Result<Organization>;

    /// Resolve a task definition by (name, version) visible to the given
    /// tenant. Tenant-owned definitions shadow shared ones of the same key.
    async fn get_task_definition(
        &self,
        name: &str,
        version: &str,
        organization_id: Uuid,
    ) -> Result<TaskDefinition>;
}

/// In-memory catalog, seeded at startup.
#[derive(Default)]
pub struct InMemoryCatalog {
    organizations: DashMap<Uuid, Organization>,
    // Keyed on (name, version, owner); owner None is the shared namespace.
    definitions: DashMap<(String, String, Option<Uuid>), TaskDefinition>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_organization(&self, organization: Organization) {
        self.organizations.insert(organization.id, organization);
    }

    pub fn add_task_definition(&self, definition: TaskDefinition) {
        let key = (
            definition.name.clone(),
            definition.version.clone(),
            definition.organization_id,
        );
        self.definitions.insert(key, definition);
    }

    pub fn set_organization_status(&self, organization_id: Uuid, status: OrganizationStatus) {
        if let Some(mut organization) = self.organizations.get_mut(&organization_id) {
            organization.status = status;
        }
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn get_organization(&self, organization_id: Uuid) -> Result<Organization> {
        self.organizations
            .get(&organization_id)
            .map(|org| org.clone())
            .ok_or_else(|| MoldockError::not_found("organization"))
    }

    async fn get_task_definition(
        &self,
        name: &str,
        version: &str,
        organization_id: Uuid,
    ) -> Result<TaskDefinition> {
        let owned = (name.to_string(), version.to_string(), Some(organization_id));
        if let Some(definition) = self.definitions.get(&owned) {
            return Ok(definition.clone());
        }

        let shared = (name.to_string(), version.to_string(), None);
        self.definitions
            .get(&shared)
            .map(|definition| definition.clone())
            .ok_or_else(|| MoldockError::not_found("task definition"))
    }
}
