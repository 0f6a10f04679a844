//! # Engine Registry
//!
//! Process-wide map from engine name to live adapter. Constructed once at
//! startup and handed to the orchestrator as an explicit context object so
//! tests can register fake adapters.
//!
//! Resolution distinguishes three failure classes with typed errors:
//! unknown engine and disabled engine are configuration errors (not
//! retryable), while a failed health probe is `EngineUnavailable`
//! (retryable at the orchestration level).

use super::{EngineInfo, EnginePort};
use crate::error::{MoldockError, Result};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

struct Registration {
    adapter: Arc<dyn EnginePort>,
    enabled: bool,
}

#[derive(Default)]
pub struct EngineRegistry {
    engines: DashMap<String, Registration>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self {
            engines: DashMap::new(),
        }
    }

    /// Register an adapter under its reported engine name. Re-registering a
    /// name replaces the previous adapter.
    pub fn register(&self, adapter: Arc<dyn EnginePort>) {
        let name = adapter.engine_info().name;
        info!(engine = %name, "registering engine adapter");
        self.engines.insert(
            name,
            Registration {
                adapter,
                enabled: true,
            },
        );
    }

    /// Administratively disable an engine without dropping its registration.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        match self.engines.get_mut(name) {
            Some(mut registration) => {
                registration.enabled = enabled;
                info!(engine = name, enabled, "engine availability changed");
                Ok(())
            }
            None => Err(MoldockError::UnknownEngine(name.to_string())),
        }
    }

    /// Resolve an adapter without probing health. Rejects unknown and
    /// disabled engines with distinct typed errors.
    pub fn get_engine(&self, name: &str) -> Result<Arc<dyn EnginePort>> {
        match self.engines.get(name) {
            None => Err(MoldockError::UnknownEngine(name.to_string())),
            Some(registration) if !registration.enabled => {
                Err(MoldockError::EngineDisabled(name.to_string()))
            }
            Some(registration) => Ok(Arc::clone(&registration.adapter)),
        }
    }

    /// Resolve an adapter and verify liveness; used at dispatch time.
    pub async fn resolve_healthy(&self, name: &str) -> Result<Arc<dyn EnginePort>> {
        let adapter = self.get_engine(name)?;
        if adapter.health_check().await {
            Ok(adapter)
        } else {
            warn!(engine = name, "engine failed health probe");
            Err(MoldockError::EngineUnavailable {
                name: name.to_string(),
                reason: "health probe failed".to_string(),
            })
        }
    }

    /// Names of all enabled engines.
    pub fn list_enabled(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .engines
            .iter()
            .filter(|entry| entry.value().enabled)
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Probe every registered engine, enabled or not.
    pub async fn health_check_all(&self) -> BTreeMap<String, bool> {
        let adapters: Vec<(String, Arc<dyn EnginePort>)> = self
            .engines
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(&entry.value().adapter)))
            .collect();

        let mut results = BTreeMap::new();
        for (name, adapter) in adapters {
            results.insert(name, adapter.health_check().await);
        }
        results
    }

    /// Metadata for every registered engine.
    pub fn engine_infos(&self) -> Vec<EngineInfo> {
        self.engines
            .iter()
            .map(|entry| entry.value().adapter.engine_info())
            .collect()
    }
}
