//! Shared test harness: in-memory adapters wired into a full orchestration
//! stack, plus scripted fake engines.

use async_trait::async_trait;
use dashmap::DashMap;
use moldock_core::cache::InMemoryCacheStore;
use moldock_core::catalog::InMemoryCatalog;
use moldock_core::config::MoldockConfig;
use moldock_core::engine::{EngineInfo, EngineInput, EngineOutput, EnginePort, EngineRegistry};
use moldock_core::error::{MoldockError, Result, ValidationViolation};
use moldock_core::events::EventPublisher;
use moldock_core::models::{DockingOutcome, DockingPose, Organization, TaskDefinition};
use moldock_core::orchestration::{CancellationHub, Dispatcher, Orchestrator};
use moldock_core::queue::{InMemoryJobQueue, JobQueue};
use moldock_core::repository::InMemoryJobRepository;
use moldock_core::validation::{FieldKind, FieldSpec, ParameterSchema};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

pub const TASK_NAME: &str = "dock";
pub const TASK_VERSION: &str = "1.0.0";

/// What the fake engine does on each `execute` call.
#[derive(Debug, Clone)]
pub enum FakeBehavior {
    /// Return one pose with the given engine-reported confidence.
    Succeed { confidence: f64 },
    /// Report an execution timeout on every attempt.
    Timeout,
    /// Block until cancelled, then report the kill.
    BlockUntilCancelled,
    /// Block until released, then return one pose with the given confidence.
    SucceedOnRelease { confidence: f64 },
}

pub struct FakeEngine {
    name: String,
    behavior: FakeBehavior,
    calls: AtomicU32,
    in_flight: DashMap<Uuid, Arc<Notify>>,
}

impl FakeEngine {
    pub fn new(name: impl Into<String>, behavior: FakeBehavior) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            behavior,
            calls: AtomicU32::new(0),
            in_flight: DashMap::new(),
        })
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Unblock a `SucceedOnRelease` invocation. Returns false while the
    /// engine has not reached its blocking point yet.
    pub fn release(&self, job_id: Uuid) -> bool {
        match self.in_flight.get(&job_id) {
            Some(notify) => {
                notify.notify_one();
                true
            }
            None => false,
        }
    }
}

fn success_output(confidence: f64) -> EngineOutput {
    EngineOutput {
        outcome: DockingOutcome {
            poses: vec![DockingPose {
                rank: 1,
                affinity_kcal_mol: -8.4,
                rmsd_lb: Some(0.0),
                rmsd_ub: Some(0.0),
                confidence: Some(confidence),
            }],
            engine_version: Some("fake".to_string()),
            output_refs: vec![],
        },
        execution_time: Duration::from_millis(5),
        diagnostics: None,
    }
}

#[async_trait]
impl EnginePort for FakeEngine {
    fn engine_info(&self) -> EngineInfo {
        EngineInfo {
            name: self.name.clone(),
            version: "fake".to_string(),
            capabilities: vec!["rigid".to_string()],
            parameter_ranges: BTreeMap::new(),
        }
    }

    fn validate_input(&self, input: &EngineInput) -> Vec<ValidationViolation> {
        let mut violations = Vec::new();
        for slot in ["protein", "ligand"] {
            if !input.inputs.contains_key(slot) {
                violations.push(ValidationViolation::new(slot, "required input missing"));
            }
        }
        violations
    }

    async fn execute(&self, input: &EngineInput, timeout: Duration) -> Result<EngineOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            FakeBehavior::Succeed { confidence } => Ok(success_output(*confidence)),
            FakeBehavior::Timeout => Err(MoldockError::ExecutionTimeout {
                timeout_secs: timeout.as_secs(),
            }),
            FakeBehavior::BlockUntilCancelled => {
                let notify = Arc::new(Notify::new());
                self.in_flight.insert(input.job_id, Arc::clone(&notify));
                tokio::select! {
                    _ = notify.notified() => {
                        self.in_flight.remove(&input.job_id);
                        Err(MoldockError::EngineExecution {
                            detail: "process killed by cancel".to_string(),
                        })
                    }
                    _ = tokio::time::sleep(timeout) => {
                        self.in_flight.remove(&input.job_id);
                        Err(MoldockError::ExecutionTimeout {
                            timeout_secs: timeout.as_secs(),
                        })
                    }
                }
            }
            FakeBehavior::SucceedOnRelease { confidence } => {
                let notify = Arc::new(Notify::new());
                self.in_flight.insert(input.job_id, Arc::clone(&notify));
                notify.notified().await;
                self.in_flight.remove(&input.job_id);
                Ok(success_output(*confidence))
            }
        }
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn cancel(&self, job_id: Uuid) -> Result<bool> {
        if let Some(notify) = self.in_flight.get(&job_id) {
            notify.notify_one();
            return Ok(true);
        }
        Ok(false)
    }
}

pub struct Harness {
    pub repository: Arc<InMemoryJobRepository>,
    pub cache: Arc<InMemoryCacheStore>,
    pub queue: Arc<InMemoryJobQueue>,
    pub catalog: Arc<InMemoryCatalog>,
    pub registry: Arc<EngineRegistry>,
    pub cancellations: Arc<CancellationHub>,
    pub config: MoldockConfig,
    pub orchestrator: Orchestrator,
    pub dispatcher: Arc<Dispatcher>,
    pub organization: Organization,
}

pub fn dock_schema() -> ParameterSchema {
    ParameterSchema::default()
        .with_field(
            "exhaustiveness",
            FieldSpec::optional(FieldKind::Float, serde_json::json!(8.0)).with_range(1.0, 64.0),
        )
        .with_field(
            "num_modes",
            FieldSpec::optional(FieldKind::Float, serde_json::json!(9.0)).with_range(1.0, 20.0),
        )
}

pub fn dock_inputs() -> BTreeMap<String, String> {
    let mut inputs = BTreeMap::new();
    inputs.insert("protein".to_string(), "s3://bucket/receptor.pdbqt".to_string());
    inputs.insert("ligand".to_string(), "s3://bucket/ligand.pdbqt".to_string());
    inputs
}

/// Full in-memory stack around one fake engine, with a seeded organization
/// and a shared dock task definition bound to that engine.
pub fn harness(engine: Arc<FakeEngine>, config: MoldockConfig) -> Harness {
    let engine_name = engine.engine_info().name;

    let repository = Arc::new(InMemoryJobRepository::new());
    let cache = Arc::new(InMemoryCacheStore::new());
    let queue = Arc::new(InMemoryJobQueue::new());
    let catalog = Arc::new(InMemoryCatalog::new());
    let registry = Arc::new(EngineRegistry::new());
    let cancellations = Arc::new(CancellationHub::new());
    let events = EventPublisher::new(config.event_channel_capacity);

    registry.register(engine);

    let organization = Organization::new("test-lab");
    catalog.add_organization(organization.clone());

    let mut definition = TaskDefinition::new(
        TASK_NAME,
        TASK_VERSION,
        dock_schema(),
        vec!["protein".to_string(), "ligand".to_string()],
        engine_name,
    );
    definition.timeout_secs = Some(5);
    catalog.add_task_definition(definition);

    let orchestrator = Orchestrator::new(
        Arc::clone(&repository) as _,
        Arc::clone(&cache) as _,
        Arc::clone(&queue) as _,
        Arc::clone(&catalog) as _,
        Arc::clone(&registry),
        events.clone(),
        Arc::clone(&cancellations),
        config.clone(),
    );
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&repository) as _,
        Arc::clone(&cache) as _,
        Arc::clone(&catalog) as _,
        Arc::clone(&registry),
        events,
        Arc::clone(&cancellations),
        config.clone(),
    ));

    Harness {
        repository,
        cache,
        queue,
        catalog,
        registry,
        cancellations,
        config,
        orchestrator,
        dispatcher,
        organization,
    }
}

/// Fast-retry config so retry/backoff tests finish quickly.
pub fn fast_config() -> MoldockConfig {
    MoldockConfig {
        retry_limit: 2,
        backoff_base_ms: 1,
        backoff_max_ms: 4,
        engine_timeout: Duration::from_secs(5),
        worker_poll_interval: Duration::from_millis(5),
        queue_lease: Duration::from_secs(30),
        cancellation_grace: Duration::from_millis(500),
        stale_running_threshold: Duration::from_millis(50),
        ..MoldockConfig::default()
    }
}

/// Lease the next queued message and run it through the dispatcher.
pub async fn drain_one(h: &Harness) {
    let message = h
        .queue
        .receive(h.config.queue_lease)
        .await
        .unwrap()
        .expect("a queued message");
    h.dispatcher
        .dispatch(message.job_id, message.organization_id)
        .await
        .unwrap();
    h.queue.ack(message.receipt).await.unwrap();
}
