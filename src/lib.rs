#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Moldock Core
//!
//! Submission, caching, and execution-orchestration core for a multi-tenant
//! molecular docking platform.
//!
//! ## Overview
//!
//! Docking runs are expensive (seconds to tens of minutes of engine time),
//! and screening campaigns routinely resubmit identical work. This crate
//! canonicalizes each submission into a deterministic SHA-256 signature,
//! decides whether a prior result can be reused under a confidence-gated
//! cache policy, and otherwise drives the job through a pool of pluggable
//! docking engines while tracking lifecycle state and an ordered event
//! history per job.
//!
//! ## Architecture
//!
//! Hexagonal: the orchestration layer depends only on ports
//! ([`engine::EnginePort`], [`cache::CacheStore`],
//! [`repository::JobRepository`], [`queue::JobQueue`], [`catalog::Catalog`]).
//! Each port ships a PostgreSQL adapter for production and an in-memory
//! adapter, so the full submit/dispatch/complete lifecycle runs in tests
//! without a database or a real engine binary.
//!
//! ## Module Organization
//!
//! - [`models`] - Jobs, executions, results, cache entries, events, tenants
//! - [`canonical`] - Input canonicalization and signature computation
//! - [`validation`] - Schema-driven parameter validation and normalization
//! - [`engine`] - Engine port, registry, and command-line adapters
//! - [`cache`] - Confidence-gated result cache
//! - [`repository`] - Tenant-scoped job storage with CAS transitions
//! - [`queue`] - At-least-once dispatch queue
//! - [`catalog`] - Organization and task-definition lookup
//! - [`orchestration`] - Submit/cancel use-cases, dispatcher, worker pool
//! - [`state_machine`] - Job status transitions
//! - [`events`] - Broadcast lifecycle event stream
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use moldock_core::cache::InMemoryCacheStore;
//! use moldock_core::catalog::InMemoryCatalog;
//! use moldock_core::config::MoldockConfig;
//! use moldock_core::engine::EngineRegistry;
//! use moldock_core::events::EventPublisher;
//! use moldock_core::orchestration::{CancellationHub, Orchestrator};
//! use moldock_core::queue::InMemoryJobQueue;
//! use moldock_core::repository::InMemoryJobRepository;
//! use std::sync::Arc;
//!
//! let config = MoldockConfig::default();
//! let orchestrator = Orchestrator::new(
//!     Arc::new(InMemoryJobRepository::new()),
//!     Arc::new(InMemoryCacheStore::new()),
//!     Arc::new(InMemoryJobQueue::new()),
//!     Arc::new(InMemoryCatalog::new()),
//!     Arc::new(EngineRegistry::new()),
//!     EventPublisher::new(config.event_channel_capacity),
//!     Arc::new(CancellationHub::new()),
//!     config,
//! );
//! ```

pub mod cache;
pub mod canonical;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod queue;
pub mod repository;
pub mod state_machine;
pub mod validation;

pub use cache::{CacheDecision, CacheStore, NewCacheEntry, ReusePolicy};
pub use canonical::{canonicalize, signature_of};
pub use catalog::Catalog;
pub use config::MoldockConfig;
pub use engine::{EngineInfo, EngineInput, EngineOutput, EnginePort, EngineRegistry};
pub use error::{MoldockError, Result, ValidationViolation};
pub use events::EventPublisher;
pub use models::{
    CacheEntry, DockingOutcome, DockingPose, Job, JobEvent, NewJob, Organization, TaskDefinition,
    TaskExecution, TaskResult,
};
pub use orchestration::{
    CancellationHub, Dispatcher, Orchestrator, SubmissionResult, SubmitJobRequest, WorkerPool,
};
pub use queue::{JobQueue, QueuedMessage};
pub use repository::{JobFilters, JobRepository, Page, PageRequest};
pub use state_machine::{ExecutionStatus, JobStatus};
pub use validation::{FieldKind, FieldSpec, ParameterSchema};
