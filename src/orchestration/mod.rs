//! # Orchestration
//!
//! The use-case layer tying the ports together. [`Orchestrator`] owns the
//! synchronous half of the lifecycle (submit, cancel, status); the
//! [`Dispatcher`] owns the asynchronous half, invoked by the worker pool for
//! each leased queue message. Both are built over trait objects so the whole
//! layer runs against in-memory adapters in tests.
//!
//! Submission: canonicalize, gate through the cache, create a PENDING job,
//! enqueue. The engine never runs inline with a submit call.

pub mod dispatcher;
pub mod orchestrator;
pub mod types;
pub mod worker;

pub use dispatcher::Dispatcher;
pub use orchestrator::Orchestrator;
pub use types::{CancellationHub, CacheOutcome, JobStatusView, SubmissionResult, SubmitJobRequest};
pub use worker::WorkerPool;
