//! Sourcing pipeline core
//!
//! Produces a ranked, deduplicated shortlist of candidates for a structured
//! job description by combining the tenant's existing pool with fresh SERP
//! discoveries, then delivers a signed callback to the requesting service.
//!
//! The crate is organized around the pipeline stages:
//!
//! - [`config`] - environment-driven configuration with clamped bounds
//! - [`hints`] - quality scoring and sanitization of captured profile hints
//! - [`requirements`] - normalized requirements built from the jd digest
//! - [`track`] - tech / non-tech classification with LLM fallback
//! - [`ranker`] - pure fit scoring and location tier gating
//! - [`discovery`] - SERP query planning and budgeted execution
//! - [`budget`] - per-tenant daily SERP query reservations
//! - [`orchestrator`] - the end-to-end sourcing run and two-tier assembly
//! - [`queue`] - the job queue abstraction backing both worker queues
//! - [`callback`] - JWT-signed result delivery with retries
//! - [`rerank`] - post-enrichment recompute scheduling and execution
//! - [`store`] - persistence traits, Postgres implementations, and models

pub mod budget;
pub mod callback;
pub mod config;
pub mod diagnostics;
pub mod discovery;
pub mod errors;
pub mod geo;
pub mod hints;
pub mod llm;
pub mod orchestrator;
pub mod queue;
pub mod ranker;
pub mod requirements;
pub mod rerank;
pub mod serp;
pub mod store;
pub mod taxonomy;
pub mod track;

pub use config::SourcingConfig;
pub use errors::{Result, SourcingError};
pub use orchestrator::{Orchestrator, OrchestratorResult};
pub use requirements::{JobContext, JobRequirements};
pub use track::{Track, TrackDecision};
