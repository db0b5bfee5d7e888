//! # Fableforge: Staged Long-Form Fiction Generation
//!
//! Fableforge turns a short premise into a complete manuscript (1k to 10M
//! words) by driving a staged pipeline over one or more LLM back-ends while
//! keeping the narrative coherent across chapters.
//!
//! ## Core Concepts
//!
//! - **Pipeline**: concept expansion → strategy selection → outline
//!   construction → cast synthesis → chapter-by-chapter generation →
//!   quality assessment, driven by the [`orchestrator`]
//! - **Progressive outlining**: world and act structure up front, chapter
//!   detail refined just-in-time as earlier chapters complete
//! - **Narrative state**: a running model of characters, plot threads,
//!   world facts, and mood that conditions every chapter prompt
//! - **Gateway**: one entry point for all model calls, with provider
//!   routing, circuit-breaker fallback, process-wide rate limiting,
//!   fingerprint caching, and per-manuscript session logs
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use fableforge::config::Settings;
//! use fableforge::gateway::LlmGateway;
//! use fableforge::orchestrator::{GenerationRequest, NovelOrchestrator};
//! use fableforge::session_log::GenerationLogger;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Arc::new(Settings::from_env());
//! let gateway = Arc::new(LlmGateway::from_settings(Arc::clone(&settings)));
//! let logger = Arc::new(GenerationLogger::new(&settings.log_dir));
//!
//! let orchestrator = NovelOrchestrator::new(gateway, logger);
//! let result = orchestrator
//!     .generate(
//!         GenerationRequest::new("A robot gains emotions", 5_000).with_style("sci-fi"),
//!     )
//!     .await?;
//!
//! println!(
//!     "{} chapters, {} words, grade {}",
//!     result.chapters.len(),
//!     result.total_words,
//!     result.quality.grade
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ## Ordering Guarantees
//!
//! Within one manuscript, chapters are generated strictly in order: the
//! coherence context for chapter `i` is built only from chapters `1..i-1`,
//! and the narrative state is updated exactly once per completed chapter.
//! Parallelism is available only across independent manuscripts or across
//! independent non-narrative calls ([`gateway::LlmGateway::generate_batch`]).
//!
//! ## Module Guide
//!
//! - [`concept`] - premise → structured concept
//! - [`strategy`] - length + concept → structural plan (pure)
//! - [`outline`] - world building, rough outline, chapter refinement
//! - [`characters`] - cast synthesis and lookup
//! - [`coherence`] - narrative state and per-chapter context
//! - [`chapter`] - chapter prompts, validation, and generation
//! - [`quality`] - manuscript-level assessment
//! - [`orchestrator`] - the pipeline driver
//! - [`gateway`] - router, fallback, rate limiting, caching, providers
//! - [`session_log`] - per-manuscript generation logs
//! - [`progress`] - progress sinks and cancellation
//! - [`config`] - process-level settings

pub mod chapter;
pub mod characters;
pub mod coherence;
pub mod concept;
pub mod config;
pub mod gateway;
pub mod orchestrator;
pub mod outline;
pub mod progress;
pub mod quality;
pub mod session_log;
pub mod strategy;
pub mod telemetry;
pub mod utils;
