//! The pipeline driver.
//!
//! One [`NovelOrchestrator::generate`] call runs the full staged pipeline:
//! concept expansion → strategy selection → outline construction → cast
//! synthesis → chapter-by-chapter generation → quality assessment. Progress
//! is reported at fixed milestones roughly proportional to stage cost, and
//! a cancellation token is polled at every stage and chapter boundary.
//!
//! Chapters are strictly sequential: chapter `i+1` never starts before
//! chapter `i` has been accepted and the narrative state updated. The
//! orchestrator never calls a provider directly; every model exchange goes
//! through the gateway.

use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;
use tracing::instrument;

use crate::chapter::{ChapterContent, ChapterError, ChapterGenerator};
use crate::characters::{CharacterDatabase, CharacterError, CharacterSynthesizer};
use crate::concept::{Concept, ConceptError, ConceptExpander};
use crate::gateway::LlmGateway;
use crate::outline::{
    ChapterOutline, FullOutlineGenerator, OutlineError, OutlineState, ProgressiveOutlineGenerator,
};
use crate::progress::{CancelToken, ProgressSink, ProgressUpdate};
use crate::quality::{QualityAssessor, QualityReport};
use crate::session_log::{GenerationLogger, SessionLogError, SessionStatus};
use crate::strategy::{select_strategy, Strategy, StrategyError};
use crate::utils::text::glyph_prefix;

/// Inputs for one manuscript run.
#[derive(Clone, Debug)]
pub struct GenerationRequest {
    pub premise: String,
    pub target_words: u64,
    pub style: Option<String>,
    /// Progressive outlining is the default; the legacy full-outline path
    /// produces every chapter outline up front instead.
    pub progressive: bool,
}

impl GenerationRequest {
    #[must_use]
    pub fn new(premise: impl Into<String>, target_words: u64) -> Self {
        Self {
            premise: premise.into(),
            target_words,
            style: None,
            progressive: true,
        }
    }

    #[must_use]
    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = Some(style.into());
        self
    }

    #[must_use]
    pub fn with_full_outline(mut self) -> Self {
        self.progressive = false;
        self
    }
}

/// Outline artifacts in the shape the chosen path produced them.
#[derive(Clone, Debug)]
pub enum OutlineArtifacts {
    Progressive(OutlineState),
    Full(Vec<ChapterOutline>),
}

/// Everything a finished run produced.
#[derive(Clone, Debug)]
pub struct NovelResult {
    pub concept: Concept,
    pub strategy: Strategy,
    pub outline: OutlineArtifacts,
    pub characters: CharacterDatabase,
    pub chapters: Vec<ChapterContent>,
    pub total_words: u64,
    pub quality: QualityReport,
    pub session_id: String,
}

/// Fatal pipeline errors.
#[derive(Debug, Error, Diagnostic)]
pub enum OrchestratorError {
    /// The cancellation token was observed at a stage boundary.
    #[error("generation cancelled during {stage}")]
    #[diagnostic(code(fableforge::orchestrator::cancelled))]
    Cancelled { stage: &'static str },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Concept(#[from] ConceptError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Strategy(#[from] StrategyError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Outline(#[from] OutlineError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Characters(#[from] CharacterError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Chapter(#[from] ChapterError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    SessionLog(#[from] SessionLogError),
}

/// Drives the staged pipeline for one manuscript at a time.
pub struct NovelOrchestrator {
    gateway: Arc<LlmGateway>,
    logger: Arc<GenerationLogger>,
    progress: Option<Arc<dyn ProgressSink>>,
    cancel: CancelToken,
}

impl NovelOrchestrator {
    #[must_use]
    pub fn new(gateway: Arc<LlmGateway>, logger: Arc<GenerationLogger>) -> Self {
        Self {
            gateway,
            logger,
            progress: None,
            cancel: CancelToken::new(),
        }
    }

    /// Attach a sink for `(stage, percent)` milestones.
    #[must_use]
    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    /// Use an externally held cancellation token.
    #[must_use]
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// The token that cancels this orchestrator's runs.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn emit(&self, stage: &'static str, percent: f32) {
        tracing::info!(stage, percent, "pipeline progress");
        if let Some(sink) = &self.progress {
            sink.emit(ProgressUpdate::new(stage, percent));
        }
    }

    fn checkpoint(&self, stage: &'static str) -> Result<(), OrchestratorError> {
        if self.cancel.is_cancelled() {
            tracing::warn!(stage, "cancellation observed at stage boundary");
            Err(OrchestratorError::Cancelled { stage })
        } else {
            Ok(())
        }
    }

    /// Run the full pipeline. The session log is opened before the first
    /// stage and finalized as completed, failed, or cancelled on every
    /// exit path.
    #[instrument(skip_all, fields(target_words = request.target_words, progressive = request.progressive))]
    pub async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<NovelResult, OrchestratorError> {
        let session_title = glyph_prefix(request.premise.trim(), 60).to_string();
        let session_id = self.logger.start_session(&session_title)?;
        self.gateway.attach_logger(Arc::clone(&self.logger));

        let outcome = self.run_pipeline(&request, session_id.clone()).await;

        let status = match &outcome {
            Ok(_) => SessionStatus::Completed,
            Err(OrchestratorError::Cancelled { .. }) => SessionStatus::Cancelled,
            Err(_) => SessionStatus::Failed,
        };
        if let Err(e) = self.logger.finalize(status) {
            tracing::warn!(error = %e, "failed to finalize session log");
        }
        self.gateway.detach_logger();
        outcome
    }

    async fn run_pipeline(
        &self,
        request: &GenerationRequest,
        session_id: String,
    ) -> Result<NovelResult, OrchestratorError> {
        self.checkpoint("concept expansion")?;
        self.emit("concept expansion", 5.0);
        let expander = ConceptExpander::new(Arc::clone(&self.gateway));
        let concept = expander
            .expand(
                &request.premise,
                request.target_words,
                request.style.as_deref(),
            )
            .await?;

        self.checkpoint("strategy selection")?;
        self.emit("strategy selection", 15.0);
        let strategy = select_strategy(request.target_words, &concept)?;
        tracing::info!(
            structure = ?strategy.structure_type,
            chapters = strategy.chapter_count,
            "strategy selected"
        );

        if request.progressive {
            self.run_progressive(request, session_id, concept, strategy)
                .await
        } else {
            self.run_full(request, session_id, concept, strategy).await
        }
    }

    async fn run_progressive(
        &self,
        request: &GenerationRequest,
        session_id: String,
        concept: Concept,
        strategy: Strategy,
    ) -> Result<NovelResult, OrchestratorError> {
        self.checkpoint("initial outline")?;
        self.emit("initial outline", 20.0);
        let outline_gen = ProgressiveOutlineGenerator::new(Arc::clone(&self.gateway));
        let mut outline_state = outline_gen
            .generate_initial(&concept, &strategy, request.target_words)
            .await?;

        self.checkpoint("character creation")?;
        self.emit("character creation", 30.0);
        let synthesizer = CharacterSynthesizer::new(Arc::clone(&self.gateway));
        let characters = synthesizer
            .generate(&concept, &strategy, &outline_state.rough_outline)
            .await?;

        let mut chapter_gen = ChapterGenerator::new(Arc::clone(&self.gateway));
        let mut chapters: Vec<ChapterContent> = Vec::new();
        let mut total_words = 0u64;
        let total_chapters = outline_state.planned_chapters();

        for number in 1..=total_chapters {
            self.checkpoint("chapter generation")?;
            let percent = 30.0 + 60.0 * (f64::from(number - 1) / f64::from(total_chapters)) as f32;
            self.emit("chapter generation", percent);

            let prior_summary = recent_summaries(&chapters);
            let chapter_outline = outline_gen
                .refine_next_chapter(&mut outline_state, number, prior_summary.as_deref())
                .await?;
            let content = chapter_gen
                .generate_chapter(&chapter_outline, &characters, &concept, &strategy, &chapters)
                .await?;
            total_words += content.word_count;
            chapters.push(content);
        }

        let quality = self.assess(&chapters).await?;
        self.emit("complete", 100.0);
        Ok(NovelResult {
            concept,
            strategy,
            outline: OutlineArtifacts::Progressive(outline_state),
            characters,
            chapters,
            total_words,
            quality,
            session_id,
        })
    }

    async fn run_full(
        &self,
        request: &GenerationRequest,
        session_id: String,
        concept: Concept,
        strategy: Strategy,
    ) -> Result<NovelResult, OrchestratorError> {
        self.checkpoint("outline generation")?;
        self.emit("outline generation", 25.0);
        let outline_gen = FullOutlineGenerator::new(Arc::clone(&self.gateway));
        let outlines = outline_gen
            .generate(&concept, &strategy, request.target_words)
            .await?;

        self.checkpoint("character creation")?;
        self.emit("character creation", 35.0);
        let synthesizer = CharacterSynthesizer::new(Arc::clone(&self.gateway));
        // The full path has no rough outline; the cast works from the
        // concept alone.
        let characters = synthesizer
            .generate(&concept, &strategy, &crate::outline::RoughOutline::default())
            .await?;

        let mut chapter_gen = ChapterGenerator::new(Arc::clone(&self.gateway));
        let mut chapters: Vec<ChapterContent> = Vec::new();
        let mut total_words = 0u64;
        let total_chapters = outlines.len() as u32;

        for outline in &outlines {
            self.checkpoint("chapter generation")?;
            let percent =
                35.0 + 50.0 * (f64::from(outline.number - 1) / f64::from(total_chapters)) as f32;
            self.emit("chapter generation", percent);
            let content = chapter_gen
                .generate_chapter(outline, &characters, &concept, &strategy, &chapters)
                .await?;
            total_words += content.word_count;
            chapters.push(content);
        }

        let quality = self.assess(&chapters).await?;
        self.emit("complete", 100.0);
        Ok(NovelResult {
            concept,
            strategy,
            outline: OutlineArtifacts::Full(outlines),
            characters,
            chapters,
            total_words,
            quality,
            session_id,
        })
    }

    async fn assess(
        &self,
        chapters: &[ChapterContent],
    ) -> Result<QualityReport, OrchestratorError> {
        self.checkpoint("quality assessment")?;
        self.emit("quality assessment", 95.0);
        let assessor = QualityAssessor::new(Arc::clone(&self.gateway));
        Ok(assessor.assess(chapters).await)
    }
}

/// Summaries of the most recent two chapters, for outline refinement.
fn recent_summaries(chapters: &[ChapterContent]) -> Option<String> {
    if chapters.is_empty() {
        return None;
    }
    let recent: Vec<&str> = chapters
        .iter()
        .rev()
        .take(2)
        .rev()
        .map(|c| c.summary.as_str())
        .collect();
    Some(recent.join(" | "))
}
