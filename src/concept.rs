//! Concept expansion: a one-line premise becomes a structured story concept.
//!
//! The expander sends a single prompt asking the model for a JSON object
//! with the concept fields, parses it strictly (code fences tolerated), and
//! retries with a fresh call when the payload is malformed. The resulting
//! [`Concept`] is immutable and conditions every later stage.

use std::sync::Arc;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

use crate::gateway::{GatewayError, GenerateRequest, LlmGateway, LogMeta, TaskType};
use crate::utils::json::parse_llm_json;
use crate::utils::text::glyph_count;

/// Inclusive bounds for a manuscript's target length, in words.
pub const MIN_TARGET_WORDS: u64 = 1_000;
pub const MAX_TARGET_WORDS: u64 = 10_000_000;
/// Premises longer than this are rejected rather than truncated.
pub const MAX_PREMISE_GLYPHS: usize = 10_000;

/// Concept complexity, derived purely from the target length.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityLevel {
    Simple,
    Medium,
    Complex,
}

impl ComplexityLevel {
    /// ≤5k words reads as a focused short piece, ≤30k as a mid-length
    /// work, anything larger as a complex multi-thread narrative.
    #[must_use]
    pub fn for_target_words(target_words: u64) -> Self {
        if target_words <= 5_000 {
            Self::Simple
        } else if target_words <= 30_000 {
            Self::Medium
        } else {
            Self::Complex
        }
    }
}

/// Structured expansion of a user premise. Immutable after construction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Concept {
    pub theme: String,
    pub genre: String,
    pub main_conflict: String,
    pub world_type: String,
    pub tone: String,
    pub protagonist_type: Option<String>,
    pub setting: Option<String>,
    pub core_message: Option<String>,
    pub complexity_level: ComplexityLevel,
    /// Completeness/richness score in `[0, 1]` for the parsed fields.
    pub confidence_score: f64,
}

#[derive(Deserialize)]
struct RawConcept {
    theme: String,
    genre: String,
    main_conflict: String,
    world_type: String,
    tone: String,
    #[serde(default)]
    protagonist_type: Option<String>,
    #[serde(default)]
    setting: Option<String>,
    #[serde(default)]
    core_message: Option<String>,
}

/// Errors from concept expansion.
#[derive(Debug, Error, Diagnostic)]
pub enum ConceptError {
    #[error("premise must not be empty")]
    #[diagnostic(code(fableforge::concept::empty_premise))]
    EmptyPremise,

    #[error("premise is too long ({glyphs} glyphs, max {MAX_PREMISE_GLYPHS})")]
    #[diagnostic(code(fableforge::concept::premise_too_long))]
    PremiseTooLong { glyphs: usize },

    #[error("target words {target} outside supported range [{MIN_TARGET_WORDS}, {MAX_TARGET_WORDS}]")]
    #[diagnostic(code(fableforge::concept::target_out_of_range))]
    TargetOutOfRange { target: u64 },

    #[error("model returned unusable concept JSON after {attempts} attempt(s)")]
    #[diagnostic(
        code(fableforge::concept::invalid_model_output),
        help("The model repeatedly failed to produce the requested JSON shape.")
    )]
    InvalidModelOutput { attempts: u32 },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Gateway(#[from] GatewayError),
}

/// Expands premises into [`Concept`]s through the gateway.
pub struct ConceptExpander {
    gateway: Arc<LlmGateway>,
    max_retries: u32,
}

impl ConceptExpander {
    #[must_use]
    pub fn new(gateway: Arc<LlmGateway>) -> Self {
        Self {
            gateway,
            max_retries: 3,
        }
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Expand a premise into a full concept.
    #[instrument(skip(self, premise, style))]
    pub async fn expand(
        &self,
        premise: &str,
        target_words: u64,
        style: Option<&str>,
    ) -> Result<Concept, ConceptError> {
        let premise = premise.trim();
        if premise.is_empty() {
            return Err(ConceptError::EmptyPremise);
        }
        let glyphs = glyph_count(premise);
        if glyphs > MAX_PREMISE_GLYPHS {
            return Err(ConceptError::PremiseTooLong { glyphs });
        }
        if !(MIN_TARGET_WORDS..=MAX_TARGET_WORDS).contains(&target_words) {
            return Err(ConceptError::TargetOutOfRange {
                target: target_words,
            });
        }

        let prompt = build_prompt(premise, target_words, style);
        for attempt in 1..=self.max_retries {
            // Retries must be fresh calls, not cache replays of the same
            // malformed payload.
            let request = GenerateRequest::new(prompt.clone(), TaskType::ConceptExpansion)
                .with_cache(attempt == 1)
                .with_log(LogMeta::new("concept_expansion", "concept expansion"));
            let response = self.gateway.generate(request).await?;

            match parse_llm_json::<RawConcept>(&response, "concept") {
                Ok(raw) if has_required_fields(&raw) => {
                    let confidence_score = confidence(&raw);
                    tracing::info!(
                        theme = %raw.theme,
                        genre = %raw.genre,
                        confidence = confidence_score,
                        "concept expanded"
                    );
                    return Ok(Concept {
                        theme: raw.theme,
                        genre: raw.genre,
                        main_conflict: raw.main_conflict,
                        world_type: raw.world_type,
                        tone: raw.tone,
                        protagonist_type: raw.protagonist_type,
                        setting: raw.setting,
                        core_message: raw.core_message,
                        complexity_level: ComplexityLevel::for_target_words(target_words),
                        confidence_score,
                    });
                }
                Ok(_) => {
                    tracing::warn!(attempt, "concept response missing required fields");
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "concept response unparsable");
                }
            }
        }

        Err(ConceptError::InvalidModelOutput {
            attempts: self.max_retries,
        })
    }
}

fn has_required_fields(raw: &RawConcept) -> bool {
    ![
        &raw.theme,
        &raw.genre,
        &raw.main_conflict,
        &raw.world_type,
        &raw.tone,
    ]
    .iter()
    .any(|field| field.trim().is_empty())
}

/// Connectives and descriptive punctuation that mark a richer field.
const RICHNESS_MARKERS: &[&str] = &[",", ";", " and ", " but ", " yet ", " however ", "、", "，"];

fn confidence(raw: &RawConcept) -> f64 {
    let mut score = 0.0;
    for field in [
        &raw.theme,
        &raw.genre,
        &raw.main_conflict,
        &raw.world_type,
        &raw.tone,
    ] {
        let len = glyph_count(field);
        score += if len >= 10 {
            0.15
        } else if len >= 5 {
            0.10
        } else {
            0.05
        };
        if RICHNESS_MARKERS.iter().any(|m| field.contains(m)) {
            score += 0.05;
        }
    }
    for optional in [&raw.protagonist_type, &raw.setting, &raw.core_message] {
        if optional.as_deref().is_some_and(|v| !v.trim().is_empty()) {
            score += 0.05;
        }
    }
    f64::min(score, 1.0)
}

fn build_prompt(premise: &str, target_words: u64, style: Option<&str>) -> String {
    let style_line = style.map_or(String::new(), |s| format!("\nPreferred style: {s}"));
    format!(
        r#"Expand the following story premise into a complete novel concept.

Premise: {premise}
Target length: {target_words} words{style_line}

Analyze the premise and return a JSON object with these fields:

{{
    "theme": "the core theme (e.g. redemption, coming of age, technology and humanity)",
    "genre": "literary genre (e.g. sci-fi, fantasy, mystery, realism)",
    "main_conflict": "the central conflict, described concretely",
    "world_type": "the kind of world the story inhabits (e.g. near-future city, secondary world)",
    "tone": "the emotional register (e.g. wry and hopeful, grim and urgent)",
    "protagonist_type": "protagonist archetype (optional)",
    "setting": "where and when the story takes place (optional)",
    "core_message": "what the story ultimately says (optional)"
}}

Requirements:
1. Scale the concept's depth to the target length.
2. Keep every element consistent with the others.
3. The response must be valid JSON.
4. Make each field specific and evocative."#
    )
}
