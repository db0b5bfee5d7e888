//! Manuscript-level quality assessment.
//!
//! One model call scores the assembled manuscript across fixed dimensions
//! on a 0–10 scale and assigns a letter grade. Assessment is advisory and
//! never fatal: any failure collapses to a neutral report (overall 7.0,
//! grade "B") so a finished manuscript is always delivered with *some*
//! report attached.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::chapter::ChapterContent;
use crate::gateway::{GenerateRequest, LlmGateway, LogMeta, TaskType};
use crate::utils::json::{is_effectively_empty, parse_llm_json};
use crate::utils::text::glyph_prefix;

/// Score and commentary for one quality dimension.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DimensionScore {
    /// 0–10.
    pub score: f64,
    pub issues: Vec<String>,
    pub suggestions: Vec<String>,
}

/// The assessor's verdict on a manuscript.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QualityReport {
    /// 0–10.
    pub overall_score: f64,
    pub grade: String,
    /// Dimension name → score block.
    pub dimensions: FxHashMap<String, DimensionScore>,
}

impl QualityReport {
    /// The neutral report used whenever assessment fails.
    #[must_use]
    pub fn neutral() -> Self {
        Self {
            overall_score: 7.0,
            grade: "B".to_string(),
            dimensions: FxHashMap::default(),
        }
    }
}

/// Letter grade for an overall 0–10 score.
#[must_use]
pub fn grade_for(overall: f64) -> &'static str {
    if overall >= 9.0 {
        "A"
    } else if overall >= 8.0 {
        "B+"
    } else if overall >= 7.0 {
        "B"
    } else if overall >= 6.0 {
        "C"
    } else {
        "D"
    }
}

const DIMENSIONS: &[&str] = &[
    "character_consistency",
    "plot_logic",
    "writing_quality",
    "pacing",
    "dialogue",
    "world_building",
];

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawAssessment {
    scores: FxHashMap<String, f64>,
    overall_score: Option<f64>,
    grade: Option<String>,
    issues: FxHashMap<String, Vec<String>>,
    suggestions: FxHashMap<String, Vec<String>>,
}

/// Scores finished manuscripts. Soft-failing by design.
pub struct QualityAssessor {
    gateway: Arc<LlmGateway>,
}

impl QualityAssessor {
    #[must_use]
    pub fn new(gateway: Arc<LlmGateway>) -> Self {
        Self { gateway }
    }

    /// Assess the assembled manuscript. Returns the neutral report on any
    /// model or parse failure.
    #[instrument(skip_all, fields(chapters = chapters.len()))]
    pub async fn assess(&self, chapters: &[ChapterContent]) -> QualityReport {
        if chapters.is_empty() {
            return QualityReport::neutral();
        }
        let manuscript: String = chapters
            .iter()
            .map(|c| format!("{}\n\n{}", c.title, c.content))
            .collect::<Vec<_>>()
            .join("\n\n");
        // A bounded excerpt keeps the prompt inside context budgets for
        // very long manuscripts.
        let excerpt = glyph_prefix(&manuscript, 12_000);

        let prompt = format!(
            r#"Assess the quality of this manuscript.

Manuscript ({total} chapters, excerpt):
{excerpt}

Score each dimension from 0 to 10: character_consistency, plot_logic,
writing_quality, pacing, dialogue, world_building.

Return a JSON object:
{{
    "scores": {{
        "character_consistency": 8.0,
        "plot_logic": 7.5,
        "writing_quality": 8.0,
        "pacing": 7.0,
        "dialogue": 7.5,
        "world_building": 8.0
    }},
    "overall_score": 7.7,
    "grade": "B+",
    "issues": {{"pacing": ["problem found"]}},
    "suggestions": {{"pacing": ["improvement"]}}
}}"#,
            total = chapters.len(),
        );

        let request = GenerateRequest::new(prompt, TaskType::QualityAssessment)
            .with_log(LogMeta::new("quality_assessment", "manuscript assessment"));
        let response = match self.gateway.generate(request).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "quality assessment call failed, using neutral report");
                return QualityReport::neutral();
            }
        };
        if is_effectively_empty(&response) {
            return QualityReport::neutral();
        }
        match parse_llm_json::<RawAssessment>(&response, "quality assessment") {
            Ok(raw) => build_report(raw),
            Err(e) => {
                tracing::warn!(error = %e, "quality assessment unparsable, using neutral report");
                QualityReport::neutral()
            }
        }
    }
}

fn build_report(raw: RawAssessment) -> QualityReport {
    let mut dimensions = FxHashMap::default();
    let mut sum = 0.0;
    let mut counted = 0usize;
    for &name in DIMENSIONS {
        let Some(&score) = raw.scores.get(name) else {
            continue;
        };
        let score = score.clamp(0.0, 10.0);
        sum += score;
        counted += 1;
        dimensions.insert(
            name.to_string(),
            DimensionScore {
                score,
                issues: raw.issues.get(name).cloned().unwrap_or_default(),
                suggestions: raw.suggestions.get(name).cloned().unwrap_or_default(),
            },
        );
    }
    if counted == 0 {
        return QualityReport::neutral();
    }

    let overall = raw
        .overall_score
        .map_or(sum / counted as f64, |o| o.clamp(0.0, 10.0));
    let grade = raw
        .grade
        .filter(|g| !g.trim().is_empty())
        .unwrap_or_else(|| grade_for(overall).to_string());
    QualityReport {
        overall_score: overall,
        grade,
        dimensions,
    }
}
