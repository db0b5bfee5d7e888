//! Outline construction: world-building, rough act-level structure, and
//! per-chapter detail.
//!
//! Two paths produce the same artifacts. The progressive path (default)
//! builds the world and a rough outline up front, then refines one chapter
//! outline just-in-time as earlier chapters complete, so late outlines can
//! react to what the prose actually did. The legacy full path produces
//! every chapter outline from a single call up front. Both satisfy the same
//! invariants: chapter numbers are contiguous from 1, exactly the last
//! chapter is final, and estimated word counts sum to the target.

pub mod distribution;
pub mod full;
pub mod progressive;

use serde::{Deserialize, Serialize};

pub use distribution::{distribute_words, Distribution};
pub use full::FullOutlineGenerator;
pub use progressive::{OutlineState, ProgressiveOutlineGenerator};

use miette::Diagnostic;
use thiserror::Error;

use crate::gateway::GatewayError;

/// The world a manuscript takes place in. Immutable once generated.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldBuilding {
    pub setting: String,
    pub time_period: String,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub social_structure: String,
    #[serde(default)]
    pub technology_level: String,
    #[serde(default)]
    pub magic_system: Option<String>,
    #[serde(default)]
    pub cultural_elements: Vec<String>,
    #[serde(default)]
    pub rules_and_laws: Vec<String>,
}

/// Act-level story plan. Immutable once generated.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoughOutline {
    pub story_arc: String,
    #[serde(default)]
    pub main_themes: Vec<String>,
    /// Ordered act descriptions, e.g. `["Act I: ...", "Act II: ..."]`.
    #[serde(default)]
    pub act_structure: Vec<String>,
    /// Ordered plot points; order is preserved when selecting which to
    /// introduce in a given chapter.
    #[serde(default)]
    pub major_plot_points: Vec<String>,
    /// Role name → description.
    #[serde(default)]
    pub character_roles: std::collections::BTreeMap<String, String>,
    pub estimated_chapters: u32,
}

/// One scene inside a chapter outline.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SceneOutline {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub characters: Vec<String>,
    #[serde(default)]
    pub location: String,
}

/// Detailed plan for a single chapter.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChapterOutline {
    /// 1-based; contiguous across a manuscript.
    pub number: u32,
    pub title: String,
    pub summary: String,
    #[serde(default)]
    pub key_events: Vec<String>,
    pub estimated_word_count: u64,
    #[serde(default)]
    pub scenes: Vec<SceneOutline>,
    #[serde(default)]
    pub volume_number: Option<u32>,
    #[serde(default)]
    pub act_number: Option<u32>,
    /// What this chapter is for, e.g. `"conflict escalation"`.
    #[serde(default)]
    pub narrative_purpose: Option<String>,
    /// True for exactly one chapter: the highest-numbered one.
    #[serde(default)]
    pub is_final_chapter: bool,
}

/// Errors from outline generation.
#[derive(Debug, Error, Diagnostic)]
pub enum OutlineError {
    #[error("model returned unusable {artifact} JSON after {attempts} attempt(s)")]
    #[diagnostic(
        code(fableforge::outline::invalid_model_output),
        help("The model repeatedly failed to produce the requested JSON shape.")
    )]
    InvalidModelOutput {
        artifact: &'static str,
        attempts: u32,
    },

    #[error("chapter {requested} requested but the outline plans {planned} chapters")]
    #[diagnostic(code(fableforge::outline::chapter_out_of_range))]
    ChapterOutOfRange { requested: u32, planned: u32 },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Gateway(#[from] GatewayError),
}

/// Narrative purpose of a chapter by its position in the manuscript.
///
/// Shared by both outline paths and by the coherence guidelines.
#[must_use]
pub fn narrative_purpose_for(position: u32, total: u32) -> &'static str {
    let progress = if total <= 1 {
        0.0
    } else {
        f64::from(position - 1) / f64::from(total - 1)
    };
    if progress < 0.1 {
        "opening hook"
    } else if progress < 0.25 {
        "world building"
    } else if progress < 0.5 {
        "plot development"
    } else if progress < 0.75 {
        "conflict escalation"
    } else if progress < 0.9 {
        "climax"
    } else {
        "resolution"
    }
}

/// Act number for a chapter position under a given act count.
#[must_use]
pub fn act_number_for(position: u32, total: u32, act_count: u32) -> u32 {
    if total == 0 || act_count == 0 {
        return 1;
    }
    let progress = f64::from(position) / f64::from(total);
    for act in 1..=act_count {
        if progress <= f64::from(act) / f64::from(act_count) {
            return act;
        }
    }
    act_count
}
