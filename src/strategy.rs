//! Strategy selection: target length + concept → structural plan.
//!
//! This stage is a pure function over its inputs. It never touches the
//! gateway, so identical inputs always produce identical strategies, which
//! downstream stages and the tests rely on.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::concept::{Concept, MAX_TARGET_WORDS, MIN_TARGET_WORDS};

/// Overall dramatic structure, selected by length bucket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StructureType {
    /// A single unbroken narrative line; available for explicit use but not
    /// produced by length-based selection.
    SingleLine,
    ThreeAct,
    FiveAct,
    MultiVolume,
    Epic,
}

impl StructureType {
    /// Whether this structure presumes an antagonist-driven conflict.
    #[must_use]
    pub fn bears_conflict(self) -> bool {
        !matches!(self, Self::SingleLine)
    }
}

/// How much interiority the cast receives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CharacterDepth {
    Basic,
    Medium,
    Deep,
}

/// Narrative pacing band.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pacing {
    Fast,
    Moderate,
    Slow,
    Epic,
}

/// World-building investment level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorldDepth {
    Low,
    Medium,
    High,
}

/// Immutable structural plan for one manuscript.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Strategy {
    pub structure_type: StructureType,
    pub chapter_count: u32,
    pub character_depth: CharacterDepth,
    pub pacing: Pacing,
    /// Required iff the structure is multi-volume or epic.
    pub volume_count: Option<u32>,
    pub world_building_depth: WorldDepth,
    pub magic_system: Option<String>,
    pub tech_level: Option<String>,
    pub genre_specific_elements: Vec<String>,
    pub words_per_chapter: u64,
    pub estimated_scenes: u32,
    /// Blend of length, chapter, character, and world factors in `[0, 1]`.
    pub complexity_score: f64,
}

/// Errors from strategy selection.
#[derive(Debug, Error, Diagnostic)]
pub enum StrategyError {
    #[error("target words {target} outside supported range [{MIN_TARGET_WORDS}, {MAX_TARGET_WORDS}]")]
    #[diagnostic(code(fableforge::strategy::target_out_of_range))]
    TargetOutOfRange { target: u64 },

    #[error("selected strategy failed validation: {reason}")]
    #[diagnostic(code(fableforge::strategy::invalid))]
    Invalid { reason: &'static str },
}

/// Select the structural plan for `target_words` and `concept`.
///
/// Pure: no I/O, no randomness, no shared state.
pub fn select_strategy(target_words: u64, concept: &Concept) -> Result<Strategy, StrategyError> {
    if !(MIN_TARGET_WORDS..=MAX_TARGET_WORDS).contains(&target_words) {
        return Err(StrategyError::TargetOutOfRange {
            target: target_words,
        });
    }

    let structure_type = structure_for(target_words);
    let chapter_count = chapter_count_for(target_words, structure_type);
    let character_depth = depth_for(target_words);
    let pacing = pacing_for(target_words);

    let mut strategy = Strategy {
        structure_type,
        chapter_count,
        character_depth,
        pacing,
        volume_count: None,
        world_building_depth: WorldDepth::Medium,
        magic_system: None,
        tech_level: None,
        genre_specific_elements: Vec::new(),
        words_per_chapter: target_words / u64::from(chapter_count),
        estimated_scenes: chapter_count * 2,
        complexity_score: 0.0,
    };

    adjust_for_genre(&mut strategy, &concept.genre);

    if matches!(
        structure_type,
        StructureType::MultiVolume | StructureType::Epic
    ) {
        strategy.volume_count = Some(volume_count_for(chapter_count));
    }

    strategy.complexity_score = complexity_score(&strategy, target_words);

    validate(&strategy)?;
    Ok(strategy)
}

fn structure_for(target_words: u64) -> StructureType {
    if target_words <= 10_000 {
        StructureType::ThreeAct
    } else if target_words <= 100_000 {
        StructureType::FiveAct
    } else if target_words <= 2_000_000 {
        StructureType::MultiVolume
    } else {
        StructureType::Epic
    }
}

/// Target-per-chapter bands by length class, then clamped per structure so
/// acts and volumes keep enough chapters to breathe.
fn chapter_count_for(target_words: u64, structure: StructureType) -> u32 {
    let base = if target_words <= 10_000 {
        (target_words / 2_000).clamp(2, 8)
    } else if target_words <= 100_000 {
        (target_words / 4_000).clamp(5, 30)
    } else if target_words <= 2_000_000 {
        (target_words / 6_000).clamp(20, 400)
    } else if target_words <= 5_000_000 {
        (target_words / 8_000).clamp(250, 800)
    } else {
        (target_words / 10_000).clamp(500, 1_200)
    } as u32;

    match structure {
        StructureType::ThreeAct if target_words <= 10_000 => base.clamp(3, 10),
        StructureType::ThreeAct => base.clamp(6, 15),
        StructureType::FiveAct => base.clamp(8, 40),
        StructureType::MultiVolume => base.clamp(20, 60),
        StructureType::Epic => base.max(30),
        StructureType::SingleLine => base,
    }
}

fn depth_for(target_words: u64) -> CharacterDepth {
    if target_words <= 10_000 {
        CharacterDepth::Basic
    } else if target_words <= 100_000 {
        CharacterDepth::Medium
    } else {
        CharacterDepth::Deep
    }
}

fn pacing_for(target_words: u64) -> Pacing {
    if target_words <= 10_000 {
        Pacing::Fast
    } else if target_words <= 100_000 {
        Pacing::Moderate
    } else if target_words <= 2_000_000 {
        Pacing::Slow
    } else {
        Pacing::Epic
    }
}

fn adjust_for_genre(strategy: &mut Strategy, genre: &str) {
    let genre_lower = genre.to_lowercase();
    if genre_lower.contains("fantasy") {
        strategy.magic_system = Some("detailed".to_string());
        strategy.world_building_depth = WorldDepth::High;
        strategy.genre_specific_elements.extend(
            ["magic", "otherworld", "peoples"].map(str::to_string),
        );
    } else if genre_lower.contains("sci-fi")
        || genre_lower.contains("science fiction")
        || genre_lower.contains("sf")
    {
        strategy.tech_level = Some("advanced".to_string());
        strategy.world_building_depth = WorldDepth::High;
        strategy
            .genre_specific_elements
            .extend(["technology", "future", "space"].map(str::to_string));
    } else if genre_lower.contains("mystery") || genre_lower.contains("thriller") {
        strategy.world_building_depth = WorldDepth::Medium;
        strategy
            .genre_specific_elements
            .extend(["deduction", "clues", "suspense"].map(str::to_string));
    } else if genre_lower.contains("realism") || genre_lower.contains("literary") {
        strategy.world_building_depth = WorldDepth::Low;
        strategy
            .genre_specific_elements
            .extend(["everyday life", "emotion", "society"].map(str::to_string));
    }
    if !strategy
        .genre_specific_elements
        .iter()
        .any(|e| e.eq_ignore_ascii_case(genre))
    {
        strategy.genre_specific_elements.push(genre.to_string());
    }
}

fn volume_count_for(chapter_count: u32) -> u32 {
    if chapter_count <= 15 {
        2
    } else if chapter_count <= 30 {
        3
    } else {
        4
    }
}

fn complexity_score(strategy: &Strategy, target_words: u64) -> f64 {
    let character_factor = match strategy.character_depth {
        CharacterDepth::Basic => 0.3,
        CharacterDepth::Medium => 0.6,
        CharacterDepth::Deep => 1.0,
    };
    let world_factor = match strategy.world_building_depth {
        WorldDepth::Low => 0.3,
        WorldDepth::Medium => 0.6,
        WorldDepth::High => 1.0,
    };
    let factors = [
        target_words as f64 / 100_000.0,
        f64::from(strategy.chapter_count) / 30.0,
        character_factor,
        world_factor,
    ];
    (factors.iter().sum::<f64>() / factors.len() as f64).min(1.0)
}

fn validate(strategy: &Strategy) -> Result<(), StrategyError> {
    if strategy.chapter_count == 0 {
        return Err(StrategyError::Invalid {
            reason: "chapter count must be positive",
        });
    }
    let needs_volumes = matches!(
        strategy.structure_type,
        StructureType::MultiVolume | StructureType::Epic
    );
    match strategy.volume_count {
        Some(v) if needs_volumes && v >= 2 => Ok(()),
        None if !needs_volumes => Ok(()),
        Some(_) if !needs_volumes => Err(StrategyError::Invalid {
            reason: "volume count set for a non-volume structure",
        }),
        _ => Err(StrategyError::Invalid {
            reason: "multi-volume structures need at least two volumes",
        }),
    }
}
