//! Legacy full-outline path: every chapter outline from one model call.
//!
//! Semantically equivalent to the progressive path except that all chapter
//! detail is produced up front. The same invariants hold: contiguous
//! numbering, a single final chapter, and word estimates that sum to the
//! target under the structure's distribution shape.

use std::sync::Arc;

use serde::Deserialize;
use tracing::instrument;

use crate::concept::Concept;
use crate::gateway::{GenerateRequest, LlmGateway, LogMeta, TaskType};
use crate::strategy::{Strategy, StructureType};

use super::{
    act_number_for, distribute_words, narrative_purpose_for, ChapterOutline, Distribution,
    OutlineError, SceneOutline,
};

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawFullOutline {
    chapters: Vec<RawChapter>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawChapter {
    title: String,
    summary: String,
    key_events: Vec<String>,
    scenes: Vec<RawScene>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawScene {
    name: String,
    description: String,
    characters: Vec<String>,
    location: String,
}

/// Word-budget shape matched to the dramatic structure.
#[must_use]
pub fn distribution_for(structure: StructureType) -> Distribution {
    match structure {
        StructureType::SingleLine | StructureType::ThreeAct => Distribution::Balanced,
        StructureType::FiveAct => Distribution::Pyramid,
        StructureType::MultiVolume => Distribution::Crescendo,
        StructureType::Epic => Distribution::EpicEnds,
    }
}

/// Produces the complete chapter outline list in one call.
pub struct FullOutlineGenerator {
    gateway: Arc<LlmGateway>,
    max_retries: u32,
}

impl FullOutlineGenerator {
    #[must_use]
    pub fn new(gateway: Arc<LlmGateway>) -> Self {
        Self {
            gateway,
            max_retries: 3,
        }
    }

    /// Generate all chapter outlines up front.
    #[instrument(skip_all, fields(chapters = strategy.chapter_count))]
    pub async fn generate(
        &self,
        concept: &Concept,
        strategy: &Strategy,
        target_words: u64,
    ) -> Result<Vec<ChapterOutline>, OutlineError> {
        let prompt = full_prompt(concept, strategy, target_words);
        for attempt in 1..=self.max_retries {
            let request = GenerateRequest::new(prompt.clone(), TaskType::OutlineGeneration)
                .with_cache(attempt == 1)
                .with_log(LogMeta::new("outline_generation", "full outline"));
            let response = self.gateway.generate(request).await?;
            match crate::utils::json::parse_llm_json::<RawFullOutline>(&response, "full outline") {
                Ok(raw) if !raw.chapters.is_empty() => {
                    return Ok(assemble(raw.chapters, strategy, target_words));
                }
                Ok(_) => tracing::warn!(attempt, "full outline contained no chapters"),
                Err(e) => tracing::warn!(attempt, error = %e, "full outline unparsable"),
            }
        }
        Err(OutlineError::InvalidModelOutput {
            artifact: "full outline",
            attempts: self.max_retries,
        })
    }
}

fn assemble(
    raw_chapters: Vec<RawChapter>,
    strategy: &Strategy,
    target_words: u64,
) -> Vec<ChapterOutline> {
    let total = raw_chapters.len() as u32;
    let words = distribute_words(target_words, total, distribution_for(strategy.structure_type));
    let act_count = match strategy.structure_type {
        StructureType::ThreeAct => 3,
        StructureType::FiveAct => 5,
        _ => strategy.volume_count.unwrap_or(1),
    };

    raw_chapters
        .into_iter()
        .enumerate()
        .map(|(idx, raw)| {
            let number = idx as u32 + 1;
            let title = if raw.title.trim().is_empty() {
                format!("Chapter {number}")
            } else {
                raw.title
            };
            ChapterOutline {
                number,
                title,
                summary: raw.summary,
                key_events: raw.key_events,
                estimated_word_count: words[idx],
                scenes: raw
                    .scenes
                    .into_iter()
                    .map(|s| SceneOutline {
                        name: s.name,
                        description: s.description,
                        characters: s.characters,
                        location: s.location,
                    })
                    .collect(),
                volume_number: strategy
                    .volume_count
                    .map(|volumes| volume_for(number, total, volumes)),
                act_number: Some(act_number_for(number, total, act_count)),
                narrative_purpose: Some(narrative_purpose_for(number, total).to_string()),
                is_final_chapter: number == total,
            }
        })
        .collect()
}

/// Even split of chapters across volumes; earlier volumes absorb the
/// remainder.
fn volume_for(chapter: u32, total_chapters: u32, volumes: u32) -> u32 {
    if volumes == 0 || total_chapters == 0 {
        return 1;
    }
    let base = total_chapters / volumes;
    let remainder = total_chapters % volumes;
    let mut boundary = 0;
    for volume in 1..=volumes {
        boundary += base + u32::from(volume <= remainder);
        if chapter <= boundary {
            return volume;
        }
    }
    volumes
}

fn full_prompt(concept: &Concept, strategy: &Strategy, target_words: u64) -> String {
    format!(
        r#"Create a complete chapter-by-chapter outline for the novel below.

Concept:
- Theme: {theme}
- Genre: {genre}
- Main conflict: {conflict}
- Tone: {tone}

Plan:
- Structure: {structure:?}
- Chapters: exactly {chapters}
- Target length: {target_words} words

Return a JSON object:
{{
    "chapters": [
        {{
            "title": "chapter title",
            "summary": "what the chapter covers",
            "key_events": ["event 1", "event 2"],
            "scenes": [
                {{
                    "name": "scene name",
                    "description": "what happens",
                    "location": "where",
                    "characters": ["who is present"]
                }}
            ]
        }}
    ]
}}

Provide exactly {chapters} chapter entries, in story order."#,
        theme = concept.theme,
        genre = concept.genre,
        conflict = concept.main_conflict,
        tone = concept.tone,
        structure = strategy.structure_type,
        chapters = strategy.chapter_count,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{CharacterDepth, Pacing, WorldDepth};

    fn strategy(structure: StructureType, chapters: u32, volumes: Option<u32>) -> Strategy {
        Strategy {
            structure_type: structure,
            chapter_count: chapters,
            character_depth: CharacterDepth::Medium,
            pacing: Pacing::Moderate,
            volume_count: volumes,
            world_building_depth: WorldDepth::Medium,
            magic_system: None,
            tech_level: None,
            genre_specific_elements: vec![],
            words_per_chapter: 3_000,
            estimated_scenes: chapters * 2,
            complexity_score: 0.5,
        }
    }

    fn raw(n: usize) -> Vec<RawChapter> {
        (0..n)
            .map(|i| RawChapter {
                title: format!("Chapter title {}", i + 1),
                summary: "things happen".to_string(),
                key_events: vec!["an event".to_string()],
                scenes: vec![],
            })
            .collect()
    }

    #[test]
    fn assembled_outline_upholds_numbering_and_finality() {
        let outlines = assemble(raw(8), &strategy(StructureType::FiveAct, 8, None), 32_000);
        assert_eq!(outlines.len(), 8);
        for (i, o) in outlines.iter().enumerate() {
            assert_eq!(o.number, i as u32 + 1);
        }
        let finals: Vec<_> = outlines.iter().filter(|o| o.is_final_chapter).collect();
        assert_eq!(finals.len(), 1);
        assert_eq!(finals[0].number, 8);
    }

    #[test]
    fn word_estimates_sum_to_target() {
        let outlines = assemble(raw(7), &strategy(StructureType::FiveAct, 7, None), 31_337);
        let sum: u64 = outlines.iter().map(|o| o.estimated_word_count).sum();
        assert_eq!(sum, 31_337);
    }

    #[test]
    fn volumes_partition_the_chapters() {
        let outlines = assemble(
            raw(25),
            &strategy(StructureType::MultiVolume, 25, Some(3)),
            150_000,
        );
        let vols: Vec<u32> = outlines.iter().filter_map(|o| o.volume_number).collect();
        assert_eq!(vols.len(), 25);
        assert_eq!(vols.first(), Some(&1));
        assert_eq!(vols.last(), Some(&3));
        assert!(vols.windows(2).all(|w| w[0] <= w[1]));
        // 25 chapters over 3 volumes: 9 + 8 + 8.
        assert_eq!(vols.iter().filter(|&&v| v == 1).count(), 9);
    }

    #[test]
    fn distribution_shape_follows_structure() {
        assert_eq!(
            distribution_for(StructureType::ThreeAct),
            Distribution::Balanced
        );
        assert_eq!(
            distribution_for(StructureType::FiveAct),
            Distribution::Pyramid
        );
        assert_eq!(
            distribution_for(StructureType::MultiVolume),
            Distribution::Crescendo
        );
        assert_eq!(distribution_for(StructureType::Epic), Distribution::EpicEnds);
    }
}
