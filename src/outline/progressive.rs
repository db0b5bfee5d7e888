//! Just-in-time outline refinement.
//!
//! The initial call produces the world and a rough act-level structure;
//! chapter outlines are then refined one at a time, each conditioned on the
//! plot points still outstanding and on summaries of the chapters already
//! written. The rough outline is authoritative for chapter count: when the
//! model's `estimated_chapters` disagrees with the strategy, the model's
//! value wins and propagates.

use std::sync::Arc;

use serde::Deserialize;
use tracing::instrument;

use crate::concept::Concept;
use crate::gateway::{GenerateRequest, LlmGateway, LogMeta, TaskType};
use crate::strategy::Strategy;
use crate::utils::json::{is_effectively_empty, parse_llm_json};

use super::{
    act_number_for, narrative_purpose_for, ChapterOutline, OutlineError, RoughOutline,
    SceneOutline, WorldBuilding,
};

/// Mutable outline state for one progressive run.
#[derive(Clone, Debug)]
pub struct OutlineState {
    pub world_building: WorldBuilding,
    pub rough_outline: RoughOutline,
    /// Refined outlines, in chapter order.
    pub detailed_chapters: Vec<ChapterOutline>,
    /// Plot points already advanced by refined chapters, in first-use order.
    pub completed_plot_points: Vec<String>,
}

impl OutlineState {
    /// Total chapters this manuscript will have.
    #[must_use]
    pub fn planned_chapters(&self) -> u32 {
        self.rough_outline.estimated_chapters
    }

    /// Plot points not yet advanced, preserving rough-outline order.
    #[must_use]
    pub fn remaining_plot_points(&self) -> Vec<&str> {
        self.rough_outline
            .major_plot_points
            .iter()
            .filter(|p| !self.completed_plot_points.contains(*p))
            .map(String::as_str)
            .collect()
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RefinedChapter {
    title: String,
    summary: String,
    key_events: Vec<String>,
    scenes: Vec<RefinedScene>,
    plot_advancement: String,
    estimated_word_count: u64,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RefinedScene {
    name: String,
    description: String,
    characters: Vec<String>,
    location: String,
}

/// Builds the world, the rough outline, and per-chapter refinements.
pub struct ProgressiveOutlineGenerator {
    gateway: Arc<LlmGateway>,
    max_retries: u32,
}

impl ProgressiveOutlineGenerator {
    #[must_use]
    pub fn new(gateway: Arc<LlmGateway>) -> Self {
        Self {
            gateway,
            max_retries: 3,
        }
    }

    /// Generate the world and rough outline that anchor a manuscript.
    #[instrument(skip_all)]
    pub async fn generate_initial(
        &self,
        concept: &Concept,
        strategy: &Strategy,
        target_words: u64,
    ) -> Result<OutlineState, OutlineError> {
        let world_building = self.generate_world(concept).await?;
        let rough_outline = self
            .generate_rough(concept, strategy, target_words, &world_building)
            .await?;
        tracing::info!(
            estimated_chapters = rough_outline.estimated_chapters,
            plot_points = rough_outline.major_plot_points.len(),
            "initial outline ready"
        );
        Ok(OutlineState {
            world_building,
            rough_outline,
            detailed_chapters: Vec::new(),
            completed_plot_points: Vec::new(),
        })
    }

    async fn generate_world(&self, concept: &Concept) -> Result<WorldBuilding, OutlineError> {
        let prompt = world_prompt(concept);
        for attempt in 1..=self.max_retries {
            let request = GenerateRequest::new(prompt.clone(), TaskType::WorldBuilding)
                .with_cache(attempt == 1)
                .with_log(LogMeta::new("world_building", "world building"));
            let response = self.gateway.generate(request).await?;
            match parse_llm_json::<WorldBuilding>(&response, "world building") {
                Ok(world) if !world.setting.trim().is_empty() => return Ok(world),
                Ok(_) => tracing::warn!(attempt, "world building response missing setting"),
                Err(e) => tracing::warn!(attempt, error = %e, "world building unparsable"),
            }
        }
        Err(OutlineError::InvalidModelOutput {
            artifact: "world building",
            attempts: self.max_retries,
        })
    }

    async fn generate_rough(
        &self,
        concept: &Concept,
        strategy: &Strategy,
        target_words: u64,
        world: &WorldBuilding,
    ) -> Result<RoughOutline, OutlineError> {
        let prompt = rough_prompt(concept, strategy, target_words, world);
        for attempt in 1..=self.max_retries {
            let request = GenerateRequest::new(prompt.clone(), TaskType::OutlineGeneration)
                .with_cache(attempt == 1)
                .with_log(LogMeta::new("rough_outline", "rough outline"));
            let response = self.gateway.generate(request).await?;
            match parse_llm_json::<RoughOutline>(&response, "rough outline") {
                Ok(mut rough) if !rough.story_arc.trim().is_empty() => {
                    if rough.estimated_chapters == 0 {
                        rough.estimated_chapters = strategy.chapter_count;
                    }
                    return Ok(rough);
                }
                Ok(_) => tracing::warn!(attempt, "rough outline missing story arc"),
                Err(e) => tracing::warn!(attempt, error = %e, "rough outline unparsable"),
            }
        }
        Err(OutlineError::InvalidModelOutput {
            artifact: "rough outline",
            attempts: self.max_retries,
        })
    }

    /// Refine the outline for `chapter_number`, append it to the state, and
    /// record any plot advancement the model reports.
    #[instrument(skip(self, state, prior_summary), fields(chapter = chapter_number))]
    pub async fn refine_next_chapter(
        &self,
        state: &mut OutlineState,
        chapter_number: u32,
        prior_summary: Option<&str>,
    ) -> Result<ChapterOutline, OutlineError> {
        let planned = state.planned_chapters();
        if chapter_number == 0 || chapter_number > planned {
            return Err(OutlineError::ChapterOutOfRange {
                requested: chapter_number,
                planned,
            });
        }

        let prompt = refine_prompt(state, chapter_number, prior_summary);
        for attempt in 1..=self.max_retries {
            let request = GenerateRequest::new(prompt.clone(), TaskType::ChapterRefinement)
                .with_cache(attempt == 1)
                .with_log(LogMeta::new(
                    "chapter_refinement",
                    format!("chapter {chapter_number} outline"),
                ));
            let response = self.gateway.generate(request).await?;
            if is_effectively_empty(&response) {
                tracing::warn!(attempt, "empty chapter refinement response");
                continue;
            }
            match parse_llm_json::<RefinedChapter>(&response, "chapter refinement") {
                Ok(refined) => {
                    let outline = self.build_outline(state, chapter_number, refined);
                    state.detailed_chapters.push(outline.clone());
                    return Ok(outline);
                }
                Err(e) => tracing::warn!(attempt, error = %e, "chapter refinement unparsable"),
            }
        }
        Err(OutlineError::InvalidModelOutput {
            artifact: "chapter refinement",
            attempts: self.max_retries,
        })
    }

    fn build_outline(
        &self,
        state: &mut OutlineState,
        chapter_number: u32,
        refined: RefinedChapter,
    ) -> ChapterOutline {
        let planned = state.planned_chapters();
        let act_count = state.rough_outline.act_structure.len() as u32;

        if !refined.plot_advancement.trim().is_empty()
            && !state
                .completed_plot_points
                .contains(&refined.plot_advancement)
        {
            state
                .completed_plot_points
                .push(refined.plot_advancement.clone());
        }

        let title = if refined.title.trim().is_empty() {
            format!("Chapter {chapter_number}")
        } else {
            refined.title
        };
        let estimated_word_count = if refined.estimated_word_count == 0 {
            3_000
        } else {
            refined.estimated_word_count
        };

        ChapterOutline {
            number: chapter_number,
            title,
            summary: refined.summary,
            key_events: refined.key_events,
            estimated_word_count,
            scenes: refined
                .scenes
                .into_iter()
                .map(|s| SceneOutline {
                    name: s.name,
                    description: s.description,
                    characters: s.characters,
                    location: s.location,
                })
                .collect(),
            volume_number: None,
            act_number: (act_count > 0)
                .then(|| act_number_for(chapter_number, planned, act_count)),
            narrative_purpose: Some(narrative_purpose_for(chapter_number, planned).to_string()),
            is_final_chapter: chapter_number == planned,
        }
    }
}

/// The act a chapter falls into, by mapping its position onto the rough
/// outline's act structure.
#[must_use]
pub fn current_act(rough: &RoughOutline, chapter_number: u32) -> Option<&str> {
    if rough.act_structure.is_empty() || rough.estimated_chapters == 0 {
        return None;
    }
    let idx = act_number_for(
        chapter_number,
        rough.estimated_chapters,
        rough.act_structure.len() as u32,
    ) - 1;
    rough.act_structure.get(idx as usize).map(String::as_str)
}

/// The plot points a chapter should introduce, chosen by manuscript
/// position. Rough-outline order breaks ties.
#[must_use]
pub fn relevant_plot_points<'a>(state: &'a OutlineState, chapter_number: u32) -> Vec<&'a str> {
    let remaining = state.remaining_plot_points();
    if remaining.is_empty() {
        return Vec::new();
    }
    let total = state.planned_chapters().max(1);
    let progress = f64::from(chapter_number) / f64::from(total);
    if progress < 0.3 {
        remaining.iter().take(2).copied().collect()
    } else if progress < 0.7 {
        let mid_start = remaining.len() / 3;
        remaining.iter().skip(mid_start).take(2).copied().collect()
    } else {
        let tail_start = remaining.len().saturating_sub(2);
        remaining.iter().skip(tail_start).copied().collect()
    }
}

fn complexity_guidance(target_words: u64) -> &'static str {
    if target_words <= 10_000 {
        "Complexity: a single tight narrative line, focused on the main plot."
    } else if target_words <= 100_000 {
        "Complexity: moderate, with one or two subplots supporting the main line."
    } else if target_words <= 2_000_000 {
        "Complexity: multiple interwoven plot lines."
    } else {
        "Complexity: epic, with layered story lines and deep world structure."
    }
}

fn world_prompt(concept: &Concept) -> String {
    format!(
        r#"Create a detailed world for the following novel concept.

Concept:
- Theme: {theme}
- Genre: {genre}
- World type: {world_type}
- Tone: {tone}
- Main conflict: {conflict}

Return a JSON object:
{{
    "setting": "core description of the world",
    "time_period": "era or time frame",
    "locations": ["location 1", "location 2", "location 3"],
    "social_structure": "how society is organized",
    "technology_level": "state of technology",
    "magic_system": "magic system, if the genre calls for one",
    "cultural_elements": ["cultural element 1", "cultural element 2"],
    "rules_and_laws": ["world rule 1", "world rule 2"]
}}

The world must be internally consistent and able to carry the whole story."#,
        theme = concept.theme,
        genre = concept.genre,
        world_type = concept.world_type,
        tone = concept.tone,
        conflict = concept.main_conflict,
    )
}

fn rough_prompt(
    concept: &Concept,
    strategy: &Strategy,
    target_words: u64,
    world: &WorldBuilding,
) -> String {
    format!(
        r#"Using the established world, create the rough overall outline for the novel.

World:
- Setting: {setting}
- Time period: {time_period}
- Locations: {locations}
- Social structure: {social}

Novel:
- Theme: {theme}
- Genre: {genre}
- Main conflict: {conflict}
- Target length: {target_words} words
- Structure: {structure:?} with {chapters} chapters planned

{complexity}

Return a JSON object:
{{
    "story_arc": "the overall arc of the story",
    "main_themes": ["theme 1", "theme 2"],
    "act_structure": ["Act I: ...", "Act II: ...", "Act III: ..."],
    "major_plot_points": ["plot point 1", "plot point 2", "plot point 3"],
    "character_roles": {{
        "protagonist": "who they are in one line",
        "antagonist": "who they are in one line"
    }},
    "estimated_chapters": {chapters}
}}

Only the frame is needed here, not chapter detail."#,
        setting = world.setting,
        time_period = world.time_period,
        locations = world.locations.join(", "),
        social = world.social_structure,
        theme = concept.theme,
        genre = concept.genre,
        conflict = concept.main_conflict,
        structure = strategy.structure_type,
        chapters = strategy.chapter_count,
        complexity = complexity_guidance(target_words),
    )
}

fn refine_prompt(state: &OutlineState, chapter_number: u32, prior_summary: Option<&str>) -> String {
    let act = current_act(&state.rough_outline, chapter_number).unwrap_or("unknown act");
    let plot_points = relevant_plot_points(state, chapter_number).join(", ");
    let completed = state.completed_plot_points.join(", ");
    let prior = prior_summary
        .filter(|s| !s.is_empty())
        .map(|s| format!("\nSummaries of completed chapters: {s}"))
        .unwrap_or_default();

    format!(
        r#"Using the established world and overall outline, plan chapter {chapter_number} in detail.

World:
- Setting: {setting}
- Locations: {locations}
- Social structure: {social}

Overall outline:
- Story arc: {arc}
- Current act: {act} (of {act_count})
- Plot points to introduce: {plot_points}

Progress:
- Chapter {chapter_number} of {total}
- Plot points already covered: {completed}{prior}

Return a JSON object:
{{
    "title": "chapter title",
    "summary": "chapter summary",
    "key_events": ["key event 1", "key event 2"],
    "scenes": [
        {{
            "name": "scene name",
            "description": "what happens",
            "location": "where it happens",
            "characters": ["who is present"]
        }}
    ],
    "plot_advancement": "which plot point this chapter advances",
    "estimated_word_count": 3000
}}

Keep the chapter consistent with the story arc and advance the listed plot points."#,
        setting = state.world_building.setting,
        locations = state.world_building.locations.join(", "),
        social = state.world_building.social_structure,
        arc = state.rough_outline.story_arc,
        act_count = state.rough_outline.act_structure.len(),
        total = state.planned_chapters(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_points(points: &[&str], chapters: u32) -> OutlineState {
        OutlineState {
            world_building: WorldBuilding::default(),
            rough_outline: RoughOutline {
                story_arc: "rise and fall".to_string(),
                act_structure: vec![
                    "Act I: setup".to_string(),
                    "Act II: struggle".to_string(),
                    "Act III: payoff".to_string(),
                ],
                major_plot_points: points.iter().map(|s| s.to_string()).collect(),
                estimated_chapters: chapters,
                ..RoughOutline::default()
            },
            detailed_chapters: Vec::new(),
            completed_plot_points: Vec::new(),
        }
    }

    #[test]
    fn early_chapters_take_the_first_plot_points() {
        let state = state_with_points(&["a", "b", "c", "d", "e", "f"], 10);
        assert_eq!(relevant_plot_points(&state, 1), vec!["a", "b"]);
    }

    #[test]
    fn middle_chapters_take_the_middle() {
        let state = state_with_points(&["a", "b", "c", "d", "e", "f"], 10);
        assert_eq!(relevant_plot_points(&state, 5), vec!["c", "d"]);
    }

    #[test]
    fn late_chapters_take_the_tail() {
        let state = state_with_points(&["a", "b", "c", "d", "e", "f"], 10);
        assert_eq!(relevant_plot_points(&state, 9), vec!["e", "f"]);
    }

    #[test]
    fn completed_points_are_excluded_in_order() {
        let mut state = state_with_points(&["a", "b", "c", "d"], 10);
        state.completed_plot_points.push("a".to_string());
        state.completed_plot_points.push("c".to_string());
        assert_eq!(state.remaining_plot_points(), vec!["b", "d"]);
        assert_eq!(relevant_plot_points(&state, 1), vec!["b", "d"]);
    }

    #[test]
    fn act_lookup_follows_position() {
        let state = state_with_points(&[], 9);
        assert_eq!(
            current_act(&state.rough_outline, 1),
            Some("Act I: setup")
        );
        assert_eq!(
            current_act(&state.rough_outline, 5),
            Some("Act II: struggle")
        );
        assert_eq!(
            current_act(&state.rough_outline, 9),
            Some("Act III: payoff")
        );
    }
}
