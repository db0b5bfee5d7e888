//! Narrative coherence management.
//!
//! The manager owns the [`NarrativeState`] for one manuscript and is its
//! single writer. Before each chapter it assembles a [`ChapterContext`]
//! from the state snapshot, the cast, and the previous chapter; after each
//! chapter it analyzes coherence and folds the extraction pass's findings
//! back into the state. Every model exchange on these paths degrades
//! gracefully: unparsable analysis defaults to neutral scores and an
//! unparsable extraction is a no-op, never an abort.

pub mod state;

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::Deserialize;
use tracing::instrument;

use crate::chapter::ChapterContent;
use crate::characters::CharacterDatabase;
use crate::concept::Concept;
use crate::gateway::{GenerateRequest, LlmGateway, LogMeta, TaskType};
use crate::outline::ChapterOutline;
use crate::utils::json::{is_effectively_empty, parse_llm_json};
use crate::utils::text::{glyph_prefix, glyph_suffix};

pub use state::{
    classify_mood_shift, CharacterState, CoherenceAnalysis, MoodShiftKind, NarrativeSnapshot,
    NarrativeState, TransitionInfo,
};

/// Continuity card for one active character.
#[derive(Clone, Debug)]
pub struct CharacterContinuity {
    pub name: String,
    pub role: String,
    pub motivation: String,
    pub personality: Vec<String>,
    pub last_development: Option<String>,
}

/// Open plot material the chapter should honor.
#[derive(Clone, Debug, Default)]
pub struct PlotContinuity {
    pub active_threads: Vec<String>,
    pub chapter_events: Vec<String>,
    pub unresolved_conflicts: Vec<String>,
    pub pending_revelations: Vec<String>,
}

/// Where the world stands entering the chapter.
#[derive(Clone, Debug, Default)]
pub struct WorldContinuity {
    pub current_location: String,
    pub established_facts: Vec<String>,
    pub recent_changes: Vec<String>,
}

/// Mood hand-off into the chapter.
#[derive(Clone, Debug, Default)]
pub struct MoodContinuity {
    pub current_mood: String,
    pub tension_level: f64,
    pub chapter_purpose: Option<String>,
}

/// Everything the chapter prompt builder needs to keep chapter `i`
/// consistent with chapters `1..i-1`.
#[derive(Clone, Debug)]
pub struct ChapterContext {
    pub narrative: NarrativeSnapshot,
    pub transition: Option<TransitionInfo>,
    pub characters: Vec<CharacterContinuity>,
    pub plot: PlotContinuity,
    pub world: WorldContinuity,
    pub mood: MoodContinuity,
    pub previous_chapter_summary: Option<String>,
    pub guidelines: Vec<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct StateExtraction {
    time_changes: Vec<String>,
    location_changes: Vec<String>,
    character_developments: FxHashMap<String, String>,
    plot_developments: Vec<String>,
    world_changes: Vec<String>,
    mood_shift: String,
    revealed_secrets: Vec<String>,
    new_conflicts: Vec<String>,
    resolved_issues: Vec<String>,
    established_facts: Vec<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawCoherence {
    character_consistency: Option<f64>,
    plot_consistency: Option<f64>,
    timeline_consistency: Option<f64>,
    world_consistency: Option<f64>,
    overall_score: Option<f64>,
    issues: Vec<String>,
    suggestions: Vec<String>,
}

/// Owns and evolves the narrative state across a manuscript run.
pub struct CoherenceManager {
    gateway: Arc<LlmGateway>,
    state: NarrativeState,
}

impl CoherenceManager {
    #[must_use]
    pub fn new(gateway: Arc<LlmGateway>) -> Self {
        Self {
            gateway,
            state: NarrativeState::default(),
        }
    }

    /// Read-only view of the current narrative state.
    #[must_use]
    pub fn state(&self) -> &NarrativeState {
        &self.state
    }

    /// Discard all accumulated state, e.g. between manuscripts.
    pub fn reset(&mut self) {
        self.state = NarrativeState::default();
    }

    /// Assemble the context for the next chapter from the state snapshot
    /// and the chapters written so far. Reads only; the state is not
    /// mutated here.
    #[instrument(skip_all, fields(chapter = outline.number))]
    pub async fn prepare_chapter_context(
        &self,
        outline: &ChapterOutline,
        character_db: &CharacterDatabase,
        _concept: &Concept,
        previous_chapters: &[ChapterContent],
    ) -> ChapterContext {
        let transition = match previous_chapters.last() {
            Some(previous) => self.analyze_transition(previous, outline).await,
            None => None,
        };

        let snapshot = self.state.snapshot();
        ChapterContext {
            characters: self.character_continuity(outline, character_db),
            plot: PlotContinuity {
                active_threads: snapshot.active_plot_threads.clone(),
                chapter_events: outline.key_events.clone(),
                unresolved_conflicts: self
                    .state
                    .unresolved_conflicts()
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
                pending_revelations: self.state.pending_revelations.clone(),
            },
            world: WorldContinuity {
                current_location: self.state.current_location.clone(),
                established_facts: snapshot.recent_established_facts.clone(),
                recent_changes: snapshot.recent_world_changes.clone(),
            },
            mood: MoodContinuity {
                current_mood: self.state.current_mood.clone(),
                tension_level: self.state.tension_level,
                chapter_purpose: outline.narrative_purpose.clone(),
            },
            previous_chapter_summary: previous_chapters.last().map(|c| c.summary.clone()),
            guidelines: coherence_guidelines(outline),
            transition,
            narrative: snapshot,
        }
    }

    fn character_continuity(
        &self,
        outline: &ChapterOutline,
        character_db: &CharacterDatabase,
    ) -> Vec<CharacterContinuity> {
        let mut names: Vec<String> = outline
            .scenes
            .iter()
            .flat_map(|s| s.characters.iter().cloned())
            .collect();
        names.dedup();
        if names.is_empty() {
            if let Some(protagonist) = character_db.get_by_role("protagonist") {
                names.push(protagonist.name.clone());
            }
        }

        let mut seen = Vec::new();
        let mut cards = Vec::new();
        for name in names {
            if seen.contains(&name) {
                continue;
            }
            seen.push(name.clone());
            let Some(character) = character_db.get_by_name(&name) else {
                continue;
            };
            let last_development = self
                .state
                .character_states
                .get(&name)
                .and_then(|s| s.last_development.clone());
            cards.push(CharacterContinuity {
                name: character.name.clone(),
                role: character.role.clone(),
                motivation: character.motivation.clone(),
                personality: character.personality.clone(),
                last_development,
            });
        }
        cards
    }

    async fn analyze_transition(
        &self,
        previous: &ChapterContent,
        next: &ChapterOutline,
    ) -> Option<TransitionInfo> {
        let prompt = format!(
            r#"Analyze the hand-off from one chapter to the next.

Previous chapter: {prev_title}
Previous chapter ending: {tail}

Next chapter: {next_title}
Next chapter summary: {next_summary}

Return a JSON object:
{{
    "time_gap": "how much story time passes between the chapters",
    "location_change": true,
    "mood_shift": "how the mood moves",
    "key_connections": ["thread that must carry across"],
    "suggested_opening": "one line on how the next chapter should open"
}}"#,
            prev_title = previous.title,
            tail = glyph_suffix(&previous.content, 300),
            next_title = next.title,
            next_summary = next.summary,
        );

        let request = GenerateRequest::new(prompt, TaskType::ConsistencyCheck).with_log(
            LogMeta::new("transition_analysis", format!("transition into chapter {}", next.number)),
        );
        match self.gateway.generate(request).await {
            Ok(response) if !is_effectively_empty(&response) => {
                match parse_llm_json::<TransitionInfo>(&response, "transition analysis") {
                    Ok(info) => Some(info),
                    Err(e) => {
                        tracing::warn!(error = %e, "transition analysis unparsable, using default");
                        Some(TransitionInfo::default())
                    }
                }
            }
            Ok(_) => Some(TransitionInfo::default()),
            Err(e) => {
                tracing::warn!(error = %e, "transition analysis call failed, using default");
                Some(TransitionInfo::default())
            }
        }
    }

    /// Score a finished chapter for consistency with everything before it.
    /// Never fails: unusable output yields the neutral default analysis.
    #[instrument(skip_all, fields(chapter = %chapter.title))]
    pub async fn analyze_coherence(
        &self,
        chapter: &ChapterContent,
        previous_chapters: &[ChapterContent],
        _character_db: &CharacterDatabase,
    ) -> CoherenceAnalysis {
        let previous_summary = previous_chapters
            .last()
            .map_or("none", |c| c.summary.as_str());
        let prompt = format!(
            r#"Rate the consistency of this chapter against the story so far.

Chapter: {title}
Opening excerpt: {excerpt}

Previous chapter summary: {previous_summary}

Score each dimension from 0 to 1 and list concrete problems:
{{
    "character_consistency": 0.85,
    "plot_consistency": 0.9,
    "timeline_consistency": 0.88,
    "world_consistency": 0.92,
    "overall_score": 0.89,
    "issues": ["problem found"],
    "suggestions": ["improvement"]
}}"#,
            title = chapter.title,
            excerpt = glyph_prefix(&chapter.content, 800),
        );

        let request = GenerateRequest::new(prompt, TaskType::ConsistencyCheck)
            .with_log(LogMeta::new("coherence_analysis", format!("coherence of {}", chapter.title)));
        let response = match self.gateway.generate(request).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "coherence analysis call failed, using default");
                return CoherenceAnalysis::default();
            }
        };
        if is_effectively_empty(&response) {
            return CoherenceAnalysis::default();
        }
        match parse_llm_json::<RawCoherence>(&response, "coherence analysis") {
            Ok(raw) => CoherenceAnalysis {
                overall_score: clamp01(raw.overall_score),
                character_consistency: clamp01(raw.character_consistency),
                plot_consistency: clamp01(raw.plot_consistency),
                timeline_consistency: clamp01(raw.timeline_consistency),
                world_consistency: clamp01(raw.world_consistency),
                issues: raw.issues,
                suggestions: raw.suggestions,
            },
            Err(e) => {
                tracing::warn!(error = %e, "coherence analysis unparsable, using default");
                CoherenceAnalysis::default()
            }
        }
    }

    /// Extract state changes from a completed chapter and fold them into
    /// the narrative state. Append-only except location and mood, which
    /// overwrite. Unusable output is a no-op.
    #[instrument(skip_all, fields(chapter = %chapter.title))]
    pub async fn update_narrative_state(&mut self, chapter: &ChapterContent) {
        let prompt = format!(
            r#"Extract the narrative state changes from this chapter.

Chapter: {title}
Content excerpt: {excerpt}

Return a JSON object:
{{
    "time_changes": ["time movement"],
    "location_changes": ["new location"],
    "character_developments": {{"character name": "what changed for them"}},
    "plot_developments": ["plot thread advanced or opened"],
    "world_changes": ["change to the world"],
    "mood_shift": "how the mood moved",
    "revealed_secrets": ["secret now in the open"],
    "new_conflicts": ["conflict introduced"],
    "resolved_issues": ["conflict settled"],
    "established_facts": ["fact the story has now fixed"]
}}"#,
            title = chapter.title,
            excerpt = glyph_prefix(&chapter.content, 1_000),
        );

        let request = GenerateRequest::new(prompt, TaskType::ConsistencyCheck)
            .with_log(LogMeta::new("state_extraction", format!("state after {}", chapter.title)));
        let response = match self.gateway.generate(request).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "state extraction call failed, keeping state");
                return;
            }
        };
        if is_effectively_empty(&response) {
            tracing::debug!("empty state extraction, keeping state");
            return;
        }
        let extraction = match parse_llm_json::<StateExtraction>(&response, "state extraction") {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "state extraction unparsable, keeping state");
                return;
            }
        };
        self.apply_extraction(extraction);
        tracing::info!(
            threads = self.state.active_plot_threads.len(),
            facts = self.state.established_facts.len(),
            "narrative state updated"
        );
    }

    fn apply_extraction(&mut self, extraction: StateExtraction) {
        self.state
            .time_progression
            .extend(extraction.time_changes.iter().cloned());
        if let Some(last_time) = extraction.time_changes.last() {
            self.state.current_time = last_time.clone();
        }
        if let Some(location) = extraction.location_changes.last() {
            self.state.current_location = location.clone();
        }
        for (name, development) in extraction.character_developments {
            self.state.note_character_development(&name, development);
        }
        self.state
            .active_plot_threads
            .extend(extraction.plot_developments);
        self.state
            .active_plot_threads
            .extend(extraction.new_conflicts);
        self.state.world_changes.extend(extraction.world_changes);
        self.state
            .secrets_revealed
            .extend(extraction.revealed_secrets);
        self.state
            .resolved_conflicts
            .extend(extraction.resolved_issues);
        self.state
            .established_facts
            .extend(extraction.established_facts);
        self.state.apply_mood_shift(&extraction.mood_shift);
    }
}

fn clamp01(value: Option<f64>) -> f64 {
    value.map_or(0.5, |v| v.clamp(0.0, 1.0))
}

/// Fixed guidance list, augmented by the chapter's narrative purpose.
#[must_use]
pub fn coherence_guidelines(outline: &ChapterOutline) -> Vec<String> {
    let mut guidelines: Vec<String> = [
        "Keep character behavior consistent with their established personalities.",
        "Maintain a logical, continuous timeline.",
        "Carry forward plot threads the previous chapter left open.",
        "Stay consistent with established world facts and rules.",
        "Pick up the previous chapter's emotional register before shifting it.",
        "Pay off earlier foreshadowing where the moment fits.",
        "Avoid abrupt, unexplained changes in character temperament.",
        "Match dialogue style to each character's voice and station.",
    ]
    .map(str::to_string)
    .to_vec();

    match outline.narrative_purpose.as_deref() {
        Some("conflict escalation") => {
            guidelines.push("Build tension gradually rather than erupting all at once.".to_string());
        }
        Some("climax") => {
            guidelines
                .push("Spend the tension the earlier chapters have been accumulating.".to_string());
        }
        Some("resolution") => {
            guidelines.push("Answer and resolve the main plot threads.".to_string());
        }
        _ => {}
    }
    guidelines
}
