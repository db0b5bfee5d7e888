//! The evolving narrative state of a manuscript.
//!
//! One [`NarrativeState`] exists per run, owned by the coherence manager
//! (the single writer) and mutated only between chapters. Readers get a
//! truncated [`NarrativeSnapshot`] prepared before each chapter, so prompt
//! budgets stay bounded no matter how long the manuscript runs.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Per-character running state.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CharacterState {
    /// Most recent development the extraction pass attributed to them.
    pub last_development: Option<String>,
    /// Where they last appeared, chapter title or location.
    pub last_appearance: Option<String>,
}

/// Running model of the story so far.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NarrativeState {
    pub current_time: String,
    pub current_location: String,
    /// Append-only record of time movement.
    pub time_progression: Vec<String>,

    /// Character name → running state. Insertion order is preserved via
    /// the companion vec so truncation keeps the most recent names.
    pub character_states: FxHashMap<String, CharacterState>,
    character_order: Vec<String>,
    pub character_relationships: FxHashMap<String, FxHashMap<String, String>>,

    /// Append-only until resolved.
    pub active_plot_threads: Vec<String>,
    pub resolved_conflicts: Vec<String>,
    pub pending_revelations: Vec<String>,

    pub world_changes: Vec<String>,
    pub established_facts: Vec<String>,
    pub secrets_revealed: Vec<String>,

    pub current_mood: String,
    /// Dramatic tension in `[0, 1]`. Moves only when a mood shift
    /// classifies as escalation or release.
    pub tension_level: f64,

    pub foreshadowing_elements: Vec<String>,
    pub callback_opportunities: Vec<String>,
}

impl Default for NarrativeState {
    fn default() -> Self {
        Self {
            current_time: "story opening".to_string(),
            current_location: "unspecified".to_string(),
            time_progression: Vec::new(),
            character_states: FxHashMap::default(),
            character_order: Vec::new(),
            character_relationships: FxHashMap::default(),
            active_plot_threads: Vec::new(),
            resolved_conflicts: Vec::new(),
            pending_revelations: Vec::new(),
            world_changes: Vec::new(),
            established_facts: Vec::new(),
            secrets_revealed: Vec::new(),
            current_mood: "neutral".to_string(),
            tension_level: 0.5,
            foreshadowing_elements: Vec::new(),
            callback_opportunities: Vec::new(),
        }
    }
}

impl NarrativeState {
    /// Record a development for a character, creating their state entry on
    /// first mention.
    pub fn note_character_development(&mut self, name: &str, development: impl Into<String>) {
        if !self.character_states.contains_key(name) {
            self.character_order.push(name.to_string());
        }
        self.character_states
            .entry(name.to_string())
            .or_default()
            .last_development = Some(development.into());
    }

    /// Character names in first-mention order.
    #[must_use]
    pub fn character_names(&self) -> &[String] {
        &self.character_order
    }

    /// Apply a mood shift: the mood text overwrites `current_mood`, and
    /// tension moves ±0.1 only when the shift classifies as escalation or
    /// release.
    pub fn apply_mood_shift(&mut self, shift: &str) {
        let shift = shift.trim();
        if shift.is_empty() {
            return;
        }
        match classify_mood_shift(shift) {
            MoodShiftKind::Escalation => {
                self.tension_level = (self.tension_level + 0.1).min(1.0);
            }
            MoodShiftKind::Release => {
                self.tension_level = (self.tension_level - 0.1).max(0.0);
            }
            MoodShiftKind::Neutral => {}
        }
        self.current_mood = shift.to_string();
    }

    /// Bounded view of the state for prompt assembly: the last 5 character
    /// states, 5 plot threads, 3 world changes, and 5 facts.
    #[must_use]
    pub fn snapshot(&self) -> NarrativeSnapshot {
        let recent_characters: Vec<(String, CharacterState)> = self
            .character_order
            .iter()
            .rev()
            .take(5)
            .rev()
            .filter_map(|name| {
                self.character_states
                    .get(name)
                    .map(|s| (name.clone(), s.clone()))
            })
            .collect();
        NarrativeSnapshot {
            current_time: self.current_time.clone(),
            current_location: self.current_location.clone(),
            recent_character_states: recent_characters,
            active_plot_threads: tail(&self.active_plot_threads, 5),
            current_mood: self.current_mood.clone(),
            tension_level: self.tension_level,
            recent_world_changes: tail(&self.world_changes, 3),
            recent_established_facts: tail(&self.established_facts, 5),
        }
    }

    /// Plot threads not yet listed as resolved.
    #[must_use]
    pub fn unresolved_conflicts(&self) -> Vec<&str> {
        self.active_plot_threads
            .iter()
            .filter(|t| !self.resolved_conflicts.contains(*t))
            .map(String::as_str)
            .collect()
    }
}

fn tail(items: &[String], n: usize) -> Vec<String> {
    items.iter().rev().take(n).rev().cloned().collect()
}

/// Truncated, read-only view handed to prompt builders.
#[derive(Clone, Debug, Serialize)]
pub struct NarrativeSnapshot {
    pub current_time: String,
    pub current_location: String,
    pub recent_character_states: Vec<(String, CharacterState)>,
    pub active_plot_threads: Vec<String>,
    pub current_mood: String,
    pub tension_level: f64,
    pub recent_world_changes: Vec<String>,
    pub recent_established_facts: Vec<String>,
}

/// Direction a mood shift moves dramatic tension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MoodShiftKind {
    Escalation,
    Release,
    Neutral,
}

const ESCALATION_MARKERS: &[&str] = &[
    "escalat", "rising", "tension", "threat", "danger", "darker", "dread", "urgent", "storm",
];
const RELEASE_MARKERS: &[&str] = &[
    "relief", "calm", "resolved", "settle", "lighter", "peace", "respite", "soften",
];

/// Classify a mood-shift description from the extraction pass.
#[must_use]
pub fn classify_mood_shift(shift: &str) -> MoodShiftKind {
    let lower = shift.to_lowercase();
    if ESCALATION_MARKERS.iter().any(|m| lower.contains(m)) {
        MoodShiftKind::Escalation
    } else if RELEASE_MARKERS.iter().any(|m| lower.contains(m)) {
        MoodShiftKind::Release
    } else {
        MoodShiftKind::Neutral
    }
}

/// Transition profile between two adjacent chapters.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitionInfo {
    pub time_gap: String,
    pub location_change: bool,
    pub mood_shift: String,
    pub key_connections: Vec<String>,
    pub suggested_opening: String,
}

/// Post-hoc coherence scores for one chapter, each in `[0, 1]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CoherenceAnalysis {
    pub overall_score: f64,
    pub character_consistency: f64,
    pub plot_consistency: f64,
    pub timeline_consistency: f64,
    pub world_consistency: f64,
    pub issues: Vec<String>,
    pub suggestions: Vec<String>,
}

impl Default for CoherenceAnalysis {
    /// Neutral result used when analysis output is unusable.
    fn default() -> Self {
        Self {
            overall_score: 0.5,
            character_consistency: 0.5,
            plot_consistency: 0.5,
            timeline_consistency: 0.5,
            world_consistency: 0.5,
            issues: Vec::new(),
            suggestions: Vec::new(),
        }
    }
}
