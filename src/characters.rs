//! Cast synthesis and lookup.
//!
//! One model call produces the full cast plus their relationships. After
//! parsing, structural requirements are enforced: a protagonist always, an
//! antagonist for conflict-bearing structures, a mentor once character
//! depth reaches medium. A single stricter retry covers a cast that comes
//! back incomplete. Names are unique per manuscript; collisions get a
//! deterministic numeric suffix, and relationships pointing at unknown
//! names are dropped with a warning.

use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

use crate::concept::Concept;
use crate::gateway::{GatewayError, GenerateRequest, LlmGateway, LogMeta, TaskType};
use crate::outline::RoughOutline;
use crate::strategy::{CharacterDepth, Strategy};
use crate::utils::json::parse_llm_json;

/// One member of the cast. Immutable once the database is built.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Character {
    pub name: String,
    pub role: String,
    pub age: Option<u32>,
    /// Short personality tags, e.g. `["stubborn", "curious"]`.
    pub personality: Vec<String>,
    pub background: String,
    pub goals: Vec<String>,
    pub skills: Vec<String>,
    pub appearance: String,
    pub motivation: String,
}

/// Insertion-ordered cast with name and role lookup.
///
/// Role lookup returns the first inserted match, so the model's own
/// ordering decides who "the" antagonist is when several share the role.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CharacterDatabase {
    characters: Vec<Character>,
    #[serde(default)]
    relationships: FxHashMap<String, FxHashMap<String, String>>,
}

impl CharacterDatabase {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a character, renaming on collision with a ` (2)`, ` (3)`…
    /// suffix. Returns the name actually stored.
    pub fn insert(&mut self, mut character: Character) -> String {
        if character.name.trim().is_empty() {
            character.name = format!("Unnamed {}", self.characters.len() + 1);
        }
        let base = character.name.clone();
        let mut candidate = base.clone();
        let mut n = 1;
        while self.get_by_name(&candidate).is_some() {
            n += 1;
            candidate = format!("{base} ({n})");
        }
        if candidate != base {
            tracing::warn!(original = %base, renamed = %candidate, "duplicate character name");
        }
        character.name = candidate.clone();
        self.characters.push(character);
        candidate
    }

    /// Record a relationship; both endpoints must exist.
    pub fn relate(&mut self, from: &str, to: &str, description: impl Into<String>) -> bool {
        if self.get_by_name(from).is_none() || self.get_by_name(to).is_none() {
            return false;
        }
        self.relationships
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string(), description.into());
        true
    }

    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<&Character> {
        self.characters.iter().find(|c| c.name == name)
    }

    /// First inserted character whose role contains `role`
    /// (case-insensitive).
    #[must_use]
    pub fn get_by_role(&self, role: &str) -> Option<&Character> {
        let needle = role.to_lowercase();
        self.characters
            .iter()
            .find(|c| c.role.to_lowercase().contains(&needle))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get_by_name(name).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.characters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Character> {
        self.characters.iter()
    }

    /// Relationships out of `name`, if any.
    #[must_use]
    pub fn relationships_of(&self, name: &str) -> Option<&FxHashMap<String, String>> {
        self.relationships.get(name)
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawCast {
    characters: Vec<RawCharacter>,
    relationships: FxHashMap<String, FxHashMap<String, String>>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawCharacter {
    name: String,
    role: String,
    age: Option<u32>,
    personality: Vec<String>,
    background: String,
    goals: Vec<String>,
    skills: Vec<String>,
    appearance: String,
    motivation: String,
}

/// Errors from cast synthesis.
#[derive(Debug, Error, Diagnostic)]
pub enum CharacterError {
    #[error("model returned unusable cast JSON after {attempts} attempt(s)")]
    #[diagnostic(
        code(fableforge::characters::invalid_model_output),
        help("The model repeatedly failed to produce the requested JSON shape.")
    )]
    InvalidModelOutput { attempts: u32 },

    #[error("cast is missing required role(s): {missing:?}")]
    #[diagnostic(
        code(fableforge::characters::missing_roles),
        help("Even the stricter retry did not produce the structurally required roles.")
    )]
    MissingRequiredRoles { missing: Vec<&'static str> },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Gateway(#[from] GatewayError),
}

/// Synthesizes the cast for a manuscript.
pub struct CharacterSynthesizer {
    gateway: Arc<LlmGateway>,
    max_retries: u32,
}

impl CharacterSynthesizer {
    #[must_use]
    pub fn new(gateway: Arc<LlmGateway>) -> Self {
        Self {
            gateway,
            max_retries: 3,
        }
    }

    /// Generate the full cast and relationship map.
    #[instrument(skip_all)]
    pub async fn generate(
        &self,
        concept: &Concept,
        strategy: &Strategy,
        rough_outline: &RoughOutline,
    ) -> Result<CharacterDatabase, CharacterError> {
        let required = required_roles(strategy);

        let mut db = self
            .generate_once(concept, strategy, rough_outline, false)
            .await?;
        let missing = missing_roles(&db, &required);
        if !missing.is_empty() {
            tracing::warn!(?missing, "cast incomplete, retrying with stricter prompt");
            db = self
                .generate_once(concept, strategy, rough_outline, true)
                .await?;
            let still_missing = missing_roles(&db, &required);
            if !still_missing.is_empty() {
                return Err(CharacterError::MissingRequiredRoles {
                    missing: still_missing,
                });
            }
        }

        tracing::info!(cast_size = db.len(), "cast synthesized");
        Ok(db)
    }

    async fn generate_once(
        &self,
        concept: &Concept,
        strategy: &Strategy,
        rough_outline: &RoughOutline,
        strict: bool,
    ) -> Result<CharacterDatabase, CharacterError> {
        let prompt = cast_prompt(concept, strategy, rough_outline, strict);
        for attempt in 1..=self.max_retries {
            let request = GenerateRequest::new(prompt.clone(), TaskType::CharacterCreation)
                .with_cache(attempt == 1)
                .with_log(LogMeta::new("character_creation", "cast synthesis"));
            let response = self.gateway.generate(request).await?;
            match parse_llm_json::<RawCast>(&response, "cast") {
                Ok(raw) if !raw.characters.is_empty() => return Ok(build_database(raw)),
                Ok(_) => tracing::warn!(attempt, "cast response contained no characters"),
                Err(e) => tracing::warn!(attempt, error = %e, "cast response unparsable"),
            }
        }
        Err(CharacterError::InvalidModelOutput {
            attempts: self.max_retries,
        })
    }
}

fn build_database(raw: RawCast) -> CharacterDatabase {
    let mut db = CharacterDatabase::new();
    for raw_char in raw.characters {
        db.insert(Character {
            name: raw_char.name,
            role: raw_char.role,
            age: raw_char.age,
            personality: raw_char.personality,
            background: raw_char.background,
            goals: raw_char.goals,
            skills: raw_char.skills,
            appearance: raw_char.appearance,
            motivation: raw_char.motivation,
        });
    }
    for (from, links) in raw.relationships {
        for (to, description) in links {
            if !db.relate(&from, &to, description) {
                tracing::warn!(%from, %to, "dropping relationship with unknown endpoint");
            }
        }
    }
    db
}

fn required_roles(strategy: &Strategy) -> Vec<&'static str> {
    let mut required = vec!["protagonist"];
    if strategy.structure_type.bears_conflict() {
        required.push("antagonist");
    }
    if strategy.character_depth >= CharacterDepth::Medium {
        required.push("mentor");
    }
    required
}

fn missing_roles(db: &CharacterDatabase, required: &[&'static str]) -> Vec<&'static str> {
    required
        .iter()
        .filter(|role| db.get_by_role(role).is_none())
        .copied()
        .collect()
}

fn cast_prompt(
    concept: &Concept,
    strategy: &Strategy,
    rough_outline: &RoughOutline,
    strict: bool,
) -> String {
    let cast_size = match strategy.character_depth {
        CharacterDepth::Basic => "3 to 5",
        CharacterDepth::Medium => "5 to 8",
        CharacterDepth::Deep => "8 to 12",
    };
    let planned_roles: Vec<String> = rough_outline
        .character_roles
        .iter()
        .map(|(role, desc)| format!("- {role}: {desc}"))
        .collect();
    let planned = if planned_roles.is_empty() {
        String::new()
    } else {
        format!("\nRoles sketched in the outline:\n{}", planned_roles.join("\n"))
    };
    let required = required_roles(strategy).join(", ");
    let strict_note = if strict {
        format!(
            "\nIMPORTANT: the previous cast was missing required roles. \
             The cast MUST contain characters whose role field includes each of: {required}."
        )
    } else {
        format!("\nThe cast must include these roles: {required}.")
    };

    format!(
        r#"Create the full cast for the novel below.

Concept:
- Theme: {theme}
- Genre: {genre}
- Main conflict: {conflict}
- Tone: {tone}{planned}

Create {cast_size} characters.{strict_note}

Return a JSON object:
{{
    "characters": [
        {{
            "name": "full name",
            "role": "protagonist | antagonist | mentor | ally | ...",
            "age": 30,
            "personality": ["trait 1", "trait 2"],
            "background": "where they come from",
            "goals": ["goal 1"],
            "skills": ["skill 1"],
            "appearance": "one-line physical description",
            "motivation": "what drives them"
        }}
    ],
    "relationships": {{
        "Name A": {{ "Name B": "how A relates to B" }}
    }}
}}

Every relationship endpoint must be a character from the list above."#,
        theme = concept.theme,
        genre = concept.genre,
        conflict = concept.main_conflict,
        tone = concept.tone,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str, role: &str) -> Character {
        Character {
            name: name.to_string(),
            role: role.to_string(),
            ..Character::default()
        }
    }

    #[test]
    fn duplicate_names_get_suffixes() {
        let mut db = CharacterDatabase::new();
        assert_eq!(db.insert(named("Mara", "protagonist")), "Mara");
        assert_eq!(db.insert(named("Mara", "ally")), "Mara (2)");
        assert_eq!(db.insert(named("Mara", "rival")), "Mara (3)");
        assert_eq!(db.len(), 3);
    }

    #[test]
    fn role_lookup_returns_first_match() {
        let mut db = CharacterDatabase::new();
        db.insert(named("Mara", "protagonist"));
        db.insert(named("Ketch", "antagonist lieutenant"));
        db.insert(named("Vael", "antagonist"));
        assert_eq!(db.get_by_role("antagonist").unwrap().name, "Ketch");
        assert_eq!(db.get_by_role("Protagonist").unwrap().name, "Mara");
    }

    #[test]
    fn relationships_require_known_endpoints() {
        let mut db = CharacterDatabase::new();
        db.insert(named("Mara", "protagonist"));
        db.insert(named("Vael", "antagonist"));
        assert!(db.relate("Mara", "Vael", "hunts"));
        assert!(!db.relate("Mara", "Ghost", "imagines"));
        assert_eq!(
            db.relationships_of("Mara").unwrap().get("Vael").unwrap(),
            "hunts"
        );
    }

    #[test]
    fn unnamed_characters_get_placeholder_names() {
        let mut db = CharacterDatabase::new();
        assert_eq!(db.insert(named("", "bystander")), "Unnamed 1");
    }

    #[test]
    fn required_roles_scale_with_strategy() {
        use crate::strategy::{Pacing, StructureType, WorldDepth};
        let mut strategy = Strategy {
            structure_type: StructureType::ThreeAct,
            chapter_count: 5,
            character_depth: CharacterDepth::Basic,
            pacing: Pacing::Fast,
            volume_count: None,
            world_building_depth: WorldDepth::Low,
            magic_system: None,
            tech_level: None,
            genre_specific_elements: vec![],
            words_per_chapter: 1_000,
            estimated_scenes: 10,
            complexity_score: 0.2,
        };
        assert_eq!(required_roles(&strategy), vec!["protagonist", "antagonist"]);
        strategy.character_depth = CharacterDepth::Deep;
        assert_eq!(
            required_roles(&strategy),
            vec!["protagonist", "antagonist", "mentor"]
        );
    }
}
