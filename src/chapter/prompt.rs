//! Chapter prompt assembly.
//!
//! The prompt carries everything the model needs to write chapter `i` as a
//! seamless continuation of chapters `1..i-1`: the concept summary, the
//! outline, active character sheets, the previous-chapter summary with
//! transition guidance pattern-matched on how that chapter ended, mood
//! continuity, the coherence guidelines, and the ending requirement.

use crate::coherence::ChapterContext;
use crate::concept::Concept;
use crate::outline::ChapterOutline;

/// How the previous chapter appears to have ended, inferred from its
/// summary. Drives the opening guidance for the next chapter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitionPattern {
    /// Something abrupt happened; open inside the reaction.
    Shock,
    /// Ended in or around dialogue; continue from its aftermath.
    Dialogue,
    /// A decision was made; open with it being enacted.
    Decision,
    /// Someone left or arrived; open in the new setting with a bridge.
    Travel,
    /// Nothing distinctive; continue naturally without a time skip.
    Generic,
}

const SHOCK_MARKERS: &[&str] = &["sudden", "unexpected", "shock", "stunned", "startl"];
const DIALOGUE_MARKERS: &[&str] = &["\"", "said", "asked", "answered", "replied", "whisper"];
const DECISION_MARKERS: &[&str] = &["decided", "decision", "chose", "choice", "plan"];
const TRAVEL_MARKERS: &[&str] = &["left", "departed", "arrived", "headed", "set out", "reached"];

/// Classify the previous chapter's ending from its summary.
#[must_use]
pub fn classify_transition(previous_summary: &str) -> TransitionPattern {
    let lower = previous_summary.to_lowercase();
    let contains_any = |markers: &[&str]| markers.iter().any(|m| lower.contains(m));
    if contains_any(SHOCK_MARKERS) {
        TransitionPattern::Shock
    } else if contains_any(DIALOGUE_MARKERS) {
        TransitionPattern::Dialogue
    } else if contains_any(DECISION_MARKERS) {
        TransitionPattern::Decision
    } else if contains_any(TRAVEL_MARKERS) {
        TransitionPattern::Travel
    } else {
        TransitionPattern::Generic
    }
}

fn transition_guidance(previous_summary: &str, outline: &ChapterOutline) -> String {
    let mut lines = vec!["Transition requirements:".to_string()];
    match classify_transition(previous_summary) {
        TransitionPattern::Shock => {
            lines.push("- Open inside the characters' reaction to what just happened.".to_string());
            lines.push("- Hold the tense, startled register of the previous ending.".to_string());
            lines.push("- Continue from the same moment; no time skip.".to_string());
        }
        TransitionPattern::Dialogue => {
            lines.push(
                "- Continue the conversation or show its immediate aftermath.".to_string(),
            );
            lines.push("- Carry the emotional charge the dialogue built.".to_string());
            lines.push("- Pick up from the instant the exchange ended.".to_string());
        }
        TransitionPattern::Decision => {
            lines.push("- Open with the decision being acted on or its consequences.".to_string());
            lines.push("- Show the characters following through, not re-deciding.".to_string());
            lines.push("- A short time advance is fine if it is made explicit.".to_string());
        }
        TransitionPattern::Travel => {
            lines.push("- Open in the new setting, with a brief note bridging the move.".to_string());
            lines.push("- Make the change of place and any time passed explicit.".to_string());
        }
        TransitionPattern::Generic => {
            lines.push("- Continue naturally from the previous situation.".to_string());
            lines.push("- Keep the emotional register or shift it for a clear reason.".to_string());
            lines.push("- No abrupt, unexplained jumps in time or place.".to_string());
        }
    }
    lines.push(
        "- Do not recap the previous chapter; build on its outcome.".to_string(),
    );
    if let Some(first_event) = outline.key_events.first() {
        lines.push(format!(
            "- Work toward this chapter's first key event: {first_event}."
        ));
    }
    lines.join("\n")
}

fn ending_requirement(outline: &ChapterOutline) -> String {
    if outline.is_final_chapter {
        "Ending requirement: this is the final chapter. Give the story a complete \
         ending that resolves the main conflicts and outstanding questions."
            .to_string()
    } else {
        r#"Ending requirement:
- Stop mid-tension: end the chapter at a moment of unresolved pressure.
- Good cut points: a conflict about to break, a truth about to surface, a choice about to be made.
- Avoid tidy wrap-ups or "and so the day ended" closings.
- Example closing beats: "the door burst open...", "the phone rang in the silence...", "he was about to answer when he saw the one person who could not be here...""#
            .to_string()
    }
}

/// Build the complete generation prompt for one chapter.
#[must_use]
pub fn build_chapter_prompt(
    outline: &ChapterOutline,
    concept: &Concept,
    context: &ChapterContext,
) -> String {
    let characters: Vec<String> = context
        .characters
        .iter()
        .map(|c| {
            let mut line = format!("- {}: {}, {}", c.name, c.role, c.motivation);
            if !c.personality.is_empty() {
                let tags: Vec<&str> = c.personality.iter().take(3).map(String::as_str).collect();
                line.push_str(&format!(", personality: {}", tags.join(", ")));
            }
            if let Some(dev) = &c.last_development {
                line.push_str(&format!(" (recently: {dev})"));
            }
            line
        })
        .collect();

    let mut continuity = String::new();
    if let Some(previous) = &context.previous_chapter_summary {
        continuity.push_str(&format!("Previous chapter summary: {previous}\n"));
        continuity.push('\n');
        continuity.push_str(&transition_guidance(previous, outline));
        continuity.push('\n');
    }
    if let Some(transition) = &context.transition {
        if !transition.suggested_opening.is_empty() {
            continuity.push_str(&format!(
                "Suggested opening: {}\n",
                transition.suggested_opening
            ));
        }
        if !transition.key_connections.is_empty() {
            continuity.push_str(&format!(
                "Threads to carry across: {}\n",
                transition.key_connections.join("; ")
            ));
        }
    }
    if !context.plot.active_threads.is_empty() {
        continuity.push_str(&format!(
            "Open plot threads: {}\n",
            context.plot.active_threads.join("; ")
        ));
    }
    if !context.world.established_facts.is_empty() {
        continuity.push_str(&format!(
            "Established facts: {}\n",
            context.world.established_facts.join("; ")
        ));
    }
    if context.world.current_location != "unspecified" {
        continuity.push_str(&format!(
            "Current location: {}\n",
            context.world.current_location
        ));
    }

    let guidelines: Vec<String> = context
        .guidelines
        .iter()
        .map(|g| format!("- {g}"))
        .collect();

    let scenes: Vec<&str> = outline
        .scenes
        .iter()
        .take(2)
        .map(|s| s.name.as_str())
        .collect();

    format!(
        r#"Write chapter {number} of the novel.

Novel:
- Theme: {theme}
- Genre: {genre}
- Tone: {tone}
- World: {world_type}

Chapter outline:
- Title: {title}
- Summary: {summary}
- Key events: {key_events}
- Target length: {target_words} words
- Narrative purpose: {purpose}

Active characters:
{characters}

{continuity}
Mood: {mood} (tension {tension:.1})
Main scenes: {scenes}

Coherence requirements:
{guidelines}

{ending}

Write the complete chapter:
1. Aim for {target_words} words (stay within 20% of that).
2. Cover every key event.
3. Keep every character true to their sheet.
4. Use dialogue to move the plot; include scene and interior description.
5. Honor the transition requirements so the chapter reads as a seamless continuation.

Output the chapter as plain prose, with no JSON and no headings."#,
        number = outline.number,
        theme = concept.theme,
        genre = concept.genre,
        tone = concept.tone,
        world_type = concept.world_type,
        title = outline.title,
        summary = outline.summary,
        key_events = outline.key_events.join("; "),
        target_words = outline.estimated_word_count,
        purpose = outline
            .narrative_purpose
            .as_deref()
            .unwrap_or("advance the plot"),
        characters = characters.join("\n"),
        mood = context.mood.current_mood,
        tension = context.mood.tension_level,
        scenes = scenes.join(", "),
        guidelines = guidelines.join("\n"),
        ending = ending_requirement(outline),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_endings() {
        assert_eq!(
            classify_transition("A sudden blast tears through the hangar"),
            TransitionPattern::Shock
        );
        assert_eq!(
            classify_transition("She said nothing and waited for his answer"),
            TransitionPattern::Dialogue
        );
        assert_eq!(
            classify_transition("Mara decided to cross the ridge at night"),
            TransitionPattern::Decision
        );
        assert_eq!(
            classify_transition("They departed for the coast before dawn"),
            TransitionPattern::Travel
        );
        assert_eq!(
            classify_transition("The rain kept falling on the quiet town"),
            TransitionPattern::Generic
        );
    }

    #[test]
    fn shock_wins_over_dialogue_when_both_match() {
        assert_eq!(
            classify_transition("A sudden voice said her name"),
            TransitionPattern::Shock
        );
    }
}
