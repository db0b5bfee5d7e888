//! Chapter generation: validation, regeneration, and coherence soft-failures.

mod common;

use std::sync::Arc;

use common::*;
use fableforge::chapter::ChapterGenerator;
use fableforge::characters::CharacterDatabase;
use fableforge::concept::{ComplexityLevel, Concept};
use fableforge::config::Settings;
use fableforge::outline::ChapterOutline;
use fableforge::strategy::select_strategy;

fn concept() -> Concept {
    Concept {
        theme: "repair".to_string(),
        genre: "sci-fi".to_string(),
        main_conflict: "audit vs. awakening".to_string(),
        world_type: "orbital habitat".to_string(),
        tone: "wistful".to_string(),
        protagonist_type: None,
        setting: None,
        core_message: None,
        complexity_level: ComplexityLevel::Simple,
        confidence_score: 0.9,
    }
}

fn outline() -> ChapterOutline {
    ChapterOutline {
        number: 1,
        title: "Signal".to_string(),
        summary: "the first emotion surfaces".to_string(),
        key_events: vec!["the spark".to_string()],
        estimated_word_count: 1_600,
        narrative_purpose: Some("opening hook".to_string()),
        ..ChapterOutline::default()
    }
}

fn prose(glyphs: usize) -> String {
    let sentence = "Ava said nothing and checked the seals again. ";
    let mut out = String::new();
    while out.chars().count() < glyphs {
        out.push_str(sentence);
    }
    out.chars().take(glyphs).collect()
}

fn settings() -> Settings {
    let mut settings = Settings::for_tests();
    settings.cache_enabled = false;
    settings
}

#[tokio::test]
async fn failing_chapter_is_regenerated_once_and_kept_annotated() {
    let provider = ScriptedProvider::new("primary");
    provider
        .push_ok(&prose(600)) // ratio 0.375: fails validation
        .push_ok(&prose(650)) // regeneration also fails
        .push_ok("not json") // coherence analysis: soft default
        .push_ok("not json"); // state extraction: no-op
    let gateway = gateway_with_providers(settings(), vec![provider.clone()]);
    let mut generator = ChapterGenerator::new(Arc::clone(&gateway));

    let strategy = select_strategy(5_000, &concept()).unwrap();
    let chapter = generator
        .generate_chapter(&outline(), &CharacterDatabase::new(), &concept(), &strategy, &[])
        .await
        .unwrap();

    // Exactly one regeneration: two prose calls went out.
    let writes = provider
        .prompts()
        .iter()
        .filter(|p| p.starts_with("Write chapter"))
        .count();
    assert_eq!(writes, 2);

    let meta = chapter.generation_metadata.as_ref().unwrap();
    assert!(!meta.quality_passed);
    assert_eq!(chapter.word_count, 650);
    // Unusable coherence output degrades to the neutral score.
    assert!((meta.coherence_score - 0.5).abs() < 1e-9);
    // Unusable extraction leaves the narrative state untouched.
    assert_eq!(generator.coherence().state().current_mood, "neutral");
    assert!(generator.coherence().state().active_plot_threads.is_empty());
}

#[tokio::test]
async fn regeneration_can_recover_quality() {
    let provider = ScriptedProvider::new("primary");
    provider
        .push_ok(&prose(600))
        .push_ok(&prose(1_600))
        .push_ok(
            &serde_json::json!({
                "character_consistency": 0.9,
                "plot_consistency": 0.9,
                "timeline_consistency": 0.9,
                "world_consistency": 0.9,
                "overall_score": 0.9,
                "issues": [],
                "suggestions": []
            })
            .to_string(),
        )
        .push_ok(
            &serde_json::json!({
                "plot_developments": ["the spark"],
                "mood_shift": "danger rising"
            })
            .to_string(),
        );
    let gateway = gateway_with_providers(settings(), vec![provider.clone()]);
    let mut generator = ChapterGenerator::new(Arc::clone(&gateway));

    let strategy = select_strategy(5_000, &concept()).unwrap();
    let chapter = generator
        .generate_chapter(&outline(), &CharacterDatabase::new(), &concept(), &strategy, &[])
        .await
        .unwrap();

    let meta = chapter.generation_metadata.as_ref().unwrap();
    assert!(meta.quality_passed);
    assert!((meta.coherence_score - 0.9).abs() < 1e-9);

    // The extraction updated the narrative state between chapters.
    let state = generator.coherence().state();
    assert_eq!(state.active_plot_threads, vec!["the spark"]);
    assert_eq!(state.current_mood, "danger rising");
    assert!((state.tension_level - 0.6).abs() < 1e-9);
}

#[tokio::test]
async fn passing_chapter_is_not_regenerated() {
    let provider = ScriptedProvider::new("primary");
    provider
        .push_ok(&prose(1_600))
        .push_ok("{}")
        .push_ok("{}");
    let gateway = gateway_with_providers(settings(), vec![provider.clone()]);
    let mut generator = ChapterGenerator::new(Arc::clone(&gateway));

    let strategy = select_strategy(5_000, &concept()).unwrap();
    let chapter = generator
        .generate_chapter(&outline(), &CharacterDatabase::new(), &concept(), &strategy, &[])
        .await
        .unwrap();

    let writes = provider
        .prompts()
        .iter()
        .filter(|p| p.starts_with("Write chapter"))
        .count();
    assert_eq!(writes, 1);
    assert!(chapter.generation_metadata.unwrap().quality_passed);
}
