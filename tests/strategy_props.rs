//! Property tests for the pure planning functions.

use fableforge::concept::{ComplexityLevel, Concept};
use fableforge::outline::{act_number_for, distribute_words, Distribution};
use fableforge::strategy::{select_strategy, StructureType};
use proptest::prelude::*;

fn concept(genre: &str) -> Concept {
    Concept {
        theme: "t".to_string(),
        genre: genre.to_string(),
        main_conflict: "c".to_string(),
        world_type: "w".to_string(),
        tone: "n".to_string(),
        protagonist_type: None,
        setting: None,
        core_message: None,
        complexity_level: ComplexityLevel::Medium,
        confidence_score: 0.5,
    }
}

fn any_distribution() -> impl Strategy<Value = Distribution> {
    prop_oneof![
        Just(Distribution::Balanced),
        Just(Distribution::Crescendo),
        Just(Distribution::Pyramid),
        Just(Distribution::EpicEnds),
    ]
}

proptest! {
    #[test]
    fn word_distribution_always_sums_to_target(
        total in 1_000u64..2_000_000,
        chapters in 1u32..600,
        shape in any_distribution(),
    ) {
        let counts = distribute_words(total, chapters, shape);
        prop_assert_eq!(counts.len(), chapters as usize);
        prop_assert_eq!(counts.iter().sum::<u64>(), total);
    }

    #[test]
    fn strategy_selection_is_pure(target in 1_000u64..=10_000_000) {
        let c = concept("fantasy");
        let a = select_strategy(target, &c).unwrap();
        let b = select_strategy(target, &c).unwrap();
        prop_assert_eq!(format!("{a:?}"), format!("{b:?}"));
    }

    #[test]
    fn chapter_counts_stay_in_structure_bounds(target in 1_000u64..=10_000_000) {
        let s = select_strategy(target, &concept("realism")).unwrap();
        prop_assert!(s.chapter_count >= 1);
        match s.structure_type {
            StructureType::ThreeAct => prop_assert!(s.chapter_count <= 15),
            StructureType::FiveAct => prop_assert!((8..=40).contains(&s.chapter_count)),
            StructureType::MultiVolume => prop_assert!((20..=60).contains(&s.chapter_count)),
            StructureType::Epic => prop_assert!(s.chapter_count >= 30),
            StructureType::SingleLine => {}
        }
        prop_assert!(s.words_per_chapter >= 1);
    }

    #[test]
    fn volume_count_present_exactly_for_volume_structures(target in 1_000u64..=10_000_000) {
        let s = select_strategy(target, &concept("fantasy")).unwrap();
        let needs_volumes = matches!(
            s.structure_type,
            StructureType::MultiVolume | StructureType::Epic
        );
        prop_assert_eq!(s.volume_count.is_some(), needs_volumes);
        if let Some(v) = s.volume_count {
            prop_assert!((2..=4).contains(&v));
        }
    }

    #[test]
    fn act_numbers_are_in_range_and_monotonic(
        total in 1u32..500,
        acts in 1u32..6,
    ) {
        let mut last = 0;
        for chapter in 1..=total {
            let act = act_number_for(chapter, total, acts);
            prop_assert!((1..=acts).contains(&act));
            prop_assert!(act >= last);
            last = act;
        }
    }
}
