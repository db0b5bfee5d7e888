//! Word-budget distribution across chapters.
//!
//! A distribution shapes where the word budget lands; the invariant is that
//! the per-chapter estimates always sum to the target exactly, with any
//! rounding remainder folded into the final chapter.

use serde::{Deserialize, Serialize};

/// Shape of the per-chapter word budget.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Distribution {
    /// Every chapter gets the same share.
    #[default]
    Balanced,
    /// Later chapters grow steadily longer.
    Crescendo,
    /// The middle of the book carries the most weight.
    Pyramid,
    /// Heavy opening and closing stretches, lighter middle.
    EpicEnds,
}

/// Split `total_words` across `chapter_count` chapters.
///
/// Returns one estimate per chapter. The estimates sum to `total_words`
/// exactly; the rounding remainder is applied to the last chapter.
#[must_use]
pub fn distribute_words(total_words: u64, chapter_count: u32, shape: Distribution) -> Vec<u64> {
    if chapter_count == 0 {
        return Vec::new();
    }
    let n = chapter_count as usize;

    let weights: Vec<f64> = match shape {
        Distribution::Balanced => vec![1.0; n],
        Distribution::Crescendo => (0..n).map(|i| (i + 1) as f64).collect(),
        Distribution::Pyramid => {
            let mid = n / 2;
            (0..n)
                .map(|i| (n - i.abs_diff(mid)) as f64)
                .collect()
        }
        Distribution::EpicEnds => (0..n)
            .map(|i| {
                let pos = i as f64 / n as f64;
                if pos < 0.2 || pos >= 0.8 {
                    1.5
                } else {
                    1.0
                }
            })
            .collect(),
    };

    let total_weight: f64 = weights.iter().sum();
    let mut counts: Vec<u64> = weights
        .iter()
        .map(|w| (total_words as f64 * w / total_weight) as u64)
        .collect();

    let assigned: u64 = counts.iter().sum();
    let remainder = total_words - assigned;
    if let Some(last) = counts.last_mut() {
        *last += remainder;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_sums_exactly() {
        let counts = distribute_words(5_000, 3, Distribution::Balanced);
        assert_eq!(counts.len(), 3);
        assert_eq!(counts.iter().sum::<u64>(), 5_000);
    }

    #[test]
    fn crescendo_grows() {
        let counts = distribute_words(60_000, 10, Distribution::Crescendo);
        assert!(counts.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(counts.iter().sum::<u64>(), 60_000);
    }

    #[test]
    fn pyramid_peaks_in_the_middle() {
        let counts = distribute_words(50_000, 9, Distribution::Pyramid);
        assert!(counts[4] > counts[0]);
        assert!(counts[4] > counts[8]);
        assert_eq!(counts.iter().sum::<u64>(), 50_000);
    }

    #[test]
    fn epic_ends_are_heavier_than_the_middle() {
        let counts = distribute_words(100_000, 20, Distribution::EpicEnds);
        assert!(counts[0] > counts[10]);
        assert!(counts[19] >= counts[10]);
        assert_eq!(counts.iter().sum::<u64>(), 100_000);
    }

    #[test]
    fn zero_chapters_yields_empty() {
        assert!(distribute_words(1_000, 0, Distribution::Balanced).is_empty());
    }
}
