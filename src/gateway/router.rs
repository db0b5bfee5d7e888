//! Provider selection: capability records, routing strategies, and the
//! failover ordering used to pick a fallback after a failure.
//!
//! The router learns from outcomes: success/failure counts and recent
//! response times feed the balanced score. Reads see the most recent
//! snapshot; no transactional guarantees are needed because a slightly
//! stale score only shifts which healthy provider answers the next call.

use miette::Diagnostic;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pipeline task a prompt belongs to, used for capability matching,
/// cache TTL selection, and session-log labeling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    ConceptExpansion,
    WorldBuilding,
    OutlineGeneration,
    ChapterRefinement,
    CharacterCreation,
    ChapterGeneration,
    ConsistencyCheck,
    QualityAssessment,
    General,
}

impl TaskType {
    /// Stable label used in log entries and cache keys.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConceptExpansion => "concept_expansion",
            Self::WorldBuilding => "world_building",
            Self::OutlineGeneration => "outline_generation",
            Self::ChapterRefinement => "chapter_refinement",
            Self::CharacterCreation => "character_creation",
            Self::ChapterGeneration => "chapter_generation",
            Self::ConsistencyCheck => "consistency_check",
            Self::QualityAssessment => "quality_assessment",
            Self::General => "general",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the router ranks candidate providers for a call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RoutingStrategy {
    QualityFirst,
    SpeedFirst,
    CostFirst,
    #[default]
    Balanced,
    RoundRobin,
    Failover,
}

/// Static capability record for one provider.
///
/// Scores are on a 0–10 scale; `cost_score` is inverted (higher = cheaper).
/// `priority` ranks the configured preference order: 1 is the primary,
/// 2.. the fallback chain, 10 everything else.
#[derive(Clone, Debug)]
pub struct ProviderCapability {
    pub quality_score: f64,
    pub speed_score: f64,
    pub reliability_score: f64,
    pub cost_score: f64,
    pub supported_tasks: Vec<TaskType>,
    pub max_tokens: u32,
    pub available: bool,
    pub priority: u8,
}

impl ProviderCapability {
    fn supports(&self, task: TaskType) -> bool {
        self.supported_tasks.contains(&task)
    }
}

/// Every task type, for providers that support the full pipeline.
pub const ALL_TASKS: [TaskType; 9] = [
    TaskType::ConceptExpansion,
    TaskType::WorldBuilding,
    TaskType::OutlineGeneration,
    TaskType::ChapterRefinement,
    TaskType::CharacterCreation,
    TaskType::ChapterGeneration,
    TaskType::ConsistencyCheck,
    TaskType::QualityAssessment,
    TaskType::General,
];

#[derive(Debug, Default)]
struct ProviderStats {
    success_count: u64,
    failure_count: u64,
    response_times: Vec<f64>,
}

impl ProviderStats {
    fn success_rate(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            // Unproven providers rank as fully successful so a fresh
            // failover chain keeps its configured order.
            1.0
        } else {
            self.success_count as f64 / total as f64
        }
    }

    fn avg_response_secs(&self) -> f64 {
        if self.response_times.is_empty() {
            1.0
        } else {
            self.response_times.iter().sum::<f64>() / self.response_times.len() as f64
        }
    }
}

/// Routing errors.
#[derive(Debug, Error, Diagnostic)]
pub enum RouterError {
    /// No available provider supports the requested task.
    #[error("no provider available for task `{task}`")]
    #[diagnostic(
        code(fableforge::gateway::no_provider),
        help("Check provider configuration and circuit-breaker state.")
    )]
    NoProviderAvailable { task: TaskType },
}

struct RouterInner {
    capabilities: FxHashMap<String, ProviderCapability>,
    stats: FxHashMap<String, ProviderStats>,
    round_robin_cursor: usize,
}

/// Scores providers and picks one per call.
pub struct Router {
    inner: RwLock<RouterInner>,
}

impl Router {
    /// Build a router with the default capability table, then apply the
    /// configured primary/fallback priorities: primary → 1, fallbacks →
    /// 2.., everything else → 10.
    #[must_use]
    pub fn new(primary: &str, fallbacks: &[String]) -> Self {
        let mut capabilities = FxHashMap::default();
        capabilities.insert(
            "openai".to_string(),
            ProviderCapability {
                quality_score: 9.5,
                speed_score: 8.0,
                reliability_score: 9.0,
                cost_score: 6.0,
                supported_tasks: ALL_TASKS.to_vec(),
                max_tokens: 128_000,
                available: true,
                priority: 10,
            },
        );
        capabilities.insert(
            "ollama".to_string(),
            ProviderCapability {
                quality_score: 7.5,
                speed_score: 6.0,
                reliability_score: 7.0,
                cost_score: 10.0,
                supported_tasks: vec![
                    TaskType::ConceptExpansion,
                    TaskType::WorldBuilding,
                    TaskType::OutlineGeneration,
                    TaskType::ChapterRefinement,
                    TaskType::CharacterCreation,
                    TaskType::ChapterGeneration,
                    TaskType::General,
                ],
                max_tokens: 32_768,
                available: true,
                priority: 10,
            },
        );
        capabilities.insert(
            "custom".to_string(),
            ProviderCapability {
                quality_score: 7.0,
                speed_score: 7.0,
                reliability_score: 6.0,
                cost_score: 8.0,
                supported_tasks: vec![
                    TaskType::ConceptExpansion,
                    TaskType::ChapterGeneration,
                    TaskType::General,
                ],
                max_tokens: 16_384,
                available: true,
                priority: 10,
            },
        );

        let router = Self {
            inner: RwLock::new(RouterInner {
                capabilities,
                stats: FxHashMap::default(),
                round_robin_cursor: 0,
            }),
        };
        router.apply_priorities(primary, fallbacks);
        router
    }

    fn apply_priorities(&self, primary: &str, fallbacks: &[String]) {
        let mut inner = self.inner.write();
        for cap in inner.capabilities.values_mut() {
            cap.priority = 10;
        }
        if let Some(cap) = inner.capabilities.get_mut(primary) {
            cap.priority = 1;
        }
        for (i, name) in fallbacks.iter().enumerate() {
            if name == primary {
                continue;
            }
            if let Some(cap) = inner.capabilities.get_mut(name) {
                cap.priority = (i as u8).saturating_add(2);
            }
        }
    }

    /// Register or replace a provider's capability record.
    pub fn set_capability(&self, name: impl Into<String>, capability: ProviderCapability) {
        self.inner.write().capabilities.insert(name.into(), capability);
    }

    /// Flip a provider's availability flag.
    pub fn set_availability(&self, name: &str, available: bool) {
        if let Some(cap) = self.inner.write().capabilities.get_mut(name) {
            cap.available = available;
            tracing::debug!(provider = name, available, "provider availability updated");
        }
    }

    fn candidates(
        inner: &RouterInner,
        task: TaskType,
        required_tokens: Option<u32>,
        exclude: &[&str],
    ) -> Vec<String> {
        let mut names: Vec<String> = inner
            .capabilities
            .iter()
            .filter(|(name, cap)| {
                cap.available
                    && !exclude.contains(&name.as_str())
                    && cap.supports(task)
                    && required_tokens.map_or(true, |t| t <= cap.max_tokens)
            })
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Pick a provider for `task` under `strategy`.
    ///
    /// A `preferred` provider short-circuits selection iff it is currently
    /// available and supports the task; otherwise the strategy decides.
    pub fn select(
        &self,
        task: TaskType,
        strategy: RoutingStrategy,
        required_tokens: Option<u32>,
        exclude: &[&str],
        preferred: Option<&str>,
    ) -> Result<String, RouterError> {
        let mut inner = self.inner.write();
        let candidates = Self::candidates(&inner, task, required_tokens, exclude);
        if candidates.is_empty() {
            return Err(RouterError::NoProviderAvailable { task });
        }

        if let Some(preferred) = preferred {
            if candidates.iter().any(|c| c == preferred) {
                tracing::debug!(provider = preferred, %task, "using preferred provider");
                return Ok(preferred.to_string());
            }
        }

        let chosen = match strategy {
            RoutingStrategy::QualityFirst => {
                Self::argmax(&inner, &candidates, |cap, _| cap.quality_score)
            }
            RoutingStrategy::SpeedFirst => {
                Self::argmax(&inner, &candidates, |cap, _| cap.speed_score)
            }
            RoutingStrategy::CostFirst => {
                Self::argmax(&inner, &candidates, |cap, _| cap.cost_score)
            }
            RoutingStrategy::Balanced => {
                Self::argmax(&inner, &candidates, Self::balanced_score)
            }
            RoutingStrategy::RoundRobin => {
                let mut ordered = candidates.clone();
                ordered.sort_by_key(|name| inner.capabilities[name].priority);
                let pick = ordered[inner.round_robin_cursor % ordered.len()].clone();
                inner.round_robin_cursor += 1;
                pick
            }
            RoutingStrategy::Failover => Self::failover_pick(&inner, &candidates),
        };

        tracing::debug!(provider = %chosen, %task, ?strategy, "provider selected");
        Ok(chosen)
    }

    /// The provider to try after `failed` failed: failover ordering with
    /// the failed provider excluded.
    #[must_use]
    pub fn fallback_for(
        &self,
        failed: &str,
        task: TaskType,
        required_tokens: Option<u32>,
    ) -> Option<String> {
        let inner = self.inner.read();
        let candidates = Self::candidates(&inner, task, required_tokens, &[failed]);
        if candidates.is_empty() {
            None
        } else {
            Some(Self::failover_pick(&inner, &candidates))
        }
    }

    fn argmax(
        inner: &RouterInner,
        candidates: &[String],
        score: impl Fn(&ProviderCapability, &ProviderStats) -> f64,
    ) -> String {
        let empty = ProviderStats::default();
        let mut best = candidates[0].clone();
        let mut best_score = f64::NEG_INFINITY;
        for name in candidates {
            let s = score(&inner.capabilities[name], inner.stats.get(name).unwrap_or(&empty));
            if s > best_score {
                best_score = s;
                best = name.clone();
            }
        }
        best
    }

    /// Weighted blend: quality 0.4, speed 0.25, reliability 0.2, cost 0.1,
    /// historical performance 0.05, minus a per-priority-step penalty so the
    /// configured order breaks near-ties.
    fn balanced_score(cap: &ProviderCapability, stats: &ProviderStats) -> f64 {
        let response_score = (10.0 - stats.avg_response_secs()).max(0.0);
        let history = stats.success_rate() * 10.0 + response_score;
        cap.quality_score * 0.4
            + cap.speed_score * 0.25
            + cap.reliability_score * 0.2
            + cap.cost_score * 0.1
            + history * 0.05
            - f64::from(cap.priority - 1) * 0.5
    }

    fn failover_pick(inner: &RouterInner, candidates: &[String]) -> String {
        let empty = ProviderStats::default();
        let mut ordered: Vec<&String> = candidates.iter().collect();
        ordered.sort_by(|a, b| {
            let cap_a = &inner.capabilities[*a];
            let cap_b = &inner.capabilities[*b];
            let rate_a = inner.stats.get(*a).unwrap_or(&empty).success_rate();
            let rate_b = inner.stats.get(*b).unwrap_or(&empty).success_rate();
            cap_a
                .priority
                .cmp(&cap_b.priority)
                .then(rate_b.total_cmp(&rate_a))
        });
        ordered[0].clone()
    }

    /// Record a call outcome for the adaptive scores. Response times keep
    /// the most recent 100 samples.
    pub fn record_outcome(&self, provider: &str, success: bool, response_secs: f64) {
        let mut inner = self.inner.write();
        let stats = inner.stats.entry(provider.to_string()).or_default();
        if success {
            stats.success_count += 1;
        } else {
            stats.failure_count += 1;
        }
        stats.response_times.push(response_secs);
        if stats.response_times.len() > 100 {
            let excess = stats.response_times.len() - 100;
            stats.response_times.drain(..excess);
        }
    }

    /// Success rate for `provider`, 1.0 when unproven.
    #[must_use]
    pub fn success_rate(&self, provider: &str) -> f64 {
        self.inner
            .read()
            .stats
            .get(provider)
            .map_or(1.0, ProviderStats::success_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> Router {
        Router::new("openai", &["ollama".to_string(), "custom".to_string()])
    }

    #[test]
    fn quality_first_picks_openai() {
        let r = router();
        let pick = r
            .select(TaskType::ChapterGeneration, RoutingStrategy::QualityFirst, None, &[], None)
            .unwrap();
        assert_eq!(pick, "openai");
    }

    #[test]
    fn cost_first_picks_ollama() {
        let r = router();
        let pick = r
            .select(TaskType::ChapterGeneration, RoutingStrategy::CostFirst, None, &[], None)
            .unwrap();
        assert_eq!(pick, "ollama");
    }

    #[test]
    fn preferred_overrides_when_capable() {
        let r = router();
        let pick = r
            .select(
                TaskType::ChapterGeneration,
                RoutingStrategy::Balanced,
                None,
                &[],
                Some("custom"),
            )
            .unwrap();
        assert_eq!(pick, "custom");
    }

    #[test]
    fn preferred_ignored_when_task_unsupported() {
        let r = router();
        // "custom" does not advertise quality assessment.
        let pick = r
            .select(
                TaskType::QualityAssessment,
                RoutingStrategy::Balanced,
                None,
                &[],
                Some("custom"),
            )
            .unwrap();
        assert_ne!(pick, "custom");
    }

    #[test]
    fn token_requirement_filters_candidates() {
        let r = router();
        let pick = r
            .select(
                TaskType::ChapterGeneration,
                RoutingStrategy::Balanced,
                Some(64_000),
                &[],
                None,
            )
            .unwrap();
        assert_eq!(pick, "openai");
    }

    #[test]
    fn fallback_excludes_failed_provider() {
        let r = router();
        let fb = r.fallback_for("openai", TaskType::ChapterGeneration, None).unwrap();
        assert_eq!(fb, "ollama");
    }

    #[test]
    fn unavailable_providers_are_skipped() {
        let r = router();
        r.set_availability("openai", false);
        let pick = r
            .select(TaskType::ChapterGeneration, RoutingStrategy::QualityFirst, None, &[], None)
            .unwrap();
        assert_eq!(pick, "ollama");
    }

    #[test]
    fn no_provider_error_when_all_excluded() {
        let r = router();
        let err = r
            .select(
                TaskType::ChapterGeneration,
                RoutingStrategy::Balanced,
                None,
                &["openai", "ollama", "custom"],
                None,
            )
            .unwrap_err();
        assert!(matches!(err, RouterError::NoProviderAvailable { .. }));
    }

    #[test]
    fn round_robin_cycles_in_priority_order() {
        let r = router();
        let first = r
            .select(TaskType::General, RoutingStrategy::RoundRobin, None, &[], None)
            .unwrap();
        let second = r
            .select(TaskType::General, RoutingStrategy::RoundRobin, None, &[], None)
            .unwrap();
        let third = r
            .select(TaskType::General, RoutingStrategy::RoundRobin, None, &[], None)
            .unwrap();
        let fourth = r
            .select(TaskType::General, RoutingStrategy::RoundRobin, None, &[], None)
            .unwrap();
        assert_eq!(first, "openai");
        assert_eq!(second, "ollama");
        assert_eq!(third, "custom");
        assert_eq!(fourth, "openai");
    }

    #[test]
    fn failover_prefers_priority_then_success_rate() {
        let r = router();
        // Tank the primary's record; failover still ranks by priority first.
        r.record_outcome("openai", false, 1.0);
        r.record_outcome("openai", false, 1.0);
        let pick = r
            .select(TaskType::General, RoutingStrategy::Failover, None, &[], None)
            .unwrap();
        assert_eq!(pick, "openai");
    }
}
