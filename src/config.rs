//! Process-level configuration for the generation engine.
//!
//! Every knob is optional and resolved from environment variables (with
//! `.env` support via `dotenvy`), falling back to the documented defaults.
//! [`Settings`] is read once at startup and shared behind an `Arc`; nothing
//! in the pipeline re-reads the environment after construction.

use std::time::Duration;

use rustc_hash::FxHashMap;

/// Connection settings for a single LLM provider.
#[derive(Clone, Debug)]
pub struct ProviderSettings {
    /// Base URL of the provider API.
    pub base_url: String,
    /// Model identifier sent with every request.
    pub model: String,
    /// Bearer token, when the provider requires one.
    pub api_key: Option<String>,
    /// Per-call timeout for this provider.
    pub timeout: Duration,
}

/// Engine-wide settings with environment-variable overrides.
///
/// | Env var | Field | Default |
/// |---|---|---|
/// | `FABLEFORGE_PRIMARY_PROVIDER` | `primary_provider` | `openai` |
/// | `FABLEFORGE_FALLBACK_PROVIDERS` | `fallback_providers` | `ollama,custom` |
/// | `FABLEFORGE_RATE_LIMIT_SECS` | `rate_limit_spacing` | 10 s |
/// | `FABLEFORGE_MAX_RETRIES` | `max_retries` | 3 |
/// | `FABLEFORGE_REQUEST_TIMEOUT_SECS` | `request_timeout` | 60 s |
/// | `FABLEFORGE_MAX_CONCURRENT` | `max_concurrent_requests` | 3 |
/// | `FABLEFORGE_CACHE_ENABLED` | `cache_enabled` | true |
/// | `FABLEFORGE_CACHE_TTL_SECS` | `cache_ttl` | 1800 s |
/// | `FABLEFORGE_QUALITY_THRESHOLD` | `quality_threshold` | 0.7 |
/// | `FABLEFORGE_LOG_DIR` | `log_dir` | `logs/generation` |
#[derive(Clone, Debug)]
pub struct Settings {
    /// Provider tried first for every call.
    pub primary_provider: String,
    /// Ordered fallback chain after the primary.
    pub fallback_providers: Vec<String>,
    /// Minimum spacing between any two LLM call starts, process-wide.
    pub rate_limit_spacing: Duration,
    /// Per-call retry cap before falling back to another provider.
    pub max_retries: u32,
    /// Default per-call timeout when a provider has none of its own.
    pub request_timeout: Duration,
    /// In-flight request cap per provider.
    pub max_concurrent_requests: usize,
    /// Whether the fingerprint cache is consulted at all.
    pub cache_enabled: bool,
    /// Default cache TTL for task types without a specific one.
    pub cache_ttl: Duration,
    /// Chapter quality score below which one regeneration is attempted.
    pub quality_threshold: f64,
    /// Directory for per-manuscript generation session logs.
    pub log_dir: String,
    /// Per-provider connection settings, keyed by provider name.
    pub providers: FxHashMap<String, ProviderSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        let mut providers = FxHashMap::default();
        providers.insert(
            "openai".to_string(),
            ProviderSettings {
                base_url: "https://api.openai.com/v1".to_string(),
                model: "gpt-4-turbo".to_string(),
                api_key: None,
                timeout: Duration::from_secs(60),
            },
        );
        providers.insert(
            "ollama".to_string(),
            ProviderSettings {
                base_url: "http://localhost:11434".to_string(),
                model: "llama3".to_string(),
                api_key: None,
                timeout: Duration::from_secs(300),
            },
        );
        providers.insert(
            "custom".to_string(),
            ProviderSettings {
                base_url: String::new(),
                model: "default".to_string(),
                api_key: None,
                timeout: Duration::from_secs(120),
            },
        );
        Self {
            primary_provider: "openai".to_string(),
            fallback_providers: vec!["ollama".to_string(), "custom".to_string()],
            rate_limit_spacing: Duration::from_secs(10),
            max_retries: 3,
            request_timeout: Duration::from_secs(60),
            max_concurrent_requests: 3,
            cache_enabled: true,
            cache_ttl: Duration::from_secs(1800),
            quality_threshold: 0.7,
            log_dir: "logs/generation".to_string(),
            providers,
        }
    }
}

impl Settings {
    /// Load settings from the environment, applying defaults for anything
    /// unset. Reads `.env` if present.
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut settings = Self::default();

        if let Ok(v) = std::env::var("FABLEFORGE_PRIMARY_PROVIDER") {
            settings.primary_provider = v;
        }
        if let Ok(v) = std::env::var("FABLEFORGE_FALLBACK_PROVIDERS") {
            settings.fallback_providers = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(secs) = env_parse::<u64>("FABLEFORGE_RATE_LIMIT_SECS") {
            settings.rate_limit_spacing = Duration::from_secs(secs);
        }
        if let Some(v) = env_parse::<u32>("FABLEFORGE_MAX_RETRIES") {
            settings.max_retries = v;
        }
        if let Some(secs) = env_parse::<u64>("FABLEFORGE_REQUEST_TIMEOUT_SECS") {
            settings.request_timeout = Duration::from_secs(secs);
        }
        if let Some(v) = env_parse::<usize>("FABLEFORGE_MAX_CONCURRENT") {
            settings.max_concurrent_requests = v.max(1);
        }
        if let Some(v) = env_parse::<bool>("FABLEFORGE_CACHE_ENABLED") {
            settings.cache_enabled = v;
        }
        if let Some(secs) = env_parse::<u64>("FABLEFORGE_CACHE_TTL_SECS") {
            settings.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(v) = env_parse::<f64>("FABLEFORGE_QUALITY_THRESHOLD") {
            settings.quality_threshold = v.clamp(0.0, 1.0);
        }
        if let Ok(v) = std::env::var("FABLEFORGE_LOG_DIR") {
            settings.log_dir = v;
        }

        if let Some(openai) = settings.providers.get_mut("openai") {
            if let Ok(v) = std::env::var("OPENAI_API_KEY") {
                openai.api_key = Some(v);
            }
            if let Ok(v) = std::env::var("OPENAI_BASE_URL") {
                openai.base_url = v;
            }
            if let Ok(v) = std::env::var("OPENAI_MODEL") {
                openai.model = v;
            }
        }
        if let Some(ollama) = settings.providers.get_mut("ollama") {
            if let Ok(v) = std::env::var("OLLAMA_BASE_URL") {
                ollama.base_url = v;
            }
            if let Ok(v) = std::env::var("OLLAMA_MODEL") {
                ollama.model = v;
            }
        }
        if let Some(custom) = settings.providers.get_mut("custom") {
            if let Ok(v) = std::env::var("CUSTOM_LLM_BASE_URL") {
                custom.base_url = v;
            }
            if let Ok(v) = std::env::var("CUSTOM_LLM_API_KEY") {
                custom.api_key = Some(v);
            }
            if let Ok(v) = std::env::var("CUSTOM_LLM_MODEL") {
                custom.model = v;
            }
        }

        settings
    }

    /// Settings tuned for tests: no rate-limit spacing, no cache persistence
    /// surprises, tight timeouts.
    #[must_use]
    pub fn for_tests() -> Self {
        Self {
            rate_limit_spacing: Duration::ZERO,
            request_timeout: Duration::from_secs(5),
            ..Self::default()
        }
    }

    /// Connection settings for `provider`, if configured.
    #[must_use]
    pub fn provider(&self, provider: &str) -> Option<&ProviderSettings> {
        self.providers.get(provider)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
