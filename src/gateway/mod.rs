//! Single entry point for every model call the pipeline makes.
//!
//! The gateway owns the full call sequence: cache lookup, provider
//! selection, the process-wide rate-limit gate, per-provider concurrency
//! slots, the timed provider call, failure classification, fallback with
//! capped back-off, outcome recording, and session-log appends. Pipeline
//! components never talk to a provider directly.
//!
//! Global mutable state (the rate limiter's last-call instant, the health
//! map, router statistics) is deliberate: spacing and learning are
//! process-wide concerns. Each lives behind its single owning component
//! here; nothing else mutates them.

pub mod cache;
pub mod fallback;
pub mod provider;
pub mod providers;
pub mod rate_limit;
pub mod router;

use std::sync::Arc;

use miette::Diagnostic;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::instrument;

use crate::config::Settings;
use crate::session_log::{GenerationLogger, LogEntry};

pub use cache::RequestCache;
pub use fallback::FallbackManager;
pub use provider::{
    CompletionRequest, CompletionResponse, FailureKind, LlmProvider, ProviderError,
};
pub use providers::{CustomProvider, OllamaProvider, OpenAiProvider};
pub use rate_limit::RateLimiter;
pub use router::{ProviderCapability, Router, RouterError, RoutingStrategy, TaskType};

/// Maximum pause between a failed call and its fallback attempt. Longer
/// classified delays apply on later retries of the same provider, not here.
const FALLBACK_DELAY_CAP: std::time::Duration = std::time::Duration::from_secs(5);

/// Session-log labeling for one gateway call.
#[derive(Clone, Debug)]
pub struct LogMeta {
    /// Coarse step category, e.g. `chapter_generation`.
    pub step_type: String,
    /// Human-readable step label, e.g. `"Chapter 3: The Long Night"`.
    pub step_name: String,
}

impl LogMeta {
    #[must_use]
    pub fn new(step_type: impl Into<String>, step_name: impl Into<String>) -> Self {
        Self {
            step_type: step_type.into(),
            step_name: step_name.into(),
        }
    }
}

/// One generation request as the pipeline sees it.
#[derive(Clone, Debug)]
pub struct GenerateRequest {
    pub prompt: String,
    pub task: TaskType,
    pub preferred_provider: Option<String>,
    pub strategy: RoutingStrategy,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub use_cache: bool,
    pub log: Option<LogMeta>,
}

impl GenerateRequest {
    #[must_use]
    pub fn new(prompt: impl Into<String>, task: TaskType) -> Self {
        Self {
            prompt: prompt.into(),
            task,
            preferred_provider: None,
            strategy: RoutingStrategy::Balanced,
            max_tokens: None,
            temperature: None,
            use_cache: true,
            log: None,
        }
    }

    #[must_use]
    pub fn with_preferred_provider(mut self, provider: impl Into<String>) -> Self {
        self.preferred_provider = Some(provider.into());
        self
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: RoutingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    #[must_use]
    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    #[must_use]
    pub fn with_log(mut self, meta: LogMeta) -> Self {
        self.log = Some(meta);
        self
    }
}

/// Errors surfaced by the gateway.
#[derive(Debug, Error, Diagnostic)]
pub enum GatewayError {
    /// Routing found no available, capable provider.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Routing(#[from] RouterError),

    /// A non-retryable failure (authentication, malformed request);
    /// no fallback was attempted.
    #[error("non-retryable failure: {0}")]
    #[diagnostic(
        code(fableforge::gateway::non_retryable),
        help("Check API keys and request parameters; fallback is deliberately skipped here.")
    )]
    NonRetryable(#[source] ProviderError),

    /// Every candidate provider failed with retryable errors.
    #[error("all providers failed after {attempts} attempt(s); last: {last}")]
    #[diagnostic(code(fableforge::gateway::all_failed))]
    AllProvidersFailed {
        attempts: usize,
        #[source]
        last: ProviderError,
    },
}

/// Router + fallback + cache + rate limit around a set of providers.
pub struct LlmGateway {
    settings: Arc<Settings>,
    providers: RwLock<FxHashMap<String, Arc<dyn LlmProvider>>>,
    router: Router,
    fallback: FallbackManager,
    cache: RequestCache,
    rate_limiter: RateLimiter,
    semaphores: Mutex<FxHashMap<String, Arc<Semaphore>>>,
    logger: RwLock<Option<Arc<GenerationLogger>>>,
}

impl LlmGateway {
    /// Build a gateway with no providers registered. Tests and embedders
    /// register providers explicitly; [`LlmGateway::from_settings`] wires
    /// up the configured HTTP back-ends.
    #[must_use]
    pub fn new(settings: Arc<Settings>) -> Self {
        let router = Router::new(&settings.primary_provider, &settings.fallback_providers);
        let cache = RequestCache::new(settings.cache_enabled, settings.cache_ttl, Some(2048));
        let rate_limiter = RateLimiter::new(settings.rate_limit_spacing);
        Self {
            settings,
            providers: RwLock::new(FxHashMap::default()),
            router,
            fallback: FallbackManager::new(),
            cache,
            rate_limiter,
            semaphores: Mutex::new(FxHashMap::default()),
            logger: RwLock::new(None),
        }
    }

    /// Build a gateway and register every provider the settings describe.
    /// Providers that fail to construct (missing key, missing URL) are
    /// skipped with a warning and marked unavailable for routing.
    #[must_use]
    pub fn from_settings(settings: Arc<Settings>) -> Self {
        let gateway = Self::new(Arc::clone(&settings));

        if let Some(cfg) = settings.provider("openai") {
            match OpenAiProvider::new(cfg) {
                Ok(p) => gateway.register_existing("openai", Arc::new(p)),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping openai provider");
                    gateway.router.set_availability("openai", false);
                }
            }
        }
        if let Some(cfg) = settings.provider("ollama") {
            match OllamaProvider::new(cfg) {
                Ok(p) => gateway.register_existing("ollama", Arc::new(p)),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping ollama provider");
                    gateway.router.set_availability("ollama", false);
                }
            }
        }
        if let Some(cfg) = settings.provider("custom") {
            match CustomProvider::new(cfg) {
                Ok(p) => gateway.register_existing("custom", Arc::new(p)),
                Err(e) => {
                    tracing::debug!(error = %e, "custom provider not configured");
                    gateway.router.set_availability("custom", false);
                }
            }
        }

        gateway
    }

    fn register_existing(&self, name: &str, provider: Arc<dyn LlmProvider>) {
        self.providers.write().insert(name.to_string(), provider);
    }

    /// Probe every registered provider and update its routing
    /// availability. Useful at startup and from health endpoints.
    pub async fn refresh_availability(&self) {
        let providers: Vec<Arc<dyn LlmProvider>> =
            self.providers.read().values().cloned().collect();
        for provider in providers {
            let available = provider.health_check().await;
            self.router.set_availability(provider.name(), available);
            tracing::debug!(provider = provider.name(), available, "availability probe");
        }
    }

    /// Register a provider together with its routing capability. This is
    /// the injection point for mock providers in tests.
    pub fn register_provider(
        &self,
        provider: Arc<dyn LlmProvider>,
        capability: ProviderCapability,
    ) {
        let name = provider.name().to_string();
        self.router.set_capability(name.clone(), capability);
        self.providers.write().insert(name, provider);
    }

    /// Attach the session logger that future calls with [`LogMeta`] append to.
    pub fn attach_logger(&self, logger: Arc<GenerationLogger>) {
        *self.logger.write() = Some(logger);
    }

    /// Detach the session logger.
    pub fn detach_logger(&self) {
        *self.logger.write() = None;
    }

    /// The router, for health inspection and capability overrides.
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// The circuit-breaker state, for health endpoints and tests.
    #[must_use]
    pub fn fallback_manager(&self) -> &FallbackManager {
        &self.fallback
    }

    fn semaphore_for(&self, provider: &str) -> Arc<Semaphore> {
        let mut semaphores = self.semaphores.lock();
        Arc::clone(semaphores.entry(provider.to_string()).or_insert_with(|| {
            Arc::new(Semaphore::new(self.settings.max_concurrent_requests.max(1)))
        }))
    }

    fn provider_timeout(&self, provider: &str) -> std::time::Duration {
        self.settings
            .provider(provider)
            .map_or(self.settings.request_timeout, |p| p.timeout)
    }

    /// Issue one generation call.
    ///
    /// Sequence: cache lookup → routing → rate-limit gate → concurrency
    /// slot → timed provider call → on retryable failure, one fallback
    /// provider with back-off capped at five seconds → outcome recording,
    /// caching, and session-log append.
    #[instrument(skip_all, fields(task = %request.task))]
    pub async fn generate(&self, request: GenerateRequest) -> Result<String, GatewayError> {
        let fingerprint = RequestCache::fingerprint(
            &request.prompt,
            request.task,
            request.max_tokens,
            request.temperature,
        );
        if request.use_cache {
            if let Some(hit) = self.cache.get(&fingerprint) {
                tracing::debug!(task = %request.task, "cache hit");
                return Ok(hit);
            }
        }

        let preferred = request
            .preferred_provider
            .clone()
            .unwrap_or_else(|| self.settings.primary_provider.clone());
        let selected = self.router.select(
            request.task,
            request.strategy,
            request.max_tokens,
            &[],
            Some(preferred.as_str()),
        )?;

        let mut candidates = vec![selected.clone()];
        if let Some(fb) = self
            .router
            .fallback_for(&selected, request.task, request.max_tokens)
        {
            candidates.push(fb);
        }

        let mut attempts = 0usize;
        let mut last_error: Option<ProviderError> = None;

        for (i, name) in candidates.iter().enumerate() {
            let provider = {
                let providers = self.providers.read();
                providers.get(name).cloned()
            };
            let Some(provider) = provider else {
                tracing::warn!(provider = %name, "selected provider not registered");
                continue;
            };
            if !self.fallback.is_healthy(name) {
                tracing::warn!(provider = %name, "skipping unhealthy provider");
                continue;
            }

            attempts += 1;
            match self.call_provider(&provider, name, &request).await {
                Ok(text) => {
                    if request.use_cache {
                        self.cache
                            .set(fingerprint.clone(), text.clone(), request.task);
                    }
                    return Ok(text);
                }
                Err(err) => {
                    if !self.fallback.should_fallback(err.kind) {
                        return Err(GatewayError::NonRetryable(err));
                    }
                    self.fallback.record_failure(name, err.kind);
                    let has_more = i + 1 < candidates.len();
                    if has_more {
                        let delay = self
                            .fallback
                            .retry_delay(name, err.kind)
                            .min(FALLBACK_DELAY_CAP);
                        tracing::warn!(
                            provider = %name,
                            kind = %err.kind,
                            delay_ms = delay.as_millis() as u64,
                            "provider failed, falling back"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_error = Some(err);
                }
            }
        }

        match last_error {
            Some(last) => Err(GatewayError::AllProvidersFailed { attempts, last }),
            None => Err(GatewayError::Routing(RouterError::NoProviderAvailable {
                task: request.task,
            })),
        }
    }

    async fn call_provider(
        &self,
        provider: &Arc<dyn LlmProvider>,
        name: &str,
        request: &GenerateRequest,
    ) -> Result<String, ProviderError> {
        // The gate comes before the slot so spacing holds even when the
        // provider's semaphore is contended.
        self.rate_limiter.acquire().await;
        let semaphore = self.semaphore_for(name);
        let _permit = semaphore
            .acquire()
            .await
            .map_err(|_| ProviderError::new(name, FailureKind::Unknown, "semaphore closed"))?;

        let started = Instant::now();
        let completion = CompletionRequest {
            prompt: request.prompt.clone(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };
        let outcome =
            tokio::time::timeout(self.provider_timeout(name), provider.generate(completion)).await;
        let elapsed = started.elapsed();

        let result = match outcome {
            Ok(result) => result,
            Err(_) => Err(ProviderError::new(
                name,
                FailureKind::Timeout,
                format!("call exceeded {:?}", self.provider_timeout(name)),
            )),
        };

        match result {
            Ok(response) => {
                self.router
                    .record_outcome(name, true, elapsed.as_secs_f64());
                self.fallback.record_success(name);
                tracing::info!(
                    provider = %name,
                    task = %request.task,
                    elapsed_ms = elapsed.as_millis() as u64,
                    response_chars = response.text.len(),
                    "generation succeeded"
                );
                self.append_log(name, request, &response, elapsed);
                Ok(response.text)
            }
            Err(err) => {
                self.router
                    .record_outcome(name, false, elapsed.as_secs_f64());
                Err(err)
            }
        }
    }

    fn append_log(
        &self,
        provider: &str,
        request: &GenerateRequest,
        response: &CompletionResponse,
        elapsed: std::time::Duration,
    ) {
        let Some(meta) = &request.log else {
            return;
        };
        let logger = self.logger.read().clone();
        let Some(logger) = logger else {
            return;
        };
        let entry = LogEntry::new(&meta.step_type, &meta.step_name)
            .with_exchange(&request.prompt, &response.text)
            .with_model_info(serde_json::json!({
                "provider": provider,
                "model": response.model,
                "task_type": request.task.as_str(),
                "max_tokens": request.max_tokens,
                "temperature": request.temperature,
            }))
            .with_duration_ms(elapsed.as_millis() as u64)
            .with_token_usage(response.prompt_tokens, response.completion_tokens);
        if let Err(e) = logger.append(entry) {
            tracing::warn!(error = %e, "failed to append session log entry");
        }
    }

    /// Run independent prompts concurrently with a bounded degree of
    /// parallelism (half the configured limit by default), preserving
    /// input order in the results.
    ///
    /// Chapter generation for a single manuscript must never go through
    /// here; its ordering contract is sequential by design.
    pub async fn generate_batch(
        &self,
        prompts: Vec<String>,
        task: TaskType,
        max_concurrent: Option<usize>,
    ) -> Vec<Result<String, GatewayError>> {
        use futures_util::StreamExt;

        let limit = max_concurrent
            .unwrap_or_else(|| (self.settings.max_concurrent_requests / 2).max(1))
            .max(1);
        futures_util::stream::iter(prompts.into_iter().map(|prompt| {
            let request = GenerateRequest::new(prompt, task);
            async move { self.generate(request).await }
        }))
        .buffered(limit)
        .collect()
        .await
    }
}
