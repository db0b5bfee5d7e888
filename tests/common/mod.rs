pub mod providers;

pub use providers::*;

use std::sync::Arc;

use fableforge::config::Settings;
use fableforge::gateway::router::ALL_TASKS;
use fableforge::gateway::{LlmGateway, ProviderCapability};

/// Capability record that supports every task, at a given priority.
#[allow(dead_code)]
pub fn capability(priority: u8) -> ProviderCapability {
    ProviderCapability {
        quality_score: 8.0,
        speed_score: 8.0,
        reliability_score: 8.0,
        cost_score: 8.0,
        supported_tasks: ALL_TASKS.to_vec(),
        max_tokens: 128_000,
        available: true,
        priority,
    }
}

/// Gateway over test settings (no rate-limit spacing) with the given
/// providers registered at priorities 1, 2, ...
#[allow(dead_code)]
pub fn gateway_with_providers<P: fableforge::gateway::LlmProvider + 'static>(
    settings: Settings,
    providers: Vec<Arc<P>>,
) -> Arc<LlmGateway> {
    let mut settings = settings;
    if let Some(first) = providers.first() {
        settings.primary_provider = first.name().to_string();
        settings.fallback_providers = providers
            .iter()
            .skip(1)
            .map(|p| p.name().to_string())
            .collect();
    }
    let gateway = Arc::new(LlmGateway::new(Arc::new(settings)));
    for (i, provider) in providers.into_iter().enumerate() {
        gateway.register_provider(provider, capability(i as u8 + 1));
    }
    gateway
}
