#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use fableforge::gateway::{
    CompletionRequest, CompletionResponse, FailureKind, LlmProvider, ProviderError,
};

/// Provider that replays a fixed script of outcomes, recording every prompt
/// it receives.
pub struct ScriptedProvider {
    name: String,
    script: Mutex<VecDeque<Result<String, (FailureKind, String)>>>,
    prompts: Mutex<Vec<String>>,
    /// Response used once the script is exhausted.
    fallthrough: Option<String>,
}

impl ScriptedProvider {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
            fallthrough: None,
        })
    }

    pub fn always(name: &str, response: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
            fallthrough: Some(response.to_string()),
        })
    }

    pub fn push_ok(self: &Arc<Self>, response: &str) -> Arc<Self> {
        self.script.lock().push_back(Ok(response.to_string()));
        Arc::clone(self)
    }

    pub fn push_err(self: &Arc<Self>, kind: FailureKind, message: &str) -> Arc<Self> {
        self.script
            .lock()
            .push_back(Err((kind, message.to_string())));
        Arc::clone(self)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().len()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        self.prompts.lock().push(request.prompt.clone());
        let next = self.script.lock().pop_front();
        match next {
            Some(Ok(text)) => Ok(CompletionResponse {
                text,
                model: format!("{}-test", self.name),
                prompt_tokens: Some(10),
                completion_tokens: Some(20),
            }),
            Some(Err((kind, message))) => Err(ProviderError::new(&self.name, kind, message)),
            None => match &self.fallthrough {
                Some(text) => Ok(CompletionResponse {
                    text: text.clone(),
                    model: format!("{}-test", self.name),
                    prompt_tokens: Some(10),
                    completion_tokens: Some(20),
                }),
                None => Err(ProviderError::new(
                    &self.name,
                    FailureKind::Unknown,
                    "script exhausted",
                )),
            },
        }
    }
}

/// Provider that routes each prompt through a closure. Used to script a
/// whole pipeline run by matching on prompt content.
pub struct RoutingProvider {
    name: String,
    handler: Box<dyn Fn(&str) -> Result<String, (FailureKind, String)> + Send + Sync>,
    prompts: Mutex<Vec<String>>,
}

impl RoutingProvider {
    pub fn new<F>(name: &str, handler: F) -> Arc<Self>
    where
        F: Fn(&str) -> Result<String, (FailureKind, String)> + Send + Sync + 'static,
    {
        Arc::new(Self {
            name: name.to_string(),
            handler: Box::new(handler),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().len()
    }
}

#[async_trait]
impl LlmProvider for RoutingProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        self.prompts.lock().push(request.prompt.clone());
        match (self.handler)(&request.prompt) {
            Ok(text) => Ok(CompletionResponse {
                text,
                model: format!("{}-test", self.name),
                prompt_tokens: Some(10),
                completion_tokens: Some(20),
            }),
            Err((kind, message)) => Err(ProviderError::new(&self.name, kind, message)),
        }
    }
}
