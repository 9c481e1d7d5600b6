//! Capability-aware backend selection.
//!
//! The router is built once from credentials and configuration and shared
//! read-only through application state.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::config::ProviderUrls;
use super::providers::{
    AnthropicBackend, CohereBackend, GeminiBackend, ModelBackend, OpenAiCompatibleBackend,
    Provider,
};
use crate::models::prompt::Capability;

const TEXT_PREFERENCE: &[(Provider, &str)] = &[
    (Provider::Cohere, "command-r"),
    (Provider::Google, "gemini-1.5-pro-latest"),
    (Provider::Mistral, "mistral-large-latest"),
    (Provider::OpenAi, "gpt-4o-mini"),
    (Provider::Anthropic, "claude-3-opus-20240229"),
];

const VISION_PREFERENCE: &[(Provider, &str)] = &[
    (Provider::OpenAi, "gpt-4o"),
    (Provider::Anthropic, "claude-3-5-sonnet-latest"),
    (Provider::Google, "gemini-1.5-pro-latest"),
];

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("no provider credentials available for {0} generation")]
    NoProviderAvailable(&'static str),
}

/// API keys per provider, absent when the variable is unset or empty.
#[derive(Debug, Clone, Default)]
pub struct ProviderCredentials {
    keys: HashMap<Provider, String>,
}

impl ProviderCredentials {
    pub fn from_env() -> Self {
        let mut credentials = Self::default();
        for provider in [
            Provider::Cohere,
            Provider::Google,
            Provider::Mistral,
            Provider::OpenAi,
            Provider::Anthropic,
        ] {
            if let Ok(key) = std::env::var(provider.credential_env()) {
                credentials = credentials.with(provider, key);
            }
        }
        credentials
    }

    pub fn with(mut self, provider: Provider, key: impl Into<String>) -> Self {
        let key = key.into();
        if !key.trim().is_empty() {
            self.keys.insert(provider, key);
        }
        self
    }

    pub fn get(&self, provider: Provider) -> Option<&str> {
        self.keys.get(&provider).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendChoice {
    pub provider: Provider,
    pub model: &'static str,
}

pub struct ModelRouter {
    credentials: ProviderCredentials,
    urls: ProviderUrls,
    client: reqwest::Client,
}

impl ModelRouter {
    pub fn new(credentials: ProviderCredentials, urls: ProviderUrls) -> Self {
        Self {
            credentials,
            urls,
            client: reqwest::Client::new(),
        }
    }

    /// First provider in the capability's preference order whose credential
    /// is present. There is no fallback across capabilities.
    pub fn resolve(&self, capability: Capability) -> Result<BackendChoice, RouterError> {
        let order = match capability {
            Capability::Text => TEXT_PREFERENCE,
            Capability::Vision => VISION_PREFERENCE,
        };

        order
            .iter()
            .find(|(provider, _)| self.credentials.get(*provider).is_some())
            .map(|&(provider, model)| BackendChoice { provider, model })
            .ok_or(RouterError::NoProviderAvailable(capability.as_str()))
    }

    pub fn select(&self, capability: Capability) -> Result<Arc<dyn ModelBackend>, RouterError> {
        let choice = self.resolve(capability)?;
        debug!(
            capability = capability.as_str(),
            provider = %choice.provider,
            model = choice.model,
            "selected model backend"
        );
        Ok(self.build(choice))
    }

    fn build(&self, choice: BackendChoice) -> Arc<dyn ModelBackend> {
        let key = self.credentials.get(choice.provider).unwrap_or_default();
        let base_url = self.base_url(choice.provider);
        let client = self.client.clone();

        match choice.provider {
            Provider::OpenAi | Provider::Mistral => Arc::new(OpenAiCompatibleBackend::new(
                choice.provider,
                choice.model,
                base_url,
                key,
                client,
            )),
            Provider::Anthropic => {
                Arc::new(AnthropicBackend::new(choice.model, base_url, key, client))
            },
            Provider::Google => Arc::new(GeminiBackend::new(choice.model, base_url, key, client)),
            Provider::Cohere => Arc::new(CohereBackend::new(choice.model, base_url, key, client)),
        }
    }

    fn base_url(&self, provider: Provider) -> String {
        let configured = match provider {
            Provider::Cohere => &self.urls.cohere_base_url,
            Provider::Google => &self.urls.google_base_url,
            Provider::Mistral => &self.urls.mistral_base_url,
            Provider::OpenAi => &self.urls.openai_base_url,
            Provider::Anthropic => &self.urls.anthropic_base_url,
        };

        configured
            .clone()
            .unwrap_or_else(|| provider.default_base_url().to_string())
    }
}
