//! Provider Registry: maps an API identifier to a provider instance.
//!
//! Design Note §9 flags the source's registry as effectively process-global.
//! Here it's an explicit handle the agent loop receives by reference —
//! nothing prevents a host from also stashing one in a `OnceLock` if it
//! wants process-wide state, but the type itself doesn't assume that.

use super::{anthropic::AnthropicProvider, openai_chat::OpenAIChatProvider, openai_responses::OpenAIResponsesProvider, Provider};
use crate::model::Api;
use std::collections::HashMap;
use std::sync::Arc;

/// Write-once-then-read-only map from [`Api`] to a boxed [`Provider`].
#[derive(Clone, Default)]
pub struct Registry {
    providers: HashMap<Api, Arc<dyn Provider>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the three built-in adapters pre-registered.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register(Arc::new(AnthropicProvider::new()));
        reg.register(Arc::new(OpenAIChatProvider::new()));
        reg.register(Arc::new(OpenAIResponsesProvider::new()));
        reg
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.api(), provider);
    }

    pub fn get(&self, api: Api) -> Option<Arc<dyn Provider>> {
        self.providers.get(&api).cloned()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("apis", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_cover_all_three_apis() {
        let reg = Registry::with_builtins();
        assert!(reg.get(Api::AnthropicMessages).is_some());
        assert!(reg.get(Api::OpenAIChat).is_some());
        assert!(reg.get(Api::OpenAIResponses).is_some());
    }

    #[test]
    fn empty_registry_returns_none() {
        let reg = Registry::new();
        assert!(reg.get(Api::AnthropicMessages).is_none());
    }
}
