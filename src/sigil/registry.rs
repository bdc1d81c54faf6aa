//! Registry and factory for `Model`s: construction and caching from configuration, plus a
//! provider map callers populate at start-up.
//!
//! An `Arc<RwLock<HashMap<...>>>`-guarded map with builder-style registration.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::sigil::error::SigilError;
use crate::sigil::model::Model;

/// A provider's constructor: given a bare model name (the segment after the colon in
/// `"provider:model"`), builds a `Model` instance for it.
pub type ModelFactory = Arc<dyn Fn(&str) -> Result<Arc<dyn Model>, SigilError> + Send + Sync>;

/// Registers provider factories and caches constructed `Model` instances by `"provider:model"`
/// key. Safe under concurrent callers: every operation holds the registry's readers-writer lock
/// only for the duration of the map access.
pub struct ModelRegistry {
    providers: RwLock<HashMap<String, ModelFactory>>,
    cache: RwLock<HashMap<String, Arc<dyn Model>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Register a provider's factory under a canonicalized (lowercased) name. Duplicate
    /// registration fails rather than silently replacing the existing factory.
    pub async fn register_provider(
        &self,
        name: impl Into<String>,
        factory: ModelFactory,
    ) -> Result<(), SigilError> {
        let name = name.into().to_lowercase();
        let mut providers = self.providers.write().await;
        if providers.contains_key(&name) {
            return Err(SigilError::config(
                "register-provider",
                format!("provider '{}' is already registered", name),
            ));
        }
        providers.insert(name, factory);
        Ok(())
    }

    pub async fn get_provider(&self, name: &str) -> Option<ModelFactory> {
        let name = name.to_lowercase();
        self.providers.read().await.get(&name).cloned()
    }

    pub async fn list_providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn list_models(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.cache.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// The colon must split `spec` into two non-empty segments. `""`, `":"`, `"x:"`, `":y"` all
    /// fail; `"a:b"` returns `("a", "b")`.
    pub fn parse_model_string(spec: &str) -> Result<(String, String), SigilError> {
        let Some((provider, model)) = spec.split_once(':') else {
            return Err(SigilError::input(
                "parse-model-string",
                format!("'{}' is not of the form \"provider:model\"", spec),
            ));
        };
        if provider.is_empty() || model.is_empty() {
            return Err(SigilError::input(
                "parse-model-string",
                format!("'{}' has an empty provider or model segment", spec),
            ));
        }
        Ok((provider.to_string(), model.to_string()))
    }

    /// Resolve `"provider:model"` to a cached `Model` instance, constructing and caching it on
    /// first use. Repeated calls with the same spec return the same instance (referentially
    /// transparent).
    pub async fn create_model(&self, spec: &str) -> Result<Arc<dyn Model>, SigilError> {
        let (provider, model) = Self::parse_model_string(spec)?;
        self.get_model(&provider, &model).await
    }

    pub async fn get_model(
        &self,
        provider: &str,
        model: &str,
    ) -> Result<Arc<dyn Model>, SigilError> {
        let provider = provider.to_lowercase();
        let key = format!("{}:{}", provider, model);

        if let Some(existing) = self.cache.read().await.get(&key) {
            return Ok(existing.clone());
        }

        let factory = self.get_provider(&provider).await.ok_or_else(|| {
            SigilError::config("get-model", format!("no provider registered as '{}'", provider))
        })?;

        // Re-check under the write lock: a concurrent caller may have constructed this model
        // while we were awaiting the factory lookup above.
        let mut cache = self.cache.write().await;
        if let Some(existing) = cache.get(&key) {
            return Ok(existing.clone());
        }
        let instance = factory(model)?;
        cache.insert(key, instance.clone());
        Ok(instance)
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sigil::model::{ModelCapabilities, PromptInput, PromptOutput};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubModel {
        name: String,
    }

    #[async_trait]
    impl Model for StubModel {
        async fn run_prompt(&self, _input: PromptInput) -> Result<PromptOutput, SigilError> {
            Ok(PromptOutput {
                text: "stub".into(),
                tokens_used: 1,
                model: self.name.clone(),
                metadata: Default::default(),
            })
        }

        fn capabilities(&self) -> ModelCapabilities {
            ModelCapabilities {
                max_tokens: 1,
                supports_images: false,
                supports_tools: false,
                supports_streaming: false,
            }
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    #[test]
    fn parse_model_string_boundary_cases() {
        assert!(ModelRegistry::parse_model_string("").is_err());
        assert!(ModelRegistry::parse_model_string(":").is_err());
        assert!(ModelRegistry::parse_model_string("x:").is_err());
        assert!(ModelRegistry::parse_model_string(":y").is_err());
        assert_eq!(
            ModelRegistry::parse_model_string("a:b").unwrap(),
            ("a".to_string(), "b".to_string())
        );
    }

    #[tokio::test]
    async fn duplicate_provider_registration_fails() {
        let registry = ModelRegistry::new();
        let factory: ModelFactory = Arc::new(|name| {
            Ok(Arc::new(StubModel {
                name: name.to_string(),
            }) as Arc<dyn Model>)
        });
        registry
            .register_provider("stub", factory.clone())
            .await
            .unwrap();
        assert!(registry.register_provider("stub", factory).await.is_err());
    }

    #[tokio::test]
    async fn create_model_is_referentially_transparent() {
        let registry = ModelRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let factory: ModelFactory = Arc::new(move |name| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(StubModel {
                name: name.to_string(),
            }) as Arc<dyn Model>)
        });
        registry.register_provider("stub", factory).await.unwrap();

        let a = registry.create_model("stub:one").await.unwrap();
        let b = registry.create_model("stub:one").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn get_model_on_unregistered_provider_fails() {
        let registry = ModelRegistry::new();
        assert!(registry.get_model("nope", "x").await.is_err());
    }

    #[tokio::test]
    async fn provider_names_are_canonicalized_to_lowercase() {
        let registry = ModelRegistry::new();
        let factory: ModelFactory = Arc::new(|name| {
            Ok(Arc::new(StubModel {
                name: name.to_string(),
            }) as Arc<dyn Model>)
        });
        registry.register_provider("OpenAI", factory).await.unwrap();
        assert!(registry.create_model("openai:gpt-4o").await.is_ok());
        assert_eq!(registry.list_providers().await, vec!["openai".to_string()]);
    }
}
