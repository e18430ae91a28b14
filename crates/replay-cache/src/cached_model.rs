use std::sync::Arc;

use async_trait::async_trait;
use replay_core::{
    CacheRequest, ChatHistory, GenerativeModel, Modality, ModelParams, PurgeFilter, ReplayError,
    ResponseCache,
};

/// Caching decorator around any [`GenerativeModel`].
///
/// On every call the decorator fingerprints the request, probes the store,
/// and only invokes the wrapped model on a miss; the result is then stored
/// and returned. Model errors propagate unchanged and are never cached.
///
/// Any number of decorators (for any modality) may share one store; entries
/// are disambiguated by model id plus parameter set.
pub struct CachedModel {
    inner: Arc<dyn GenerativeModel>,
    cache: Arc<dyn ResponseCache>,
    defaults: ModelParams,
}

impl CachedModel {
    pub fn new(inner: Arc<dyn GenerativeModel>, cache: Arc<dyn ResponseCache>) -> Self {
        Self {
            inner,
            cache,
            defaults: ModelParams::new(),
        }
    }

    /// Parameters applied to every call; call-time parameters with the same
    /// name take precedence.
    pub fn with_defaults(mut self, defaults: ModelParams) -> Self {
        self.defaults = defaults;
        self
    }

    /// Chat-style entry point: message plus optional preceding history.
    pub async fn get_response(
        &self,
        message: &str,
        history: Option<&ChatHistory>,
        params: &ModelParams,
    ) -> Result<Vec<String>, ReplayError> {
        self.get_or_generate(message, history, params).await
    }

    /// Completion-style entry point: returns the first response.
    pub async fn get_completion(
        &self,
        prompt: &str,
        params: &ModelParams,
    ) -> Result<String, ReplayError> {
        let responses = self.get_or_generate(prompt, None, params).await?;
        responses
            .into_iter()
            .next()
            .ok_or_else(|| ReplayError::Model("model returned no completions".to_string()))
    }

    /// Remove cached entries matching the filter from the underlying store.
    pub async fn clear_cache(&self, filter: &PurgeFilter) -> Result<u64, ReplayError> {
        self.cache.purge(filter).await
    }

    async fn get_or_generate(
        &self,
        message: &str,
        history: Option<&ChatHistory>,
        params: &ModelParams,
    ) -> Result<Vec<String>, ReplayError> {
        let mut merged = self.defaults.clone();
        merged.extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut request =
            CacheRequest::new(self.inner.model_id(), message).with_params(merged.clone());
        if let Some(history) = history {
            request = request.with_history(history.clone());
        }
        if let Some(system_prompt) = self.inner.system_prompt() {
            request = request.with_system_prompt(system_prompt);
        }
        let fingerprint = request.fingerprint()?;

        if let Some(entry) = self.cache.probe(&fingerprint).await? {
            tracing::debug!(
                model_id = %self.inner.model_id(),
                entry_id = entry.id,
                "cache hit"
            );
            return Ok(entry.responses);
        }

        let responses = self.inner.generate(message, history, &merged).await?;

        match self.cache.insert(&fingerprint, &responses).await {
            Ok(entry_id) => {
                tracing::debug!(
                    model_id = %self.inner.model_id(),
                    entry_id,
                    responses = responses.len(),
                    "cached new entry"
                );
                Ok(responses)
            }
            // A concurrent caller computed the same miss and won the insert;
            // the stored entry is authoritative for this key.
            Err(ReplayError::DuplicateEntry) => match self.cache.probe(&fingerprint).await? {
                Some(entry) => Ok(entry.responses),
                None => Ok(responses),
            },
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl GenerativeModel for CachedModel {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn modality(&self) -> Modality {
        self.inner.modality()
    }

    fn system_prompt(&self) -> Option<&str> {
        self.inner.system_prompt()
    }

    async fn generate(
        &self,
        message: &str,
        history: Option<&ChatHistory>,
        params: &ModelParams,
    ) -> Result<Vec<String>, ReplayError> {
        self.get_or_generate(message, history, params).await
    }
}
