use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use replay_core::{ChatHistory, GenerativeModel, Modality, ModelParams, ReplayError};

/// A model that replays a fixed script of responses, one per call, and
/// errors once the script is exhausted.
///
/// Because exhaustion is an error, tests can prove a call was served from
/// the cache simply by making it after the script has run out.
pub struct ScriptedModel {
    model_id: String,
    modality: Modality,
    system_prompt: Option<String>,
    script: Mutex<VecDeque<Vec<String>>>,
}

impl ScriptedModel {
    pub fn new(script: Vec<Vec<String>>) -> Self {
        Self::with_model_id("scripted", script)
    }

    pub fn with_model_id(model_id: impl Into<String>, script: Vec<Vec<String>>) -> Self {
        Self {
            model_id: model_id.into(),
            modality: Modality::Chat,
            system_prompt: None,
            script: Mutex::new(script.into()),
        }
    }

    /// Convenience for single-response scripts.
    pub fn from_texts(texts: Vec<&str>) -> Self {
        Self::new(texts.into_iter().map(|t| vec![t.to_string()]).collect())
    }

    pub fn with_modality(mut self, modality: Modality) -> Self {
        self.modality = modality;
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    /// Responses left in the script.
    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl GenerativeModel for ScriptedModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn modality(&self) -> Modality {
        self.modality
    }

    fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    async fn generate(
        &self,
        _message: &str,
        _history: Option<&ChatHistory>,
        _params: &ModelParams,
    ) -> Result<Vec<String>, ReplayError> {
        self.script
            .lock()
            .map_err(|e| ReplayError::Model(format!("lock: {e}")))?
            .pop_front()
            .ok_or_else(|| ReplayError::Model("scripted responses exhausted".to_string()))
    }
}
