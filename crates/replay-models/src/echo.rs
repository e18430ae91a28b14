use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use replay_core::{ChatHistory, GenerativeModel, Modality, ModelParams, ReplayError};

/// A model that echoes the message back, counting invocations.
///
/// Never exhausts, which makes it the right double for concurrency tests:
/// `calls()` tells you how many requests actually reached the model.
pub struct EchoModel {
    model_id: String,
    modality: Modality,
    calls: AtomicUsize,
}

impl EchoModel {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            modality: Modality::Chat,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_modality(mut self, modality: Modality) -> Self {
        self.modality = modality;
        self
    }

    /// How many times `generate` has been invoked.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerativeModel for EchoModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn modality(&self) -> Modality {
        self.modality
    }

    async fn generate(
        &self,
        message: &str,
        _history: Option<&ChatHistory>,
        _params: &ModelParams,
    ) -> Result<Vec<String>, ReplayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![format!("echo: {message}")])
    }
}
