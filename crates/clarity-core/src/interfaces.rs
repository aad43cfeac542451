//! Contracts between the bridge and the engines it drives.

use std::path::Path;

use async_trait::async_trait;

use crate::error::{BridgeResult, RuntimeError};
use crate::gguf::ModelInfo;
use crate::request::{GenerationRequest, ValidatedRequest};

/// The engine that loads weights, tokenizes, runs inference, and samples.
///
/// The runtime itself holds only settings; all model state lives in the
/// `Model` handle it returns, which the caller owns exclusively and drops to
/// release memory.
pub trait ModelRuntime {
    type Model: Send + 'static;

    /// Load the model at `path`. Called once per handle.
    fn load(&self, path: &Path) -> Result<Self::Model, RuntimeError>;

    /// Generate at most `request.max_tokens` tokens, stopping early at the
    /// model's end-of-generation token. Must not carry state between calls.
    fn generate(
        &self,
        model: &mut Self::Model,
        request: &ValidatedRequest<'_>,
    ) -> Result<String, RuntimeError>;

    fn describe(&self, model: &Self::Model) -> ModelInfo;
}

/// Async text generation over an already loaded model.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> BridgeResult<String>;
}
