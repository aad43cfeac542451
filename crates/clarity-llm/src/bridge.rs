//! The model bridge: one loaded model, many independent bounded generations.

use std::path::Path;
use std::time::Instant;

use clarity_core::request;
use clarity_core::{
    BridgeConfig, BridgeError, BridgeResult, GenerationRequest, ModelInfo, ModelRuntime,
    SamplingLimits, ValidatedRequest,
};

use crate::llm::LlamaCppRuntime;

/// Owns a model runtime and the model it loaded.
///
/// A bridge exists only with a loaded model: construction either loads the
/// model or returns the error. The model is released when the bridge drops.
/// `generate` takes `&mut self`, so one bridge serves one call at a time;
/// share it across tasks through [`crate::AsyncBridge`].
pub struct LlamaBridge<R: ModelRuntime = LlamaCppRuntime> {
    // Dropped before the runtime that created it.
    model: R::Model,
    runtime: R,
    limits: SamplingLimits,
}

impl LlamaBridge<LlamaCppRuntime> {
    /// Load the model at `path` with default context and sampling settings.
    pub fn new(path: impl AsRef<Path>) -> BridgeResult<Self> {
        Self::with_runtime(LlamaCppRuntime::default(), path, SamplingLimits::default())
    }

    /// Load `config.model.path` with the configured runtime and limits.
    pub fn from_config(config: &BridgeConfig) -> BridgeResult<Self> {
        let runtime = LlamaCppRuntime::new(&config.model, &config.sampling);
        Self::with_runtime(
            runtime,
            &config.model.path,
            SamplingLimits::from(&config.sampling),
        )
    }
}

impl<R: ModelRuntime> LlamaBridge<R> {
    /// Load the model at `path` through `runtime`. The runtime is asked exactly once.
    pub fn with_runtime(
        runtime: R,
        path: impl AsRef<Path>,
        limits: SamplingLimits,
    ) -> BridgeResult<Self> {
        let path = path.as_ref();
        tracing::info!("Loading model from {}", path.display());
        let start = Instant::now();

        let model = runtime.load(path).map_err(|e| {
            let err = BridgeError::from(e);
            tracing::warn!("Model load failed ({}): {err}", err.kind());
            err
        })?;

        let info = runtime.describe(&model);
        tracing::info!(
            "Model loaded in {:.2}s: GGUF v{}, {} tensors, {} bytes, n_ctx {}",
            start.elapsed().as_secs_f64(),
            info.header.version,
            info.header.tensor_count,
            info.file_size,
            info.n_ctx
        );

        Ok(Self {
            model,
            runtime,
            limits,
        })
    }

    /// Generate a bounded continuation of `prompt`.
    ///
    /// `max_tokens` must be positive and within the bridge's limit, and
    /// `temperature` within `[0, limits.max_temperature]`; anything else is
    /// rejected with `InvalidParameter` before the runtime is called. A failed
    /// call leaves the bridge ready for the next one.
    pub fn generate(
        &mut self,
        prompt: &str,
        max_tokens: i32,
        temperature: f32,
    ) -> BridgeResult<String> {
        let request = request::validate(prompt, max_tokens, temperature, &self.limits)
            .inspect_err(|err| tracing::debug!("Rejected generation request: {err}"))?;
        self.run(&request)
    }

    pub fn generate_request(&mut self, request: &GenerationRequest) -> BridgeResult<String> {
        self.generate(&request.prompt, request.max_tokens, request.temperature)
    }

    fn run(&mut self, request: &ValidatedRequest<'_>) -> BridgeResult<String> {
        let start = Instant::now();
        match self.runtime.generate(&mut self.model, request) {
            Ok(text) => {
                tracing::debug!(
                    "Generation finished in {}ms ({} chars, max_tokens {}, temperature {})",
                    start.elapsed().as_millis(),
                    text.len(),
                    request.max_tokens,
                    request.temperature
                );
                Ok(text)
            }
            Err(e) => {
                let err = BridgeError::from(e);
                tracing::warn!("Generation failed ({}): {err}", err.kind());
                Err(err)
            }
        }
    }

    pub fn model_info(&self) -> ModelInfo {
        self.runtime.describe(&self.model)
    }

    pub fn limits(&self) -> &SamplingLimits {
        &self.limits
    }
}
