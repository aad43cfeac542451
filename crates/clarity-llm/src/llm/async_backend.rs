use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use clarity_core::{
    BridgeConfig, BridgeError, BridgeResult, GenerationRequest, ModelInfo, ModelRuntime,
    SamplingLimits, TextGenerator,
};

use super::backend::LlamaCppRuntime;
use crate::bridge::LlamaBridge;

/// Async wrapper around [`LlamaBridge`] using `spawn_blocking`.
///
/// Loading and generation block for seconds, so both run on the blocking
/// pool. The bridge sits behind a mutex: concurrent callers are served one
/// after another, never at the same time on the same model.
pub struct AsyncBridge<R: ModelRuntime = LlamaCppRuntime> {
    inner: Arc<Mutex<LlamaBridge<R>>>,
    // Fixed at load; read without waiting on an in-flight generation.
    info: Arc<ModelInfo>,
}

impl<R: ModelRuntime> Clone for AsyncBridge<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            info: self.info.clone(),
        }
    }
}

fn join_error(e: tokio::task::JoinError) -> BridgeError {
    BridgeError::Unknown(format!("blocking task failed: {e}"))
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> BridgeError {
    BridgeError::Unknown("bridge lock poisoned by a panicked generation".into())
}

impl AsyncBridge<LlamaCppRuntime> {
    pub async fn open(path: impl Into<PathBuf>) -> BridgeResult<Self> {
        Self::load(LlamaCppRuntime::default(), path, SamplingLimits::default()).await
    }

    pub async fn from_config(config: &BridgeConfig) -> BridgeResult<Self> {
        let config = config.clone();
        tokio::task::spawn_blocking(move || LlamaBridge::from_config(&config))
            .await
            .map_err(join_error)?
            .map(Self::new)
    }
}

impl<R> AsyncBridge<R>
where
    R: ModelRuntime + Send + 'static,
{
    pub fn new(bridge: LlamaBridge<R>) -> Self {
        let info = Arc::new(bridge.model_info());
        Self {
            inner: Arc::new(Mutex::new(bridge)),
            info,
        }
    }

    pub async fn load(
        runtime: R,
        path: impl Into<PathBuf>,
        limits: SamplingLimits,
    ) -> BridgeResult<Self> {
        let path = path.into();
        tokio::task::spawn_blocking(move || LlamaBridge::with_runtime(runtime, &path, limits))
            .await
            .map_err(join_error)?
            .map(Self::new)
    }

    pub async fn generate_text(
        &self,
        prompt: &str,
        max_tokens: i32,
        temperature: f32,
    ) -> BridgeResult<String> {
        self.generate(GenerationRequest::new(prompt, max_tokens, temperature))
            .await
    }

    pub fn model_info(&self) -> &ModelInfo {
        &self.info
    }
}

#[async_trait]
impl<R> TextGenerator for AsyncBridge<R>
where
    R: ModelRuntime + Send + 'static,
{
    async fn generate(&self, request: GenerationRequest) -> BridgeResult<String> {
        let inner = self.inner.clone();

        tokio::task::spawn_blocking(move || {
            let mut guard = inner.lock().map_err(poisoned)?;
            guard.generate_request(&request)
        })
        .await
        .map_err(join_error)?
    }
}
