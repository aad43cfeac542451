use std::num::NonZeroU32;
use std::path::Path;
use std::sync::OnceLock;

use clarity_core::config::{ModelConfig, SamplingConfig};
use clarity_core::gguf::{self, ModelInfo};
use clarity_core::{ModelRuntime, RuntimeError, ValidatedRequest};
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel};
use llama_cpp_2::sampling::LlamaSampler;
use llama_cpp_2::token::LlamaToken;
use llama_cpp_2::DecodeError;

/// Global llama.cpp backend, initialized on first load and kept until process exit.
/// llama_backend_init() is process-wide; initializing it twice or freeing it
/// while models are live crashes.
static LLAMA_BACKEND: OnceLock<Result<LlamaBackend, String>> = OnceLock::new();

fn get_or_init_backend(quiet: bool) -> Result<&'static LlamaBackend, RuntimeError> {
    let result = LLAMA_BACKEND.get_or_init(|| {
        let mut backend = LlamaBackend::init().map_err(|e| e.to_string())?;
        if quiet {
            backend.void_logs();
        }
        Ok(backend)
    });
    result
        .as_ref()
        .map_err(|e| RuntimeError::Backend(e.clone()))
}

fn decode_error(e: DecodeError) -> RuntimeError {
    match e {
        DecodeError::NoKvCacheSlot => RuntimeError::KvCacheFull,
        other => RuntimeError::Decode(format!("decode failed: {other}")),
    }
}

/// Token to condition on when the prompt tokenizes to nothing: BOS if the
/// vocabulary has one, else EOS. A missing token is -1 (LLAMA_TOKEN_NULL).
fn empty_prompt_token(bos: LlamaToken, eos: LlamaToken) -> Option<LlamaToken> {
    [bos, eos].into_iter().find(|token| token.0 >= 0)
}

/// Emit bytes still buffered in `decoder` at the end of generation. A
/// multi-byte character cut off by the token bound becomes U+FFFD.
fn finish_decoding(decoder: &mut encoding_rs::Decoder, output: &mut String) {
    if let Some(needed) = decoder.max_utf8_buffer_length(0) {
        output.reserve(needed);
    }
    let _ = decoder.decode_to_string(&[], output, true);
}

/// A loaded GGUF model plus the one inference context it is served through.
///
/// Field order matters: Rust drops fields in declaration order.
/// `ctx` must drop before `model`.
pub struct LlamaHandle {
    // SAFETY: `ctx` borrows the boxed model through a transmuted `'static`
    // lifetime. The box keeps the model at a fixed address, and `ctx` is
    // declared first so it is dropped while the model is still alive.
    ctx: LlamaContext<'static>,
    model: Box<LlamaModel>,
    info: ModelInfo,
}

// SAFETY: a handle is owned by exactly one bridge, and every access goes
// through `&mut` (or the AsyncBridge mutex). The raw llama_context pointer may
// move between threads when it is not used concurrently.
unsafe impl Send for LlamaHandle {}

/// llama.cpp model runtime.
///
/// Holds only load and sampling settings; everything allocated by llama.cpp
/// lives in the [`LlamaHandle`] returned from `load`.
#[derive(Debug, Clone)]
pub struct LlamaCppRuntime {
    n_ctx: u32,
    n_batch: u32,
    n_threads: Option<i32>,
    quiet_backend: bool,
    top_p: f32,
    seed: u32,
}

impl LlamaCppRuntime {
    pub fn new(model: &ModelConfig, sampling: &SamplingConfig) -> Self {
        Self {
            n_ctx: model.n_ctx,
            n_batch: model.n_batch.max(1),
            n_threads: model.n_threads,
            quiet_backend: model.quiet_backend,
            top_p: sampling.top_p,
            seed: sampling.seed,
        }
    }

    fn sampler(&self, request: &ValidatedRequest<'_>) -> LlamaSampler {
        if request.is_greedy() {
            LlamaSampler::greedy()
        } else {
            LlamaSampler::chain_simple([
                LlamaSampler::temp(request.temperature),
                LlamaSampler::top_p(self.top_p, 1),
                LlamaSampler::dist(self.seed),
            ])
        }
    }
}

impl Default for LlamaCppRuntime {
    fn default() -> Self {
        Self::new(&ModelConfig::default(), &SamplingConfig::default())
    }
}

impl ModelRuntime for LlamaCppRuntime {
    type Model = LlamaHandle;

    /// Probe the GGUF header, load the weights, and allocate the context once
    /// so the KV cache is not re-allocated per generate().
    fn load(&self, path: &Path) -> Result<LlamaHandle, RuntimeError> {
        let (header, file_size) = gguf::probe(path)?;
        let backend = get_or_init_backend(self.quiet_backend)?;

        let model = LlamaModel::load_from_file(backend, path, &LlamaModelParams::default())
            .map_err(|e| RuntimeError::Load(format!("{}: {e}", path.display())))?;
        let model = Box::new(model);

        let n_ctx_train = model.n_ctx_train();
        if n_ctx_train > 0 && self.n_ctx > n_ctx_train {
            tracing::warn!(
                "Context window {} exceeds the {} tokens the model was trained on",
                self.n_ctx,
                n_ctx_train
            );
        }

        let mut ctx_params = LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(self.n_ctx))
            .with_n_batch(self.n_batch);
        if let Some(n_threads) = self.n_threads {
            ctx_params = ctx_params
                .with_n_threads(n_threads)
                .with_n_threads_batch(n_threads);
        }

        // On failure `model` is dropped here, releasing the weights.
        let ctx = model
            .new_context(backend, ctx_params)
            .map_err(|e| RuntimeError::ContextAlloc(e.to_string()))?;

        // SAFETY: see `LlamaHandle`. The box is moved, not its contents.
        let ctx: LlamaContext<'static> = unsafe { std::mem::transmute(ctx) };

        let info = ModelInfo {
            path: path.display().to_string(),
            file_size,
            header,
            n_ctx: ctx.n_ctx(),
        };

        Ok(LlamaHandle { ctx, model, info })
    }

    /// Run one bounded generation. Reuses the cached context and clears its
    /// KV cache first, so nothing from an earlier call is visible.
    fn generate(
        &self,
        handle: &mut LlamaHandle,
        request: &ValidatedRequest<'_>,
    ) -> Result<String, RuntimeError> {
        // Shared access only: `ctx` holds its own shared borrow of the model.
        let model: &LlamaModel = &handle.model;
        let ctx = &mut handle.ctx;
        let max_tokens = request.max_tokens.get();

        ctx.clear_kv_cache();

        let mut tokens = model
            .str_to_token(request.prompt, AddBos::Always)
            .map_err(|e| RuntimeError::Tokenize(e.to_string()))?;
        if tokens.is_empty() {
            // Decoding needs at least one token to condition on.
            let token = empty_prompt_token(model.token_bos(), model.token_eos())
                .ok_or_else(|| {
                    RuntimeError::Tokenize(
                        "empty prompt and no BOS or EOS token in vocabulary".into(),
                    )
                })?;
            tokens.push(token);
        }

        let n_ctx = ctx.n_ctx();
        if tokens.len() as u64 + u64::from(max_tokens) > u64::from(n_ctx) {
            return Err(RuntimeError::ContextOverflow {
                prompt_tokens: tokens.len(),
                max_tokens,
                n_ctx,
            });
        }

        // Prefill in n_batch chunks; only the final prompt token needs logits.
        let n_batch = self.n_batch as usize;
        let last_index = tokens.len() - 1;
        let mut batch = LlamaBatch::new(n_batch, 1);
        for (chunk_index, chunk) in tokens.chunks(n_batch).enumerate() {
            batch.clear();
            for (offset, token) in chunk.iter().enumerate() {
                let pos = chunk_index * n_batch + offset;
                batch
                    .add(*token, pos as i32, &[0], pos == last_index)
                    .map_err(|e| RuntimeError::Decode(format!("batch add failed: {e:?}")))?;
            }
            ctx.decode(&mut batch).map_err(decode_error)?;
        }

        let mut sampler = self.sampler(request);
        let mut decoder = encoding_rs::UTF_8.new_decoder();
        let mut output = String::new();
        let mut n_cur = tokens.len() as i32;
        let mut produced = 0u32;

        loop {
            let token = sampler.sample(ctx, batch.n_tokens() - 1);
            sampler.accept(token);

            if model.is_eog_token(token) {
                break;
            }
            produced += 1;

            // Render control tokens too; a token that still cannot be turned
            // into text is dropped from the output, not fatal.
            match model.token_to_piece(token, &mut decoder, true, None) {
                Ok(piece) => output.push_str(&piece),
                Err(e) => tracing::debug!("Skipping undecodable token {}: {:?}", token.0, e),
            }

            if produced == max_tokens {
                break;
            }

            batch.clear();
            batch
                .add(token, n_cur, &[0], true)
                .map_err(|e| RuntimeError::Decode(format!("batch add failed: {e:?}")))?;
            n_cur += 1;

            ctx.decode(&mut batch).map_err(decode_error)?;
        }
        finish_decoding(&mut decoder, &mut output);

        tracing::debug!(
            "Generated {} of {} tokens from a {}-token prompt",
            produced,
            max_tokens,
            tokens.len()
        );
        Ok(output)
    }

    fn describe(&self, handle: &LlamaHandle) -> ModelInfo {
        handle.info.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clarity_core::request::{validate, SamplingLimits};

    #[test]
    fn runtime_takes_settings_from_config() {
        let model = ModelConfig {
            n_ctx: 4096,
            n_batch: 0,
            n_threads: Some(4),
            ..ModelConfig::default()
        };
        let runtime = LlamaCppRuntime::new(&model, &SamplingConfig::default());
        assert_eq!(runtime.n_ctx, 4096);
        assert_eq!(runtime.n_batch, 1, "zero batch size is raised to one");
        assert_eq!(runtime.n_threads, Some(4));
        assert_eq!(runtime.seed, 42);
    }

    #[test]
    fn missing_file_fails_before_backend_init() {
        let err = LlamaCppRuntime::default()
            .load(Path::new("/nonexistent.gguf"))
            .err()
            .unwrap();
        assert!(matches!(err, RuntimeError::Open { .. }));
    }

    #[test]
    fn kv_cache_exhaustion_is_its_own_error() {
        assert!(matches!(
            decode_error(DecodeError::NoKvCacheSlot),
            RuntimeError::KvCacheFull
        ));
        assert!(matches!(
            decode_error(DecodeError::NTokensZero),
            RuntimeError::Decode(_)
        ));
    }

    #[test]
    fn empty_prompt_prefers_bos_then_eos() {
        assert_eq!(
            empty_prompt_token(LlamaToken(1), LlamaToken(2)),
            Some(LlamaToken(1))
        );
        assert_eq!(
            empty_prompt_token(LlamaToken(-1), LlamaToken(2)),
            Some(LlamaToken(2))
        );
        assert_eq!(empty_prompt_token(LlamaToken(-1), LlamaToken(-1)), None);
    }

    #[test]
    fn truncated_character_is_flushed_as_replacement() {
        let mut decoder = encoding_rs::UTF_8.new_decoder();
        let mut output = String::with_capacity(16);
        // First byte of "é"; the second never arrives.
        let _ = decoder.decode_to_string(b"caf\xC3", &mut output, false);
        assert_eq!(output, "caf");

        finish_decoding(&mut decoder, &mut output);
        assert_eq!(output, "caf\u{FFFD}");
    }

    #[test]
    fn complete_text_is_unchanged_by_flush() {
        let mut decoder = encoding_rs::UTF_8.new_decoder();
        let mut output = String::with_capacity(16);
        let _ = decoder.decode_to_string("café".as_bytes(), &mut output, false);
        finish_decoding(&mut decoder, &mut output);
        assert_eq!(output, "café");
    }

    #[test]
    fn greedy_request_detected() {
        let limits = SamplingLimits::default();
        assert!(validate("x", 1, 0.0, &limits).unwrap().is_greedy());
        assert!(!validate("x", 1, 0.8, &limits).unwrap().is_greedy());
    }
}
