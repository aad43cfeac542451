//! Deterministic in-memory ModelRuntime for testing.
//!
//! Loading still probes the GGUF header of a real file, so path and format
//! errors behave as they do with a real runtime. Generation emits one word
//! per token, chosen from the prompt and temperature alone.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::RuntimeError;
use crate::gguf::{self, ModelInfo};
use crate::interfaces::ModelRuntime;
use crate::request::ValidatedRequest;

const VOCAB: &[&str] = &[
    "the", "model", "runs", "locally", "and", "answers", "with", "short", "plain", "text",
    "over", "a", "quiet", "bridge", "today", "again",
];

#[derive(Default)]
struct MockState {
    loads: AtomicUsize,
    generations: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    fail_next_load: Mutex<Option<RuntimeError>>,
    fail_next_generate: Mutex<Option<RuntimeError>>,
}

/// Observes and steers a [`MockRuntime`] after it has been moved into a bridge.
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<MockState>,
}

impl MockHandle {
    pub fn load_calls(&self) -> usize {
        self.state.loads.load(Ordering::SeqCst)
    }

    pub fn generate_calls(&self) -> usize {
        self.state.generations.load(Ordering::SeqCst)
    }

    /// Most `generate` calls ever observed running at the same time.
    pub fn max_concurrent_generations(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    /// Make the next `load` fail with `err` after the header probe passes.
    pub fn fail_next_load(&self, err: RuntimeError) {
        *self.state.fail_next_load.lock().unwrap() = Some(err);
    }

    pub fn fail_next_generate(&self, err: RuntimeError) {
        *self.state.fail_next_generate.lock().unwrap() = Some(err);
    }
}

pub struct MockRuntime {
    state: Arc<MockState>,
    n_ctx: u32,
    /// Time each `generate` call holds its slot, to widen overlap windows.
    generate_delay: Duration,
    /// Emit the end-of-generation signal after this many tokens.
    eos_after: Option<u32>,
}

pub struct MockModel {
    info: ModelInfo,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self {
            state: Arc::new(MockState::default()),
            n_ctx: 2048,
            generate_delay: Duration::ZERO,
            eos_after: None,
        }
    }

    pub fn with_eos_after(mut self, tokens: u32) -> Self {
        self.eos_after = Some(tokens);
        self
    }

    pub fn with_generate_delay(mut self, delay: Duration) -> Self {
        self.generate_delay = delay;
        self
    }

    pub fn with_n_ctx(mut self, n_ctx: u32) -> Self {
        self.n_ctx = n_ctx;
        self
    }

    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: self.state.clone(),
        }
    }
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts a `generate` call as in flight until dropped.
struct InFlight<'a> {
    state: &'a MockState,
}

impl<'a> InFlight<'a> {
    fn enter(state: &'a MockState) -> Self {
        let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self { state }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

fn seed_for(prompt: &str, temperature: f32) -> u64 {
    // FNV-1a over the prompt bytes, then the temperature bits.
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in prompt.bytes().chain(temperature.to_bits().to_le_bytes()) {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

impl ModelRuntime for MockRuntime {
    type Model = MockModel;

    fn load(&self, path: &Path) -> Result<MockModel, RuntimeError> {
        self.state.loads.fetch_add(1, Ordering::SeqCst);
        let (header, file_size) = gguf::probe(path)?;
        if let Some(err) = self.state.fail_next_load.lock().unwrap().take() {
            return Err(err);
        }
        Ok(MockModel {
            info: ModelInfo {
                path: path.display().to_string(),
                file_size,
                header,
                n_ctx: self.n_ctx,
            },
        })
    }

    fn generate(
        &self,
        _model: &mut MockModel,
        request: &ValidatedRequest<'_>,
    ) -> Result<String, RuntimeError> {
        self.state.generations.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight::enter(&self.state);
        if !self.generate_delay.is_zero() {
            std::thread::sleep(self.generate_delay);
        }
        if let Some(err) = self.state.fail_next_generate.lock().unwrap().take() {
            return Err(err);
        }

        // One mock token per whitespace-separated word, plus BOS.
        let prompt_tokens = request.prompt.split_whitespace().count() + 1;
        if prompt_tokens as u64 + u64::from(request.max_tokens.get()) > u64::from(self.n_ctx) {
            return Err(RuntimeError::ContextOverflow {
                prompt_tokens,
                max_tokens: request.max_tokens.get(),
                n_ctx: self.n_ctx,
            });
        }

        let budget = match self.eos_after {
            Some(eos) => eos.min(request.max_tokens.get()),
            None => request.max_tokens.get(),
        };
        let seed = seed_for(request.prompt, request.temperature);
        let mut output = String::new();
        for i in 0..u64::from(budget) {
            let idx = seed.wrapping_add(i.wrapping_mul(7)) % VOCAB.len() as u64;
            output.push(' ');
            output.push_str(VOCAB[idx as usize]);
        }
        Ok(output)
    }

    fn describe(&self, model: &MockModel) -> ModelInfo {
        model.info.clone()
    }
}

/// Count the tokens in mock output.
pub fn mock_token_count(output: &str) -> usize {
    output.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{validate, SamplingLimits};
    use std::io::Write;

    fn model_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&gguf::header_bytes(3, 4, 2)).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn generation_is_bounded_and_deterministic() {
        let file = model_file();
        let runtime = MockRuntime::new();
        let mut model = runtime.load(file.path()).unwrap();
        let limits = SamplingLimits::default();
        let req = validate("Hello", 5, 0.0, &limits).unwrap();

        let a = runtime.generate(&mut model, &req).unwrap();
        let b = runtime.generate(&mut model, &req).unwrap();
        assert_eq!(a, b);
        assert_eq!(mock_token_count(&a), 5);
        assert_eq!(runtime.handle().generate_calls(), 2);
    }

    #[test]
    fn eos_stops_before_budget() {
        let file = model_file();
        let runtime = MockRuntime::new().with_eos_after(2);
        let mut model = runtime.load(file.path()).unwrap();
        let req = validate("Hello", 10, 0.0, &SamplingLimits::default()).unwrap();
        let out = runtime.generate(&mut model, &req).unwrap();
        assert_eq!(mock_token_count(&out), 2);
    }

    #[test]
    fn injected_failure_fires_once() {
        let file = model_file();
        let runtime = MockRuntime::new();
        let handle = runtime.handle();
        let mut model = runtime.load(file.path()).unwrap();
        let req = validate("Hi", 1, 0.0, &SamplingLimits::default()).unwrap();

        handle.fail_next_generate(RuntimeError::KvCacheFull);
        assert!(runtime.generate(&mut model, &req).is_err());
        assert!(runtime.generate(&mut model, &req).is_ok());
    }

    #[test]
    fn overlapping_calls_are_counted() {
        let file = model_file();
        let runtime = MockRuntime::new().with_generate_delay(Duration::from_millis(50));
        let handle = runtime.handle();
        let mut first = runtime.load(file.path()).unwrap();
        let mut second = runtime.load(file.path()).unwrap();
        let req = validate("Hi", 2, 0.0, &SamplingLimits::default()).unwrap();
        let barrier = std::sync::Barrier::new(2);

        std::thread::scope(|s| {
            s.spawn(|| {
                barrier.wait();
                runtime.generate(&mut first, &req).unwrap();
            });
            s.spawn(|| {
                barrier.wait();
                runtime.generate(&mut second, &req).unwrap();
            });
        });

        assert_eq!(handle.max_concurrent_generations(), 2);
    }
}
