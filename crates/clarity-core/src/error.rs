use std::io;

use serde::Serialize;
use thiserror::Error;

/// Stable classification of every failure the bridge can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidPath,
    UnsupportedModel,
    ResourceExhausted,
    InvalidParameter,
    TokenizationFailure,
    InferenceFailure,
    Unknown,
}

impl ErrorKind {
    /// Numeric code for embedders that forward errors across FFI or IPC.
    /// Codes are fixed once published; new kinds take new numbers.
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::InvalidPath => 1,
            ErrorKind::UnsupportedModel => 2,
            ErrorKind::ResourceExhausted => 3,
            ErrorKind::InvalidParameter => 4,
            ErrorKind::TokenizationFailure => 5,
            ErrorKind::InferenceFailure => 6,
            ErrorKind::Unknown => 99,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidPath => "invalid_path",
            ErrorKind::UnsupportedModel => "unsupported_model",
            ErrorKind::ResourceExhausted => "resource_exhausted",
            ErrorKind::InvalidParameter => "invalid_parameter",
            ErrorKind::TokenizationFailure => "tokenization_failure",
            ErrorKind::InferenceFailure => "inference_failure",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Caller mistakes (bad path, bad parameters) as opposed to
    /// model or resource problems.
    pub fn is_caller_error(self) -> bool {
        matches!(self, ErrorKind::InvalidPath | ErrorKind::InvalidParameter)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Invalid model path: {0}")]
    InvalidPath(String),

    #[error("Unsupported model: {0}")]
    UnsupportedModel(String),

    #[error("Resources exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Tokenization failed: {0}")]
    TokenizationFailure(String),

    #[error("Inference failed: {0}")]
    InferenceFailure(String),

    #[error("Model runtime error: {0}")]
    Unknown(String),
}

pub type BridgeResult<T> = Result<T, BridgeError>;

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::InvalidPath(_) => ErrorKind::InvalidPath,
            BridgeError::UnsupportedModel(_) => ErrorKind::UnsupportedModel,
            BridgeError::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            BridgeError::InvalidParameter(_) => ErrorKind::InvalidParameter,
            BridgeError::TokenizationFailure(_) => ErrorKind::TokenizationFailure,
            BridgeError::InferenceFailure(_) => ErrorKind::InferenceFailure,
            BridgeError::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// The underlying message without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            BridgeError::InvalidPath(m)
            | BridgeError::UnsupportedModel(m)
            | BridgeError::ResourceExhausted(m)
            | BridgeError::InvalidParameter(m)
            | BridgeError::TokenizationFailure(m)
            | BridgeError::InferenceFailure(m)
            | BridgeError::Unknown(m) => m,
        }
    }

    pub fn report(&self) -> FailureReport {
        FailureReport {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// Flattened, serializable form of a [`BridgeError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&BridgeError> for FailureReport {
    fn from(err: &BridgeError) -> Self {
        err.report()
    }
}

/// Failures raised by a model runtime, before classification.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("cannot open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("not a GGUF model: {0}")]
    Format(String),

    #[error("model rejected by runtime: {0}")]
    Load(String),

    #[error("runtime backend unavailable: {0}")]
    Backend(String),

    #[error("context allocation failed: {0}")]
    ContextAlloc(String),

    #[error("{0}")]
    Tokenize(String),

    #[error("prompt of {prompt_tokens} tokens plus {max_tokens} new tokens exceeds context window of {n_ctx}")]
    ContextOverflow {
        prompt_tokens: usize,
        max_tokens: u32,
        n_ctx: u32,
    },

    #[error("no KV cache slot available")]
    KvCacheFull,

    #[error("{0}")]
    Decode(String),

    #[error("{0}")]
    Other(String),
}

impl From<RuntimeError> for BridgeError {
    fn from(err: RuntimeError) -> Self {
        let message = err.to_string();
        match err {
            RuntimeError::Open { ref source, .. } if source.kind() == io::ErrorKind::OutOfMemory => {
                BridgeError::ResourceExhausted(message)
            }
            RuntimeError::Open { .. } => BridgeError::InvalidPath(message),
            RuntimeError::Format(_) | RuntimeError::Load(_) => {
                BridgeError::UnsupportedModel(message)
            }
            RuntimeError::ContextAlloc(_)
            | RuntimeError::ContextOverflow { .. }
            | RuntimeError::KvCacheFull => BridgeError::ResourceExhausted(message),
            RuntimeError::Tokenize(_) => BridgeError::TokenizationFailure(message),
            RuntimeError::Decode(_) => BridgeError::InferenceFailure(message),
            RuntimeError::Backend(_) | RuntimeError::Other(_) => BridgeError::Unknown(message),
        }
    }
}
