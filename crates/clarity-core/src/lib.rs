//! Configuration, error taxonomy, request validation, and the model runtime
//! contract shared by the Clarity bridge crates.

pub mod config;
pub mod error;
pub mod gguf;
pub mod interfaces;
pub mod lifecycle;
pub mod request;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use config::{BridgeConfig, ModelConfig, SamplingConfig};
pub use error::{BridgeError, BridgeResult, ErrorKind, FailureReport, RuntimeError};
pub use gguf::{GgufHeader, ModelInfo};
pub use interfaces::{ModelRuntime, TextGenerator};
pub use request::{GenerationRequest, SamplingLimits, ValidatedRequest};
