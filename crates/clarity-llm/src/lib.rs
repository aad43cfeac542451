//! Load a local GGUF model once and run bounded, non-streaming generations
//! against it.
//!
//! ```no_run
//! use clarity_llm::LlamaBridge;
//!
//! let mut bridge = LlamaBridge::new("models/model.gguf")?;
//! let text = bridge.generate("Hello", 5, 0.0)?;
//! println!("{text}");
//! # Ok::<(), clarity_llm::BridgeError>(())
//! ```

pub mod bridge;
pub mod llm;

pub use bridge::LlamaBridge;
pub use clarity_core::{BridgeError, BridgeResult, ErrorKind, FailureReport, ModelInfo};
pub use llm::{AsyncBridge, LlamaCppRuntime};
