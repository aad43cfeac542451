pub mod async_backend;
pub mod backend;

pub use async_backend::AsyncBridge;
pub use backend::{LlamaCppRuntime, LlamaHandle};
