use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub sampling: SamplingConfig,
}

/// How the model file is loaded and how large its inference context is.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model_path")]
    pub path: String,
    /// Context window in tokens, shared by prompt and generated tokens.
    #[serde(default = "default_n_ctx")]
    pub n_ctx: u32,
    /// Prompt tokens decoded per batch.
    #[serde(default = "default_n_batch")]
    pub n_batch: u32,
    /// Inference threads. `None` keeps the runtime's choice.
    #[serde(default)]
    pub n_threads: Option<i32>,
    /// Silence the runtime's own stderr logging.
    #[serde(default = "default_quiet_backend")]
    pub quiet_backend: bool,
}

fn default_model_path() -> String {
    "models/model.gguf".into()
}
fn default_n_ctx() -> u32 {
    2048
}
fn default_n_batch() -> u32 {
    512
}
fn default_quiet_backend() -> bool {
    true
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: default_model_path(),
            n_ctx: default_n_ctx(),
            n_batch: default_n_batch(),
            n_threads: None,
            quiet_backend: default_quiet_backend(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SamplingConfig {
    /// Largest `max_tokens` a request may ask for.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Largest accepted temperature.
    #[serde(default = "default_max_temperature")]
    pub max_temperature: f32,
    /// Nucleus cutoff used when temperature is above 0.
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_seed")]
    pub seed: u32,
}

fn default_max_tokens() -> u32 {
    2048
}
fn default_max_temperature() -> f32 {
    2.0
}
fn default_top_p() -> f32 {
    0.9
}
fn default_seed() -> u32 {
    42
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            max_temperature: default_max_temperature(),
            top_p: default_top_p(),
            seed: default_seed(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: BridgeConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load config with fallback chain: explicit path → ./config/default.toml → hardcoded defaults.
    pub fn load_or_default(explicit_path: Option<&Path>) -> Self {
        if let Some(path) = explicit_path {
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {e}", path.display());
                }
            }
        }

        let default_path = Path::new("config/default.toml");
        if default_path.exists() {
            match Self::load(default_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    tracing::warn!("Failed to load default config: {e}");
                }
            }
        }

        tracing::info!("Using hardcoded default configuration");
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_yields_defaults() {
        let cfg: BridgeConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.model.path, "models/model.gguf");
        assert_eq!(cfg.model.n_ctx, 2048);
        assert_eq!(cfg.model.n_batch, 512);
        assert!(cfg.model.n_threads.is_none());
        assert!(cfg.model.quiet_backend);
        assert_eq!(cfg.sampling.max_tokens, 2048);
        assert_eq!(cfg.sampling.max_temperature, 2.0);
        assert_eq!(cfg.sampling.seed, 42);
    }

    #[test]
    fn partial_sections_keep_field_defaults() {
        let cfg: BridgeConfig = toml::from_str(
            r#"
            [model]
            path = "/opt/models/qwen.gguf"
            n_threads = 8

            [sampling]
            max_temperature = 1.5
            "#,
        )
        .unwrap();
        assert_eq!(cfg.model.path, "/opt/models/qwen.gguf");
        assert_eq!(cfg.model.n_threads, Some(8));
        assert_eq!(cfg.model.n_ctx, 2048);
        assert_eq!(cfg.sampling.max_temperature, 1.5);
        assert_eq!(cfg.sampling.top_p, 0.9);
    }

    #[test]
    fn load_reads_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[model]\nn_ctx = 4096").unwrap();
        let cfg = BridgeConfig::load(file.path()).unwrap();
        assert_eq!(cfg.model.n_ctx, 4096);
    }

    #[test]
    fn load_rejects_malformed_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[model\nn_ctx = ").unwrap();
        assert!(BridgeConfig::load(file.path()).is_err());
    }

    #[test]
    fn missing_explicit_path_falls_back() {
        let cfg = BridgeConfig::load_or_default(Some(Path::new("/nonexistent/clarity.toml")));
        assert_eq!(cfg.sampling.seed, 42);
    }
}
