//! Layered configuration (spec §9 "Configuration surface": invocation >
//! frontmatter > configuration file > environment > defaults).
//!
//! Shaped after the teacher's `ScanConfig`/`.codescope.toml` pattern
//! (`server/src/types.rs`, `server/src/init.rs`): an all-`Option<T>` file
//! struct merged onto hard defaults, with environment variables layered in
//! between the file and frontmatter/invocation.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{CoreError, CoreResult};

/// Hard defaults plus whatever `.promptforge.toml` and the honored
/// environment variables (spec §6 "Environment variables honored")
/// contribute, before frontmatter and invocation flags are applied.
#[derive(Debug, Clone)]
pub struct Config {
    pub model: String,
    pub temperature: f64,
    pub max_output_tokens: Option<u64>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub max_file_size: Option<u64>,
    pub max_cost: Option<f64>,
    pub cache_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            temperature: 0.2,
            max_output_tokens: None,
            timeout_secs: 300,
            max_retries: 3,
            max_file_size: None,
            max_cost: None,
            cache_dir: None,
        }
    }
}

/// `.promptforge.toml` on-disk shape: every field optional, only present
/// keys override the default (mirrors `server/src/types.rs`'s
/// defaults-with-overrides struct).
#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    model: Option<String>,
    temperature: Option<f64>,
    max_output_tokens: Option<u64>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    max_file_size: Option<u64>,
    max_cost: Option<f64>,
    cache_dir: Option<PathBuf>,
}

impl Config {
    /// Build the effective configuration: defaults, then the honored
    /// environment variables, then `.promptforge.toml` (if present at
    /// `config_path`) last so the file layer wins over the environment.
    /// Frontmatter and invocation flags are applied afterward by the
    /// runner, per the precedence in spec §9.
    pub fn load(config_path: Option<&Path>) -> CoreResult<Self> {
        let mut config = Self::default();

        config.apply_env();

        let path = config_path.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from(".promptforge.toml"));
        if path.exists() {
            let text = std::fs::read_to_string(&path).map_err(|e| CoreError::Io { path: path.clone(), source: e })?;
            let file: ConfigFile = toml::from_str(&text).map_err(|e| CoreError::InvalidSpec {
                reason: format!("invalid config file {}: {e}", path.display()),
            })?;
            config.apply_file(file);
        }

        Ok(config)
    }

    fn apply_file(&mut self, file: ConfigFile) {
        if let Some(v) = file.model {
            self.model = v;
        }
        if let Some(v) = file.temperature {
            self.temperature = v;
        }
        if file.max_output_tokens.is_some() {
            self.max_output_tokens = file.max_output_tokens;
        }
        if let Some(v) = file.timeout_secs {
            self.timeout_secs = v;
        }
        if let Some(v) = file.max_retries {
            self.max_retries = v;
        }
        if file.max_file_size.is_some() {
            self.max_file_size = file.max_file_size;
        }
        if file.max_cost.is_some() {
            self.max_cost = file.max_cost;
        }
        if file.cache_dir.is_some() {
            self.cache_dir = file.cache_dir;
        }
    }

    /// Environment variables honored by the core (spec §6): a cache
    /// directory override and a max-file-size override. Provider
    /// credentials and proxy variables are read directly by `HttpLlmClient`
    /// and `reqwest`, not here.
    fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var("PROMPTFORGE_CACHE_DIR") {
            self.cache_dir = Some(PathBuf::from(dir));
        }
        if let Ok(size) = std::env::var("PROMPTFORGE_MAX_FILE_SIZE") {
            if let Ok(size) = size.parse::<u64>() {
                self.max_file_size = Some(size);
            }
        }
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| dirs::cache_dir().unwrap_or_else(std::env::temp_dir).join("promptforge"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_without_config_file() {
        let config = Config::load(Some(Path::new("/nonexistent/.promptforge.toml"))).unwrap();
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn config_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "model = \"claude-3\"\nmax_retries = 5").unwrap();
        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.model, "claude-3");
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.temperature, 0.2);
    }

    #[test]
    fn file_overrides_env() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_file_size = 1000").unwrap();
        std::env::set_var("PROMPTFORGE_MAX_FILE_SIZE", "2000");
        let config = Config::load(Some(file.path())).unwrap();
        std::env::remove_var("PROMPTFORGE_MAX_FILE_SIZE");
        assert_eq!(config.max_file_size, Some(1000));
    }
}
