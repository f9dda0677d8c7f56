use anyhow::{ensure, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Runtime configuration.
///
/// Layered as defaults, then an optional TOML file, then `FACEDEX_*`
/// environment variables. CLI flags are applied on top by the caller.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Maximum embedding distance for `search-person` to report a match.
    pub search_tolerance: f64,
    /// Maximum embedding distance for `update-person` to accept a new image.
    pub update_tolerance: f64,
    /// Cap on stored embeddings per person.
    pub max_images_per_person: usize,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = data_dir();
        Self {
            db_path: data_dir.join("faces.db"),
            model_dir: data_dir.join("models"),
            // ArcFace embeddings are unit length: 1.10 ≈ cosine 0.40.
            search_tolerance: 1.10,
            update_tolerance: 1.20,
            max_images_per_person: 10,
        }
    }
}

impl Config {
    /// Load configuration from `config_file` (or the default location when it
    /// exists) and the process environment.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let explicit = config_file
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("FACEDEX_CONFIG").map(PathBuf::from));

        let base = match explicit {
            Some(path) => Self::from_file(&path)?,
            None => {
                let path = default_config_file();
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    Self::default()
                }
            }
        };

        base.with_env(|key| std::env::var(key).ok()).validated()
    }

    fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = toml::from_str(&text)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        tracing::debug!(path = %path.display(), "config file loaded");
        Ok(config)
    }

    /// Override fields from `FACEDEX_*` variables. Unparseable values are ignored.
    fn with_env(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = var("FACEDEX_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = var("FACEDEX_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        self.search_tolerance = parsed(&var, "FACEDEX_SEARCH_TOLERANCE", self.search_tolerance);
        self.update_tolerance = parsed(&var, "FACEDEX_UPDATE_TOLERANCE", self.update_tolerance);
        self.max_images_per_person = parsed(&var, "FACEDEX_MAX_IMAGES", self.max_images_per_person);
        self
    }

    /// Reject values no command can work with.
    fn validated(self) -> Result<Self> {
        ensure!(
            self.max_images_per_person > 0,
            "max_images_per_person must be at least 1"
        );
        Ok(self)
    }
}

fn parsed<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, current: T) -> T {
    match var(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring unparseable environment value");
                current
            }
        },
        None => current,
    }
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home().join(".local/share"))
        .join("facedex")
}

fn default_config_file() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home().join(".config"))
        .join("facedex/config.toml")
}

fn home() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}
