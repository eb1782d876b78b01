//! Configuration for context-gate.
//!
//! Loaded from `<config_dir>/context-gate/config.json` when present, then
//! overridden by environment variables:
//! - `CONTEXT_GATE_CLASSIFIER` - `keyword` or `ollama`
//! - `CONTEXT_GATE_OLLAMA_URL` - Base URL of the Ollama API
//! - `CONTEXT_GATE_OLLAMA_MODEL` - Model used for classification
//! - `CONTEXT_GATE_CLASSIFY_TIMEOUT_SECS` - Per-request classification timeout
//! - `CONTEXT_GATE_DB` - Path of the SQLite session database

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};

const APP_NAME: &str = "context-gate";
const CONFIG_FILE: &str = "config.json";

/// Phrases that, found anywhere in a conversational message
/// (case-insensitive), reopen refinement of an approved context.
pub const DEFAULT_TRIGGER_PHRASES: &[&str] = &[
    "actually, this is",
    "it's actually",
    "refine:",
    "change domain",
    "change intent",
    "correction:",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub classifier: ClassifierConfig,
    pub triggers: TriggerConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierBackend {
    /// Deterministic keyword rules, no external calls.
    #[default]
    Keyword,
    /// LLM classification through an Ollama-compatible API.
    Ollama,
}

impl ClassifierBackend {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyword" | "keywords" | "rules" => Some(Self::Keyword),
            "ollama" | "llm" => Some(Self::Ollama),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub backend: ClassifierBackend,
    pub ollama_url: String,
    pub ollama_model: String,
    /// Upper bound on a single classification call.
    pub timeout_secs: u64,
    /// When the LLM backend fails, try the keyword rules before giving up.
    pub fallback_to_keywords: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            backend: ClassifierBackend::Keyword,
            ollama_url: "http://localhost:11434".to_string(),
            ollama_model: "llama3.2".to_string(),
            timeout_secs: 20,
            fallback_to_keywords: true,
        }
    }
}

impl ClassifierConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    pub phrases: Vec<String>,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            phrases: DEFAULT_TRIGGER_PHRASES.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl TriggerConfig {
    /// Whether `message` contains any configured trigger phrase.
    pub fn matches(&self, message: &str) -> bool {
        let message = message.to_lowercase().replace('\u{2019}', "'");
        self.phrases
            .iter()
            .map(|p| p.trim().to_lowercase())
            .any(|p| !p.is_empty() && message.contains(&p))
    }

    /// The first configured phrase found in `message` and the byte offset
    /// just past it. Matching is ASCII case-insensitive so offsets stay valid
    /// in the original text.
    pub fn locate<'a>(&'a self, message: &str) -> Option<(&'a str, usize)> {
        let haystack = message.to_ascii_lowercase();
        self.phrases
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .filter_map(|p| {
                haystack
                    .find(&p.to_ascii_lowercase())
                    .map(|start| (start, p, start + p.len()))
            })
            .min_by_key(|(start, _, _)| *start)
            .map(|(_, phrase, end)| (phrase, end))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database location. `None` uses the platform data directory.
    pub database_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the user's config directory and apply
    /// environment overrides. Falls back to defaults if the file is missing
    /// or fails to parse.
    pub fn load() -> Self {
        let mut config = match get_config_path().and_then(|path| Self::load_from(&path)) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config, using defaults: {:#}", e);
                Self::default()
            }
        };
        config.apply_env();
        config
    }

    /// Load from an explicit path. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config = serde_json::from_str(&content).context("Failed to parse config file")?;

        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(backend) = std::env::var("CONTEXT_GATE_CLASSIFIER") {
            match ClassifierBackend::from_str(&backend) {
                Some(b) => self.classifier.backend = b,
                None => tracing::warn!("Ignoring unknown CONTEXT_GATE_CLASSIFIER '{}'", backend),
            }
        }
        if let Ok(url) = std::env::var("CONTEXT_GATE_OLLAMA_URL") {
            self.classifier.ollama_url = url;
        }
        if let Ok(model) = std::env::var("CONTEXT_GATE_OLLAMA_MODEL") {
            self.classifier.ollama_model = model;
        }
        if let Some(secs) = std::env::var("CONTEXT_GATE_CLASSIFY_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            self.classifier.timeout_secs = secs;
        }
        if let Ok(path) = std::env::var("CONTEXT_GATE_DB") {
            self.store.database_path = Some(PathBuf::from(path));
        }
    }
}

fn get_config_path() -> Result<PathBuf> {
    let mut path =
        config_dir().ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
    path.push(APP_NAME);
    path.push(CONFIG_FILE);
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_triggers_match_case_insensitively() {
        let triggers = TriggerConfig::default();
        assert!(triggers.matches("Actually, this is a web project"));
        assert!(triggers.matches("ok so it’s actually a CLI"));
        assert!(triggers.matches("Correction: intent is bug fix"));
        assert!(!triggers.matches("looks good to me"));
    }

    #[test]
    fn custom_triggers_replace_defaults() {
        let triggers = TriggerConfig {
            phrases: vec!["en realidad".to_string(), "  ".to_string()],
        };
        assert!(triggers.matches("En realidad es una app móvil"));
        assert!(!triggers.matches("refine: domain=web"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config.classifier.backend, ClassifierBackend::Keyword);
        assert_eq!(config.triggers.phrases.len(), DEFAULT_TRIGGER_PHRASES.len());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"classifier":{"backend":"ollama","ollama_model":"qwen2.5"}}"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.classifier.backend, ClassifierBackend::Ollama);
        assert_eq!(config.classifier.ollama_model, "qwen2.5");
        assert_eq!(config.classifier.ollama_url, "http://localhost:11434");
        assert!(config.classifier.fallback_to_keywords);
    }

    #[test]
    fn locate_returns_the_earliest_phrase_and_its_end() {
        let triggers = TriggerConfig::default();

        assert_eq!(
            triggers.locate("Correction: domain=web"),
            Some(("correction:", "correction:".len()))
        );
        assert_eq!(
            triggers.locate("ok, CHANGE DOMAIN=web"),
            Some(("change domain", "ok, change domain".len()))
        );
        assert_eq!(triggers.locate("looks good"), None);
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
