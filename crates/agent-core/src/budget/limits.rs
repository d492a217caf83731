//! Model context window limits.
//!
//! The sending budget of a conversation is derived from the model's context
//! window minus the space reserved for the reply and a safety margin. Built-in
//! windows can be overridden from `~/.agent-cli/model_limits.json`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Context windows for well-known models. Longest matching pattern wins.
pub const KNOWN_MODEL_LIMITS: &[(&str, u32)] = &[
    ("gpt-3.5-turbo", 16_385),
    ("gpt-3.5-turbo-0301", 4_096),
    ("gpt-3.5-turbo-0613", 4_096),
    ("gpt-3.5-turbo-16k-0613", 16_385),
    ("gpt-4", 8_192),
    ("gpt-4-32k", 32_768),
    ("gpt-4-turbo", 128_000),
    ("gpt-4o", 128_000),
    ("gpt-4.1", 1_047_576),
    ("o1", 200_000),
    ("o3", 200_000),
    ("o4-mini", 200_000),
];

/// Window assumed for models that match nothing.
pub const DEFAULT_CONTEXT_TOKENS: u32 = 8_192;

/// Upper bound for the default reply reservation.
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 4_096;

/// Default slack for counting errors, capped at an eighth of the window.
pub const DEFAULT_SAFETY_MARGIN: u32 = 1_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelLimit {
    /// Model identifier or substring of one
    pub model_pattern: String,
    pub max_context_tokens: u32,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    #[serde(default)]
    pub safety_margin: Option<u32>,
}

impl ModelLimit {
    pub fn new(model_pattern: impl Into<String>, max_context_tokens: u32) -> Self {
        Self {
            model_pattern: model_pattern.into(),
            max_context_tokens,
            max_output_tokens: None,
            safety_margin: None,
        }
    }

    /// Reply reservation: explicit value, or a quarter of the window up to 4096.
    pub fn output_reserve(&self) -> u32 {
        self.max_output_tokens
            .unwrap_or_else(|| (self.max_context_tokens / 4).min(DEFAULT_MAX_OUTPUT_TOKENS))
    }

    pub fn safety_margin(&self) -> u32 {
        self.safety_margin
            .unwrap_or_else(|| DEFAULT_SAFETY_MARGIN.min(self.max_context_tokens / 8))
    }

    /// Tokens the outgoing history may occupy.
    pub fn sending_budget(&self) -> u32 {
        self.max_context_tokens
            .saturating_sub(self.output_reserve())
            .saturating_sub(self.safety_margin())
    }
}

/// Built-in limits plus user overrides.
#[derive(Debug, Clone, Default)]
pub struct ModelLimitsRegistry {
    user_limits: HashMap<String, ModelLimit>,
    config_path: Option<PathBuf>,
}

impl ModelLimitsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config_path(path: impl Into<PathBuf>) -> Self {
        Self {
            user_limits: HashMap::new(),
            config_path: Some(path.into()),
        }
    }

    fn config_path(&self) -> PathBuf {
        self.config_path
            .clone()
            .unwrap_or_else(default_config_path)
    }

    /// Load overrides from the configured path. A missing file is not an error.
    pub async fn load_user_config(&mut self) -> std::io::Result<()> {
        let path = self.config_path();
        if !path.exists() {
            return Ok(());
        }

        let content = tokio::fs::read_to_string(&path).await?;
        let limits: Vec<ModelLimit> = serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;

        for limit in limits {
            self.add_limit(limit);
        }

        tracing::info!(
            "Loaded {} user model limits from {:?}",
            self.user_limits.len(),
            path
        );
        Ok(())
    }

    pub async fn save_user_config(&self) -> std::io::Result<()> {
        let path = self.config_path();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut limits: Vec<&ModelLimit> = self.user_limits.values().collect();
        limits.sort_by(|a, b| a.model_pattern.cmp(&b.model_pattern));
        let content = serde_json::to_string_pretty(&limits)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        tokio::fs::write(&path, content).await
    }

    pub fn add_limit(&mut self, limit: ModelLimit) {
        self.user_limits.insert(limit.model_pattern.clone(), limit);
    }

    /// Look up the limit for `model`.
    ///
    /// User overrides beat built-ins; within each source an exact name beats
    /// the longest pattern contained in the model name.
    pub fn get(&self, model: &str) -> Option<ModelLimit> {
        if let Some(limit) = self.user_limits.get(model) {
            return Some(limit.clone());
        }

        let user_match = self
            .user_limits
            .iter()
            .filter(|(pattern, _)| model.contains(pattern.as_str()))
            .max_by_key(|(pattern, _)| pattern.len())
            .map(|(_, limit)| limit.clone());
        if user_match.is_some() {
            return user_match;
        }

        KNOWN_MODEL_LIMITS
            .iter()
            .filter(|(pattern, _)| model.contains(pattern))
            .max_by_key(|(pattern, _)| pattern.len())
            .map(|(pattern, tokens)| ModelLimit::new(*pattern, *tokens))
    }

    pub fn get_or_default(&self, model: &str) -> ModelLimit {
        self.get(model).unwrap_or_else(|| {
            tracing::debug!(
                "No context limit known for {model}, assuming {}",
                DEFAULT_CONTEXT_TOKENS
            );
            ModelLimit::new(model, DEFAULT_CONTEXT_TOKENS)
        })
    }

    pub fn sending_budget(&self, model: &str) -> u32 {
        self.get_or_default(model).sending_budget()
    }
}

/// `~/.agent-cli/model_limits.json`
pub fn default_config_path() -> PathBuf {
    config_dir().join("model_limits.json")
}

pub(crate) fn config_dir() -> PathBuf {
    dirs::home_dir()
        .as_deref()
        .unwrap_or_else(|| Path::new("."))
        .join(".agent-cli")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_builtin_match() {
        let registry = ModelLimitsRegistry::new();
        let limit = registry.get("gpt-4").unwrap();
        assert_eq!(limit.max_context_tokens, 8_192);
    }

    #[test]
    fn longest_builtin_pattern_wins() {
        let registry = ModelLimitsRegistry::new();
        assert_eq!(registry.get("gpt-4o-mini").unwrap().model_pattern, "gpt-4o");
        assert_eq!(
            registry.get("gpt-4-32k-0613").unwrap().max_context_tokens,
            32_768
        );
    }

    #[test]
    fn unknown_model_uses_default_window() {
        let registry = ModelLimitsRegistry::new();
        let limit = registry.get_or_default("mystery-model");
        assert_eq!(limit.max_context_tokens, DEFAULT_CONTEXT_TOKENS);
    }

    #[test]
    fn user_override_takes_precedence() {
        let mut registry = ModelLimitsRegistry::new();
        registry.add_limit(ModelLimit::new("gpt-4o", 64_000));
        assert_eq!(registry.get("gpt-4o-2024-08-06").unwrap().max_context_tokens, 64_000);
    }

    #[test]
    fn sending_budget_reserves_output_and_margin() {
        let limit = ModelLimit::new("gpt-4", 8_192);
        // 8192 - min(2048, 4096) - min(1000, 1024)
        assert_eq!(limit.sending_budget(), 8_192 - 2_048 - 1_000);

        let mut tiny = ModelLimit::new("tiny", 100);
        tiny.max_output_tokens = Some(500);
        assert_eq!(tiny.sending_budget(), 0);
    }

    #[tokio::test]
    async fn user_config_roundtrips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("limits.json");

        let mut registry = ModelLimitsRegistry::with_config_path(&path);
        registry.add_limit(ModelLimit::new("local-llm", 32_000));
        registry.save_user_config().await.unwrap();

        let mut reloaded = ModelLimitsRegistry::with_config_path(&path);
        reloaded.load_user_config().await.unwrap();
        assert_eq!(
            reloaded.get("local-llm-q4").unwrap().max_context_tokens,
            32_000
        );
    }

    #[tokio::test]
    async fn missing_config_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = ModelLimitsRegistry::with_config_path(dir.path().join("absent.json"));
        assert!(registry.load_user_config().await.is_ok());
    }
}
