use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub api_key: Option<String>,
    pub api_base: Option<String>,
    pub model: Option<String>,
    #[serde(default)]
    pub max_sending_tokens: Option<u32>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

const CONFIG_FILE_PATH: &str = "config.toml";

pub fn agent_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".agent-cli")
}

fn config_json_path() -> PathBuf {
    agent_dir().join("config.json")
}

impl Config {
    /// `~/.agent-cli/config.json`, else `./config.toml`, then environment overrides.
    pub fn load() -> Self {
        let mut config = Self::load_from(&config_json_path(), Path::new(CONFIG_FILE_PATH));
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    fn load_from(json_path: &Path, toml_path: &Path) -> Self {
        if json_path.exists() {
            match std::fs::read_to_string(json_path)
                .map_err(|e| e.to_string())
                .and_then(|content| serde_json::from_str(&content).map_err(|e| e.to_string()))
            {
                Ok(config) => return config,
                Err(error) => log::warn!("Ignoring {}: {}", json_path.display(), error),
            }
        }

        if toml_path.exists() {
            match std::fs::read_to_string(toml_path)
                .map_err(|e| e.to_string())
                .and_then(|content| toml::from_str(&content).map_err(|e| e.to_string()))
            {
                Ok(config) => return config,
                Err(error) => log::warn!("Ignoring {}: {}", toml_path.display(), error),
            }
        }

        Self::default()
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(api_key) = lookup("API_KEY") {
            self.api_key = Some(api_key);
        }
        if let Some(api_base) = lookup("API_BASE") {
            self.api_base = Some(api_base);
        }
        if let Some(model) = lookup("MODEL") {
            self.model = Some(model);
        }
        if let Some(raw) = lookup("MAX_SENDING_TOKENS") {
            match raw.trim().parse() {
                Ok(tokens) => self.max_sending_tokens = Some(tokens),
                Err(_) => log::warn!("MAX_SENDING_TOKENS is not a number: {raw:?}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_file_wins_over_toml() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("config.json");
        let toml_path = dir.path().join("config.toml");
        std::fs::write(&json_path, r#"{"api_key":"from-json","model":"gpt-4o"}"#).unwrap();
        std::fs::write(&toml_path, "api_key = \"from-toml\"\n").unwrap();

        let config = Config::load_from(&json_path, &toml_path);
        assert_eq!(config.api_key.as_deref(), Some("from-json"));
        assert_eq!(config.model.as_deref(), Some("gpt-4o"));
    }

    #[test]
    fn toml_is_used_when_json_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let toml_path = dir.path().join("config.toml");
        std::fs::write(&toml_path, "model = \"o3\"\nmax_sending_tokens = 2000\n").unwrap();

        let config = Config::load_from(&dir.path().join("absent.json"), &toml_path);
        assert_eq!(config.model.as_deref(), Some("o3"));
        assert_eq!(config.max_sending_tokens, Some(2000));
    }

    #[test]
    fn broken_json_falls_through_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("config.json");
        std::fs::write(&json_path, "{not json").unwrap();

        let config = Config::load_from(&json_path, &dir.path().join("absent.toml"));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut config = Config {
            api_key: Some("file".to_string()),
            max_sending_tokens: Some(100),
            ..Default::default()
        };

        config.apply_env(|key| match key {
            "API_KEY" => Some("env".to_string()),
            "MAX_SENDING_TOKENS" => Some(" 3000 ".to_string()),
            _ => None,
        });

        assert_eq!(config.api_key.as_deref(), Some("env"));
        assert_eq!(config.max_sending_tokens, Some(3000));
        assert!(config.model.is_none());
    }

    #[test]
    fn unparsable_budget_is_ignored() {
        let mut config = Config {
            max_sending_tokens: Some(100),
            ..Default::default()
        };
        config.apply_env(|key| (key == "MAX_SENDING_TOKENS").then(|| "lots".to_string()));
        assert_eq!(config.max_sending_tokens, Some(100));
    }
}
