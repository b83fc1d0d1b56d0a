//! Configuration
//!
//! Settings come from an optional `config.toml` (explicit path, or
//! `<config_dir>/tasktalk/config.toml`), then environment variables (a `.env`
//! file is loaded first) override secrets and paths.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Directory name within the platform config dir
const CONFIG_SUBDIR: &str = "tasktalk";

/// Config file name
const CONFIG_FILE: &str = "config.toml";

// ============================================================================
// Sections
// ============================================================================

/// LLM endpoint settings (OpenAI-compatible chat completions)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    /// Usually supplied through OPENROUTER_API_KEY rather than the file
    pub api_key: Option<String>,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            model: "openai/gpt-3.5-turbo".to_string(),
            api_key: None,
            temperature: 0.1,
            timeout_secs: 30,
        }
    }
}

/// Google Calendar settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CalendarConfig {
    pub base_url: String,
    pub calendar_id: String,
    /// OAuth access token; usually supplied through GOOGLE_CALENDAR_ACCESS_TOKEN
    pub access_token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.googleapis.com/calendar/v3".to_string(),
            calendar_id: "primary".to_string(),
            access_token: None,
            timeout_secs: 20,
        }
    }
}

/// Persona restyling of confirmations
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PersonaConfig {
    pub enabled: bool,
    /// Style instructions; the built-in style is used when absent
    pub style: Option<String>,
}

/// Backlog nudges in natural-language mode
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NudgeConfig {
    pub enabled: bool,
    /// Feedback stats; defaults to `<config_dir>/tasktalk/nudge_stats.json`
    pub stats_path: Option<PathBuf>,
}

impl Default for NudgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stats_path: None,
        }
    }
}

/// Root configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store_path: PathBuf,
    /// Conversation log; disabled when absent
    pub history_path: Option<PathBuf>,
    pub llm: LlmConfig,
    pub calendar: CalendarConfig,
    pub persona: PersonaConfig,
    pub nudge: NudgeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("tasks.csv"),
            history_path: None,
            llm: LlmConfig::default(),
            calendar: CalendarConfig::default(),
            persona: PersonaConfig::default(),
            nudge: NudgeConfig::default(),
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

/// Default config file location
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(CONFIG_SUBDIR).join(CONFIG_FILE))
}

impl Config {
    /// Load `.env`, the TOML file, then environment overrides.
    ///
    /// An explicit `path` must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => match default_config_path() {
                Some(p) if p.exists() => Self::from_file(&p)?,
                _ => Self::default(),
            },
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply environment overrides through `get` (injected for tests)
    pub fn apply_env<F>(&mut self, get: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("OPENROUTER_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = get("TASKTALK_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = get("TASKTALK_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = get("TASKTALK_LLM_TIMEOUT") {
            self.llm.timeout_secs = v.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "TASKTALK_LLM_TIMEOUT".to_string(),
                value: v.clone(),
            })?;
        }
        if let Some(v) = get("GOOGLE_CALENDAR_ACCESS_TOKEN") {
            self.calendar.access_token = Some(v);
        }
        if let Some(v) = get("TASKTALK_CALENDAR_ID") {
            self.calendar.calendar_id = v;
        }
        if let Some(v) = get("TASKTALK_STORE") {
            self.store_path = PathBuf::from(v);
        }
        if let Some(v) = get("TASKTALK_HISTORY") {
            self.history_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("TASKTALK_NUDGE_STATS") {
            self.nudge.stats_path = Some(PathBuf::from(v));
        }
        Ok(())
    }

    pub fn llm_configured(&self) -> bool {
        self.llm.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    pub fn calendar_configured(&self) -> bool {
        self.calendar.access_token.as_deref().is_some_and(|k| !k.is_empty())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.store_path, PathBuf::from("tasks.csv"));
        assert_eq!(config.calendar.calendar_id, "primary");
        assert!(!config.llm_configured());
        assert!(!config.calendar_configured());
        assert!(!config.persona.enabled);
        assert!(config.nudge.enabled);
        assert!(config.nudge.stats_path.is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
store_path = "data/tasks.csv"

[llm]
model = "openai/gpt-4o-mini"

[persona]
enabled = true

[nudge]
enabled = false
"#,
        )
        .unwrap();
        assert_eq!(config.store_path, PathBuf::from("data/tasks.csv"));
        assert_eq!(config.llm.model, "openai/gpt-4o-mini");
        assert_eq!(config.llm.base_url, "https://openrouter.ai/api/v1");
        assert!(config.persona.enabled);
        assert!(config.persona.style.is_none());
        assert!(!config.nudge.enabled);
    }

    #[test]
    fn test_malformed_toml_is_error() {
        assert!(Config::from_toml("store_path = [").is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_read_error() {
        let err = Config::from_file(Path::new("/nonexistent/tasktalk.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("OPENROUTER_API_KEY", "sk-test"),
            ("GOOGLE_CALENDAR_ACCESS_TOKEN", "ya29.token"),
            ("TASKTALK_STORE", "/tmp/t.csv"),
            ("TASKTALK_CALENDAR_ID", "  "),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert!(config.llm_configured());
        assert!(config.calendar_configured());
        assert_eq!(config.store_path, PathBuf::from("/tmp/t.csv"));
        // blank values are ignored
        assert_eq!(config.calendar.calendar_id, "primary");
    }

    #[test]
    fn test_invalid_timeout_env() {
        let mut config = Config::default();
        let err = config
            .apply_env(|k| (k == "TASKTALK_LLM_TIMEOUT").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
