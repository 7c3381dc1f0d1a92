//! Configuration file support

use anyhow::Context as _;
use askdb_ai::Model;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration for askdb
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model: ModelSettings,
    pub database: DatabaseSettings,
    pub grading: GradingSettings,
    pub server: ServerSettings,
    /// File receiving the agent activity log
    pub activity_log: PathBuf,
    /// Append the executed SQL to answers
    pub show_query: bool,
    /// Replaces the built-in system prompt
    pub system_prompt_file: Option<PathBuf>,
    /// Model calls allowed per question
    pub max_turns: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: ModelSettings::default(),
            database: DatabaseSettings::default(),
            grading: GradingSettings::default(),
            server: ServerSettings::default(),
            activity_log: PathBuf::from("llm_activity.log"),
            show_query: false,
            system_prompt_file: None,
            max_turns: askdb_agent::agent::DEFAULT_MAX_TURNS,
        }
    }
}

/// Chat model endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub id: String,
    /// OpenAI-compatible base URL, without `/chat/completions`
    pub base_url: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Inline API key, used when set
    pub api_key: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            id: "llama3.2:3b".to_string(),
            base_url: "http://localhost:11434/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            api_key: None,
            max_tokens: None,
            temperature: None,
        }
    }
}

impl ModelSettings {
    /// API key from config, then the environment. Local endpoints need none.
    pub fn api_key(&self) -> String {
        self.api_key
            .clone()
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .unwrap_or_default()
    }

    pub fn to_model(&self) -> Model {
        let mut model = Model::new(&self.id, &self.base_url);
        if let Some(max_tokens) = self.max_tokens {
            model.max_tokens = max_tokens;
        }
        model
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// SQLite file, opened read-only
    pub path: PathBuf,
    /// Also refuse unbounded WITH queries and unlimited SELECTs with aggregates
    pub strict_guard: bool,
    /// Cap on a rendered query result
    pub max_result_chars: usize,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("Chinook_Sqlite.sqlite"),
            strict_guard: false,
            max_result_chars: askdb_agent::db::DEFAULT_MAX_RESULT_CHARS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GradingSettings {
    pub enabled: bool,
    pub max_retries: u32,
    /// Grader model id; defaults to the chat model
    pub model: Option<String>,
    /// Sampling temperature for grader calls
    pub temperature: f32,
}

impl Default for GradingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: askdb_agent::agent::DEFAULT_MAX_RETRIES,
            model: None,
            temperature: askdb_agent::grader::DEFAULT_TEMPERATURE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub address: String,
    pub port: u16,
    /// Pause between streamed words
    pub word_delay_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 8000,
            word_delay_ms: 50,
        }
    }
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("askdb")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("ASKDB_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from `path`, or the default location. A missing default
    /// file yields the built-in defaults; an explicit path must exist.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (Self::config_path(), false),
        };
        if !required && !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Contents of `system_prompt_file`, if one is configured
    pub fn system_prompt(&self) -> anyhow::Result<Option<String>> {
        match &self.system_prompt_file {
            Some(path) => {
                let prompt = fs::read_to_string(path).with_context(|| {
                    format!("Failed to read system prompt file {}", path.display())
                })?;
                Ok(Some(prompt))
            }
            None => Ok(None),
        }
    }

    /// Write the example config if no file exists yet
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, example_config())?;
        Ok(path)
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# askdb configuration file
# Place at ~/.config/askdb/config.toml (Linux/Mac) or %APPDATA%\askdb\config.toml (Windows)
# or point ASKDB_CONFIG_PATH at it.

# File receiving tool calls, decisions and grading verdicts
activity_log = "llm_activity.log"

# Append the executed SQL to every answer
show_query = false

# Model calls allowed per question
max_turns = 25

# Replace the built-in business analyst prompt (optional)
# system_prompt_file = "~/.config/askdb/system_prompt.txt"

[model]
# Any OpenAI-compatible chat completions endpoint (OpenAI, Mistral, Ollama, ...)
id = "llama3.2:3b"
base_url = "http://localhost:11434/v1"
# Environment variable holding the API key; not needed for local endpoints
api_key_env = "OPENAI_API_KEY"
# max_tokens = 2048
# temperature = 0.0

[database]
path = "Chinook_Sqlite.sqlite"
# Also refuse queries that could return many rows despite aggregates
strict_guard = false
max_result_chars = 20000

[grading]
enabled = true
max_retries = 3
# Separate model for the reviewers (optional)
# model = "llama3.2:3b"
temperature = 0.1

[server]
address = "127.0.0.1"
port = 8000
# Pause between streamed words, in milliseconds
word_delay_ms = 50
"#
}
