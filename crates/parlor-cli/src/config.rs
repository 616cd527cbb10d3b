//! Configuration file support

use parlor_agent::{CompactionConfig, OrchestratorConfig, PersonaDescriptor};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Configuration for parlor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Provider for persona replies (openai, groq, custom)
    pub provider: Option<String>,
    /// Model for persona replies
    pub model: Option<String>,
    /// Model for conversation summaries
    pub summary_model: Option<String>,
    /// Model for compressing retrieved context
    pub context_summary_model: Option<String>,
    /// Base URL override for OpenAI-compatible servers
    pub base_url: Option<String>,
    /// Where thread checkpoints are written
    pub data_dir: Option<String>,
    /// Directory of .txt/.md files used for retrieval
    pub knowledge_dir: Option<String>,
    /// Number of knowledge chunks returned per query
    pub rag_top_k: Option<usize>,
    /// Personas offered the victory tool
    pub event_personas: Option<Vec<String>>,
    /// Compaction settings
    pub compaction: Option<CompactionSettings>,
    /// API keys (alternative to environment variables)
    #[serde(default)]
    pub api_keys: ApiKeys,
    /// Extra or overriding personas
    #[serde(default)]
    pub personas: Vec<PersonaConfig>,
}

/// API key configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeys {
    pub openai: Option<String>,
    pub groq: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionSettings {
    pub enabled: Option<bool>,
    pub trigger_messages: Option<usize>,
    pub keep_messages: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub perspective: String,
    #[serde(default)]
    pub style: String,
}

impl From<&PersonaConfig> for PersonaDescriptor {
    fn from(p: &PersonaConfig) -> Self {
        PersonaDescriptor::new(&p.id, &p.name, &p.perspective, &p.style)
    }
}

pub const DEFAULT_PROVIDER: &str = "groq";
pub const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";
pub const DEFAULT_SUMMARY_MODEL: &str = "llama-3.1-8b-instant";
pub const DEFAULT_RAG_TOP_K: usize = 3;

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("parlor")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("PARLOR_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Save config to file
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            provider: Some(DEFAULT_PROVIDER.to_string()),
            model: Some(DEFAULT_MODEL.to_string()),
            summary_model: Some(DEFAULT_SUMMARY_MODEL.to_string()),
            rag_top_k: Some(DEFAULT_RAG_TOP_K),
            ..Default::default()
        };

        default_config.save()?;
        Ok(path)
    }

    /// Get API key for a provider, checking config then env
    pub fn get_api_key(&self, provider: &str) -> Option<String> {
        let from_config = match provider {
            "openai" => self.api_keys.openai.clone(),
            "groq" => self.api_keys.groq.clone(),
            _ => None,
        };

        if from_config.is_some() {
            return from_config;
        }

        let env_var = parlor_ai::Provider::parse(provider)?.api_key_env_var()?;
        std::env::var(env_var).ok()
    }

    /// Directory for thread checkpoints
    pub fn data_dir(&self) -> PathBuf {
        match &self.data_dir {
            Some(dir) => PathBuf::from(dir),
            None => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("parlor")
                .join("threads"),
        }
    }

    /// Directory scanned for knowledge files, if configured
    pub fn knowledge_dir(&self) -> Option<PathBuf> {
        self.knowledge_dir.as_ref().map(PathBuf::from)
    }

    pub fn rag_top_k(&self) -> usize {
        self.rag_top_k.unwrap_or(DEFAULT_RAG_TOP_K)
    }

    /// Orchestrator settings, defaults filled in
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let defaults = OrchestratorConfig::default();
        let compaction = match &self.compaction {
            Some(settings) => {
                let base = CompactionConfig::default();
                CompactionConfig {
                    enabled: settings.enabled.unwrap_or(base.enabled),
                    trigger_messages: settings.trigger_messages.unwrap_or(base.trigger_messages),
                    keep_messages: settings.keep_messages.unwrap_or(base.keep_messages),
                }
            }
            None => defaults.compaction.clone(),
        };

        OrchestratorConfig {
            compaction,
            event_personas: self
                .event_personas
                .clone()
                .unwrap_or(defaults.event_personas.clone()),
            ..defaults
        }
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# parlor configuration file
# Place at ~/.config/parlor/config.toml (Linux) or set PARLOR_CONFIG_PATH

# Provider for persona replies (openai, groq, custom)
provider = "groq"

# Model used for persona replies
model = "llama-3.3-70b-versatile"

# Smaller model used for summaries and context compression
summary_model = "llama-3.1-8b-instant"
# context_summary_model = "llama-3.1-8b-instant"

# OpenAI-compatible server (only needed for provider = "custom")
# base_url = "http://localhost:11434/v1"

# Where thread checkpoints are stored
# data_dir = "~/.local/share/parlor/threads"

# Directory of .txt and .md files the personas can consult
# knowledge_dir = "./knowledge"
rag_top_k = 3

# Personas that can end the game
event_personas = ["nicolo"]

[compaction]
enabled = true
trigger_messages = 30
keep_messages = 5

# API keys (optional - can also use environment variables)
[api_keys]
# openai = "sk-..."
# groq = "gsk_..."

# Additional personas, or overrides of the built-in ones
# [[personas]]
# id = "hypatia"
# name = "Hypatia"
# perspective = "A mathematician who treats every question as a geometry problem."
# style = "Patient and exact, fond of diagrams described in words."
"#
}
