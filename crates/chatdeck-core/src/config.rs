use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::ai::openai::{DEFAULT_API_BASE, DEFAULT_MODEL};
use crate::ai::ChatCompletionsClient;
use crate::session::{SessionSettings, DEFAULT_ID_PREFIX, DEFAULT_SYSTEM_PROMPT};
use crate::store::{rest, MemoryRecordStore, RecordStore, RestRecordStore, SqliteRecordStore};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Sqlite,
    Rest,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(StoreBackend::Sqlite),
            "rest" => Ok(StoreBackend::Rest),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(anyhow!("Unknown store backend '{}' (expected sqlite, rest or memory)", other)),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// SQLite file; defaults to the platform data directory
    pub path: Option<PathBuf>,
    pub url: Option<String>,
    pub key: Option<String>,
    pub table: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            path: None,
            url: None,
            key: None,
            table: rest::DEFAULT_TABLE.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
    pub system_prompt: String,
    pub conversation_prefix: String,
    pub store: StoreConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            conversation_prefix: DEFAULT_ID_PREFIX.to_string(),
            store: StoreConfig::default(),
        }
    }

    /// Load the config file (writing defaults on first run) and apply
    /// environment overrides
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::get_config_path()?)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::new();
            if let Err(e) = config.save_to(path) {
                warn!(path = %path.display(), error = %e, "Could not write default config");
            }
            return Ok(config);
        }

        let config_content = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&config_content)
            .map_err(|e| anyhow!("Invalid config at {}: {}", path.display(), e))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(path, config_content)?;
        info!(path = %path.display(), "Saved config");
        Ok(())
    }

    /// Environment variables win over the file
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let set = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(key) = set("DEEPSEEK_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(base) = set("CHATDECK_API_BASE") {
            self.api_base = base;
        }
        if let Some(url) = set("CHATDECK_STORE_URL") {
            self.store.url = Some(url);
        }
        if let Some(key) = set("CHATDECK_STORE_KEY") {
            self.store.key = Some(key);
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            system_prompt: self.system_prompt.clone(),
            id_prefix: self.conversation_prefix.clone(),
        }
    }

    pub fn completion_client(&self) -> Result<ChatCompletionsClient> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("No API key configured. Set DEEPSEEK_API_KEY or api_key in {}", Self::describe_path()))?;
        Ok(ChatCompletionsClient::new(&self.api_base, api_key, &self.model))
    }

    pub fn open_store(&self) -> Result<Arc<dyn RecordStore>> {
        match self.store.backend {
            StoreBackend::Sqlite => {
                let path = match &self.store.path {
                    Some(path) => path.clone(),
                    None => SqliteRecordStore::default_path()?,
                };
                Ok(Arc::new(SqliteRecordStore::open(&path)?))
            }
            StoreBackend::Rest => {
                let (Some(url), Some(key)) = (&self.store.url, &self.store.key) else {
                    bail!("The rest store needs store.url and store.key (or CHATDECK_STORE_URL / CHATDECK_STORE_KEY)");
                };
                Ok(Arc::new(RestRecordStore::new(url, key, &self.store.table)))
            }
            StoreBackend::Memory => {
                warn!("Using the in-memory store, conversations will not be saved");
                Ok(Arc::new(MemoryRecordStore::new()))
            }
        }
    }

    fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("chatdeck").join("config.json"))
    }

    fn describe_path() -> String {
        Self::get_config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| "config.json".to_string())
    }
}
