//! Server configuration.
//!
//! One JSON document configures both the server and the engine. The engine
//! section and the storage paths are passed to the engine opaquely; the
//! server reads only its own tunables. A missing file is not an error: the
//! minimal default configuration is synthesized and a local data directory
//! is created next to the process.

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::session::manager::DEFAULT_CAPACITY;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub config_url: String,
    pub config_file_path: String,
    pub config: serde_json::Value,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            config_url: String::new(),
            config_file_path: String::new(),
            config: serde_json::json!({}),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub version: String,
    pub directory: String,
    pub data_directories: Vec<String>,
    pub engine: EngineSection,
    /// Session pool capacity.
    pub max_sessions: usize,
    /// Idle timeout before a session becomes evictable.
    pub session_timeout_seconds: u64,
    /// Log format: "compact" or "json".
    pub log_format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            directory: "./tmp/ustore/".to_string(),
            data_directories: Vec::new(),
            engine: EngineSection::default(),
            max_sessions: DEFAULT_CAPACITY,
            session_timeout_seconds: 30,
            log_format: "compact".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load the configuration file, or synthesize the default one when the
    /// file does not exist. The storage directory is created either way.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config: ServerConfig = if path.exists() {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read configuration at {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("failed to parse configuration at {}", path.display()))?
        } else {
            ServerConfig::default()
        };
        config.prepare()?;
        Ok(config)
    }

    fn prepare(&self) -> anyhow::Result<()> {
        if !self.directory.is_empty() {
            fs::create_dir_all(&self.directory).with_context(|| {
                format!("failed to create data directory '{}'", self.directory)
            })?;
        }
        Ok(())
    }

    /// The full document as the opaque JSON handed to the engine.
    pub fn engine_json(&self) -> anyhow::Result<String> {
        serde_json::to_string(self).context("failed to serialize engine configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_minimal_document_parses_with_defaults() {
        let text = r#"{
            "version": "1.0",
            "directory": "",
            "data_directories": [],
            "engine": {
                "config_url": "",
                "config_file_path": "",
                "config": {}
            }
        }"#;
        let config: ServerConfig = serde_json::from_str(text).expect("parse");
        assert_eq!(config.version, "1.0");
        assert_eq!(config.max_sessions, DEFAULT_CAPACITY);
        assert_eq!(config.session_timeout_seconds, 30);
        assert_eq!(config.log_format, "compact");
    }

    #[test]
    fn loading_a_file_creates_its_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let data_dir = dir.path().join("data");
        let config_path = dir.path().join("config.json");
        let text = serde_json::json!({
            "version": "1.0",
            "directory": data_dir.to_str().expect("utf-8 path"),
            "data_directories": [],
            "engine": { "config_url": "", "config_file_path": "", "config": {} },
            "max_sessions": 7
        });
        fs::write(&config_path, text.to_string()).expect("write config");

        let config = ServerConfig::load(&config_path).expect("load");
        assert_eq!(config.max_sessions, 7);
        assert!(data_dir.is_dir());
    }

    #[test]
    fn engine_json_round_trips_through_the_engine_parser() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = ServerConfig {
            directory: dir.path().join("store").to_str().expect("utf-8").to_string(),
            ..ServerConfig::default()
        };
        let json = config.engine_json().expect("serialize");
        crate::engine::Engine::open(&json).expect("engine accepts the document");
    }
}
