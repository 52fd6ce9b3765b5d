//! Runtime configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Configuration for a [`NativeRuntime`](crate::NativeRuntime).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub memory: MemoryConfig,
    /// Longest source line echoed in a text diagnostic.
    pub source_line_max_length: usize,
}

/// Sizing of the default linear arena, in 64 KiB pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub initial_pages: usize,
    pub max_pages: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            memory: MemoryConfig::default(),
            source_line_max_length: 80,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            initial_pages: 1,
            max_pages: 16 * 1024,
        }
    }
}

impl BridgeConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| BridgeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.memory.max_pages == 0 {
            return Err(BridgeError::Config("memory.max_pages must be at least 1".into()));
        }
        if self.memory.initial_pages > self.memory.max_pages {
            return Err(BridgeError::Config(format!(
                "memory.initial_pages ({}) exceeds memory.max_pages ({})",
                self.memory.initial_pages, self.memory.max_pages
            )));
        }
        if self.source_line_max_length == 0 {
            return Err(BridgeError::Config(
                "source_line_max_length must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
