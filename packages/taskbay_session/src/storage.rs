//! Durable storage for the token pair, one JSON file in the data directory.
//!
//! Persistence is best-effort: a failed write degrades to an in-memory
//! session, it never blocks token rotation.

use crate::token::TokenPair;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

const SESSION_FILE: &str = "session.json";

#[derive(Debug, Clone)]
pub struct TokenStorage {
    path: PathBuf,
}

impl TokenStorage {
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;
        Ok(Self {
            path: data_dir.join(SESSION_FILE),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file means no persisted session. A corrupt file is logged and
    /// treated the same way rather than wedging startup.
    pub fn load(&self) -> Option<TokenPair> {
        let raw = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(pair) => Some(pair),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring corrupt session file");
                None
            }
        }
    }

    pub fn save(&self, pair: &TokenPair) -> Result<()> {
        let json = serde_json::to_string_pretty(pair).context("failed to serialize session")?;
        fs::write(&self.path, json)
            .with_context(|| format!("failed to write session file {}", self.path.display()))
    }

    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("failed to remove session file {}", self.path.display()))?;
        }
        Ok(())
    }
}
