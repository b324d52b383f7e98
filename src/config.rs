//! API-key storage and lookup.
//!
//! Records are persisted as a flat JSON array. Only one record per
//! provider name may have `is_selected = true`; [`ApiKeyStore::select`]
//! enforces that by clearing any prior selection for the same provider.

use crate::model::Api;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiKeyRecord {
    pub provider: String,
    pub name: String,
    pub api_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub is_selected: bool,
}

/// The environment-variable fallback chain, tried in order after every
/// selected record has been exhausted.
const ENV_FALLBACKS: &[&str] = &["ANTHROPIC_API_KEY", "OPENAI_API_KEY", "GOOGLE_API_KEY", "AZURE_OPENAI_API_KEY"];

#[derive(Debug, Default)]
pub struct ApiKeyStore {
    path: Option<PathBuf>,
    records: Vec<ApiKeyRecord>,
}

impl ApiKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load records from a JSON array file. A missing file is treated as
    /// an empty store rather than an error, so a first run has nothing to
    /// pre-create.
    pub fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path: Some(path), records })
    }

    pub fn save(&self) -> crate::Result<()> {
        let Some(path) = &self.path else {
            return Err(crate::Error::config("api key store has no backing file"));
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(&self.records)?)?;
        Ok(())
    }

    pub fn records(&self) -> &[ApiKeyRecord] {
        &self.records
    }

    /// Add or replace a record by `(provider, name)`. If `is_selected` is
    /// set, clears the selection flag on every other record for the same
    /// provider first.
    pub fn upsert(&mut self, record: ApiKeyRecord) {
        if record.is_selected {
            for existing in self.records.iter_mut().filter(|r| r.provider == record.provider) {
                existing.is_selected = false;
            }
        }
        if let Some(slot) = self
            .records
            .iter_mut()
            .find(|r| r.provider == record.provider && r.name == record.name)
        {
            *slot = record;
        } else {
            self.records.push(record);
        }
    }

    pub fn select(&mut self, provider: &str, name: &str) -> crate::Result<()> {
        let exists = self.records.iter().any(|r| r.provider == provider && r.name == name);
        if !exists {
            return Err(crate::Error::config(format!("no api key record named {name} for provider {provider}")));
        }
        for record in self.records.iter_mut() {
            if record.provider == provider {
                record.is_selected = record.name == name;
            }
        }
        Ok(())
    }

    /// Resolve a usable key for `provider`: the selected record for that
    /// provider, then any other provider's selected record (to support
    /// OpenAI-compatible gateways reusing a non-native key), then the
    /// environment-variable fallback chain.
    pub fn api_key(&self, provider: &str) -> Option<String> {
        if let Some(record) = self.records.iter().find(|r| r.provider == provider && r.is_selected) {
            return Some(record.api_key.clone());
        }
        if let Some(record) = self.records.iter().find(|r| r.is_selected) {
            return Some(record.api_key.clone());
        }
        ENV_FALLBACKS.iter().find_map(|var| std::env::var(var).ok())
    }

    pub fn base_url(&self, provider: &str) -> Option<String> {
        self.records.iter().find(|r| r.provider == provider && r.is_selected).and_then(|r| r.base_url.clone())
    }
}

/// Provider-name convention used by [`ApiKeyRecord::provider`], matching
/// `Api::as_str` so a key selected for `anthropic-messages` resolves
/// without the caller needing a separate mapping table.
pub fn provider_key(api: Api) -> &'static str {
    api.as_str()
}
