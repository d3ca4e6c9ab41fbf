// ===============================
// src/credentials.rs
// ===============================
//
// Sumber API key (NewsAPI + CryptoCompare). Key yang kosong/hilang adalah
// kegagalan startup, bukan sesuatu yang di-retry saat runtime.
//
use std::env;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::StartupError;

#[derive(Clone, PartialEq, Eq)]
pub struct ApiKeys {
    pub news: String,
    pub commentary: String,
}

// jangan bocorkan key ke log
impl std::fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeys").field("news", &"***").field("commentary", &"***").finish()
    }
}

pub trait CredentialProvider {
    fn api_keys(&self) -> Result<ApiKeys, StartupError>;
}

fn require(value: Option<String>, name: &'static str) -> Result<String, StartupError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(StartupError::MissingCredential(name))
}

/// `NEWSAPI_KEY` / `CRYPTOCOMPARE_KEY`.
pub struct EnvCredentials;

impl CredentialProvider for EnvCredentials {
    fn api_keys(&self) -> Result<ApiKeys, StartupError> {
        Ok(ApiKeys {
            news: require(env::var("NEWSAPI_KEY").ok(), "newsapi")?,
            commentary: require(env::var("CRYPTOCOMPARE_KEY").ok(), "cryptocompare")?,
        })
    }
}

/// JSON file: `{"newsapi": "...", "cryptocompare": "..."}`.
pub struct FileCredentials {
    pub path: PathBuf,
}

#[derive(Deserialize)]
struct KeyFile {
    newsapi: Option<String>,
    cryptocompare: Option<String>,
}

impl CredentialProvider for FileCredentials {
    fn api_keys(&self) -> Result<ApiKeys, StartupError> {
        let raw = std::fs::read_to_string(&self.path)
            .map_err(|e| StartupError::InvalidCredentials(format!("{}: {e}", self.path.display())))?;
        let file: KeyFile = serde_json::from_str(&raw)
            .map_err(|e| StartupError::InvalidCredentials(format!("{}: {e}", self.path.display())))?;
        Ok(ApiKeys {
            news: require(file.newsapi, "newsapi")?,
            commentary: require(file.cryptocompare, "cryptocompare")?,
        })
    }
}

/// Env first, then the key file. The file's error wins if both fail.
pub fn load_api_keys(path: impl Into<PathBuf>) -> Result<ApiKeys, StartupError> {
    EnvCredentials.api_keys().or_else(|_| FileCredentials { path: path.into() }.api_keys())
}
