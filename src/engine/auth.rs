// Sommaii Chat Engine — Token Store
//
// Holds the current access/refresh pair. Reads are cheap clones; `replace`
// swaps both tokens at once so no reader ever sees a mixed pair.
// With a backing file, every replace/clear is written through.

use crate::atoms::error::EngineResult;
use crate::atoms::types::TokenPair;
use log::{info, warn};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};

#[derive(Debug, Default)]
pub struct TokenStore {
    tokens: RwLock<Option<TokenPair>>,
    path: Option<PathBuf>,
}

impl TokenStore {
    /// In-memory store.
    pub fn new(tokens: Option<TokenPair>) -> Self {
        TokenStore {
            tokens: RwLock::new(tokens),
            path: None,
        }
    }

    /// File-backed store. A missing file means "signed out".
    pub fn load(path: impl Into<PathBuf>) -> EngineResult<Self> {
        let path = path.into();
        let tokens = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            Some(serde_json::from_str::<TokenPair>(&raw)?)
        } else {
            None
        };
        Ok(TokenStore {
            tokens: RwLock::new(tokens),
            path: Some(path),
        })
    }

    pub fn get(&self) -> Option<TokenPair> {
        self.tokens.read().clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.tokens.read().as_ref().map(|t| t.access_token.clone())
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.tokens.read().as_ref().map(|t| t.refresh_token.clone())
    }

    pub fn is_signed_in(&self) -> bool {
        self.tokens.read().is_some()
    }

    /// Atomically install a new pair. A persistence failure is logged;
    /// the in-memory pair is still replaced.
    pub fn replace(&self, tokens: TokenPair) {
        let mut guard = self.tokens.write();
        if let Some(path) = &self.path {
            if let Err(e) = persist(path, &tokens) {
                warn!("[auth] Failed to persist tokens to {}: {}", path.display(), e);
            }
        }
        *guard = Some(tokens);
    }

    pub fn clear(&self) {
        let mut guard = self.tokens.write();
        if let Some(path) = &self.path {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(path) {
                    warn!("[auth] Failed to remove {}: {}", path.display(), e);
                }
            }
        }
        *guard = None;
        info!("[auth] Tokens cleared");
    }
}

fn persist(path: &Path, tokens: &TokenPair) -> EngineResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_vec(tokens)?)?;
    Ok(())
}
