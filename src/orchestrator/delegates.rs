//! Registry of `@id` delegate agents.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::models::delegate::Delegate;
use crate::{AppError, Result};

static MENTION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)^@([A-Za-z0-9_-]+)\s+(.+)$").ok());

/// Split `@id rest` into `(id, rest)`.
#[must_use]
pub fn parse_mention(text: &str) -> Option<(&str, &str)> {
    let captures = MENTION.as_ref()?.captures(text.trim())?;
    let id = captures.get(1)?.as_str();
    let rest = captures.get(2)?.as_str().trim();
    if rest.is_empty() {
        return None;
    }
    Some((id, rest))
}

/// Known delegates keyed by id.
#[derive(Default)]
pub struct DelegateRegistry {
    delegates: RwLock<BTreeMap<String, Delegate>>,
}

impl DelegateRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.json` definition in `dir`.
    ///
    /// A missing directory yields an empty registry; unparseable files are
    /// skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the directory path cannot form a glob.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut delegates = BTreeMap::new();
        let pattern = format!(
            "{}/*.json",
            glob::Pattern::escape(&dir.to_string_lossy())
        );
        let paths = glob::glob(&pattern)
            .map_err(|err| AppError::Config(format!("bad delegates dir: {err}")))?;

        for path in paths.filter_map(std::result::Result::ok) {
            let parsed = fs::read_to_string(&path)
                .map_err(|err| err.to_string())
                .and_then(|raw| {
                    serde_json::from_str::<Delegate>(&raw).map_err(|err| err.to_string())
                });
            match parsed {
                Ok(delegate) => {
                    info!(delegate = %delegate.id, path = %path.display(), "delegate loaded");
                    delegates.insert(delegate.id.clone(), delegate);
                }
                Err(err) => warn!(path = %path.display(), %err, "skipping invalid delegate"),
            }
        }

        Ok(Self {
            delegates: RwLock::new(delegates),
        })
    }

    /// Add or replace a delegate.
    pub async fn register(&self, delegate: Delegate) {
        self.delegates
            .write()
            .await
            .insert(delegate.id.clone(), delegate);
    }

    /// Look up a delegate by id.
    pub async fn get(&self, id: &str) -> Option<Delegate> {
        self.delegates.read().await.get(id).cloned()
    }

    /// All delegates sorted by id.
    pub async fn list(&self) -> Vec<Delegate> {
        self.delegates.read().await.values().cloned().collect()
    }
}
