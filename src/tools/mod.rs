//! Tools the heartbeat may invoke on the backend's behalf.

pub mod builtin;
pub mod path_safety;

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::Result;

/// Risk class of a tool; decides which assurance threshold applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolClass {
    /// Observes state only.
    ReadOnly,
    /// Changes files, runs commands, or talks to people.
    Mutating,
}

/// Boxed future returned by [`Tool::call`].
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

/// One invocable capability.
pub trait Tool: Send + Sync {
    /// Name the backend uses to request the tool.
    fn name(&self) -> &str;

    /// One-line description included in the tool manifest.
    fn description(&self) -> &str;

    /// Risk class.
    fn class(&self) -> ToolClass;

    /// Invoke with the backend-supplied parameters.
    fn call<'a>(&'a self, params: &'a Value) -> ToolFuture<'a>;
}

/// Manifest entry sent to the backend.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ToolManifest {
    /// Tool name.
    pub name: String,
    /// What it does.
    pub description: String,
    /// Risk class.
    pub class: ToolClass,
}

/// Name-indexed tool set.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a tool.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_owned(), tool);
    }

    /// Look up a tool.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Manifest of every tool, sorted by name.
    #[must_use]
    pub fn manifest(&self) -> Vec<ToolManifest> {
        self.tools
            .values()
            .map(|tool| ToolManifest {
                name: tool.name().to_owned(),
                description: tool.description().to_owned(),
                class: tool.class(),
            })
            .collect()
    }
}
