//! User-defined specialist agents addressed with `@id`.

use serde::{Deserialize, Serialize};

/// A specialist whose instructions are prepended to delegated work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Delegate {
    /// Handle used after `@`.
    pub id: String,
    /// Display name.
    pub name: String,
    /// One-line summary.
    #[serde(default)]
    pub description: String,
    /// Specialised instructions.
    pub instructions: String,
    /// Tool names the delegate prefers.
    #[serde(default)]
    pub skills: Vec<String>,
}

impl Delegate {
    /// Compose the task content for a delegated request.
    #[must_use]
    pub fn augment(&self, user_task: &str) -> String {
        format!(
            "DELEGATE AGENT: {}\nINSTRUCTIONS: {}\n\nUSER TASK: {user_task}",
            self.name, self.instructions
        )
    }
}
