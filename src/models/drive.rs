//! Internal drives that bias autonomous behaviour.

use serde::{Deserialize, Serialize};

/// Drive consulted by action gating.
pub const CURIOSITY: &str = "curiosity";

/// A named motivation level in `0.0..=1.0`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Drive {
    /// Display name.
    pub name: String,
    /// Current level.
    pub value: f64,
    /// What the drive represents.
    pub description: String,
}

impl Drive {
    /// Construct a drive, clamping the value.
    #[must_use]
    pub fn new(name: &str, value: f64, description: &str) -> Self {
        Self {
            name: name.to_owned(),
            value: value.clamp(0.0, 1.0),
            description: description.to_owned(),
        }
    }
}
