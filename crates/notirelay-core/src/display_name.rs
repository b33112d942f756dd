use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Placeholder shown when a source's label cannot be resolved.
pub const UNKNOWN_DISPLAY_NAME: &str = "(unknown)";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DisplayNameError {
    #[error("no label registered for source {0}")]
    UnknownSource(String),

    #[error("label for source {0} is blank")]
    BlankLabel(String),
}

/// Maps a source application id to its human-readable label.
pub trait DisplayNameResolver: Send + Sync {
    fn resolve(&self, source_id: &str) -> Result<String, DisplayNameError>;

    /// Best-effort resolution: any failure degrades to [`UNKNOWN_DISPLAY_NAME`].
    fn resolve_or_placeholder(&self, source_id: &str) -> String {
        self.resolve(source_id)
            .unwrap_or_else(|_| UNKNOWN_DISPLAY_NAME.to_owned())
    }
}

impl<T: DisplayNameResolver + ?Sized> DisplayNameResolver for &T {
    fn resolve(&self, source_id: &str) -> Result<String, DisplayNameError> {
        (**self).resolve(source_id)
    }
}

/// Static label table, typically loaded from the settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelTable {
    labels: HashMap<String, String>,
}

impl LabelTable {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_label(mut self, source_id: impl Into<String>, label: impl Into<String>) -> Self {
        self.labels.insert(source_id.into(), label.into());
        self
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl From<HashMap<String, String>> for LabelTable {
    fn from(labels: HashMap<String, String>) -> Self {
        Self { labels }
    }
}

impl DisplayNameResolver for LabelTable {
    fn resolve(&self, source_id: &str) -> Result<String, DisplayNameError> {
        let label = self
            .labels
            .get(source_id)
            .ok_or_else(|| DisplayNameError::UnknownSource(source_id.to_owned()))?;
        let trimmed = label.trim();
        if trimmed.is_empty() {
            return Err(DisplayNameError::BlankLabel(source_id.to_owned()));
        }
        Ok(trimmed.to_owned())
    }
}
