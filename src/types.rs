//! Basic type definitions
//!
//! Provides newtype wrappers for the wire identifiers:
//! - `ClientId`: numeric client id, kept as the string the wire sends
//! - `ChannelId`: numeric channel id, same treatment

use serde::{Deserialize, Serialize};

/// Client identifier (newtype pattern)
///
/// Stable for the lifetime of one ClientQuery connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub String);

impl ClientId {
    /// Create a client id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as the wire string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last-resort display name built from the trailing digits of the id
    pub fn placeholder_name(&self) -> String {
        let start = self
            .0
            .char_indices()
            .rev()
            .nth(3)
            .map(|(i, _)| i)
            .unwrap_or(0);
        format!("User-{}", &self.0[start..])
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Channel identifier
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub String);

impl ChannelId {
    /// Create a channel id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as the wire string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check if no channel is known
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for ChannelId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
