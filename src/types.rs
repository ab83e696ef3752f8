//! Basic type definitions for the chatroom
//!
//! Provides newtype wrappers for type safety:
//! - `ConnectionId`: UUID-based identifier for an admitted connection
//! - `Username`: validated, case-sensitive chat name

use std::borrow::Borrow;

use uuid::Uuid;

use crate::error::UsernameError;

/// Unique connection identifier (newtype pattern)
///
/// Two handles registered under the same username at different times
/// never share a `ConnectionId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Create a new random connection ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A chat username
///
/// Non-empty, no interior whitespace, does not start with the command
/// prefix. Comparison is case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Username(String);

impl Username {
    /// Validate a candidate name, trimming surrounding whitespace
    pub fn parse(raw: &str) -> Result<Self, UsernameError> {
        let name = raw.trim();
        if name.is_empty() {
            return Err(UsernameError::Empty);
        }
        if name.chars().any(char::is_whitespace) {
            return Err(UsernameError::ContainsWhitespace);
        }
        if name.starts_with('/') {
            return Err(UsernameError::CommandPrefix);
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Username {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Username {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
