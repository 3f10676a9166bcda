//! Core identifier types for notesync

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Local identifier of a note
///
/// Uses ULID for time-ordered unique identifiers that sort lexicographically.
/// Assigned once at creation and never changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocalId(pub Ulid);

impl LocalId {
    /// Create a new LocalId with current timestamp
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Get the underlying ULID
    pub fn as_ulid(&self) -> &Ulid {
        &self.0
    }

    /// Convert to string representation (storage key and file stem)
    pub fn to_string_repr(&self) -> String {
        self.0.to_string()
    }

    /// Parse from string representation
    pub fn from_string(s: &str) -> Result<Self, ulid::DecodeError> {
        let ulid = Ulid::from_string(s)?;
        Ok(Self(ulid))
    }
}

impl Default for LocalId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LocalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier assigned by the remote store on first upload
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RemoteId(pub String);

impl RemoteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RemoteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// BLAKE3 content digest, hex encoded
///
/// Decides whether content changed. Modification times are never consulted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    /// Fingerprint of the given bytes
    pub fn of(content: &[u8]) -> Self {
        Self(blake3::hash(content).to_hex().to_string())
    }

    /// Fingerprint of empty content
    pub fn empty() -> Self {
        Self::of(&[])
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for log lines
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque position in the remote change feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor(pub String);

impl SyncCursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SyncCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_id_string_roundtrip() {
        let id = LocalId::new();
        let parsed = LocalId::from_string(&id.to_string_repr()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_local_id_rejects_garbage() {
        assert!(LocalId::from_string("not-a-ulid").is_err());
    }

    #[test]
    fn test_fingerprint_is_content_addressed() {
        assert_eq!(Fingerprint::of(b"hello"), Fingerprint::of(b"hello"));
        assert_ne!(Fingerprint::of(b"hello"), Fingerprint::of(b"hello!"));
        assert_eq!(Fingerprint::empty(), Fingerprint::of(b""));
        assert_eq!(Fingerprint::of(b"x").as_str().len(), 64);
        assert_eq!(Fingerprint::of(b"x").short().len(), 12);
    }
}
