//! Identifiers: interned document ids and per-operation ids.

use lasso::{Spur, ThreadedRodeo};
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};

static INTERNER: LazyLock<ThreadedRodeo> = LazyLock::new(ThreadedRodeo::default);

/// Interned document id. Copying and comparing never touches the string;
/// the text is resolved only for display and serialization.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentId(Spur);

impl DocumentId {
    pub fn intern(s: &str) -> Self {
        DocumentId(INTERNER.get_or_intern(s))
    }

    pub fn as_str(&self) -> &str {
        INTERNER.resolve(&self.0)
    }

    /// Generate a fresh document ID (`doc_<millis>_<random>`).
    pub fn generate() -> Self {
        Self::intern(&format!("doc_{}_{:08x}", now_millis(), rand::thread_rng().r#gen::<u32>()))
    }
}

impl fmt::Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.as_str())
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for DocumentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DocumentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(DocumentId::intern(&s))
    }
}

/// Globally unique identifier of one in-flight engine operation.
///
/// Built from wall-clock milliseconds plus a random nonce, so ids from
/// separate engine instances never collide in logs.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId {
    millis: u64,
    nonce: u32,
}

impl OperationId {
    pub fn generate() -> Self {
        Self {
            millis: now_millis(),
            nonce: rand::thread_rng().r#gen(),
        }
    }
}

impl fmt::Debug for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op_{}_{:08x}", self.millis, self.nonce)
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Milliseconds since the Unix epoch (0 if the clock is before it).
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_roundtrip() {
        let a = DocumentId::intern("sketch-1");
        let b = DocumentId::intern("sketch-1");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "sketch-1");
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(DocumentId::generate(), DocumentId::generate());
        assert_ne!(OperationId::generate(), OperationId::generate());
    }

    #[test]
    fn operation_id_display() {
        let id = OperationId::generate();
        assert!(id.to_string().starts_with("op_"));
    }
}
