//! Attribute-payload encryption seam.
//!
//! Item payloads pass through an `AttributeEncryption` on their way to and
//! from the item, projection, and stream-record relations. The default
//! binding is the identity transform; deployments needing encryption at
//! rest supply their own implementation through the builder. Key columns
//! are never encrypted, they must stay indexable.

use crate::error::Result;

/// Encrypts and decrypts serialized item payloads.
pub trait AttributeEncryption: Send + Sync {
    /// Transform a payload before it is written for `table`.
    fn encrypt(&self, table: &str, plaintext: String) -> Result<String>;

    /// Reverse [`AttributeEncryption::encrypt`].
    fn decrypt(&self, table: &str, ciphertext: String) -> Result<String>;
}

/// Identity implementation, the default.
#[derive(Debug, Default)]
pub struct NoOpEncryption;

impl AttributeEncryption for NoOpEncryption {
    fn encrypt(&self, _table: &str, plaintext: String) -> Result<String> {
        Ok(plaintext)
    }

    fn decrypt(&self, _table: &str, ciphertext: String) -> Result<String> {
        Ok(ciphertext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_roundtrip() {
        let enc = NoOpEncryption;
        let payload = r#"{"id":{"S":"a"}}"#.to_string();
        let stored = enc.encrypt("t", payload.clone()).unwrap();
        assert_eq!(stored, payload);
        assert_eq!(enc.decrypt("t", stored).unwrap(), payload);
    }
}
