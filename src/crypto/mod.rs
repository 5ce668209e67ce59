/// Cryptographic adapters for the two supported curves.
///
/// - `bjj`: Baby Jubjub keygen and Poseidon EdDSA signatures (64-byte
///   compressed form).
/// - `eth`: secp256k1 keygen and 65-byte recoverable Ethereum signatures.
/// - `recovery`: the pure ASN.1-DER → Ethereum signature adapter used by the
///   cloud-KMS provider.
pub mod bjj;
pub mod eth;
pub mod recovery;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Raw 32-byte private scalar, zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SensitiveBytes32([u8; 32]);

impl SensitiveBytes32 {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        if slice.len() != 32 {
            return None;
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(slice);
        Some(Self(bytes))
    }

    /// Lowercase hex of the scalar, the storage-layer encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        Self::from_slice(&bytes)
    }
}

impl AsRef<[u8]> for SensitiveBytes32 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensitive_bytes32() {
        let key = SensitiveBytes32::new([0xAA; 32]);
        assert_eq!(key.as_bytes(), &[0xAA; 32]);
    }

    #[test]
    fn test_sensitive_bytes32_from_slice() {
        assert!(SensitiveBytes32::from_slice(&[0u8; 32]).is_some());
        assert!(SensitiveBytes32::from_slice(&[0u8; 16]).is_none());
    }

    #[test]
    fn test_hex_roundtrip() {
        let key = SensitiveBytes32::new([0x42; 32]);
        let restored = SensitiveBytes32::from_hex(&key.to_hex()).unwrap();
        assert_eq!(restored.as_bytes(), key.as_bytes());
    }
}
