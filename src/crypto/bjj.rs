/// Baby Jubjub Poseidon EdDSA.
///
/// Private keys are 32 random bytes; the public key is the 32-byte compressed
/// Edwards point. Signatures are the 64-byte compressed form
/// `R8.compressed(32) || S(32)`. Digests are interpreted as little-endian
/// integers and must lie in the curve's base field.
use std::sync::LazyLock;

use babyjubjub_rs::{decompress_point, decompress_signature, PrivateKey};
use num_bigint::{BigInt, Sign};
use rand::RngCore;

use crate::crypto::SensitiveBytes32;
use crate::error::{KmsError, Result};

pub const COMPRESSED_PUBLIC_KEY_LEN: usize = 32;
pub const COMPRESSED_SIGNATURE_LEN: usize = 64;
pub const MAX_DIGEST_LEN: usize = 32;

/// Order of the BN254 scalar field, the base field of Baby Jubjub.
static FIELD_ORDER: LazyLock<BigInt> = LazyLock::new(|| {
    BigInt::parse_bytes(
        b"21888242871839275222246405745257275088548364400416034343698204186575808495617",
        10,
    )
    .expect("static field order")
});

/// Generate a random private scalar.
pub fn generate_private_key() -> SensitiveBytes32 {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    SensitiveBytes32::new(bytes)
}

fn import(private_key: &[u8; 32]) -> Result<PrivateKey> {
    PrivateKey::import(private_key.to_vec())
        .map_err(|e| KmsError::backend("bjj import", e))
}

/// Derive the compressed public point from a private scalar.
pub fn public_key_compressed(private_key: &[u8; 32]) -> Result<[u8; COMPRESSED_PUBLIC_KEY_LEN]> {
    Ok(import(private_key)?.public().compress())
}

/// Interpret a digest as a little-endian field element.
///
/// Fails with `InvalidDigest` when the digest is longer than 32 bytes or its
/// integer value is not below the field order.
pub fn digest_to_field_element(digest: &[u8]) -> Result<BigInt> {
    if digest.len() > MAX_DIGEST_LEN {
        return Err(KmsError::InvalidDigest(format!(
            "digest is {} bytes, maximum is {MAX_DIGEST_LEN}",
            digest.len()
        )));
    }
    let value = BigInt::from_bytes_le(Sign::Plus, digest);
    if value >= *FIELD_ORDER {
        return Err(KmsError::InvalidDigest(
            "digest is not an element of the Baby Jubjub base field".to_string(),
        ));
    }
    Ok(value)
}

/// Poseidon EdDSA signature over a digest, in 64-byte compressed form.
pub fn sign(private_key: &[u8; 32], digest: &[u8]) -> Result<[u8; COMPRESSED_SIGNATURE_LEN]> {
    let message = digest_to_field_element(digest)?;
    let signature = import(private_key)?
        .sign(message)
        .map_err(|e| KmsError::backend("bjj sign", e))?;
    Ok(signature.compress())
}

/// Verify a 64-byte compressed signature against a compressed public point.
pub fn verify(
    public_key: &[u8; COMPRESSED_PUBLIC_KEY_LEN],
    digest: &[u8],
    signature: &[u8; COMPRESSED_SIGNATURE_LEN],
) -> Result<bool> {
    let message = digest_to_field_element(digest)?;
    let point = decompress_point(*public_key).map_err(|_| KmsError::InvalidSignature)?;
    let signature = decompress_signature(signature).map_err(|_| KmsError::InvalidSignature)?;
    Ok(babyjubjub_rs::verify(point, signature, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_roundtrip() {
        let sk = generate_private_key();
        let pk = public_key_compressed(sk.as_bytes()).unwrap();
        let digest = [0x17u8; 32];

        let sig = sign(sk.as_bytes(), &digest).unwrap();
        assert!(verify(&pk, &digest, &sig).unwrap());
    }

    #[test]
    fn test_wrong_digest_fails_verification() {
        let sk = generate_private_key();
        let pk = public_key_compressed(sk.as_bytes()).unwrap();

        let sig = sign(sk.as_bytes(), &[0x01u8; 32]).unwrap();
        assert!(!verify(&pk, &[0x02u8; 32], &sig).unwrap());
    }

    #[test]
    fn test_wrong_key_fails_verification() {
        let sk = generate_private_key();
        let other_pk = public_key_compressed(generate_private_key().as_bytes()).unwrap();
        let digest = [0x05u8; 32];

        let sig = sign(sk.as_bytes(), &digest).unwrap();
        assert!(!verify(&other_pk, &digest, &sig).unwrap());
    }

    #[test]
    fn test_digest_longer_than_32_bytes_rejected() {
        let sk = generate_private_key();
        let err = sign(sk.as_bytes(), &[0u8; 33]).unwrap_err();
        assert!(matches!(err, KmsError::InvalidDigest(_)));
    }

    #[test]
    fn test_digest_outside_field_rejected() {
        let sk = generate_private_key();
        // 0xff * 32 little-endian is well above the field order.
        let err = sign(sk.as_bytes(), &[0xffu8; 32]).unwrap_err();
        assert!(matches!(err, KmsError::InvalidDigest(_)));
    }

    #[test]
    fn test_short_digest_is_accepted() {
        let sk = generate_private_key();
        let pk = public_key_compressed(sk.as_bytes()).unwrap();

        let sig = sign(sk.as_bytes(), b"hello").unwrap();
        assert!(verify(&pk, b"hello", &sig).unwrap());
    }

    #[test]
    fn test_public_key_is_deterministic() {
        let sk = generate_private_key();
        let a = public_key_compressed(sk.as_bytes()).unwrap();
        let b = public_key_compressed(sk.as_bytes()).unwrap();
        assert_eq!(a, b);
    }
}
