/// secp256k1 keygen and Ethereum-style recoverable signatures.
///
/// Signatures are the 65-byte `r(32) || s(32) || v(1)` form with
/// `v ∈ {27, 28}` and low-S enforced, the unique canonical encoding accepted
/// by Ethereum consensus rules.
use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;

use crate::crypto::SensitiveBytes32;
use crate::error::{KmsError, Result};

pub const COMPRESSED_PUBLIC_KEY_LEN: usize = 33;
pub const SIGNATURE_LEN: usize = 65;
pub const DIGEST_LEN: usize = 32;

/// Offset added to the raw recovery id, per the Ethereum convention.
pub const RECOVERY_ID_OFFSET: u8 = 27;

/// Generate a random private scalar.
pub fn generate_private_key() -> SensitiveBytes32 {
    let signing_key = SigningKey::random(&mut OsRng);
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&signing_key.to_bytes());
    SensitiveBytes32::new(bytes)
}

fn signing_key(private_key: &[u8]) -> Result<SigningKey> {
    SigningKey::from_slice(private_key).map_err(|e| KmsError::backend("secp256k1 key", e))
}

/// Derive the 33-byte compressed SEC1 public key from a private scalar.
pub fn public_key_compressed(private_key: &[u8]) -> Result<[u8; COMPRESSED_PUBLIC_KEY_LEN]> {
    let point = signing_key(private_key)?
        .verifying_key()
        .to_encoded_point(true);
    let mut bytes = [0u8; COMPRESSED_PUBLIC_KEY_LEN];
    bytes.copy_from_slice(point.as_bytes());
    Ok(bytes)
}

/// Sign a 32-byte digest, returning the 65-byte recoverable form.
pub fn sign_recoverable(private_key: &[u8], digest: &[u8]) -> Result<[u8; SIGNATURE_LEN]> {
    if digest.len() != DIGEST_LEN {
        return Err(KmsError::InvalidDigest(format!(
            "digest is {} bytes, expected {DIGEST_LEN}",
            digest.len()
        )));
    }
    // k256 signs with low-S normalization; the recovery id already accounts
    // for it.
    let (signature, recovery_id) = signing_key(private_key)?
        .sign_prehash_recoverable(digest)
        .map_err(|e| KmsError::backend("secp256k1 sign", e))?;

    let mut out = [0u8; SIGNATURE_LEN];
    out[..64].copy_from_slice(&signature.to_bytes());
    out[64] = recovery_id.to_byte() + RECOVERY_ID_OFFSET;
    Ok(out)
}

/// Verify the `r||s` part of a signature against a SEC1 public key.
pub fn verify_prehash(public_key: &[u8], digest: &[u8], signature_rs: &[u8]) -> Result<bool> {
    let verifying_key = VerifyingKey::from_sec1_bytes(public_key)
        .map_err(|e| KmsError::backend("secp256k1 public key", e))?;
    let signature =
        Signature::from_slice(signature_rs).map_err(|_| KmsError::InvalidSignature)?;
    Ok(verifying_key.verify_prehash(digest, &signature).is_ok())
}

/// Recover the compressed public key from a 65-byte recoverable signature.
pub fn recover_compressed(
    digest: &[u8],
    signature: &[u8; SIGNATURE_LEN],
) -> Result<[u8; COMPRESSED_PUBLIC_KEY_LEN]> {
    let recovery_id = signature[64]
        .checked_sub(RECOVERY_ID_OFFSET)
        .and_then(RecoveryId::from_byte)
        .ok_or(KmsError::InvalidSignature)?;
    let sig = Signature::from_slice(&signature[..64]).map_err(|_| KmsError::InvalidSignature)?;
    let recovered = VerifyingKey::recover_from_prehash(digest, &sig, recovery_id)
        .map_err(|_| KmsError::InvalidSignature)?;

    let point = recovered.to_encoded_point(true);
    let mut bytes = [0u8; COMPRESSED_PUBLIC_KEY_LEN];
    bytes.copy_from_slice(point.as_bytes());
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_roundtrip() {
        let sk = generate_private_key();
        let pk = public_key_compressed(sk.as_bytes()).unwrap();
        let digest = [0x3cu8; 32];

        let sig = sign_recoverable(sk.as_bytes(), &digest).unwrap();
        assert!(verify_prehash(&pk, &digest, &sig[..64]).unwrap());
    }

    #[test]
    fn test_recover_matches_public_key() {
        let sk = generate_private_key();
        let pk = public_key_compressed(sk.as_bytes()).unwrap();
        let digest = [0x11u8; 32];

        let sig = sign_recoverable(sk.as_bytes(), &digest).unwrap();
        assert!(sig[64] == 27 || sig[64] == 28);
        assert_eq!(recover_compressed(&digest, &sig).unwrap(), pk);
    }

    #[test]
    fn test_signature_is_low_s() {
        let sk = generate_private_key();
        for byte in 0u8..16 {
            let digest = [byte; 32];
            let sig = sign_recoverable(sk.as_bytes(), &digest).unwrap();
            let parsed = Signature::from_slice(&sig[..64]).unwrap();
            assert!(parsed.normalize_s().is_none(), "high-S signature emitted");
        }
    }

    #[test]
    fn test_wrong_length_digest_rejected() {
        let sk = generate_private_key();
        let err = sign_recoverable(sk.as_bytes(), &[0u8; 31]).unwrap_err();
        assert!(matches!(err, KmsError::InvalidDigest(_)));
    }

    #[test]
    fn test_compressed_public_key_shape() {
        let sk = generate_private_key();
        let pk = public_key_compressed(sk.as_bytes()).unwrap();
        assert!(pk[0] == 0x02 || pk[0] == 0x03);
    }
}
