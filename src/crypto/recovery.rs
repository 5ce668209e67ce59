/// ASN.1 ECDSA → Ethereum recoverable signature adaptation.
///
/// A cloud signer returns `SEQUENCE { r INTEGER, s INTEGER }` in DER and no
/// recovery id. The adapter normalises `s` to low-S, then searches
/// `v ∈ {0, 1}` by running public-key recovery and comparing against the key
/// known to have signed. The result is the 65-byte `r||s||v` form with
/// `v ∈ {27, 28}`.
use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};

use crate::crypto::eth::{DIGEST_LEN, RECOVERY_ID_OFFSET, SIGNATURE_LEN};
use crate::error::{KmsError, Result};

/// Convert a DER-encoded ECDSA signature over `digest` into the 65-byte
/// Ethereum form, using `public_key` (SEC1, compressed or uncompressed) to
/// resolve the recovery id.
pub fn ethereum_signature_from_der(
    public_key: &[u8],
    digest: &[u8],
    der_signature: &[u8],
) -> Result<[u8; SIGNATURE_LEN]> {
    if digest.len() != DIGEST_LEN {
        return Err(KmsError::InvalidDigest(format!(
            "digest is {} bytes, expected {DIGEST_LEN}",
            digest.len()
        )));
    }

    let expected = VerifyingKey::from_sec1_bytes(public_key)
        .map_err(|e| KmsError::backend("decode signer public key", e))?;
    let signature = Signature::from_der(der_signature)
        .map_err(|e| KmsError::backend("decode DER signature", e))?;

    // Low-S normalisation; never emit the malleable twin.
    let signature = signature.normalize_s().unwrap_or(signature);

    for v in 0..=1u8 {
        let Some(recovery_id) = RecoveryId::from_byte(v) else {
            continue;
        };
        let Ok(recovered) = VerifyingKey::recover_from_prehash(digest, &signature, recovery_id)
        else {
            continue;
        };
        if recovered != expected {
            continue;
        }

        expected
            .verify_prehash(digest, &signature)
            .map_err(|_| KmsError::InvalidSignature)?;

        // r and s serialise as fixed 32-byte big-endian words.
        let mut out = [0u8; SIGNATURE_LEN];
        out[..64].copy_from_slice(&signature.to_bytes());
        out[64] = v + RECOVERY_ID_OFFSET;
        return Ok(out);
    }

    Err(KmsError::RecoveryFailed)
}
