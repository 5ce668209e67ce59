/// Key-identifier grammar.
///
/// Canonical forms:
///   unbound:  `<KeyType>:<hex>`
///   bound  :  `<identity>/<KeyType>:<hex>`
///   legacy :  `<prefix>/<identity>/<KeyType>:<hex>`   (accepted for read only)
///   cloud  :  `ETH/<cloud-handle>`                    (cloud-KMS ETH keys)
///
/// The hex suffix carries the compressed public key: 64 chars for BJJ
/// (32-byte Edwards point), 66 chars for ETH (33-byte SEC1 point).
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{KmsError, Result};
use crate::kms::{Did, KeyType};

/// A typed key identifier. `id` follows the grammar above; the identifier is
/// *bound* when it carries an identity prefix and *unbound* otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyId {
    pub key_type: KeyType,
    pub id: String,
}

impl KeyId {
    pub fn new(key_type: KeyType, id: impl Into<String>) -> Self {
        Self {
            key_type,
            id: id.into(),
        }
    }
}

/// Hex length of the compressed public key embedded in an id.
pub fn public_key_hex_len(key_type: KeyType) -> usize {
    match key_type {
        KeyType::Bjj => 64,
        KeyType::Eth => 66,
    }
}

/// The two case-insensitive matchers a provider holds: one anchored for the
/// unbound shape, one accepting an arbitrary prefix before `/<KeyType>:<hex>`.
pub struct KeyIdPattern {
    unbound: Regex,
    bound: Regex,
}

impl KeyIdPattern {
    fn compile(key_type: KeyType) -> Self {
        let tag = key_type.to_string();
        let hex_len = public_key_hex_len(key_type);
        let unbound = Regex::new(&format!("(?i)^{tag}:([0-9a-f]{{{hex_len}}})$"))
            .expect("static key id pattern");
        let bound = Regex::new(&format!("(?i)^.+/{tag}:([0-9a-f]{{{hex_len}}})$"))
            .expect("static key id pattern");
        Self { unbound, bound }
    }

    /// True when `id` matches the unbound (identity-less) shape.
    pub fn is_unbound(&self, id: &str) -> bool {
        self.unbound.is_match(id)
    }

    /// Extract the embedded public key hex from either shape, avoiding a
    /// storage round-trip. Returns `None` when the id carries no inline
    /// public material (e.g. cloud handles, import paths).
    pub fn public_key_hex<'a>(&self, id: &'a str) -> Option<&'a str> {
        self.unbound
            .captures(id)
            .or_else(|| self.bound.captures(id))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }
}

static BJJ_PATTERN: LazyLock<KeyIdPattern> = LazyLock::new(|| KeyIdPattern::compile(KeyType::Bjj));
static ETH_PATTERN: LazyLock<KeyIdPattern> = LazyLock::new(|| KeyIdPattern::compile(KeyType::Eth));

/// The matcher pair for a curve.
pub fn pattern(key_type: KeyType) -> &'static KeyIdPattern {
    match key_type {
        KeyType::Bjj => &BJJ_PATTERN,
        KeyType::Eth => &ETH_PATTERN,
    }
}

/// Build the canonical id string for a key.
///
/// With no identity the id is `keyType:publicHex`. When a pre-built unbound
/// id is passed as `public_key_hex`, the type tag is not repeated.
pub fn key_id_for(identity: Option<&Did>, key_type: KeyType, public_key_hex: &str) -> String {
    let tag = key_type.to_string();
    match identity {
        None => format!("{tag}:{public_key_hex}"),
        Some(did) if public_key_hex.starts_with(&tag) => format!("{did}/{public_key_hex}"),
        Some(did) => format!("{did}/{tag}:{public_key_hex}"),
    }
}

/// A decomposed key identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKeyId<'a> {
    pub identity: Option<&'a str>,
    pub key_type: KeyType,
    pub public_key_hex: &'a str,
}

static PARSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("(?i)^(?:(.+)/)?(BJJ|ETH):([0-9a-f]+)$").expect("static key id pattern")
});

/// Parse an id back into `(identity?, key_type, public_key_hex)`.
///
/// Inverse of [`key_id_for`]; fails with `InvalidKeyId` when the id matches
/// no accepted grammar or the hex width is wrong for the curve.
pub fn parse(id: &str) -> Result<ParsedKeyId<'_>> {
    let caps = PARSE
        .captures(id)
        .ok_or_else(|| KmsError::InvalidKeyId(id.to_string()))?;
    let key_type: KeyType = caps
        .get(2)
        .map(|m| m.as_str())
        .unwrap_or_default()
        .parse()?;
    let hex = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
    if hex.len() != public_key_hex_len(key_type) {
        return Err(KmsError::InvalidKeyId(id.to_string()));
    }
    Ok(ParsedKeyId {
        identity: caps.get(1).map(|m| m.as_str()),
        key_type,
        public_key_hex: hex,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BJJ_HEX: &str = "8f3c2a1d4e5b6a7980f1e2d3c4b5a69788f9e0d1c2b3a4958677f8e9d0c1b2a3";
    const ETH_HEX: &str = "02a1b2c3d4e5f60718293a4b5c6d7e8f9001122334455667788990aabbccddeeff";

    #[test]
    fn test_key_id_for_unbound() {
        let id = key_id_for(None, KeyType::Bjj, BJJ_HEX);
        assert_eq!(id, format!("BJJ:{BJJ_HEX}"));
    }

    #[test]
    fn test_key_id_for_bound() {
        let did = Did::new("did:example:abc");
        let id = key_id_for(Some(&did), KeyType::Eth, ETH_HEX);
        assert_eq!(id, format!("did:example:abc/ETH:{ETH_HEX}"));
    }

    #[test]
    fn test_key_id_for_prebuilt_unbound_id_not_double_labelled() {
        let did = Did::new("did:example:abc");
        let unbound = format!("BJJ:{BJJ_HEX}");
        let id = key_id_for(Some(&did), KeyType::Bjj, &unbound);
        assert_eq!(id, format!("did:example:abc/BJJ:{BJJ_HEX}"));
    }

    #[test]
    fn test_parse_roundtrip() {
        for identity in [None, Some(Did::new("did:example:abc"))] {
            for (key_type, hex) in [(KeyType::Bjj, BJJ_HEX), (KeyType::Eth, ETH_HEX)] {
                let id = key_id_for(identity.as_ref(), key_type, hex);
                let parsed = parse(&id).unwrap();
                assert_eq!(parsed.identity, identity.as_ref().map(|d| d.as_str()));
                assert_eq!(parsed.key_type, key_type);
                assert_eq!(parsed.public_key_hex, hex);
            }
        }
    }

    #[test]
    fn test_parse_rejects_wrong_hex_width() {
        assert!(parse(&format!("BJJ:{ETH_HEX}")).is_err());
        assert!(parse(&format!("ETH:{BJJ_HEX}")).is_err());
        assert!(parse("BJJ:abcd").is_err());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse("").is_err());
        assert!(parse("pbkey").is_err());
        assert!(parse("RSA:0011").is_err());
    }

    #[test]
    fn test_pattern_unbound() {
        let p = pattern(KeyType::Bjj);
        assert!(p.is_unbound(&format!("BJJ:{BJJ_HEX}")));
        assert!(!p.is_unbound(&format!("did:example:abc/BJJ:{BJJ_HEX}")));
        assert!(!p.is_unbound(&format!("ETH:{ETH_HEX}")));
    }

    #[test]
    fn test_pattern_extracts_public_key_hex() {
        let p = pattern(KeyType::Eth);
        assert_eq!(
            p.public_key_hex(&format!("ETH:{ETH_HEX}")),
            Some(ETH_HEX)
        );
        assert_eq!(
            p.public_key_hex(&format!("did:example:abc/ETH:{ETH_HEX}")),
            Some(ETH_HEX)
        );
        assert_eq!(p.public_key_hex("ETH/arn:aws:kms:eu-west-1:key/abc"), None);
    }

    #[test]
    fn test_pattern_is_case_insensitive() {
        let p = pattern(KeyType::Bjj);
        let upper = BJJ_HEX.to_uppercase();
        assert!(p.is_unbound(&format!("bjj:{upper}")));
    }

    #[test]
    fn test_pattern_matches_legacy_three_part_path() {
        let p = pattern(KeyType::Bjj);
        let id = format!("keys/did:example:abc/BJJ:{BJJ_HEX}");
        assert_eq!(p.public_key_hex(&id), Some(BJJ_HEX));
    }
}
