/// Curve-specific key providers.
///
/// - `bjj` and `eth` keep private key material behind a
///   [`crate::storage::StorageManager`] and park unbound keys in an
///   in-memory temporary map until they are linked.
/// - `aws_kms` delegates custody of secp256k1 keys to AWS KMS; private bytes
///   never leave the cloud.
pub mod aws_kms;
pub mod bjj;
pub mod eth;
