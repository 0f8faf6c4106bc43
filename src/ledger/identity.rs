//! Signing identity for ledger submissions
//!
//! Ownership is implicit in the signature: the owner of a record is the
//! ed25519 public key that signed the submission.

use super::{Owner, RecordPointer, TxHash};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Identity errors
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("invalid signing key: {0}")]
    InvalidKey(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("cannot encode submission: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Everything a submission commits to, minus the signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedSubmission {
    /// Record store (contract) this submission is addressed to
    pub record_store: String,
    pub owner: Owner,
    pub nonce: u64,
    pub pointer: RecordPointer,
}

impl UnsignedSubmission {
    /// Canonical bytes covered by the signature
    pub fn signing_bytes(&self) -> Result<Vec<u8>, IdentityError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Signed submission as sent to the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    #[serde(flatten)]
    pub body: UnsignedSubmission,
    /// Hex-encoded ed25519 signature over `body.signing_bytes()`
    pub signature: String,
}

impl Submission {
    /// Check the signature against the owner key
    pub fn verify(&self) -> Result<(), IdentityError> {
        let key = VerifyingKey::from_bytes(self.body.owner.as_bytes())
            .map_err(|e| IdentityError::InvalidKey(e.to_string()))?;
        let raw = hex::decode(&self.signature)
            .map_err(|e| IdentityError::InvalidSignature(e.to_string()))?;
        let signature = Signature::from_slice(&raw)
            .map_err(|e| IdentityError::InvalidSignature(e.to_string()))?;

        key.verify(&self.body.signing_bytes()?, &signature)
            .map_err(|e| IdentityError::InvalidSignature(e.to_string()))
    }

    /// SHA-256 over the signed body and the signature
    pub fn tx_hash(&self) -> Result<TxHash, IdentityError> {
        let mut hasher = Sha256::new();
        hasher.update(self.body.signing_bytes()?);
        hasher.update(self.signature.as_bytes());
        Ok(TxHash(hasher.finalize().into()))
    }
}

/// Signing identity
pub struct Identity {
    key: SigningKey,
}

impl Identity {
    /// Load from a 32-byte hex secret (optionally `0x`-prefixed)
    pub fn from_hex(secret: &str) -> Result<Self, IdentityError> {
        let secret = secret.trim();
        let secret = secret.strip_prefix("0x").unwrap_or(secret);
        let bytes = hex::decode(secret).map_err(|e| IdentityError::InvalidKey(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| IdentityError::InvalidKey(format!("expected 32 bytes, got {}", b.len())))?;
        Ok(Self {
            key: SigningKey::from_bytes(&bytes),
        })
    }

    /// Fresh random identity
    pub fn generate() -> Self {
        Self {
            key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn owner(&self) -> Owner {
        Owner(self.key.verifying_key().to_bytes())
    }

    pub fn sign(&self, body: UnsignedSubmission) -> Result<Submission, IdentityError> {
        let signature = self.key.sign(&body.signing_bytes()?);
        Ok(Submission {
            body,
            signature: hex::encode(signature.to_bytes()),
        })
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("owner", &self.owner())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ContentAddress;

    fn body(identity: &Identity, nonce: u64) -> UnsignedSubmission {
        UnsignedSubmission {
            record_store: "filehub".to_string(),
            owner: identity.owner(),
            nonce,
            pointer: RecordPointer::Metadata {
                uri: "ipfs://QmMeta".to_string(),
                content_address: Some(ContentAddress::parse("QmFile").unwrap()),
            },
        }
    }

    #[test]
    fn test_sign_and_verify() {
        let identity = Identity::generate();
        let submission = identity.sign(body(&identity, 0)).unwrap();
        submission.verify().unwrap();
    }

    #[test]
    fn test_tampered_submission_fails() {
        let identity = Identity::generate();
        let mut submission = identity.sign(body(&identity, 0)).unwrap();
        submission.body.nonce = 1;
        assert!(matches!(
            submission.verify(),
            Err(IdentityError::InvalidSignature(_))
        ));
    }

    #[test]
    fn test_foreign_owner_fails() {
        let alice = Identity::generate();
        let mallory = Identity::generate();
        let mut unsigned = body(&alice, 0);
        unsigned.owner = alice.owner();
        let submission = mallory.sign(unsigned).unwrap();
        assert!(submission.verify().is_err());
    }

    #[test]
    fn test_from_hex() {
        let secret = "0x".to_string() + &"11".repeat(32);
        let a = Identity::from_hex(&secret).unwrap();
        let b = Identity::from_hex(&"11".repeat(32)).unwrap();
        assert_eq!(a.owner(), b.owner());
        assert!(Identity::from_hex("abcd").is_err());
        assert!(Identity::from_hex("zz").is_err());
    }

    #[test]
    fn test_tx_hash_tracks_content() {
        let identity = Identity::from_hex(&"22".repeat(32)).unwrap();
        let first = identity.sign(body(&identity, 0)).unwrap();
        let again = identity.sign(body(&identity, 0)).unwrap();
        let next = identity.sign(body(&identity, 1)).unwrap();

        // ed25519 signatures are deterministic
        assert_eq!(first.tx_hash().unwrap(), again.tx_hash().unwrap());
        assert_ne!(first.tx_hash().unwrap(), next.tx_hash().unwrap());
    }

    #[test]
    fn test_debug_hides_secret() {
        let identity = Identity::from_hex(&"33".repeat(32)).unwrap();
        let printed = format!("{:?}", identity);
        assert!(!printed.contains(&"33".repeat(32)));
    }
}
