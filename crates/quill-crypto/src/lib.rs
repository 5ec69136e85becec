//! Log root signing and verification.
//!
//! The sequencer signs the canonical `LogRootV1` encoding of every root it
//! stores through the [`RootSigner`] trait. [`Ed25519RootSigner`] is the
//! production signer; [`verify_signed_log_root`] is what auditors run.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use quill_types::{RequestContext, RootEncodingError, SignedLogRoot};
use tracing::debug;

/// Errors from signing or verifying a root.
#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    /// The signer could not produce a signature.
    #[error("signing failed: {0}")]
    Signing(String),

    /// The signature is not a well-formed ed25519 signature.
    #[error("malformed signature: expected 64 bytes, got {0}")]
    MalformedSignature(usize),

    /// The root has no canonical encoding.
    #[error("cannot encode log root: {0}")]
    Encoding(#[from] RootEncodingError),

    /// The signature does not verify against the root and key.
    #[error("invalid root signature")]
    InvalidSignature,

    /// The request was cancelled before signing finished.
    #[error(transparent)]
    Cancelled(#[from] quill_types::Cancelled),
}

pub type Result<T> = std::result::Result<T, SignerError>;

/// Signs canonical log root bytes.
#[async_trait::async_trait]
pub trait RootSigner: Send + Sync {
    /// Sign `message`, the canonical encoding of a log root.
    async fn sign(&self, ctx: &RequestContext, message: &[u8]) -> Result<Vec<u8>>;

    /// Public key bytes verifiers use for roots from this signer.
    fn public_key(&self) -> Vec<u8>;
}

/// [`RootSigner`] holding an in-process ed25519 key.
pub struct Ed25519RootSigner {
    key: SigningKey,
}

impl Ed25519RootSigner {
    /// Create a signer from a 32-byte secret key seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(&seed),
        }
    }

    /// Wrap an existing signing key.
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }

    /// The verifying half of the key.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }
}

#[async_trait::async_trait]
impl RootSigner for Ed25519RootSigner {
    async fn sign(&self, ctx: &RequestContext, message: &[u8]) -> Result<Vec<u8>> {
        ctx.check()?;
        let signature: Signature = self.key.sign(message);
        debug!(len = message.len(), "signed log root");
        Ok(signature.to_bytes().to_vec())
    }

    fn public_key(&self) -> Vec<u8> {
        self.key.verifying_key().to_bytes().to_vec()
    }
}

/// Check that `root.signature` is a valid ed25519 signature by `key` over
/// the canonical encoding of `root.root`.
pub fn verify_signed_log_root(key: &VerifyingKey, root: &SignedLogRoot) -> Result<()> {
    let bytes: [u8; 64] = root
        .signature
        .as_slice()
        .try_into()
        .map_err(|_| SignerError::MalformedSignature(root.signature.len()))?;
    let signature = Signature::from_bytes(&bytes);
    key.verify(&root.signed_bytes()?, &signature)
        .map_err(|_| SignerError::InvalidSignature)
}
