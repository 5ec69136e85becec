//! Log root (signed tree head) and its canonical encoding.
//!
//! The canonical form is the `LogRootV1` TLS structure, which is what the
//! signer signs and what auditors re-encode to verify a root:
//!
//! ```text
//! struct {
//!     uint16 version = 1;
//!     uint64 tree_size;
//!     opaque root_hash<0..128>;
//!     uint64 timestamp_nanos;
//!     uint64 revision;
//!     opaque metadata<0..65535>;
//! } LogRootV1;
//! ```
//!
//! All integers are big-endian.

use serde::{Deserialize, Serialize};

use crate::Hash;

/// Version tag of the canonical root encoding.
pub const LOG_ROOT_V1: u16 = 1;

const MAX_METADATA_LEN: usize = u16::MAX as usize;

/// Errors encoding or decoding a canonical log root.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RootEncodingError {
    /// Input ended before the structure was complete.
    #[error("log root truncated at offset {0}")]
    Truncated(usize),

    /// Version field is not [`LOG_ROOT_V1`].
    #[error("unsupported log root version {0}")]
    UnsupportedVersion(u16),

    /// Root hash is not 32 bytes.
    #[error("invalid root hash length {0}")]
    InvalidHashLength(usize),

    /// Bytes left over after the metadata field.
    #[error("{0} trailing bytes after log root")]
    TrailingBytes(usize),

    /// Metadata does not fit the 16-bit length prefix.
    #[error("log root metadata is {0} bytes, limit is 65535")]
    MetadataTooLong(usize),
}

/// The statement a log signs: size, root hash and time of one tree revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRoot {
    /// Number of leaves committed to by `root_hash`.
    pub tree_size: u64,
    /// RFC 6962 Merkle tree hash over the first `tree_size` leaves.
    pub root_hash: Hash,
    /// Time the root was produced (unix nanos). Strictly increasing.
    pub timestamp_nanos: u64,
    /// Tree revision. Increases by exactly one per stored root.
    pub revision: u64,
    /// Opaque metadata carried into every subsequent root.
    pub metadata: Vec<u8>,
}

impl LogRoot {
    /// Encode as `LogRootV1`.
    ///
    /// Fails if `metadata` is longer than 65535 bytes.
    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>, RootEncodingError> {
        let metadata = &self.metadata;
        if metadata.len() > MAX_METADATA_LEN {
            return Err(RootEncodingError::MetadataTooLong(metadata.len()));
        }
        let mut out = Vec::with_capacity(2 + 8 + 1 + 32 + 8 + 8 + 2 + metadata.len());
        out.extend_from_slice(&LOG_ROOT_V1.to_be_bytes());
        out.extend_from_slice(&self.tree_size.to_be_bytes());
        out.push(self.root_hash.len() as u8);
        out.extend_from_slice(&self.root_hash);
        out.extend_from_slice(&self.timestamp_nanos.to_be_bytes());
        out.extend_from_slice(&self.revision.to_be_bytes());
        out.extend_from_slice(&(metadata.len() as u16).to_be_bytes());
        out.extend_from_slice(metadata);
        Ok(out)
    }

    /// Decode a `LogRootV1` structure.
    pub fn from_canonical_bytes(bytes: &[u8]) -> Result<Self, RootEncodingError> {
        let mut reader = Reader { bytes, pos: 0 };

        let version = u16::from_be_bytes(reader.take_array()?);
        if version != LOG_ROOT_V1 {
            return Err(RootEncodingError::UnsupportedVersion(version));
        }

        let tree_size = u64::from_be_bytes(reader.take_array()?);
        let hash_len = reader.take(1)?[0] as usize;
        let hash_bytes = reader.take(hash_len)?;
        let root_hash: Hash = hash_bytes
            .try_into()
            .map_err(|_| RootEncodingError::InvalidHashLength(hash_len))?;
        let timestamp_nanos = u64::from_be_bytes(reader.take_array()?);
        let revision = u64::from_be_bytes(reader.take_array()?);
        let metadata_len = u16::from_be_bytes(reader.take_array()?) as usize;
        let metadata = reader.take(metadata_len)?.to_vec();

        let remaining = bytes.len() - reader.pos;
        if remaining != 0 {
            return Err(RootEncodingError::TrailingBytes(remaining));
        }

        Ok(Self {
            tree_size,
            root_hash,
            timestamp_nanos,
            revision,
            metadata,
        })
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], RootEncodingError> {
        let end = self.pos + n;
        if end > self.bytes.len() {
            return Err(RootEncodingError::Truncated(self.pos));
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], RootEncodingError> {
        let pos = self.pos;
        self.take(N)?
            .try_into()
            .map_err(|_| RootEncodingError::Truncated(pos))
    }
}

/// A [`LogRoot`] together with a signature over its canonical encoding.
///
/// Immutable once created. A tree holds at most one per revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedLogRoot {
    /// The signed statement.
    pub root: LogRoot,
    /// Signature over `root.to_canonical_bytes()`.
    pub signature: Vec<u8>,
}

impl SignedLogRoot {
    /// The exact bytes the signature covers.
    pub fn signed_bytes(&self) -> Result<Vec<u8>, RootEncodingError> {
        self.root.to_canonical_bytes()
    }
}
