use std::fmt;
use std::str::FromStr;

use cid::Cid;
use multihash_codetable::{Code, MultihashDigest};
use serde::{Deserialize, Serialize};

use crate::canonical;
use crate::error::Error;
use crate::payload::{CodecError, Payload};

/// DAG-CBOR codec code (0x71).
pub const DAG_CBOR_CODEC: u64 = 0x71;

/// Prefix of every reference in the current scheme.
pub const REFERENCE_PREFIX: &str = "v2:";

/// Computes a CID for DAG-CBOR encoded data using SHA2-256.
pub fn compute_cid(data: &[u8]) -> Cid {
    let hash = Code::Sha2_256.digest(data);
    Cid::new_v1(DAG_CBOR_CODEC, hash)
}

/// Computes the reference of a message from its canonical bytes.
pub fn compute_reference(payload: &Payload) -> Result<Reference, CodecError> {
    let bytes = canonical::encode(payload)?;
    Ok(Reference::from_cid(&compute_cid(&bytes)))
}

/// Computes the content-store identifier of a message: the CID of the full
/// payload, `link` included.
pub fn content_id(payload: &Payload) -> Result<Cid, CodecError> {
    Ok(compute_cid(&payload.to_cbor()?))
}

/// A content-derived message reference, `v2:<hash>`.
///
/// The hash part is either a multibase CID string (references computed by
/// this crate) or 64 lowercase hex digits (bare SHA-256 references issued by
/// earlier nodes). Both are accepted on input; the string form is kept as
/// given so that lookups match what was issued.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Reference(String);

impl Reference {
    /// Wraps a CID as a reference.
    pub fn from_cid(cid: &Cid) -> Self {
        Reference(cid.to_string())
    }

    /// Parses `v2:<hash>`.
    pub fn parse(s: &str) -> Result<Self, Error> {
        let hash = s
            .strip_prefix(REFERENCE_PREFIX)
            .ok_or_else(|| Error::InvalidHandle(s.to_string()))?;
        if is_hex_digest(hash) || Cid::from_str(hash).is_ok() {
            Ok(Reference(hash.to_string()))
        } else {
            Err(Error::InvalidHandle(s.to_string()))
        }
    }

    /// Returns the hash part, without the `v2:` prefix.
    pub fn hash(&self) -> &str {
        &self.0
    }
}

fn is_hex_digest(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", REFERENCE_PREFIX, self.0)
    }
}

impl FromStr for Reference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Reference::parse(s)
    }
}

impl TryFrom<String> for Reference {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Reference::parse(&s)
    }
}

impl From<Reference> for String {
    fn from(r: Reference) -> Self {
        r.to_string()
    }
}
