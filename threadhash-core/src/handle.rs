use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::reference::{Reference, REFERENCE_PREFIX};

/// Prefix of an indirect handle.
pub const PREVIOUS_PREFIX: &str = "previous:";

/// A message handle as presented by a client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Handle {
    /// `v2:<hash>`: the message itself.
    Direct(Reference),
    /// `previous:v2:<hash>`: the message immediately preceding the referenced one.
    Previous(Reference),
    /// A bare identifier into the legacy file cache / content store.
    Legacy(String),
}

impl Handle {
    /// Handle of the message preceding `reference`.
    pub fn previous(reference: &Reference) -> Self {
        Handle::Previous(reference.clone())
    }
}

/// Whether `id` can name a legacy node. Legacy identifiers are content-store
/// keys and double as cache file names, so only `[A-Za-z0-9_-]` is allowed.
pub(crate) fn is_legacy_identifier(id: &str) -> bool {
    !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

impl FromStr for Handle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(rest) = s.strip_prefix(PREVIOUS_PREFIX) {
            return Reference::parse(rest).map(Handle::Previous);
        }
        if s.starts_with(REFERENCE_PREFIX) {
            return Reference::parse(s).map(Handle::Direct);
        }
        if is_legacy_identifier(s) {
            Ok(Handle::Legacy(s.to_string()))
        } else {
            Err(Error::InvalidHandle(s.to_string()))
        }
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handle::Direct(r) => write!(f, "{r}"),
            Handle::Previous(r) => write!(f, "{PREVIOUS_PREFIX}{r}"),
            Handle::Legacy(id) => f.write_str(id),
        }
    }
}
