//! Key layouts of the ordered column families.
//!
//! Big-endian encodings make byte order match numeric order, so RocksDB's
//! lexicographic iteration walks `(timestamp, sequence)` in order.

/// Maps an `i64` to a `u64` with the same ordering.
fn ordered(timestamp: i64) -> [u8; 8] {
    ((timestamp as u64) ^ (1 << 63)).to_be_bytes()
}

/// Prefix shared by every timeline key of a conversation. The id is length
/// prefixed so that no conversation's keys extend another's prefix.
pub(crate) fn conversation_prefix(conversation_id: &str) -> Vec<u8> {
    let id = conversation_id.as_bytes();
    let mut key = Vec::with_capacity(4 + id.len() + 16);
    key.extend_from_slice(&(id.len() as u32).to_be_bytes());
    key.extend_from_slice(id);
    key
}

/// `len(conversation) | conversation | timestamp | sequence`
pub(crate) fn timeline(conversation_id: &str, timestamp: i64, sequence: u64) -> Vec<u8> {
    let mut key = conversation_prefix(conversation_id);
    key.extend_from_slice(&ordered(timestamp));
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}

/// `timestamp | sequence`
pub(crate) fn backlog(timestamp: i64, sequence: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&ordered(timestamp));
    key[8..].copy_from_slice(&sequence.to_be_bytes());
    key
}

pub(crate) fn status(name: &str) -> Vec<u8> {
    let mut key = b"status/".to_vec();
    key.extend_from_slice(name.as_bytes());
    key
}

pub(crate) const NEXT_SEQUENCE: &[u8] = b"next_sequence";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_sort_numerically() {
        let values = [i64::MIN, -1000, -1, 0, 1, 999, i64::MAX];
        let keys: Vec<_> = values.iter().map(|&ts| timeline("c", ts, 0)).collect();

        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn sequence_breaks_timestamp_ties() {
        assert!(timeline("c", 5, 1) < timeline("c", 5, 2));
        assert!(timeline("c", 5, u64::MAX) < timeline("c", 6, 0));
    }

    #[test]
    fn conversations_do_not_share_prefixes() {
        let short = timeline("ab", 0, 0);

        assert!(!timeline("abc", 0, 0).starts_with(&conversation_prefix("ab")));
        assert!(short.starts_with(&conversation_prefix("ab")));
    }
}
