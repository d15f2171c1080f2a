//! Slot Hasher (§4.1): maps a key to one of the 16,384 cluster hash slots.

/// Total number of hash slots in a Redis Cluster.
pub const SLOT_SIZE: u16 = 16384;

/// The sentinel key used when an `EVAL` takes zero keys — hashing the literal
/// string `"no_key"` would be an arbitrary, meaningless slot, so it is pinned
/// to slot 1 instead (§4.1, §8 boundary behaviors).
pub const NO_KEY_SENTINEL: &str = "no_key";

/// Compute the cluster hash slot for `key`.
///
/// Applies the canonical Redis hashtag rule: if `key` contains a `{...}`
/// substring where the `}` follows the `{` and the interior is non-empty,
/// only that interior is hashed. Otherwise the whole key is hashed. This is
/// the corrected rule from §9's open question — the source this spec was
/// distilled from hashes from the first `{` to the first `}` regardless of
/// ordering or emptiness, which mishandles keys like `}foo{`.
pub fn key_slot(key: &str) -> u16 {
    if key == NO_KEY_SENTINEL {
        return 1;
    }
    hash_slot(hashtag(key))
}

/// Extract the hashtag substring to hash, or the whole key if no valid
/// hashtag is present.
fn hashtag(key: &str) -> &str {
    if let Some(open) = key.find('{') {
        if let Some(close_rel) = key[open + 1..].find('}') {
            let close = open + 1 + close_rel;
            if close > open + 1 {
                return &key[open + 1..close];
            }
        }
    }
    key
}

fn hash_slot(data: &str) -> u16 {
    crc16::State::<crc16::XMODEM>::calculate(data.as_bytes()) % SLOT_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_key_sentinel_is_slot_one() {
        assert_eq!(key_slot(NO_KEY_SENTINEL), 1);
    }

    #[test]
    fn slot_is_always_in_range() {
        for key in ["foo", "bar", "{tag}rest", "", "a very long key indeed"] {
            let slot = key_slot(key);
            assert!(slot < SLOT_SIZE);
        }
    }

    #[test]
    fn hashtag_keys_collide() {
        assert_eq!(key_slot("foo{tag}"), key_slot("{tag}"));
        assert_eq!(key_slot("user:{1000}:profile"), key_slot("other:{1000}:x"));
    }

    #[test]
    fn canonical_rule_requires_close_after_open_and_non_empty() {
        // `}foo{` has a `}` before any `{`, so the canonical rule falls back
        // to hashing the whole key rather than the (nonsensical) substring
        // between the first `{` and first `}` that the naive rule would pick.
        assert_eq!(key_slot("}foo{"), hash_slot("}foo{"));
        // An empty hashtag `{}` also falls back to the whole key.
        assert_eq!(key_slot("foo{}bar"), hash_slot("foo{}bar"));
    }

    #[test]
    fn only_first_hashtag_counts() {
        assert_eq!(key_slot("{a}{b}"), key_slot("a"));
    }
}
