//! Key to hash slot mapping, bit-compatible with Redis Cluster.

use crc::{Crc, CRC_16_XMODEM};

/// Number of hash slots in the keyspace.
pub const SLOT_COUNT: u16 = 16384;

/// CRC16 calculator for Redis Cluster (XMODEM variant)
static CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Compute the hash slot of a key.
///
/// If the key contains a `{...}` section with at least one byte between the
/// first `{` and the first `}` after it, only that section is hashed.
pub fn key_slot(key: &[u8]) -> u16 {
    CRC16.checksum(hash_tag(key)) % SLOT_COUNT
}

/// The part of `key` that participates in slot computation.
pub fn hash_tag(key: &[u8]) -> &[u8] {
    if let Some(open) = key.iter().position(|&b| b == b'{') {
        if let Some(len) = key[open + 1..].iter().position(|&b| b == b'}') {
            if len > 0 {
                return &key[open + 1..open + 1 + len];
            }
        }
    }
    key
}

/// Whether two keys land in the same slot.
pub fn same_slot(a: &[u8], b: &[u8]) -> bool {
    key_slot(a) == key_slot(b)
}
