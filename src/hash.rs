//! The hashing pipeline (§4.1): `pre_hash` -> `complete_hash` -> `compress`.
//!
//! These are pure functions; hashing never fails. The 64-bit digest used for
//! byte sequences and strings longer than the fast-key window is a pluggable
//! collaborator (§1) — [`Mixer`] is the seam, [`Xxh3Mixer`] the default.

use crate::key::Key;

/// A large odd mixing constant (the golden-ratio prime used throughout
/// Fibonacci/Knuth-style multiplicative hashing).
const MIX_PRIME: u64 = 0x9E37_79B9_7F4A_7C15;

/// Knuth's multiplicative hash constant for 64-bit words.
const KNUTH_MULTIPLIER: u64 = 0xFF51_AFD7_ED55_8CCD;

/// Longest byte sequence whose bytes are packed directly into a `u64`
/// fast-key instead of being digested (§4.1). Strictly less than the 8-byte
/// buffer width: an 8-byte sequence fills every byte of the buffer with real
/// data, leaving no spare zero byte to fold the length into, so those go
/// through `M::digest` instead, same as any longer sequence. A sequence of
/// length 0..=7 always leaves at least the top byte zero-padded, which is
/// exactly the byte `pack_short_bytes` folds the length into.
pub const FAST_KEY_MAX_LEN: usize = 8;
const FAST_KEY_FULL_LEN: usize = FAST_KEY_MAX_LEN - 1;

/// Pluggable 64-bit digest for the "full mixed digest" branch of
/// [`pre_hash`] (byte sequences and strings longer than
/// [`FAST_KEY_MAX_LEN`]). Swappable for any mixer of comparable avalanche
/// quality.
pub trait Mixer: Send + Sync + 'static {
    fn digest(bytes: &[u8]) -> u64;
}

/// Default mixer: XXH3, already present in this corpus's dependency graph.
#[derive(Debug, Clone, Copy, Default)]
pub struct Xxh3Mixer;

impl Mixer for Xxh3Mixer {
    fn digest(bytes: &[u8]) -> u64 {
        xxhash_rust::xxh3::xxh3_64(bytes)
    }
}

/// Packs up to [`FAST_KEY_FULL_LEN`] bytes little-endian into a `u64`,
/// folding the length into the top byte so that e.g. `b"ab"` and `b"ab\0"`
/// do not collide at the fast-key stage (resolved from
/// `original_source/hasher/hash_func.go`; see SPEC_FULL.md §4.1).
///
/// Only called for `bytes.len() <= FAST_KEY_FULL_LEN` (i.e. < 8): at exactly
/// 8 bytes the buffer has no zero byte left to fold the length into, and
/// XOR-ing it into a byte that already holds real data would make the
/// packing non-injective (an empty key and an 8-byte key ending `...0x08`
/// would both pack to `0`). Callers route length-8 sequences through the
/// mixer instead.
fn pack_short_bytes(bytes: &[u8]) -> u64 {
    debug_assert!(bytes.len() <= FAST_KEY_FULL_LEN);
    let mut buf = [0u8; 8];
    buf[..bytes.len()].copy_from_slice(bytes);
    u64::from_le_bytes(buf) ^ ((bytes.len() as u64) << 56)
}

/// `preHash(key) -> (preHash, typeTag, isFull)` (§4.1).
pub fn pre_hash<M: Mixer>(key: &Key) -> (u64, u8, bool) {
    match key {
        Key::I8(v) => (*v as i64 as u64, key.type_tag(), true),
        Key::I16(v) => (*v as i64 as u64, key.type_tag(), true),
        Key::I32(v) => (*v as i64 as u64, key.type_tag(), true),
        Key::I64(v) => (*v as u64, key.type_tag(), true),
        Key::U8(v) => (*v as u64, key.type_tag(), true),
        Key::U16(v) => (*v as u64, key.type_tag(), true),
        Key::U32(v) => (*v as u64, key.type_tag(), true),
        Key::U64(v) => (*v, key.type_tag(), true),
        Key::Usize(v) => (*v as u64, key.type_tag(), true),
        Key::F32(v) => (v.to_bits() as u64, key.type_tag(), true),
        Key::F64(v) => (v.to_bits(), key.type_tag(), true),
        Key::Complex128(re, im) => {
            let mut bytes = [0u8; 16];
            bytes[..8].copy_from_slice(&re.to_bits().to_le_bytes());
            bytes[8..].copy_from_slice(&im.to_bits().to_le_bytes());
            (M::digest(&bytes), key.type_tag(), false)
        }
        Key::Bytes(b) if b.len() <= FAST_KEY_FULL_LEN => {
            (pack_short_bytes(b), key.type_tag(), true)
        }
        Key::Bytes(b) => (M::digest(b), key.type_tag(), false),
        Key::Str(s) if s.len() <= FAST_KEY_FULL_LEN => {
            (pack_short_bytes(s.as_bytes()), key.type_tag(), true)
        }
        Key::Str(s) => (M::digest(s.as_bytes()), key.type_tag(), false),
        Key::Fallback(s) => (M::digest(s.as_bytes()), key.type_tag(), false),
    }
}

/// Backwards-compatible entry point for callers that don't care about the
/// mixer (internal helpers, `Key`'s own `Hash` impl). Uses the default
/// mixer.
pub(crate) fn pre_hash_default(key: &Key) -> (u64, u8, bool) {
    pre_hash::<Xxh3Mixer>(key)
}

/// `completeHash(preHash, typeTag) -> u64` (§4.1).
///
/// XORs a left-rotated mixing prime (rotation = typeTag) into `pre_hash`,
/// then runs a Knuth-style multiplicative mix with folded 32/16/8-bit
/// substeps, so that numerically equal keys of different types (integer `1`
/// vs. string `"1"`) never collide and short integers don't degenerate
/// under a narrow index mask.
pub fn complete_hash(pre_hash: u64, type_tag: u8) -> u64 {
    let rotated = MIX_PRIME.rotate_left((type_tag & 63) as u32);
    let mut h = pre_hash ^ rotated;
    h = h.wrapping_mul(KNUTH_MULTIPLIER);
    h ^= h >> 32;
    h = h.wrapping_mul(KNUTH_MULTIPLIER);
    h ^= h >> 16;
    h = h.wrapping_mul(KNUTH_MULTIPLIER);
    h ^= h >> 8;
    h
}

/// `compress(size, fullHash) -> index` (§4.1). `size` is always a power of
/// two, so masking replaces the modulo.
#[inline(always)]
pub fn compress(size: u64, full_hash: u64) -> u64 {
    debug_assert!(size.is_power_of_two());
    full_hash & (size - 1)
}
