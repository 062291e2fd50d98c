//! Text normalization and stable fingerprinting.
//!
//! Fingerprints must be identical across processes and engine versions so
//! dedup and export stay bit-exact; the hash is a fixed FNV-1a, not the
//! process-seeded `DefaultHasher`.

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Normalize memory text: trim and collapse internal whitespace runs to a
/// single space. The stored text keeps its original casing; only the
/// fingerprint lowercases.
#[must_use]
pub fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Stable 64-bit FNV-1a hash of a byte string.
#[must_use]
pub fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Fingerprint of normalized text: lowercase hex of the FNV-1a hash of the
/// lowercased normalized form.
#[must_use]
pub fn fingerprint(normalized_text: &str) -> String {
    format!("{:016x}", fnv1a(normalized_text.to_lowercase().as_bytes()))
}

/// Tokenize text into lowercase alphanumeric words.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}
