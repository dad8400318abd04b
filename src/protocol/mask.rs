//! Payload masking (RFC 6455 Section 5.3).

use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

/// XOR `data` with the repeating 4-byte `mask`.
///
/// Masking is its own inverse: applying the same key twice restores the input.
#[inline]
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    apply_mask_offset(data, mask, 0);
}

/// XOR `data` with `mask` as if `data` started `offset` bytes into the payload.
#[inline]
pub fn apply_mask_offset(data: &mut [u8], mask: [u8; 4], offset: usize) {
    let rotated = [
        mask[offset % 4],
        mask[(offset + 1) % 4],
        mask[(offset + 2) % 4],
        mask[(offset + 3) % 4],
    ];
    let key = u32::from_ne_bytes(rotated);

    let mut chunks = data.chunks_exact_mut(4);
    for chunk in &mut chunks {
        let word = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) ^ key;
        chunk.copy_from_slice(&word.to_ne_bytes());
    }
    for (byte, m) in chunks.into_remainder().iter_mut().zip(rotated) {
        *byte ^= m;
    }
}

/// Produces a fresh masking key for every outgoing client frame.
///
/// Seeded from the OS RNG, then advanced with a cheap integer mixer so that
/// encoding a frame never blocks on `getrandom`.
#[derive(Debug, Clone)]
pub struct MaskGenerator {
    state: u32,
}

impl MaskGenerator {
    /// Create a generator seeded from the operating system.
    #[must_use]
    pub fn new() -> Self {
        Self::with_seed(random_seed())
    }

    /// Create a generator with a fixed seed.
    #[must_use]
    pub const fn with_seed(seed: u32) -> Self {
        Self { state: seed }
    }

    /// Next masking key.
    pub fn next_key(&mut self) -> [u8; 4] {
        self.state = self.state.wrapping_add(0x9E37_79B9);
        let a = self.state.wrapping_mul(0x85EB_CA6B);
        let b = a ^ (a >> 13);
        b.wrapping_mul(0xC2B2_AE35).to_le_bytes()
    }
}

impl Default for MaskGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn random_seed() -> u32 {
    let mut buf = [0u8; 4];
    seed_from(getrandom::getrandom(&mut buf).map(|()| buf))
}

fn seed_from(random: Result<[u8; 4], getrandom::Error>) -> u32 {
    match random {
        Ok(buf) => u32::from_le_bytes(buf),
        Err(error) => {
            warn!(%error, "OS RNG unavailable, seeding mask keys from the clock");
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default();
            now.subsec_nanos() ^ (now.as_secs() as u32) ^ std::process::id().rotate_left(16)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive_mask(data: &mut [u8], mask: [u8; 4]) {
        for (i, byte) in data.iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }
    }

    #[test]
    fn test_rfc_example() {
        // "Hello" masked with 0x37fa213d (RFC 6455 Section 5.7)
        let mut data = *b"Hello";
        apply_mask(&mut data, [0x37, 0xfa, 0x21, 0x3d]);
        assert_eq!(data, [0x7f, 0x9f, 0x4d, 0x51, 0x58]);
    }

    #[test]
    fn test_matches_bytewise_reference() {
        let mask = [0x01, 0x80, 0x7f, 0xff];
        for len in 0..37 {
            let original: Vec<u8> = (0..len as u8).collect();
            let mut fast = original.clone();
            let mut slow = original.clone();
            apply_mask(&mut fast, mask);
            naive_mask(&mut slow, mask);
            assert_eq!(fast, slow, "length {len}");
        }
    }

    #[test]
    fn test_offset_masking_matches_whole() {
        let mask = [0xde, 0xad, 0xbe, 0xef];
        let original: Vec<u8> = (0..50).collect();
        let mut whole = original.clone();
        apply_mask(&mut whole, mask);

        let mut split = original;
        let (head, tail) = split.split_at_mut(7);
        apply_mask_offset(head, mask, 0);
        apply_mask_offset(tail, mask, 7);
        assert_eq!(whole, split);
    }

    #[test]
    fn test_generator_produces_distinct_keys() {
        let mut generator = MaskGenerator::with_seed(42);
        let a = generator.next_key();
        let b = generator.next_key();
        assert_ne!(a, b);

        let mut replay = MaskGenerator::with_seed(42);
        assert_eq!(replay.next_key(), a);
    }

    #[test]
    fn test_seed_without_os_rng_is_not_constant() {
        let first = seed_from(Err(getrandom::Error::UNSUPPORTED));
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = seed_from(Err(getrandom::Error::UNSUPPORTED));
        assert_ne!(first, second);
    }

    #[test]
    fn test_seed_uses_os_bytes() {
        assert_eq!(seed_from(Ok([1, 0, 0, 0])), 1);
    }
}
