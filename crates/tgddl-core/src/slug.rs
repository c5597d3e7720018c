//! Short public identifiers for stored files.

use rand::Rng;

/// URL path-safe alphabet (64 symbols, 6 bits per character).
pub const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_-";
pub const SLUG_LEN: usize = 8;

const MAX_MINT_ATTEMPTS: usize = 16;

/// Generate a random 8-character slug.
pub fn mint() -> String {
    mint_with(&mut rand::thread_rng())
}

fn mint_with<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..SLUG_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Mint a slug for which `exists` returns false.
///
/// Gives up after a bounded number of attempts and returns the last
/// candidate; with 48 bits per slug that only happens with a broken RNG.
pub fn mint_unique(exists: impl Fn(&str) -> bool) -> String {
    let mut candidate = mint();
    for _ in 1..MAX_MINT_ATTEMPTS {
        if !exists(&candidate) {
            return candidate;
        }
        tracing::debug!(slug = %candidate, "slug collision, re-minting");
        candidate = mint();
    }
    tracing::warn!(slug = %candidate, "slug still colliding after {MAX_MINT_ATTEMPTS} attempts");
    candidate
}

/// Whether `s` could have been produced by [`mint`].
pub fn is_valid(s: &str) -> bool {
    s.len() == SLUG_LEN && s.bytes().all(|b| ALPHABET.contains(&b))
}
