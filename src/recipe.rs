//! The recipe header.
//!
//! Every encrypted blob starts with a fixed-length header recording everything needed to
//! rebuild the cipher chain: which algorithms ran, in what order, and the random seed the
//! per-stage IVs (and, for AEAD blobs, the final-stage subkey and nonce) are derived
//! from. Decryption therefore needs no state beyond the keyset itself.
//!
//! # Format
//!
//! ```text
//! +---------+-------+--------+-------+================+============+
//! | Version | Flags | KeyLen | Count |  Order table   |    Seed    |
//! +---------+-------+--------+-------+================+============+
//!   1 byte    1 byte  1 byte   1 byte  5 bytes          16 bytes
//! ```
//!
//! - Version is currently always 1.
//! - Flags bit 0 marks an AEAD blob; all other bits must be zero.
//! - KeyLen is the key length code shared by every stage.
//! - The order table holds `Count` algorithm ids (stage 0 first), zero-filled to its
//!   fixed width. Ids must be distinct and valid at the key length.
//! - Seed is fresh random bytes for each encryption operation.

use rand_core::{CryptoRng, RngCore};

use crate::{
    error::CryptoError,
    spec::{KeyLength, SymKeyAlgo, SymKeySpec},
};

/// Recipe format version produced by this library.
pub const RECIPE_VERSION: u8 = 1;

/// Widest cascade any keyset can request; fixes the order table width.
pub const MAX_CIPHER_STEPS: usize = 5;

/// Random seed bytes carried in every header.
pub const SEED_LEN: usize = 16;

/// Exact encoded header length. Every keyset-encrypted blob starts with this many bytes.
pub const HDRLEN: usize = 4 + MAX_CIPHER_STEPS + SEED_LEN;

const FLAG_AEAD: u8 = 0x01;

/// A decoded (or freshly drawn) recipe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Recipe {
    aead: bool,
    key_length: KeyLength,
    steps: Vec<SymKeySpec>,
    seed: [u8; SEED_LEN],
}

impl Recipe {
    /// Draw a fresh recipe: a random permutation of `specs` plus a random seed.
    ///
    /// `specs` must already be the keyset's full spec list (1..=MAX_CIPHER_STEPS entries,
    /// all at `key_length`); the keyset guarantees that before calling.
    pub fn random<R>(csprng: &mut R, key_length: KeyLength, specs: &[SymKeySpec], aead: bool) -> Self
    where
        R: CryptoRng + RngCore,
    {
        debug_assert!(!specs.is_empty() && specs.len() <= MAX_CIPHER_STEPS);
        let mut steps = specs.to_vec();
        // Fisher-Yates. The tiny modulo bias is irrelevant here: the order is recorded
        // in the clear and only needs to vary, not be uniform.
        for i in (1..steps.len()).rev() {
            let j = (csprng.next_u32() as usize) % (i + 1);
            steps.swap(i, j);
        }
        let mut seed = [0u8; SEED_LEN];
        csprng.fill_bytes(&mut seed);
        Recipe {
            aead,
            key_length,
            steps,
            seed,
        }
    }

    pub fn is_aead(&self) -> bool {
        self.aead
    }

    pub fn key_length(&self) -> KeyLength {
        self.key_length
    }

    pub fn steps(&self) -> &[SymKeySpec] {
        &self.steps
    }

    pub fn seed(&self) -> &[u8; SEED_LEN] {
        &self.seed
    }

    pub fn encode(&self) -> [u8; HDRLEN] {
        let mut out = [0u8; HDRLEN];
        out[0] = RECIPE_VERSION;
        out[1] = if self.aead { FLAG_AEAD } else { 0 };
        out[2] = self.key_length.code();
        out[3] = self.steps.len() as u8;
        for (slot, spec) in out[4..4 + MAX_CIPHER_STEPS].iter_mut().zip(&self.steps) {
            *slot = spec.algo.id();
        }
        out[4 + MAX_CIPHER_STEPS..].copy_from_slice(&self.seed);
        out
    }

    /// Decode the header at the front of `raw`. Trailing bytes (the ciphertext) are
    /// ignored here.
    pub fn decode(raw: &[u8]) -> Result<Self, CryptoError> {
        if raw.len() < HDRLEN {
            return Err(CryptoError::BadLength {
                step: "decode recipe header",
                expected: HDRLEN,
                actual: raw.len(),
            });
        }
        let raw = &raw[..HDRLEN];
        if raw[0] != RECIPE_VERSION {
            return Err(CryptoError::UnsupportedVersion(raw[0]));
        }
        if raw[1] & !FLAG_AEAD != 0 {
            return Err(CryptoError::BadFormat("unknown recipe flag bits set"));
        }
        let aead = raw[1] & FLAG_AEAD != 0;
        let key_length = KeyLength::from_code(raw[2])?;
        let count = raw[3] as usize;
        if count == 0 || count > MAX_CIPHER_STEPS {
            return Err(CryptoError::BadFormat("recipe step count out of range"));
        }
        let table = &raw[4..4 + MAX_CIPHER_STEPS];
        let mut steps = Vec::with_capacity(count);
        for &id in &table[..count] {
            let algo = SymKeyAlgo::from_id(id)?;
            if steps.iter().any(|s: &SymKeySpec| s.algo == algo) {
                return Err(CryptoError::BadFormat("recipe repeats a cipher algorithm"));
            }
            let spec = SymKeySpec::new(algo, key_length)
                .map_err(|_| CryptoError::BadFormat("recipe cipher invalid at key length"))?;
            steps.push(spec);
        }
        if table[count..].iter().any(|&b| b != 0) {
            return Err(CryptoError::BadFormat("recipe order table has trailing data"));
        }
        let mut seed = [0u8; SEED_LEN];
        seed.copy_from_slice(&raw[4 + MAX_CIPHER_STEPS..]);
        Ok(Recipe {
            aead,
            key_length,
            steps,
            seed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::available_sym_key_specs;
    use rand::rngs::OsRng;

    fn sample(aead: bool) -> Recipe {
        let specs = available_sym_key_specs(KeyLength::Len256);
        Recipe::random(&mut OsRng, KeyLength::Len256, &specs[..3], aead)
    }

    #[test]
    fn header_length_is_pinned() {
        assert_eq!(HDRLEN, 25);
        assert_eq!(sample(false).encode().len(), HDRLEN);
    }

    #[test]
    fn encode_decode_round_trip() {
        for aead in [false, true] {
            let recipe = sample(aead);
            let decoded = Recipe::decode(&recipe.encode()).unwrap();
            assert_eq!(decoded, recipe);
            assert_eq!(decoded.is_aead(), aead);
        }
    }

    #[test]
    fn decode_ignores_trailing_ciphertext() {
        let recipe = sample(false);
        let mut raw = recipe.encode().to_vec();
        raw.extend_from_slice(&[0xAB; 32]);
        assert_eq!(Recipe::decode(&raw).unwrap(), recipe);
    }

    #[test]
    fn permutation_covers_all_steps() {
        let specs = available_sym_key_specs(KeyLength::Len128);
        let recipe = Recipe::random(&mut OsRng, KeyLength::Len128, &specs, false);
        assert_eq!(recipe.steps().len(), specs.len());
        for spec in &specs {
            assert!(recipe.steps().contains(spec));
        }
    }

    #[test]
    fn decode_rejects_bad_headers() {
        let recipe = sample(false);
        let good = recipe.encode();

        let mut bad = good;
        bad[0] = 2;
        assert!(matches!(
            Recipe::decode(&bad),
            Err(CryptoError::UnsupportedVersion(2))
        ));

        let mut bad = good;
        bad[1] = 0x80;
        assert!(Recipe::decode(&bad).is_err());

        let mut bad = good;
        bad[2] = 9;
        assert!(Recipe::decode(&bad).is_err());

        let mut bad = good;
        bad[3] = 0;
        assert!(Recipe::decode(&bad).is_err());
        bad[3] = MAX_CIPHER_STEPS as u8 + 1;
        assert!(Recipe::decode(&bad).is_err());

        // Duplicate step.
        let mut bad = good;
        bad[5] = bad[4];
        assert!(Recipe::decode(&bad).is_err());

        // Junk past the declared count.
        let mut bad = good;
        bad[4 + 4] = 1;
        assert!(Recipe::decode(&bad).is_err());

        assert!(Recipe::decode(&good[..HDRLEN - 1]).is_err());
    }

    #[test]
    fn rejects_cipher_invalid_at_key_length() {
        let specs = available_sym_key_specs(KeyLength::Len128);
        let recipe = Recipe::random(&mut OsRng, KeyLength::Len128, &specs, false);
        let mut raw = recipe.encode();
        // Twofish id in a 128-bit recipe.
        raw[4] = SymKeyAlgo::Twofish.id();
        raw[5] = SymKeyAlgo::Aes.id();
        raw[6] = SymKeyAlgo::Camellia.id();
        assert!(Recipe::decode(&raw).is_err());
    }
}
