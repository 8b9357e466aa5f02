//! Key derivation helpers.
//!
//! Two kinds of derivation back the engine: keyed BLAKE2b expansion (per-stage IVs,
//! AEAD subkeys, seed-derived keysets, identifiers) and Argon2id for passwords. Every
//! expansion uses a distinct personalization string so no two derivations can collide.

use argon2::{Algorithm, Argon2, Params, Version};
use blake2::{
    digest::{consts::U64, Mac},
    Blake2bMac,
};
use zeroize::Zeroize;

use crate::{error::CryptoError, spec::KdfParams};

/// Personalization strings. BLAKE2b allows at most 16 bytes.
pub(crate) const PERSONA_IV: &[u8] = b"cascade-iv";
pub(crate) const PERSONA_AEAD_KEY: &[u8] = b"cascade-aead";
pub(crate) const PERSONA_AEAD_NONCE: &[u8] = b"cascade-nonce";
pub(crate) const PERSONA_SEED: &[u8] = b"cascade-seed";
pub(crate) const PERSONA_ID: &[u8] = b"cascade-sid";
pub(crate) const PERSONA_HOST: &[u8] = b"cascade-host";

/// Fill `out` with keyed-BLAKE2b output over the concatenation of `inputs`.
///
/// `key` must be 1..=64 bytes and `out` at most 64 bytes; both hold by construction
/// everywhere this is called.
pub(crate) fn expand(
    key: &[u8],
    persona: &[u8],
    inputs: &[&[u8]],
    out: &mut [u8],
) -> Result<(), CryptoError> {
    let mut mac = Blake2bMac::<U64>::new_with_salt_and_personal(key, &[], persona).map_err(
        |_| CryptoError::BadLength {
            step: "key BLAKE2b expansion",
            expected: 64,
            actual: key.len(),
        },
    )?;
    for input in inputs {
        mac.update(input);
    }
    let mut full = mac.finalize().into_bytes();
    out.copy_from_slice(&full[..out.len()]);
    full.as_mut_slice().zeroize();
    Ok(())
}

/// Derive a 32-byte keyset seed from a password.
///
/// `secret` is the locking factory's configuration seed; mixing it in binds the derived
/// material to the local host so raw password-derived keys can't be replayed elsewhere.
/// This is an anti-replay measure, not a security boundary.
pub(crate) fn derive_password_seed(
    password: &[u8],
    salt: &[u8],
    params: &KdfParams,
    secret: &[u8],
) -> Result<[u8; 32], CryptoError> {
    params.validate()?;
    let a2_params = Params::new(
        params.mem_cost_kib(),
        params.time_cost(),
        params.parallelism(),
        Some(32),
    )
    .map_err(|_| CryptoError::InvalidSpec("argon2 rejected the KDF parameters".into()))?;
    let argon2 = Argon2::new_with_secret(secret, Algorithm::Argon2id, Version::V0x13, a2_params)
        .map_err(|_| CryptoError::InvalidSpec("argon2 rejected the secret value".into()))?;
    let mut seed = [0u8; 32];
    argon2
        .hash_password_into(password, salt, &mut seed)
        .map_err(|_| CryptoError::InvalidSpec("argon2 key derivation failed".into()))?;
    Ok(seed)
}
