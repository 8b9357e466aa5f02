//! Authenticated cascade encryption.
//!
//! The AEAD composition keeps the cascade idea but makes tampering detectable: every
//! stage except the last runs the counter-mode variant of its cipher, and the last stage
//! is XChaCha20-Poly1305 keyed from the final stage key. The recipe header is always
//! authenticated along with any caller-supplied associated data, so a damaged header
//! fails the same way as a damaged ciphertext.
//!
//! Output length is exactly `HDRLEN + plaintext + 16` tag bytes.
//!
//! [`KeySetAadCipher`] is the streaming interface: create, initialize exactly once for
//! one direction, feed data with [`update`](KeySetAadCipher::update), then call
//! [`finish`](KeySetAadCipher::finish) once. Any out-of-order call fails with
//! `BadState`. One-shot wrappers live on
//! [`KeySet`](crate::keyset::KeySet::encrypt_bytes_aad).
//!
//! Every decryption failure, whether a chewed-up header, a truncated blob, or a bad
//! authentication tag, reports as the single `DecryptFailed` error.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand_core::{CryptoRng, RngCore};
use zeroize::Zeroize;

use crate::{
    error::CryptoError,
    kdf,
    keyset::{derive_iv, KeySet},
    recipe::{Recipe, HDRLEN},
};

/// Poly1305 tag length in bytes.
pub const TAG_LEN: usize = 16;

const NONCE_LEN: usize = 24;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum State {
    Fresh,
    Encrypting,
    Decrypting,
    Finished,
}

/// Streaming AEAD cipher over a keyset.
///
/// ```
/// # use cascade_crypto::{Factory, CryptoError};
/// # fn demo() -> Result<(), CryptoError> {
/// # let mut csprng = rand::rngs::OsRng;
/// # let factory = Factory::generate(&mut csprng);
/// # let key_set = factory.generate_key_set(&mut csprng)?;
/// let mut cipher = key_set.aad_cipher()?;
/// cipher.init_for_encrypt(&mut csprng, b"header v1")?;
/// cipher.update(b"first chunk")?;
/// cipher.update(b"second chunk")?;
/// let sealed = cipher.finish()?;
/// # Ok(()) }
/// ```
pub struct KeySetAadCipher<'a> {
    key_set: &'a KeySet,
    state: State,
    aad: Vec<u8>,
    buf: Vec<u8>,
    recipe: Option<Recipe>,
}

impl<'a> KeySetAadCipher<'a> {
    /// Requires a fully-populated keyset.
    pub fn new(key_set: &'a KeySet) -> Result<Self, CryptoError> {
        key_set.check_populated()?;
        Ok(KeySetAadCipher {
            key_set,
            state: State::Fresh,
            aad: Vec::new(),
            buf: Vec::new(),
            recipe: None,
        })
    }

    /// Set up for encryption, binding `aad`. Callable exactly once per instance.
    pub fn init_for_encrypt<R>(&mut self, csprng: &mut R, aad: &[u8]) -> Result<(), CryptoError>
    where
        R: CryptoRng + RngCore,
    {
        self.check_fresh()?;
        self.recipe = Some(Recipe::random(
            csprng,
            self.key_set.spec().key_length(),
            &self.key_set.sym_key_specs(),
            true,
        ));
        self.aad = aad.to_vec();
        self.state = State::Encrypting;
        Ok(())
    }

    /// Set up for decryption with the `aad` the blob was sealed under. Callable exactly
    /// once per instance.
    pub fn init_for_decrypt(&mut self, aad: &[u8]) -> Result<(), CryptoError> {
        self.check_fresh()?;
        self.aad = aad.to_vec();
        self.state = State::Decrypting;
        Ok(())
    }

    fn check_fresh(&self) -> Result<(), CryptoError> {
        match self.state {
            State::Fresh => Ok(()),
            _ => Err(CryptoError::BadState("AAD cipher is already initialized")),
        }
    }

    /// Feed the next chunk of plaintext (encrypting) or of the sealed blob
    /// (decrypting).
    pub fn update(&mut self, data: &[u8]) -> Result<(), CryptoError> {
        match self.state {
            State::Encrypting | State::Decrypting => {
                self.buf.extend_from_slice(data);
                Ok(())
            }
            State::Fresh => Err(CryptoError::BadState("AAD cipher is not initialized")),
            State::Finished => Err(CryptoError::BadState("AAD cipher is already finished")),
        }
    }

    /// Run the cascade over everything fed so far and return the result. The instance
    /// cannot be reused afterwards.
    pub fn finish(&mut self) -> Result<Vec<u8>, CryptoError> {
        let state = self.state;
        self.state = State::Finished;
        let result = match state {
            State::Encrypting => self.run_encrypt(),
            State::Decrypting => self.run_decrypt(),
            State::Fresh => Err(CryptoError::BadState("AAD cipher is not initialized")),
            State::Finished => Err(CryptoError::BadState("AAD cipher is already finished")),
        };
        self.buf.zeroize();
        self.buf.clear();
        result
    }

    fn run_encrypt(&mut self) -> Result<Vec<u8>, CryptoError> {
        // Set in init_for_encrypt; the state machine guarantees it.
        let recipe = self.recipe.take().ok_or(CryptoError::BadState(
            "AAD cipher is not initialized",
        ))?;
        let header = recipe.encode();
        let full_aad = join_aad(&self.aad, &header);

        let steps = recipe.steps();
        let last = steps.len() - 1;
        for (stage, &spec) in steps[..last].iter().enumerate() {
            let iv = derive_iv(self.key_set.key_for(spec)?, recipe.seed(), stage)?;
            let ciphers = self.key_set.cipher_set(spec)?;
            ciphers.stream().encrypt(&iv, &mut self.buf)?;
        }

        let (cipher, nonce) = final_stage(self.key_set, &recipe, last)?;
        let sealed = cipher
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: &self.buf,
                    aad: &full_aad,
                },
            )
            .map_err(|_| CryptoError::BadFormat("payload too large to seal"))?;

        let mut out = Vec::with_capacity(HDRLEN + sealed.len());
        out.extend_from_slice(&header);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn run_decrypt(&mut self) -> Result<Vec<u8>, CryptoError> {
        // No partial information leaves this function: every parse or cipher failure
        // collapses into DecryptFailed.
        self.try_decrypt().map_err(|_| CryptoError::DecryptFailed)
    }

    fn try_decrypt(&mut self) -> Result<Vec<u8>, CryptoError> {
        let recipe = Recipe::decode(&self.buf)?;
        if !recipe.is_aead() {
            return Err(CryptoError::DecryptFailed);
        }
        self.key_set.check_recipe(&recipe)?;
        let header = recipe.encode();
        let full_aad = join_aad(&self.aad, &header);
        let sealed = &self.buf[HDRLEN..];
        if sealed.len() < TAG_LEN {
            return Err(CryptoError::DecryptFailed);
        }

        let steps = recipe.steps();
        let last = steps.len() - 1;
        let (cipher, nonce) = final_stage(self.key_set, &recipe, last)?;
        let mut buf = cipher
            .decrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: sealed,
                    aad: &full_aad,
                },
            )
            .map_err(|_| CryptoError::DecryptFailed)?;

        for (stage, &spec) in steps[..last].iter().enumerate().rev() {
            let iv = derive_iv(self.key_set.key_for(spec)?, recipe.seed(), stage)?;
            let ciphers = self.key_set.cipher_set(spec)?;
            ciphers.stream().decrypt(&iv, &mut buf)?;
        }
        Ok(buf)
    }
}

fn join_aad(aad: &[u8], header: &[u8; HDRLEN]) -> Vec<u8> {
    let mut full = Vec::with_capacity(aad.len() + HDRLEN);
    full.extend_from_slice(aad);
    full.extend_from_slice(header);
    full
}

/// Build the final-stage AEAD cipher: XChaCha20-Poly1305 keyed and nonced from the
/// final stage key and the recipe seed.
fn final_stage(
    key_set: &KeySet,
    recipe: &Recipe,
    last: usize,
) -> Result<(XChaCha20Poly1305, [u8; NONCE_LEN]), CryptoError> {
    let final_key = key_set.key_for(recipe.steps()[last])?;
    let mut key = [0u8; 32];
    kdf::expand(
        final_key.as_bytes(),
        kdf::PERSONA_AEAD_KEY,
        &[recipe.seed(), &[last as u8]],
        &mut key,
    )?;
    let mut nonce = [0u8; NONCE_LEN];
    kdf::expand(
        final_key.as_bytes(),
        kdf::PERSONA_AEAD_NONCE,
        &[recipe.seed(), &[last as u8]],
        &mut nonce,
    )?;
    let cipher = XChaCha20Poly1305::new(&key.into());
    key.zeroize();
    Ok((cipher, nonce))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::StdCipherFactory;
    use crate::spec::{KeyLength, KeySetSpec};
    use rand::rngs::OsRng;
    use std::sync::Arc;

    fn key_set(len: KeyLength, count: usize) -> KeySet {
        let spec = KeySetSpec::new(len, count).unwrap();
        KeySet::generate(&mut OsRng, spec, Arc::new(StdCipherFactory)).unwrap()
    }

    #[test]
    fn round_trip_with_aad() {
        for count in [1, 3, 5] {
            let set = key_set(KeyLength::Len256, count);
            let sealed = set
                .encrypt_bytes_aad(&mut OsRng, b"attack at dawn", b"message 41")
                .unwrap();
            assert_eq!(sealed.len(), KeySet::aead_encryption_length(14));
            let plain = set.decrypt_bytes_aad(&sealed, b"message 41").unwrap();
            assert_eq!(plain, b"attack at dawn");
        }
    }

    #[test]
    fn empty_plaintext_and_empty_aad() {
        let set = key_set(KeyLength::Len128, 2);
        let sealed = set.encrypt_bytes_aad(&mut OsRng, b"", b"").unwrap();
        assert_eq!(sealed.len(), KeySet::aead_encryption_length(0));
        assert_eq!(set.decrypt_bytes_aad(&sealed, b"").unwrap(), b"");
    }

    #[test]
    fn streaming_matches_one_shot() {
        let set = key_set(KeyLength::Len256, 3);
        let mut cipher = KeySetAadCipher::new(&set).unwrap();
        cipher.init_for_encrypt(&mut OsRng, b"ctx").unwrap();
        cipher.update(b"first ").unwrap();
        cipher.update(b"second ").unwrap();
        cipher.update(b"third").unwrap();
        let sealed = cipher.finish().unwrap();

        assert_eq!(
            set.decrypt_bytes_aad(&sealed, b"ctx").unwrap(),
            b"first second third"
        );

        // Decrypt side streamed in odd chunk sizes.
        let mut cipher = KeySetAadCipher::new(&set).unwrap();
        cipher.init_for_decrypt(b"ctx").unwrap();
        for chunk in sealed.chunks(7) {
            cipher.update(chunk).unwrap();
        }
        assert_eq!(cipher.finish().unwrap(), b"first second third");
    }

    #[test]
    fn every_corrupted_byte_fails_closed() {
        let set = key_set(KeyLength::Len256, 3);
        let sealed = set
            .encrypt_bytes_aad(&mut OsRng, b"Hello", b"aad")
            .unwrap();
        for i in 0..sealed.len() {
            let mut bad = sealed.clone();
            bad[i] ^= 0xFF;
            assert!(
                matches!(
                    set.decrypt_bytes_aad(&bad, b"aad"),
                    Err(CryptoError::DecryptFailed)
                ),
                "corruption at byte {} was not caught",
                i
            );
        }
    }

    #[test]
    fn truncation_fails_closed() {
        let set = key_set(KeyLength::Len192, 2);
        let sealed = set
            .encrypt_bytes_aad(&mut OsRng, b"some payload", b"")
            .unwrap();
        for len in 0..sealed.len() {
            assert!(
                matches!(
                    set.decrypt_bytes_aad(&sealed[..len], b""),
                    Err(CryptoError::DecryptFailed)
                ),
                "truncation to {} bytes was not caught",
                len
            );
        }
    }

    #[test]
    fn wrong_aad_fails_closed() {
        let set = key_set(KeyLength::Len256, 2);
        let sealed = set
            .encrypt_bytes_aad(&mut OsRng, b"payload", b"right")
            .unwrap();
        assert!(matches!(
            set.decrypt_bytes_aad(&sealed, b"wrong"),
            Err(CryptoError::DecryptFailed)
        ));
        assert!(matches!(
            set.decrypt_bytes_aad(&sealed, b""),
            Err(CryptoError::DecryptFailed)
        ));
    }

    #[test]
    fn wrong_key_set_fails_closed() {
        let a = key_set(KeyLength::Len256, 3);
        let b = key_set(KeyLength::Len256, 3);
        let sealed = a.encrypt_bytes_aad(&mut OsRng, b"payload", b"").unwrap();
        assert!(matches!(
            b.decrypt_bytes_aad(&sealed, b""),
            Err(CryptoError::DecryptFailed)
        ));
    }

    #[test]
    fn state_machine_enforced() {
        let set = key_set(KeyLength::Len256, 2);

        // Update before init.
        let mut cipher = KeySetAadCipher::new(&set).unwrap();
        assert!(matches!(
            cipher.update(b"data"),
            Err(CryptoError::BadState(_))
        ));
        assert!(matches!(cipher.finish(), Err(CryptoError::BadState(_))));

        // Double init, either direction.
        let mut cipher = KeySetAadCipher::new(&set).unwrap();
        cipher.init_for_encrypt(&mut OsRng, b"").unwrap();
        assert!(matches!(
            cipher.init_for_encrypt(&mut OsRng, b""),
            Err(CryptoError::BadState(_))
        ));
        assert!(matches!(
            cipher.init_for_decrypt(b""),
            Err(CryptoError::BadState(_))
        ));

        // No reuse after finish.
        cipher.update(b"data").unwrap();
        cipher.finish().unwrap();
        assert!(matches!(
            cipher.update(b"more"),
            Err(CryptoError::BadState(_))
        ));
        assert!(matches!(cipher.finish(), Err(CryptoError::BadState(_))));
        assert!(matches!(
            cipher.init_for_decrypt(b""),
            Err(CryptoError::BadState(_))
        ));
    }
}
