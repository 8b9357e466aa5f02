//! Symmetric keysets and cascade encryption.
//!
//! A [`KeySet`] holds one independently-generated key per chosen cipher spec and
//! encrypts by chaining those ciphers: stage 0 runs the padded-block variant, every
//! later stage runs the raw-block variant over the already-aligned buffer. The stage
//! order is drawn fresh for every operation and recorded in the recipe header, so a blob
//! decrypts with nothing but the keyset itself.
//!
//! # Format
//!
//! ```text
//! +==============+====================+
//! | Recipe (25)  | Ciphertext blocks  |
//! +==============+====================+
//! ```
//!
//! For an input of length `L` the ciphertext is `ceil((L+1)/16)*16` bytes (PKCS7 always
//! adds at least one byte), giving the exact bound returned by
//! [`KeySet::encryption_length`]. AEAD blobs use the counter-mode cascade instead; see
//! [`crate::aead`].
//!
//! Wrapped keys, key pairs, and nested keysets are serialized and then sealed with the
//! AEAD composition, with the wrap kind bound as associated data.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use rand_core::{CryptoRng, RngCore};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    aead::{KeySetAadCipher, TAG_LEN},
    cipher::{CipherFactory, SymKeyCipherSet},
    error::CryptoError,
    kdf,
    keypair::{KeyPair, KeyPairSpec, KEYPAIR_ENCODED_LEN},
    recipe::{Recipe, HDRLEN, SEED_LEN},
    spec::{available_sym_key_specs, KeySetSpec, SymKeySpec, BLOCK_LEN},
};

/// Version byte leading every wrapped-object payload and keyset encoding.
const WRAP_VERSION: u8 = 1;

/// Associated data binding each wrap kind to its blob.
const WRAP_AAD_KEY: &[u8] = b"wrap:key";
const WRAP_AAD_KEY_SET: &[u8] = b"wrap:keyset";
const WRAP_AAD_KEY_PAIR: &[u8] = b"wrap:keypair";

/// A single symmetric key, tagged with its cipher spec. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymKey {
    #[zeroize(skip)]
    spec: SymKeySpec,
    key: Vec<u8>,
}

impl SymKey {
    /// Generate a fresh random key for the given spec.
    pub fn generate<R>(csprng: &mut R, spec: SymKeySpec) -> SymKey
    where
        R: CryptoRng + RngCore,
    {
        let mut key = vec![0u8; spec.key_bytes()];
        csprng.fill_bytes(&mut key);
        SymKey { spec, key }
    }

    /// Wrap existing key bytes. The length must match the spec exactly.
    pub fn from_bytes(spec: SymKeySpec, bytes: &[u8]) -> Result<SymKey, CryptoError> {
        if bytes.len() != spec.key_bytes() {
            return Err(CryptoError::BadLength {
                step: "build symmetric key from bytes",
                expected: spec.key_bytes(),
                actual: bytes.len(),
            });
        }
        Ok(SymKey {
            spec,
            key: bytes.to_vec(),
        })
    }

    pub fn spec(&self) -> SymKeySpec {
        self.spec
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.key
    }
}

impl fmt::Debug for SymKey {
    /// Never shows key material.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SymKey").field("spec", &self.spec).finish()
    }
}

/// Identifier for a fully-populated keyset, derived by hashing its encoded key material.
/// Safe to display; compared in constant time.
#[derive(Clone)]
pub struct KeySetId([u8; 32]);

impl KeySetId {
    pub fn to_base58(&self) -> String {
        bs58::encode(&self.0).into_string()
    }
}

impl PartialEq for KeySetId {
    fn eq(&self, other: &Self) -> bool {
        bool::from(self.0.ct_eq(&other.0))
    }
}

impl Eq for KeySetId {}

impl fmt::Debug for KeySetId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "KeySetId({})", self.to_base58())
    }
}

impl fmt::Display for KeySetId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

/// An ordered set of independently-keyed ciphers applied in cascade.
///
/// Built through a [`Factory`](crate::factory::Factory): empty (keys declared one by
/// one, e.g. while unwrapping), randomly generated, or derived from a secret seed. Once
/// the key count matches the spec the keyset is immutable and safe for concurrent use;
/// until then every cipher operation fails with `BadState`.
#[derive(Clone)]
pub struct KeySet {
    spec: KeySetSpec,
    keys: BTreeMap<SymKeySpec, SymKey>,
    ciphers: Arc<dyn CipherFactory>,
}

impl fmt::Debug for KeySet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("KeySet")
            .field("spec", &self.spec)
            .field("keys", &self.keys.len())
            .finish()
    }
}

impl KeySet {
    pub(crate) fn new_empty(spec: KeySetSpec, ciphers: Arc<dyn CipherFactory>) -> KeySet {
        KeySet {
            spec,
            keys: BTreeMap::new(),
            ciphers,
        }
    }

    /// Populate with fresh random keys for a randomly-chosen subset of the specs the
    /// cipher factory supports at the key length.
    pub(crate) fn generate<R>(
        csprng: &mut R,
        spec: KeySetSpec,
        ciphers: Arc<dyn CipherFactory>,
    ) -> Result<KeySet, CryptoError>
    where
        R: CryptoRng + RngCore,
    {
        let mut pool = supported_pool(&spec, ciphers.as_ref())?;
        for i in (1..pool.len()).rev() {
            let j = (csprng.next_u32() as usize) % (i + 1);
            pool.swap(i, j);
        }
        let mut keys = BTreeMap::new();
        for sym_spec in pool.into_iter().take(spec.cipher_count()) {
            keys.insert(sym_spec, SymKey::generate(csprng, sym_spec));
        }
        Ok(KeySet {
            spec,
            keys,
            ciphers,
        })
    }

    /// Derive deterministically from a secret seed: same seed, same keys, bit for bit.
    /// Uses the first `cipher_count` specs available at the key length. The seed must be
    /// 1..=64 bytes (longer seeds are pre-hashed by the factory before reaching here).
    pub(crate) fn from_seed(
        spec: KeySetSpec,
        seed: &[u8],
        ciphers: Arc<dyn CipherFactory>,
    ) -> Result<KeySet, CryptoError> {
        if seed.is_empty() || seed.len() > 64 {
            return Err(CryptoError::BadLength {
                step: "derive key set from seed",
                expected: 64,
                actual: seed.len(),
            });
        }
        let mut keys = BTreeMap::new();
        for (index, sym_spec) in supported_pool(&spec, ciphers.as_ref())?
            .into_iter()
            .take(spec.cipher_count())
            .enumerate()
        {
            let mut key = vec![0u8; sym_spec.key_bytes()];
            kdf::expand(
                seed,
                kdf::PERSONA_SEED,
                &[
                    &[sym_spec.algo.id()],
                    &[sym_spec.key_length.code()],
                    &[index as u8],
                ],
                &mut key,
            )?;
            let sym = SymKey::from_bytes(sym_spec, &key)?;
            key.zeroize();
            keys.insert(sym_spec, sym);
        }
        Ok(KeySet {
            spec,
            keys,
            ciphers,
        })
    }

    pub fn spec(&self) -> &KeySetSpec {
        &self.spec
    }

    /// Declare one key of an empty keyset, e.g. while rebuilding from wrapped material.
    /// Fails once the keyset is fully populated or if the spec is already present.
    pub fn declare_sym_key(&mut self, key: SymKey) -> Result<(), CryptoError> {
        if self.is_populated() {
            return Err(CryptoError::BadState("key set is already fully populated"));
        }
        if key.spec().key_length != self.spec.key_length() {
            return Err(CryptoError::InvalidSpec(format!(
                "cannot declare {} key in a {}-bit key set",
                key.spec(),
                self.spec.key_length()
            )));
        }
        if self.keys.contains_key(&key.spec()) {
            return Err(CryptoError::BadState(
                "key already declared for this cipher spec",
            ));
        }
        self.keys.insert(key.spec(), key);
        Ok(())
    }

    /// Whether the key count matches the spec. Cipher operations require this.
    pub fn is_populated(&self) -> bool {
        self.keys.len() == self.spec.cipher_count()
    }

    pub(crate) fn check_populated(&self) -> Result<(), CryptoError> {
        if !self.is_populated() {
            return Err(CryptoError::BadState("key set is not fully populated"));
        }
        Ok(())
    }

    /// The cipher specs this keyset holds keys for, in canonical order.
    pub fn sym_key_specs(&self) -> Vec<SymKeySpec> {
        self.keys.keys().copied().collect()
    }

    pub(crate) fn key_for(&self, spec: SymKeySpec) -> Result<&SymKey, CryptoError> {
        self.keys
            .get(&spec)
            .ok_or(CryptoError::TypeMismatch(
                "key set does not hold the requested cipher spec",
            ))
    }

    /// Derive the three cipher variants for one of this keyset's keys. Instances are
    /// fresh per call; nothing mutable is shared between concurrent operations.
    pub(crate) fn cipher_set(&self, spec: SymKeySpec) -> Result<SymKeyCipherSet, CryptoError> {
        let key = self.key_for(spec)?;
        SymKeyCipherSet::new(self.ciphers.as_ref(), key)
    }

    pub(crate) fn cipher_factory(&self) -> &Arc<dyn CipherFactory> {
        &self.ciphers
    }

    /// Identifier derived from the key material. Two keysets with the same id hold the
    /// same keys.
    pub fn id(&self) -> KeySetId {
        use blake2::{Blake2b, Digest};
        let mut enc = Vec::new();
        self.encode_vec(&mut enc);
        let mut hasher = Blake2b::<blake2::digest::consts::U32>::new();
        hasher.update(kdf::PERSONA_ID);
        hasher.update(&enc);
        enc.zeroize();
        KeySetId(hasher.finalize().into())
    }

    /// Exact output length of [`KeySet::encrypt_bytes`] for an input of `len` bytes.
    pub fn encryption_length(len: usize) -> usize {
        HDRLEN + ((len + BLOCK_LEN) / BLOCK_LEN) * BLOCK_LEN
    }

    /// Exact output length of [`KeySet::encrypt_bytes_aad`] for an input of `len` bytes.
    pub fn aead_encryption_length(len: usize) -> usize {
        HDRLEN + len + TAG_LEN
    }

    /// Cascade-encrypt `data`. Output is the recipe header followed by the ciphertext.
    pub fn encrypt_bytes<R>(&self, csprng: &mut R, data: &[u8]) -> Result<Vec<u8>, CryptoError>
    where
        R: CryptoRng + RngCore,
    {
        self.check_populated()?;
        let recipe = Recipe::random(
            csprng,
            self.spec.key_length(),
            &self.sym_key_specs(),
            false,
        );
        let mut buf = data.to_vec();
        for (stage, &spec) in recipe.steps().iter().enumerate() {
            let iv = derive_iv(self.key_for(spec)?, recipe.seed(), stage)?;
            let ciphers = self.cipher_set(spec)?;
            if stage == 0 {
                ciphers.padded().encrypt(&iv, &mut buf)?;
            } else {
                ciphers.block().encrypt(&iv, &mut buf)?;
            }
        }
        let mut out = Vec::with_capacity(HDRLEN + buf.len());
        out.extend_from_slice(&recipe.encode());
        out.append(&mut buf);
        Ok(out)
    }

    /// Reverse [`KeySet::encrypt_bytes`]: parse the header, run the inverse chain in
    /// reverse order.
    pub fn decrypt_bytes(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.check_populated()?;
        let recipe = Recipe::decode(data)?;
        if recipe.is_aead() {
            return Err(CryptoError::BadFormat(
                "blob was AEAD-encrypted; use the AAD cipher",
            ));
        }
        self.check_recipe(&recipe)?;
        let ciphertext = &data[HDRLEN..];
        if ciphertext.is_empty() || ciphertext.len() % BLOCK_LEN != 0 {
            return Err(CryptoError::BadLength {
                step: "get cascade ciphertext blocks",
                expected: BLOCK_LEN,
                actual: ciphertext.len(),
            });
        }
        let mut buf = ciphertext.to_vec();
        for (stage, &spec) in recipe.steps().iter().enumerate().rev() {
            let iv = derive_iv(self.key_for(spec)?, recipe.seed(), stage)?;
            let ciphers = self.cipher_set(spec)?;
            if stage == 0 {
                ciphers.padded().decrypt(&iv, &mut buf)?;
            } else {
                ciphers.block().decrypt(&iv, &mut buf)?;
            }
        }
        Ok(buf)
    }

    pub(crate) fn check_recipe(&self, recipe: &Recipe) -> Result<(), CryptoError> {
        if recipe.key_length() != self.spec.key_length() {
            return Err(CryptoError::TypeMismatch(
                "recipe key length differs from key set",
            ));
        }
        if recipe.steps().len() != self.spec.cipher_count() {
            return Err(CryptoError::TypeMismatch(
                "recipe cipher count differs from key set",
            ));
        }
        Ok(())
    }

    /// Start a streaming AEAD operation over this keyset.
    pub fn aad_cipher(&self) -> Result<KeySetAadCipher, CryptoError> {
        KeySetAadCipher::new(self)
    }

    /// AEAD-encrypt `data`, binding `aad`. One-shot convenience over
    /// [`KeySetAadCipher`].
    pub fn encrypt_bytes_aad<R>(
        &self,
        csprng: &mut R,
        data: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError>
    where
        R: CryptoRng + RngCore,
    {
        let mut cipher = KeySetAadCipher::new(self)?;
        cipher.init_for_encrypt(csprng, aad)?;
        cipher.update(data)?;
        cipher.finish()
    }

    /// AEAD-decrypt `data` with the same `aad`. Any failure, including a damaged
    /// header, reports as `DecryptFailed`.
    pub fn decrypt_bytes_aad(&self, data: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut cipher = KeySetAadCipher::new(self)?;
        cipher.init_for_decrypt(aad)?;
        cipher.update(data)?;
        cipher.finish()
    }

    /// Exact length of a wrapped symmetric key whose raw key is `key_len` bytes.
    pub fn key_wrap_length(key_len: usize) -> usize {
        Self::aead_encryption_length(3 + key_len)
    }

    /// Exact length of a wrapped keyset with the given spec.
    pub fn key_set_wrap_length(spec: &KeySetSpec) -> usize {
        let encoded = 3 + spec.cipher_count() * (1 + spec.key_length().num_bytes());
        Self::aead_encryption_length(encoded)
    }

    /// Exact length of a wrapped key pair private key.
    pub fn private_key_wrap_length() -> usize {
        Self::aead_encryption_length(KEYPAIR_ENCODED_LEN)
    }

    /// Wrap a single symmetric key under this keyset.
    pub fn secure_key<R>(&self, csprng: &mut R, key: &SymKey) -> Result<Vec<u8>, CryptoError>
    where
        R: CryptoRng + RngCore,
    {
        let mut payload = Vec::with_capacity(3 + key.as_bytes().len());
        payload.push(WRAP_VERSION);
        payload.push(key.spec().algo.id());
        payload.push(key.spec().key_length.code());
        payload.extend_from_slice(key.as_bytes());
        let out = self.encrypt_bytes_aad(csprng, &payload, WRAP_AAD_KEY);
        payload.zeroize();
        out
    }

    /// Unwrap a symmetric key, checking the recovered spec against `expected`.
    pub fn derive_key(&self, wrapped: &[u8], expected: SymKeySpec) -> Result<SymKey, CryptoError> {
        let mut payload = self.decrypt_bytes_aad(wrapped, WRAP_AAD_KEY)?;
        let result = parse_wrapped_key(&payload, expected);
        payload.zeroize();
        result
    }

    /// Wrap a whole keyset (all of its key material) under this keyset.
    pub fn secure_key_set<R>(&self, csprng: &mut R, target: &KeySet) -> Result<Vec<u8>, CryptoError>
    where
        R: CryptoRng + RngCore,
    {
        target.check_populated()?;
        let mut payload = Vec::new();
        target.encode_vec(&mut payload);
        let out = self.encrypt_bytes_aad(csprng, &payload, WRAP_AAD_KEY_SET);
        payload.zeroize();
        out
    }

    /// Unwrap a keyset, checking the recovered shape against `expected`. The result uses
    /// the same cipher factory as this keyset.
    pub fn derive_key_set(
        &self,
        wrapped: &[u8],
        expected: &KeySetSpec,
    ) -> Result<KeySet, CryptoError> {
        let mut payload = self.decrypt_bytes_aad(wrapped, WRAP_AAD_KEY_SET)?;
        let result = KeySet::decode(&payload, Arc::clone(&self.ciphers));
        payload.zeroize();
        let set = result?;
        if set.spec() != expected {
            return Err(CryptoError::TypeMismatch(
                "recovered key set spec differs from expected",
            ));
        }
        Ok(set)
    }

    /// Wrap a key pair's private half (with its public key, for verification on
    /// unwrap) under this keyset.
    pub fn secure_private_key<R>(
        &self,
        csprng: &mut R,
        pair: &KeyPair,
    ) -> Result<Vec<u8>, CryptoError>
    where
        R: CryptoRng + RngCore,
    {
        let mut payload = Vec::with_capacity(KEYPAIR_ENCODED_LEN);
        pair.encode_vec(&mut payload);
        let out = self.encrypt_bytes_aad(csprng, &payload, WRAP_AAD_KEY_PAIR);
        payload.zeroize();
        out
    }

    /// Unwrap a key pair, checking the recovered spec against `expected`.
    pub fn derive_key_pair(
        &self,
        wrapped: &[u8],
        expected: KeyPairSpec,
    ) -> Result<KeyPair, CryptoError> {
        let mut payload = self.decrypt_bytes_aad(wrapped, WRAP_AAD_KEY_PAIR)?;
        let result = KeyPair::try_from_encoded(&payload);
        payload.zeroize();
        let pair = result?;
        if pair.spec() != expected {
            return Err(CryptoError::TypeMismatch(
                "recovered key pair spec differs from expected",
            ));
        }
        Ok(pair)
    }

    /// Serialize the key material. Callers must zeroize the buffer when done.
    pub(crate) fn encode_vec(&self, buf: &mut Vec<u8>) {
        buf.push(WRAP_VERSION);
        buf.push(self.spec.key_length().code());
        buf.push(self.keys.len() as u8);
        for key in self.keys.values() {
            buf.push(key.spec().algo.id());
            buf.extend_from_slice(key.as_bytes());
        }
    }

    /// Rebuild a keyset from [`KeySet::encode_vec`] output. The encoding carries its own
    /// spec.
    pub(crate) fn decode(
        raw: &[u8],
        ciphers: Arc<dyn CipherFactory>,
    ) -> Result<KeySet, CryptoError> {
        let (&version, rest) = raw.split_first().ok_or(CryptoError::BadLength {
            step: "get key set encoding version",
            expected: 1,
            actual: 0,
        })?;
        if version != WRAP_VERSION {
            return Err(CryptoError::UnsupportedVersion(version));
        }
        if rest.len() < 2 {
            return Err(CryptoError::BadLength {
                step: "get key set encoding header",
                expected: 2,
                actual: rest.len(),
            });
        }
        let key_length = crate::spec::KeyLength::from_code(rest[0])?;
        let count = rest[1] as usize;
        let spec = KeySetSpec::new(key_length, count)
            .map_err(|_| CryptoError::BadFormat("encoded key set spec out of range"))?;
        let entry_len = 1 + key_length.num_bytes();
        let entries = &rest[2..];
        if entries.len() != count * entry_len {
            return Err(CryptoError::BadLength {
                step: "get key set key entries",
                expected: count * entry_len,
                actual: entries.len(),
            });
        }
        let mut set = KeySet::new_empty(spec, ciphers);
        for entry in entries.chunks_exact(entry_len) {
            let algo = crate::spec::SymKeyAlgo::from_id(entry[0])?;
            let spec = SymKeySpec::new(algo, key_length)
                .map_err(|_| CryptoError::BadFormat("encoded key invalid at key length"))?;
            set.declare_sym_key(SymKey::from_bytes(spec, &entry[1..])?)?;
        }
        set.check_populated()?;
        Ok(set)
    }
}

fn parse_wrapped_key(payload: &[u8], expected: SymKeySpec) -> Result<SymKey, CryptoError> {
    if payload.len() < 4 {
        return Err(CryptoError::BadLength {
            step: "get wrapped key header",
            expected: 4,
            actual: payload.len(),
        });
    }
    if payload[0] != WRAP_VERSION {
        return Err(CryptoError::UnsupportedVersion(payload[0]));
    }
    let algo = crate::spec::SymKeyAlgo::from_id(payload[1])?;
    let key_length = crate::spec::KeyLength::from_code(payload[2])?;
    let spec = SymKeySpec::new(algo, key_length)
        .map_err(|_| CryptoError::BadFormat("wrapped key invalid at key length"))?;
    let key = SymKey::from_bytes(spec, &payload[3..])?;
    if spec != expected {
        return Err(CryptoError::TypeMismatch(
            "recovered key spec differs from expected",
        ));
    }
    Ok(key)
}

/// The cipher specs the factory can actually serve at the spec's key length, in
/// canonical order. Errs if there aren't enough for the requested cascade width.
fn supported_pool(
    spec: &KeySetSpec,
    ciphers: &dyn CipherFactory,
) -> Result<Vec<SymKeySpec>, CryptoError> {
    spec.validate()?;
    let available = available_sym_key_specs(spec.key_length());
    let pool: Vec<SymKeySpec> = available
        .iter()
        .copied()
        .filter(|s| ciphers.supports_sym_key(*s))
        .collect();
    if pool.len() < spec.cipher_count() {
        if let Some(&missing) = available.iter().find(|s| !ciphers.supports_sym_key(**s)) {
            return Err(CryptoError::UnsupportedAlgorithm(missing));
        }
        return Err(CryptoError::InvalidSpec(format!(
            "cipher factory cannot satisfy {}",
            spec
        )));
    }
    Ok(pool)
}

/// Per-stage IV, keyed off the stage key so stages never share IV material even when
/// the seed repeats across stages.
pub(crate) fn derive_iv(
    key: &SymKey,
    seed: &[u8; SEED_LEN],
    stage: usize,
) -> Result<[u8; BLOCK_LEN], CryptoError> {
    let mut iv = [0u8; BLOCK_LEN];
    kdf::expand(
        key.as_bytes(),
        kdf::PERSONA_IV,
        &[seed, &[stage as u8]],
        &mut iv,
    )?;
    Ok(iv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::StdCipherFactory;
    use crate::spec::KeyLength;
    use rand::rngs::OsRng;

    fn factory() -> Arc<dyn CipherFactory> {
        Arc::new(StdCipherFactory)
    }

    fn generate(len: KeyLength, count: usize) -> KeySet {
        let spec = KeySetSpec::new(len, count).unwrap();
        KeySet::generate(&mut OsRng, spec, factory()).unwrap()
    }

    #[test]
    fn round_trip_all_specs_and_lengths() {
        let payloads: [&[u8]; 6] = [b"", b"a", &[7u8; 15], &[7u8; 16], &[7u8; 17], &[7u8; 160]];
        for len in [KeyLength::Len128, KeyLength::Len192, KeyLength::Len256] {
            for count in 1..=crate::spec::max_cipher_steps(len) {
                let set = generate(len, count);
                for payload in payloads {
                    let enc = set.encrypt_bytes(&mut OsRng, payload).unwrap();
                    assert_eq!(enc.len(), KeySet::encryption_length(payload.len()));
                    assert_eq!(set.decrypt_bytes(&enc).unwrap(), payload);
                }
            }
        }
    }

    #[test]
    fn hello_scenario() {
        // 256-bit keys, three ciphers, the 5-byte payload "Hello".
        let set = generate(KeyLength::Len256, 3);
        let enc = set.encrypt_bytes(&mut OsRng, b"Hello").unwrap();
        assert_eq!(enc.len(), KeySet::encryption_length(5));
        assert_eq!(set.decrypt_bytes(&enc).unwrap(), b"Hello");

        // Corrupting the first ciphertext byte must never return wrong plaintext
        // silently.
        let mut bad = enc.clone();
        bad[HDRLEN] ^= 0xFF;
        match set.decrypt_bytes(&bad) {
            Ok(plain) => assert_ne!(plain, b"Hello"),
            Err(_) => {}
        }
    }

    #[test]
    fn unpopulated_key_set_fails_fast() {
        let spec = KeySetSpec::new(KeyLength::Len256, 3).unwrap();
        let mut set = KeySet::new_empty(spec, factory());
        assert!(matches!(
            set.encrypt_bytes(&mut OsRng, b"data"),
            Err(CryptoError::BadState(_))
        ));
        assert!(matches!(
            set.decrypt_bytes(&[0u8; 64]),
            Err(CryptoError::BadState(_))
        ));

        // One key declared out of three is still not enough.
        let sym_spec = SymKeySpec::new(crate::spec::SymKeyAlgo::Aes, KeyLength::Len256).unwrap();
        set.declare_sym_key(SymKey::generate(&mut OsRng, sym_spec))
            .unwrap();
        assert!(set.encrypt_bytes(&mut OsRng, b"data").is_err());
    }

    #[test]
    fn declare_rules() {
        let spec = KeySetSpec::new(KeyLength::Len256, 2).unwrap();
        let mut set = KeySet::new_empty(spec, factory());
        let aes = SymKeySpec::new(crate::spec::SymKeyAlgo::Aes, KeyLength::Len256).unwrap();
        let aria = SymKeySpec::new(crate::spec::SymKeyAlgo::Aria, KeyLength::Len256).unwrap();
        let short = SymKeySpec::new(crate::spec::SymKeyAlgo::Aes, KeyLength::Len128).unwrap();

        set.declare_sym_key(SymKey::generate(&mut OsRng, aes)).unwrap();
        // Duplicate spec.
        assert!(set
            .declare_sym_key(SymKey::generate(&mut OsRng, aes))
            .is_err());
        // Wrong key length.
        assert!(set
            .declare_sym_key(SymKey::generate(&mut OsRng, short))
            .is_err());
        set.declare_sym_key(SymKey::generate(&mut OsRng, aria)).unwrap();
        assert!(set.is_populated());
        // Full.
        let kuz =
            SymKeySpec::new(crate::spec::SymKeyAlgo::Kuznyechik, KeyLength::Len256).unwrap();
        assert!(set
            .declare_sym_key(SymKey::generate(&mut OsRng, kuz))
            .is_err());
    }

    #[test]
    fn seed_derivation_is_deterministic() {
        let spec = KeySetSpec::default();
        let seed = [0x5Au8; 32];
        let a = KeySet::from_seed(spec, &seed, factory()).unwrap();
        let b = KeySet::from_seed(spec, &seed, factory()).unwrap();
        assert_eq!(a.id(), b.id());

        // The two keysets must decrypt each other's output.
        let enc = a.encrypt_bytes(&mut OsRng, b"shared secret derived").unwrap();
        assert_eq!(b.decrypt_bytes(&enc).unwrap(), b"shared secret derived");
        let enc = b.encrypt_bytes(&mut OsRng, b"other direction").unwrap();
        assert_eq!(a.decrypt_bytes(&enc).unwrap(), b"other direction");

        let c = KeySet::from_seed(spec, &[0x5Bu8; 32], factory()).unwrap();
        assert_ne!(a.id(), c.id());
        assert!(KeySet::from_seed(spec, &[], factory()).is_err());
    }

    #[test]
    fn wrap_and_derive_key() {
        let set = generate(KeyLength::Len256, 3);
        let spec = SymKeySpec::new(crate::spec::SymKeyAlgo::Camellia, KeyLength::Len256).unwrap();
        let key = SymKey::generate(&mut OsRng, spec);
        let wrapped = set.secure_key(&mut OsRng, &key).unwrap();
        assert_eq!(wrapped.len(), KeySet::key_wrap_length(spec.key_bytes()));

        let recovered = set.derive_key(&wrapped, spec).unwrap();
        assert_eq!(recovered.as_bytes(), key.as_bytes());

        // Expecting the wrong spec is a type mismatch, not a decrypt failure.
        let wrong = SymKeySpec::new(crate::spec::SymKeyAlgo::Aes, KeyLength::Len256).unwrap();
        assert!(matches!(
            set.derive_key(&wrapped, wrong),
            Err(CryptoError::TypeMismatch(_))
        ));
    }

    #[test]
    fn wrap_and_derive_key_set() {
        let outer = generate(KeyLength::Len256, 3);
        let inner = generate(KeyLength::Len128, 2);
        let wrapped = outer.secure_key_set(&mut OsRng, &inner).unwrap();
        assert_eq!(wrapped.len(), KeySet::key_set_wrap_length(inner.spec()));

        let recovered = outer.derive_key_set(&wrapped, inner.spec()).unwrap();
        assert_eq!(recovered.id(), inner.id());

        // Round-trip through actual decryption, not just ids.
        let enc = inner.encrypt_bytes(&mut OsRng, b"nested").unwrap();
        assert_eq!(recovered.decrypt_bytes(&enc).unwrap(), b"nested");

        let wrong = KeySetSpec::new(KeyLength::Len128, 3).unwrap();
        assert!(outer.derive_key_set(&wrapped, &wrong).is_err());
    }

    #[test]
    fn wrapping_unpopulated_key_set_fails() {
        let outer = generate(KeyLength::Len256, 2);
        let empty = KeySet::new_empty(KeySetSpec::default(), factory());
        assert!(matches!(
            outer.secure_key_set(&mut OsRng, &empty),
            Err(CryptoError::BadState(_))
        ));
    }

    #[test]
    fn clone_copies_keys() {
        let set = generate(KeyLength::Len192, 2);
        let copy = set.clone();
        assert_eq!(set.id(), copy.id());
        let enc = set.encrypt_bytes(&mut OsRng, b"clone me").unwrap();
        assert_eq!(copy.decrypt_bytes(&enc).unwrap(), b"clone me");
    }

    #[test]
    fn plain_and_aead_blobs_do_not_cross() {
        let set = generate(KeyLength::Len256, 2);
        let plain = set.encrypt_bytes(&mut OsRng, b"payload").unwrap();
        assert!(set.decrypt_bytes_aad(&plain, b"").is_err());
        let sealed = set.encrypt_bytes_aad(&mut OsRng, b"payload", b"").unwrap();
        assert!(set.decrypt_bytes(&sealed).is_err());
    }
}
