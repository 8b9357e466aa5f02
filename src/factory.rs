//! The keyset factory: the single entry point to the engine.
//!
//! A [`Factory`] bundles a cipher factory, a digest factory, and a 32-byte
//! configuration seed. Everything else hangs off it: keysets (empty, random, or
//! seed-derived), fresh password locks, and lock resolution.
//!
//! ```
//! # use cascade_crypto::{Factory, CryptoError};
//! # fn demo() -> Result<(), CryptoError> {
//! let mut csprng = rand::rngs::OsRng;
//! let factory = Factory::generate(&mut csprng);
//! let key_set = factory.generate_key_set(&mut csprng)?;
//! let sealed = key_set.encrypt_bytes(&mut csprng, b"Hello")?;
//! assert_eq!(key_set.decrypt_bytes(&sealed)?, b"Hello");
//! # Ok(()) }
//! ```
//!
//! # The locking factory
//!
//! Password locks never derive their keys from the password alone. Each factory lazily
//! builds a companion "locking factory" whose seed mixes the host identity into this
//! factory's seed; that seed becomes the Argon2 secret for every lock prepared or
//! resolved here. Locks are therefore bound to the factory that made them: the raw
//! password is useless to anyone who only captured the lock bytes. The companion is
//! built at most once per factory and shared across threads.

use std::fs;
use std::sync::{Arc, OnceLock};

use rand_core::{CryptoRng, RngCore};
use zeroize::Zeroize;

use crate::{
    cipher::{CipherFactory, DigestFactory, StdCipherFactory, StdDigestFactory},
    error::CryptoError,
    kdf,
    keypair::KeyPair,
    keyset::KeySet,
    lock::{FactoryLock, FreshLock, KeyPairLock, KeySetLock, FACTORY_PAYLOAD_VERSION, SALT_LEN},
    spec::{DigestSpec, KeySetSpec, PasswordLockSpec},
};

/// Root object for creating keysets and password locks.
pub struct Factory {
    seed: [u8; 32],
    ciphers: Arc<dyn CipherFactory>,
    digests: Arc<dyn DigestFactory>,
    locking: OnceLock<Arc<Factory>>,
}

impl Drop for Factory {
    fn drop(&mut self) {
        self.seed.zeroize();
    }
}

impl std::fmt::Debug for Factory {
    /// Never shows the seed.
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Factory").finish_non_exhaustive()
    }
}

impl Factory {
    /// A factory with a fresh random seed and the standard primitive providers.
    pub fn generate<R>(csprng: &mut R) -> Factory
    where
        R: CryptoRng + RngCore,
    {
        let mut seed = [0u8; 32];
        csprng.fill_bytes(&mut seed);
        Factory::with_seed(seed)
    }

    /// A factory with a caller-provided seed and the standard primitive providers.
    /// The same seed always yields an equivalent factory.
    pub fn with_seed(seed: [u8; 32]) -> Factory {
        Factory::with_components(seed, Arc::new(StdCipherFactory), Arc::new(StdDigestFactory))
    }

    /// A factory with alternate primitive providers.
    pub fn with_components(
        seed: [u8; 32],
        ciphers: Arc<dyn CipherFactory>,
        digests: Arc<dyn DigestFactory>,
    ) -> Factory {
        Factory {
            seed,
            ciphers,
            digests,
            locking: OnceLock::new(),
        }
    }

    pub(crate) fn seed_bytes(&self) -> &[u8; 32] {
        &self.seed
    }

    /// An empty keyset; keys must be declared before it can encrypt. The spec is
    /// re-validated before anything is allocated.
    pub fn create_key_set(&self, spec: KeySetSpec) -> Result<KeySet, CryptoError> {
        spec.validate()?;
        Ok(KeySet::new_empty(spec, Arc::clone(&self.ciphers)))
    }

    /// A fully-populated random keyset with the default spec.
    pub fn generate_key_set<R>(&self, csprng: &mut R) -> Result<KeySet, CryptoError>
    where
        R: CryptoRng + RngCore,
    {
        self.generate_key_set_with_spec(csprng, KeySetSpec::default())
    }

    /// A fully-populated random keyset. The cipher choice is drawn from whatever the
    /// cipher factory supports at the spec's key length.
    pub fn generate_key_set_with_spec<R>(
        &self,
        csprng: &mut R,
        spec: KeySetSpec,
    ) -> Result<KeySet, CryptoError>
    where
        R: CryptoRng + RngCore,
    {
        KeySet::generate(csprng, spec, Arc::clone(&self.ciphers))
    }

    /// A keyset derived deterministically from `seed`, with the default spec.
    pub fn key_set_from_seed(&self, seed: &[u8]) -> Result<KeySet, CryptoError> {
        self.key_set_from_seed_with_spec(seed, KeySetSpec::default())
    }

    /// A keyset derived deterministically from `seed`. Seeds longer than 64 bytes are
    /// first compressed with BLAKE2b-512.
    pub fn key_set_from_seed_with_spec(
        &self,
        seed: &[u8],
        spec: KeySetSpec,
    ) -> Result<KeySet, CryptoError> {
        if seed.len() > 64 {
            let mut digest = self.digests.create_digest(DigestSpec::Blake2b512)?;
            digest.update(seed);
            let mut compact = digest.finalize();
            let result = KeySet::from_seed(spec, &compact, Arc::clone(&self.ciphers));
            compact.zeroize();
            return result;
        }
        KeySet::from_seed(spec, seed, Arc::clone(&self.ciphers))
    }

    /// The companion factory whose seed backs every password lock made here. Built on
    /// first use from this factory's seed and the host identity, then cached.
    pub fn locking_factory(&self) -> Result<&Arc<Factory>, CryptoError> {
        if let Some(locking) = self.locking.get() {
            return Ok(locking);
        }
        let host = host_identity();
        let mut seed = [0u8; 32];
        kdf::expand(&self.seed, kdf::PERSONA_HOST, &[&host], &mut seed)?;
        Ok(self.locking.get_or_init(|| {
            Arc::new(Factory::with_components(
                seed,
                Arc::clone(&self.ciphers),
                Arc::clone(&self.digests),
            ))
        }))
    }

    /// Prepare a single-use password lock. This is where the Argon2 work happens; the
    /// returned [`FreshLock`] locks one object without further derivation.
    pub fn prepare_lock<R>(
        &self,
        csprng: &mut R,
        password: &[u8],
        spec: PasswordLockSpec,
    ) -> Result<FreshLock, CryptoError>
    where
        R: CryptoRng + RngCore,
    {
        spec.validate()?;
        let mut salt = [0u8; SALT_LEN];
        csprng.fill_bytes(&mut salt);
        let key_set = self.password_key_set(password, &salt, &spec)?;
        Ok(FreshLock::new(spec, salt, key_set))
    }

    /// Prepare a lock and immediately lock a keyset with it.
    pub fn new_key_set_lock<R>(
        &self,
        csprng: &mut R,
        password: &[u8],
        spec: PasswordLockSpec,
        target: &KeySet,
    ) -> Result<KeySetLock, CryptoError>
    where
        R: CryptoRng + RngCore,
    {
        self.prepare_lock(csprng, password, spec)?
            .lock_key_set(csprng, target)
    }

    /// Prepare a lock and immediately lock a key pair with it.
    pub fn new_key_pair_lock<R>(
        &self,
        csprng: &mut R,
        password: &[u8],
        spec: PasswordLockSpec,
        target: &KeyPair,
    ) -> Result<KeyPairLock, CryptoError>
    where
        R: CryptoRng + RngCore,
    {
        self.prepare_lock(csprng, password, spec)?
            .lock_key_pair(csprng, target)
    }

    /// Prepare a lock and immediately lock this factory with it.
    pub fn new_factory_lock<R>(
        &self,
        csprng: &mut R,
        password: &[u8],
        spec: PasswordLockSpec,
    ) -> Result<FactoryLock, CryptoError>
    where
        R: CryptoRng + RngCore,
    {
        self.prepare_lock(csprng, password, spec)?
            .lock_factory(csprng, self)
    }

    /// Recover a keyset from a lock. A wrong password and corrupt lock bytes fail
    /// identically with `DecryptFailed`; resolution can be retried with another
    /// password.
    pub fn resolve_key_set_lock(
        &self,
        lock: &KeySetLock,
        password: &[u8],
    ) -> Result<KeySet, CryptoError> {
        let mut payload = self.unseal(&lock.0, password)?;
        let result = KeySet::decode(&payload, Arc::clone(&self.ciphers));
        payload.zeroize();
        result
    }

    /// Recover a key pair from a lock. Same failure behavior as
    /// [`Factory::resolve_key_set_lock`].
    pub fn resolve_key_pair_lock(
        &self,
        lock: &KeyPairLock,
        password: &[u8],
    ) -> Result<KeyPair, CryptoError> {
        let mut payload = self.unseal(&lock.0, password)?;
        let result = KeyPair::try_from_encoded(&payload);
        payload.zeroize();
        result
    }

    /// Recover a factory from a lock. The result shares this factory's primitive
    /// providers.
    pub fn resolve_factory_lock(
        &self,
        lock: &FactoryLock,
        password: &[u8],
    ) -> Result<Factory, CryptoError> {
        let mut payload = self.unseal(&lock.0, password)?;
        if payload.len() != crate::lock::FACTORY_PAYLOAD_LEN
            || payload[0] != FACTORY_PAYLOAD_VERSION
        {
            payload.zeroize();
            return Err(CryptoError::BadFormat("factory lock payload malformed"));
        }
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&payload[1..]);
        payload.zeroize();
        Ok(Factory::with_components(
            seed,
            Arc::clone(&self.ciphers),
            Arc::clone(&self.digests),
        ))
    }

    fn password_key_set(
        &self,
        password: &[u8],
        salt: &[u8; SALT_LEN],
        spec: &PasswordLockSpec,
    ) -> Result<KeySet, CryptoError> {
        let locking = self.locking_factory()?;
        let mut seed = kdf::derive_password_seed(password, salt, spec.kdf(), &locking.seed)?;
        let result = KeySet::from_seed(*spec.key_set_spec(), &seed, Arc::clone(&self.ciphers));
        seed.zeroize();
        result
    }

    fn unseal(
        &self,
        lock: &crate::lock::PasswordLock,
        password: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let key_set = self
            .password_key_set(password, lock.salt(), lock.spec())
            .map_err(|_| CryptoError::DecryptFailed)?;
        key_set
            .decrypt_bytes_aad(lock.body(), lock.header())
            .map_err(|_| CryptoError::DecryptFailed)
    }
}

/// Stable identity of the local host, used to seed the locking factory. Falls back to
/// a fixed name so the factory still works in minimal environments.
fn host_identity() -> Vec<u8> {
    if let Ok(name) = std::env::var("HOSTNAME") {
        if !name.is_empty() {
            return name.into_bytes();
        }
    }
    if let Ok(name) = std::env::var("COMPUTERNAME") {
        if !name.is_empty() {
            return name.into_bytes();
        }
    }
    if let Ok(contents) = fs::read_to_string("/etc/hostname") {
        let name = contents.trim();
        if !name.is_empty() {
            return name.as_bytes().to_vec();
        }
    }
    b"localhost".to_vec()
}
