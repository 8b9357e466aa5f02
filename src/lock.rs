//! Password locks.
//!
//! A lock is a password-protected container for exactly one kind of object: a keyset, a
//! key pair, or a whole factory. The lock bytes are self-describing; everything needed
//! to re-derive the password keyset (KDF cost parameters and salt) rides in a fixed
//! 32-byte header, which is also bound as associated data so it cannot be swapped out.
//!
//! # Format
//!
//! ```text
//! +---------+------+--------+-------+===========+========+=============+
//! | Version | Type | KeyLen | Count | KDF costs |  Salt  | AEAD body   |
//! +---------+------+--------+-------+===========+========+=============+
//!   1 byte   1 byte  1 byte  1 byte   12 bytes   16 bytes  variable
//! ```
//!
//! KDF costs are three little-endian u32 values: memory cost in KiB, time cost, and
//! parallelism. KeyLen and Count describe the password-derived keyset, not the payload.
//!
//! Locks are produced through a [`FreshLock`], which a
//! [`Factory`](crate::factory::Factory) prepares from a password. A fresh lock performs
//! exactly one locking operation; a second attempt fails with `BadState`. Resolution
//! also goes through the factory, and reports every failure as the single
//! `DecryptFailed` error so a wrong password cannot be told apart from corrupt bytes.

use std::convert::TryFrom;
use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use rand_core::{CryptoRng, RngCore};
use zeroize::Zeroize;

use crate::{
    error::CryptoError,
    keypair::KeyPair,
    keyset::KeySet,
    spec::{KdfParams, KeySetSpec, PasswordLockSpec},
};

pub(crate) const LOCK_VERSION: u8 = 1;
pub(crate) const SALT_LEN: usize = 16;
pub(crate) const LOCK_HDR_LEN: usize = 4 + 12 + SALT_LEN;

/// Seed bytes sealed inside a factory lock: version byte plus the 32-byte seed.
pub(crate) const FACTORY_PAYLOAD_LEN: usize = 1 + 32;
pub(crate) const FACTORY_PAYLOAD_VERSION: u8 = 1;

/// What kind of object a lock protects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LockType {
    KeySet,
    KeyPair,
    Factory,
}

impl LockType {
    fn id(self) -> u8 {
        match self {
            LockType::KeySet => 0,
            LockType::KeyPair => 1,
            LockType::Factory => 2,
        }
    }

    fn from_id(id: u8) -> Result<Self, CryptoError> {
        match id {
            0 => Ok(LockType::KeySet),
            1 => Ok(LockType::KeyPair),
            2 => Ok(LockType::Factory),
            _ => Err(CryptoError::BadFormat("lock type byte wasn't valid")),
        }
    }
}

/// A decoded password lock: parsed header plus the raw bytes it came from.
#[derive(Clone)]
pub(crate) struct PasswordLock {
    spec: PasswordLockSpec,
    lock_type: LockType,
    salt: [u8; SALT_LEN],
    raw: Vec<u8>,
}

impl PasswordLock {
    pub(crate) fn decode(raw: &[u8]) -> Result<PasswordLock, CryptoError> {
        if raw.len() < LOCK_HDR_LEN {
            return Err(CryptoError::BadLength {
                step: "get password lock header",
                expected: LOCK_HDR_LEN,
                actual: raw.len(),
            });
        }
        if raw[0] != LOCK_VERSION {
            return Err(CryptoError::UnsupportedVersion(raw[0]));
        }
        let lock_type = LockType::from_id(raw[1])?;
        let key_length = crate::spec::KeyLength::from_code(raw[2])?;
        let key_set_spec = KeySetSpec::new(key_length, raw[3] as usize)
            .map_err(|_| CryptoError::BadFormat("lock cipher count out of range"))?;
        let kdf = KdfParams::new(
            LittleEndian::read_u32(&raw[4..8]),
            LittleEndian::read_u32(&raw[8..12]),
            LittleEndian::read_u32(&raw[12..16]),
        )
        .map_err(|_| CryptoError::BadFormat("lock KDF parameters out of range"))?;
        let spec = PasswordLockSpec::new(key_set_spec, kdf)?;
        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&raw[16..LOCK_HDR_LEN]);
        Ok(PasswordLock {
            spec,
            lock_type,
            salt,
            raw: raw.to_vec(),
        })
    }

    pub(crate) fn spec(&self) -> &PasswordLockSpec {
        &self.spec
    }

    pub(crate) fn lock_type(&self) -> LockType {
        self.lock_type
    }

    pub(crate) fn salt(&self) -> &[u8; SALT_LEN] {
        &self.salt
    }

    pub(crate) fn header(&self) -> &[u8] {
        &self.raw[..LOCK_HDR_LEN]
    }

    pub(crate) fn body(&self) -> &[u8] {
        &self.raw[LOCK_HDR_LEN..]
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.raw
    }
}

impl fmt::Debug for PasswordLock {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PasswordLock")
            .field("spec", &self.spec)
            .field("lock_type", &self.lock_type)
            .field("body_len", &self.body().len())
            .finish()
    }
}

macro_rules! lock_newtype {
    ($(#[$attr:meta])* $name:ident, $lock_type:expr, $expect:literal) => {
        $(#[$attr])*
        #[derive(Clone, Debug)]
        pub struct $name(pub(crate) PasswordLock);

        impl $name {
            /// The raw lock bytes, suitable for storage.
            pub fn as_bytes(&self) -> &[u8] {
                self.0.as_bytes()
            }

            /// The KDF cost and keyset shape recorded in the lock header.
            pub fn spec(&self) -> &PasswordLockSpec {
                self.0.spec()
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = CryptoError;

            fn try_from(raw: &[u8]) -> Result<Self, CryptoError> {
                let lock = PasswordLock::decode(raw)?;
                if lock.lock_type() != $lock_type {
                    return Err(CryptoError::TypeMismatch($expect));
                }
                Ok($name(lock))
            }
        }
    };
}

lock_newtype!(
    /// A password lock holding a keyset.
    KeySetLock,
    LockType::KeySet,
    "lock bytes do not hold a key set"
);
lock_newtype!(
    /// A password lock holding a key pair.
    KeyPairLock,
    LockType::KeyPair,
    "lock bytes do not hold a key pair"
);
lock_newtype!(
    /// A password lock holding a factory seed.
    FactoryLock,
    LockType::Factory,
    "lock bytes do not hold a factory"
);

/// A prepared, not-yet-used password lock.
///
/// Holds the password-derived keyset, so preparing one pays the Argon2 cost up front.
/// Exactly one `lock_*` call is allowed; afterwards every operation fails with
/// `BadState`. Obtained from [`Factory::prepare_lock`](crate::factory::Factory::prepare_lock).
pub struct FreshLock {
    spec: PasswordLockSpec,
    salt: [u8; SALT_LEN],
    key_set: KeySet,
    used: bool,
}

impl fmt::Debug for FreshLock {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FreshLock")
            .field("spec", &self.spec)
            .field("used", &self.used)
            .finish()
    }
}

impl FreshLock {
    pub(crate) fn new(spec: PasswordLockSpec, salt: [u8; SALT_LEN], key_set: KeySet) -> FreshLock {
        FreshLock {
            spec,
            salt,
            key_set,
            used: false,
        }
    }

    pub fn spec(&self) -> &PasswordLockSpec {
        &self.spec
    }

    /// Lock a keyset. Consumes the single use.
    pub fn lock_key_set<R>(
        &mut self,
        csprng: &mut R,
        target: &KeySet,
    ) -> Result<KeySetLock, CryptoError>
    where
        R: CryptoRng + RngCore,
    {
        target.check_populated()?;
        let mut payload = Vec::new();
        target.encode_vec(&mut payload);
        let result = self.seal(csprng, LockType::KeySet, &payload);
        payload.zeroize();
        Ok(KeySetLock(result?))
    }

    /// Lock a key pair. Consumes the single use.
    pub fn lock_key_pair<R>(
        &mut self,
        csprng: &mut R,
        target: &KeyPair,
    ) -> Result<KeyPairLock, CryptoError>
    where
        R: CryptoRng + RngCore,
    {
        let mut payload = Vec::with_capacity(crate::keypair::KEYPAIR_ENCODED_LEN);
        target.encode_vec(&mut payload);
        let result = self.seal(csprng, LockType::KeyPair, &payload);
        payload.zeroize();
        Ok(KeyPairLock(result?))
    }

    /// Lock a factory, so the same factory (and everything derivable from it) can be
    /// recovered from the password later. Consumes the single use.
    pub fn lock_factory<R>(
        &mut self,
        csprng: &mut R,
        target: &crate::factory::Factory,
    ) -> Result<FactoryLock, CryptoError>
    where
        R: CryptoRng + RngCore,
    {
        self.lock_factory_seed(csprng, target.seed_bytes())
    }

    fn lock_factory_seed<R>(
        &mut self,
        csprng: &mut R,
        seed: &[u8; 32],
    ) -> Result<FactoryLock, CryptoError>
    where
        R: CryptoRng + RngCore,
    {
        let mut payload = Vec::with_capacity(FACTORY_PAYLOAD_LEN);
        payload.push(FACTORY_PAYLOAD_VERSION);
        payload.extend_from_slice(seed);
        let result = self.seal(csprng, LockType::Factory, &payload);
        payload.zeroize();
        Ok(FactoryLock(result?))
    }

    fn seal<R>(
        &mut self,
        csprng: &mut R,
        lock_type: LockType,
        payload: &[u8],
    ) -> Result<PasswordLock, CryptoError>
    where
        R: CryptoRng + RngCore,
    {
        if self.used {
            return Err(CryptoError::BadState("fresh lock was already used"));
        }
        self.used = true;
        let header = encode_header(&self.spec, lock_type, &self.salt);
        let body = self.key_set.encrypt_bytes_aad(csprng, payload, &header)?;
        let mut raw = Vec::with_capacity(LOCK_HDR_LEN + body.len());
        raw.extend_from_slice(&header);
        raw.extend_from_slice(&body);
        Ok(PasswordLock {
            spec: self.spec,
            lock_type,
            salt: self.salt,
            raw,
        })
    }
}

fn encode_header(
    spec: &PasswordLockSpec,
    lock_type: LockType,
    salt: &[u8; SALT_LEN],
) -> [u8; LOCK_HDR_LEN] {
    let mut header = [0u8; LOCK_HDR_LEN];
    header[0] = LOCK_VERSION;
    header[1] = lock_type.id();
    header[2] = spec.key_set_spec().key_length().code();
    header[3] = spec.key_set_spec().cipher_count() as u8;
    LittleEndian::write_u32(&mut header[4..8], spec.kdf().mem_cost_kib());
    LittleEndian::write_u32(&mut header[8..12], spec.kdf().time_cost());
    LittleEndian::write_u32(&mut header[12..16], spec.kdf().parallelism());
    header[16..LOCK_HDR_LEN].copy_from_slice(salt);
    header
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::StdCipherFactory;
    use crate::keypair::KeyPairSpec;
    use crate::spec::KeyLength;
    use rand::rngs::OsRng;
    use std::sync::Arc;

    fn fresh_lock() -> FreshLock {
        let spec = PasswordLockSpec::new(
            KeySetSpec::new(KeyLength::Len256, 2).unwrap(),
            KdfParams::new(8, 1, 1).unwrap(),
        )
        .unwrap();
        let key_set =
            KeySet::generate(&mut OsRng, *spec.key_set_spec(), Arc::new(StdCipherFactory))
                .unwrap();
        FreshLock::new(spec, [7u8; SALT_LEN], key_set)
    }

    fn sample_key_set() -> KeySet {
        KeySet::generate(&mut OsRng, KeySetSpec::default(), Arc::new(StdCipherFactory)).unwrap()
    }

    #[test]
    fn header_fields_survive_decode() {
        let mut lock = fresh_lock();
        let spec = *lock.spec();
        let sealed = lock.lock_key_set(&mut OsRng, &sample_key_set()).unwrap();

        let decoded = KeySetLock::try_from(sealed.as_bytes()).unwrap();
        assert_eq!(decoded.spec(), &spec);
        assert_eq!(decoded.0.salt(), &[7u8; SALT_LEN]);
        assert_eq!(decoded.0.lock_type(), LockType::KeySet);
    }

    #[test]
    fn fresh_lock_is_single_use() {
        let mut lock = fresh_lock();
        let target = sample_key_set();
        lock.lock_key_set(&mut OsRng, &target).unwrap();
        assert!(matches!(
            lock.lock_key_set(&mut OsRng, &target),
            Err(CryptoError::BadState(_))
        ));
        // Cross-type reuse is blocked too.
        let pair = KeyPair::generate(&mut OsRng, KeyPairSpec::Ed25519);
        assert!(matches!(
            lock.lock_key_pair(&mut OsRng, &pair),
            Err(CryptoError::BadState(_))
        ));
    }

    #[test]
    fn newtypes_check_lock_type() {
        let mut lock = fresh_lock();
        let sealed = lock.lock_key_set(&mut OsRng, &sample_key_set()).unwrap();
        let raw = sealed.as_bytes();

        assert!(KeySetLock::try_from(raw).is_ok());
        assert!(matches!(
            KeyPairLock::try_from(raw),
            Err(CryptoError::TypeMismatch(_))
        ));
        assert!(matches!(
            FactoryLock::try_from(raw),
            Err(CryptoError::TypeMismatch(_))
        ));
    }

    #[test]
    fn decode_rejects_bad_headers() {
        let mut lock = fresh_lock();
        let sealed = lock.lock_key_set(&mut OsRng, &sample_key_set()).unwrap();
        let good = sealed.as_bytes().to_vec();

        let mut bad = good.clone();
        bad[0] = 2;
        assert!(matches!(
            PasswordLock::decode(&bad),
            Err(CryptoError::UnsupportedVersion(2))
        ));

        let mut bad = good.clone();
        bad[1] = 9;
        assert!(PasswordLock::decode(&bad).is_err());

        // Cipher count outside what 256-bit keys allow.
        let mut bad = good.clone();
        bad[3] = 6;
        assert!(PasswordLock::decode(&bad).is_err());

        // Zeroed KDF costs.
        let mut bad = good.clone();
        bad[4..16].fill(0);
        assert!(PasswordLock::decode(&bad).is_err());

        assert!(PasswordLock::decode(&good[..LOCK_HDR_LEN - 1]).is_err());
    }

    #[test]
    fn locking_unpopulated_key_set_fails_without_spending_use() {
        let mut lock = fresh_lock();
        let empty = KeySet::new_empty(KeySetSpec::default(), Arc::new(StdCipherFactory));
        assert!(matches!(
            lock.lock_key_set(&mut OsRng, &empty),
            Err(CryptoError::BadState(_))
        ));
        // The failed attempt didn't consume the single use.
        lock.lock_key_set(&mut OsRng, &sample_key_set()).unwrap();
    }
}
