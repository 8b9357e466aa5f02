//! Layered symmetric encryption with self-describing blobs.
//!
//! This crate encrypts data under a *keyset*: several independently-keyed block
//! ciphers applied in cascade, in an order drawn fresh for every operation. Each
//! encrypted blob starts with a fixed-size recipe header recording the cipher order
//! and a random seed, so decryption needs nothing but the keyset itself. Breaking a
//! blob means breaking every cipher in the chain.
//!
//! Supported primitives, all 128-bit-block ciphers from the RustCrypto project:
//!
//! - AES (128/192/256-bit keys)
//! - Camellia (128/192/256)
//! - ARIA (128/192/256)
//! - Twofish (256)
//! - Kuznyechik (256)
//!
//! All operations start from a [`Factory`]:
//!
//! ```
//! # use cascade_crypto::CryptoError;
//! use cascade_crypto::Factory;
//!
//! # fn main() -> Result<(), CryptoError> {
//! let mut csprng = rand::rngs::OsRng;
//! let factory = Factory::generate(&mut csprng);
//!
//! // A random keyset: 256-bit keys, three ciphers.
//! let key_set = factory.generate_key_set(&mut csprng)?;
//! let sealed = key_set.encrypt_bytes(&mut csprng, b"Hello")?;
//! assert_eq!(key_set.decrypt_bytes(&sealed)?, b"Hello");
//!
//! // The authenticated variant detects any tampering.
//! let sealed = key_set.encrypt_bytes_aad(&mut csprng, b"Hello", b"context")?;
//! assert_eq!(key_set.decrypt_bytes_aad(&sealed, b"context")?, b"Hello");
//! # Ok(()) }
//! ```
//!
//! Keysets can also be derived deterministically from a seed
//! ([`Factory::key_set_from_seed`]), wrapped under another keyset
//! ([`KeySet::secure_key_set`]), or protected by a password lock
//! ([`Factory::prepare_lock`]). Password locks bind the host-derived factory seed
//! into the key derivation, and every lock failure reports as the single
//! [`CryptoError::DecryptFailed`], so nothing distinguishes a wrong password from
//! corrupt bytes.
//!
//! Key material is zeroized on drop and never appears in `Debug` output or error
//! messages.

pub mod aead;
pub mod cipher;
pub mod error;
pub mod factory;
pub mod keypair;
pub mod keyset;
pub mod lock;
pub mod spec;

mod kdf;
mod recipe;

pub use aead::KeySetAadCipher;
pub use error::CryptoError;
pub use factory::Factory;
pub use keypair::{KeyPair, KeyPairSpec};
pub use keyset::{KeySet, KeySetId, SymKey};
pub use lock::{FactoryLock, FreshLock, KeyPairLock, KeySetLock};
pub use spec::{
    DigestSpec, KdfParams, KeyLength, KeySetSpec, PasswordLockSpec, SymKeyAlgo, SymKeySpec,
    BLOCK_LEN,
};
