//! Asymmetric key pairs, as wrappable objects.
//!
//! The engine itself is symmetric; key pairs appear only as material that can be
//! wrapped under a keyset and recovered later. Both halves are carried so the public
//! key survives the round trip, and decode recomputes the public key from the recovered
//! secret to catch mismatched halves.

use std::fmt;

use ed25519_dalek::SigningKey;
use rand_core::{CryptoRng, RngCore};
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::error::CryptoError;

/// Encoded length: version, spec id, 32-byte public key, 32-byte secret key.
pub(crate) const KEYPAIR_ENCODED_LEN: usize = 2 + 32 + 32;

const KEYPAIR_VERSION: u8 = 1;

/// Supported key pair algorithms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyPairSpec {
    /// Ed25519 signing keys.
    Ed25519,
    /// X25519 key-exchange keys.
    X25519,
}

impl KeyPairSpec {
    fn id(self) -> u8 {
        match self {
            KeyPairSpec::Ed25519 => 1,
            KeyPairSpec::X25519 => 2,
        }
    }

    fn from_id(id: u8) -> Result<Self, CryptoError> {
        match id {
            1 => Ok(KeyPairSpec::Ed25519),
            2 => Ok(KeyPairSpec::X25519),
            _ => Err(CryptoError::BadFormat("key pair spec id wasn't valid")),
        }
    }
}

impl fmt::Display for KeyPairSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            KeyPairSpec::Ed25519 => "Ed25519",
            KeyPairSpec::X25519 => "X25519",
        })
    }
}

/// A full asymmetric key pair. The secret half is zeroized on drop.
#[derive(Clone)]
pub struct KeyPair {
    spec: KeyPairSpec,
    public: [u8; 32],
    secret: [u8; 32],
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

impl KeyPair {
    /// Generate a fresh key pair.
    pub fn generate<R>(csprng: &mut R, spec: KeyPairSpec) -> KeyPair
    where
        R: CryptoRng + RngCore,
    {
        match spec {
            KeyPairSpec::Ed25519 => {
                let signing = SigningKey::generate(csprng);
                KeyPair {
                    spec,
                    public: signing.verifying_key().to_bytes(),
                    secret: signing.to_bytes(),
                }
            }
            KeyPairSpec::X25519 => {
                let secret = StaticSecret::random_from_rng(&mut *csprng);
                KeyPair {
                    spec,
                    public: PublicKey::from(&secret).to_bytes(),
                    secret: secret.to_bytes(),
                }
            }
        }
    }

    pub fn spec(&self) -> KeyPairSpec {
        self.spec
    }

    pub fn public_key(&self) -> &[u8; 32] {
        &self.public
    }

    pub(crate) fn encode_vec(&self, buf: &mut Vec<u8>) {
        buf.push(KEYPAIR_VERSION);
        buf.push(self.spec.id());
        buf.extend_from_slice(&self.public);
        buf.extend_from_slice(&self.secret);
    }

    /// Rebuild from [`KeyPair::encode_vec`] output. The public key is recomputed from
    /// the secret and must match the carried one.
    pub(crate) fn try_from_encoded(raw: &[u8]) -> Result<KeyPair, CryptoError> {
        if raw.len() != KEYPAIR_ENCODED_LEN {
            return Err(CryptoError::BadLength {
                step: "get encoded key pair",
                expected: KEYPAIR_ENCODED_LEN,
                actual: raw.len(),
            });
        }
        if raw[0] != KEYPAIR_VERSION {
            return Err(CryptoError::UnsupportedVersion(raw[0]));
        }
        let spec = KeyPairSpec::from_id(raw[1])?;
        let mut public = [0u8; 32];
        public.copy_from_slice(&raw[2..34]);
        let mut secret = [0u8; 32];
        secret.copy_from_slice(&raw[34..66]);

        let derived_public: [u8; 32] = match spec {
            KeyPairSpec::Ed25519 => SigningKey::from_bytes(&secret).verifying_key().to_bytes(),
            KeyPairSpec::X25519 => PublicKey::from(&StaticSecret::from(secret)).to_bytes(),
        };
        if !bool::from(derived_public.ct_eq(&public)) {
            secret.zeroize();
            return Err(CryptoError::BadFormat(
                "public key does not match secret key",
            ));
        }
        Ok(KeyPair {
            spec,
            public,
            secret,
        })
    }
}

/// Compares spec and public half only; never touches secret material.
impl PartialEq for KeyPair {
    fn eq(&self, other: &Self) -> bool {
        self.spec == other.spec && self.public == other.public
    }
}

impl Eq for KeyPair {}

impl fmt::Debug for KeyPair {
    /// Never shows the secret half.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("spec", &self.spec)
            .field("public", &self.public)
            .finish()
    }
}
