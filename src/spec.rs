//! Algorithm and keyset specifications.
//!
//! Everything in this module is a plain value type: no key material, no cipher state.
//! The constructors are the validation gates the rest of the engine relies on — a
//! [`KeySetSpec`] or [`PasswordLockSpec`] that exists is a valid one, and every factory
//! path re-checks with [`KeySetSpec::validate`] before allocating key material.

use std::fmt;

use crate::error::CryptoError;

/// Block length shared by every supported block cipher, in bytes.
pub const BLOCK_LEN: usize = 16;

/// Supported symmetric key lengths.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyLength {
    Len128,
    Len192,
    Len256,
}

impl KeyLength {
    /// Key length in bytes.
    pub fn num_bytes(self) -> usize {
        match self {
            KeyLength::Len128 => 16,
            KeyLength::Len192 => 24,
            KeyLength::Len256 => 32,
        }
    }

    /// Key length in bits.
    pub fn num_bits(self) -> usize {
        self.num_bytes() * 8
    }

    pub(crate) fn code(self) -> u8 {
        match self {
            KeyLength::Len128 => 0,
            KeyLength::Len192 => 1,
            KeyLength::Len256 => 2,
        }
    }

    pub(crate) fn from_code(code: u8) -> Result<Self, CryptoError> {
        match code {
            0 => Ok(KeyLength::Len128),
            1 => Ok(KeyLength::Len192),
            2 => Ok(KeyLength::Len256),
            _ => Err(CryptoError::BadFormat("key length code wasn't valid")),
        }
    }
}

impl fmt::Display for KeyLength {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.num_bits())
    }
}

/// Supported symmetric cipher algorithms. All operate on 16-byte blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SymKeyAlgo {
    Aes,
    Camellia,
    Aria,
    Twofish,
    Kuznyechik,
}

impl SymKeyAlgo {
    pub const ALL: [SymKeyAlgo; 5] = [
        SymKeyAlgo::Aes,
        SymKeyAlgo::Camellia,
        SymKeyAlgo::Aria,
        SymKeyAlgo::Twofish,
        SymKeyAlgo::Kuznyechik,
    ];

    /// Whether this algorithm is available at the given key length. Twofish and
    /// Kuznyechik take 256-bit keys only.
    pub fn supports_key_length(self, len: KeyLength) -> bool {
        match self {
            SymKeyAlgo::Aes | SymKeyAlgo::Camellia | SymKeyAlgo::Aria => true,
            SymKeyAlgo::Twofish | SymKeyAlgo::Kuznyechik => len == KeyLength::Len256,
        }
    }

    /// Wire identifier. Zero is reserved for empty recipe slots.
    pub(crate) fn id(self) -> u8 {
        match self {
            SymKeyAlgo::Aes => 1,
            SymKeyAlgo::Camellia => 2,
            SymKeyAlgo::Aria => 3,
            SymKeyAlgo::Twofish => 4,
            SymKeyAlgo::Kuznyechik => 5,
        }
    }

    pub(crate) fn from_id(id: u8) -> Result<Self, CryptoError> {
        match id {
            1 => Ok(SymKeyAlgo::Aes),
            2 => Ok(SymKeyAlgo::Camellia),
            3 => Ok(SymKeyAlgo::Aria),
            4 => Ok(SymKeyAlgo::Twofish),
            5 => Ok(SymKeyAlgo::Kuznyechik),
            _ => Err(CryptoError::BadFormat("cipher algorithm id wasn't valid")),
        }
    }
}

impl fmt::Display for SymKeyAlgo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            SymKeyAlgo::Aes => "AES",
            SymKeyAlgo::Camellia => "Camellia",
            SymKeyAlgo::Aria => "ARIA",
            SymKeyAlgo::Twofish => "Twofish",
            SymKeyAlgo::Kuznyechik => "Kuznyechik",
        };
        f.write_str(name)
    }
}

/// A symmetric cipher algorithm paired with a key length, e.g. AES-256.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymKeySpec {
    pub algo: SymKeyAlgo,
    pub key_length: KeyLength,
}

impl SymKeySpec {
    pub fn new(algo: SymKeyAlgo, key_length: KeyLength) -> Result<Self, CryptoError> {
        let spec = SymKeySpec { algo, key_length };
        if !spec.is_valid() {
            return Err(CryptoError::InvalidSpec(format!(
                "{} does not support {}-bit keys",
                algo, key_length
            )));
        }
        Ok(spec)
    }

    pub fn is_valid(self) -> bool {
        self.algo.supports_key_length(self.key_length)
    }

    /// Key length in bytes.
    pub fn key_bytes(self) -> usize {
        self.key_length.num_bytes()
    }
}

impl fmt::Display for SymKeySpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-{}", self.algo, self.key_length)
    }
}

/// All valid cipher specs at the given key length, in canonical order.
pub fn available_sym_key_specs(len: KeyLength) -> Vec<SymKeySpec> {
    SymKeyAlgo::ALL
        .iter()
        .filter(|algo| algo.supports_key_length(len))
        .map(|&algo| SymKeySpec {
            algo,
            key_length: len,
        })
        .collect()
}

/// Number of cipher specs available at the given key length. This bounds the cipher
/// count of any [`KeySetSpec`].
pub fn max_cipher_steps(len: KeyLength) -> usize {
    SymKeyAlgo::ALL
        .iter()
        .filter(|algo| algo.supports_key_length(len))
        .count()
}

/// Specification for a keyset: key length plus the number of independently-keyed
/// ciphers applied in cascade.
///
/// Immutable once constructed; [`KeySetSpec::new`] is the only way to obtain one and
/// rejects anything malformed, so no invalid spec can reach cipher construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct KeySetSpec {
    key_length: KeyLength,
    cipher_count: usize,
}

impl KeySetSpec {
    pub fn new(key_length: KeyLength, cipher_count: usize) -> Result<Self, CryptoError> {
        let spec = KeySetSpec {
            key_length,
            cipher_count,
        };
        spec.validate()?;
        Ok(spec)
    }

    pub fn key_length(&self) -> KeyLength {
        self.key_length
    }

    pub fn cipher_count(&self) -> usize {
        self.cipher_count
    }

    /// Re-check the spec invariants. Every factory creation path calls this before
    /// allocating key material.
    pub fn validate(&self) -> Result<(), CryptoError> {
        let max = max_cipher_steps(self.key_length);
        if self.cipher_count == 0 || self.cipher_count > max {
            return Err(CryptoError::InvalidSpec(format!(
                "cipher count {} outside 1..={} for {}-bit keys",
                self.cipher_count, max, self.key_length
            )));
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

impl Default for KeySetSpec {
    /// 256-bit keys, three cascade stages.
    fn default() -> Self {
        KeySetSpec {
            key_length: KeyLength::Len256,
            cipher_count: 3,
        }
    }
}

impl fmt::Display for KeySetSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "KeySet({}-bit x{})", self.key_length, self.cipher_count)
    }
}

/// Argon2id cost parameters for password-based key derivation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KdfParams {
    mem_cost_kib: u32,
    time_cost: u32,
    parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        KdfParams {
            mem_cost_kib: 64 * 1024,
            time_cost: 3,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    pub fn new(mem_cost_kib: u32, time_cost: u32, parallelism: u32) -> Result<Self, CryptoError> {
        let params = KdfParams {
            mem_cost_kib,
            time_cost,
            parallelism,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn mem_cost_kib(&self) -> u32 {
        self.mem_cost_kib
    }

    pub fn time_cost(&self) -> u32 {
        self.time_cost
    }

    pub fn parallelism(&self) -> u32 {
        self.parallelism
    }

    pub fn validate(&self) -> Result<(), CryptoError> {
        if self.time_cost < 1 {
            return Err(CryptoError::InvalidSpec(
                "argon2 time cost must be >= 1".into(),
            ));
        }
        if self.parallelism < 1 {
            return Err(CryptoError::InvalidSpec(
                "argon2 parallelism must be >= 1".into(),
            ));
        }
        if self.mem_cost_kib < 8 * self.parallelism.max(1) {
            return Err(CryptoError::InvalidSpec(format!(
                "argon2 memory cost {} KiB below minimum of 8 * parallelism",
                self.mem_cost_kib
            )));
        }
        Ok(())
    }
}

/// Specification for a password lock: which keyset shape protects the payload, and how
/// expensive the password derivation is. Validation delegates to the embedded
/// [`KeySetSpec`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PasswordLockSpec {
    key_set_spec: KeySetSpec,
    kdf: KdfParams,
}

impl PasswordLockSpec {
    pub fn new(key_set_spec: KeySetSpec, kdf: KdfParams) -> Result<Self, CryptoError> {
        let spec = PasswordLockSpec { key_set_spec, kdf };
        spec.validate()?;
        Ok(spec)
    }

    pub fn key_set_spec(&self) -> &KeySetSpec {
        &self.key_set_spec
    }

    pub fn kdf(&self) -> &KdfParams {
        &self.kdf
    }

    pub fn validate(&self) -> Result<(), CryptoError> {
        self.key_set_spec.validate()?;
        self.kdf.validate()
    }
}

impl Default for PasswordLockSpec {
    fn default() -> Self {
        PasswordLockSpec {
            key_set_spec: KeySetSpec::default(),
            kdf: KdfParams::default(),
        }
    }
}

/// Digest algorithms available through a digest factory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DigestSpec {
    Blake2b256,
    Blake2b512,
    Sha256,
}

impl DigestSpec {
    /// Digest output length in bytes.
    pub fn digest_len(self) -> usize {
        match self {
            DigestSpec::Blake2b256 => 32,
            DigestSpec::Blake2b512 => 64,
            DigestSpec::Sha256 => 32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_length_codes_round_trip() {
        for len in [KeyLength::Len128, KeyLength::Len192, KeyLength::Len256] {
            assert_eq!(KeyLength::from_code(len.code()).unwrap(), len);
        }
        assert!(KeyLength::from_code(3).is_err());
    }

    #[test]
    fn algo_ids_round_trip() {
        for algo in SymKeyAlgo::ALL {
            assert_eq!(SymKeyAlgo::from_id(algo.id()).unwrap(), algo);
        }
        assert!(SymKeyAlgo::from_id(0).is_err());
        assert!(SymKeyAlgo::from_id(6).is_err());
    }

    #[test]
    fn availability() {
        assert_eq!(max_cipher_steps(KeyLength::Len128), 3);
        assert_eq!(max_cipher_steps(KeyLength::Len192), 3);
        assert_eq!(max_cipher_steps(KeyLength::Len256), 5);
        assert!(SymKeySpec::new(SymKeyAlgo::Twofish, KeyLength::Len128).is_err());
        assert!(SymKeySpec::new(SymKeyAlgo::Twofish, KeyLength::Len256).is_ok());
    }

    #[test]
    fn key_set_spec_bounds() {
        assert!(KeySetSpec::new(KeyLength::Len256, 0).is_err());
        assert!(KeySetSpec::new(KeyLength::Len256, 6).is_err());
        assert!(KeySetSpec::new(KeyLength::Len128, 4).is_err());
        assert!(KeySetSpec::new(KeyLength::Len128, 3).is_ok());
        let spec = KeySetSpec::new(KeyLength::Len256, 5).unwrap();
        assert!(spec.is_valid());
    }

    #[test]
    fn invalid_spec_error_describes_spec() {
        let err = KeySetSpec::new(KeyLength::Len192, 9).unwrap_err();
        let msg = format!("{}", err);
        assert!(msg.contains('9'));
        assert!(msg.contains("192"));
    }

    #[test]
    fn kdf_params() {
        assert!(KdfParams::new(0, 0, 0).is_err());
        assert!(KdfParams::new(8, 1, 1).is_ok());
        assert!(KdfParams::new(8, 1, 4).is_err());
        assert!(PasswordLockSpec::default().validate().is_ok());
    }
}
