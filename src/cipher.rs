//! Primitive cipher and digest factories.
//!
//! The keyset engine never implements a block cipher or digest itself; it requests
//! primitives through the [`CipherFactory`] and [`DigestFactory`] traits. The standard
//! implementations here dispatch over [`SymKeyAlgo`](crate::spec::SymKeyAlgo) with an
//! exhaustive match onto the RustCrypto primitive crates.
//!
//! Cipher objects are cheap, hold only a copy of the key (zeroized on drop), and build a
//! fresh mode instance on every call, so they are safe to use from multiple threads.

use cipher::{
    block_padding::Pkcs7,
    consts::U16,
    generic_array::GenericArray,
    typenum::Unsigned,
    BlockCipher, BlockDecryptMut, BlockEncryptMut, BlockSizeUser, KeyInit, KeyIvInit,
    KeySizeUser, StreamCipher,
};
use digest::DynDigest;
use zeroize::Zeroize;

use crate::{
    error::CryptoError,
    keyset::SymKey,
    spec::{DigestSpec, KeyLength, SymKeyAlgo, SymKeySpec, BLOCK_LEN},
};

/// One primitive symmetric cipher bound to a key.
///
/// The three variants handed out by a [`CipherFactory`] share this interface:
/// padded-block ciphers change the buffer length (PKCS7), raw-block ciphers require a
/// block-aligned buffer, and stream ciphers accept any length.
pub trait SymCipher: Send + Sync {
    /// The algorithm/key-length pairing this cipher was built for.
    fn spec(&self) -> SymKeySpec;

    fn encrypt(&self, iv: &[u8], buf: &mut Vec<u8>) -> Result<(), CryptoError>;

    fn decrypt(&self, iv: &[u8], buf: &mut Vec<u8>) -> Result<(), CryptoError>;
}

/// Source of primitive symmetric ciphers. Consumed by the keyset engine; implement this
/// to plug in an alternate primitive provider (or a spy for tests).
pub trait CipherFactory: Send + Sync {
    /// Availability predicate for a cipher spec.
    fn supports_sym_key(&self, spec: SymKeySpec) -> bool;

    /// CBC with PKCS7 padding. Used for the first cascade stage.
    fn padded_cipher(&self, key: &SymKey) -> Result<Box<dyn SymCipher>, CryptoError>;

    /// CBC without padding. Input must be block-aligned; used for the later cascade
    /// stages.
    fn block_cipher(&self, key: &SymKey) -> Result<Box<dyn SymCipher>, CryptoError>;

    /// Counter-mode stream emulation. Length-preserving; used for the AEAD cascade.
    fn stream_cipher(&self, key: &SymKey) -> Result<Box<dyn SymCipher>, CryptoError>;
}

/// Source of primitive digests.
pub trait DigestFactory: Send + Sync {
    fn supports_digest(&self, spec: DigestSpec) -> bool;

    fn create_digest(&self, spec: DigestSpec) -> Result<Box<dyn DynDigest>, CryptoError>;
}

/// The three cipher variants derived from a single key.
///
/// Construction is atomic: if the factory cannot satisfy the key's spec, no variant is
/// handed out. All three are initialized from the same key.
pub struct SymKeyCipherSet {
    spec: SymKeySpec,
    padded: Box<dyn SymCipher>,
    block: Box<dyn SymCipher>,
    stream: Box<dyn SymCipher>,
}

impl SymKeyCipherSet {
    pub fn new(factory: &dyn CipherFactory, key: &SymKey) -> Result<Self, CryptoError> {
        let padded = factory.padded_cipher(key)?;
        let block = factory.block_cipher(key)?;
        let stream = factory.stream_cipher(key)?;
        Ok(SymKeyCipherSet {
            spec: key.spec(),
            padded,
            block,
            stream,
        })
    }

    pub fn spec(&self) -> SymKeySpec {
        self.spec
    }

    pub fn padded(&self) -> &dyn SymCipher {
        self.padded.as_ref()
    }

    pub fn block(&self) -> &dyn SymCipher {
        self.block.as_ref()
    }

    pub fn stream(&self) -> &dyn SymCipher {
        self.stream.as_ref()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Variant {
    Padded,
    Block,
    Stream,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Encrypt,
    Decrypt,
}

/// Standard cipher factory backed by the RustCrypto primitive crates.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdCipherFactory;

impl StdCipherFactory {
    fn build(&self, key: &SymKey, variant: Variant) -> Result<Box<dyn SymCipher>, CryptoError> {
        let spec = key.spec();
        if !self.supports_sym_key(spec) {
            return Err(CryptoError::UnsupportedAlgorithm(spec));
        }
        Ok(Box::new(StdSymCipher {
            spec,
            variant,
            key: key.as_bytes().to_vec(),
        }))
    }
}

impl CipherFactory for StdCipherFactory {
    fn supports_sym_key(&self, spec: SymKeySpec) -> bool {
        spec.is_valid()
    }

    fn padded_cipher(&self, key: &SymKey) -> Result<Box<dyn SymCipher>, CryptoError> {
        self.build(key, Variant::Padded)
    }

    fn block_cipher(&self, key: &SymKey) -> Result<Box<dyn SymCipher>, CryptoError> {
        self.build(key, Variant::Block)
    }

    fn stream_cipher(&self, key: &SymKey) -> Result<Box<dyn SymCipher>, CryptoError> {
        self.build(key, Variant::Stream)
    }
}

struct StdSymCipher {
    spec: SymKeySpec,
    variant: Variant,
    key: Vec<u8>,
}

impl Drop for StdSymCipher {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl SymCipher for StdSymCipher {
    fn spec(&self) -> SymKeySpec {
        self.spec
    }

    fn encrypt(&self, iv: &[u8], buf: &mut Vec<u8>) -> Result<(), CryptoError> {
        run_cipher(
            self.spec,
            self.variant,
            Direction::Encrypt,
            &self.key,
            iv,
            buf,
        )
    }

    fn decrypt(&self, iv: &[u8], buf: &mut Vec<u8>) -> Result<(), CryptoError> {
        run_cipher(
            self.spec,
            self.variant,
            Direction::Decrypt,
            &self.key,
            iv,
            buf,
        )
    }
}

fn run_cipher(
    spec: SymKeySpec,
    variant: Variant,
    dir: Direction,
    key: &[u8],
    iv: &[u8],
    buf: &mut Vec<u8>,
) -> Result<(), CryptoError> {
    use KeyLength::*;
    use SymKeyAlgo::*;
    match (spec.algo, spec.key_length) {
        (Aes, Len128) => run::<aes::Aes128>(variant, dir, key, iv, buf),
        (Aes, Len192) => run::<aes::Aes192>(variant, dir, key, iv, buf),
        (Aes, Len256) => run::<aes::Aes256>(variant, dir, key, iv, buf),
        (Camellia, Len128) => run::<camellia::Camellia128>(variant, dir, key, iv, buf),
        (Camellia, Len192) => run::<camellia::Camellia192>(variant, dir, key, iv, buf),
        (Camellia, Len256) => run::<camellia::Camellia256>(variant, dir, key, iv, buf),
        (Aria, Len128) => run::<aria::Aria128>(variant, dir, key, iv, buf),
        (Aria, Len192) => run::<aria::Aria192>(variant, dir, key, iv, buf),
        (Aria, Len256) => run::<aria::Aria256>(variant, dir, key, iv, buf),
        (Twofish, Len256) => run::<twofish::Twofish>(variant, dir, key, iv, buf),
        (Kuznyechik, Len256) => run::<kuznyechik::Kuznyechik>(variant, dir, key, iv, buf),
        _ => Err(CryptoError::UnsupportedAlgorithm(spec)),
    }
}

fn run<C>(
    variant: Variant,
    dir: Direction,
    key: &[u8],
    iv: &[u8],
    buf: &mut Vec<u8>,
) -> Result<(), CryptoError>
where
    C: BlockCipher
        + BlockEncryptMut
        + BlockDecryptMut
        + KeyInit
        + BlockSizeUser<BlockSize = U16>,
{
    match (variant, dir) {
        (Variant::Padded, Direction::Encrypt) => {
            let enc = init_enc::<C>(key, iv)?;
            let out = enc.encrypt_padded_vec_mut::<Pkcs7>(buf);
            // The old buffer still holds plaintext.
            buf.zeroize();
            *buf = out;
            Ok(())
        }
        (Variant::Padded, Direction::Decrypt) => {
            let dec = init_dec::<C>(key, iv)?;
            let out = dec
                .decrypt_padded_vec_mut::<Pkcs7>(buf)
                .map_err(|_| CryptoError::DecryptFailed)?;
            *buf = out;
            Ok(())
        }
        (Variant::Block, Direction::Encrypt) => {
            check_aligned::<C>(buf)?;
            let mut enc = init_enc::<C>(key, iv)?;
            for block in buf.chunks_exact_mut(BLOCK_LEN) {
                enc.encrypt_block_mut(GenericArray::from_mut_slice(block));
            }
            Ok(())
        }
        (Variant::Block, Direction::Decrypt) => {
            check_aligned::<C>(buf)?;
            let mut dec = init_dec::<C>(key, iv)?;
            for block in buf.chunks_exact_mut(BLOCK_LEN) {
                dec.decrypt_block_mut(GenericArray::from_mut_slice(block));
            }
            Ok(())
        }
        // CTR encryption and decryption are the same keystream application.
        (Variant::Stream, _) => {
            let mut ctr = ctr::Ctr128BE::<C>::new_from_slices(key, iv)
                .map_err(|_| init_err::<C>(key))?;
            ctr.apply_keystream(buf);
            Ok(())
        }
    }
}

fn init_enc<C>(key: &[u8], iv: &[u8]) -> Result<cbc::Encryptor<C>, CryptoError>
where
    C: BlockCipher + BlockEncryptMut + KeyInit,
{
    cbc::Encryptor::<C>::new_from_slices(key, iv).map_err(|_| init_err::<C>(key))
}

fn init_dec<C>(key: &[u8], iv: &[u8]) -> Result<cbc::Decryptor<C>, CryptoError>
where
    C: BlockCipher + BlockDecryptMut + KeyInit,
{
    cbc::Decryptor::<C>::new_from_slices(key, iv).map_err(|_| init_err::<C>(key))
}

fn init_err<C: KeySizeUser>(key: &[u8]) -> CryptoError {
    CryptoError::BadLength {
        step: "initialize cipher key and iv",
        expected: C::KeySize::USIZE,
        actual: key.len(),
    }
}

fn check_aligned<C: BlockSizeUser>(buf: &[u8]) -> Result<(), CryptoError> {
    let bs = C::BlockSize::USIZE;
    if buf.is_empty() || buf.len() % bs != 0 {
        return Err(CryptoError::BadLength {
            step: "apply raw block cipher",
            expected: bs,
            actual: buf.len(),
        });
    }
    Ok(())
}

/// Standard digest factory backed by `blake2` and `sha2`.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdDigestFactory;

impl DigestFactory for StdDigestFactory {
    fn supports_digest(&self, _spec: DigestSpec) -> bool {
        true
    }

    fn create_digest(&self, spec: DigestSpec) -> Result<Box<dyn DynDigest>, CryptoError> {
        use cipher::consts::U32;
        Ok(match spec {
            DigestSpec::Blake2b256 => Box::new(blake2::Blake2b::<U32>::default()),
            DigestSpec::Blake2b512 => Box::new(blake2::Blake2b512::default()),
            DigestSpec::Sha256 => Box::new(sha2::Sha256::default()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::available_sym_key_specs;
    use rand::rngs::OsRng;

    fn cipher_set(spec: SymKeySpec) -> (SymKey, SymKeyCipherSet) {
        let mut csprng = OsRng;
        let key = SymKey::generate(&mut csprng, spec);
        let set = SymKeyCipherSet::new(&StdCipherFactory, &key).unwrap();
        (key, set)
    }

    #[test]
    fn padded_round_trip_every_spec() {
        for len in [KeyLength::Len128, KeyLength::Len192, KeyLength::Len256] {
            for spec in available_sym_key_specs(len) {
                let (_key, set) = cipher_set(spec);
                let iv = [7u8; BLOCK_LEN];
                let mut buf = b"cascade".to_vec();
                set.padded().encrypt(&iv, &mut buf).unwrap();
                assert_eq!(buf.len(), BLOCK_LEN);
                set.padded().decrypt(&iv, &mut buf).unwrap();
                assert_eq!(buf, b"cascade");
            }
        }
    }

    #[test]
    fn block_requires_alignment() {
        let spec = SymKeySpec::new(SymKeyAlgo::Aes, KeyLength::Len256).unwrap();
        let (_key, set) = cipher_set(spec);
        let iv = [0u8; BLOCK_LEN];
        let mut buf = vec![1u8; 15];
        assert!(set.block().encrypt(&iv, &mut buf).is_err());
        let mut buf = vec![1u8; 32];
        let orig = buf.clone();
        set.block().encrypt(&iv, &mut buf).unwrap();
        assert_ne!(buf, orig);
        set.block().decrypt(&iv, &mut buf).unwrap();
        assert_eq!(buf, orig);
    }

    #[test]
    fn stream_is_length_preserving() {
        let spec = SymKeySpec::new(SymKeyAlgo::Kuznyechik, KeyLength::Len256).unwrap();
        let (_key, set) = cipher_set(spec);
        let iv = [3u8; BLOCK_LEN];
        let mut buf = vec![9u8; 23];
        set.stream().encrypt(&iv, &mut buf).unwrap();
        assert_eq!(buf.len(), 23);
        set.stream().decrypt(&iv, &mut buf).unwrap();
        assert_eq!(buf, vec![9u8; 23]);
    }

    #[test]
    fn digest_factory_outputs() {
        let f = StdDigestFactory;
        for spec in [
            DigestSpec::Blake2b256,
            DigestSpec::Blake2b512,
            DigestSpec::Sha256,
        ] {
            let mut d = f.create_digest(spec).unwrap();
            d.update(b"abc");
            let out = d.finalize_reset();
            assert_eq!(out.len(), spec.digest_len());
        }
    }
}
