use std::error::Error;
use std::fmt;

use crate::spec::{DigestSpec, SymKeySpec};

/// Possible error conditions for the keyset engine.
#[derive(Debug)]
pub enum CryptoError {
    /// A `KeySetSpec` or `PasswordLockSpec` failed validation. Carries a description of
    /// the offending spec. Raised before any key material is allocated.
    InvalidSpec(String),
    /// The cipher factory cannot satisfy the requested spec.
    UnsupportedAlgorithm(SymKeySpec),
    /// The digest factory cannot satisfy the requested spec.
    UnsupportedDigest(DigestSpec),
    /// Encoded data uses a format version this library doesn't recognize.
    UnsupportedVersion(u8),
    /// The provided data for encode/decode wasn't the correct length.
    BadLength {
        step: &'static str,
        expected: usize,
        actual: usize,
    },
    /// The data format doesn't match the documented encoding.
    BadFormat(&'static str),
    /// Decryption failed. Deliberately covers authentication failure, bad padding, and
    /// wrong passwords alike, so callers cannot build a decryption oracle from the error.
    DecryptFailed,
    /// A recovered key, key pair, or keyset doesn't match the spec the caller expected.
    /// Indicates a logic or versioning error rather than tampering.
    TypeMismatch(&'static str),
    /// An operation was attempted in a state that doesn't allow it, such as encrypting
    /// with a partially-populated keyset or re-using a fresh lock.
    BadState(&'static str),
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use CryptoError::*;
        match self {
            InvalidSpec(desc) => write!(f, "Invalid spec: {}", desc),
            UnsupportedAlgorithm(spec) => {
                write!(f, "Cipher factory cannot provide {}", spec)
            }
            UnsupportedDigest(spec) => {
                write!(f, "Digest factory cannot provide {:?}", spec)
            }
            UnsupportedVersion(v) => write!(f, "Format version {} not supported", v),
            BadLength {
                step,
                expected,
                actual,
            } => write!(
                f,
                "Bad length during \"{}\": expected {}, got {}",
                step, expected, actual
            ),
            BadFormat(s) => write!(f, "Format of data does not match specification: {}", s),
            DecryptFailed => write!(f, "Could not decrypt with provided key material"),
            TypeMismatch(s) => write!(f, "Recovered object has unexpected spec: {}", s),
            BadState(s) => write!(f, "Operation not allowed in current state: {}", s),
        }
    }
}

impl Error for CryptoError {}
