//! Session ID generation and validation
//!
//! IDs are fixed-length strings over a small ASCII alphabet, drawn from the
//! operating system's secure random source. Validation is purely structural:
//! a valid ID is not necessarily known to any store.

use rand::rngs::OsRng;
use rand::TryRngCore;

use crate::error::SessionError;

/// Shortest ID accepted anywhere. The file store shards on the first two
/// characters and needs at least one more for the file name.
pub const MIN_ID_LENGTH: usize = 3;

/// Default ID length
pub const DEFAULT_ID_LENGTH: usize = 16;

const LOWERCASE: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const MIXED_CASE: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Character set used for session IDs
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Alphabet {
    /// `0-9a-z`
    #[default]
    Lowercase,
    /// `0-9a-zA-Z`
    MixedCase,
}

impl Alphabet {
    /// The characters of this alphabet
    pub fn chars(&self) -> &'static [u8] {
        match self {
            Alphabet::Lowercase => LOWERCASE,
            Alphabet::MixedCase => MIXED_CASE,
        }
    }

    /// Check whether a byte belongs to this alphabet
    pub fn contains(&self, b: u8) -> bool {
        match self {
            Alphabet::Lowercase => b.is_ascii_digit() || b.is_ascii_lowercase(),
            Alphabet::MixedCase => b.is_ascii_alphanumeric(),
        }
    }

    /// Detect the narrowest alphabet that covers every byte of `sid`
    pub(crate) fn of(sid: &str) -> Alphabet {
        if sid.bytes().any(|b| b.is_ascii_uppercase()) {
            Alphabet::MixedCase
        } else {
            Alphabet::Lowercase
        }
    }
}

/// Generate a random session ID of `len` characters.
///
/// Random bytes outside the largest multiple of the alphabet size are
/// rejected so that every character is equally likely.
pub fn generate(len: usize, alphabet: Alphabet) -> Result<String, SessionError> {
    let chars = alphabet.chars();
    let limit = 256 - (256 % chars.len());

    let mut out = String::with_capacity(len);
    let mut buf = [0u8; 32];
    while out.len() < len {
        OsRng
            .try_fill_bytes(&mut buf)
            .map_err(|e| SessionError::RandomSource(e.to_string()))?;

        for &b in buf.iter() {
            if (b as usize) >= limit {
                continue;
            }
            out.push(chars[b as usize % chars.len()] as char);
            if out.len() == len {
                break;
            }
        }
    }
    Ok(out)
}

/// Check that `sid` has exactly `len` characters, all from `alphabet`.
pub fn is_valid(sid: &str, len: usize, alphabet: Alphabet) -> bool {
    sid.len() == len && sid.bytes().all(|b| alphabet.contains(b))
}
