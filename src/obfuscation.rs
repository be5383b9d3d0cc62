//! Font Obfuscation
//!
//! Embedded fonts may be obfuscated so that they cannot be trivially
//! extracted from an EPUB container and reused. Both supported algorithms
//! XOR a fixed-size prefix of the font file with a key derived from one of
//! the publication identifiers. Because `A ^ K ^ K == A`, the transform is
//! its own inverse; reading systems undo it by applying it again.
//!
//! | Algorithm | URI                                  | Prefix | Key                           |
//! |-----------|--------------------------------------|--------|-------------------------------|
//! | IDPF      | `http://www.idpf.org/2008/embedding` | 1040   | SHA-1 of the publication id   |
//! | Adobe     | `http://ns.adobe.com/pdf/enc#RC`     | 1024   | raw bytes of the UUID         |

use std::{
    cmp::min,
    fmt,
    fs::OpenOptions,
    io::{Read, Seek, SeekFrom, Write},
    path::Path,
};

use log::debug;
use sha1::{Digest, Sha1};

use crate::error::PackagingError;

/// Identifier a font obfuscation key is derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    /// The UUID-form unique identifier, e.g. `urn:uuid:...`
    UuidIdentifier,

    /// The general publication identifier
    PublicationIdentifier,
}

/// Supported font obfuscation algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObfuscationAlgorithm {
    /// IDPF font obfuscation (`http://www.idpf.org/2008/embedding`)
    Idpf,

    /// Adobe font obfuscation (`http://ns.adobe.com/pdf/enc#RC`)
    Adobe,
}

impl ObfuscationAlgorithm {
    pub const IDPF_URI: &'static str = "http://www.idpf.org/2008/embedding";
    pub const ADOBE_URI: &'static str = "http://ns.adobe.com/pdf/enc#RC";

    /// Parses an algorithm from the URI used in `encryption.xml`
    ///
    /// # Return
    /// - `Ok(None)`: The tag is empty, the font is not obfuscated
    /// - `Ok(Some(algorithm))`: A supported algorithm
    /// - `Err(PackagingError)`: The URI names an unsupported algorithm
    pub fn from_uri(uri: &str) -> Result<Option<Self>, PackagingError> {
        match uri.trim() {
            "" => Ok(None),
            Self::IDPF_URI => Ok(Some(Self::Idpf)),
            Self::ADOBE_URI => Ok(Some(Self::Adobe)),
            other => Err(PackagingError::precondition(format!(
                "The \"{other}\" font obfuscation algorithm is not supported."
            ))),
        }
    }

    pub fn uri(&self) -> &'static str {
        match self {
            Self::Idpf => Self::IDPF_URI,
            Self::Adobe => Self::ADOBE_URI,
        }
    }

    /// Number of leading bytes of the font file that get obfuscated
    pub fn prefix_len(&self) -> usize {
        match self {
            Self::Idpf => 1040,
            Self::Adobe => 1024,
        }
    }

    /// Which publication identifier the key must be derived from
    ///
    /// Deriving the key from the other identifier produces a font that a
    /// compliant reading system cannot restore.
    pub fn key_source(&self) -> KeySource {
        match self {
            Self::Idpf => KeySource::PublicationIdentifier,
            Self::Adobe => KeySource::UuidIdentifier,
        }
    }

    /// Derives the XOR key from an identifier
    ///
    /// - IDPF: SHA-1 digest of the identifier with all XML whitespace removed.
    /// - Adobe: the hex digits of the UUID (without `urn:uuid:`, `-` and `:`)
    ///   decoded to bytes.
    ///
    /// # Return
    /// - `Ok(Vec<u8>)`: A non-empty key
    /// - `Err(PackagingError)`: The identifier yields no usable key
    pub fn derive_key(&self, identifier: &str) -> Result<Vec<u8>, PackagingError> {
        let key = match self {
            Self::Idpf => {
                let cleaned = identifier
                    .chars()
                    .filter(|c| !matches!(c, ' ' | '\t' | '\r' | '\n'))
                    .collect::<String>();
                if cleaned.is_empty() {
                    Vec::new()
                } else {
                    let mut hasher = Sha1::new();
                    hasher.update(cleaned.as_bytes());
                    hasher.finalize().to_vec()
                }
            }
            Self::Adobe => {
                let trimmed = identifier.trim();
                let trimmed = trimmed.strip_prefix("urn:uuid:").unwrap_or(trimmed);
                let digits = trimmed
                    .chars()
                    .filter(|c| !matches!(c, '-' | ':'))
                    .collect::<String>();

                hex::decode(&digits).map_err(|err| {
                    PackagingError::precondition(format!(
                        "The identifier \"{identifier}\" is not a valid UUID: {err}"
                    ))
                })?
            }
        };

        if key.is_empty() {
            return Err(PackagingError::precondition(format!(
                "An empty identifier cannot be used as the {self} obfuscation key."
            )));
        }

        Ok(key)
    }
}

impl fmt::Display for ObfuscationAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idpf => write!(f, "IDPF"),
            Self::Adobe => write!(f, "Adobe"),
        }
    }
}

/// XORs the algorithm's prefix of `data` with the repeating `key`
///
/// Only the first `prefix_len` bytes are processed; the rest of the data
/// remains unchanged. An empty key leaves the data untouched.
pub fn obfuscate(data: &mut [u8], algorithm: ObfuscationAlgorithm, key: &[u8]) {
    if key.is_empty() {
        return;
    }

    let end = min(algorithm.prefix_len(), data.len());
    for (index, byte) in data[..end].iter_mut().enumerate() {
        *byte ^= key[index % key.len()];
    }
}

/// Obfuscates a font file in place
///
/// The prefix is read, transformed, and written back at the start of the
/// same file; bytes beyond the prefix are never read or rewritten.
///
/// # Parameters
/// - `path`: Font file to transform
/// - `algorithm`: Obfuscation algorithm
/// - `identifier`: The identifier selected by [ObfuscationAlgorithm::key_source]
pub fn obfuscate_font<P: AsRef<Path>>(
    path: P,
    algorithm: ObfuscationAlgorithm,
    identifier: &str,
) -> Result<(), PackagingError> {
    let path = path.as_ref();
    let display_path = path.to_string_lossy().to_string();
    let key = algorithm.derive_key(identifier)?;

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|err| PackagingError::open(display_path.as_str(), err))?;

    let mut prefix = Vec::with_capacity(algorithm.prefix_len());
    (&mut file)
        .take(algorithm.prefix_len() as u64)
        .read_to_end(&mut prefix)
        .map_err(|err| PackagingError::store(display_path.as_str(), err))?;

    obfuscate(&mut prefix, algorithm, &key);

    file.seek(SeekFrom::Start(0))
        .and_then(|_| file.write_all(&prefix))
        .and_then(|_| file.flush())
        .map_err(|err| PackagingError::store(display_path.as_str(), err))?;

    debug!(
        "obfuscated {} bytes of \"{}\" with the {} algorithm",
        prefix.len(),
        display_path,
        algorithm
    );

    Ok(())
}
