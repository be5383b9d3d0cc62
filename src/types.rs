use std::{
    fs,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use uuid::Uuid;

use crate::{
    error::PackagingError,
    obfuscation::{KeySource, ObfuscationAlgorithm},
    utils::{archive_path, remove_leading_slash},
};

/// Represents a regular file located under a publication root
///
/// Resource files are produced when traversing the staged publication and
/// are never modified by the archive writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceFile {
    /// Absolute path of the file on disk
    pub path: PathBuf,

    /// Path relative to the publication root
    ///
    /// Uses forward slashes and never starts with a separator; this is the
    /// name of the file's entry in the EPUB container.
    pub relative_path: String,

    /// Size of the file in bytes
    pub size: u64,
}

impl ResourceFile {
    /// Creates a resource file from a path located under `root`
    ///
    /// # Return
    /// - `Ok(ResourceFile)`: The file exists under `root`
    /// - `Err(PackagingError)`: The path is outside `root`, or its metadata is unreadable
    pub fn new<R: AsRef<Path>, P: AsRef<Path>>(root: R, path: P) -> Result<Self, PackagingError> {
        let (root, path) = (root.as_ref(), path.as_ref());
        let relative_path = match path.strip_prefix(root) {
            Ok(relative) => archive_path(relative),
            Err(_) => {
                return Err(PackagingError::precondition(format!(
                    "\"{}\" is not located under \"{}\".",
                    path.display(),
                    root.display()
                )));
            }
        };

        let size = fs::metadata(path)
            .map_err(|err| PackagingError::open(relative_path.as_str(), err))?
            .len();

        Ok(ResourceFile {
            path: path.to_path_buf(),
            relative_path,
            size,
        })
    }
}

/// Represents an embedded font of the publication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontResource {
    /// Path of the font relative to the publication root
    pub relative_path: String,

    /// Obfuscation applied to the font, `None` if the font is stored as is
    pub algorithm: Option<ObfuscationAlgorithm>,
}

impl FontResource {
    pub fn new(relative_path: &str, algorithm: Option<ObfuscationAlgorithm>) -> Self {
        FontResource {
            relative_path: remove_leading_slash(relative_path),
            algorithm,
        }
    }

    /// Creates a font resource from an algorithm URI
    ///
    /// An empty URI means the font is not obfuscated.
    pub fn with_algorithm_uri(relative_path: &str, uri: &str) -> Result<Self, PackagingError> {
        Ok(Self::new(relative_path, ObfuscationAlgorithm::from_uri(uri)?))
    }

    pub fn is_obfuscated(&self) -> bool {
        self.algorithm.is_some()
    }
}

/// The identifiers of a publication used as obfuscation keys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublicationIdentifiers {
    /// UUID-form unique identifier, e.g. `urn:uuid:...`
    pub uuid: Option<String>,

    /// General publication identifier
    pub publication_id: Option<String>,
}

impl PublicationIdentifiers {
    /// Selects the identifier the given algorithm is keyed with
    ///
    /// # Return
    /// - `Ok(&str)`: The identifier required by `algorithm`
    /// - `Err(PackagingError)`: That identifier is missing or blank
    pub fn key_for(&self, algorithm: ObfuscationAlgorithm) -> Result<&str, PackagingError> {
        let (identifier, name) = match algorithm.key_source() {
            KeySource::UuidIdentifier => (&self.uuid, "UUID identifier"),
            KeySource::PublicationIdentifier => (&self.publication_id, "publication identifier"),
        };

        match identifier.as_deref() {
            Some(value) if !value.trim().is_empty() => Ok(value),
            _ => Err(PackagingError::precondition(format!(
                "The {name} is required to obfuscate fonts with the {algorithm} algorithm."
            ))),
        }
    }

    /// Makes sure a UUID identifier is present
    ///
    /// A random `urn:uuid:` identifier is generated when the current one is
    /// missing or blank. Returns the identifier in effect.
    pub fn ensure_uuid(&mut self) -> &str {
        let missing = self
            .uuid
            .as_deref()
            .is_none_or(|value| value.trim().is_empty());
        if missing {
            self.uuid = Some(format!("urn:uuid:{}", Uuid::new_v4()));
        }

        self.uuid.as_deref().unwrap_or_default()
    }
}

/// An immutable view of everything an export needs from the book
///
/// The resource folder must already contain every materialized file of the
/// publication (OPF, NCX, XHTML, fonts, `META-INF/container.xml`, ...).
#[derive(Debug, Clone)]
pub struct PublicationSnapshot {
    /// Folder holding the publication's files
    pub main_folder: PathBuf,

    /// Font resources, keyed by their relative path
    pub fonts: IndexMap<String, FontResource>,

    pub identifiers: PublicationIdentifiers,

    /// Caller-provided `encryption.xml` content
    ///
    /// When `None` and fonts are obfuscated, the default manifest is generated.
    pub encryption_manifest: Option<Vec<u8>>,
}

impl PublicationSnapshot {
    pub fn new<P: AsRef<Path>>(main_folder: P) -> Self {
        PublicationSnapshot {
            main_folder: main_folder.as_ref().to_path_buf(),
            fonts: IndexMap::new(),
            identifiers: PublicationIdentifiers::default(),
            encryption_manifest: None,
        }
    }

    /// Adds a font, replacing any font previously registered at the same path
    pub fn add_font(&mut self, font: FontResource) -> &mut Self {
        self.fonts.insert(font.relative_path.clone(), font);
        self
    }

    pub fn has_obfuscated_fonts(&self) -> bool {
        self.fonts.values().any(FontResource::is_obfuscated)
    }

    pub fn obfuscated_fonts(&self) -> impl Iterator<Item = &FontResource> {
        self.fonts.values().filter(|font| font.is_obfuscated())
    }
}
