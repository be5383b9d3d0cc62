//! Epub Export
//!
//! This module drives the packaging of a publication. Starting from an
//! immutable [PublicationSnapshot], an export runs the following steps and
//! stops at the first failure:
//!
//! 1. Resolve the obfuscation key of every obfuscated font.
//! 2. Copy the resource folder into a fresh staging folder.
//! 3. Obfuscate fonts inside the staging folder and write
//!    `META-INF/encryption.xml` (only when a font is obfuscated).
//! 4. Pack the staging folder into the destination EPUB file.
//!
//! ## Usage
//!
//! ```rust, no_run
//! # fn main() -> Result<(), epub_export::error::PackagingError> {
//! use epub_export::{
//!     export::EpubExporter, obfuscation::ObfuscationAlgorithm, types::FontResource,
//! };
//!
//! let mut exporter = EpubExporter::new("path/to/book/folder");
//! exporter
//!     .set_publication_identifier("urn:isbn:9780000000001")
//!     .add_font(FontResource::new(
//!         "OEBPS/Fonts/serif.ttf",
//!         Some(ObfuscationAlgorithm::Idpf),
//!     ));
//!
//! exporter.export("output.epub")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Notes
//!
//! - The resource folder itself is never modified; fonts are obfuscated in
//!   the staged copy.
//! - The staging folder is removed when the export returns, whatever the outcome.
//! - On failure no archive is left at the destination path.

use std::{
    env, fs, io,
    path::{Path, PathBuf},
};

use log::{debug, info, warn};

use crate::{
    archive::write_archive,
    encryption::{ENCRYPTION_XML_PATH, encryption_xml},
    error::PackagingError,
    obfuscation::{ObfuscationAlgorithm, obfuscate_font},
    types::{FontResource, PublicationSnapshot},
    utils::{copy_folder, is_contained, staging_folder_name},
};

/// Scratch directory of a single export
///
/// The directory is created fresh under the system temporary directory and
/// removed, with everything inside it, when the value is dropped.
#[derive(Debug)]
pub struct StagingFolder {
    path: PathBuf,
}

impl StagingFolder {
    pub fn new() -> Result<Self, PackagingError> {
        let path = env::temp_dir().join(staging_folder_name());
        fs::create_dir(&path)
            .map_err(|err| PackagingError::open(path.to_string_lossy().to_string(), err))?;

        debug!("created staging folder \"{}\"", path.display());
        Ok(StagingFolder { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagingFolder {
    /// Remove staging directory when dropped
    fn drop(&mut self) {
        if let Err(err) = fs::remove_dir_all(&self.path) {
            warn!("{}", err);
        };
    }
}

/// A font scheduled for obfuscation together with its key identifier
struct ObfuscationTask<'a> {
    font: &'a FontResource,
    algorithm: ObfuscationAlgorithm,
    identifier: &'a str,
}

/// Exports a publication snapshot as an EPUB file
///
/// # Parameters
/// - `snapshot`: Everything the export needs from the book
/// - `dest_file`: Path of the EPUB file to create; its parent must exist
///
/// # Return
/// - `Ok(())`: A complete EPUB container exists at `dest_file`
/// - `Err(PackagingError)`: Export aborted, `dest_file` holds no archive from this call
pub fn export<P: AsRef<Path>>(
    snapshot: &PublicationSnapshot,
    dest_file: P,
) -> Result<(), PackagingError> {
    let dest_file = dest_file.as_ref();
    info!(
        "exporting \"{}\" to \"{}\"",
        snapshot.main_folder.display(),
        dest_file.display()
    );

    let tasks = prepare(snapshot)?;

    let staging = StagingFolder::new()?;
    stage(snapshot, staging.path())?;

    if !tasks.is_empty() {
        obfuscate_fonts(&tasks, staging.path())?;
        make_encryption_xml(snapshot, staging.path())?;
    }

    write_archive(staging.path(), dest_file)?;

    info!("exported \"{}\"", dest_file.display());
    Ok(())
}

/// Resolves the key identifier of every obfuscated font
///
/// Runs before anything touches the file system, so a missing identifier
/// aborts the export without side effects.
fn prepare(snapshot: &PublicationSnapshot) -> Result<Vec<ObfuscationTask<'_>>, PackagingError> {
    let mut tasks = Vec::new();

    for font in snapshot.fonts.values() {
        let Some(algorithm) = font.algorithm else {
            continue;
        };

        if !is_contained(&font.relative_path) {
            return Err(PackagingError::precondition(format!(
                "Font path \"{}\" is out of the publication folder.",
                font.relative_path
            )));
        }

        let identifier = snapshot.identifiers.key_for(algorithm)?;
        tasks.push(ObfuscationTask {
            font,
            algorithm,
            identifier,
        });
    }

    Ok(tasks)
}

fn stage(snapshot: &PublicationSnapshot, staging: &Path) -> Result<(), PackagingError> {
    if !snapshot.main_folder.is_dir() {
        return Err(PackagingError::open(
            snapshot.main_folder.to_string_lossy().to_string(),
            io::Error::new(io::ErrorKind::NotFound, "resource folder does not exist"),
        ));
    }

    copy_folder(&snapshot.main_folder, staging)
}

fn obfuscate_fonts(tasks: &[ObfuscationTask<'_>], staging: &Path) -> Result<(), PackagingError> {
    for task in tasks {
        let path = staging.join(&task.font.relative_path);
        obfuscate_font(&path, task.algorithm, task.identifier)
            .map_err(|err| err.with_path(task.font.relative_path.as_str()))?;
    }

    Ok(())
}

/// Writes `META-INF/encryption.xml` into the staging folder
///
/// Caller-provided manifest bytes are written as is; otherwise the manifest
/// is generated from the obfuscated fonts.
fn make_encryption_xml(
    snapshot: &PublicationSnapshot,
    staging: &Path,
) -> Result<(), PackagingError> {
    let data = match &snapshot.encryption_manifest {
        Some(data) => data.clone(),
        None => encryption_xml(snapshot.obfuscated_fonts())?,
    };

    let file_path = staging.join(ENCRYPTION_XML_PATH);
    if let Some(parent_dir) = file_path.parent() {
        fs::create_dir_all(parent_dir)
            .map_err(|err| PackagingError::open(ENCRYPTION_XML_PATH, err))?;
    }

    fs::write(file_path, data).map_err(|err| PackagingError::open(ENCRYPTION_XML_PATH, err))
}

/// EPUB Exporter
///
/// Collects the data of a publication and exports it as an EPUB file.
#[derive(Debug, Clone)]
pub struct EpubExporter {
    snapshot: PublicationSnapshot,
}

impl EpubExporter {
    /// Create a new `EpubExporter` for a folder of materialized resources
    pub fn new<P: AsRef<Path>>(main_folder: P) -> Self {
        EpubExporter {
            snapshot: PublicationSnapshot::new(main_folder),
        }
    }

    /// Add a font resource
    ///
    /// A font registered earlier at the same relative path is replaced.
    pub fn add_font(&mut self, font: FontResource) -> &mut Self {
        self.snapshot.add_font(font);
        self
    }

    /// Set the UUID-form unique identifier, used by Adobe obfuscation
    pub fn set_uuid_identifier(&mut self, uuid: &str) -> &mut Self {
        self.snapshot.identifiers.uuid = Some(uuid.to_string());
        self
    }

    /// Set the publication identifier, used by IDPF obfuscation
    pub fn set_publication_identifier(&mut self, identifier: &str) -> &mut Self {
        self.snapshot.identifiers.publication_id = Some(identifier.to_string());
        self
    }

    /// Generate a UUID identifier unless one is already set
    ///
    /// Returns the UUID identifier in effect. The caller is responsible for
    /// writing it into the package document it materializes.
    pub fn ensure_uuid_identifier(&mut self) -> &str {
        self.snapshot.identifiers.ensure_uuid()
    }

    /// Set the `encryption.xml` content to package instead of the generated one
    pub fn set_encryption_manifest(&mut self, data: Vec<u8>) -> &mut Self {
        self.snapshot.encryption_manifest = Some(data);
        self
    }

    pub fn snapshot(&self) -> &PublicationSnapshot {
        &self.snapshot
    }

    /// Exports the publication to `dest_file`
    ///
    /// See [export].
    pub fn export<P: AsRef<Path>>(&self, dest_file: P) -> Result<(), PackagingError> {
        export(&self.snapshot, dest_file)
    }
}

impl From<PublicationSnapshot> for EpubExporter {
    fn from(snapshot: PublicationSnapshot) -> Self {
        EpubExporter { snapshot }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        env, fs,
        fs::File,
        io::Read,
        path::{Path, PathBuf},
    };

    use zip::ZipArchive;

    use crate::{
        error::PackagingError,
        export::{EpubExporter, StagingFolder, export},
        obfuscation::{ObfuscationAlgorithm, obfuscate},
        types::{FontResource, PublicationSnapshot},
        utils::staging_folder_name,
    };

    const UUID: &str = "urn:uuid:ABCDEF";
    const PUB_ID: &str = "urn:isbn:9780000000001";

    fn make_book(files: &[(&str, Vec<u8>)]) -> PathBuf {
        let root = env::temp_dir().join(staging_folder_name());
        fs::create_dir_all(&root).unwrap();

        for (path, data) in files {
            let path = root.join(path);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, data).unwrap();
        }

        root
    }

    fn font_data(len: usize) -> Vec<u8> {
        (0..len).map(|index| (index % 253) as u8).collect()
    }

    fn read_entries(path: &Path) -> Vec<(String, Vec<u8>)> {
        let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
        (0..archive.len())
            .map(|index| {
                let mut file = archive.by_index(index).unwrap();
                let mut data = Vec::new();
                file.read_to_end(&mut data).unwrap();
                (file.name().to_string(), data)
            })
            .collect()
    }

    fn entry<'a>(entries: &'a [(String, Vec<u8>)], name: &str) -> Option<&'a Vec<u8>> {
        entries
            .iter()
            .find(|(entry_name, _)| entry_name == name)
            .map(|(_, data)| data)
    }

    #[test]
    fn test_staging_folder_is_removed_on_drop() {
        let staging = StagingFolder::new().unwrap();
        let path = staging.path().to_path_buf();
        fs::create_dir_all(path.join("OEBPS")).unwrap();
        fs::write(path.join("OEBPS/content.opf"), "<package/>").unwrap();
        assert!(path.is_dir());

        drop(staging);
        assert!(!path.exists());
    }

    #[test]
    fn test_export_without_fonts() {
        let opf = vec![b'o'; 42];
        let chapter = vec![b'c'; 900];
        let book = make_book(&[
            ("content.opf", opf.clone()),
            ("Text/chapter1.xhtml", chapter.clone()),
        ]);
        let output = env::temp_dir().join(format!("{}.epub", staging_folder_name()));

        let result = EpubExporter::new(&book).export(&output);
        assert!(result.is_ok());

        let entries = read_entries(&output);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].0, "mimetype");
        assert_eq!(entry(&entries, "content.opf"), Some(&opf));
        assert_eq!(entry(&entries, "Text/chapter1.xhtml"), Some(&chapter));
        assert!(entry(&entries, "META-INF/encryption.xml").is_none());

        fs::remove_dir_all(book).unwrap();
        fs::remove_file(output).unwrap();
    }

    #[test]
    fn test_export_with_obfuscated_fonts() {
        let original = font_data(2000);
        let book = make_book(&[
            ("META-INF/container.xml", b"<container/>".to_vec()),
            ("OEBPS/content.opf", b"<package/>".to_vec()),
            ("OEBPS/Fonts/adobe.otf", original.clone()),
            ("OEBPS/Fonts/idpf.ttf", original.clone()),
            ("OEBPS/Fonts/plain.ttf", original.clone()),
        ]);
        let output = env::temp_dir().join(format!("{}.epub", staging_folder_name()));

        let mut exporter = EpubExporter::new(&book);
        exporter
            .set_uuid_identifier(UUID)
            .set_publication_identifier(PUB_ID)
            .add_font(FontResource::new(
                "OEBPS/Fonts/adobe.otf",
                Some(ObfuscationAlgorithm::Adobe),
            ))
            .add_font(FontResource::new(
                "OEBPS/Fonts/idpf.ttf",
                Some(ObfuscationAlgorithm::Idpf),
            ))
            .add_font(FontResource::new("OEBPS/Fonts/plain.ttf", None));

        exporter.export(&output).unwrap();
        let entries = read_entries(&output);

        let adobe = entry(&entries, "OEBPS/Fonts/adobe.otf").unwrap();
        assert_ne!(adobe[..1024], original[..1024]);
        assert_eq!(adobe[1024..], original[1024..]);

        let mut restored = adobe.clone();
        let key = ObfuscationAlgorithm::Adobe.derive_key(UUID).unwrap();
        obfuscate(&mut restored, ObfuscationAlgorithm::Adobe, &key);
        assert_eq!(restored, original);

        let idpf = entry(&entries, "OEBPS/Fonts/idpf.ttf").unwrap();
        assert_ne!(idpf[..1040], original[..1040]);
        assert_eq!(idpf[1040..], original[1040..]);

        let mut restored = idpf.clone();
        let key = ObfuscationAlgorithm::Idpf.derive_key(PUB_ID).unwrap();
        obfuscate(&mut restored, ObfuscationAlgorithm::Idpf, &key);
        assert_eq!(restored, original);

        assert_eq!(entry(&entries, "OEBPS/Fonts/plain.ttf"), Some(&original));

        let manifest = String::from_utf8(
            entry(&entries, "META-INF/encryption.xml").unwrap().clone(),
        )
        .unwrap();
        assert!(manifest.contains("URI=\"OEBPS/Fonts/adobe.otf\""));
        assert!(manifest.contains("URI=\"OEBPS/Fonts/idpf.ttf\""));
        assert!(!manifest.contains("plain.ttf"));

        // the source folder is left untouched
        assert_eq!(fs::read(book.join("OEBPS/Fonts/adobe.otf")).unwrap(), original);
        assert!(!book.join("META-INF/encryption.xml").exists());

        fs::remove_dir_all(book).unwrap();
        fs::remove_file(output).unwrap();
    }

    #[test]
    fn test_export_with_custom_encryption_manifest() {
        let book = make_book(&[("Fonts/a.ttf", font_data(64))]);
        let output = env::temp_dir().join(format!("{}.epub", staging_folder_name()));

        let mut exporter = EpubExporter::new(&book);
        exporter
            .set_publication_identifier(PUB_ID)
            .set_encryption_manifest(b"<encryption/>".to_vec())
            .add_font(FontResource::new("Fonts/a.ttf", Some(ObfuscationAlgorithm::Idpf)));

        exporter.export(&output).unwrap();

        let entries = read_entries(&output);
        assert_eq!(
            entry(&entries, "META-INF/encryption.xml"),
            Some(&b"<encryption/>".to_vec())
        );

        fs::remove_dir_all(book).unwrap();
        fs::remove_file(output).unwrap();
    }

    #[test]
    fn test_export_with_generated_uuid() {
        let original = font_data(1500);
        let book = make_book(&[("Fonts/a.otf", original.clone())]);
        let output = env::temp_dir().join(format!("{}.epub", staging_folder_name()));

        let mut exporter = EpubExporter::new(&book);
        exporter.add_font(FontResource::new("Fonts/a.otf", Some(ObfuscationAlgorithm::Adobe)));
        let uuid = exporter.ensure_uuid_identifier().to_string();

        exporter.export(&output).unwrap();

        let entries = read_entries(&output);
        let mut restored = entry(&entries, "Fonts/a.otf").unwrap().clone();
        let key = ObfuscationAlgorithm::Adobe.derive_key(&uuid).unwrap();
        assert_eq!(key.len(), 16);
        obfuscate(&mut restored, ObfuscationAlgorithm::Adobe, &key);
        assert_eq!(restored, original);

        fs::remove_dir_all(book).unwrap();
        fs::remove_file(output).unwrap();
    }

    #[test]
    fn test_export_missing_identifier() {
        let book = make_book(&[("Fonts/a.otf", font_data(100))]);
        let output = env::temp_dir().join(format!("{}.epub", staging_folder_name()));

        let mut snapshot = PublicationSnapshot::new(&book);
        snapshot.identifiers.publication_id = Some(PUB_ID.to_string());
        snapshot.add_font(FontResource::new("Fonts/a.otf", Some(ObfuscationAlgorithm::Adobe)));

        let result = export(&snapshot, &output);
        assert!(matches!(
            result,
            Err(PackagingError::PreconditionViolation { .. })
        ));
        assert!(!output.exists());

        fs::remove_dir_all(book).unwrap();
    }

    #[test]
    fn test_export_font_outside_publication() {
        let book = make_book(&[("Fonts/a.otf", font_data(100))]);
        let output = env::temp_dir().join(format!("{}.epub", staging_folder_name()));

        let mut exporter = EpubExporter::new(&book);
        exporter
            .set_publication_identifier(PUB_ID)
            .add_font(FontResource::new("../a.otf", Some(ObfuscationAlgorithm::Idpf)));

        let result = exporter.export(&output);
        assert_eq!(
            result.unwrap_err(),
            PackagingError::PreconditionViolation {
                reason: "Font path \"../a.otf\" is out of the publication folder.".to_string()
            }
        );
        assert!(!output.exists());

        fs::remove_dir_all(book).unwrap();
    }

    #[test]
    fn test_export_missing_font_file() {
        let book = make_book(&[("content.opf", b"<package/>".to_vec())]);
        let output = env::temp_dir().join(format!("{}.epub", staging_folder_name()));

        let mut exporter = EpubExporter::new(&book);
        exporter
            .set_publication_identifier(PUB_ID)
            .add_font(FontResource::new("Fonts/missing.ttf", Some(ObfuscationAlgorithm::Idpf)));

        let result = exporter.export(&output);
        assert_eq!(
            result.unwrap_err(),
            PackagingError::CannotOpenFile {
                path: "Fonts/missing.ttf".to_string(),
                source: std::io::Error::other("ignored"),
            }
        );
        assert!(!output.exists());

        fs::remove_dir_all(book).unwrap();
    }

    #[test]
    fn test_export_missing_resource_folder() {
        let book = env::temp_dir().join(staging_folder_name());
        let output = env::temp_dir().join(format!("{}.epub", staging_folder_name()));

        let result = EpubExporter::new(&book).export(&output);
        assert!(matches!(
            result,
            Err(PackagingError::CannotOpenFile { .. })
        ));
        assert!(!output.exists());
    }

    #[test]
    fn test_export_unwritable_destination() {
        let book = make_book(&[("content.opf", b"<package/>".to_vec())]);
        let output = env::temp_dir()
            .join(staging_folder_name())
            .join("book.epub");

        let result = EpubExporter::new(&book).export(&output);
        assert!(matches!(
            result,
            Err(PackagingError::CannotOpenFile { .. })
        ));
        assert!(!output.exists());

        fs::remove_dir_all(book).unwrap();
    }
}
