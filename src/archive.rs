//! Archive Writer
//!
//! This module turns a directory tree into an EPUB container. An EPUB
//! container is a ZIP archive whose first entry is named `mimetype`, is
//! stored without compression and without extra fields, and contains exactly
//! the bytes `application/epub+zip`. Reading systems sniff those bytes at a
//! fixed offset, so the entry must precede every other entry.
//!
//! All remaining files are deflated and opened as zip64-capable entries, so
//! no per-file size check is needed for resources larger than 4 GiB.
//!
//! ## Entry order
//!
//! Files are visited depth-first, sorted by file name inside each directory.
//! The order carries no meaning for EPUB reading systems, but it makes the
//! produced archive reproducible for the same input tree.

use std::{
    fs::{self, File},
    io::{self, Read, Seek, Write},
    path::Path,
};

use log::{debug, info, warn};
use walkdir::WalkDir;
use zip::{CompressionMethod, ZipWriter, write::FileOptions};

use crate::{error::PackagingError, types::ResourceFile, utils::archive_path};

/// The MIME type stored in the `mimetype` entry
pub const EPUB_MIME_TYPE: &str = "application/epub+zip";

/// Name of the first entry of every EPUB container
pub const MIMETYPE_ENTRY: &str = "mimetype";

const BUFFER_SIZE: usize = 8192;

/// Lists the regular files that belong in the container
///
/// The directory is traversed recursively. Symbolic links are followed, so a
/// linked file is stored under the link's own path; a dangling or looping link
/// is an error. Other non-regular files are skipped. Hidden files are
/// included. A root-level `mimetype` file is skipped since the writer always
/// generates that entry itself.
///
/// ## Return
/// - `Ok(Vec<ResourceFile>)`: The files in archive order
/// - `Err(PackagingError)`: A directory or file could not be read
pub fn collect_resources<P: AsRef<Path>>(
    source_dir: P,
) -> Result<Vec<ResourceFile>, PackagingError> {
    let source_dir = source_dir.as_ref();
    let mut resources = Vec::new();

    for entry in WalkDir::new(source_dir)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|err| {
            let path = match err.path() {
                Some(path) => match path.strip_prefix(source_dir) {
                    Ok(relative) if !relative.as_os_str().is_empty() => archive_path(relative),
                    _ => path.to_string_lossy().to_string(),
                },
                None => source_dir.to_string_lossy().to_string(),
            };
            PackagingError::open(path, err.into())
        })?;

        if entry.file_type().is_dir() {
            continue;
        }
        if !entry.file_type().is_file() {
            warn!("skipping \"{}\", not a regular file", entry.path().display());
            continue;
        }

        let resource = ResourceFile::new(source_dir, entry.path())?;
        if resource.relative_path == MIMETYPE_ENTRY {
            debug!("skipping \"{}\", the mimetype entry is generated", entry.path().display());
            continue;
        }

        resources.push(resource);
    }

    Ok(resources)
}

/// Packs `source_dir` into an EPUB container at `dest_file`
///
/// The destination is created (or truncated); its parent directory must
/// already exist. When packaging fails, the partially written destination
/// file is removed before the error is returned, so a file at `dest_file`
/// after an `Err` is never a leftover of this call.
///
/// ## Parameters
/// - `source_dir`: Folder holding the publication's files
/// - `dest_file`: Path of the EPUB file to create
///
/// ## Return
/// - `Ok(())`: The archive is complete and its file handle is closed
/// - `Err(PackagingError)`: `CannotOpenFile` if the destination or a source
///   file could not be opened, `CannotStoreFile` if writing failed
pub fn write_archive<S: AsRef<Path>, D: AsRef<Path>>(
    source_dir: S,
    dest_file: D,
) -> Result<(), PackagingError> {
    let dest_file = dest_file.as_ref();
    let dest_name = dest_file.to_string_lossy().to_string();

    let file = File::create(dest_file).map_err(|err| PackagingError::open(dest_name.as_str(), err))?;

    // the file handle is dropped at the end of this statement
    let result = package(source_dir.as_ref(), file, &dest_name).map(drop);

    if result.is_err() {
        if let Err(err) = fs::remove_file(dest_file) {
            warn!("failed to remove partial archive \"{}\": {}", dest_name, err);
        }
    } else {
        info!("wrote EPUB container \"{}\"", dest_name);
    }

    result
}

/// Packs `source_dir` into an EPUB container written to `writer`
///
/// Behaves like [write_archive] but leaves the sink to the caller; nothing
/// is cleaned up on failure. Returns the writer once the archive is finished.
pub fn write_archive_to<S: AsRef<Path>, W: Write + Seek>(
    source_dir: S,
    writer: W,
) -> Result<W, PackagingError> {
    package(source_dir.as_ref(), writer, "<archive>")
}

fn package<W: Write + Seek>(
    source_dir: &Path,
    writer: W,
    archive_name: &str,
) -> Result<W, PackagingError> {
    let mut zip = ZipWriter::new(writer);

    write_mimetype(&mut zip)?;

    let resources = collect_resources(source_dir)?;
    let options = FileOptions::<()>::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(None)
        .large_file(true);

    for resource in &resources {
        write_resource(&mut zip, resource, options)?;
    }

    let writer = zip
        .finish()
        .map_err(|err| PackagingError::store(archive_name, err.into()))?;
    debug!("finished archive with {} entries", resources.len() + 1);

    Ok(writer)
}

fn write_mimetype<W: Write + Seek>(zip: &mut ZipWriter<W>) -> Result<(), PackagingError> {
    let options = FileOptions::<()>::default().compression_method(CompressionMethod::Stored);

    zip.start_file(MIMETYPE_ENTRY, options)
        .map_err(|err| PackagingError::store(MIMETYPE_ENTRY, err.into()))?;
    zip.write_all(EPUB_MIME_TYPE.as_bytes())
        .map_err(|err| PackagingError::store(MIMETYPE_ENTRY, err))?;

    Ok(())
}

/// Streams a single file into a new deflated entry
fn write_resource<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    resource: &ResourceFile,
    options: FileOptions<()>,
) -> Result<(), PackagingError> {
    let name = resource.relative_path.as_str();

    let mut source = File::open(&resource.path).map_err(|err| PackagingError::open(name, err))?;

    zip.start_file(name, options)
        .map_err(|err| PackagingError::store(name, err.into()))?;

    let mut buffer = [0u8; BUFFER_SIZE];
    loop {
        let read = match source.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(PackagingError::store(name, err)),
        };

        zip.write_all(&buffer[..read])
            .map_err(|err| PackagingError::store(name, err))?;
    }

    zip.flush().map_err(|err| PackagingError::store(name, err))?;
    debug!("stored \"{}\" ({} bytes)", name, resource.size);

    Ok(())
}
