use std::{
    fs,
    path::{Component, Path},
    process,
    sync::atomic::{AtomicUsize, Ordering},
};

use chrono::Local;
use log::warn;
use walkdir::WalkDir;

use crate::error::PackagingError;

static STAGING_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Returns the current time with custom format
pub fn local_time() -> String {
    Local::now().format("%Y-%m-%dT%H-%M-%S.%fU%z").to_string()
}

/// Returns a directory name that is unique for this process
///
/// The name combines the current time, the process id and a process-wide
/// counter, so two exports running at the same moment never collide.
pub fn staging_folder_name() -> String {
    format!(
        "epub-export-{}-{}-{}",
        local_time(),
        process::id(),
        STAGING_COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

/// Converts a relative file system path into an archive entry name
///
/// Components are joined with forward slashes; root, prefix and `.`
/// components are dropped, so the name never starts with a separator.
pub fn archive_path<P: AsRef<Path>>(path: P) -> String {
    path.as_ref()
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            Component::ParentDir => Some("..".to_string()),
            Component::RootDir | Component::Prefix(_) | Component::CurDir => None,
        })
        .collect::<Vec<String>>()
        .join("/")
}

/// Removes leading slashes from a publication-relative path
///
/// Backslashes are treated as separators as well.
pub fn remove_leading_slash(path: &str) -> String {
    path.replace('\\', "/").trim_start_matches('/').to_string()
}

/// Check if a publication-relative path stays inside the publication root
pub fn is_contained(relative_path: &str) -> bool {
    !relative_path.is_empty() && !relative_path.split('/').any(|part| part == "..")
}

/// Recursively copies the contents of `source` into `target`
///
/// `target` must already exist. Directories are recreated, regular files are
/// copied. Symbolic links are followed and replaced by copies of their
/// targets; a dangling link is an error.
///
/// ## Return
/// - `Ok(())`: Every file was copied
/// - `Err(PackagingError)`: A file or directory could not be read or created
pub fn copy_folder(source: &Path, target: &Path) -> Result<(), PackagingError> {
    for entry in WalkDir::new(source)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|err| {
            let path = err
                .path()
                .map(|path| path.to_string_lossy().to_string())
                .unwrap_or_else(|| source.to_string_lossy().to_string());
            PackagingError::open(path, err.into())
        })?;

        let relative_path = match entry.path().strip_prefix(source) {
            Ok(path) => path,
            Err(_) => continue,
        };
        let target_path = target.join(relative_path);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target_path).map_err(|err| {
                PackagingError::open(target_path.to_string_lossy().to_string(), err)
            })?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target_path).map_err(|err| {
                PackagingError::open(entry.path().to_string_lossy().to_string(), err)
            })?;
        } else {
            warn!("skipping \"{}\", not a regular file", entry.path().display());
        }
    }

    Ok(())
}
