//! Data directory file naming conventions.
//!
//! Tables are published as `<prefix>_<generation>.dat`; a table being
//! written lives at `<prefix>_<generation>.tmp` until it is renamed.

use std::path::{Path, PathBuf};

use crate::types::Generation;

/// File types in the data directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// Published, immutable table.
    Table,
    /// Unpublished table write.
    Temp,
}

/// Generate the lock file path.
pub fn lock_file_path(dir: &Path) -> PathBuf {
    dir.join("LOCK")
}

/// Generate a table file path.
pub fn table_file_path(dir: &Path, prefix: &str, generation: Generation) -> PathBuf {
    dir.join(format!("{}_{}.dat", prefix, generation))
}

/// Generate the temporary path a table is written to before publishing.
pub fn temp_file_path(dir: &Path, prefix: &str, generation: Generation) -> PathBuf {
    dir.join(format!("{}_{}.tmp", prefix, generation))
}

/// Parse a file name and return its type and generation.
///
/// The generation is the integer between the last `_` and the extension.
/// Returns `None` if the file name doesn't match `<prefix>_<generation>.{dat,tmp}`.
pub fn parse_file_name(name: &str, prefix: &str) -> Option<(FileType, Generation)> {
    let (stem, ext) = name.rsplit_once('.')?;
    let file_type = match ext {
        "dat" => FileType::Table,
        "tmp" => FileType::Temp,
        _ => return None,
    };

    let (file_prefix, number) = stem.rsplit_once('_')?;
    if file_prefix != prefix || number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    number.parse::<u64>().ok().map(|g| (file_type, g))
}

/// List all files of a given type in the data directory, sorted by generation.
pub fn list_files_of_type(
    dir: &Path,
    prefix: &str,
    file_type: FileType,
) -> std::io::Result<Vec<(Generation, PathBuf)>> {
    let mut files = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if let Some((ft, generation)) = parse_file_name(&name, prefix) {
            if ft == file_type {
                files.push((generation, entry.path()));
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Delete a file, ignoring "not found" errors.
pub fn delete_file(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Create directory if it doesn't exist.
pub fn create_dir_if_missing(path: &Path) -> std::io::Result<()> {
    match std::fs::create_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e),
    }
}

/// Sync a directory to ensure file operations are durable.
#[cfg(unix)]
pub fn sync_dir(path: &Path) -> std::io::Result<()> {
    let dir = std::fs::File::open(path)?;
    dir.sync_all()
}

/// Directories cannot be opened for syncing on this platform.
#[cfg(not(unix))]
pub fn sync_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
