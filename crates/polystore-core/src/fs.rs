//! Filesystem helpers: batch-file loading, file discovery and atomic copies.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Result, StoreError};
use crate::storage::types::FileParams;

const BOM: char = '\u{feff}';

/// Read a migration, seed or batch file.
///
/// The UTF-8 byte-order mark is stripped and the content trimmed.
///
/// # Errors
///
/// - `StoreError::FileNotFound` if the path does not exist
/// - `StoreError::FileUnreadable` if it exists but cannot be read as UTF-8 text
/// - `StoreError::FileEmpty` if nothing remains after stripping and trimming
pub fn read_batch_file(path: &Path) -> Result<String> {
    if !path.is_file() {
        return Err(StoreError::FileNotFound(path.to_path_buf()));
    }

    let raw = fs::read_to_string(path).map_err(|source| StoreError::FileUnreadable {
        path: path.to_path_buf(),
        source,
    })?;

    let content = raw.trim_start_matches(BOM).trim();
    if content.is_empty() {
        return Err(StoreError::FileEmpty(path.to_path_buf()));
    }
    Ok(content.to_string())
}

/// Replace `{{prefix}}` and `{{key}}` placeholders in batch content.
pub fn substitute_placeholders(content: &str, prefix: &str, params: &FileParams) -> String {
    let mut output = content.replace("{{prefix}}", prefix);
    for (key, value) in params {
        output = output.replace(&format!("{{{{{}}}}}", key), value);
    }
    output
}

/// List files in `dir` with the given extension, sorted by filename.
///
/// # Errors
///
/// Returns `StoreError::DirectoryNotFound` if `dir` is missing and
/// `StoreError::NoFilesFound` if no file matches.
pub fn discover_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(StoreError::DirectoryNotFound(dir.to_path_buf()));
    }

    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some(extension))
        .collect();

    if files.is_empty() {
        return Err(StoreError::NoFilesFound(dir.to_path_buf()));
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Atomically rename a file, with fallback for platforms where rename fails if target exists.
///
/// On some platforms (notably Windows), `fs::rename` fails if the destination already exists.
/// This function handles that case by removing the destination first and retrying.
///
/// If the rename ultimately fails, the temp file is cleaned up.
pub fn rename_with_fallback(temp_path: &Path, destination: &Path) -> io::Result<()> {
    if let Err(initial_err) = fs::rename(temp_path, destination) {
        let _ = fs::remove_file(destination);
        fs::rename(temp_path, destination).map_err(|retry_err| {
            let _ = fs::remove_file(temp_path);
            io::Error::new(
                retry_err.kind(),
                format!(
                    "Atomic rename failed (initial: {}, retry: {})",
                    initial_err, retry_err
                ),
            )
        })?;
    }
    Ok(())
}

/// Copy `source` to `destination` through a temp file in the destination directory.
///
/// Returns the number of bytes copied.
pub fn copy_atomic(source: &Path, destination: &Path) -> Result<u64> {
    if !source.is_file() {
        return Err(StoreError::FileNotFound(source.to_path_buf()));
    }
    let parent = destination
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| io::Error::other(format!("System time error: {}", e)))?
        .as_nanos();
    let temp_path = parent.join(format!(".polystore-copy-{}.tmp", nanos));

    let bytes = fs::copy(source, &temp_path)?;
    rename_with_fallback(&temp_path, destination)?;
    Ok(bytes)
}

/// Timestamp used for unnamed backup artifacts.
pub fn backup_timestamp() -> String {
    chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Backup artifact filename: `name` with `extension` appended unless already present.
pub fn artifact_name(name: &str, extension: &str) -> String {
    let suffix = format!(".{}", extension);
    if name.ends_with(&suffix) {
        name.to_string()
    } else {
        format!("{}{}", name, suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_read_missing_file() {
        let dir = tempdir().unwrap();
        let err = read_batch_file(&dir.path().join("nope.sql")).unwrap_err();
        assert!(matches!(err, StoreError::FileNotFound(_)));
    }

    #[test]
    fn test_read_bom_only_file_is_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.sql");
        File::create(&path)
            .unwrap()
            .write_all("\u{feff}  \n\t".as_bytes())
            .unwrap();
        let err = read_batch_file(&path).unwrap_err();
        assert!(matches!(err, StoreError::FileEmpty(_)));
    }

    #[test]
    fn test_read_non_utf8_is_unreadable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("binary.sql");
        File::create(&path).unwrap().write_all(&[0xff, 0xfe, 0x00, 0xc3]).unwrap();
        let err = read_batch_file(&path).unwrap_err();
        assert!(matches!(err, StoreError::FileUnreadable { .. }));
    }

    #[test]
    fn test_read_strips_bom() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ok.sql");
        fs::write(&path, "\u{feff}SELECT 1;\n").unwrap();
        assert_eq!(read_batch_file(&path).unwrap(), "SELECT 1;");
    }

    #[test]
    fn test_substitute_placeholders() {
        let mut params = FileParams::new();
        params.insert("owner".to_string(), "alice".to_string());
        let output = substitute_placeholders(
            "INSERT INTO {{prefix}}users (name) VALUES ('{{owner}}')",
            "app_",
            &params,
        );
        assert_eq!(output, "INSERT INTO app_users (name) VALUES ('alice')");
    }

    #[test]
    fn test_discover_sorts_and_filters() {
        let dir = tempdir().unwrap();
        for name in ["010_seed.sql", "001_init.sql", "002_add_col.sql", "notes.txt"] {
            fs::write(dir.path().join(name), "SELECT 1;").unwrap();
        }
        let files = discover_files(dir.path(), "sql").unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["001_init.sql", "002_add_col.sql", "010_seed.sql"]);
    }

    #[test]
    fn test_discover_missing_and_empty_dirs() {
        let dir = tempdir().unwrap();
        let err = discover_files(&dir.path().join("missing"), "sql").unwrap_err();
        assert!(matches!(err, StoreError::DirectoryNotFound(_)));

        fs::write(dir.path().join("readme.md"), "x").unwrap();
        let err = discover_files(dir.path(), "json").unwrap_err();
        assert!(matches!(err, StoreError::NoFilesFound(_)));
    }

    #[test]
    fn test_rename_overwrites_existing() {
        let dir = tempdir().unwrap();
        let temp = dir.path().join("temp.txt");
        let dest = dir.path().join("dest.txt");

        File::create(&dest).unwrap().write_all(b"old").unwrap();
        File::create(&temp).unwrap().write_all(b"new").unwrap();

        rename_with_fallback(&temp, &dest).unwrap();

        assert!(!temp.exists());
        assert_eq!(fs::read_to_string(&dest).unwrap(), "new");
    }

    #[test]
    fn test_artifact_name_appends_extension_once() {
        assert_eq!(artifact_name("nightly", "sqlite"), "nightly.sqlite");
        assert_eq!(artifact_name("nightly.sqlite", "sqlite"), "nightly.sqlite");
        assert_eq!(artifact_name("20260101_000000", "sql"), "20260101_000000.sql");
    }

    #[test]
    fn test_copy_atomic_creates_parent() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source.db");
        fs::write(&source, b"payload").unwrap();
        let destination = dir.path().join("nested").join("copy.db");

        let bytes = copy_atomic(&source, &destination).unwrap();
        assert_eq!(bytes, 7);
        assert_eq!(fs::read(&destination).unwrap(), b"payload");
    }
}
