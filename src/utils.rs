//! Utility functions for vault file handling and console output.

use crate::error::{Result, VaultError};
use colored::*;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Create `dir` (and parents) readable only by the owner.
pub fn ensure_private_dir(dir: &Path) -> Result<()> {
    if dir.as_os_str().is_empty() || dir.exists() {
        return Ok(());
    }
    fs::create_dir_all(dir).map_err(|e| VaultError::io("create directory", dir, e))?;

    #[cfg(unix)]
    fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
        .map_err(|e| VaultError::io("set permissions on", dir, e))?;

    Ok(())
}

/// Write `contents` to `path` without ever leaving a half-written file behind.
///
/// The data goes to a temporary file in the same directory which is then
/// renamed over the target.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    ensure_private_dir(&dir)?;

    let mut temp = tempfile::NamedTempFile::new_in(&dir)
        .map_err(|e| VaultError::io("create temporary file in", &dir, e))?;
    temp.write_all(contents)
        .and_then(|_| temp.as_file().sync_all())
        .map_err(|e| VaultError::io("write", temp.path(), e))?;

    #[cfg(unix)]
    temp.as_file()
        .set_permissions(fs::Permissions::from_mode(0o600))
        .map_err(|e| VaultError::io("set permissions on", temp.path(), e))?;

    temp.persist(path)
        .map_err(|e| VaultError::io("replace", path, e.error))?;
    Ok(())
}

/// Copy `path` to `<name>.backup.<timestamp>` next to it. When that name is
/// already taken a `.N` counter is appended; existing backups are never
/// overwritten.
pub fn create_backup(path: &Path) -> Result<PathBuf> {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let file_name = path
        .file_name()
        .ok_or_else(|| VaultError::Validation(format!("invalid file name: {}", path.display())))?
        .to_string_lossy();
    let stem = format!("{file_name}.backup.{timestamp}");

    let (backup_path, mut backup) = (0u32..)
        .map(|n| match n {
            0 => path.with_file_name(&stem),
            n => path.with_file_name(format!("{stem}.{n}")),
        })
        .find_map(|candidate| {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&candidate)
            {
                Ok(file) => Some(Ok((candidate, file))),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => None,
                Err(e) => Some(Err(VaultError::io("create", &candidate, e))),
            }
        })
        .ok_or_else(|| VaultError::Validation("no free backup name".to_string()))??;

    #[cfg(unix)]
    backup
        .set_permissions(fs::Permissions::from_mode(0o600))
        .map_err(|e| VaultError::io("set permissions on", &backup_path, e))?;

    let mut source = fs::File::open(path).map_err(|e| VaultError::io("back up", path, e))?;
    std::io::copy(&mut source, &mut backup)
        .and_then(|_| backup.sync_all())
        .map_err(|e| VaultError::io("back up", path, e))?;

    tracing::debug!(backup = %backup_path.display(), "created database backup");
    Ok(backup_path)
}

/// Check file permissions and return warnings.
pub fn check_file_permissions(path: &Path) -> Vec<String> {
    let mut warnings = Vec::new();

    #[cfg(unix)]
    {
        if let Ok(metadata) = fs::metadata(path) {
            let mode = metadata.permissions().mode();

            // Check if group or others have any permissions
            if mode & 0o077 != 0 {
                warnings.push(format!(
                    "File has insecure permissions: {:o}. Run 'chmod 600 {}' to fix.",
                    mode & 0o777,
                    path.display()
                ));
            }
        }
    }

    warnings
}

/// Append `suffix` to the final component of `path`.
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Print an error and exit.
pub fn error_exit(message: &str, code: i32) -> ! {
    eprintln!("{} {}", "Error:".red().bold(), message);
    std::process::exit(code);
}

/// Print a success message.
pub fn success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

/// Print a warning message.
pub fn warning(message: &str) {
    eprintln!("{} {}", "Warning:".yellow(), message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_replaces_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.json");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"second");
        assert!(check_file_permissions(&path).is_empty());
        // Only the target remains, no stray temp files.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_write_atomic_creates_parent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("keys");
        write_atomic(&path, b"data").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_create_backup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.json");
        fs::write(&path, b"{}").unwrap();

        let backup = create_backup(&path).unwrap();
        let name = backup.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("db.json.backup."));
        assert_eq!(fs::read(&backup).unwrap(), b"{}");
    }

    #[test]
    fn test_backups_in_same_second_do_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.json");

        fs::write(&path, b"first").unwrap();
        let first = create_backup(&path).unwrap();
        fs::write(&path, b"second").unwrap();
        let second = create_backup(&path).unwrap();

        assert_ne!(first, second);
        assert_eq!(fs::read(&first).unwrap(), b"first");
        assert_eq!(fs::read(&second).unwrap(), b"second");
    }

    #[test]
    fn test_with_suffix() {
        assert_eq!(
            with_suffix(Path::new("/tmp/cached_pass"), ".rnd"),
            PathBuf::from("/tmp/cached_pass.rnd")
        );
    }
}
