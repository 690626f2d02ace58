//! PID file management.

use std::io::Write;
use std::path::Path;

/// Write the current process id to `path`.
pub fn create(path: &Path) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    writeln!(file, "{}", std::process::id())?;
    Ok(())
}

/// Remove the PID file, ignoring a missing file.
pub fn remove(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("failed to remove pid file {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_remove() {
        let path = std::env::temp_dir().join(format!("cuckoo-pid-test-{}", std::process::id()));

        create(&path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());

        remove(&path);
        assert!(!path.exists());

        // Second removal is silent.
        remove(&path);
    }
}
