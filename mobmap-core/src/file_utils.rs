//! File utility functions.

use crate::error::{MobmapError, Result};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

/// Read file with UTF-8 encoding.
pub fn read_utf8_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        MobmapError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to read {}: {}", path.display(), e),
        ))
    })
}

/// Write `content` to `<dir>/<prefix>_<YYYYmmdd_HHMMSS>.<extension>`, creating `dir`.
pub fn write_timestamped(
    dir: &Path,
    prefix: &str,
    extension: &str,
    content: &str,
    at: DateTime<Local>,
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}_{}.{}", prefix, at.format("%Y%m%d_%H%M%S"), extension));
    std::fs::write(&path, content)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_write_timestamped_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("import_reports");
        let at = Local.with_ymd_and_hms(2025, 1, 17, 9, 5, 0).unwrap();

        let path = write_timestamped(&nested, "codex_import", "txt", "report", at).unwrap();

        assert_eq!(path.file_name().unwrap(), "codex_import_20250117_090500.txt");
        assert_eq!(read_utf8_file(&path).unwrap(), "report");
    }

    #[test]
    fn test_read_missing_file_mentions_path() {
        let err = read_utf8_file(Path::new("/nonexistent/feed.json")).unwrap_err();
        assert!(err.to_string().contains("feed.json"));
    }
}
