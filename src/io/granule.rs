//! Granule access: reader abstraction, file-name timestamps and sanity checks

use crate::types::{MatchupError, MatchupResult, SwathGranule};
use chrono::NaiveDateTime;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Smallest plausible granule file size, in bytes
pub const MIN_GRANULE_BYTES: u64 = 1000;

/// Source of swath granules
pub trait GranuleReader {
    /// Open one granule. The returned value owns all arrays; dropping it
    /// releases the granule.
    fn open(&self, path: &Path) -> MatchupResult<SwathGranule>;
}

/// Acquisition timestamp embedded in a granule file name, e.g.
/// `PACE_OCI.20240302T140000.L2.AER_UAA.nc`
pub fn granule_timestamp<P: AsRef<Path>>(path: P) -> MatchupResult<(String, NaiveDateTime)> {
    let path = path.as_ref();
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| MatchupError::InvalidFormat(format!("Invalid granule path: {}", path.display())))?;

    let pattern = Regex::new(r"(\d{8}T\d{6})")
        .map_err(|e| MatchupError::Processing(format!("Regex error: {}", e)))?;
    let stamp = pattern
        .captures(name)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| {
            MatchupError::InvalidFormat(format!("No YYYYMMDDTHHMMSS timestamp in {}", name))
        })?;

    let time = NaiveDateTime::parse_from_str(stamp, "%Y%m%dT%H%M%S")
        .map_err(|e| MatchupError::InvalidFormat(format!("Bad timestamp {} in {}: {}", stamp, name, e)))?;
    Ok((stamp.to_string(), time))
}

/// Reject missing, empty and truncated granule files; returns the file size
pub fn check_granule_file<P: AsRef<Path>>(path: P) -> MatchupResult<u64> {
    let path = path.as_ref();
    let metadata = std::fs::metadata(path).map_err(|e| {
        MatchupError::Io(std::io::Error::new(
            e.kind(),
            format!("Granule {} not accessible: {}", path.display(), e),
        ))
    })?;

    let size = metadata.len();
    if size == 0 {
        return Err(MatchupError::InvalidFormat(format!(
            "Granule {} is empty",
            path.display()
        )));
    }
    if size < MIN_GRANULE_BYTES {
        return Err(MatchupError::InvalidFormat(format!(
            "Granule {} is only {} bytes, likely truncated",
            path.display(),
            size
        )));
    }
    Ok(size)
}

/// Granule files with `extension` below `root`, sorted by acquisition time
/// and then by path. Files without a timestamp are ignored.
pub fn find_granules<P: AsRef<Path>>(root: P, extension: &str) -> Vec<PathBuf> {
    let mut found: Vec<(NaiveDateTime, PathBuf)> = WalkDir::new(root.as_ref())
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().and_then(|e| e.to_str()) == Some(extension))
        .filter_map(|path| match granule_timestamp(&path) {
            Ok((_, time)) => Some((time, path)),
            Err(e) => {
                log::debug!("Ignoring {}: {}", path.display(), e);
                None
            }
        })
        .collect();
    found.sort();
    log::debug!("Found {} granules under {}", found.len(), root.as_ref().display());
    found.into_iter().map(|(_, path)| path).collect()
}

/// Reader serving granules already held in memory, keyed by path
#[derive(Debug, Clone, Default)]
pub struct InMemoryGranuleReader {
    granules: HashMap<PathBuf, SwathGranule>,
}

impl InMemoryGranuleReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, granule: SwathGranule) {
        self.granules.insert(path.into(), granule);
    }

    pub fn len(&self) -> usize {
        self.granules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.granules.is_empty()
    }
}

impl GranuleReader for InMemoryGranuleReader {
    fn open(&self, path: &Path) -> MatchupResult<SwathGranule> {
        self.granules.get(path).cloned().ok_or_else(|| {
            MatchupError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Granule {} not found", path.display()),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::fs;

    #[test]
    fn test_granule_timestamp() {
        let (stamp, time) = granule_timestamp("/data/PACE_OCI.20240302T140000.L2.AER_UAA.V3.nc").unwrap();
        assert_eq!(stamp, "20240302T140000");
        assert_eq!(
            time,
            NaiveDate::from_ymd_opt(2024, 3, 2)
                .unwrap()
                .and_hms_opt(14, 0, 0)
                .unwrap()
        );
        assert!(granule_timestamp("PACE_OCI.L2.nc").is_err());
        assert!(granule_timestamp("PACE_OCI.20241302T140000.nc").is_err());
    }

    #[test]
    fn test_check_granule_file() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.nc");
        let small = dir.path().join("small.nc");
        let good = dir.path().join("good.nc");
        fs::write(&empty, b"").unwrap();
        fs::write(&small, vec![0u8; 999]).unwrap();
        fs::write(&good, vec![0u8; 1000]).unwrap();

        assert!(check_granule_file(dir.path().join("missing.nc")).is_err());
        assert!(check_granule_file(&empty).is_err());
        assert!(check_granule_file(&small).is_err());
        assert_eq!(check_granule_file(&good).unwrap(), 1000);
    }

    #[test]
    fn test_find_granules_sorted_by_time() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "PACE_OCI.20240302T230000.L2.nc",
            "PACE_OCI.20240302T010000.L2.nc",
            "notes.nc",
            "PACE_OCI.20240302T120000.L2.txt",
        ] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }

        let found = find_granules(dir.path(), "nc");
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            names,
            vec!["PACE_OCI.20240302T010000.L2.nc", "PACE_OCI.20240302T230000.L2.nc"]
        );
    }
}
