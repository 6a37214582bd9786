//! In-place removal of duplicated measurement rows in per-site CSV folders

use crate::types::MatchupResult;
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use walkdir::WalkDir;

/// Key columns identifying one AERONET measurement
pub const AERONET_DEDUP_KEYS: [&str; 3] = ["AERONET_Site", "Date(dd:mm:yyyy)", "Time(hh:mm:ss)"];

/// Remove rows repeating an earlier row's `key_columns` from every `.csv`
/// file below `root`, rewriting only the files that changed.
///
/// Returns the sorted file stems (site names) of the rewritten files. A file
/// lacking any of the key columns is left alone. Unreadable files are logged
/// and skipped.
pub fn remove_duplicate_rows<P: AsRef<Path>>(root: P, key_columns: &[&str]) -> MatchupResult<Vec<String>> {
    log::info!("Cleaning CSV files for duplicate rows under {}", root.as_ref().display());

    let mut sites = BTreeSet::new();
    for entry in WalkDir::new(root.as_ref()).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Cannot walk directory entry: {}", e);
                continue;
            }
        };
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some("csv") {
            continue;
        }

        match dedup_file(path, key_columns) {
            Ok(0) => {}
            Ok(removed) => {
                log::info!("File: {}, Removed Duplicates: {}", path.display(), removed);
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    sites.insert(stem.to_string());
                }
            }
            Err(e) => log::warn!("Error processing file {}: {}", path.display(), e),
        }
    }

    Ok(sites.into_iter().collect())
}

/// Deduplicate one file, returning the number of rows removed
fn dedup_file(path: &Path, key_columns: &[&str]) -> MatchupResult<usize> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers = reader.headers()?.clone();

    let mut key_index = Vec::with_capacity(key_columns.len());
    for key in key_columns {
        match headers.iter().position(|h| h.trim() == *key) {
            Some(i) => key_index.push(i),
            None => {
                log::debug!("Key column {} missing in {}, leaving it unchanged", key, path.display());
                return Ok(0);
            }
        }
    }
    if key_index.is_empty() {
        return Ok(0);
    }

    let mut seen = HashSet::new();
    let mut kept = Vec::new();
    let mut removed = 0usize;
    for record in reader.records() {
        let record = record?;
        let key: Vec<String> = key_index
            .iter()
            .map(|&i| record.get(i).unwrap_or("").to_string())
            .collect();
        if seen.insert(key) {
            kept.push(record);
        } else {
            removed += 1;
        }
    }

    if removed > 0 {
        let mut writer = csv::WriterBuilder::new().flexible(true).from_path(path)?;
        writer.write_record(&headers)?;
        for record in &kept {
            writer.write_record(record)?;
        }
        writer.flush()?;
    }
    Ok(removed)
}
