//! JSON persistence for the data directory.
//!
//! Every state file is replaced atomically: serialize to a sibling
//! temp file, flush, then rename over the target. A failed write never
//! corrupts the previous on-disk state.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::errors::PersistError;

/// Read and deserialize a JSON state file.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, PersistError> {
    let file = File::open(path).map_err(|e| PersistError::io(path.display().to_string(), e))?;
    let reader = BufReader::new(file);
    Ok(serde_json::from_reader(reader)?)
}

/// Serialize `value` and atomically replace `path` with it.
pub fn write_json_atomic<T: ?Sized + Serialize>(path: &Path, value: &T) -> Result<(), PersistError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_bytes_atomic(path, &bytes)
}

/// Atomically replace `path` with `bytes` (write-to-temp + rename).
pub fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<(), PersistError> {
    let tmp = temp_sibling(path);
    let result = (|| -> std::io::Result<()> {
        let file = File::create(&tmp)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(bytes)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        fs::rename(&tmp, path)
    })();
    match result {
        Ok(()) => {
            debug!("persisted {}", path.display());
            Ok(())
        }
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            Err(PersistError::io(path.display().to_string(), e))
        }
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Snapshot the data directory's JSON state files into
/// `backup/<timestamp>/`, then prune to the newest `keep` snapshots.
pub fn backup_state(data_root: &Path, backup_root: &Path, keep: usize) -> Result<PathBuf, PersistError> {
    let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string();
    let target = backup_root.join(&stamp);
    fs::create_dir_all(&target).map_err(|e| PersistError::io(target.display().to_string(), e))?;

    for entry in fs::read_dir(data_root).map_err(|e| PersistError::io(data_root.display().to_string(), e))? {
        let entry = entry.map_err(|e| PersistError::io(data_root.display().to_string(), e))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            let dest = target.join(entry.file_name());
            if let Err(e) = fs::copy(&path, &dest) {
                warn!("backup: failed to copy {}: {e}", path.display());
            }
        }
    }

    prune_backups(backup_root, keep);
    Ok(target)
}

/// Delete all but the newest `keep` snapshot directories.
fn prune_backups(backup_root: &Path, keep: usize) {
    let Ok(entries) = fs::read_dir(backup_root) else {
        return;
    };
    let mut snapshots: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    // Timestamped names sort chronologically.
    snapshots.sort();
    while snapshots.len() > keep {
        let victim = snapshots.remove(0);
        if let Err(e) = fs::remove_dir_all(&victim) {
            warn!("backup: failed to prune {}: {e}", victim.display());
        }
    }
}
