//! Backup rotation.
//!
//! Backups are plain copies of the persisted map file under a timestamped
//! name. Rotation prunes oldest-first until both the count and total-size
//! limits hold, logging every deletion (they are irreversible). All failures
//! here are logged-and-retried by the callers' timers, never fatal.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result, bail};

use crate::persistence::unix_now;

/// Copy the persisted map file into `backup_dir` under a timestamped name.
/// The map must have been saved first; backing up an unsaved world is the
/// caller's bug, surfaced as an error.
pub fn backup_map(map_path: &Path, backup_dir: &Path, world_name: &str) -> Result<PathBuf> {
    if !map_path.exists() {
        bail!("cannot back up {}: map file does not exist", map_path.display());
    }
    fs::create_dir_all(backup_dir)
        .with_context(|| format!("creating backup directory {}", backup_dir.display()))?;

    let stamp = unix_now();
    let mut target = backup_dir.join(format!("{world_name}_{stamp}.ocw"));
    // Two backups within the same second get a disambiguating suffix.
    let mut n = 1;
    while target.exists() {
        target = backup_dir.join(format!("{world_name}_{stamp}_{n}.ocw"));
        n += 1;
    }

    fs::copy(map_path, &target)
        .with_context(|| format!("copying {} to {}", map_path.display(), target.display()))?;
    tracing::info!("Backup written: {}", target.display());
    Ok(target)
}

/// One backup file with the timestamps needed for rotation.
struct BackupFile {
    path: PathBuf,
    created: SystemTime,
    size: u64,
}

/// Delete the oldest backups of `world_name` until the directory is under
/// both limits. Returns the number deleted. Deletion stops the moment both
/// limits hold; `None` means no limit of that kind.
pub fn prune_backups(
    backup_dir: &Path,
    world_name: &str,
    max_count: Option<usize>,
    max_total_bytes: Option<u64>,
) -> Result<usize> {
    if max_count.is_none() && max_total_bytes.is_none() {
        return Ok(0);
    }
    if !backup_dir.is_dir() {
        return Ok(0);
    }

    let prefix = format!("{world_name}_");
    let mut backups: Vec<BackupFile> = Vec::new();
    for entry in fs::read_dir(backup_dir)
        .with_context(|| format!("listing {}", backup_dir.display()))?
    {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(&prefix) || !name.ends_with(".ocw") {
            continue;
        }
        let meta = entry.metadata()?;
        backups.push(BackupFile {
            path: entry.path(),
            created: meta.created().or_else(|_| meta.modified()).unwrap_or(SystemTime::UNIX_EPOCH),
            size: meta.len(),
        });
    }

    // Oldest first.
    backups.sort_by_key(|b| b.created);

    let mut count = backups.len();
    let mut total: u64 = backups.iter().map(|b| b.size).sum();
    let mut deleted = 0;

    for backup in &backups {
        let over_count = max_count.is_some_and(|max| count > max);
        let over_size = max_total_bytes.is_some_and(|max| total > max);
        if !over_count && !over_size {
            break;
        }
        match fs::remove_file(&backup.path) {
            Ok(()) => {
                tracing::warn!("Backup rotation deleted {}", backup.path.display());
                count -= 1;
                total -= backup.size;
                deleted += 1;
            }
            Err(e) => {
                // Skip and keep pruning; this file retries next rotation.
                tracing::error!("Failed to delete backup {}: {}", backup.path.display(), e);
            }
        }
    }
    Ok(deleted)
}
