//! Filesystem helpers

use std::io;
use std::path::Path;

/// Recursively remove empty directories below `root`.
///
/// `root` itself is never removed. Directories that become empty because all
/// of their children were pruned are removed as well.
pub fn remove_empty_dirs(root: &Path) -> io::Result<()> {
    for entry in std::fs::read_dir(root)? {
        let path = entry?.path();
        if path.is_dir() {
            prune(&path)?;
        }
    }
    Ok(())
}

fn prune(dir: &Path) -> io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            prune(&path)?;
        }
    }
    // Re-read: children may have been pruned above
    if std::fs::read_dir(dir)?.next().is_none() {
        tracing::debug!("Pruning empty directory {:?}", dir);
        std::fs::remove_dir(dir)?;
    }
    Ok(())
}
