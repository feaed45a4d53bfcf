//! Block addressing
//!
//! Certificates are grouped into blocks by a short id prefix. A block with
//! id `aa1` at structure level 2 lives in `<storage>/aa/aa1/` and its
//! persisted members in `<storage>/aa/aa1/aa1.zip`. Level 0 collapses the
//! whole store into a single block named after the storage directory.

use std::path::{Path, PathBuf};

/// Maps certificate ids to block ids, block directories and archive paths.
#[derive(Debug, Clone)]
pub struct BlockMap {
    storage: PathBuf,
    level: usize,
    /// Block id of the single level-0 block, the storage base name.
    root_block: String,
}

impl BlockMap {
    pub fn new(storage: &Path, level: usize) -> Self {
        let root_block = storage
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "storage".to_string());
        BlockMap { storage: storage.to_path_buf(), level, root_block }
    }

    pub fn storage(&self) -> &Path {
        &self.storage
    }

    pub fn level(&self) -> usize {
        self.level
    }

    /// Block id owning `cert_id`: its first `level + 1` characters, or the
    /// storage base name at level 0.
    pub fn block_id<'a>(&'a self, cert_id: &'a str) -> &'a str {
        if self.level == 0 {
            &self.root_block
        } else {
            prefix(cert_id, self.level + 1)
        }
    }

    /// Directory holding the block of `cert_id` (or of a block id, which is
    /// its own prefix). The directory chain consists of the progressively
    /// longer prefixes of the id, from 2 characters up to `level + 1`.
    pub fn block_dir(&self, cert_or_block_id: &str) -> PathBuf {
        let mut dir = self.storage.clone();
        if self.level == 0 {
            return dir;
        }
        let mut last = "";
        for len in 2..=self.level + 1 {
            let part = prefix(cert_or_block_id, len);
            if part != last {
                dir.push(part);
                last = part;
            }
        }
        dir
    }

    /// Path of the block archive holding `cert_id`.
    pub fn archive_path(&self, cert_or_block_id: &str) -> PathBuf {
        let block_id = if self.level == 0 {
            self.root_block.as_str()
        } else {
            self.block_id(cert_or_block_id)
        };
        self.block_dir(cert_or_block_id).join(format!("{block_id}.zip"))
    }

    /// Path of the temporary file holding a pending insert of `cert_id`.
    pub fn temp_file(&self, cert_id: &str) -> PathBuf {
        self.block_dir(cert_id).join(cert_id)
    }
}

/// Longest prefix of `id` up to `len` characters, on char boundaries.
fn prefix(id: &str, len: usize) -> &str {
    match id.get(..len) {
        Some(p) => p,
        None => id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_two_addressing() {
        let map = BlockMap::new(Path::new("/data/pool"), 2);
        assert_eq!(map.block_id("aa112233"), "aa1");
        assert_eq!(map.block_dir("aa112233"), Path::new("/data/pool/aa/aa1"));
        assert_eq!(map.archive_path("aa112233"), Path::new("/data/pool/aa/aa1/aa1.zip"));
        assert_eq!(map.temp_file("aa112233"), Path::new("/data/pool/aa/aa1/aa112233"));
        // A block id addresses its own block
        assert_eq!(map.block_dir("aa1"), Path::new("/data/pool/aa/aa1"));
        assert_eq!(map.archive_path("aa1"), Path::new("/data/pool/aa/aa1/aa1.zip"));
    }

    #[test]
    fn level_one_addressing() {
        let map = BlockMap::new(Path::new("/data/pool"), 1);
        assert_eq!(map.block_id("aa112233"), "aa");
        assert_eq!(map.archive_path("aa112233"), Path::new("/data/pool/aa/aa.zip"));
    }

    #[test]
    fn level_zero_is_a_single_block() {
        let map = BlockMap::new(Path::new("/data/pool"), 0);
        assert_eq!(map.block_id("aa112233"), "pool");
        assert_eq!(map.block_dir("aa112233"), Path::new("/data/pool"));
        assert_eq!(map.archive_path("aa112233"), Path::new("/data/pool/pool.zip"));
    }

    #[test]
    fn short_ids_do_not_panic() {
        let map = BlockMap::new(Path::new("/data/pool"), 3);
        assert_eq!(map.block_id("ab"), "ab");
        assert_eq!(map.block_dir("ab"), Path::new("/data/pool/ab"));
    }
}
