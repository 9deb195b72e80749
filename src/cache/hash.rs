//! Content digests of template and manifest files.
//!
//! A digest is recomputed whenever the file's stamp moves: length and
//! modification time everywhere, plus inode and status-change time on unix.
//! The status-change time cannot be set from user space, so an edit that
//! restores the old mtime (`touch -r`, `rsync -t`) still forces a reread.
//! Elsewhere only length and mtime are compared, and a same-size edit with a
//! restored mtime is served from the old digest until the TTL runs out.

use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::infra::fs::FileProbe;

const SOURCE: &str = "cache::hash";

#[derive(Debug, Clone, PartialEq, Eq)]
struct Stamp {
    len: u64,
    modified: Option<SystemTime>,
    inode: Option<u64>,
    changed: Option<(i64, i64)>,
}

impl Stamp {
    #[cfg(unix)]
    fn of(meta: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;

        Self {
            len: meta.len(),
            modified: meta.modified().ok(),
            inode: Some(meta.ino()),
            changed: Some((meta.ctime(), meta.ctime_nsec())),
        }
    }

    #[cfg(not(unix))]
    fn of(meta: &Metadata) -> Self {
        Self {
            len: meta.len(),
            modified: meta.modified().ok(),
            inode: None,
            changed: None,
        }
    }
}

#[derive(Debug, Clone)]
struct Fingerprint {
    stamp: Stamp,
    digest: String,
}

/// Observed state of a file: its digest and size in bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigest {
    pub digest: String,
    pub size_bytes: u64,
}

pub struct FileHashCache {
    probe: FileProbe,
    fingerprints: DashMap<PathBuf, Fingerprint>,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

impl FileHashCache {
    pub fn new(probe: FileProbe) -> Self {
        Self {
            probe,
            fingerprints: DashMap::new(),
        }
    }

    /// Current digest of `path`. Any I/O failure or timeout yields `None`.
    pub async fn digest(&self, path: &Path) -> Option<FileDigest> {
        let meta = match self.probe.metadata(path).await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return None,
            Err(err) => {
                debug!(target = SOURCE, path = %path.display(), error = %err, "hash metadata failed");
                self.fingerprints.remove(path);
                return None;
            }
        };
        let stamp = Stamp::of(&meta);

        if let Some(known) = self.fingerprints.get(path)
            && known.stamp == stamp
            && stamp.modified.is_some()
        {
            return Some(FileDigest {
                digest: known.digest.clone(),
                size_bytes: stamp.len,
            });
        }

        let bytes = match self.probe.read(path).await {
            Ok(bytes) => bytes,
            Err(err) => {
                debug!(target = SOURCE, path = %path.display(), error = %err, "hash read failed");
                self.fingerprints.remove(path);
                return None;
            }
        };
        let digest = sha256_hex(&bytes);
        let size_bytes = bytes.len() as u64;
        if size_bytes == stamp.len {
            self.fingerprints.insert(
                path.to_path_buf(),
                Fingerprint {
                    stamp,
                    digest: digest.clone(),
                },
            );
        } else {
            self.fingerprints.remove(path);
        }
        Some(FileDigest { digest, size_bytes })
    }

    pub fn forget(&self, path: &Path) {
        self.fingerprints.remove(path);
    }

    pub fn clear(&self) {
        self.fingerprints.clear();
    }

    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn sha256_matches_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn digest_tracks_content_changes() {
        let dir = TempDir::new().expect("tempdir");
        let file = dir.path().join("home.tmpl");
        std::fs::write(&file, "v1").expect("write");

        let cache = FileHashCache::new(FileProbe::default());
        let first = cache.digest(&file).await.expect("digest");
        assert_eq!(first.size_bytes, 2);
        assert_eq!(cache.digest(&file).await, Some(first.clone()));

        std::fs::write(&file, "version two").expect("rewrite");
        let second = cache.digest(&file).await.expect("digest");
        assert_ne!(first.digest, second.digest);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn same_size_edit_with_restored_mtime_is_rehashed() {
        let dir = TempDir::new().expect("tempdir");
        let file = dir.path().join("home.tmpl");
        std::fs::write(&file, "AAAA").expect("write");
        let mtime = std::fs::metadata(&file)
            .and_then(|meta| meta.modified())
            .expect("mtime");

        let cache = FileHashCache::new(FileProbe::default());
        let before = cache.digest(&file).await.expect("digest");

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        std::fs::write(&file, "BBBB").expect("rewrite");
        std::fs::File::options()
            .write(true)
            .open(&file)
            .and_then(|handle| handle.set_modified(mtime))
            .expect("restore mtime");

        let after = cache.digest(&file).await.expect("digest");
        assert_eq!(after.size_bytes, before.size_bytes);
        assert_eq!(after.digest, sha256_hex(b"BBBB"));
    }

    #[tokio::test]
    async fn missing_file_has_no_digest() {
        let dir = TempDir::new().expect("tempdir");
        let cache = FileHashCache::new(FileProbe::default());
        assert!(cache.digest(&dir.path().join("gone.tmpl")).await.is_none());
        assert!(cache.is_empty());
    }
}
