//! Content-addressed object store for one repository.
//!
//! Objects live under the git-lfs standard layout:
//! `<root>/objects/<oid[0:2]>/<oid[2:4]>/<oid>`
//!
//! Uploads are staged in `<root>/tmp/` and published with a single
//! rename, so a reader sees either no object or the complete object.

use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::{Error, Oid, Result};

const OBJECTS_DIR: &str = "objects";
const TMP_DIR: &str = "tmp";

/// Object store rooted at a repository's LFS directory.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    root: PathBuf,
    verify_content: bool,
}

impl ObjectStore {
    /// Create a store rooted at `root`. Nothing is created on disk yet.
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        ObjectStore {
            root: root.as_ref().to_path_buf(),
            verify_content: false,
        }
    }

    /// Open the store for `repo` under the server's project root.
    ///
    /// The store root is `<project_root>/<repo>/lfs`.
    pub fn for_repo<P: AsRef<Path>>(project_root: P, repo: &str) -> Result<Self> {
        Self::validate_repo(repo)?;
        Ok(Self::new(project_root.as_ref().join(repo).join("lfs")))
    }

    /// Require uploaded content to hash (SHA256) to its OID.
    pub fn verify_content(mut self, verify: bool) -> Self {
        self.verify_content = verify;
        self
    }

    /// Root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding in-flight uploads.
    pub fn staging_dir(&self) -> PathBuf {
        self.root.join(TMP_DIR)
    }

    /// Get the path where an object with the given OID is stored.
    ///
    /// Fails with [`Error::InvalidOid`] before touching the filesystem.
    /// The path is not guaranteed to exist.
    pub fn object_path(&self, oid: &str) -> Result<PathBuf> {
        let oid = Oid::parse(oid)?;
        Ok(self.path_for(&oid))
    }

    fn path_for(&self, oid: &Oid) -> PathBuf {
        let (first, second) = oid.shards();
        let mut path = self.root.join(OBJECTS_DIR);
        for shard in [first, second] {
            if !shard.is_empty() {
                path.push(shard);
            }
        }
        path.push(oid.as_str());
        path
    }

    /// Check if a regular file exists for the object.
    pub fn contains(&self, oid: &str) -> Result<bool> {
        Ok(self.object_path(oid)?.is_file())
    }

    /// Size of a stored object in bytes.
    pub fn size(&self, oid: &str) -> Result<u64> {
        let path = self.object_path(oid)?;
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Ok(meta.len()),
            Ok(_) => Err(Error::NotFound(oid.to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::NotFound(oid.to_string())),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Open a stored object for streaming read.
    pub fn open(&self, oid: &str) -> Result<File> {
        let path = self.object_path(oid)?;
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::NotFound(oid.to_string()))
            }
            Err(e) => return Err(Error::Io(e)),
        };

        if !file.metadata()?.is_file() {
            return Err(Error::NotFound(oid.to_string()));
        }
        Ok(file)
    }

    /// Create a writer for storing an object.
    ///
    /// Creates the store root, the staging directory and both shard
    /// directories (all idempotent), then a uniquely named staging file.
    /// The object only becomes visible once [`StagedObject::commit`]
    /// succeeds.
    pub fn writer(&self, oid: &str) -> Result<StagedObject> {
        let oid = Oid::parse(oid)?;
        let final_path = self.path_for(&oid);

        let staging = self.staging_dir();
        fs::create_dir_all(&staging)?;
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = tempfile::Builder::new()
            .prefix("incoming-")
            .tempfile_in(&staging)?;
        tracing::debug!(oid = %oid, staging = %file.path().display(), "staging object");

        Ok(StagedObject {
            file,
            final_path,
            hasher: self.verify_content.then(Sha256::new),
            written: 0,
            oid,
        })
    }

    /// Stream an object from `reader` into the store.
    ///
    /// Returns the number of bytes stored.
    pub fn put<R: Read>(&self, oid: &str, mut reader: R) -> Result<u64> {
        let mut writer = self.writer(oid)?;
        io::copy(&mut reader, &mut writer)?;
        writer.commit()
    }

    /// Reject repository names that would leave the project root.
    pub fn validate_repo(repo: &str) -> Result<()> {
        if repo.is_empty()
            || repo == "."
            || repo == ".."
            || repo.contains(crate::oid::FORBIDDEN)
        {
            return Err(Error::InvalidRepo(repo.to_string()));
        }
        Ok(())
    }
}

/// Writer for streaming an upload into the store.
///
/// Dropping it without calling [`commit`](StagedObject::commit) discards the
/// staging file, so an interrupted upload never reaches the object path.
pub struct StagedObject {
    file: NamedTempFile,
    final_path: PathBuf,
    hasher: Option<Sha256>,
    written: u64,
    oid: Oid,
}

impl StagedObject {
    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Path of the staging file.
    pub fn staging_path(&self) -> &Path {
        self.file.path()
    }

    /// Finish writing and atomically move to the final location.
    ///
    /// Returns the size of the published object.
    pub fn commit(mut self) -> Result<u64> {
        self.file.flush()?;
        self.file.as_file().sync_all()?;

        if let Some(hasher) = self.hasher.take() {
            let actual = hex::encode(hasher.finalize());
            if actual != self.oid.as_str() {
                return Err(Error::HashMismatch {
                    oid: self.oid.to_string(),
                    actual,
                });
            }
        }

        self.file
            .persist(&self.final_path)
            .map_err(|e| Error::Io(e.error))?;

        tracing::info!(oid = %self.oid, size = self.written, "object stored");
        Ok(self.written)
    }
}

impl Write for StagedObject {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        if let Some(hasher) = self.hasher.as_mut() {
            hasher.update(&buf[..n]);
        }
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}
