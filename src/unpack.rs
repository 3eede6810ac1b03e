//! Archive extraction
//!
//! Writes every indexed member back out, to a directory tree or to storage
//! opened per member name. Entry-wrapped members get their permission bits
//! restored on Unix.

use crate::archiver::INDEX_KEY;
use crate::core::batch;
use crate::core::index::{Index, IndexEntry};
use crate::core::kv::KvStore;
use crate::core::messages::Entry;
use crate::core::storage::{FileStorage, RandomAccess, StorageFactory};
use crate::core::validation::safe_join;
use crate::error::{Result, TmcoError};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Unpack options
#[derive(Clone, Default)]
pub struct UnpackOptions {
    /// Directory members are written under (defaults to the current directory)
    pub output: Option<PathBuf>,

    /// Open storage per member name instead of writing files
    pub storage: Option<StorageFactory>,

    /// Maximum members written at once (`None` = unbounded)
    pub concurrency: Option<NonZeroUsize>,
}

impl UnpackOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn storage<F>(mut self, factory: F) -> Self
    where
        F: Fn(&str) -> Result<Box<dyn RandomAccess>> + Send + Sync + 'static,
    {
        self.storage = Some(std::sync::Arc::new(factory));
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = NonZeroUsize::new(concurrency);
        self
    }
}

/// Unpack the archive file at `path`
pub fn unpack_path<P: AsRef<Path>>(path: P, options: &UnpackOptions) -> Result<Vec<IndexEntry>> {
    let store = KvStore::with_storage(Box::new(FileStorage::open_read(path.as_ref())))?;
    let unpacked = unpack(&store, options);
    store.close()?;
    unpacked
}

/// Unpack every member of `store`, returning the index entries
///
/// An archive with no index unpacks to nothing.
pub fn unpack(store: &KvStore, options: &UnpackOptions) -> Result<Vec<IndexEntry>> {
    let Some(index) = store.get(INDEX_KEY)? else {
        debug!("No index, nothing to unpack");
        return Ok(Vec::new());
    };
    let index = Index::decode(&index)
        .map_err(|e| TmcoError::InvalidArchive(format!("unreadable index: {}", e)))?;

    let root = match &options.output {
        Some(output) => output.clone(),
        None => std::env::current_dir()?,
    };
    info!("Unpacking {} members", index.size);

    let entries: Vec<&IndexEntry> = index.entries.iter().collect();
    batch::run(entries, options.concurrency, |entry| {
        let value = store.get(&entry.filename)?.ok_or_else(|| {
            TmcoError::InvalidArchive(format!("member {} is indexed but not stored", entry.filename))
        })?;
        let (payload, mode) = Entry::unwrap_payload(value);

        match &options.storage {
            Some(factory) => {
                let mut out = factory(&entry.filename)?;
                out.open()?;
                let written = out.write(0, &payload);
                let closed = out.close();
                written?;
                closed
            }
            None => write_file(&safe_join(&root, &entry.filename)?, &payload, mode),
        }
    })?;

    Ok(index.entries)
}

fn write_file(path: &Path, payload: &[u8], mode: Option<u32>) -> Result<()> {
    debug!("Unpacking {} ({} bytes)", path.display(), payload.len());

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, payload)?;

    if let Some(mode) = mode {
        restore_mode(path, mode)?;
    }

    Ok(())
}

#[cfg(unix)]
fn restore_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode & 0o7777))?;
    Ok(())
}

#[cfg(not(unix))]
fn restore_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
