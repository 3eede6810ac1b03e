//! Archive writer
//!
//! Writes a set of members into a key-value store: the runtime versions
//! under `"versions"`, each member's payload under its normalized filename,
//! and finally the merged index under `"index"`.

use crate::core::batch;
use crate::core::index::Index;
use crate::core::kv::KvStore;
use crate::core::messages::Entry;
use crate::core::storage::{FileStorage, RandomAccess, StorageProvider, DEFAULT_MODE};
use crate::core::validation::normalize_member_name;
use crate::core::versions::Versions;
use crate::error::{Result, TmcoError};
use crate::runtime::ScriptEngine;
use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Key holding the versions record
pub const VERSIONS_KEY: &str = "versions";

/// Key holding the archive index
pub const INDEX_KEY: &str = "index";

/// Where a member's bytes come from
pub enum MemberSource {
    /// Bytes already in memory (raw file contents or a container)
    Bytes(Vec<u8>),

    /// Storage to read the payload from; closed once read
    Storage(Box<dyn RandomAccess>),

    /// Read from the filesystem at the member's own name
    File,
}

impl std::fmt::Debug for MemberSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemberSource::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            MemberSource::Storage(_) => f.write_str("Storage"),
            MemberSource::File => f.write_str("File"),
        }
    }
}

/// Ordered set of members to archive
///
/// Built from filenames, `(filename, bytes)` pairs or a filename → bytes map,
/// or assembled one member at a time.
#[derive(Debug, Default)]
pub struct Members {
    items: Vec<(String, MemberSource)>,
}

impl Members {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, name: impl Into<String>, source: MemberSource) -> Self {
        self.items.push((name.into(), source));
        self
    }

    pub fn bytes(self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.add(name, MemberSource::Bytes(bytes.into()))
    }

    pub fn storage<S: RandomAccess + 'static>(self, name: impl Into<String>, storage: S) -> Self {
        self.add(name, MemberSource::Storage(Box::new(storage)))
    }

    pub fn file(self, name: impl Into<String>) -> Self {
        self.add(name, MemberSource::File)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl From<Vec<String>> for Members {
    fn from(names: Vec<String>) -> Self {
        names.into_iter().fold(Members::new(), Members::file)
    }
}

impl From<Vec<&str>> for Members {
    fn from(names: Vec<&str>) -> Self {
        names.into_iter().fold(Members::new(), Members::file)
    }
}

impl From<Vec<(String, Vec<u8>)>> for Members {
    fn from(pairs: Vec<(String, Vec<u8>)>) -> Self {
        pairs
            .into_iter()
            .fold(Members::new(), |m, (name, bytes)| m.bytes(name, bytes))
    }
}

impl From<BTreeMap<String, Vec<u8>>> for Members {
    fn from(map: BTreeMap<String, Vec<u8>>) -> Self {
        map.into_iter()
            .fold(Members::new(), |m, (name, bytes)| m.bytes(name, bytes))
    }
}

impl From<HashMap<String, Vec<u8>>> for Members {
    fn from(map: HashMap<String, Vec<u8>>) -> Self {
        map.into_iter()
            .fold(Members::new(), |m, (name, bytes)| m.bytes(name, bytes))
    }
}

impl FromIterator<(String, MemberSource)> for Members {
    fn from_iter<I: IntoIterator<Item = (String, MemberSource)>>(iter: I) -> Self {
        Members {
            items: iter.into_iter().collect(),
        }
    }
}

/// Archive options
#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    /// External storage for the archive instead of a file at the target path
    pub storage: Option<StorageProvider>,

    /// Remove an existing archive file first (ignored with external storage)
    pub truncate: bool,

    /// Maximum member writes in flight (`None` = unbounded)
    pub concurrency: Option<NonZeroUsize>,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        ArchiveOptions {
            storage: None,
            truncate: true,
            concurrency: None,
        }
    }
}

impl ArchiveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn storage(mut self, storage: StorageProvider) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = NonZeroUsize::new(concurrency);
        self
    }
}

/// Result of a successful archive run
#[derive(Debug, Clone)]
pub struct ArchiveOutcome {
    /// Index as written, including members kept from earlier runs
    pub index: Index,

    /// Members written by this run
    pub written: usize,
}

/// Payload normalized for the write pipeline
enum Payload {
    Bytes(Vec<u8>),
    Source(Box<dyn RandomAccess>),
}

struct Member {
    key: String,
    origin: PathBuf,
    payload: Payload,
}

/// Writes members into archives
pub struct Archiver {
    versions: Versions,
}

impl Archiver {
    /// Archiver stamping archives with `versions`
    pub fn new(versions: Versions) -> Self {
        Archiver { versions }
    }

    /// Archiver stamping archives with the engine's runtime versions
    pub fn for_engine(engine: &dyn ScriptEngine) -> Self {
        Self::new(engine.versions())
    }

    pub fn versions(&self) -> &Versions {
        &self.versions
    }

    /// Archive `members` into `target`
    ///
    /// A failure aborts the run and leaves earlier writes in place; the index
    /// is written last, so it only ever names members that were stored.
    pub fn archive<P, M>(
        &self,
        target: P,
        members: M,
        options: &ArchiveOptions,
    ) -> Result<ArchiveOutcome>
    where
        P: AsRef<Path>,
        M: Into<Members>,
    {
        let target = target.as_ref();
        let members = normalize(members.into())?;
        info!(
            "Archiving {} members into {}",
            members.len(),
            target.display()
        );

        if options.storage.is_none() && options.truncate {
            remove_existing(target)?;
        }

        let store = match &options.storage {
            Some(provider) => KvStore::from_provider(provider, &target.to_string_lossy())?,
            None => KvStore::open_path(target)?,
        };
        let preserve_metadata = options.storage.is_none();

        let result = self.write(&store, members, preserve_metadata, options.concurrency);
        let closed = store.close();
        let outcome = result?;
        closed?;

        info!(
            "Archived {} members ({} in index) into {}",
            outcome.written,
            outcome.index.size,
            target.display()
        );
        Ok(outcome)
    }

    fn write(
        &self,
        store: &KvStore,
        members: Vec<Member>,
        preserve_metadata: bool,
        concurrency: Option<NonZeroUsize>,
    ) -> Result<ArchiveOutcome> {
        store.put(VERSIONS_KEY, &self.versions.encode()?)?;

        let previous = match store.get(INDEX_KEY)? {
            Some(bytes) => Some(Index::decode(&bytes).map_err(|e| {
                TmcoError::InvalidArchive(format!("existing index is unreadable: {}", e))
            })?),
            None => None,
        };
        let index = Index::build(members.iter().map(|m| m.key.clone()), previous.as_ref());

        let written = members.len();
        batch::run(members, concurrency, |member| {
            write_member(store, member, preserve_metadata)
        })?;

        store.put(INDEX_KEY, &index.encode()?)?;

        Ok(ArchiveOutcome { index, written })
    }
}

/// Normalize names and sources; a later duplicate replaces an earlier one
fn normalize(members: Members) -> Result<Vec<Member>> {
    let mut out: Vec<Member> = Vec::with_capacity(members.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for (name, source) in members.items {
        let key = normalize_member_name(&name)?;
        let origin = PathBuf::from(&name);
        let payload = match source {
            MemberSource::Bytes(bytes) => Payload::Bytes(bytes),
            MemberSource::Storage(storage) => Payload::Source(storage),
            MemberSource::File => Payload::Source(Box::new(FileStorage::open_read(&origin))),
        };

        let member = Member {
            key: key.clone(),
            origin,
            payload,
        };
        match positions.get(&key) {
            Some(&pos) => out[pos] = member,
            None => {
                positions.insert(key, out.len());
                out.push(member);
            }
        }
    }

    Ok(out)
}

fn remove_existing(target: &Path) -> Result<()> {
    match std::fs::symlink_metadata(target) {
        Ok(metadata) if metadata.is_dir() => {
            debug!("Removing existing directory {}", target.display());
            std::fs::remove_dir_all(target)?;
        }
        Ok(_) => {
            debug!("Removing existing archive {}", target.display());
            std::fs::remove_file(target)?;
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }
    Ok(())
}

fn write_member(store: &KvStore, member: Member, preserve_metadata: bool) -> Result<()> {
    let (buffer, mode) = match member.payload {
        Payload::Bytes(buffer) => {
            let mode = if preserve_metadata {
                file_mode(&member.origin)
            } else {
                DEFAULT_MODE
            };
            (buffer, mode)
        }
        Payload::Source(mut source) => {
            source.open()?;
            let stat = source.stat()?;
            let buffer = source.read(0, stat.size)?;
            source.close()?;
            (buffer, stat.mode_or_default())
        }
    };

    debug!(
        "Writing member {} ({} bytes, mode {:o})",
        member.key,
        buffer.len(),
        mode
    );

    if preserve_metadata {
        let entry = Entry::new(mode, buffer);
        store.put(&member.key, &entry.encode()?)
    } else {
        store.put(&member.key, &buffer)
    }
}

/// Permission bits of the file a member was named after, if it exists
fn file_mode(path: &Path) -> u32 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = std::fs::metadata(path) {
            return metadata.permissions().mode();
        }
    }
    #[cfg(not(unix))]
    let _ = path;

    DEFAULT_MODE
}
