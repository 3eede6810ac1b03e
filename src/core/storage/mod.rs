//! Random-access byte storage
//!
//! Everything that holds bytes (archive files, in-memory buffers, member
//! sources handed to the archiver) goes through [`RandomAccess`]. A
//! [`StorageProvider`] is either a factory that opens storage by name or a
//! single instance owned by the caller.

pub mod file;
pub mod memory;

use crate::error::Result;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

pub use file::FileStorage;
pub use memory::MemoryStorage;

/// Default permission bits for payloads that carry no filesystem metadata
pub const DEFAULT_MODE: u32 = 0o666;

/// Size and permission bits reported by a storage backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// Current length in bytes
    pub size: u64,

    /// Permission bits, when the backend has them
    pub mode: Option<u32>,
}

impl Stat {
    pub fn mode_or_default(&self) -> u32 {
        self.mode.unwrap_or(DEFAULT_MODE)
    }
}

/// Random-access byte storage
pub trait RandomAccess: Send {
    /// Prepare the backend for I/O. Opening twice is a no-op.
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    /// Query size and permissions
    fn stat(&mut self) -> Result<Stat>;

    /// Read exactly `len` bytes starting at `offset`
    fn read(&mut self, offset: u64, len: u64) -> Result<Vec<u8>>;

    /// Write `data` at `offset`, growing the storage as needed
    fn write(&mut self, offset: u64, data: &[u8]) -> Result<()>;

    /// Flush pending writes and release the backend
    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// Read the whole contents
    fn read_all(&mut self) -> Result<Vec<u8>> {
        let stat = self.stat()?;
        self.read(0, stat.size)
    }
}

impl<T: RandomAccess + ?Sized> RandomAccess for Box<T> {
    fn open(&mut self) -> Result<()> {
        (**self).open()
    }

    fn stat(&mut self) -> Result<Stat> {
        (**self).stat()
    }

    fn read(&mut self, offset: u64, len: u64) -> Result<Vec<u8>> {
        (**self).read(offset, len)
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        (**self).write(offset, data)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Opens storage for a name (a path or a member filename)
pub type StorageFactory = Arc<dyn Fn(&str) -> Result<Box<dyn RandomAccess>> + Send + Sync>;

/// Storage shared with the caller, who keeps ownership and closes it
pub type SharedStorage = Arc<Mutex<Box<dyn RandomAccess>>>;

/// Where archive bytes live when they are not a plain file on disk
#[derive(Clone)]
pub enum StorageProvider {
    /// Opened per name. Storage made by a factory is closed by whoever opened it.
    Factory(StorageFactory),

    /// A single instance supplied by the caller. Never closed by this crate.
    Instance(SharedStorage),
}

impl StorageProvider {
    /// Wrap a factory closure
    pub fn factory<F>(factory: F) -> Self
    where
        F: Fn(&str) -> Result<Box<dyn RandomAccess>> + Send + Sync + 'static,
    {
        StorageProvider::Factory(Arc::new(factory))
    }

    /// Wrap a caller-owned storage instance
    pub fn instance<S: RandomAccess + 'static>(storage: S) -> Self {
        StorageProvider::Instance(Arc::new(Mutex::new(Box::new(storage))))
    }

    /// In-memory factory: every name gets its own buffer, kept in `registry`
    pub fn memory(registry: MemoryRegistry) -> Self {
        StorageProvider::factory(move |name| Ok(Box::new(registry.get_or_create(name))))
    }
}

impl fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageProvider::Factory(_) => f.write_str("StorageProvider::Factory"),
            StorageProvider::Instance(_) => f.write_str("StorageProvider::Instance"),
        }
    }
}

/// Named in-memory buffers shared between a factory and the code that set it up
#[derive(Clone, Default)]
pub struct MemoryRegistry {
    buffers: Arc<Mutex<std::collections::BTreeMap<String, MemoryStorage>>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage for `name`, creating an empty buffer on first use
    pub fn get_or_create(&self, name: &str) -> MemoryStorage {
        self.buffers
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Storage for `name` if anything opened it
    pub fn get(&self, name: &str) -> Option<MemoryStorage> {
        self.buffers.lock().get(name).cloned()
    }

    /// Names opened so far, sorted
    pub fn names(&self) -> Vec<String> {
        self.buffers.lock().keys().cloned().collect()
    }
}

/// Storage handle passed around internally: owned, or borrowed from the caller
pub(crate) enum Handle {
    Owned(Box<dyn RandomAccess>),
    Shared(SharedStorage),
}

impl Handle {
    /// Whether closing this handle is our job
    pub(crate) fn is_owned(&self) -> bool {
        matches!(self, Handle::Owned(_))
    }
}

impl RandomAccess for Handle {
    fn open(&mut self) -> Result<()> {
        match self {
            Handle::Owned(s) => s.open(),
            Handle::Shared(s) => s.lock().open(),
        }
    }

    fn stat(&mut self) -> Result<Stat> {
        match self {
            Handle::Owned(s) => s.stat(),
            Handle::Shared(s) => s.lock().stat(),
        }
    }

    fn read(&mut self, offset: u64, len: u64) -> Result<Vec<u8>> {
        match self {
            Handle::Owned(s) => s.read(offset, len),
            Handle::Shared(s) => s.lock().read(offset, len),
        }
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        match self {
            Handle::Owned(s) => s.write(offset, data),
            Handle::Shared(s) => s.lock().write(offset, data),
        }
    }

    fn close(&mut self) -> Result<()> {
        match self {
            Handle::Owned(s) => s.close(),
            // Caller keeps ownership of shared storage
            Handle::Shared(_) => Ok(()),
        }
    }
}
