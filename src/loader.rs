//! Module loader
//!
//! Resolves a path (on disk or in supplied storage) into runnable code:
//!
//! ```text
//! resolve path ──► cache hit? ──yes──► cached result
//!                      │ no
//!                      ▼
//!               read all bytes
//!                      │
//!                      ▼
//!   classify: "TMCO" magic ─────────► Container ─► version gate ─► run cached bytecode
//!             text that parses ─────► Source ────► wrap ─► run
//!             anything else ────────► Archive ───► index ─► resolve every member
//! ```
//!
//! Results are cached per resolved path for the lifetime of the loader.

use crate::archiver::{INDEX_KEY, VERSIONS_KEY};
use crate::core::batch;
use crate::core::container::Container;
use crate::core::index::Index;
use crate::core::kv::KvStore;
use crate::core::messages::Entry;
use crate::core::storage::{FileStorage, Handle, RandomAccess, StorageProvider};
use crate::core::validation::resolve_path;
use crate::core::versions::Versions;
use crate::error::{Result, TmcoError};
use crate::runtime::{Exports, ModuleContext, Script, ScriptEngine, ScriptError};
use ahash::AHashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a loaded target resolved to
#[derive(Debug, Clone)]
pub enum LoadResult {
    /// Exports of a single container or source module
    Module(Exports),

    /// Exports of every archive member, keyed by member filename
    Archive(HashMap<String, Exports>),
}

impl LoadResult {
    pub fn as_module(&self) -> Option<&Exports> {
        match self {
            LoadResult::Module(exports) => Some(exports),
            LoadResult::Archive(_) => None,
        }
    }

    pub fn as_archive(&self) -> Option<&HashMap<String, Exports>> {
        match self {
            LoadResult::Archive(members) => Some(members),
            LoadResult::Module(_) => None,
        }
    }

    pub fn is_archive(&self) -> bool {
        matches!(self, LoadResult::Archive(_))
    }
}

/// How a buffer will be loaded, decided before anything runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification<'a> {
    /// Starts with the container magic
    Container,

    /// UTF-8 text that parses as a program body
    Source(&'a str),

    /// Everything else; `syntax_error` is set when the bytes were text that
    /// failed to parse, so it can be reported if they turn out not to be an
    /// archive either
    Archive { syntax_error: Option<String> },
}

/// Classify `bytes` by their head, then by whether they parse
pub fn classify<'a>(bytes: &'a [u8], engine: &dyn ScriptEngine, filename: &str) -> Classification<'a> {
    if Container::is_container(bytes) {
        return Classification::Container;
    }

    let Ok(text) = std::str::from_utf8(bytes) else {
        return Classification::Archive { syntax_error: None };
    };

    match engine.check_syntax(text, filename) {
        Ok(()) => Classification::Source(text),
        Err(ScriptError::Syntax(message)) => Classification::Archive {
            syntax_error: Some(message),
        },
        Err(other) => Classification::Archive {
            syntax_error: Some(other.to_string()),
        },
    }
}

/// Results of completed loads, keyed by resolved path
///
/// Only ever grows; an entry is added after its load fully succeeds.
#[derive(Default)]
pub struct LoadCache {
    entries: RwLock<AHashMap<PathBuf, LoadResult>>,
}

impl LoadCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Option<LoadResult> {
        self.entries.read().get(path).cloned()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.read().contains_key(path)
    }

    /// Insert `result` unless another load of `path` finished first; returns the cached value
    pub fn insert(&self, path: PathBuf, result: LoadResult) -> LoadResult {
        self.entries.write().entry(path).or_insert(result).clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Loader options
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    /// Base for relative target paths
    pub cwd: PathBuf,

    /// Maximum archive members resolved at once (`None` = unbounded)
    pub concurrency: Option<NonZeroUsize>,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        LoaderOptions {
            cwd: std::env::current_dir().unwrap_or_default(),
            concurrency: None,
        }
    }
}

impl LoaderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = NonZeroUsize::new(concurrency);
        self
    }
}

/// Loads containers, sources and archives through a script engine
pub struct Loader {
    engine: Arc<dyn ScriptEngine>,
    options: LoaderOptions,
    cache: LoadCache,
}

impl Loader {
    pub fn new(engine: Arc<dyn ScriptEngine>) -> Self {
        Self::with_options(engine, LoaderOptions::default())
    }

    pub fn with_options(engine: Arc<dyn ScriptEngine>, options: LoaderOptions) -> Self {
        Loader {
            engine,
            options,
            cache: LoadCache::new(),
        }
    }

    pub fn cache(&self) -> &LoadCache {
        &self.cache
    }

    pub fn options(&self) -> &LoaderOptions {
        &self.options
    }

    /// Load the file at `path`
    pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<LoadResult> {
        self.load_target(path.as_ref(), None)
    }

    /// Load `path` from supplied storage instead of the filesystem
    ///
    /// The path still names the module (and keys the cache); factories are
    /// called with the resolved path.
    pub fn load_from<P: AsRef<Path>>(&self, path: P, storage: &StorageProvider) -> Result<LoadResult> {
        self.load_target(path.as_ref(), Some(storage))
    }

    fn load_target(&self, path: &Path, storage: Option<&StorageProvider>) -> Result<LoadResult> {
        let resolved = resolve_path(&self.options.cwd, path);
        if let Some(cached) = self.cache.get(&resolved) {
            debug!("Load cache hit for {}", resolved.display());
            return Ok(cached);
        }

        info!("Loading {}", resolved.display());
        let bytes = read_target(&resolved, storage)?;
        let result = self.resolve_bytes(&bytes, &resolved)?;

        Ok(self.cache.insert(resolved, result))
    }

    fn resolve_bytes(&self, bytes: &[u8], filename: &Path) -> Result<LoadResult> {
        let name = filename.to_string_lossy();
        match classify(bytes, self.engine.as_ref(), &name) {
            Classification::Container => {
                Ok(LoadResult::Module(self.run_container(bytes, filename)?))
            }
            Classification::Source(text) => Ok(LoadResult::Module(self.run_source(text, filename)?)),
            Classification::Archive { syntax_error } => {
                Ok(LoadResult::Archive(self.load_archive(bytes, filename, syntax_error)?))
            }
        }
    }

    fn run_container(&self, bytes: &[u8], filename: &Path) -> Result<Exports> {
        let container = Container::decode(bytes)?;
        let running = self.engine.versions();
        let component = self.engine.engine_component();
        container.versions.check_compatible(&running, component)?;

        let placeholder = container.placeholder()?;
        let name = filename.to_string_lossy();
        let script = Script {
            source: &placeholder,
            filename: &name,
            cached_data: Some(&container.cache),
        };

        let mut context = ModuleContext::new(filename);
        self.engine
            .execute(script, &mut context)
            .map_err(|err| match err {
                ScriptError::CacheRejected(reason) => {
                    warn!("Engine rejected cache for {}: {}", name, reason);
                    TmcoError::IncompatibleCache {
                        component: component.to_string(),
                        expected: running.get(component).unwrap_or("<unknown>").to_string(),
                        found: container
                            .versions
                            .get(component)
                            .unwrap_or("<missing>")
                            .to_string(),
                    }
                }
                other => script_error(other, &name),
            })?;
        context.loaded = true;

        debug!("Initialized container {}", name);
        Ok(context.into_exports())
    }

    fn run_source(&self, text: &str, filename: &Path) -> Result<Exports> {
        let wrapped = self.engine.wrap(text);
        let name = filename.to_string_lossy();
        let script = Script {
            source: &wrapped,
            filename: &name,
            cached_data: None,
        };

        let mut context = ModuleContext::new(filename);
        self.engine
            .execute(script, &mut context)
            .map_err(|err| script_error(err, &name))?;
        context.loaded = true;

        debug!("Initialized source module {}", name);
        Ok(context.into_exports())
    }

    fn load_archive(
        &self,
        bytes: &[u8],
        filename: &Path,
        syntax_error: Option<String>,
    ) -> Result<HashMap<String, Exports>> {
        let store = KvStore::from_bytes(bytes)?;
        let name = filename.to_string_lossy();

        let Some(index) = store.get(INDEX_KEY)? else {
            return Err(match syntax_error {
                Some(message) => TmcoError::Syntax {
                    filename: name.to_string(),
                    message,
                },
                None => TmcoError::InvalidArchive(format!("{} has no index", name)),
            });
        };
        let index = Index::decode(&index)
            .map_err(|e| TmcoError::InvalidArchive(format!("{}: unreadable index: {}", name, e)))?;

        self.log_archive_versions(&store, &name);
        info!("Loading {} archive members from {}", index.size, name);

        let root = filename.parent().map(Path::to_path_buf).unwrap_or_default();
        let loaded = batch::run(index.entries, self.options.concurrency, |entry| {
            let value = store.get(&entry.filename)?.ok_or_else(|| {
                TmcoError::InvalidArchive(format!(
                    "{}: member {} is indexed but not stored",
                    name, entry.filename
                ))
            })?;
            let (payload, _mode) = Entry::unwrap_payload(value);
            let member_path = resolve_path(&root, Path::new(&entry.filename));
            let exports = self.resolve_member(&payload, &member_path)?;
            Ok((entry.filename, exports))
        })?;

        Ok(loaded.into_iter().collect())
    }

    fn resolve_member(&self, payload: &[u8], filename: &Path) -> Result<Exports> {
        let name = filename.to_string_lossy();
        match classify(payload, self.engine.as_ref(), &name) {
            Classification::Container => self.run_container(payload, filename),
            Classification::Source(text) => self.run_source(text, filename),
            Classification::Archive {
                syntax_error: Some(message),
            } => Err(TmcoError::Syntax {
                filename: name.to_string(),
                message,
            }),
            Classification::Archive { syntax_error: None } => Err(TmcoError::InvalidArchive(
                format!("{}: nested archives are not supported", name),
            )),
        }
    }

    fn log_archive_versions(&self, store: &KvStore, name: &str) {
        let recorded = match store.get(VERSIONS_KEY) {
            Ok(Some(bytes)) => Versions::decode(&bytes).ok(),
            _ => None,
        };

        match recorded {
            Some(recorded) if recorded != self.engine.versions() => {
                warn!(
                    "Archive {} was written under different runtime versions",
                    name
                );
            }
            Some(_) => {}
            None => debug!("Archive {} has no readable versions record", name),
        }
    }
}

fn read_target(resolved: &Path, storage: Option<&StorageProvider>) -> Result<Vec<u8>> {
    let mut handle = match storage {
        None => Handle::Owned(Box::new(FileStorage::open_read(resolved))),
        Some(StorageProvider::Factory(factory)) => {
            Handle::Owned(factory(&resolved.to_string_lossy())?)
        }
        Some(StorageProvider::Instance(shared)) => Handle::Shared(shared.clone()),
    };

    handle.open()?;
    let read = handle.read_all();
    let closed = handle.close();
    let bytes = read?;
    closed?;

    Ok(bytes)
}

fn script_error(err: ScriptError, filename: &str) -> TmcoError {
    match err {
        ScriptError::Syntax(message) => TmcoError::Syntax {
            filename: filename.to_string(),
            message,
        },
        ScriptError::Thrown(message) | ScriptError::CacheRejected(message) => {
            TmcoError::Execution {
                filename: filename.to_string(),
                message,
            }
        }
    }
}
