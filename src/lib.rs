//! # tmco - Precompiled Module Containers and Archives
//!
//! `tmco-rs` packages compiled module bytecode so it can be loaded later without
//! recompiling the source:
//!
//! - **Containers**: one module's engine cache plus the runtime versions it was
//!   produced under, behind a `TMCO` magic tag
//! - **Archives**: many containers (or plain files) in a crash-tolerant
//!   key-value store, with a merged index of members
//! - **Loader**: classifies a target as container, source or archive, refuses
//!   bytecode built for a different engine, and caches what it loaded
//!
//! The engine that runs code and produces bytecode is supplied by the caller
//! through the traits in [`runtime`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tmco_rs::{ArchiveOptions, Archiver, Loader, Members, Result};
//! # use tmco_rs::runtime::ScriptEngine;
//!
//! # fn engine() -> Arc<dyn ScriptEngine> { unimplemented!() }
//! # fn main() -> Result<()> {
//! let engine = engine();
//!
//! // Archive two compiled objects
//! let archiver = Archiver::for_engine(engine.as_ref());
//! archiver.archive(
//!     "app.tmca",
//!     Members::new().file("main.js.out").file("util.js.out"),
//!     &ArchiveOptions::default(),
//! )?;
//!
//! // Load every member
//! let loader = Loader::new(engine);
//! let modules = loader.load("app.tmca")?;
//! println!("{} modules", modules.as_archive().map_or(0, |m| m.len()));
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! ```rust,no_run
//! use tmco_rs::{Result, TmcoConfig};
//!
//! # fn main() -> Result<()> {
//! let config = TmcoConfig::from_file("tmco.toml")?;
//! let options = config.archive_options().concurrency(4);
//! # let _ = options;
//! # Ok(())
//! # }
//! ```

// Format internals
pub mod core;

// Re-export core modules internally so crate:: paths in core still work
#[allow(unused_imports)]
pub(crate) use self::core::{
    batch, container, error, index, kv, messages, storage, validation, varint, versions,
};

pub mod archiver;
pub mod compiler;
pub mod config;
pub mod loader;
pub mod runtime;
pub mod unpack;

// Re-export the types most callers need
pub use crate::core::{
    container::{Container, MAGIC},
    error::{Result, TmcoError},
    index::{Index, IndexEntry},
    kv::KvStore,
    messages::{Entry, Options},
    storage::{
        FileStorage, MemoryRegistry, MemoryStorage, RandomAccess, Stat, StorageProvider,
    },
    versions::Versions,
};
pub use archiver::{ArchiveOptions, ArchiveOutcome, Archiver, MemberSource, Members};
pub use compiler::{compile, CompileOptions, CompileOutput, Compiler};
pub use config::TmcoConfig;
pub use loader::{Classification, LoadCache, LoadResult, Loader, LoaderOptions};
pub use unpack::{unpack, unpack_path, UnpackOptions};

use crate::runtime::ScriptEngine;
use std::path::Path;
use std::sync::Arc;

/// Archive `members` into `target`, stamped with the engine's runtime versions
///
/// Shorthand for [`Archiver::for_engine`] followed by [`Archiver::archive`].
pub fn archive<P, M>(
    target: P,
    members: M,
    engine: &dyn ScriptEngine,
    options: &ArchiveOptions,
) -> Result<ArchiveOutcome>
where
    P: AsRef<Path>,
    M: Into<Members>,
{
    Archiver::for_engine(engine).archive(target, members, options)
}

/// Load `target` once with a throwaway loader
///
/// Repeated loads should share a [`Loader`] so its cache applies.
pub fn load<P: AsRef<Path>>(target: P, engine: Arc<dyn ScriptEngine>) -> Result<LoadResult> {
    Loader::new(engine).load(target)
}
