//! Collaborators that turn source into runnable code
//!
//! This crate owns the container and archive formats; the engine that runs
//! code, the backend that produces its bytecode cache, and the bundler that
//! produces a single-file program body all plug in through these traits.

use crate::core::versions::Versions;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Exports of an initialized module, shared by every cached load
pub type Exports = Arc<Value>;

/// Error raised by an engine while parsing or running a script
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    /// The source does not parse
    Syntax(String),

    /// The engine refused the supplied cache data
    CacheRejected(String),

    /// Module code threw while initializing
    Thrown(String),
}

impl std::fmt::Display for ScriptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScriptError::Syntax(msg) => write!(f, "syntax error: {}", msg),
            ScriptError::CacheRejected(msg) => write!(f, "cache rejected: {}", msg),
            ScriptError::Thrown(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ScriptError {}

/// A script ready to be instantiated by an engine
#[derive(Debug, Clone, Copy)]
pub struct Script<'a> {
    /// Source text; a length-matched placeholder when `cached_data` is set
    pub source: &'a str,

    /// Display filename for diagnostics
    pub filename: &'a str,

    /// Precompiled bytecode to attach instead of compiling `source`
    pub cached_data: Option<&'a [u8]>,
}

/// Module state handed to a module initializer
///
/// Mirrors the five values an initializer is called with: `exports`,
/// `require`, `module`, `filename` and `dirname`.
#[derive(Debug, Clone)]
pub struct ModuleContext {
    pub filename: PathBuf,
    pub dirname: PathBuf,

    /// Directories searched when the module requires another module
    pub module_paths: Vec<PathBuf>,

    pub exports: Map<String, Value>,

    /// Set once the initializer returns
    pub loaded: bool,
}

impl ModuleContext {
    /// Fresh context for a module at `filename`
    pub fn new(filename: &Path) -> Self {
        let dirname = filename
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        ModuleContext {
            filename: filename.to_path_buf(),
            module_paths: vec![dirname.join("node_modules")],
            dirname,
            exports: Map::new(),
            loaded: false,
        }
    }

    /// Resolve a `require` request the way the module would see it
    ///
    /// Relative requests resolve against `dirname`; bare names are looked up
    /// in `module_paths`, first hit on disk wins.
    pub fn resolve(&self, request: &str) -> Option<PathBuf> {
        if request.starts_with("./") || request.starts_with("../") {
            return Some(crate::core::validation::resolve_path(
                &self.dirname,
                Path::new(request),
            ));
        }

        self.module_paths
            .iter()
            .map(|dir| dir.join(request))
            .find(|candidate| candidate.exists())
    }

    /// Freeze the exports into a shareable value
    pub fn into_exports(self) -> Exports {
        Arc::new(Value::Object(self.exports))
    }
}

/// Engine that parses and runs module code
pub trait ScriptEngine: Send + Sync {
    /// Versions of the running runtime components
    fn versions(&self) -> Versions;

    /// Component in [`versions`](Self::versions) that names the bytecode engine
    fn engine_component(&self) -> &str {
        crate::core::versions::DEFAULT_ENGINE_COMPONENT
    }

    /// Wrap a module body in the engine's module-initializer wrapper
    fn wrap(&self, body: &str) -> String;

    /// Check that `source` parses as a program body, without running it
    fn check_syntax(&self, source: &str, filename: &str) -> Result<(), ScriptError>;

    /// Instantiate `script` and run the initializer it evaluates to against `context`
    ///
    /// `script.source` is always wrapped source or a placeholder, never a bare body.
    fn execute(&self, script: Script<'_>, context: &mut ModuleContext) -> Result<(), ScriptError>;
}

/// Backend that produces engine bytecode caches
///
/// Bytes 8..12 of the returned blob must hold the length of `wrapped` as a
/// little-endian integer.
pub trait CacheBackend: Send + Sync {
    fn create_cache(&self, wrapped: &str, filename: &str) -> Result<Vec<u8>, ScriptError>;
}

/// Options handed to the code compiler
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleOptions {
    pub source_map: bool,
    pub externals: Vec<String>,
    pub minify: bool,
}

/// Output of the code compiler for one entry file
#[derive(Debug, Clone, Default)]
pub struct BundledCode {
    /// Single-file program body
    pub code: String,

    /// Source map, when requested
    pub map: Option<String>,

    /// Side assets keyed by name relative to the output
    pub assets: BTreeMap<String, Vec<u8>>,
}

/// Bundler that turns an entry file into a single program body
pub trait CodeCompiler: Send + Sync {
    fn compile(&self, path: &Path, options: &BundleOptions) -> crate::Result<BundledCode>;
}
