//! Compile driver
//!
//! Turns source files into containers. Each target goes through the code
//! compiler (a single-file bundle), the engine's module wrapper and the cache
//! backend; the resulting bytecode is framed as a container and written next
//! to the source as `<target>.out`, or into caller-supplied storage.

use crate::core::batch;
use crate::core::container::Container;
use crate::core::messages::Options;
use crate::core::storage::{FileStorage, RandomAccess, StorageProvider, DEFAULT_MODE};
use crate::core::validation::{relative_name, resolve_path};
use crate::error::{Result, TmcoError};
use crate::runtime::{BundleOptions, CacheBackend, CodeCompiler, ScriptEngine};
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Extension appended to a target path when no output is given
pub const DEFAULT_OUTPUT_EXTENSION: &str = ".out";

/// A source file queued for compilation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileTarget {
    /// Resolved source path
    pub filename: PathBuf,

    /// Where the compiled object goes, relative to the compiler's cwd unless absolute
    pub output: PathBuf,
}

/// Side file produced while compiling a target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub source: Vec<u8>,
    pub mode: u32,
}

impl Asset {
    fn new(source: impl Into<Vec<u8>>) -> Self {
        Asset {
            source: source.into(),
            mode: DEFAULT_MODE,
        }
    }
}

/// Everything a compile run produced
#[derive(Debug, Clone, Default)]
pub struct CompileOutput {
    /// Encoded containers keyed by object name
    pub objects: BTreeMap<String, Vec<u8>>,

    /// Assets keyed by name; written by the caller if wanted
    pub assets: BTreeMap<String, Asset>,
}

/// Compile options
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Ask the code compiler for a source map, emitted as `<object>.map`
    pub source_map: bool,

    /// Emit the bundled source as `<object>.debug.compiled`
    pub debug: bool,

    /// Minify the bundle; recorded as `optimized` in the container
    pub minify: bool,

    /// Module names the code compiler must leave external
    pub externals: Vec<String>,

    /// Output path (a directory when compiling several paths at once)
    pub output: Option<PathBuf>,

    /// Write objects here instead of the filesystem
    pub storage: Option<StorageProvider>,

    /// Maximum targets compiled at once (`None` = unbounded)
    pub concurrency: Option<NonZeroUsize>,
}

impl CompileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source_map(mut self, enabled: bool) -> Self {
        self.source_map = enabled;
        self
    }

    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    pub fn minify(mut self, enabled: bool) -> Self {
        self.minify = enabled;
        self
    }

    pub fn external(mut self, name: impl Into<String>) -> Self {
        self.externals.push(name.into());
        self
    }

    pub fn output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn storage(mut self, storage: StorageProvider) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = NonZeroUsize::new(concurrency);
        self
    }

    fn bundle_options(&self) -> BundleOptions {
        BundleOptions {
            source_map: self.source_map,
            externals: self.externals.clone(),
            minify: self.minify,
        }
    }
}

/// One compiled target before anything is written
struct Compiled {
    name: String,
    object: Vec<u8>,
    assets: Vec<(String, Asset)>,
}

/// Queue of compile targets sharing one toolchain
pub struct Compiler {
    cwd: PathBuf,
    code_compiler: Arc<dyn CodeCompiler>,
    engine: Arc<dyn ScriptEngine>,
    cache_backend: Arc<dyn CacheBackend>,
    targets: Vec<CompileTarget>,
}

impl Compiler {
    pub fn new(
        cwd: impl Into<PathBuf>,
        code_compiler: Arc<dyn CodeCompiler>,
        engine: Arc<dyn ScriptEngine>,
        cache_backend: Arc<dyn CacheBackend>,
    ) -> Self {
        Compiler {
            cwd: cwd.into(),
            code_compiler,
            engine,
            cache_backend,
            targets: Vec::new(),
        }
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn targets(&self) -> &[CompileTarget] {
        &self.targets
    }

    /// Queue `path` for compilation
    ///
    /// `output` defaults to the path with [`DEFAULT_OUTPUT_EXTENSION`] appended.
    pub fn target<P: AsRef<Path>>(&mut self, path: P, output: Option<PathBuf>) -> Result<&CompileTarget> {
        let filename = resolve_path(&self.cwd, path.as_ref());
        if !filename.is_file() {
            return Err(TmcoError::TargetNotFound(filename.display().to_string()));
        }

        let output = output.unwrap_or_else(|| {
            let mut out = filename.clone().into_os_string();
            out.push(DEFAULT_OUTPUT_EXTENSION);
            PathBuf::from(out)
        });

        debug!("Queued compile target {}", filename.display());
        self.targets.push(CompileTarget { filename, output });
        Ok(&self.targets[self.targets.len() - 1])
    }

    /// Compile every queued target, then write the objects
    ///
    /// Nothing is written unless every target compiled. A shared storage
    /// instance holds one object, so it only takes a single target.
    pub fn compile(&self, options: &CompileOptions) -> Result<CompileOutput> {
        if matches!(options.storage, Some(StorageProvider::Instance(_))) && self.targets.len() > 1 {
            return Err(TmcoError::Config(format!(
                "a storage instance holds one object, not {}; use a storage factory",
                self.targets.len()
            )));
        }
        info!("Compiling {} targets", self.targets.len());

        let targets: Vec<&CompileTarget> = self.targets.iter().collect();
        let compiled = batch::run(targets, options.concurrency, |target| {
            self.compile_target(target, options)
        })?;

        let mut output = CompileOutput::default();
        for unit in compiled {
            output.assets.extend(unit.assets);
            output.objects.insert(unit.name, unit.object);
        }

        let writes: Vec<(&String, &Vec<u8>)> = output.objects.iter().collect();
        batch::run(writes, options.concurrency, |(name, object)| {
            self.write_object(name, object, options.storage.as_ref())
        })?;

        Ok(output)
    }

    fn compile_target(&self, target: &CompileTarget, options: &CompileOptions) -> Result<Compiled> {
        debug!("Compiling {}", target.filename.display());

        let name = relative_name(&self.cwd, &target.output);
        let basename = target
            .filename
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let bundle = self
            .code_compiler
            .compile(&target.filename, &options.bundle_options())?;

        let mut assets: Vec<(String, Asset)> = bundle
            .assets
            .into_iter()
            .map(|(asset, bytes)| (sibling_name(&name, &asset), Asset::new(bytes)))
            .collect();
        if options.debug {
            assets.push((format!("{}.debug.compiled", name), Asset::new(bundle.code.as_bytes())));
        }
        if let Some(map) = bundle.map {
            assets.push((format!("{}.map", name), Asset::new(map)));
        }

        let wrapped = self.engine.wrap(&bundle.code);
        let cache = self
            .cache_backend
            .create_cache(&wrapped, &basename)
            .map_err(|e| TmcoError::CacheUnavailable(format!("{}: {}", basename, e)))?;

        let container = Container::new(
            self.engine.versions(),
            Options {
                filename: basename,
                optimized: options.minify,
                externals: options.externals.clone(),
                assets: assets.iter().map(|(asset, _)| asset.clone()).collect(),
            },
            cache,
        )?;

        Ok(Compiled {
            name,
            object: container.encode()?,
            assets,
        })
    }

    fn write_object(&self, name: &str, object: &[u8], storage: Option<&StorageProvider>) -> Result<()> {
        let path = resolve_path(&self.cwd, Path::new(name));
        debug!("Writing object {} ({} bytes)", path.display(), object.len());

        match storage {
            None => {
                match std::fs::remove_file(&path) {
                    Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
                    _ => {}
                }
                let mut file = FileStorage::create(&path);
                file.open()?;
                let written = file.write(0, object);
                let closed = file.close();
                written?;
                closed
            }
            Some(StorageProvider::Factory(factory)) => {
                let mut out = factory(&path.to_string_lossy())?;
                out.open()?;
                let written = out.write(0, object);
                let closed = out.close();
                written?;
                closed
            }
            Some(StorageProvider::Instance(shared)) => {
                let mut out = shared.lock();
                out.open()?;
                out.write(0, object)
            }
        }
    }
}

/// Compile every path in `paths` with `compiler`
///
/// With `options.output` set, a single path compiles to exactly that output
/// and several paths compile into it as a directory. Objects bound for
/// storage default to the source path itself.
pub fn compile<P: AsRef<Path>>(
    compiler: &mut Compiler,
    paths: &[P],
    options: &CompileOptions,
) -> Result<CompileOutput> {
    if paths.is_empty() {
        return Err(TmcoError::TargetNotFound("no paths to compile".to_string()));
    }

    for path in paths {
        let path = path.as_ref();
        let output = match (&options.output, &options.storage) {
            (Some(output), _) if paths.len() > 1 => {
                let basename = path.file_name().ok_or_else(|| {
                    TmcoError::InvalidPath(format!("{} has no file name", path.display()))
                })?;
                Some(output.join(basename))
            }
            (Some(output), _) => Some(output.clone()),
            (None, Some(_)) => Some(resolve_path(compiler.cwd(), path)),
            (None, None) => None,
        };
        compiler.target(path, output)?;
    }

    compiler.compile(options)
}

/// `asset` placed next to the object `name`
fn sibling_name(name: &str, asset: &str) -> String {
    match Path::new(name).parent() {
        Some(dir) if !dir.as_os_str().is_empty() => {
            format!("{}/{}", dir.to_string_lossy(), asset)
        }
        _ => asset.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sibling_name() {
        assert_eq!(sibling_name("lib/a.js.out", "logo.png"), "lib/logo.png");
        assert_eq!(sibling_name("a.js.out", "logo.png"), "logo.png");
    }

    #[test]
    fn test_options_builder() {
        let options = CompileOptions::new()
            .minify(true)
            .external("fs")
            .external("path")
            .concurrency(0);

        assert!(options.minify);
        assert_eq!(options.concurrency, None);
        assert_eq!(
            options.bundle_options(),
            BundleOptions {
                source_map: false,
                externals: vec!["fs".to_string(), "path".to_string()],
                minify: true,
            }
        );
    }
}
