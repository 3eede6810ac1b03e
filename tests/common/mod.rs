//! Toy line-based engine shared by the integration tests
//!
//! A program body is a list of statements, one per line:
//!
//! ```text
//! exports.answer = 42;
//! tick;
//! throw something went wrong;
//! // comment
//! ```
//!
//! Its "bytecode cache" is `TOYC`, four zero bytes, the wrapped source length
//! (LE u32) and the wrapped source itself.

#![allow(dead_code)]

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tmco_rs::runtime::{
    BundleOptions, BundledCode, CacheBackend, CodeCompiler, ModuleContext, Script, ScriptEngine,
    ScriptError,
};
use tmco_rs::{Container, Options, TmcoError, Versions};

const WRAP_HEAD: &str = "(function (exports) {\n";
const WRAP_TAIL: &str = "\n})";
const CACHE_TAG: &[u8; 4] = b"TOYC";

#[derive(Debug, Clone, PartialEq)]
enum Statement {
    Export(String, Value),
    Tick,
    Throw(String),
}

fn parse(body: &str) -> Result<Vec<Statement>, ScriptError> {
    let mut statements = Vec::new();

    for (n, line) in body.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("//") {
            continue;
        }

        let stmt = line
            .strip_suffix(';')
            .ok_or_else(|| ScriptError::Syntax(format!("line {}: missing ';'", n + 1)))?;

        if stmt == "tick" {
            statements.push(Statement::Tick);
        } else if let Some(message) = stmt.strip_prefix("throw ") {
            statements.push(Statement::Throw(message.to_string()));
        } else if let Some(assignment) = stmt.strip_prefix("exports.") {
            let (name, value) = assignment
                .split_once('=')
                .ok_or_else(|| ScriptError::Syntax(format!("line {}: expected '='", n + 1)))?;
            let value: Value = serde_json::from_str(value.trim())
                .map_err(|e| ScriptError::Syntax(format!("line {}: {}", n + 1, e)))?;
            statements.push(Statement::Export(name.trim().to_string(), value));
        } else {
            return Err(ScriptError::Syntax(format!(
                "line {}: unexpected '{}'",
                n + 1,
                stmt
            )));
        }
    }

    Ok(statements)
}

fn unwrap_source(source: &str) -> Result<&str, ScriptError> {
    source
        .strip_prefix(WRAP_HEAD)
        .and_then(|rest| rest.strip_suffix(WRAP_TAIL))
        .ok_or_else(|| ScriptError::Syntax("not a module initializer".to_string()))
}

/// Engine, cache backend and code compiler in one
#[derive(Clone)]
pub struct ToyEngine {
    version: String,
    pub executions: Arc<AtomicUsize>,
    pub ticks: Arc<AtomicUsize>,
    fail_cache: bool,
}

impl ToyEngine {
    pub fn new(version: &str) -> Self {
        ToyEngine {
            version: version.to_string(),
            executions: Arc::new(AtomicUsize::new(0)),
            ticks: Arc::new(AtomicUsize::new(0)),
            fail_cache: false,
        }
    }

    /// Cache backend that never produces a blob
    pub fn without_cache(mut self) -> Self {
        self.fail_cache = true;
        self
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    pub fn ticks(&self) -> usize {
        self.ticks.load(Ordering::SeqCst)
    }

    /// Encode `body` as a container the way the compiler would
    pub fn container(&self, body: &str) -> Vec<u8> {
        let wrapped = self.wrap(body);
        let cache = self.create_cache(&wrapped, "module.js").unwrap();
        Container::new(self.versions(), Options::default(), cache)
            .unwrap()
            .encode()
            .unwrap()
    }

    fn run(&self, body: &str, context: &mut ModuleContext) -> Result<(), ScriptError> {
        for statement in parse(body)? {
            match statement {
                Statement::Export(name, value) => {
                    context.exports.insert(name, value);
                }
                Statement::Tick => {
                    self.ticks.fetch_add(1, Ordering::SeqCst);
                }
                Statement::Throw(message) => return Err(ScriptError::Thrown(message)),
            }
        }
        Ok(())
    }
}

impl ScriptEngine for ToyEngine {
    fn versions(&self) -> Versions {
        Versions::new()
            .with("engine", self.version.clone())
            .with("platform", "1")
    }

    fn wrap(&self, body: &str) -> String {
        format!("{}{}{}", WRAP_HEAD, body, WRAP_TAIL)
    }

    fn check_syntax(&self, source: &str, _filename: &str) -> Result<(), ScriptError> {
        parse(source).map(|_| ())
    }

    fn execute(&self, script: Script<'_>, context: &mut ModuleContext) -> Result<(), ScriptError> {
        self.executions.fetch_add(1, Ordering::SeqCst);

        match script.cached_data {
            Some(cache) => {
                if cache.len() < 12 || &cache[..4] != CACHE_TAG {
                    return Err(ScriptError::CacheRejected("not a toy cache".to_string()));
                }
                let mut len = [0u8; 4];
                len.copy_from_slice(&cache[8..12]);
                if script.source.chars().count() != u32::from_le_bytes(len) as usize {
                    return Err(ScriptError::CacheRejected("source length mismatch".to_string()));
                }
                let wrapped = std::str::from_utf8(&cache[12..])
                    .map_err(|_| ScriptError::CacheRejected("corrupt cache".to_string()))?;
                self.run(unwrap_source(wrapped)?, context)
            }
            None => self.run(unwrap_source(script.source)?, context),
        }
    }
}

impl CacheBackend for ToyEngine {
    fn create_cache(&self, wrapped: &str, _filename: &str) -> Result<Vec<u8>, ScriptError> {
        if self.fail_cache {
            return Ok(Vec::new());
        }

        let mut cache = Vec::with_capacity(12 + wrapped.len());
        cache.extend_from_slice(CACHE_TAG);
        cache.extend_from_slice(&[0; 4]);
        cache.extend_from_slice(&(wrapped.chars().count() as u32).to_le_bytes());
        cache.extend_from_slice(wrapped.as_bytes());
        Ok(cache)
    }
}

impl CodeCompiler for ToyEngine {
    fn compile(&self, path: &Path, options: &BundleOptions) -> tmco_rs::Result<BundledCode> {
        let source = std::fs::read_to_string(path)?;
        parse(&source).map_err(|e| TmcoError::Compile(format!("{}: {}", path.display(), e)))?;

        let code = if options.minify {
            source
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with("//"))
                .collect::<Vec<_>>()
                .join("\n")
        } else {
            source.clone()
        };

        let mut assets = BTreeMap::new();
        for line in source.lines() {
            if let Some(name) = line.trim().strip_prefix("// asset: ") {
                assets.insert(name.to_string(), format!("asset {}", name).into_bytes());
            }
        }

        let map = options
            .source_map
            .then(|| format!("{{\"file\":\"{}\"}}", path.display()));

        Ok(BundledCode { code, map, assets })
    }
}

pub fn engine() -> ToyEngine {
    ToyEngine::new("10.2.154")
}
