//! TOML configuration
//!
//! ```toml
//! [archive]
//! truncate = false
//! concurrency = 8
//!
//! [loader]
//! cwd = "/srv/app"
//!
//! [compile]
//! minify = true
//! externals = ["fs", "path"]
//! ```
//!
//! Every key is optional. A concurrency of 0 means unbounded.

use crate::archiver::ArchiveOptions;
use crate::compiler::CompileOptions;
use crate::error::{Result, TmcoError};
use crate::loader::LoaderOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TmcoConfig {
    pub archive: ArchiveSection,
    pub loader: LoaderSection,
    pub compile: CompileSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArchiveSection {
    pub truncate: bool,
    pub concurrency: usize,
}

impl Default for ArchiveSection {
    fn default() -> Self {
        ArchiveSection {
            truncate: true,
            concurrency: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderSection {
    /// Base for relative load paths; the process cwd when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    pub concurrency: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompileSection {
    pub source_map: bool,
    pub debug: bool,
    pub minify: bool,
    pub externals: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    pub concurrency: usize,
}

impl TmcoConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| TmcoError::Config(e.to_string()))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
            .map_err(|e| TmcoError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| TmcoError::Config(e.to_string()))
    }

    pub fn archive_options(&self) -> ArchiveOptions {
        ArchiveOptions::new()
            .truncate(self.archive.truncate)
            .concurrency(self.archive.concurrency)
    }

    pub fn loader_options(&self) -> LoaderOptions {
        let options = LoaderOptions::new().concurrency(self.loader.concurrency);
        match &self.loader.cwd {
            Some(cwd) => options.cwd(cwd.clone()),
            None => options,
        }
    }

    pub fn compile_options(&self) -> CompileOptions {
        let section = &self.compile;
        let mut options = CompileOptions::new()
            .source_map(section.source_map)
            .debug(section.debug)
            .minify(section.minify)
            .concurrency(section.concurrency);
        options.externals = section.externals.clone();
        options.output = section.output.clone();
        options
    }
}
