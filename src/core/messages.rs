//! Message bodies stored inside containers and archives

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Compile options embedded in a container for provenance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    /// Basename of the compiled source file
    pub filename: String,

    /// Whether the code compiler minified the output
    pub optimized: bool,

    /// Module names left external by the code compiler
    pub externals: Vec<String>,

    /// Names of assets emitted alongside the compiled object
    pub assets: Vec<String>,
}

impl Options {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Archived member payload with its filesystem permission bits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Unix permission bits (e.g., 0o644)
    pub mode: u32,

    /// Payload size in bytes
    pub size: u64,

    /// Payload bytes
    pub buffer: Vec<u8>,
}

impl Entry {
    pub fn new(mode: u32, buffer: Vec<u8>) -> Self {
        Entry {
            mode,
            size: buffer.len() as u64,
            buffer,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Decode `bytes` only if they are exactly one well-formed entry
    ///
    /// Archives written over external storage hold raw payloads, so a stored
    /// value is treated as an entry only when it decodes completely and its
    /// recorded size matches the buffer.
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        let entry = Self::decode(bytes).ok()?;
        let consumed = bincode::serialized_size(&entry).ok()?;
        if consumed != bytes.len() as u64 || entry.size != entry.buffer.len() as u64 {
            return None;
        }
        Some(entry)
    }

    /// Payload of a stored value: the entry buffer if wrapped, else the value itself
    pub fn unwrap_payload(value: Vec<u8>) -> (Vec<u8>, Option<u32>) {
        match Self::detect(&value) {
            Some(entry) => (entry.buffer, Some(entry.mode)),
            None => (value, None),
        }
    }
}
