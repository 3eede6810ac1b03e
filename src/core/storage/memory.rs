//! In-memory storage
//!
//! Clones share one buffer, so a caller can hand a clone to the archiver and
//! inspect the bytes afterwards.

use super::{RandomAccess, Stat};
use crate::error::{Result, TmcoError};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct MemoryStorage {
    data: Arc<RwLock<Vec<u8>>>,
    closed: Arc<AtomicBool>,
    mode: Option<u32>,
}

impl MemoryStorage {
    /// Empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer holding a copy of `bytes`
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        MemoryStorage {
            data: Arc::new(RwLock::new(bytes.into())),
            ..Default::default()
        }
    }

    /// Report `mode` from `stat()`, as a file would
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Snapshot of the current contents
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Whether any clone was closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl RandomAccess for MemoryStorage {
    fn open(&mut self) -> Result<()> {
        self.closed.store(false, Ordering::Release);
        Ok(())
    }

    fn stat(&mut self) -> Result<Stat> {
        Ok(Stat {
            size: self.data.read().len() as u64,
            mode: self.mode,
        })
    }

    fn read(&mut self, offset: u64, len: u64) -> Result<Vec<u8>> {
        if self.is_closed() {
            return Err(TmcoError::StoreClosed);
        }

        let data = self.data.read();
        let start = offset as usize;
        let end = start.saturating_add(len as usize);
        if end > data.len() {
            return Err(TmcoError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "read of {} bytes at offset {} past end of {} byte buffer",
                    len,
                    offset,
                    data.len()
                ),
            )));
        }

        Ok(data[start..end].to_vec())
    }

    fn write(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(TmcoError::StoreClosed);
        }

        let mut data = self.data.write();
        let start = offset as usize;
        let end = start + bytes.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
