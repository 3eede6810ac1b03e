//! Append-only key-value store
//!
//! The store is a log of records over any [`RandomAccess`] backend:
//!
//! ```text
//! ┌──────────────┬─────┬────────────────┬───────┬─────────────┐
//! │ varint klen  │ key │ varint vlen    │ value │ crc32 (LE)  │
//! └──────────────┴─────┴────────────────┴───────┴─────────────┘
//! ```
//!
//! The checksum covers everything before it in the record. Opening scans the
//! log and keeps the last record seen for each key, so a later write for a
//! key wins. A record that is cut short or fails its checksum ends the log;
//! the next append overwrites it.

use crate::error::{Result, TmcoError};
use crate::storage::{Handle, RandomAccess, SharedStorage, StorageProvider};
use crate::varint;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

const CRC_LEN: usize = 4;

/// Location of a value inside the log
#[derive(Debug, Clone, Copy)]
struct Slot {
    offset: u64,
    len: u64,
}

struct Inner {
    storage: Handle,
    end: u64,
    slots: BTreeMap<String, Slot>,
    closed: bool,
}

/// Key-value store over random-access storage
pub struct KvStore {
    inner: Mutex<Inner>,
}

impl KvStore {
    /// Open (or create) a store in the file at `path`
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let storage = crate::storage::FileStorage::create(path);
        Self::open(Handle::Owned(Box::new(storage)))
    }

    /// Open a store over storage the store will own and close
    pub fn with_storage(storage: Box<dyn RandomAccess>) -> Result<Self> {
        Self::open(Handle::Owned(storage))
    }

    /// Open a store over caller-owned storage; `close()` leaves it open
    pub fn with_shared(storage: SharedStorage) -> Result<Self> {
        Self::open(Handle::Shared(storage))
    }

    /// Open a store through a provider, using `name` for factories
    pub fn from_provider(provider: &StorageProvider, name: &str) -> Result<Self> {
        match provider {
            StorageProvider::Factory(factory) => Self::with_storage(factory(name)?),
            StorageProvider::Instance(shared) => Self::with_shared(shared.clone()),
        }
    }

    /// Store over a private in-memory copy of `bytes`
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::with_storage(Box::new(crate::storage::MemoryStorage::from_bytes(bytes)))
    }

    pub(crate) fn open(mut storage: Handle) -> Result<Self> {
        storage.open()?;
        let size = storage.stat()?.size;
        let log = if size > 0 {
            storage.read(0, size)?
        } else {
            Vec::new()
        };

        let (slots, end) = scan(&log);
        if end < size {
            warn!(
                "Ignoring {} trailing bytes after last valid record",
                size - end
            );
        }
        debug!("Opened store with {} keys ({} bytes)", slots.len(), end);

        Ok(KvStore {
            inner: Mutex::new(Inner {
                storage,
                end,
                slots,
                closed: false,
            }),
        })
    }

    /// Store `value` under `key`, replacing any earlier value
    pub fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(TmcoError::StoreClosed);
        }

        let record = encode_record(key, value);
        let offset = inner.end;
        inner.storage.write(offset, &record)?;

        let value_offset = offset + (record.len() - CRC_LEN - value.len()) as u64;
        inner.end = offset + record.len() as u64;
        inner.slots.insert(
            key.to_string(),
            Slot {
                offset: value_offset,
                len: value.len() as u64,
            },
        );

        Ok(())
    }

    /// Most recent value for `key`
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(TmcoError::StoreClosed);
        }

        let Some(slot) = inner.slots.get(key).copied() else {
            return Ok(None);
        };

        Ok(Some(inner.storage.read(slot.offset, slot.len)?))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().slots.contains_key(key)
    }

    /// All keys, sorted
    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().slots.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().slots.is_empty()
    }

    /// Close the store. Storage supplied by the caller stays open.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Ok(());
        }
        inner.closed = true;
        inner.storage.close()
    }
}

fn encode_record(key: &str, value: &[u8]) -> Vec<u8> {
    let mut record = Vec::with_capacity(
        varint::encoded_len(key.len() as u64)
            + key.len()
            + varint::encoded_len(value.len() as u64)
            + value.len()
            + CRC_LEN,
    );
    varint::encode_prefixed_into(key.as_bytes(), &mut record);
    varint::encode_prefixed_into(value, &mut record);

    let crc = crc32fast::hash(&record);
    record.extend_from_slice(&crc.to_le_bytes());
    record
}

/// Walk the log, returning the live slots and the end of the last good record
fn scan(log: &[u8]) -> (BTreeMap<String, Slot>, u64) {
    let mut slots = BTreeMap::new();
    let mut offset = 0usize;

    while offset < log.len() {
        match decode_record(&log[offset..]) {
            Some((key, value_start, value_len, used)) => {
                slots.insert(
                    key,
                    Slot {
                        offset: (offset + value_start) as u64,
                        len: value_len as u64,
                    },
                );
                offset += used;
            }
            None => break,
        }
    }

    (slots, offset as u64)
}

/// Returns `(key, value offset, value length, record length)`
fn decode_record(bytes: &[u8]) -> Option<(String, usize, usize, usize)> {
    let (key, key_used) = varint::decode_prefixed(bytes).ok()?;
    let (value, value_used) = varint::decode_prefixed(&bytes[key_used..]).ok()?;

    let body = key_used + value_used;
    let crc_bytes: [u8; CRC_LEN] = bytes.get(body..body + CRC_LEN)?.try_into().ok()?;
    if crc32fast::hash(&bytes[..body]) != u32::from_le_bytes(crc_bytes) {
        return None;
    }

    let key = std::str::from_utf8(key).ok()?.to_string();
    let value_start = body - value.len();
    Some((key, value_start, value.len(), body + CRC_LEN))
}
