//! Compiled module container
//!
//! A container holds one compiled module: the engine's cached bytecode plus
//! the headers needed to decide whether that bytecode can run here.
//!
//! ```text
//! ┌──────────┬────────────┬──────────┬────────────┬─────────┬─────────────┬────────────┬───────┐
//! │ "TMCO"   │ varint len │ versions │ varint len │ options │ varint hash │ varint len │ cache │
//! │ 4 bytes  │            │          │            │         │             │            │       │
//! └──────────┴────────────┴──────────┴────────────┴─────────┴─────────────┴────────────┴───────┘
//! ```
//!
//! Every field is self-delimiting, so the versions and options messages can
//! grow without breaking older containers; only the magic has to agree.

use crate::error::{Result, TmcoError};
use crate::messages::Options;
use crate::varint;
use crate::versions::Versions;

/// Tag at the start of every container
pub const MAGIC: [u8; 4] = *b"TMCO";

/// Byte range of the cache blob holding the original source length
pub const SOURCE_HASH_RANGE: std::ops::Range<usize> = 8..12;

/// Placeholder character used to rebuild a source of the right length
const PLACEHOLDER_FILL: char = '\u{200b}';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub versions: Versions,
    pub options: Options,

    /// Length of the wrapped source the cache was produced from
    pub source_hash: u64,

    /// Opaque engine cache blob
    pub cache: Vec<u8>,
}

impl Container {
    pub fn new(versions: Versions, options: Options, cache: Vec<u8>) -> Result<Self> {
        let source_hash = source_hash(&cache)? as u64;
        Ok(Container {
            versions,
            options,
            source_hash,
            cache,
        })
    }

    /// Whether `bytes` start with the container magic
    pub fn is_container(bytes: &[u8]) -> bool {
        bytes.len() >= MAGIC.len() && bytes[..MAGIC.len()] == MAGIC
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        encode(&self.versions, &self.options, self.source_hash, &self.cache)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        decode(bytes)
    }

    /// Content-free script with the same length as the original source
    ///
    /// Engines validate cached data against the source length, so the cache
    /// can be attached to a string literal of exactly `source_hash` characters.
    pub fn placeholder(&self) -> Result<String> {
        let len = check_source_hash(self.source_hash)?;
        if len < 2 {
            return Err(TmcoError::MalformedContainer(format!(
                "source length {} is too short for a placeholder",
                len
            )));
        }

        let capacity = (len - 2)
            .checked_mul(PLACEHOLDER_FILL.len_utf8())
            .and_then(|fill| fill.checked_add(2))
            .ok_or_else(|| too_long(self.source_hash))?;
        let mut stub = String::new();
        stub.try_reserve_exact(capacity)
            .map_err(|_| too_long(self.source_hash))?;
        stub.push('"');
        stub.extend(std::iter::repeat(PLACEHOLDER_FILL).take(len - 2));
        stub.push('"');
        Ok(stub)
    }
}

/// The source length recorded in a cache is 32 bits wide; anything larger
/// cannot have come from a real cache
fn check_source_hash(source_hash: u64) -> Result<usize> {
    u32::try_from(source_hash)
        .ok()
        .and_then(|len| usize::try_from(len).ok())
        .ok_or_else(|| too_long(source_hash))
}

fn too_long(source_hash: u64) -> TmcoError {
    TmcoError::MalformedContainer(format!(
        "source length {} does not fit a cache header",
        source_hash
    ))
}

/// Read the source length the engine recorded at bytes 8..12 of its cache
pub fn source_hash(cache: &[u8]) -> Result<u32> {
    let bytes: [u8; 4] = cache
        .get(SOURCE_HASH_RANGE)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| {
            TmcoError::CacheUnavailable(format!(
                "cache blob of {} bytes has no source hash",
                cache.len()
            ))
        })?;
    Ok(u32::from_le_bytes(bytes))
}

/// Serialize a container
pub fn encode(
    versions: &Versions,
    options: &Options,
    source_hash: u64,
    cache: &[u8],
) -> Result<Vec<u8>> {
    let versions = versions.encode()?;
    let options = options.encode()?;

    let mut out = Vec::with_capacity(
        MAGIC.len()
            + varint::MAX_LEN * 4
            + versions.len()
            + options.len()
            + cache.len(),
    );
    out.extend_from_slice(&MAGIC);
    varint::encode_prefixed_into(&versions, &mut out);
    varint::encode_prefixed_into(&options, &mut out);
    varint::encode_into(source_hash, &mut out);
    varint::encode_prefixed_into(cache, &mut out);

    Ok(out)
}

/// Parse a container, consuming each field in order
pub fn decode(bytes: &[u8]) -> Result<Container> {
    if !Container::is_container(bytes) {
        return Err(TmcoError::MalformedContainer(
            "missing TMCO magic".to_string(),
        ));
    }
    let mut offset = MAGIC.len();

    let (field, used) = varint::decode_prefixed(&bytes[offset..])?;
    let versions = Versions::decode(field)
        .map_err(|e| TmcoError::MalformedContainer(format!("bad versions record: {}", e)))?;
    offset += used;

    let (field, used) = varint::decode_prefixed(&bytes[offset..])?;
    let options = Options::decode(field)
        .map_err(|e| TmcoError::MalformedContainer(format!("bad options: {}", e)))?;
    offset += used;

    let (source_hash, used) = varint::decode(&bytes[offset..])?;
    check_source_hash(source_hash)?;
    offset += used;

    let (cache, used) = varint::decode_prefixed(&bytes[offset..])?;
    offset += used;

    if offset != bytes.len() {
        tracing::debug!(
            "Ignoring {} bytes after container cache",
            bytes.len() - offset
        );
    }

    Ok(Container {
        versions,
        options,
        source_hash,
        cache: cache.to_vec(),
    })
}
