//! Format internals: framing, storage, the key-value store and the messages
//! stored in it

pub mod batch;
pub mod container;
pub mod error;
pub mod index;
pub mod kv;
pub mod messages;
pub mod storage;
pub mod validation;
pub mod varint;
pub mod versions;
