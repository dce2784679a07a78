//! Shared types for the script-hook MapReduce bridge.
//!
//! Job modules supply map and reduce hooks; the task runtime drives them
//! over input splits and groups their emissions by key. Everything both
//! sides need to agree on (records, typed values, job settings, errors)
//! lives here.

use std::borrow::Cow;
use std::fmt;
use std::fmt::Formatter;
use std::hash::Hasher;

use bytes::Bytes;

pub mod codec;
pub mod error;
pub mod job;
pub mod value;

pub use error::{MrError, Result, TaskId, TaskKind};
pub use job::{FrozenJobConfig, JobConfig, JobState};
pub use value::{TypeTag, Value};

/////////////////////////////////////////////////////////////////////////////
// Keys
/////////////////////////////////////////////////////////////////////////////

/// An intermediate or output key.
///
/// Keys are opaque tokens compared byte-wise. They are immutable and cheap
/// to clone, since [`Bytes`] are reference counted.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Key(Bytes);

impl Key {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The key as text, replacing invalid UTF-8 sequences.
    pub fn to_str_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }

    #[inline]
    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_str_lossy())
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Key({:?})", self.to_str_lossy())
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Self(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Self(Bytes::from(value))
    }
}

impl From<&String> for Key {
    fn from(value: &String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<Bytes> for Key {
    fn from(value: Bytes) -> Self {
        Self(value)
    }
}

impl From<&Key> for Key {
    fn from(value: &Key) -> Self {
        value.clone()
    }
}

/////////////////////////////////////////////////////////////////////////////
// Key-value pairs
/////////////////////////////////////////////////////////////////////////////

/// A single record: a key and the value emitted with it.
#[derive(Clone, PartialEq, Debug)]
pub struct KeyValue {
    /// The key.
    pub key: Key,

    /// The value.
    pub value: Value,
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}", self.key, self.value)
    }
}

impl KeyValue {
    /// Construct a new key-value pair from the given key and value.
    pub fn new(key: impl Into<Key>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Get the key of this key-value pair.
    ///
    /// This method is cheap, since keys are cheaply cloneable.
    #[inline]
    pub fn key(&self) -> Key {
        self.key.clone()
    }

    /// Borrow the value of this key-value pair.
    #[inline]
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Consumes the key-value pair and returns the key.
    #[inline]
    pub fn into_key(self) -> Key {
        self.key
    }

    /// Consumes the key-value pair and returns the value.
    #[inline]
    pub fn into_value(self) -> Value {
        self.value
    }

    /// Consumes the pair and returns both halves.
    #[inline]
    pub fn into_parts(self) -> (Key, Value) {
        (self.key, self.value)
    }
}

/// Hashes an intermediate key. Compute a reduce partition for a given key
/// by calculating `ihash(key) % n_reduce`.
pub fn ihash(key: &[u8]) -> u32 {
    let mut hasher = fnv::FnvHasher::with_key(0);
    hasher.write(key);
    (hasher.finish() & 0x7fff_ffff) as u32
}

/// The partition a key lands in when the job module does not pick one.
pub fn default_partition(key: &Key, partitions: usize) -> usize {
    if partitions == 0 {
        return 0;
    }
    ihash(key.as_bytes()) as usize % partitions
}
