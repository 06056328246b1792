//! Byte slices handed out by reads
//!
//! A `ByteSlice` points into a whole backing buffer. Cloning and passing it
//! around never copies; `to_vec` is the explicit materialization step.

use std::ops::{Deref, Range};

use bytes::Bytes;

/// Immutable view over a range of a shared buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteSlice {
    bytes: Bytes,
    range: Range<usize>,
}

impl ByteSlice {
    /// View `range` of `bytes`
    ///
    /// The range must lie within the buffer.
    pub fn new(bytes: Bytes, range: Range<usize>) -> Self {
        debug_assert!(range.start <= range.end && range.end <= bytes.len());
        Self { bytes, range }
    }

    /// Zero-length slice without a backing buffer
    pub fn empty() -> Self {
        Self {
            bytes: Bytes::new(),
            range: 0..0,
        }
    }

    /// Offset range inside the backing buffer
    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    /// The whole backing buffer
    pub fn backing(&self) -> &Bytes {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[self.range.clone()]
    }

    /// Shares the range as standalone `Bytes` (reference-counted, no copy)
    pub fn to_bytes(&self) -> Bytes {
        self.bytes.slice(self.range.clone())
    }

    /// Copies the range into a new vector
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }
}

impl Deref for ByteSlice {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsRef<[u8]> for ByteSlice {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl From<Vec<u8>> for ByteSlice {
    fn from(value: Vec<u8>) -> Self {
        let len = value.len();
        Self::new(Bytes::from(value), 0..len)
    }
}
