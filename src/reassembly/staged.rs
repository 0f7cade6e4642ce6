//! Staged buffer descriptors and emitted spans.
//!
//! The reassembler never reads payload bytes. It trusts the delimiter
//! offsets the parser computed for each buffer and only moves refcounted
//! handles around, so claiming a span transfers shared ownership to the
//! caller without copying data.

use std::sync::Arc;

use crate::error::{ Result, StitchError };

/// Reference-counted handle to a source buffer
///
/// The underlying allocation belongs to the source's buffer pool; cloning a
/// handle bumps the refcount and the pool reclaims the buffer when the last
/// handle drops.
#[derive(Debug, Clone)]
pub struct BufferHandle {
    bytes: Arc<[u8]>,
}

impl BufferHandle {
    pub fn new(bytes: Arc<[u8]>) -> Self {
        Self { bytes }
    }

    /// Zero-length handle, used by the construction sentinel.
    pub fn empty() -> Self {
        Self { bytes: Arc::new([]) }
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl From<Vec<u8>> for BufferHandle {
    fn from(bytes: Vec<u8>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }
}

impl From<&[u8]> for BufferHandle {
    fn from(bytes: &[u8]) -> Self {
        Self {
            bytes: Arc::from(bytes),
        }
    }
}

/// Immutable descriptor pairing a buffer handle with its delimiter geometry
///
/// Created by the parser before ingest. Offsets address the last byte of the
/// delimiter they name. `offset_of_trailing_tuple` is never set by the
/// parser; the reassembler fills it from a slot annotation when the buffer
/// is emitted as the closing end of a span that does not stop at an
/// in-buffer delimiter.
#[derive(Debug, Clone)]
pub struct StagedBuffer {
    handle: BufferHandle,
    offset_of_first_delimiter: Option<u32>,
    offset_of_last_delimiter: Option<u32>,
    offset_of_trailing_tuple: Option<u32>,
}

impl StagedBuffer {
    /// Create a descriptor for a buffer containing at least one delimiter.
    ///
    /// Requires `first <= last < handle.len()`.
    pub fn with_delimiters(handle: BufferHandle, first: u32, last: u32) -> Result<Self> {
        if first > last {
            return Err(StitchError::invalid_offset(first, handle.len()));
        }
        if last as usize >= handle.len() {
            return Err(StitchError::invalid_offset(last, handle.len()));
        }
        Ok(Self {
            handle,
            offset_of_first_delimiter: Some(first),
            offset_of_last_delimiter: Some(last),
            offset_of_trailing_tuple: None,
        })
    }

    /// Create a descriptor for a buffer whose payload is a single fragment
    /// of some span.
    pub fn without_delimiter(handle: BufferHandle) -> Self {
        Self {
            handle,
            offset_of_first_delimiter: None,
            offset_of_last_delimiter: None,
            offset_of_trailing_tuple: None,
        }
    }

    /// Zero-length dummy installed at slot 0 on construction. Bypasses
    /// offset validation: it only exists so that the first leading search
    /// terminates, and it is never emitted.
    pub(crate) fn sentinel() -> Self {
        Self {
            handle: BufferHandle::empty(),
            offset_of_first_delimiter: Some(0),
            offset_of_last_delimiter: Some(0),
            offset_of_trailing_tuple: None,
        }
    }

    #[inline]
    pub fn handle(&self) -> &BufferHandle {
        &self.handle
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        self.handle.bytes()
    }

    #[inline]
    pub fn size_in_bytes(&self) -> usize {
        self.handle.len()
    }

    #[inline]
    pub fn offset_of_first_delimiter(&self) -> Option<u32> {
        self.offset_of_first_delimiter
    }

    #[inline]
    pub fn offset_of_last_delimiter(&self) -> Option<u32> {
        self.offset_of_last_delimiter
    }

    /// Offset of the last complete tuple, recorded via a trailing-offset
    /// annotation. When present, the span ends here instead of at
    /// `offset_of_first_delimiter`.
    #[inline]
    pub fn offset_of_trailing_tuple(&self) -> Option<u32> {
        self.offset_of_trailing_tuple
    }

    #[inline]
    pub fn has_delimiter(&self) -> bool {
        self.offset_of_first_delimiter.is_some()
    }

    /// Whether payload bytes follow the last boundary of this buffer.
    ///
    /// Decides span membership of an opening boundary: a buffer whose last
    /// delimiter sits on its final byte opens the next span but contributes
    /// no bytes to it, so it is left out of the emitted list.
    pub(crate) fn has_trailing_fragment(&self) -> bool {
        let boundary = self
            .offset_of_trailing_tuple
            .or(self.offset_of_last_delimiter);
        match boundary {
            Some(offset) => (offset as usize + 1) < self.handle.len(),
            None => !self.handle.is_empty(),
        }
    }

    pub(crate) fn with_trailing_tuple(mut self, offset: u32) -> Self {
        self.offset_of_trailing_tuple = Some(offset);
        self
    }
}

/// Ordered list of staged buffers forming one logical span
///
/// Entries are in ascending sequence order. The downstream formatter
/// concatenates the payload slices: from after the opening boundary of the
/// first entry (when it carries one) through the first delimiter, or the
/// trailing-tuple offset, of the last.
#[derive(Debug, Clone, Default)]
pub struct SpanningBuffers {
    buffers: Vec<StagedBuffer>,
}

impl SpanningBuffers {
    pub(crate) fn with_capacity(len: usize) -> Self {
        Self {
            buffers: Vec::with_capacity(len),
        }
    }

    pub(crate) fn push(&mut self, staged: StagedBuffer) {
        self.buffers.push(staged);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, StagedBuffer> {
        self.buffers.iter()
    }

    pub fn as_slice(&self) -> &[StagedBuffer] {
        &self.buffers
    }

    pub fn into_vec(self) -> Vec<StagedBuffer> {
        self.buffers
    }
}

impl IntoIterator for SpanningBuffers {
    type Item = StagedBuffer;
    type IntoIter = std::vec::IntoIter<StagedBuffer>;

    fn into_iter(self) -> Self::IntoIter {
        self.buffers.into_iter()
    }
}

impl std::ops::Index<usize> for SpanningBuffers {
    type Output = StagedBuffer;

    fn index(&self, index: usize) -> &StagedBuffer {
        &self.buffers[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(text: &str) -> BufferHandle {
        BufferHandle::from(text.as_bytes())
    }

    #[test]
    fn test_delimiter_offsets_are_validated() {
        let staged = StagedBuffer::with_delimiters(handle("a=1\nb=2\n"), 3, 7).unwrap();
        assert!(staged.has_delimiter());
        assert_eq!(staged.offset_of_first_delimiter(), Some(3));
        assert_eq!(staged.offset_of_last_delimiter(), Some(7));

        assert!(StagedBuffer::with_delimiters(handle("a=1\n"), 4, 4).is_err());
        assert!(StagedBuffer::with_delimiters(handle("a=1\nb=2\n"), 7, 3).is_err());
    }

    #[test]
    fn test_trailing_fragment_detection() {
        // Delimiter on the final byte: nothing follows it.
        let staged = StagedBuffer::with_delimiters(handle("a=1\n"), 3, 3).unwrap();
        assert!(!staged.has_trailing_fragment());

        // Delimiter mid-buffer: the tail belongs to the next span.
        let staged = StagedBuffer::with_delimiters(handle("a=1\nb="), 3, 3).unwrap();
        assert!(staged.has_trailing_fragment());

        // No delimiter at all: the whole payload is a fragment.
        let staged = StagedBuffer::without_delimiter(handle("b=2"));
        assert!(staged.has_trailing_fragment());

        // A trailing-tuple annotation overrides the delimiter boundary.
        let staged = StagedBuffer::with_delimiters(handle("a=1\nb=2x"), 3, 3)
            .unwrap()
            .with_trailing_tuple(7);
        assert!(!staged.has_trailing_fragment());
    }

    #[test]
    fn test_sentinel_is_never_a_fragment_source() {
        let sentinel = StagedBuffer::sentinel();
        assert_eq!(sentinel.size_in_bytes(), 0);
        assert!(sentinel.has_delimiter());
        assert!(!sentinel.has_trailing_fragment());
    }

    #[test]
    fn test_handles_share_payload() {
        let staged = StagedBuffer::without_delimiter(handle("shared"));
        let clone = staged.clone();
        assert_eq!(staged.bytes().as_ptr(), clone.bytes().as_ptr());
    }

    #[test]
    fn test_spanning_buffers_order() {
        let mut span = SpanningBuffers::with_capacity(2);
        span.push(StagedBuffer::without_delimiter(handle("first")));
        span.push(StagedBuffer::without_delimiter(handle("second")));
        assert_eq!(span.len(), 2);
        assert_eq!(span[0].bytes(), b"first");
        assert_eq!(span[1].bytes(), b"second");
    }
}
