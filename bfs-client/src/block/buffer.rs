//! Fixed-capacity staging buffer that batches small writes before they are sent
//! to the chain head.

use crate::error::{FsError, Result};

pub struct WriteBuffer {
    buf: Vec<u8>,
    capacity: usize,
}

impl WriteBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.capacity - self.buf.len()
    }

    /// Stage `data`, returning the new fill level.
    ///
    /// Data that does not fit is rejected as a whole; the buffer never grows past
    /// its capacity.
    pub fn append(&mut self, data: &[u8]) -> Result<usize> {
        if data.len() > self.available() {
            return Err(FsError::InvalidArgument(format!(
                "append of {} bytes exceeds {} available in write buffer",
                data.len(),
                self.available()
            )));
        }
        self.buf.extend_from_slice(data);
        Ok(self.buf.len())
    }

    pub fn data(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.buf.len() == self.capacity
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Drop staged bytes past `len`. A longer `len` is a no-op.
    pub fn truncate(&mut self, len: usize) {
        self.buf.truncate(len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_tracks_fill() {
        let mut buf = WriteBuffer::new(16);
        assert_eq!(buf.available(), 16);
        assert_eq!(buf.append(b"hello").unwrap(), 5);
        assert_eq!(buf.available(), 11);
        assert_eq!(buf.len(), 5);
        assert_eq!(buf.data(), b"hello");
        assert!(!buf.is_full());
    }

    #[test]
    fn test_append_rejects_overflow() {
        let mut buf = WriteBuffer::new(8);
        buf.append(b"12345").unwrap();
        let err = buf.append(b"6789").unwrap_err();
        assert!(matches!(err, FsError::InvalidArgument(_)));
        // rejected append leaves contents untouched
        assert_eq!(buf.data(), b"12345");
        assert_eq!(buf.available(), 3);

        buf.append(b"678").unwrap();
        assert!(buf.is_full());
        assert_eq!(buf.available(), 0);
        assert!(buf.append(b"9").is_err());
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut buf = WriteBuffer::new(4);
        buf.append(b"abcd").unwrap();
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.available(), 4);
        assert_eq!(buf.capacity(), 4);
        buf.append(b"wxyz").unwrap();
        assert_eq!(buf.data(), b"wxyz");
    }

    #[test]
    fn test_truncate_drops_tail() {
        let mut buf = WriteBuffer::new(8);
        buf.append(b"abcdef").unwrap();
        buf.truncate(2);
        assert_eq!(buf.data(), b"ab");
        assert_eq!(buf.available(), 6);
        buf.truncate(5);
        assert_eq!(buf.data(), b"ab");
    }

    #[test]
    fn test_empty_append_is_allowed_when_full() {
        let mut buf = WriteBuffer::new(2);
        buf.append(b"ab").unwrap();
        assert_eq!(buf.append(&[]).unwrap(), 2);
    }
}
