//! `Buf`: refcounted copy-on-write byte buffer.
//!
//! The handle itself is one optional `Arc`; the empty buffer holds no
//! allocation at all and never participates in refcount traffic. Mutation
//! through a shared handle first clones the payload to a private copy at
//! precise capacity, then applies the change. Growth follows the policy in
//! [`crate::mem`].

use std::sync::Arc;

use crate::error::RuntimeError;
use crate::mem;

/// Copy-on-write byte buffer; the base of strings and code segments.
#[derive(Clone, Default)]
pub struct Buf {
    obj: Option<Arc<Vec<u8>>>,
}

impl Buf {
    pub fn new() -> Buf {
        Buf { obj: None }
    }

    pub fn from_bytes(data: &[u8]) -> Buf {
        if data.is_empty() {
            Buf::new()
        } else {
            let mut v = Vec::with_capacity(data.len());
            v.extend_from_slice(data);
            Buf { obj: Some(Arc::new(v)) }
        }
    }

    pub fn len(&self) -> usize {
        self.obj.as_ref().map_or(0, |o| o.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.obj.as_ref().map_or(0, |o| o.capacity())
    }

    pub fn data(&self) -> &[u8] {
        self.obj.as_ref().map_or(&[], |o| o.as_slice())
    }

    pub fn clear(&mut self) {
        self.obj = None;
    }

    /// Two handles referring to the same payload object.
    pub fn same_object(&self, other: &Buf) -> bool {
        match (&self.obj, &other.obj) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    pub fn is_unique(&self) -> bool {
        self.obj.as_ref().map_or(true, |o| Arc::strong_count(o) == 1)
    }

    fn chk_idx(&self, i: usize) -> Result<(), RuntimeError> {
        if i >= self.len() {
            Err(RuntimeError::Index)
        } else {
            Ok(())
        }
    }

    fn chk_idx_all(&self, i: usize) -> Result<(), RuntimeError> {
        if i > self.len() {
            Err(RuntimeError::Index)
        } else {
            Ok(())
        }
    }

    /// Writable view of the payload; clones at precise capacity when the
    /// handle is shared.
    pub fn make_unique(&mut self) -> &mut Vec<u8> {
        let arc = self.obj.get_or_insert_with(|| Arc::new(Vec::new()));
        // Arc::make_mut clones the Vec when shared; Vec's Clone allocates
        // exactly len bytes, which is the precise-capacity contract.
        Arc::make_mut(arc)
    }

    pub fn at(&self, i: usize) -> Result<u8, RuntimeError> {
        self.chk_idx(i)?;
        Ok(self.data()[i])
    }

    pub fn set_at(&mut self, i: usize, b: u8) -> Result<(), RuntimeError> {
        self.chk_idx(i)?;
        self.make_unique()[i] = b;
        Ok(())
    }

    /// Open a writable gap of `len` bytes at `pos`, growing per policy.
    /// Valid positions are `0..=len()`.
    fn insert_gap(&mut self, pos: usize, len: usize) -> Result<&mut [u8], RuntimeError> {
        self.chk_idx_all(pos)?;
        let new_size = self
            .len()
            .checked_add(len)
            .ok_or(RuntimeError::Overflow)?;
        mem::check_size(new_size)?;
        let v = self.make_unique();
        if new_size > v.capacity() {
            let cap = mem::grow_capacity(new_size);
            v.reserve_exact(cap - v.len());
        }
        v.splice(pos..pos, std::iter::repeat(0u8).take(len));
        Ok(&mut v[pos..pos + len])
    }

    pub fn insert(&mut self, pos: usize, data: &[u8]) -> Result<(), RuntimeError> {
        if data.is_empty() {
            return self.chk_idx_all(pos);
        }
        // A source aliasing this buffer necessarily holds a second handle,
        // so the copy-on-write clone keeps it readable while we splice.
        let gap = self.insert_gap(pos, data.len())?;
        gap.copy_from_slice(data);
        Ok(())
    }

    pub fn append(&mut self, data: &[u8]) -> Result<(), RuntimeError> {
        self.insert(self.len(), data)
    }

    pub fn push(&mut self, b: u8) -> Result<(), RuntimeError> {
        let gap = self.insert_gap(self.len(), 1)?;
        gap[0] = b;
        Ok(())
    }

    /// Erase `len` bytes at `pos`; shrinks the allocation when the buffer
    /// drops far below capacity.
    pub fn erase(&mut self, pos: usize, len: usize) -> Result<(), RuntimeError> {
        if len == 0 {
            return self.chk_idx_all(pos);
        }
        self.chk_idx(pos)?;
        let end = pos.checked_add(len).ok_or(RuntimeError::Overflow)?;
        self.chk_idx_all(end)?;
        let new_size = self.len() - len;
        if new_size == 0 {
            self.clear();
            return Ok(());
        }
        let shrink = mem::should_shrink(new_size, self.capacity());
        let v = self.make_unique();
        v.drain(pos..end);
        if shrink {
            v.shrink_to_fit();
        }
        Ok(())
    }

    pub fn pop_back(&mut self, len: usize) -> Result<(), RuntimeError> {
        if len == 0 {
            return Ok(());
        }
        let size = self.len();
        if len > size {
            return Err(RuntimeError::Index);
        }
        self.erase(size - len, len)
    }

    /// Grow with `fill` bytes or truncate, to exactly `new_size`.
    pub fn resize(&mut self, new_size: usize, fill: u8) -> Result<(), RuntimeError> {
        let old = self.len();
        if new_size == old {
            Ok(())
        } else if new_size == 0 {
            self.clear();
            Ok(())
        } else if new_size < old {
            self.erase(new_size, old - new_size)
        } else {
            let gap = self.insert_gap(old, new_size - old)?;
            for b in gap.iter_mut() {
                *b = fill;
            }
            Ok(())
        }
    }
}

impl std::fmt::Debug for Buf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Buf({} bytes)", self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_buf_has_no_allocation() {
        let b = Buf::new();
        assert_eq!(b.len(), 0);
        assert_eq!(b.capacity(), 0);
        assert!(b.is_unique());
    }

    #[test]
    fn test_insert_at_size_is_append() {
        let mut b = Buf::from_bytes(b"ab");
        b.insert(2, b"cd").unwrap();
        assert_eq!(b.data(), b"abcd");
        assert!(b.insert(5, b"x").is_err());
    }

    #[test]
    fn test_copy_on_write() {
        let mut a = Buf::from_bytes(b"hello");
        let b = a.clone();
        assert!(a.same_object(&b));
        a.set_at(0, b'H').unwrap();
        assert_eq!(a.data(), b"Hello");
        assert_eq!(b.data(), b"hello");
        assert!(!a.same_object(&b));
    }

    #[test]
    fn test_growth_snaps_to_64() {
        let mut b = Buf::new();
        b.append(b"x").unwrap();
        assert_eq!(b.capacity(), 64);
    }

    #[test]
    fn test_erase_to_empty_drops_allocation() {
        let mut b = Buf::from_bytes(b"abc");
        b.erase(0, 3).unwrap();
        assert!(b.is_empty());
        assert_eq!(b.capacity(), 0);
    }

    #[test]
    fn test_erase_middle() {
        let mut b = Buf::from_bytes(b"abcdef");
        b.erase(1, 3).unwrap();
        assert_eq!(b.data(), b"aef");
        assert!(b.erase(3, 1).is_err());
    }

    #[test]
    fn test_resize_fill_and_truncate() {
        let mut b = Buf::from_bytes(b"ab");
        b.resize(4, b'.').unwrap();
        assert_eq!(b.data(), b"ab..");
        b.resize(1, 0).unwrap();
        assert_eq!(b.data(), b"a");
    }

    #[test]
    fn test_aliasing_append() {
        let mut b = Buf::from_bytes(b"abc");
        let view = b.clone();
        b.insert(0, view.data()).unwrap();
        assert_eq!(b.data(), b"abcabc");
    }
}
