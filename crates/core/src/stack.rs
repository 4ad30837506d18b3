//! The operand stack.
//!
//! A contiguous variant array pre-reserved to the configured maximum, with
//! a separately tracked base index per activation. Arguments sit below the
//! base at negative offsets, locals and temporaries above it.

use crate::error::RuntimeError;
use crate::variant::Variant;

pub struct RtStack {
    slots: Vec<Variant>,
    base: usize,
}

impl RtStack {
    /// Reserve the whole stack up front; growing later would invalidate
    /// the frame discipline, so running out is fatal.
    pub fn new(max_slots: usize) -> RtStack {
        RtStack { slots: Vec::with_capacity(max_slots), base: 0 }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn set_base(&mut self, base: usize) {
        self.base = base;
    }

    pub fn push(&mut self, v: Variant) -> Result<(), RuntimeError> {
        if self.slots.len() == self.slots.capacity() {
            return Err(RuntimeError::StackOverflow);
        }
        self.slots.push(v);
        Ok(())
    }

    pub fn pop(&mut self) -> Variant {
        self.slots.pop().unwrap_or_default()
    }

    pub fn top(&self) -> &Variant {
        self.slots.last().unwrap_or(&Variant::Void)
    }

    pub fn top_mut(&mut self) -> Option<&mut Variant> {
        self.slots.last_mut()
    }

    /// Absolute slot access (places use absolute indexes).
    pub fn at(&self, abs: usize) -> Result<&Variant, RuntimeError> {
        self.slots.get(abs).ok_or(RuntimeError::Index)
    }

    pub fn at_mut(&mut self, abs: usize) -> Result<&mut Variant, RuntimeError> {
        self.slots.get_mut(abs).ok_or(RuntimeError::Index)
    }

    /// Resolve a signed base-relative offset to an absolute slot index.
    pub fn abs_index(&self, offs: i32) -> Result<usize, RuntimeError> {
        let abs = self.base as i64 + offs as i64;
        if abs < 0 || abs as usize >= self.slots.len() {
            Err(RuntimeError::Index)
        } else {
            Ok(abs as usize)
        }
    }

    /// Drop everything above `level` (frame teardown).
    pub fn truncate(&mut self, level: usize) {
        while self.slots.len() > level {
            self.slots.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop() {
        let mut s = RtStack::new(8);
        s.push(Variant::Ord(1)).unwrap();
        s.push(Variant::Ord(2)).unwrap();
        assert_eq!(*s.top(), Variant::Ord(2));
        assert_eq!(s.pop(), Variant::Ord(2));
        assert_eq!(s.pop(), Variant::Ord(1));
        assert!(s.is_empty());
    }

    #[test]
    fn test_overflow_is_fatal() {
        let mut s = RtStack::new(2);
        s.push(Variant::Ord(1)).unwrap();
        s.push(Variant::Ord(2)).unwrap();
        assert!(matches!(s.push(Variant::Ord(3)), Err(RuntimeError::StackOverflow)));
    }

    #[test]
    fn test_base_relative_addressing() {
        let mut s = RtStack::new(8);
        s.push(Variant::Ord(10)).unwrap(); // arg
        s.push(Variant::Ord(20)).unwrap(); // arg
        s.set_base(2);
        s.push(Variant::Ord(30)).unwrap(); // local 0
        assert_eq!(*s.at(s.abs_index(0).unwrap()).unwrap(), Variant::Ord(30));
        assert_eq!(*s.at(s.abs_index(-2).unwrap()).unwrap(), Variant::Ord(10));
        assert!(s.abs_index(-3).is_err());
    }
}
