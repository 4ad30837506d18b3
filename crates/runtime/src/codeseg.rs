//! Code segments.
//!
//! A segment is a byte string of instructions plus a literal pool. The
//! code generator needs more than append: the l-value rewriter replaces an
//! opcode in place, cuts a whole instruction out to re-append it after the
//! RHS, and truncates to a primary-loader offset when a sub-expression is
//! undone. Multibyte immediates are host-endian and read unaligned.

use shn_core::{Buf, Str};

use crate::opcodes::{ArgKind, Op};
use crate::types::StateId;

#[derive(Default, Debug)]
pub struct CodeSeg {
    code: Buf,
    strings: Vec<Str>,
    /// State this segment belongs to; None for scratch const-expr segments.
    pub state: Option<StateId>,
    /// High-water mark of the simulated operand stack, set by the
    /// generator as it emits.
    pub stack_size: usize,
    closed: bool,
}

impl CodeSeg {
    pub fn new(state: Option<StateId>) -> CodeSeg {
        CodeSeg { code: Buf::new(), strings: Vec::new(), state, stack_size: 0, closed: false }
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn code(&self) -> &[u8] {
        self.code.data()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Seal the segment with `End`. No structural edits after this.
    pub fn close(&mut self) {
        debug_assert!(!self.closed);
        self.append_op(Op::End);
        self.closed = true;
    }

    // --- emit ------------------------------------------------------------ //

    pub fn append_op(&mut self, op: Op) {
        debug_assert!(!self.closed);
        self.append_u8(op as u8);
    }

    pub fn append_u8(&mut self, v: u8) {
        self.code.push(v).expect("code segment growth");
    }

    pub fn append_i8(&mut self, v: i8) {
        self.append_u8(v as u8);
    }

    pub fn append_u16(&mut self, v: u16) {
        self.append_bytes(&v.to_ne_bytes());
    }

    pub fn append_i16(&mut self, v: i16) {
        self.append_bytes(&v.to_ne_bytes());
    }

    pub fn append_u32(&mut self, v: u32) {
        self.append_bytes(&v.to_ne_bytes());
    }

    pub fn append_i64(&mut self, v: i64) {
        self.append_bytes(&v.to_ne_bytes());
    }

    pub fn append_bytes(&mut self, data: &[u8]) {
        self.code.append(data).expect("code segment growth");
    }

    /// Register a literal string; the u32 index is the opcode immediate.
    pub fn add_string(&mut self, s: Str) -> u32 {
        // Literal pools are small; a linear scan keeps duplicates merged.
        for (i, existing) in self.strings.iter().enumerate() {
            if *existing == s {
                return i as u32;
            }
        }
        self.strings.push(s);
        (self.strings.len() - 1) as u32
    }

    pub fn string(&self, idx: u32) -> &Str {
        &self.strings[idx as usize]
    }

    // --- read ------------------------------------------------------------ //

    pub fn op_at(&self, offs: usize) -> Op {
        Op::decode(self.code.data()[offs]).unwrap_or(Op::Inv)
    }

    pub fn op_len_at(&self, offs: usize) -> usize {
        self.op_at(offs).len()
    }

    pub fn u8_at(&self, offs: usize) -> u8 {
        self.code.data()[offs]
    }

    pub fn i8_at(&self, offs: usize) -> i8 {
        self.code.data()[offs] as i8
    }

    pub fn u32_at(&self, offs: usize) -> u32 {
        let d = self.code.data();
        u32::from_ne_bytes([d[offs], d[offs + 1], d[offs + 2], d[offs + 3]])
    }

    pub fn i16_at(&self, offs: usize) -> i16 {
        let d = self.code.data();
        i16::from_ne_bytes([d[offs], d[offs + 1]])
    }

    pub fn i64_at(&self, offs: usize) -> i64 {
        let d = self.code.data();
        let mut b = [0u8; 8];
        b.copy_from_slice(&d[offs..offs + 8]);
        i64::from_ne_bytes(b)
    }

    /// The type-id immediate of an opcode with a `Type` argument.
    pub fn type_arg_at(&self, offs: usize) -> u32 {
        debug_assert_eq!(self.op_at(offs).arg(), ArgKind::Type);
        self.u32_at(offs + 1)
    }

    // --- surgery (code generation only) ----------------------------------- //

    /// Truncate the segment to `from` bytes (undoing a sub-expression).
    pub fn erase_from(&mut self, from: usize) {
        debug_assert!(!self.closed);
        let len = self.code.len();
        self.code.erase(from, len - from).expect("truncate in range");
    }

    /// Remove the instruction at `offs` entirely.
    pub fn erase_op(&mut self, offs: usize) {
        debug_assert!(!self.closed);
        let len = self.op_len_at(offs);
        self.code.erase(offs, len).expect("instruction in range");
    }

    /// Cut the instruction at `offs` out of the stream and return its
    /// bytes, to be re-appended later.
    pub fn cut_op(&mut self, offs: usize) -> Vec<u8> {
        debug_assert!(!self.closed);
        let len = self.op_len_at(offs);
        let bytes = self.code.data()[offs..offs + len].to_vec();
        self.code.erase(offs, len).expect("instruction in range");
        bytes
    }

    /// Replace the opcode byte in place; the argument layout must match.
    pub fn replace_op_at(&mut self, offs: usize, op: Op) {
        debug_assert!(!self.closed);
        debug_assert_eq!(self.op_at(offs).arg(), op.arg());
        self.code.set_at(offs, op as u8).expect("offset in range");
    }

    /// Patch a forward jump's offset immediate.
    pub fn set_jump_offs_at(&mut self, offs: usize, value: i16) {
        debug_assert!(!self.closed);
        let b = value.to_ne_bytes();
        self.code.set_at(offs, b[0]).expect("offset in range");
        self.code.set_at(offs + 1, b[1]).expect("offset in range");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_read() {
        let mut seg = CodeSeg::new(None);
        seg.append_op(Op::LoadOrd);
        seg.append_i64(-7);
        seg.append_op(Op::LoadByte);
        seg.append_u8(42);
        assert_eq!(seg.op_at(0), Op::LoadOrd);
        assert_eq!(seg.i64_at(1), -7);
        assert_eq!(seg.op_at(9), Op::LoadByte);
        assert_eq!(seg.u8_at(10), 42);
    }

    #[test]
    fn test_cut_and_reappend() {
        let mut seg = CodeSeg::new(None);
        seg.append_op(Op::Load0);
        seg.append_op(Op::LoadByte);
        seg.append_u8(9);
        let cut = seg.cut_op(1);
        assert_eq!(cut, vec![Op::LoadByte as u8, 9]);
        assert_eq!(seg.len(), 1);
        seg.append_bytes(&cut);
        assert_eq!(seg.op_at(1), Op::LoadByte);
    }

    #[test]
    fn test_replace_keeps_layout() {
        let mut seg = CodeSeg::new(None);
        seg.append_op(Op::LoadSelfVar);
        seg.append_u8(3);
        seg.replace_op_at(0, Op::StoreSelfVar);
        assert_eq!(seg.op_at(0), Op::StoreSelfVar);
        assert_eq!(seg.u8_at(1), 3);
    }

    #[test]
    fn test_string_pool_merges_duplicates() {
        let mut seg = CodeSeg::new(None);
        let a = seg.add_string(Str::from("ab"));
        let b = seg.add_string(Str::from("cd"));
        let c = seg.add_string(Str::from("ab"));
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(*seg.string(b), Str::from("cd"));
    }
}
