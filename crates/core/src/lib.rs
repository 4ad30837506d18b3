//! Shannon core: the value model shared by the compiler and the VM.
//!
//! This crate provides the language-agnostic substrate the rest of the
//! toolchain is built on:
//!
//! - `Buf`: refcounted copy-on-write byte buffer with a fixed growth policy
//! - `Str`: byte string over `Buf`, plus integer formatting/parsing helpers
//! - `CharSet`: 256-bit ordinal bitmap (token sets, small ordinal sets)
//! - `Variant`: the tagged dynamic value, with its container handle types
//! - `RtStack`: the operand stack with a per-activation base index
//!
//! Key design principle: every heterogeneous container is a cheap-to-clone
//! shared handle; mutation through a shared handle clones the payload first
//! (copy-on-write), so snapshots taken through other handles keep reading
//! the pre-mutation state.

pub mod buf;
pub mod charset;
pub mod error;
pub mod mem;
pub mod stack;
pub mod strbase;
pub mod variant;

pub use buf::Buf;
pub use charset::CharSet;
pub use error::RuntimeError;
pub use stack::RtStack;
pub use strbase::{int_to_str, parse_int, to_printable, to_quoted, Str};
pub use variant::{
    DictData, Obj, OrdSet, Place, RefBox, RtObj, VarDict, VarSet, VarTag, VarVec, Variant,
};
