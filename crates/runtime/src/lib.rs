//! Shannon runtime: everything needed to execute compiled code.
//!
//! - `opcodes`: the stable opcode enumeration with per-opcode argument
//!   layout metadata, shared by the VM, the code generator and the
//!   disassembler
//! - `codeseg`: byte-string code segments with typed immediates and the
//!   cut/replace surgery the l-value rewriter relies on
//! - `types`: runtime type descriptors (ordinal ranges, enums, containers,
//!   fifos, function prototypes, states) with identity/assignability rules
//!   and cached derivations
//! - `world`: the type/state stores plus the built-in system module
//!   ("queen bee") that owns the primitives and the standard I/O slots
//! - `stateobj`: heap records of inner-variable slots, one per state
//! - `vm`: the dispatch loop
//! - `fifo`: character fifos over memory, strings and file descriptors
//! - `dis`: the listing/disassembly writer

pub mod codeseg;
pub mod dis;
pub mod fifo;
pub mod opcodes;
pub mod stateobj;
pub mod types;
pub mod vm;
pub mod world;

pub use codeseg::CodeSeg;
pub use fifo::{Fifo, InText, MemFifo, OutText, StdFifo, StrFifo};
pub use opcodes::{ArgKind, Op, OpInfo, OPTABLE};
pub use stateobj::StateObj;
pub use types::{Definition, FormalArg, Prototype, StateId, Symbol, TypeId, TypeKind};
pub use world::{SymbolError, TypeRefObj, World};
