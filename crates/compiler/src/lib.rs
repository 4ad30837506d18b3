//! Shannon compiler library.
//!
//! The code generator ([`CodeGen`]) emits bytecode while simulating the
//! operand stack; the front end ([`parser`]) drives it straight from the
//! token stream; [`Context`] owns the world and runs compiled modules on
//! the VM.

pub mod codegen;
pub mod config;
pub mod context;
pub mod error;
pub mod lexer;
pub mod parser;

pub use codegen::CodeGen;
pub use config::CompilerOptions;
pub use context::Context;
pub use error::CompileError;
pub use parser::compile_module;
