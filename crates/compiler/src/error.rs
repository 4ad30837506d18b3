//! Compile-time error kinds.

use shn_core::RuntimeError;
use shn_runtime::world::SymbolError;

/// Everything that can abort compilation of a module. The first error
/// aborts; there is no statement-level recovery in module compilation.
#[derive(Debug)]
pub enum CompileError {
    /// Type mismatch with a context message.
    Type(String),
    NotAnLValue(String),
    /// Jump distance exceeds the 16-bit signed encoding.
    JumpTooFar,
    Duplicate(String),
    Unknown(String),
    InvalidCast(String),
    Parse { file: String, line: u32, msg: String },
    /// A failure while running folded constant code (or any runtime error
    /// surfaced through the driver).
    Runtime(RuntimeError),
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileError::Type(msg) => write!(f, "{}", msg),
            CompileError::NotAnLValue(msg) => write!(f, "{}", msg),
            CompileError::JumpTooFar => write!(f, "Jump target is too far away"),
            CompileError::Duplicate(n) => write!(f, "'{}' is already defined", n),
            CompileError::Unknown(n) => write!(f, "Unknown identifier '{}'", n),
            CompileError::InvalidCast(msg) => write!(f, "{}", msg),
            CompileError::Parse { file, line, msg } => {
                write!(f, "{}({}): {}", file, line, msg)
            }
            CompileError::Runtime(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for CompileError {}

impl From<RuntimeError> for CompileError {
    fn from(e: RuntimeError) -> CompileError {
        CompileError::Runtime(e)
    }
}

impl From<SymbolError> for CompileError {
    fn from(e: SymbolError) -> CompileError {
        match e {
            SymbolError::Duplicate(n) => CompileError::Duplicate(n),
            SymbolError::Unknown(n) => CompileError::Unknown(n),
        }
    }
}
