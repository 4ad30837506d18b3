//! Runtime error kinds.
//!
//! Every failure that can unwind a VM invocation is a `RuntimeError`.
//! `Exit` is not an error in the usual sense: it is the distinguished
//! control-flow signal raised by the `Exit` opcode, caught by the driver.

use crate::variant::Variant;

/// Errors propagated by unwinding the current VM (or const-fold) invocation.
#[derive(Debug)]
pub enum RuntimeError {
    /// Container size arithmetic exceeded the addressable maximum.
    Overflow,
    /// Index out of range for container access, erase or insert.
    Index,
    /// Variant tag mismatch in a checked context.
    Type,
    /// Ordinal value outside a subrange on a runtime cast.
    OutOfRange,
    DivisionByZero,
    /// The pre-reserved operand stack is full.
    StackOverflow,
    /// A variable-load trap opcode was executed inside a const expression.
    ConstExpr,
    /// `assert` failed; carries the recorded condition text and location.
    Assertion {
        cond: String,
        module: String,
        line: u32,
    },
    /// FIFO misuse: reading a write-only fifo, writing a read-only one, etc.
    Fifo(&'static str),
    /// I/O failure with the OS error code and the path involved.
    System { code: i32, path: String },
    /// Program termination via `exit`; carries the program result.
    Exit(Variant),
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeError::Overflow => write!(f, "Container overflow"),
            RuntimeError::Index => write!(f, "Index out of range"),
            RuntimeError::Type => write!(f, "Type mismatch"),
            RuntimeError::OutOfRange => write!(f, "Out of range"),
            RuntimeError::DivisionByZero => write!(f, "Division by zero"),
            RuntimeError::StackOverflow => write!(f, "Stack overflow"),
            RuntimeError::ConstExpr => {
                write!(f, "Variable access is not allowed in const expressions")
            }
            RuntimeError::Assertion { cond, module, line } => {
                write!(f, "Assertion failed: {} at {}({})", cond, module, line)
            }
            RuntimeError::Fifo(msg) => write!(f, "{}", msg),
            RuntimeError::System { code, path } => {
                let msg = std::io::Error::from_raw_os_error(*code);
                if path.is_empty() {
                    write!(f, "{}", msg)
                } else {
                    write!(f, "{} ({})", msg, path)
                }
            }
            RuntimeError::Exit(_) => write!(f, "exit"),
        }
    }
}

impl std::error::Error for RuntimeError {}
