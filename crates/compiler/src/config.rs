//! Compiler options.
//!
//! One struct passed to the compiler and the driver. Defaults match a
//! debug-friendly build: assertions and dumps compiled in, line numbers
//! emitted. Options can be loaded from a TOML file and overridden from
//! the CLI.

use serde::Deserialize;

use crate::error::CompileError;

pub const DEFAULT_STACK_SIZE: usize = 8192;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompilerOptions {
    /// When false, `assert` statements emit no code.
    pub enable_assert: bool,
    /// When false, `dump` statements emit no code.
    pub enable_dump: bool,
    /// Emit a LineNum opcode before each statement.
    pub line_numbers: bool,
    /// Write a disassembly next to each compiled module.
    pub vm_listing: bool,
    /// Operand-stack reservation, in variant slots.
    pub stack_size: usize,
    /// Directories searched for `uses` imports.
    pub module_path: Vec<String>,
}

impl Default for CompilerOptions {
    fn default() -> CompilerOptions {
        CompilerOptions {
            enable_assert: true,
            enable_dump: true,
            line_numbers: true,
            vm_listing: false,
            stack_size: DEFAULT_STACK_SIZE,
            module_path: Vec::new(),
        }
    }
}

impl CompilerOptions {
    /// Release-style settings: no assertions, no dumps, no line tracking.
    pub fn set_debug_opts(&mut self, debug: bool) {
        self.enable_assert = debug;
        self.enable_dump = debug;
        self.line_numbers = debug;
    }

    pub fn load(path: &str) -> Result<CompilerOptions, CompileError> {
        let text = std::fs::read_to_string(path).map_err(|e| CompileError::Parse {
            file: path.into(),
            line: 0,
            msg: e.to_string(),
        })?;
        toml::from_str(&text).map_err(|e| CompileError::Parse {
            file: path.into(),
            line: 0,
            msg: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let o = CompilerOptions::default();
        assert!(o.enable_assert);
        assert_eq!(o.stack_size, DEFAULT_STACK_SIZE);
    }

    #[test]
    fn test_toml_round_trip() {
        let o: CompilerOptions =
            toml::from_str("enable_assert = false\nstack_size = 256\n").unwrap();
        assert!(!o.enable_assert);
        assert_eq!(o.stack_size, 256);
        assert!(o.enable_dump);
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(toml::from_str::<CompilerOptions>("bogus = 1\n").is_err());
    }
}
