//! The tokenizer.
//!
//! Reads source text through the buffered character-fifo interface. One
//! token of lookahead; the raw text of consumed tokens can be recorded so
//! `assert` and `dump` can embed the expression source in the emitted
//! code.

use std::sync::Arc;

use shn_core::{parse_int, CharSet, Str};
use shn_runtime::fifo::Fifo;

use crate::error::CompileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tok {
    Eof,
    /// Statement separator: newline or `;`.
    Sep,
    Ident,
    IntVal,
    StrVal,

    LParen,
    RParen,
    LSquare,
    RSquare,
    LCurly,
    RCurly,
    Comma,
    Period,
    Range, // ..
    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
    ModAssign,
    CatAssign, // |=

    Plus,
    Minus,
    Star,
    Slash,
    Cat, // |
    Caret,
    At,
    Hash,
    Question,
    Shl,
    Shr,

    Equal, // ==
    NotEq, // <>
    LessThan,
    LessEq,
    GreaterThan,
    GreaterEq,

    // word operators and keywords
    KwMod,
    KwAnd,
    KwOr,
    KwXor,
    KwNot,
    KwIn,
    KwIs,
    KwAs,
    KwIf,
    KwTypeOf,
    KwDef,
    KwVar,
    KwConst,
    KwAssert,
    KwDump,
    KwExit,
    KwIns,
    KwDel,
}

fn keyword(ident: &str) -> Option<Tok> {
    Some(match ident {
        "mod" => Tok::KwMod,
        "and" => Tok::KwAnd,
        "or" => Tok::KwOr,
        "xor" => Tok::KwXor,
        "not" => Tok::KwNot,
        "in" => Tok::KwIn,
        "is" => Tok::KwIs,
        "as" => Tok::KwAs,
        "if" => Tok::KwIf,
        "typeof" => Tok::KwTypeOf,
        "def" => Tok::KwDef,
        "var" => Tok::KwVar,
        "const" => Tok::KwConst,
        "assert" => Tok::KwAssert,
        "dump" => Tok::KwDump,
        "exit" => Tok::KwExit,
        "ins" => Tok::KwIns,
        "del" => Tok::KwDel,
        _ => return None,
    })
}

fn ident_first() -> &'static CharSet {
    static CS: std::sync::OnceLock<CharSet> = std::sync::OnceLock::new();
    CS.get_or_init(|| CharSet::parse("a-zA-Z_"))
}

fn ident_rest() -> &'static CharSet {
    static CS: std::sync::OnceLock<CharSet> = std::sync::OnceLock::new();
    CS.get_or_init(|| CharSet::parse("a-zA-Z0-9_"))
}

fn digits() -> &'static CharSet {
    static CS: std::sync::OnceLock<CharSet> = std::sync::OnceLock::new();
    CS.get_or_init(|| CharSet::parse("0-9"))
}

fn hex_digits() -> &'static CharSet {
    static CS: std::sync::OnceLock<CharSet> = std::sync::OnceLock::new();
    CS.get_or_init(|| CharSet::parse("0-9a-fA-F"))
}

pub struct Lexer {
    src: Arc<dyn Fifo>,
    file: String,
    line: u32,
    pub tok: Tok,
    /// Identifier text of the current token.
    pub text: String,
    pub int_val: i64,
    pub str_val: Str,
    /// Raw source text of the current token (for recording).
    raw: String,
    /// Consumed-token text accumulates here while recording; the
    /// unconsumed lookahead token never enters it.
    recording: Option<String>,
}

impl Lexer {
    pub fn new(src: Arc<dyn Fifo>, file: impl Into<String>) -> Result<Lexer, CompileError> {
        let mut lex = Lexer {
            src,
            file: file.into(),
            line: 1,
            tok: Tok::Eof,
            text: String::new(),
            int_val: 0,
            str_val: Str::new(),
            raw: String::new(),
            recording: None,
        };
        lex.next()?;
        Ok(lex)
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn error(&self, msg: impl Into<String>) -> CompileError {
        CompileError::Parse { file: self.file.clone(), line: self.line, msg: msg.into() }
    }

    /// Begin capturing raw source text, starting with the current token
    /// (whose text is folded in when it is consumed).
    pub fn start_recording(&mut self) {
        self.recording = Some(String::new());
    }

    /// Stop capturing; the current (unconsumed) token is excluded.
    pub fn stop_recording(&mut self) -> String {
        match self.recording.take() {
            Some(buf) => buf.trim().to_string(),
            None => String::new(),
        }
    }

    fn getc(&mut self) -> Option<u8> {
        let c = self.src.get()?;
        self.raw.push(c as char);
        Some(c)
    }

    fn peekc(&self) -> Option<u8> {
        self.src.preview()
    }

    fn getc_if(&mut self, c: u8) -> bool {
        if self.peekc() == Some(c) {
            self.getc();
            true
        } else {
            false
        }
    }

    /// Advance to the next token.
    pub fn next(&mut self) -> Result<Tok, CompileError> {
        // Move the finished token's raw text into the recording, then
        // start collecting the new one.
        if let Some(buf) = &mut self.recording {
            buf.push_str(&self.raw);
        }
        self.raw.clear();

        // Skip blanks and comments (but newlines are tokens).
        loop {
            match self.peekc() {
                Some(b' ') | Some(b'\t') => {
                    self.getc();
                }
                Some(b'/') => {
                    // Only a comment if followed by another slash.
                    self.getc();
                    if self.getc_if(b'/') {
                        while let Some(c) = self.peekc() {
                            if c == b'\n' || c == b'\r' {
                                break;
                            }
                            self.getc();
                        }
                    } else {
                        self.tok = Tok::Slash;
                        return Ok(self.tok);
                    }
                }
                _ => break,
            }
        }
        // Flush skipped whitespace so recorded text keeps its spacing.
        if let Some(buf) = &mut self.recording {
            buf.push_str(&self.raw);
        }
        self.raw.clear();

        let c = match self.getc() {
            None => {
                self.tok = Tok::Eof;
                return Ok(self.tok);
            }
            Some(c) => c,
        };

        self.tok = match c {
            b'\n' => {
                self.line += 1;
                Tok::Sep
            }
            b'\r' => {
                self.getc_if(b'\n');
                self.line += 1;
                Tok::Sep
            }
            b';' => Tok::Sep,
            b'(' => Tok::LParen,
            b')' => Tok::RParen,
            b'[' => Tok::LSquare,
            b']' => Tok::RSquare,
            b'{' => Tok::LCurly,
            b'}' => Tok::RCurly,
            b',' => Tok::Comma,
            b'^' => Tok::Caret,
            b'@' => Tok::At,
            b'#' => Tok::Hash,
            b'?' => Tok::Question,
            b'.' => {
                if self.getc_if(b'.') {
                    Tok::Range
                } else {
                    Tok::Period
                }
            }
            b'=' => {
                if self.getc_if(b'=') {
                    Tok::Equal
                } else {
                    Tok::Assign
                }
            }
            b'+' => {
                if self.getc_if(b'=') {
                    Tok::AddAssign
                } else {
                    Tok::Plus
                }
            }
            b'-' => {
                if self.getc_if(b'=') {
                    Tok::SubAssign
                } else {
                    Tok::Minus
                }
            }
            b'*' => {
                if self.getc_if(b'=') {
                    Tok::MulAssign
                } else {
                    Tok::Star
                }
            }
            b'|' => {
                if self.getc_if(b'=') {
                    Tok::CatAssign
                } else {
                    Tok::Cat
                }
            }
            b'<' => {
                if self.getc_if(b'=') {
                    Tok::LessEq
                } else if self.getc_if(b'>') {
                    Tok::NotEq
                } else if self.getc_if(b'<') {
                    Tok::Shl
                } else {
                    Tok::LessThan
                }
            }
            b'>' => {
                if self.getc_if(b'=') {
                    Tok::GreaterEq
                } else if self.getc_if(b'>') {
                    Tok::Shr
                } else {
                    Tok::GreaterThan
                }
            }
            b'"' => {
                self.str_val = self.scan_string()?;
                Tok::StrVal
            }
            c if digits().contains(c) => {
                self.int_val = self.scan_number(c)?;
                Tok::IntVal
            }
            c if ident_first().contains(c) => {
                let mut ident = String::new();
                ident.push(c as char);
                while let Some(n) = self.peekc() {
                    if !ident_rest().contains(n) {
                        break;
                    }
                    self.getc();
                    ident.push(n as char);
                }
                match keyword(&ident) {
                    Some(kw) => kw,
                    None => {
                        self.text = ident;
                        Tok::Ident
                    }
                }
            }
            other => {
                return Err(self.error(format!("Unexpected character '{}'", other as char)));
            }
        };
        Ok(self.tok)
    }

    fn scan_number(&mut self, first: u8) -> Result<i64, CompileError> {
        let mut digits_buf = vec![first];
        let mut base = 10;
        if first == b'0' && (self.peekc() == Some(b'x') || self.peekc() == Some(b'X')) {
            self.getc();
            base = 16;
            digits_buf.clear();
        }
        let set = if base == 16 { hex_digits() } else { digits() };
        while let Some(c) = self.peekc() {
            if !set.contains(c) {
                break;
            }
            self.getc();
            digits_buf.push(c);
        }
        let v = parse_int(&digits_buf, base).map_err(|_| self.error("Bad integer literal"))?;
        i64::try_from(v).map_err(|_| self.error("Integer literal too large"))
    }

    fn scan_string(&mut self) -> Result<Str, CompileError> {
        let mut out: Vec<u8> = Vec::new();
        loop {
            let c = self.getc().ok_or_else(|| self.error("Unterminated string"))?;
            match c {
                b'"' => break,
                b'\n' => return Err(self.error("Unterminated string")),
                b'\\' => {
                    let e = self.getc().ok_or_else(|| self.error("Unterminated string"))?;
                    match e {
                        b'n' => out.push(b'\n'),
                        b't' => out.push(b'\t'),
                        b'r' => out.push(b'\r'),
                        b'0' => out.push(0),
                        b'\\' => out.push(b'\\'),
                        b'"' => out.push(b'"'),
                        b'x' => {
                            let h1 = self.getc().ok_or_else(|| self.error("Bad escape"))?;
                            let h2 = self.getc().ok_or_else(|| self.error("Bad escape"))?;
                            let v = parse_int(&[h1, h2], 16)
                                .map_err(|_| self.error("Bad hex escape"))?;
                            out.push(v as u8);
                        }
                        _ => return Err(self.error("Unknown escape sequence")),
                    }
                }
                other => out.push(other),
            }
        }
        Ok(Str::from_bytes(&out))
    }

    pub fn skip_if(&mut self, tok: Tok) -> Result<bool, CompileError> {
        if self.tok == tok {
            self.next()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn expect(&mut self, tok: Tok, what: &str) -> Result<(), CompileError> {
        if self.tok != tok {
            return Err(self.error(format!("{} expected", what)));
        }
        self.next()?;
        Ok(())
    }

    pub fn get_identifier(&mut self) -> Result<String, CompileError> {
        if self.tok != Tok::Ident {
            return Err(self.error("Identifier expected"));
        }
        let ident = self.text.clone();
        self.next()?;
        Ok(ident)
    }

    /// Skip blank statement separators.
    pub fn skip_seps(&mut self) -> Result<(), CompileError> {
        while self.tok == Tok::Sep {
            self.next()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shn_runtime::fifo::StrFifo;

    fn lex_all(text: &str) -> Vec<Tok> {
        let mut lex = Lexer::new(StrFifo::with_text(text), "<test>").unwrap();
        let mut toks = vec![lex.tok];
        while lex.tok != Tok::Eof {
            lex.next().unwrap();
            toks.push(lex.tok);
        }
        toks
    }

    #[test]
    fn test_basic_tokens() {
        assert_eq!(
            lex_all("def n = 2 * (3 + 4)"),
            vec![
                Tok::KwDef,
                Tok::Ident,
                Tok::Assign,
                Tok::IntVal,
                Tok::Star,
                Tok::LParen,
                Tok::IntVal,
                Tok::Plus,
                Tok::IntVal,
                Tok::RParen,
                Tok::Eof
            ]
        );
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            lex_all("== <> <= >= .. | |= += << >>"),
            vec![
                Tok::Equal,
                Tok::NotEq,
                Tok::LessEq,
                Tok::GreaterEq,
                Tok::Range,
                Tok::Cat,
                Tok::CatAssign,
                Tok::AddAssign,
                Tok::Shl,
                Tok::Shr,
                Tok::Eof
            ]
        );
    }

    #[test]
    fn test_string_and_number_literals() {
        let mut lex = Lexer::new(StrFifo::with_text("\"a\\nb\" 0x1f 42"), "<test>").unwrap();
        assert_eq!(lex.tok, Tok::StrVal);
        assert_eq!(lex.str_val, Str::from("a\nb"));
        lex.next().unwrap();
        assert_eq!(lex.tok, Tok::IntVal);
        assert_eq!(lex.int_val, 31);
        lex.next().unwrap();
        assert_eq!(lex.int_val, 42);
    }

    #[test]
    fn test_comments_and_lines() {
        let mut lex = Lexer::new(StrFifo::with_text("a // comment\nb"), "<t>").unwrap();
        assert_eq!(lex.tok, Tok::Ident);
        assert_eq!(lex.line(), 1);
        lex.next().unwrap();
        assert_eq!(lex.tok, Tok::Sep);
        lex.next().unwrap();
        assert_eq!(lex.tok, Tok::Ident);
        assert_eq!(lex.text, "b");
        assert_eq!(lex.line(), 2);
    }

    #[test]
    fn test_recording_captures_expression_text() {
        let mut lex = Lexer::new(StrFifo::with_text("assert x == 4\n"), "<t>").unwrap();
        assert_eq!(lex.tok, Tok::KwAssert);
        lex.next().unwrap();
        lex.start_recording();
        while lex.tok != Tok::Sep && lex.tok != Tok::Eof {
            lex.next().unwrap();
        }
        assert_eq!(lex.stop_recording(), "x == 4");
    }
}
