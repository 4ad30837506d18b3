//! Character fifos.
//!
//! The fifo is the program's window onto the outside world: source files
//! are read through one, `sio`/`serr` are fifos over the standard file
//! descriptors, and listings or captured output go through the string
//! fifo. The parsing helpers (`token`, `skip`, `line`) work on any
//! implementation in terms of `preview`/`get`.

use std::any::Any;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Arc;

use shn_core::{CharSet, RtObj, RuntimeError, Str};

const READ_BUF_SIZE: usize = 4096;
const WRITE_BUF_SIZE: usize = 2048;

/// The character-fifo interface consumed by the scanner and the driver.
pub trait Fifo: RtObj {
    fn fifo_name(&self) -> String;

    /// True when no more characters can be dequeued. May probe the
    /// underlying descriptor; write-only fifos fail here.
    fn empty(&self) -> Result<bool, RuntimeError>;

    /// Look at the next character without consuming it.
    fn preview(&self) -> Option<u8>;

    /// Dequeue one character.
    fn get(&self) -> Option<u8>;

    fn enq(&self, data: &[u8]) -> Result<usize, RuntimeError>;

    fn flush(&self) -> Result<(), RuntimeError> {
        Ok(())
    }

    fn get_if(&self, c: u8) -> bool {
        if self.preview() == Some(c) {
            self.get();
            true
        } else {
            false
        }
    }

    /// At end of line (or end of input).
    fn eol(&self) -> bool {
        matches!(self.preview(), None | Some(b'\n') | Some(b'\r'))
    }

    fn skip_eol(&self) {
        if self.get_if(b'\r') {
            self.get_if(b'\n');
        } else {
            self.get_if(b'\n');
        }
    }

    /// Consume characters while they belong to `chars`.
    fn skip(&self, chars: &CharSet) {
        while let Some(c) = self.preview() {
            if !chars.contains(c) {
                break;
            }
            self.get();
        }
    }

    /// Consume and collect characters while they belong to `chars`.
    fn token(&self, chars: &CharSet) -> Str {
        let mut out = Vec::new();
        while let Some(c) = self.preview() {
            if !chars.contains(c) {
                break;
            }
            self.get();
            out.push(c);
        }
        Str::from_bytes(&out)
    }

    /// The rest of the current line; the line break is consumed.
    fn line(&self) -> Str {
        let mut out = Vec::new();
        while let Some(c) = self.preview() {
            if c == b'\n' || c == b'\r' {
                break;
            }
            self.get();
            out.push(c);
        }
        self.skip_eol();
        Str::from_bytes(&out)
    }

    fn enq_str(&self, s: &str) -> Result<(), RuntimeError> {
        self.enq(s.as_bytes()).map(|_| ())
    }
}

// --- memory fifo ---------------------------------------------------------- //

/// In-memory character queue; enqueue and dequeue are both O(1).
#[derive(Debug, Default)]
pub struct MemFifo {
    q: RefCell<VecDeque<u8>>,
}

// Fifos are mutated only from the single-threaded VM/compiler invocation
// that owns them; sharing across threads requires external
// synchronization (same contract as Variant).
unsafe impl Send for MemFifo {}
unsafe impl Sync for MemFifo {}

impl MemFifo {
    pub fn new() -> Arc<MemFifo> {
        Arc::new(MemFifo::default())
    }
}

impl RtObj for MemFifo {
    fn is_empty_obj(&self) -> bool {
        self.q.borrow().is_empty()
    }

    fn dump(&self, out: &mut dyn std::fmt::Write) -> std::fmt::Result {
        write!(out, "<fifo mem>")
    }

    fn enq_bytes(&self, data: &[u8]) -> Option<usize> {
        self.enq(data).ok()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Fifo for MemFifo {
    fn fifo_name(&self) -> String {
        "<mem>".into()
    }

    fn empty(&self) -> Result<bool, RuntimeError> {
        Ok(self.q.borrow().is_empty())
    }

    fn preview(&self) -> Option<u8> {
        self.q.borrow().front().copied()
    }

    fn get(&self) -> Option<u8> {
        self.q.borrow_mut().pop_front()
    }

    fn enq(&self, data: &[u8]) -> Result<usize, RuntimeError> {
        self.q.borrow_mut().extend(data.iter().copied());
        Ok(data.len())
    }
}

// --- string fifo ----------------------------------------------------------- //

#[derive(Debug, Default)]
struct StrFifoInner {
    data: Vec<u8>,
    pos: usize,
}

/// Fifo over a string buffer: reads from the front, writes to the back.
/// Used for source text in tests and for capturing diagnostics.
#[derive(Debug, Default)]
pub struct StrFifo {
    inner: RefCell<StrFifoInner>,
}

unsafe impl Send for StrFifo {}
unsafe impl Sync for StrFifo {}

impl StrFifo {
    pub fn new() -> Arc<StrFifo> {
        Arc::new(StrFifo::default())
    }

    pub fn with_text(text: &str) -> Arc<StrFifo> {
        let f = StrFifo::default();
        f.inner.borrow_mut().data.extend_from_slice(text.as_bytes());
        Arc::new(f)
    }

    /// Everything written and not yet consumed.
    pub fn all(&self) -> Str {
        let inner = self.inner.borrow();
        Str::from_bytes(&inner.data[inner.pos..])
    }
}

impl RtObj for StrFifo {
    fn is_empty_obj(&self) -> bool {
        let inner = self.inner.borrow();
        inner.pos >= inner.data.len()
    }

    fn dump(&self, out: &mut dyn std::fmt::Write) -> std::fmt::Result {
        write!(out, "<fifo str>")
    }

    fn enq_bytes(&self, data: &[u8]) -> Option<usize> {
        self.enq(data).ok()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Fifo for StrFifo {
    fn fifo_name(&self) -> String {
        "<str>".into()
    }

    fn empty(&self) -> Result<bool, RuntimeError> {
        Ok(self.is_empty_obj())
    }

    fn preview(&self) -> Option<u8> {
        let inner = self.inner.borrow();
        inner.data.get(inner.pos).copied()
    }

    fn get(&self) -> Option<u8> {
        let mut inner = self.inner.borrow_mut();
        let c = inner.data.get(inner.pos).copied()?;
        inner.pos += 1;
        Some(c)
    }

    fn enq(&self, data: &[u8]) -> Result<usize, RuntimeError> {
        self.inner.borrow_mut().data.extend_from_slice(data);
        Ok(data.len())
    }
}

// --- fd-backed fifos -------------------------------------------------------- //

fn sys_err(path: &str) -> RuntimeError {
    RuntimeError::System {
        code: std::io::Error::last_os_error().raw_os_error().unwrap_or(0),
        path: path.into(),
    }
}

#[derive(Debug)]
struct InBuf {
    buf: Vec<u8>,
    tail: usize,
    eof: bool,
}

/// Buffered input fifo over a file descriptor. Owns the descriptor when
/// opened from a path.
#[derive(Debug)]
pub struct InText {
    name: String,
    fd: i32,
    owns_fd: bool,
    inner: RefCell<InBuf>,
}

unsafe impl Send for InText {}
unsafe impl Sync for InText {}

impl InText {
    pub fn open(path: &str) -> Result<Arc<InText>, RuntimeError> {
        let cpath = std::ffi::CString::new(path).map_err(|_| RuntimeError::Fifo("Bad path"))?;
        let fd = unsafe { libc::open(cpath.as_ptr(), libc::O_RDONLY) };
        if fd < 0 {
            return Err(sys_err(path));
        }
        Ok(Arc::new(InText {
            name: path.into(),
            fd,
            owns_fd: true,
            inner: RefCell::new(InBuf { buf: Vec::new(), tail: 0, eof: false }),
        }))
    }

    pub fn from_fd(fd: i32, name: &str) -> Arc<InText> {
        Arc::new(InText {
            name: name.into(),
            fd,
            owns_fd: false,
            inner: RefCell::new(InBuf { buf: Vec::new(), tail: 0, eof: false }),
        })
    }

    /// Refill the buffer if it has been drained; false at end of file.
    fn fill(&self) -> bool {
        let mut inner = self.inner.borrow_mut();
        if inner.tail < inner.buf.len() {
            return true;
        }
        if inner.eof {
            return false;
        }
        inner.buf.resize(READ_BUF_SIZE, 0);
        inner.tail = 0;
        let n = unsafe {
            libc::read(self.fd, inner.buf.as_mut_ptr() as *mut libc::c_void, READ_BUF_SIZE)
        };
        if n <= 0 {
            inner.buf.clear();
            inner.eof = true;
            return false;
        }
        inner.buf.truncate(n as usize);
        true
    }
}

impl Drop for InText {
    fn drop(&mut self) {
        if self.owns_fd {
            unsafe { libc::close(self.fd) };
        }
    }
}

impl RtObj for InText {
    fn is_empty_obj(&self) -> bool {
        !self.fill()
    }

    fn dump(&self, out: &mut dyn std::fmt::Write) -> std::fmt::Result {
        write!(out, "<fifo {}>", self.name)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Fifo for InText {
    fn fifo_name(&self) -> String {
        self.name.clone()
    }

    fn empty(&self) -> Result<bool, RuntimeError> {
        Ok(!self.fill())
    }

    fn preview(&self) -> Option<u8> {
        if !self.fill() {
            return None;
        }
        let inner = self.inner.borrow();
        inner.buf.get(inner.tail).copied()
    }

    fn get(&self) -> Option<u8> {
        if !self.fill() {
            return None;
        }
        let mut inner = self.inner.borrow_mut();
        let c = inner.buf.get(inner.tail).copied()?;
        inner.tail += 1;
        Some(c)
    }

    fn enq(&self, _data: &[u8]) -> Result<usize, RuntimeError> {
        Err(RuntimeError::Fifo("FIFO is read-only"))
    }
}

/// Buffered output fifo over a file descriptor.
#[derive(Debug)]
pub struct OutText {
    name: String,
    fd: i32,
    owns_fd: bool,
    buf: RefCell<Vec<u8>>,
}

unsafe impl Send for OutText {}
unsafe impl Sync for OutText {}

impl OutText {
    pub fn create(path: &str) -> Result<Arc<OutText>, RuntimeError> {
        let cpath = std::ffi::CString::new(path).map_err(|_| RuntimeError::Fifo("Bad path"))?;
        let fd = unsafe {
            libc::open(cpath.as_ptr(), libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC, 0o644)
        };
        if fd < 0 {
            return Err(sys_err(path));
        }
        Ok(Arc::new(OutText {
            name: path.into(),
            fd,
            owns_fd: true,
            buf: RefCell::new(Vec::new()),
        }))
    }

    pub fn from_fd(fd: i32, name: &str) -> Arc<OutText> {
        Arc::new(OutText { name: name.into(), fd, owns_fd: false, buf: RefCell::new(Vec::new()) })
    }

    fn write_all(&self, data: &[u8]) -> Result<(), RuntimeError> {
        let mut written = 0;
        while written < data.len() {
            let n = unsafe {
                libc::write(
                    self.fd,
                    data[written..].as_ptr() as *const libc::c_void,
                    data.len() - written,
                )
            };
            if n < 0 {
                return Err(sys_err(&self.name));
            }
            written += n as usize;
        }
        Ok(())
    }
}

impl Drop for OutText {
    fn drop(&mut self) {
        let _ = self.flush();
        if self.owns_fd {
            unsafe { libc::close(self.fd) };
        }
    }
}

impl RtObj for OutText {
    fn is_empty_obj(&self) -> bool {
        false
    }

    fn dump(&self, out: &mut dyn std::fmt::Write) -> std::fmt::Result {
        write!(out, "<fifo {}>", self.name)
    }

    fn enq_bytes(&self, data: &[u8]) -> Option<usize> {
        self.enq(data).ok()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Fifo for OutText {
    fn fifo_name(&self) -> String {
        self.name.clone()
    }

    fn empty(&self) -> Result<bool, RuntimeError> {
        Err(RuntimeError::Fifo("FIFO is write-only"))
    }

    fn preview(&self) -> Option<u8> {
        None
    }

    fn get(&self) -> Option<u8> {
        None
    }

    fn enq(&self, data: &[u8]) -> Result<usize, RuntimeError> {
        let mut buf = self.buf.borrow_mut();
        buf.extend_from_slice(data);
        if buf.len() >= WRITE_BUF_SIZE || data.contains(&b'\n') {
            let pending = std::mem::take(&mut *buf);
            drop(buf);
            self.write_all(&pending)?;
        }
        Ok(data.len())
    }

    fn flush(&self) -> Result<(), RuntimeError> {
        let pending = std::mem::take(&mut *self.buf.borrow_mut());
        if !pending.is_empty() {
            self.write_all(&pending)?;
        }
        Ok(())
    }
}

/// The standard I/O objects: `sio` reads fd 0 and writes fd 1; `serr`
/// writes fd 2.
pub fn std_sio() -> Arc<StdFifo> {
    Arc::new(StdFifo {
        input: Some(InText::from_fd(0, "<stdin>")),
        output: OutText::from_fd(1, "<stdout>"),
    })
}

pub fn std_serr() -> Arc<StdFifo> {
    Arc::new(StdFifo { input: None, output: OutText::from_fd(2, "<stderr>") })
}

/// Two-way fifo over the standard descriptors; write-only for stderr.
#[derive(Debug)]
pub struct StdFifo {
    input: Option<Arc<InText>>,
    output: Arc<OutText>,
}

unsafe impl Send for StdFifo {}
unsafe impl Sync for StdFifo {}

impl RtObj for StdFifo {
    fn is_empty_obj(&self) -> bool {
        match &self.input {
            Some(i) => i.is_empty_obj(),
            None => false,
        }
    }

    fn dump(&self, out: &mut dyn std::fmt::Write) -> std::fmt::Result {
        write!(out, "<fifo {}>", self.fifo_name())
    }

    fn enq_bytes(&self, data: &[u8]) -> Option<usize> {
        self.enq(data).ok()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Fifo for StdFifo {
    fn fifo_name(&self) -> String {
        match &self.input {
            Some(_) => "<stdio>".into(),
            None => self.output.fifo_name(),
        }
    }

    fn empty(&self) -> Result<bool, RuntimeError> {
        match &self.input {
            Some(i) => i.empty(),
            None => Err(RuntimeError::Fifo("FIFO is write-only")),
        }
    }

    fn preview(&self) -> Option<u8> {
        self.input.as_ref().and_then(|i| i.preview())
    }

    fn get(&self) -> Option<u8> {
        self.input.as_ref().and_then(|i| i.get())
    }

    fn enq(&self, data: &[u8]) -> Result<usize, RuntimeError> {
        self.output.enq(data)
    }

    fn flush(&self) -> Result<(), RuntimeError> {
        self.output.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mem_fifo_round_trip() {
        let f = MemFifo::new();
        f.enq(b"ab").unwrap();
        assert_eq!(f.preview(), Some(b'a'));
        assert_eq!(f.get(), Some(b'a'));
        assert_eq!(f.get(), Some(b'b'));
        assert_eq!(f.get(), None);
    }

    #[test]
    fn test_str_fifo_token_skip() {
        let f = StrFifo::with_text("  hello42 world");
        f.skip(&CharSet::parse(" "));
        let word = f.token(&CharSet::parse("a-z"));
        assert_eq!(word, Str::from("hello"));
        let num = f.token(&CharSet::parse("0-9"));
        assert_eq!(num, Str::from("42"));
    }

    #[test]
    fn test_line_and_eol() {
        let f = StrFifo::with_text("one\ntwo\r\nthree");
        assert!(!f.eol());
        assert_eq!(f.line(), Str::from("one"));
        assert_eq!(f.line(), Str::from("two"));
        assert_eq!(f.line(), Str::from("three"));
        assert!(f.empty().unwrap());
    }

    #[test]
    fn test_intext_reads_file() {
        use std::io::Write;
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        write!(tmp, "def x = 1\n").unwrap();
        let f = InText::open(tmp.path().to_str().unwrap()).unwrap();
        let word = f.token(&CharSet::parse("a-z "));
        assert_eq!(word, Str::from("def x "));
        assert!(f.enq(b"no").is_err());
    }

    #[test]
    fn test_missing_file_is_system_error() {
        match InText::open("/definitely/not/here.shn") {
            Err(RuntimeError::System { code, path }) => {
                assert!(code != 0);
                assert!(path.contains("not"));
            }
            other => panic!("expected system error, got {:?}", other.map(|_| ())),
        }
    }
}
