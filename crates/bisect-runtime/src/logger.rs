//! Diagnostic Logger
//!
//! Best-effort sink for the few messages the runtime ever needs to emit.
//! The sink is chosen on the first report and never changes:
//!
//! - `YES` / `ON` (any case): discard everything
//! - `ERR` (any case): standard error
//! - anything else: name of a log file, truncated on open
//!
//! A log file that cannot be opened degrades to discard. Reporting never
//! fails and never panics. Reports made with `Locking::Try` drop the line
//! rather than wait on the sink.

use crate::coordinator::Locking;
use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};

/// Marker written before every diagnostic line
pub const LINE_MARKER: &str = " *** ";

/// Messages the runtime reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// No output file could be created
    UnableToCreateFile,
    /// The output file could not be written
    UnableToWriteFile,
    /// Free-form detail, usually an OS error and a path
    Detail(String),
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnableToCreateFile => f.write_str("unable to create coverage output file"),
            Self::UnableToWriteFile => f.write_str("unable to write coverage output file"),
            Self::Detail(text) => f.write_str(text),
        }
    }
}

/// How diagnostics are emitted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogMode {
    /// Discard all messages
    Silent,
    /// Write to standard error
    Stderr,
    /// Write to the named file
    File(PathBuf),
}

impl LogMode {
    /// Interpret a `BISECT_SILENT`-style value
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "YES" | "ON" => Self::Silent,
            "ERR" => Self::Stderr,
            _ => Self::File(PathBuf::from(value)),
        }
    }
}

#[derive(Debug)]
enum Sink {
    Discard,
    Stderr,
    File(Mutex<File>),
}

impl Sink {
    fn open(mode: &LogMode) -> Self {
        match mode {
            LogMode::Silent => Self::Discard,
            LogMode::Stderr => Self::Stderr,
            LogMode::File(path) => match File::create(path) {
                Ok(file) => Self::File(Mutex::new(file)),
                Err(err) => {
                    tracing::warn!(path = %path.display(), %err, "cannot open diagnostic log");
                    Self::Discard
                }
            },
        }
    }

    fn write_line(&self, line: &str, locking: Locking) -> io::Result<()> {
        match self {
            Self::Discard => Ok(()),
            Self::Stderr => io::stderr().lock().write_all(line.as_bytes()),
            Self::File(file) => match locking.acquire(file) {
                Some(mut file) => file.write_all(line.as_bytes()),
                None => Err(io::ErrorKind::WouldBlock.into()),
            },
        }
    }
}

/// Lazily constructed diagnostic sink
#[derive(Debug)]
pub struct DiagnosticLogger {
    mode: LogMode,
    sink: OnceLock<Sink>,
    // callers currently inside sink construction
    opening: AtomicUsize,
}

impl DiagnosticLogger {
    /// Create a logger from a raw log mode value; nothing is opened yet
    #[must_use]
    pub fn new(log_target: &str) -> Self {
        Self::with_mode(LogMode::parse(log_target))
    }

    /// Create a logger with an explicit mode
    #[must_use]
    pub fn with_mode(mode: LogMode) -> Self {
        Self {
            mode,
            sink: OnceLock::new(),
            opening: AtomicUsize::new(0),
        }
    }

    /// The configured mode
    #[must_use]
    pub fn mode(&self) -> &LogMode {
        &self.mode
    }

    /// Whether the sink has been constructed
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.sink.get().is_some()
    }

    /// Emit one diagnostic; write failures are dropped
    pub fn report(&self, diagnostic: &Diagnostic) {
        self.emit(diagnostic, Locking::Wait);
    }

    /// Report a failure category followed by its detail line
    pub(crate) fn report_failure(
        &self,
        category: Diagnostic,
        detail: impl fmt::Display,
        locking: Locking,
    ) {
        self.emit(&category, locking);
        self.emit(&Diagnostic::Detail(detail.to_string()), locking);
    }

    fn emit(&self, diagnostic: &Diagnostic, locking: Locking) {
        if self.mode != LogMode::Silent {
            tracing::warn!(diagnostic = %diagnostic, "coverage runtime diagnostic");
        }
        let Some(sink) = self.sink(locking) else {
            return;
        };
        let line = format!("{LINE_MARKER}{diagnostic}\n");
        let _ = sink.write_line(&line, locking);
    }

    fn sink(&self, locking: Locking) -> Option<&Sink> {
        if let Some(sink) = self.sink.get() {
            return Some(sink);
        }
        // the interrupted thread may be the one constructing the sink
        if locking == Locking::Try && self.opening.load(Ordering::SeqCst) > 0 {
            return None;
        }
        self.opening.fetch_add(1, Ordering::SeqCst);
        let sink = self.sink.get_or_init(|| Sink::open(&self.mode));
        self.opening.fetch_sub(1, Ordering::SeqCst);
        Some(sink)
    }
}
