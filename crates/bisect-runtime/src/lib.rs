//! Bisect Runtime: coverage counter persistence for instrumented programs
//!
//! Instrumented code registers its points once per compilation unit and
//! bumps counters while it runs. When the process ends, by normal exit, by
//! SIGTERM (opt-in) or by explicit request, the counters are written once
//! to a freshly created `<prefix><9 digits>.out` file. Nothing in this crate
//! ever fails the instrumented program: persistence problems become lines in
//! a diagnostic log.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                  BISECT RUNTIME ARCHITECTURE                     │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  register_file ──► Runtime ──► CounterTable ◄── increment        │
//! │                      │                                           │
//! │        exit / SIGTERM / request                                  │
//! │                      ▼                                           │
//! │              DumpCoordinator (once)                              │
//! │                      ▼                                           │
//! │  OutputFileAllocator ──► Snapshot ──► <prefix>NNNNNNNNN.out      │
//! │          │                                                       │
//! │          └──► DiagnosticLogger (silent / stderr / log file)      │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use bisect_runtime::{register_file, Defaults};
//!
//! let defaults = Defaults::new().file_prefix("cov").sigterm(true);
//! let points = register_file(&defaults, "src/parser.ml", 12, b"");
//! points.increment(3);
//! // at exit: cov#########.out is written once
//! ```

#![warn(missing_docs)]

mod allocator;
mod config;
mod coordinator;
#[allow(unsafe_code)]
pub mod hooks;
mod logger;
mod result;
mod runtime;
mod snapshot;
mod table;

pub use allocator::{
    output_file_name, EntropySuffixes, OutputFile, OutputFileAllocator, SuffixSource,
    DEFAULT_MAX_ATTEMPTS, SUFFIX_LIMIT,
};
pub use config::{
    resolve, resolve_bool, Defaults, EnvSource, ProcessEnv, RuntimeConfig, DEFAULT_FILE_PREFIX,
    DEFAULT_LOG_FILE, ENV_FILE, ENV_SIGTERM, ENV_SILENT,
};
pub use coordinator::{DumpCoordinator, DumpState, DumpTrigger, SignalOutcome};
pub use logger::{Diagnostic, DiagnosticLogger, LogMode, LINE_MARKER};
pub use result::{RuntimeError, RuntimeResult};
pub use runtime::{
    coverage_data, dump_counters_to, register_file, reset_counters, write_coverage_data, Runtime,
};
pub use snapshot::{FileCoverage, Snapshot, MAGIC};
pub use table::{CounterTable, PointCounters};
