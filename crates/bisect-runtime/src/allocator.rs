//! Output File Allocation
//!
//! Many instrumented processes may dump into the same directory at once.
//! Each one picks `<prefix><9 digits>.out` with a random suffix and creates
//! it with create-new semantics; a name that already exists is retried with
//! a fresh suffix, up to a bound. No other cross-process coordination exists.

use crate::coordinator::Locking;
use crate::logger::{Diagnostic, DiagnosticLogger};
use crate::result::{RuntimeError, RuntimeResult};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Collision retry bound used unless configured otherwise
pub const DEFAULT_MAX_ATTEMPTS: u32 = 100;

/// Exclusive upper bound of generated suffixes (9 decimal digits)
pub const SUFFIX_LIMIT: u32 = 1_000_000_000;

/// Extension of every output file
pub const OUTPUT_EXTENSION: &str = "out";

/// Build `<prefix><suffix:09>.out`
#[must_use]
pub fn output_file_name(prefix: &str, suffix: u32) -> PathBuf {
    PathBuf::from(format!("{prefix}{:09}.{OUTPUT_EXTENSION}", suffix % SUFFIX_LIMIT))
}

/// Produces file-name suffixes
pub trait SuffixSource: Send {
    /// Next suffix; values are reduced modulo [`SUFFIX_LIMIT`]
    fn next_suffix(&mut self) -> u32;
}

impl<F> SuffixSource for F
where
    F: FnMut() -> u32 + Send,
{
    fn next_suffix(&mut self) -> u32 {
        self()
    }
}

/// Entropy-seeded generator, seeded on first use
#[derive(Debug, Default)]
pub struct EntropySuffixes {
    rng: Option<SmallRng>,
}

impl EntropySuffixes {
    /// Unseeded; the OS is only consulted when a suffix is needed
    #[must_use]
    pub const fn new() -> Self {
        Self { rng: None }
    }

    /// Whether the generator has been seeded yet
    #[must_use]
    pub const fn is_seeded(&self) -> bool {
        self.rng.is_some()
    }
}

impl SuffixSource for EntropySuffixes {
    fn next_suffix(&mut self) -> u32 {
        self.rng
            .get_or_insert_with(SmallRng::from_entropy)
            .gen_range(0..SUFFIX_LIMIT)
    }
}

/// A freshly created, exclusively owned output file
#[derive(Debug)]
pub struct OutputFile {
    path: PathBuf,
    file: File,
}

impl OutputFile {
    /// Path that was created
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Give up the path and the handle
    #[must_use]
    pub fn into_parts(self) -> (PathBuf, File) {
        (self.path, self.file)
    }
}

/// Allocates collision-free output files
#[derive(Debug)]
pub struct OutputFileAllocator<S = EntropySuffixes> {
    suffixes: Mutex<S>,
    max_attempts: u32,
}

impl OutputFileAllocator<EntropySuffixes> {
    /// Allocator backed by OS entropy
    #[must_use]
    pub const fn new(max_attempts: u32) -> Self {
        Self::with_source(EntropySuffixes::new(), max_attempts)
    }
}

impl Default for OutputFileAllocator<EntropySuffixes> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

impl<S: SuffixSource> OutputFileAllocator<S> {
    /// Allocator with a caller-provided suffix source
    #[must_use]
    pub const fn with_source(suffixes: S, max_attempts: u32) -> Self {
        Self {
            suffixes: Mutex::new(suffixes),
            max_attempts,
        }
    }

    /// Collision retry bound
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Create a new output file for `prefix`.
    ///
    /// Name collisions are retried up to the bound; any other OS error stops
    /// immediately.
    pub fn allocate(&self, prefix: &str) -> RuntimeResult<OutputFile> {
        self.allocate_with(prefix, Locking::Wait)
    }

    fn allocate_with(&self, prefix: &str, locking: Locking) -> RuntimeResult<OutputFile> {
        for attempt in 1..=self.max_attempts {
            let path = output_file_name(prefix, self.next_suffix(locking)?);
            match create_exclusive(&path) {
                Ok(file) => {
                    tracing::debug!(path = %path.display(), attempt, "created output file");
                    return Ok(OutputFile { path, file });
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    tracing::debug!(path = %path.display(), attempt, "output file name taken");
                }
                Err(source) => return Err(RuntimeError::FileCreate { path, source }),
            }
        }
        Err(RuntimeError::RetriesExhausted {
            prefix: prefix.to_string(),
            attempts: self.max_attempts,
        })
    }

    /// Allocation on the dump path: failures are reported through `logger`
    /// and turn into `None`.
    pub(crate) fn open_for_dump(
        &self,
        prefix: &str,
        logger: &DiagnosticLogger,
        locking: Locking,
    ) -> Option<OutputFile> {
        match self.allocate_with(prefix, locking) {
            Ok(file) => Some(file),
            Err(err) => {
                logger.report_failure(Diagnostic::UnableToCreateFile, &err, locking);
                None
            }
        }
    }

    fn next_suffix(&self, locking: Locking) -> RuntimeResult<u32> {
        let mut suffixes = locking
            .acquire(&self.suffixes)
            .ok_or(RuntimeError::Busy("output file name generator"))?;
        Ok(suffixes.next_suffix() % SUFFIX_LIMIT)
    }
}

fn create_exclusive(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o644);
    }
    options.open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::LogMode;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn prefix_in(dir: &TempDir, name: &str) -> String {
        dir.path().join(name).to_string_lossy().into_owned()
    }

    mod name_tests {
        use super::*;

        #[test]
        fn test_name_is_zero_padded_to_nine_digits() {
            assert_eq!(output_file_name("cov", 42), PathBuf::from("cov000000042.out"));
            assert_eq!(output_file_name("cov", 0), PathBuf::from("cov000000000.out"));
            assert_eq!(
                output_file_name("cov", 999_999_999),
                PathBuf::from("cov999999999.out")
            );
        }

        #[test]
        fn test_prefix_may_contain_directories() {
            assert_eq!(
                output_file_name("out/run-", 7),
                PathBuf::from("out/run-000000007.out")
            );
        }

        #[test]
        fn test_suffix_wraps_at_limit() {
            assert_eq!(
                output_file_name("cov", SUFFIX_LIMIT + 5),
                PathBuf::from("cov000000005.out")
            );
        }
    }

    mod suffix_tests {
        use super::*;

        #[test]
        fn test_entropy_source_seeds_lazily() {
            let mut source = EntropySuffixes::new();
            assert!(!source.is_seeded());
            let suffix = source.next_suffix();
            assert!(source.is_seeded());
            assert!(suffix < SUFFIX_LIMIT);
        }

        #[test]
        fn test_entropy_source_varies() {
            let mut source = EntropySuffixes::new();
            let seen: HashSet<u32> = (0..64).map(|_| source.next_suffix()).collect();
            assert!(seen.len() > 1);
        }
    }

    mod allocate_tests {
        use super::*;

        #[test]
        fn test_allocates_matching_name() {
            let dir = TempDir::new().unwrap();
            let allocator = OutputFileAllocator::new(DEFAULT_MAX_ATTEMPTS);
            let out = allocator.allocate(&prefix_in(&dir, "cov")).unwrap();

            let name = out.path().file_name().unwrap().to_string_lossy().into_owned();
            let pattern = regex::Regex::new(r"^cov\d{9}\.out$").unwrap();
            assert!(pattern.is_match(&name), "{name}");
            assert!(out.path().exists());
        }

        #[test]
        fn test_never_overwrites_existing_file() {
            let dir = TempDir::new().unwrap();
            let prefix = prefix_in(&dir, "cov");
            let taken = output_file_name(&prefix, 1);
            std::fs::write(&taken, b"someone else's dump").unwrap();

            let calls = Arc::new(AtomicU32::new(0));
            let counter = Arc::clone(&calls);
            let allocator = OutputFileAllocator::with_source(
                move || counter.fetch_add(1, Ordering::SeqCst) + 1,
                DEFAULT_MAX_ATTEMPTS,
            );

            let out = allocator.allocate(&prefix).unwrap();
            assert_eq!(out.path(), output_file_name(&prefix, 2));
            assert_eq!(calls.load(Ordering::SeqCst), 2);
            assert_eq!(std::fs::read(&taken).unwrap(), b"someone else's dump");
        }

        #[test]
        fn test_retry_exhaustion_is_bounded() {
            let dir = TempDir::new().unwrap();
            let prefix = prefix_in(&dir, "cov");
            std::fs::write(output_file_name(&prefix, 7), b"").unwrap();

            let calls = Arc::new(AtomicU32::new(0));
            let counter = Arc::clone(&calls);
            let allocator = OutputFileAllocator::with_source(
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    7
                },
                5,
            );

            let err = allocator.allocate(&prefix).unwrap_err();
            assert!(matches!(err, RuntimeError::RetriesExhausted { attempts: 5, .. }));
            assert_eq!(calls.load(Ordering::SeqCst), 5);
        }

        #[test]
        fn test_os_error_is_not_retried() {
            let dir = TempDir::new().unwrap();
            let prefix = dir
                .path()
                .join("no-such-dir")
                .join("cov")
                .to_string_lossy()
                .into_owned();

            let calls = Arc::new(AtomicU32::new(0));
            let counter = Arc::clone(&calls);
            let allocator = OutputFileAllocator::with_source(
                move || counter.fetch_add(1, Ordering::SeqCst),
                DEFAULT_MAX_ATTEMPTS,
            );

            let err = allocator.allocate(&prefix).unwrap_err();
            match err {
                RuntimeError::FileCreate { path, source } => {
                    assert_eq!(source.kind(), io::ErrorKind::NotFound);
                    assert!(path.to_string_lossy().contains("no-such-dir"));
                }
                other => panic!("unexpected error: {other}"),
            }
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }

        #[test]
        fn test_concurrent_allocations_are_distinct() {
            let dir = TempDir::new().unwrap();
            let prefix = prefix_in(&dir, "cov");
            let allocator = Arc::new(OutputFileAllocator::with_source(
                || 3_u32,
                DEFAULT_MAX_ATTEMPTS,
            ));
            // every thread asks for the same name first; only one may win it
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let allocator = Arc::clone(&allocator);
                    let prefix = prefix.clone();
                    std::thread::spawn(move || allocator.allocate(&prefix).is_ok())
                })
                .collect();
            let wins = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|ok| *ok)
                .count();
            assert_eq!(wins, 1);
            assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
        }

        #[test]
        fn test_many_entropy_allocations_are_distinct() {
            let dir = TempDir::new().unwrap();
            let prefix = prefix_in(&dir, "cov");
            let allocator = OutputFileAllocator::new(DEFAULT_MAX_ATTEMPTS);
            let paths: HashSet<PathBuf> = (0..32)
                .map(|_| allocator.allocate(&prefix).unwrap().path().to_path_buf())
                .collect();
            assert_eq!(paths.len(), 32);
        }

        #[cfg(unix)]
        #[test]
        fn test_created_file_mode_is_0644() {
            use std::os::unix::fs::PermissionsExt;
            let dir = TempDir::new().unwrap();
            let out = OutputFileAllocator::new(DEFAULT_MAX_ATTEMPTS)
                .allocate(&prefix_in(&dir, "cov"))
                .unwrap();
            let mode = std::fs::metadata(out.path()).unwrap().permissions().mode();
            // umask may only clear bits
            assert_eq!(mode & !0o644 & 0o777, 0);
            assert_ne!(mode & 0o600, 0);
        }
    }

    mod dump_path_tests {
        use super::*;

        #[test]
        fn test_open_for_dump_reports_and_returns_none() {
            let dir = TempDir::new().unwrap();
            let log = dir.path().join("diag.log");
            let logger = DiagnosticLogger::with_mode(LogMode::File(log.clone()));
            let prefix = dir
                .path()
                .join("missing")
                .join("cov")
                .to_string_lossy()
                .into_owned();

            let allocator = OutputFileAllocator::new(DEFAULT_MAX_ATTEMPTS);
            assert!(allocator.open_for_dump(&prefix, &logger, Locking::Wait).is_none());

            let contents = std::fs::read_to_string(&log).unwrap();
            let lines: Vec<&str> = contents.lines().collect();
            assert_eq!(lines.len(), 2);
            assert_eq!(lines[0], " *** unable to create coverage output file");
            assert!(lines[1].contains("missing"));
        }

        #[test]
        fn test_open_for_dump_reports_exhaustion() {
            let dir = TempDir::new().unwrap();
            let log = dir.path().join("diag.log");
            let logger = DiagnosticLogger::with_mode(LogMode::File(log.clone()));
            let prefix = prefix_in(&dir, "cov");
            std::fs::write(output_file_name(&prefix, 9), b"").unwrap();

            let allocator = OutputFileAllocator::with_source(|| 9_u32, 3);
            assert!(allocator.open_for_dump(&prefix, &logger, Locking::Wait).is_none());

            let contents = std::fs::read_to_string(&log).unwrap();
            assert!(contents.contains("unable to create coverage output file"));
            assert!(contents.contains("after 3 attempts"));
        }

        #[test]
        fn test_try_locking_gives_up_on_held_generator() {
            let dir = TempDir::new().unwrap();
            let log = dir.path().join("diag.log");
            let logger = DiagnosticLogger::with_mode(LogMode::File(log.clone()));
            let allocator = OutputFileAllocator::new(DEFAULT_MAX_ATTEMPTS);
            let prefix = prefix_in(&dir, "cov");

            let held = allocator.suffixes.lock().unwrap();
            assert!(allocator
                .open_for_dump(&prefix, &logger, Locking::Try)
                .is_none());
            drop(held);

            let contents = std::fs::read_to_string(&log).unwrap();
            let lines: Vec<&str> = contents.lines().collect();
            assert_eq!(lines[0], " *** unable to create coverage output file");
            assert!(lines[1].contains("output file name generator is in use"));
            assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

            assert!(allocator
                .open_for_dump(&prefix, &logger, Locking::Try)
                .is_some());
        }
    }
}
