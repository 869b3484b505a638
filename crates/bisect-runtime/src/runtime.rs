//! Process runtime context.
//!
//! A [`Runtime`] bundles configuration, the diagnostic logger, the output
//! file allocator, the counter table and the dump coordinator. Instrumented
//! code talks to the single process-wide instance through the free functions
//! in this module; [`Runtime::detached`] builds a private instance that never
//! touches process hooks.

use crate::allocator::OutputFileAllocator;
use crate::config::{Defaults, RuntimeConfig};
use crate::coordinator::{DumpCoordinator, DumpTrigger, Locking, SignalOutcome};
use crate::hooks;
use crate::logger::{Diagnostic, DiagnosticLogger};
use crate::result::{RuntimeError, RuntimeResult};
use crate::snapshot::Snapshot;
use crate::table::{CounterTable, PointCounters};
use std::io::{BufWriter, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, OnceLock};

static PROCESS: OnceLock<Runtime> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HookMode {
    Process,
    Detached,
}

/// Everything the coverage runtime keeps for one process
#[derive(Debug)]
pub struct Runtime {
    config: RuntimeConfig,
    logger: DiagnosticLogger,
    allocator: OutputFileAllocator,
    table: CounterTable,
    coordinator: DumpCoordinator,
    hook_mode: HookMode,
}

impl Runtime {
    fn build(config: RuntimeConfig, hook_mode: HookMode) -> Self {
        Self {
            logger: DiagnosticLogger::new(config.log_target()),
            allocator: OutputFileAllocator::new(config.max_attempts()),
            table: CounterTable::new(),
            coordinator: DumpCoordinator::new(),
            config,
            hook_mode,
        }
    }

    /// A runtime that never installs exit or signal hooks
    #[must_use]
    pub fn detached(config: RuntimeConfig) -> Self {
        Self::build(config, HookMode::Detached)
    }

    /// The process runtime, created from the environment and `defaults` on
    /// first call. Later calls ignore `defaults`.
    pub fn process(defaults: &Defaults) -> &'static Self {
        PROCESS.get_or_init(|| {
            let config = RuntimeConfig::from_env(defaults);
            tracing::debug!(?config, "coverage runtime initialized");
            Self::build(config, HookMode::Process)
        })
    }

    /// The process runtime, if any unit has registered
    #[must_use]
    pub fn try_process() -> Option<&'static Self> {
        PROCESS.get()
    }

    /// Resolved configuration
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Diagnostic sink
    #[must_use]
    pub fn logger(&self) -> &DiagnosticLogger {
        &self.logger
    }

    /// Counter table
    #[must_use]
    pub fn table(&self) -> &CounterTable {
        &self.table
    }

    /// Dump state machine
    #[must_use]
    pub fn coordinator(&self) -> &DumpCoordinator {
        &self.coordinator
    }

    /// Register an instrumented unit. The first registration installs the
    /// exit hook (and the SIGTERM hook when enabled) for process runtimes.
    pub fn register(
        &self,
        file_id: &str,
        point_count: usize,
        metadata: &[u8],
    ) -> Arc<PointCounters> {
        let counters = self.table.register(file_id, point_count, metadata);
        self.coordinator.register(|| {
            if self.hook_mode == HookMode::Process {
                hooks::install(self.config.sigterm(), &self.logger);
            }
        });
        counters
    }

    /// Normal-exit path: dump unless some path already did
    pub fn dump_at_exit(&self) {
        if self.coordinator.claim(DumpTrigger::Exit) {
            self.dump(DumpTrigger::Exit);
            self.complete(DumpTrigger::Exit);
        }
    }

    /// Explicit request; consumes the process's single dump.
    /// Returns whether this call performed it.
    pub fn request_dump(&self) -> bool {
        if !self.coordinator.claim(DumpTrigger::Request) {
            return false;
        }
        self.dump(DumpTrigger::Request);
        self.complete(DumpTrigger::Request);
        true
    }

    /// Termination-signal path, minus the final exit.
    ///
    /// The dump is claimed before anything is written, `signal` is ignored
    /// while writing, and the default disposition is restored afterwards.
    /// Nothing here waits on a lock: the handler may have interrupted the
    /// thread that holds it. When another path is mid-dump the signal stays
    /// ignored and is left to that path.
    pub fn dump_on_signal(&self, signal: i32) -> SignalOutcome {
        let first = self.coordinator.claim(DumpTrigger::Signal);
        hooks::ignore_signal(signal);
        if first {
            self.dump(DumpTrigger::Signal);
            hooks::restore_default(signal);
            return SignalOutcome::Claimed;
        }
        if self.coordinator.defer_signal(signal) {
            tracing::debug!(signal, "dump in progress; signal deferred");
            return SignalOutcome::Deferred;
        }
        hooks::restore_default(signal);
        SignalOutcome::AlreadyDumped
    }

    // Dumping -> Dumped, then deliver a signal that arrived meanwhile.
    fn complete(&self, trigger: DumpTrigger) {
        let Some(signal) = self.coordinator.finish() else {
            return;
        };
        hooks::restore_default(signal);
        // the exit path is already ending the process with its own status
        if trigger == DumpTrigger::Request && self.hook_mode == HookMode::Process {
            tracing::debug!(signal, "terminating after deferred signal");
            hooks::terminate();
        }
    }

    /// Write one output file. Never fails and never panics; problems end up
    /// in the diagnostic log.
    fn dump(&self, trigger: DumpTrigger) {
        if cfg!(target_arch = "wasm32") {
            return;
        }
        let locking = trigger.locking();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.write_output_file(locking)));
        if outcome.is_err() {
            self.logger.report_failure(
                Diagnostic::UnableToWriteFile,
                "panic while writing coverage data",
                locking,
            );
        }
    }

    fn write_output_file(&self, locking: Locking) {
        let Some(snapshot) = self.table.snapshot_with(locking) else {
            self.logger.report_failure(
                Diagnostic::UnableToWriteFile,
                RuntimeError::Busy("counter table"),
                locking,
            );
            return;
        };
        let prefix = self.config.file_prefix();
        let Some(out) = self.allocator.open_for_dump(prefix, &self.logger, locking) else {
            return;
        };
        let (path, file) = out.into_parts();
        self.write_snapshot(&snapshot, BufWriter::new(file), &path, locking);
    }

    fn write_snapshot<W: Write>(
        &self,
        snapshot: &Snapshot,
        mut writer: W,
        path: &Path,
        locking: Locking,
    ) {
        let written = snapshot
            .write_to(&mut writer)
            .and_then(|()| writer.flush().map_err(RuntimeError::from));
        match written {
            Ok(()) => tracing::debug!(path = %path.display(), "coverage data written"),
            Err(err) => self.logger.report_failure(
                Diagnostic::UnableToWriteFile,
                format_args!("{err}: {}", path.display()),
                locking,
            ),
        }
        // closing errors are not reported
        drop(writer);
    }

    /// Zero every counter
    pub fn reset_counters(&self) {
        self.table.reset();
    }

    /// Current counters, encoded as a dump would be
    #[must_use]
    pub fn coverage_data(&self) -> Option<Vec<u8>> {
        self.table.snapshot().to_bytes().ok()
    }

    /// Write the current counters to `writer`, propagating failures.
    /// Does not touch the dump state.
    pub fn dump_counters_to<W: Write>(&self, writer: &mut W) -> RuntimeResult<()> {
        self.table.serialize_to(writer)
    }
}

/// Register an instrumented unit with the process runtime.
///
/// `defaults` supply the compiled-in configuration; only the first call's
/// defaults are used.
pub fn register_file(
    defaults: &Defaults,
    file_id: &str,
    point_count: usize,
    metadata: &[u8],
) -> Arc<PointCounters> {
    Runtime::process(defaults).register(file_id, point_count, metadata)
}

/// Zero every counter of the process runtime
pub fn reset_counters() {
    if let Some(runtime) = Runtime::try_process() {
        runtime.reset_counters();
    }
}

/// Encoded snapshot of the process counters; `None` before any registration
#[must_use]
pub fn coverage_data() -> Option<Vec<u8>> {
    Runtime::try_process().and_then(Runtime::coverage_data)
}

/// Explicitly dump now. Returns `false` when the process already dumped or
/// nothing was ever registered.
pub fn write_coverage_data() -> bool {
    Runtime::try_process().is_some_and(Runtime::request_dump)
}

/// Write the process counters to `writer`; an empty snapshot before any
/// registration.
pub fn dump_counters_to<W: Write>(writer: &mut W) -> RuntimeResult<()> {
    match Runtime::try_process() {
        Some(runtime) => runtime.dump_counters_to(writer),
        None => Snapshot::default().write_to(writer),
    }
}
