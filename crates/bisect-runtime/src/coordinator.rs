//! Dump Coordinator
//!
//! Owns the per-process dump state:
//!
//! ```text
//! NotRegistered ──register──► Registered ──exit/request──► Dumping ──► Dumped
//!                                  │                                     ▲
//!                                  └──────────────signal─────────────────┘
//! ```
//!
//! `Dumped` is terminal. The signal path jumps straight to `Dumped` before
//! it writes anything, so a normal-exit hook that runs afterwards (the signal
//! path ends in `exit(0)`) finds the dump already claimed.
//!
//! A termination signal that arrives while another path is `Dumping` is
//! parked with [`DumpCoordinator::defer_signal`] and handed to whoever calls
//! [`DumpCoordinator::finish`].

use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, Once, PoisonError, TryLockError};

const NO_SIGNAL: i32 = 0;

/// Lifecycle of the process dump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DumpState {
    /// No unit registered yet
    NotRegistered = 0,
    /// Hooks are in place; no dump yet
    Registered = 1,
    /// A dump is being written
    Dumping = 2,
    /// The dump has been claimed; nothing more will be written
    Dumped = 3,
}

impl DumpState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::NotRegistered,
            1 => Self::Registered,
            2 => Self::Dumping,
            _ => Self::Dumped,
        }
    }

    /// Whether a dump may still start from this state
    #[must_use]
    pub const fn can_dump(self) -> bool {
        matches!(self, Self::NotRegistered | Self::Registered)
    }
}

/// Which trigger is asking for the dump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpTrigger {
    /// Normal process exit
    Exit,
    /// Termination signal
    Signal,
    /// Explicit request from the program
    Request,
}

impl DumpTrigger {
    /// Lock policy for a dump started by this trigger. A signal handler may
    /// be running on top of the thread that holds a lock.
    pub(crate) const fn locking(self) -> Locking {
        match self {
            Self::Signal => Locking::Try,
            Self::Exit | Self::Request => Locking::Wait,
        }
    }
}

/// What the termination-signal path did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    /// The signal path claimed the dump and ran it
    Claimed,
    /// An earlier dump had already finished
    AlreadyDumped,
    /// Another path is mid-dump; it picks the signal up when it finishes
    Deferred,
}

impl SignalOutcome {
    /// Whether the handler should end the process now
    #[must_use]
    pub const fn terminates(self) -> bool {
        !matches!(self, Self::Deferred)
    }
}

/// How the dump path takes the runtime's internal locks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Locking {
    /// Block until the lock is free
    Wait,
    /// Give up when the lock is held
    Try,
}

impl Locking {
    /// `None` only for [`Locking::Try`] on a held lock. Poisoning is ignored.
    pub(crate) fn acquire<T>(self, mutex: &Mutex<T>) -> Option<MutexGuard<'_, T>> {
        match self {
            Self::Wait => Some(mutex.lock().unwrap_or_else(PoisonError::into_inner)),
            Self::Try => match mutex.try_lock() {
                Ok(guard) => Some(guard),
                Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => None,
            },
        }
    }
}

/// One-shot dump guard plus the one-shot hook installer
#[derive(Debug)]
pub struct DumpCoordinator {
    state: AtomicU8,
    hooks: Once,
    deferred: AtomicI32,
}

impl Default for DumpCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl DumpCoordinator {
    /// Fresh coordinator in `NotRegistered`
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(DumpState::NotRegistered as u8),
            hooks: Once::new(),
            deferred: AtomicI32::new(NO_SIGNAL),
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> DumpState {
        DumpState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the dump has been claimed by any path
    #[must_use]
    pub fn is_dumped(&self) -> bool {
        matches!(self.state(), DumpState::Dumping | DumpState::Dumped)
    }

    /// `NotRegistered → Registered`, then run `install` at most once for the
    /// lifetime of this coordinator.
    pub fn register<F: FnOnce()>(&self, install: F) {
        let _ = self.state.compare_exchange(
            DumpState::NotRegistered as u8,
            DumpState::Registered as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.hooks.call_once(install);
    }

    /// Whether the hook installer has run
    #[must_use]
    pub fn hooks_installed(&self) -> bool {
        self.hooks.is_completed()
    }

    /// Claim the dump for `trigger`. Returns `true` exactly once per
    /// coordinator; a losing claim leaves the state untouched.
    ///
    /// Exit and request claims move to `Dumping` and must be closed with
    /// [`finish`](Self::finish). A signal claim moves straight to `Dumped`.
    pub fn claim(&self, trigger: DumpTrigger) -> bool {
        let target = match trigger {
            DumpTrigger::Signal => DumpState::Dumped,
            DumpTrigger::Exit | DumpTrigger::Request => DumpState::Dumping,
        };
        let claimed = self
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |raw| {
                DumpState::from_u8(raw).can_dump().then_some(target as u8)
            });
        match claimed {
            Ok(_) => {
                tracing::debug!(?trigger, "dump claimed");
                true
            }
            Err(raw) => {
                let previous = DumpState::from_u8(raw);
                tracing::debug!(?trigger, ?previous, "dump already claimed; skipping");
                false
            }
        }
    }

    /// Park `signal` for the path that is currently `Dumping`.
    ///
    /// Returns `false` when that dump finished first and did not take the
    /// signal; the caller then handles it itself.
    pub fn defer_signal(&self, signal: i32) -> bool {
        self.deferred.store(signal, Ordering::SeqCst);
        if self.state() == DumpState::Dumping {
            return true;
        }
        self.deferred.swap(NO_SIGNAL, Ordering::SeqCst) == NO_SIGNAL
    }

    /// `Dumping → Dumped`. Returns the signal parked while the dump ran.
    pub fn finish(&self) -> Option<i32> {
        self.state.store(DumpState::Dumped as u8, Ordering::SeqCst);
        match self.deferred.swap(NO_SIGNAL, Ordering::SeqCst) {
            NO_SIGNAL => None,
            signal => Some(signal),
        }
    }
}
