//! Environment Configuration
//!
//! Three overrides are read once, when the process runtime is built:
//!
//! | Variable         | Meaning                                           |
//! |------------------|---------------------------------------------------|
//! | `BISECT_FILE`    | output file prefix                                |
//! | `BISECT_SILENT`  | `YES`/`ON` silent, `ERR` stderr, else log file    |
//! | `BISECT_SIGTERM` | `YES`/`NO`, dump on SIGTERM                       |
//!
//! Unrecognized values never raise; they fall back to the caller's defaults.

use std::collections::HashMap;

/// Output prefix override
pub const ENV_FILE: &str = "BISECT_FILE";
/// Diagnostic log mode override
pub const ENV_SILENT: &str = "BISECT_SILENT";
/// Termination-signal dump toggle
pub const ENV_SIGTERM: &str = "BISECT_SIGTERM";

/// Fallback output prefix
pub const DEFAULT_FILE_PREFIX: &str = "bisect";
/// Fallback diagnostic log file
pub const DEFAULT_LOG_FILE: &str = "bisect.log";

/// Source of environment values
pub trait EnvSource {
    /// Look up a variable; `None` when unset or not valid unicode
    fn var(&self, name: &str) -> Option<String>;
}

/// The real process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

impl<E: EnvSource + ?Sized> EnvSource for &E {
    fn var(&self, name: &str) -> Option<String> {
        (**self).var(name)
    }
}

/// Value of `name`, or `default` when unset.
#[must_use]
pub fn resolve(env: &impl EnvSource, name: &str, default: &str) -> String {
    env.var(name).unwrap_or_else(|| default.to_string())
}

/// `YES` → true, `NO` → false (any case); `default` otherwise.
#[must_use]
pub fn resolve_bool(env: &impl EnvSource, name: &str, default: bool) -> bool {
    match env.var(name) {
        Some(value) => match value.to_ascii_uppercase().as_str() {
            "YES" => true,
            "NO" => false,
            _ => default,
        },
        None => default,
    }
}

/// Compiled-in fallbacks supplied by the instrumented program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Defaults {
    /// Output file prefix when `BISECT_FILE` is unset
    pub file_prefix: String,
    /// Log mode when `BISECT_SILENT` is unset
    pub log_target: String,
    /// Signal handling when `BISECT_SIGTERM` is unset or unrecognized
    pub sigterm: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            file_prefix: DEFAULT_FILE_PREFIX.to_string(),
            log_target: DEFAULT_LOG_FILE.to_string(),
            sigterm: false,
        }
    }
}

impl Defaults {
    /// Start from the stock fallbacks
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the output prefix
    #[must_use]
    pub fn file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.file_prefix = prefix.into();
        self
    }

    /// Set the log mode
    #[must_use]
    pub fn log_target(mut self, target: impl Into<String>) -> Self {
        self.log_target = target.into();
        self
    }

    /// Enable or disable termination-signal dumps
    #[must_use]
    pub const fn sigterm(mut self, enabled: bool) -> Self {
        self.sigterm = enabled;
        self
    }
}

/// Resolved runtime configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    file_prefix: String,
    log_target: String,
    sigterm: bool,
    max_attempts: u32,
}

impl RuntimeConfig {
    /// Resolve every override against `env`, falling back to `defaults`
    #[must_use]
    pub fn resolve(env: &impl EnvSource, defaults: &Defaults) -> Self {
        Self {
            file_prefix: resolve(env, ENV_FILE, &defaults.file_prefix),
            log_target: resolve(env, ENV_SILENT, &defaults.log_target),
            sigterm: resolve_bool(env, ENV_SIGTERM, defaults.sigterm),
            max_attempts: crate::allocator::DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Resolve against the process environment
    #[must_use]
    pub fn from_env(defaults: &Defaults) -> Self {
        Self::resolve(&ProcessEnv, defaults)
    }

    /// Override the collision retry bound
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Output file prefix
    #[must_use]
    pub fn file_prefix(&self) -> &str {
        &self.file_prefix
    }

    /// Raw log mode value
    #[must_use]
    pub fn log_target(&self) -> &str {
        &self.log_target
    }

    /// Whether SIGTERM triggers a dump
    #[must_use]
    pub const fn sigterm(&self) -> bool {
        self.sigterm
    }

    /// Collision retry bound
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}
