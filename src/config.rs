//! Environment-driven runtime configuration.
//!
//! Read once per process and used to seed the default
//! [`ExecutionControl`](crate::control::ExecutionControl). Unknown values are
//! logged and ignored.
//!
//! | Variable | Values |
//! |---|---|
//! | `KERNEL_RT_RUN_MODE` | `auto`, `serial`, `multicore`, `accelerated` |
//! | `KERNEL_RT_DEBUG` | comma list of `compile`, `show-code`, `save-temps` |
//! | `KERNEL_RT_COMPILE_OPTIONS` | extra compiler options |
//! | `KERNEL_RT_SERIAL_THRESHOLD` | element count below which `auto` runs serially |

use std::sync::OnceLock;

use crate::control::{DebugFlags, RunMode, DEFAULT_SERIAL_THRESHOLD};

pub const ENV_RUN_MODE: &str = "KERNEL_RT_RUN_MODE";
pub const ENV_DEBUG: &str = "KERNEL_RT_DEBUG";
pub const ENV_COMPILE_OPTIONS: &str = "KERNEL_RT_COMPILE_OPTIONS";
pub const ENV_SERIAL_THRESHOLD: &str = "KERNEL_RT_SERIAL_THRESHOLD";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub run_mode: RunMode,
    pub debug: DebugFlags,
    pub compile_options: String,
    pub serial_threshold: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            run_mode: RunMode::Automatic,
            debug: DebugFlags::NONE,
            compile_options: String::new(),
            serial_threshold: DEFAULT_SERIAL_THRESHOLD,
        }
    }
}

impl RuntimeConfig {
    /// Build a config from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (used by tests).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_RUN_MODE) {
            match parse_run_mode(&raw) {
                Some(mode) => config.run_mode = mode,
                None => log::warn!("Ignoring {ENV_RUN_MODE}={raw:?}: unknown run mode"),
            }
        }

        if let Some(raw) = lookup(ENV_DEBUG) {
            config.debug = parse_debug_flags(&raw);
        }

        if let Some(raw) = lookup(ENV_COMPILE_OPTIONS) {
            config.compile_options = raw.trim().to_string();
        }

        if let Some(raw) = lookup(ENV_SERIAL_THRESHOLD) {
            match raw.trim().parse::<usize>() {
                Ok(n) => config.serial_threshold = n,
                Err(e) => log::warn!("Ignoring {ENV_SERIAL_THRESHOLD}={raw:?}: {e}"),
            }
        }

        config
    }

    /// Process-wide config, read from the environment on first use.
    pub fn global() -> &'static RuntimeConfig {
        static CONFIG: OnceLock<RuntimeConfig> = OnceLock::new();
        CONFIG.get_or_init(Self::from_env)
    }
}

fn parse_run_mode(raw: &str) -> Option<RunMode> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "auto" | "automatic" => Some(RunMode::Automatic),
        "serial" | "serialcpu" => Some(RunMode::SerialFallback),
        "multicore" | "multicorecpu" => Some(RunMode::MultiCoreFallback),
        "accelerated" | "gpu" => Some(RunMode::Accelerated),
        _ => None,
    }
}

fn parse_debug_flags(raw: &str) -> DebugFlags {
    let mut flags = DebugFlags::NONE;
    for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        match token.to_ascii_lowercase().as_str() {
            "compile" => flags |= DebugFlags::COMPILE_DIAGNOSTICS,
            "show-code" | "showcode" => flags |= DebugFlags::SHOW_CODE,
            "save-temps" | "savetemps" => flags |= DebugFlags::PERSIST_INTERMEDIATE_ARTIFACTS,
            other => log::warn!("Ignoring unknown {ENV_DEBUG} flag {other:?}"),
        }
    }
    flags
}
