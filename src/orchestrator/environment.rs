//! Runtime environment resolution for worker interpreters.
//!
//! Workers are interpreter scripts, and the interpreter that should run
//! them depends on the machine: an active virtualenv, an active conda
//! environment, or a plain configured interpreter. Each environment kind
//! is a small probe strategy keyed on its environment-variable marker;
//! probes run in fixed priority order and the configured default is the
//! final fallback.

use std::env;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::GlobalConfig;
use crate::{AppError, Result};

/// Resolved form used to launch a worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationDescriptor {
    /// A single absolute executable path. Never split, even when the
    /// path contains whitespace.
    Absolute(PathBuf),
    /// An ordered launch command, e.g. `["envtool", "run", "python"]`.
    Command(Vec<String>),
}

impl InvocationDescriptor {
    /// Flatten to an argv prefix: the program followed by leading args.
    #[must_use]
    pub fn tokens(&self) -> Vec<String> {
        match self {
            Self::Absolute(path) => vec![path.to_string_lossy().into_owned()],
            Self::Command(tokens) => tokens.clone(),
        }
    }

    /// The program to execute.
    #[must_use]
    pub fn program(&self) -> String {
        match self {
            Self::Absolute(path) => path.to_string_lossy().into_owned(),
            Self::Command(tokens) => tokens.first().cloned().unwrap_or_default(),
        }
    }

    /// Arguments preceding the worker entry script.
    #[must_use]
    pub fn leading_args(&self) -> Vec<String> {
        match self {
            Self::Absolute(_) => Vec::new(),
            Self::Command(tokens) => tokens.iter().skip(1).cloned().collect(),
        }
    }
}

/// Classify a configured interpreter string.
///
/// Uses the platform's own absolute-path predicate, never a string-prefix
/// check: `C:\Users\A B\python.exe` is one token on Windows despite the
/// space, while `envtool run python` splits into three.
///
/// # Errors
///
/// Returns `AppError::EnvironmentResolution` for an empty string.
pub fn classify(raw: &str) -> Result<InvocationDescriptor> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::EnvironmentResolution(
            "interpreter string is empty".into(),
        ));
    }

    if Path::new(trimmed).is_absolute() {
        return Ok(InvocationDescriptor::Absolute(PathBuf::from(trimmed)));
    }

    let tokens: Vec<String> = trimmed.split_whitespace().map(str::to_owned).collect();
    Ok(InvocationDescriptor::Command(tokens))
}

/// Strategy probing for one kind of isolated runtime environment.
pub trait EnvironmentProbe: Send + Sync {
    /// Human-readable probe name for log lines.
    fn name(&self) -> &'static str;

    /// Return the interpreter invocation if this environment is active
    /// and its interpreter exists on disk, `None` otherwise.
    fn detect(&self) -> Option<InvocationDescriptor>;
}

/// Active Python virtualenv, marked by `VIRTUAL_ENV`.
pub struct VirtualenvProbe;

impl EnvironmentProbe for VirtualenvProbe {
    fn name(&self) -> &'static str {
        "virtualenv"
    }

    fn detect(&self) -> Option<InvocationDescriptor> {
        let prefix = env::var_os("VIRTUAL_ENV")?;
        let candidate = venv_interpreter(Path::new(&prefix));
        existing(candidate)
    }
}

/// Active conda environment, marked by `CONDA_PREFIX`.
pub struct CondaProbe;

impl EnvironmentProbe for CondaProbe {
    fn name(&self) -> &'static str {
        "conda"
    }

    fn detect(&self) -> Option<InvocationDescriptor> {
        let prefix = env::var_os("CONDA_PREFIX")?;
        let candidate = conda_interpreter(Path::new(&prefix));
        existing(candidate)
    }
}

#[cfg(unix)]
fn venv_interpreter(prefix: &Path) -> PathBuf {
    prefix.join("bin").join("python")
}

#[cfg(windows)]
fn venv_interpreter(prefix: &Path) -> PathBuf {
    prefix.join("Scripts").join("python.exe")
}

#[cfg(unix)]
fn conda_interpreter(prefix: &Path) -> PathBuf {
    prefix.join("bin").join("python")
}

#[cfg(windows)]
fn conda_interpreter(prefix: &Path) -> PathBuf {
    prefix.join("python.exe")
}

fn existing(candidate: PathBuf) -> Option<InvocationDescriptor> {
    if candidate.is_file() {
        Some(InvocationDescriptor::Absolute(candidate))
    } else {
        None
    }
}

/// Probes in fixed priority order.
#[must_use]
pub fn default_probes() -> Vec<Box<dyn EnvironmentProbe>> {
    vec![Box::new(VirtualenvProbe), Box::new(CondaProbe)]
}

/// Resolve the interpreter invocation for the current machine.
///
/// Probes each environment kind in priority order; when none is active,
/// falls back to the configured default interpreter. An absolute-path
/// fallback must exist on disk; a multi-token launch command is accepted
/// as-is since its program is found via `PATH` at spawn time.
///
/// # Errors
///
/// Returns `AppError::EnvironmentResolution` if no interpreter can be
/// located or verified.
pub fn resolve(config: &GlobalConfig) -> Result<InvocationDescriptor> {
    resolve_with_probes(config, &default_probes())
}

/// Resolution with an explicit probe list, for tests.
///
/// # Errors
///
/// Returns `AppError::EnvironmentResolution` if no interpreter can be
/// located or verified.
pub fn resolve_with_probes(
    config: &GlobalConfig,
    probes: &[Box<dyn EnvironmentProbe>],
) -> Result<InvocationDescriptor> {
    for probe in probes {
        if let Some(descriptor) = probe.detect() {
            debug!(probe = probe.name(), ?descriptor, "environment detected");
            return Ok(descriptor);
        }
    }

    let fallback = classify(&config.default_interpreter)?;
    if let InvocationDescriptor::Absolute(ref path) = fallback {
        if !path.is_file() {
            return Err(AppError::EnvironmentResolution(format!(
                "configured interpreter {} does not exist",
                path.display()
            )));
        }
    }

    debug!(?fallback, "no environment marker found, using configured interpreter");
    Ok(fallback)
}
