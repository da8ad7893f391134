//! Multi-step release of resources where every step runs.
//!
//! A step that fails does not stop the ones after it. Failures are collected
//! into a [`CloseError`] that reports the first one and carries the rest.

use std::{fmt, io};

use thiserror::Error;
use tracing::warn;

type Action = Box<dyn FnOnce() -> io::Result<()> + Send>;

/// One named cleanup action.
pub struct CleanupStep {
    name: &'static str,
    action: Action,
}

impl CleanupStep {
    pub fn new(name: &'static str, action: impl FnOnce() -> io::Result<()> + Send + 'static) -> Self {
        Self {
            name,
            action: Box::new(action),
        }
    }
}

impl fmt::Debug for CleanupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CleanupStep").field(&self.name).finish()
    }
}

/// A cleanup step that returned an error.
#[derive(Error, Debug)]
#[error("{step}: {error}")]
pub struct CleanupFailure {
    pub step: &'static str,
    #[source]
    pub error: io::Error,
}

/// Every failed cleanup step, in execution order. The first one is reported.
#[derive(Error, Debug)]
#[error("close failed in {step}: {error}{}", suppressed_note(.suppressed))]
pub struct CloseError {
    step: &'static str,
    #[source]
    error: io::Error,
    suppressed: Vec<CleanupFailure>,
}

fn suppressed_note(suppressed: &[CleanupFailure]) -> String {
    match suppressed.len() {
        0 => String::new(),
        n => format!(" ({n} more cleanup failure(s) suppressed)"),
    }
}

impl CloseError {
    /// Step whose failure is reported.
    pub fn step(&self) -> &'static str {
        self.step
    }

    pub fn error(&self) -> &io::Error {
        &self.error
    }

    /// Failures after the first.
    pub fn suppressed(&self) -> &[CleanupFailure] {
        &self.suppressed
    }

    pub fn kind(&self) -> io::ErrorKind {
        self.error.kind()
    }
}

/// Run every step in order, then report the collected failures.
pub fn run_all(steps: impl IntoIterator<Item = CleanupStep>) -> Result<(), CloseError> {
    let mut failures = Vec::new();

    for step in steps {
        if let Err(error) = (step.action)() {
            if !failures.is_empty() {
                warn!(step = step.name, error = %error, "Suppressed cleanup failure");
            }
            failures.push(CleanupFailure {
                step: step.name,
                error,
            });
        }
    }

    let mut failures = failures.into_iter();
    match failures.next() {
        None => Ok(()),
        Some(CleanupFailure { step, error }) => Err(CloseError {
            step,
            error,
            suppressed: failures.collect(),
        }),
    }
}
