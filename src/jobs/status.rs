//! Job lifecycle states.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status of an export or import job.
///
/// ```text
/// export: preparing -> streaming -> {completed, error}
/// import: preparing -> validating -> {validated, validation_failed}
///         validated -> importing -> {completed, error}
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Preparing,
    Validating,
    Validated,
    ValidationFailed,
    Streaming,
    Importing,
    Completed,
    Error,
}

impl JobStatus {
    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Error | JobStatus::ValidationFailed
        )
    }

    /// Whether a stored job in this state may be saved with `next`.
    ///
    /// Saving the same non-terminal state again is allowed so progress can be
    /// reported; terminal states accept nothing.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;

        if self.is_terminal() {
            return false;
        }
        if *self == next {
            return true;
        }
        matches!(
            (self, next),
            (Preparing, Validating)
                | (Preparing, Streaming)
                | (Preparing, ValidationFailed)
                | (Preparing, Error)
                | (Validating, Validated)
                | (Validating, ValidationFailed)
                | (Validating, Error)
                | (Validated, Importing)
                | (Validated, Error)
                | (Importing, Completed)
                | (Importing, Error)
                | (Streaming, Completed)
                | (Streaming, Error)
        )
    }

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Preparing => "preparing",
            JobStatus::Validating => "validating",
            JobStatus::Validated => "validated",
            JobStatus::ValidationFailed => "validation_failed",
            JobStatus::Streaming => "streaming",
            JobStatus::Importing => "importing",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
