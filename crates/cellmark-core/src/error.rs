use std::fmt;

/// Failure classes for a grading run.
///
/// `Parse` is fatal when the combined source fails to parse (the run cannot
/// be rewritten); during the pre-execution pass it is cell-local and
/// swallowable like any other execution failure. `Budget` follows the same
/// swallow/propagate policy as `Exec`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecErrorKind {
    Parse,
    Exec,
    Budget,
    Io,
}

impl ExecErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecErrorKind::Parse => "parse",
            ExecErrorKind::Exec => "exec",
            ExecErrorKind::Budget => "budget",
            ExecErrorKind::Io => "io",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecError {
    pub kind: ExecErrorKind,
    pub message: String,
}

impl ExecError {
    pub fn new(kind: ExecErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn exec(message: impl Into<String>) -> Self {
        Self::new(ExecErrorKind::Exec, message)
    }
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for ExecError {}
