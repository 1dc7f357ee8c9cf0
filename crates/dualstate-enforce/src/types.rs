use std::fmt;

use dualstate_core::types::InterfaceKey;
use serde::{Deserialize, Serialize};

/// Diagnostic codes produced by the engine itself, as opposed to the
/// external checker.
pub mod codes {
    /// The bounded check step ran out of time.
    pub const TIMEOUT: &str = "TimeoutError";
    /// The checker task panicked or was cancelled.
    pub const CHECKER_FAILED: &str = "CheckerError";
    /// Proposed code could not be laid into its file.
    pub const SPLICE: &str = "SpliceError";
    /// The reasoner proposed something the current graph cannot represent.
    pub const UNREPRESENTABLE: &str = "UnrepresentableChange";
    /// Reading an unchanged source file for the check failed.
    pub const SOURCE_READ: &str = "SourceReadError";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
            Severity::Info => "INFO",
        })
    }
}

/// One finding from a gate check, mapped back to a graph node where
/// possible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// `None` for file-level findings that could not be attributed.
    pub key: Option<InterfaceKey>,
    pub code: String,
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
}

impl Diagnostic {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: None,
            code: code.into(),
            severity: Severity::Error,
            message: message.into(),
            file: None,
            line: None,
        }
    }

    pub fn warning(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(code, message)
        }
    }

    pub fn for_key(mut self, key: InterfaceKey) -> Self {
        self.key = Some(key);
        self
    }

    pub fn at(mut self, file: impl Into<String>, line: u32) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.severity, self.code)?;
        if let Some(key) = &self.key {
            write!(f, " {key}")?;
        } else if let Some(file) = &self.file {
            write!(f, " {file}")?;
            if let Some(line) = self.line {
                write!(f, ":{line}")?;
            }
        }
        write!(f, ": {}", self.message)
    }
}

/// Change-propagation marking of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Marking {
    /// Needs re-validation after the proposal.
    Red,
    Green,
}
