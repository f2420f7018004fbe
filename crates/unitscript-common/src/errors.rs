use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The compile-time error taxonomy (§7): lexer and parser errors are both
/// reported as `Syntax`, since the parser does not attempt recovery and a
/// single fatal syntax error is all a caller ever sees from either stage.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum CompileErrorKind {
    #[error("{0}")]
    Syntax(String),
    #[error("{0} is not defined")]
    Name(String),
    #[error("{ty} has no attribute {name}{suggestion}")]
    Attribute {
        ty: String,
        name: String,
        suggestion: String,
    },
}

#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{kind}")]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub line: u32,
    pub column: Option<u32>,
}

impl CompileError {
    pub fn syntax(message: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            kind: CompileErrorKind::Syntax(message.into()),
            line,
            column: Some(column),
        }
    }

    pub fn name(name: impl Into<String>, line: u32) -> Self {
        Self {
            kind: CompileErrorKind::Name(name.into()),
            line,
            column: None,
        }
    }

    pub fn attribute(
        ty: impl Into<String>,
        name: impl Into<String>,
        line: u32,
        suggestion: Option<String>,
    ) -> Self {
        let suggestion = suggestion
            .map(|s| format!("; did you mean '{}'?", s))
            .unwrap_or_default();
        Self {
            kind: CompileErrorKind::Attribute {
                ty: ty.into(),
                name: name.into(),
                suggestion,
            },
            line,
            column: None,
        }
    }
}

/// The runtime error taxonomy (§7). Set once on `VM::error`; after it is set
/// the VM guarantees no further state mutation within the same step.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum RuntimeErrorKind {
    #[error("{0} is not defined")]
    Name(String),
    #[error("{ty} has no attribute {name}")]
    Attribute { ty: String, name: String },
    #[error("{0} is not callable")]
    Type(String),
    #[error("list index out of range")]
    Index,
}

#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{kind}")]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub line: u32,
}

impl RuntimeError {
    pub fn new(kind: RuntimeErrorKind, line: u32) -> Self {
        Self { kind, line }
    }
}
