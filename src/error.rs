use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure to tokenize or parse expression text.
#[derive(Clone, Debug, Error, PartialEq)]
#[error("{message} at offset {offset}")]
pub struct ParseError {
    pub message: String,
    pub offset: usize,
}

impl ParseError {
    pub fn new(message: impl Into<String>, offset: usize) -> Self {
        ParseError {
            message: message.into(),
            offset,
        }
    }
}

/// Errors raised while running an expression inside the sandbox.
///
/// These never escape a pass: the orchestrator turns each one into an
/// error marker on the path being evaluated.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum EvalError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("ReferenceError: {0} is not defined")]
    Reference(String),

    #[error("TypeError: {0}")]
    Type(String),

    #[error("Uncaught {0}")]
    Thrown(String),

    #[error("RangeError: maximum call depth of {0} exceeded")]
    CallDepth(usize),

    #[error("RangeError: {0}")]
    Range(String),

    #[error("evaluation aborted after {0} steps")]
    StepLimit(usize),
}

/// Error categories surfaced to consumers of the evaluated tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    RuntimeError,
    CircularDependency,
    ParseError,
}

/// Per-path error marker stored alongside evaluated values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluationError {
    pub kind: ErrorKind,
    pub message: String,
}

impl EvaluationError {
    pub fn runtime(err: &EvalError) -> Self {
        match err {
            EvalError::Parse(parse) => EvaluationError {
                kind: ErrorKind::ParseError,
                message: parse.to_string(),
            },
            other => EvaluationError {
                kind: ErrorKind::RuntimeError,
                message: other.to_string(),
            },
        }
    }

    pub fn parse(err: &ParseError) -> Self {
        EvaluationError {
            kind: ErrorKind::ParseError,
            message: err.to_string(),
        }
    }

    pub fn circular(cycle: &[String]) -> Self {
        EvaluationError {
            kind: ErrorKind::CircularDependency,
            message: format!("circular dependency: {}", cycle.join(" -> ")),
        }
    }
}

/// Fatal errors of the orchestration pipeline.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("structural inconsistency in {entity}: {detail}")]
    StructuralInconsistency { entity: String, detail: String },

    #[error("entity {0} is already registered")]
    DuplicateEntity(String),

    #[error("entity {0} is not a JS object")]
    NotJsObject(String),

    #[error("invalid entity name {0:?}")]
    InvalidName(String),

    #[error("{0} is declared more than once")]
    DuplicateMember(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid value {value:?} for {var}")]
    Env { var: String, value: String },
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read tree file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid tree document: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
