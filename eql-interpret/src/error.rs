use eql_storage::StorageError;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum EvalError {
    #[error("{0}")]
    #[diagnostic(code(eql::eval))]
    Runtime(String),

    #[error("no builtin implementation for {0}")]
    #[diagnostic(code(eql::eval), help("declare the function with a `USING (...)` body instead"))]
    MissingBuiltin(String),

    #[error("missing value for required parameter ${0}")]
    #[diagnostic(code(eql::eval))]
    MissingParameter(String),

    #[error("malformed evaluation input: {0}")]
    #[diagnostic(code(eql::eval))]
    Internal(String),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Storage(#[from] StorageError),
}

impl EvalError {
    pub fn runtime(msg: impl Into<String>) -> Self {
        EvalError::Runtime(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        EvalError::Internal(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, EvalError>;
