#![forbid(unsafe_code)]
#![allow(unused_assignments)]

use eql_ast::Span;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
#[allow(unused_assignments)]
pub enum SemanticError {
    #[error("elaboration error: {message}")]
    #[diagnostic(code(eql::elab))]
    Elab {
        message: String,
        #[label]
        span: Option<Span>,
    },

    #[error("name resolution error: {message}")]
    #[diagnostic(code(eql::resolve))]
    Resolve {
        message: String,
        #[label]
        span: Option<Span>,
    },

    #[error("schema error: {message}")]
    #[diagnostic(code(eql::schema))]
    Schema {
        message: String,
        #[label]
        span: Option<Span>,
    },

    #[error("type error: {message}")]
    #[diagnostic(code("eql::type"))]
    Type {
        message: String,
        #[label]
        span: Option<Span>,
    },
}

impl SemanticError {
    pub fn elab(message: impl Into<String>, span: Span) -> Self {
        SemanticError::Elab {
            message: message.into(),
            span: Some(span),
        }
    }

    pub fn resolve(message: impl Into<String>) -> Self {
        SemanticError::Resolve {
            message: message.into(),
            span: None,
        }
    }

    pub fn schema(message: impl Into<String>) -> Self {
        SemanticError::Schema {
            message: message.into(),
            span: None,
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        SemanticError::Type {
            message: message.into(),
            span: None,
        }
    }

    /// Internal invariant violations surface as type errors rather than panics.
    pub fn internal(message: impl Into<String>) -> Self {
        SemanticError::type_error(format!("internal: {}", message.into()))
    }

    pub fn message(&self) -> &str {
        match self {
            SemanticError::Elab { message, .. }
            | SemanticError::Resolve { message, .. }
            | SemanticError::Schema { message, .. }
            | SemanticError::Type { message, .. } => message,
        }
    }
}
