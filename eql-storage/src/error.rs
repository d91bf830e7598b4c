use eql_ir::EdgeId;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum StorageError {
    #[error("sqlite: {0}")]
    #[diagnostic(code(eql::storage))]
    Sqlite(#[from] rusqlite::Error),

    #[error("no object with id {0}")]
    #[diagnostic(code(eql::storage))]
    UnknownId(EdgeId),

    #[error("type {0} has no storage layout")]
    #[diagnostic(code(eql::storage))]
    UnknownType(String),

    #[error("{tp} has no stored field `{field}`")]
    #[diagnostic(code(eql::storage))]
    UnknownField { tp: String, field: String },

    #[error("the database was created with a different schema")]
    #[diagnostic(
        code(eql::storage),
        help("open it without a schema to reuse the stored one, or start from a fresh file")
    )]
    SchemaMismatch,

    #[error("cannot store {0}")]
    #[diagnostic(code(eql::storage))]
    Unstorable(String),

    #[error("snapshot was taken from a different kind of backend")]
    #[diagnostic(code(eql::storage))]
    ForeignSnapshot,
}

pub type Result<T> = std::result::Result<T, StorageError>;
