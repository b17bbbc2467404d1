//! Error taxonomy for BQL execution.
//!
//! Every error aborts the current phrase; DDL and MML roll back their
//! internal savepoint, queries release their statement.  Only
//! `Cancelled` is recoverable without reopening the connection.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BqlError {
    #[error(transparent)]
    Parse(#[from] bayesql_ast::ParseError),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("no such table: {0}")]
    NoSuchTable(String),

    #[error("no such population: {0}")]
    NoSuchPopulation(String),

    #[error("no such generator: {0}")]
    NoSuchGenerator(String),

    #[error("no such backend: {0}")]
    NoSuchBackend(String),

    #[error("no such variable in population {population}: {name}")]
    NoSuchVariable { population: String, name: String },

    #[error("no such column in table {table}: {name}")]
    NoSuchColumn { table: String, name: String },

    #[error("no such model for generator {generator}: {modelno}")]
    NoSuchModel { generator: String, modelno: u64 },

    #[error("{kind} already exists: {name}")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("population {0} has no generators")]
    NoGenerator(String),

    #[error("population {0} has several generators and no default; use MODELED BY")]
    AmbiguousGenerators(String),

    #[error("{operator} is not meaningful in a {context} context")]
    WrongContext {
        operator: &'static str,
        context: &'static str,
    },

    #[error("no correlation method for statistical types {0}/{1}")]
    IncompatibleStattypes(String, String),

    #[error("unknown statistical type: {0}")]
    UnknownStattype(String),

    #[error("no row matches the SIMILARITY target condition")]
    NoTargetRow,

    #[error("schema error: {0}")]
    Schema(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("backend {backend}: {reason}")]
    Backend { backend: String, reason: String },

    #[error("query was cancelled")]
    Cancelled,

    #[error("invalid parameter bindings: {0}")]
    Bindings(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, BqlError>;

impl BqlError {
    /// Wrap for return out of a SQL user-defined function.
    pub(crate) fn into_sqlite(self) -> rusqlite::Error {
        match self {
            BqlError::Sqlite(e) => e,
            other => rusqlite::Error::UserFunctionError(Box::new(other)),
        }
    }
}
