//! bayesql — a Bayesian Query Language engine.
//!
//! BQL is a strict superset of SQL that adds probabilistic questions:
//! predictive probabilities, joint and conditional densities,
//! simulation from a generative model, inference of missing values,
//! and similarity and dependence between rows and columns.  The
//! statistical work is delegated to pluggable backends modeling a
//! population of variables; everything else — parsing, name
//! resolution, compilation down to SQLite SQL plus model-operator
//! calls, transactions, streaming — lives here.
//!
//! ```no_run
//! use bayesql::BayesDb;
//!
//! let bdb = BayesDb::open("example.bdb")?;
//! bdb.execute_script(
//!     "CREATE POPULATION p FOR t WITH SCHEMA (MODEL a, b AS numerical);
//!      CREATE GENERATOR g FOR p USING diag_gauss();
//!      INITIALIZE 4 MODELS FOR g;
//!      ANALYZE g FOR 10 ITERATIONS;",
//! )?;
//! let mut cursor = bdb.execute("ESTIMATE PROBABILITY DENSITY OF a = 2 FROM p", &[])?;
//! while let Some(row) = cursor.next_row() {
//!     println!("{:?}", row);
//! }
//! # Ok::<(), bayesql::BqlError>(())
//! ```

pub mod backend;
pub mod backends;
pub mod bayesdb;
pub mod bql;
pub mod bqlfn;
pub mod catalog;
pub mod compile;
pub mod error;
pub mod schema;
pub mod stats;

pub use bayesdb::{BayesDb, Cursor, InterruptHandle};
pub use error::{BqlError, Result};
pub use rusqlite::types::Value;

/// Open (creating if necessary) a database file.
pub fn open<P: AsRef<std::path::Path>>(path: P) -> Result<BayesDb> {
    BayesDb::open(path)
}

/// Open a fresh in-memory database.
pub fn open_in_memory() -> Result<BayesDb> {
    BayesDb::open_in_memory()
}

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::backend::Backend;
    pub use crate::backends::DiagGauss;
    pub use crate::bayesdb::{BayesDb, Cursor, InterruptHandle};
    pub use crate::error::{BqlError, Result};
    pub use rusqlite::types::Value;
}
