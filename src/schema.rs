//! Catalog schema: installation, versioning, one-way upgrades.
//!
//! The catalog lives in ordinary SQLite tables.  A fresh database is
//! stamped with an application id and a user version; opening an
//! existing database checks both and applies any pending upgrade
//! scripts, each in a single transaction.  `BAYESQL_DISABLE_VERSION_CHECK`
//! suppresses the checks (test escape hatch).

use rusqlite::Connection;

use crate::error::{BqlError, Result};

/// "BQLD" stamped into the SQLite header.
pub const APPLICATION_ID: i64 = 0x42514C44;

/// Highest schema version this build understands.
pub const USER_VERSION: i64 = 2;

const SCHEMA_1: &str = r#"
BEGIN;
PRAGMA application_id = 1112624196;
PRAGMA user_version = 1;

CREATE TABLE bayesdb_backend (
    name        TEXT COLLATE NOCASE NOT NULL PRIMARY KEY,
    version     INTEGER NOT NULL
);

CREATE TABLE bayesdb_table (
    name                TEXT COLLATE NOCASE NOT NULL PRIMARY KEY,
    default_generator   TEXT COLLATE NOCASE
);

CREATE TABLE bayesdb_column (
    tabname     TEXT COLLATE NOCASE NOT NULL
                    REFERENCES bayesdb_table(name) ON UPDATE CASCADE,
    colno       INTEGER NOT NULL CHECK (colno >= 0),
    name        TEXT COLLATE NOCASE NOT NULL,
    PRIMARY KEY (tabname, colno),
    UNIQUE (tabname, name)
);

CREATE TABLE bayesdb_population (
    id          INTEGER NOT NULL PRIMARY KEY CHECK (id > 0),
    name        TEXT COLLATE NOCASE NOT NULL UNIQUE,
    tabname     TEXT COLLATE NOCASE NOT NULL
                    REFERENCES bayesdb_table(name) ON UPDATE CASCADE
);

CREATE TABLE bayesdb_generator (
    id              INTEGER NOT NULL PRIMARY KEY CHECK (id > 0),
    name            TEXT COLLATE NOCASE NOT NULL UNIQUE,
    population_id   INTEGER NOT NULL REFERENCES bayesdb_population(id),
    backend         TEXT COLLATE NOCASE NOT NULL REFERENCES bayesdb_backend(name),
    schema          TEXT NOT NULL
);

-- Variables with a generator id are latent: visible only through
-- that generator.  Latent variables use negative column numbers so
-- they can never collide with base-table columns.
CREATE TABLE bayesdb_variable (
    population_id   INTEGER NOT NULL REFERENCES bayesdb_population(id),
    generator_id    INTEGER REFERENCES bayesdb_generator(id) ON DELETE CASCADE,
    colno           INTEGER NOT NULL,
    name            TEXT COLLATE NOCASE NOT NULL,
    stattype        TEXT COLLATE NOCASE NOT NULL,
    UNIQUE (population_id, name),
    UNIQUE (population_id, colno)
);

CREATE TABLE bayesdb_generator_model (
    generator_id    INTEGER NOT NULL
                        REFERENCES bayesdb_generator(id) ON DELETE CASCADE,
    modelno         INTEGER NOT NULL CHECK (modelno >= 0),
    iterations      INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (generator_id, modelno)
);

-- A table's default generator must not dangle.
CREATE TRIGGER bayesdb_generator_default_clear
    AFTER DELETE ON bayesdb_generator
    BEGIN
        UPDATE bayesdb_table SET default_generator = NULL
            WHERE default_generator = OLD.name;
    END;

COMMIT;
"#;

const SCHEMA_1_TO_2: &str = r#"
BEGIN;
PRAGMA user_version = 2;
ALTER TABLE bayesdb_column ADD COLUMN shortname TEXT;
ALTER TABLE bayesdb_column ADD COLUMN description TEXT;
COMMIT;
"#;

/// Install or upgrade the catalog schema on `conn`.
pub fn install_schema(conn: &Connection) -> Result<()> {
    let check = std::env::var_os("BAYESQL_DISABLE_VERSION_CHECK").is_none();
    let application_id: i64 = conn.query_row("PRAGMA application_id", [], |r| r.get(0))?;
    let user_version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;

    if application_id == 0 && user_version == 0 {
        // Fresh (or at least unclaimed) database file.
        conn.execute_batch(SCHEMA_1)?;
        conn.execute_batch(SCHEMA_1_TO_2)?;
        tracing::debug!(version = USER_VERSION, "installed catalog schema");
        return Ok(());
    }
    if check && application_id != APPLICATION_ID {
        return Err(BqlError::Schema(format!(
            "invalid application id: 0x{:08x}",
            application_id
        )));
    }
    match user_version {
        1 => {
            conn.execute_batch(SCHEMA_1_TO_2)?;
            tracing::debug!("upgraded catalog schema 1 -> 2");
            Ok(())
        }
        2 => Ok(()),
        v if v > USER_VERSION && !check => Ok(()),
        v => Err(BqlError::Schema(format!(
            "unsupported catalog schema version: {}",
            v
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn application_id_matches_pragma_text() {
        // The PRAGMA in SCHEMA_1 must stay in sync with the constant.
        let line = SCHEMA_1
            .lines()
            .find(|l| l.contains("application_id ="))
            .unwrap();
        let n: i64 = line
            .trim()
            .trim_start_matches("PRAGMA application_id = ")
            .trim_end_matches(';')
            .parse()
            .unwrap();
        assert_eq!(n, APPLICATION_ID);
    }

    #[test]
    fn fresh_database_installs_and_reopens() {
        let conn = Connection::open_in_memory().unwrap();
        install_schema(&conn).unwrap();
        let v: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0)).unwrap();
        assert_eq!(v, USER_VERSION);
        // Idempotent on reopen.
        install_schema(&conn).unwrap();
    }

    #[test]
    fn rejects_foreign_application_id() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA application_id = 12345; PRAGMA user_version = 9")
            .unwrap();
        assert!(install_schema(&conn).is_err());
    }
}
