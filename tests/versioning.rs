//! Schema versioning: refusal of newer databases, the disable-check
//! escape hatch, and upgrade from version 1.
//!
//! These tests mutate process environment variables, so they live in
//! their own test binary.

use std::sync::Mutex;

use bayesql::{BayesDb, BqlError};

// The toggle is process-global; serialize the tests that touch it.
static ENV_LOCK: Mutex<()> = Mutex::new(());

#[test]
fn newer_schema_versions_are_refused_unless_disabled() {
    let _guard = ENV_LOCK.lock().unwrap();
    std::env::remove_var("BAYESQL_DISABLE_VERSION_CHECK");
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.bdb");
    {
        let bdb = BayesDb::open(&path).unwrap();
        bdb.close().unwrap();
    }
    {
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch("PRAGMA user_version = 99").unwrap();
    }
    let err = BayesDb::open(&path).unwrap_err();
    assert!(matches!(err, BqlError::Schema(_)), "{}", err);

    std::env::set_var("BAYESQL_DISABLE_VERSION_CHECK", "1");
    let bdb = BayesDb::open(&path).unwrap();
    bdb.close().unwrap();
    std::env::remove_var("BAYESQL_DISABLE_VERSION_CHECK");
}

#[test]
fn foreign_application_ids_are_refused() {
    let _guard = ENV_LOCK.lock().unwrap();
    std::env::remove_var("BAYESQL_DISABLE_VERSION_CHECK");
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("foreign.bdb");
    {
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch(
            "PRAGMA application_id = 12345;
             PRAGMA user_version = 7;
             CREATE TABLE x (y)",
        )
        .unwrap();
    }
    let err = BayesDb::open(&path).unwrap_err();
    assert!(matches!(err, BqlError::Schema(_)), "{}", err);
}

#[test]
fn version_1_databases_upgrade_in_place() {
    let _guard = ENV_LOCK.lock().unwrap();
    std::env::remove_var("BAYESQL_DISABLE_VERSION_CHECK");
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("old.bdb");
    {
        let bdb = BayesDb::open(&path).unwrap();
        bdb.close().unwrap();
    }
    {
        // Rewind: drop the version-2 columns and stamp version 1.
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch(
            "ALTER TABLE bayesdb_column DROP COLUMN shortname;
             ALTER TABLE bayesdb_column DROP COLUMN description;
             PRAGMA user_version = 1",
        )
        .unwrap();
    }
    let bdb = BayesDb::open(&path).unwrap();
    let mut cursor = bdb.sql_execute("PRAGMA user_version", &[]).unwrap();
    assert_eq!(cursor.next_row().unwrap()[0], bayesql::Value::Integer(2));
    // The upgraded column is present again.
    bdb.sql_execute("SELECT shortname FROM bayesdb_column", &[]).unwrap();
    bdb.close().unwrap();
}
