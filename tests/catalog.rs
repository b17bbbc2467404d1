//! Catalog lifecycle properties: create/drop identity, model
//! bookkeeping, rename propagation, persistence across reopen.

use bayesql::{BayesDb, BqlError, Value};

const CATALOG_TABLES: &[&str] = &[
    "bayesdb_backend",
    "bayesdb_table",
    "bayesdb_column",
    "bayesdb_population",
    "bayesdb_variable",
    "bayesdb_generator",
    "bayesdb_generator_model",
];

fn dump_catalog(bdb: &BayesDb) -> String {
    let mut dump = String::new();
    for table in CATALOG_TABLES {
        dump.push_str(table);
        dump.push('\n');
        let cursor = bdb
            .sql_execute(&format!("SELECT * FROM {} ORDER BY rowid", table), &[])
            .unwrap();
        for row in cursor {
            dump.push_str(&format!("{:?}\n", row));
        }
    }
    dump
}

fn setup() -> BayesDb {
    let bdb = BayesDb::open_in_memory().unwrap();
    bdb.sql_execute("CREATE TABLE t (a REAL, b REAL, c REAL)", &[]).unwrap();
    bdb.sql_execute("INSERT INTO t VALUES (1, 2, 3), (2, 4, 6), (3, 6, 9)", &[])
        .unwrap();
    bdb
}

#[test]
fn create_then_drop_population_restores_the_catalog() {
    let bdb = setup();
    let before = dump_catalog(&bdb);
    bdb.execute(
        "CREATE POPULATION p FOR t WITH SCHEMA (MODEL a, b AS numerical; IGNORE c)",
        &[],
    )
    .unwrap();
    assert_ne!(before, dump_catalog(&bdb));
    bdb.execute("DROP POPULATION p", &[]).unwrap();
    assert_eq!(before, dump_catalog(&bdb));
}

#[test]
fn population_schema_must_cover_every_column() {
    let bdb = setup();
    let err = bdb
        .execute("CREATE POPULATION p FOR t WITH SCHEMA (MODEL a AS numerical)", &[])
        .unwrap_err();
    assert!(matches!(err, BqlError::Schema(_)), "{}", err);
    let err = bdb
        .execute(
            "CREATE POPULATION p FOR t WITH SCHEMA \
             (MODEL a, b, c AS numerical; IGNORE a)",
            &[],
        )
        .unwrap_err();
    assert!(matches!(err, BqlError::Schema(_)), "{}", err);
    let err = bdb
        .execute(
            "CREATE POPULATION p FOR t WITH SCHEMA (MODEL a, b, c AS wibble)",
            &[],
        )
        .unwrap_err();
    assert!(matches!(err, BqlError::UnknownStattype(_)), "{}", err);
}

#[test]
fn drop_population_refuses_while_generators_live() {
    let bdb = setup();
    bdb.execute_script(
        "CREATE POPULATION p FOR t WITH SCHEMA (MODEL a, b, c AS numerical);
         CREATE GENERATOR g FOR p USING diag_gauss();",
    )
    .unwrap();
    let err = bdb.execute("DROP POPULATION p", &[]).unwrap_err();
    assert!(matches!(err, BqlError::Schema(_)), "{}", err);
    bdb.execute_script("DROP GENERATOR g; DROP POPULATION p;").unwrap();
}

#[test]
fn drop_table_refuses_while_populations_live() {
    let bdb = setup();
    bdb.execute("CREATE POPULATION p FOR t WITH SCHEMA (MODEL a, b, c AS numerical)", &[])
        .unwrap();
    let err = bdb.execute("DROP TABLE t", &[]).unwrap_err();
    assert!(matches!(err, BqlError::Schema(_)), "{}", err);
    bdb.execute_script("DROP POPULATION p; DROP TABLE t;").unwrap();
    assert!(matches!(
        bdb.execute("DROP TABLE t", &[]).unwrap_err(),
        BqlError::NoSuchTable(_)
    ));
    bdb.execute("DROP TABLE IF EXISTS t", &[]).unwrap();
}

#[test]
fn initialize_and_drop_models_exactly() {
    let bdb = setup();
    bdb.execute_script(
        "CREATE POPULATION p FOR t WITH SCHEMA (MODEL a, b, c AS numerical);
         CREATE GENERATOR g FOR p USING diag_gauss();
         CREATE GENERATOR h FOR p USING diag_gauss();
         INITIALIZE 4 MODELS FOR g;
         INITIALIZE 2 MODELS FOR h;",
    )
    .unwrap();
    let count = |gen: &str| -> i64 {
        let mut cursor = bdb
            .sql_execute(
                "SELECT count(*) FROM bayesdb_generator_model m
                    JOIN bayesdb_generator n ON n.id = m.generator_id
                    WHERE n.name = ?",
                &[Value::Text(gen.into())],
            )
            .unwrap();
        match cursor.next_row().unwrap()[0] {
            Value::Integer(n) => n,
            ref other => panic!("unexpected count: {:?}", other),
        }
    };
    assert_eq!((count("g"), count("h")), (4, 2));

    // Re-initialization without IF NOT EXISTS is refused.
    assert!(matches!(
        bdb.execute("INITIALIZE 2 MODELS FOR g", &[]).unwrap_err(),
        BqlError::AlreadyExists { .. }
    ));
    bdb.execute("INITIALIZE 6 MODELS IF NOT EXISTS FOR g", &[]).unwrap();
    assert_eq!(count("g"), 6);

    // Dropping a missing model is an error and drops nothing.
    assert!(matches!(
        bdb.execute("DROP MODELS 4-9 FROM h", &[]).unwrap_err(),
        BqlError::NoSuchModel { .. }
    ));
    assert_eq!(count("h"), 2);

    bdb.execute("DROP MODELS 0-5 FROM g", &[]).unwrap();
    assert_eq!((count("g"), count("h")), (0, 2));
    bdb.execute("DROP MODELS FROM h", &[]).unwrap();
    assert_eq!(count("h"), 0);
}

#[test]
fn rename_table_propagates_through_the_catalog() {
    let bdb = setup();
    bdb.execute_script(
        "CREATE POPULATION p FOR t WITH SCHEMA (MODEL a, b, c AS numerical);
         CREATE GENERATOR g FOR p USING diag_gauss();
         INITIALIZE 1 MODELS FOR g;",
    )
    .unwrap();
    bdb.execute("ALTER TABLE t RENAME TO t2", &[]).unwrap();
    let mut cursor = bdb
        .sql_execute("SELECT tabname FROM bayesdb_population", &[])
        .unwrap();
    assert_eq!(cursor.next_row().unwrap()[0], Value::Text("t2".into()));
    // Queries keep working against the renamed base table.
    let mut cursor = bdb
        .execute("ESTIMATE PROBABILITY DENSITY OF a = 2 FROM p LIMIT 1", &[])
        .unwrap();
    assert!(matches!(cursor.next_row().unwrap()[0], Value::Real(_)));
}

#[test]
fn default_generator_resolves_ambiguity() {
    let bdb = setup();
    bdb.execute_script(
        "CREATE POPULATION p FOR t WITH SCHEMA (MODEL a, b, c AS numerical);
         CREATE GENERATOR g FOR p USING diag_gauss();
         CREATE GENERATOR h FOR p USING diag_gauss();
         INITIALIZE 1 MODELS FOR g;
         INITIALIZE 1 MODELS FOR h;",
    )
    .unwrap();
    let err = bdb
        .execute("ESTIMATE PROBABILITY DENSITY OF a = 2 FROM p LIMIT 1", &[])
        .unwrap_err();
    assert!(matches!(err, BqlError::AmbiguousGenerators(_)), "{}", err);

    bdb.set_default_generator("t", Some("g")).unwrap();
    bdb.execute("ESTIMATE PROBABILITY DENSITY OF a = 2 FROM p LIMIT 1", &[])
        .unwrap();

    // Dropping the default clears it and restores the ambiguity…
    bdb.execute("DROP MODELS FROM g", &[]).unwrap();
    bdb.execute("DROP GENERATOR g", &[]).unwrap();
    // …no: one generator is left, so it becomes the unique choice.
    bdb.execute("ESTIMATE PROBABILITY DENSITY OF a = 2 FROM p LIMIT 1", &[])
        .unwrap();
}

#[test]
fn alter_population_adds_and_retypes_variables() {
    let bdb = setup();
    bdb.execute_script(
        "CREATE POPULATION p FOR t WITH SCHEMA (MODEL a, b AS numerical; IGNORE c);
         CREATE GENERATOR g FOR p USING diag_gauss();
         INITIALIZE 1 MODELS FOR g;",
    )
    .unwrap();
    bdb.execute("ALTER POPULATION p ADD VARIABLE c numerical", &[]).unwrap();
    let mut cursor = bdb
        .execute("ESTIMATE PROBABILITY DENSITY OF c = 6 FROM p LIMIT 1", &[])
        .unwrap();
    assert!(matches!(cursor.next_row().unwrap()[0], Value::Real(_)));

    bdb.execute("ALTER POPULATION p SET STATTYPE OF a TO count", &[]).unwrap();
    let mut cursor = bdb
        .sql_execute(
            "SELECT stattype FROM bayesdb_variable WHERE name = 'a'",
            &[],
        )
        .unwrap();
    assert_eq!(cursor.next_row().unwrap()[0], Value::Text("count".into()));
}

#[test]
fn generator_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reopen.bdb");
    {
        let bdb = BayesDb::open(&path).unwrap();
        bdb.sql_execute("CREATE TABLE t (a REAL)", &[]).unwrap();
        bdb.sql_execute("INSERT INTO t VALUES (1), (2), (3)", &[]).unwrap();
        bdb.execute_script(
            "CREATE POPULATION p FOR t WITH SCHEMA (MODEL a AS numerical);
             CREATE GENERATOR g FOR p USING diag_gauss();
             INITIALIZE 2 MODELS FOR g;
             ANALYZE g FOR 1 ITERATIONS;",
        )
        .unwrap();
        bdb.close().unwrap();
    }
    let bdb = BayesDb::open(&path).unwrap();
    let mut cursor = bdb
        .execute("ESTIMATE PROBABILITY DENSITY OF a = 2 FROM p LIMIT 1", &[])
        .unwrap();
    let density = match cursor.next_row().unwrap()[0] {
        Value::Real(f) => f,
        ref other => panic!("unexpected density: {:?}", other),
    };
    let expected = 1.0 / (std::f64::consts::TAU * (2.0 / 3.0)).sqrt();
    assert!((density - expected).abs() < 1e-9, "{} vs {}", density, expected);
}

#[test]
fn interrupt_cancels_a_running_analysis() {
    let bdb = setup();
    bdb.execute_script(
        "CREATE POPULATION p FOR t WITH SCHEMA (MODEL a, b, c AS numerical);
         CREATE GENERATOR g FOR p USING diag_gauss();
         INITIALIZE 1 MODELS FOR g;",
    )
    .unwrap();
    let handle = bdb.interrupt_handle();
    let waiter = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(200));
        handle.interrupt();
    });
    let start = std::time::Instant::now();
    let err = bdb.execute("ANALYZE g FOR 30 SECONDS", &[]).unwrap_err();
    waiter.join().unwrap();
    assert!(matches!(err, BqlError::Cancelled), "{}", err);
    assert!(start.elapsed() < std::time::Duration::from_secs(10));
    // Cancelled is recoverable: the connection still answers.
    bdb.execute("ANALYZE g FOR 1 ITERATIONS", &[]).unwrap();
}
