//! End-to-end BQL execution against the diag_gauss backend.

use bayesql::{BayesDb, BqlError, Value};

const TAU: f64 = std::f64::consts::TAU;

fn setup() -> BayesDb {
    let bdb = BayesDb::open_in_memory().unwrap();
    bdb.sql_execute("CREATE TABLE t (a REAL, b REAL, c REAL)", &[]).unwrap();
    bdb.sql_execute("INSERT INTO t VALUES (1, 2, 3), (2, 4, 6), (3, 6, 9)", &[])
        .unwrap();
    bdb.execute_script(
        "CREATE POPULATION p FOR t WITH SCHEMA (MODEL a, b, c AS numerical);
         CREATE GENERATOR g FOR p USING diag_gauss();
         INITIALIZE 1 MODELS FOR g;
         ANALYZE g FOR 0 ITERATIONS;",
    )
    .unwrap();
    bdb
}

fn real(v: &Value) -> f64 {
    match v {
        Value::Real(f) => *f,
        Value::Integer(i) => *i as f64,
        other => panic!("expected a number, got {:?}", other),
    }
}

fn one_value(bdb: &BayesDb, bql: &str) -> Value {
    let mut cursor = bdb.execute(bql, &[]).unwrap();
    let row = cursor.next_row().expect("no rows");
    assert!(cursor.next_row().is_none(), "more than one row");
    row.into_iter().next().expect("no columns")
}

// Column a holds 1, 2, 3: mean 2, variance 2/3.
const VAR_A: f64 = 2.0 / 3.0;

#[test]
fn density_matches_the_fitted_gaussian() {
    let bdb = setup();
    let density = real(&one_value(
        &bdb,
        "ESTIMATE PROBABILITY DENSITY OF a = 2 FROM p LIMIT 1",
    ));
    let expected = 1.0 / (TAU * VAR_A).sqrt();
    assert!((density - expected).abs() < 1e-9, "{} vs {}", density, expected);
}

#[test]
fn density_averages_across_models_per_model_logpdf() {
    // With several identically fitted models the average equals the
    // per-model density.
    let bdb = setup();
    bdb.execute_script("INITIALIZE 4 MODELS IF NOT EXISTS FOR g").unwrap();
    let density = real(&one_value(
        &bdb,
        "ESTIMATE PROBABILITY DENSITY OF a = 2 FROM p LIMIT 1",
    ));
    let expected = 1.0 / (TAU * VAR_A).sqrt();
    assert!((density - expected).abs() < 1e-9);
}

#[test]
fn simulate_returns_exactly_the_limit() {
    let bdb = setup();
    let mut cursor = bdb.execute("SIMULATE a, b FROM p LIMIT 5", &[]).unwrap();
    assert_eq!(cursor.column_names(), ["a", "b"]);
    let mut n = 0;
    while let Some(row) = cursor.next_row() {
        assert_eq!(row.len(), 2);
        assert!(matches!(row[0], Value::Real(_)));
        assert!(matches!(row[1], Value::Real(_)));
        n += 1;
    }
    assert_eq!(n, 5);

    let mut empty = bdb.execute("SIMULATE a FROM p LIMIT 0", &[]).unwrap();
    assert!(empty.next_row().is_none());

    let err = bdb.execute("SIMULATE a FROM p LIMIT -1", &[]).unwrap_err();
    assert!(matches!(err, BqlError::Schema(_)), "{}", err);
}

#[test]
fn dependence_probability_is_zero_under_independence() {
    let bdb = setup();
    let dep = real(&one_value(
        &bdb,
        "ESTIMATE DEPENDENCE PROBABILITY OF a WITH b FROM p LIMIT 1",
    ));
    assert_eq!(dep, 0.0);

    // And in [0, 1] for every pair.
    let cursor = bdb
        .execute("ESTIMATE DEPENDENCE PROBABILITY FROM PAIRWISE VARIABLES OF p", &[])
        .unwrap();
    for row in cursor {
        let dep = real(&row[2]);
        assert!((0.0..=1.0).contains(&dep), "{}", dep);
    }
}

#[test]
fn self_mutual_information_is_the_column_entropy() {
    let bdb = setup();
    let mi = real(&one_value(
        &bdb,
        "ESTIMATE MUTUAL INFORMATION OF a WITH a FROM p LIMIT 1",
    ));
    assert!(mi >= 0.0);
    let entropy_bits = (0.5 * (TAU * std::f64::consts::E * VAR_A).ln()) / 2f64.ln();
    assert!((mi - entropy_bits).abs() < 1e-6, "{} vs {}", mi, entropy_bits);

    let mi_ab = real(&one_value(
        &bdb,
        "ESTIMATE MUTUAL INFORMATION OF a WITH b USING 10 SAMPLES FROM p LIMIT 1",
    ));
    assert_eq!(mi_ab, 0.0);
}

#[test]
fn predictive_probability_orders_rows_by_density() {
    let bdb = setup();
    let cursor = bdb
        .execute(
            "ESTIMATE a, PREDICTIVE PROBABILITY OF a AS pp FROM p ORDER BY pp DESC LIMIT 2",
            &[],
        )
        .unwrap();
    let rows: Vec<Vec<Value>> = cursor.collect();
    assert_eq!(rows.len(), 2);
    // The stored value nearest the fitted mean has the highest
    // density.
    assert_eq!(real(&rows[0][0]), 2.0);
    assert!(real(&rows[0][1]) >= real(&rows[1][1]));
    assert!([1.0, 3.0].contains(&real(&rows[1][0])));
}

#[test]
fn order_by_estimator_is_consistent_with_projection() {
    let bdb = setup();
    let cursor = bdb
        .execute(
            "ESTIMATE a, PREDICTIVE PROBABILITY OF a AS pp FROM p \
             ORDER BY PREDICTIVE PROBABILITY OF a DESC",
            &[],
        )
        .unwrap();
    let pps: Vec<f64> = cursor.map(|row| real(&row[1])).collect();
    assert_eq!(pps.len(), 3);
    for pair in pps.windows(2) {
        assert!(pair[0] >= pair[1], "{:?}", pps);
    }
}

#[test]
fn infer_explicit_returns_value_and_confidence() {
    let bdb = setup();
    let cursor = bdb
        .execute(
            "INFER EXPLICIT a, PREDICT b AS bp CONFIDENCE bc FROM p WHERE rowid = 1",
            &[],
        )
        .unwrap();
    assert_eq!(cursor.column_names(), ["a", "bp", "bc"]);
    let rows: Vec<Vec<Value>> = cursor.collect();
    assert_eq!(rows.len(), 1);
    assert_eq!(real(&rows[0][0]), 1.0);
    // diag_gauss predicts the fitted mean of b (2, 4, 6).
    assert!((real(&rows[0][1]) - 4.0).abs() < 1e-9);
    let bc = real(&rows[0][2]);
    assert!((0.0..=1.0).contains(&bc), "{}", bc);
}

#[test]
fn infer_fills_only_confident_nulls() {
    let bdb = setup();
    bdb.sql_execute("CREATE TABLE u (x REAL)", &[]).unwrap();
    bdb.sql_execute("INSERT INTO u VALUES (1), (2), (3), (NULL)", &[]).unwrap();
    bdb.execute_script(
        "CREATE POPULATION q FOR u WITH SCHEMA (MODEL x AS numerical);
         CREATE GENERATOR gq FOR q USING diag_gauss();
         INITIALIZE 1 MODELS FOR gq;",
    )
    .unwrap();

    // Demanding near-certainty: the missing cell stays NULL.
    let v = one_value(&bdb, "INFER x WITH CONFIDENCE 0.99 FROM q WHERE x IS NULL");
    assert_eq!(v, Value::Null);

    // With no confidence bar the prediction (the fitted mean) fills
    // in.
    let v = one_value(&bdb, "INFER x WITH CONFIDENCE 0.0 FROM q WHERE x IS NULL");
    assert!((real(&v) - 2.0).abs() < 1e-9);

    // Stored values pass through untouched.
    let cursor = bdb
        .execute("INFER x WITH CONFIDENCE 0.99 FROM q WHERE x IS NOT NULL", &[])
        .unwrap();
    let stored: Vec<f64> = cursor.map(|row| real(&row[0])).collect();
    assert_eq!(stored, [1.0, 2.0, 3.0]);
}

#[test]
fn predict_expression_thresholds() {
    let bdb = setup();
    let v = one_value(&bdb, "ESTIMATE PREDICT a WITH CONFIDENCE 0.99 FROM p LIMIT 1");
    assert_eq!(v, Value::Null);
    let v = one_value(&bdb, "ESTIMATE PREDICT a WITH CONFIDENCE 0.0 FROM p LIMIT 1");
    assert!((real(&v) - 2.0).abs() < 1e-9);
}

#[test]
fn similarity_pairwise_and_to_row() {
    let bdb = setup();
    let cursor = bdb.execute("ESTIMATE SIMILARITY FROM PAIRWISE p", &[]).unwrap();
    let mut n = 0;
    for row in cursor {
        let (r0, r1, s) = (real(&row[0]), real(&row[1]), real(&row[2]));
        assert!(s >= 0.0);
        assert_eq!(s, if r0 == r1 { 1.0 } else { 0.0 });
        n += 1;
    }
    assert_eq!(n, 9);

    let s = real(&one_value(
        &bdb,
        "ESTIMATE SIMILARITY TO (a = 2) IN THE CONTEXT OF b FROM p WHERE a = 2 LIMIT 1",
    ));
    assert_eq!(s, 1.0);
}

#[test]
fn correlation_of_linear_columns() {
    let bdb = setup();
    let r2 = real(&one_value(
        &bdb,
        "ESTIMATE CORRELATION OF a WITH b FROM p LIMIT 1",
    ));
    assert!((r2 - 1.0).abs() < 1e-9, "{}", r2);

    let cursor = bdb
        .execute("ESTIMATE CORRELATION FROM PAIRWISE VARIABLES OF p", &[])
        .unwrap();
    let mut n = 0;
    for row in cursor {
        let r2 = real(&row[2]);
        assert!((r2 - 1.0).abs() < 1e-9, "{}", r2);
        n += 1;
    }
    assert_eq!(n, 9);
}

#[test]
fn estimate_variables_lists_the_population() {
    let bdb = setup();
    let cursor = bdb.execute("ESTIMATE * FROM VARIABLES OF p", &[]).unwrap();
    let names: Vec<String> = cursor
        .map(|row| match &row[0] {
            Value::Text(s) => s.clone(),
            other => panic!("unexpected name: {:?}", other),
        })
        .collect();
    assert_eq!(names, ["a", "b", "c"]);
}

#[test]
fn rollback_hides_catalog_changes() {
    let bdb = setup();
    bdb.execute("BEGIN", &[]).unwrap();
    bdb.execute("CREATE GENERATOR h FOR p USING diag_gauss()", &[]).unwrap();
    bdb.execute("ROLLBACK", &[]).unwrap();
    let err = bdb
        .execute("ESTIMATE PROBABILITY DENSITY OF a = 2 FROM p MODELED BY h", &[])
        .unwrap_err();
    assert!(matches!(err, BqlError::NoSuchGenerator(_)), "{}", err);
    // The surviving generator still answers.
    let density = real(&one_value(
        &bdb,
        "ESTIMATE PROBABILITY DENSITY OF a = 2 FROM p LIMIT 1",
    ));
    assert!(density > 0.0);
}

#[test]
fn create_table_as_simulate_materializes() {
    let bdb = setup();
    bdb.execute("CREATE TABLE sim AS SIMULATE a, b FROM p LIMIT 7", &[]).unwrap();
    let n = real(&one_value(&bdb, "SELECT count(*) FROM sim"));
    assert_eq!(n, 7.0);
}

#[test]
fn simulate_given_conditions_pass_through() {
    let bdb = setup();
    // Independence means the constraint cannot shift a, but the
    // phrase must accept and thread it.
    let mut cursor = bdb
        .execute("SIMULATE a FROM p GIVEN b = 4 LIMIT 3", &[])
        .unwrap();
    let mut n = 0;
    while let Some(row) = cursor.next_row() {
        assert!(matches!(row[0], Value::Real(_)));
        n += 1;
    }
    assert_eq!(n, 3);
}

#[test]
fn positional_and_named_parameters_bind() {
    let bdb = setup();
    let mut cursor = bdb
        .execute(
            "ESTIMATE a FROM p WHERE a > ? ORDER BY a LIMIT 2",
            &[Value::Integer(1)],
        )
        .unwrap();
    assert_eq!(real(&cursor.next_row().unwrap()[0]), 2.0);

    let mut cursor = bdb
        .execute_named(
            "ESTIMATE a FROM p WHERE a > :lo AND a < :hi",
            &[("lo", Value::Integer(1)), ("hi", Value::Integer(3))],
        )
        .unwrap();
    assert_eq!(real(&cursor.next_row().unwrap()[0]), 2.0);
    assert!(cursor.next_row().is_none());

    let err = bdb
        .execute("ESTIMATE a FROM p WHERE a > ?", &[])
        .unwrap_err();
    assert!(matches!(err, BqlError::Bindings(_)), "{}", err);
}

#[test]
fn wrong_transaction_usage_errors() {
    let bdb = setup();
    bdb.execute("BEGIN", &[]).unwrap();
    assert!(matches!(
        bdb.execute("BEGIN", &[]).unwrap_err(),
        BqlError::Transaction(_)
    ));
    assert!(matches!(
        bdb.execute("ANALYZE g FOR 1 ITERATIONS", &[]).unwrap_err(),
        BqlError::Transaction(_)
    ));
    bdb.execute("COMMIT", &[]).unwrap();
    assert!(matches!(
        bdb.execute("COMMIT", &[]).unwrap_err(),
        BqlError::Transaction(_)
    ));
    // The connection stays usable after phrase errors.
    let density = real(&one_value(
        &bdb,
        "ESTIMATE PROBABILITY DENSITY OF a = 2 FROM p LIMIT 1",
    ));
    assert!(density > 0.0);
}

#[test]
fn analysis_counts_iterations() {
    let bdb = setup();
    bdb.execute("ANALYZE g FOR 4 ITERATIONS CHECKPOINT 2 ITERATIONS", &[]).unwrap();
    let n = real(&one_value(
        &bdb,
        "SELECT iterations FROM bayesdb_generator_model WHERE modelno = 0",
    ));
    assert_eq!(n, 4.0);
}

#[test]
fn analysis_program_is_validated_by_the_backend() {
    let bdb = setup();
    bdb.execute("ANALYZE g FOR 1 ITERATIONS (OPTIMIZED)", &[]).unwrap();
    let err = bdb
        .execute("ANALYZE g FOR 1 ITERATIONS (FROBNICATE)", &[])
        .unwrap_err();
    assert!(matches!(err, BqlError::Backend { .. }), "{}", err);
}
