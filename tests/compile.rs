//! Compiler lowering shapes: pure-SQL passthrough, operator calls,
//! context joins, parameter preservation.

use bayesql::{BayesDb, BqlError};

fn setup() -> BayesDb {
    let bdb = BayesDb::open_in_memory().unwrap();
    bdb.sql_execute("CREATE TABLE t (a REAL, b REAL, c REAL)", &[]).unwrap();
    bdb.sql_execute(
        "INSERT INTO t VALUES (1, 2, 3), (2, 4, 6), (3, 6, 9)",
        &[],
    )
    .unwrap();
    bdb.execute_script(
        "CREATE POPULATION p FOR t WITH SCHEMA (MODEL a, b, c AS numerical);
         CREATE GENERATOR g FOR p USING diag_gauss();
         INITIALIZE 2 MODELS FOR g;",
    )
    .unwrap();
    bdb
}

fn normalize(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[test]
fn pure_sql_select_passes_through() {
    let bdb = setup();
    for query in [
        "SELECT a, b FROM t",
        "SELECT * FROM t WHERE (a < b) ORDER BY a DESC LIMIT 2",
        "SELECT count(*) FROM t GROUP BY a HAVING (count(*) > 1)",
        "SELECT a AS x FROM t, t AS u",
    ] {
        let sql = bdb.compile_to_sql(query).unwrap();
        assert_eq!(normalize(&sql), normalize(query), "for {:?}", query);
    }
}

#[test]
fn estimate_lowers_to_base_table_scan() {
    let bdb = setup();
    let sql = bdb
        .compile_to_sql("ESTIMATE a, PREDICTIVE PROBABILITY OF a AS pp FROM p")
        .unwrap();
    assert!(sql.starts_with("SELECT"), "{}", sql);
    assert!(sql.contains(" FROM t"), "{}", sql);
    assert!(
        sql.contains("bql_row_predictive_probability(1, '0,1', t._rowid_, 0, t.a)"),
        "{}",
        sql
    );
}

#[test]
fn probability_density_lowers_to_pdf_joint() {
    let bdb = setup();
    let sql = bdb
        .compile_to_sql("ESTIMATE PROBABILITY DENSITY OF a = 2 GIVEN (b = c) FROM p")
        .unwrap();
    // Length-prefixed targets, then the constraint with its
    // per-row dynamic value.
    assert!(sql.contains("bql_pdf_joint(1, '0,1', 1, 0, 2, 1, c)"), "{}", sql);
}

#[test]
fn similarity_to_condition_becomes_correlated_subquery() {
    let bdb = setup();
    let sql = bdb
        .compile_to_sql(
            "ESTIMATE SIMILARITY TO (a = 1) IN THE CONTEXT OF b FROM p",
        )
        .unwrap();
    assert!(
        sql.contains(
            "bql_row_similarity(1, '0,1', t._rowid_, \
             (SELECT _rowid_ FROM t WHERE (a = 1) ORDER BY _rowid_ ASC LIMIT 1), 1)"
        ),
        "{}",
        sql
    );
}

#[test]
fn pairwise_variables_self_join() {
    let bdb = setup();
    let sql = bdb
        .compile_to_sql("ESTIMATE DEPENDENCE PROBABILITY FROM PAIRWISE VARIABLES OF p")
        .unwrap();
    assert!(
        sql.contains("FROM bayesdb_variable AS v0, bayesdb_variable AS v1"),
        "{}",
        sql
    );
    assert!(
        sql.contains("bql_column_dependence_probability(1, '0,1', v0.colno, v1.colno)"),
        "{}",
        sql
    );
    assert!(sql.contains(" AS name0"), "{}", sql);
    assert!(sql.contains(" AS value"), "{}", sql);
}

#[test]
fn pairwise_for_clause_materializes_colnos() {
    let bdb = setup();
    let sql = bdb
        .compile_to_sql(
            "ESTIMATE DEPENDENCE PROBABILITY FROM PAIRWISE VARIABLES OF p FOR (a, c)",
        )
        .unwrap();
    assert!(sql.contains("v0.colno IN (0, 2)"), "{}", sql);
    assert!(sql.contains("v1.colno IN (0, 2)"), "{}", sql);
}

#[test]
fn pairwise_rows_self_join() {
    let bdb = setup();
    let sql = bdb.compile_to_sql("ESTIMATE SIMILARITY FROM PAIRWISE p").unwrap();
    assert!(sql.contains("FROM t AS r0, t AS r1"), "{}", sql);
    assert!(
        sql.contains("bql_row_similarity(1, '0,1', r0._rowid_, r1._rowid_, NULL)"),
        "{}",
        sql
    );
    assert!(sql.contains("rowid0"), "{}", sql);
}

#[test]
fn variables_query_reads_catalog() {
    let bdb = setup();
    let sql = bdb
        .compile_to_sql("ESTIMATE PROBABILITY DENSITY OF VALUE 5 FROM VARIABLES OF p")
        .unwrap();
    assert!(sql.contains("FROM bayesdb_variable AS v"), "{}", sql);
    assert!(sql.contains("v.population_id = 1"), "{}", sql);
    assert!(sql.contains("bql_pdf_joint(1, '0,1', 1, v.colno, 5)"), "{}", sql);
}

#[test]
fn using_model_selects_a_subset() {
    let bdb = setup();
    let sql = bdb
        .compile_to_sql("ESTIMATE PROBABILITY DENSITY OF a = 2 FROM p USING MODEL 1")
        .unwrap();
    assert!(sql.contains("'1'"), "{}", sql);
    let err = bdb
        .compile_to_sql("ESTIMATE PROBABILITY DENSITY OF a = 2 FROM p USING MODEL 9")
        .unwrap_err();
    assert!(matches!(err, BqlError::NoSuchModel { modelno: 9, .. }), "{}", err);
}

#[test]
fn correlation_lowers_to_data_aggregate() {
    let bdb = setup();
    let sql = bdb
        .compile_to_sql("ESTIMATE CORRELATION OF a WITH b FROM p")
        .unwrap();
    assert!(sql.contains("bql_correlation_pearsonr2(bql_t.a, bql_t.b)"), "{}", sql);
    assert!(sql.contains("IS NOT NULL"), "{}", sql);
    let sql = bdb
        .compile_to_sql("ESTIMATE CORRELATION PVALUE FROM PAIRWISE VARIABLES OF p")
        .unwrap();
    assert!(sql.contains("CASE v0.colno"), "{}", sql);
    assert!(sql.contains("bql_correlation_pearsonr2_pvalue"), "{}", sql);
}

#[test]
fn infer_fills_projection_only() {
    let bdb = setup();
    let sql = bdb
        .compile_to_sql("INFER a, b WITH CONFIDENCE 0.5 FROM p WHERE a IS NULL")
        .unwrap();
    assert!(sql.contains("bql_infer(1, '0,1', t._rowid_, 0, t.a, 0.5) AS a"), "{}", sql);
    assert!(sql.contains("bql_infer(1, '0,1', t._rowid_, 1, t.b, 0.5) AS b"), "{}", sql);
    // The WHERE clause sees the stored column, not the filled one.
    assert!(sql.contains("WHERE (a ISNULL)"), "{}", sql);
}

#[test]
fn infer_explicit_shares_one_predict_call() {
    let bdb = setup();
    let sql = bdb
        .compile_to_sql("INFER EXPLICIT a, PREDICT b AS bp CONFIDENCE bc FROM p")
        .unwrap();
    // One bql_predict_confidence in the inner scan, split twice in
    // the outer projection.
    assert_eq!(sql.matches("bql_predict_confidence").count(), 1, "{}", sql);
    assert!(sql.contains("bql_json_get(_bql_pc0, 'value') AS bp"), "{}", sql);
    assert!(sql.contains("bql_json_get(_bql_pc0, 'confidence') AS bc"), "{}", sql);
}

#[test]
fn parameters_keep_their_numbers() {
    let bdb = setup();
    let sql = bdb
        .compile_to_sql("ESTIMATE a FROM p WHERE a > ? AND b > ?1")
        .unwrap();
    // ?1 reuses the first slot.
    assert!(sql.contains("(a > ?1)"), "{}", sql);
    assert!(sql.contains("(b > ?1)"), "{}", sql);
}

#[test]
fn bql_outside_a_population_context_is_rejected() {
    let bdb = setup();
    let err = bdb
        .compile_to_sql("SELECT PREDICTIVE PROBABILITY OF a FROM t")
        .unwrap_err();
    assert!(matches!(err, BqlError::WrongContext { .. }), "{}", err);
    let err = bdb
        .compile_to_sql("ESTIMATE SIMILARITY TO (a = 1) FROM PAIRWISE p")
        .unwrap_err();
    assert!(matches!(err, BqlError::Schema(_)), "{}", err);
    let err = bdb
        .compile_to_sql("ESTIMATE PREDICTIVE PROBABILITY OF a FROM VARIABLES OF p")
        .unwrap_err();
    assert!(matches!(err, BqlError::WrongContext { .. }), "{}", err);
}

#[test]
fn unknown_names_are_reported() {
    let bdb = setup();
    assert!(matches!(
        bdb.compile_to_sql("ESTIMATE a FROM nope").unwrap_err(),
        BqlError::NoSuchPopulation(_)
    ));
    assert!(matches!(
        bdb.compile_to_sql("ESTIMATE a FROM p MODELED BY nope").unwrap_err(),
        BqlError::NoSuchGenerator(_)
    ));
    assert!(matches!(
        bdb.compile_to_sql("ESTIMATE PROBABILITY DENSITY OF nope = 1 FROM p")
            .unwrap_err(),
        BqlError::NoSuchVariable { .. }
    ));
}

#[test]
fn simulate_does_not_compose() {
    let bdb = setup();
    assert!(matches!(
        bdb.compile_to_sql("SIMULATE a FROM p LIMIT 5").unwrap_err(),
        BqlError::Unsupported(_)
    ));
}
