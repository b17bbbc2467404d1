//! Phrase execution driver.
//!
//! Dispatches parsed phrases: transaction commands map 1:1 onto the
//! engine's, DDL and MML run inside an internal savepoint, queries
//! compile and stream, SIMULATE materializes through the backend, and
//! ANALYZE loops over checkpointed chunks committing between them.

use std::time::{Duration, Instant};

use bayesql_ast::ast::*;
use rand::Rng;
use rusqlite::types::Value;

use crate::bayesdb::{BayesDb, Cursor};
use crate::catalog;
use crate::catalog::quote_name;
use crate::compile::{compile_query, compile_scalar_expression, Bindings, Output};
use crate::error::{BqlError, Result};

/// Execute one parsed phrase against a handle.  `BayesDb::execute`
/// is the conventional entry point; this is the seam for callers
/// that parse ahead of time.
pub fn execute_phrase(
    bdb: &BayesDb,
    parametrized: &Parametrized,
    bindings: Bindings,
) -> Result<Cursor> {
    match &parametrized.phrase {
        Phrase::Begin => {
            bdb.begin_txn()?;
            Ok(Cursor::empty())
        }
        Phrase::Commit => {
            bdb.commit_txn()?;
            Ok(Cursor::empty())
        }
        Phrase::Rollback => {
            bdb.rollback_txn()?;
            Ok(Cursor::empty())
        }
        Phrase::Query(Query::Simulate(sim)) => bdb.savepoint(|| {
            let (columns, rows) = simulate_rows(bdb, parametrized, sim, bindings)?;
            Ok(Cursor::new(columns, rows))
        }),
        Phrase::Query(query) => {
            // Compile inside the transaction: resolving column lists
            // may execute subqueries.
            bdb.savepoint(|| run_query(bdb, parametrized, query, bindings))
        }
        Phrase::CreateTableAs { temp, if_not_exists, name, query } => bdb.savepoint(|| {
            create_table_as(bdb, parametrized, *temp, *if_not_exists, name, query, bindings)?;
            Ok(Cursor::empty())
        }),
        Phrase::DropTable { if_exists, name } => bdb.savepoint(|| {
            catalog::drop_table(bdb, name, *if_exists)?;
            Ok(Cursor::empty())
        }),
        Phrase::RenameTable { old, new } => bdb.savepoint(|| {
            catalog::rename_table(bdb, old, new)?;
            Ok(Cursor::empty())
        }),
        Phrase::CreatePopulation { if_not_exists, name, table, schema } => {
            bdb.savepoint(|| {
                catalog::create_population(bdb, name, table, schema, *if_not_exists)?;
                Ok(Cursor::empty())
            })
        }
        Phrase::AlterPopulation { population, commands } => bdb.savepoint(|| {
            catalog::alter_population(bdb, population, commands)?;
            Ok(Cursor::empty())
        }),
        Phrase::DropPopulation { if_exists, name } => bdb.savepoint(|| {
            catalog::drop_population(bdb, name, *if_exists)?;
            Ok(Cursor::empty())
        }),
        Phrase::CreateGenerator { if_not_exists, name, population, backend, schema } => {
            bdb.savepoint(|| {
                catalog::create_generator(bdb, name, population, backend, schema, *if_not_exists)?;
                Ok(Cursor::empty())
            })
        }
        Phrase::RenameGenerator { old, new } => {
            if !catalog::wizard_mode() {
                return Err(BqlError::Unsupported(
                    "ALTER GENERATOR … RENAME TO is experimental".into(),
                ));
            }
            bdb.savepoint(|| {
                catalog::rename_generator(bdb, old, new)?;
                Ok(Cursor::empty())
            })
        }
        Phrase::DropGenerator { if_exists, name } => bdb.savepoint(|| {
            catalog::drop_generator(bdb, name, *if_exists)?;
            Ok(Cursor::empty())
        }),
        Phrase::InitModels { if_not_exists, generator, nmodels } => bdb.savepoint(|| {
            init_models(bdb, generator, *nmodels, *if_not_exists)?;
            Ok(Cursor::empty())
        }),
        Phrase::Analyze { generator, models, budget, budget_unit, checkpoint, program } => {
            analyze(
                bdb,
                generator,
                models.as_deref(),
                *budget,
                *budget_unit,
                *checkpoint,
                program.as_deref(),
            )?;
            Ok(Cursor::empty())
        }
        Phrase::DropModels { generator, models } => bdb.savepoint(|| {
            drop_models(bdb, generator, models.as_deref())?;
            Ok(Cursor::empty())
        }),
    }
}

fn run_query(
    bdb: &BayesDb,
    parametrized: &Parametrized,
    query: &Query,
    bindings: Bindings,
) -> Result<Cursor> {
    let mut out = Output::new(
        parametrized.n_numpar,
        parametrized.nampar_map.clone(),
        bindings,
    );
    compile_query(bdb, query, &mut out)?;
    let values = out.getbindings()?;
    tracing::debug!(sql = out.sql(), "compiled BQL query");
    bdb.run_sql(out.sql(), &values)
}

fn create_table_as(
    bdb: &BayesDb,
    parametrized: &Parametrized,
    temp: bool,
    if_not_exists: bool,
    name: &str,
    query: &Query,
    bindings: Bindings,
) -> Result<()> {
    if catalog::sql_table_exists(bdb, name)? {
        if if_not_exists {
            return Ok(());
        }
        return Err(BqlError::AlreadyExists { kind: "table", name: name.to_string() });
    }
    let qt = quote_name(name);
    let temp_kw = if temp { "TEMP " } else { "" };
    match query {
        Query::Simulate(sim) => {
            let (columns, rows) = simulate_rows(bdb, parametrized, sim, bindings)?;
            let collist = columns
                .iter()
                .map(|c| quote_name(c))
                .collect::<Vec<_>>()
                .join(", ");
            bdb.conn
                .execute_batch(&format!("CREATE {}TABLE {} ({})", temp_kw, qt, collist))?;
            let placeholders =
                vec!["?"; columns.len()].join(", ");
            let mut stmt = bdb
                .conn
                .prepare(&format!("INSERT INTO {} VALUES ({})", qt, placeholders))?;
            for row in rows {
                stmt.execute(rusqlite::params_from_iter(row))?;
            }
            Ok(())
        }
        _ => {
            let mut out = Output::new(
                parametrized.n_numpar,
                parametrized.nampar_map.clone(),
                bindings,
            );
            compile_query(bdb, query, &mut out)?;
            let values = out.getbindings()?;
            let sql = format!("CREATE {}TABLE {} AS {}", temp_kw, qt, out.sql());
            tracing::debug!(sql = sql.as_str(), "materializing query");
            bdb.conn.execute(&sql, rusqlite::params_from_iter(values))?;
            Ok(())
        }
    }
}

// ------------------------------------------------------------- simulate

/// Evaluate a scalar expression (a SIMULATE constraint value or
/// limit) against the store.
fn eval_scalar(
    bdb: &BayesDb,
    parametrized: &Parametrized,
    expr: &Expr,
    bindings: Bindings,
) -> Result<Value> {
    let mut out = Output::new(
        parametrized.n_numpar,
        parametrized.nampar_map.clone(),
        bindings,
    );
    out.write_raw("SELECT ");
    compile_scalar_expression(bdb, expr, &mut out)?;
    let values = out.getbindings()?;
    let mut cursor = bdb.run_sql(out.sql(), &values)?;
    cursor
        .next_row()
        .and_then(|mut r| if r.is_empty() { None } else { Some(r.remove(0)) })
        .ok_or_else(|| BqlError::Internal("scalar expression produced no value".into()))
}

/// Draw simulated rows for a SIMULATE phrase.  Each row comes from
/// one model, chosen uniformly.
fn simulate_rows(
    bdb: &BayesDb,
    parametrized: &Parametrized,
    sim: &Simulate,
    bindings: Bindings,
) -> Result<(Vec<String>, Vec<Vec<Value>>)> {
    let population_id = catalog::population_id(bdb, &sim.population)?;
    let gen_id = catalog::resolve_generator(
        bdb,
        population_id,
        &sim.population,
        sim.generator.as_deref(),
    )?;
    catalog::ensure_generator_loaded(bdb, gen_id)?;
    let backend = bdb.ops.backend_for_generator(gen_id)?;
    let modelnos = catalog::resolve_modelnos(bdb, gen_id, sim.models.as_deref())?;
    if modelnos.is_empty() {
        return Err(BqlError::Schema(format!(
            "generator {} has no models; INITIALIZE them first",
            catalog::generator_name(bdb, gen_id)?
        )));
    }

    let mut targets = Vec::with_capacity(sim.columns.len());
    for column in &sim.columns {
        targets.push(catalog::variable_colno(bdb, population_id, Some(gen_id), column)?);
    }
    let mut constraints = Vec::with_capacity(sim.constraints.len());
    for (column, expr) in &sim.constraints {
        let colno = catalog::variable_colno(bdb, population_id, Some(gen_id), column)?;
        let value = eval_scalar(bdb, parametrized, expr, bindings)?;
        constraints.push((colno, value));
    }
    let nsamples = match eval_scalar(bdb, parametrized, &sim.limit, bindings)? {
        Value::Integer(n) if n >= 0 => n as usize,
        Value::Integer(n) => {
            return Err(BqlError::Schema(format!("negative SIMULATE limit: {}", n)))
        }
        other => {
            return Err(BqlError::Schema(format!(
                "non-integer SIMULATE limit: {:?}",
                other
            )))
        }
    };

    let mut rng = rand::thread_rng();
    let mut rows = Vec::with_capacity(nsamples);
    for _ in 0..nsamples {
        bdb.ops.check_interrupt()?;
        let modelno = modelnos[rng.gen_range(0..modelnos.len())];
        let mut drawn =
            backend.simulate_joint(gen_id, modelno, &targets, &constraints, 1)?;
        let row = drawn.pop().ok_or_else(|| {
            BqlError::Internal("backend returned no rows from simulate_joint".into())
        })?;
        if row.len() != targets.len() {
            return Err(BqlError::Internal(
                "backend returned a mis-shaped simulated row".into(),
            ));
        }
        rows.push(row);
    }
    Ok((sim.columns.clone(), rows))
}

// ---------------------------------------------------------------- models

fn init_models(bdb: &BayesDb, generator: &str, nmodels: u64, if_not_exists: bool) -> Result<()> {
    let gen_id = catalog::generator_id(bdb, generator)?;
    catalog::ensure_generator_loaded(bdb, gen_id)?;
    let backend = bdb.ops.backend_for_generator(gen_id)?;
    let mut fresh = Vec::new();
    for modelno in 0..nmodels {
        if catalog::has_model(bdb, gen_id, modelno)? {
            if if_not_exists {
                continue;
            }
            return Err(BqlError::AlreadyExists {
                kind: "model",
                name: format!("{} of generator {}", modelno, generator),
            });
        }
        fresh.push(modelno);
    }
    for &modelno in &fresh {
        catalog::insert_model(bdb, gen_id, modelno)?;
    }
    backend.initialize_models(bdb, gen_id, &fresh)?;
    tracing::debug!(generator, count = fresh.len(), "initialized models");
    Ok(())
}

fn drop_models(bdb: &BayesDb, generator: &str, spec: Option<&[(u64, u64)]>) -> Result<()> {
    let gen_id = catalog::generator_id(bdb, generator)?;
    catalog::ensure_generator_loaded(bdb, gen_id)?;
    let backend = bdb.ops.backend_for_generator(gen_id)?;
    let modelnos = catalog::resolve_modelnos(bdb, gen_id, spec)?;
    backend.drop_models(bdb, gen_id, &modelnos)?;
    catalog::delete_models(bdb, gen_id, &modelnos)?;
    Ok(())
}

// --------------------------------------------------------------- analyze

#[allow(clippy::too_many_arguments)]
fn analyze(
    bdb: &BayesDb,
    generator: &str,
    models: Option<&[(u64, u64)]>,
    budget: u64,
    budget_unit: TimeUnit,
    checkpoint: Option<(u64, TimeUnit)>,
    program: Option<&str>,
) -> Result<()> {
    if bdb.txn_active() {
        return Err(BqlError::Transaction(
            "ANALYZE may not run inside a transaction".into(),
        ));
    }
    let gen_id = bdb.savepoint(|| {
        let gen_id = catalog::generator_id(bdb, generator)?;
        catalog::ensure_generator_loaded(bdb, gen_id)?;
        Ok(gen_id)
    })?;
    let backend = bdb.ops.backend_for_generator(gen_id)?;
    let modelnos = bdb.savepoint(|| catalog::resolve_modelnos(bdb, gen_id, models))?;
    if modelnos.is_empty() {
        return Err(BqlError::Schema(format!(
            "generator {} has no models; INITIALIZE them first",
            generator
        )));
    }

    match budget_unit {
        TimeUnit::Iterations => {
            let chunk_size = match checkpoint {
                Some((n, TimeUnit::Iterations)) if n > 0 => n,
                _ => budget.max(1),
            };
            let mut done = 0u64;
            while done < budget {
                bdb.ops.check_interrupt()?;
                let chunk = chunk_size.min(budget - done);
                bdb.savepoint(|| {
                    backend.analyze_models(bdb, gen_id, &modelnos, chunk, program)?;
                    catalog::add_model_iterations(bdb, gen_id, &modelnos, chunk)
                })?;
                done += chunk;
                tracing::debug!(generator, done, budget, "analysis checkpoint");
            }
        }
        TimeUnit::Seconds | TimeUnit::Minutes => {
            let secs =
                if budget_unit == TimeUnit::Seconds { budget } else { budget * 60 };
            let deadline = Instant::now() + Duration::from_secs(secs);
            let (ckpt_iters, ckpt_secs) = match checkpoint {
                Some((n, TimeUnit::Iterations)) => (Some(n.max(1)), None),
                Some((n, TimeUnit::Seconds)) => (None, Some(n)),
                Some((n, TimeUnit::Minutes)) => (None, Some(n * 60)),
                None => (None, None),
            };
            while Instant::now() < deadline {
                bdb.ops.check_interrupt()?;
                let chunk_deadline = ckpt_secs
                    .map(|s| Instant::now() + Duration::from_secs(s))
                    .unwrap_or(deadline);
                bdb.savepoint(|| {
                    let mut iterations = 0u64;
                    loop {
                        backend.analyze_models(bdb, gen_id, &modelnos, 1, program)?;
                        iterations += 1;
                        let now = Instant::now();
                        if now >= deadline || now >= chunk_deadline {
                            break;
                        }
                        if ckpt_iters.map_or(false, |n| iterations >= n) {
                            break;
                        }
                        bdb.ops.check_interrupt()?;
                    }
                    catalog::add_model_iterations(bdb, gen_id, &modelnos, iterations)
                })?;
                tracing::debug!(generator, "analysis checkpoint");
            }
        }
    }
    Ok(())
}
