//! Catalog access: populations, variables, generators, models.
//!
//! Everything here reads or writes the `bayesdb_*` tables installed
//! by `schema`.  Name lookups are cached per connection for the
//! duration of a transaction; any catalog mutation discards the
//! cache.  Callers are responsible for wrapping mutations in a
//! savepoint (the phrase driver does).

use bayesql_ast::ast::{PopClause, PopCommand};
use rusqlite::OptionalExtension;

use crate::bayesdb::BayesDb;
use crate::error::{BqlError, Result};

pub fn casefold(s: &str) -> String {
    s.to_lowercase()
}

/// Quote an identifier for inclusion in SQL text, only when needed.
pub fn quote_name(name: &str) -> String {
    bayesql_ast::unparse::quote_name(name)
}

/// True when the experimental surface is enabled.
pub fn wizard_mode() -> bool {
    std::env::var_os("BAYESQL_WIZARD_MODE").is_some()
}

const BUILTIN_STATTYPES: &[&str] =
    &["numerical", "nominal", "categorical", "count", "magnitude", "cyclic"];

/// Normalize a statistical type name.  `categorical` is a synonym of
/// `nominal`.  Types outside the built-in set require wizard mode
/// (backends define their own).
pub fn normalize_stattype(name: &str) -> Result<String> {
    let folded = casefold(name);
    if folded == "categorical" {
        return Ok("nominal".to_string());
    }
    if BUILTIN_STATTYPES.contains(&folded.as_str()) || wizard_mode() {
        Ok(folded)
    } else {
        Err(BqlError::UnknownStattype(name.to_string()))
    }
}

// ------------------------------------------------------------- tables

/// Does a table exist in the underlying store?
pub fn sql_table_exists(bdb: &BayesDb, name: &str) -> Result<bool> {
    let n: i64 = bdb.conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ? COLLATE NOCASE",
        [name],
        |r| r.get(0),
    )?;
    Ok(n > 0)
}

fn table_registered(bdb: &BayesDb, name: &str) -> Result<bool> {
    let n: i64 = bdb.conn.query_row(
        "SELECT COUNT(*) FROM bayesdb_table WHERE name = ?",
        [name],
        |r| r.get(0),
    )?;
    Ok(n > 0)
}

/// Column numbers and names as the underlying store reports them.
fn base_table_columns(bdb: &BayesDb, tabname: &str) -> Result<Vec<(i64, String)>> {
    let sql = format!("PRAGMA table_info({})", quote_name(tabname));
    let mut stmt = bdb.conn.prepare(&sql)?;
    let cols = stmt
        .query_map([], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(cols)
}

fn register_table(bdb: &BayesDb, tabname: &str) -> Result<()> {
    if table_registered(bdb, tabname)? {
        return Ok(());
    }
    bdb.conn.execute(
        "INSERT INTO bayesdb_table (name, default_generator) VALUES (?, NULL)",
        [tabname],
    )?;
    for (colno, name) in base_table_columns(bdb, tabname)? {
        bdb.conn.execute(
            "INSERT INTO bayesdb_column (tabname, colno, name) VALUES (?, ?, ?)",
            rusqlite::params![tabname, colno, name],
        )?;
    }
    Ok(())
}

fn unregister_table_if_unused(bdb: &BayesDb, tabname: &str) -> Result<()> {
    let refs: i64 = bdb.conn.query_row(
        "SELECT COUNT(*) FROM bayesdb_population WHERE tabname = ?",
        [tabname],
        |r| r.get(0),
    )?;
    if refs == 0 {
        bdb.conn.execute("DELETE FROM bayesdb_column WHERE tabname = ?", [tabname])?;
        bdb.conn.execute("DELETE FROM bayesdb_table WHERE name = ?", [tabname])?;
    }
    Ok(())
}

/// Refuse to drop a base table that a population still models.
pub(crate) fn drop_table(bdb: &BayesDb, name: &str, if_exists: bool) -> Result<()> {
    if !sql_table_exists(bdb, name)? {
        if if_exists {
            return Ok(());
        }
        return Err(BqlError::NoSuchTable(name.to_string()));
    }
    let pops: i64 = bdb.conn.query_row(
        "SELECT COUNT(*) FROM bayesdb_population WHERE tabname = ?",
        [name],
        |r| r.get(0),
    )?;
    if pops > 0 {
        return Err(BqlError::Schema(format!(
            "table {} is modeled by a population; drop the population first",
            name
        )));
    }
    bdb.conn.execute_batch(&format!("DROP TABLE {}", quote_name(name)))?;
    unregister_table_if_unused(bdb, name)?;
    bdb.bust_cache();
    Ok(())
}

pub(crate) fn rename_table(bdb: &BayesDb, old: &str, new: &str) -> Result<()> {
    if !sql_table_exists(bdb, old)? {
        return Err(BqlError::NoSuchTable(old.to_string()));
    }
    bdb.conn.execute_batch(&format!(
        "ALTER TABLE {} RENAME TO {}",
        quote_name(old),
        quote_name(new)
    ))?;
    // bayesdb_column and bayesdb_population follow via ON UPDATE CASCADE.
    bdb.conn.execute("UPDATE bayesdb_table SET name = ? WHERE name = ?", [new, old])?;
    bdb.bust_cache();
    Ok(())
}

pub(crate) fn default_generator(bdb: &BayesDb, tabname: &str) -> Result<Option<String>> {
    let g = bdb
        .conn
        .query_row(
            "SELECT default_generator FROM bayesdb_table WHERE name = ?",
            [tabname],
            |r| r.get::<_, Option<String>>(0),
        )
        .optional()?;
    Ok(g.flatten())
}

pub(crate) fn set_default_generator(bdb: &BayesDb, tabname: &str, generator: Option<&str>) -> Result<()> {
    if !table_registered(bdb, tabname)? {
        return Err(BqlError::NoSuchTable(tabname.to_string()));
    }
    if let Some(g) = generator {
        let gid = generator_id(bdb, g)?;
        let pop = generator_population(bdb, gid)?;
        let pop_tab = population_table_by_id(bdb, pop)?;
        if casefold(&pop_tab) != casefold(tabname) {
            return Err(BqlError::Schema(format!(
                "generator {} does not model table {}",
                g, tabname
            )));
        }
    }
    bdb.conn.execute(
        "UPDATE bayesdb_table SET default_generator = ? WHERE name = ?",
        rusqlite::params![generator, tabname],
    )?;
    bdb.bust_cache();
    Ok(())
}

// -------------------------------------------------------- populations

pub fn has_population(bdb: &BayesDb, name: &str) -> Result<bool> {
    let n: i64 = bdb.conn.query_row(
        "SELECT COUNT(*) FROM bayesdb_population WHERE name = ?",
        [name],
        |r| r.get(0),
    )?;
    Ok(n > 0)
}

pub fn population_id(bdb: &BayesDb, name: &str) -> Result<i64> {
    let key = format!("pop:{}", casefold(name));
    if let Some(id) = bdb.cache_get(&key) {
        return Ok(id);
    }
    let id = bdb
        .conn
        .query_row("SELECT id FROM bayesdb_population WHERE name = ?", [name], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .ok_or_else(|| BqlError::NoSuchPopulation(name.to_string()))?;
    bdb.cache_put(&key, id);
    Ok(id)
}

pub fn population_name(bdb: &BayesDb, id: i64) -> Result<String> {
    bdb.conn
        .query_row("SELECT name FROM bayesdb_population WHERE id = ?", [id], |r| r.get(0))
        .optional()?
        .ok_or_else(|| BqlError::Internal(format!("no population with id {}", id)))
}

pub fn population_table_by_id(bdb: &BayesDb, id: i64) -> Result<String> {
    bdb.conn
        .query_row("SELECT tabname FROM bayesdb_population WHERE id = ?", [id], |r| r.get(0))
        .optional()?
        .ok_or_else(|| BqlError::Internal(format!("no population with id {}", id)))
}

pub(crate) fn create_population(
    bdb: &BayesDb,
    name: &str,
    tabname: &str,
    schema: &[PopClause],
    if_not_exists: bool,
) -> Result<()> {
    if has_population(bdb, name)? {
        if if_not_exists {
            return Ok(());
        }
        return Err(BqlError::AlreadyExists { kind: "population", name: name.to_string() });
    }
    if !sql_table_exists(bdb, tabname)? {
        return Err(BqlError::NoSuchTable(tabname.to_string()));
    }
    let base = base_table_columns(bdb, tabname)?;
    let find_colno = |col: &str| -> Result<i64> {
        base.iter()
            .find(|(_, n)| casefold(n) == casefold(col))
            .map(|(c, _)| *c)
            .ok_or_else(|| BqlError::NoSuchColumn {
                table: tabname.to_string(),
                name: col.to_string(),
            })
    };

    // colno -> (name, Some(stattype) modeled | None ignored)
    let mut assigned: Vec<(i64, String, Option<String>)> = Vec::new();
    let mut seen = std::collections::HashSet::new();
    let mut claim = |colno: i64, col: &str| -> Result<()> {
        if !seen.insert(colno) {
            return Err(BqlError::Schema(format!(
                "column {} assigned twice in population schema",
                col
            )));
        }
        Ok(())
    };
    for clause in schema {
        match clause {
            PopClause::Model { columns, stattype }
            | PopClause::SetStattype { columns, stattype } => {
                let st = normalize_stattype(stattype)?;
                for col in columns {
                    let colno = find_colno(col)?;
                    claim(colno, col)?;
                    assigned.push((colno, col.clone(), Some(st.clone())));
                }
            }
            PopClause::Ignore { columns } => {
                for col in columns {
                    let colno = find_colno(col)?;
                    claim(colno, col)?;
                    assigned.push((colno, col.clone(), None));
                }
            }
        }
    }
    let missing: Vec<&str> = base
        .iter()
        .filter(|(c, _)| !seen.contains(c))
        .map(|(_, n)| n.as_str())
        .collect();
    if !missing.is_empty() {
        return Err(BqlError::Schema(format!(
            "population schema neither models nor ignores: {}",
            missing.join(", ")
        )));
    }
    if !assigned.iter().any(|(_, _, st)| st.is_some()) {
        return Err(BqlError::Schema("population schema models no columns".into()));
    }

    register_table(bdb, tabname)?;
    bdb.conn.execute(
        "INSERT INTO bayesdb_population (name, tabname) VALUES (?, ?)",
        rusqlite::params![name, tabname],
    )?;
    let pop_id = bdb.conn.last_insert_rowid();
    for (colno, colname, stattype) in &assigned {
        if let Some(st) = stattype {
            bdb.conn.execute(
                "INSERT INTO bayesdb_variable
                        (population_id, generator_id, colno, name, stattype)
                    VALUES (?, NULL, ?, ?, ?)",
                rusqlite::params![pop_id, colno, colname, st],
            )?;
        }
    }
    bdb.bust_cache();
    tracing::debug!(population = name, table = tabname, "created population");
    Ok(())
}

pub(crate) fn drop_population(bdb: &BayesDb, name: &str, if_exists: bool) -> Result<()> {
    let pop_id = match population_id(bdb, name) {
        Ok(id) => id,
        Err(BqlError::NoSuchPopulation(_)) if if_exists => return Ok(()),
        Err(e) => return Err(e),
    };
    let gens = population_generators(bdb, pop_id)?;
    if !gens.is_empty() {
        let names: Vec<String> = gens.into_iter().map(|(_, n)| n).collect();
        return Err(BqlError::Schema(format!(
            "population {} still has generators: {}",
            name,
            names.join(", ")
        )));
    }
    let tabname = population_table_by_id(bdb, pop_id)?;
    bdb.conn.execute("DELETE FROM bayesdb_variable WHERE population_id = ?", [pop_id])?;
    bdb.conn.execute("DELETE FROM bayesdb_population WHERE id = ?", [pop_id])?;
    unregister_table_if_unused(bdb, &tabname)?;
    bdb.bust_cache();
    Ok(())
}

pub(crate) fn alter_population(bdb: &BayesDb, name: &str, commands: &[PopCommand]) -> Result<()> {
    let pop_id = population_id(bdb, name)?;
    let tabname = population_table_by_id(bdb, pop_id)?;
    for command in commands {
        match command {
            PopCommand::AddVariable { column, stattype } => {
                let st = normalize_stattype(stattype)?;
                let base = base_table_columns(bdb, &tabname)?;
                let colno = base
                    .iter()
                    .find(|(_, n)| casefold(n) == casefold(column))
                    .map(|(c, _)| *c)
                    .ok_or_else(|| BqlError::NoSuchColumn {
                        table: tabname.clone(),
                        name: column.clone(),
                    })?;
                let already: i64 = bdb.conn.query_row(
                    "SELECT COUNT(*) FROM bayesdb_variable
                        WHERE population_id = ? AND colno = ?",
                    rusqlite::params![pop_id, colno],
                    |r| r.get(0),
                )?;
                if already > 0 {
                    return Err(BqlError::AlreadyExists {
                        kind: "variable",
                        name: column.clone(),
                    });
                }
                bdb.conn.execute(
                    "INSERT INTO bayesdb_variable
                            (population_id, generator_id, colno, name, stattype)
                        VALUES (?, NULL, ?, ?, ?)",
                    rusqlite::params![pop_id, colno, column, st],
                )?;
                for (gen_id, _) in population_generators(bdb, pop_id)? {
                    ensure_generator_loaded(bdb, gen_id)?;
                    let backend = bdb.ops.backend_for_generator(gen_id)?;
                    backend.add_variable(bdb, gen_id, colno, &st)?;
                }
            }
            PopCommand::SetStattype { columns, stattype } => {
                let st = normalize_stattype(stattype)?;
                for column in columns {
                    let colno = variable_colno(bdb, pop_id, None, column)
                        .map_err(|_| BqlError::NoSuchVariable {
                            population: name.to_string(),
                            name: column.clone(),
                        })?;
                    bdb.conn.execute(
                        "UPDATE bayesdb_variable SET stattype = ?
                            WHERE population_id = ? AND colno = ?",
                        rusqlite::params![st, pop_id, colno],
                    )?;
                }
            }
        }
    }
    bdb.bust_cache();
    Ok(())
}

// --------------------------------------------------------- variables

/// Resolve a variable name to its stable column number.  Latent
/// variables are visible only when their generator is in scope.
pub fn variable_colno(
    bdb: &BayesDb,
    population_id: i64,
    generator_id: Option<i64>,
    name: &str,
) -> Result<i64> {
    let row = match generator_id {
        Some(gid) => bdb
            .conn
            .query_row(
                "SELECT colno FROM bayesdb_variable
                    WHERE population_id = ? AND name = ?
                      AND (generator_id IS NULL OR generator_id = ?)",
                rusqlite::params![population_id, name, gid],
                |r| r.get::<_, i64>(0),
            )
            .optional()?,
        None => bdb
            .conn
            .query_row(
                "SELECT colno FROM bayesdb_variable
                    WHERE population_id = ? AND name = ? AND generator_id IS NULL",
                rusqlite::params![population_id, name],
                |r| r.get::<_, i64>(0),
            )
            .optional()?,
    };
    row.ok_or_else(|| BqlError::NoSuchVariable {
        population: population_name(bdb, population_id).unwrap_or_default(),
        name: name.to_string(),
    })
}

pub fn variable_name(bdb: &BayesDb, population_id: i64, colno: i64) -> Result<String> {
    bdb.conn
        .query_row(
            "SELECT name FROM bayesdb_variable
                WHERE population_id = ? AND colno = ?",
            rusqlite::params![population_id, colno],
            |r| r.get(0),
        )
        .optional()?
        .ok_or_else(|| BqlError::Internal(format!("no variable {} in population", colno)))
}

pub fn variable_stattype(bdb: &BayesDb, population_id: i64, colno: i64) -> Result<String> {
    bdb.conn
        .query_row(
            "SELECT stattype FROM bayesdb_variable
                WHERE population_id = ? AND colno = ?",
            rusqlite::params![population_id, colno],
            |r| r.get(0),
        )
        .optional()?
        .ok_or_else(|| BqlError::Internal(format!("no variable {} in population", colno)))
}

/// Column numbers of all variables visible in a population, in
/// order.  With a generator in scope, its latent variables are
/// included.
pub fn population_variables(
    bdb: &BayesDb,
    population_id: i64,
    generator_id: Option<i64>,
) -> Result<Vec<i64>> {
    let mut stmt;
    let rows = match generator_id {
        Some(gid) => {
            stmt = bdb.conn.prepare(
                "SELECT colno FROM bayesdb_variable
                    WHERE population_id = ?
                      AND (generator_id IS NULL OR generator_id = ?)
                    ORDER BY colno",
            )?;
            stmt.query_map(rusqlite::params![population_id, gid], |r| r.get::<_, i64>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?
        }
        None => {
            stmt = bdb.conn.prepare(
                "SELECT colno FROM bayesdb_variable
                    WHERE population_id = ? AND generator_id IS NULL
                    ORDER BY colno",
            )?;
            stmt.query_map([population_id], |r| r.get::<_, i64>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?
        }
    };
    Ok(rows)
}

// -------------------------------------------------------- generators

pub fn has_generator(bdb: &BayesDb, name: &str) -> Result<bool> {
    let n: i64 = bdb.conn.query_row(
        "SELECT COUNT(*) FROM bayesdb_generator WHERE name = ?",
        [name],
        |r| r.get(0),
    )?;
    Ok(n > 0)
}

pub fn generator_id(bdb: &BayesDb, name: &str) -> Result<i64> {
    let key = format!("gen:{}", casefold(name));
    if let Some(id) = bdb.cache_get(&key) {
        return Ok(id);
    }
    let id = bdb
        .conn
        .query_row("SELECT id FROM bayesdb_generator WHERE name = ?", [name], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .ok_or_else(|| BqlError::NoSuchGenerator(name.to_string()))?;
    bdb.cache_put(&key, id);
    Ok(id)
}

pub fn generator_name(bdb: &BayesDb, id: i64) -> Result<String> {
    bdb.conn
        .query_row("SELECT name FROM bayesdb_generator WHERE id = ?", [id], |r| r.get(0))
        .optional()?
        .ok_or_else(|| BqlError::Internal(format!("no generator with id {}", id)))
}

pub fn generator_population(bdb: &BayesDb, id: i64) -> Result<i64> {
    bdb.conn
        .query_row(
            "SELECT population_id FROM bayesdb_generator WHERE id = ?",
            [id],
            |r| r.get(0),
        )
        .optional()?
        .ok_or_else(|| BqlError::Internal(format!("no generator with id {}", id)))
}

pub fn generator_backend_name(bdb: &BayesDb, id: i64) -> Result<String> {
    bdb.conn
        .query_row("SELECT backend FROM bayesdb_generator WHERE id = ?", [id], |r| r.get(0))
        .optional()?
        .ok_or_else(|| BqlError::Internal(format!("no generator with id {}", id)))
}

pub fn population_generators(bdb: &BayesDb, population_id: i64) -> Result<Vec<(i64, String)>> {
    let mut stmt = bdb.conn.prepare(
        "SELECT id, name FROM bayesdb_generator WHERE population_id = ? ORDER BY id",
    )?;
    let rows = stmt
        .query_map([population_id], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub(crate) fn create_generator(
    bdb: &BayesDb,
    name: &str,
    population: &str,
    backend_name: &str,
    schema: &str,
    if_not_exists: bool,
) -> Result<()> {
    if has_generator(bdb, name)? {
        if if_not_exists {
            return Ok(());
        }
        return Err(BqlError::AlreadyExists { kind: "generator", name: name.to_string() });
    }
    let pop_id = population_id(bdb, population)?;
    let backend = bdb.ops.backend_by_name(backend_name)?;
    bdb.conn.execute(
        "INSERT INTO bayesdb_generator (name, population_id, backend, schema)
            VALUES (?, ?, ?, ?)",
        rusqlite::params![name, pop_id, casefold(backend.name()), schema],
    )?;
    let gen_id = bdb.conn.last_insert_rowid();
    backend.create_generator(bdb, gen_id, schema)?;
    bdb.ops.bind_generator(gen_id, backend)?;
    bdb.mark_generator_loaded(gen_id);
    bdb.bust_cache();
    tracing::debug!(generator = name, population, backend = backend_name, "created generator");
    Ok(())
}

pub(crate) fn drop_generator(bdb: &BayesDb, name: &str, if_exists: bool) -> Result<()> {
    let gen_id = match generator_id(bdb, name) {
        Ok(id) => id,
        Err(BqlError::NoSuchGenerator(_)) if if_exists => return Ok(()),
        Err(e) => return Err(e),
    };
    ensure_generator_loaded(bdb, gen_id)?;
    let backend = bdb.ops.backend_for_generator(gen_id)?;
    backend.drop_generator(bdb, gen_id)?;
    // Models and latent variables cascade; the default-generator
    // trigger clears any reference from bayesdb_table.
    bdb.conn.execute("DELETE FROM bayesdb_generator WHERE id = ?", [gen_id])?;
    bdb.ops.unbind_generator(gen_id)?;
    bdb.unmark_generator_loaded(gen_id);
    bdb.bust_cache();
    Ok(())
}

pub(crate) fn rename_generator(bdb: &BayesDb, old: &str, new: &str) -> Result<()> {
    let gen_id = generator_id(bdb, old)?;
    if has_generator(bdb, new)? {
        return Err(BqlError::AlreadyExists { kind: "generator", name: new.to_string() });
    }
    bdb.conn.execute(
        "UPDATE bayesdb_generator SET name = ? WHERE id = ?",
        rusqlite::params![new, gen_id],
    )?;
    bdb.conn.execute(
        "UPDATE bayesdb_table SET default_generator = ? WHERE default_generator = ?",
        rusqlite::params![new, old],
    )?;
    bdb.bust_cache();
    Ok(())
}

/// Pick the generator for a query over a population: `MODELED BY` if
/// given, else the base table's default, else the population's sole
/// generator.
pub(crate) fn resolve_generator(
    bdb: &BayesDb,
    population_id: i64,
    population: &str,
    requested: Option<&str>,
) -> Result<i64> {
    if let Some(name) = requested {
        let gid = generator_id(bdb, name)?;
        if generator_population(bdb, gid)? != population_id {
            return Err(BqlError::Schema(format!(
                "generator {} does not model population {}",
                name, population
            )));
        }
        return Ok(gid);
    }
    let tabname = population_table_by_id(bdb, population_id)?;
    if let Some(default) = default_generator(bdb, &tabname)? {
        let gid = generator_id(bdb, &default)?;
        if generator_population(bdb, gid)? == population_id {
            return Ok(gid);
        }
    }
    let gens = population_generators(bdb, population_id)?;
    match gens.len() {
        0 => Err(BqlError::NoGenerator(population.to_string())),
        1 => Ok(gens[0].0),
        _ => Err(BqlError::AmbiguousGenerators(population.to_string())),
    }
}

/// Bind a generator's backend into the operator context and let the
/// backend rehydrate its model state, once per connection.
pub(crate) fn ensure_generator_loaded(bdb: &BayesDb, generator_id: i64) -> Result<()> {
    if bdb.generator_loaded(generator_id) {
        return Ok(());
    }
    let backend_name = generator_backend_name(bdb, generator_id)?;
    let backend = bdb.ops.backend_by_name(&backend_name)?;
    bdb.ops.bind_generator(generator_id, backend.clone())?;
    backend.load_generator(bdb, generator_id)?;
    bdb.mark_generator_loaded(generator_id);
    Ok(())
}

// ------------------------------------------------------------ models

pub fn generator_modelnos(bdb: &BayesDb, generator_id: i64) -> Result<Vec<u64>> {
    let mut stmt = bdb.conn.prepare(
        "SELECT modelno FROM bayesdb_generator_model
            WHERE generator_id = ? ORDER BY modelno",
    )?;
    let rows = stmt
        .query_map([generator_id], |r| r.get::<_, i64>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows.into_iter().map(|n| n as u64).collect())
}

pub fn has_model(bdb: &BayesDb, generator_id: i64, modelno: u64) -> Result<bool> {
    let n: i64 = bdb.conn.query_row(
        "SELECT COUNT(*) FROM bayesdb_generator_model
            WHERE generator_id = ? AND modelno = ?",
        rusqlite::params![generator_id, modelno as i64],
        |r| r.get(0),
    )?;
    Ok(n > 0)
}

pub(crate) fn insert_model(bdb: &BayesDb, generator_id: i64, modelno: u64) -> Result<()> {
    bdb.conn.execute(
        "INSERT INTO bayesdb_generator_model (generator_id, modelno, iterations)
            VALUES (?, ?, 0)",
        rusqlite::params![generator_id, modelno as i64],
    )?;
    Ok(())
}

pub(crate) fn delete_models(bdb: &BayesDb, generator_id: i64, modelnos: &[u64]) -> Result<()> {
    for &m in modelnos {
        bdb.conn.execute(
            "DELETE FROM bayesdb_generator_model
                WHERE generator_id = ? AND modelno = ?",
            rusqlite::params![generator_id, m as i64],
        )?;
    }
    Ok(())
}

pub(crate) fn add_model_iterations(
    bdb: &BayesDb,
    generator_id: i64,
    modelnos: &[u64],
    iterations: u64,
) -> Result<()> {
    for &m in modelnos {
        bdb.conn.execute(
            "UPDATE bayesdb_generator_model SET iterations = iterations + ?
                WHERE generator_id = ? AND modelno = ?",
            rusqlite::params![iterations as i64, generator_id, m as i64],
        )?;
    }
    Ok(())
}

/// Expand a `USING MODELS` clause against the catalog, or default to
/// every model of the generator.
pub(crate) fn resolve_modelnos(
    bdb: &BayesDb,
    generator_id: i64,
    spec: Option<&[(u64, u64)]>,
) -> Result<Vec<u64>> {
    match spec {
        None => generator_modelnos(bdb, generator_id),
        Some(ranges) => {
            let mut out = Vec::new();
            for &(lo, hi) in ranges {
                if hi < lo {
                    return Err(BqlError::Schema(format!(
                        "bad model range: {}-{}",
                        lo, hi
                    )));
                }
                for m in lo..=hi {
                    if !has_model(bdb, generator_id, m)? {
                        return Err(BqlError::NoSuchModel {
                            generator: generator_name(bdb, generator_id)?,
                            modelno: m,
                        });
                    }
                    if !out.contains(&m) {
                        out.push(m);
                    }
                }
            }
            Ok(out)
        }
    }
}
