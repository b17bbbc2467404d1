//! BQL → SQL compiler.
//!
//! Walks the AST top-down, emitting SQL text into an `Output`
//! accumulator that also renumbers parameters.  Probabilistic
//! operator forms lower to calls on the registered `bql_*` functions;
//! which call, and with which implicit row/column arguments, depends
//! on the context fixed by the query header.
//!
//! Estimators that appear both in the projection and in ORDER BY or
//! WHERE are emitted textually in each place; the engine re-evaluates
//! them (SQLite does not deduplicate user-function calls).  Wrap
//! expensive estimators in a subquery if that matters.

use std::cell::RefCell;
use std::collections::HashMap;

use bayesql_ast::ast::*;
use rusqlite::types::Value;

use crate::bayesdb::BayesDb;
use crate::catalog;
use crate::catalog::quote_name;
use crate::error::{BqlError, Result};

/// Caller-supplied parameter values.
#[derive(Clone, Copy)]
pub enum Bindings<'a> {
    Positional(&'a [Value]),
    Named(&'a [(&'a str, Value)]),
}

/// Compiled-SQL accumulator.
///
/// Parameter bookkeeping: `n` is a source parameter number, `m` the
/// number in the emitted SQL.  A source parameter gets an output slot
/// the first time it is written; later references reuse the slot.
pub struct Output<'a> {
    buf: String,
    n_numpar: usize,
    nampar_map: Vec<(String, usize)>,
    bindings: Bindings<'a>,
    renumber: HashMap<usize, usize>,
    select: Vec<usize>,
}

impl<'a> Output<'a> {
    pub fn new(
        n_numpar: usize,
        nampar_map: Vec<(String, usize)>,
        bindings: Bindings<'a>,
    ) -> Output<'a> {
        Output {
            buf: String::new(),
            n_numpar,
            nampar_map,
            bindings,
            renumber: HashMap::new(),
            select: Vec::new(),
        }
    }

    /// Fresh accumulator for a subquery executed at compile time.
    fn subquery(&self) -> Output<'a> {
        Output::new(self.n_numpar, self.nampar_map.clone(), self.bindings)
    }

    fn write(&mut self, text: &str) {
        self.buf.push_str(text);
    }

    /// Raw text injection for driver-composed statements.
    pub(crate) fn write_raw(&mut self, text: &str) {
        self.buf.push_str(text);
    }

    fn write_numpar(&mut self, n: usize) -> Result<()> {
        if n == 0 || n > self.n_numpar {
            return Err(BqlError::Internal(format!("parameter number out of range: {}", n)));
        }
        let m = match self.renumber.get(&n) {
            Some(&m) => m,
            None => {
                let m = self.select.len() + 1;
                self.select.push(n - 1);
                self.renumber.insert(n, m);
                m
            }
        };
        self.write(&format!("?{}", m));
        Ok(())
    }

    pub fn sql(&self) -> &str {
        &self.buf
    }

    pub fn into_sql(self) -> String {
        self.buf
    }

    /// Select and order the caller's bindings to fit the emitted SQL.
    pub fn getbindings(&self) -> Result<Vec<Value>> {
        match self.bindings {
            Bindings::Positional(values) => {
                if values.len() < self.n_numpar {
                    return Err(BqlError::Bindings(format!(
                        "too few parameter bindings: {} < {}",
                        values.len(),
                        self.n_numpar
                    )));
                }
                if values.len() > self.n_numpar {
                    return Err(BqlError::Bindings(format!(
                        "too many parameter bindings: {} > {}",
                        values.len(),
                        self.n_numpar
                    )));
                }
                Ok(self.select.iter().map(|&i| values[i].clone()).collect())
            }
            Bindings::Named(pairs) => {
                let mut out: Vec<Option<Value>> = vec![None; self.select.len()];
                let mut missing: Vec<&str> = self
                    .nampar_map
                    .iter()
                    .map(|(name, _)| name.as_str())
                    .collect();
                let mut unknown = Vec::new();
                for (name, value) in pairs {
                    let folded = catalog::casefold(name);
                    match self.nampar_map.iter().find(|(m, _)| *m == folded) {
                        None => unknown.push(*name),
                        Some((_, n)) => {
                            missing.retain(|m| *m != folded);
                            if let Some(&m) = self.renumber.get(n) {
                                out[m - 1] = Some(value.clone());
                            }
                        }
                    }
                }
                if !missing.is_empty() {
                    return Err(BqlError::Bindings(format!(
                        "missing parameter bindings: {}",
                        missing.join(", ")
                    )));
                }
                if !unknown.is_empty() {
                    return Err(BqlError::Bindings(format!(
                        "unknown parameter bindings: {}",
                        unknown.join(", ")
                    )));
                }
                if pairs.len() < self.n_numpar {
                    return Err(BqlError::Bindings(
                        "query mixes numbered and named parameters; bind positionally".into(),
                    ));
                }
                out.into_iter()
                    .collect::<Option<Vec<Value>>>()
                    .ok_or_else(|| BqlError::Bindings("unbound parameter slot".into()))
            }
        }
    }
}

// ---------------------------------------------------------------- context

/// Population and (lazily resolved) generator/model scope of a query
/// header.  Operators that only touch the data — CORRELATION — never
/// force generator resolution, so populations without generators can
/// still answer them.
struct ModelScope<'q> {
    population_id: i64,
    population: String,
    table: String,
    requested_generator: Option<&'q str>,
    requested_models: Option<&'q [(u64, u64)]>,
    resolved: RefCell<Option<(i64, String)>>,
}

impl<'q> ModelScope<'q> {
    fn resolve(
        bdb: &BayesDb,
        population: &str,
        generator: Option<&'q str>,
        models: Option<&'q [(u64, u64)]>,
    ) -> Result<ModelScope<'q>> {
        let population_id = catalog::population_id(bdb, population)?;
        let table = catalog::population_table_by_id(bdb, population_id)?;
        let scope = ModelScope {
            population_id,
            population: population.to_string(),
            table,
            requested_generator: generator,
            requested_models: models,
            resolved: RefCell::new(None),
        };
        // An explicit MODELED BY must resolve, and resolve now.
        if generator.is_some() {
            scope.generator(bdb)?;
        }
        Ok(scope)
    }

    /// Generator id and the model-list literal, resolving on first
    /// use.
    fn generator(&self, bdb: &BayesDb) -> Result<(i64, String)> {
        if let Some(r) = self.resolved.borrow().as_ref() {
            return Ok(r.clone());
        }
        let gen_id = catalog::resolve_generator(
            bdb,
            self.population_id,
            &self.population,
            self.requested_generator,
        )?;
        catalog::ensure_generator_loaded(bdb, gen_id)?;
        let modelnos = catalog::resolve_modelnos(bdb, gen_id, self.requested_models)?;
        let lit = format!(
            "'{}'",
            modelnos.iter().map(u64::to_string).collect::<Vec<_>>().join(",")
        );
        *self.resolved.borrow_mut() = Some((gen_id, lit.clone()));
        Ok((gen_id, lit))
    }

    /// Generator id if one is unambiguously in scope, for latent
    /// variable visibility.
    fn generator_opt(&self, bdb: &BayesDb) -> Result<Option<i64>> {
        match self.generator(bdb) {
            Ok((gid, _)) => Ok(Some(gid)),
            Err(BqlError::NoGenerator(_)) | Err(BqlError::AmbiguousGenerators(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn colno(&self, bdb: &BayesDb, name: &str) -> Result<i64> {
        let gen = self.generator_opt(bdb)?;
        catalog::variable_colno(bdb, self.population_id, gen, name)
    }
}

/// Implicit row/column context fixed by a query header.
enum BqlCtx<'q> {
    NoBql,
    OneRow {
        scope: &'q ModelScope<'q>,
        rowid_exp: String,
        col_prefix: String,
    },
    TwoRow {
        scope: &'q ModelScope<'q>,
        rowid0_exp: String,
        rowid1_exp: String,
    },
    OneCol {
        scope: &'q ModelScope<'q>,
        colno_exp: String,
    },
    TwoCol {
        scope: &'q ModelScope<'q>,
        colno0_exp: String,
        colno1_exp: String,
    },
}

impl BqlCtx<'_> {
    fn name(&self) -> &'static str {
        match self {
            BqlCtx::NoBql => "plain SQL",
            BqlCtx::OneRow { .. } => "row",
            BqlCtx::TwoRow { .. } => "row-pair",
            BqlCtx::OneCol { .. } => "column",
            BqlCtx::TwoCol { .. } => "column-pair",
        }
    }
}

fn bql_op_name(bql: &BqlFn) -> &'static str {
    match bql {
        BqlFn::PredProb { .. } => "PREDICTIVE PROBABILITY",
        BqlFn::ProbDensity { .. } => "PROBABILITY DENSITY",
        BqlFn::ProbDensityValue { .. } => "PROBABILITY DENSITY OF VALUE",
        BqlFn::Similarity { .. } => "SIMILARITY",
        BqlFn::DepProb(_) => "DEPENDENCE PROBABILITY",
        BqlFn::MutInf { .. } => "MUTUAL INFORMATION",
        BqlFn::Correlation { pvalue: false, .. } => "CORRELATION",
        BqlFn::Correlation { pvalue: true, .. } => "CORRELATION PVALUE",
        BqlFn::Predict { .. } => "PREDICT",
    }
}

// ---------------------------------------------------------------- queries

pub fn compile_query(bdb: &BayesDb, query: &Query, out: &mut Output) -> Result<()> {
    match query {
        Query::Select(s) => compile_select(bdb, s, out),
        Query::Estimate(e) => compile_estimate(bdb, e, out),
        Query::EstCols(e) => compile_estcols(bdb, e, out),
        Query::EstPairCols(e) => compile_estpaircols(bdb, e, out),
        Query::EstPairRow(e) => compile_estpairrow(bdb, e, out),
        Query::Infer(i) => compile_infer(bdb, i, out),
        Query::InferExplicit(i) => compile_infer_explicit(bdb, i, out),
        Query::Simulate(_) => Err(BqlError::Unsupported(
            "SIMULATE is not composable; execute it as its own phrase".into(),
        )),
    }
}

/// Compile a standalone scalar expression (SIMULATE constraints and
/// limits); BQL operators are out of context here.
pub(crate) fn compile_scalar_expression(
    bdb: &BayesDb,
    expr: &Expr,
    out: &mut Output,
) -> Result<()> {
    compile_expression(bdb, expr, &BqlCtx::NoBql, out)
}

fn compile_select(bdb: &BayesDb, select: &Select, out: &mut Output) -> Result<()> {
    out.write("SELECT");
    if select.quantifier == Quant::Distinct {
        out.write(" DISTINCT");
    }
    compile_select_columns(bdb, &select.columns, &BqlCtx::NoBql, out)?;
    if let Some(tables) = &select.tables {
        out.write(" FROM ");
        for (i, seltab) in tables.iter().enumerate() {
            if i > 0 {
                out.write(", ");
            }
            match &seltab.table {
                TabRef::Name(n) => out.write(&quote_name(n)),
                TabRef::Subquery(q) => {
                    out.write("(");
                    compile_query(bdb, q, out)?;
                    out.write(")");
                }
            }
            if let Some(n) = &seltab.name {
                out.write(&format!(" AS {}", quote_name(n)));
            }
        }
    }
    let ctx = BqlCtx::NoBql;
    compile_where(bdb, select.condition.as_ref(), &ctx, out)?;
    compile_grouping(bdb, select.grouping.as_ref(), &ctx, out)?;
    compile_order_limit(bdb, select.order.as_deref(), select.limit.as_ref(), &ctx, out)
}

fn compile_estimate(bdb: &BayesDb, est: &Estimate, out: &mut Output) -> Result<()> {
    let scope = ModelScope::resolve(
        bdb,
        &est.population,
        est.generator.as_deref(),
        est.models.as_deref(),
    )?;
    let qt = quote_name(&scope.table);
    let ctx = BqlCtx::OneRow {
        scope: &scope,
        rowid_exp: format!("{}._rowid_", qt),
        col_prefix: format!("{}.", qt),
    };
    out.write("SELECT");
    if est.quantifier == Quant::Distinct {
        out.write(" DISTINCT");
    }
    compile_select_columns(bdb, &est.columns, &ctx, out)?;
    out.write(&format!(" FROM {}", qt));
    compile_where(bdb, est.condition.as_ref(), &ctx, out)?;
    compile_grouping(bdb, est.grouping.as_ref(), &ctx, out)?;
    compile_order_limit(bdb, est.order.as_deref(), est.limit.as_ref(), &ctx, out)
}

fn compile_estcols(bdb: &BayesDb, est: &EstCols, out: &mut Output) -> Result<()> {
    let scope = ModelScope::resolve(
        bdb,
        &est.population,
        est.generator.as_deref(),
        est.models.as_deref(),
    )?;
    let ctx = BqlCtx::OneCol { scope: &scope, colno_exp: "v.colno".to_string() };
    out.write("SELECT v.name AS name");
    for selcol in &est.columns {
        match selcol {
            SelCol::Star => continue,
            SelCol::TabStar(_) => {
                return Err(BqlError::Unsupported(
                    "qualified * in a column-context query".into(),
                ))
            }
            SelCol::Exp { expr, name } => {
                out.write(", ");
                compile_expression(bdb, expr, &ctx, out)?;
                if let Some(n) = name {
                    out.write(&format!(" AS {}", quote_name(n)));
                }
            }
        }
    }
    out.write(" FROM bayesdb_variable AS v");
    out.write(&format!(" WHERE v.population_id = {}", scope.population_id));
    out.write(&latent_filter(bdb, &scope, "v")?);
    if let Some(cond) = &est.condition {
        out.write(" AND ");
        compile_expression(bdb, cond, &ctx, out)?;
    }
    compile_order_limit(bdb, est.order.as_deref(), est.limit.as_ref(), &ctx, out)
}

fn compile_estpaircols(bdb: &BayesDb, est: &EstPairCols, out: &mut Output) -> Result<()> {
    let scope = ModelScope::resolve(
        bdb,
        &est.population,
        est.generator.as_deref(),
        est.models.as_deref(),
    )?;
    let ctx = BqlCtx::TwoCol {
        scope: &scope,
        colno0_exp: "v0.colno".to_string(),
        colno1_exp: "v1.colno".to_string(),
    };
    out.write("SELECT v0.name AS name0, v1.name AS name1");
    let single_unnamed = est.columns.len() == 1
        && matches!(&est.columns[0], SelCol::Exp { name: None, .. });
    for selcol in &est.columns {
        match selcol {
            SelCol::Star | SelCol::TabStar(_) => {
                return Err(BqlError::Unsupported(
                    "* in a column-pair query".into(),
                ))
            }
            SelCol::Exp { expr, name } => {
                out.write(", ");
                compile_expression(bdb, expr, &ctx, out)?;
                if single_unnamed {
                    out.write(" AS value");
                } else if let Some(n) = name {
                    out.write(&format!(" AS {}", quote_name(n)));
                }
            }
        }
    }
    out.write(" FROM bayesdb_variable AS v0, bayesdb_variable AS v1");
    out.write(&format!(
        " WHERE v0.population_id = {0} AND v1.population_id = {0}",
        scope.population_id
    ));
    out.write(&latent_filter(bdb, &scope, "v0")?);
    out.write(&latent_filter(bdb, &scope, "v1")?);
    if let Some(items) = &est.subcolumns {
        let colnos = resolve_column_list(bdb, &scope, items, out)?;
        let list = colnos
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        out.write(&format!(" AND v0.colno IN ({0}) AND v1.colno IN ({0})", list));
    }
    if let Some(cond) = &est.condition {
        out.write(" AND ");
        compile_expression(bdb, cond, &ctx, out)?;
    }
    compile_order_limit(bdb, est.order.as_deref(), est.limit.as_ref(), &ctx, out)
}

fn compile_estpairrow(bdb: &BayesDb, est: &EstPairRow, out: &mut Output) -> Result<()> {
    let scope = ModelScope::resolve(
        bdb,
        &est.population,
        est.generator.as_deref(),
        est.models.as_deref(),
    )?;
    let qt = quote_name(&scope.table);
    let ctx = BqlCtx::TwoRow {
        scope: &scope,
        rowid0_exp: "r0._rowid_".to_string(),
        rowid1_exp: "r1._rowid_".to_string(),
    };
    out.write("SELECT r0._rowid_ AS rowid0, r1._rowid_ AS rowid1, ");
    compile_expression(bdb, &est.expression, &ctx, out)?;
    match &est.name {
        Some(n) => out.write(&format!(" AS {}", quote_name(n))),
        None => out.write(" AS value"),
    }
    out.write(&format!(" FROM {0} AS r0, {0} AS r1", qt));
    compile_where(bdb, est.condition.as_ref(), &ctx, out)?;
    compile_order_limit(bdb, est.order.as_deref(), est.limit.as_ref(), &ctx, out)
}

fn compile_infer(bdb: &BayesDb, infer: &Infer, out: &mut Output) -> Result<()> {
    let scope = ModelScope::resolve(
        bdb,
        &infer.population,
        infer.generator.as_deref(),
        infer.models.as_deref(),
    )?;
    let (gen_id, models) = scope.generator(bdb)?;
    let qt = quote_name(&scope.table);
    let ctx = BqlCtx::OneRow {
        scope: &scope,
        rowid_exp: format!("{}._rowid_", qt),
        col_prefix: format!("{}.", qt),
    };
    out.write("SELECT ");
    for (i, column) in infer.columns.iter().enumerate() {
        if i > 0 {
            out.write(", ");
        }
        let colno = scope.colno(bdb, column)?;
        let qc = quote_name(&catalog::variable_name(bdb, scope.population_id, colno)?);
        out.write(&format!(
            "bql_infer({}, {}, {}._rowid_, {}, {}.{}, ",
            gen_id, models, qt, colno, qt, qc
        ));
        match &infer.confidence {
            Some(conf) => compile_expression(bdb, conf, &ctx, out)?,
            None => out.write("0"),
        }
        out.write(&format!(") AS {}", qc));
    }
    out.write(&format!(" FROM {}", qt));
    // Columns in WHERE, GROUP BY and ORDER BY are not filled in.
    compile_where(bdb, infer.condition.as_ref(), &ctx, out)?;
    compile_grouping(bdb, infer.grouping.as_ref(), &ctx, out)?;
    compile_order_limit(bdb, infer.order.as_deref(), infer.limit.as_ref(), &ctx, out)
}

fn compile_infer_explicit(bdb: &BayesDb, infer: &InferExplicit, out: &mut Output) -> Result<()> {
    let scope = ModelScope::resolve(
        bdb,
        &infer.population,
        infer.generator.as_deref(),
        infer.models.as_deref(),
    )?;
    let (gen_id, models) = scope.generator(bdb)?;
    let qt = quote_name(&scope.table);
    let inner_ctx = BqlCtx::OneRow {
        scope: &scope,
        rowid_exp: "t._rowid_".to_string(),
        col_prefix: "t.".to_string(),
    };
    let outer_ctx = BqlCtx::OneRow {
        scope: &scope,
        rowid_exp: "_bql_rowid".to_string(),
        col_prefix: String::new(),
    };

    // Outer projection over an inner scan that evaluates each
    // PREDICT once and exposes its (value, confidence) pair.
    out.write("SELECT ");
    let mut npredict = 0usize;
    for (i, col) in infer.columns.iter().enumerate() {
        if i > 0 {
            out.write(", ");
        }
        match col {
            InferCol::Sel(SelCol::Star) => out.write("*"),
            InferCol::Sel(SelCol::TabStar(t)) => {
                out.write(&format!("{}.*", quote_name(t)))
            }
            InferCol::Sel(SelCol::Exp { expr, name }) => {
                compile_expression(bdb, expr, &outer_ctx, out)?;
                if let Some(n) = name {
                    out.write(&format!(" AS {}", quote_name(n)));
                }
            }
            InferCol::Predict { column, name, confidence } => {
                let pc = format!("_bql_pc{}", npredict);
                npredict += 1;
                let out_name = name.as_deref().unwrap_or(column);
                out.write(&format!(
                    "bql_json_get({}, 'value') AS {}, bql_json_get({}, 'confidence') AS {}",
                    pc,
                    quote_name(out_name),
                    pc,
                    quote_name(confidence)
                ));
            }
        }
    }
    out.write(" FROM (SELECT t.*, t._rowid_ AS _bql_rowid");
    let mut k = 0usize;
    for col in &infer.columns {
        if let InferCol::Predict { column, .. } = col {
            let colno = scope.colno(bdb, column)?;
            out.write(&format!(
                ", bql_predict_confidence({}, {}, t._rowid_, {}) AS _bql_pc{}",
                gen_id, models, colno, k
            ));
            k += 1;
        }
    }
    out.write(&format!(" FROM {} AS t", qt));
    compile_where(bdb, infer.condition.as_ref(), &inner_ctx, out)?;
    out.write(")");
    compile_grouping(bdb, infer.grouping.as_ref(), &outer_ctx, out)?;
    compile_order_limit(bdb, infer.order.as_deref(), infer.limit.as_ref(), &outer_ctx, out)
}

// ----------------------------------------------------------- clause parts

fn compile_select_columns(
    bdb: &BayesDb,
    columns: &[SelCol],
    ctx: &BqlCtx,
    out: &mut Output,
) -> Result<()> {
    for (i, selcol) in columns.iter().enumerate() {
        out.write(if i == 0 { " " } else { ", " });
        match selcol {
            SelCol::Star => out.write("*"),
            SelCol::TabStar(t) => out.write(&format!("{}.*", quote_name(t))),
            SelCol::Exp { expr, name } => {
                compile_expression(bdb, expr, ctx, out)?;
                if let Some(n) = name {
                    out.write(&format!(" AS {}", quote_name(n)));
                }
            }
        }
    }
    Ok(())
}

fn compile_where(
    bdb: &BayesDb,
    condition: Option<&Expr>,
    ctx: &BqlCtx,
    out: &mut Output,
) -> Result<()> {
    if let Some(cond) = condition {
        out.write(" WHERE ");
        compile_expression(bdb, cond, ctx, out)?;
    }
    Ok(())
}

fn compile_grouping(
    bdb: &BayesDb,
    grouping: Option<&Grouping>,
    ctx: &BqlCtx,
    out: &mut Output,
) -> Result<()> {
    if let Some(g) = grouping {
        for (i, key) in g.keys.iter().enumerate() {
            out.write(if i == 0 { " GROUP BY " } else { ", " });
            compile_expression(bdb, key, ctx, out)?;
        }
        if let Some(h) = &g.condition {
            out.write(" HAVING ");
            compile_expression(bdb, h, ctx, out)?;
        }
    }
    Ok(())
}

fn compile_order_limit(
    bdb: &BayesDb,
    order: Option<&[OrdKey]>,
    limit: Option<&Lim>,
    ctx: &BqlCtx,
    out: &mut Output,
) -> Result<()> {
    if let Some(keys) = order {
        for (i, key) in keys.iter().enumerate() {
            out.write(if i == 0 { " ORDER BY " } else { ", " });
            compile_expression(bdb, &key.expression, ctx, out)?;
            if key.sense == OrdSense::Desc {
                out.write(" DESC");
            }
        }
    }
    if let Some(lim) = limit {
        out.write(" LIMIT ");
        compile_expression(bdb, &lim.limit, ctx, out)?;
        if let Some(off) = &lim.offset {
            out.write(" OFFSET ");
            compile_expression(bdb, off, ctx, out)?;
        }
    }
    Ok(())
}

/// Latent-variable visibility filter for one alias of the variable
/// table.
fn latent_filter(bdb: &BayesDb, scope: &ModelScope, alias: &str) -> Result<String> {
    Ok(match scope.generator_opt(bdb)? {
        Some(gid) => format!(
            " AND ({0}.generator_id IS NULL OR {0}.generator_id = {1})",
            alias, gid
        ),
        None => format!(" AND {}.generator_id IS NULL", alias),
    })
}

/// Materialize a `FOR (…)` column list at compile time.  Subqueries
/// run against the store now, with the caller's bindings.
fn resolve_column_list(
    bdb: &BayesDb,
    scope: &ModelScope,
    items: &[ColListItem],
    out: &Output,
) -> Result<Vec<i64>> {
    let mut colnos = Vec::new();
    for item in items {
        match item {
            ColListItem::Name(name) => colnos.push(scope.colno(bdb, name)?),
            ColListItem::Subquery(query) => {
                let mut subout = out.subquery();
                compile_query(bdb, query, &mut subout)?;
                let bindings = subout.getbindings()?;
                let mut cursor = bdb.run_sql(subout.sql(), &bindings)?;
                while let Some(row) = cursor.next_row() {
                    if row.len() != 1 {
                        return Err(BqlError::Unsupported(
                            "column-list subquery returned multi-cell rows".into(),
                        ));
                    }
                    match &row[0] {
                        Value::Text(name) => colnos.push(scope.colno(bdb, name)?),
                        _ => {
                            return Err(BqlError::Unsupported(
                                "column-list subquery returned a non-string".into(),
                            ))
                        }
                    }
                }
            }
        }
    }
    Ok(colnos)
}

// ------------------------------------------------------------ expressions

fn compile_expression(bdb: &BayesDb, expr: &Expr, ctx: &BqlCtx, out: &mut Output) -> Result<()> {
    match expr {
        Expr::Literal(lit) => {
            compile_literal(lit, out);
            Ok(())
        }
        Expr::NumPar(n) => out.write_numpar(*n),
        Expr::NamPar { number, .. } => out.write_numpar(*number),
        Expr::Col { table, column } => {
            if let Some(t) = table {
                out.write(&format!("{}.", quote_name(t)));
            }
            out.write(&quote_name(column));
            Ok(())
        }
        Expr::Sub(query) => compile_subquery(bdb, query, out),
        Expr::Exists(query) => {
            out.write("EXISTS ");
            compile_subquery(bdb, query, out)
        }
        Expr::In { expr, positive, query } => {
            out.write("(");
            compile_expression(bdb, expr, ctx, out)?;
            if !positive {
                out.write(" NOT");
            }
            out.write(" IN ");
            compile_subquery(bdb, query, out)?;
            out.write(")");
            Ok(())
        }
        Expr::Collate { expr, collation } => {
            out.write("(");
            compile_expression(bdb, expr, ctx, out)?;
            out.write(&format!(" COLLATE {})", quote_name(collation)));
            Ok(())
        }
        Expr::Cast { expr, typ } => {
            out.write("CAST(");
            compile_expression(bdb, expr, ctx, out)?;
            out.write(" AS ");
            for (i, n) in typ.names.iter().enumerate() {
                if i > 0 {
                    out.write(" ");
                }
                out.write(&quote_name(n));
            }
            if !typ.args.is_empty() {
                let args: Vec<String> = typ.args.iter().map(|a| a.to_string()).collect();
                out.write(&format!("({})", args.join(", ")));
            }
            out.write(")");
            Ok(())
        }
        Expr::App { operator, distinct, operands } => {
            out.write(&format!("{}(", quote_name(operator)));
            if *distinct {
                out.write("DISTINCT ");
            }
            for (i, operand) in operands.iter().enumerate() {
                if i > 0 {
                    out.write(", ");
                }
                compile_expression(bdb, operand, ctx, out)?;
            }
            out.write(")");
            Ok(())
        }
        Expr::AppStar { operator } => {
            out.write(&format!("{}(*)", quote_name(operator)));
            Ok(())
        }
        Expr::Case { key, whens, otherwise } => {
            out.write("CASE");
            if let Some(k) = key {
                out.write(" ");
                compile_expression(bdb, k, ctx, out)?;
            }
            for (when, then) in whens {
                out.write(" WHEN ");
                compile_expression(bdb, when, ctx, out)?;
                out.write(" THEN ");
                compile_expression(bdb, then, ctx, out)?;
            }
            if let Some(e) = otherwise {
                out.write(" ELSE ");
                compile_expression(bdb, e, ctx, out)?;
            }
            out.write(" END");
            Ok(())
        }
        Expr::Op { op, operands } => compile_op(bdb, *op, operands, ctx, out),
        Expr::Bql(bql) => compile_bql(bdb, bql, ctx, out),
    }
}

fn compile_subquery(bdb: &BayesDb, query: &Query, out: &mut Output) -> Result<()> {
    out.write("(");
    compile_query(bdb, query, out)?;
    out.write(")");
    Ok(())
}

fn compile_literal(lit: &Lit, out: &mut Output) {
    match lit {
        Lit::Null => out.write("NULL"),
        Lit::Integer(i) => out.write(&i.to_string()),
        Lit::Float(f) => out.write(&format!("{:?}", f)),
        Lit::String(s) => out.write(&format!("'{}'", s.replace('\'', "''"))),
    }
}

fn compile_op(
    bdb: &BayesDb,
    op: Op,
    operands: &[Expr],
    ctx: &BqlCtx,
    out: &mut Output,
) -> Result<()> {
    // Infix/prefix/ternary shapes, fully parenthesized like the rest
    // of the emitted SQL.
    let simple = match op {
        Op::BoolOr => Some("OR"),
        Op::BoolAnd => Some("AND"),
        Op::Is => Some("IS"),
        Op::IsNot => Some("IS NOT"),
        Op::Like => Some("LIKE"),
        Op::NotLike => Some("NOT LIKE"),
        Op::Glob => Some("GLOB"),
        Op::NotGlob => Some("NOT GLOB"),
        Op::Regexp => Some("REGEXP"),
        Op::NotRegexp => Some("NOT REGEXP"),
        Op::Match => Some("MATCH"),
        Op::NotMatch => Some("NOT MATCH"),
        Op::Eq => Some("="),
        Op::Neq => Some("!="),
        Op::Lt => Some("<"),
        Op::Leq => Some("<="),
        Op::Gt => Some(">"),
        Op::Geq => Some(">="),
        Op::BitAnd => Some("&"),
        Op::BitOr => Some("|"),
        Op::LShift => Some("<<"),
        Op::RShift => Some(">>"),
        Op::Add => Some("+"),
        Op::Sub => Some("-"),
        Op::Mul => Some("*"),
        Op::Div => Some("/"),
        Op::Rem => Some("%"),
        Op::Concat => Some("||"),
        _ => None,
    };
    if let Some(token) = simple {
        out.write("(");
        compile_expression(bdb, &operands[0], ctx, out)?;
        out.write(&format!(" {} ", token));
        compile_expression(bdb, &operands[1], ctx, out)?;
        out.write(")");
        return Ok(());
    }
    match op {
        Op::BoolNot => {
            out.write("(NOT ");
            compile_expression(bdb, &operands[0], ctx, out)?;
            out.write(")");
        }
        Op::BitNot => {
            out.write("(~ ");
            compile_expression(bdb, &operands[0], ctx, out)?;
            out.write(")");
        }
        Op::Neg => {
            out.write("(- ");
            compile_expression(bdb, &operands[0], ctx, out)?;
            out.write(")");
        }
        Op::Pos => {
            out.write("(+ ");
            compile_expression(bdb, &operands[0], ctx, out)?;
            out.write(")");
        }
        Op::IsNull => {
            out.write("(");
            compile_expression(bdb, &operands[0], ctx, out)?;
            out.write(" ISNULL)");
        }
        Op::NotNull => {
            out.write("(");
            compile_expression(bdb, &operands[0], ctx, out)?;
            out.write(" NOTNULL)");
        }
        Op::Between | Op::NotBetween => {
            out.write("(");
            compile_expression(bdb, &operands[0], ctx, out)?;
            out.write(if op == Op::Between { " BETWEEN " } else { " NOT BETWEEN " });
            compile_expression(bdb, &operands[1], ctx, out)?;
            out.write(" AND ");
            compile_expression(bdb, &operands[2], ctx, out)?;
            out.write(")");
        }
        Op::LikeEsc | Op::NotLikeEsc | Op::GlobEsc | Op::NotGlobEsc | Op::RegexpEsc
        | Op::NotRegexpEsc | Op::MatchEsc | Op::NotMatchEsc => {
            let token = match op {
                Op::LikeEsc => "LIKE",
                Op::NotLikeEsc => "NOT LIKE",
                Op::GlobEsc => "GLOB",
                Op::NotGlobEsc => "NOT GLOB",
                Op::RegexpEsc => "REGEXP",
                Op::NotRegexpEsc => "NOT REGEXP",
                Op::MatchEsc => "MATCH",
                _ => "NOT MATCH",
            };
            out.write("(");
            compile_expression(bdb, &operands[0], ctx, out)?;
            out.write(&format!(" {} ", token));
            compile_expression(bdb, &operands[1], ctx, out)?;
            out.write(" ESCAPE ");
            compile_expression(bdb, &operands[2], ctx, out)?;
            out.write(")");
        }
        _ => {
            return Err(BqlError::Internal(format!("unhandled operator: {:?}", op)));
        }
    }
    Ok(())
}

// ---------------------------------------------------------- BQL operators

fn compile_bql(bdb: &BayesDb, bql: &BqlFn, ctx: &BqlCtx, out: &mut Output) -> Result<()> {
    match ctx {
        BqlCtx::NoBql => Err(BqlError::WrongContext {
            operator: bql_op_name(bql),
            context: ctx.name(),
        }),
        BqlCtx::OneRow { scope, rowid_exp, col_prefix } => {
            compile_bql_1row(bdb, bql, scope, rowid_exp, col_prefix, ctx, out)
        }
        BqlCtx::TwoRow { scope, rowid0_exp, rowid1_exp } => {
            compile_bql_2row(bdb, bql, scope, rowid0_exp, rowid1_exp, ctx, out)
        }
        BqlCtx::OneCol { scope, colno_exp } => {
            compile_bql_1col(bdb, bql, scope, colno_exp, ctx, out)
        }
        BqlCtx::TwoCol { scope, colno0_exp, colno1_exp } => {
            compile_bql_2col(bdb, bql, scope, colno0_exp, colno1_exp, ctx, out)
        }
    }
}

fn compile_constraints(
    bdb: &BayesDb,
    scope: &ModelScope,
    given: &[(Name, Expr)],
    ctx: &BqlCtx,
    out: &mut Output,
) -> Result<()> {
    for (name, expr) in given {
        let colno = scope.colno(bdb, name)?;
        out.write(&format!(", {}, ", colno));
        compile_expression(bdb, expr, ctx, out)?;
    }
    Ok(())
}

fn compile_bql_1row(
    bdb: &BayesDb,
    bql: &BqlFn,
    scope: &ModelScope,
    rowid_exp: &str,
    col_prefix: &str,
    ctx: &BqlCtx,
    out: &mut Output,
) -> Result<()> {
    match bql {
        BqlFn::PredProb { column, given } => {
            let (gen, models) = scope.generator(bdb)?;
            let colno = scope.colno(bdb, column)?;
            let qc = quote_name(&catalog::variable_name(bdb, scope.population_id, colno)?);
            out.write(&format!(
                "bql_row_predictive_probability({}, {}, {}, {}, {}{}",
                gen, models, rowid_exp, colno, col_prefix, qc
            ));
            compile_constraints(bdb, scope, given, ctx, out)?;
            out.write(")");
        }
        BqlFn::ProbDensity { targets, given } => {
            let (gen, models) = scope.generator(bdb)?;
            out.write(&format!("bql_pdf_joint({}, {}, {}", gen, models, targets.len()));
            compile_constraints(bdb, scope, targets, ctx, out)?;
            compile_constraints(bdb, scope, given, ctx, out)?;
            out.write(")");
        }
        BqlFn::ProbDensityValue { .. } => {
            return Err(BqlError::WrongContext {
                operator: bql_op_name(bql),
                context: ctx.name(),
            })
        }
        BqlFn::Similarity { condition: Some(cond), context } => {
            let (gen, models) = scope.generator(bdb)?;
            let qt = quote_name(&scope.table);
            out.write(&format!("bql_row_similarity({}, {}, {}, ", gen, models, rowid_exp));
            // First matching row by ascending rowid is the target.
            out.write(&format!("(SELECT _rowid_ FROM {} WHERE ", qt));
            compile_expression(bdb, cond, ctx, out)?;
            out.write(" ORDER BY _rowid_ ASC LIMIT 1), ");
            match context {
                Some(c) => out.write(&scope.colno(bdb, c)?.to_string()),
                None => out.write("NULL"),
            }
            out.write(")");
        }
        BqlFn::Similarity { condition: None, .. } => {
            return Err(BqlError::Schema(
                "SIMILARITY in a row context needs TO (<row condition>)".into(),
            ))
        }
        BqlFn::DepProb(cols) => {
            let (c0, c1) = both_columns(bdb, scope, cols, bql)?;
            let (gen, models) = scope.generator(bdb)?;
            out.write(&format!(
                "bql_column_dependence_probability({}, {}, {}, {})",
                gen, models, c0, c1
            ));
        }
        BqlFn::MutInf { columns, given, nsamples } => {
            let (c0, c1) = both_columns(bdb, scope, columns, bql)?;
            let (gen, models) = scope.generator(bdb)?;
            out.write(&format!(
                "bql_column_mutual_information({}, {}, {}, {}, ",
                gen, models, c0, c1
            ));
            compile_nsamples(bdb, nsamples.as_ref(), ctx, out)?;
            compile_constraints(bdb, scope, given, ctx, out)?;
            out.write(")");
        }
        BqlFn::Correlation { pvalue, columns } => {
            let (c0, c1) = both_columns(bdb, scope, columns, bql)?;
            compile_correlation_fixed(bdb, scope, *pvalue, c0, c1, out)?;
        }
        BqlFn::Predict { column, confidence } => {
            let (gen, models) = scope.generator(bdb)?;
            let colno = scope.colno(bdb, column)?;
            out.write(&format!(
                "bql_predict({}, {}, {}, {}, ",
                gen, models, rowid_exp, colno
            ));
            compile_expression(bdb, confidence, ctx, out)?;
            out.write(")");
        }
    }
    Ok(())
}

fn compile_bql_2row(
    bdb: &BayesDb,
    bql: &BqlFn,
    scope: &ModelScope,
    rowid0_exp: &str,
    rowid1_exp: &str,
    ctx: &BqlCtx,
    out: &mut Output,
) -> Result<()> {
    match bql {
        BqlFn::Similarity { condition: None, context } => {
            let (gen, models) = scope.generator(bdb)?;
            out.write(&format!(
                "bql_row_similarity({}, {}, {}, {}, ",
                gen, models, rowid0_exp, rowid1_exp
            ));
            match context {
                Some(c) => out.write(&scope.colno(bdb, c)?.to_string()),
                None => out.write("NULL"),
            }
            out.write(")");
            Ok(())
        }
        BqlFn::Similarity { condition: Some(_), .. } => Err(BqlError::Schema(
            "SIMILARITY needs no TO clause in a row-pair context".into(),
        )),
        _ => Err(BqlError::WrongContext { operator: bql_op_name(bql), context: ctx.name() }),
    }
}

fn compile_bql_1col(
    bdb: &BayesDb,
    bql: &BqlFn,
    scope: &ModelScope,
    colno_exp: &str,
    ctx: &BqlCtx,
    out: &mut Output,
) -> Result<()> {
    match bql {
        BqlFn::ProbDensityValue { value, given } => {
            let (gen, models) = scope.generator(bdb)?;
            out.write(&format!("bql_pdf_joint({}, {}, 1, {}, ", gen, models, colno_exp));
            compile_expression(bdb, value, ctx, out)?;
            compile_constraints(bdb, scope, given, ctx, out)?;
            out.write(")");
            Ok(())
        }
        BqlFn::DepProb(cols) => {
            let c0 = one_column(bdb, scope, cols, bql)?;
            let (gen, models) = scope.generator(bdb)?;
            out.write(&format!(
                "bql_column_dependence_probability({}, {}, {}, {})",
                gen, models, c0, colno_exp
            ));
            Ok(())
        }
        BqlFn::MutInf { columns, given, nsamples } => {
            let c0 = one_column(bdb, scope, columns, bql)?;
            let (gen, models) = scope.generator(bdb)?;
            out.write(&format!(
                "bql_column_mutual_information({}, {}, {}, {}, ",
                gen, models, c0, colno_exp
            ));
            compile_nsamples(bdb, nsamples.as_ref(), ctx, out)?;
            compile_constraints(bdb, scope, given, ctx, out)?;
            out.write(")");
            Ok(())
        }
        BqlFn::Correlation { pvalue, columns } => {
            let c0 = one_column(bdb, scope, columns, bql)?;
            compile_correlation_case1(bdb, scope, *pvalue, c0, colno_exp, out)
        }
        _ => Err(BqlError::WrongContext { operator: bql_op_name(bql), context: ctx.name() }),
    }
}

fn compile_bql_2col(
    bdb: &BayesDb,
    bql: &BqlFn,
    scope: &ModelScope,
    colno0_exp: &str,
    colno1_exp: &str,
    ctx: &BqlCtx,
    out: &mut Output,
) -> Result<()> {
    match bql {
        BqlFn::DepProb(cols) => {
            no_columns(cols, bql)?;
            let (gen, models) = scope.generator(bdb)?;
            out.write(&format!(
                "bql_column_dependence_probability({}, {}, {}, {})",
                gen, models, colno0_exp, colno1_exp
            ));
            Ok(())
        }
        BqlFn::MutInf { columns, given, nsamples } => {
            no_columns(columns, bql)?;
            let (gen, models) = scope.generator(bdb)?;
            out.write(&format!(
                "bql_column_mutual_information({}, {}, {}, {}, ",
                gen, models, colno0_exp, colno1_exp
            ));
            compile_nsamples(bdb, nsamples.as_ref(), ctx, out)?;
            compile_constraints(bdb, scope, given, ctx, out)?;
            out.write(")");
            Ok(())
        }
        BqlFn::Correlation { pvalue, columns } => {
            no_columns(columns, bql)?;
            compile_correlation_case2(bdb, scope, *pvalue, colno0_exp, colno1_exp, out)
        }
        _ => Err(BqlError::WrongContext { operator: bql_op_name(bql), context: ctx.name() }),
    }
}

fn both_columns(
    bdb: &BayesDb,
    scope: &ModelScope,
    cols: &ColRefs,
    bql: &BqlFn,
) -> Result<(i64, i64)> {
    match cols {
        ColRefs::OfWith(a, b) => Ok((scope.colno(bdb, a)?, scope.colno(bdb, b)?)),
        _ => Err(BqlError::Schema(format!(
            "{} in a row context needs OF <column> WITH <column>",
            bql_op_name(bql)
        ))),
    }
}

fn one_column(bdb: &BayesDb, scope: &ModelScope, cols: &ColRefs, bql: &BqlFn) -> Result<i64> {
    match cols {
        ColRefs::With(c) => scope.colno(bdb, c),
        ColRefs::Implicit => Err(BqlError::Schema(format!(
            "{} in a column context needs WITH <column>",
            bql_op_name(bql)
        ))),
        ColRefs::OfWith(..) => Err(BqlError::Schema(format!(
            "{} in a column context takes at most one column",
            bql_op_name(bql)
        ))),
    }
}

fn no_columns(cols: &ColRefs, bql: &BqlFn) -> Result<()> {
    match cols {
        ColRefs::Implicit => Ok(()),
        _ => Err(BqlError::Schema(format!(
            "{} in a column-pair context takes no columns",
            bql_op_name(bql)
        ))),
    }
}

fn compile_nsamples(
    bdb: &BayesDb,
    nsamples: Option<&Expr>,
    ctx: &BqlCtx,
    out: &mut Output,
) -> Result<()> {
    match nsamples {
        Some(e) => compile_expression(bdb, e, ctx, out),
        None => {
            out.write("NULL");
            Ok(())
        }
    }
}

// ------------------------------------------------------------ correlation

/// Data-level correlation methods by statistical-type class.
fn correlation_method(bdb: &BayesDb, scope: &ModelScope, c0: i64, c1: i64) -> Result<&'static str> {
    fn class(st: &str) -> Option<&'static str> {
        match st {
            "numerical" | "cyclic" | "count" | "magnitude" => Some("num"),
            "nominal" => Some("nom"),
            _ => None,
        }
    }
    let st0 = catalog::variable_stattype(bdb, scope.population_id, c0)?;
    let st1 = catalog::variable_stattype(bdb, scope.population_id, c1)?;
    match (class(&st0), class(&st1)) {
        (Some("num"), Some("num")) => Ok("pearsonr2"),
        (Some("nom"), Some("nom")) => Ok("cramerphi"),
        (Some("nom"), Some("num")) => Ok("anovar2_dc"),
        (Some("num"), Some("nom")) => Ok("anovar2_cd"),
        _ => Err(BqlError::IncompatibleStattypes(st0, st1)),
    }
}

/// Correlation of two compile-time-known variables: an aggregate over
/// the base table's complete pairs.
fn compile_correlation_fixed(
    bdb: &BayesDb,
    scope: &ModelScope,
    pvalue: bool,
    c0: i64,
    c1: i64,
    out: &mut Output,
) -> Result<()> {
    let method = correlation_method(bdb, scope, c0, c1)?;
    let q0 = quote_name(&catalog::variable_name(bdb, scope.population_id, c0)?);
    let q1 = quote_name(&catalog::variable_name(bdb, scope.population_id, c1)?);
    let qt = quote_name(&scope.table);
    let suffix = if pvalue { "_pvalue" } else { "" };
    out.write(&format!(
        "(SELECT bql_correlation_{m}{s}(bql_t.{q0}, bql_t.{q1}) FROM {qt} AS bql_t \
         WHERE bql_t.{q0} IS NOT NULL AND bql_t.{q1} IS NOT NULL)",
        m = method,
        s = suffix,
        q0 = q0,
        q1 = q1,
        qt = qt,
    ));
    Ok(())
}

/// Correlation with one side implied by the column context: the
/// compiler enumerates the population's variables into a CASE, since
/// the data column for a given variable number is only known per
/// branch.
fn compile_correlation_case1(
    bdb: &BayesDb,
    scope: &ModelScope,
    pvalue: bool,
    c0: i64,
    colno_exp: &str,
    out: &mut Output,
) -> Result<()> {
    out.write(&format!("CASE {}", colno_exp));
    for colno in catalog::population_variables(bdb, scope.population_id, None)? {
        out.write(&format!(" WHEN {} THEN ", colno));
        compile_correlation_fixed(bdb, scope, pvalue, c0, colno, out)?;
    }
    out.write(" END");
    Ok(())
}

/// Correlation with both sides implied: nested CASE over variable
/// pairs.
fn compile_correlation_case2(
    bdb: &BayesDb,
    scope: &ModelScope,
    pvalue: bool,
    colno0_exp: &str,
    colno1_exp: &str,
    out: &mut Output,
) -> Result<()> {
    let colnos = catalog::population_variables(bdb, scope.population_id, None)?;
    out.write(&format!("CASE {}", colno0_exp));
    for &c0 in &colnos {
        out.write(&format!(" WHEN {} THEN ", c0));
        compile_correlation_case1(bdb, scope, pvalue, c0, colno1_exp, out)?;
    }
    out.write(" END");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_renumbers_and_reuses_parameter_slots() {
        // Source: ?1 ?2 ?1 — slot for ?1 is reused.
        let values = [Value::Integer(10), Value::Integer(20)];
        let mut out = Output::new(2, Vec::new(), Bindings::Positional(&values));
        out.write("SELECT ");
        out.write_numpar(1).unwrap();
        out.write(", ");
        out.write_numpar(2).unwrap();
        out.write(", ");
        out.write_numpar(1).unwrap();
        assert_eq!(out.sql(), "SELECT ?1, ?2, ?1");
        assert_eq!(
            out.getbindings().unwrap(),
            vec![Value::Integer(10), Value::Integer(20)]
        );
    }

    #[test]
    fn output_reorders_out_of_order_parameters() {
        let values = [Value::Integer(10), Value::Integer(20)];
        let mut out = Output::new(2, Vec::new(), Bindings::Positional(&values));
        out.write_numpar(2).unwrap();
        out.write(" ");
        out.write_numpar(1).unwrap();
        assert_eq!(out.sql(), "?1 ?2");
        assert_eq!(
            out.getbindings().unwrap(),
            vec![Value::Integer(20), Value::Integer(10)]
        );
    }

    #[test]
    fn output_rejects_wrong_binding_counts() {
        let values = [Value::Integer(1)];
        let mut out = Output::new(2, Vec::new(), Bindings::Positional(&values));
        out.write_numpar(1).unwrap();
        assert!(matches!(out.getbindings(), Err(BqlError::Bindings(_))));
    }

    #[test]
    fn named_bindings_match_by_folded_name() {
        let pairs = [("X", Value::Integer(7))];
        let mut out = Output::new(
            1,
            vec![("x".to_string(), 1)],
            Bindings::Named(&pairs),
        );
        out.write_numpar(1).unwrap();
        assert_eq!(out.getbindings().unwrap(), vec![Value::Integer(7)]);
    }

    #[test]
    fn named_bindings_report_unknown_and_missing() {
        let pairs = [("y", Value::Integer(7))];
        let mut out = Output::new(
            1,
            vec![("x".to_string(), 1)],
            Bindings::Named(&pairs),
        );
        out.write_numpar(1).unwrap();
        let err = out.getbindings().unwrap_err();
        assert!(matches!(err, BqlError::Bindings(_)));
    }
}
