//! Model-operator functions registered with the SQL engine.
//!
//! These are thin shims: decode the compiler-inserted arguments,
//! find the backend for the generator through the shared operator
//! context, apply the model-set reduction, return the number.  The
//! reductions: densities and probabilities average across models in
//! probability space (log-mean-exp); dependence, similarity and
//! mutual information average arithmetically; prediction pools the
//! predictive sample across models inside the backend.
//!
//! The correlation estimators are SQL aggregates over the base
//! table's data; the compiler picks the method from the statistical
//! types and arranges the argument order.

use std::sync::Arc;

use rusqlite::functions::{Aggregate, Context, FunctionFlags};
use rusqlite::types::Value;
use rusqlite::Connection;

use crate::backend::{logmeanexp, Constraint, OpContext};
use crate::error::{BqlError, Result};
use crate::stats;

pub(crate) fn register_functions(conn: &Connection, ops: &Arc<OpContext>) -> rusqlite::Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8;

    let o = Arc::clone(ops);
    conn.create_scalar_function("bql_pdf_joint", -1, flags, move |ctx| {
        pdf_joint(&o, ctx).map_err(BqlError::into_sqlite)
    })?;

    let o = Arc::clone(ops);
    conn.create_scalar_function("bql_row_predictive_probability", -1, flags, move |ctx| {
        row_predictive_probability(&o, ctx).map_err(BqlError::into_sqlite)
    })?;

    let o = Arc::clone(ops);
    conn.create_scalar_function("bql_row_similarity", 5, flags, move |ctx| {
        row_similarity(&o, ctx).map_err(BqlError::into_sqlite)
    })?;

    let o = Arc::clone(ops);
    conn.create_scalar_function(
        "bql_column_dependence_probability",
        4,
        flags,
        move |ctx| column_dependence_probability(&o, ctx).map_err(BqlError::into_sqlite),
    )?;

    let o = Arc::clone(ops);
    conn.create_scalar_function("bql_column_mutual_information", -1, flags, move |ctx| {
        column_mutual_information(&o, ctx).map_err(BqlError::into_sqlite)
    })?;

    let o = Arc::clone(ops);
    conn.create_scalar_function("bql_predict", 5, flags, move |ctx| {
        predict(&o, ctx).map_err(BqlError::into_sqlite)
    })?;

    let o = Arc::clone(ops);
    conn.create_scalar_function("bql_predict_confidence", 4, flags, move |ctx| {
        predict_confidence(&o, ctx).map_err(BqlError::into_sqlite)
    })?;

    let o = Arc::clone(ops);
    conn.create_scalar_function("bql_infer", 6, flags, move |ctx| {
        infer(&o, ctx).map_err(BqlError::into_sqlite)
    })?;

    conn.create_scalar_function("bql_json_get", 2, flags, |ctx| {
        json_get(ctx).map_err(BqlError::into_sqlite)
    })?;

    conn.create_aggregate_function(
        "bql_correlation_pearsonr2",
        2,
        flags,
        PearsonAgg { pvalue: false },
    )?;
    conn.create_aggregate_function(
        "bql_correlation_pearsonr2_pvalue",
        2,
        flags,
        PearsonAgg { pvalue: true },
    )?;
    conn.create_aggregate_function(
        "bql_correlation_cramerphi",
        2,
        flags,
        CramerAgg { pvalue: false },
    )?;
    conn.create_aggregate_function(
        "bql_correlation_cramerphi_pvalue",
        2,
        flags,
        CramerAgg { pvalue: true },
    )?;
    conn.create_aggregate_function(
        "bql_correlation_anovar2_dc",
        2,
        flags,
        AnovaAgg { swapped: false, pvalue: false },
    )?;
    conn.create_aggregate_function(
        "bql_correlation_anovar2_dc_pvalue",
        2,
        flags,
        AnovaAgg { swapped: false, pvalue: true },
    )?;
    conn.create_aggregate_function(
        "bql_correlation_anovar2_cd",
        2,
        flags,
        AnovaAgg { swapped: true, pvalue: false },
    )?;
    conn.create_aggregate_function(
        "bql_correlation_anovar2_cd_pvalue",
        2,
        flags,
        AnovaAgg { swapped: true, pvalue: true },
    )?;

    Ok(())
}

// -------------------------------------------------------- arg decoding

fn parse_models(text: &str) -> Result<Vec<u64>> {
    if text.is_empty() {
        return Ok(Vec::new());
    }
    text.split(',')
        .map(|t| {
            t.parse::<u64>()
                .map_err(|_| BqlError::Internal(format!("bad model list: {:?}", text)))
        })
        .collect()
}

fn models_arg(ctx: &Context<'_>, idx: usize) -> Result<Vec<u64>> {
    let text: String = ctx.get(idx)?;
    let models = parse_models(&text)?;
    if models.is_empty() {
        return Err(BqlError::Schema(
            "generator has no models; INITIALIZE them first".into(),
        ));
    }
    Ok(models)
}

/// Decode trailing `colno, value` pairs starting at `idx`.
fn pairs_arg(ctx: &Context<'_>, idx: usize) -> Result<Vec<Constraint>> {
    let n = ctx.len();
    if n < idx {
        return Err(BqlError::Internal("too few operator arguments".into()));
    }
    if (n - idx) % 2 != 0 {
        return Err(BqlError::Internal("odd constraint argument list".into()));
    }
    let mut pairs = Vec::with_capacity((n - idx) / 2);
    let mut i = idx;
    while i < n {
        let colno: i64 = ctx.get(i)?;
        let value: Value = ctx.get(i + 1)?;
        pairs.push((colno, value));
        i += 2;
    }
    Ok(pairs)
}

// ------------------------------------------------------------ operators

fn pdf_joint(ops: &OpContext, ctx: &Context<'_>) -> Result<f64> {
    let gen: i64 = ctx.get(0)?;
    let models = models_arg(ctx, 1)?;
    let ntargets: i64 = ctx.get(2)?;
    let pairs = pairs_arg(ctx, 3)?;
    if ntargets < 0 || (ntargets as usize) > pairs.len() {
        return Err(BqlError::Internal("bad target count".into()));
    }
    let (targets, constraints) = pairs.split_at(ntargets as usize);
    let backend = ops.backend_for_generator(gen)?;
    let mut logs = Vec::with_capacity(models.len());
    for &m in &models {
        logs.push(backend.logpdf_joint(gen, m, targets, constraints)?);
    }
    Ok(logmeanexp(&logs).exp())
}

fn row_predictive_probability(ops: &OpContext, ctx: &Context<'_>) -> Result<Option<f64>> {
    let gen: i64 = ctx.get(0)?;
    let models = models_arg(ctx, 1)?;
    let rowid: i64 = ctx.get(2)?;
    let colno: i64 = ctx.get(3)?;
    let value: Value = ctx.get(4)?;
    if value == Value::Null {
        return Ok(None);
    }
    let constraints = pairs_arg(ctx, 5)?;
    let backend = ops.backend_for_generator(gen)?;
    let mut logs = Vec::with_capacity(models.len());
    for &m in &models {
        logs.push(backend.row_predictive_probability(gen, m, rowid, colno, &value, &constraints)?);
    }
    Ok(Some(logmeanexp(&logs).exp()))
}

fn row_similarity(ops: &OpContext, ctx: &Context<'_>) -> Result<f64> {
    let gen: i64 = ctx.get(0)?;
    let models = models_arg(ctx, 1)?;
    let rowid0: i64 = ctx.get(2)?;
    let rowid1: Option<i64> = ctx.get(3)?;
    let context: Option<i64> = ctx.get(4)?;
    let rowid1 = rowid1.ok_or(BqlError::NoTargetRow)?;
    let backend = ops.backend_for_generator(gen)?;
    let mut total = 0.0;
    for &m in &models {
        total += backend.row_similarity(gen, m, rowid0, rowid1, context)?;
    }
    Ok(total / models.len() as f64)
}

fn column_dependence_probability(ops: &OpContext, ctx: &Context<'_>) -> Result<f64> {
    let gen: i64 = ctx.get(0)?;
    let models = models_arg(ctx, 1)?;
    let colno0: i64 = ctx.get(2)?;
    let colno1: i64 = ctx.get(3)?;
    let backend = ops.backend_for_generator(gen)?;
    let mut total = 0.0;
    for &m in &models {
        total += backend.column_dependence_probability(gen, m, colno0, colno1)?;
    }
    Ok(total / models.len() as f64)
}

fn column_mutual_information(ops: &OpContext, ctx: &Context<'_>) -> Result<f64> {
    let gen: i64 = ctx.get(0)?;
    let models = models_arg(ctx, 1)?;
    let colno0: i64 = ctx.get(2)?;
    let colno1: i64 = ctx.get(3)?;
    let nsamples: Option<i64> = ctx.get(4)?;
    let constraints = pairs_arg(ctx, 5)?;
    let nsamples = match nsamples {
        Some(n) if n <= 0 => {
            return Err(BqlError::Schema("USING SAMPLES needs a positive count".into()))
        }
        Some(n) => Some(n as u64),
        None => None,
    };
    let backend = ops.backend_for_generator(gen)?;
    let mut total = 0.0;
    for &m in &models {
        total +=
            backend.column_mutual_information(gen, m, colno0, colno1, &constraints, nsamples)?;
    }
    Ok(total / models.len() as f64)
}

fn predict(ops: &OpContext, ctx: &Context<'_>) -> Result<Value> {
    let gen: i64 = ctx.get(0)?;
    let models = models_arg(ctx, 1)?;
    let rowid: i64 = ctx.get(2)?;
    let colno: i64 = ctx.get(3)?;
    let threshold: f64 = ctx.get(4)?;
    let backend = ops.backend_for_generator(gen)?;
    let (value, confidence) = backend.predict_confidence(gen, &models, rowid, colno)?;
    if confidence >= threshold {
        Ok(value)
    } else {
        Ok(Value::Null)
    }
}

fn predict_confidence(ops: &OpContext, ctx: &Context<'_>) -> Result<String> {
    let gen: i64 = ctx.get(0)?;
    let models = models_arg(ctx, 1)?;
    let rowid: i64 = ctx.get(2)?;
    let colno: i64 = ctx.get(3)?;
    let backend = ops.backend_for_generator(gen)?;
    let (value, confidence) = backend.predict_confidence(gen, &models, rowid, colno)?;
    let doc = serde_json::json!({
        "value": value_to_json(&value)?,
        "confidence": confidence,
    });
    Ok(doc.to_string())
}

fn infer(ops: &OpContext, ctx: &Context<'_>) -> Result<Value> {
    let stored: Value = ctx.get(4)?;
    if stored != Value::Null {
        return Ok(stored);
    }
    let gen: i64 = ctx.get(0)?;
    let models = models_arg(ctx, 1)?;
    let rowid: i64 = ctx.get(2)?;
    let colno: i64 = ctx.get(3)?;
    let threshold: f64 = ctx.get(5)?;
    let backend = ops.backend_for_generator(gen)?;
    let (value, confidence) = backend.predict_confidence(gen, &models, rowid, colno)?;
    if confidence >= threshold {
        Ok(value)
    } else {
        Ok(Value::Null)
    }
}

fn json_get(ctx: &Context<'_>) -> Result<Value> {
    let doc: String = ctx.get(0)?;
    let key: String = ctx.get(1)?;
    let parsed: serde_json::Value = serde_json::from_str(&doc)
        .map_err(|e| BqlError::Internal(format!("bad JSON from predict: {}", e)))?;
    match parsed.get(&key) {
        None | Some(serde_json::Value::Null) => Ok(Value::Null),
        Some(serde_json::Value::Bool(b)) => Ok(Value::Integer(*b as i64)),
        Some(serde_json::Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Integer(i))
            } else {
                Ok(Value::Real(n.as_f64().unwrap_or(f64::NAN)))
            }
        }
        Some(serde_json::Value::String(s)) => Ok(Value::Text(s.clone())),
        Some(other) => Err(BqlError::Internal(format!(
            "unexpected JSON value from predict: {}",
            other
        ))),
    }
}

fn value_to_json(value: &Value) -> Result<serde_json::Value> {
    Ok(match value {
        Value::Null => serde_json::Value::Null,
        Value::Integer(i) => serde_json::Value::from(*i),
        Value::Real(f) => serde_json::Value::from(*f),
        Value::Text(s) => serde_json::Value::from(s.as_str()),
        Value::Blob(_) => {
            return Err(BqlError::Unsupported("blob values in predictions".into()))
        }
    })
}

// ----------------------------------------------------- correlation aggs

/// Stringify a nominal cell so mixed-affinity columns group sanely.
fn nominal_key(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Integer(i) => Some(i.to_string()),
        Value::Real(f) => Some(format!("{:?}", f)),
        Value::Text(s) => Some(s),
        Value::Blob(b) => Some(format!("{:x?}", b)),
    }
}

struct PearsonAgg {
    pvalue: bool,
}

impl Aggregate<Vec<(f64, f64)>, Option<f64>> for PearsonAgg {
    fn init(&self, _: &mut Context<'_>) -> rusqlite::Result<Vec<(f64, f64)>> {
        Ok(Vec::new())
    }

    fn step(&self, ctx: &mut Context<'_>, acc: &mut Vec<(f64, f64)>) -> rusqlite::Result<()> {
        let x: Option<f64> = ctx.get(0)?;
        let y: Option<f64> = ctx.get(1)?;
        if let (Some(x), Some(y)) = (x, y) {
            acc.push((x, y));
        }
        Ok(())
    }

    fn finalize(
        &self,
        _: &mut Context<'_>,
        acc: Option<Vec<(f64, f64)>>,
    ) -> rusqlite::Result<Option<f64>> {
        let acc = acc.unwrap_or_default();
        let xs: Vec<f64> = acc.iter().map(|(x, _)| *x).collect();
        let ys: Vec<f64> = acc.iter().map(|(_, y)| *y).collect();
        Ok(if self.pvalue {
            stats::pearsonr2_pvalue(&xs, &ys)
        } else {
            stats::pearsonr2(&xs, &ys)
        })
    }
}

struct CramerAgg {
    pvalue: bool,
}

impl Aggregate<Vec<(String, String)>, Option<f64>> for CramerAgg {
    fn init(&self, _: &mut Context<'_>) -> rusqlite::Result<Vec<(String, String)>> {
        Ok(Vec::new())
    }

    fn step(&self, ctx: &mut Context<'_>, acc: &mut Vec<(String, String)>) -> rusqlite::Result<()> {
        let x = nominal_key(ctx.get(0)?);
        let y = nominal_key(ctx.get(1)?);
        if let (Some(x), Some(y)) = (x, y) {
            acc.push((x, y));
        }
        Ok(())
    }

    fn finalize(
        &self,
        _: &mut Context<'_>,
        acc: Option<Vec<(String, String)>>,
    ) -> rusqlite::Result<Option<f64>> {
        let acc = acc.unwrap_or_default();
        let xs: Vec<String> = acc.iter().map(|(x, _)| x.clone()).collect();
        let ys: Vec<String> = acc.iter().map(|(_, y)| y.clone()).collect();
        Ok(if self.pvalue {
            stats::cramerphi_pvalue(&xs, &ys)
        } else {
            stats::cramerphi(&xs, &ys)
        })
    }
}

/// One-way ANOVA over (discrete, continuous) pairs; `swapped` when
/// the query's argument order is (continuous, discrete).
struct AnovaAgg {
    swapped: bool,
    pvalue: bool,
}

impl Aggregate<Vec<(String, f64)>, Option<f64>> for AnovaAgg {
    fn init(&self, _: &mut Context<'_>) -> rusqlite::Result<Vec<(String, f64)>> {
        Ok(Vec::new())
    }

    fn step(&self, ctx: &mut Context<'_>, acc: &mut Vec<(String, f64)>) -> rusqlite::Result<()> {
        let (g_idx, y_idx) = if self.swapped { (1, 0) } else { (0, 1) };
        let group = nominal_key(ctx.get(g_idx)?);
        let y: Option<f64> = ctx.get(y_idx)?;
        if let (Some(group), Some(y)) = (group, y) {
            acc.push((group, y));
        }
        Ok(())
    }

    fn finalize(
        &self,
        _: &mut Context<'_>,
        acc: Option<Vec<(String, f64)>>,
    ) -> rusqlite::Result<Option<f64>> {
        let acc = acc.unwrap_or_default();
        let groups: Vec<String> = acc.iter().map(|(g, _)| g.clone()).collect();
        let ys: Vec<f64> = acc.iter().map(|(_, y)| *y).collect();
        Ok(if self.pvalue {
            stats::anovar2_pvalue(&groups, &ys)
        } else {
            stats::anovar2(&groups, &ys)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_list_parses() {
        assert_eq!(parse_models("").unwrap(), Vec::<u64>::new());
        assert_eq!(parse_models("0").unwrap(), vec![0]);
        assert_eq!(parse_models("0,1,5").unwrap(), vec![0, 1, 5]);
        assert!(parse_models("0,x").is_err());
    }

    #[test]
    fn json_round_trip_for_predictions() {
        let doc = serde_json::json!({
            "value": value_to_json(&Value::Real(1.5)).unwrap(),
            "confidence": 0.25,
        })
        .to_string();
        let parsed: serde_json::Value = serde_json::from_str(&doc).unwrap();
        assert_eq!(parsed["value"], serde_json::json!(1.5));
        assert_eq!(parsed["confidence"], serde_json::json!(0.25));
    }
}
