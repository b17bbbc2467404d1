//! The diagonal-Gaussian backend: every variable is an independent
//! Gaussian.
//!
//! The simplest backend with a fully closed-form posterior, used as
//! the reference implementation of the protocol and as the test
//! engine.  INITIALIZE fits each model's per-column mean and variance
//! directly from the base table (the prior mean 0, variance 1 when
//! there is no data); ANALYZE refits, which is idempotent.  Because
//! the model declares every pair of variables independent, dependence
//! probability and mutual information between distinct variables are
//! exactly zero.
//!
//! Model parameters persist in `bayesdb_diag_gauss_model` and are
//! rehydrated by `load_generator` when a database is reopened.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

use crate::backend::{Backend, Constraint};
use crate::bayesdb::BayesDb;
use crate::catalog;
use crate::error::{BqlError, Result};

const LOG_2PI: f64 = 1.8378770664093453;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct ColParam {
    mean: f64,
    var: f64,
}

impl Default for ColParam {
    fn default() -> Self {
        // The prior: standard normal.
        ColParam { mean: 0.0, var: 1.0 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct GaussModel {
    params: BTreeMap<i64, ColParam>,
}

pub struct DiagGauss {
    state: Mutex<HashMap<(i64, u64), GaussModel>>,
    rng: Mutex<StdRng>,
}

impl DiagGauss {
    pub fn new() -> DiagGauss {
        DiagGauss::with_seed(0)
    }

    pub fn with_seed(seed: u64) -> DiagGauss {
        DiagGauss {
            state: Mutex::new(HashMap::new()),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, HashMap<(i64, u64), GaussModel>>> {
        self.state
            .lock()
            .map_err(|_| BqlError::Internal("diag_gauss state lock poisoned".into()))
    }

    fn model(&self, generator_id: i64, modelno: u64) -> Result<GaussModel> {
        self.state()?
            .get(&(generator_id, modelno))
            .cloned()
            .ok_or_else(|| BqlError::Backend {
                backend: "diag_gauss".into(),
                reason: format!("model {} of generator {} is not loaded", modelno, generator_id),
            })
    }

    fn param(&self, model: &GaussModel, colno: i64) -> Result<ColParam> {
        model.params.get(&colno).copied().ok_or_else(|| BqlError::Backend {
            backend: "diag_gauss".into(),
            reason: format!("no such variable: {}", colno),
        })
    }

    fn gauss(&self) -> Result<f64> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| BqlError::Internal("diag_gauss rng lock poisoned".into()))?;
        let u1: f64 = rng.gen::<f64>().max(1e-300);
        let u2: f64 = rng.gen();
        Ok((-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos())
    }

    /// Fit per-column mean and variance from the base table's
    /// non-NULL data; prior where there is none.  Latent variables
    /// (negative column numbers) have no data and keep the prior.
    fn fit(&self, bdb: &BayesDb, generator_id: i64) -> Result<GaussModel> {
        let population_id = catalog::generator_population(bdb, generator_id)?;
        let tabname = catalog::population_table_by_id(bdb, population_id)?;
        let qt = catalog::quote_name(&tabname);
        let mut params = BTreeMap::new();
        for colno in catalog::population_variables(bdb, population_id, Some(generator_id))? {
            if colno < 0 {
                params.insert(colno, ColParam::default());
                continue;
            }
            let name = catalog::variable_name(bdb, population_id, colno)?;
            let qc = catalog::quote_name(&name);
            let sql = format!(
                "SELECT AVG({0}), AVG({0} * {0}), COUNT({0}) FROM {1} WHERE {0} IS NOT NULL",
                qc, qt
            );
            let (mean, meansq, count): (Option<f64>, Option<f64>, i64) =
                bdb.conn.query_row(&sql, [], |r| {
                    Ok((r.get(0)?, r.get(1)?, r.get(2)?))
                })?;
            let param = match (mean, meansq, count) {
                (Some(mean), Some(meansq), n) if n > 0 => {
                    let var = (meansq - mean * mean).max(1e-6);
                    ColParam { mean, var }
                }
                _ => ColParam::default(),
            };
            params.insert(colno, param);
        }
        Ok(GaussModel { params })
    }

    fn persist(&self, bdb: &BayesDb, generator_id: i64, modelno: u64, model: &GaussModel) -> Result<()> {
        let blob = serde_json::to_string(model)
            .map_err(|e| BqlError::Internal(format!("diag_gauss params encode: {}", e)))?;
        bdb.conn.execute(
            "INSERT OR REPLACE INTO bayesdb_diag_gauss_model
                    (generator_id, modelno, params)
                VALUES (?, ?, ?)",
            rusqlite::params![generator_id, modelno as i64, blob],
        )?;
        Ok(())
    }

    fn err(&self, reason: impl Into<String>) -> BqlError {
        BqlError::Backend { backend: "diag_gauss".into(), reason: reason.into() }
    }
}

impl Default for DiagGauss {
    fn default() -> Self {
        DiagGauss::new()
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(i) => Some(*i as f64),
        Value::Real(f) => Some(*f),
        _ => None,
    }
}

fn numerical_class(stattype: &str) -> bool {
    matches!(stattype, "numerical" | "cyclic" | "count" | "magnitude")
}

fn logpdf_gaussian(x: f64, mean: f64, var: f64) -> f64 {
    let dev = x - mean;
    -0.5 * (LOG_2PI + var.ln()) - 0.5 * dev * dev / var
}

impl Backend for DiagGauss {
    fn name(&self) -> &str {
        "diag_gauss"
    }

    fn register(&self, bdb: &BayesDb) -> Result<()> {
        bdb.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS bayesdb_diag_gauss_model (
                generator_id    INTEGER NOT NULL,
                modelno         INTEGER NOT NULL,
                params          TEXT NOT NULL,
                PRIMARY KEY (generator_id, modelno)
            )",
        )?;
        Ok(())
    }

    fn create_generator(&self, bdb: &BayesDb, generator_id: i64, schema: &str) -> Result<()> {
        if !schema.trim().is_empty() {
            return Err(self.err(format!("takes no schema, got: {:?}", schema)));
        }
        let population_id = catalog::generator_population(bdb, generator_id)?;
        for colno in catalog::population_variables(bdb, population_id, Some(generator_id))? {
            let st = catalog::variable_stattype(bdb, population_id, colno)?;
            if !numerical_class(&st) {
                let name = catalog::variable_name(bdb, population_id, colno)?;
                return Err(self.err(format!(
                    "models numerical variables only; {} is {}",
                    name, st
                )));
            }
        }
        Ok(())
    }

    fn drop_generator(&self, bdb: &BayesDb, generator_id: i64) -> Result<()> {
        bdb.conn.execute(
            "DELETE FROM bayesdb_diag_gauss_model WHERE generator_id = ?",
            [generator_id],
        )?;
        self.state()?.retain(|(gen, _), _| *gen != generator_id);
        Ok(())
    }

    fn load_generator(&self, bdb: &BayesDb, generator_id: i64) -> Result<()> {
        let mut stmt = bdb.conn.prepare(
            "SELECT modelno, params FROM bayesdb_diag_gauss_model
                WHERE generator_id = ?",
        )?;
        let rows = stmt
            .query_map([generator_id], |r| {
                Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut state = self.state()?;
        state.retain(|(gen, _), _| *gen != generator_id);
        for (modelno, blob) in rows {
            let model: GaussModel = serde_json::from_str(&blob)
                .map_err(|e| self.err(format!("corrupt model parameters: {}", e)))?;
            state.insert((generator_id, modelno as u64), model);
        }
        Ok(())
    }

    fn add_variable(&self, bdb: &BayesDb, generator_id: i64, colno: i64, stattype: &str) -> Result<()> {
        if !numerical_class(stattype) {
            return Err(self.err(format!(
                "models numerical variables only; cannot add a {} variable",
                stattype
            )));
        }
        let refit = self.fit(bdb, generator_id)?;
        let modelnos: Vec<u64> = {
            let state = self.state()?;
            state
                .keys()
                .filter(|(gen, _)| *gen == generator_id)
                .map(|(_, m)| *m)
                .collect()
        };
        for modelno in modelnos {
            let snapshot = {
                let mut state = self.state()?;
                state.get_mut(&(generator_id, modelno)).map(|model| {
                    let param = refit.params.get(&colno).copied().unwrap_or_default();
                    model.params.insert(colno, param);
                    model.clone()
                })
            };
            if let Some(model) = snapshot {
                self.persist(bdb, generator_id, modelno, &model)?;
            }
        }
        Ok(())
    }

    fn initialize_models(&self, bdb: &BayesDb, generator_id: i64, modelnos: &[u64]) -> Result<()> {
        let fitted = self.fit(bdb, generator_id)?;
        for &modelno in modelnos {
            self.state()?.insert((generator_id, modelno), fitted.clone());
            self.persist(bdb, generator_id, modelno, &fitted)?;
        }
        Ok(())
    }

    fn drop_models(&self, bdb: &BayesDb, generator_id: i64, modelnos: &[u64]) -> Result<()> {
        for &modelno in modelnos {
            bdb.conn.execute(
                "DELETE FROM bayesdb_diag_gauss_model
                    WHERE generator_id = ? AND modelno = ?",
                rusqlite::params![generator_id, modelno as i64],
            )?;
            self.state()?.remove(&(generator_id, modelno));
        }
        Ok(())
    }

    fn analyze_models(
        &self,
        bdb: &BayesDb,
        generator_id: i64,
        modelnos: &[u64],
        iterations: u64,
        program: Option<&str>,
    ) -> Result<()> {
        if let Some(program) = program {
            for token in program.split_whitespace() {
                match catalog::casefold(token).as_str() {
                    "optimized" | "quiet" => {}
                    other => {
                        return Err(self.err(format!(
                            "unknown analysis directive: {}",
                            other
                        )))
                    }
                }
            }
        }
        if iterations == 0 {
            return Ok(());
        }
        // The posterior is closed-form; every iteration refits.
        let fitted = self.fit(bdb, generator_id)?;
        for &modelno in modelnos {
            if !self.state()?.contains_key(&(generator_id, modelno)) {
                return Err(self.err(format!("no such model: {}", modelno)));
            }
            self.state()?.insert((generator_id, modelno), fitted.clone());
            self.persist(bdb, generator_id, modelno, &fitted)?;
        }
        Ok(())
    }

    fn logpdf_joint(
        &self,
        generator_id: i64,
        modelno: u64,
        targets: &[Constraint],
        _constraints: &[Constraint],
    ) -> Result<f64> {
        // Independence: constraints never move the marginals.
        let model = self.model(generator_id, modelno)?;
        let mut total = 0.0;
        for (colno, value) in targets {
            let param = self.param(&model, *colno)?;
            match value {
                Value::Null => return Ok(f64::NEG_INFINITY),
                v => match numeric(v) {
                    Some(x) => total += logpdf_gaussian(x, param.mean, param.var),
                    None => {
                        return Err(self.err(format!("non-numeric value: {:?}", v)))
                    }
                },
            }
        }
        Ok(total)
    }

    fn simulate_joint(
        &self,
        generator_id: i64,
        modelno: u64,
        targets: &[i64],
        _constraints: &[Constraint],
        n_samples: usize,
    ) -> Result<Vec<Vec<Value>>> {
        let model = self.model(generator_id, modelno)?;
        let mut rows = Vec::with_capacity(n_samples);
        for _ in 0..n_samples {
            let mut row = Vec::with_capacity(targets.len());
            for colno in targets {
                let param = self.param(&model, *colno)?;
                row.push(Value::Real(param.mean + param.var.sqrt() * self.gauss()?));
            }
            rows.push(row);
        }
        Ok(rows)
    }

    fn column_dependence_probability(
        &self,
        _generator_id: i64,
        _modelno: u64,
        colno0: i64,
        colno1: i64,
    ) -> Result<f64> {
        Ok(if colno0 == colno1 { 1.0 } else { 0.0 })
    }

    fn column_mutual_information(
        &self,
        generator_id: i64,
        modelno: u64,
        colno0: i64,
        colno1: i64,
        _constraints: &[Constraint],
        _nsamples: Option<u64>,
    ) -> Result<f64> {
        if colno0 != colno1 {
            return Ok(0.0);
        }
        // Self-information: the differential entropy of the marginal,
        // in bits, clamped nonnegative.
        let model = self.model(generator_id, modelno)?;
        let param = self.param(&model, colno0)?;
        let nats = 0.5 * (LOG_2PI + 1.0 + param.var.ln());
        Ok((nats / std::f64::consts::LN_2).max(0.0))
    }

    fn row_similarity(
        &self,
        _generator_id: i64,
        _modelno: u64,
        rowid0: i64,
        rowid1: i64,
        _context: Option<i64>,
    ) -> Result<f64> {
        // Under full independence distinct rows share no structure.
        Ok(if rowid0 == rowid1 { 1.0 } else { 0.0 })
    }

    fn predict_confidence(
        &self,
        generator_id: i64,
        modelnos: &[u64],
        _rowid: i64,
        colno: i64,
    ) -> Result<(Value, f64)> {
        if modelnos.is_empty() {
            return Err(self.err("no models to predict from"));
        }
        // Mixture over models: mean of means, with the pooled spread
        // driving the confidence.
        let mut means = Vec::with_capacity(modelnos.len());
        let mut vars = Vec::with_capacity(modelnos.len());
        for &modelno in modelnos {
            let model = self.model(generator_id, modelno)?;
            let param = self.param(&model, colno)?;
            means.push(param.mean);
            vars.push(param.var);
        }
        let k = modelnos.len() as f64;
        let mix_mean = means.iter().sum::<f64>() / k;
        let second_moment = means
            .iter()
            .zip(&vars)
            .map(|(m, v)| v + m * m)
            .sum::<f64>()
            / k;
        let mix_var = (second_moment - mix_mean * mix_mean).max(0.0);
        // Normal IQR is 1.349 σ; squash into (0, 1].
        let iqr = 1.349 * mix_var.sqrt();
        let confidence = 1.0 / (1.0 + iqr);
        Ok((Value::Real(mix_mean), confidence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gaussian_logpdf_matches_closed_form() {
        // N(0, 1) at 0 is 1/sqrt(2π).
        let expected = -(0.5 * LOG_2PI);
        assert!((logpdf_gaussian(0.0, 0.0, 1.0) - expected).abs() < 1e-12);
        // Shifting by one standard deviation subtracts 1/2.
        let shifted = logpdf_gaussian(1.0, 0.0, 1.0);
        assert!((shifted - (expected - 0.5)).abs() < 1e-12);
    }

    #[test]
    fn sampler_is_roughly_standard_normal() {
        let backend = DiagGauss::with_seed(7);
        let n = 4000;
        let mut sum = 0.0;
        let mut sumsq = 0.0;
        for _ in 0..n {
            let z = backend.gauss().unwrap();
            sum += z;
            sumsq += z * z;
        }
        let mean = sum / n as f64;
        let var = sumsq / n as f64 - mean * mean;
        assert!(mean.abs() < 0.1, "mean = {}", mean);
        assert!((var - 1.0).abs() < 0.15, "var = {}", var);
    }
}
