//! Backend protocol: the boundary between BQL and statistical engines.
//!
//! A backend implements two halves.  The catalog half runs in the
//! driver with a `&BayesDb` in hand: generator lifecycle, model
//! lifecycle, analysis.  The model half runs inside SQL user-defined
//! functions with no database handle at all; it operates on model
//! state the backend holds itself.  That split is what lets the UDF
//! closures be `Send` without smuggling a connection across the
//! boundary.
//!
//! All methods are called from a single logical thread per
//! connection; backends may parallelize internally but must not touch
//! connection state from other threads.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rusqlite::types::Value;

use crate::bayesdb::BayesDb;
use crate::error::{BqlError, Result};

/// One `(variable number, value)` pair, used for both targets and
/// conditioning constraints.
pub type Constraint = (i64, Value);

pub trait Backend: Send + Sync {
    /// Name used in `CREATE GENERATOR … USING <name>`.
    fn name(&self) -> &str;

    /// Version recorded in `bayesdb_backend` at registration.
    fn version(&self) -> i64 {
        1
    }

    /// Install backend-owned tables.  Called once per database at
    /// registration; must be idempotent.
    fn register(&self, bdb: &BayesDb) -> Result<()>;

    /// Interpret the opaque schema blob of `CREATE GENERATOR`.
    fn create_generator(&self, bdb: &BayesDb, generator_id: i64, schema: &str) -> Result<()>;

    /// Remove backend-owned records for a generator.
    fn drop_generator(&self, bdb: &BayesDb, generator_id: i64) -> Result<()>;

    /// Rehydrate model state for a generator, e.g. after reopening a
    /// database.  Called lazily, before the first query that touches
    /// the generator.
    fn load_generator(&self, bdb: &BayesDb, generator_id: i64) -> Result<()>;

    /// A variable was added to the population of an existing
    /// generator.
    fn add_variable(&self, _bdb: &BayesDb, _generator_id: i64, _colno: i64, _stattype: &str) -> Result<()> {
        Err(self.error("backend does not support adding variables"))
    }

    fn initialize_models(&self, bdb: &BayesDb, generator_id: i64, modelnos: &[u64]) -> Result<()>;

    fn drop_models(&self, bdb: &BayesDb, generator_id: i64, modelnos: &[u64]) -> Result<()>;

    /// Run `iterations` rounds of analysis on the given models; one
    /// checkpoint chunk of an ANALYZE budget.  `program` carries the
    /// backend-specific sub-clauses verbatim; the backend validates
    /// them.
    fn analyze_models(
        &self,
        bdb: &BayesDb,
        generator_id: i64,
        modelnos: &[u64],
        iterations: u64,
        program: Option<&str>,
    ) -> Result<()>;

    /// Nominal code ↔ label mapping for a variable, if any.
    fn column_value_map(&self, _bdb: &BayesDb, _generator_id: i64, _colno: i64) -> Result<Vec<(i64, String)>> {
        Ok(Vec::new())
    }

    // ---- model half: no database handle below this line ----

    /// Log density of `targets` given `constraints` under one model,
    /// marginalizing everything unmentioned.  May be `-inf`.
    fn logpdf_joint(
        &self,
        generator_id: i64,
        modelno: u64,
        targets: &[Constraint],
        constraints: &[Constraint],
    ) -> Result<f64>;

    /// Draw `n_samples` joint realizations of `targets` given
    /// `constraints` from one model.
    fn simulate_joint(
        &self,
        generator_id: i64,
        modelno: u64,
        targets: &[i64],
        constraints: &[Constraint],
        n_samples: usize,
    ) -> Result<Vec<Vec<Value>>>;

    /// Probability in [0, 1] that two variables are dependent.
    fn column_dependence_probability(
        &self,
        generator_id: i64,
        modelno: u64,
        colno0: i64,
        colno1: i64,
    ) -> Result<f64>;

    /// Mutual information in bits, Monte Carlo estimated with
    /// `nsamples` draws where the backend is approximate.
    fn column_mutual_information(
        &self,
        generator_id: i64,
        modelno: u64,
        colno0: i64,
        colno1: i64,
        constraints: &[Constraint],
        nsamples: Option<u64>,
    ) -> Result<f64>;

    /// Nonnegative, backend-defined similarity between two rows,
    /// optionally in the context of one variable.
    fn row_similarity(
        &self,
        generator_id: i64,
        modelno: u64,
        rowid0: i64,
        rowid1: i64,
        context: Option<i64>,
    ) -> Result<f64>;

    /// Log density of the stored value of a variable at a row.
    fn row_predictive_probability(
        &self,
        generator_id: i64,
        modelno: u64,
        rowid: i64,
        colno: i64,
        value: &Value,
        constraints: &[Constraint],
    ) -> Result<f64> {
        let _ = rowid;
        self.logpdf_joint(generator_id, modelno, &[(colno, value.clone())], constraints)
    }

    /// Predict a value for a variable at a row, with a confidence in
    /// [0, 1], pooling the predictive distribution over `modelnos`.
    fn predict_confidence(
        &self,
        generator_id: i64,
        modelnos: &[u64],
        rowid: i64,
        colno: i64,
    ) -> Result<(Value, f64)>;

    /// Uniform error constructor preserving backend identity.
    fn error(&self, reason: &str) -> BqlError {
        BqlError::Backend { backend: self.name().to_string(), reason: reason.to_string() }
    }
}

/// State shared between a `BayesDb` handle and the operator functions
/// registered with its SQLite connection.  Everything in here is
/// thread-safe so the UDF closures satisfy rusqlite's `Send` bound.
pub struct OpContext {
    backends: Mutex<HashMap<String, Arc<dyn Backend>>>,
    generators: Mutex<HashMap<i64, Arc<dyn Backend>>>,
    pub(crate) interrupted: AtomicBool,
}

impl OpContext {
    pub(crate) fn new() -> Self {
        OpContext {
            backends: Mutex::new(HashMap::new()),
            generators: Mutex::new(HashMap::new()),
            interrupted: AtomicBool::new(false),
        }
    }

    pub(crate) fn add_backend(&self, backend: Arc<dyn Backend>) -> Result<()> {
        let name = backend.name().to_lowercase();
        let mut map = self.backends.lock().map_err(poisoned)?;
        if map.contains_key(&name) {
            return Err(BqlError::AlreadyExists { kind: "backend", name });
        }
        map.insert(name, backend);
        Ok(())
    }

    pub fn backend_by_name(&self, name: &str) -> Result<Arc<dyn Backend>> {
        let map = self.backends.lock().map_err(poisoned)?;
        map.get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| BqlError::NoSuchBackend(name.to_string()))
    }

    /// Record which backend serves a generator; operator functions
    /// look generators up here.
    pub(crate) fn bind_generator(&self, generator_id: i64, backend: Arc<dyn Backend>) -> Result<()> {
        let mut map = self.generators.lock().map_err(poisoned)?;
        map.insert(generator_id, backend);
        Ok(())
    }

    pub(crate) fn unbind_generator(&self, generator_id: i64) -> Result<()> {
        let mut map = self.generators.lock().map_err(poisoned)?;
        map.remove(&generator_id);
        Ok(())
    }

    pub fn backend_for_generator(&self, generator_id: i64) -> Result<Arc<dyn Backend>> {
        let map = self.generators.lock().map_err(poisoned)?;
        map.get(&generator_id).cloned().ok_or_else(|| {
            BqlError::Internal(format!("generator {} has no bound backend", generator_id))
        })
    }

    pub(crate) fn check_interrupt(&self) -> Result<()> {
        if self.interrupted.load(Ordering::SeqCst) {
            Err(BqlError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub(crate) fn clear_interrupt(&self) {
        self.interrupted.store(false, Ordering::SeqCst);
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> BqlError {
    BqlError::Internal("operator context lock poisoned".into())
}

/// Average a set of per-model log probabilities in probability space.
pub fn logmeanexp(logs: &[f64]) -> f64 {
    if logs.is_empty() {
        return f64::NAN;
    }
    let max = logs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    let sum: f64 = logs.iter().map(|l| (l - max).exp()).sum();
    max + (sum / logs.len() as f64).ln()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logmeanexp_of_equal_logs_is_identity() {
        let l = logmeanexp(&[-1.5, -1.5, -1.5]);
        assert!((l - -1.5).abs() < 1e-12);
    }

    #[test]
    fn logmeanexp_handles_neg_infinity() {
        assert_eq!(logmeanexp(&[f64::NEG_INFINITY]), f64::NEG_INFINITY);
        let l = logmeanexp(&[0.0, f64::NEG_INFINITY]);
        assert!((l - (0.5f64).ln()).abs() < 1e-12);
    }
}
