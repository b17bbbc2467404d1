//! AST types for BQL phrases.
//!
//! One variant per grammar production; no stringly-typed tags.  All
//! types are serde-serializable so phrases can be logged, cached, or
//! shipped across process boundaries as JSON.

use serde::{Deserialize, Serialize};

/// Identifiers are stored as written (quoted identifiers already
/// unescaped, case preserved).  Comparisons case-fold at resolution
/// time, not here.
pub type Name = String;

/// A phrase together with its parameter accounting: the number of
/// numbered parameters and the name→number map for named parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parametrized {
    pub phrase: Phrase,
    pub n_numpar: usize,
    pub nampar_map: Vec<(String, usize)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Phrase {
    Begin,
    Commit,
    Rollback,
    CreateTableAs {
        temp: bool,
        if_not_exists: bool,
        name: Name,
        query: Query,
    },
    DropTable {
        if_exists: bool,
        name: Name,
    },
    RenameTable {
        old: Name,
        new: Name,
    },
    CreatePopulation {
        if_not_exists: bool,
        name: Name,
        table: Name,
        schema: Vec<PopClause>,
    },
    AlterPopulation {
        population: Name,
        commands: Vec<PopCommand>,
    },
    DropPopulation {
        if_exists: bool,
        name: Name,
    },
    CreateGenerator {
        if_not_exists: bool,
        name: Name,
        population: Name,
        backend: Name,
        schema: String,
    },
    RenameGenerator {
        old: Name,
        new: Name,
    },
    DropGenerator {
        if_exists: bool,
        name: Name,
    },
    InitModels {
        if_not_exists: bool,
        generator: Name,
        nmodels: u64,
    },
    Analyze {
        generator: Name,
        models: Option<ModelSet>,
        budget: u64,
        budget_unit: TimeUnit,
        checkpoint: Option<(u64, TimeUnit)>,
        program: Option<String>,
    },
    DropModels {
        generator: Name,
        models: Option<ModelSet>,
    },
    Query(Query),
}

/// Inclusive model-number ranges, as written (`0-4, 7` keeps both
/// entries; expansion and validation happen at resolution time).
pub type ModelSet = Vec<(u64, u64)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeUnit {
    Iterations,
    Seconds,
    Minutes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PopClause {
    Model { columns: Vec<Name>, stattype: Name },
    Ignore { columns: Vec<Name> },
    SetStattype { columns: Vec<Name>, stattype: Name },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PopCommand {
    AddVariable { column: Name, stattype: Name },
    SetStattype { columns: Vec<Name>, stattype: Name },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Query {
    Select(Select),
    Estimate(Estimate),
    EstCols(EstCols),
    EstPairCols(EstPairCols),
    EstPairRow(EstPairRow),
    Infer(Infer),
    InferExplicit(InferExplicit),
    Simulate(Simulate),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quant {
    All,
    Distinct,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Select {
    pub quantifier: Quant,
    pub columns: Vec<SelCol>,
    pub tables: Option<Vec<SelTab>>,
    pub condition: Option<Expr>,
    pub grouping: Option<Grouping>,
    pub order: Option<Vec<OrdKey>>,
    pub limit: Option<Lim>,
}

/// `ESTIMATE … FROM population` — single implicit row context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    pub quantifier: Quant,
    pub columns: Vec<SelCol>,
    pub population: Name,
    pub generator: Option<Name>,
    pub models: Option<ModelSet>,
    pub condition: Option<Expr>,
    pub grouping: Option<Grouping>,
    pub order: Option<Vec<OrdKey>>,
    pub limit: Option<Lim>,
}

/// `ESTIMATE … FROM VARIABLES OF population` — single column context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstCols {
    pub columns: Vec<SelCol>,
    pub population: Name,
    pub generator: Option<Name>,
    pub models: Option<ModelSet>,
    pub condition: Option<Expr>,
    pub order: Option<Vec<OrdKey>>,
    pub limit: Option<Lim>,
}

/// `ESTIMATE … FROM PAIRWISE VARIABLES OF population` — two column
/// contexts via a self-join of the variable table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstPairCols {
    pub columns: Vec<SelCol>,
    pub population: Name,
    pub subcolumns: Option<Vec<ColListItem>>,
    pub generator: Option<Name>,
    pub models: Option<ModelSet>,
    pub condition: Option<Expr>,
    pub order: Option<Vec<OrdKey>>,
    pub limit: Option<Lim>,
}

/// `ESTIMATE <expr> FROM PAIRWISE population` — two row contexts via
/// a self-join of the base table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstPairRow {
    pub expression: Expr,
    pub name: Option<Name>,
    pub population: Name,
    pub generator: Option<Name>,
    pub models: Option<ModelSet>,
    pub condition: Option<Expr>,
    pub order: Option<Vec<OrdKey>>,
    pub limit: Option<Lim>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Infer {
    pub columns: Vec<Name>,
    pub confidence: Option<Expr>,
    pub population: Name,
    pub generator: Option<Name>,
    pub models: Option<ModelSet>,
    pub condition: Option<Expr>,
    pub grouping: Option<Grouping>,
    pub order: Option<Vec<OrdKey>>,
    pub limit: Option<Lim>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferExplicit {
    pub columns: Vec<InferCol>,
    pub population: Name,
    pub generator: Option<Name>,
    pub models: Option<ModelSet>,
    pub condition: Option<Expr>,
    pub grouping: Option<Grouping>,
    pub order: Option<Vec<OrdKey>>,
    pub limit: Option<Lim>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InferCol {
    Sel(SelCol),
    Predict {
        column: Name,
        name: Option<Name>,
        confidence: Name,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Simulate {
    pub columns: Vec<Name>,
    pub population: Name,
    pub generator: Option<Name>,
    pub models: Option<ModelSet>,
    pub constraints: Vec<(Name, Expr)>,
    pub limit: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SelCol {
    Star,
    TabStar(Name),
    Exp { expr: Expr, name: Option<Name> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelTab {
    pub table: TabRef,
    pub name: Option<Name>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TabRef {
    Name(Name),
    Subquery(Box<Query>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColListItem {
    Name(Name),
    Subquery(Box<Query>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grouping {
    pub keys: Vec<Expr>,
    pub condition: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrdKey {
    pub expression: Expr,
    pub sense: OrdSense,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrdSense {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lim {
    pub limit: Expr,
    pub offset: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Literal(Lit),
    /// `?` or `?N`, 1-based.
    NumPar(usize),
    /// `:name`, `@name` or `$name`, case-folded, sharing the numbered
    /// parameter space.
    NamPar { number: usize, name: String },
    Col {
        table: Option<Name>,
        column: Name,
    },
    Sub(Box<Query>),
    Exists(Box<Query>),
    In {
        expr: Box<Expr>,
        positive: bool,
        query: Box<Query>,
    },
    Collate {
        expr: Box<Expr>,
        collation: Name,
    },
    Cast {
        expr: Box<Expr>,
        typ: Type,
    },
    App {
        operator: Name,
        distinct: bool,
        operands: Vec<Expr>,
    },
    AppStar { operator: Name },
    Case {
        key: Option<Box<Expr>>,
        whens: Vec<(Expr, Expr)>,
        otherwise: Option<Box<Expr>>,
    },
    Op {
        op: Op,
        operands: Vec<Expr>,
    },
    Bql(Box<BqlFn>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Lit {
    Null,
    Integer(i64),
    Float(f64),
    String(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Type {
    pub names: Vec<Name>,
    pub args: Vec<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    BoolOr,
    BoolAnd,
    BoolNot,
    Is,
    IsNot,
    Like,
    NotLike,
    LikeEsc,
    NotLikeEsc,
    Glob,
    NotGlob,
    GlobEsc,
    NotGlobEsc,
    Regexp,
    NotRegexp,
    RegexpEsc,
    NotRegexpEsc,
    Match,
    NotMatch,
    MatchEsc,
    NotMatchEsc,
    Between,
    NotBetween,
    IsNull,
    NotNull,
    Eq,
    Neq,
    Lt,
    Leq,
    Gt,
    Geq,
    BitAnd,
    BitOr,
    LShift,
    RShift,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Concat,
    BitNot,
    Neg,
    Pos,
}

/// Column references of the two-column estimators: implicit (both
/// from context), `WITH c` (first from context), or `OF c0 WITH c1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColRefs {
    Implicit,
    With(Name),
    OfWith(Name, Name),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BqlFn {
    PredProb {
        column: Name,
        given: Vec<(Name, Expr)>,
    },
    ProbDensity {
        targets: Vec<(Name, Expr)>,
        given: Vec<(Name, Expr)>,
    },
    ProbDensityValue {
        value: Expr,
        given: Vec<(Name, Expr)>,
    },
    Similarity {
        condition: Option<Expr>,
        context: Option<Name>,
    },
    DepProb(ColRefs),
    MutInf {
        columns: ColRefs,
        given: Vec<(Name, Expr)>,
        nsamples: Option<Expr>,
    },
    Correlation {
        pvalue: bool,
        columns: ColRefs,
    },
    Predict {
        column: Name,
        confidence: Expr,
    },
}

impl Query {
    /// Whether this query can appear as a subquery (SIMULATE cannot;
    /// it is driver-materialized).
    pub fn is_subqueryable(&self) -> bool {
        !matches!(self, Query::Simulate(_))
    }
}

impl Expr {
    pub fn is_bql(&self) -> bool {
        matches!(self, Expr::Bql(_))
    }

    /// True if the expression contains any BQL operator form.
    pub fn has_bql(&self) -> bool {
        match self {
            Expr::Bql(_) => true,
            Expr::Literal(_) | Expr::NumPar(_) | Expr::NamPar { .. } | Expr::Col { .. } => false,
            Expr::Sub(_) | Expr::Exists(_) => false,
            Expr::In { expr, .. } => expr.has_bql(),
            Expr::Collate { expr, .. } => expr.has_bql(),
            Expr::Cast { expr, .. } => expr.has_bql(),
            Expr::App { operands, .. } => operands.iter().any(Expr::has_bql),
            Expr::AppStar { .. } => false,
            Expr::Case { key, whens, otherwise } => {
                key.as_deref().map_or(false, Expr::has_bql)
                    || whens.iter().any(|(w, t)| w.has_bql() || t.has_bql())
                    || otherwise.as_deref().map_or(false, Expr::has_bql)
            }
            Expr::Op { operands, .. } => operands.iter().any(Expr::has_bql),
        }
    }
}
