//! AST pretty-printer.
//!
//! Produces canonical BQL text that reparses to an equal AST: parse ∘
//! unparse ∘ parse = parse.  Operator expressions are fully
//! parenthesized, keywords come out uppercase, and identifiers are
//! quoted only when necessary.

use crate::ast::*;

/// Keywords reserved by the grammar, lowercase, sorted.
const KEYWORDS: &[&str] = &[
    "add", "all", "alter", "analyze", "and", "as", "asc", "begin", "between",
    "by", "case", "cast", "checkpoint", "collate", "commit", "confidence",
    "context", "correlation", "create", "density", "dependence", "desc",
    "distinct", "drop", "else", "end", "escape", "estimate", "exists",
    "explicit", "for", "from", "generator", "given", "glob", "group",
    "having", "if", "ignore", "in", "infer", "information", "initialize",
    "is", "isnull", "iteration", "iterations", "like", "limit", "match",
    "minute", "minutes", "model", "modeled", "models", "mutual", "not",
    "notnull", "null", "of", "offset", "or", "order", "pairwise",
    "population", "predict", "predictive", "probability", "pvalue", "regexp",
    "rename", "rollback", "samples", "schema", "second", "seconds", "select",
    "set", "similarity", "simulate", "stattype", "table", "temp",
    "temporary", "the", "then", "to", "using", "value", "variable",
    "variables", "when", "where", "with",
];

pub fn is_keyword(name: &str) -> bool {
    KEYWORDS.binary_search(&name.to_lowercase().as_str()).is_ok()
}

/// Quote `name` for output unless it is usable bare.
pub fn quote_name(name: &str) -> String {
    let mut chars = name.chars();
    let bare_ok = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => chars
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$'),
        _ => false,
    };
    if bare_ok && !is_keyword(name) {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

pub fn unparse_phrase(phrase: &Phrase) -> String {
    match phrase {
        Phrase::Begin => "BEGIN".into(),
        Phrase::Commit => "COMMIT".into(),
        Phrase::Rollback => "ROLLBACK".into(),
        Phrase::CreateTableAs { temp, if_not_exists, name, query } => format!(
            "CREATE {}TABLE {}{} AS {}",
            if *temp { "TEMP " } else { "" },
            ine(*if_not_exists),
            quote_name(name),
            unparse_query(query),
        ),
        Phrase::DropTable { if_exists, name } => {
            format!("DROP TABLE {}{}", ie(*if_exists), quote_name(name))
        }
        Phrase::RenameTable { old, new } => format!(
            "ALTER TABLE {} RENAME TO {}",
            quote_name(old),
            quote_name(new)
        ),
        Phrase::CreatePopulation { if_not_exists, name, table, schema } => {
            let clauses: Vec<String> = schema.iter().map(unparse_pop_clause).collect();
            format!(
                "CREATE POPULATION {}{} FOR {} WITH SCHEMA ({})",
                ine(*if_not_exists),
                quote_name(name),
                quote_name(table),
                clauses.join("; "),
            )
        }
        Phrase::AlterPopulation { population, commands } => {
            let cmds: Vec<String> = commands.iter().map(unparse_pop_command).collect();
            format!("ALTER POPULATION {} {}", quote_name(population), cmds.join(", "))
        }
        Phrase::DropPopulation { if_exists, name } => {
            format!("DROP POPULATION {}{}", ie(*if_exists), quote_name(name))
        }
        Phrase::CreateGenerator { if_not_exists, name, population, backend, schema } => {
            format!(
                "CREATE GENERATOR {}{} FOR {} USING {}({})",
                ine(*if_not_exists),
                quote_name(name),
                quote_name(population),
                quote_name(backend),
                schema,
            )
        }
        Phrase::RenameGenerator { old, new } => format!(
            "ALTER GENERATOR {} RENAME TO {}",
            quote_name(old),
            quote_name(new)
        ),
        Phrase::DropGenerator { if_exists, name } => {
            format!("DROP GENERATOR {}{}", ie(*if_exists), quote_name(name))
        }
        Phrase::InitModels { if_not_exists, generator, nmodels } => format!(
            "INITIALIZE {} MODELS {}FOR {}",
            nmodels,
            ine(*if_not_exists),
            quote_name(generator),
        ),
        Phrase::Analyze { generator, models, budget, budget_unit, checkpoint, program } => {
            let mut s = format!("ANALYZE {}", quote_name(generator));
            if let Some(m) = models {
                s.push_str(&format!(" MODELS {}", unparse_model_set(m)));
            }
            s.push_str(&format!(" FOR {} {}", budget, unparse_time_unit(*budget_unit)));
            if let Some((n, unit)) = checkpoint {
                s.push_str(&format!(" CHECKPOINT {} {}", n, unparse_time_unit(*unit)));
            }
            if let Some(p) = program {
                s.push_str(&format!(" ({})", p));
            }
            s
        }
        Phrase::DropModels { generator, models } => {
            let mut s = "DROP MODELS".to_string();
            if let Some(m) = models {
                s.push_str(&format!(" {}", unparse_model_set(m)));
            }
            s.push_str(&format!(" FROM {}", quote_name(generator)));
            s
        }
        Phrase::Query(q) => unparse_query(q),
    }
}

fn ine(b: bool) -> &'static str {
    if b {
        "IF NOT EXISTS "
    } else {
        ""
    }
}

fn ie(b: bool) -> &'static str {
    if b {
        "IF EXISTS "
    } else {
        ""
    }
}

fn unparse_pop_clause(c: &PopClause) -> String {
    match c {
        PopClause::Model { columns, stattype } => format!(
            "MODEL {} AS {}",
            names(columns),
            quote_name(stattype)
        ),
        PopClause::Ignore { columns } => format!("IGNORE {}", names(columns)),
        PopClause::SetStattype { columns, stattype } => format!(
            "SET STATTYPE OF {} TO {}",
            names(columns),
            quote_name(stattype)
        ),
    }
}

fn unparse_pop_command(c: &PopCommand) -> String {
    match c {
        PopCommand::AddVariable { column, stattype } => format!(
            "ADD VARIABLE {} {}",
            quote_name(column),
            quote_name(stattype)
        ),
        PopCommand::SetStattype { columns, stattype } => format!(
            "SET STATTYPE OF {} TO {}",
            names(columns),
            quote_name(stattype)
        ),
    }
}

fn names(ns: &[Name]) -> String {
    ns.iter().map(|n| quote_name(n)).collect::<Vec<_>>().join(", ")
}

fn unparse_model_set(m: &ModelSet) -> String {
    m.iter()
        .map(|(lo, hi)| {
            if lo == hi {
                lo.to_string()
            } else {
                format!("{}-{}", lo, hi)
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn unparse_time_unit(u: TimeUnit) -> &'static str {
    match u {
        TimeUnit::Iterations => "ITERATIONS",
        TimeUnit::Seconds => "SECONDS",
        TimeUnit::Minutes => "MINUTES",
    }
}

pub fn unparse_query(q: &Query) -> String {
    match q {
        Query::Select(s) => {
            let mut out = "SELECT".to_string();
            if s.quantifier == Quant::Distinct {
                out.push_str(" DISTINCT");
            }
            out.push(' ');
            out.push_str(&sel_cols(&s.columns));
            if let Some(tabs) = &s.tables {
                let ts: Vec<String> = tabs
                    .iter()
                    .map(|t| {
                        let base = match &t.table {
                            TabRef::Name(n) => quote_name(n),
                            TabRef::Subquery(q) => format!("({})", unparse_query(q)),
                        };
                        match &t.name {
                            Some(n) => format!("{} AS {}", base, quote_name(n)),
                            None => base,
                        }
                    })
                    .collect();
                out.push_str(&format!(" FROM {}", ts.join(", ")));
            }
            tail_clauses(
                &mut out,
                s.condition.as_ref(),
                s.grouping.as_ref(),
                s.order.as_deref(),
                s.limit.as_ref(),
            );
            out
        }
        Query::Estimate(e) => {
            let mut out = "ESTIMATE".to_string();
            if e.quantifier == Quant::Distinct {
                out.push_str(" DISTINCT");
            }
            out.push(' ');
            out.push_str(&sel_cols(&e.columns));
            out.push_str(&format!(" FROM {}", quote_name(&e.population)));
            modeling(&mut out, e.generator.as_deref(), e.models.as_ref());
            tail_clauses(
                &mut out,
                e.condition.as_ref(),
                e.grouping.as_ref(),
                e.order.as_deref(),
                e.limit.as_ref(),
            );
            out
        }
        Query::EstCols(e) => {
            let mut out = format!(
                "ESTIMATE {} FROM VARIABLES OF {}",
                sel_cols(&e.columns),
                quote_name(&e.population)
            );
            modeling(&mut out, e.generator.as_deref(), e.models.as_ref());
            tail_clauses(&mut out, e.condition.as_ref(), None, e.order.as_deref(), e.limit.as_ref());
            out
        }
        Query::EstPairCols(e) => {
            let mut out = format!(
                "ESTIMATE {} FROM PAIRWISE VARIABLES OF {}",
                sel_cols(&e.columns),
                quote_name(&e.population)
            );
            if let Some(items) = &e.subcolumns {
                let its: Vec<String> = items
                    .iter()
                    .map(|i| match i {
                        ColListItem::Name(n) => quote_name(n),
                        ColListItem::Subquery(q) => format!("({})", unparse_query(q)),
                    })
                    .collect();
                out.push_str(&format!(" FOR ({})", its.join(", ")));
            }
            modeling(&mut out, e.generator.as_deref(), e.models.as_ref());
            tail_clauses(&mut out, e.condition.as_ref(), None, e.order.as_deref(), e.limit.as_ref());
            out
        }
        Query::EstPairRow(e) => {
            let mut out = format!("ESTIMATE {}", unparse_expr(&e.expression));
            if let Some(n) = &e.name {
                out.push_str(&format!(" AS {}", quote_name(n)));
            }
            out.push_str(&format!(" FROM PAIRWISE {}", quote_name(&e.population)));
            modeling(&mut out, e.generator.as_deref(), e.models.as_ref());
            tail_clauses(&mut out, e.condition.as_ref(), None, e.order.as_deref(), e.limit.as_ref());
            out
        }
        Query::Infer(i) => {
            let mut out = format!("INFER {}", names(&i.columns));
            if let Some(c) = &i.confidence {
                out.push_str(&format!(" WITH CONFIDENCE {}", unparse_expr(c)));
            }
            out.push_str(&format!(" FROM {}", quote_name(&i.population)));
            modeling(&mut out, i.generator.as_deref(), i.models.as_ref());
            tail_clauses(
                &mut out,
                i.condition.as_ref(),
                i.grouping.as_ref(),
                i.order.as_deref(),
                i.limit.as_ref(),
            );
            out
        }
        Query::InferExplicit(i) => {
            let cols: Vec<String> = i
                .columns
                .iter()
                .map(|c| match c {
                    InferCol::Sel(s) => sel_col(s),
                    InferCol::Predict { column, name, confidence } => {
                        let mut s = format!("PREDICT {}", quote_name(column));
                        if let Some(n) = name {
                            s.push_str(&format!(" AS {}", quote_name(n)));
                        }
                        s.push_str(&format!(" CONFIDENCE {}", quote_name(confidence)));
                        s
                    }
                })
                .collect();
            let mut out = format!(
                "INFER EXPLICIT {} FROM {}",
                cols.join(", "),
                quote_name(&i.population)
            );
            modeling(&mut out, i.generator.as_deref(), i.models.as_ref());
            tail_clauses(
                &mut out,
                i.condition.as_ref(),
                i.grouping.as_ref(),
                i.order.as_deref(),
                i.limit.as_ref(),
            );
            out
        }
        Query::Simulate(s) => {
            let mut out = format!(
                "SIMULATE {} FROM {}",
                names(&s.columns),
                quote_name(&s.population)
            );
            modeling(&mut out, s.generator.as_deref(), s.models.as_ref());
            if !s.constraints.is_empty() {
                let cs: Vec<String> = s
                    .constraints
                    .iter()
                    .map(|(n, e)| format!("{} = {}", quote_name(n), unparse_expr(e)))
                    .collect();
                out.push_str(&format!(" GIVEN {}", cs.join(", ")));
            }
            out.push_str(&format!(" LIMIT {}", unparse_expr(&s.limit)));
            out
        }
    }
}

fn modeling(out: &mut String, generator: Option<&str>, models: Option<&ModelSet>) {
    if let Some(g) = generator {
        out.push_str(&format!(" MODELED BY {}", quote_name(g)));
    }
    if let Some(m) = models {
        if m.len() == 1 && m[0].0 == m[0].1 {
            out.push_str(&format!(" USING MODEL {}", m[0].0));
        } else {
            out.push_str(&format!(" USING MODELS {}", unparse_model_set(m)));
        }
    }
}

fn tail_clauses(
    out: &mut String,
    condition: Option<&Expr>,
    grouping: Option<&Grouping>,
    order: Option<&[OrdKey]>,
    limit: Option<&Lim>,
) {
    if let Some(c) = condition {
        out.push_str(&format!(" WHERE {}", unparse_expr(c)));
    }
    if let Some(g) = grouping {
        let keys: Vec<String> = g.keys.iter().map(unparse_expr).collect();
        out.push_str(&format!(" GROUP BY {}", keys.join(", ")));
        if let Some(h) = &g.condition {
            out.push_str(&format!(" HAVING {}", unparse_expr(h)));
        }
    }
    if let Some(keys) = order {
        let ks: Vec<String> = keys
            .iter()
            .map(|k| {
                let mut s = unparse_expr(&k.expression);
                if k.sense == OrdSense::Desc {
                    s.push_str(" DESC");
                }
                s
            })
            .collect();
        out.push_str(&format!(" ORDER BY {}", ks.join(", ")));
    }
    if let Some(l) = limit {
        out.push_str(&format!(" LIMIT {}", unparse_expr(&l.limit)));
        if let Some(o) = &l.offset {
            out.push_str(&format!(" OFFSET {}", unparse_expr(o)));
        }
    }
}

fn sel_cols(cols: &[SelCol]) -> String {
    cols.iter().map(sel_col).collect::<Vec<_>>().join(", ")
}

fn sel_col(c: &SelCol) -> String {
    match c {
        SelCol::Star => "*".into(),
        SelCol::TabStar(t) => format!("{}.*", quote_name(t)),
        SelCol::Exp { expr, name } => match name {
            Some(n) => format!("{} AS {}", unparse_expr(expr), quote_name(n)),
            None => unparse_expr(expr),
        },
    }
}

pub fn unparse_expr(e: &Expr) -> String {
    match e {
        Expr::Literal(l) => unparse_lit(l),
        Expr::NumPar(n) => format!("?{}", n),
        Expr::NamPar { name, .. } => format!(":{}", name),
        Expr::Col { table, column } => match table {
            Some(t) => format!("{}.{}", quote_name(t), quote_name(column)),
            None => quote_name(column),
        },
        Expr::Sub(q) => format!("({})", unparse_query(q)),
        Expr::Exists(q) => format!("EXISTS ({})", unparse_query(q)),
        Expr::In { expr, positive, query } => format!(
            "({}{} IN ({}))",
            unparse_expr(expr),
            if *positive { "" } else { " NOT" },
            unparse_query(query),
        ),
        Expr::Collate { expr, collation } => {
            format!("({} COLLATE {})", unparse_expr(expr), quote_name(collation))
        }
        Expr::Cast { expr, typ } => {
            let mut t = typ.names.iter().map(|n| quote_name(n)).collect::<Vec<_>>().join(" ");
            if !typ.args.is_empty() {
                let args: Vec<String> = typ.args.iter().map(|a| a.to_string()).collect();
                t.push_str(&format!("({})", args.join(", ")));
            }
            format!("CAST({} AS {})", unparse_expr(expr), t)
        }
        Expr::App { operator, distinct, operands } => {
            let args: Vec<String> = operands.iter().map(unparse_expr).collect();
            format!(
                "{}({}{})",
                quote_name(operator),
                if *distinct { "DISTINCT " } else { "" },
                args.join(", ")
            )
        }
        Expr::AppStar { operator } => format!("{}(*)", quote_name(operator)),
        Expr::Case { key, whens, otherwise } => {
            let mut s = "CASE".to_string();
            if let Some(k) = key {
                s.push_str(&format!(" {}", unparse_expr(k)));
            }
            for (w, t) in whens {
                s.push_str(&format!(" WHEN {} THEN {}", unparse_expr(w), unparse_expr(t)));
            }
            if let Some(o) = otherwise {
                s.push_str(&format!(" ELSE {}", unparse_expr(o)));
            }
            s.push_str(" END");
            s
        }
        Expr::Op { op, operands } => unparse_op(*op, operands),
        Expr::Bql(b) => unparse_bql(b),
    }
}

fn unparse_op(op: Op, os: &[Expr]) -> String {
    let x = |i: usize| unparse_expr(&os[i]);
    match op {
        Op::BoolOr => format!("({} OR {})", x(0), x(1)),
        Op::BoolAnd => format!("({} AND {})", x(0), x(1)),
        Op::BoolNot => format!("(NOT {})", x(0)),
        Op::Is => format!("({} IS {})", x(0), x(1)),
        Op::IsNot => format!("({} IS NOT {})", x(0), x(1)),
        Op::Like => format!("({} LIKE {})", x(0), x(1)),
        Op::NotLike => format!("({} NOT LIKE {})", x(0), x(1)),
        Op::LikeEsc => format!("({} LIKE {} ESCAPE {})", x(0), x(1), x(2)),
        Op::NotLikeEsc => format!("({} NOT LIKE {} ESCAPE {})", x(0), x(1), x(2)),
        Op::Glob => format!("({} GLOB {})", x(0), x(1)),
        Op::NotGlob => format!("({} NOT GLOB {})", x(0), x(1)),
        Op::GlobEsc => format!("({} GLOB {} ESCAPE {})", x(0), x(1), x(2)),
        Op::NotGlobEsc => format!("({} NOT GLOB {} ESCAPE {})", x(0), x(1), x(2)),
        Op::Regexp => format!("({} REGEXP {})", x(0), x(1)),
        Op::NotRegexp => format!("({} NOT REGEXP {})", x(0), x(1)),
        Op::RegexpEsc => format!("({} REGEXP {} ESCAPE {})", x(0), x(1), x(2)),
        Op::NotRegexpEsc => format!("({} NOT REGEXP {} ESCAPE {})", x(0), x(1), x(2)),
        Op::Match => format!("({} MATCH {})", x(0), x(1)),
        Op::NotMatch => format!("({} NOT MATCH {})", x(0), x(1)),
        Op::MatchEsc => format!("({} MATCH {} ESCAPE {})", x(0), x(1), x(2)),
        Op::NotMatchEsc => format!("({} NOT MATCH {} ESCAPE {})", x(0), x(1), x(2)),
        Op::Between => format!("({} BETWEEN {} AND {})", x(0), x(1), x(2)),
        Op::NotBetween => format!("({} NOT BETWEEN {} AND {})", x(0), x(1), x(2)),
        Op::IsNull => format!("({} ISNULL)", x(0)),
        Op::NotNull => format!("({} NOTNULL)", x(0)),
        Op::Eq => format!("({} = {})", x(0), x(1)),
        Op::Neq => format!("({} != {})", x(0), x(1)),
        Op::Lt => format!("({} < {})", x(0), x(1)),
        Op::Leq => format!("({} <= {})", x(0), x(1)),
        Op::Gt => format!("({} > {})", x(0), x(1)),
        Op::Geq => format!("({} >= {})", x(0), x(1)),
        Op::BitAnd => format!("({} & {})", x(0), x(1)),
        Op::BitOr => format!("({} | {})", x(0), x(1)),
        Op::LShift => format!("({} << {})", x(0), x(1)),
        Op::RShift => format!("({} >> {})", x(0), x(1)),
        Op::Add => format!("({} + {})", x(0), x(1)),
        Op::Sub => format!("({} - {})", x(0), x(1)),
        Op::Mul => format!("({} * {})", x(0), x(1)),
        Op::Div => format!("({} / {})", x(0), x(1)),
        Op::Rem => format!("({} % {})", x(0), x(1)),
        Op::Concat => format!("({} || {})", x(0), x(1)),
        Op::BitNot => format!("(~ {})", x(0)),
        Op::Neg => format!("(- {})", x(0)),
        Op::Pos => format!("(+ {})", x(0)),
    }
}

fn unparse_lit(l: &Lit) -> String {
    match l {
        Lit::Null => "NULL".into(),
        Lit::Integer(i) => i.to_string(),
        // Debug formatting always includes a decimal point or
        // exponent, so the text reparses as a float.
        Lit::Float(f) => format!("{:?}", f),
        Lit::String(s) => format!("'{}'", s.replace('\'', "''")),
    }
}

/// Unparse an expression in a syntactic position that requires a
/// `primary` (sample counts, confidences).
fn unparse_primary(e: &Expr) -> String {
    match e {
        Expr::Op { .. } | Expr::Collate { .. } | Expr::Bql(_) | Expr::In { .. } => {
            format!("({})", unparse_expr(e))
        }
        _ => unparse_expr(e),
    }
}

fn unparse_given(given: &[(Name, Expr)]) -> String {
    let cs: Vec<String> = given
        .iter()
        .map(|(n, e)| format!("{} = {}", quote_name(n), unparse_expr(e)))
        .collect();
    format!(" GIVEN ({})", cs.join(", "))
}

fn unparse_of_with(c: &ColRefs) -> String {
    match c {
        ColRefs::Implicit => String::new(),
        ColRefs::With(n) => format!(" WITH {}", quote_name(n)),
        ColRefs::OfWith(a, b) => {
            format!(" OF {} WITH {}", quote_name(a), quote_name(b))
        }
    }
}

fn unparse_bql(b: &BqlFn) -> String {
    match b {
        BqlFn::PredProb { column, given } => {
            let mut s = format!("PREDICTIVE PROBABILITY OF {}", quote_name(column));
            if !given.is_empty() {
                s.push_str(&unparse_given(given));
            }
            s
        }
        BqlFn::ProbDensity { targets, given } => {
            let mut s = "PROBABILITY DENSITY OF ".to_string();
            if targets.len() == 1 {
                s.push_str(&format!(
                    "{} = {}",
                    quote_name(&targets[0].0),
                    unparse_expr(&targets[0].1)
                ));
            } else {
                let ts: Vec<String> = targets
                    .iter()
                    .map(|(n, e)| format!("{} = {}", quote_name(n), unparse_expr(e)))
                    .collect();
                s.push_str(&format!("({})", ts.join(", ")));
            }
            if !given.is_empty() {
                s.push_str(&unparse_given(given));
            }
            s
        }
        BqlFn::ProbDensityValue { value, given } => {
            let mut s = format!("PROBABILITY DENSITY OF VALUE {}", unparse_expr(value));
            if !given.is_empty() {
                s.push_str(&unparse_given(given));
            }
            s
        }
        BqlFn::Similarity { condition, context } => {
            let mut s = "SIMILARITY".to_string();
            if let Some(c) = condition {
                s.push_str(&format!(" TO ({})", unparse_expr(c)));
            }
            if let Some(c) = context {
                s.push_str(&format!(" IN THE CONTEXT OF {}", quote_name(c)));
            }
            s
        }
        BqlFn::DepProb(cols) => {
            format!("DEPENDENCE PROBABILITY{}", unparse_of_with(cols))
        }
        BqlFn::MutInf { columns, given, nsamples } => {
            let mut s = format!("MUTUAL INFORMATION{}", unparse_of_with(columns));
            if !given.is_empty() {
                s.push_str(&unparse_given(given));
            }
            if let Some(n) = nsamples {
                s.push_str(&format!(" USING {} SAMPLES", unparse_primary(n)));
            }
            s
        }
        BqlFn::Correlation { pvalue, columns } => format!(
            "CORRELATION{}{}",
            if *pvalue { " PVALUE" } else { "" },
            unparse_of_with(columns)
        ),
        BqlFn::Predict { column, confidence } => format!(
            "PREDICT {} WITH CONFIDENCE {}",
            quote_name(column),
            unparse_primary(confidence)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_phrase;

    fn roundtrip(input: &str) {
        let first = parse_phrase(input).unwrap();
        let text = unparse_phrase(&first.phrase);
        let second = parse_phrase(&text)
            .unwrap_or_else(|e| panic!("reparse of {:?} failed: {}", text, e));
        assert_eq!(first.phrase, second.phrase, "unparse of {:?}", input);
        assert_eq!(first.n_numpar, second.n_numpar);
        assert_eq!(first.nampar_map, second.nampar_map);
    }

    #[test]
    fn roundtrips_select() {
        roundtrip("select distinct a, b as c from t, u as v where a > 1 and b < 2");
        roundtrip("select * from t order by a desc, b limit 10 offset 2");
        roundtrip("select t.* from t group by a having count(*) > 1");
        roundtrip("select case when a then 1 else 2 end from t");
        roundtrip("select case a when 1 then 'x' end from t");
        roundtrip("select cast(a as double precision) from t");
        roundtrip("select f(distinct a, b), count(*) from t");
        roundtrip("select a collate nocase from t");
        roundtrip("select -a, +b, ~c from t");
        roundtrip("select a || b || c from t");
        roundtrip("select 1.5, .5, 2e10, 0x1f, 'it''s' from t");
        roundtrip("select ?, ?2, :x, @y, $z from t");
        roundtrip("select * from (select a from t) as s");
        roundtrip("select * from t where a in (select b from u)")
    }

    #[test]
    fn roundtrips_estimates() {
        roundtrip("estimate predictive probability of a given (b = 1) from p");
        roundtrip("estimate probability density of a = 2 given (b = 3, c = 4) from p");
        roundtrip("estimate probability density of (a = 1, b = 2) from p");
        roundtrip(
            "estimate similarity to (rowid = 1) in the context of a from p \
             modeled by g using model 0",
        );
        roundtrip("estimate dependence probability of a with b from p");
        roundtrip("estimate mutual information of a with b using 100 samples from p");
        roundtrip("estimate correlation pvalue of a with b from p");
        roundtrip("estimate predict a with confidence 0.5 from p");
        roundtrip("estimate probability density of value 5 from variables of p");
        roundtrip("estimate dependence probability from pairwise variables of p for (a, b)");
        roundtrip("estimate similarity as s from pairwise p using models 0-2, 5 limit 10");
    }

    #[test]
    fn roundtrips_mml() {
        roundtrip("create population p for t with schema (model a, b as numerical; ignore c)");
        roundtrip("alter population p add variable x numerical, set stattype of y to nominal");
        roundtrip("create generator g if not exists for p using diag_gauss(xyz (nested, ok))");
        roundtrip("initialize 7 models if not exists for g");
        roundtrip("analyze g models 0-2 for 30 seconds checkpoint 1 iteration (optimized)");
        roundtrip("drop models 0-4 from g");
        roundtrip("drop table if exists t");
        roundtrip("alter table t rename to u");
        roundtrip("create temp table s as simulate a, b from p given c = 1 limit 5");
    }

    #[test]
    fn roundtrips_infer() {
        roundtrip("infer a, b with confidence 0.9 from p where a is null");
        roundtrip("infer explicit a, predict b as bp confidence bc from p limit 1");
    }

    #[test]
    fn quotes_names_that_need_it() {
        assert_eq!(quote_name("plain"), "plain");
        assert_eq!(quote_name("select"), "\"select\"");
        assert_eq!(quote_name("has space"), "\"has space\"");
        assert_eq!(quote_name("ha\"s"), "\"ha\"\"s\"");
        roundtrip(r#"select "select", "has space" from "we ird""#);
    }
}
