//! pest-based parser for BQL.
//!
//! The grammar lives in `bql.pest`.  This module lowers pest pairs
//! into the typed AST and assigns parameter numbers: `?` takes the
//! next free 1-based index, `?N` pins index N, and named parameters
//! (`:x`, `@x`, `$x`) share the numbered space, one slot per distinct
//! case-folded name.

use pest::Parser as _;
use pest_derive::Parser;
use thiserror::Error;

use crate::ast::*;
use crate::lex::{split_phrases, LexicalError, PhraseText};

#[derive(Parser)]
#[grammar = "bql.pest"]
struct BqlParser;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error(transparent)]
    Lexical(#[from] LexicalError),

    #[error("syntax error at {line}:{col}: expected {expected}, got {got}")]
    Syntax {
        line: usize,
        col: usize,
        expected: String,
        got: String,
    },

    #[error("at {line}:{col}: {message}")]
    Invalid {
        line: usize,
        col: usize,
        message: String,
    },
}

type Pair<'i> = pest::iterators::Pair<'i, Rule>;

/// Parse a string of semicolon-separated phrases.  Empty phrases are
/// dropped.
pub fn parse(input: &str) -> Result<Vec<Parametrized>, ParseError> {
    let mut phrases = Vec::new();
    for ph in split_phrases(input)? {
        if let Some(p) = parse_one(&ph)? {
            phrases.push(p);
        }
    }
    Ok(phrases)
}

/// Parse a string that must contain exactly one non-empty phrase.
pub fn parse_phrase(input: &str) -> Result<Parametrized, ParseError> {
    let mut phrases = parse(input)?;
    match phrases.len() {
        1 => Ok(phrases.remove(0)),
        0 => Err(ParseError::Syntax {
            line: 1,
            col: 1,
            expected: "a phrase".into(),
            got: "empty input".into(),
        }),
        _ => Err(ParseError::Invalid {
            line: 1,
            col: 1,
            message: "expected exactly one phrase".into(),
        }),
    }
}

fn parse_one(ph: &PhraseText<'_>) -> Result<Option<Parametrized>, ParseError> {
    if ph.text.trim().is_empty() {
        return Ok(None);
    }
    let mut pairs = BqlParser::parse(Rule::phrase_input, ph.text)
        .map_err(|e| syntax_error(e, ph))?;
    let input_pair = pairs.next().unwrap();
    let mut st = Params::default();
    for p in input_pair.into_inner() {
        if p.as_rule() == Rule::phrase {
            let phrase = lower_phrase(p, &mut st)?;
            return Ok(Some(Parametrized {
                phrase,
                n_numpar: st.n_numpar,
                nampar_map: st.nampar_map,
            }));
        }
    }
    Ok(None)
}

fn syntax_error(e: pest::error::Error<Rule>, ph: &PhraseText<'_>) -> ParseError {
    use pest::error::{ErrorVariant, InputLocation, LineColLocation};
    let (mut line, mut col) = match e.line_col {
        LineColLocation::Pos((l, c)) => (l, c),
        LineColLocation::Span((l, c), _) => (l, c),
    };
    // Positions are phrase-relative; shift to the original input.
    if line == 1 {
        col += ph.col - 1;
    }
    line += ph.line - 1;
    let expected = match &e.variant {
        ErrorVariant::ParsingError { positives, .. } => {
            if positives.is_empty() {
                "valid syntax".to_string()
            } else {
                let mut names: Vec<String> =
                    positives.iter().map(|r| format!("{:?}", r)).collect();
                names.sort();
                names.dedup();
                names.join(", ")
            }
        }
        ErrorVariant::CustomError { message } => message.clone(),
    };
    let pos = match e.location {
        InputLocation::Pos(p) => p,
        InputLocation::Span((s, _)) => s,
    };
    let got = match ph.text[pos..].split_whitespace().next() {
        Some(tok) => format!("{:?}", tok),
        None => "end of input".to_string(),
    };
    ParseError::Syntax { line, col, expected, got }
}

fn invalid(pair: &Pair<'_>, message: impl Into<String>) -> ParseError {
    let (line, col) = pair.as_span().start_pos().line_col();
    ParseError::Invalid { line, col, message: message.into() }
}

#[derive(Default)]
struct Params {
    n_numpar: usize,
    nampar_map: Vec<(String, usize)>,
}

impl Params {
    fn numpar_next(&mut self) -> usize {
        self.n_numpar += 1;
        self.n_numpar
    }

    fn numpar_explicit(&mut self, n: usize) -> usize {
        self.n_numpar = self.n_numpar.max(n);
        n
    }

    fn nampar(&mut self, name: &str) -> (usize, String) {
        let folded = name.to_lowercase();
        if let Some((_, n)) = self.nampar_map.iter().find(|(m, _)| *m == folded) {
            return (*n, folded);
        }
        self.n_numpar += 1;
        self.nampar_map.push((folded.clone(), self.n_numpar));
        (self.n_numpar, folded)
    }
}

// --------------------------------------------------------------- phrases

fn lower_phrase(pair: Pair<'_>, st: &mut Params) -> Result<Phrase, ParseError> {
    let inner = pair.into_inner().next().unwrap();
    match inner.as_rule() {
        Rule::txn_phrase => {
            let t = inner.into_inner().next().unwrap();
            Ok(match t.as_rule() {
                Rule::begin_phrase => Phrase::Begin,
                Rule::commit_phrase => Phrase::Commit,
                _ => Phrase::Rollback,
            })
        }
        Rule::create_table => lower_create_table(inner, st),
        Rule::drop_table => {
            let (if_exists, name) = lower_drop(inner);
            Ok(Phrase::DropTable { if_exists, name })
        }
        Rule::alter_table => {
            let (old, new) = lower_rename(inner);
            Ok(Phrase::RenameTable { old, new })
        }
        Rule::create_pop => lower_create_pop(inner),
        Rule::alter_pop => lower_alter_pop(inner),
        Rule::drop_pop => {
            let (if_exists, name) = lower_drop(inner);
            Ok(Phrase::DropPopulation { if_exists, name })
        }
        Rule::create_gen => lower_create_gen(inner),
        Rule::alter_gen => {
            let (old, new) = lower_rename(inner);
            Ok(Phrase::RenameGenerator { old, new })
        }
        Rule::drop_gen => {
            let (if_exists, name) = lower_drop(inner);
            Ok(Phrase::DropGenerator { if_exists, name })
        }
        Rule::init_models => lower_init_models(inner),
        Rule::analyze_models => lower_analyze(inner),
        Rule::drop_models => lower_drop_models(inner),
        Rule::query => Ok(Phrase::Query(lower_query(inner, st)?)),
        r => unreachable!("phrase rule {:?}", r),
    }
}

fn lower_drop(pair: Pair<'_>) -> (bool, Name) {
    let mut if_exists = false;
    let mut name = String::new();
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::if_exists => if_exists = true,
            Rule::name => name = lower_name(p),
            _ => {}
        }
    }
    (if_exists, name)
}

fn lower_rename(pair: Pair<'_>) -> (Name, Name) {
    let names: Vec<Name> = pair
        .into_inner()
        .filter(|p| p.as_rule() == Rule::name)
        .map(lower_name)
        .collect();
    (names[0].clone(), names[1].clone())
}

fn lower_create_table(pair: Pair<'_>, st: &mut Params) -> Result<Phrase, ParseError> {
    let mut temp = false;
    let mut if_not_exists = false;
    let mut name = String::new();
    let mut query = None;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::temp => temp = true,
            Rule::if_not_exists => if_not_exists = true,
            Rule::name => name = lower_name(p),
            Rule::query => query = Some(lower_query(p, st)?),
            _ => {}
        }
    }
    Ok(Phrase::CreateTableAs { temp, if_not_exists, name, query: query.unwrap() })
}

fn lower_create_pop(pair: Pair<'_>) -> Result<Phrase, ParseError> {
    let mut if_not_exists = false;
    let mut names = Vec::new();
    let mut schema = Vec::new();
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::if_not_exists => if_not_exists = true,
            Rule::name => names.push(lower_name(p)),
            Rule::pop_schema => {
                for c in p.into_inner() {
                    schema.push(lower_pop_clause(c));
                }
            }
            _ => {}
        }
    }
    Ok(Phrase::CreatePopulation {
        if_not_exists,
        name: names[0].clone(),
        table: names[1].clone(),
        schema,
    })
}

fn lower_pop_clause(pair: Pair<'_>) -> PopClause {
    let inner = pair.into_inner().next().unwrap();
    match inner.as_rule() {
        Rule::model_clause => {
            let (columns, stattype) = lower_cols_stattype(inner);
            PopClause::Model { columns, stattype }
        }
        Rule::ignore_clause => {
            let columns = inner
                .into_inner()
                .find(|p| p.as_rule() == Rule::name_list)
                .map(lower_name_list)
                .unwrap();
            PopClause::Ignore { columns }
        }
        Rule::stattype_clause => {
            let (columns, stattype) = lower_cols_stattype(inner);
            PopClause::SetStattype { columns, stattype }
        }
        r => unreachable!("pop clause rule {:?}", r),
    }
}

fn lower_cols_stattype(pair: Pair<'_>) -> (Vec<Name>, Name) {
    let mut columns = Vec::new();
    let mut stattype = String::new();
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::name_list => columns = lower_name_list(p),
            Rule::name => stattype = lower_name(p),
            _ => {}
        }
    }
    (columns, stattype)
}

fn lower_alter_pop(pair: Pair<'_>) -> Result<Phrase, ParseError> {
    let mut population = String::new();
    let mut commands = Vec::new();
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::name => population = lower_name(p),
            Rule::alter_pop_cmd => {
                let cmd = p.into_inner().next().unwrap();
                match cmd.as_rule() {
                    Rule::add_variable_cmd => {
                        let names: Vec<Name> = cmd
                            .into_inner()
                            .filter(|c| c.as_rule() == Rule::name)
                            .map(lower_name)
                            .collect();
                        commands.push(PopCommand::AddVariable {
                            column: names[0].clone(),
                            stattype: names[1].clone(),
                        });
                    }
                    Rule::stattype_clause => {
                        let (columns, stattype) = lower_cols_stattype(cmd);
                        commands.push(PopCommand::SetStattype { columns, stattype });
                    }
                    r => unreachable!("alter pop cmd {:?}", r),
                }
            }
            _ => {}
        }
    }
    Ok(Phrase::AlterPopulation { population, commands })
}

fn lower_create_gen(pair: Pair<'_>) -> Result<Phrase, ParseError> {
    let mut if_not_exists = false;
    let mut names = Vec::new();
    let mut schema = String::new();
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::if_not_exists => if_not_exists = true,
            Rule::name => names.push(lower_name(p)),
            Rule::gen_schema_parens => {
                if let Some(s) = p.into_inner().next() {
                    schema = s.as_str().trim().to_string();
                }
            }
            _ => {}
        }
    }
    Ok(Phrase::CreateGenerator {
        if_not_exists,
        name: names[0].clone(),
        population: names[1].clone(),
        backend: names[2].clone(),
        schema,
    })
}

fn lower_init_models(pair: Pair<'_>) -> Result<Phrase, ParseError> {
    let mut if_not_exists = false;
    let mut nmodels = 0u64;
    let mut generator = String::new();
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::if_not_exists => if_not_exists = true,
            Rule::integer_lit => nmodels = lower_u64(&p)?,
            Rule::name => generator = lower_name(p),
            _ => {}
        }
    }
    Ok(Phrase::InitModels { if_not_exists, generator, nmodels })
}

fn lower_analyze(pair: Pair<'_>) -> Result<Phrase, ParseError> {
    let mut generator = String::new();
    let mut models = None;
    let mut budget = 0u64;
    let mut budget_unit = TimeUnit::Iterations;
    let mut checkpoint = None;
    let mut program = None;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::name => generator = lower_name(p),
            Rule::model_set => models = Some(lower_model_set(&p)?),
            Rule::integer_lit => budget = lower_u64(&p)?,
            Rule::time_unit => budget_unit = lower_time_unit(&p),
            Rule::checkpoint => {
                let mut n = 0u64;
                let mut unit = TimeUnit::Iterations;
                for c in p.into_inner() {
                    match c.as_rule() {
                        Rule::integer_lit => n = lower_u64(&c)?,
                        Rule::time_unit => unit = lower_time_unit(&c),
                        _ => {}
                    }
                }
                checkpoint = Some((n, unit));
            }
            Rule::analysis_program => {
                program = p.into_inner().next().map(|s| s.as_str().trim().to_string());
            }
            _ => {}
        }
    }
    Ok(Phrase::Analyze { generator, models, budget, budget_unit, checkpoint, program })
}

fn lower_drop_models(pair: Pair<'_>) -> Result<Phrase, ParseError> {
    let mut generator = String::new();
    let mut models = None;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::name => generator = lower_name(p),
            Rule::model_set => models = Some(lower_model_set(&p)?),
            _ => {}
        }
    }
    Ok(Phrase::DropModels { generator, models })
}

fn lower_time_unit(pair: &Pair<'_>) -> TimeUnit {
    match pair.clone().into_inner().next().unwrap().as_rule() {
        Rule::K_ITERATION | Rule::K_ITERATIONS => TimeUnit::Iterations,
        Rule::K_SECOND | Rule::K_SECONDS => TimeUnit::Seconds,
        _ => TimeUnit::Minutes,
    }
}

fn lower_model_set(pair: &Pair<'_>) -> Result<ModelSet, ParseError> {
    let mut set = Vec::new();
    for range in pair.clone().into_inner() {
        let ints: Vec<u64> = range
            .into_inner()
            .filter(|p| p.as_rule() == Rule::integer_lit)
            .map(|p| lower_u64(&p))
            .collect::<Result<_, _>>()?;
        match ints.len() {
            1 => set.push((ints[0], ints[0])),
            _ => set.push((ints[0], ints[1])),
        }
    }
    Ok(set)
}

fn lower_u64(pair: &Pair<'_>) -> Result<u64, ParseError> {
    let s = pair.as_str();
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else {
        s.parse()
    };
    parsed.map_err(|_| invalid(pair, "integer literal out of range"))
}

// --------------------------------------------------------------- queries

fn lower_query(pair: Pair<'_>, st: &mut Params) -> Result<Query, ParseError> {
    let inner = pair.into_inner().next().unwrap();
    match inner.as_rule() {
        Rule::select_query => lower_select(inner, st).map(Query::Select),
        Rule::estimate_query => lower_estimate(inner, st).map(Query::Estimate),
        Rule::est_cols => lower_est_cols(inner, st).map(Query::EstCols),
        Rule::est_pair_cols => lower_est_pair_cols(inner, st).map(Query::EstPairCols),
        Rule::est_pair_row => lower_est_pair_row(inner, st).map(Query::EstPairRow),
        Rule::infer_query => lower_infer(inner, st),
        Rule::simulate_query => lower_simulate(inner, st).map(Query::Simulate),
        r => unreachable!("query rule {:?}", r),
    }
}

/// Accumulator for the clauses shared by the query forms.
#[derive(Default)]
struct QueryClauses {
    quantifier: Option<Quant>,
    columns: Vec<SelCol>,
    population: Option<Name>,
    generator: Option<Name>,
    models: Option<ModelSet>,
    condition: Option<Expr>,
    grouping: Option<Grouping>,
    order: Option<Vec<OrdKey>>,
    limit: Option<Lim>,
}

fn lower_common_clause(
    p: Pair<'_>,
    st: &mut Params,
    q: &mut QueryClauses,
) -> Result<bool, ParseError> {
    match p.as_rule() {
        Rule::quantifier => {
            q.quantifier = Some(
                match p.into_inner().next().unwrap().as_rule() {
                    Rule::K_DISTINCT => Quant::Distinct,
                    _ => Quant::All,
                },
            );
        }
        Rule::select_columns => {
            for c in p.into_inner() {
                q.columns.push(lower_select_column(c, st)?);
            }
        }
        Rule::name => q.population = Some(lower_name(p)),
        Rule::modeled_by => {
            q.generator = p
                .into_inner()
                .find(|c| c.as_rule() == Rule::name)
                .map(lower_name);
        }
        Rule::using_models => {
            let mut set = None;
            for c in p.into_inner() {
                match c.as_rule() {
                    Rule::model_set => set = Some(lower_model_set(&c)?),
                    Rule::integer_lit => {
                        let n = lower_u64(&c)?;
                        set = Some(vec![(n, n)]);
                    }
                    _ => {}
                }
            }
            q.models = set;
        }
        Rule::where_clause => {
            q.condition = Some(lower_expr(p.into_inner().nth(1).unwrap(), st)?);
        }
        Rule::group_clause => {
            let mut keys = Vec::new();
            let mut condition = None;
            for c in p.into_inner() {
                match c.as_rule() {
                    Rule::expression => keys.push(lower_expr(c, st)?),
                    Rule::having_clause => {
                        condition =
                            Some(lower_expr(c.into_inner().nth(1).unwrap(), st)?);
                    }
                    _ => {}
                }
            }
            q.grouping = Some(Grouping { keys, condition });
        }
        Rule::order_clause => {
            let mut keys = Vec::new();
            for c in p.into_inner() {
                if c.as_rule() == Rule::order_key {
                    let mut expression = None;
                    let mut sense = OrdSense::Asc;
                    for k in c.into_inner() {
                        match k.as_rule() {
                            Rule::expression => expression = Some(lower_expr(k, st)?),
                            Rule::order_sense => {
                                if k.into_inner().next().unwrap().as_rule()
                                    == Rule::K_DESC
                                {
                                    sense = OrdSense::Desc;
                                }
                            }
                            _ => {}
                        }
                    }
                    keys.push(OrdKey { expression: expression.unwrap(), sense });
                }
            }
            q.order = Some(keys);
        }
        Rule::limit_clause => {
            let mut exprs = Vec::new();
            let mut offset_kw = None;
            for c in p.into_inner() {
                match c.as_rule() {
                    Rule::expression => exprs.push(lower_expr(c, st)?),
                    Rule::offset_clause => {
                        offset_kw =
                            Some(lower_expr(c.into_inner().nth(1).unwrap(), st)?);
                    }
                    _ => {}
                }
            }
            q.limit = Some(match (exprs.len(), offset_kw) {
                (1, None) => Lim { limit: exprs.remove(0), offset: None },
                (1, Some(off)) => Lim { limit: exprs.remove(0), offset: Some(off) },
                // `LIMIT a, b` is offset-then-limit.
                _ => {
                    let limit = exprs.remove(1);
                    Lim { limit, offset: Some(exprs.remove(0)) }
                }
            });
        }
        _ => return Ok(false),
    }
    Ok(true)
}

fn lower_select(pair: Pair<'_>, st: &mut Params) -> Result<Select, ParseError> {
    let mut q = QueryClauses::default();
    let mut tables = None;
    for p in pair.into_inner() {
        if p.as_rule() == Rule::from_clause {
            let mut ts = Vec::new();
            for t in p.into_inner() {
                if t.as_rule() == Rule::select_table {
                    ts.push(lower_select_table(t, st)?);
                }
            }
            tables = Some(ts);
        } else {
            lower_common_clause(p, st, &mut q)?;
        }
    }
    Ok(Select {
        quantifier: q.quantifier.unwrap_or(Quant::All),
        columns: q.columns,
        tables,
        condition: q.condition,
        grouping: q.grouping,
        order: q.order,
        limit: q.limit,
    })
}

fn lower_select_table(pair: Pair<'_>, st: &mut Params) -> Result<SelTab, ParseError> {
    let mut table = None;
    let mut alias = None;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::subquery_parens => {
                let inner = p.into_inner().next().unwrap();
                table = Some(TabRef::Subquery(Box::new(lower_query(inner, st)?)));
            }
            Rule::name => table = Some(TabRef::Name(lower_name(p))),
            Rule::alias => alias = lower_alias(p),
            _ => {}
        }
    }
    Ok(SelTab { table: table.unwrap(), name: alias })
}

fn lower_estimate(pair: Pair<'_>, st: &mut Params) -> Result<Estimate, ParseError> {
    let mut q = QueryClauses::default();
    for p in pair.into_inner() {
        lower_common_clause(p, st, &mut q)?;
    }
    Ok(Estimate {
        quantifier: q.quantifier.unwrap_or(Quant::All),
        columns: q.columns,
        population: q.population.unwrap(),
        generator: q.generator,
        models: q.models,
        condition: q.condition,
        grouping: q.grouping,
        order: q.order,
        limit: q.limit,
    })
}

fn lower_est_cols(pair: Pair<'_>, st: &mut Params) -> Result<EstCols, ParseError> {
    let mut q = QueryClauses::default();
    for p in pair.into_inner() {
        lower_common_clause(p, st, &mut q)?;
    }
    Ok(EstCols {
        columns: q.columns,
        population: q.population.unwrap(),
        generator: q.generator,
        models: q.models,
        condition: q.condition,
        order: q.order,
        limit: q.limit,
    })
}

fn lower_est_pair_cols(pair: Pair<'_>, st: &mut Params) -> Result<EstPairCols, ParseError> {
    let mut q = QueryClauses::default();
    let mut subcolumns = None;
    for p in pair.into_inner() {
        if p.as_rule() == Rule::for_cols {
            let mut items = Vec::new();
            for c in p.into_inner() {
                if c.as_rule() == Rule::col_list_item {
                    let inner = c.into_inner().next().unwrap();
                    items.push(match inner.as_rule() {
                        Rule::subquery_parens => {
                            let sub = inner.into_inner().next().unwrap();
                            ColListItem::Subquery(Box::new(lower_query(sub, st)?))
                        }
                        _ => ColListItem::Name(lower_name(inner)),
                    });
                }
            }
            subcolumns = Some(items);
        } else {
            lower_common_clause(p, st, &mut q)?;
        }
    }
    Ok(EstPairCols {
        columns: q.columns,
        population: q.population.unwrap(),
        subcolumns,
        generator: q.generator,
        models: q.models,
        condition: q.condition,
        order: q.order,
        limit: q.limit,
    })
}

fn lower_est_pair_row(pair: Pair<'_>, st: &mut Params) -> Result<EstPairRow, ParseError> {
    let mut q = QueryClauses::default();
    let mut expression = None;
    let mut name = None;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::expression => expression = Some(lower_expr(p, st)?),
            Rule::alias => name = lower_alias(p),
            _ => {
                lower_common_clause(p, st, &mut q)?;
            }
        }
    }
    Ok(EstPairRow {
        expression: expression.unwrap(),
        name,
        population: q.population.unwrap(),
        generator: q.generator,
        models: q.models,
        condition: q.condition,
        order: q.order,
        limit: q.limit,
    })
}

fn lower_infer(pair: Pair<'_>, st: &mut Params) -> Result<Query, ParseError> {
    let mut q = QueryClauses::default();
    let mut auto: Option<(Vec<Name>, Option<Expr>)> = None;
    let mut explicit: Option<Vec<InferCol>> = None;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::infer_auto_columns => {
                let mut cols = Vec::new();
                let mut conf = None;
                for c in p.into_inner() {
                    match c.as_rule() {
                        Rule::name_list => cols = lower_name_list(c),
                        Rule::with_confidence => {
                            conf = Some(lower_expr(
                                c.into_inner().nth(2).unwrap(),
                                st,
                            )?);
                        }
                        _ => {}
                    }
                }
                auto = Some((cols, conf));
            }
            Rule::explicit_columns => {
                let mut cols = Vec::new();
                for c in p.into_inner() {
                    if c.as_rule() == Rule::infer_exp_column {
                        let inner = c.into_inner().next().unwrap();
                        cols.push(match inner.as_rule() {
                            Rule::predict_column => lower_predict_column(inner),
                            _ => InferCol::Sel(lower_select_column(inner, st)?),
                        });
                    }
                }
                explicit = Some(cols);
            }
            _ => {
                lower_common_clause(p, st, &mut q)?;
            }
        }
    }
    if let Some(columns) = explicit {
        Ok(Query::InferExplicit(InferExplicit {
            columns,
            population: q.population.unwrap(),
            generator: q.generator,
            models: q.models,
            condition: q.condition,
            grouping: q.grouping,
            order: q.order,
            limit: q.limit,
        }))
    } else {
        let (columns, confidence) = auto.unwrap();
        Ok(Query::Infer(Infer {
            columns,
            confidence,
            population: q.population.unwrap(),
            generator: q.generator,
            models: q.models,
            condition: q.condition,
            grouping: q.grouping,
            order: q.order,
            limit: q.limit,
        }))
    }
}

fn lower_predict_column(pair: Pair<'_>) -> InferCol {
    let mut names = Vec::new();
    let mut alias = None;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::name => names.push(lower_name(p)),
            Rule::alias => alias = lower_alias(p),
            _ => {}
        }
    }
    InferCol::Predict {
        column: names[0].clone(),
        name: alias,
        confidence: names[1].clone(),
    }
}

fn lower_simulate(pair: Pair<'_>, st: &mut Params) -> Result<Simulate, ParseError> {
    let mut q = QueryClauses::default();
    let mut columns = Vec::new();
    let mut constraints = Vec::new();
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::name_list => columns = lower_name_list(p),
            Rule::given_clause => {
                for c in p.into_inner() {
                    if c.as_rule() == Rule::constraint {
                        constraints.push(lower_constraint(c, st)?);
                    }
                }
            }
            _ => {
                lower_common_clause(p, st, &mut q)?;
            }
        }
    }
    let lim = q.limit.unwrap();
    Ok(Simulate {
        columns,
        population: q.population.unwrap(),
        generator: q.generator,
        models: q.models,
        constraints,
        limit: lim.limit,
    })
}

fn lower_constraint(pair: Pair<'_>, st: &mut Params) -> Result<(Name, Expr), ParseError> {
    let mut name = String::new();
    let mut expr = None;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::name => name = lower_name(p),
            Rule::expression => expr = Some(lower_expr(p, st)?),
            _ => {}
        }
    }
    Ok((name, expr.unwrap()))
}

fn lower_select_column(pair: Pair<'_>, st: &mut Params) -> Result<SelCol, ParseError> {
    let inner = pair.into_inner().next().unwrap();
    match inner.as_rule() {
        Rule::star => Ok(SelCol::Star),
        Rule::tab_star => {
            let name = inner
                .into_inner()
                .find(|p| p.as_rule() == Rule::name)
                .map(lower_name)
                .unwrap();
            Ok(SelCol::TabStar(name))
        }
        Rule::sel_col_exp => {
            let mut expr = None;
            let mut name = None;
            for p in inner.into_inner() {
                match p.as_rule() {
                    Rule::expression => expr = Some(lower_expr(p, st)?),
                    Rule::alias => name = lower_alias(p),
                    _ => {}
                }
            }
            Ok(SelCol::Exp { expr: expr.unwrap(), name })
        }
        r => unreachable!("select column rule {:?}", r),
    }
}

fn lower_alias(pair: Pair<'_>) -> Option<Name> {
    pair.into_inner().find(|p| p.as_rule() == Rule::name).map(lower_name)
}

fn lower_name_list(pair: Pair<'_>) -> Vec<Name> {
    pair.into_inner()
        .filter(|p| p.as_rule() == Rule::name)
        .map(lower_name)
        .collect()
}

fn lower_name(pair: Pair<'_>) -> Name {
    let s = pair.as_str();
    if let Some(stripped) = s.strip_prefix('"') {
        stripped
            .strip_suffix('"')
            .unwrap_or(stripped)
            .replace("\"\"", "\"")
    } else {
        s.to_string()
    }
}

// ----------------------------------------------------------- expressions

fn lower_expr(pair: Pair<'_>, st: &mut Params) -> Result<Expr, ParseError> {
    match pair.as_rule() {
        Rule::expression | Rule::case_key => {
            lower_expr(pair.into_inner().next().unwrap(), st)
        }
        Rule::boolean_or
        | Rule::boolean_and
        | Rule::ordering
        | Rule::bitwise
        | Rule::additive
        | Rule::multiplicative
        | Rule::concatenative => lower_chain(pair, st),
        Rule::boolean_not => {
            let mut inner = pair.into_inner();
            let first = inner.next().unwrap();
            if first.as_rule() == Rule::K_NOT {
                let operand = lower_expr(inner.next().unwrap(), st)?;
                Ok(Expr::Op { op: Op::BoolNot, operands: vec![operand] })
            } else {
                lower_expr(first, st)
            }
        }
        Rule::equality => lower_equality(pair, st),
        Rule::collating => {
            let mut inner = pair.into_inner();
            let mut expr = lower_expr(inner.next().unwrap(), st)?;
            for tail in inner {
                let collation = tail
                    .into_inner()
                    .find(|p| p.as_rule() == Rule::name)
                    .map(lower_name)
                    .unwrap();
                expr = Expr::Collate { expr: Box::new(expr), collation };
            }
            Ok(expr)
        }
        Rule::unary => {
            let mut inner = pair.into_inner();
            let first = inner.next().unwrap();
            if first.as_rule() == Rule::unary_op {
                let op = match first.into_inner().next().unwrap().as_rule() {
                    Rule::op_bitnot => Op::BitNot,
                    Rule::op_sub => Op::Neg,
                    _ => Op::Pos,
                };
                let operand = lower_expr(inner.next().unwrap(), st)?;
                Ok(Expr::Op { op, operands: vec![operand] })
            } else {
                lower_expr(first, st)
            }
        }
        Rule::bql_primary => lower_expr(pair.into_inner().next().unwrap(), st),
        Rule::bqlfn => lower_bqlfn(pair, st),
        Rule::primary => lower_primary(pair, st),
        r => unreachable!("expression rule {:?}", r),
    }
}

fn lower_chain(pair: Pair<'_>, st: &mut Params) -> Result<Expr, ParseError> {
    let mut inner = pair.into_inner();
    let mut lhs = lower_expr(inner.next().unwrap(), st)?;
    while let Some(op_pair) = inner.next() {
        let op = chain_op(&op_pair);
        let rhs = lower_expr(inner.next().unwrap(), st)?;
        lhs = Expr::Op { op, operands: vec![lhs, rhs] };
    }
    Ok(lhs)
}

fn chain_op(pair: &Pair<'_>) -> Op {
    let rule = match pair.as_rule() {
        Rule::K_OR => return Op::BoolOr,
        Rule::K_AND => return Op::BoolAnd,
        Rule::op_concat => return Op::Concat,
        _ => pair.clone().into_inner().next().unwrap().as_rule(),
    };
    match rule {
        Rule::op_lteq => Op::Leq,
        Rule::op_gteq => Op::Geq,
        Rule::op_lt => Op::Lt,
        Rule::op_gt => Op::Gt,
        Rule::op_lshift => Op::LShift,
        Rule::op_rshift => Op::RShift,
        Rule::op_bitand => Op::BitAnd,
        Rule::op_bitor => Op::BitOr,
        Rule::op_add => Op::Add,
        Rule::op_sub => Op::Sub,
        Rule::op_mul => Op::Mul,
        Rule::op_div => Op::Div,
        Rule::op_rem => Op::Rem,
        r => unreachable!("chain op rule {:?}", r),
    }
}

fn lower_equality(pair: Pair<'_>, st: &mut Params) -> Result<Expr, ParseError> {
    let mut inner = pair.into_inner();
    let mut lhs = lower_expr(inner.next().unwrap(), st)?;
    for tail in inner {
        let tail = tail.into_inner().next().unwrap();
        lhs = lower_equality_tail(lhs, tail, st)?;
    }
    Ok(lhs)
}

fn lower_equality_tail(
    lhs: Expr,
    tail: Pair<'_>,
    st: &mut Params,
) -> Result<Expr, ParseError> {
    let rule = tail.as_rule();
    let mut negated = false;
    let mut operands = vec![lhs];
    let mut escape = None;
    let mut query = None;
    let mut cmp = None;
    for p in tail.into_inner() {
        match p.as_rule() {
            Rule::K_NOT => negated = true,
            Rule::ordering => operands.push(lower_expr(p, st)?),
            Rule::escape_tail => {
                escape = Some(lower_expr(p.into_inner().nth(1).unwrap(), st)?);
            }
            Rule::subquery_parens => {
                let q = p.into_inner().next().unwrap();
                query = Some(lower_query(q, st)?);
            }
            Rule::cmp_eq_op => {
                cmp = Some(p.into_inner().next().unwrap().as_rule());
            }
            _ => {}
        }
    }
    let op = match rule {
        Rule::is_tail => {
            if negated {
                Op::IsNot
            } else {
                Op::Is
            }
        }
        Rule::like_tail | Rule::glob_tail | Rule::regexp_tail | Rule::match_tail => {
            let esc = escape.is_some();
            if let Some(e) = escape {
                operands.push(e);
            }
            match (rule, negated, esc) {
                (Rule::like_tail, false, false) => Op::Like,
                (Rule::like_tail, true, false) => Op::NotLike,
                (Rule::like_tail, false, true) => Op::LikeEsc,
                (Rule::like_tail, true, true) => Op::NotLikeEsc,
                (Rule::glob_tail, false, false) => Op::Glob,
                (Rule::glob_tail, true, false) => Op::NotGlob,
                (Rule::glob_tail, false, true) => Op::GlobEsc,
                (Rule::glob_tail, true, true) => Op::NotGlobEsc,
                (Rule::regexp_tail, false, false) => Op::Regexp,
                (Rule::regexp_tail, true, false) => Op::NotRegexp,
                (Rule::regexp_tail, false, true) => Op::RegexpEsc,
                (Rule::regexp_tail, true, true) => Op::NotRegexpEsc,
                (Rule::match_tail, false, false) => Op::Match,
                (Rule::match_tail, true, false) => Op::NotMatch,
                (Rule::match_tail, false, true) => Op::MatchEsc,
                (_, true, true) => Op::NotMatchEsc,
                _ => unreachable!(),
            }
        }
        Rule::between_tail => {
            if negated {
                Op::NotBetween
            } else {
                Op::Between
            }
        }
        Rule::in_tail => {
            let expr = operands.remove(0);
            return Ok(Expr::In {
                expr: Box::new(expr),
                positive: !negated,
                query: Box::new(query.unwrap()),
            });
        }
        Rule::isnull_tail => Op::IsNull,
        Rule::notnull_tail => Op::NotNull,
        Rule::cmp_eq_tail => match cmp.unwrap() {
            Rule::op_eq | Rule::op_eqeq => Op::Eq,
            _ => Op::Neq,
        },
        r => unreachable!("equality tail rule {:?}", r),
    };
    Ok(Expr::Op { op, operands })
}

fn lower_primary(pair: Pair<'_>, st: &mut Params) -> Result<Expr, ParseError> {
    let inner = pair.into_inner().next().unwrap();
    match inner.as_rule() {
        Rule::literal => lower_literal(inner),
        Rule::case_expr => lower_case(inner, st),
        Rule::cast_expr => lower_cast(inner, st),
        Rule::exists_expr => {
            let sub = inner
                .into_inner()
                .find(|p| p.as_rule() == Rule::subquery_parens)
                .unwrap();
            let q = sub.into_inner().next().unwrap();
            Ok(Expr::Exists(Box::new(lower_query(q, st)?)))
        }
        Rule::subquery_parens => {
            let q = inner.into_inner().next().unwrap();
            Ok(Expr::Sub(Box::new(lower_query(q, st)?)))
        }
        Rule::paren_expr => lower_expr(inner.into_inner().next().unwrap(), st),
        Rule::apply_star => {
            let operator = inner
                .into_inner()
                .find(|p| p.as_rule() == Rule::name)
                .map(lower_name)
                .unwrap();
            Ok(Expr::AppStar { operator })
        }
        Rule::apply => {
            let mut operator = String::new();
            let mut distinct = false;
            let mut operands = Vec::new();
            for p in inner.into_inner() {
                match p.as_rule() {
                    Rule::name => operator = lower_name(p),
                    Rule::K_DISTINCT => distinct = true,
                    Rule::expression_list => {
                        for e in p.into_inner() {
                            operands.push(lower_expr(e, st)?);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Expr::App { operator, distinct, operands })
        }
        Rule::numpar => {
            let digits = &inner.as_str()[1..];
            let number = if digits.is_empty() {
                st.numpar_next()
            } else {
                let n: usize = digits
                    .parse()
                    .map_err(|_| invalid(&inner, "parameter number too large"))?;
                st.numpar_explicit(n)
            };
            Ok(Expr::NumPar(number))
        }
        Rule::nampar => {
            let raw = &inner.as_str()[1..];
            let (number, name) = st.nampar(raw);
            Ok(Expr::NamPar { number, name })
        }
        Rule::col_ref => {
            let names: Vec<Name> = inner
                .into_inner()
                .filter(|p| p.as_rule() == Rule::name)
                .map(lower_name)
                .collect();
            if names.len() == 2 {
                Ok(Expr::Col { table: Some(names[0].clone()), column: names[1].clone() })
            } else {
                Ok(Expr::Col { table: None, column: names[0].clone() })
            }
        }
        r => unreachable!("primary rule {:?}", r),
    }
}

fn lower_literal(pair: Pair<'_>) -> Result<Expr, ParseError> {
    let inner = pair.into_inner().next().unwrap();
    let lit = match inner.as_rule() {
        Rule::K_NULL => Lit::Null,
        Rule::integer_lit => {
            let s = inner.as_str();
            let parsed = if let Some(hex) =
                s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))
            {
                i64::from_str_radix(hex, 16)
            } else {
                s.parse()
            };
            Lit::Integer(parsed.map_err(|_| invalid(&inner, "integer literal out of range"))?)
        }
        Rule::float_lit => Lit::Float(
            inner
                .as_str()
                .parse()
                .map_err(|_| invalid(&inner, "malformed float literal"))?,
        ),
        Rule::string_lit => {
            let s = inner.as_str();
            Lit::String(s[1..s.len() - 1].replace("''", "'"))
        }
        r => unreachable!("literal rule {:?}", r),
    };
    Ok(Expr::Literal(lit))
}

fn lower_case(pair: Pair<'_>, st: &mut Params) -> Result<Expr, ParseError> {
    let mut key = None;
    let mut whens = Vec::new();
    let mut otherwise = None;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::case_key => key = Some(Box::new(lower_expr(p, st)?)),
            Rule::when_clause => {
                let mut exprs = Vec::new();
                for c in p.into_inner() {
                    if c.as_rule() == Rule::expression {
                        exprs.push(lower_expr(c, st)?);
                    }
                }
                let then = exprs.pop().unwrap();
                let when = exprs.pop().unwrap();
                whens.push((when, then));
            }
            Rule::else_clause => {
                otherwise = Some(Box::new(lower_expr(
                    p.into_inner().nth(1).unwrap(),
                    st,
                )?));
            }
            _ => {}
        }
    }
    Ok(Expr::Case { key, whens, otherwise })
}

fn lower_cast(pair: Pair<'_>, st: &mut Params) -> Result<Expr, ParseError> {
    let mut expr = None;
    let mut typ = Type { names: Vec::new(), args: Vec::new() };
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::expression => expr = Some(lower_expr(p, st)?),
            Rule::type_name => {
                for t in p.into_inner() {
                    match t.as_rule() {
                        Rule::name => typ.names.push(lower_name(t)),
                        Rule::type_args => {
                            for a in t.into_inner() {
                                if a.as_rule() == Rule::signed_int {
                                    typ.args.push(a.as_str().parse().map_err(|_| {
                                        invalid(&a, "type argument out of range")
                                    })?);
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }
    Ok(Expr::Cast { expr: Box::new(expr.unwrap()), typ })
}

fn lower_given(pair: Pair<'_>, st: &mut Params) -> Result<Vec<(Name, Expr)>, ParseError> {
    let mut given = Vec::new();
    for p in pair.into_inner() {
        if p.as_rule() == Rule::constraint {
            given.push(lower_constraint(p, st)?);
        }
    }
    Ok(given)
}

fn lower_of_with(pair: Pair<'_>) -> ColRefs {
    let inner = pair.into_inner().next().unwrap();
    let names: Vec<Name> = inner
        .clone()
        .into_inner()
        .filter(|p| p.as_rule() == Rule::name)
        .map(lower_name)
        .collect();
    match inner.as_rule() {
        Rule::of_with_both => ColRefs::OfWith(names[0].clone(), names[1].clone()),
        _ => ColRefs::With(names[0].clone()),
    }
}

fn lower_bqlfn(pair: Pair<'_>, st: &mut Params) -> Result<Expr, ParseError> {
    let inner = pair.into_inner().next().unwrap();
    let bql = match inner.as_rule() {
        Rule::predprob_fn => {
            let mut column = String::new();
            let mut given = Vec::new();
            for p in inner.into_inner() {
                match p.as_rule() {
                    Rule::name => column = lower_name(p),
                    Rule::given_parens => given = lower_given(p, st)?,
                    _ => {}
                }
            }
            BqlFn::PredProb { column, given }
        }
        Rule::prob_density_fn => {
            let mut targets = Vec::new();
            let mut value = None;
            let mut given = Vec::new();
            for p in inner.into_inner() {
                match p.as_rule() {
                    Rule::density_of => {
                        let d = p.into_inner().next().unwrap();
                        match d.as_rule() {
                            Rule::density_value => {
                                let e = d
                                    .into_inner()
                                    .find(|c| c.as_rule() == Rule::expression)
                                    .unwrap();
                                value = Some(lower_expr(e, st)?);
                            }
                            Rule::density_multi => {
                                for one in d.into_inner() {
                                    if one.as_rule() == Rule::density_one {
                                        targets.push(lower_density_one(one, st)?);
                                    }
                                }
                            }
                            Rule::density_one => {
                                targets.push(lower_density_one(d, st)?);
                            }
                            r => unreachable!("density rule {:?}", r),
                        }
                    }
                    Rule::given_parens => given = lower_given(p, st)?,
                    _ => {}
                }
            }
            match value {
                Some(value) => BqlFn::ProbDensityValue { value, given },
                None => BqlFn::ProbDensity { targets, given },
            }
        }
        Rule::similarity_fn => {
            let mut condition = None;
            let mut context = None;
            for p in inner.into_inner() {
                match p.as_rule() {
                    Rule::sim_to => {
                        let e = p
                            .into_inner()
                            .find(|c| c.as_rule() == Rule::expression)
                            .unwrap();
                        condition = Some(lower_expr(e, st)?);
                    }
                    Rule::sim_context => {
                        context = p
                            .into_inner()
                            .find(|c| c.as_rule() == Rule::name)
                            .map(lower_name);
                    }
                    _ => {}
                }
            }
            BqlFn::Similarity { condition, context }
        }
        Rule::dependence_fn => {
            let columns = inner
                .into_inner()
                .find(|p| p.as_rule() == Rule::of_with)
                .map(lower_of_with)
                .unwrap_or(ColRefs::Implicit);
            BqlFn::DepProb(columns)
        }
        Rule::mutinf_fn => {
            let mut columns = ColRefs::Implicit;
            let mut given = Vec::new();
            let mut nsamples = None;
            for p in inner.into_inner() {
                match p.as_rule() {
                    Rule::of_with => columns = lower_of_with(p),
                    Rule::given_parens => given = lower_given(p, st)?,
                    Rule::using_samples => {
                        let e = p
                            .into_inner()
                            .find(|c| c.as_rule() == Rule::primary)
                            .unwrap();
                        nsamples = Some(lower_primary_wrapper(e, st)?);
                    }
                    _ => {}
                }
            }
            BqlFn::MutInf { columns, given, nsamples }
        }
        Rule::correlation_fn => {
            let mut pvalue = false;
            let mut columns = ColRefs::Implicit;
            for p in inner.into_inner() {
                match p.as_rule() {
                    Rule::pvalue => pvalue = true,
                    Rule::of_with => columns = lower_of_with(p),
                    _ => {}
                }
            }
            BqlFn::Correlation { pvalue, columns }
        }
        Rule::predict_fn => {
            let mut column = String::new();
            let mut confidence = None;
            for p in inner.into_inner() {
                match p.as_rule() {
                    Rule::name => column = lower_name(p),
                    Rule::primary => confidence = Some(lower_primary_wrapper(p, st)?),
                    _ => {}
                }
            }
            BqlFn::Predict { column, confidence: confidence.unwrap() }
        }
        r => unreachable!("bql function rule {:?}", r),
    };
    Ok(Expr::Bql(Box::new(bql)))
}

/// A `primary` pair reached outside the expression chain (sample
/// counts, confidences).
fn lower_primary_wrapper(pair: Pair<'_>, st: &mut Params) -> Result<Expr, ParseError> {
    lower_primary(pair, st)
}

fn lower_density_one(pair: Pair<'_>, st: &mut Params) -> Result<(Name, Expr), ParseError> {
    let mut name = String::new();
    let mut expr = None;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::name => name = lower_name(p),
            Rule::expression => expr = Some(lower_expr(p, st)?),
            _ => {}
        }
    }
    Ok((name, expr.unwrap()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(input: &str) -> Parametrized {
        parse_phrase(input).unwrap()
    }

    #[test]
    fn parses_plain_select() {
        let p = one("SELECT a, b FROM t WHERE a > 1 ORDER BY b DESC LIMIT 10");
        match p.phrase {
            Phrase::Query(Query::Select(s)) => {
                assert_eq!(s.columns.len(), 2);
                assert!(s.condition.is_some());
                assert_eq!(s.order.as_ref().unwrap()[0].sense, OrdSense::Desc);
            }
            other => panic!("unexpected phrase: {:?}", other),
        }
    }

    #[test]
    fn keywords_are_case_insensitive() {
        let a = one("select x from t");
        let b = one("SELECT x FROM t");
        assert_eq!(a.phrase, b.phrase);
    }

    #[test]
    fn numbered_parameters_assign_indices() {
        let p = one("SELECT ?, ?, ?1 FROM t");
        assert_eq!(p.n_numpar, 2);
        match p.phrase {
            Phrase::Query(Query::Select(s)) => {
                let nums: Vec<usize> = s
                    .columns
                    .iter()
                    .map(|c| match c {
                        SelCol::Exp { expr: Expr::NumPar(n), .. } => *n,
                        _ => panic!("expected parameter"),
                    })
                    .collect();
                assert_eq!(nums, vec![1, 2, 1]);
            }
            _ => panic!("expected select"),
        }
    }

    #[test]
    fn named_parameters_share_slots() {
        let p = one("SELECT :x, @X, $y FROM t");
        assert_eq!(p.n_numpar, 2);
        assert_eq!(p.nampar_map, vec![("x".to_string(), 1), ("y".to_string(), 2)]);
    }

    #[test]
    fn parses_estimate_with_bql_operator() {
        let p = one("ESTIMATE PREDICTIVE PROBABILITY OF age AS pp FROM p ORDER BY pp DESC");
        match p.phrase {
            Phrase::Query(Query::Estimate(e)) => {
                assert_eq!(e.population, "p");
                match &e.columns[0] {
                    SelCol::Exp { expr: Expr::Bql(b), name } => {
                        assert_eq!(name.as_deref(), Some("pp"));
                        assert!(matches!(**b, BqlFn::PredProb { .. }));
                    }
                    other => panic!("unexpected column: {:?}", other),
                }
            }
            _ => panic!("expected estimate"),
        }
    }

    #[test]
    fn parses_pairwise_variables() {
        let p = one(
            "ESTIMATE DEPENDENCE PROBABILITY FROM PAIRWISE VARIABLES OF p \
             FOR (a, b) MODELED BY g USING MODELS 0-2, 5",
        );
        match p.phrase {
            Phrase::Query(Query::EstPairCols(e)) => {
                assert_eq!(e.population, "p");
                assert_eq!(e.generator.as_deref(), Some("g"));
                assert_eq!(e.models, Some(vec![(0, 2), (5, 5)]));
                assert_eq!(e.subcolumns.as_ref().unwrap().len(), 2);
            }
            other => panic!("unexpected phrase: {:?}", other),
        }
    }

    #[test]
    fn parses_similarity_with_context() {
        let p = one(
            "ESTIMATE SIMILARITY TO (rowid = 1) IN THE CONTEXT OF a FROM p",
        );
        match p.phrase {
            Phrase::Query(Query::Estimate(e)) => match &e.columns[0] {
                SelCol::Exp { expr: Expr::Bql(b), .. } => match &**b {
                    BqlFn::Similarity { condition, context } => {
                        assert!(condition.is_some());
                        assert_eq!(context.as_deref(), Some("a"));
                    }
                    other => panic!("unexpected bql fn: {:?}", other),
                },
                other => panic!("unexpected column: {:?}", other),
            },
            _ => panic!("expected estimate"),
        }
    }

    #[test]
    fn parses_probability_density_forms() {
        let p = one("ESTIMATE PROBABILITY DENSITY OF a = 2 GIVEN (b = 3) FROM p");
        match p.phrase {
            Phrase::Query(Query::Estimate(e)) => match &e.columns[0] {
                SelCol::Exp { expr: Expr::Bql(b), .. } => match &**b {
                    BqlFn::ProbDensity { targets, given } => {
                        assert_eq!(targets.len(), 1);
                        assert_eq!(given.len(), 1);
                    }
                    other => panic!("unexpected bql fn: {:?}", other),
                },
                other => panic!("unexpected column: {:?}", other),
            },
            _ => panic!("expected estimate"),
        }
        let p = one("ESTIMATE PROBABILITY DENSITY OF VALUE 5 FROM VARIABLES OF p");
        assert!(matches!(p.phrase, Phrase::Query(Query::EstCols(_))));
    }

    #[test]
    fn parses_mml_phrases() {
        let p = one(
            "CREATE POPULATION p FOR t WITH SCHEMA (MODEL a, b AS numerical; IGNORE c)",
        );
        match p.phrase {
            Phrase::CreatePopulation { name, table, schema, .. } => {
                assert_eq!(name, "p");
                assert_eq!(table, "t");
                assert_eq!(schema.len(), 2);
            }
            other => panic!("unexpected phrase: {:?}", other),
        }
        let p = one("CREATE GENERATOR g FOR p USING diag_gauss()");
        match p.phrase {
            Phrase::CreateGenerator { backend, schema, .. } => {
                assert_eq!(backend, "diag_gauss");
                assert_eq!(schema, "");
            }
            other => panic!("unexpected phrase: {:?}", other),
        }
        let p = one("INITIALIZE 10 MODELS FOR g");
        assert!(matches!(p.phrase, Phrase::InitModels { nmodels: 10, .. }));
        let p = one("ANALYZE g MODELS 0-4 FOR 10 ITERATIONS CHECKPOINT 2 ITERATIONS");
        match p.phrase {
            Phrase::Analyze { models, budget, checkpoint, .. } => {
                assert_eq!(models, Some(vec![(0, 4)]));
                assert_eq!(budget, 10);
                assert_eq!(checkpoint, Some((2, TimeUnit::Iterations)));
            }
            other => panic!("unexpected phrase: {:?}", other),
        }
        let p = one("DROP MODELS 1-2 FROM g");
        assert!(matches!(p.phrase, Phrase::DropModels { .. }));
    }

    #[test]
    fn parses_infer_forms() {
        let p = one("INFER a, b WITH CONFIDENCE 0.8 FROM p WHERE a IS NULL");
        match p.phrase {
            Phrase::Query(Query::Infer(i)) => {
                assert_eq!(i.columns, vec!["a".to_string(), "b".to_string()]);
                assert!(i.confidence.is_some());
            }
            other => panic!("unexpected phrase: {:?}", other),
        }
        let p = one("INFER EXPLICIT a, PREDICT b AS bp CONFIDENCE bc FROM p");
        match p.phrase {
            Phrase::Query(Query::InferExplicit(i)) => {
                assert_eq!(i.columns.len(), 2);
                assert!(matches!(
                    i.columns[1],
                    InferCol::Predict { ref confidence, .. } if confidence == "bc"
                ));
            }
            other => panic!("unexpected phrase: {:?}", other),
        }
    }

    #[test]
    fn parses_simulate() {
        let p = one("SIMULATE a, b FROM p GIVEN c = 3 LIMIT 5");
        match p.phrase {
            Phrase::Query(Query::Simulate(s)) => {
                assert_eq!(s.columns.len(), 2);
                assert_eq!(s.constraints.len(), 1);
            }
            other => panic!("unexpected phrase: {:?}", other),
        }
    }

    #[test]
    fn parses_transactions_and_empty_phrases() {
        let ps = parse("BEGIN;; COMMIT;").unwrap();
        assert_eq!(ps.len(), 2);
        assert_eq!(ps[0].phrase, Phrase::Begin);
        assert_eq!(ps[1].phrase, Phrase::Commit);
    }

    #[test]
    fn quoted_names_preserve_case_and_escapes() {
        let p = one(r#"SELECT "Weird ""Name""" FROM t"#);
        match p.phrase {
            Phrase::Query(Query::Select(s)) => match &s.columns[0] {
                SelCol::Exp { expr: Expr::Col { column, .. }, .. } => {
                    assert_eq!(column, "Weird \"Name\"");
                }
                other => panic!("unexpected column: {:?}", other),
            },
            _ => panic!("expected select"),
        }
    }

    #[test]
    fn syntax_error_reports_position() {
        let err = parse("SELECT FROM").unwrap_err();
        match err {
            ParseError::Syntax { line, .. } => assert_eq!(line, 1),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn operator_precedence_nests_correctly() {
        let p = one("SELECT a + b * c FROM t");
        match p.phrase {
            Phrase::Query(Query::Select(s)) => match &s.columns[0] {
                SelCol::Exp { expr: Expr::Op { op: Op::Add, operands }, .. } => {
                    assert!(matches!(operands[1], Expr::Op { op: Op::Mul, .. }));
                }
                other => panic!("unexpected column: {:?}", other),
            },
            _ => panic!("expected select"),
        }
    }

    #[test]
    fn between_and_in_forms() {
        one("SELECT * FROM t WHERE a BETWEEN 1 AND 2");
        one("SELECT * FROM t WHERE a NOT BETWEEN 1 AND 2");
        one("SELECT * FROM t WHERE a IN (SELECT b FROM u)");
        one("SELECT * FROM t WHERE a NOT IN (SELECT b FROM u)");
        one("SELECT * FROM t WHERE a ISNULL");
        one("SELECT * FROM t WHERE a IS NOT NULL");
    }
}
