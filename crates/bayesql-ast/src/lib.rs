//! BQL language front end: phrase scanner, grammar, typed AST and
//! pretty-printer.
//!
//! The grammar file `bql.pest` is the source of truth for the
//! surface syntax; `parser` lowers pest's parse pairs into the typed
//! AST in `ast`; `unparse` prints an AST back to canonical text such
//! that parse ∘ unparse ∘ parse = parse.

pub mod ast;
pub mod lex;
pub mod parser;
pub mod unparse;

pub use ast::{Parametrized, Phrase, Query};
pub use lex::{split_phrases, LexicalError};
pub use parser::{parse, parse_phrase, ParseError};
pub use unparse::{unparse_phrase, unparse_query};
