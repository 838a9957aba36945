//! # Lexical Analyzer
//!
//! First stage of the pipeline: turns the raw text span of a cell into a
//! flat sequence of classified tokens for the tree builder.
//!
//! ## Token Stream Shape
//!
//! The language has no keywords; a cell is whitespace-separated words,
//! quoted strings and brackets. The lexer contributes three things beyond
//! splitting:
//!
//! * **Structure tokens**: every bracket kind lexes to [`Token::Start`] /
//!   [`Token::End`]; a comma inside a group rewrites to the fused
//!   [`Token::EndStart`], splitting one n-ary call into chained unary
//!   application. Leading tab runs synthesize the same tokens so indented
//!   and multi-line cells group as matrix rows.
//! * **Adjacency classification**: a word or string glued to a neighboring
//!   token with no intervening whitespace is promoted to its
//!   left/right/center variant, which is how juxtaposition (`f(x)`, `2x`,
//!   `(a)b`) survives into the tree builder.
//! * **Error tokens**: malformed input (unterminated string, unbalanced
//!   bracket) never aborts the pipeline; the lexer returns a single
//!   error-tagged token and downstream stages check for the sentinel.
//!
//! ## Integration Points
//!
//! 1. **Input**: raw cell text
//! 2. **Processing**: [`Lexer::lex`](scan::Lexer::lex)
//! 3. **Output**: `Vec<TokenSpan>` with source positions
//! 4. **Next stage**: the tree builder consumes the stream

pub mod scan;
pub mod token;

pub use scan::Lexer;
pub use token::{Adjacency, LexError, Span, Token, TokenSpan};
