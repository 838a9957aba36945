//! # inkcell: embedded expression engine
//!
//! inkcell evaluates the small formula language embedded in text cells of a
//! canvas document: users type formulas and scripts, the engine lexes,
//! structurally parses, compiles and evaluates them, producing live values
//! and error diagnostics anchored to source positions.
//!
//! ## Processing Pipeline
//!
//! ```text
//! Cell text → Lexer → Tree Builder → Literal/Function Resolution
//!           → Postfix Compiler → Stack Machine
//! ```
//!
//! ### Stage 1: Lexical Analysis
//!
//! The [`lexer`] module splits a text span into classified tokens:
//! structure (brackets, the fused `)(` from commas and matrix rows), words
//! and strings with juxtaposition adjacency, and error sentinels for
//! malformed input.
//!
//! ### Stage 2: Structural Parsing
//!
//! The [`parser`] module builds a three-kind tree (juxtaposition unions,
//! explicit groups, leaves), rewrites conditional marker chains, resolves
//! leaf spans through the literal interpreter, and recognizes function
//! headers — binding definitions into the symbol table as it descends.
//!
//! ### Stage 3: Compilation
//!
//! The [`eval::compile`] module converts function bodies into flat postfix
//! programs via generalized operator-precedence parsing, cached per
//! function identity for the evaluation session.
//!
//! ### Stage 4: Evaluation
//!
//! The [`eval::machine`] module executes programs on an explicit work
//! stack — no host recursion — with dynamic scoping, a frame-depth cap,
//! error-as-value propagation and a cancellation side channel.
//!
//! ## Error Handling
//!
//! Language-level failures are ordinary [`object::Object::Error`] values
//! flowing through the same channels as results; the machine's only
//! special case is that the first error short-circuits the union enclosing
//! it. Host-level failures surface as [`error::Error`] at the embedding
//! boundary.
//!
//! ## Usage Example
//!
//! ```rust
//! use inkcell::{evaluate_source, eval::{Indifferent, SymbolTable}, object::Object};
//!
//! let mut table = SymbolTable::standard();
//! evaluate_source("(a) double (a * 2)", &mut table, &mut Indifferent);
//! let result = evaluate_source("double(21)", &mut table, &mut Indifferent);
//! assert_eq!(result.value, Object::Int(42));
//! ```

pub mod config;
pub mod error;
pub mod eval;
pub mod lexer;
pub mod object;
pub mod parser;

// Re-exports
pub use config::EvalConfig;
pub use error::{Error, InternalResult};
pub use eval::{calculate, calculate_async, Calculation, Observer, SymbolTable};
pub use object::{Diag, DiagKind, Function, Key, Object, Rect};
pub use parser::{parse, ParseOutcome};

/// Parses one cell and evaluates it in a single step.
///
/// Definitions bind into `table` during the parse, so evaluating a sequence
/// of cells against one table gives them a shared namespace.
pub fn evaluate_source(
    input: &str,
    table: &mut SymbolTable,
    observer: &mut dyn Observer,
) -> Calculation {
    let parsed = parse(input, table, None);
    calculate(&parsed.root, table, observer)
}
