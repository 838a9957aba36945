//! # Evaluator
//!
//! Final stages of the pipeline: postfix compilation and the stack-machine
//! that executes it.
//!
//! ## Component Structure
//!
//! * [`context`]: the symbol table (dynamic scoping via LIFO save/restore
//!   shadow frames) and the per-session compiled-program cache
//! * [`compile`]: generalized operator-precedence compiler producing flat
//!   postfix programs
//! * [`machine`]: the non-recursive two-stack machine with depth cap,
//!   union combine and the observation side channel
//! * [`builtins`]: primitive operations, the standard environment and the
//!   rendering collaborator seam
//!
//! ## Entry Points
//!
//! [`calculate`] is the synchronous evaluation entry point; the async
//! variant is a cooperative wrapper with identical semantics — it suspends
//! once at the public boundary and never inside the machine loop.

pub mod builtins;
pub mod compile;
pub mod context;
pub mod machine;

pub use builtins::{NoopSink, RenderSink};
pub use context::{ProgramCache, ShadowFrame, SymbolTable};
pub use machine::{union, Calculation, Indifferent, Machine, Observer};

use crate::config::EvalConfig;
use crate::object::Object;

/// Evaluates a parsed root object against the symbol table, reporting every
/// intermediate result through the observer.
pub fn calculate(
    root: &Object,
    table: &mut SymbolTable,
    observer: &mut dyn Observer,
) -> Calculation {
    calculate_with(root, table, observer, &NoopSink, EvalConfig::default())
}

/// [`calculate`] with an explicit render sink and evaluation limits.
pub fn calculate_with(
    root: &Object,
    table: &mut SymbolTable,
    observer: &mut dyn Observer,
    sink: &dyn RenderSink,
    config: EvalConfig,
) -> Calculation {
    Machine::new(table, observer, sink, config).run(root)
}

/// Async variant of [`calculate`] with identical semantics and return
/// shape. Suspension happens only here at the boundary; the machine itself
/// stays synchronous.
pub async fn calculate_async(
    root: &Object,
    table: &mut SymbolTable,
    observer: &mut dyn Observer,
) -> Calculation {
    tokio::task::yield_now().await;
    calculate(root, table, observer)
}
