use std::sync::Arc;

use tracing::debug;

use crate::object::{Assoc, DiagKind, Function, Key, Object};

use super::context::{ProgramCache, SymbolTable};

/// One postfix instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    /// Push a literal operand.
    Push(Object),
    /// Evaluate an anonymous zero-argument group in place.
    EvalBlock(Arc<Function>),
    /// Resolve a key against the symbol table at run time.
    LoadVar(Key),
    /// Pop `arity` operands and apply the function to them.
    Apply { func: Arc<Function>, arity: usize },
}

/// Flat postfix program for one function body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub instrs: Vec<Instr>,
}

/// Returns the compiled program for a function, preferring its precompiled
/// slot, then the session cache, compiling and caching on a miss.
pub fn program_for(func: &Function, table: &SymbolTable, cache: &mut ProgramCache) -> Arc<Program> {
    if let Some(program) = &func.compiled {
        return program.clone();
    }
    if let Some(program) = cache.get(func.id) {
        return program;
    }
    let program = Arc::new(compile_body(&func.body, table));
    cache.insert(func.id, program.clone());
    program
}

struct OpEntry {
    key: Key,
    func: Arc<Function>,
    /// Output index when this operator was shelved; everything emitted
    /// after it is the operator's right-branch computation.
    boundary: usize,
}

/// Generalized shunting-yard over one body.
///
/// Values emit immediately; identifiers that resolve to a function through
/// their call-shape candidate keys become operators on an explicit stack.
/// An incoming operator pops shelved ones that bind tighter, that tie on
/// precedence from the left, or that tie with a different key —
/// right-associative repeats of the same key never pop each other.
#[tracing::instrument(level = "debug", skip_all)]
pub fn compile_body(body: &[Object], table: &SymbolTable) -> Program {
    let mut out: Vec<Instr> = Vec::new();
    let mut ops: Vec<OpEntry> = Vec::new();

    for (i, item) in body.iter().enumerate() {
        match item {
            Object::Ident(key) => {
                let has_left = !out.is_empty();
                let right = count_right_values(&body[i + 1..], table);
                // An occurrence with nothing to consume is a value
                // reference, not an application.
                let resolved = if has_left || right > 0 {
                    table.resolve_operator(key.display(), has_left, right)
                } else {
                    None
                };
                match resolved {
                    Some((resolved, func)) => {
                        // The right group may spill into left parameters
                        // (`double(21)` feeds a left-declared argument), but
                        // it must leave room for a present left operand.
                        if right > func.arity() || (has_left && right >= func.arity()) {
                            out.push(Instr::Push(Object::error(
                                DiagKind::Arity,
                                format!("arguments do not match '{}'", key.display()),
                            )));
                            continue;
                        }
                        while let Some(top) = ops.last() {
                            let pop = top.func.precedence > func.precedence
                                || (top.func.precedence == func.precedence
                                    && (func.assoc == Assoc::Left || top.key != resolved));
                            if !pop {
                                break;
                            }
                            let entry = ops.pop().expect("ops.last() was Some");
                            emit_apply(&mut out, entry);
                        }
                        ops.push(OpEntry {
                            key: resolved,
                            func,
                            boundary: out.len(),
                        });
                    }
                    None => out.push(Instr::LoadVar(key.clone())),
                }
            }
            Object::Function(func) if func.arity() == 0 && !func.is_block => {
                out.push(Instr::EvalBlock(func.clone()));
            }
            other => out.push(Instr::Push(other.clone())),
        }
    }

    while let Some(entry) = ops.pop() {
        emit_apply(&mut out, entry);
    }

    debug!(instrs = out.len(), "compiled body");
    Program { instrs: out }
}

/// Emits the application for a shelved operator. Short-circuit operators
/// defer: everything emitted since their branch boundary wraps into a
/// nested block value instead of staying flattened.
fn emit_apply(out: &mut Vec<Instr>, entry: OpEntry) {
    if entry.func.tag.is_short_circuit() {
        let deferred = out.split_off(entry.boundary);
        let block = Function {
            compiled: Some(Arc::new(Program { instrs: deferred })),
            ..Function::block(Vec::new())
        };
        out.push(Instr::Push(Object::function(block)));
    }
    let arity = entry.func.arity();
    out.push(Instr::Apply {
        func: entry.func,
        arity,
    });
}

/// Length of the maximal value run (the right argument group) starting at
/// `rest`: literals, groups, closures and plain identifiers count; the next
/// operator identifier ends it.
fn count_right_values(rest: &[Object], table: &SymbolTable) -> usize {
    rest.iter()
        .take_while(|item| match item {
            Object::Ident(key) => !table.is_operator(key.display()),
            _ => true,
        })
        .count()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::object::RuntimeTag;

    fn body(table: &mut SymbolTable, input: &str) -> Vec<Object> {
        let outcome = crate::parser::parse(input, table, None);
        match outcome.root {
            Object::Function(f) => f.body.clone(),
            other => panic!("expected root function, got {:?}", other),
        }
    }

    fn ops_of(program: &Program) -> Vec<String> {
        program
            .instrs
            .iter()
            .map(|instr| match instr {
                Instr::Push(o) => format!("push {}", o),
                Instr::EvalBlock(_) => "block".to_string(),
                Instr::LoadVar(k) => format!("load {}", k),
                Instr::Apply { func, arity } => format!(
                    "apply {} /{}",
                    func.name.as_ref().map(|k| k.display()).unwrap_or("?"),
                    arity
                ),
            })
            .collect()
    }

    #[test]
    fn test_binary_operator() {
        let mut table = SymbolTable::standard();
        let items = body(&mut table, "1 + 2");
        let program = compile_body(&items, &table);
        assert_eq!(
            ops_of(&program),
            vec!["push 1", "push 2", "apply + /2"]
        );
    }

    #[test]
    fn test_precedence_orders_applications() {
        let mut table = SymbolTable::standard();
        let items = body(&mut table, "1 + 2 * 3");
        let program = compile_body(&items, &table);
        assert_eq!(
            ops_of(&program),
            vec!["push 1", "push 2", "push 3", "apply * /2", "apply + /2"]
        );
    }

    #[test]
    fn test_right_assoc_same_key_never_pops() {
        let mut table = SymbolTable::standard();
        let items = body(&mut table, "2 ^ 3 ^ 2");
        let program = compile_body(&items, &table);
        // Innermost power applies first: 2 ^ (3 ^ 2).
        assert_eq!(
            ops_of(&program),
            vec!["push 2", "push 3", "push 2", "apply ^ /2", "apply ^ /2"]
        );
    }

    #[test]
    fn test_unary_minus_resolves_by_shape() {
        let mut table = SymbolTable::standard();
        let items = body(&mut table, "- 5");
        let program = compile_body(&items, &table);
        match &program.instrs[1] {
            Instr::Apply { func, arity } => {
                assert_eq!(func.tag, RuntimeTag::Negate);
                assert_eq!(*arity, 1);
            }
            other => panic!("expected apply, got {:?}", other),
        }
    }

    #[test]
    fn test_short_circuit_defers_right_branch() {
        let mut table = SymbolTable::standard();
        let items = body(&mut table, "false and (1 / 0)");
        let program = compile_body(&items, &table);
        assert_eq!(program.instrs.len(), 3);
        assert!(matches!(&program.instrs[0], Instr::LoadVar(k) if k.display() == "false"));
        // The right branch is a pushed block literal, not flattened code.
        match &program.instrs[1] {
            Instr::Push(Object::Function(f)) => {
                assert!(f.is_block);
                assert!(f.compiled.is_some());
            }
            other => panic!("expected deferred block, got {:?}", other),
        }
        assert!(matches!(&program.instrs[2], Instr::Apply { func, .. } if func.tag == RuntimeTag::And));
    }

    #[test]
    fn test_unknown_identifier_stays_dynamic() {
        let mut table = SymbolTable::standard();
        let items = body(&mut table, "g + 1");
        let program = compile_body(&items, &table);
        assert!(matches!(&program.instrs[0], Instr::LoadVar(k) if k.display() == "g"));
    }

    #[test]
    fn test_oversized_argument_group_errors_in_place() {
        let mut table = SymbolTable::standard();
        crate::parser::parse("(a) double (a * 2)", &mut table, None);
        let items = body(&mut table, "double(1)(2)(3)");
        let inner = match &items[0] {
            Object::Function(f) => f.body.clone(),
            other => panic!("expected union group, got {:?}", other),
        };
        let program = compile_body(&inner, &table);
        assert!(program.instrs.iter().any(|i| matches!(
            i,
            Instr::Push(Object::Error(diag)) if diag.kind == DiagKind::Arity
        )));
    }

    #[test]
    fn test_cache_reused_verbatim() {
        let mut table = SymbolTable::standard();
        let mut cache = ProgramCache::new();
        let items = body(&mut table, "1 + 2");
        let func = Function::group(items);
        let first = program_for(&func, &table, &mut cache);
        let second = program_for(&func, &table, &mut cache);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }
}
