use std::sync::Arc;

use tracing::{debug, trace};

use crate::config::EvalConfig;
use crate::object::{Diag, DiagKind, Function, Key, Object, RuntimeTag};

use super::builtins::{self, RenderSink};
use super::compile::{self, Instr, Program};
use super::context::{ProgramCache, ShadowFrame, SymbolTable};

/// Side channel for live progress: sees every frame result, not only the
/// final one, together with the originating identifier when known. The
/// boolean return is the sole cancellation mechanism — `false` halts
/// evaluation with the stopped sentinel.
pub trait Observer {
    fn observe(&mut self, origin: Option<&Key>, value: &Object) -> bool;
}

impl<F> Observer for F
where
    F: FnMut(Option<&Key>, &Object) -> bool,
{
    fn observe(&mut self, origin: Option<&Key>, value: &Object) -> bool {
        self(origin, value)
    }
}

/// Observer that never cancels.
#[derive(Debug, Clone, Copy, Default)]
pub struct Indifferent;

impl Observer for Indifferent {
    fn observe(&mut self, _origin: Option<&Key>, _value: &Object) -> bool {
        true
    }
}

/// Final value of one evaluation together with the identifier it
/// originated from, when one is known.
#[derive(Debug, Clone, PartialEq)]
pub struct Calculation {
    pub value: Object,
    pub origin: Option<Key>,
}

/// One pending or suspended application on the explicit work stack.
enum Frame {
    /// A call that has not started executing yet.
    Call {
        func: Arc<Function>,
        origin: Option<Key>,
        args: Vec<Object>,
    },
    /// A program suspended mid-body, waiting for the value of a nested
    /// evaluation; resuming pushes that value onto the saved operand stack.
    Resume {
        func: Arc<Function>,
        program: Arc<Program>,
        pc: usize,
        local: Vec<Object>,
        saved: Option<ShadowFrame>,
        origin: Option<Key>,
    },
    /// One array-shaped builtin mid-iteration, re-entering the machine once
    /// per element through the supplied callback.
    Iterate {
        tag: RuntimeTag,
        callback: Arc<Function>,
        items: Vec<Object>,
        pos: usize,
        acc: Vec<Object>,
        origin: Option<Key>,
    },
}

/// Non-recursive stack machine.
///
/// Host recursion is replaced entirely by the frame stack, so the depth cap
/// holds uniformly whatever the host stack size. The symbol table mutates
/// only in LIFO save/restore pairs matching frame nesting; restoration runs
/// on every exit path, error results and cancellation included.
pub struct Machine<'a> {
    table: &'a mut SymbolTable,
    observer: &'a mut dyn Observer,
    sink: &'a dyn RenderSink,
    config: EvalConfig,
    cache: ProgramCache,
    work: Vec<Frame>,
    first_origin: Option<Key>,
}

impl<'a> Machine<'a> {
    pub fn new(
        table: &'a mut SymbolTable,
        observer: &'a mut dyn Observer,
        sink: &'a dyn RenderSink,
        config: EvalConfig,
    ) -> Self {
        Self {
            table,
            observer,
            sink,
            config,
            cache: ProgramCache::new(),
            work: Vec::new(),
            first_origin: None,
        }
    }

    /// Evaluates a root object (the parser's cell group).
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn run(&mut self, root: &Object) -> Calculation {
        let func = match root {
            Object::Function(func) => func.clone(),
            other => {
                return Calculation {
                    value: other.clone(),
                    origin: None,
                }
            }
        };
        // A definition cell originates from the name it defines.
        if let [Object::Function(defined)] = func.body.as_slice() {
            self.first_origin = defined.name.clone();
        }

        self.work.push(Frame::Call {
            func,
            origin: None,
            args: Vec::new(),
        });

        // `ret` carries the value of the last completed frame to its
        // resumer; `None` means the machine just suspended into a child.
        let mut ret: Option<Object> = None;
        while let Some(frame) = self.work.pop() {
            match frame {
                Frame::Call { func, origin, args } => {
                    debug_assert!(ret.is_none(), "call frames never consume a result");
                    ret = self.enter(func, origin, args);
                }
                Frame::Resume {
                    func,
                    program,
                    pc,
                    mut local,
                    saved,
                    origin,
                } => {
                    match ret.take() {
                        Some(Object::Stopped) => {
                            // Unwind: restore this frame's bindings and keep
                            // propagating the sentinel outward.
                            if let Some(saved) = saved {
                                self.table.restore(saved);
                            }
                            ret = Some(Object::Stopped);
                            continue;
                        }
                        Some(value) => local.push(value),
                        None => {}
                    }
                    ret = self.step(func, program, pc, local, saved, origin);
                }
                Frame::Iterate {
                    tag,
                    callback,
                    items,
                    pos,
                    acc,
                    origin,
                } => {
                    let pending = ret.take();
                    ret = self.iterate(tag, callback, items, pos, acc, origin, pending);
                }
            }
        }

        Calculation {
            value: ret.unwrap_or_default(),
            origin: self.first_origin.take(),
        }
    }

    /// Begins a call: native dispatch for primitives, frame entry (bind,
    /// then walk the program) for custom functions and blocks. `None` means
    /// the machine suspended into a child frame.
    fn enter(
        &mut self,
        func: Arc<Function>,
        origin: Option<Key>,
        args: Vec<Object>,
    ) -> Option<Object> {
        if self.work.len() >= self.config.max_frames {
            let error = Object::error(DiagKind::Depth, "stack exceeded");
            return Some(self.report(origin.as_ref(), error));
        }

        // The first error among the operands wins the application — except
        // for the else-default operator, whose whole point is catching it.
        if func.tag != RuntimeTag::OrElse {
            if let Some(error) = args.iter().find(|a| a.is_error()) {
                return Some(self.report(origin.as_ref(), error.clone()));
            }
        }
        if args.iter().any(|a| matches!(a, Object::Stopped)) {
            return Some(Object::Stopped);
        }

        match func.tag {
            RuntimeTag::Custom => {
                let program = compile::program_for(&func, self.table, &mut self.cache);
                let saved = self.bind(&func, args);
                self.step(func, program, 0, Vec::new(), saved, origin)
            }
            RuntimeTag::Send => self.send(args, origin),
            RuntimeTag::Map | RuntimeTag::Filter | RuntimeTag::Reduce => {
                self.begin_iteration(func.tag, args, origin)
            }
            RuntimeTag::And | RuntimeTag::Or => {
                let keep_left = func.tag == RuntimeTag::Or;
                match builtins::truthy(&args[0]) {
                    Ok(value) if value == keep_left => {
                        Some(self.report(origin.as_ref(), args[0].clone()))
                    }
                    Ok(_) => self.dispatch_branch(&args[1], origin),
                    Err(error) => Some(self.report(origin.as_ref(), error)),
                }
            }
            RuntimeTag::OrElse => {
                if args[0].is_error() {
                    self.dispatch_branch(&args[1], origin)
                } else {
                    Some(self.report(origin.as_ref(), args[0].clone()))
                }
            }
            tag => {
                let result = builtins::apply(tag, &args, self.sink);
                Some(self.report(origin.as_ref(), result))
            }
        }
    }

    /// Runs the deferred branch of a short-circuit operator; a non-block
    /// operand (already a value) passes through unchanged.
    fn dispatch_branch(&mut self, branch: &Object, origin: Option<Key>) -> Option<Object> {
        match branch {
            Object::Function(func) if func.arity() == 0 => {
                self.work.push(Frame::Call {
                    func: func.clone(),
                    origin,
                    args: Vec::new(),
                });
                None
            }
            other => Some(self.report(origin.as_ref(), other.clone())),
        }
    }

    /// Binds arguments and lazy sub-definitions for a custom frame,
    /// returning the shadow to restore on exit. A single map operand whose
    /// labels match the declared externals binds by name.
    fn bind(&mut self, func: &Function, args: Vec<Object>) -> Option<ShadowFrame> {
        let mut bindings: Vec<(Key, Object)> = Vec::new();

        let named = match args.as_slice() {
            [Object::Map(entries)] if func.arity() >= 1 && entries.len() == func.arity() => {
                let mut named = Vec::with_capacity(entries.len());
                let mut complete = true;
                for param in func.left.iter().chain(func.right.iter()) {
                    match Object::map_get(entries, &param.external) {
                        Some(value) => named.push((param.internal.clone(), value)),
                        None => {
                            complete = false;
                            break;
                        }
                    }
                }
                complete.then_some(named)
            }
            _ => None,
        };
        match named {
            Some(named) => bindings.extend(named),
            None => {
                for (param, value) in func.internals().zip(args) {
                    bindings.push((param.clone(), value));
                }
            }
        }
        for (key, value) in &func.locals {
            bindings.push((key.clone(), value.clone()));
        }

        (!bindings.is_empty()).then(|| self.table.shadow(bindings))
    }

    /// Walks a program from `pc` until it suspends or finishes. Returns the
    /// frame's value when it finishes, `None` when suspended (a child frame
    /// will produce the value).
    fn step(
        &mut self,
        func: Arc<Function>,
        program: Arc<Program>,
        mut pc: usize,
        mut local: Vec<Object>,
        saved: Option<ShadowFrame>,
        origin: Option<Key>,
    ) -> Option<Object> {
        // Instructions are cloned out so the program handle stays free to
        // move into a suspension frame.
        while let Some(instr) = program.instrs.get(pc).cloned() {
            trace!(pc, "instr");
            match instr {
                Instr::Push(object) => {
                    if object.is_error() && !self.observer.observe(None, &object) {
                        return Some(self.finish(saved, origin, Object::Stopped));
                    }
                    local.push(object);
                    pc += 1;
                }
                Instr::LoadVar(key) => {
                    if self.work.is_empty() && self.first_origin.is_none() {
                        self.first_origin = Some(key.clone());
                    }
                    match self.table.get(&key) {
                        None => {
                            let error = Object::Error(
                                Diag::new(
                                    DiagKind::Binding,
                                    format!("unknown identifier '{}'", key.display()),
                                )
                                .with_origin(key.clone()),
                            );
                            if !self.observer.observe(Some(&key), &error) {
                                return Some(self.finish(saved, origin, Object::Stopped));
                            }
                            local.push(error);
                            pc += 1;
                        }
                        Some(Object::Function(bound)) if bound.arity() == 0 && !bound.is_block => {
                            let callee = bound.clone();
                            self.suspend(func, program, pc + 1, local, saved, origin);
                            self.work.push(Frame::Call {
                                func: callee,
                                origin: Some(key),
                                args: Vec::new(),
                            });
                            return None;
                        }
                        Some(value) => {
                            local.push(value.clone());
                            pc += 1;
                        }
                    }
                }
                Instr::EvalBlock(block) => {
                    let block_origin = origin.clone();
                    self.suspend(func, program, pc + 1, local, saved, origin);
                    self.work.push(Frame::Call {
                        func: block,
                        origin: block_origin,
                        args: Vec::new(),
                    });
                    return None;
                }
                Instr::Apply {
                    func: callee,
                    arity,
                } => {
                    if local.len() < arity {
                        let error = Object::error(
                            DiagKind::Arity,
                            format!("arguments count should be {}, not {}", arity, local.len()),
                        );
                        if !self.observer.observe(callee.name.as_ref(), &error) {
                            return Some(self.finish(saved, origin, Object::Stopped));
                        }
                        local.push(error);
                        pc += 1;
                        continue;
                    }
                    let args = local.split_off(local.len() - arity);
                    let call_origin = callee.name.clone();
                    self.suspend(func, program, pc + 1, local, saved, origin);
                    self.work.push(Frame::Call {
                        func: callee,
                        origin: call_origin,
                        args,
                    });
                    return None;
                }
            }
        }

        let result = union(local);
        Some(self.finish(saved, origin, result))
    }

    fn suspend(
        &mut self,
        func: Arc<Function>,
        program: Arc<Program>,
        pc: usize,
        local: Vec<Object>,
        saved: Option<ShadowFrame>,
        origin: Option<Key>,
    ) {
        self.work.push(Frame::Resume {
            func,
            program,
            pc,
            local,
            saved,
            origin,
        });
    }

    /// Completes a frame: restores every saved binding exactly, reports the
    /// result, and propagates cancellation when the observer declines.
    fn finish(
        &mut self,
        saved: Option<ShadowFrame>,
        origin: Option<Key>,
        result: Object,
    ) -> Object {
        if let Some(saved) = saved {
            self.table.restore(saved);
        }
        if matches!(result, Object::Stopped) {
            return Object::Stopped;
        }
        self.report(origin.as_ref(), result)
    }

    /// send: applies a function value to an explicit operand list, arity
    /// checked against the callee's declared arity.
    fn send(&mut self, args: Vec<Object>, origin: Option<Key>) -> Option<Object> {
        let func = match args.first() {
            Some(Object::Function(func)) => func.clone(),
            Some(other) => {
                let error = Object::error(
                    DiagKind::Type,
                    format!("send expects a function, got {}", other.type_name()),
                );
                return Some(self.report(origin.as_ref(), error));
            }
            None => return Some(Object::Empty),
        };
        let operands: Vec<Object> = match args.into_iter().nth(1) {
            None | Some(Object::Empty) => Vec::new(),
            Some(Object::Array(items)) => items,
            Some(single) => vec![single],
        };
        if operands.len() != func.arity() {
            let error = Object::error(
                DiagKind::Arity,
                format!(
                    "arguments count should be {}, not {}",
                    func.arity(),
                    operands.len()
                ),
            );
            return Some(self.report(origin.as_ref(), error));
        }
        self.work.push(Frame::Call {
            func,
            origin,
            args: operands,
        });
        None
    }

    fn begin_iteration(
        &mut self,
        tag: RuntimeTag,
        args: Vec<Object>,
        origin: Option<Key>,
    ) -> Option<Object> {
        let mut args = args.into_iter();
        let items = match args.next() {
            Some(Object::Array(items)) => items,
            Some(Object::Map(entries)) => entries.into_iter().map(|(_, v)| v).collect(),
            Some(other) => {
                let error = Object::error(
                    DiagKind::Type,
                    format!("'{}' expects an array, got {}", tag, other.type_name()),
                );
                return Some(self.report(origin.as_ref(), error));
            }
            None => Vec::new(),
        };
        let callback = match args.next() {
            Some(Object::Function(func)) => func,
            other => {
                let error = Object::error(
                    DiagKind::Type,
                    format!(
                        "'{}' expects a callback function, got {}",
                        tag,
                        other.map(|o| o.type_name()).unwrap_or("nothing")
                    ),
                );
                return Some(self.report(origin.as_ref(), error));
            }
        };
        let wanted = if tag == RuntimeTag::Reduce { 2 } else { 1 };
        if callback.arity() != wanted {
            let error = Object::error(
                DiagKind::Arity,
                format!(
                    "arguments count should be {}, not {}",
                    wanted,
                    callback.arity()
                ),
            );
            return Some(self.report(origin.as_ref(), error));
        }

        let (pos, acc) = match tag {
            RuntimeTag::Reduce => {
                if items.is_empty() {
                    return Some(self.report(origin.as_ref(), Object::Empty));
                }
                (1, vec![items[0].clone()])
            }
            _ => (0, Vec::new()),
        };
        let pending = None;
        self.iterate(tag, callback, items, pos, acc, origin, pending)
    }

    /// One turn of an array-shaped builtin: fold the callback's last result
    /// into the accumulator, then either dispatch the next element or
    /// finish.
    #[allow(clippy::too_many_arguments)]
    fn iterate(
        &mut self,
        tag: RuntimeTag,
        callback: Arc<Function>,
        items: Vec<Object>,
        mut pos: usize,
        mut acc: Vec<Object>,
        origin: Option<Key>,
        pending: Option<Object>,
    ) -> Option<Object> {
        if let Some(value) = pending {
            match value {
                Object::Stopped => return Some(Object::Stopped),
                value if value.is_error() => {
                    return Some(self.report(origin.as_ref(), value));
                }
                value => match tag {
                    RuntimeTag::Map => acc.push(value),
                    RuntimeTag::Reduce => acc = vec![value],
                    RuntimeTag::Filter => match builtins::truthy(&value) {
                        Ok(true) => acc.push(items[pos - 1].clone()),
                        Ok(false) => {}
                        Err(error) => return Some(self.report(origin.as_ref(), error)),
                    },
                    _ => {}
                },
            }
        }

        if pos >= items.len() {
            let result = match tag {
                RuntimeTag::Reduce => acc.into_iter().next().unwrap_or_default(),
                _ => Object::Array(acc),
            };
            return Some(self.report(origin.as_ref(), result));
        }

        let args = match tag {
            RuntimeTag::Reduce => vec![acc[0].clone(), items[pos].clone()],
            _ => vec![items[pos].clone()],
        };
        pos += 1;
        let callee = callback.clone();
        self.work.push(Frame::Iterate {
            tag,
            callback,
            items,
            pos,
            acc,
            origin,
        });
        self.work.push(Frame::Call {
            func: callee,
            origin: None,
            args,
        });
        None
    }

    /// Reports a frame result through the side channel, converting observer
    /// refusal into the stopped sentinel.
    fn report(&mut self, origin: Option<&Key>, value: Object) -> Object {
        if matches!(value, Object::Stopped) {
            return value;
        }
        if self.observer.observe(origin, &value) {
            value
        } else {
            debug!("observer stopped evaluation");
            Object::Stopped
        }
    }
}

/// Combines a frame's remaining operands into its result.
///
/// A single value passes through; several unlabeled values become an array;
/// any labeled value turns the union into an ordered label-keyed map, with
/// positional `$n` keys filling the gaps. The first error among the
/// operands wins instead.
pub fn union(values: Vec<Object>) -> Object {
    if let Some(error) = values.iter().find(|v| v.is_error()) {
        return error.clone();
    }
    if values.iter().any(|v| matches!(v, Object::Stopped)) {
        return Object::Stopped;
    }
    match values.len() {
        0 => Object::Empty,
        1 => values.into_iter().next().expect("len checked"),
        _ => {
            if values.iter().any(|v| matches!(v, Object::Label(_))) {
                let mut entries: Vec<(Key, Object)> = Vec::new();
                let mut positional = 0usize;
                let mut iter = values.into_iter().peekable();
                while let Some(value) = iter.next() {
                    match value {
                        Object::Label(key) => {
                            let paired = iter.next().unwrap_or_default();
                            entries.push((key, paired));
                        }
                        other => {
                            entries.push((Key::positional(positional), other));
                            positional += 1;
                        }
                    }
                }
                Object::Map(entries)
            } else {
                Object::Array(values)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_union_single_passes_through() {
        assert_eq!(union(vec![Object::Int(5)]), Object::Int(5));
    }

    #[test]
    fn test_union_unlabeled_is_array() {
        assert_eq!(
            union(vec![Object::Int(1), Object::Int(2)]),
            Object::Array(vec![Object::Int(1), Object::Int(2)])
        );
    }

    #[test]
    fn test_union_labeled_is_map_with_positional_gaps() {
        let result = union(vec![
            Object::Label(Key::name("a")),
            Object::Int(1),
            Object::Int(9),
            Object::Label(Key::name("b")),
            Object::Int(2),
        ]);
        match result {
            Object::Map(entries) => {
                let keys: Vec<&str> = entries.iter().map(|(k, _)| k.display()).collect();
                assert_eq!(keys, vec!["a", "$0", "b"]);
            }
            other => panic!("expected map, got {:?}", other),
        }
    }

    #[test]
    fn test_union_first_error_wins() {
        let error = Object::error(DiagKind::Type, "boom");
        let later = Object::error(DiagKind::Type, "later");
        let result = union(vec![Object::Int(1), error.clone(), later]);
        assert_eq!(result, error);
    }

    #[test]
    fn test_union_empty_is_empty() {
        assert_eq!(union(vec![]), Object::Empty);
    }
}
