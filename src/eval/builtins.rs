use crate::object::{
    Assoc, DiagKind, Function, FunctionId, Key, Object, Param, RuntimeTag, PRECEDENCE_DEFAULT,
};

use super::context::SymbolTable;

/// Rendering collaborators behind the five terminal leaf builtins. The core
/// treats the sink as opaque; embedding applications supply a real one.
pub trait RenderSink {
    fn flip(&self) -> Object {
        Object::Bool(true)
    }
    fn show_all_definitions(&self) -> Object {
        Object::Bool(true)
    }
    fn draw_axes(&self) -> Object {
        Object::Bool(true)
    }
    fn plot(&self, _value: &Object) -> Object {
        Object::Bool(true)
    }
    fn draw(&self, _value: &Object) -> Object {
        Object::Bool(true)
    }
}

/// Default sink: every leaf evaluation succeeds and renders nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl RenderSink for NoopSink {}

fn primitive(
    name: &str,
    left: usize,
    right: usize,
    precedence: i32,
    assoc: Assoc,
    tag: RuntimeTag,
) -> Function {
    let params = |count: usize, prefix: &str| -> Vec<Param> {
        (0..count)
            .map(|i| Param::new(&format!("{}{}", prefix, i)))
            .collect()
    };
    Function {
        id: FunctionId::fresh(),
        name: Some(Key::name(name)),
        precedence,
        assoc,
        left: params(left, "lhs"),
        right: params(right, "rhs"),
        locals: Vec::new(),
        body: Vec::new(),
        is_block: false,
        tag,
        compiled: None,
    }
}

/// Installs the standard environment: operator primitives under their
/// shaped keys, plain-name aliases so whole-span lookup and first-class
/// passing resolve, and the boolean constants.
pub fn install(table: &mut SymbolTable) {
    let mut op = |name: &str,
                  left: usize,
                  right: usize,
                  precedence: i32,
                  assoc: Assoc,
                  tag: RuntimeTag,
                  alias: bool| {
        let object = Object::function(primitive(name, left, right, precedence, assoc, tag));
        table.bind(Key::shaped(name, left > 0, right), object.clone());
        if alias && !table.contains(&Key::name(name)) {
            table.bind(Key::name(name), object);
        }
    };

    op("?", 1, 1, 90, Assoc::Left, RuntimeTag::Select, true);
    op("^", 1, 1, 80, Assoc::Right, RuntimeTag::Power, true);
    op("-", 0, 1, 70, Assoc::Right, RuntimeTag::Negate, false);
    op("not", 0, 1, 70, Assoc::Right, RuntimeTag::Not, true);
    op("*", 1, 1, 60, Assoc::Left, RuntimeTag::Multiply, true);
    op("/", 1, 1, 60, Assoc::Left, RuntimeTag::Divide, true);
    op("+", 1, 1, 50, Assoc::Left, RuntimeTag::Add, true);
    op("-", 1, 1, 50, Assoc::Left, RuntimeTag::Subtract, true);
    op("<", 1, 1, 40, Assoc::Left, RuntimeTag::Less, true);
    op(">", 1, 1, 40, Assoc::Left, RuntimeTag::Greater, true);
    op("<=", 1, 1, 40, Assoc::Left, RuntimeTag::LessEq, true);
    op(">=", 1, 1, 40, Assoc::Left, RuntimeTag::GreaterEq, true);
    op("=", 1, 1, 40, Assoc::Left, RuntimeTag::Equal, true);
    op("!=", 1, 1, 40, Assoc::Left, RuntimeTag::NotEqual, true);
    op("and", 1, 1, 30, Assoc::Left, RuntimeTag::And, true);
    op("or", 1, 1, 20, Assoc::Left, RuntimeTag::Or, true);
    op("??", 1, 1, 10, Assoc::Right, RuntimeTag::OrElse, true);

    // Application plumbing and the array-shaped builtins.
    op("send", 1, 0, PRECEDENCE_DEFAULT, Assoc::Left, RuntimeTag::Send, false);
    op("send", 1, 1, PRECEDENCE_DEFAULT, Assoc::Left, RuntimeTag::Send, true);
    op("map", 0, 2, PRECEDENCE_DEFAULT, Assoc::Left, RuntimeTag::Map, true);
    op("filter", 0, 2, PRECEDENCE_DEFAULT, Assoc::Left, RuntimeTag::Filter, true);
    op("reduce", 0, 2, PRECEDENCE_DEFAULT, Assoc::Left, RuntimeTag::Reduce, true);

    // Terminal leaves delegating to the render sink.
    op("flip", 0, 0, PRECEDENCE_DEFAULT, Assoc::Left, RuntimeTag::Flip, true);
    op(
        "showAllDefinitions",
        0,
        0,
        PRECEDENCE_DEFAULT,
        Assoc::Left,
        RuntimeTag::ShowAllDefinitions,
        true,
    );
    op("drawAxes", 0, 0, PRECEDENCE_DEFAULT, Assoc::Left, RuntimeTag::DrawAxes, true);
    op("plot", 0, 1, PRECEDENCE_DEFAULT, Assoc::Left, RuntimeTag::Plot, true);
    op("draw", 0, 1, PRECEDENCE_DEFAULT, Assoc::Left, RuntimeTag::Draw, true);

    table.bind(Key::name("true"), Object::Bool(true));
    table.bind(Key::name("false"), Object::Bool(false));
    table.bind(Key::name("π"), Object::Real(std::f64::consts::PI));
}

/// Strict boolean coercion; anything else is a type error.
pub fn truthy(object: &Object) -> Result<bool, Object> {
    match object {
        Object::Bool(value) => Ok(*value),
        other => Err(Object::error(
            DiagKind::Type,
            format!("expected boolean, got {}", other.type_name()),
        )),
    }
}

/// Executes a pure primitive over already-evaluated operands.
///
/// `send`, `map`/`filter`/`reduce` and the short-circuit operators are not
/// here: they re-enter the machine and are dispatched by it directly.
pub fn apply(tag: RuntimeTag, args: &[Object], sink: &dyn RenderSink) -> Object {
    match tag {
        RuntimeTag::Add => numeric(args, "+", |a, b| a + b, |a, b| a.checked_add(b)),
        RuntimeTag::Subtract => numeric(args, "-", |a, b| a - b, |a, b| a.checked_sub(b)),
        RuntimeTag::Multiply => numeric(args, "*", |a, b| a * b, |a, b| a.checked_mul(b)),
        RuntimeTag::Divide => divide(args),
        RuntimeTag::Power => power(args),
        RuntimeTag::Negate => match &args[0] {
            Object::Int(v) => Object::Int(-v),
            Object::Real(v) => Object::Real(-v),
            other => type_error("-", other),
        },
        RuntimeTag::Not => match truthy(&args[0]) {
            Ok(value) => Object::Bool(!value),
            Err(error) => error,
        },
        RuntimeTag::Less => compare(args, "<", |o| o == std::cmp::Ordering::Less),
        RuntimeTag::Greater => compare(args, ">", |o| o == std::cmp::Ordering::Greater),
        RuntimeTag::LessEq => compare(args, "<=", |o| o != std::cmp::Ordering::Greater),
        RuntimeTag::GreaterEq => compare(args, ">=", |o| o != std::cmp::Ordering::Less),
        RuntimeTag::Equal => Object::Bool(loose_eq(&args[0], &args[1])),
        RuntimeTag::NotEqual => Object::Bool(!loose_eq(&args[0], &args[1])),
        RuntimeTag::Select => select(&args[0], &args[1]),
        RuntimeTag::Flip => sink.flip(),
        RuntimeTag::ShowAllDefinitions => sink.show_all_definitions(),
        RuntimeTag::DrawAxes => sink.draw_axes(),
        RuntimeTag::Plot => sink.plot(&args[0]),
        RuntimeTag::Draw => sink.draw(&args[0]),
        other => Object::error(
            DiagKind::Type,
            format!("'{}' is not a pure primitive", other),
        ),
    }
}

fn type_error(op: &str, value: &Object) -> Object {
    Object::error(
        DiagKind::Type,
        format!("'{}' cannot take {}", op, value.type_name()),
    )
}

fn numeric(
    args: &[Object],
    op: &str,
    real: fn(f64, f64) -> f64,
    int: fn(i64, i64) -> Option<i64>,
) -> Object {
    match (&args[0], &args[1]) {
        (Object::Int(a), Object::Int(b)) => match int(*a, *b) {
            Some(value) => Object::Int(value),
            None => Object::Real(real(*a as f64, *b as f64)),
        },
        (Object::Int(a), Object::Real(b)) => Object::Real(real(*a as f64, *b)),
        (Object::Real(a), Object::Int(b)) => Object::Real(real(*a, *b as f64)),
        (Object::Real(a), Object::Real(b)) => Object::Real(real(*a, *b)),
        (Object::Str(a), Object::Str(b)) if op == "+" => Object::Str(format!("{}{}", a, b)),
        (a, b) => Object::error(
            DiagKind::Type,
            format!("'{}' cannot take {} and {}", op, a.type_name(), b.type_name()),
        ),
    }
}

fn divide(args: &[Object]) -> Object {
    match (&args[0], &args[1]) {
        (_, Object::Int(0)) => Object::error(DiagKind::Type, "division by zero"),
        (Object::Int(a), Object::Int(b)) if a % b == 0 => Object::Int(a / b),
        (Object::Int(a), Object::Int(b)) => Object::Real(*a as f64 / *b as f64),
        _ => numeric(args, "/", |a, b| a / b, |_, _| None),
    }
}

fn power(args: &[Object]) -> Object {
    match (&args[0], &args[1]) {
        (Object::Int(base), Object::Int(exp)) if *exp >= 0 && *exp <= u32::MAX as i64 => {
            match base.checked_pow(*exp as u32) {
                Some(value) => Object::Int(value),
                None => Object::Real((*base as f64).powf(*exp as f64)),
            }
        }
        _ => numeric(args, "^", f64::powf, |_, _| None),
    }
}

fn compare(args: &[Object], op: &str, accept: fn(std::cmp::Ordering) -> bool) -> Object {
    let ordering = match (&args[0], &args[1]) {
        (Object::Int(a), Object::Int(b)) => a.partial_cmp(b),
        (Object::Int(a), Object::Real(b)) => (*a as f64).partial_cmp(b),
        (Object::Real(a), Object::Int(b)) => a.partial_cmp(&(*b as f64)),
        (Object::Real(a), Object::Real(b)) => a.partial_cmp(b),
        (Object::Str(a), Object::Str(b)) => Some(a.cmp(b)),
        (a, b) => {
            return Object::error(
                DiagKind::Type,
                format!("'{}' cannot take {} and {}", op, a.type_name(), b.type_name()),
            )
        }
    };
    match ordering {
        Some(ordering) => Object::Bool(accept(ordering)),
        None => Object::Bool(false),
    }
}

/// Equality across the numeric tower; everything else is structural.
fn loose_eq(a: &Object, b: &Object) -> bool {
    match (a, b) {
        (Object::Int(a), Object::Real(b)) | (Object::Real(b), Object::Int(a)) => *a as f64 == *b,
        _ => a == b,
    }
}

/// Label-select: picks the map entry whose key matches the selector's text
/// form. A miss is an error value the else-default operator can catch.
fn select(selector: &Object, map: &Object) -> Object {
    let entries = match map {
        Object::Map(entries) => entries,
        other => {
            return Object::error(
                DiagKind::Type,
                format!("'?' expects a labeled map, got {}", other.type_name()),
            )
        }
    };
    let text = match selector {
        Object::Bool(value) => value.to_string(),
        Object::Int(value) => value.to_string(),
        Object::Str(value) => value.clone(),
        Object::Label(key) => key.display().to_string(),
        other => {
            return Object::error(
                DiagKind::Type,
                format!("'?' cannot select by {}", other.type_name()),
            )
        }
    };
    match Object::map_get(entries, &Key::name(&text)) {
        Some(value) => value,
        None => Object::error(DiagKind::Binding, format!("no branch for '{}'", text)),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_install_shapes() {
        let mut table = SymbolTable::new();
        install(&mut table);
        assert!(table.contains(&Key::shaped("+", true, 1)));
        assert!(table.contains(&Key::shaped("-", false, 1)));
        assert!(table.contains(&Key::shaped("send", true, 0)));
        assert!(table.contains(&Key::shaped("send", true, 1)));
        assert!(table.contains(&Key::name("??")));
        // The plain `-` alias stays on binary subtraction.
        match table.get(&Key::name("-")) {
            Some(Object::Function(f)) => assert_eq!(f.tag, RuntimeTag::Subtract),
            other => panic!("expected function, got {:?}", other),
        }
    }

    #[test]
    fn test_numeric_coercion() {
        let sink = NoopSink;
        assert_eq!(
            apply(RuntimeTag::Add, &[Object::Int(1), Object::Int(2)], &sink),
            Object::Int(3)
        );
        assert_eq!(
            apply(RuntimeTag::Add, &[Object::Int(1), Object::Real(0.5)], &sink),
            Object::Real(1.5)
        );
        assert_eq!(
            apply(
                RuntimeTag::Divide,
                &[Object::Int(3), Object::Int(2)],
                &sink
            ),
            Object::Real(1.5)
        );
        assert_eq!(
            apply(
                RuntimeTag::Divide,
                &[Object::Int(4), Object::Int(2)],
                &sink
            ),
            Object::Int(2)
        );
    }

    #[test]
    fn test_division_by_zero_is_error_value() {
        let result = apply(
            RuntimeTag::Divide,
            &[Object::Int(1), Object::Int(0)],
            &NoopSink,
        );
        assert!(result.is_error());
    }

    #[test]
    fn test_string_concat() {
        assert_eq!(
            apply(
                RuntimeTag::Add,
                &[Object::Str("ab".into()), Object::Str("cd".into())],
                &NoopSink
            ),
            Object::Str("abcd".into())
        );
    }

    #[test]
    fn test_comparison_and_equality() {
        let sink = NoopSink;
        assert_eq!(
            apply(RuntimeTag::Less, &[Object::Int(3), Object::Real(3.5)], &sink),
            Object::Bool(true)
        );
        assert_eq!(
            apply(RuntimeTag::Equal, &[Object::Int(2), Object::Real(2.0)], &sink),
            Object::Bool(true)
        );
        assert_eq!(
            apply(
                RuntimeTag::NotEqual,
                &[Object::Str("a".into()), Object::Str("b".into())],
                &sink
            ),
            Object::Bool(true)
        );
    }

    #[test]
    fn test_select_hit_and_miss() {
        let map = Object::Map(vec![
            (Key::name("true"), Object::Int(1)),
            (Key::name("red"), Object::Int(2)),
        ]);
        assert_eq!(select(&Object::Bool(true), &map), Object::Int(1));
        assert_eq!(select(&Object::Str("red".into()), &map), Object::Int(2));
        let miss = select(&Object::Str("blue".into()), &map);
        match miss {
            Object::Error(diag) => assert_eq!(diag.kind, DiagKind::Binding),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn test_power_shapes() {
        let sink = NoopSink;
        assert_eq!(
            apply(RuntimeTag::Power, &[Object::Int(2), Object::Int(10)], &sink),
            Object::Int(1024)
        );
        assert_eq!(
            apply(RuntimeTag::Power, &[Object::Int(2), Object::Int(-1)], &sink),
            Object::Real(0.5)
        );
    }
}
