//! Runtime data model for the expression engine.
//!
//! Everything the pipeline produces or consumes is an [`Object`]: literals,
//! arrays, label-keyed maps, identifier references, function values and
//! error diagnostics all travel through the same channels. Errors are plain
//! values, never panics; the evaluator's only special treatment of them is
//! that the first error short-circuits the union that encloses it.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Interned lookup name, distinct from its display text.
///
/// The `repr` is the identity used for symbol-table lookup, hashing and
/// equality. Shaped keys additionally encode the call-adjacency of an
/// operator occurrence (`◂` marks a present left operand, `▸N` a right
/// argument group of N values) so overloads resolve by call shape.
#[derive(Clone)]
pub struct Key {
    repr: Arc<str>,
    display: Arc<str>,
}

impl Key {
    pub fn name(text: &str) -> Self {
        let text: Arc<str> = Arc::from(text);
        Self {
            repr: text.clone(),
            display: text,
        }
    }

    /// Key for an operator occurrence or declaration with the given shape.
    ///
    /// `shaped("+", true, 1)` is the binary-plus key; `shaped("-", false, 1)`
    /// the unary-minus key. A shape with no left and no right collapses to
    /// the plain name key.
    pub fn shaped(name: &str, has_left: bool, right: usize) -> Self {
        if !has_left && right == 0 {
            return Self::name(name);
        }
        let mut repr = String::new();
        if has_left {
            repr.push('◂');
        }
        repr.push_str(name);
        if right > 0 {
            repr.push('▸');
            repr.push_str(&right.to_string());
        }
        Self {
            repr: Arc::from(repr.as_str()),
            display: Arc::from(name),
        }
    }

    /// Positional key used when a union mixes labeled and unlabeled values.
    pub fn positional(index: usize) -> Self {
        Self::name(&format!("${}", index))
    }

    /// Candidate lookup keys for an operator site, in priority order:
    /// full shape, name with right shape, name with left marker, then the
    /// plain-name alias. Shape markers are dropped when the call site lacks
    /// that side, so the list never proposes a shape the site cannot feed.
    pub fn candidates(name: &str, has_left: bool, right: usize) -> Vec<Key> {
        let mut out = Vec::with_capacity(4);
        if has_left && right > 0 {
            out.push(Self::shaped(name, true, right));
        }
        if right > 0 {
            out.push(Self::shaped(name, false, right));
        }
        if has_left {
            out.push(Self::shaped(name, true, 0));
        }
        out.push(Self::name(name));
        out.dedup();
        out
    }

    pub fn repr(&self) -> &str {
        &self.repr
    }

    pub fn display(&self) -> &str {
        &self.display
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.repr == other.repr
    }
}

impl Eq for Key {}

impl std::hash::Hash for Key {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.repr.hash(state);
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self.repr)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display)
    }
}

/// Character rectangle supplied by the text-editing collaborator, used only
/// to anchor newly created identifiers to on-screen glyph positions. The
/// core stores it untouched.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Associativity of a function used in operator position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
pub enum Assoc {
    #[default]
    #[strum(serialize = "left")]
    Left,
    #[strum(serialize = "right")]
    Right,
}

/// Runtime dispatch tag of a function value.
///
/// `Custom` bodies run through the RPN machine; every other tag is a
/// primitive the evaluator executes natively. The spellings are the surface
/// names the standard environment binds them under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, AsRefStr)]
pub enum RuntimeTag {
    #[default]
    #[strum(serialize = "custom")]
    Custom,
    #[strum(serialize = "send")]
    Send,
    #[strum(serialize = "flip")]
    Flip,
    #[strum(serialize = "showAllDefinitions")]
    ShowAllDefinitions,
    #[strum(serialize = "drawAxes")]
    DrawAxes,
    #[strum(serialize = "plot")]
    Plot,
    #[strum(serialize = "draw")]
    Draw,
    #[strum(serialize = "map")]
    Map,
    #[strum(serialize = "filter")]
    Filter,
    #[strum(serialize = "reduce")]
    Reduce,
    // Structural and arithmetic primitives. The distilled surface of the
    // language leans on these for every scenario, including the rewritten
    // conditional chain (`?`, `??`, `send`).
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Subtract,
    #[strum(serialize = "*")]
    Multiply,
    #[strum(serialize = "/")]
    Divide,
    #[strum(serialize = "^")]
    Power,
    #[strum(serialize = "negate")]
    Negate,
    #[strum(serialize = "<")]
    Less,
    #[strum(serialize = ">")]
    Greater,
    #[strum(serialize = "<=")]
    LessEq,
    #[strum(serialize = ">=")]
    GreaterEq,
    #[strum(serialize = "=")]
    Equal,
    #[strum(serialize = "!=")]
    NotEqual,
    #[strum(serialize = "and")]
    And,
    #[strum(serialize = "or")]
    Or,
    #[strum(serialize = "not")]
    Not,
    #[strum(serialize = "?")]
    Select,
    #[strum(serialize = "??")]
    OrElse,
}

impl RuntimeTag {
    /// Short-circuit operators defer their right operand into a block at
    /// compile time and decide at runtime whether to evaluate it.
    pub fn is_short_circuit(&self) -> bool {
        matches!(self, RuntimeTag::And | RuntimeTag::Or | RuntimeTag::OrElse)
    }
}

/// Stable identity of a function value, keying the compiled-program cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionId(Uuid);

impl FunctionId {
    pub fn fresh() -> Self {
        Self(Uuid::new_v4())
    }
}

/// One declared argument: the external key callers see and the internal key
/// the body is parsed against. They coincide unless the header spells
/// `external: internal`.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub external: Key,
    pub internal: Key,
}

impl Param {
    pub fn new(name: &str) -> Self {
        Self {
            external: Key::name(name),
            internal: Key::name(name),
        }
    }

    pub fn renamed(external: &str, internal: &str) -> Self {
        Self {
            external: Key::name(external),
            internal: Key::name(internal),
        }
    }
}

pub const PRECEDENCE_DEFAULT: i32 = 0;

/// A function or closure value.
///
/// Closures do not capture an environment: the machine snapshot-saves and
/// restores symbol-table bindings around every application, so the table
/// stays the sole scoping mechanism and no reference cycles can form.
#[derive(Debug, Clone)]
pub struct Function {
    pub id: FunctionId,
    pub name: Option<Key>,
    pub precedence: i32,
    pub assoc: Assoc,
    pub left: Vec<Param>,
    pub right: Vec<Param>,
    /// Co-declared local sub-definitions, realized lazily on first reference.
    pub locals: Vec<(Key, Object)>,
    pub body: Vec<Object>,
    pub is_block: bool,
    pub tag: RuntimeTag,
    /// Precompiled program, when the function was synthesized with one
    /// (short-circuit deferral blocks). Ordinary bodies compile lazily
    /// through the per-session cache instead.
    pub compiled: Option<Arc<crate::eval::compile::Program>>,
}

impl Function {
    /// Anonymous parenthesized group: zero arguments, evaluated eagerly
    /// where it appears in a body.
    pub fn group(body: Vec<Object>) -> Self {
        Self {
            is_block: false,
            ..Self::block(body)
        }
    }

    /// Block/closure literal: a deferred anonymous function value, pushed
    /// as an operand instead of being evaluated in place.
    pub fn block(body: Vec<Object>) -> Self {
        Self {
            id: FunctionId::fresh(),
            name: None,
            precedence: PRECEDENCE_DEFAULT,
            assoc: Assoc::Left,
            left: Vec::new(),
            right: Vec::new(),
            locals: Vec::new(),
            body,
            is_block: true,
            tag: RuntimeTag::Custom,
            compiled: None,
        }
    }

    pub fn arity(&self) -> usize {
        self.left.len() + self.right.len()
    }

    /// Internal binding keys in operand order (left args then right args).
    pub fn internals(&self) -> impl Iterator<Item = &Key> {
        self.left
            .iter()
            .chain(self.right.iter())
            .map(|p| &p.internal)
    }
}

impl PartialEq for Function {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// Classified failure carried as an ordinary value.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum DiagKind {
    #[strum(serialize = "lexical")]
    Lexical,
    #[strum(serialize = "syntax")]
    Syntax,
    #[strum(serialize = "binding")]
    Binding,
    #[strum(serialize = "arity")]
    Arity,
    #[strum(serialize = "depth")]
    Depth,
    #[strum(serialize = "type")]
    Type,
}

/// An error diagnostic, anchored to the identifier it originated from when
/// one is known.
#[derive(Debug, Clone, PartialEq)]
pub struct Diag {
    pub kind: DiagKind,
    pub message: String,
    pub origin: Option<Key>,
}

impl Diag {
    pub fn new(kind: DiagKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            origin: None,
        }
    }

    pub fn with_origin(mut self, origin: Key) -> Self {
        self.origin = Some(origin);
        self
    }
}

impl fmt::Display for Diag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.origin {
            Some(origin) => write!(f, "{} error at {}: {}", self.kind, origin, self.message),
            None => write!(f, "{} error: {}", self.kind, self.message),
        }
    }
}

/// Tagged-union runtime value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Object {
    Int(i64),
    Real(f64),
    Str(String),
    Bool(bool),
    Array(Vec<Object>),
    /// Ordered label-keyed map; insertion order is observable.
    Map(Vec<(Key, Object)>),
    /// Identifier reference, resolved against the symbol table at run time.
    Ident(Key),
    /// A label (`name:`), pairing with the value that follows it in a union.
    Label(Key),
    Function(Arc<Function>),
    Error(Diag),
    /// Result of observer-requested cancellation. Callers treat it as "no
    /// result"; it is never rendered as a diagnostic and never caught by
    /// the else-default operator.
    Stopped,
    #[default]
    Empty,
}

impl Object {
    pub fn error(kind: DiagKind, message: impl Into<String>) -> Self {
        Object::Error(Diag::new(kind, message))
    }

    pub fn function(f: Function) -> Self {
        Object::Function(Arc::new(f))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Object::Error(_))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Object::Int(_) => "integer",
            Object::Real(_) => "real",
            Object::Str(_) => "string",
            Object::Bool(_) => "boolean",
            Object::Array(_) => "array",
            Object::Map(_) => "map",
            Object::Ident(_) => "identifier",
            Object::Label(_) => "label",
            Object::Function(_) => "function",
            Object::Error(_) => "error",
            Object::Stopped => "stopped",
            Object::Empty => "empty",
        }
    }

    /// Ordered lookup in a map value.
    pub fn map_get(entries: &[(Key, Object)], key: &Key) -> Option<Object> {
        entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Object::Int(v) => write!(f, "{}", v),
            Object::Real(v) => write!(f, "{}", v),
            Object::Str(v) => write!(f, "{}", v),
            Object::Bool(v) => write!(f, "{}", v),
            Object::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Object::Map(entries) => {
                write!(f, "(")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                write!(f, ")")
            }
            Object::Ident(key) => write!(f, "{}", key),
            Object::Label(key) => write!(f, "{}:", key),
            Object::Function(func) => match &func.name {
                Some(name) => write!(f, "function {}", name),
                None => write!(f, "block"),
            },
            Object::Error(diag) => write!(f, "{}", diag),
            Object::Stopped => write!(f, "stopped"),
            Object::Empty => write!(f, "()"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_shaped_key_repr() {
        let binary = Key::shaped("+", true, 1);
        let unary = Key::shaped("-", false, 1);
        let left_only = Key::shaped("double", true, 0);

        assert_eq!(binary.repr(), "◂+▸1");
        assert_eq!(unary.repr(), "-▸1");
        assert_eq!(left_only.repr(), "◂double");
        assert_eq!(binary.display(), "+");
    }

    #[test]
    fn test_plain_shape_collapses() {
        assert_eq!(Key::shaped("x", false, 0), Key::name("x"));
    }

    #[test]
    fn test_candidate_priority() {
        let candidates = Key::candidates("f", true, 2);
        let reprs: Vec<&str> = candidates.iter().map(|k| k.repr()).collect();
        assert_eq!(reprs, vec!["◂f▸2", "f▸2", "◂f", "f"]);

        let candidates = Key::candidates("double", false, 1);
        let reprs: Vec<&str> = candidates.iter().map(|k| k.repr()).collect();
        assert_eq!(reprs, vec!["double▸1", "double"]);
    }

    #[test]
    fn test_key_identity_ignores_display() {
        let a = Key::shaped("+", true, 1);
        let b = Key::shaped("+", true, 1);
        assert_eq!(a, b);
        assert_ne!(a, Key::name("+"));
    }

    #[test]
    fn test_function_identity() {
        let f = Function::block(vec![Object::Int(1)]);
        let g = Function::block(vec![Object::Int(1)]);
        assert_eq!(f, f.clone());
        assert_ne!(f, g);
    }

    #[test]
    fn test_tag_spellings() {
        let cases = [
            ("send", RuntimeTag::Send),
            ("showAllDefinitions", RuntimeTag::ShowAllDefinitions),
            ("map", RuntimeTag::Map),
            ("+", RuntimeTag::Add),
            ("??", RuntimeTag::OrElse),
        ];
        for (text, expected) in cases {
            assert_eq!(RuntimeTag::from_str(text).unwrap(), expected);
            assert_eq!(expected.to_string(), text);
        }
    }

    #[test]
    fn test_display_array_and_map() {
        let array = Object::Array(vec![Object::Int(1), Object::Int(2)]);
        assert_eq!(array.to_string(), "[1, 2]");

        let map = Object::Map(vec![
            (Key::name("a"), Object::Int(1)),
            (Key::name("b"), Object::Str("x".into())),
        ]);
        assert_eq!(map.to_string(), "(a: 1 b: x)");
    }
}
