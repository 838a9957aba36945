//! # Structural Parser
//!
//! Second stage of the pipeline: consumes the lexer's token stream and
//! produces the runtime objects the compiler and evaluator work on.
//!
//! ## Component Structure
//!
//! * [`tree`]: two-stack tree builder grouping tokens into unions, groups
//!   and leaves
//! * [`conditional`]: `->` / `-!` / `case` marker detection and rewrite
//! * [`literal`]: literal interpreter resolving leaf spans into numbers,
//!   strings, labels, exponents and identifiers
//! * [`function`]: function/option header parser (argument lists,
//!   precedence suffix, bar blocks, sub-definition groups)
//!
//! The tree builder descends first; the literal interpreter and function
//! parser are invoked from within the descent, exactly one group at a time,
//! so definitions bind into the symbol table as their cell parses.
//!
//! ## Output Shape
//!
//! [`parse`] always yields a root object: an anonymous group function whose
//! body is the cell's items. Malformed input produces error objects inside
//! that body, never a failure result — diagnostics travel as values.

pub mod conditional;
pub mod function;
pub mod literal;
pub mod tree;

use std::collections::HashSet;

use tracing::debug;

use crate::eval::SymbolTable;
use crate::lexer::Lexer;
use crate::object::{Function, Key, Object, Rect};

use self::tree::Node;

/// Collaborator lookup anchoring newly created identifiers to on-screen
/// glyph rectangles. Opaque to the core.
pub type RectForOffset<'a> = &'a dyn Fn(usize) -> Option<Rect>;

pub struct ParseOutcome {
    pub root: Object,
    /// Glyph anchors for identifiers first seen in this cell.
    pub anchors: Vec<(Key, Rect)>,
}

/// Shared state for one cell parse.
pub struct ParseContext<'a> {
    pub table: &'a mut SymbolTable,
    rect_for_offset: Option<RectForOffset<'a>>,
    pub anchors: Vec<(Key, Rect)>,
    sinks: Vec<Sink>,
}

struct Sink {
    names: HashSet<String>,
    collected: Vec<(Key, Object)>,
}

impl<'a> ParseContext<'a> {
    pub fn new(table: &'a mut SymbolTable, rect_for_offset: Option<RectForOffset<'a>>) -> Self {
        Self {
            table,
            rect_for_offset,
            anchors: Vec::new(),
            sinks: Vec::new(),
        }
    }

    /// Records a glyph anchor for a newly created identifier.
    pub fn anchor(&mut self, key: &Key, offset: usize) {
        if let Some(lookup) = self.rect_for_offset {
            if let Some(rect) = lookup(offset) {
                self.anchors.push((key.clone(), rect));
            }
        }
    }

    pub(crate) fn push_sink(&mut self, names: &[String]) {
        self.sinks.push(Sink {
            names: names.iter().cloned().collect(),
            collected: Vec::new(),
        });
    }

    pub(crate) fn pop_sink(&mut self) -> Vec<(Key, Object)> {
        self.sinks
            .pop()
            .map(|sink| sink.collected)
            .unwrap_or_default()
    }

    /// Whether `name` is a declared sub-definition of an enclosing header.
    pub(crate) fn sink_accepts(&self, name: &str) -> bool {
        self.sinks.iter().rev().any(|sink| sink.names.contains(name))
    }

    pub(crate) fn sink_push(&mut self, key: Key, object: Object) {
        let name = key.display().to_string();
        if let Some(sink) = self
            .sinks
            .iter_mut()
            .rev()
            .find(|sink| sink.names.contains(&name))
        {
            sink.collected.push((key, object));
        }
    }
}

/// Parses one cell into a root object.
///
/// The returned root is always an anonymous group function wrapping the
/// cell's items; evaluation of that group is what [`crate::eval::calculate`]
/// performs. Definitions encountered during the parse bind into `table` as
/// a side effect.
#[tracing::instrument(level = "debug", skip_all)]
pub fn parse(
    input: &str,
    table: &mut SymbolTable,
    rect_for_offset: Option<RectForOffset<'_>>,
) -> ParseOutcome {
    let tokens = Lexer::new().lex(input);
    let mut ctx = ParseContext::new(table, rect_for_offset);
    let body = match tree::build(&tokens) {
        Ok(items) => objectify_items(&items, &mut ctx),
        Err(diag) => vec![Object::Error(diag)],
    };
    debug!(items = body.len(), "parsed cell");
    ParseOutcome {
        root: Object::function(Function::group(body)),
        anchors: ctx.anchors,
    }
}

/// Converts one group-level item run into body objects.
///
/// Checked in order: marker chains rewrite, definition headers bind,
/// anonymous closures and bar blocks build closures; anything else converts
/// item by item.
pub(crate) fn objectify_items(items: &[Node], ctx: &mut ParseContext<'_>) -> Vec<Object> {
    if conditional::has_markers(items) {
        return conditional::rewrite(items, ctx);
    }
    if let Some(object) = function::try_definition(items, ctx) {
        return vec![object];
    }
    if let Some(object) = function::try_anonymous(items, ctx) {
        return vec![object];
    }
    if let Some(pos) = items.iter().position(|n| n.is_word("|")) {
        let mut out = convert_plain(&items[..pos], ctx);
        match function::split_bars(&items[pos..]) {
            Some((args, rest)) => out.push(function::build_bar_block(args, rest, ctx)),
            None => out.push(Object::error(
                crate::object::DiagKind::Syntax,
                "unmatched block delimiter",
            )),
        }
        return out;
    }
    convert_plain(items, ctx)
}

fn convert_plain(items: &[Node], ctx: &mut ParseContext<'_>) -> Vec<Object> {
    let mut out = Vec::new();
    for node in items {
        match node {
            Node::Word { text, span } => out.extend(literal::interpret_word(text, span, ctx)),
            Node::Text { text, .. } => out.push(Object::Str(text.clone())),
            Node::Group(children) => out.push(group_object(children, ctx)),
            Node::Union(children) => out.push(union_object(children, ctx)),
        }
    }
    out
}

fn group_object(children: &[Node], ctx: &mut ParseContext<'_>) -> Object {
    Object::function(Function::group(objectify_items(children, ctx)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    WordValue,
    GroupValue,
    Text,
    Operator,
    Label,
}

/// Converts a juxtaposition union into an eager anonymous group.
///
/// Implicit multiplication spans node boundaries here: `2(x+1)` and `(a)b`
/// multiply, while chained groups `(1)(2)` stay a plain union (they combine
/// through the evaluator's union instead) and operators break the chain.
fn union_object(children: &[Node], ctx: &mut ParseContext<'_>) -> Object {
    let mut body: Vec<Object> = Vec::new();
    let mut origins: Vec<Origin> = Vec::new();

    for child in children {
        match child {
            Node::Word { text, span } => {
                for object in literal::interpret_word(text, span, ctx) {
                    let origin = classify(&object, ctx);
                    push_union_item(&mut body, &mut origins, object, origin);
                }
            }
            Node::Text { text, .. } => {
                push_union_item(&mut body, &mut origins, Object::Str(text.clone()), Origin::Text);
            }
            Node::Group(inner) => {
                let object = group_object(inner, ctx);
                push_union_item(&mut body, &mut origins, object, Origin::GroupValue);
            }
            Node::Union(inner) => {
                let object = union_object(inner, ctx);
                push_union_item(&mut body, &mut origins, object, Origin::GroupValue);
            }
        }
    }

    Object::function(Function::group(body))
}

fn push_union_item(
    body: &mut Vec<Object>,
    origins: &mut Vec<Origin>,
    object: Object,
    origin: Origin,
) {
    let mult = matches!(
        (origins.last(), origin),
        (Some(Origin::WordValue), Origin::WordValue)
            | (Some(Origin::WordValue), Origin::GroupValue)
            | (Some(Origin::GroupValue), Origin::WordValue)
    );
    if mult {
        body.push(Object::Ident(Key::name("*")));
        origins.push(Origin::Operator);
    }
    body.push(object);
    origins.push(origin);
}

fn classify(object: &Object, ctx: &ParseContext<'_>) -> Origin {
    match object {
        Object::Ident(key) => {
            if ctx.table.is_operator(key.display()) {
                Origin::Operator
            } else {
                Origin::WordValue
            }
        }
        Object::Label(_) => Origin::Label,
        Object::Function(_) => Origin::GroupValue,
        Object::Str(_) => Origin::Text,
        _ => Origin::WordValue,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn body_of(object: &Object) -> &[Object] {
        match object {
            Object::Function(f) => &f.body,
            other => panic!("expected function, got {:?}", other),
        }
    }

    fn parse_body(input: &str, table: &mut SymbolTable) -> Vec<Object> {
        let outcome = parse(input, table, None);
        body_of(&outcome.root).to_vec()
    }

    #[test]
    fn test_plain_expression_body() {
        let mut table = SymbolTable::standard();
        let body = parse_body("1 + 2", &mut table);
        assert_eq!(body.len(), 3);
        assert_eq!(body[0], Object::Int(1));
        assert!(matches!(&body[1], Object::Ident(k) if k.display() == "+"));
        assert_eq!(body[2], Object::Int(2));
    }

    #[test]
    fn test_call_union_becomes_nested_group() {
        let mut table = SymbolTable::standard();
        let mut ctx = ParseContext::new(&mut table, None);
        let nodes = tree::build(&Lexer::new().lex("f(1) 3")).unwrap();
        let body = objectify_items(&nodes, &mut ctx);
        assert_eq!(body.len(), 2);
        // The union keeps its own boundary so `3` cannot leak into the call.
        assert!(matches!(&body[0], Object::Function(f) if !f.is_block));
        assert_eq!(body[1], Object::Int(3));
    }

    #[test]
    fn test_group_multiplication() {
        let mut table = SymbolTable::standard();
        let body = parse_body("2(5)", &mut table);
        let inner = match &body[0] {
            Object::Function(f) => &f.body,
            other => panic!("expected union group, got {:?}", other),
        };
        assert_eq!(inner.len(), 3);
        assert!(matches!(&inner[1], Object::Ident(k) if k.display() == "*"));
    }

    #[test]
    fn test_chained_groups_do_not_multiply() {
        let mut table = SymbolTable::standard();
        let body = parse_body("(1)(2)", &mut table);
        let inner = match &body[0] {
            Object::Function(f) => &f.body,
            other => panic!("expected union group, got {:?}", other),
        };
        assert_eq!(inner.len(), 2);
        assert!(inner.iter().all(|o| matches!(o, Object::Function(_))));
    }

    #[test]
    fn test_definition_cell_binds_and_yields_function() {
        let mut table = SymbolTable::standard();
        let body = parse_body("(a) double (a * 2)", &mut table);
        assert_eq!(body.len(), 1);
        assert!(matches!(&body[0], Object::Function(f) if f.name == Some(Key::name("double"))));
        assert!(table.contains(&Key::name("double")));
    }

    #[test]
    fn test_lex_error_becomes_error_body() {
        let mut table = SymbolTable::standard();
        let body = parse_body("\"abc", &mut table);
        assert_eq!(body.len(), 1);
        assert!(body[0].is_error());
    }

    #[test]
    fn test_anchors_for_new_identifiers() {
        let mut table = SymbolTable::standard();
        let lookup = |offset: usize| {
            Some(Rect {
                x: offset as f64,
                y: 0.0,
                width: 8.0,
                height: 16.0,
            })
        };
        let outcome = parse("quux + 1", &mut table, Some(&lookup));
        assert_eq!(outcome.anchors.len(), 1);
        assert_eq!(outcome.anchors[0].0, Key::name("quux"));
        assert_eq!(outcome.anchors[0].1.x, 0.0);
    }
}
