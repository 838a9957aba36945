use crate::object::{
    Assoc, Function, FunctionId, Key, Object, Param, RuntimeTag, PRECEDENCE_DEFAULT,
};

use super::tree::Node;
use super::{objectify_items, ParseContext};

const MARKERS: &[&str] = &["->", "-!", "case"];

/// Whether a word can name an argument, a sub-definition or a function.
pub(crate) fn is_identifier_word(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        None => false,
        Some(first) if first.is_ascii_digit() => false,
        _ => !MARKERS.contains(&text) && text != "|" && !text.contains(':'),
    }
}

fn is_marker(text: &str) -> bool {
    MARKERS.contains(&text)
}

/// A parsed argument list: positional parameters plus declared
/// sub-definition names (everything after a trailing-colon-only entry).
pub(crate) struct ArgList {
    pub params: Vec<Param>,
    pub locals: Vec<String>,
}

/// Recognizes an argument-list group.
///
/// Accepts a plain group of words or the comma form (which the tree builder
/// has already split into a union of single-word groups). Every entry must
/// be `external`, `external: internal`, or — after a trailing-colon-only
/// entry — a sub-definition name; anything else (a labeled call argument
/// like `x: 3`) disqualifies the whole group.
pub(crate) fn parse_arg_list(node: &Node) -> Option<ArgList> {
    let words = arg_words(node)?;

    let mut params = Vec::new();
    let mut locals = Vec::new();
    let mut in_locals = false;
    let mut i = 0;
    while i < words.len() {
        let word = words[i];
        if in_locals {
            if !is_identifier_word(word) {
                return None;
            }
            locals.push(word.to_string());
            i += 1;
            continue;
        }
        if word == ":" {
            in_locals = true;
            i += 1;
            continue;
        }
        if let Some(external) = word.strip_suffix(':') {
            if !is_identifier_word(external) {
                return None;
            }
            match words.get(i + 1) {
                Some(next) if is_identifier_word(next) => {
                    params.push(Param::renamed(external, next));
                    i += 2;
                }
                _ => {
                    // Trailing-colon-only entry: the rest of the list names
                    // sub-definitions, starting with this one.
                    locals.push(external.to_string());
                    in_locals = true;
                    i += 1;
                }
            }
        } else if is_identifier_word(word) {
            params.push(Param::new(word));
            i += 1;
        } else {
            return None;
        }
    }

    if params.is_empty() && locals.is_empty() {
        return None;
    }
    Some(ArgList { params, locals })
}

fn arg_words(node: &Node) -> Option<Vec<&str>> {
    match node {
        Node::Group(children) => children.iter().map(Node::word_text).collect(),
        Node::Union(children) => {
            let mut words = Vec::new();
            for child in children {
                match child {
                    Node::Group(inner) => {
                        for node in inner {
                            words.push(node.word_text()?);
                        }
                    }
                    _ => return None,
                }
            }
            if words.is_empty() {
                None
            } else {
                Some(words)
            }
        }
        _ => None,
    }
}

/// `<int>["r"]` suffix in a 4-part header: digits set the precedence, a
/// trailing `r` makes the function right-associative.
fn parse_precedence_suffix(text: &str) -> Option<(i32, Assoc)> {
    let (digits, assoc) = match text.strip_suffix('r') {
        Some(rest) => (rest, Assoc::Right),
        None => (text, Assoc::Left),
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse::<i32>().ok().map(|p| (p, assoc))
}

/// Recognizes a named definition header and constructs its function value.
///
/// Shapes: `name (right) body`, `(left) name body`, `(left) name (right)
/// body`, optionally with the precedence/associativity suffix before the
/// body. The body is the remaining nodes, or the content of a trailing bar
/// pair. Declared names are placeholder-shadowed while the body parses and
/// restored afterwards, whatever the body does, so inner references never
/// leak to same-named outer bindings mid-parse.
pub(crate) fn try_definition(items: &[Node], ctx: &mut ParseContext<'_>) -> Option<Object> {
    let mut idx = 0;

    let left = items.first().and_then(parse_arg_list);
    if left.is_some() {
        idx += 1;
    }

    let (name, name_offset) = match items.get(idx) {
        Some(Node::Word { text, span }) if is_identifier_word(text) && !is_marker(text) => {
            (text.clone(), span.start)
        }
        _ => return None,
    };
    idx += 1;

    // A name bound to a primitive reads as an application, never a
    // redefinition: `(double) send (21)` is a send, not a header.
    if let Some(Object::Function(bound)) = ctx.table.get(&Key::name(&name)) {
        if bound.tag != RuntimeTag::Custom {
            return None;
        }
    }

    let mut right: Option<ArgList> = None;
    if items.len() > idx + 1 {
        if let Some(args) = items.get(idx).and_then(parse_arg_list) {
            right = Some(args);
            idx += 1;
        }
    }

    let mut precedence = PRECEDENCE_DEFAULT;
    let mut assoc = Assoc::Left;
    if items.len() > idx + 1 {
        if let Some(Node::Word { text, .. }) = items.get(idx) {
            if let Some((p, a)) = parse_precedence_suffix(text) {
                precedence = p;
                assoc = a;
                idx += 1;
            }
        }
    }

    let body_nodes = &items[idx..];
    if body_nodes.is_empty() {
        return None;
    }
    if left.is_none() && right.is_none() {
        return None;
    }

    let mut locals = Vec::new();
    let left_params = left
        .map(|mut args| {
            locals.append(&mut args.locals);
            args.params
        })
        .unwrap_or_default();
    let right_params = right
        .map(|mut args| {
            locals.append(&mut args.locals);
            args.params
        })
        .unwrap_or_default();

    let plain_key = Key::name(&name);
    let shaped_key = Key::shaped(&name, !left_params.is_empty(), right_params.len());
    let newly_created = !ctx.table.contains(&plain_key) && !ctx.table.contains(&shaped_key);

    // Function-shaped placeholder so recursive references inside the body
    // read as operator occurrences with the declared shape.
    let placeholder = Object::function(Function {
        id: FunctionId::fresh(),
        name: Some(plain_key.clone()),
        precedence,
        assoc,
        left: left_params.clone(),
        right: right_params.clone(),
        locals: Vec::new(),
        body: Vec::new(),
        is_block: false,
        tag: RuntimeTag::Custom,
        compiled: None,
    });

    let (body, collected) = parse_scoped_body(
        body_nodes,
        left_params.iter().chain(right_params.iter()),
        &locals,
        Some((&plain_key, &shaped_key, placeholder)),
        ctx,
    );

    let function = Function {
        id: FunctionId::fresh(),
        name: Some(plain_key.clone()),
        precedence,
        assoc,
        left: left_params,
        right: right_params,
        locals: collected,
        body,
        is_block: false,
        tag: RuntimeTag::Custom,
        compiled: None,
    };
    let object = Object::function(function);

    if newly_created {
        ctx.anchor(&plain_key, name_offset);
    }
    if ctx.sink_accepts(&name) {
        ctx.sink_push(plain_key, object.clone());
    } else {
        ctx.table.bind(shaped_key, object.clone());
        ctx.table.bind(plain_key, object.clone());
    }
    Some(object)
}

/// Recognizes the anonymous closure shape `(args) (body)` — the callback
/// form `map`/`filter`/`reduce` consume.
pub(crate) fn try_anonymous(items: &[Node], ctx: &mut ParseContext<'_>) -> Option<Object> {
    if items.len() != 2 {
        return None;
    }
    let args = parse_arg_list(&items[0])?;
    if args.params.is_empty() || !args.locals.is_empty() {
        return None;
    }
    let body_nodes = match &items[1] {
        Node::Group(children) => children.as_slice(),
        _ => return None,
    };

    let (body, _) = parse_scoped_body(body_nodes, args.params.iter(), &[], None, ctx);
    Some(Object::function(Function {
        right: args.params,
        ..Function::block(body)
    }))
}

/// Builds a bar closure from already-split pieces: `|args| body` when
/// `body_nodes` is non-empty, otherwise the bars delimited the body itself
/// and the block takes no arguments.
pub(crate) fn build_bar_block(
    arg_nodes: &[Node],
    body_nodes: &[Node],
    ctx: &mut ParseContext<'_>,
) -> Object {
    let (params, body_nodes) = if body_nodes.is_empty() {
        (Vec::new(), arg_nodes)
    } else {
        let params: Option<Vec<Param>> = arg_nodes
            .iter()
            .map(|node| {
                node.word_text()
                    .filter(|text| is_identifier_word(text))
                    .map(Param::new)
            })
            .collect();
        match params {
            Some(params) if !params.is_empty() => (params, body_nodes),
            _ => {
                return Object::error(
                    crate::object::DiagKind::Syntax,
                    "malformed block argument list",
                )
            }
        }
    };

    let (body, _) = parse_scoped_body(body_nodes, params.iter(), &[], None, ctx);
    Object::function(Function {
        right: params,
        ..Function::block(body)
    })
}

/// Parses a body with every declared name placeholder-shadowed, restoring
/// the table on the way out. Returns the body objects and any collected
/// sub-definitions.
fn parse_scoped_body<'p>(
    body_nodes: &[Node],
    params: impl Iterator<Item = &'p Param>,
    locals: &[String],
    self_keys: Option<(&Key, &Key, Object)>,
    ctx: &mut ParseContext<'_>,
) -> (Vec<Object>, Vec<(Key, Object)>) {
    let mut bindings: Vec<(Key, Object)> = Vec::new();
    for param in params {
        bindings.push((
            param.internal.clone(),
            Object::Ident(param.internal.clone()),
        ));
    }
    for local in locals {
        // Sub-definitions are functions; a function-shaped placeholder
        // keeps their references from reading as plain values.
        let key = Key::name(local);
        bindings.push((key.clone(), Object::function(Function::group(Vec::new()))));
    }
    if let Some((plain, shaped, placeholder)) = self_keys {
        bindings.push((plain.clone(), placeholder.clone()));
        bindings.push((shaped.clone(), placeholder));
    }

    let saved = ctx.table.shadow(bindings);
    ctx.push_sink(locals);
    let body = match split_bars(body_nodes) {
        Some((args, rest)) if rest.is_empty() && args_have_no_bars(args) => {
            // Trailing bar pair: the bars delimit the body directly.
            objectify_items(args, ctx)
        }
        _ => objectify_items(body_nodes, ctx),
    };
    let collected = ctx.pop_sink();
    ctx.table.restore(saved);

    (body, collected)
}

fn args_have_no_bars(nodes: &[Node]) -> bool {
    !nodes.iter().any(|n| n.is_word("|"))
}

/// Splits `| a b | rest…` into (`a b`, `rest…`). None without a leading
/// bar pair.
pub(crate) fn split_bars(nodes: &[Node]) -> Option<(&[Node], &[Node])> {
    if !nodes.first()?.is_word("|") {
        return None;
    }
    let close = nodes[1..].iter().position(|n| n.is_word("|"))? + 1;
    Some((&nodes[1..close], &nodes[close + 1..]))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::eval::SymbolTable;
    use crate::lexer::Lexer;
    use crate::parser::tree;

    fn items(input: &str) -> Vec<Node> {
        tree::build(&Lexer::new().lex(input)).unwrap()
    }

    fn function_of(object: &Object) -> &Function {
        match object {
            Object::Function(f) => f,
            other => panic!("expected function, got {:?}", other),
        }
    }

    #[test]
    fn test_left_arg_definition() {
        let mut table = SymbolTable::standard();
        let mut ctx = ParseContext::new(&mut table, None);
        let nodes = items("(a) double (a * 2)");
        let object = try_definition(&nodes, &mut ctx).expect("definition shape");
        let func = function_of(&object);
        assert_eq!(func.left.len(), 1);
        assert_eq!(func.right.len(), 0);
        assert_eq!(func.left[0].external, Key::name("a"));
        assert!(table.contains(&Key::shaped("double", true, 0)));
        assert!(table.contains(&Key::name("double")));
    }

    #[test]
    fn test_both_sides_and_suffix() {
        let mut table = SymbolTable::standard();
        let mut ctx = ParseContext::new(&mut table, None);
        let nodes = items("(a) plus (b) 40r (a + b)");
        let object = try_definition(&nodes, &mut ctx).expect("definition shape");
        let func = function_of(&object);
        assert_eq!(func.precedence, 40);
        assert_eq!(func.assoc, Assoc::Right);
        assert_eq!(func.arity(), 2);
        assert!(table.contains(&Key::shaped("plus", true, 1)));
    }

    #[test]
    fn test_bar_body_definition() {
        let mut table = SymbolTable::standard();
        let mut ctx = ParseContext::new(&mut table, None);
        let nodes = items("(x) f | x > 5 |");
        let object = try_definition(&nodes, &mut ctx).expect("definition shape");
        let func = function_of(&object);
        // Bars delimited the body directly: x > 5, three body objects.
        assert_eq!(func.body.len(), 3);
    }

    #[test]
    fn test_renamed_argument() {
        let mut table = SymbolTable::standard();
        let mut ctx = ParseContext::new(&mut table, None);
        let nodes = items("(outer: inner) f (inner)");
        let object = try_definition(&nodes, &mut ctx).expect("definition shape");
        let func = function_of(&object);
        assert_eq!(func.left[0].external, Key::name("outer"));
        assert_eq!(func.left[0].internal, Key::name("inner"));
    }

    #[test]
    fn test_labeled_call_is_not_a_header() {
        let mut table = SymbolTable::standard();
        let mut ctx = ParseContext::new(&mut table, None);
        let nodes = items("f (x: 3) (body)");
        assert!(try_definition(&nodes, &mut ctx).is_none());
    }

    #[test]
    fn test_call_without_body_is_not_a_header() {
        let mut table = SymbolTable::standard();
        let mut ctx = ParseContext::new(&mut table, None);
        let nodes = items("(x) f");
        assert!(try_definition(&nodes, &mut ctx).is_none());
    }

    #[test]
    fn test_anonymous_closure() {
        let mut table = SymbolTable::standard();
        let mut ctx = ParseContext::new(&mut table, None);
        let nodes = items("(x) (x * 2)");
        let object = try_anonymous(&nodes, &mut ctx).expect("closure shape");
        let func = function_of(&object);
        assert!(func.is_block);
        assert_eq!(func.right.len(), 1);
    }

    #[test]
    fn test_table_restored_after_header_parse() {
        let mut table = SymbolTable::standard();
        table.bind(Key::name("a"), Object::Int(99));
        let mut ctx = ParseContext::new(&mut table, None);
        let nodes = items("(a) double (a * 2)");
        try_definition(&nodes, &mut ctx).expect("definition shape");
        // The outer binding of `a` survives the placeholder shadowing.
        assert_eq!(table.get(&Key::name("a")), Some(&Object::Int(99)));
    }

    #[test]
    fn test_sub_definition_names() {
        let list = parse_arg_list(&items("(x helper:)")[0]).expect("arg list");
        assert_eq!(list.params.len(), 1);
        assert_eq!(list.locals, vec!["helper".to_string()]);
    }
}
