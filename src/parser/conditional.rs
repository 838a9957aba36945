use crate::object::{Diag, DiagKind, Function, Key, Object};

use super::tree::Node;
use super::{objectify_items, ParseContext};

pub(crate) const THEN_MARKER: &str = "->";
pub(crate) const ELSE_MARKER: &str = "-!";
pub(crate) const CASE_MARKER: &str = "case";

pub(crate) fn has_markers(items: &[Node]) -> bool {
    items.iter().any(|node| {
        matches!(
            node.word_text(),
            Some(THEN_MARKER) | Some(ELSE_MARKER) | Some(CASE_MARKER)
        )
    })
}

struct Segment<'a> {
    cond: Vec<&'a Node>,
    then_value: Option<&'a Node>,
    cases: Vec<(&'a Node, &'a Node)>,
}

/// Rewrites a marker chain into its desugared form.
///
/// `C -> V case L1 V1 … -! E` becomes `( (C) ? (true: |V| L1: |V1| …) ?? |E| ) send`:
/// the branch bodies wrap into deferred blocks keyed by their labels, the
/// label-select `?` picks one by the condition's value, `??` falls back to
/// the else block when nothing matched, and the trailing `send` runs
/// whichever block won. Chained conditions nest to the right, so earlier
/// conditions wrap later ones.
pub(crate) fn rewrite(items: &[Node], ctx: &mut ParseContext<'_>) -> Vec<Object> {
    match partition(items) {
        Ok((segments, else_body)) => {
            let else_block = else_body.map(|nodes| deferred_block(&nodes, ctx));
            let selector = selector_body(&segments, else_block, ctx);
            vec![
                Object::function(Function::group(selector)),
                Object::Ident(Key::name("send")),
            ]
        }
        Err(diag) => vec![Object::Error(diag)],
    }
}

type Partition<'a> = (Vec<Segment<'a>>, Option<Vec<&'a Node>>);

/// Splits the item run into repeated (condition, then-marker, value,
/// case-label/case-value pairs) segments and a final else body. Malformed
/// marker sequencing fails immediately instead of rewriting.
fn partition(items: &[Node]) -> Result<Partition<'_>, Diag> {
    let mut segments: Vec<Segment<'_>> = Vec::new();
    let mut else_body: Option<Vec<&Node>> = None;
    let mut cond: Vec<&Node> = Vec::new();

    let marker_of = |node: &Node| -> Option<&'static str> {
        match node.word_text() {
            Some(THEN_MARKER) => Some(THEN_MARKER),
            Some(ELSE_MARKER) => Some(ELSE_MARKER),
            Some(CASE_MARKER) => Some(CASE_MARKER),
            _ => None,
        }
    };

    let mut i = 0;
    while i < items.len() {
        match marker_of(&items[i]) {
            Some(THEN_MARKER) => {
                if cond.is_empty() {
                    return Err(malformed("condition missing before '->'"));
                }
                let value = match items.get(i + 1) {
                    Some(node) if marker_of(node).is_none() => node,
                    _ => return Err(malformed("marker immediately follows '->'")),
                };
                i += 2;
                let mut segment = Segment {
                    cond: std::mem::take(&mut cond),
                    then_value: Some(value),
                    cases: Vec::new(),
                };
                i = collect_cases(items, i, &mut segment, &marker_of)?;
                segments.push(segment);
            }
            Some(CASE_MARKER) => {
                if cond.is_empty() {
                    return Err(malformed("condition missing before 'case'"));
                }
                let mut segment = Segment {
                    cond: std::mem::take(&mut cond),
                    then_value: None,
                    cases: Vec::new(),
                };
                i = collect_cases(items, i, &mut segment, &marker_of)?;
                if segment.cases.is_empty() {
                    return Err(malformed("'case' without label and value"));
                }
                segments.push(segment);
            }
            Some(ELSE_MARKER) => {
                if segments.is_empty() {
                    return Err(malformed("'-!' before any value"));
                }
                let rest: Vec<&Node> = items[i + 1..].iter().collect();
                if rest.is_empty() || rest.iter().any(|n| marker_of(n).is_some()) {
                    return Err(malformed("malformed else body"));
                }
                else_body = Some(rest);
                i = items.len();
            }
            _ => {
                cond.push(&items[i]);
                i += 1;
            }
        }
    }

    if !cond.is_empty() {
        return Err(malformed("condition without '->'"));
    }
    if segments.is_empty() {
        return Err(malformed("marker chain without any branch"));
    }
    Ok((segments, else_body))
}

fn collect_cases<'a>(
    items: &'a [Node],
    mut i: usize,
    segment: &mut Segment<'a>,
    marker_of: &dyn Fn(&Node) -> Option<&'static str>,
) -> Result<usize, Diag> {
    while items.get(i).is_some_and(|n| n.is_word(CASE_MARKER)) {
        let label = match items.get(i + 1) {
            Some(node) if marker_of(node).is_none() => node,
            _ => return Err(malformed("marker immediately follows 'case'")),
        };
        let value = match items.get(i + 2) {
            Some(node) if marker_of(node).is_none() => node,
            _ => return Err(malformed("'case' label without value")),
        };
        segment.cases.push((label, value));
        i += 3;
    }
    Ok(i)
}

fn malformed(message: &str) -> Diag {
    Diag::new(DiagKind::Syntax, message)
}

/// Right-nested selector: the first segment's else is the selector for the
/// remaining segments, wrapped in a deferred block.
fn selector_body(
    segments: &[Segment<'_>],
    else_block: Option<Object>,
    ctx: &mut ParseContext<'_>,
) -> Vec<Object> {
    let segment = &segments[0];

    let cond_nodes: Vec<Node> = segment.cond.iter().map(|n| (*n).clone()).collect();
    let cond = Object::function(Function::group(objectify_items(&cond_nodes, ctx)));

    let mut entries: Vec<(Key, Object)> = Vec::new();
    if let Some(value) = segment.then_value {
        entries.push((Key::name("true"), deferred_block(&[value], ctx)));
    }
    for (label, value) in &segment.cases {
        let key = match label.word_text() {
            Some(text) => Key::name(text),
            None => {
                return vec![Object::error(
                    DiagKind::Syntax,
                    "'case' label must be a plain word",
                )]
            }
        };
        entries.push((key, deferred_block(&[value], ctx)));
    }

    let fallback = if segments.len() > 1 {
        let inner = selector_body(&segments[1..], else_block, ctx);
        Some(Object::function(Function::block(inner)))
    } else {
        else_block
    };

    let mut body = vec![cond, Object::Ident(Key::name("?")), Object::Map(entries)];
    if let Some(fallback) = fallback {
        body.push(Object::Ident(Key::name("??")));
        body.push(fallback);
    }
    body
}

fn deferred_block(nodes: &[&Node], ctx: &mut ParseContext<'_>) -> Object {
    let owned: Vec<Node> = nodes.iter().map(|n| (*n).clone()).collect();
    Object::function(Function::block(objectify_items(&owned, ctx)))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::eval::SymbolTable;
    use crate::lexer::Lexer;
    use crate::parser::tree;

    fn nodes(input: &str) -> Vec<Node> {
        tree::build(&Lexer::new().lex(input)).unwrap()
    }

    fn rewrite_str(input: &str) -> Vec<Object> {
        let mut table = SymbolTable::standard();
        let mut ctx = ParseContext::new(&mut table, None);
        rewrite(&nodes(input), &mut ctx)
    }

    #[test]
    fn test_then_else_shape() {
        let objects = rewrite_str(r#"x > 5 -> "big" -! "small""#);
        assert_eq!(objects.len(), 2);
        assert!(matches!(&objects[1], Object::Ident(k) if k.display() == "send"));
        let selector = match &objects[0] {
            Object::Function(f) => f,
            other => panic!("expected selector group, got {:?}", other),
        };
        // cond, ?, map, ??, else
        assert_eq!(selector.body.len(), 5);
        assert!(matches!(&selector.body[1], Object::Ident(k) if k.display() == "?"));
        assert!(matches!(&selector.body[3], Object::Ident(k) if k.display() == "??"));
        match &selector.body[2] {
            Object::Map(entries) => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].0, Key::name("true"));
                assert!(matches!(&entries[0].1, Object::Function(f) if f.is_block));
            }
            other => panic!("expected branch map, got {:?}", other),
        }
    }

    #[test]
    fn test_case_labels_join_map() {
        let objects = rewrite_str(r#"x -> "yes" case red "r" case blue "b" -! "no""#);
        let selector = match &objects[0] {
            Object::Function(f) => f,
            other => panic!("expected selector group, got {:?}", other),
        };
        match &selector.body[2] {
            Object::Map(entries) => {
                let keys: Vec<&str> = entries.iter().map(|(k, _)| k.display()).collect();
                assert_eq!(keys, vec!["true", "red", "blue"]);
            }
            other => panic!("expected branch map, got {:?}", other),
        }
    }

    #[test]
    fn test_chained_conditions_nest_right() {
        let objects = rewrite_str(r#"a -> 1 b -> 2 -! 3"#);
        let selector = match &objects[0] {
            Object::Function(f) => f,
            other => panic!("expected selector group, got {:?}", other),
        };
        // The fallback of the first segment is a nested deferred selector.
        let fallback = &selector.body[4];
        match fallback {
            Object::Function(inner) => {
                assert!(inner.is_block);
                assert_eq!(inner.body.len(), 5);
            }
            other => panic!("expected nested selector, got {:?}", other),
        }
    }

    #[test]
    fn test_marker_after_marker_is_syntax_error() {
        let objects = rewrite_str("x -> -! 2");
        assert_eq!(objects.len(), 1);
        match &objects[0] {
            Object::Error(diag) => assert_eq!(diag.kind, DiagKind::Syntax),
            other => panic!("expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_else_before_value_is_syntax_error() {
        let objects = rewrite_str("-! 2");
        match &objects[0] {
            Object::Error(diag) => {
                assert_eq!(diag.kind, DiagKind::Syntax);
                assert!(diag.message.contains("before any value"));
            }
            other => panic!("expected syntax error, got {:?}", other),
        }
    }
}
