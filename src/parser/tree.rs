use crate::lexer::{Span, Token, TokenSpan};
use crate::object::{Diag, DiagKind};

/// Structural parse tree.
///
/// Three structural kinds plus leaves: a [`Node::Union`] is a juxtaposition
/// group (tokens glued together: `f(x)`, `2x`, `(a)b`), a [`Node::Group`] an
/// explicit parenthesized call/block/tuple, and word/text leaves carry the
/// raw spans for the literal interpreter.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Union(Vec<Node>),
    Group(Vec<Node>),
    Word { text: String, span: Span },
    Text { text: String, span: Span },
}

impl Node {
    pub fn word_text(&self) -> Option<&str> {
        match self {
            Node::Word { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn is_word(&self, expected: &str) -> bool {
        self.word_text() == Some(expected)
    }
}

struct Level {
    items: Vec<Node>,
    union_start: Option<usize>,
    opened_glued: bool,
}

impl Level {
    fn new(opened_glued: bool) -> Self {
        Self {
            items: Vec::new(),
            union_start: None,
            opened_glued,
        }
    }

    fn close_union(&mut self) {
        if let Some(start) = self.union_start.take() {
            if self.items.len() - start >= 2 {
                let children = self.items.split_off(start);
                self.items.push(Node::Union(children));
            }
        }
    }

    /// Appends a node, extending or folding the pending union according to
    /// how the node touches its neighbors.
    fn attach(&mut self, node: Node, glued_prev: bool, glued_next: bool) {
        if glued_prev && !self.items.is_empty() {
            if self.union_start.is_none() {
                self.union_start = Some(self.items.len() - 1);
            }
        } else {
            self.close_union();
        }
        self.items.push(node);
        if glued_next {
            if self.union_start.is_none() {
                self.union_start = Some(self.items.len() - 1);
            }
        } else {
            self.close_union();
        }
    }
}

/// Builds the structural tree for one cell.
///
/// Returns the root item list (the cell is an implicit group). The lexer's
/// single-error contract is honored here: an error token becomes a lexical
/// diagnostic, not a panic.
pub fn build(tokens: &[TokenSpan]) -> Result<Vec<Node>, Diag> {
    if let Some(TokenSpan {
        token: Token::Error(error),
        ..
    }) = tokens.first()
    {
        return Err(Diag::new(DiagKind::Lexical, error.to_string()));
    }

    // A comma at bracket depth zero needs an enclosing group to split; wrap
    // the whole stream so `1, 2` reads as `(1)(2)`.
    let needs_wrap = {
        let mut depth = 0usize;
        let mut found = false;
        for ts in tokens {
            match &ts.token {
                Token::Start => depth += 1,
                Token::End => depth = depth.saturating_sub(1),
                Token::EndStart if depth == 0 => {
                    found = true;
                    break;
                }
                _ => {}
            }
        }
        found
    };

    let mut levels: Vec<Level> = vec![Level::new(false)];
    if needs_wrap {
        levels.push(Level::new(false));
    }

    for (i, ts) in tokens.iter().enumerate() {
        match &ts.token {
            Token::Word { text, adj } => {
                let node = Node::Word {
                    text: text.clone(),
                    span: ts.span.clone(),
                };
                let level = levels.last_mut().expect("level stack never empties");
                level.attach(node, adj.glued_prev(), adj.glued_next());
            }
            Token::Text { text, adj } => {
                let node = Node::Text {
                    text: text.clone(),
                    span: ts.span.clone(),
                };
                let level = levels.last_mut().expect("level stack never empties");
                level.attach(node, adj.glued_prev(), adj.glued_next());
            }
            Token::Start => {
                let glued = start_continues_union(tokens, i);
                levels.push(Level::new(glued));
            }
            Token::End => {
                let group = fold_level(&mut levels)?;
                let glued_prev = group.1;
                let glued_next = end_continues_union(tokens, i);
                let level = levels.last_mut().expect("level stack never empties");
                level.attach(group.0, glued_prev, glued_next);
            }
            Token::EndStart => {
                let group = fold_level(&mut levels)?;
                let level = levels.last_mut().expect("level stack never empties");
                // The fused `)(` chains groups into one union without
                // breaking it, whatever the surrounding whitespace.
                level.attach(group.0, true, true);
                levels.push(Level::new(true));
            }
            Token::Error(error) => {
                return Err(Diag::new(DiagKind::Lexical, error.to_string()));
            }
        }
    }

    if needs_wrap {
        let group = fold_level(&mut levels)?;
        let level = levels.last_mut().expect("level stack never empties");
        level.attach(group.0, group.1, false);
    }

    if levels.len() != 1 {
        return Err(Diag::new(DiagKind::Syntax, "unbalanced group"));
    }
    let mut root = levels.pop().expect("level stack never empties");
    root.close_union();
    Ok(root.items)
}

fn fold_level(levels: &mut Vec<Level>) -> Result<(Node, bool), Diag> {
    if levels.len() < 2 {
        return Err(Diag::new(DiagKind::Syntax, "unbalanced group"));
    }
    let mut level = levels.pop().expect("checked above");
    level.close_union();
    Ok((Node::Group(level.items), level.opened_glued))
}

/// `(` continues the pending union when the previous token touches it:
/// a left-glued word/string (`f(`) or a closing bracket it abuts (`)(`).
fn start_continues_union(tokens: &[TokenSpan], i: usize) -> bool {
    if i == 0 {
        return false;
    }
    let prev = &tokens[i - 1];
    match &prev.token {
        Token::Word { adj, .. } | Token::Text { adj, .. } => adj.glued_next(),
        Token::End => prev.span.end == tokens[i].span.start,
        _ => false,
    }
}

/// `)` leaves the union open only when the next token keeps touching it:
/// a right-glued word/string (`)b`) or an abutting `(`.
fn end_continues_union(tokens: &[TokenSpan], i: usize) -> bool {
    match tokens.get(i + 1) {
        Some(next) => match &next.token {
            Token::Word { adj, .. } | Token::Text { adj, .. } => adj.glued_prev(),
            Token::Start => tokens[i].span.end == next.span.start,
            _ => false,
        },
        None => false,
    }
}
