use std::collections::HashMap;

use lazy_static::lazy_static;
use nom::{
    character::complete::{char, digit1},
    combinator::{map_res, opt, recognize},
    sequence::{preceded, tuple},
    IResult,
};

use crate::lexer::Span;
use crate::object::{DiagKind, Key, Object};

use super::ParseContext;

lazy_static! {
    static ref SUPERSCRIPTS: HashMap<char, char> = [
        ('⁰', '0'),
        ('¹', '1'),
        ('²', '2'),
        ('³', '3'),
        ('⁴', '4'),
        ('⁵', '5'),
        ('⁶', '6'),
        ('⁷', '7'),
        ('⁸', '8'),
        ('⁹', '9'),
        ('⁻', '-'),
    ]
    .into_iter()
    .collect();
    static ref SUBSCRIPTS: HashMap<char, char> = [
        ('₀', '0'),
        ('₁', '1'),
        ('₂', '2'),
        ('₃', '3'),
        ('₄', '4'),
        ('₅', '5'),
        ('₆', '6'),
        ('₇', '7'),
        ('₈', '8'),
        ('₉', '9'),
    ]
    .into_iter()
    .collect();
}

/// Punctuation that clusters into standalone operator runs, so a glued
/// span like `x*2` or `a<=b` splits around its operator instead of fusing
/// into one unresolvable identifier.
const OPERATOR_CHARS: &str = "+-*/^<>=!?&%~×÷≤≥≠";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Digit,
    Punct,
    Operator,
    Superscript,
    Subscript,
    Symbol,
}

fn class_of(c: char) -> Class {
    if c.is_ascii_digit() {
        Class::Digit
    } else if c == '.' || c == ':' || c == ';' {
        Class::Punct
    } else if SUPERSCRIPTS.contains_key(&c) {
        Class::Superscript
    } else if SUBSCRIPTS.contains_key(&c) {
        Class::Subscript
    } else if OPERATOR_CHARS.contains(c) {
        Class::Operator
    } else {
        Class::Symbol
    }
}

/// Interprets one word span into a run of body objects.
///
/// A character-class state machine flushes the pending run at every class
/// transition; `.` either continues an integer into a decimal or terminates
/// the prior run depending on lookahead, a trailing `:` wraps the run into
/// a label, superscript digits become a synthetic power application, and
/// subscripts extend the identifier they follow. Adjacent resolved values
/// with no operator between them synthesize a `*` application.
pub fn interpret_word(text: &str, span: &Span, ctx: &mut ParseContext<'_>) -> Vec<Object> {
    let mut out: Vec<Object> = Vec::new();
    let mut run = String::new();
    let mut run_class: Option<Class> = None;

    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let class = class_of(c);
        match class {
            Class::Punct if c == '.' => {
                let decimal = run_class == Some(Class::Digit)
                    && !run.contains('.')
                    && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit());
                if decimal {
                    run.push('.');
                } else {
                    flush(&mut run, &mut run_class, &mut out, span, ctx);
                    run.push('.');
                    run_class = Some(Class::Punct);
                    flush(&mut run, &mut run_class, &mut out, span, ctx);
                }
            }
            Class::Punct if c == ':' => {
                // Trailing colon wraps the pending run into a label.
                if run.is_empty() {
                    run.push(':');
                    run_class = Some(Class::Punct);
                    flush(&mut run, &mut run_class, &mut out, span, ctx);
                } else {
                    let name = std::mem::take(&mut run);
                    run_class = None;
                    out.push(Object::Label(Key::name(&name)));
                }
            }
            Class::Subscript => match run_class {
                Some(Class::Symbol) => run.push(c),
                _ => {
                    flush(&mut run, &mut run_class, &mut out, span, ctx);
                    run.push(c);
                    run_class = Some(Class::Symbol);
                }
            },
            _ => {
                if run_class != Some(class) {
                    flush(&mut run, &mut run_class, &mut out, span, ctx);
                    run_class = Some(class);
                }
                run.push(c);
            }
        }
        i += 1;
    }
    flush(&mut run, &mut run_class, &mut out, span, ctx);

    out
}

fn flush(
    run: &mut String,
    run_class: &mut Option<Class>,
    out: &mut Vec<Object>,
    span: &Span,
    ctx: &mut ParseContext<'_>,
) {
    if run.is_empty() {
        *run_class = None;
        return;
    }
    let text = std::mem::take(run);
    let class = run_class.take().unwrap_or(Class::Symbol);
    match class {
        Class::Digit => push_value(out, resolve_number(&text), ctx),
        Class::Superscript => {
            // Superscript digits reparse as a nested exponent joined by a
            // synthetic power application.
            let translated: String = text.chars().map(|c| SUPERSCRIPTS[&c]).collect();
            out.push(Object::Ident(Key::name("^")));
            let exponent = match parse_number(&translated) {
                Ok(("", object)) => object,
                _ => {
                    let body = interpret_word(&translated, span, ctx);
                    Object::function(crate::object::Function::group(body))
                }
            };
            out.push(exponent);
        }
        Class::Punct | Class::Operator | Class::Symbol | Class::Subscript => {
            // A termwise expansion carries its own `*` separators; only its
            // head takes part in adjacency multiplication.
            let mut resolved = resolve_symbol(&text, span, ctx).into_iter();
            if let Some(head) = resolved.next() {
                push_value(out, head, ctx);
            }
            out.extend(resolved);
        }
    }
}

/// Implicit multiplication: a resolved value immediately following another
/// resolved value (no operator between them) synthesizes a `*` application.
fn push_value(out: &mut Vec<Object>, object: Object, ctx: &ParseContext<'_>) {
    if is_value(&object, ctx) && out.last().is_some_and(|prev| is_value(prev, ctx)) {
        out.push(Object::Ident(Key::name("*")));
    }
    out.push(object);
}

fn is_value(object: &Object, ctx: &ParseContext<'_>) -> bool {
    match object {
        Object::Ident(key) => !ctx.table.is_operator(key.display()),
        Object::Label(_) => false,
        _ => true,
    }
}

fn resolve_number(text: &str) -> Object {
    match parse_number(text) {
        Ok(("", object)) => object,
        _ => Object::error(DiagKind::Syntax, format!("malformed number '{}'", text)),
    }
}

fn parse_number(input: &str) -> IResult<&str, Object> {
    map_res(
        recognize(tuple((
            opt(char('-')),
            digit1,
            opt(preceded(char('.'), digit1)),
        ))),
        |s: &str| -> Result<Object, std::num::ParseFloatError> {
            if s.contains('.') {
                s.parse::<f64>().map(Object::Real)
            } else {
                match s.parse::<i64>() {
                    Ok(value) => Ok(Object::Int(value)),
                    Err(_) => s.parse::<f64>().map(Object::Real),
                }
            }
        },
    )(input)
}

/// Resolves a symbol run against the symbol table.
///
/// Priority is deliberate and load-bearing: a whole-span binding wins; then
/// a multi-character span where every character is itself a bound
/// single-character key expands termwise into `*`-joined lookups; a partial
/// match is an explicit ambiguity error, never a silent guess; and a span
/// with no matches at all is one new multi-character identifier.
fn resolve_symbol(text: &str, span: &Span, ctx: &mut ParseContext<'_>) -> Vec<Object> {
    let key = Key::name(text);
    if ctx.table.contains(&key) {
        return vec![Object::Ident(key)];
    }

    let chars: Vec<char> = text.chars().collect();
    if chars.len() > 1 {
        let bound = chars
            .iter()
            .filter(|c| ctx.table.contains(&Key::name(&c.to_string())))
            .count();
        if bound == chars.len() {
            let mut out = Vec::with_capacity(chars.len() * 2 - 1);
            for (i, c) in chars.iter().enumerate() {
                if i > 0 {
                    out.push(Object::Ident(Key::name("*")));
                }
                out.push(Object::Ident(Key::name(&c.to_string())));
            }
            return out;
        }
        if bound > 0 {
            return vec![Object::error(
                DiagKind::Binding,
                format!(
                    "'{}' overlaps with multiplication by multiple single-character variables",
                    text
                ),
            )];
        }
    }

    ctx.anchor(&key, span.start);
    vec![Object::Ident(key)]
}
