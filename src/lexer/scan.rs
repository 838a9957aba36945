use tracing::debug;

use super::token::{Adjacency, LexError, Span, Token, TokenSpan};
use crate::config::EvalConfig;

const OPEN_BRACKETS: &[char] = &['(', '[', '{'];
const CLOSE_BRACKETS: &[char] = &[')', ']', '}'];

fn partner(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

/// Stateful lexer for one cell.
///
/// Splits the span into physical lines, synthesizes grouping tokens from
/// leading tab runs and line boundaries, splits each line on whitespace
/// outside quoted strings, and classifies word/string adjacency. Malformed
/// input produces a single [`Token::Error`] instead of a failure result.
#[derive(Debug, Clone)]
pub struct Lexer {
    max_tokens: usize,
}

impl Default for Lexer {
    fn default() -> Self {
        Self::new()
    }
}

impl Lexer {
    pub fn new() -> Self {
        Self::with_config(&EvalConfig::default())
    }

    pub fn with_config(config: &EvalConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
        }
    }

    #[tracing::instrument(level = "debug", skip(self, input))]
    pub fn lex(&self, input: &str) -> Vec<TokenSpan> {
        let lines = split_lines(input);
        let row_mode = lines
            .iter()
            .filter(|line| !line.text.trim().is_empty())
            .count()
            >= 2;

        let mut tokens: Vec<TokenSpan> = Vec::new();
        let mut brackets: Vec<(char, Span)> = Vec::new();
        let mut open_groups = 0usize;
        let mut prev_indent: Option<usize> = None;

        for line in &lines {
            if line.text.trim().is_empty() {
                continue;
            }
            let indent = line.text.chars().take_while(|c| *c == '\t').count();
            let boundary = Span::point(line.offset, line.number, 1);

            match prev_indent {
                None => {
                    let opens = indent + usize::from(row_mode);
                    for _ in 0..opens {
                        tokens.push(TokenSpan {
                            token: Token::Start,
                            span: boundary.clone(),
                        });
                    }
                    open_groups += opens;
                }
                Some(prev) if indent == prev => {
                    if open_groups > 0 {
                        tokens.push(TokenSpan {
                            token: Token::EndStart,
                            span: boundary.clone(),
                        });
                    }
                }
                Some(prev) if indent > prev => {
                    for _ in 0..(indent - prev) {
                        tokens.push(TokenSpan {
                            token: Token::Start,
                            span: boundary.clone(),
                        });
                    }
                    open_groups += indent - prev;
                }
                Some(prev) => {
                    let closes = (prev - indent).min(open_groups);
                    for _ in 0..closes {
                        tokens.push(TokenSpan {
                            token: Token::End,
                            span: boundary.clone(),
                        });
                    }
                    open_groups -= closes;
                    if open_groups > 0 {
                        tokens.push(TokenSpan {
                            token: Token::EndStart,
                            span: boundary.clone(),
                        });
                    }
                }
            }
            prev_indent = Some(indent);

            match scan_line(line, &mut brackets) {
                Ok(mut line_tokens) => tokens.append(&mut line_tokens),
                Err(error) => return vec![error_token(error)],
            }
        }

        if let Some((open, span)) = brackets.first() {
            return vec![error_token(LexError::UnbalancedBracket {
                found: *open,
                span: span.clone(),
            })];
        }

        let closing = Span::point(input.len(), lines.len().max(1), 1);
        for _ in 0..open_groups {
            tokens.push(TokenSpan {
                token: Token::End,
                span: closing.clone(),
            });
        }

        if tokens.len() > self.max_tokens {
            return vec![error_token(LexError::TooManyTokens {
                limit: self.max_tokens,
            })];
        }

        debug!(count = tokens.len(), "lexed cell");
        tokens
    }
}

fn error_token(error: LexError) -> TokenSpan {
    let span = match &error {
        LexError::UnterminatedString { span } => span.clone(),
        LexError::UnbalancedBracket { span, .. } => span.clone(),
        LexError::TooManyTokens { .. } => Span::point(0, 1, 1),
    };
    TokenSpan {
        token: Token::Error(error),
        span,
    }
}

struct Line<'a> {
    text: &'a str,
    offset: usize,
    number: usize,
}

fn split_lines(input: &str) -> Vec<Line<'_>> {
    let mut lines = Vec::new();
    let mut offset = 0;
    for (number, text) in input.split('\n').enumerate() {
        lines.push(Line {
            text,
            offset,
            number: number + 1,
        });
        offset += text.len() + 1;
    }
    lines
}

/// Scans one line into tokens with adjacency already classified.
///
/// Gluing is line-local: a word/string is promoted when it touches an
/// opening bracket, word or string on its right, or a closing bracket,
/// word or string on its left. The fused `)(` from a comma deliberately
/// breaks gluing on both sides.
fn scan_line(line: &Line<'_>, brackets: &mut Vec<(char, Span)>) -> Result<Vec<TokenSpan>, LexError> {
    let mut raw: Vec<(Token, Span)> = Vec::new();
    let mut word: Option<(String, usize, usize)> = None;

    let mut chars = line.text.char_indices().peekable();
    let mut column = 0usize;

    let flush = |word: &mut Option<(String, usize, usize)>,
                 raw: &mut Vec<(Token, Span)>,
                 end_offset: usize| {
        if let Some((text, start, start_col)) = word.take() {
            let span = Span {
                start,
                end: end_offset,
                line: line.number,
                column: start_col,
            };
            raw.push((
                Token::Word {
                    text,
                    adj: Adjacency::Plain,
                },
                span,
            ));
        }
    };

    while let Some((i, c)) = chars.next() {
        column += 1;
        let offset = line.offset + i;
        match c {
            ' ' | '\t' | '\r' => flush(&mut word, &mut raw, offset),
            ',' => {
                flush(&mut word, &mut raw, offset);
                raw.push((
                    Token::EndStart,
                    Span {
                        start: offset,
                        end: offset + 1,
                        line: line.number,
                        column,
                    },
                ));
            }
            '|' => {
                flush(&mut word, &mut raw, offset);
                raw.push((
                    Token::Word {
                        text: "|".to_string(),
                        adj: Adjacency::Plain,
                    },
                    Span {
                        start: offset,
                        end: offset + 1,
                        line: line.number,
                        column,
                    },
                ));
            }
            '"' => {
                flush(&mut word, &mut raw, offset);
                let start_col = column;
                let mut text = String::new();
                let mut closed = false;
                let mut end = offset + 1;
                while let Some((j, sc)) = chars.next() {
                    column += 1;
                    end = line.offset + j + sc.len_utf8();
                    match sc {
                        '\\' => {
                            // Escape: consume the next char literally.
                            if let Some((k, ec)) = chars.next() {
                                column += 1;
                                end = line.offset + k + ec.len_utf8();
                                text.push(match ec {
                                    'n' => '\n',
                                    't' => '\t',
                                    other => other,
                                });
                            }
                        }
                        '"' => {
                            closed = true;
                            break;
                        }
                        other => text.push(other),
                    }
                }
                if !closed {
                    return Err(LexError::UnterminatedString {
                        span: Span {
                            start: offset,
                            end,
                            line: line.number,
                            column: start_col,
                        },
                    });
                }
                raw.push((
                    Token::Text {
                        text,
                        adj: Adjacency::Plain,
                    },
                    Span {
                        start: offset,
                        end,
                        line: line.number,
                        column: start_col,
                    },
                ));
            }
            c if OPEN_BRACKETS.contains(&c) => {
                flush(&mut word, &mut raw, offset);
                let span = Span {
                    start: offset,
                    end: offset + 1,
                    line: line.number,
                    column,
                };
                brackets.push((c, span.clone()));
                raw.push((Token::Start, span));
            }
            c if CLOSE_BRACKETS.contains(&c) => {
                flush(&mut word, &mut raw, offset);
                let span = Span {
                    start: offset,
                    end: offset + 1,
                    line: line.number,
                    column,
                };
                match brackets.pop() {
                    Some((open, _)) if partner(open) == c => {}
                    _ => {
                        return Err(LexError::UnbalancedBracket {
                            found: c,
                            span,
                        })
                    }
                }
                raw.push((Token::End, span));
            }
            other => match &mut word {
                Some((text, _, _)) => text.push(other),
                None => word = Some((other.to_string(), offset, column)),
            },
        }
    }
    flush(&mut word, &mut raw, line.offset + line.text.len());

    classify(&mut raw);
    Ok(raw
        .into_iter()
        .map(|(token, span)| TokenSpan { token, span })
        .collect())
}

/// Bidirectional adjacency promotion over one line's raw tokens. Block
/// delimiters are structure, not juxtaposition: a bar never glues.
fn classify(raw: &mut [(Token, Span)]) {
    let is_bar = |token: &Token| matches!(token, Token::Word { text, .. } if text == "|");
    let glue: Vec<(bool, bool)> = (0..raw.len())
        .map(|i| {
            if is_bar(&raw[i].0) {
                return (false, false);
            }
            let glued_prev = i > 0
                && raw[i - 1].1.end == raw[i].1.start
                && !is_bar(&raw[i - 1].0)
                && matches!(raw[i - 1].0, Token::End | Token::Word { .. } | Token::Text { .. });
            let glued_next = i + 1 < raw.len()
                && raw[i].1.end == raw[i + 1].1.start
                && !is_bar(&raw[i + 1].0)
                && matches!(
                    raw[i + 1].0,
                    Token::Start | Token::Word { .. } | Token::Text { .. }
                );
            (glued_prev, glued_next)
        })
        .collect();

    for (i, (token, _)) in raw.iter_mut().enumerate() {
        let (glued_prev, glued_next) = glue[i];
        match token {
            Token::Word { adj, .. } | Token::Text { adj, .. } => {
                *adj = Adjacency::of(glued_prev, glued_next);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn lex(input: &str) -> Vec<Token> {
        Lexer::new()
            .lex(input)
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    #[test]
    fn test_plain_expression() {
        assert_eq!(
            lex("1 + 2"),
            vec![Token::word("1"), Token::word("+"), Token::word("2")]
        );
    }

    #[test]
    fn test_call_adjacency() {
        let tokens = lex("f(x)");
        assert_eq!(
            tokens,
            vec![
                Token::Word {
                    text: "f".into(),
                    adj: Adjacency::Left
                },
                Token::Start,
                Token::word("x"),
                Token::End,
            ]
        );
    }

    #[test]
    fn test_trailing_juxtaposition() {
        let tokens = lex("(a)b");
        assert_eq!(
            tokens,
            vec![
                Token::Start,
                Token::word("a"),
                Token::End,
                Token::Word {
                    text: "b".into(),
                    adj: Adjacency::Right
                },
            ]
        );
    }

    #[test]
    fn test_comma_rewrites_and_breaks_glue() {
        let tokens = lex("f(a, b)");
        assert_eq!(
            tokens,
            vec![
                Token::Word {
                    text: "f".into(),
                    adj: Adjacency::Left
                },
                Token::Start,
                Token::word("a"),
                Token::EndStart,
                Token::word("b"),
                Token::End,
            ]
        );
    }

    #[test]
    fn test_square_brackets_group() {
        let tokens = lex("[1,2]");
        assert_eq!(
            tokens,
            vec![
                Token::Start,
                Token::word("1"),
                Token::EndStart,
                Token::word("2"),
                Token::End,
            ]
        );
    }

    #[test]
    fn test_string_with_escape() {
        let tokens = lex(r#""say \"hi\"""#);
        assert_eq!(
            tokens,
            vec![Token::Text {
                text: r#"say "hi""#.into(),
                adj: Adjacency::Plain
            }]
        );
    }

    #[test]
    fn test_string_glued_to_word() {
        let tokens = lex(r#"greet"world""#);
        assert_eq!(
            tokens,
            vec![
                Token::Word {
                    text: "greet".into(),
                    adj: Adjacency::Left
                },
                Token::Text {
                    text: "world".into(),
                    adj: Adjacency::Right
                },
            ]
        );
    }

    #[test]
    fn test_unterminated_string_is_single_error() {
        let tokens = lex("\"abc");
        assert_eq!(tokens.len(), 1);
        assert!(
            matches!(&tokens[0], Token::Error(LexError::UnterminatedString { .. })),
            "got {:?}",
            tokens[0]
        );
    }

    #[test]
    fn test_unbalanced_brackets() {
        for input in ["(1 + 2", "1)", "(a]"] {
            let tokens = lex(input);
            assert_eq!(tokens.len(), 1, "input {:?}", input);
            assert!(matches!(
                &tokens[0],
                Token::Error(LexError::UnbalancedBracket { .. })
            ));
        }
    }

    #[test]
    fn test_matrix_rows_from_lines() {
        let tokens = lex("1\t2\n3\t4");
        assert_eq!(
            tokens,
            vec![
                Token::Start,
                Token::word("1"),
                Token::word("2"),
                Token::EndStart,
                Token::word("3"),
                Token::word("4"),
                Token::End,
            ]
        );
    }

    #[test]
    fn test_indent_opens_group() {
        let tokens = lex("a\n\tb\n\tc");
        assert_eq!(
            tokens,
            vec![
                Token::Start,
                Token::word("a"),
                Token::Start,
                Token::word("b"),
                Token::EndStart,
                Token::word("c"),
                Token::End,
                Token::End,
            ]
        );
    }

    #[test]
    fn test_single_line_has_no_synthesis() {
        assert_eq!(lex("x"), vec![Token::word("x")]);
    }

    #[test]
    fn test_bar_never_glues() {
        let tokens = lex("|x| x");
        assert_eq!(
            tokens,
            vec![
                Token::word("|"),
                Token::word("x"),
                Token::word("|"),
                Token::word("x"),
            ]
        );
    }
}
