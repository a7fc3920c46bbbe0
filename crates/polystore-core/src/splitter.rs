//! SQL script splitting.
//!
//! Turns a migration or seed script into the individual statements the
//! relational engines execute one at a time.

use std::iter::Peekable;
use std::str::Chars;

/// Split a SQL blob into ordered, non-empty statements.
///
/// `--` line comments and `/* */` block comments are removed first; a `--`
/// glued between two operands (`5--3`) is arithmetic, not a comment. The
/// remaining text is split on `;` only outside single- or double-quoted
/// literals; a backslash-escaped quote does not close a literal. The last
/// fragment is kept even without a trailing semicolon.
pub fn split_statements(sql: &str) -> Vec<String> {
    let cleaned = strip_comments(sql);

    let mut statements = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = cleaned.chars();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                current.push(c);
                if c == '\\' {
                    if let Some(escaped) = chars.next() {
                        current.push(escaped);
                    }
                } else if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    current.push(c);
                }
                ';' => push_statement(&mut statements, &mut current),
                _ => current.push(c),
            },
        }
    }
    push_statement(&mut statements, &mut current);

    statements
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }
    current.clear();
}

/// Remove `--` and `/* */` comments, leaving quoted literals untouched.
pub fn strip_comments(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut quote: Option<char> = None;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            out.push(c);
            if c == '\\' {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            } else if c == q {
                quote = None;
            }
            continue;
        }

        match c {
            '\'' | '"' => {
                quote = Some(c);
                out.push(c);
            }
            '-' if chars.peek() == Some(&'-') && starts_line_comment(&out, &chars) => {
                // Keep the newline so statements on adjacent lines stay apart.
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut previous = '\0';
                for skipped in chars.by_ref() {
                    if previous == '*' && skipped == '/' {
                        break;
                    }
                    previous = skipped;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }

    out
}

/// Whether the `--` at the cursor opens a comment rather than being two
/// minus signs, as in `5--3`.
///
/// It is a comment when it starts a token (nothing, whitespace or
/// punctuation before it) or when whitespace follows it.
fn starts_line_comment(before: &str, rest: &Peekable<Chars<'_>>) -> bool {
    let starts_token = before
        .chars()
        .next_back()
        .map_or(true, |c| !(c.is_alphanumeric() || c == '_' || c == ')'));
    let mut ahead = rest.clone();
    ahead.next();
    let spaced = ahead.next().map_or(true, char::is_whitespace);
    starts_token || spaced
}

const ROW_RETURNING_KEYWORDS: &[&str] = &[
    "SELECT", "WITH", "SHOW", "DESCRIBE", "DESC", "EXPLAIN", "PRAGMA", "VALUES",
];

/// Whether a statement produces a result set rather than an affected-row count.
pub fn returns_rows(statement: &str) -> bool {
    let keyword: String = statement
        .trim_start()
        .trim_start_matches('(')
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    let keyword = keyword.to_ascii_uppercase();
    ROW_RETURNING_KEYWORDS.contains(&keyword.as_str())
}
