//! Glob to regular expression translation.
//!
//! Supported syntax: `*` (any run of characters), `?` (any one character), `[abc]`, `[a-z]` and
//! `[!abc]` classes, and `{one,two}` alternation. Everything else matches literally. The
//! resulting expression is anchored at both ends.

use regex::Regex;

use super::query::QueryError;

/// Compile `glob` into an anchored regular expression.
pub fn to_regex(glob: &str) -> Result<Regex, QueryError> {
    let pattern = translate(glob)?;
    Regex::new(&pattern).map_err(|e| QueryError::Pattern {
        pattern: glob.to_string(),
        reason: e.to_string(),
    })
}

fn translate(glob: &str) -> Result<String, QueryError> {
    let error = |reason: &str| QueryError::Pattern {
        pattern: glob.to_string(),
        reason: reason.to_string(),
    };

    let mut out = String::with_capacity(glob.len() * 2 + 2);
    out.push('^');
    let mut depth = 0usize;
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                // Collapse runs of stars
                while chars.peek() == Some(&'*') {
                    chars.next();
                }
                out.push_str(".*");
            }
            '?' => out.push('.'),
            '[' => {
                out.push('[');
                if matches!(chars.peek(), Some('!') | Some('^')) {
                    chars.next();
                    out.push('^');
                }
                let mut closed = false;
                let mut first = true;
                while let Some(c) = chars.next() {
                    match c {
                        // A leading ']' is a literal member of the class
                        ']' if !first => {
                            closed = true;
                            break;
                        }
                        '\\' | '[' | ']' | '&' | '~' => {
                            out.push('\\');
                            out.push(c);
                        }
                        _ => out.push(c),
                    }
                    first = false;
                }
                if !closed {
                    return Err(error("unclosed character class"));
                }
                out.push(']');
            }
            '{' => {
                depth += 1;
                out.push_str("(?:");
            }
            ',' if depth > 0 => out.push('|'),
            '}' if depth > 0 => {
                depth -= 1;
                out.push(')');
            }
            _ => {
                let mut buf = [0; 4];
                out.push_str(&regex::escape(c.encode_utf8(&mut buf)));
            }
        }
    }
    if depth > 0 {
        return Err(error("unclosed alternation"));
    }
    out.push('$');
    Ok(out)
}
