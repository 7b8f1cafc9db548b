//! Splitting of `${...}` templates into literal text and expression spans.

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Segment<'a> {
    Text(&'a str),
    Expr(&'a str),
}

/// Finds the `}` closing a span whose body starts at `from`, skipping braces
/// nested in the expression and anything inside quotes.
fn find_closing(template: &str, from: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (offset, c) in template[from..].char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' | '`' => quote = Some(c),
            '{' => depth += 1,
            '}' if depth == 0 => return Some(from + offset),
            '}' => depth -= 1,
            _ => {}
        }
    }
    None
}

/// An unterminated `${` is kept as literal text.
pub(crate) fn split(template: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut cursor = 0;
    while let Some(offset) = template[cursor..].find("${") {
        let start = cursor + offset;
        let Some(end) = find_closing(template, start + 2) else {
            break;
        };
        if start > cursor {
            segments.push(Segment::Text(&template[cursor..start]));
        }
        segments.push(Segment::Expr(&template[start + 2..end]));
        cursor = end + 1;
    }
    if cursor < template.len() {
        segments.push(Segment::Text(&template[cursor..]));
    }
    segments
}

/// Returns the body when the whole template is one `${...}` span.
pub(crate) fn single_span(template: &str) -> Option<&str> {
    match split(template.trim()).as_slice() {
        [Segment::Expr(body)] => Some(*body),
        _ => None,
    }
}
