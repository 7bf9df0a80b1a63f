//! Formatting helpers for S-expressions.
//!
//! Used for nodes that are built in memory and spliced into an existing file.
//! The layout follows KiCad's own writer: tab indentation, one child list per
//! line, with `xy` runs and a few short-form tokens kept on a single line.

use crate::{ParseError, Sexpr, SexprKind};

/// Tokens whose lists KiCad keeps on one line even when they nest.
const SHORT_FORM_TOKENS: &[&str] = &["font", "stroke", "fill", "offset", "color"];

/// Format a tree in KiCad layout.
///
/// The first line carries no indentation so the caller can place it; every
/// following line is indented relative to `base_depth`. No trailing newline
/// is added.
pub fn format_tree(sexpr: &Sexpr, base_depth: usize) -> String {
    let mut out = String::new();
    write_node(sexpr, base_depth, &mut out);
    out
}

/// Re-layout raw S-expression text.
pub fn prettify(source: &str) -> Result<String, ParseError> {
    let tree = crate::parse_document(source)?;
    let mut out = format_tree(&tree, 0);
    out.push('\n');
    Ok(out)
}

fn write_node(sexpr: &Sexpr, depth: usize, out: &mut String) {
    let Some(items) = sexpr.as_list() else {
        write_atom(sexpr, out);
        return;
    };

    let single_line = items.iter().all(|item| !item.is_list())
        || sexpr
            .tag()
            .is_some_and(|tag| SHORT_FORM_TOKENS.contains(&tag));
    if single_line {
        write_compact(sexpr, out);
        return;
    }

    out.push('(');
    let head_len = items.iter().take_while(|item| !item.is_list()).count();
    for (idx, atom) in items[..head_len].iter().enumerate() {
        if idx > 0 {
            out.push(' ');
        }
        write_atom(atom, out);
    }

    let mut rest = items[head_len..].iter().peekable();
    while let Some(item) = rest.next() {
        out.push('\n');
        push_indent(out, depth + 1);
        write_node(item, depth + 1, out);
        if item.tag() == Some("xy") {
            while let Some(next) = rest.next_if(|next| next.tag() == Some("xy")) {
                out.push(' ');
                write_compact(next, out);
            }
        }
    }
    out.push('\n');
    push_indent(out, depth);
    out.push(')');
}

fn write_compact(sexpr: &Sexpr, out: &mut String) {
    match &sexpr.kind {
        SexprKind::List(items) => {
            out.push('(');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(' ');
                }
                write_compact(item, out);
            }
            out.push(')');
        }
        _ => write_atom(sexpr, out),
    }
}

fn write_atom(sexpr: &Sexpr, out: &mut String) {
    match &sexpr.kind {
        SexprKind::Symbol(s) => out.push_str(s),
        SexprKind::String(s) => out.push_str(&quote_string(s)),
        SexprKind::Int(n) => out.push_str(&n.to_string()),
        SexprKind::F64(f) => out.push_str(&format_number(*f)),
        SexprKind::List(_) => write_compact(sexpr, out),
    }
}

fn push_indent(out: &mut String, depth: usize) {
    out.extend(std::iter::repeat_n('\t', depth));
}

/// Format a coordinate the way KiCad writes schematic numbers: at most four
/// decimals, trailing zeros trimmed, no negative zero.
pub fn format_number(value: f64) -> String {
    let s = trim_float(format!("{value:.4}"));
    if s == "-0" { "0".to_string() } else { s }
}

fn trim_float(mut s: String) -> String {
    if !s.contains('.') {
        return s;
    }

    while let Some(stripped) = s.strip_suffix('0') {
        s = stripped.to_string();
    }
    if let Some(stripped) = s.strip_suffix('.') {
        s = stripped.to_string();
    }

    if s.is_empty() { "0".to_string() } else { s }
}

/// Quote a string value, escaping special characters.
pub fn quote_string(value: &str) -> String {
    let escaped = escape_string(value);
    let mut quoted = String::with_capacity(escaped.len() + 2);
    quoted.push('"');
    quoted.push_str(&escaped);
    quoted.push('"');
    quoted
}

pub fn escape_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '"' => result.push_str("\\\""),
            '\\' => result.push_str("\\\\"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            _ => result.push(ch),
        }
    }
    result
}

/// Inverse of [`escape_string`] for the character following a backslash.
pub(crate) fn unescape_char(ch: char) -> char {
    match ch {
        'n' => '\n',
        'r' => '\r',
        't' => '\t',
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::{format_number, format_tree, prettify, quote_string};
    use crate::{Sexpr, parse};

    #[test]
    fn prettify_basic_schematic() {
        let input = "(kicad_sch (version 20231120) (generator eeschema) (paper \"A4\"))";
        let expected =
            "(kicad_sch\n\t(version 20231120)\n\t(generator eeschema)\n\t(paper \"A4\")\n)\n";

        assert_eq!(prettify(input).unwrap(), expected);
    }

    #[test]
    fn prettify_xy_runs_share_a_line() {
        let input = "(wire (pts (xy 1 2) (xy 3 4)) (uuid \"a\"))";
        let expected = "(wire\n\t(pts\n\t\t(xy 1 2) (xy 3 4)\n\t)\n\t(uuid \"a\")\n)\n";

        assert_eq!(prettify(input).unwrap(), expected);
    }

    #[test]
    fn short_form_tokens_stay_compact() {
        let input = "(effects (font (size 1.27 1.27)) (justify left))";
        let expected = "(effects\n\t(font (size 1.27 1.27))\n\t(justify left)\n)\n";

        assert_eq!(prettify(input).unwrap(), expected);
    }

    #[test]
    fn format_tree_indents_relative_to_base_depth() {
        let sexpr = parse("(label \"VCC\" (at 10 20 0) (uuid \"u\"))").unwrap();
        let out = format_tree(&sexpr, 1);
        assert_eq!(out, "(label \"VCC\"\n\t\t(at 10 20 0)\n\t\t(uuid \"u\")\n\t)");
    }

    #[test]
    fn quoted_strings_survive_reparse() {
        let value = "say \"hi\"\\\n";
        let quoted = quote_string(value);
        assert_eq!(parse(&quoted).unwrap().as_str(), Some(value));

        let node = Sexpr::list(vec![Sexpr::symbol("property"), Sexpr::string(value)]);
        let reparsed = parse(&format_tree(&node, 0)).unwrap();
        assert_eq!(reparsed, node);
    }

    #[test]
    fn numbers_are_trimmed() {
        assert_eq!(format_number(2.54), "2.54");
        assert_eq!(format_number(100.0), "100");
        assert_eq!(format_number(-0.00001), "0");
        assert_eq!(format_number(1.0 / 3.0), "0.3333");
        assert_eq!(format_number(-12.7), "-12.7");
    }
}
