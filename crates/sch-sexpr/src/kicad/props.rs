//! Common KiCad-ish S-expression query helpers.
//!
//! KiCad schematics are full of small list nodes that behave like key/value
//! properties such as `(tag "value")` or `(tag 123)`.

use crate::Sexpr;
use crate::find_child_list;

/// Find a direct child list `(tag ...)` within `list`.
pub fn child_list<'a>(list: &'a [Sexpr], tag: &str) -> Option<&'a [Sexpr]> {
    find_child_list(list, tag)
}

/// Find a string property `(tag "VALUE")` within `list`.
pub fn string_prop(list: &[Sexpr], tag: &str) -> Option<String> {
    string_prop_node(list, tag)?.as_str().map(str::to_string)
}

/// The value atom of `(tag "VALUE")`, so callers can patch it in place.
pub fn string_prop_node<'a>(list: &'a [Sexpr], tag: &str) -> Option<&'a Sexpr> {
    child_list(list, tag)?
        .get(1)
        .filter(|node| node.as_str().is_some())
}

/// Find a symbol atom property `(tag VALUE)` within `list`.
pub fn sym_prop(list: &[Sexpr], tag: &str) -> Option<String> {
    child_list(list, tag)?.get(1)?.as_sym().map(str::to_string)
}

/// `(uuid "...")`; older files write the uuid unquoted.
pub fn uuid_prop(list: &[Sexpr], tag: &str) -> Option<String> {
    child_list(list, tag)?.get(1)?.as_atom().map(str::to_string)
}

/// Find an integer property `(tag 123)` within `list`.
pub fn int_prop(list: &[Sexpr], tag: &str) -> Option<i64> {
    child_list(list, tag)?.get(1)?.as_int()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;

    #[test]
    fn props_from_symbol() {
        let input = r#"(symbol (lib_id "Device:R") (unit 1) (in_bom yes) (uuid 1234-abcd))"#;
        let sexpr = parse(input).unwrap();
        let items = sexpr.as_list().unwrap();

        assert_eq!(string_prop(items, "lib_id").as_deref(), Some("Device:R"));
        assert_eq!(int_prop(items, "unit"), Some(1));
        assert_eq!(uuid_prop(items, "uuid").as_deref(), Some("1234-abcd"));
        assert_eq!(string_prop(items, "uuid"), None);

        let node = string_prop_node(items, "lib_id").unwrap();
        assert_eq!(node.span.slice(input), "\"Device:R\"");
    }
}
