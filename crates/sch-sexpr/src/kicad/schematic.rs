//! KiCad schematic (`.kicad_sch`) helpers.
//!
//! Unlike the plain property helpers these return borrowed nodes and spans,
//! because schematic edits are applied as patches against the original text.

use crate::{Sexpr, Span, number_as_f64};

use super::props::{child_list, uuid_prop};

/// One `(property "NAME" "VALUE" ...)` entry of a symbol or sheet.
#[derive(Debug, Clone)]
pub struct SchProperty<'a> {
    pub name: &'a str,
    pub value: &'a str,
    /// Span of the quoted value atom
    pub value_span: Span,
    /// The whole property list
    pub node: &'a Sexpr,
}

/// One `(path "/..." (reference "R1") (unit 1))` entry under `(instances (project ..))`.
#[derive(Debug, Clone)]
pub struct InstanceRef<'a> {
    pub project: &'a str,
    pub path: &'a str,
    pub reference: Option<&'a str>,
    pub reference_span: Option<Span>,
    pub unit: Option<i64>,
}

/// A `(pin "NAME" shape (at x y angle) ... (uuid ..))` child of a sheet.
#[derive(Debug, Clone)]
pub struct SheetPinNode<'a> {
    pub name: &'a str,
    pub shape: &'a str,
    pub at: (f64, f64, f64),
    pub uuid: Option<String>,
    pub node: &'a Sexpr,
}

/// Extract placement `(at x y [rot])`; a missing rotation reads as 0.
pub fn schematic_at(items: &[Sexpr]) -> Option<(f64, f64, f64)> {
    let at = child_list(items, "at")?;
    let x = number_as_f64(at.get(1)?)?;
    let y = number_as_f64(at.get(2)?)?;
    let rot = at.get(3).and_then(number_as_f64).unwrap_or(0.0);
    Some((x, y, rot))
}

/// Extract `(size w h)` of a sheet symbol.
pub fn sheet_size(items: &[Sexpr]) -> Option<(f64, f64)> {
    let size = child_list(items, "size")?;
    Some((number_as_f64(size.get(1)?)?, number_as_f64(size.get(2)?)?))
}

/// `(mirror x)` / `(mirror y)` of a placed symbol.
pub fn schematic_mirror(items: &[Sexpr]) -> Option<&str> {
    child_list(items, "mirror")?.get(1)?.as_sym()
}

/// Extract all `(property "NAME" "VALUE" ...)` entries in document order.
pub fn schematic_properties(items: &[Sexpr]) -> Vec<SchProperty<'_>> {
    let mut out = Vec::new();
    for node in items.iter().skip(1) {
        if node.tag() != Some("property") {
            continue;
        }
        let Some(list) = node.as_list() else {
            continue;
        };
        let Some(name) = list.get(1).and_then(Sexpr::as_str) else {
            continue;
        };
        let Some(value_node) = list.get(2).filter(|v| v.as_str().is_some()) else {
            continue;
        };
        out.push(SchProperty {
            name,
            value: value_node.as_str().unwrap_or_default(),
            value_span: value_node.span,
            node,
        });
    }
    out
}

/// Extract every instance path entry of a placed symbol.
pub fn schematic_instance_refs(items: &[Sexpr]) -> Vec<InstanceRef<'_>> {
    let Some(instances) = child_list(items, "instances") else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for project in instances.iter().skip(1) {
        if project.tag() != Some("project") {
            continue;
        }
        let Some(project_items) = project.as_list() else {
            continue;
        };
        let project_name = project_items
            .get(1)
            .and_then(Sexpr::as_str)
            .unwrap_or_default();
        for path in project_items.iter().skip(2) {
            if path.tag() != Some("path") {
                continue;
            }
            let Some(path_items) = path.as_list() else {
                continue;
            };
            let Some(path_value) = path_items.get(1).and_then(Sexpr::as_str) else {
                continue;
            };
            let reference_node = child_list(path_items, "reference").and_then(|r| r.get(1));
            out.push(InstanceRef {
                project: project_name,
                path: path_value,
                reference: reference_node.and_then(Sexpr::as_str),
                reference_span: reference_node.map(|n| n.span),
                unit: child_list(path_items, "unit")
                    .and_then(|u| u.get(1))
                    .and_then(Sexpr::as_int),
            });
        }
    }
    out
}

/// Extract `(pin "<num>" (uuid "..."))` entries of a placed symbol, in order.
pub fn schematic_pins(items: &[Sexpr]) -> Vec<(String, Option<String>)> {
    items
        .iter()
        .skip(1)
        .filter(|node| node.tag() == Some("pin"))
        .filter_map(|node| {
            let list = node.as_list()?;
            let number = list.get(1)?.as_str()?;
            Some((number.to_string(), uuid_prop(list, "uuid")))
        })
        .collect()
}

/// Extract the pins of a hierarchical sheet symbol.
pub fn sheet_pins(items: &[Sexpr]) -> Vec<SheetPinNode<'_>> {
    let mut out = Vec::new();
    for node in items.iter().skip(1) {
        if node.tag() != Some("pin") {
            continue;
        }
        let Some(list) = node.as_list() else {
            continue;
        };
        let Some(name) = list.get(1).and_then(Sexpr::as_str) else {
            continue;
        };
        let shape = list.get(2).and_then(Sexpr::as_sym).unwrap_or("passive");
        let Some(at) = schematic_at(list) else {
            continue;
        };
        out.push(SheetPinNode {
            name,
            shape,
            at,
            uuid: uuid_prop(list, "uuid"),
            node,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;

    const SYMBOL: &str = r#"(symbol
		(lib_id "Device:R")
		(at 100 50 90)
		(mirror y)
		(unit 1)
		(uuid "5b9d2a4e-0000-4000-8000-000000000001")
		(property "Reference" "R1"
			(at 102 48 0)
		)
		(property "Value" "10k"
			(at 102 52 0)
		)
		(pin "1"
			(uuid "5b9d2a4e-0000-4000-8000-0000000000a1")
		)
		(pin "2"
			(uuid "5b9d2a4e-0000-4000-8000-0000000000a2")
		)
		(instances
			(project "demo"
				(path "/0f0e0d0c-0000-4000-8000-000000000000"
					(reference "R1")
					(unit 1)
				)
			)
		)
	)"#;

    #[test]
    fn symbol_fields() {
        let sexpr = parse(SYMBOL).unwrap();
        let items = sexpr.as_list().unwrap();

        assert_eq!(schematic_at(items), Some((100.0, 50.0, 90.0)));
        assert_eq!(schematic_mirror(items), Some("y"));

        let props = schematic_properties(items);
        assert_eq!(props.len(), 2);
        assert_eq!(props[1].name, "Value");
        assert_eq!(props[1].value, "10k");
        assert_eq!(props[1].value_span.slice(SYMBOL), "\"10k\"");

        let pins = schematic_pins(items);
        assert_eq!(pins.len(), 2);
        assert_eq!(pins[0].0, "1");

        let instances = schematic_instance_refs(items);
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].project, "demo");
        assert_eq!(instances[0].reference, Some("R1"));
        assert_eq!(instances[0].unit, Some(1));
        assert_eq!(
            instances[0].reference_span.map(|s| s.slice(SYMBOL)),
            Some("\"R1\"")
        );
    }

    #[test]
    fn sheet_fields() {
        let input = r#"(sheet (at 50 40) (size 20 10) (uuid "s1")
            (property "Sheetname" "power")
            (property "Sheetfile" "power.kicad_sch")
            (pin "VIN" input (at 50 42.54 180) (uuid "p1"))
            (pin "GND" passive (at 70 42.54 0)))"#;
        let sexpr = parse(input).unwrap();
        let items = sexpr.as_list().unwrap();

        assert_eq!(schematic_at(items), Some((50.0, 40.0, 0.0)));
        assert_eq!(sheet_size(items), Some((20.0, 10.0)));

        let pins = sheet_pins(items);
        assert_eq!(pins.len(), 2);
        assert_eq!(pins[0].name, "VIN");
        assert_eq!(pins[0].shape, "input");
        assert_eq!(pins[0].at, (50.0, 42.54, 180.0));
        assert_eq!(pins[0].uuid.as_deref(), Some("p1"));
        assert_eq!(pins[1].uuid, None);
    }
}
