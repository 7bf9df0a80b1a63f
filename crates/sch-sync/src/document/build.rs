//! Constructors for elements the synchronizer adds to a document.
//!
//! Node layout follows what KiCad 8 writes, so a file edited by the tool and
//! then re-saved by the editor produces a small diff.

use std::collections::BTreeMap;

use sch_sexpr::{ListBuilder, Sexpr, formatter, kv};

use super::{LabelKind, PinShape};
use crate::geometry::{Mirror, Point};

/// File format version written into new documents.
pub const FORMAT_VERSION: i64 = 20231120;

const TEXT_SIZE: f64 = 1.27;

pub fn at(p: Point, rotation: Option<f64>) -> Sexpr {
    ListBuilder::node("at")
        .push(p.x)
        .push(p.y)
        .push_if(rotation.is_some(), rotation.unwrap_or_default())
        .build()
}

pub fn uuid(value: &str) -> Sexpr {
    kv("uuid", Sexpr::string(value))
}

fn font() -> Sexpr {
    ListBuilder::node("font")
        .push(ListBuilder::node("size").push(TEXT_SIZE).push(TEXT_SIZE).build())
        .build()
}

pub fn effects(hide: bool, justify: &[&str]) -> Sexpr {
    ListBuilder::node("effects")
        .push(font())
        .push_if(
            !justify.is_empty(),
            ListBuilder::node("justify").extend(justify.iter().copied()).build(),
        )
        .push_if(hide, kv("hide", true))
        .build()
}

pub fn property(name: &str, value: &str, position: Point, hide: bool) -> Sexpr {
    ListBuilder::node("property")
        .push(Sexpr::string(name))
        .push(Sexpr::string(value))
        .push(at(position, Some(0.0)))
        .push(effects(hide, &[]))
        .build()
}

fn instances(project: &str, path: &str, entries: Vec<Sexpr>) -> Sexpr {
    let path = ListBuilder::node("path")
        .push(Sexpr::string(path))
        .extend(entries)
        .build();
    ListBuilder::node("instances")
        .push(
            ListBuilder::node("project")
                .push(Sexpr::string(project))
                .push(path)
                .build(),
        )
        .build()
}

/// Everything needed to place a new symbol.
#[derive(Debug, Clone)]
pub struct NewSymbol<'a> {
    pub lib_id: &'a str,
    pub at: Point,
    pub rotation: f64,
    pub mirror: Mirror,
    pub uuid: &'a str,
    pub reference: &'a str,
    pub value: &'a str,
    pub footprint: &'a str,
    pub properties: &'a BTreeMap<String, String>,
    /// Pin numbers with freshly generated pin uuids
    pub pins: &'a [(String, String)],
    pub project: &'a str,
    /// `/root-uuid/sheet-uuid/...` of the sheet the symbol lives in
    pub instance_path: &'a str,
    pub power: bool,
}

pub fn symbol(new: &NewSymbol<'_>) -> Sexpr {
    let origin = new.at;
    let (reference_at, value_at) = if new.power {
        (
            Point::new(origin.x, origin.y + 6.35),
            Point::new(origin.x, origin.y + 3.81),
        )
    } else {
        (
            Point::new(origin.x + 2.54, origin.y - 1.27),
            Point::new(origin.x + 2.54, origin.y + 1.27),
        )
    };

    let mirror = match new.mirror {
        Mirror::None => None,
        Mirror::X => Some("x"),
        Mirror::Y => Some("y"),
    };

    ListBuilder::node("symbol")
        .push(kv("lib_id", Sexpr::string(new.lib_id)))
        .push(at(origin, Some(new.rotation)))
        .push_if(mirror.is_some(), kv("mirror", mirror.unwrap_or_default()))
        .push(kv("unit", 1i64))
        .push(kv("exclude_from_sim", false))
        .push(kv("in_bom", !new.power))
        .push(kv("on_board", !new.power))
        .push(kv("dnp", false))
        .push(uuid(new.uuid))
        .push(property("Reference", new.reference, reference_at, new.power))
        .push(property("Value", new.value, value_at, false))
        .push(property("Footprint", new.footprint, origin, true))
        .extend(
            new.properties
                .iter()
                .map(|(name, value)| property(name, value, origin, true)),
        )
        .extend(new.pins.iter().map(|(number, pin_uuid)| {
            ListBuilder::node("pin")
                .push(Sexpr::string(number.as_str()))
                .push(uuid(pin_uuid))
                .build()
        }))
        .push(instances(
            new.project,
            new.instance_path,
            vec![
                kv("reference", Sexpr::string(new.reference)),
                kv("unit", 1i64),
            ],
        ))
        .build()
}

/// A local, global or hierarchical label.
pub fn label(
    kind: LabelKind,
    text: &str,
    position: Point,
    rotation: f64,
    shape: Option<PinShape>,
    id: &str,
) -> Sexpr {
    let shape = match kind {
        LabelKind::Local | LabelKind::Power => None,
        LabelKind::Global | LabelKind::Hierarchical => {
            Some(shape.unwrap_or(PinShape::Bidirectional))
        }
    };
    let justify: &[&str] = match kind {
        LabelKind::Local => &["left", "bottom"],
        _ => &["left"],
    };

    ListBuilder::node(kind.tag())
        .push(Sexpr::string(text))
        .push_if(
            shape.is_some(),
            kv("shape", shape.map(PinShape::as_str).unwrap_or_default()),
        )
        .push(at(position, Some(rotation)))
        .push_if(kind == LabelKind::Global, kv("fields_autoplaced", true))
        .push(effects(false, justify))
        .push(uuid(id))
        .push_if(
            kind == LabelKind::Global,
            property("Intersheetrefs", "${INTERSHEET_REFS}", position, true),
        )
        .build()
}

/// A hierarchical sheet symbol without pins.
#[allow(clippy::too_many_arguments)]
pub fn sheet(
    name: &str,
    file: &str,
    origin: Point,
    size: (f64, f64),
    id: &str,
    project: &str,
    instance_path: &str,
    page: usize,
) -> Sexpr {
    ListBuilder::node("sheet")
        .push(at(origin, None))
        .push(ListBuilder::node("size").push(size.0).push(size.1).build())
        .push(kv("exclude_from_sim", false))
        .push(kv("in_bom", true))
        .push(kv("on_board", true))
        .push(kv("dnp", false))
        .push(kv("fields_autoplaced", true))
        .push(
            ListBuilder::node("stroke")
                .push(kv("width", 0.1524))
                .push(kv("type", "solid"))
                .build(),
        )
        .push(
            ListBuilder::node("fill")
                .push(
                    ListBuilder::node("color")
                        .extend([0i64, 0, 0, 0])
                        .build(),
                )
                .build(),
        )
        .push(uuid(id))
        .push(
            ListBuilder::node("property")
                .push(Sexpr::string("Sheetname"))
                .push(Sexpr::string(name))
                .push(at(Point::new(origin.x, origin.y - 0.7116), Some(0.0)))
                .push(effects(false, &["left", "bottom"]))
                .build(),
        )
        .push(
            ListBuilder::node("property")
                .push(Sexpr::string("Sheetfile"))
                .push(Sexpr::string(file))
                .push(at(Point::new(origin.x, origin.y + size.1 + 0.5884), Some(0.0)))
                .push(effects(false, &["left", "top"]))
                .build(),
        )
        .push(instances(
            project,
            instance_path,
            vec![kv("page", Sexpr::string(page.to_string()))],
        ))
        .build()
}

pub fn sheet_pin(name: &str, shape: PinShape, position: Point, rotation: f64, id: &str) -> Sexpr {
    let justify = if rotation == 180.0 { "left" } else { "right" };
    ListBuilder::node("pin")
        .push(Sexpr::string(name))
        .push(shape.as_str())
        .push(at(position, Some(rotation)))
        .push(uuid(id))
        .push(effects(false, &[justify]))
        .build()
}

/// Minimal power symbol definition for `power:NAME` when no library has one.
pub fn power_symbol_definition(lib_id: &str, net: &str) -> Sexpr {
    let unit = |suffix: &str| format!("{net}_{suffix}");
    ListBuilder::node("symbol")
        .push(Sexpr::string(lib_id))
        .push(Sexpr::list(vec![Sexpr::symbol("power")]))
        .push(
            ListBuilder::node("pin_names")
                .push(kv("offset", 0i64))
                .build(),
        )
        .push(kv("exclude_from_sim", false))
        .push(kv("in_bom", true))
        .push(kv("on_board", true))
        .push(property("Reference", "#PWR", Point::new(0.0, -6.35), true))
        .push(property("Value", net, Point::new(0.0, -3.81), false))
        .push(
            ListBuilder::node("symbol")
                .push(Sexpr::string(unit("0_1")))
                .push(
                    ListBuilder::node("polyline")
                        .push(
                            ListBuilder::node("pts")
                                .push(ListBuilder::node("xy").push(0.0).push(0.0).build())
                                .push(ListBuilder::node("xy").push(0.0).push(1.27).build())
                                .build(),
                        )
                        .push(
                            ListBuilder::node("stroke")
                                .push(kv("width", 0i64))
                                .push(kv("type", "default"))
                                .build(),
                        )
                        .push(ListBuilder::node("fill").push(kv("type", "none")).build())
                        .build(),
                )
                .build(),
        )
        .push(
            ListBuilder::node("symbol")
                .push(Sexpr::string(unit("1_1")))
                .push(
                    ListBuilder::node("pin")
                        .push("power_in")
                        .push("line")
                        .push(at(Point::new(0.0, 0.0), Some(0.0)))
                        .push(kv("length", 0i64))
                        .push(kv("hide", true))
                        .push(
                            ListBuilder::node("name")
                                .push(Sexpr::string("~"))
                                .push(effects(false, &[]))
                                .build(),
                        )
                        .push(
                            ListBuilder::node("number")
                                .push(Sexpr::string("1"))
                                .push(effects(false, &[]))
                                .build(),
                        )
                        .build(),
                )
                .build(),
        )
        .build()
}

/// Text of a new, empty document.
///
/// Root documents carry `(sheet_instances ...)`; KiCad 8 records child page
/// numbers on the sheet symbols instead.
pub fn empty_document(uuid_value: &str, generator: &str, paper: &str, root: bool) -> String {
    let doc = ListBuilder::node("kicad_sch")
        .push(kv("version", FORMAT_VERSION))
        .push(kv("generator", Sexpr::string(generator)))
        .push(kv("generator_version", Sexpr::string(env!("CARGO_PKG_VERSION"))))
        .push(uuid(uuid_value))
        .push(kv("paper", Sexpr::string(paper)))
        .push(Sexpr::list(vec![Sexpr::symbol("lib_symbols")]))
        .push_if(
            root,
            ListBuilder::node("sheet_instances")
                .push(
                    ListBuilder::node("path")
                        .push(Sexpr::string("/"))
                        .push(kv("page", Sexpr::string("1")))
                        .build(),
                )
                .build(),
        )
        .build();
    let mut text = formatter::format_tree(&doc, 0);
    text.push('\n');
    text
}
