use std::collections::BTreeMap;
use std::path::PathBuf;

use log::{debug, trace};
use sch_sexpr::kicad::{
    int_prop, schematic_at, schematic_instance_refs, schematic_mirror, schematic_pins,
    schematic_properties, sheet_pins, sheet_size, string_prop, sym_prop, uuid_prop,
};
use sch_sexpr::{PatchSet, Sexpr, Span};

use super::{
    Body, Element, ElementKind, LabelData, LabelKind, PinShape, Schematic, SheetData,
    SheetPinData, SymbolData,
};
use crate::error::{Result, SyncError};
use crate::geometry::{Mirror, Point};

impl Schematic {
    /// Parse a document. Elements the model does not know are kept opaque.
    pub fn parse(file: impl Into<PathBuf>, source: String) -> Result<Schematic> {
        let file = file.into();
        let display = file.display().to_string();
        let root = sch_sexpr::parse_document(&source).map_err(|e| SyncError::parse(&display, e))?;

        let items = root
            .as_list()
            .filter(|_| root.tag() == Some("kicad_sch"))
            .ok_or_else(|| SyncError::parse(&display, "top-level node is not (kicad_sch ...)"))?;

        let header = Span::new(0, items[0].span.end);
        let mut prev_end = header.end;
        let mut elements = Vec::with_capacity(items.len().saturating_sub(1));
        for child in &items[1..] {
            elements.push(Element {
                kind: classify(child),
                node: child.clone(),
                body: Body::Parsed {
                    span: child.span,
                    trivia: Span::new(prev_end, child.span.start),
                },
                patches: PatchSet::new(),
                appended: Vec::new(),
                removed: false,
            });
            prev_end = child.span.end;
        }

        let uuid = uuid_prop(items, "uuid").unwrap_or_default();
        debug!("Parsed {display}: {} top-level elements", elements.len());

        Ok(Schematic {
            file,
            header,
            trailer: Span::new(prev_end, source.len()),
            source,
            elements,
            uuid,
            created: false,
        })
    }
}

/// Decide what a top-level node is. Nodes that lack fields the model needs
/// fall back to opaque rather than failing the parse.
pub(crate) fn classify(node: &Sexpr) -> ElementKind {
    let tag = node.tag();
    let parsed = match tag {
        Some("symbol") => parse_symbol(node).map(ElementKind::Symbol),
        Some("label") => parse_label(node, LabelKind::Local).map(ElementKind::Label),
        Some("global_label") => parse_label(node, LabelKind::Global).map(ElementKind::Label),
        Some("hierarchical_label") => {
            parse_label(node, LabelKind::Hierarchical).map(ElementKind::Label)
        }
        Some("sheet") => parse_sheet(node).map(ElementKind::Sheet),
        Some("junction") => node
            .as_list()
            .and_then(schematic_at)
            .map(|(x, y, _)| ElementKind::Junction {
                at: Point::new(x, y),
            }),
        Some("text") => {
            let items = node.as_list().unwrap_or_default();
            let text = items.get(1).and_then(Sexpr::as_str);
            let at = schematic_at(items);
            text.zip(at).map(|(text, (x, y, _))| ElementKind::Text {
                text: text.to_string(),
                at: Point::new(x, y),
            })
        }
        Some("lib_symbols") => Some(ElementKind::LibSymbols {
            names: node
                .children_tagged("symbol")
                .filter_map(|s| s.as_list()?.get(1)?.as_str().map(str::to_string))
                .collect(),
        }),
        _ => None,
    };

    parsed.unwrap_or_else(|| {
        if matches!(tag, Some("symbol" | "label" | "sheet")) {
            trace!("Treating incomplete {tag:?} element as opaque");
        }
        ElementKind::Opaque {
            tag: tag.map(str::to_string),
        }
    })
}

fn parse_symbol(node: &Sexpr) -> Option<SymbolData> {
    let items = node.as_list()?;
    let lib_id = string_prop(items, "lib_id")?;
    let (x, y, rotation) = schematic_at(items)?;

    let mut reference = None;
    let mut value = String::new();
    let mut footprint = String::new();
    let mut properties = BTreeMap::new();
    for prop in schematic_properties(items) {
        match prop.name {
            "Reference" => reference = Some(prop.value.to_string()),
            "Value" => value = prop.value.to_string(),
            "Footprint" => footprint = prop.value.to_string(),
            name => {
                properties.insert(name.to_string(), prop.value.to_string());
            }
        }
    }
    let reference = reference.or_else(|| {
        schematic_instance_refs(items)
            .into_iter()
            .find_map(|r| r.reference.map(str::to_string))
    })?;

    Some(SymbolData {
        lib_id,
        uuid: uuid_prop(items, "uuid"),
        reference,
        value,
        footprint,
        properties,
        at: Point::new(x, y),
        rotation,
        mirror: Mirror::from_token(schematic_mirror(items)),
        unit: int_prop(items, "unit").unwrap_or(1),
        pins: schematic_pins(items),
    })
}

fn parse_label(node: &Sexpr, kind: LabelKind) -> Option<LabelData> {
    let items = node.as_list()?;
    let text = items.get(1)?.as_str()?;
    let (x, y, rotation) = schematic_at(items)?;
    Some(LabelData {
        kind,
        text: text.to_string(),
        at: Point::new(x, y),
        rotation,
        shape: sym_prop(items, "shape").and_then(|s| PinShape::from_token(&s)),
        uuid: uuid_prop(items, "uuid"),
    })
}

fn parse_sheet(node: &Sexpr) -> Option<SheetData> {
    let items = node.as_list()?;
    let (x, y, _) = schematic_at(items)?;
    let size = sheet_size(items)?;

    let mut name = None;
    let mut file = None;
    for prop in schematic_properties(items) {
        match prop.name {
            "Sheetname" | "Sheet name" => name = Some(prop.value.to_string()),
            "Sheetfile" | "Sheet file" => file = Some(prop.value.to_string()),
            _ => {}
        }
    }

    let pins = sheet_pins(items)
        .into_iter()
        .map(|pin| SheetPinData {
            name: pin.name.to_string(),
            shape: PinShape::from_token(pin.shape).unwrap_or(PinShape::Passive),
            at: Point::new(pin.at.0, pin.at.1),
            rotation: pin.at.2,
            uuid: pin.uuid,
        })
        .collect();

    Some(SheetData {
        name: name?,
        file: file?,
        at: Point::new(x, y),
        size,
        uuid: uuid_prop(items, "uuid"),
        pins,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_symbol() {
        let node = sch_sexpr::parse(
            r#"(symbol (lib_id "Device:R") (at 100 50 90) (mirror x) (unit 1)
                (uuid "u1")
                (property "Reference" "R1" (at 0 0 0))
                (property "Value" "10k" (at 0 0 0))
                (property "Footprint" "Resistor_SMD:R_0402" (at 0 0 0))
                (property "MPN" "RC0402" (at 0 0 0))
                (pin "1" (uuid "p1")))"#,
        )
        .unwrap();
        let ElementKind::Symbol(symbol) = classify(&node) else {
            panic!("expected a symbol");
        };
        assert_eq!(symbol.reference, "R1");
        assert_eq!(symbol.value, "10k");
        assert_eq!(symbol.footprint, "Resistor_SMD:R_0402");
        assert_eq!(symbol.properties.get("MPN").map(String::as_str), Some("RC0402"));
        assert_eq!(symbol.rotation, 90.0);
        assert_eq!(symbol.mirror, Mirror::X);
        assert_eq!(symbol.uuid.as_deref(), Some("u1"));
        assert!(!symbol.is_power());
    }

    #[test]
    fn classify_power_and_labels() {
        let power = sch_sexpr::parse(
            r##"(symbol (lib_id "power:GND") (at 10 20 0) (property "Reference" "#PWR01") (property "Value" "GND"))"##,
        )
        .unwrap();
        assert!(matches!(classify(&power), ElementKind::Symbol(s) if s.is_power()));

        let label = sch_sexpr::parse(
            r#"(hierarchical_label "VIN" (shape input) (at 1 2 180) (uuid "l1"))"#,
        )
        .unwrap();
        let ElementKind::Label(label) = classify(&label) else {
            panic!("expected a label");
        };
        assert_eq!(label.kind, LabelKind::Hierarchical);
        assert_eq!(label.shape, Some(PinShape::Input));
        assert_eq!(label.rotation, 180.0);
    }

    #[test]
    fn incomplete_nodes_fall_back_to_opaque() {
        let node = sch_sexpr::parse(r#"(symbol (at 1 2 0))"#).unwrap();
        assert_eq!(
            classify(&node),
            ElementKind::Opaque {
                tag: Some("symbol".to_string())
            }
        );
    }

    #[test]
    fn rejects_non_schematic_root() {
        let err = Schematic::parse("x.kicad_sch", "(kicad_pcb (version 1))".to_string());
        assert!(matches!(err, Err(SyncError::Parse { .. })));
        let err = Schematic::parse("x.kicad_sch", "(kicad_sch (version 1)".to_string());
        assert!(matches!(err, Err(SyncError::Parse { .. })));
    }
}
