//! In-place edits. Each edit records a patch against the element's original
//! text and updates the element's model so later stages see the new state.

use std::path::PathBuf;

use sch_sexpr::formatter::{format_number, format_tree};
use sch_sexpr::kicad::{schematic_instance_refs, schematic_properties, sheet_pins};
use sch_sexpr::{ListBuilder, PatchSet, Sexpr, Span};

use super::parse::classify;
use super::{Body, Element, ElementKind, PinShape, Schematic, SheetPinData, build};
use crate::error::{Result, SyncError};
use crate::geometry::Point;
use crate::ids::ElementId;

/// Children of a top-level element are indented two tabs deep.
const CHILD_INDENT: &str = "\n\t\t";

impl Schematic {
    /// Synthesize a new, empty document.
    pub fn create(
        file: impl Into<PathBuf>,
        uuid: &str,
        generator: &str,
        paper: &str,
        root: bool,
    ) -> Result<Schematic> {
        let text = build::empty_document(uuid, generator, paper, root);
        let mut doc = Schematic::parse(file, text)?;
        doc.created = true;
        Ok(doc)
    }

    fn entity(&self, id: ElementId) -> String {
        format!("{}#{}", self.file.display(), id.index())
    }

    /// Drop an element together with its leading whitespace.
    pub fn remove(&mut self, id: ElementId) {
        self.elements[id.index()].removed = true;
    }

    /// Append a new top-level element.
    pub fn push(&mut self, node: &Sexpr) -> Result<ElementId> {
        let text = format_tree(node, 1);
        let reparsed = sch_sexpr::parse_document(&text)
            .map_err(|e| SyncError::invariant(self.file.display().to_string(), e.to_string()))?;
        self.elements.push(Element {
            kind: classify(&reparsed),
            node: reparsed,
            body: Body::Synthetic { text },
            patches: PatchSet::new(),
            appended: Vec::new(),
            removed: false,
        });
        Ok(ElementId::from_index(self.elements.len() - 1))
    }

    /// Set a symbol property, inserting it (hidden) when missing.
    pub fn set_symbol_property(&mut self, id: ElementId, name: &str, value: &str) -> Result<()> {
        let entity = self.entity(id);
        let Element {
            kind,
            node,
            patches,
            ..
        } = &mut self.elements[id.index()];
        let ElementKind::Symbol(symbol) = kind else {
            return Err(SyncError::invariant(entity, "element is not a symbol"));
        };
        let items = node.as_list().unwrap_or_default();
        let props = schematic_properties(items);

        if let Some(prop) = props.iter().find(|p| p.name == name) {
            patches.replace_string(prop.value_span, value);
        } else {
            let anchor = props
                .last()
                .map(|p| p.node.span.end)
                .or_else(|| last_child_end(node))
                .ok_or_else(|| SyncError::invariant(&entity, "symbol has no children"))?;
            let property = build::property(name, value, symbol.at, true);
            patches.insert(anchor, format!("{CHILD_INDENT}{}", format_tree(&property, 2)));
        }

        match name {
            "Reference" => symbol.reference = value.to_string(),
            "Value" => symbol.value = value.to_string(),
            "Footprint" => symbol.footprint = value.to_string(),
            _ => {
                symbol
                    .properties
                    .insert(name.to_string(), value.to_string());
            }
        }
        Ok(())
    }

    /// Rename a symbol: the `Reference` property and every instance entry.
    pub fn set_reference(&mut self, id: ElementId, reference: &str) -> Result<()> {
        self.set_symbol_property(id, "Reference", reference)?;
        let element = &mut self.elements[id.index()];
        let items = element.node.as_list().unwrap_or_default();
        for instance in schematic_instance_refs(items) {
            if let Some(span) = instance.reference_span {
                element.patches.replace_string(span, reference);
            }
        }
        Ok(())
    }

    pub fn set_lib_id(&mut self, id: ElementId, lib_id: &str) -> Result<()> {
        let entity = self.entity(id);
        let element = &mut self.elements[id.index()];
        let ElementKind::Symbol(symbol) = &mut element.kind else {
            return Err(SyncError::invariant(entity, "element is not a symbol"));
        };
        let span = element
            .node
            .find_list("lib_id")
            .and_then(|l| l.get(1))
            .map(|n| n.span)
            .ok_or_else(|| SyncError::invariant(&entity, "symbol has no lib_id"))?;
        element.patches.replace_string(span, lib_id);
        symbol.lib_id = lib_id.to_string();
        Ok(())
    }

    /// Change a symbol's rotation without moving it.
    pub fn set_rotation(&mut self, id: ElementId, rotation: f64) -> Result<()> {
        let entity = self.entity(id);
        let element = &mut self.elements[id.index()];
        let ElementKind::Symbol(symbol) = &mut element.kind else {
            return Err(SyncError::invariant(entity, "element is not a symbol"));
        };
        let at = element
            .node
            .find_list("at")
            .filter(|at| at.len() >= 3)
            .ok_or_else(|| SyncError::invariant(&entity, "symbol has no (at x y)"))?;
        match at.get(3) {
            Some(angle) => element
                .patches
                .replace_raw(angle.span, format_number(rotation)),
            None => element
                .patches
                .insert(at[2].span.end, format!(" {}", format_number(rotation))),
        }
        symbol.rotation = rotation;
        Ok(())
    }

    /// Move a label or symbol origin. Only used for markers that follow a pin.
    pub fn move_element(&mut self, id: ElementId, to: Point) -> Result<()> {
        let entity = self.entity(id);
        let element = &mut self.elements[id.index()];
        let at = element
            .node
            .find_list("at")
            .filter(|at| at.len() >= 3)
            .ok_or_else(|| SyncError::invariant(&entity, "element has no (at x y)"))?;
        element.patches.replace_raw(
            Span::new(at[1].span.start, at[2].span.end),
            format!("{} {}", format_number(to.x), format_number(to.y)),
        );
        match &mut element.kind {
            ElementKind::Label(label) => label.at = to,
            ElementKind::Symbol(symbol) => symbol.at = to,
            _ => return Err(SyncError::invariant(entity, "element cannot be moved")),
        }
        Ok(())
    }

    pub fn set_label_text(&mut self, id: ElementId, text: &str) -> Result<()> {
        let entity = self.entity(id);
        let element = &mut self.elements[id.index()];
        let span = element
            .node
            .as_list()
            .and_then(|items| items.get(1))
            .filter(|n| n.as_str().is_some())
            .map(|n| n.span);
        match (&mut element.kind, span) {
            (ElementKind::Label(label), Some(span)) => {
                element.patches.replace_string(span, text);
                label.text = text.to_string();
                Ok(())
            }
            _ => Err(SyncError::invariant(entity, "element is not a label")),
        }
    }

    pub fn add_sheet_pin(&mut self, id: ElementId, pin: SheetPinData) -> Result<()> {
        let entity = self.entity(id);
        let element = &mut self.elements[id.index()];
        let ElementKind::Sheet(sheet) = &mut element.kind else {
            return Err(SyncError::invariant(entity, "element is not a sheet"));
        };
        if sheet.pin(&pin.name).is_some() {
            return Err(SyncError::invariant(
                format!("{entity} pin {}", pin.name),
                "sheet pin names must be unique",
            ));
        }

        let items = element.node.as_list().unwrap_or_default();
        let anchor = items
            .iter()
            .filter(|n| matches!(n.tag(), Some("pin" | "property" | "uuid")))
            .map(|n| n.span.end)
            .max()
            .or_else(|| last_child_end(&element.node))
            .ok_or_else(|| SyncError::invariant(&entity, "sheet has no children"))?;

        let node = build::sheet_pin(
            &pin.name,
            pin.shape,
            pin.at,
            pin.rotation,
            pin.uuid.as_deref().unwrap_or_default(),
        );
        element
            .patches
            .insert(anchor, format!("{CHILD_INDENT}{}", format_tree(&node, 2)));
        sheet.pins.push(pin);
        Ok(())
    }

    pub fn remove_sheet_pin(&mut self, id: ElementId, name: &str) -> Result<()> {
        let entity = self.entity(id);
        let element = &mut self.elements[id.index()];
        let ElementKind::Sheet(sheet) = &mut element.kind else {
            return Err(SyncError::invariant(entity, "element is not a sheet"));
        };
        let items = element.node.as_list().unwrap_or_default();
        let span = sheet_pins(items)
            .into_iter()
            .find(|p| p.name == name)
            .map(|p| p.node.span)
            .ok_or_else(|| {
                SyncError::invariant(format!("{entity} pin {name}"), "sheet pin not found")
            })?;
        // Take the whitespace in front of the pin with it.
        let start = items
            .iter()
            .map(|n| n.span.end)
            .filter(|end| *end <= span.start)
            .max()
            .unwrap_or(span.start);
        element.patches.delete(Span::new(start, span.end));
        sheet.pins.retain(|p| p.name != name);
        Ok(())
    }

    pub fn set_sheet_pin_shape(&mut self, id: ElementId, name: &str, shape: PinShape) -> Result<()> {
        let entity = self.entity(id);
        let element = &mut self.elements[id.index()];
        let ElementKind::Sheet(sheet) = &mut element.kind else {
            return Err(SyncError::invariant(entity, "element is not a sheet"));
        };
        let items = element.node.as_list().unwrap_or_default();
        let span = sheet_pins(items)
            .into_iter()
            .find(|p| p.name == name)
            .and_then(|p| p.node.as_list()?.get(2).map(|n| n.span))
            .ok_or_else(|| {
                SyncError::invariant(format!("{entity} pin {name}"), "sheet pin not found")
            })?;
        element.patches.replace_raw(span, shape.as_str().to_string());
        if let Some(pin) = sheet.pins.iter_mut().find(|p| p.name == name) {
            pin.shape = shape;
        }
        Ok(())
    }

    pub fn set_sheet_size(&mut self, id: ElementId, size: (f64, f64)) -> Result<()> {
        let entity = self.entity(id);
        let element = &mut self.elements[id.index()];
        let ElementKind::Sheet(sheet) = &mut element.kind else {
            return Err(SyncError::invariant(entity, "element is not a sheet"));
        };
        let dims = element
            .node
            .find_list("size")
            .filter(|s| s.len() >= 3)
            .ok_or_else(|| SyncError::invariant(&entity, "sheet has no (size w h)"))?;
        element.patches.replace_raw(
            Span::new(dims[1].span.start, dims[2].span.end),
            format!("{} {}", format_number(size.0), format_number(size.1)),
        );
        sheet.size = size;
        Ok(())
    }

    pub fn set_sheet_name(&mut self, id: ElementId, name: &str) -> Result<()> {
        let entity = self.entity(id);
        let element = &mut self.elements[id.index()];
        let ElementKind::Sheet(sheet) = &mut element.kind else {
            return Err(SyncError::invariant(entity, "element is not a sheet"));
        };
        let items = element.node.as_list().unwrap_or_default();
        let span = schematic_properties(items)
            .into_iter()
            .find(|p| matches!(p.name, "Sheetname" | "Sheet name"))
            .map(|p| p.value_span)
            .ok_or_else(|| SyncError::invariant(&entity, "sheet has no Sheetname"))?;
        element.patches.replace_string(span, name);
        sheet.name = name.to_string();
        Ok(())
    }

    /// Add a library symbol definition to `(lib_symbols ...)`.
    ///
    /// Returns `false` when a definition with that name is already embedded.
    pub fn embed_lib_symbol(&mut self, def: &Sexpr) -> Result<bool> {
        let name = def
            .as_list()
            .and_then(|items| items.get(1))
            .and_then(Sexpr::as_str)
            .ok_or_else(|| {
                SyncError::invariant(self.file.display().to_string(), "symbol definition has no name")
            })?
            .to_string();
        if self.has_lib_symbol(&name) {
            return Ok(false);
        }

        let Some(index) = self
            .elements
            .iter()
            .position(|e| !e.removed && matches!(e.kind, ElementKind::LibSymbols { .. }))
        else {
            let node = ListBuilder::node("lib_symbols").push(def.clone()).build();
            self.push(&node)?;
            return Ok(true);
        };

        let element = &mut self.elements[index];
        let text = match &element.body {
            Body::Parsed { .. } => self.source.as_str(),
            Body::Synthetic { text } => text.as_str(),
        };
        let items = element.node.as_list().unwrap_or_default();
        let (tail_start, tail) = match items.last() {
            Some(last) if items.len() > 1 => {
                let tail = Span::new(last.span.end, element.node.span.end);
                (tail.start, tail.slice(text).to_string())
            }
            // `(lib_symbols)` with nothing in it yet
            _ => (items[0].span.end, "\n\t)".to_string()),
        };

        element.appended.push(def.clone());
        let mut replacement: String = element
            .appended
            .iter()
            .map(|def| format!("{CHILD_INDENT}{}", format_tree(def, 2)))
            .collect();
        replacement.push_str(&tail);
        element
            .patches
            .replace_raw(Span::new(tail_start, element.node.span.end), replacement);

        if let ElementKind::LibSymbols { names } = &mut element.kind {
            names.push(name);
        }
        Ok(true)
    }
}

fn last_child_end(node: &Sexpr) -> Option<usize> {
    node.as_list()?.last().map(|n| n.span.end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::LabelKind;
    use crate::document::tests::MINIMAL;

    const SYMBOL_DOC: &str = r#"(kicad_sch
	(version 20231120)
	(generator "eeschema")
	(uuid "0f0e0d0c-0000-4000-8000-000000000000")
	(paper "A4")
	(lib_symbols
		(symbol "Device:R"
			(property "Reference" "R")
		)
	)
	(symbol
		(lib_id "Device:R")
		(at 100 50 0)
		(unit 1)
		(uuid "5b9d2a4e-0000-4000-8000-000000000001")
		(property "Reference" "R1"
			(at 102 48 0)
		)
		(property "Value" "10k"
			(at 102 52 0)
		)
		(instances
			(project "demo"
				(path "/0f0e0d0c-0000-4000-8000-000000000000"
					(reference "R1")
					(unit 1)
				)
			)
		)
	)
)
"#;

    fn symbol_id(doc: &Schematic) -> ElementId {
        doc.components().next().map(|(id, _)| id).unwrap()
    }

    #[test]
    fn rename_patches_property_and_instances() {
        let mut doc = Schematic::parse("root.kicad_sch", SYMBOL_DOC.to_string()).unwrap();
        let id = symbol_id(&doc);
        doc.set_reference(id, "R7").unwrap();
        doc.set_symbol_property(id, "Value", "4.7k").unwrap();

        let out = doc.serialize();
        assert_eq!(
            out,
            SYMBOL_DOC
                .replace("\"R1\"", "\"R7\"")
                .replace("\"10k\"", "\"4.7k\"")
        );
        let reparsed = Schematic::parse("root.kicad_sch", out).unwrap();
        let (_, symbol) = reparsed.components().next().unwrap();
        assert_eq!(symbol.reference, "R7");
        assert_eq!(symbol.value, "4.7k");
    }

    #[test]
    fn missing_property_is_inserted_hidden() {
        let mut doc = Schematic::parse("root.kicad_sch", SYMBOL_DOC.to_string()).unwrap();
        let id = symbol_id(&doc);
        doc.set_symbol_property(id, "MPN", "say \"hi\"").unwrap();

        let out = doc.serialize();
        assert!(out.contains(
            "\t\t(property \"MPN\" \"say \\\"hi\\\"\"\n\t\t\t(at 100 50 0)\n\t\t\t(effects\n\t\t\t\t(font (size 1.27 1.27))\n\t\t\t\t(hide yes)\n\t\t\t)\n\t\t)\n\t\t(instances"
        ));
        let reparsed = Schematic::parse("root.kicad_sch", out).unwrap();
        let (_, symbol) = reparsed.components().next().unwrap();
        assert_eq!(symbol.properties.get("MPN").map(String::as_str), Some("say \"hi\""));
    }

    #[test]
    fn rotation_is_patched_in_place() {
        let mut doc = Schematic::parse("root.kicad_sch", SYMBOL_DOC.to_string()).unwrap();
        let id = symbol_id(&doc);
        doc.set_rotation(id, 90.0).unwrap();
        assert_eq!(
            doc.serialize(),
            SYMBOL_DOC.replace("(at 100 50 0)", "(at 100 50 90)")
        );
    }

    #[test]
    fn removal_drops_leading_whitespace() {
        let mut doc = Schematic::parse("root.kicad_sch", MINIMAL.to_string()).unwrap();
        let (label, _) = doc.labels().next().unwrap();
        doc.remove(label);
        let out = doc.serialize();
        assert!(!out.contains("DATA"));
        assert!(out.contains("; a comment the tooling must keep\n\t(wire"));
        assert!(doc.is_modified());
    }

    #[test]
    fn new_elements_go_before_sheet_instances() {
        let mut doc = Schematic::parse("root.kicad_sch", MINIMAL.to_string()).unwrap();
        let node = build::label(
            LabelKind::Local,
            "CLK",
            Point::new(50.8, 25.4),
            0.0,
            None,
            "5b9d2a4e-0000-4000-8000-0000000000d1",
        );
        doc.push(&node).unwrap();
        let out = doc.serialize();
        let clk = out.find("(label \"CLK\"").unwrap();
        let instances = out.find("(sheet_instances").unwrap();
        assert!(clk < instances);

        // A second pass over the written text is stable.
        let reparsed = Schematic::parse("root.kicad_sch", out.clone()).unwrap();
        assert_eq!(reparsed.serialize(), out);
        assert_eq!(reparsed.labels().count(), 2);
    }

    #[test]
    fn embedding_into_empty_lib_symbols() {
        let mut doc = Schematic::parse("root.kicad_sch", MINIMAL.to_string()).unwrap();
        let gnd = build::power_symbol_definition("power:GND", "GND");
        let vcc = build::power_symbol_definition("power:VCC", "VCC");
        assert!(doc.embed_lib_symbol(&gnd).unwrap());
        assert!(doc.embed_lib_symbol(&vcc).unwrap());
        assert!(!doc.embed_lib_symbol(&gnd).unwrap());

        let out = doc.serialize();
        let reparsed = Schematic::parse("root.kicad_sch", out.clone()).unwrap();
        assert!(reparsed.has_lib_symbol("power:GND"));
        assert!(reparsed.has_lib_symbol("power:VCC"));
        assert!(out.contains("\t(lib_symbols\n\t\t(symbol \"power:GND\""));
        assert!(out.contains("\n\t)\n\t; a comment"));
    }

    #[test]
    fn embedding_after_existing_definitions() {
        let mut doc = Schematic::parse("root.kicad_sch", SYMBOL_DOC.to_string()).unwrap();
        let gnd = build::power_symbol_definition("power:GND", "GND");
        assert!(doc.embed_lib_symbol(&gnd).unwrap());
        let reparsed = Schematic::parse("root.kicad_sch", doc.serialize()).unwrap();
        assert!(reparsed.has_lib_symbol("Device:R"));
        assert!(reparsed.has_lib_symbol("power:GND"));
    }

    #[test]
    fn sheet_pins_add_and_remove() {
        let source = r#"(kicad_sch
	(version 20231120)
	(uuid "0f0e0d0c-0000-4000-8000-000000000000")
	(sheet
		(at 50.8 50.8)
		(size 25.4 10.16)
		(uuid "5b9d2a4e-0000-4000-8000-0000000000e1")
		(property "Sheetname" "power"
			(at 50.8 50.0884 0)
		)
		(property "Sheetfile" "power.kicad_sch"
			(at 50.8 61.5484 0)
		)
		(pin "VIN" input
			(at 50.8 53.34 180)
			(uuid "5b9d2a4e-0000-4000-8000-0000000000e2")
		)
	)
)
"#;
        let mut doc = Schematic::parse("root.kicad_sch", source.to_string()).unwrap();
        let (id, _) = doc.sheets().next().unwrap();
        doc.add_sheet_pin(
            id,
            SheetPinData {
                name: "GND".to_string(),
                shape: PinShape::Passive,
                at: Point::new(50.8, 55.88),
                rotation: 180.0,
                uuid: Some("5b9d2a4e-0000-4000-8000-0000000000e3".to_string()),
            },
        )
        .unwrap();
        doc.remove_sheet_pin(id, "VIN").unwrap();
        assert!(doc.add_sheet_pin(
            id,
            SheetPinData {
                name: "GND".to_string(),
                shape: PinShape::Passive,
                at: Point::new(50.8, 58.42),
                rotation: 180.0,
                uuid: None,
            },
        )
        .is_err());

        let out = doc.serialize();
        let reparsed = Schematic::parse("root.kicad_sch", out.clone()).unwrap();
        let (_, sheet) = reparsed.sheets().next().unwrap();
        assert_eq!(sheet.pins.len(), 1);
        assert_eq!(sheet.pins[0].name, "GND");
        assert_eq!(sheet.pins[0].shape, PinShape::Passive);
        assert!(out.contains("\t\t)\n\t\t(pin \"GND\" passive\n"));
    }
}
