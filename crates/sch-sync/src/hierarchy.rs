//! Sheet pins and the hierarchical labels behind them.
//!
//! A sheet pin in the parent and a hierarchical label of the same name in the
//! child are one connection. Edits that touch both sides run inside a
//! [`Transaction`] so a failure leaves neither half behind.

use std::collections::BTreeMap;

use log::debug;

use crate::connectivity::document_markers;
use crate::design::Design;
use crate::document::{LabelKind, Schematic, SheetData};
use crate::error::{Result, SyncError};
use crate::geometry::{GeometryOracle, Point};
use crate::ids::{DocId, ElementId, SheetId};

/// Vertical distance between sheet pin slots.
pub const PIN_PITCH: f64 = 2.54;

/// Size of a new sheet symbol holding `pins` pins on its left edge.
pub fn new_sheet_size(pins: usize, width: f64) -> (f64, f64) {
    (width, (pins.max(3) + 1) as f64 * PIN_PITCH)
}

fn slot_rows(sheet: &SheetData) -> i64 {
    (sheet.size.1 / PIN_PITCH + 1e-9).floor() as i64 - 1
}

/// First free pin slot: the left edge top to bottom, then the right edge.
/// Returns the slot position and the pin angle.
pub fn free_slot(sheet: &SheetData) -> Option<(Point, f64)> {
    let rows = slot_rows(sheet);
    [(sheet.at.x, 180.0), (sheet.at.x + sheet.size.0, 0.0)]
        .into_iter()
        .flat_map(|(x, angle)| {
            (1..=rows).map(move |k| (Point::new(x, sheet.at.y + k as f64 * PIN_PITCH), angle))
        })
        .find(|(slot, _)| !sheet.pins.iter().any(|pin| pin.at.close_to(*slot)))
}

/// Where a new pin goes, growing the sheet downward when both edges are full.
/// Returns the slot, its angle and the new size if the sheet had to grow.
pub fn pin_slot(sheet: &SheetData) -> (Point, f64, Option<(f64, f64)>) {
    if let Some((slot, angle)) = free_slot(sheet) {
        return (slot, angle, None);
    }
    let rows = slot_rows(sheet).max(0) + 1;
    let slot = Point::new(sheet.at.x, sheet.at.y + rows as f64 * PIN_PITCH);
    (slot, 180.0, Some((sheet.size.0, (rows + 1) as f64 * PIN_PITCH)))
}

/// KiCad instance path of the content of `sheet`: the root document uuid
/// followed by the sheet symbol uuid of every level below the root.
pub fn instance_path(design: &Design, sheet: SheetId) -> String {
    let mut chain = Vec::new();
    let mut current = Some(sheet);
    while let Some(id) = current {
        let node = design.sheet(id);
        if node.parent.is_some() {
            chain.push(node.persistent_id.clone().unwrap_or_default());
        }
        current = node.parent;
    }
    let root = design.sheet_doc(design.root()).uuid();
    let mut path = format!("/{root}");
    for id in chain.iter().rev() {
        path.push('/');
        path.push_str(id);
    }
    path
}

/// The sheet whose symbol is `element` of `doc`.
pub fn sheet_for_symbol(design: &Design, doc: DocId, element: ElementId) -> Option<SheetId> {
    design
        .sheets()
        .find(|(_, node)| {
            node.symbol == Some(element)
                && node.parent.is_some_and(|parent| design.sheet(parent).doc == doc)
        })
        .map(|(id, _)| id)
}

/// Hierarchical labels in a document, counted by name.
pub fn hierarchical_names(doc: &Schematic) -> BTreeMap<String, usize> {
    let mut names = BTreeMap::new();
    for (_, label) in doc.labels().filter(|(_, l)| l.kind == LabelKind::Hierarchical) {
        *names.entry(label.text.clone()).or_insert(0) += 1;
    }
    names
}

/// Drop free-standing hierarchical labels named after a removed sheet pin.
/// Labels on a pin are left to the regular label diff.
pub fn remove_free_hierarchical_labels(
    doc: &mut Schematic,
    name: &str,
    oracle: &dyn GeometryOracle,
) -> usize {
    let stale: Vec<ElementId> = document_markers(doc, oracle)
        .into_iter()
        .filter(|m| m.kind == LabelKind::Hierarchical && m.text == name && m.target.is_none())
        .map(|m| m.element)
        .collect();
    for element in &stale {
        doc.remove(*element);
    }
    if !stale.is_empty() {
        debug!(
            "Removed {} free hierarchical label(s) {name} from {}",
            stale.len(),
            doc.file().display()
        );
    }
    stale.len()
}

/// Snapshot of the documents an edit may touch.
pub struct Transaction {
    saved: Vec<(DocId, Schematic)>,
}

impl Transaction {
    pub fn begin(design: &Design, docs: &[DocId]) -> Self {
        let mut saved: Vec<(DocId, Schematic)> = Vec::with_capacity(docs.len());
        for &doc in docs {
            if !saved.iter().any(|(id, _)| *id == doc) {
                saved.push((doc, design.doc(doc).clone()));
            }
        }
        Self { saved }
    }

    /// Put every snapshotted document back.
    pub fn rollback(self, design: &mut Design) {
        for (id, doc) in self.saved {
            *design.doc_mut(id) = doc;
        }
    }
}

/// Sheet pins and hierarchical labels must agree after a run.
///
/// Every sheet pin needs exactly one hierarchical label of the same name in
/// its child; anything else is an error. A hierarchical label without a sheet
/// pin is only a warning.
pub fn check_invariants(design: &Design) -> Result<Vec<String>> {
    let mut warnings = Vec::new();
    for (_, node) in design.sheets() {
        let (Some(parent), Some(symbol), true) = (node.parent, node.symbol, node.primary) else {
            continue;
        };
        let Some(sheet) = design
            .doc(design.sheet(parent).doc)
            .element(symbol)
            .as_sheet()
        else {
            continue;
        };
        let labels = hierarchical_names(design.doc(node.doc));
        for (i, pin) in sheet.pins.iter().enumerate() {
            if sheet.pins[..i].iter().any(|p| p.name == pin.name) {
                return Err(SyncError::invariant(
                    format!("{} pin {}", node.path, pin.name),
                    "a hierarchical label needs exactly one sheet pin",
                ));
            }
            match labels.get(&pin.name).copied().unwrap_or(0) {
                1 => {}
                0 => {
                    return Err(SyncError::invariant(
                        format!("{} pin {}", node.path, pin.name),
                        "a sheet pin needs a hierarchical label of the same name in its sheet",
                    ));
                }
                n => {
                    return Err(SyncError::invariant(
                        format!("{} pin {}", node.path, pin.name),
                        format!("a sheet pin needs exactly one hierarchical label, found {n}"),
                    ));
                }
            }
        }
        for name in labels.into_keys() {
            if sheet.pin(&name).is_none() {
                warnings.push(format!(
                    "hierarchical label {name} in {} has no sheet pin on {}",
                    design.doc(node.doc).file().display(),
                    node.path
                ));
            }
        }
    }
    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{PinShape, SheetPinData};
    use crate::geometry::StaticGeometry;

    fn sheet(height: f64, pins: &[(f64, f64)]) -> SheetData {
        SheetData {
            name: "child".to_string(),
            file: "child.kicad_sch".to_string(),
            at: Point::new(100.0, 50.0),
            size: (25.4, height),
            uuid: None,
            pins: pins
                .iter()
                .enumerate()
                .map(|(i, (x, y))| SheetPinData {
                    name: format!("P{i}"),
                    shape: PinShape::Input,
                    at: Point::new(*x, *y),
                    rotation: 180.0,
                    uuid: None,
                })
                .collect(),
        }
    }

    #[test]
    fn slots_fill_left_then_right() {
        let empty = sheet(10.16, &[]);
        let (slot, angle) = free_slot(&empty).unwrap();
        assert!(slot.close_to(Point::new(100.0, 52.54)));
        assert_eq!(angle, 180.0);

        let left_full = sheet(10.16, &[(100.0, 52.54), (100.0, 55.08), (100.0, 57.62)]);
        let (slot, angle) = free_slot(&left_full).unwrap();
        assert!(slot.close_to(Point::new(125.4, 52.54)));
        assert_eq!(angle, 0.0);
    }

    #[test]
    fn full_sheet_grows_downward() {
        let full = sheet(5.08, &[(100.0, 52.54), (125.4, 52.54)]);
        let (slot, angle, grown) = pin_slot(&full);
        assert!(slot.close_to(Point::new(100.0, 55.08)));
        assert_eq!(angle, 180.0);
        let (w, h) = grown.unwrap();
        assert_eq!(w, 25.4);
        assert!((h - 7.62).abs() < 1e-9);
        assert_eq!(new_sheet_size(5, 25.4).1, 6.0 * PIN_PITCH);
    }

    const PARENT: &str = r#"(kicad_sch
	(version 20231120)
	(uuid "11111111-1111-4111-8111-111111111111")
	(sheet (at 100 50) (size 25.4 10.16)
		(uuid "22222222-2222-4222-8222-222222222222")
		(property "Sheetname" "child")
		(property "Sheetfile" "child.kicad_sch")
		(pin "EN" input (at 100 52.54 180) (uuid "p1"))
	)
)
"#;

    const CHILD: &str = r#"(kicad_sch
	(version 20231120)
	(uuid "33333333-3333-4333-8333-333333333333")
	(hierarchical_label "EN" (shape input) (at 20 20 0) (uuid "h1"))
	(hierarchical_label "SPARE" (shape input) (at 20 30 0) (uuid "h2"))
)
"#;

    fn design(child: &str) -> Design {
        design_with(PARENT, child)
    }

    fn design_with(parent: &str, child: &str) -> Design {
        let files = [("top.kicad_sch", parent), ("child.kicad_sch", child)];
        Design::load_with(std::path::Path::new("top.kicad_sch"), |path| {
            let name = path.to_string_lossy();
            Ok(files
                .iter()
                .find(|(f, _)| name.ends_with(f))
                .map(|(_, text)| text.to_string())
                .unwrap_or_default())
        })
        .unwrap()
    }

    #[test]
    fn instance_paths_chain_sheet_uuids() {
        let design = design(CHILD);
        let child = design.children(design.root()).next().unwrap().0;
        assert_eq!(
            instance_path(&design, child),
            "/11111111-1111-4111-8111-111111111111/22222222-2222-4222-8222-222222222222"
        );
        assert_eq!(
            instance_path(&design, design.root()),
            "/11111111-1111-4111-8111-111111111111"
        );
        let node = design.sheet(child);
        let parent_doc = design.sheet(design.root()).doc;
        assert_eq!(
            sheet_for_symbol(&design, parent_doc, node.symbol.unwrap()),
            Some(child)
        );
    }

    #[test]
    fn unmatched_labels_warn_and_missing_labels_fail() {
        let ok = design(CHILD);
        let warnings = check_invariants(&ok).unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("SPARE"));

        let broken = design(
            "(kicad_sch (version 20231120) (uuid \"33333333-3333-4333-8333-333333333333\"))\n",
        );
        let err = check_invariants(&broken).unwrap_err();
        assert!(err.to_string().contains("/child pin EN"), "{err}");
    }

    #[test]
    fn doubled_labels_or_pins_fail() {
        let doubled = CHILD.replace(
            "(hierarchical_label \"SPARE\" (shape input) (at 20 30 0) (uuid \"h2\"))",
            "(hierarchical_label \"EN\" (shape input) (at 20 30 0) (uuid \"h2\"))",
        );
        let design = design(&doubled);
        let child = design.children(design.root()).next().unwrap().0;
        assert_eq!(hierarchical_names(design.sheet_doc(child)).get("EN"), Some(&2));
        let err = check_invariants(&design).unwrap_err();
        assert!(
            matches!(&err, SyncError::InvariantViolation { entity, .. } if entity == "/child pin EN"),
            "{err}"
        );
        assert!(err.to_string().contains("found 2"), "{err}");

        let two_pins = PARENT.replace(
            "(pin \"EN\" input (at 100 52.54 180) (uuid \"p1\"))",
            "(pin \"EN\" input (at 100 52.54 180) (uuid \"p1\"))\n\t\t(pin \"EN\" input (at 100 55.08 180) (uuid \"p2\"))",
        );
        let err = check_invariants(&design_with(&two_pins, CHILD)).unwrap_err();
        assert!(err.to_string().contains("exactly one sheet pin"), "{err}");
    }

    #[test]
    fn rollback_restores_both_documents() {
        let mut design = design(CHILD);
        let child = design.children(design.root()).next().unwrap().0;
        let parent_doc = design.sheet(design.root()).doc;
        let child_doc = design.sheet(child).doc;
        let symbol = design.sheet(child).symbol.unwrap();

        let tx = Transaction::begin(&design, &[parent_doc, child_doc]);
        design.doc_mut(parent_doc).remove_sheet_pin(symbol, "EN").unwrap();
        let oracle = StaticGeometry::new();
        assert_eq!(
            remove_free_hierarchical_labels(design.doc_mut(child_doc), "EN", &oracle),
            1
        );
        assert!(design.doc(parent_doc).is_modified());
        tx.rollback(&mut design);

        assert!(!design.doc(parent_doc).is_modified());
        assert_eq!(design.doc(child_doc).serialize(), CHILD);
        assert_eq!(hierarchical_names(design.doc(child_doc)).get("EN"), Some(&1));
    }
}
