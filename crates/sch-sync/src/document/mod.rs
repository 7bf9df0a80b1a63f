//! One `.kicad_sch` file as an arena of top-level elements.
//!
//! Parsed elements keep the byte span they were read from plus the leading
//! whitespace before them. Serialization writes those bytes back verbatim,
//! applying only the patches recorded against that element, so a document
//! nobody touched round-trips byte for byte.

pub mod build;
mod edit;
mod parse;

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use sch_sexpr::{PatchSet, Sexpr, Span};

use crate::geometry::{Mirror, Point};
use crate::ids::ElementId;

/// Electrical direction of a sheet pin or hierarchical label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinShape {
    Input,
    Output,
    #[default]
    Bidirectional,
    TriState,
    Passive,
}

impl PinShape {
    pub fn as_str(self) -> &'static str {
        match self {
            PinShape::Input => "input",
            PinShape::Output => "output",
            PinShape::Bidirectional => "bidirectional",
            PinShape::TriState => "tri_state",
            PinShape::Passive => "passive",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "input" => PinShape::Input,
            "output" => PinShape::Output,
            "bidirectional" => PinShape::Bidirectional,
            "tri_state" => PinShape::TriState,
            "passive" => PinShape::Passive,
            _ => return None,
        })
    }
}

/// How a net name is attached to the drawing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelKind {
    Local,
    Hierarchical,
    Global,
    /// A `power:*` symbol; its value is the net name
    Power,
}

impl LabelKind {
    /// Global labels and power symbols connect across sheets.
    pub fn is_global(self) -> bool {
        matches!(self, LabelKind::Global | LabelKind::Power)
    }

    /// Whether an existing marker of kind `self` satisfies a desired `other`.
    pub fn satisfies(self, other: LabelKind) -> bool {
        self == other || (self.is_global() && other.is_global())
    }

    pub fn tag(self) -> &'static str {
        match self {
            LabelKind::Local => "label",
            LabelKind::Hierarchical => "hierarchical_label",
            LabelKind::Global => "global_label",
            LabelKind::Power => "symbol",
        }
    }
}

impl fmt::Display for LabelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LabelKind::Local => "local",
            LabelKind::Hierarchical => "hierarchical",
            LabelKind::Global => "global",
            LabelKind::Power => "power",
        })
    }
}

/// A placed library symbol: a component or a power symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolData {
    pub lib_id: String,
    pub uuid: Option<String>,
    pub reference: String,
    pub value: String,
    pub footprint: String,
    /// Every other property, by name
    pub properties: BTreeMap<String, String>,
    pub at: Point,
    pub rotation: f64,
    pub mirror: Mirror,
    pub unit: i64,
    /// `(pin "N" (uuid ..))` entries in file order
    pub pins: Vec<(String, Option<String>)>,
}

impl SymbolData {
    pub fn is_power(&self) -> bool {
        self.lib_id.starts_with("power:") || self.reference.starts_with('#')
    }

    /// A property by name, including the three promoted ones.
    pub fn property(&self, name: &str) -> Option<&str> {
        match name {
            "Reference" => Some(&self.reference),
            "Value" => Some(&self.value),
            "Footprint" => Some(&self.footprint),
            _ => self.properties.get(name).map(String::as_str),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabelData {
    pub kind: LabelKind,
    pub text: String,
    pub at: Point,
    pub rotation: f64,
    pub shape: Option<PinShape>,
    pub uuid: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SheetPinData {
    pub name: String,
    pub shape: PinShape,
    pub at: Point,
    pub rotation: f64,
    pub uuid: Option<String>,
}

/// A hierarchical sheet symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetData {
    pub name: String,
    pub file: String,
    pub at: Point,
    pub size: (f64, f64),
    pub uuid: Option<String>,
    pub pins: Vec<SheetPinData>,
}

impl SheetData {
    pub fn pin(&self, name: &str) -> Option<&SheetPinData> {
        self.pins.iter().find(|p| p.name == name)
    }
}

/// What a top-level element is, as far as synchronization cares.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementKind {
    Symbol(SymbolData),
    Label(LabelData),
    Sheet(SheetData),
    Junction { at: Point },
    Text { text: String, at: Point },
    /// The embedded symbol cache and the names it defines
    LibSymbols { names: Vec<String> },
    /// Anything else, carried through untouched
    Opaque { tag: Option<String> },
}

#[derive(Debug, Clone)]
enum Body {
    /// Read from the document source
    Parsed { span: Span, trivia: Span },
    /// Created during this run; `node` spans point into `text`
    Synthetic { text: String },
}

#[derive(Debug, Clone)]
pub struct Element {
    kind: ElementKind,
    node: Sexpr,
    body: Body,
    patches: PatchSet,
    /// Children added after the last original one
    appended: Vec<Sexpr>,
    removed: bool,
}

impl Element {
    pub fn kind(&self) -> &ElementKind {
        &self.kind
    }

    pub fn node(&self) -> &Sexpr {
        &self.node
    }

    pub fn tag(&self) -> Option<&str> {
        self.node.tag()
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self.body, Body::Synthetic { .. })
    }

    pub fn is_modified(&self) -> bool {
        self.removed || self.is_synthetic() || !self.patches.is_empty()
    }

    pub fn as_symbol(&self) -> Option<&SymbolData> {
        match &self.kind {
            ElementKind::Symbol(symbol) => Some(symbol),
            _ => None,
        }
    }

    pub fn as_label(&self) -> Option<&LabelData> {
        match &self.kind {
            ElementKind::Label(label) => Some(label),
            _ => None,
        }
    }

    pub fn as_sheet(&self) -> Option<&SheetData> {
        match &self.kind {
            ElementKind::Sheet(sheet) => Some(sheet),
            _ => None,
        }
    }
}

/// A parsed schematic document.
#[derive(Debug, Clone)]
pub struct Schematic {
    file: PathBuf,
    source: String,
    header: Span,
    trailer: Span,
    elements: Vec<Element>,
    uuid: String,
    created: bool,
}

impl Schematic {
    /// Path of the file relative to the project root.
    pub fn file(&self) -> &Path {
        &self.file
    }

    /// The document's own `(uuid ..)`, used as the root of instance paths.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether serialization would produce anything but the source text.
    pub fn is_modified(&self) -> bool {
        self.created || self.elements.iter().any(Element::is_modified)
    }

    pub fn element(&self, id: ElementId) -> &Element {
        &self.elements[id.index()]
    }

    /// Live elements in arena order.
    pub fn elements(&self) -> impl Iterator<Item = (ElementId, &Element)> + '_ {
        self.elements
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.removed)
            .map(|(i, e)| (ElementId::from_index(i), e))
    }

    pub fn symbols(&self) -> impl Iterator<Item = (ElementId, &SymbolData)> + '_ {
        self.elements()
            .filter_map(|(id, e)| e.as_symbol().map(|s| (id, s)))
    }

    /// Placed symbols that are not power symbols.
    pub fn components(&self) -> impl Iterator<Item = (ElementId, &SymbolData)> + '_ {
        self.symbols().filter(|(_, s)| !s.is_power())
    }

    pub fn labels(&self) -> impl Iterator<Item = (ElementId, &LabelData)> + '_ {
        self.elements()
            .filter_map(|(id, e)| e.as_label().map(|l| (id, l)))
    }

    pub fn sheets(&self) -> impl Iterator<Item = (ElementId, &SheetData)> + '_ {
        self.elements()
            .filter_map(|(id, e)| e.as_sheet().map(|s| (id, s)))
    }

    /// The embedded `(lib_symbols ...)` node, if present.
    pub fn lib_symbols(&self) -> Option<&Sexpr> {
        self.elements()
            .find(|(_, e)| matches!(e.kind, ElementKind::LibSymbols { .. }))
            .map(|(_, e)| &e.node)
    }

    pub fn has_lib_symbol(&self, lib_id: &str) -> bool {
        self.elements().any(|(_, e)| match &e.kind {
            ElementKind::LibSymbols { names } => names.iter().any(|n| n == lib_id),
            _ => false,
        })
    }

    /// Write the document, splicing patches and new elements into the source.
    pub fn serialize_to<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        writer.write_all(self.header.slice(&self.source).as_bytes())?;

        // New elements go before the trailing bookkeeping blocks, or at the end.
        let insert_before = self.elements.iter().position(|e| {
            matches!(e.body, Body::Parsed { .. })
                && matches!(e.tag(), Some("sheet_instances" | "embedded_fonts"))
        });

        for (index, element) in self.elements.iter().enumerate() {
            let Body::Parsed { span, trivia } = element.body else {
                continue;
            };
            if insert_before == Some(index) {
                self.write_synthetic(&mut writer)?;
            }
            let trivia = trivia.slice(&self.source);
            if element.removed {
                // Comments in front of a removed element stay.
                writer.write_all(trivia.trim_end().as_bytes())?;
                continue;
            }
            writer.write_all(trivia.as_bytes())?;
            element.patches.write_window(&self.source, span, &mut writer)?;
        }
        if insert_before.is_none() {
            self.write_synthetic(&mut writer)?;
        }

        writer.write_all(self.trailer.slice(&self.source).as_bytes())
    }

    fn write_synthetic<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        for element in &self.elements {
            let Body::Synthetic { text } = &element.body else {
                continue;
            };
            if element.removed {
                continue;
            }
            writer.write_all(b"\n\t")?;
            element.patches.write_to(text, &mut *writer)?;
        }
        Ok(())
    }

    pub fn serialize(&self) -> String {
        let mut buf = Vec::with_capacity(self.source.len() + 1024);
        // Writing into a Vec cannot fail.
        let _ = self.serialize_to(&mut buf);
        String::from_utf8(buf).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) const MINIMAL: &str = r#"(kicad_sch
	(version 20231120)
	(generator "eeschema")
	(uuid "0f0e0d0c-0000-4000-8000-000000000000")
	(paper "A4")
	(lib_symbols)
	; a comment the tooling must keep
	(label "DATA"
		(at 100 46.19 0)
		(uuid "5b9d2a4e-0000-4000-8000-0000000000b1")
	)
	(wire
		(pts
			(xy 10 10) (xy 20 10)
		)
		(stroke (width 0) (type default))
		(uuid "5b9d2a4e-0000-4000-8000-0000000000c1")
	)
	(sheet_instances
		(path "/"
			(page "1")
		)
	)
)
"#;

    #[test]
    fn untouched_documents_round_trip() {
        let doc = Schematic::parse("root.kicad_sch", MINIMAL.to_string()).unwrap();
        assert!(!doc.is_modified());
        assert_eq!(doc.serialize(), MINIMAL);
        assert_eq!(doc.uuid(), "0f0e0d0c-0000-4000-8000-000000000000");
    }

    #[test]
    fn unknown_elements_are_opaque() {
        let doc = Schematic::parse("root.kicad_sch", MINIMAL.to_string()).unwrap();
        let wire = doc
            .elements()
            .find(|(_, e)| e.tag() == Some("wire"))
            .map(|(_, e)| e.kind().clone());
        assert_eq!(
            wire,
            Some(ElementKind::Opaque {
                tag: Some("wire".to_string())
            })
        );
    }

    #[test]
    fn label_kinds() {
        assert!(LabelKind::Power.satisfies(LabelKind::Global));
        assert!(LabelKind::Global.satisfies(LabelKind::Power));
        assert!(!LabelKind::Local.satisfies(LabelKind::Hierarchical));
        assert_eq!(PinShape::from_token("tri_state"), Some(PinShape::TriState));
        assert_eq!(PinShape::TriState.as_str(), "tri_state");
    }
}
