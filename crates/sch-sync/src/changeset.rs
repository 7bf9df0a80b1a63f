//! The operations a synchronization run performs.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::document::{LabelKind, PinShape, SheetData, SheetPinData, SymbolData};
use crate::geometry::Point;
use crate::ids::{DocId, ElementId, SheetId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    Add,
    Update,
    Remove,
    Keep,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OpKind::Add => "Add",
            OpKind::Update => "Update",
            OpKind::Remove => "Remove",
            OpKind::Keep => "Keep",
        })
    }
}

/// One changed field of an updated entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub field: String,
    pub old: String,
    pub new: String,
}

impl Delta {
    pub fn new(field: impl Into<String>, old: impl Into<String>, new: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            old: old.into(),
            new: new.into(),
        }
    }
}

impl fmt::Display for Delta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}→{}", self.field, self.old, self.new)
    }
}

/// A changeset entry. `id` is the persistent id of the document entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Op<New, Old> {
    Add(New),
    Update {
        id: String,
        old: Old,
        new: New,
        deltas: Vec<Delta>,
    },
    Remove {
        id: String,
        old: Old,
    },
    Keep {
        id: String,
        old: Old,
    },
}

impl<New, Old> Op<New, Old> {
    pub fn kind(&self) -> OpKind {
        match self {
            Op::Add(_) => OpKind::Add,
            Op::Update { .. } => OpKind::Update,
            Op::Remove { .. } => OpKind::Remove,
            Op::Keep { .. } => OpKind::Keep,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Op::Add(_) => None,
            Op::Update { id, .. } | Op::Remove { id, .. } | Op::Keep { id, .. } => Some(id),
        }
    }

    /// The desired state, unless the entity is going away.
    pub fn desired(&self) -> Option<&New> {
        match self {
            Op::Add(new) | Op::Update { new, .. } => Some(new),
            _ => None,
        }
    }

    /// The document state, unless the entity is new.
    pub fn existing(&self) -> Option<&Old> {
        match self {
            Op::Add(_) => None,
            Op::Update { old, .. } | Op::Remove { old, .. } | Op::Keep { old, .. } => Some(old),
        }
    }
}

/// Document-side data together with where it lives.
#[derive(Debug, Clone, PartialEq)]
pub struct Located<T> {
    pub doc: DocId,
    pub element: ElementId,
    pub data: T,
}

/// An operation in the scope of one canonical sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct Scoped<T> {
    /// Index of the canonical sheet
    pub sheet: usize,
    pub sheet_path: String,
    pub op: T,
    /// Reported as part of the owning component's update
    pub folded: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DesiredComponent {
    /// Persistent id new symbols are created with
    pub key: String,
    pub name: String,
    pub reference: String,
    pub lib_id: String,
    pub value: String,
    pub footprint: String,
    pub properties: BTreeMap<String, String>,
    pub rotation: Option<f64>,
    /// Pins connected to a net
    pub pins: Vec<String>,
    /// Keys of components sharing a net, for contextual placement
    pub peers: Vec<String>,
}

/// What a desired marker is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AnchorRef {
    Pin {
        component: String,
        reference: String,
        pin: String,
    },
    SheetPin {
        sheet: String,
        port: String,
    },
    Free,
}

impl AnchorRef {
    /// Identity of the anchor, independent of display names.
    pub fn key(&self) -> Option<String> {
        match self {
            AnchorRef::Pin { component, pin, .. } => Some(format!("pin:{component}:{pin}")),
            AnchorRef::SheetPin { sheet, port } => Some(format!("sheet:{sheet}:{port}")),
            AnchorRef::Free => None,
        }
    }
}

impl fmt::Display for AnchorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnchorRef::Pin { reference, pin, .. } => write!(f, "{reference}.{pin}"),
            AnchorRef::SheetPin { port, .. } => write!(f, "sheet pin {port}"),
            AnchorRef::Free => f.write_str("free"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DesiredLabel {
    pub net: String,
    pub kind: LabelKind,
    pub shape: Option<PinShape>,
    pub anchor: AnchorRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocLabel {
    pub kind: LabelKind,
    pub text: String,
    pub at: Point,
    pub rotation: f64,
    pub shape: Option<PinShape>,
    pub uuid: Option<String>,
    pub anchor: AnchorRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DesiredSheet {
    /// Index of the canonical sheet
    pub canonical: usize,
    pub key: String,
    pub name: String,
    pub file: String,
    pub ports: Vec<(String, PinShape)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocSheet {
    pub sheet: SheetId,
    pub data: SheetData,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DesiredSheetPin {
    pub sheet_key: String,
    /// Canonical index of the child sheet
    pub child: usize,
    pub name: String,
    pub shape: PinShape,
}

pub type ComponentOp = Op<DesiredComponent, Located<SymbolData>>;
pub type LabelOp = Op<DesiredLabel, Located<DocLabel>>;
pub type SheetOp = Op<DesiredSheet, Located<DocSheet>>;
pub type SheetPinOp = Op<DesiredSheetPin, Located<SheetPinData>>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changeset {
    pub components: Vec<Scoped<ComponentOp>>,
    pub labels: Vec<Scoped<LabelOp>>,
    pub sheets: Vec<Scoped<SheetOp>>,
    pub sheet_pins: Vec<Scoped<SheetPinOp>>,
    /// Existing sheet for each canonical sheet, if any
    pub sheet_map: Vec<Option<SheetId>>,
    /// Document symbol each matched component resolved to, by canonical key
    pub resolved: HashMap<String, (DocId, ElementId)>,
}

impl Changeset {
    /// Whether applying would change nothing.
    pub fn is_empty(&self) -> bool {
        let keep = |kind: OpKind| kind == OpKind::Keep;
        self.components.iter().all(|s| keep(s.op.kind()))
            && self.labels.iter().all(|s| keep(s.op.kind()))
            && self.sheets.iter().all(|s| keep(s.op.kind()))
            && self.sheet_pins.iter().all(|s| keep(s.op.kind()))
    }

    /// Count of operations of `kind` over every entity type.
    pub fn count(&self, kind: OpKind) -> usize {
        self.components.iter().filter(|s| s.op.kind() == kind).count()
            + self.labels.iter().filter(|s| s.op.kind() == kind).count()
            + self.sheets.iter().filter(|s| s.op.kind() == kind).count()
            + self.sheet_pins.iter().filter(|s| s.op.kind() == kind).count()
    }
}
