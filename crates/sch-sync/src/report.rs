//! Human-readable account of a synchronization run.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::changeset::{Changeset, Delta, Op, OpKind, Scoped};
use crate::design::child_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    Component,
    NetLabel,
    Sheet,
    SheetPin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub op: OpKind,
    pub entity: EntityKind,
    /// Reference designator, net name or sheet path
    pub identifier: String,
    pub summary: String,
}

impl fmt::Display for ReportEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.op == OpKind::Remove {
            f.write_str("⚠️ ")?;
        }
        write!(f, "{}: {}", self.op, self.identifier)?;
        if !self.summary.is_empty() {
            write!(f, " {}", self.summary)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub entries: Vec<ReportEntry>,
    pub warnings: Vec<String>,
}

fn deltas(deltas: &[Delta]) -> String {
    deltas
        .iter()
        .map(Delta::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn entry(op: OpKind, entity: EntityKind, identifier: String, summary: String) -> ReportEntry {
    ReportEntry {
        op,
        entity,
        identifier,
        summary,
    }
}

impl SyncReport {
    /// Entries for every change in `changeset`, components first.
    ///
    /// Identical updates to several markers of one net are reported once.
    pub fn new(changeset: &Changeset, warnings: &[String]) -> Self {
        let mut entries = Vec::new();

        for scoped in changeset.components.iter().filter(|s| !s.folded) {
            let entity = EntityKind::Component;
            match &scoped.op {
                Op::Add(new) => entries.push(entry(OpKind::Add, entity, new.reference.clone(), String::new())),
                Op::Update { old, new, deltas: d, .. } => {
                    let identifier = if old.data.reference.is_empty() {
                        new.reference.clone()
                    } else {
                        old.data.reference.clone()
                    };
                    entries.push(entry(OpKind::Update, entity, identifier, deltas(d)));
                }
                Op::Remove { old, .. } => entries.push(entry(
                    OpKind::Remove,
                    entity,
                    old.data.reference.clone(),
                    "(not found in code)".to_string(),
                )),
                Op::Keep { .. } => {}
            }
        }

        // (sheet, net, change) -> (entry index, markers)
        let mut updates: HashMap<(&str, &str, String), (usize, usize)> = HashMap::new();
        for scoped in changeset.labels.iter().filter(|s| !s.folded) {
            let entity = EntityKind::NetLabel;
            match &scoped.op {
                Op::Add(new) => entries.push(entry(
                    OpKind::Add,
                    entity,
                    new.net.clone(),
                    format!("{} at {} in {}", new.kind, new.anchor, scoped.sheet_path),
                )),
                Op::Update { new, deltas: d, .. } => {
                    let summary = deltas(d);
                    match updates.entry((scoped.sheet_path.as_str(), new.net.as_str(), summary.clone())) {
                        Entry::Occupied(mut seen) => seen.get_mut().1 += 1,
                        Entry::Vacant(slot) => {
                            slot.insert((entries.len(), 1));
                            entries.push(entry(OpKind::Update, entity, new.net.clone(), summary));
                        }
                    }
                }
                Op::Remove { old, .. } => entries.push(entry(
                    OpKind::Remove,
                    entity,
                    old.data.text.clone(),
                    format!("{} at {} in {}", old.data.kind, old.data.anchor, scoped.sheet_path),
                )),
                Op::Keep { .. } => {}
            }
        }
        for (index, markers) in updates.into_values() {
            if markers > 1 {
                entries[index].summary.push_str(&format!(" ({markers} markers)"));
            }
        }

        for scoped in &changeset.sheets {
            let entity = EntityKind::Sheet;
            match &scoped.op {
                Op::Add(new) => entries.push(entry(
                    OpKind::Add,
                    entity,
                    child_path(&scoped.sheet_path, &new.name),
                    format!("({})", new.file),
                )),
                Op::Update { old, deltas: d, .. } => entries.push(entry(
                    OpKind::Update,
                    entity,
                    child_path(&scoped.sheet_path, &old.data.data.name),
                    deltas(d),
                )),
                Op::Remove { old, .. } => entries.push(entry(
                    OpKind::Remove,
                    entity,
                    child_path(&scoped.sheet_path, &old.data.data.name),
                    "(not found in code)".to_string(),
                )),
                Op::Keep { .. } => {}
            }
        }

        for scoped in &changeset.sheet_pins {
            let entity = EntityKind::SheetPin;
            match &scoped.op {
                Op::Add(new) => entries.push(entry(OpKind::Add, entity, new.name.clone(), pin_summary(scoped))),
                Op::Update { new, deltas: d, .. } => entries.push(entry(
                    OpKind::Update,
                    entity,
                    new.name.clone(),
                    format!("{} {}", pin_summary(scoped), deltas(d)),
                )),
                Op::Remove { old, .. } => entries.push(entry(
                    OpKind::Remove,
                    entity,
                    old.data.name.clone(),
                    pin_summary(scoped),
                )),
                Op::Keep { .. } => {}
            }
        }

        Self {
            entries,
            warnings: warnings.to_vec(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.warnings.is_empty()
    }

    pub fn count(&self, op: OpKind) -> usize {
        self.entries.iter().filter(|e| e.op == op).count()
    }
}

fn pin_summary<T>(scoped: &Scoped<T>) -> String {
    format!("(sheet pin in {})", scoped.sheet_path)
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "{entry}")?;
        }
        for warning in &self.warnings {
            writeln!(f, "⚠️ {warning}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::changeset::{AnchorRef, DesiredComponent, DesiredLabel, DocLabel, Located};
    use crate::document::{LabelKind, SymbolData};
    use crate::geometry::{Mirror, Point};
    use crate::ids::{DocId, ElementId};

    fn desired(reference: &str, value: &str) -> DesiredComponent {
        DesiredComponent {
            key: format!("key-{reference}"),
            name: reference.to_lowercase(),
            reference: reference.to_string(),
            lib_id: "Device:R".to_string(),
            value: value.to_string(),
            footprint: String::new(),
            properties: BTreeMap::new(),
            rotation: None,
            pins: Vec::new(),
            peers: Vec::new(),
        }
    }

    fn located(reference: &str, value: &str) -> Located<SymbolData> {
        Located {
            doc: DocId::from_index(0),
            element: ElementId::from_index(0),
            data: SymbolData {
                lib_id: "Device:R".to_string(),
                uuid: None,
                reference: reference.to_string(),
                value: value.to_string(),
                footprint: String::new(),
                properties: BTreeMap::new(),
                at: Point::new(0.0, 0.0),
                rotation: 0.0,
                mirror: Mirror::None,
                unit: 1,
                pins: Vec::new(),
            },
        }
    }

    fn scoped<T>(op: T) -> Scoped<T> {
        Scoped {
            sheet: 0,
            sheet_path: "/".to_string(),
            op,
            folded: false,
        }
    }

    #[test]
    fn renders_adds_updates_and_removals() {
        let changeset = Changeset {
            components: vec![
                scoped(Op::Keep {
                    id: "c".to_string(),
                    old: located("C1", "100nF"),
                }),
                scoped(Op::Update {
                    id: "r1".to_string(),
                    old: located("R1", "10k"),
                    new: desired("R1", "20k"),
                    deltas: vec![Delta::new("value", "10k", "20k")],
                }),
                scoped(Op::Add(desired("R2", "4.7k"))),
                scoped(Op::Remove {
                    id: "r3".to_string(),
                    old: located("R3", "1k"),
                }),
            ],
            ..Default::default()
        };
        let warnings = ["placing /:R2 needed a search radius of 20.32".to_string()];
        let report = SyncReport::new(&changeset, &warnings);
        assert_eq!(report.count(OpKind::Add), 1);
        insta::assert_snapshot!(report.to_string(), @r"
        Update: R1 value 10k→20k
        Add: R2
        ⚠️ Remove: R3 (not found in code)
        ⚠️ placing /:R2 needed a search radius of 20.32
        ");
    }

    fn rescoped(reference: &str, kind: LabelKind) -> Op<DesiredLabel, Located<DocLabel>> {
        let anchor = AnchorRef::Pin {
            component: format!("key-{reference}"),
            reference: reference.to_string(),
            pin: "1".to_string(),
        };
        Op::Update {
            id: reference.to_string(),
            old: Located {
                doc: DocId::from_index(0),
                element: ElementId::from_index(0),
                data: DocLabel {
                    kind: LabelKind::Local,
                    text: "DATA".to_string(),
                    at: Point::new(0.0, 0.0),
                    rotation: 0.0,
                    shape: None,
                    uuid: None,
                    anchor: anchor.clone(),
                },
            },
            new: DesiredLabel {
                net: "DATA".to_string(),
                kind,
                shape: None,
                anchor,
            },
            deltas: vec![Delta::new("kind", "local", kind.to_string())],
        }
    }

    #[test]
    fn marker_updates_fold_per_net() {
        let mut other_sheet = scoped(rescoped("R3", LabelKind::Global));
        other_sheet.sheet_path = "/sub".to_string();
        let changeset = Changeset {
            labels: vec![
                scoped(rescoped("R1", LabelKind::Global)),
                scoped(rescoped("C1", LabelKind::Global)),
                other_sheet,
            ],
            ..Default::default()
        };
        let report = SyncReport::new(&changeset, &[]);
        assert_eq!(report.count(OpKind::Update), 2);
        insta::assert_snapshot!(report.to_string(), @r"
        Update: DATA kind local→global (2 markers)
        Update: DATA kind local→global
        ");
    }

    #[test]
    fn empty_changeset_reports_nothing() {
        let report = SyncReport::new(&Changeset::default(), &[]);
        assert!(report.is_empty());
        assert_eq!(report.to_string(), "");
    }
}
