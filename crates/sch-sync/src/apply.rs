//! Turn a changeset into document patches.
//!
//! Steps run in a fixed order: removals, component updates, sheet additions,
//! component additions, net markers, sheet pins, and finally the hierarchy
//! invariant check. Removals go first so freed space and designators are
//! available to everything added afterwards.

use std::collections::{BTreeMap, HashMap};

use log::debug;

use crate::canonical::CanonicalModel;
use crate::changeset::{
    AnchorRef, Changeset, Delta, DesiredComponent, DesiredLabel, DesiredSheet, DesiredSheetPin,
    DocLabel, LabelOp, Located, Op, Scoped, SheetOp,
};
use crate::connectivity::{pin_label_rotation, pin_position};
use crate::design::{Design, SheetNode, child_file, child_path};
use crate::document::build::{self, NewSymbol};
use crate::document::{LabelKind, Schematic, SheetPinData, SymbolData};
use crate::error::{Result, SyncError};
use crate::geometry::{BoundingBox, GeometryOracle, Mirror, Point, label_box, normalize_angle};
use crate::hierarchy::{
    Transaction, check_invariants, hierarchical_names, instance_path, new_sheet_size, pin_slot,
    remove_free_hierarchical_labels, sheet_for_symbol,
};
use crate::ids::{DocId, ElementId, SheetId};
use crate::library::pin_numbers;
use crate::placement::{PlacementEngine, Request, symbol_box};
use crate::sync::SyncContext;

/// Apply `changeset` to `design`.
pub fn apply(
    design: &mut Design,
    model: &CanonicalModel,
    changeset: &Changeset,
    ctx: &mut SyncContext<'_>,
    oracle: &dyn GeometryOracle,
) -> Result<()> {
    let mut applier = Applier {
        design,
        model,
        ctx,
        oracle,
        sheets: changeset.sheet_map.clone(),
        resolved: changeset.resolved.clone(),
        engines: BTreeMap::new(),
    };
    applier.removals(changeset)?;
    applier.component_updates(changeset)?;
    applier.sheet_changes(changeset)?;
    applier.component_adds(changeset)?;
    let deferred = applier.markers(changeset)?;
    applier.sheet_pins(changeset, deferred)?;
    applier.finish()
}

struct Applier<'a, 'c> {
    design: &'a mut Design,
    model: &'a CanonicalModel,
    ctx: &'a mut SyncContext<'c>,
    oracle: &'a dyn GeometryOracle,
    /// Sheet of each canonical sheet, filled in as sheets are created
    sheets: Vec<Option<SheetId>>,
    /// Symbol of each canonical component, filled in as symbols are created
    resolved: HashMap<String, (DocId, ElementId)>,
    engines: BTreeMap<DocId, PlacementEngine>,
}

impl Applier<'_, '_> {
    fn engine(&mut self, doc: DocId) -> &mut PlacementEngine {
        let Self {
            engines,
            design,
            ctx,
            oracle,
            resolved,
            ..
        } = self;
        engines.entry(doc).or_insert_with(|| {
            let schematic = design.doc(doc);
            let mut engine = PlacementEngine::from_document(&ctx.config, schematic, *oracle);
            for (key, (owner, element)) in resolved.iter() {
                if *owner == doc
                    && let Some(symbol) = schematic.element(*element).as_symbol()
                {
                    engine.record(key, symbol.at);
                }
            }
            engine
        })
    }

    fn sheet(&self, index: usize, path: &str) -> Result<SheetId> {
        self.sheets
            .get(index)
            .copied()
            .flatten()
            .ok_or_else(|| SyncError::invariant(path, "a sheet must exist before its content"))
    }

    /// Embed the definition of `lib_id` into `doc` unless it is already there.
    fn embed(&mut self, doc: DocId, lib_id: &str) -> Result<()> {
        if self.design.doc(doc).has_lib_symbol(lib_id) {
            return Ok(());
        }
        let def = match self.ctx.library.lib_symbol(lib_id) {
            Some(def) => def,
            None => match lib_id.strip_prefix("power:") {
                Some(net) => build::power_symbol_definition(lib_id, net),
                None => {
                    self.ctx.warn(format!(
                        "no library definition for {lib_id}; symbols using it are drawn without one"
                    ));
                    return Ok(());
                }
            },
        };
        self.design.doc_mut(doc).embed_lib_symbol(&def)?;
        Ok(())
    }

    fn removals(&mut self, changeset: &Changeset) -> Result<()> {
        // Labels before power symbols before components.
        for power in [false, true] {
            for scoped in &changeset.labels {
                if let Op::Remove { old, .. } = &scoped.op
                    && (old.data.kind == LabelKind::Power) == power
                {
                    self.design.doc_mut(old.doc).remove(old.element);
                }
            }
        }
        for scoped in &changeset.components {
            if let Op::Remove { old, .. } = &scoped.op {
                self.design.doc_mut(old.doc).remove(old.element);
            }
        }

        for scoped in &changeset.sheet_pins {
            let Op::Remove { old, .. } = &scoped.op else {
                continue;
            };
            self.design
                .doc_mut(old.doc)
                .remove_sheet_pin(old.element, &old.data.name)?;
            if let Some(child) = sheet_for_symbol(self.design, old.doc, old.element) {
                let node = self.design.sheet(child);
                if node.primary {
                    let doc = node.doc;
                    remove_free_hierarchical_labels(
                        self.design.doc_mut(doc),
                        &old.data.name,
                        self.oracle,
                    );
                }
            }
        }

        for scoped in &changeset.sheets {
            if let Op::Remove { old, .. } = &scoped.op {
                self.design.doc_mut(old.doc).remove(old.element);
                self.design.remove_sheet(old.data.sheet);
                debug!("Removed sheet {}", old.data.data.name);
            }
        }
        Ok(())
    }

    fn component_updates(&mut self, changeset: &Changeset) -> Result<()> {
        for scoped in &changeset.components {
            let Op::Update {
                old, new, deltas, ..
            } = &scoped.op
            else {
                continue;
            };
            for delta in deltas {
                self.update_field(old, new, delta)?;
            }
        }
        Ok(())
    }

    fn update_field(
        &mut self,
        old: &Located<SymbolData>,
        new: &DesiredComponent,
        delta: &Delta,
    ) -> Result<()> {
        let (doc, element) = (old.doc, old.element);
        match delta.field.as_str() {
            "reference" => self.design.doc_mut(doc).set_reference(element, &new.reference)?,
            "value" => self
                .design
                .doc_mut(doc)
                .set_symbol_property(element, "Value", &new.value)?,
            "footprint" => self
                .design
                .doc_mut(doc)
                .set_symbol_property(element, "Footprint", &new.footprint)?,
            "lib_id" => {
                self.embed(doc, &new.lib_id)?;
                self.design.doc_mut(doc).set_lib_id(element, &new.lib_id)?;
            }
            "rotation" => {
                let rotation = normalize_angle(new.rotation.unwrap_or_default());
                self.design.doc_mut(doc).set_rotation(element, rotation)?;
            }
            // Marker changes folded into the component are applied with the markers.
            field if field.starts_with("net ") => {}
            field => {
                if let Some(value) = new.properties.get(field) {
                    self.design
                        .doc_mut(doc)
                        .set_symbol_property(element, field, value)?;
                }
            }
        }
        Ok(())
    }

    fn sheet_changes(&mut self, changeset: &Changeset) -> Result<()> {
        for scoped in &changeset.sheets {
            match &scoped.op {
                Op::Update { old, new, .. } => {
                    self.design
                        .doc_mut(old.doc)
                        .set_sheet_name(old.element, &new.name)?;
                    self.design.rename_sheet(old.data.sheet, &new.name);
                }
                Op::Add(new) => self.add_sheet(scoped, new)?,
                _ => {}
            }
        }
        Ok(())
    }

    fn add_sheet(&mut self, scoped: &Scoped<SheetOp>, new: &DesiredSheet) -> Result<()> {
        let parent = self.sheet(scoped.sheet, &scoped.sheet_path)?;
        let parent_doc = self.design.sheet(parent).doc;
        let path = child_path(&self.design.sheet(parent).path, &new.name);
        let file = child_file(self.design.doc(parent_doc).file(), &new.file);
        if let Some(existing) = self.design.find_doc(&file)
            && self.design.sheets().any(|(_, s)| s.doc == existing)
        {
            return Err(SyncError::invariant(
                path,
                format!("{} already belongs to another sheet", file.display()),
            ));
        }

        if self.design.find_doc(&file).is_none() && file.exists() {
            self.ctx.warn(format!(
                "{} exists but is not part of the design; writing {path} replaces it",
                file.display()
            ));
        }

        let doc_uuid = self.ctx.ids.next_string();
        let doc = Schematic::create(
            &file,
            &doc_uuid,
            &self.ctx.config.generator,
            &self.ctx.config.paper,
            false,
        )?;

        let size = new_sheet_size(new.ports.len(), self.ctx.config.sheet_width);
        let strategy = self.ctx.config.default_strategy;
        let at = self.engine(parent_doc).place(&Request {
            entity: &path,
            key: &new.key,
            body: BoundingBox::new(0.0, 0.0, size.0, size.1),
            strategy,
            peers: &[],
        })?;
        let page = self.design.sheets().count() + 1;
        let node = build::sheet(
            &new.name,
            &new.file,
            at,
            size,
            &new.key,
            &self.ctx.config.project,
            &instance_path(self.design, parent),
            page,
        );
        let element = self.design.doc_mut(parent_doc).push(&node)?;
        let doc = self.design.add_document(doc);
        let id = self.design.add_sheet(SheetNode {
            name: new.name.clone(),
            path: path.clone(),
            parent: Some(parent),
            persistent_id: Some(new.key.clone()),
            symbol: Some(element),
            doc,
            primary: true,
            removed: false,
        });
        if let Some(slot) = self.sheets.get_mut(new.canonical) {
            *slot = Some(id);
        }
        debug!("Created sheet {path} in {}", file.display());
        Ok(())
    }

    fn component_adds(&mut self, changeset: &Changeset) -> Result<()> {
        for scoped in &changeset.components {
            let Op::Add(new) = &scoped.op else {
                continue;
            };
            let sheet = self.sheet(scoped.sheet, &scoped.sheet_path)?;
            let doc = self.design.sheet(sheet).doc;
            self.embed(doc, &new.lib_id)?;

            let rotation = new.rotation.map_or(0.0, normalize_angle);
            let strategy = self.ctx.config.default_strategy;
            let entity = format!("{}:{}", scoped.sheet_path, new.reference);
            let body = symbol_box(self.oracle, &new.lib_id, rotation);
            let at = self.engine(doc).place(&Request {
                entity: &entity,
                key: &new.key,
                body,
                strategy,
                peers: &new.peers,
            })?;

            let mut numbers = self
                .ctx
                .library
                .lib_symbol(&new.lib_id)
                .map(|def| pin_numbers(&def))
                .unwrap_or_default();
            for pin in &new.pins {
                if !numbers.contains(pin) {
                    numbers.push(pin.clone());
                }
            }
            let pins: Vec<(String, String)> = numbers
                .into_iter()
                .map(|n| (n, self.ctx.ids.next_string()))
                .collect();

            let instance = instance_path(self.design, sheet);
            let node = build::symbol(&NewSymbol {
                lib_id: &new.lib_id,
                at,
                rotation,
                mirror: Mirror::None,
                uuid: &new.key,
                reference: &new.reference,
                value: &new.value,
                footprint: &new.footprint,
                properties: &new.properties,
                pins: &pins,
                project: &self.ctx.config.project,
                instance_path: &instance,
                power: false,
            });
            let element = self.design.doc_mut(doc).push(&node)?;
            self.resolved.insert(new.key.clone(), (doc, element));
        }
        Ok(())
    }

    /// Where a marker on `anchor` goes and which way it faces, if the anchor
    /// exists yet.
    fn anchor_position(&self, anchor: &AnchorRef) -> Option<(Point, f64)> {
        match anchor {
            AnchorRef::Pin { component, pin, .. } => {
                let (doc, element) = self.resolved.get(component)?;
                let symbol = self.design.doc(*doc).element(*element).as_symbol()?;
                Some((
                    pin_position(self.oracle, symbol, pin),
                    pin_label_rotation(self.oracle, symbol, pin),
                ))
            }
            AnchorRef::SheetPin { sheet, port } => {
                let index = self.model.sheets.iter().position(|s| s.id == *sheet)?;
                let node = self.design.sheet((*self.sheets.get(index)?)?);
                let parent_doc = self.design.sheet(node.parent?).doc;
                let data = self.design.doc(parent_doc).element(node.symbol?).as_sheet()?;
                let pin = data.pin(port)?;
                Some((pin.at, pin.rotation))
            }
            AnchorRef::Free => None,
        }
    }

    /// Create a label or power symbol.
    fn add_marker(
        &mut self,
        doc: DocId,
        sheet: SheetId,
        new: &DesiredLabel,
        at: Point,
        rotation: f64,
        uuid: Option<&str>,
    ) -> Result<ElementId> {
        let uuid = uuid.map_or_else(|| self.ctx.ids.next_string(), str::to_string);
        let node = if new.kind == LabelKind::Power {
            let lib_id = format!("power:{}", new.net);
            self.embed(doc, &lib_id)?;
            let reference = self.ctx.refdes.next_power();
            let pins = vec![("1".to_string(), self.ctx.ids.next_string())];
            let instance = instance_path(self.design, sheet);
            build::symbol(&NewSymbol {
                lib_id: &lib_id,
                at,
                rotation: 0.0,
                mirror: Mirror::None,
                uuid: &uuid,
                reference: &reference,
                value: &new.net,
                footprint: "",
                properties: &BTreeMap::new(),
                pins: &pins,
                project: &self.ctx.config.project,
                instance_path: &instance,
                power: true,
            })
        } else {
            build::label(new.kind, &new.net, at, rotation, new.shape, &uuid)
        };
        self.design.doc_mut(doc).push(&node)
    }

    /// Net markers on pins. Returns the adds that have to wait for a sheet
    /// pin or a free slot, as indices into the changeset.
    fn markers(&mut self, changeset: &Changeset) -> Result<Vec<usize>> {
        let mut deferred = Vec::new();
        for (index, scoped) in changeset.labels.iter().enumerate() {
            match &scoped.op {
                Op::Remove { .. } => {}
                Op::Keep { old, .. } => self.follow_anchor(old)?,
                Op::Update {
                    old, new, deltas, ..
                } => self.update_marker(scoped, old, new, deltas)?,
                Op::Add(new) => match self.anchor_position(&new.anchor) {
                    Some((at, rotation)) => {
                        let sheet = self.sheet(scoped.sheet, &scoped.sheet_path)?;
                        let doc = self.design.sheet(sheet).doc;
                        self.add_marker(doc, sheet, new, at, rotation, None)?;
                    }
                    None => deferred.push(index),
                },
            }
        }
        Ok(deferred)
    }

    /// Move a kept marker back onto its pin if the pin moved.
    fn follow_anchor(&mut self, old: &Located<DocLabel>) -> Result<()> {
        let Some((at, _)) = self.anchor_position(&old.data.anchor) else {
            return Ok(());
        };
        if !at.close_to(old.data.at) {
            self.design.doc_mut(old.doc).move_element(old.element, at)?;
        }
        Ok(())
    }

    fn update_marker(
        &mut self,
        scoped: &Scoped<LabelOp>,
        old: &Located<DocLabel>,
        new: &DesiredLabel,
        deltas: &[Delta],
    ) -> Result<()> {
        let text_only = deltas.iter().all(|d| d.field == "net")
            && old.data.kind != LabelKind::Power
            && new.kind != LabelKind::Power;
        if text_only {
            self.design
                .doc_mut(old.doc)
                .set_label_text(old.element, &new.net)?;
            return self.follow_anchor(old);
        }

        // Kind or shape changes replace the element under the same uuid.
        let (at, rotation) = self
            .anchor_position(&new.anchor)
            .unwrap_or((old.data.at, old.data.rotation));
        let sheet = self.sheet(scoped.sheet, &scoped.sheet_path)?;
        self.design.doc_mut(old.doc).remove(old.element);
        self.add_marker(old.doc, sheet, new, at, rotation, old.data.uuid.as_deref())?;
        Ok(())
    }

    /// Place a marker that is not attached to a pin.
    fn place_free(&mut self, scoped: &Scoped<LabelOp>, new: &DesiredLabel) -> Result<()> {
        let sheet = self.sheet(scoped.sheet, &scoped.sheet_path)?;
        let doc = self.design.sheet(sheet).doc;
        let entity = format!("{} label {}", scoped.sheet_path, new.net);
        let strategy = self.ctx.config.default_strategy;
        let at = self.engine(doc).place(&Request {
            entity: &entity,
            key: &entity,
            body: label_box(&new.net, 0.0),
            strategy,
            peers: &[],
        })?;
        self.add_marker(doc, sheet, new, at, 0.0, None)?;
        Ok(())
    }

    fn sheet_pins(&mut self, changeset: &Changeset, deferred: Vec<usize>) -> Result<()> {
        let mut pending: Vec<Option<usize>> = deferred.into_iter().map(Some).collect();
        for scoped in &changeset.sheet_pins {
            match &scoped.op {
                Op::Update { old, new, .. } => self
                    .design
                    .doc_mut(old.doc)
                    .set_sheet_pin_shape(old.element, &new.name, new.shape)?,
                Op::Add(new) => self.add_sheet_pin(changeset, new, &mut pending)?,
                _ => {}
            }
        }

        // Free-standing markers nobody claimed, and labels on pins that
        // existed all along.
        for index in pending.into_iter().flatten() {
            let scoped = &changeset.labels[index];
            let Op::Add(new) = &scoped.op else {
                continue;
            };
            match self.anchor_position(&new.anchor) {
                Some((at, rotation)) => {
                    let sheet = self.sheet(scoped.sheet, &scoped.sheet_path)?;
                    let doc = self.design.sheet(sheet).doc;
                    self.add_marker(doc, sheet, new, at, rotation, None)?;
                }
                None if new.anchor == AnchorRef::Free => self.place_free(scoped, new)?,
                None => {
                    return Err(SyncError::invariant(
                        format!("{} net {} at {}", scoped.sheet_path, new.net, new.anchor),
                        "a marker needs its anchor to exist",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Add a sheet pin together with its hierarchical label in the child.
    /// Either both end up in the documents or neither does.
    fn add_sheet_pin(
        &mut self,
        changeset: &Changeset,
        new: &DesiredSheetPin,
        pending: &mut [Option<usize>],
    ) -> Result<()> {
        let model = self.model;
        let child = self.sheet(new.child, &model.sheet(new.child).path)?;
        let node = self.design.sheet(child).clone();
        let (Some(parent), Some(symbol)) = (node.parent, node.symbol) else {
            return Err(SyncError::invariant(
                format!("{} pin {}", node.path, new.name),
                "only child sheets have sheet pins",
            ));
        };
        let parent_doc = self.design.sheet(parent).doc;

        let tx = Transaction::begin(self.design, &[parent_doc, node.doc]);
        match self.connect_sheet_pin(changeset, new, &node, parent_doc, symbol, pending) {
            Ok(()) => Ok(()),
            Err(err) => {
                tx.rollback(self.design);
                Err(match err {
                    err @ SyncError::InvariantViolation { .. } => err,
                    other => SyncError::invariant(
                        format!("{} pin {}", node.path, new.name),
                        format!("sheet pin and hierarchical label are added together: {other}"),
                    ),
                })
            }
        }
    }

    fn connect_sheet_pin(
        &mut self,
        changeset: &Changeset,
        new: &DesiredSheetPin,
        node: &SheetNode,
        parent_doc: DocId,
        symbol: ElementId,
        pending: &mut [Option<usize>],
    ) -> Result<()> {
        let entity = format!("{} pin {}", node.path, new.name);

        // Child side first: free-standing hierarchical labels of this port.
        for slot in pending.iter_mut() {
            let Some(index) = *slot else { continue };
            let scoped = &changeset.labels[index];
            if let Op::Add(label) = &scoped.op
                && scoped.sheet == new.child
                && label.anchor == AnchorRef::Free
                && label.kind == LabelKind::Hierarchical
                && label.net == new.name
            {
                self.place_free(scoped, label)?;
                *slot = None;
            }
        }
        if !hierarchical_names(self.design.doc(node.doc)).contains_key(&new.name) {
            return Err(SyncError::invariant(
                entity,
                "a sheet pin needs a hierarchical label of the same name in its sheet",
            ));
        }

        // Then the pin on the sheet symbol.
        let data = self
            .design
            .doc(parent_doc)
            .element(symbol)
            .as_sheet()
            .cloned()
            .ok_or_else(|| SyncError::invariant(&entity, "sheet symbol is missing"))?;
        let (at, rotation, grown) = pin_slot(&data);
        if let Some(size) = grown {
            self.design.doc_mut(parent_doc).set_sheet_size(symbol, size)?;
            self.ctx
                .warn(format!("sheet {} grew to make room for pin {}", node.path, new.name));
        }
        let uuid = self.ctx.ids.next_string();
        self.design.doc_mut(parent_doc).add_sheet_pin(
            symbol,
            SheetPinData {
                name: new.name.clone(),
                shape: new.shape,
                at,
                rotation,
                uuid: Some(uuid),
            },
        )?;

        // Finally the parent-side labels that were waiting for this pin.
        for slot in pending.iter_mut() {
            let Some(index) = *slot else { continue };
            let scoped = &changeset.labels[index];
            let Op::Add(label) = &scoped.op else { continue };
            let AnchorRef::SheetPin { sheet, port } = &label.anchor else {
                continue;
            };
            if *sheet != new.sheet_key || *port != new.name {
                continue;
            }
            let parent_sheet = self.sheet(scoped.sheet, &scoped.sheet_path)?;
            self.add_marker(parent_doc, parent_sheet, label, at, rotation, None)?;
            *slot = None;
        }
        Ok(())
    }

    fn finish(mut self) -> Result<()> {
        let mut warnings: Vec<String> = self
            .engines
            .values_mut()
            .flat_map(PlacementEngine::take_warnings)
            .collect();
        warnings.extend(check_invariants(self.design)?);
        for warning in warnings {
            self.ctx.warn(warning);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::Path;

    use super::*;
    use crate::canonical::{Block, CircuitDescription, PortDecl, SubcircuitCall, build};
    use crate::changeset::OpKind;
    use crate::config::SyncConfig;
    use crate::document::PinShape;
    use crate::geometry::StaticGeometry;
    use crate::library::EmptyLibrary;

    fn model() -> CanonicalModel {
        let child = Block {
            ports: vec![PortDecl {
                name: "EN".to_string(),
                shape: PinShape::Input,
            }],
            ..Default::default()
        };
        build(&CircuitDescription {
            name: "top".to_string(),
            root: Block {
                subcircuits: vec![SubcircuitCall {
                    block: "child".to_string(),
                    name: Some("child".to_string()),
                    ..Default::default()
                }],
                ..Default::default()
            },
            blocks: BTreeMap::from([("child".to_string(), child)]),
        })
        .unwrap()
    }

    const PARENT: &str = r#"(kicad_sch
	(version 20231120)
	(uuid "11111111-1111-4111-8111-111111111111")
	(sheet (at 100 50) (size 25.4 10.16)
		(uuid "22222222-2222-4222-8222-222222222222")
		(property "Sheetname" "child")
		(property "Sheetfile" "child.kicad_sch")
	)
)
"#;

    const CHILD: &str = "(kicad_sch\n\t(version 20231120)\n\t(uuid \"33333333-3333-4333-8333-333333333333\")\n)\n";

    #[test]
    fn sheet_pin_without_child_label_rolls_back() {
        let mut design = Design::load_with(Path::new("top.kicad_sch"), |path| {
            Ok(if path.ends_with("child.kicad_sch") {
                CHILD.to_string()
            } else {
                PARENT.to_string()
            })
        })
        .unwrap();
        let model = model();
        let child = design.children(design.root()).next().unwrap().0;

        // A pin add with no hierarchical label behind it anywhere.
        let changeset = Changeset {
            sheet_pins: vec![Scoped {
                sheet: 0,
                sheet_path: "/".to_string(),
                op: Op::Add(DesiredSheetPin {
                    sheet_key: model.sheet(1).id.clone(),
                    child: 1,
                    name: "EN".to_string(),
                    shape: PinShape::Input,
                }),
                folded: false,
            }],
            sheet_map: vec![Some(design.root()), Some(child)],
            ..Default::default()
        };
        assert_eq!(changeset.count(OpKind::Add), 1);

        let oracle = StaticGeometry::new();
        let mut ctx = SyncContext::new(SyncConfig::default(), &oracle, &EmptyLibrary);
        let err = apply(&mut design, &model, &changeset, &mut ctx, &oracle).unwrap_err();
        assert!(
            matches!(&err, SyncError::InvariantViolation { entity, .. } if entity == "/child pin EN"),
            "{err}"
        );
        for (_, doc) in design.docs() {
            assert!(!doc.is_modified(), "{} was left modified", doc.file().display());
        }
    }
}
