//! Identity resolution and diffing of a design against the canonical model.
//!
//! Sheets are matched top-down first, since a sheet's content can only be
//! compared once its document is known. Components are then paired per sheet
//! in three stages of decreasing confidence: persistent id, explicit
//! reference, and a property fingerprint. Net markers are compared per anchor
//! (component pin or sheet pin) and sheet pins per sheet symbol.

use std::collections::{HashMap, HashSet};

use log::debug;
use sch_sexpr::formatter::format_number;

use crate::canonical::{CanonicalComponent, CanonicalModel, PortDecl, Reference};
use crate::changeset::{
    AnchorRef, Changeset, ComponentOp, Delta, DesiredComponent, DesiredLabel, DesiredSheet,
    DesiredSheetPin, DocLabel, DocSheet, LabelOp, Located, Op, OpKind, Scoped, SheetOp,
    SheetPinOp,
};
use crate::connectivity::{AnchorTarget, DocMarker, Endpoint, desired_markers, document_markers};
use crate::design::Design;
use crate::document::{LabelKind, SheetPinData, SymbolData};
use crate::error::{Result, SyncError};
use crate::geometry::{GeometryOracle, normalize_angle};
use crate::ids::{DocId, ElementId, SheetId};
use crate::refdes::parse_reference;
use crate::sync::SyncContext;

/// How one canonical sheet relates to the loaded design.
#[derive(Debug, Clone, Copy)]
struct Scope {
    /// Content is synchronized
    active: bool,
    existing: Option<SheetId>,
    /// Document holding the content, for active sheets that exist
    doc: Option<DocId>,
}

/// Component pairing inside one sheet.
#[derive(Debug, Default)]
struct Pairing<'d> {
    pairs: Vec<Option<(ElementId, &'d SymbolData)>>,
    unmatched: Vec<(ElementId, &'d SymbolData)>,
}

/// Key of a document symbol: its uuid, or its arena slot.
pub(crate) fn element_key(element: ElementId, uuid: Option<&str>) -> String {
    uuid.map_or_else(|| format!("~{}", element.index()), str::to_string)
}

/// Compare `design` with `model`.
pub fn diff(
    design: &Design,
    model: &CanonicalModel,
    ctx: &mut SyncContext<'_>,
    oracle: &dyn GeometryOracle,
) -> Result<Changeset> {
    let mut changeset = Changeset::default();
    let scopes = match_sheets(design, model, &mut changeset);
    let pairings = pair_components(design, model, &scopes, ctx);
    let references = assign_references(design, model, &scopes, &pairings, ctx);

    for (index, sheet) in model.sheets.iter().enumerate() {
        if !scopes[index].active {
            continue;
        }
        let desired = desired_components(model, index, &references[index]);
        component_ops(index, &sheet.path, &scopes[index], &pairings[index], desired, ctx, &mut changeset);
        label_ops(design, model, index, &scopes, &pairings[index], &references[index], ctx, oracle, &mut changeset)?;
        if let Some(parent) = sheet.parent
            && scopes[parent].active
        {
            sheet_pin_ops(design, model, index, &scopes[index], &mut changeset);
        }
    }
    fold_label_changes(&mut changeset);

    debug!(
        "Changeset: {} add, {} update, {} remove, {} keep",
        changeset.count(OpKind::Add),
        changeset.count(OpKind::Update),
        changeset.count(OpKind::Remove),
        changeset.count(OpKind::Keep)
    );
    Ok(changeset)
}

fn located_sheet(design: &Design, id: SheetId) -> Option<Located<DocSheet>> {
    let node = design.sheet(id);
    let parent = node.parent?;
    let element = node.symbol?;
    let doc = design.sheet(parent).doc;
    let data = design.doc(doc).element(element).as_sheet()?.clone();
    Some(Located {
        doc,
        element,
        data: DocSheet { sheet: id, data },
    })
}

fn match_sheets(
    design: &Design,
    model: &CanonicalModel,
    changeset: &mut Changeset,
) -> Vec<Scope> {
    let mut scopes: Vec<Scope> = Vec::with_capacity(model.sheets.len());
    let mut claimed: HashSet<SheetId> = HashSet::new();

    for (index, sheet) in model.sheets.iter().enumerate() {
        let Some(parent) = sheet.parent else {
            let root = design.root();
            scopes.push(Scope {
                active: true,
                existing: Some(root),
                doc: Some(design.sheet(root).doc),
            });
            continue;
        };
        let parent_scope = scopes[parent];
        if !parent_scope.active {
            scopes.push(Scope {
                active: false,
                existing: None,
                doc: None,
            });
            continue;
        }

        let existing = parent_scope.existing.and_then(|parent_id| {
            let children: Vec<_> = design
                .children(parent_id)
                .filter(|(id, _)| !claimed.contains(id))
                .collect();
            children
                .iter()
                .find(|(_, n)| n.persistent_id.as_deref() == Some(sheet.id.as_str()))
                .or_else(|| children.iter().find(|(_, n)| n.name == sheet.name))
                .map(|(id, _)| *id)
        });

        let desired = DesiredSheet {
            canonical: index,
            key: sheet.id.clone(),
            name: sheet.name.clone(),
            file: sheet.file.clone(),
            ports: sheet.ports.iter().map(|p| (p.name.clone(), p.shape)).collect(),
        };
        let scoped = |op: SheetOp| Scoped {
            sheet: parent,
            sheet_path: model.sheet(parent).path.clone(),
            op,
            folded: false,
        };

        let Some((id, located)) = existing.and_then(|id| Some((id, located_sheet(design, id)?))) else {
            changeset.sheets.push(scoped(Op::Add(desired)));
            scopes.push(Scope {
                active: true,
                existing: None,
                doc: None,
            });
            continue;
        };

        claimed.insert(id);
        let node = design.sheet(id);
        let key = element_key(located.element, located.data.data.uuid.as_deref());
        let deltas: Vec<Delta> = (located.data.data.name != desired.name)
            .then(|| Delta::new("name", located.data.data.name.as_str(), desired.name.as_str()))
            .into_iter()
            .collect();
        let op = if deltas.is_empty() {
            Op::Keep { id: key, old: located }
        } else {
            Op::Update {
                id: key,
                old: located,
                new: desired,
                deltas,
            }
        };
        changeset.sheets.push(scoped(op));

        if node.primary {
            scopes.push(Scope {
                active: true,
                existing: Some(id),
                doc: Some(node.doc),
            });
        } else {
            // The loader already reported the shared file.
            scopes.push(Scope {
                active: false,
                existing: Some(id),
                doc: None,
            });
        }
    }

    // Sheets the model no longer has.
    for (index, scope) in scopes.iter().enumerate() {
        let (true, Some(parent_id)) = (scope.active, scope.existing) else {
            continue;
        };
        for (id, _) in design.children(parent_id) {
            if claimed.contains(&id) {
                continue;
            }
            if let Some(located) = located_sheet(design, id) {
                changeset.sheets.push(Scoped {
                    sheet: index,
                    sheet_path: model.sheet(index).path.clone(),
                    op: Op::Remove {
                        id: element_key(located.element, located.data.data.uuid.as_deref()),
                        old: located,
                    },
                    folded: false,
                });
            }
        }
    }

    changeset.sheet_map = scopes.iter().map(|s| s.existing).collect();
    scopes
}

fn fingerprint_matches(component: &CanonicalComponent, symbol: &SymbolData) -> bool {
    symbol.lib_id == component.lib_id
        && symbol.value == component.value
        && symbol.footprint == component.footprint
        && component
            .properties
            .iter()
            .all(|(k, v)| symbol.properties.get(k) == Some(v))
}

fn pair_components<'d>(
    design: &'d Design,
    model: &CanonicalModel,
    scopes: &[Scope],
    ctx: &mut SyncContext<'_>,
) -> Vec<Pairing<'d>> {
    model
        .sheets
        .iter()
        .zip(scopes)
        .map(|(sheet, scope)| {
            let count = sheet.components.len();
            let Some(doc) = scope.doc.filter(|_| scope.active) else {
                return Pairing {
                    pairs: vec![None; count],
                    unmatched: Vec::new(),
                };
            };
            let existing: Vec<(ElementId, &SymbolData)> = design.doc(doc).components().collect();
            let mut claimed = vec![false; existing.len()];
            let mut pairs: Vec<Option<usize>> = vec![None; count];

            // 1. persistent id
            for (ci, component) in sheet.components.iter().enumerate() {
                if let Some(di) = existing
                    .iter()
                    .position(|(_, s)| s.uuid.as_deref() == Some(component.id.as_str()))
                    && !claimed[di]
                {
                    claimed[di] = true;
                    pairs[ci] = Some(di);
                }
            }

            // 2. explicit reference, for components without an author id
            for (ci, component) in sheet.components.iter().enumerate() {
                let Reference::Explicit(reference) = &component.reference else {
                    continue;
                };
                if pairs[ci].is_some() || component.explicit_id {
                    continue;
                }
                if let Some(di) = (0..existing.len())
                    .find(|&di| !claimed[di] && existing[di].1.reference == *reference)
                {
                    claimed[di] = true;
                    pairs[ci] = Some(di);
                }
            }

            // 3. fingerprint; anything but a one-to-one fit is ambiguous
            let candidates: Vec<Vec<usize>> = sheet
                .components
                .iter()
                .enumerate()
                .map(|(ci, component)| {
                    if pairs[ci].is_some() || component.explicit_id {
                        return Vec::new();
                    }
                    (0..existing.len())
                        .filter(|&di| !claimed[di] && fingerprint_matches(component, existing[di].1))
                        .collect()
                })
                .collect();
            let mut claims = vec![0usize; existing.len()];
            for &di in candidates.iter().flatten() {
                claims[di] += 1;
            }
            for (ci, list) in candidates.iter().enumerate() {
                match list.as_slice() {
                    [] => {}
                    [di] if claims[*di] == 1 => {
                        claimed[*di] = true;
                        pairs[ci] = Some(*di);
                    }
                    _ => {
                        let rivals = list.iter().map(|di| claims[*di]).max().unwrap_or(0);
                        ctx.warn(
                            SyncError::AmbiguousMatch {
                                entity: format!("{}:{}", sheet.path, sheet.components[ci].name),
                                candidates: list.len().max(rivals),
                            }
                            .to_string(),
                        );
                    }
                }
            }

            Pairing {
                pairs: pairs.into_iter().map(|p| p.map(|di| existing[di])).collect(),
                unmatched: existing
                    .iter()
                    .zip(&claimed)
                    .filter(|(_, claimed)| !**claimed)
                    .map(|(e, _)| *e)
                    .collect(),
            }
        })
        .collect()
}

fn assign_references(
    design: &Design,
    model: &CanonicalModel,
    scopes: &[Scope],
    pairings: &[Pairing<'_>],
    ctx: &mut SyncContext<'_>,
) -> Vec<Vec<String>> {
    let alloc = &mut ctx.refdes;
    for (_, doc) in design.docs() {
        for (_, symbol) in doc.symbols().filter(|(_, s)| s.is_power()) {
            alloc.reserve(&symbol.reference);
        }
    }

    let active = move || {
        model
            .sheets
            .iter()
            .enumerate()
            .filter(move |(i, _)| scopes[*i].active)
    };
    for (_, sheet) in active() {
        for component in &sheet.components {
            if let Reference::Explicit(reference) = &component.reference {
                alloc.reserve(reference);
            }
        }
    }
    if ctx.config.preserve_unmatched {
        for pairing in pairings {
            for (_, symbol) in &pairing.unmatched {
                alloc.reserve(&symbol.reference);
            }
        }
    }

    let mut out: Vec<Vec<Option<String>>> = model
        .sheets
        .iter()
        .map(|s| vec![None; s.components.len()])
        .collect();
    let mut pending = Vec::new();
    for (index, sheet) in active() {
        for (ci, component) in sheet.components.iter().enumerate() {
            match &component.reference {
                Reference::Explicit(reference) => out[index][ci] = Some(reference.clone()),
                Reference::Auto { prefix } => {
                    // Keep what the document says when it still fits.
                    let kept = pairings[index].pairs[ci].map(|(_, s)| s.reference.as_str()).filter(|r| {
                        parse_reference(r).is_some_and(|p| p.prefix == *prefix) && alloc.reserve(r)
                    });
                    match kept {
                        Some(reference) => out[index][ci] = Some(reference.to_string()),
                        None => pending.push((index, ci, prefix.as_str())),
                    }
                }
            }
        }
    }

    pending.sort_by(|a, b| {
        natord::compare(&model.sheet(a.0).path, &model.sheet(b.0).path).then_with(|| {
            natord::compare(
                &model.sheet(a.0).components[a.1].name,
                &model.sheet(b.0).components[b.1].name,
            )
        })
    });
    for (index, ci, prefix) in pending {
        out[index][ci] = Some(alloc.next(prefix));
    }

    out.into_iter()
        .map(|sheet| sheet.into_iter().map(Option::unwrap_or_default).collect())
        .collect()
}

fn desired_components(model: &CanonicalModel, index: usize, references: &[String]) -> Vec<DesiredComponent> {
    let sheet = model.sheet(index);
    sheet
        .components
        .iter()
        .enumerate()
        .map(|(ci, c)| {
            let mut pins: Vec<String> = Vec::new();
            let mut peers: Vec<String> = Vec::new();
            for net in &sheet.nets {
                let on_net: Vec<&String> = net
                    .pins
                    .iter()
                    .filter(|(name, _)| *name == c.name)
                    .map(|(_, pin)| pin)
                    .collect();
                if on_net.is_empty() {
                    continue;
                }
                pins.extend(on_net.into_iter().cloned());
                for (name, _) in &net.pins {
                    if let Some(peer) = sheet.component(name).filter(|p| p.name != c.name)
                        && !peers.contains(&peer.id)
                    {
                        peers.push(peer.id.clone());
                    }
                }
            }
            pins.sort_by(|a, b| natord::compare(a, b));
            pins.dedup();

            DesiredComponent {
                key: c.id.clone(),
                name: c.name.clone(),
                reference: references[ci].clone(),
                lib_id: c.lib_id.clone(),
                value: c.value.clone(),
                footprint: c.footprint.clone(),
                properties: c.properties.clone(),
                rotation: c.rotation,
                pins,
                peers,
            }
        })
        .collect()
}

fn component_deltas(old: &SymbolData, new: &DesiredComponent) -> Vec<Delta> {
    let mut deltas = Vec::new();
    for (field, before, after) in [
        ("reference", &old.reference, &new.reference),
        ("value", &old.value, &new.value),
        ("footprint", &old.footprint, &new.footprint),
        ("lib_id", &old.lib_id, &new.lib_id),
    ] {
        if before != after {
            deltas.push(Delta::new(field, before.as_str(), after.as_str()));
        }
    }
    for (name, value) in &new.properties {
        let before = old.properties.get(name);
        if before != Some(value) {
            deltas.push(Delta::new(
                name.as_str(),
                before.map_or("-", String::as_str),
                value.as_str(),
            ));
        }
    }
    if let Some(rotation) = new.rotation
        && normalize_angle(rotation) != normalize_angle(old.rotation)
    {
        deltas.push(Delta::new(
            "rotation",
            format_number(old.rotation),
            format_number(normalize_angle(rotation)),
        ));
    }
    deltas
}

fn component_ops(
    index: usize,
    path: &str,
    scope: &Scope,
    pairing: &Pairing<'_>,
    desired: Vec<DesiredComponent>,
    ctx: &mut SyncContext<'_>,
    changeset: &mut Changeset,
) {
    let scoped = |op: ComponentOp| Scoped {
        sheet: index,
        sheet_path: path.to_string(),
        op,
        folded: false,
    };

    for (new, pair) in desired.into_iter().zip(&pairing.pairs) {
        let op = match (pair, scope.doc) {
            (Some((element, symbol)), Some(doc)) => {
                changeset.resolved.insert(new.key.clone(), (doc, *element));
                let id = element_key(*element, symbol.uuid.as_deref());
                let deltas = component_deltas(symbol, &new);
                let old = Located {
                    doc,
                    element: *element,
                    data: (*symbol).clone(),
                };
                if deltas.is_empty() {
                    Op::Keep { id, old }
                } else {
                    Op::Update { id, old, new, deltas }
                }
            }
            _ => Op::Add(new),
        };
        changeset.components.push(scoped(op));
    }

    let Some(doc) = scope.doc else {
        return;
    };
    for (element, symbol) in &pairing.unmatched {
        let id = element_key(*element, symbol.uuid.as_deref());
        let old = Located {
            doc,
            element: *element,
            data: (*symbol).clone(),
        };
        let op = if ctx.config.preserve_unmatched {
            ctx.warn(format!(
                "{} in {path} is not in code and was kept",
                symbol.reference
            ));
            Op::Keep { id, old }
        } else {
            Op::Remove { id, old }
        };
        changeset.components.push(scoped(op));
    }
}

/// Anchor key under which document markers on an unmatched symbol are filed.
fn orphan_key(element: ElementId, symbol: &SymbolData) -> String {
    format!("~{}", element_key(element, symbol.uuid.as_deref()))
}

#[allow(clippy::too_many_arguments)]
fn label_ops(
    design: &Design,
    model: &CanonicalModel,
    index: usize,
    scopes: &[Scope],
    pairing: &Pairing<'_>,
    references: &[String],
    ctx: &SyncContext<'_>,
    oracle: &dyn GeometryOracle,
    changeset: &mut Changeset,
) -> Result<()> {
    let sheet = model.sheet(index);
    let scoped = |op: LabelOp| Scoped {
        sheet: index,
        sheet_path: sheet.path.clone(),
        op,
        folded: false,
    };

    // Desired markers, anchored by persistent keys.
    let desired: Vec<DesiredLabel> = desired_markers(model, index)
        .into_iter()
        .map(|marker| {
            let anchor = match marker.endpoint {
                Endpoint::Pin { component, pin } => AnchorRef::Pin {
                    component: sheet.components[component].id.clone(),
                    reference: references[component].clone(),
                    pin,
                },
                Endpoint::SheetPin { child, port } => AnchorRef::SheetPin {
                    sheet: model.sheet(child).id.clone(),
                    port,
                },
                Endpoint::Free => AnchorRef::Free,
            };
            DesiredLabel {
                net: marker.net,
                kind: marker.kind,
                shape: marker.shape,
                anchor,
            }
        })
        .collect();

    let Some(doc_id) = scopes[index].doc else {
        changeset
            .labels
            .extend(desired.into_iter().map(|d| scoped(Op::Add(d))));
        return Ok(());
    };

    // Document markers, anchored the same way.
    let mut symbols: HashMap<ElementId, Option<(String, String)>> = HashMap::new();
    for (ci, pair) in pairing.pairs.iter().enumerate() {
        if let Some((element, symbol)) = pair {
            symbols.insert(
                *element,
                Some((sheet.components[ci].id.clone(), symbol.reference.clone())),
            );
        }
    }
    for (element, symbol) in &pairing.unmatched {
        // Markers on kept-but-unknown symbols are left alone.
        let entry = (!ctx.config.preserve_unmatched)
            .then(|| (orphan_key(*element, symbol), symbol.reference.clone()));
        symbols.insert(*element, entry);
    }
    let mut sheet_symbols: HashMap<ElementId, String> = HashMap::new();
    for &child in &sheet.children {
        if let Some(element) = scopes[child].existing.and_then(|id| design.sheet(id).symbol) {
            sheet_symbols.insert(element, model.sheet(child).id.clone());
        }
    }

    let markers: Vec<DocMarker> = document_markers(design.doc(doc_id), oracle);
    let mut existing: Vec<Located<DocLabel>> = Vec::with_capacity(markers.len());
    for marker in markers {
        let anchor = match &marker.target {
            None => AnchorRef::Free,
            Some(AnchorTarget::Pin { element, pin }) => match symbols.get(element) {
                Some(Some((component, reference))) => AnchorRef::Pin {
                    component: component.clone(),
                    reference: reference.clone(),
                    pin: pin.clone(),
                },
                Some(None) => continue,
                None => {
                    return Err(SyncError::invariant(
                        format!("{}:{}", sheet.path, marker.text),
                        "marker anchored on a symbol outside the pairing",
                    ));
                }
            },
            Some(AnchorTarget::SheetPin { element, pin }) => AnchorRef::SheetPin {
                sheet: sheet_symbols
                    .get(element)
                    .cloned()
                    .unwrap_or_else(|| format!("~{}", element.index())),
                port: pin.clone(),
            },
        };
        existing.push(Located {
            doc: doc_id,
            element: marker.element,
            data: DocLabel {
                kind: marker.kind,
                text: marker.text,
                at: marker.at,
                rotation: marker.rotation,
                shape: marker.shape,
                uuid: marker.uuid,
                anchor,
            },
        });
    }

    let mut used = vec![false; existing.len()];
    for want in desired {
        let found = match want.anchor.key() {
            Some(key) => {
                let at_anchor: Vec<usize> = (0..existing.len())
                    .filter(|&i| !used[i] && existing[i].data.anchor.key().as_deref() == Some(key.as_str()))
                    .collect();
                at_anchor
                    .iter()
                    .copied()
                    .find(|&i| existing[i].data.text == want.net && existing[i].data.kind.satisfies(want.kind))
                    .or_else(|| at_anchor.iter().copied().find(|&i| existing[i].data.text == want.net))
                    .or_else(|| at_anchor.first().copied())
            }
            // Free-standing markers are only recognized by text.
            None => (0..existing.len()).find(|&i| {
                let label = &existing[i].data;
                !used[i]
                    && label.anchor == AnchorRef::Free
                    && label.kind == want.kind
                    && label.text == want.net
            }),
        };

        let op = match found {
            Some(i) => {
                used[i] = true;
                let old = existing[i].clone();
                let id = element_key(old.element, old.data.uuid.as_deref());
                let deltas = label_deltas(&old.data, &want);
                if deltas.is_empty() {
                    Op::Keep { id, old }
                } else {
                    Op::Update {
                        id,
                        old,
                        new: want,
                        deltas,
                    }
                }
            }
            None => Op::Add(want),
        };
        changeset.labels.push(scoped(op));
    }

    // Leftover markers on managed anchors go. Free-standing ones stay, except
    // extra hierarchical labels for a port that already has its one label.
    let exported = |text: &str| !sheet.is_root() && sheet.net(text).is_some_and(|n| n.port.is_some());
    for (i, old) in existing.into_iter().enumerate() {
        if used[i] {
            continue;
        }
        if old.data.anchor == AnchorRef::Free
            && !(old.data.kind == LabelKind::Hierarchical && exported(&old.data.text))
        {
            continue;
        }
        let id = element_key(old.element, old.data.uuid.as_deref());
        changeset.labels.push(scoped(Op::Remove { id, old }));
    }
    Ok(())
}

fn label_deltas(old: &DocLabel, new: &DesiredLabel) -> Vec<Delta> {
    let mut deltas = Vec::new();
    if old.text != new.net {
        deltas.push(Delta::new("net", old.text.as_str(), new.net.as_str()));
    }
    if !old.kind.satisfies(new.kind) {
        deltas.push(Delta::new("kind", old.kind.to_string(), new.kind.to_string()));
    }
    if new.kind == LabelKind::Hierarchical
        && old.kind == LabelKind::Hierarchical
        && let Some(shape) = new.shape
        && old.shape != Some(shape)
    {
        deltas.push(Delta::new(
            "shape",
            old.shape.map_or("-", |s| s.as_str()),
            shape.as_str(),
        ));
    }
    deltas
}

fn sheet_pin_ops(
    design: &Design,
    model: &CanonicalModel,
    index: usize,
    scope: &Scope,
    changeset: &mut Changeset,
) {
    let sheet = model.sheet(index);
    let Some(parent) = sheet.parent else {
        return;
    };
    let scoped = |op: SheetPinOp| Scoped {
        sheet: parent,
        sheet_path: model.sheet(parent).path.clone(),
        op,
        folded: false,
    };
    let desired = |port: &PortDecl| DesiredSheetPin {
        sheet_key: sheet.id.clone(),
        child: index,
        name: port.name.clone(),
        shape: port.shape,
    };

    let Some(located) = scope.existing.and_then(|id| located_sheet(design, id)) else {
        changeset
            .sheet_pins
            .extend(sheet.ports.iter().map(|p| scoped(Op::Add(desired(p)))));
        return;
    };

    let pin_key = |pin: &SheetPinData| {
        pin.uuid
            .clone()
            .unwrap_or_else(|| format!("{}/{}", sheet.id, pin.name))
    };
    for port in &sheet.ports {
        let op = match located.data.data.pin(&port.name) {
            Some(pin) => {
                let old = Located {
                    doc: located.doc,
                    element: located.element,
                    data: pin.clone(),
                };
                if pin.shape == port.shape {
                    Op::Keep {
                        id: pin_key(pin),
                        old,
                    }
                } else {
                    Op::Update {
                        id: pin_key(pin),
                        old,
                        new: desired(port),
                        deltas: vec![Delta::new("shape", pin.shape.as_str(), port.shape.as_str())],
                    }
                }
            }
            None => Op::Add(desired(port)),
        };
        changeset.sheet_pins.push(scoped(op));
    }
    for pin in &located.data.data.pins {
        if sheet.ports.iter().any(|p| p.name == pin.name) {
            continue;
        }
        changeset.sheet_pins.push(scoped(Op::Remove {
            id: pin_key(pin),
            old: Located {
                doc: located.doc,
                element: located.element,
                data: pin.clone(),
            },
        }));
    }
}

/// Marker changes on a component that is itself added, removed or updated are
/// reported with that component instead of on their own.
fn fold_label_changes(changeset: &mut Changeset) {
    let mut owners: HashMap<String, usize> = HashMap::new();
    for (i, scoped) in changeset.components.iter().enumerate() {
        let key = match &scoped.op {
            Op::Add(new) | Op::Update { new, .. } => new.key.clone(),
            Op::Keep { .. } => continue,
            Op::Remove { old, .. } => orphan_key(old.element, &old.data),
        };
        owners.insert(format!("{}#{key}", scoped.sheet), i);
    }

    for label in &mut changeset.labels {
        if label.op.kind() == OpKind::Keep {
            continue;
        }
        let anchor = label
            .op
            .desired()
            .map(|d| &d.anchor)
            .or_else(|| label.op.existing().map(|e| &e.data.anchor));
        let Some(AnchorRef::Pin { component, pin, .. }) = anchor else {
            continue;
        };
        let Some(&owner) = owners.get(&format!("{}#{component}", label.sheet)) else {
            continue;
        };
        label.folded = true;
        if let Op::Update { deltas, .. } = &mut changeset.components[owner].op {
            let describe = |text: &str, kind: LabelKind| format!("{text} ({kind})");
            let before = label
                .op
                .existing()
                .map_or("-".to_string(), |e| describe(&e.data.text, e.data.kind));
            let after = label
                .op
                .desired()
                .map_or("-".to_string(), |d| describe(&d.net, d.kind));
            deltas.push(Delta::new(format!("net {pin}"), before, after));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::canonical::{Block, CircuitDescription, ComponentDecl, NetDecl, PinRef, build};
    use crate::config::SyncConfig;
    use crate::document::Schematic;
    use crate::geometry::{BoundingBox, StaticGeometry};
    use crate::library::EmptyLibrary;

    const DOC: &str = r#"(kicad_sch
	(version 20231120)
	(uuid "0f0e0d0c-0000-4000-8000-000000000000")
	(symbol (lib_id "Device:R") (at 100 50 0) (uuid "00000000-0000-4000-8000-0000000000c1")
		(property "Reference" "R1") (property "Value" "10k")
		(pin "1" (uuid "p1")) (pin "2" (uuid "p2")))
	(symbol (lib_id "Device:R") (at 120 50 0) (uuid "00000000-0000-4000-8000-0000000000c2")
		(property "Reference" "R2") (property "Value" "10k")
		(pin "1" (uuid "p3")) (pin "2" (uuid "p4")))
	(label "DATA" (at 100 46.19 0) (uuid "l1"))
	(label "DATA" (at 120 46.19 0) (uuid "l2"))
)
"#;

    const C1: &str = "00000000-0000-4000-8000-0000000000c1";
    const C2: &str = "00000000-0000-4000-8000-0000000000c2";

    fn oracle() -> StaticGeometry {
        StaticGeometry::new().with_symbol(
            "Device:R",
            BoundingBox::new(-1.0, -3.81, 1.0, 3.81),
            &[("1", 0.0, -3.81), ("2", 0.0, 3.81)],
        )
    }

    fn resistor(name: &str, id: Option<&str>, reference: Option<&str>, value: &str) -> ComponentDecl {
        ComponentDecl {
            name: name.to_string(),
            id: id.map(str::to_string),
            reference: reference.map(str::to_string),
            symbol: "Device:R".to_string(),
            value: Some(value.to_string()),
            ..Default::default()
        }
    }

    fn model(components: Vec<ComponentDecl>, data: &[&str]) -> CanonicalModel {
        build(&CircuitDescription {
            name: "demo".to_string(),
            root: Block {
                components,
                nets: vec![NetDecl {
                    name: "DATA".to_string(),
                    connections: data
                        .iter()
                        .map(|c| PinRef {
                            component: c.to_string(),
                            pin: "1".to_string(),
                        })
                        .collect(),
                    ..Default::default()
                }],
                ..Default::default()
            },
            blocks: BTreeMap::new(),
        })
        .unwrap()
    }

    fn run(model: &CanonicalModel) -> (Changeset, Vec<String>) {
        let design = Design::new(Schematic::parse("demo.kicad_sch", DOC.to_string()).unwrap());
        let oracle = oracle();
        let mut ctx = SyncContext::new(SyncConfig::default(), &oracle, &EmptyLibrary);
        let changeset = diff(&design, model, &mut ctx, &oracle).unwrap();
        (changeset, ctx.warnings().to_vec())
    }

    fn kinds<T>(ops: &[Scoped<T>], kind: impl Fn(&T) -> OpKind) -> Vec<OpKind> {
        ops.iter().map(|s| kind(&s.op)).collect()
    }

    #[test]
    fn persistent_id_makes_renames_updates() {
        let model = model(
            vec![
                resistor("a", Some(C1), Some("R7"), "10k"),
                resistor("b", Some(C2), Some("R2"), "10k"),
            ],
            &["a", "b"],
        );
        let (changeset, _) = run(&model);
        assert_eq!(
            kinds(&changeset.components, |op| op.kind()),
            vec![OpKind::Update, OpKind::Keep]
        );
        let Op::Update { deltas, .. } = &changeset.components[0].op else {
            unreachable!()
        };
        assert_eq!(deltas, &vec![Delta::new("reference", "R1", "R7")]);
        // The label on R7 is unchanged, so nothing to fold.
        assert!(changeset.labels.iter().all(|l| l.op.kind() == OpKind::Keep));
    }

    #[test]
    fn explicit_references_match_without_ids() {
        let model = model(
            vec![
                resistor("a", None, Some("R1"), "20k"),
                resistor("b", None, Some("R2"), "10k"),
            ],
            &["a", "b"],
        );
        let (changeset, warnings) = run(&model);
        assert!(warnings.is_empty(), "{warnings:?}");
        let Op::Update { id, deltas, .. } = &changeset.components[0].op else {
            panic!("expected an update")
        };
        assert_eq!(id, C1);
        assert_eq!(deltas[0].to_string(), "value 10k→20k");
    }

    #[test]
    fn identical_fingerprints_are_ambiguous() {
        let model = model(vec![resistor("a", None, None, "10k")], &[]);
        let (changeset, warnings) = run(&model);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("ambiguous match for /:a"), "{}", warnings[0]);
        assert_eq!(
            kinds(&changeset.components, |op| op.kind()),
            vec![OpKind::Add, OpKind::Remove, OpKind::Remove]
        );
        // Labels of removed parts are folded into their removal.
        assert!(changeset.labels.iter().all(|l| l.folded));
    }

    #[test]
    fn dropped_connection_removes_one_label() {
        let model = model(
            vec![
                resistor("a", None, Some("R1"), "10k"),
                resistor("b", None, Some("R2"), "10k"),
            ],
            &["a"],
        );
        let (changeset, _) = run(&model);
        assert_eq!(
            kinds(&changeset.components, |op| op.kind()),
            vec![OpKind::Keep, OpKind::Keep]
        );
        assert_eq!(
            kinds(&changeset.labels, |op| op.kind()),
            vec![OpKind::Keep, OpKind::Remove]
        );
        assert_eq!(changeset.labels[1].op.id(), Some("l2"));
        assert!(!changeset.labels[1].folded);
    }

    #[test]
    fn auto_references_keep_matched_designators() {
        let model = model(
            vec![
                resistor("a", Some(C2), None, "10k"),
                resistor("new", None, None, "1k"),
            ],
            &[],
        );
        let (changeset, _) = run(&model);
        assert_eq!(
            kinds(&changeset.components, |op| op.kind()),
            vec![OpKind::Keep, OpKind::Add, OpKind::Remove]
        );
        assert_eq!(changeset.components[0].op.id(), Some(C2));
        // R1 is being removed, so its number is free again.
        let added = changeset.components[1].op.desired().unwrap();
        assert_eq!(added.reference, "R1");
        assert_eq!(changeset.components[2].op.id(), Some(C1));
    }
}
