//! Nets as markers on pins.
//!
//! Neither side has first-class net objects in the drawing. The canonical
//! side is turned into the set of markers (labels, power symbols) a sheet
//! should carry, each bound to an endpoint. The document side attaches every
//! existing marker to the pin or sheet pin it sits on.

use crate::canonical::{CanonicalModel, NetScope};
use crate::document::{LabelKind, PinShape, Schematic, SymbolData};
use crate::geometry::{GeometryOracle, Point, orient};
use crate::ids::ElementId;

/// Where a desired marker goes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Endpoint {
    /// Index into the sheet's components
    Pin { component: usize, pin: String },
    /// Sheet pin on the symbol of child sheet `child`
    SheetPin { child: usize, port: String },
    /// Not attached to anything; placed by the engine
    Free,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NetMarker {
    pub net: String,
    pub kind: LabelKind,
    pub shape: Option<PinShape>,
    pub endpoint: Endpoint,
}

/// Markers sheet `index` of `model` should carry.
///
/// Every endpoint of a net gets one marker. A port net of a child sheet puts
/// its hierarchical label on the first endpoint and local labels on the rest;
/// without endpoints the hierarchical label is free-standing.
pub fn desired_markers(model: &CanonicalModel, index: usize) -> Vec<NetMarker> {
    let sheet = model.sheet(index);
    let mut out = Vec::new();

    for net in &sheet.nets {
        let mut pins: Vec<(usize, &str)> = net
            .pins
            .iter()
            .filter_map(|(name, pin)| {
                let component = sheet.components.iter().position(|c| &c.name == name)?;
                Some((component, pin.as_str()))
            })
            .collect();
        pins.sort_by(|a, b| {
            natord::compare(&sheet.components[a.0].name, &sheet.components[b.0].name)
                .then_with(|| natord::compare(a.1, b.1))
        });

        let mut endpoints: Vec<Endpoint> = pins
            .into_iter()
            .map(|(component, pin)| Endpoint::Pin {
                component,
                pin: pin.to_string(),
            })
            .collect();
        for &child in &sheet.children {
            let mut ports: Vec<&String> = model
                .sheet(child)
                .bindings
                .iter()
                .filter(|(_, parent_net)| **parent_net == net.name)
                .map(|(port, _)| port)
                .collect();
            ports.sort_by(|a, b| natord::compare(a, b));
            endpoints.extend(ports.into_iter().map(|port| Endpoint::SheetPin {
                child,
                port: port.clone(),
            }));
        }

        let exported = net.port.filter(|_| !sheet.is_root());
        match net.scope {
            NetScope::Global | NetScope::Power => {
                let kind = if net.scope == NetScope::Global {
                    LabelKind::Global
                } else {
                    LabelKind::Power
                };
                out.extend(endpoints.into_iter().map(|endpoint| NetMarker {
                    net: net.name.clone(),
                    kind,
                    shape: None,
                    endpoint,
                }));
            }
            NetScope::Local => {
                if endpoints.is_empty() && exported.is_some() {
                    endpoints.push(Endpoint::Free);
                }
                for (i, endpoint) in endpoints.into_iter().enumerate() {
                    let (kind, shape) = match exported {
                        Some(shape) if i == 0 => (LabelKind::Hierarchical, Some(shape)),
                        _ => (LabelKind::Local, None),
                    };
                    out.push(NetMarker {
                        net: net.name.clone(),
                        kind,
                        shape,
                        endpoint,
                    });
                }
            }
        }
    }
    out
}

/// A connection point in a document a marker can attach to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AnchorTarget {
    Pin { element: ElementId, pin: String },
    SheetPin { element: ElementId, pin: String },
}

/// A label or power symbol found in a document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocMarker {
    pub element: ElementId,
    pub kind: LabelKind,
    pub text: String,
    pub at: Point,
    pub rotation: f64,
    pub shape: Option<PinShape>,
    pub uuid: Option<String>,
    pub target: Option<AnchorTarget>,
}

impl DocMarker {
    /// Persistent id, or an element-local key for markers without one.
    pub fn key(&self) -> String {
        self.uuid
            .clone()
            .unwrap_or_else(|| format!("~{}", self.element.index()))
    }
}

/// Offset used for pins the oracle does not know: one grid step per pin
/// number below the origin, so distinct pins stay distinct.
fn fallback_pin_offset(pin: &str) -> Point {
    Point::new(0.0, 2.54 * pin.parse::<f64>().unwrap_or(0.0))
}

/// World position of `pin` on a placed symbol.
pub fn pin_position(oracle: &dyn GeometryOracle, symbol: &SymbolData, pin: &str) -> Point {
    let offset = oracle
        .pin_offset(&symbol.lib_id, pin)
        .unwrap_or_else(|| fallback_pin_offset(pin));
    symbol.at.offset(orient(offset, symbol.rotation, symbol.mirror))
}

/// Label angle pointing away from the symbol body at `pin`.
pub fn pin_label_rotation(oracle: &dyn GeometryOracle, symbol: &SymbolData, pin: &str) -> f64 {
    let offset = oracle
        .pin_offset(&symbol.lib_id, pin)
        .unwrap_or_else(|| fallback_pin_offset(pin));
    let dir = orient(offset, symbol.rotation, symbol.mirror);
    if dir.x.abs() >= dir.y.abs() {
        if dir.x < 0.0 { 180.0 } else { 0.0 }
    } else if dir.y < 0.0 {
        90.0
    } else {
        270.0
    }
}

/// Every connection point of a document, component pins first.
pub fn document_anchors(doc: &Schematic, oracle: &dyn GeometryOracle) -> Vec<(Point, AnchorTarget)> {
    let mut anchors = Vec::new();
    for (element, symbol) in doc.components() {
        for (pin, _) in &symbol.pins {
            anchors.push((
                pin_position(oracle, symbol, pin),
                AnchorTarget::Pin {
                    element,
                    pin: pin.clone(),
                },
            ));
        }
    }
    for (element, sheet) in doc.sheets() {
        for pin in &sheet.pins {
            anchors.push((
                pin.at,
                AnchorTarget::SheetPin {
                    element,
                    pin: pin.name.clone(),
                },
            ));
        }
    }
    anchors
}

/// Labels and power symbols of a document with the anchor each sits on.
pub fn document_markers(doc: &Schematic, oracle: &dyn GeometryOracle) -> Vec<DocMarker> {
    let anchors = document_anchors(doc, oracle);
    let attach = |at: Point| {
        anchors
            .iter()
            .find(|(p, _)| p.close_to(at))
            .map(|(_, target)| target.clone())
    };

    let mut out = Vec::new();
    for (element, e) in doc.elements() {
        let marker = if let Some(label) = e.as_label() {
            DocMarker {
                element,
                kind: label.kind,
                text: label.text.clone(),
                at: label.at,
                rotation: label.rotation,
                shape: label.shape,
                uuid: label.uuid.clone(),
                target: attach(label.at),
            }
        } else if let Some(symbol) = e.as_symbol().filter(|s| s.is_power()) {
            DocMarker {
                element,
                kind: LabelKind::Power,
                text: symbol.value.clone(),
                at: symbol.at,
                rotation: symbol.rotation,
                shape: None,
                uuid: symbol.uuid.clone(),
                target: attach(symbol.at),
            }
        } else {
            continue;
        };
        out.push(marker);
    }
    out
}
