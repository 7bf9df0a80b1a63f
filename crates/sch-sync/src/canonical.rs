//! The authored circuit description and its expansion into sheets.
//!
//! [`CircuitDescription`] is what the authoring layer hands over (usually as
//! JSON). [`build`] expands every subcircuit call into its own sheet instance
//! and validates the references between blocks, components, nets and ports,
//! so later stages never see a dangling name.

use std::collections::{BTreeMap, HashMap, HashSet};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::document::PinShape;
use crate::error::{Result, SyncError};
use crate::ids::stable_uuid;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CircuitDescription {
    pub name: String,
    pub root: Block,
    #[serde(default)]
    pub blocks: BTreeMap<String, Block>,
}

impl CircuitDescription {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| SyncError::Canonical(e.to_string()))
    }
}

/// A reusable subcircuit, or the top level of the design.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Block {
    pub components: Vec<ComponentDecl>,
    pub nets: Vec<NetDecl>,
    pub ports: Vec<PortDecl>,
    pub subcircuits: Vec<SubcircuitCall>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComponentDecl {
    pub name: String,
    /// Persistent identity token chosen by the author
    #[serde(default)]
    pub id: Option<String>,
    /// Explicit reference designator
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
    /// Library symbol id, e.g. `Device:R`
    pub symbol: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub footprint: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub rotation: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetScope {
    #[default]
    Local,
    Global,
    Power,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetDecl {
    pub name: String,
    #[serde(default)]
    pub scope: NetScope,
    #[serde(default)]
    pub connections: Vec<PinRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinRef {
    pub component: String,
    pub pin: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PortDecl {
    pub name: String,
    #[serde(default)]
    pub shape: PinShape,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubcircuitCall {
    pub block: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    /// Child port name to parent net name
    #[serde(default)]
    pub connections: BTreeMap<String, String>,
}

/// A reference designator as the author specified it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Explicit(String),
    /// Numbered by the synchronizer
    Auto { prefix: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalComponent {
    pub name: String,
    /// Persistent id: the author's token mapped to a UUID, or derived from the name
    pub id: String,
    /// Whether the author supplied the id
    pub explicit_id: bool,
    pub reference: Reference,
    pub lib_id: String,
    pub value: String,
    pub footprint: String,
    pub properties: BTreeMap<String, String>,
    pub rotation: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalNet {
    pub name: String,
    pub scope: NetScope,
    /// `(component name, pin)` pairs
    pub pins: Vec<(String, String)>,
    /// Set when the net is exposed through a block port
    pub port: Option<PinShape>,
}

/// One expanded sheet instance.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalSheet {
    pub name: String,
    /// `/` for the root, `/power_1/ldo_1` below it
    pub path: String,
    pub file: String,
    pub block: String,
    pub parent: Option<usize>,
    /// Persistent id of the sheet symbol in the parent
    pub id: String,
    pub explicit_id: bool,
    pub components: Vec<CanonicalComponent>,
    pub nets: Vec<CanonicalNet>,
    pub ports: Vec<PortDecl>,
    pub children: Vec<usize>,
    /// Port name to the parent net it is connected to
    pub bindings: BTreeMap<String, String>,
}

impl CanonicalSheet {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn component(&self, name: &str) -> Option<&CanonicalComponent> {
        self.components.iter().find(|c| c.name == name)
    }

    pub fn net(&self, name: &str) -> Option<&CanonicalNet> {
        self.nets.iter().find(|n| n.name == name)
    }
}

/// The desired design, sheets in depth-first order with the root first.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalModel {
    pub name: String,
    pub sheets: Vec<CanonicalSheet>,
}

impl CanonicalModel {
    pub fn root(&self) -> &CanonicalSheet {
        &self.sheets[0]
    }

    pub fn sheet(&self, index: usize) -> &CanonicalSheet {
        &self.sheets[index]
    }

    /// Every library symbol id used anywhere in the design.
    pub fn lib_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .sheets
            .iter()
            .flat_map(|s| s.components.iter().map(|c| c.lib_id.as_str()))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

/// Reference prefix for a component without an explicit designator.
pub fn reference_prefix(explicit: Option<&str>, lib_id: &str) -> String {
    if let Some(prefix) = explicit.filter(|p| !p.is_empty()) {
        return prefix.to_string();
    }
    let name = lib_id.rsplit(':').next().unwrap_or(lib_id);
    let letters: String = name
        .chars()
        .take_while(|c| c.is_ascii_uppercase())
        .collect();
    if letters.is_empty() {
        "U".to_string()
    } else {
        letters
    }
}

/// Expand a circuit description into sheets.
pub fn build(desc: &CircuitDescription) -> Result<CanonicalModel> {
    if desc.name.is_empty() {
        return Err(SyncError::Canonical("design name is empty".into()));
    }
    let mut builder = Builder {
        desc,
        sheets: Vec::new(),
        counters: HashMap::new(),
        stack: Vec::new(),
    };
    builder.expand(Instance {
        block_name: "<root>".to_string(),
        block: &desc.root,
        parent: None,
        name: desc.name.clone(),
        path: "/".to_string(),
        file: format!("{}.kicad_sch", desc.name),
        id: stable_uuid("/", &format!("root:{}", desc.name)).to_string(),
        explicit_id: false,
        bindings: BTreeMap::new(),
    })?;

    debug!(
        "Canonical model {}: {} sheets, {} components",
        desc.name,
        builder.sheets.len(),
        builder.sheets.iter().map(|s| s.components.len()).sum::<usize>()
    );
    Ok(CanonicalModel {
        name: desc.name.clone(),
        sheets: builder.sheets,
    })
}

struct Instance<'a> {
    block_name: String,
    block: &'a Block,
    parent: Option<usize>,
    name: String,
    path: String,
    file: String,
    id: String,
    explicit_id: bool,
    bindings: BTreeMap<String, String>,
}

struct Builder<'a> {
    desc: &'a CircuitDescription,
    sheets: Vec<CanonicalSheet>,
    /// Per-block instance counters for auto-naming
    counters: HashMap<String, usize>,
    /// Blocks currently being expanded
    stack: Vec<String>,
}

impl<'a> Builder<'a> {
    fn expand(&mut self, instance: Instance<'a>) -> Result<usize> {
        let Instance {
            block_name,
            block,
            parent,
            name,
            path,
            file,
            id,
            explicit_id,
            bindings,
        } = instance;

        let components = components(block, &path)?;
        let nets = nets(block, &path, &components)?;

        let index = self.sheets.len();
        self.sheets.push(CanonicalSheet {
            name,
            path: path.clone(),
            file,
            block: block_name.clone(),
            parent,
            id,
            explicit_id,
            components,
            nets,
            ports: block.ports.clone(),
            children: Vec::new(),
            bindings,
        });

        let desc = self.desc;
        self.stack.push(block_name);
        let mut sibling_names = HashSet::new();
        let mut sibling_ids = HashSet::new();
        for call in &block.subcircuits {
            let child_block = desc.blocks.get(&call.block).ok_or_else(|| {
                SyncError::Canonical(format!("{path}: unknown block {}", call.block))
            })?;
            if self.stack.contains(&call.block) {
                return Err(SyncError::Canonical(format!(
                    "{path}: block {} instantiates itself",
                    call.block
                )));
            }

            let name = match &call.name {
                Some(name) => name.clone(),
                None => {
                    let n = self.counters.entry(call.block.clone()).or_insert(0);
                    *n += 1;
                    format!("{}_{n}", call.block)
                }
            };
            if name.is_empty() || name.contains('/') {
                return Err(SyncError::Canonical(format!(
                    "{path}: invalid sheet name {name:?}"
                )));
            }
            if !sibling_names.insert(name.clone()) {
                return Err(SyncError::Canonical(format!(
                    "{path}: two subcircuits are named {name}"
                )));
            }
            if let Some(id) = call.id.as_deref()
                && !sibling_ids.insert(id)
            {
                return Err(SyncError::Canonical(format!(
                    "{path}: two subcircuits have id {id}"
                )));
            }

            for (port, net) in &call.connections {
                if !child_block.ports.iter().any(|p| &p.name == port) {
                    return Err(SyncError::Canonical(format!(
                        "{path}: block {} has no port {port}",
                        call.block
                    )));
                }
                if self.sheets[index].net(net).is_none() {
                    return Err(SyncError::Canonical(format!(
                        "{path}: subcircuit {name} connects {port} to unknown net {net}"
                    )));
                }
            }

            let child_path = if path == "/" {
                format!("/{name}")
            } else {
                format!("{path}/{name}")
            };
            let file = format!("{}.kicad_sch", child_path[1..].replace('/', "_"));
            let token = call
                .id
                .clone()
                .unwrap_or_else(|| format!("sheet:{name}"));
            let child = self.expand(Instance {
                block_name: call.block.clone(),
                block: child_block,
                parent: Some(index),
                name,
                path: child_path,
                file,
                id: stable_uuid(&path, &token).to_string(),
                explicit_id: call.id.is_some(),
                bindings: call.connections.clone(),
            })?;
            self.sheets[index].children.push(child);
        }
        self.stack.pop();
        Ok(index)
    }
}

fn components(block: &Block, path: &str) -> Result<Vec<CanonicalComponent>> {
    let mut names = HashSet::new();
    let mut references = HashSet::new();
    let mut ids = HashSet::new();
    let mut out = Vec::with_capacity(block.components.len());
    for decl in &block.components {
        if !names.insert(decl.name.as_str()) {
            return Err(SyncError::Canonical(format!(
                "{path}: two components are named {}",
                decl.name
            )));
        }
        if decl.symbol.is_empty() {
            return Err(SyncError::Canonical(format!(
                "{path}: component {} has no symbol",
                decl.name
            )));
        }

        let reference = match decl.reference.as_deref().filter(|r| !r.is_empty()) {
            Some(reference) => {
                if !references.insert(reference) {
                    return Err(SyncError::DuplicateReference {
                        reference: reference.to_string(),
                        sheet: path.to_string(),
                    });
                }
                Reference::Explicit(reference.to_string())
            }
            None => Reference::Auto {
                prefix: reference_prefix(decl.prefix.as_deref(), &decl.symbol),
            },
        };

        if let Some(id) = decl.id.as_deref()
            && !ids.insert(id)
        {
            return Err(SyncError::Canonical(format!(
                "{path}: two components have id {id}"
            )));
        }
        let token = decl
            .id
            .clone()
            .unwrap_or_else(|| format!("component:{}", decl.name));
        out.push(CanonicalComponent {
            name: decl.name.clone(),
            id: stable_uuid(path, &token).to_string(),
            explicit_id: decl.id.is_some(),
            reference,
            lib_id: decl.symbol.clone(),
            value: decl.value.clone().unwrap_or_default(),
            footprint: decl.footprint.clone().unwrap_or_default(),
            properties: decl.properties.clone(),
            rotation: decl.rotation,
        });
    }
    Ok(out)
}

fn nets(block: &Block, path: &str, components: &[CanonicalComponent]) -> Result<Vec<CanonicalNet>> {
    let mut seen_pins: HashMap<(&str, &str), &str> = HashMap::new();
    let mut out: Vec<CanonicalNet> = Vec::with_capacity(block.nets.len());
    for decl in &block.nets {
        if decl.name.is_empty() {
            return Err(SyncError::Canonical(format!("{path}: net without a name")));
        }
        if out.iter().any(|n| n.name == decl.name) {
            return Err(SyncError::Canonical(format!(
                "{path}: net {} is declared twice",
                decl.name
            )));
        }
        let mut pins = Vec::with_capacity(decl.connections.len());
        for conn in &decl.connections {
            if !components.iter().any(|c| c.name == conn.component) {
                return Err(SyncError::Canonical(format!(
                    "{path}: net {} references unknown component {}",
                    decl.name, conn.component
                )));
            }
            let key = (conn.component.as_str(), conn.pin.as_str());
            if let Some(other) = seen_pins.insert(key, decl.name.as_str())
                && other != decl.name
            {
                return Err(SyncError::Canonical(format!(
                    "{path}: pin {}.{} is on nets {other} and {}",
                    conn.component, conn.pin, decl.name
                )));
            }
            pins.push((conn.component.clone(), conn.pin.clone()));
        }
        pins.dedup();
        out.push(CanonicalNet {
            name: decl.name.clone(),
            scope: decl.scope,
            pins,
            port: None,
        });
    }

    for port in &block.ports {
        match out.iter_mut().find(|n| n.name == port.name) {
            Some(net) if net.scope != NetScope::Local => {
                return Err(SyncError::Canonical(format!(
                    "{path}: port {} must be a local net",
                    port.name
                )));
            }
            Some(net) => net.port = Some(port.shape),
            None => out.push(CanonicalNet {
                name: port.name.clone(),
                scope: NetScope::Local,
                pins: Vec::new(),
                port: Some(port.shape),
            }),
        }
    }
    Ok(out)
}
