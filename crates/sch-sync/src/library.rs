//! Symbol definitions for embedding into `(lib_symbols ...)`.

use std::collections::HashMap;

use sch_sexpr::{ParseError, Sexpr, SexprKind};

use crate::geometry::LibSymbolGeometry;

/// Supplies library symbol definitions by `lib_id`.
///
/// Returned definitions are named after the full `lib_id` (`"Device:R"`),
/// which is how KiCad stores them in a schematic's symbol cache.
pub trait SymbolLibrary: Sync {
    fn lib_symbol(&self, lib_id: &str) -> Option<Sexpr>;
}

/// A library that knows no symbols.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyLibrary;

impl SymbolLibrary for EmptyLibrary {
    fn lib_symbol(&self, _lib_id: &str) -> Option<Sexpr> {
        None
    }
}

/// In-memory library, typically loaded from `.kicad_sym` files.
#[derive(Debug, Clone, Default)]
pub struct StaticLibrary {
    symbols: HashMap<String, Sexpr>,
}

impl StaticLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a definition under `lib_id`, renaming its top-level symbol.
    pub fn insert(&mut self, lib_id: &str, mut def: Sexpr) {
        if let Some(name) = def.as_list_mut().and_then(|items| items.get_mut(1)) {
            name.kind = SexprKind::String(lib_id.to_string());
        }
        self.symbols.insert(lib_id.to_string(), def);
    }

    pub fn with_definition(mut self, lib_id: &str, def: Sexpr) -> Self {
        self.insert(lib_id, def);
        self
    }

    /// Load every symbol of a `(kicad_symbol_lib ...)` file under `nickname`.
    pub fn from_kicad_sym(nickname: &str, text: &str) -> Result<Self, ParseError> {
        let root = sch_sexpr::parse_document(text)?;
        let mut library = Self::new();
        for def in root.children_tagged("symbol") {
            let Some(name) = def.as_list().and_then(|l| l.get(1)).and_then(Sexpr::as_str) else {
                continue;
            };
            library.insert(&format!("{nickname}:{name}"), def.clone());
        }
        log::debug!("Loaded {} symbols from library {nickname}", library.len());
        Ok(library)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Pin geometry of every definition in the library.
    pub fn geometry(&self) -> LibSymbolGeometry {
        let mut geometry = LibSymbolGeometry::new();
        for def in self.symbols.values() {
            geometry.add_definition(def);
        }
        geometry
    }
}

impl SymbolLibrary for StaticLibrary {
    fn lib_symbol(&self, lib_id: &str) -> Option<Sexpr> {
        self.symbols.get(lib_id).cloned()
    }
}

/// Pin numbers declared anywhere in a symbol definition, in natural order.
pub fn pin_numbers(def: &Sexpr) -> Vec<String> {
    let mut numbers = Vec::new();
    def.walk(|node, ctx| {
        if node.tag() == Some("number")
            && ctx.parent_tag() == Some("pin")
            && let Some(number) = node.as_list().and_then(|l| l.get(1)).and_then(Sexpr::as_str)
            && !numbers.iter().any(|n| n == number)
        {
            numbers.push(number.to_string());
        }
    });
    numbers.sort_by(|a, b| natord::compare(a, b));
    numbers
}
