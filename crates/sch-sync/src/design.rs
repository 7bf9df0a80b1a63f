//! A whole schematic hierarchy: every loaded document plus the sheet tree.
//!
//! Documents and sheet nodes live in two arenas. A sheet node points at the
//! document holding its content and, for non-root sheets, at the sheet symbol
//! element in the parent document. Two sheet symbols referencing one file
//! share a document; only the first of them is synchronized.

use std::io;
use std::path::{Component, Path, PathBuf};

use log::{debug, warn};

use crate::document::Schematic;
use crate::error::{Result, SyncError};
use crate::ids::{DocId, ElementId, SheetId};

#[derive(Debug, Clone, PartialEq)]
pub struct SheetNode {
    pub name: String,
    /// `/` for the root, `/power/ldo` below it
    pub path: String,
    pub parent: Option<SheetId>,
    /// uuid of the sheet symbol in the parent (the document uuid for the root)
    pub persistent_id: Option<String>,
    /// The sheet symbol element inside the parent document
    pub symbol: Option<ElementId>,
    pub doc: DocId,
    /// Whether this instance owns its document's content
    pub primary: bool,
    pub removed: bool,
}

#[derive(Debug, Clone)]
pub struct Design {
    docs: Vec<Schematic>,
    sheets: Vec<SheetNode>,
    removed_files: Vec<PathBuf>,
    warnings: Vec<String>,
}

impl Design {
    /// A design made of a single root document.
    pub fn new(root: Schematic) -> Self {
        let name = file_stem(root.file());
        let persistent_id = Some(root.uuid().to_string());
        Self {
            docs: vec![root],
            sheets: vec![SheetNode {
                name,
                path: "/".to_string(),
                parent: None,
                persistent_id,
                symbol: None,
                doc: DocId::from_index(0),
                primary: true,
                removed: false,
            }],
            removed_files: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Load a root document and every sheet below it from disk.
    pub fn load(root: &Path) -> Result<Self> {
        Self::load_with(root, |path| std::fs::read_to_string(path))
    }

    /// Like [`Design::load`], reading files through `read`.
    pub fn load_with<F>(root: &Path, mut read: F) -> Result<Self>
    where
        F: FnMut(&Path) -> io::Result<String>,
    {
        let root = normalize(root);
        let source = read(&root).map_err(|e| SyncError::io(&root, e))?;
        let mut design = Self::new(Schematic::parse(&root, source)?);
        let mut ancestors = vec![root];
        design.load_children(design.root(), &mut ancestors, &mut read)?;
        debug!(
            "Loaded {} documents, {} sheets",
            design.docs.len(),
            design.sheets.len()
        );
        Ok(design)
    }

    fn load_children<F>(
        &mut self,
        parent: SheetId,
        ancestors: &mut Vec<PathBuf>,
        read: &mut F,
    ) -> Result<()>
    where
        F: FnMut(&Path) -> io::Result<String>,
    {
        let parent_node = self.sheet(parent).clone();
        let parent_file = self.doc(parent_node.doc).file().to_path_buf();
        let symbols: Vec<_> = self
            .doc(parent_node.doc)
            .sheets()
            .map(|(id, data)| (id, data.clone()))
            .collect();

        for (element, data) in symbols {
            let file = child_file(&parent_file, &data.file);
            if ancestors.contains(&file) {
                return Err(SyncError::parse(
                    file.display().to_string(),
                    format!(
                        "sheet {} in {} references one of its own ancestors",
                        data.name,
                        parent_file.display()
                    ),
                ));
            }

            let path = child_path(&parent_node.path, &data.name);
            let shared = self.find_doc(&file);
            let doc = match shared {
                Some(doc) => {
                    self.warn(format!(
                        "sheet {path} shares {} with another sheet and is not synchronized",
                        file.display()
                    ));
                    doc
                }
                None => {
                    let source = read(&file).map_err(|e| SyncError::io(&file, e))?;
                    self.add_document(Schematic::parse(&file, source)?)
                }
            };
            let sheet = self.add_sheet(SheetNode {
                name: data.name.clone(),
                path,
                parent: Some(parent),
                persistent_id: data.uuid.clone(),
                symbol: Some(element),
                doc,
                primary: shared.is_none(),
                removed: false,
            });
            if shared.is_none() {
                ancestors.push(file);
                self.load_children(sheet, ancestors, read)?;
                ancestors.pop();
            }
        }
        Ok(())
    }

    pub fn root(&self) -> SheetId {
        SheetId::from_index(0)
    }

    pub fn sheet(&self, id: SheetId) -> &SheetNode {
        &self.sheets[id.index()]
    }

    /// Live sheets in load order (parents before children).
    pub fn sheets(&self) -> impl Iterator<Item = (SheetId, &SheetNode)> + '_ {
        self.sheets
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.removed)
            .map(|(i, s)| (SheetId::from_index(i), s))
    }

    pub fn children(&self, parent: SheetId) -> impl Iterator<Item = (SheetId, &SheetNode)> + '_ {
        self.sheets().filter(move |(_, s)| s.parent == Some(parent))
    }

    pub fn doc(&self, id: DocId) -> &Schematic {
        &self.docs[id.index()]
    }

    pub fn doc_mut(&mut self, id: DocId) -> &mut Schematic {
        &mut self.docs[id.index()]
    }

    pub fn docs(&self) -> impl Iterator<Item = (DocId, &Schematic)> + '_ {
        self.docs
            .iter()
            .enumerate()
            .map(|(i, d)| (DocId::from_index(i), d))
    }

    /// The document holding a sheet's content.
    pub fn sheet_doc(&self, id: SheetId) -> &Schematic {
        self.doc(self.sheet(id).doc)
    }

    pub fn find_doc(&self, file: &Path) -> Option<DocId> {
        self.docs()
            .find(|(_, d)| d.file() == file)
            .map(|(id, _)| id)
    }

    pub(crate) fn add_document(&mut self, doc: Schematic) -> DocId {
        self.docs.push(doc);
        DocId::from_index(self.docs.len() - 1)
    }

    pub(crate) fn add_sheet(&mut self, node: SheetNode) -> SheetId {
        self.sheets.push(node);
        SheetId::from_index(self.sheets.len() - 1)
    }

    pub(crate) fn rename_sheet(&mut self, id: SheetId, name: &str) {
        self.sheets[id.index()].name = name.to_string();
    }

    /// Drop a sheet and its descendants. Files no live sheet uses any more are
    /// queued for deletion.
    pub(crate) fn remove_sheet(&mut self, id: SheetId) {
        let mut pending = vec![id];
        let mut touched = Vec::new();
        while let Some(current) = pending.pop() {
            let node = &mut self.sheets[current.index()];
            if node.removed {
                continue;
            }
            node.removed = true;
            touched.push(node.doc);
            pending.extend(self.children(current).map(|(child, _)| child));
        }

        for doc in touched {
            let in_use = self.sheets().any(|(_, s)| s.doc == doc);
            let file = self.doc(doc).file().to_path_buf();
            if !in_use && !self.removed_files.contains(&file) {
                debug!("Queued {} for deletion", file.display());
                self.removed_files.push(file);
            }
        }
    }

    /// Files whose last sheet was removed during this run.
    pub fn removed_files(&self) -> &[PathBuf] {
        &self.removed_files
    }

    /// Live documents that differ from what was loaded.
    pub fn modified_documents(&self) -> impl Iterator<Item = &Schematic> + '_ {
        self.docs().filter_map(|(id, doc)| {
            let live = self.sheets().any(|(_, s)| s.doc == id);
            (live && doc.is_modified()).then_some(doc)
        })
    }

    /// Serialize every modified document and check that it parses back.
    pub fn render(&self) -> Result<Vec<(PathBuf, String)>> {
        self.modified_documents()
            .map(|doc| {
                let text = doc.serialize();
                Schematic::parse(doc.file(), text.clone()).map_err(|e| {
                    SyncError::invariant(
                        doc.file().display().to_string(),
                        format!("serialized document must parse: {e}"),
                    )
                })?;
                Ok((doc.file().to_path_buf(), text))
            })
            .collect()
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub(crate) fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }

    fn warn(&mut self, message: String) {
        warn!("{message}");
        self.warnings.push(message);
    }
}

/// Location of a child sheet file, relative to the parent's directory.
pub fn child_file(parent_file: &Path, sheet_file: &str) -> PathBuf {
    let dir = parent_file.parent().unwrap_or(Path::new(""));
    normalize(&dir.join(sheet_file))
}

pub(crate) fn child_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Lexically resolve `.` and `..` so that one file has one spelling.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn sheet_doc(uuid: &str, sheets: &[(&str, &str)]) -> String {
        let mut text = format!("(kicad_sch\n\t(version 20231120)\n\t(uuid \"{uuid}\")\n");
        for (i, (name, file)) in sheets.iter().enumerate() {
            text.push_str(&format!(
                "\t(sheet\n\t\t(at {x} 20)\n\t\t(size 25.4 10.16)\n\t\t(uuid \"{uuid}-{i}\")\n\t\t(property \"Sheetname\" \"{name}\")\n\t\t(property \"Sheetfile\" \"{file}\")\n\t)\n",
                x = 20 + 40 * i
            ));
        }
        text.push_str(")\n");
        text
    }

    fn load(files: &[(&str, String)]) -> Result<Design> {
        let files: HashMap<PathBuf, String> = files
            .iter()
            .map(|(path, text)| (PathBuf::from(path), text.clone()))
            .collect();
        Design::load_with(Path::new("proj/root.kicad_sch"), |path| {
            files
                .get(path)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "missing"))
        })
    }

    #[test]
    fn loads_nested_sheets_relative_to_parent() {
        let design = load(&[
            ("proj/root.kicad_sch", sheet_doc("r", &[("power", "sub/power.kicad_sch")])),
            ("proj/sub/power.kicad_sch", sheet_doc("p", &[("ldo", "ldo.kicad_sch")])),
            ("proj/sub/ldo.kicad_sch", sheet_doc("l", &[])),
        ])
        .unwrap();

        let paths: Vec<_> = design.sheets().map(|(_, s)| s.path.clone()).collect();
        assert_eq!(paths, vec!["/", "/power", "/power/ldo"]);
        let (ldo, node) = design.sheets().last().unwrap();
        assert_eq!(design.sheet_doc(ldo).file(), Path::new("proj/sub/ldo.kicad_sch"));
        assert_eq!(node.persistent_id.as_deref(), Some("p-0"));
        assert!(design.modified_documents().next().is_none());
    }

    #[test]
    fn shared_files_load_once() {
        let design = load(&[
            (
                "proj/root.kicad_sch",
                sheet_doc("r", &[("a", "same.kicad_sch"), ("b", "./same.kicad_sch")]),
            ),
            ("proj/same.kicad_sch", sheet_doc("s", &[])),
        ])
        .unwrap();
        assert_eq!(design.docs().count(), 2);
        let primary: Vec<_> = design.sheets().map(|(_, s)| s.primary).collect();
        assert_eq!(primary, vec![true, true, false]);
        assert_eq!(design.warnings().len(), 1);
    }

    #[test]
    fn recursive_sheets_are_parse_errors() {
        let err = load(&[
            ("proj/root.kicad_sch", sheet_doc("r", &[("a", "a.kicad_sch")])),
            ("proj/a.kicad_sch", sheet_doc("a", &[("again", "root.kicad_sch")])),
        ])
        .unwrap_err();
        assert!(matches!(err, SyncError::Parse { .. }), "{err}");

        let err = load(&[("proj/root.kicad_sch", sheet_doc("r", &[("a", "gone.kicad_sch")]))])
            .unwrap_err();
        assert!(matches!(err, SyncError::Io { .. }), "{err}");
    }

    #[test]
    fn removing_a_sheet_queues_its_subtree() {
        let mut design = load(&[
            ("proj/root.kicad_sch", sheet_doc("r", &[("power", "power.kicad_sch")])),
            ("proj/power.kicad_sch", sheet_doc("p", &[("ldo", "ldo.kicad_sch")])),
            ("proj/ldo.kicad_sch", sheet_doc("l", &[])),
        ])
        .unwrap();
        let (power, _) = design.children(design.root()).next().unwrap();
        design.remove_sheet(power);
        assert_eq!(design.sheets().count(), 1);
        assert_eq!(
            design.removed_files(),
            &[PathBuf::from("proj/power.kicad_sch"), PathBuf::from("proj/ldo.kicad_sch")]
        );
    }
}
