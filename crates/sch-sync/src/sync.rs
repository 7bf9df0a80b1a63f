//! The end-to-end pipeline: load, diff, apply, write.
//!
//! Writes are atomic per file only. A run touching several sheets replaces
//! them one after another, so an I/O error midway can leave earlier files
//! written and later ones untouched. Nothing is written when any step before
//! the first write fails.

use std::io::Write;
use std::path::Path;

use atomicwrites::{AtomicFile, OverwriteBehavior};

use log::{debug, info, warn};

use crate::apply::apply;
use crate::canonical::CanonicalModel;
use crate::changeset::Changeset;
use crate::config::SyncConfig;
use crate::design::Design;
use crate::diff::diff;
use crate::document::Schematic;
use crate::error::{Result, SyncError};
use crate::geometry::{GeometryOracle, LibSymbolGeometry, OracleStack};
use crate::ids::IdGenerator;
use crate::library::SymbolLibrary;
use crate::refdes::RefdesAllocator;
use crate::report::SyncReport;

/// Explicit per-run state.
pub struct SyncContext<'a> {
    pub config: SyncConfig,
    pub oracle: &'a dyn GeometryOracle,
    pub library: &'a dyn SymbolLibrary,
    pub ids: IdGenerator,
    pub refdes: RefdesAllocator,
    warnings: Vec<String>,
}

impl<'a> SyncContext<'a> {
    pub fn new(
        config: SyncConfig,
        oracle: &'a dyn GeometryOracle,
        library: &'a dyn SymbolLibrary,
    ) -> Self {
        Self {
            config,
            oracle,
            library,
            ids: IdGenerator::default(),
            refdes: RefdesAllocator::new(),
            warnings: Vec::new(),
        }
    }

    /// Use `ids` for every identifier minted during the run.
    pub fn with_ids(mut self, ids: IdGenerator) -> Self {
        self.ids = ids;
        self
    }

    /// Record a recoverable problem. Repeats of one message are dropped.
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        if self.warnings.contains(&message) {
            return;
        }
        warn!("{message}");
        self.warnings.push(message);
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

/// Result of a synchronization run.
#[derive(Debug)]
pub struct SyncOutcome {
    pub design: Design,
    pub changeset: Changeset,
    pub report: SyncReport,
}

/// Bring `existing` (or a new design) in line with `model`.
///
/// Works on the in-memory design only; nothing touches the filesystem.
pub fn synchronize(
    ctx: &mut SyncContext<'_>,
    existing: Option<Design>,
    model: &CanonicalModel,
) -> Result<SyncOutcome> {
    let mut design = match existing {
        Some(design) => design,
        None => new_design(ctx, model, Path::new(&model.root().file))?,
    };
    for message in design.take_warnings() {
        ctx.warn(message);
    }

    // Pin geometry from every symbol the run may see: embedded caches first,
    // then the library, behind whatever the caller supplied.
    let mut embedded = LibSymbolGeometry::new();
    for (_, doc) in design.docs() {
        if let Some(lib_symbols) = doc.lib_symbols() {
            for def in lib_symbols.children_tagged("symbol") {
                embedded.add_definition(def);
            }
        }
    }
    for lib_id in model.lib_ids() {
        if let Some(def) = ctx.library.lib_symbol(lib_id) {
            embedded.add_definition(&def);
        }
    }
    let user: &dyn GeometryOracle = ctx.oracle;
    let oracle = OracleStack::new(vec![user, &embedded as &dyn GeometryOracle]);

    let changeset = diff(&design, model, ctx, &oracle)?;
    apply(&mut design, model, &changeset, ctx, &oracle)?;
    let report = SyncReport::new(&changeset, ctx.warnings());
    Ok(SyncOutcome {
        design,
        changeset,
        report,
    })
}

/// Synchronize the project rooted at `root_path` on disk.
///
/// Every touched document is serialized and validated before the first
/// write; each file is then replaced atomically, one at a time. Sheet files
/// that lost their last sheet are deleted after all writes succeeded.
pub fn sync_project(
    root_path: &Path,
    model: &CanonicalModel,
    ctx: &mut SyncContext<'_>,
) -> Result<SyncOutcome> {
    let existing = if root_path.exists() {
        Design::load(root_path)?
    } else {
        new_design(ctx, model, root_path)?
    };
    let outcome = synchronize(ctx, Some(existing), model)?;

    let rendered = outcome.design.render()?;
    for (file, text) in &rendered {
        if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
        }
        write_atomic(file, text)?;
        info!("Wrote {}", file.display());
    }

    for file in outcome.design.removed_files() {
        if rendered.iter().any(|(written, _)| written == file) || !file.exists() {
            continue;
        }
        std::fs::remove_file(file).map_err(|e| SyncError::io(file, e))?;
        info!("Deleted {}", file.display());
    }

    debug!("{} documents written", rendered.len());
    Ok(outcome)
}

/// A design holding one fresh root document at `file`.
fn new_design(ctx: &SyncContext<'_>, model: &CanonicalModel, file: &Path) -> Result<Design> {
    let root = model.root();
    let doc = Schematic::create(
        file,
        &root.id,
        &ctx.config.generator,
        &ctx.config.paper,
        true,
    )?;
    debug!("Starting a new design at {}", file.display());
    Ok(Design::new(doc))
}

fn write_atomic(path: &Path, text: &str) -> Result<()> {
    AtomicFile::new(path, OverwriteBehavior::AllowOverwrite)
        .write(|f| {
            f.write_all(text.as_bytes())?;
            f.flush()
        })
        .map_err(|err| match err {
            atomicwrites::Error::Internal(e) | atomicwrites::Error::User(e) => SyncError::io(path, e),
        })
}
