//! Keep hand-editable KiCad schematics in step with a circuit described in code.
//!
//! A run diffs the [`CanonicalModel`] built from a [`CircuitDescription`]
//! against the `.kicad_sch` documents of a [`Design`] and applies the smallest
//! set of edits that makes them agree. Everything the user arranged by hand
//! (positions, wires, graphics, text) is carried over byte for byte.
//!
//! # Pipeline
//!
//! - [`Design::load`] - parse the root document and every sheet below it
//! - [`diff::diff`] - match entities by persistent id, reference and
//!   fingerprint into a [`Changeset`]
//! - [`apply::apply`] - patch documents in a fixed order, placing new items
//!   with the [`placement`] engine
//! - [`sync_project`] - the above plus atomic writes and a [`SyncReport`]

pub mod apply;
pub mod canonical;
pub mod changeset;
pub mod config;
pub mod connectivity;
pub mod design;
pub mod diff;
pub mod document;
mod error;
pub mod geometry;
pub mod hierarchy;
pub mod ids;
pub mod library;
pub mod placement;
pub mod refdes;
pub mod report;
mod sync;

pub use canonical::{CanonicalModel, CircuitDescription, build as build_model};
pub use changeset::{Changeset, OpKind};
pub use config::SyncConfig;
pub use design::Design;
pub use document::Schematic;
pub use error::{Result, SyncError};
pub use geometry::{GeometryOracle, StaticGeometry};
pub use ids::IdGenerator;
pub use library::{EmptyLibrary, StaticLibrary, SymbolLibrary};
pub use placement::Strategy;
pub use report::{ReportEntry, SyncReport};
pub use sync::{SyncContext, SyncOutcome, sync_project, synchronize};
