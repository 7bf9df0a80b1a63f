//! Collision-free placement of new entities.
//!
//! The engine keeps the boxes of everything already on a sheet. A request is
//! answered by generating candidate origins for the chosen strategy,
//! evaluating them in parallel against the frozen obstacle set, and
//! committing the first fit in candidate order.

use std::collections::HashMap;

use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::SyncConfig;
use crate::connectivity::document_markers;
use crate::document::{ElementKind, Schematic};
use crate::error::{Result, SyncError};
use crate::geometry::{BoundingBox, GeometryOracle, Point, label_box};

/// Origin used when a sheet has no content to seed from.
pub const PAGE_ORIGIN: Point = Point { x: 25.4, y: 25.4 };

/// Box assumed for symbols the geometry oracle does not know.
pub const DEFAULT_SYMBOL_BOX: BoundingBox = BoundingBox {
    min: Point { x: -5.08, y: -5.08 },
    max: Point { x: 5.08, y: 5.08 },
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Rings of grid cells around a seed
    Grid,
    /// Right of the current content, then below it
    Edge,
    /// Grid around the entities sharing a net with the new one
    #[default]
    Contextual,
}

/// One entity to place.
#[derive(Debug, Clone)]
pub struct Request<'a> {
    /// Shown in warnings and errors
    pub entity: &'a str,
    /// Key the committed position is recorded under
    pub key: &'a str,
    /// Box relative to the entity origin
    pub body: BoundingBox,
    pub strategy: Strategy,
    /// Keys of related entities, for contextual placement
    pub peers: &'a [String],
}

#[derive(Debug, Clone)]
pub struct PlacementEngine {
    grid: f64,
    clearance: f64,
    radius: f64,
    obstacles: Vec<BoundingBox>,
    positions: HashMap<String, Point>,
    warnings: Vec<String>,
}

impl PlacementEngine {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            grid: config.grid,
            clearance: config.clearance,
            radius: config.search_radius,
            obstacles: Vec::new(),
            positions: HashMap::new(),
            warnings: Vec::new(),
        }
    }

    /// Engine seeded with the placeable content of `doc`.
    ///
    /// Labels and power symbols that sit on a pin move with that pin and are
    /// not obstacles of their own.
    pub fn from_document(config: &SyncConfig, doc: &Schematic, oracle: &dyn GeometryOracle) -> Self {
        let mut engine = Self::new(config);
        let anchored: Vec<_> = document_markers(doc, oracle)
            .into_iter()
            .filter(|m| m.target.is_some())
            .map(|m| m.element)
            .collect();

        for (id, element) in doc.elements() {
            if anchored.contains(&id) {
                continue;
            }
            let bbox = match element.kind() {
                ElementKind::Symbol(symbol) if symbol.is_power() => {
                    label_box(&symbol.value, symbol.rotation).translate(symbol.at)
                }
                ElementKind::Symbol(symbol) => {
                    let body = symbol_box(oracle, &symbol.lib_id, symbol.rotation)
                        .oriented(0.0, symbol.mirror);
                    if let Some(uuid) = &symbol.uuid {
                        engine.positions.insert(uuid.clone(), symbol.at);
                    }
                    body.translate(symbol.at)
                }
                ElementKind::Label(label) => label_box(&label.text, label.rotation).translate(label.at),
                ElementKind::Sheet(sheet) => BoundingBox::new(
                    sheet.at.x,
                    sheet.at.y,
                    sheet.at.x + sheet.size.0,
                    sheet.at.y + sheet.size.1,
                ),
                ElementKind::Text { text, at } => label_box(text, 0.0).translate(*at),
                _ => continue,
            };
            engine.obstacles.push(bbox);
        }
        debug!(
            "Placement on {}: {} obstacles",
            doc.file().display(),
            engine.obstacles.len()
        );
        engine
    }

    /// Register an entity placed outside the engine.
    pub fn occupy(&mut self, key: Option<&str>, at: Point, body: BoundingBox) {
        self.obstacles.push(body.translate(at));
        if let Some(key) = key {
            self.positions.insert(key.to_string(), at);
        }
    }

    /// Remember where an entity is without making it an obstacle.
    pub fn record(&mut self, key: &str, at: Point) {
        self.positions.insert(key.to_string(), at);
    }

    pub fn position(&self, key: &str) -> Option<Point> {
        self.positions.get(key).copied()
    }

    /// Union of every obstacle.
    pub fn extent(&self) -> Option<BoundingBox> {
        let (first, rest) = self.obstacles.split_first()?;
        Some(rest.iter().fold(*first, |acc, b| acc.union(b)))
    }

    /// Find and commit an origin for `request`.
    pub fn place(&mut self, request: &Request<'_>) -> Result<Point> {
        let at = match self.search(request, self.radius) {
            Some(at) => at,
            None => {
                let radius = self.radius * 2.0;
                self.warnings.push(format!(
                    "placing {} needed a search radius of {radius}",
                    request.entity
                ));
                self.search(request, radius)
                    .ok_or_else(|| SyncError::PlacementExhausted {
                        entity: request.entity.to_string(),
                        radius,
                    })?
            }
        };
        self.occupy(Some(request.key), at, request.body);
        Ok(at)
    }

    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }

    fn search(&self, request: &Request<'_>, radius: f64) -> Option<Point> {
        let candidates = match request.strategy {
            Strategy::Grid => self.rings(self.default_seed(), radius),
            Strategy::Edge => self.edge(request.body, radius),
            Strategy::Contextual => match self.centroid(request.peers) {
                Some(seed) => {
                    let mut candidates = self.rings(seed, radius);
                    candidates.extend(self.rings(self.default_seed(), radius));
                    candidates
                }
                None => self.rings(self.default_seed(), radius),
            },
        };
        candidates
            .par_iter()
            .find_first(|at| self.fits(request.body, **at))
            .copied()
    }

    fn fits(&self, body: BoundingBox, at: Point) -> bool {
        let placed = body.translate(at);
        if placed.min.x < 0.0 || placed.min.y < 0.0 {
            return false;
        }
        let padded = placed.inflate(self.clearance);
        !self.obstacles.iter().any(|o| o.intersects(&padded))
    }

    /// Top-left of the content, or the page origin on an empty sheet.
    fn default_seed(&self) -> Point {
        self.extent()
            .map_or(PAGE_ORIGIN, |e| Point::new(e.min.x.max(0.0), e.min.y.max(0.0)))
    }

    fn centroid(&self, peers: &[String]) -> Option<Point> {
        let placed: Vec<Point> = peers.iter().filter_map(|k| self.position(k)).collect();
        if placed.is_empty() {
            return None;
        }
        let n = placed.len() as f64;
        let sum = placed.iter().fold(Point::new(0.0, 0.0), |acc, p| acc.offset(*p));
        Some(Point::new(sum.x / n, sum.y / n))
    }

    fn steps(&self, radius: f64) -> i64 {
        (radius / self.grid + 1e-9).floor() as i64
    }

    /// Grid cells on square rings around `seed`, innermost ring first.
    fn rings(&self, seed: Point, radius: f64) -> Vec<Point> {
        let seed = seed.snap(self.grid);
        let mut out = vec![seed];
        for r in 1..=self.steps(radius) {
            for j in -r..=r {
                for i in -r..=r {
                    if i.abs().max(j.abs()) == r {
                        out.push(Point::new(
                            seed.x + i as f64 * self.grid,
                            seed.y + j as f64 * self.grid,
                        ));
                    }
                }
            }
        }
        out
    }

    /// A column right of the content, then a row below it.
    fn edge(&self, body: BoundingBox, radius: f64) -> Vec<Point> {
        let Some(extent) = self.extent() else {
            return self.rings(PAGE_ORIGIN, radius);
        };
        let up = |v: f64| (v / self.grid - 1e-9).ceil() * self.grid;
        let start = extent.min.snap(self.grid);
        let column_x = up(extent.max.x + self.clearance - body.min.x);
        let row_y = up(extent.max.y + self.clearance - body.min.y);
        let steps = self.steps(radius).max(1);

        let column = (0..steps).map(|k| Point::new(column_x, start.y + k as f64 * self.grid));
        let row = (0..steps).map(|k| Point::new(start.x + k as f64 * self.grid, row_y));
        column.chain(row).collect()
    }
}

/// Oriented box of a symbol, falling back to a generic size.
pub fn symbol_box(oracle: &dyn GeometryOracle, lib_id: &str, rotation: f64) -> BoundingBox {
    oracle
        .bbox(lib_id, rotation)
        .unwrap_or_else(|| DEFAULT_SYMBOL_BOX.oriented(rotation, crate::geometry::Mirror::None))
}
