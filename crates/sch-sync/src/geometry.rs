//! Schematic geometry and the geometry oracle seam.
//!
//! Coordinates are millimetres with the y axis pointing down, as in the
//! schematic file. Symbol libraries use y up; [`LibSymbolGeometry`] flips
//! library coordinates on the way in.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use sch_sexpr::{Sexpr, number_as_f64};

/// Positions closer than this are the same connection point.
pub const POSITION_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn offset(self, other: Point) -> Point {
        Point::new(self.x + other.x, self.y + other.y)
    }

    /// Rotate counter-clockwise on screen by `degrees`.
    ///
    /// Right angles are handled exactly so that rotated pin positions land on
    /// the same grid as the unrotated ones.
    pub fn rotate(self, degrees: f64) -> Point {
        let Point { x, y } = self;
        match normalize_angle(degrees) {
            r if r == 0.0 => self,
            r if r == 90.0 => Point::new(y, -x),
            r if r == 180.0 => Point::new(-x, -y),
            r if r == 270.0 => Point::new(-y, x),
            r => {
                let (sin, cos) = r.to_radians().sin_cos();
                Point::new(x * cos + y * sin, -x * sin + y * cos)
            }
        }
    }

    pub fn close_to(self, other: Point) -> bool {
        (self.x - other.x).abs() <= POSITION_TOLERANCE
            && (self.y - other.y).abs() <= POSITION_TOLERANCE
    }

    pub fn distance_sq(self, other: Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    /// Snap both coordinates to the nearest multiple of `grid`.
    pub fn snap(self, grid: f64) -> Point {
        Point::new((self.x / grid).round() * grid, (self.y / grid).round() * grid)
    }
}

/// Normalize an angle into `[0, 360)`.
pub fn normalize_angle(degrees: f64) -> f64 {
    let r = degrees.rem_euclid(360.0);
    if (r - 360.0).abs() < 1e-9 { 0.0 } else { r }
}

/// `(mirror x)` flips across the x axis, `(mirror y)` across the y axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mirror {
    #[default]
    None,
    X,
    Y,
}

impl Mirror {
    pub fn from_token(token: Option<&str>) -> Self {
        match token {
            Some("x") => Mirror::X,
            Some("y") => Mirror::Y,
            _ => Mirror::None,
        }
    }

    pub fn apply(self, p: Point) -> Point {
        match self {
            Mirror::None => p,
            Mirror::X => Point::new(p.x, -p.y),
            Mirror::Y => Point::new(-p.x, p.y),
        }
    }
}

/// Offset of a pin (or box corner) relative to its symbol, after the symbol's
/// orientation is applied: rotation first, then mirroring.
pub fn orient(offset: Point, rotation: f64, mirror: Mirror) -> Point {
    mirror.apply(offset.rotate(rotation))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: Point,
    pub max: Point,
}

impl BoundingBox {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self {
            min: Point::new(x0.min(x1), y0.min(y1)),
            max: Point::new(x0.max(x1), y0.max(y1)),
        }
    }

    pub fn from_points(points: impl IntoIterator<Item = Point>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut bbox = BoundingBox {
            min: first,
            max: first,
        };
        for p in iter {
            bbox.min.x = bbox.min.x.min(p.x);
            bbox.min.y = bbox.min.y.min(p.y);
            bbox.max.x = bbox.max.x.max(p.x);
            bbox.max.y = bbox.max.y.max(p.y);
        }
        Some(bbox)
    }

    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }

    pub fn center(&self) -> Point {
        Point::new(
            (self.min.x + self.max.x) / 2.0,
            (self.min.y + self.max.y) / 2.0,
        )
    }

    fn corners(&self) -> [Point; 4] {
        [
            self.min,
            Point::new(self.max.x, self.min.y),
            self.max,
            Point::new(self.min.x, self.max.y),
        ]
    }

    /// Strict overlap; boxes that merely touch do not intersect.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min.x < other.max.x
            && other.min.x < self.max.x
            && self.min.y < other.max.y
            && other.min.y < self.max.y
    }

    pub fn translate(&self, by: Point) -> BoundingBox {
        BoundingBox {
            min: self.min.offset(by),
            max: self.max.offset(by),
        }
    }

    pub fn inflate(&self, margin: f64) -> BoundingBox {
        BoundingBox::new(
            self.min.x - margin,
            self.min.y - margin,
            self.max.x + margin,
            self.max.y + margin,
        )
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox::new(
            self.min.x.min(other.min.x),
            self.min.y.min(other.min.y),
            self.max.x.max(other.max.x),
            self.max.y.max(other.max.y),
        )
    }

    /// Axis-aligned box around the oriented corners.
    pub fn oriented(&self, rotation: f64, mirror: Mirror) -> BoundingBox {
        BoundingBox::from_points(self.corners().map(|c| orient(c, rotation, mirror)))
            .unwrap_or(*self)
    }
}

/// Approximate footprint of a label's text, anchored at its connection point.
pub fn label_box(text: &str, rotation: f64) -> BoundingBox {
    let width = text.chars().count() as f64 * 1.27 + 2.54;
    BoundingBox::new(0.0, -1.27, width, 1.27).oriented(rotation, Mirror::None)
}

/// Geometry supplied from outside the synchronizer.
///
/// `bbox` is relative to the symbol origin with `rotation` already applied;
/// `pin_offset` is unrotated, in schematic coordinates.
pub trait GeometryOracle: Sync {
    fn bbox(&self, lib_id: &str, rotation: f64) -> Option<BoundingBox>;
    fn pin_offset(&self, lib_id: &str, pin: &str) -> Option<Point>;
}

#[derive(Debug, Clone, Default)]
struct SymbolShape {
    body: Option<BoundingBox>,
    pins: HashMap<String, Point>,
}

/// Table-driven oracle for callers that precompute geometry.
#[derive(Debug, Clone, Default)]
pub struct StaticGeometry {
    symbols: HashMap<String, SymbolShape>,
    fallback: Option<BoundingBox>,
}

impl StaticGeometry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a symbol with its unrotated body box and pin offsets.
    pub fn with_symbol(mut self, lib_id: &str, body: BoundingBox, pins: &[(&str, f64, f64)]) -> Self {
        let shape = self.symbols.entry(lib_id.to_string()).or_default();
        shape.body = Some(body);
        for (number, x, y) in pins {
            shape.pins.insert(number.to_string(), Point::new(*x, *y));
        }
        self
    }

    /// Box reported for symbols that are not in the table.
    pub fn with_fallback(mut self, body: BoundingBox) -> Self {
        self.fallback = Some(body);
        self
    }
}

impl GeometryOracle for StaticGeometry {
    fn bbox(&self, lib_id: &str, rotation: f64) -> Option<BoundingBox> {
        let body = self
            .symbols
            .get(lib_id)
            .and_then(|s| s.body)
            .or(self.fallback)?;
        Some(body.oriented(rotation, Mirror::None))
    }

    fn pin_offset(&self, lib_id: &str, pin: &str) -> Option<Point> {
        self.symbols.get(lib_id)?.pins.get(pin).copied()
    }
}

/// Geometry derived from `(lib_symbols ...)` definitions embedded in a document.
#[derive(Debug, Clone, Default)]
pub struct LibSymbolGeometry {
    symbols: HashMap<String, SymbolShape>,
}

impl LibSymbolGeometry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Register one `(symbol "LIB:NAME" ...)` definition. Existing entries win.
    pub fn add_definition(&mut self, def: &Sexpr) {
        let Some(items) = def.as_list() else {
            return;
        };
        let Some(name) = items.get(1).and_then(Sexpr::as_str) else {
            return;
        };
        if self.symbols.contains_key(name) {
            return;
        }

        let mut points = Vec::new();
        let mut pins = HashMap::new();
        def.walk(|node, ctx| {
            // Nested `(symbol "NAME_1_1" ...)` units are visited too.
            match node.tag() {
                Some("pin") if ctx.parent_tag() == Some("symbol") => {
                    if let Some((number, at, end)) = lib_pin(node) {
                        points.push(at);
                        points.push(end);
                        pins.entry(number).or_insert(at);
                    }
                }
                Some("rectangle") => {
                    points.extend(lib_point(node, "start"));
                    points.extend(lib_point(node, "end"));
                }
                Some("circle") => {
                    if let (Some(center), Some(radius)) = (
                        lib_point(node, "center"),
                        node.find_list("radius")
                            .and_then(|r| r.get(1))
                            .and_then(number_as_f64),
                    ) {
                        points.push(Point::new(center.x - radius, center.y - radius));
                        points.push(Point::new(center.x + radius, center.y + radius));
                    }
                }
                Some("arc") => {
                    points.extend(lib_point(node, "start"));
                    points.extend(lib_point(node, "mid"));
                    points.extend(lib_point(node, "end"));
                }
                Some("xy") if ctx.grandparent_tag() != Some("pin") => {
                    points.extend(xy_point(node));
                }
                _ => {}
            }
        });

        self.symbols.insert(
            name.to_string(),
            SymbolShape {
                body: BoundingBox::from_points(points),
                pins,
            },
        );
    }

    /// Collect every definition under a `(lib_symbols ...)` node.
    pub fn from_lib_symbols(lib_symbols: &Sexpr) -> Self {
        let mut geometry = Self::new();
        for def in lib_symbols.children_tagged("symbol") {
            geometry.add_definition(def);
        }
        geometry
    }
}

/// Library pins are `(pin type style (at x y angle) (length l) ...)`; the
/// `at` point is where wires connect.
fn lib_pin(node: &Sexpr) -> Option<(String, Point, Point)> {
    let items = node.as_list()?;
    let number = sch_sexpr::kicad::string_prop(items, "number")?;
    let at = items
        .iter()
        .find(|child| child.tag() == Some("at"))?
        .as_list()?;
    let x = number_as_f64(at.get(1)?)?;
    let y = number_as_f64(at.get(2)?)?;
    let angle = at.get(3).and_then(number_as_f64).unwrap_or(0.0);
    let length = items
        .iter()
        .find(|child| child.tag() == Some("length"))
        .and_then(|l| l.as_list()?.get(1).and_then(number_as_f64))
        .unwrap_or(0.0);

    let (sin, cos) = angle.to_radians().sin_cos();
    let connect = Point::new(x, -y);
    let end = Point::new(x + length * cos, -(y + length * sin));
    Some((number, connect, end))
}

fn lib_point(node: &Sexpr, tag: &str) -> Option<Point> {
    let list = node.find_list(tag)?;
    let x = number_as_f64(list.get(1)?)?;
    let y = number_as_f64(list.get(2)?)?;
    Some(Point::new(x, -y))
}

fn xy_point(node: &Sexpr) -> Option<Point> {
    let list = node.as_list()?;
    let x = number_as_f64(list.get(1)?)?;
    let y = number_as_f64(list.get(2)?)?;
    Some(Point::new(x, -y))
}

impl GeometryOracle for LibSymbolGeometry {
    fn bbox(&self, lib_id: &str, rotation: f64) -> Option<BoundingBox> {
        let body = self.symbols.get(lib_id)?.body?;
        Some(body.oriented(rotation, Mirror::None))
    }

    fn pin_offset(&self, lib_id: &str, pin: &str) -> Option<Point> {
        self.symbols.get(lib_id)?.pins.get(pin).copied()
    }
}

/// Query several oracles in order; the first answer wins.
pub struct OracleStack<'a> {
    layers: Vec<&'a dyn GeometryOracle>,
}

impl<'a> OracleStack<'a> {
    pub fn new(layers: Vec<&'a dyn GeometryOracle>) -> Self {
        Self { layers }
    }
}

impl GeometryOracle for OracleStack<'_> {
    fn bbox(&self, lib_id: &str, rotation: f64) -> Option<BoundingBox> {
        self.layers.iter().find_map(|o| o.bbox(lib_id, rotation))
    }

    fn pin_offset(&self, lib_id: &str, pin: &str) -> Option<Point> {
        self.layers.iter().find_map(|o| o.pin_offset(lib_id, pin))
    }
}
