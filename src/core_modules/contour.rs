// THEORY:
// The `contour` module holds the data containers of the spatial layer. An
// `Outline` is a closed border found in one frame, with no memory of the past.
// A `Contour` is that same outline once the tracker has given it a persistent
// label. Contours are rebuilt from scratch every tick; only the label carries
// over, and it lives in the tracker rather than in the contour itself.

/// A 2-D point in sensor pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// An axis-aligned box given by its top-left and bottom-right corners.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: Point,
    pub max: Point,
}

/// A closed border traced in a single frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Outline {
    /// Border pixels in tracing order. The last point connects back to the first.
    pub points: Vec<Point>,
    /// Enclosed area in square pixels (absolute shoelace area).
    pub area: f64,
    /// Polygon centroid; the mean of the points for borders that enclose nothing.
    pub centroid: (f64, f64),
    pub bounding_box: BoundingBox,
    /// True when this border separates a hole from the region around it.
    pub is_hole: bool,
}

impl Outline {
    /// Builds an outline and computes its area, centroid and bounds.
    pub fn new(points: Vec<Point>, is_hole: bool) -> Self {
        let (area, centroid) = area_and_centroid(&points);
        let bounding_box = bounds(&points);
        Self {
            points,
            area,
            centroid,
            bounding_box,
            is_hole,
        }
    }

    /// Radius of the circle with the same area.
    pub fn equivalent_radius(&self) -> f64 {
        (self.area / std::f64::consts::PI).sqrt()
    }
}

/// A tracked outline for the current tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Contour {
    /// Persistent identity assigned by the tracker.
    pub label: u32,
    pub outline: Outline,
}

impl Contour {
    pub fn points(&self) -> &[Point] {
        &self.outline.points
    }

    pub fn area(&self) -> f64 {
        self.outline.area
    }
}

/// Shoelace area and centroid of a closed polygon.
pub fn area_and_centroid(points: &[Point]) -> (f64, (f64, f64)) {
    let n = points.len();
    if n == 0 {
        return (0.0, (0.0, 0.0));
    }

    let mut twice_area = 0.0;
    let mut cx = 0.0;
    let mut cy = 0.0;
    for i in 0..n {
        let a = points[i];
        let b = points[(i + 1) % n];
        let cross = a.x as f64 * b.y as f64 - b.x as f64 * a.y as f64;
        twice_area += cross;
        cx += (a.x as f64 + b.x as f64) * cross;
        cy += (a.y as f64 + b.y as f64) * cross;
    }

    let area = twice_area.abs() / 2.0;
    if twice_area.abs() < 1e-9 {
        let mean_x = points.iter().map(|p| p.x as f64).sum::<f64>() / n as f64;
        let mean_y = points.iter().map(|p| p.y as f64).sum::<f64>() / n as f64;
        return (area, (mean_x, mean_y));
    }
    (area, (cx / (3.0 * twice_area), cy / (3.0 * twice_area)))
}

fn bounds(points: &[Point]) -> BoundingBox {
    let mut min = Point::new(f32::MAX, f32::MAX);
    let mut max = Point::new(f32::MIN, f32::MIN);
    for p in points {
        min.x = min.x.min(p.x);
        min.y = min.y.min(p.y);
        max.x = max.x.max(p.x);
        max.y = max.y.max(p.y);
    }
    if points.is_empty() {
        return BoundingBox {
            min: Point::new(0.0, 0.0),
            max: Point::new(0.0, 0.0),
        };
    }
    BoundingBox { min, max }
}
