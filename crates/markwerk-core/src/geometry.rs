// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Plane geometry shared by the template model and the alignment pipeline:
// points, axis-aligned boxes and the page transform.

use serde::{Deserialize, Serialize};

/// A point in pixel space (template or scan, depending on context).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle. `(x, y)` is the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Smallest box containing every point. `None` for an empty slice.
    pub fn enclosing(points: &[Point]) -> Option<Self> {
        let first = points.first()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for p in &points[1..] {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Some(Self::new(min_x, min_y, max_x - min_x, max_y - min_y))
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Zero or negative extent on either axis.
    pub fn is_degenerate(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    /// Grow the box by `margin` on every side (negative shrinks).
    pub fn grow(&self, margin: f64) -> Self {
        Self::new(
            self.x - margin,
            self.y - margin,
            self.width + 2.0 * margin,
            self.height + 2.0 * margin,
        )
    }

    /// Corners in order top-left, top-right, bottom-right, bottom-left.
    pub fn corners(&self) -> [Point; 4] {
        [
            Point::new(self.x, self.y),
            Point::new(self.right(), self.y),
            Point::new(self.right(), self.bottom()),
            Point::new(self.x, self.bottom()),
        ]
    }

    /// Intersection with another box, or `None` when they do not overlap.
    pub fn intersect(&self, other: &BoundingBox) -> Option<Self> {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.right().min(other.right());
        let y2 = self.bottom().min(other.bottom());
        if x2 > x1 && y2 > y1 {
            Some(Self::new(x1, y1, x2 - x1, y2 - y1))
        } else {
            None
        }
    }
}

/// Affine map from scanned-page pixels to template pixels.
///
/// ```text
/// | tx |   | a  b | | x |   | e |
/// | ty | = | c  d | | y | + | f |
/// ```
///
/// The alignment estimator only ever builds similarities (uniform scale,
/// rotation, translation), but the sampler handles the general case.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Transform {
    pub fn identity() -> Self {
        Self {
            a: 1.0,
            b: 0.0,
            c: 0.0,
            d: 1.0,
            e: 0.0,
            f: 0.0,
        }
    }

    /// Similarity that rotates by `rotation_rad` and scales by `scale` about
    /// `from` (scan space), then moves `from` onto `to` (template space).
    pub fn similarity(scale: f64, rotation_rad: f64, from: Point, to: Point) -> Self {
        let (sin, cos) = rotation_rad.sin_cos();
        let a = scale * cos;
        let b = -scale * sin;
        let c = scale * sin;
        let d = scale * cos;
        Self {
            a,
            b,
            c,
            d,
            e: to.x - (a * from.x + b * from.y),
            f: to.y - (c * from.x + d * from.y),
        }
    }

    /// Map a scan-space point into template space.
    pub fn apply(&self, p: Point) -> Point {
        Point::new(
            self.a * p.x + self.b * p.y + self.e,
            self.c * p.x + self.d * p.y + self.f,
        )
    }

    pub fn determinant(&self) -> f64 {
        self.a * self.d - self.b * self.c
    }

    /// Template → scan map. `None` when the linear part is singular.
    pub fn inverse(&self) -> Option<Self> {
        let det = self.determinant();
        if det.abs() < 1e-12 || !det.is_finite() {
            return None;
        }
        let a = self.d / det;
        let b = -self.b / det;
        let c = -self.c / det;
        let d = self.a / det;
        Some(Self {
            a,
            b,
            c,
            d,
            e: -(a * self.e + b * self.f),
            f: -(c * self.e + d * self.f),
        })
    }

    /// Mean axis scale (exact for similarities).
    pub fn scale(&self) -> f64 {
        ((self.a * self.a + self.c * self.c).sqrt() + (self.b * self.b + self.d * self.d).sqrt())
            / 2.0
    }

    /// Rotation angle in degrees (counter-clockwise in a y-down frame is
    /// negative, matching image conventions).
    pub fn rotation_degrees(&self) -> f64 {
        self.c.atan2(self.a).to_degrees()
    }

    /// Row-major 3x3 homogeneous matrix.
    pub fn to_matrix(&self) -> [f64; 9] {
        [self.a, self.b, self.e, self.c, self.d, self.f, 0.0, 0.0, 1.0]
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}
