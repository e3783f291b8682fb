// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Integer pixel boxes, the 8-way output transform, and scale-aware rounding.
//!
//! Scene geometry is deliberately simple: nodes are positioned with integer
//! offsets and sized with integer extents. The only floating-point geometry
//! is a buffer's optional source sub-rectangle ([`FBox`]), which samples a
//! texture rather than placing a node.

use kurbo::Point;

/// An axis-aligned integer pixel box.
///
/// Used for node bounds, damage rectangles, and output viewports. A box with
/// non-positive `width`/`height` is considered empty.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Box {
    /// X coordinate of the top-left corner.
    pub x: i32,
    /// Y coordinate of the top-left corner.
    pub y: i32,
    /// Width in pixels.
    pub width: i32,
    /// Height in pixels.
    pub height: i32,
}

impl Box {
    /// The empty box at the origin.
    pub const ZERO: Self = Self {
        x: 0,
        y: 0,
        width: 0,
        height: 0,
    };

    /// Construct a box from its corner and extents.
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// True if the box covers zero or negative area.
    pub const fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Translate the box by `(dx, dy)`.
    pub const fn translated(&self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            width: self.width,
            height: self.height,
        }
    }

    /// Intersection with `other`, or `None` (treated as empty) if disjoint.
    pub fn intersection(&self, other: &Self) -> Option<Self> {
        if self.is_empty() || other.is_empty() {
            return None;
        }
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(Self::new(x1, y1, x2 - x1, y2 - y1))
    }

    /// True if `point` (in this box's coordinate space) falls within bounds.
    pub const fn contains_point(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }

    /// Area of this box, or `0` if empty.
    pub const fn area(&self) -> i64 {
        if self.is_empty() {
            0
        } else {
            self.width as i64 * self.height as i64
        }
    }
}

/// A floating-point sub-rectangle of a buffer, used for [`crate::BufferNode::src_box`].
///
/// An empty box (non-positive width or height) means "the whole buffer".
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct FBox {
    /// X coordinate of the top-left corner.
    pub x: f64,
    /// Y coordinate of the top-left corner.
    pub y: f64,
    /// Width in buffer-local units.
    pub width: f64,
    /// Height in buffer-local units.
    pub height: f64,
}

impl FBox {
    /// True if the box covers zero or negative area ("use the whole buffer").
    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// One of the eight 90°-step rotate/flip combinations relating buffer pixel
/// orientation to display orientation.
///
/// Numeric values match the `wl_output_transform` enum so hosts can pass
/// values through from the Wayland protocol directly.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Transform {
    /// No rotation or flip.
    #[default]
    Normal = 0,
    /// Rotated 90° counter-clockwise.
    Rotated90 = 1,
    /// Rotated 180°.
    Rotated180 = 2,
    /// Rotated 270° counter-clockwise.
    Rotated270 = 3,
    /// Flipped horizontally.
    Flipped = 4,
    /// Flipped horizontally, then rotated 90° counter-clockwise.
    Flipped90 = 5,
    /// Flipped horizontally, then rotated 180°.
    Flipped180 = 6,
    /// Flipped horizontally, then rotated 270° counter-clockwise.
    Flipped270 = 7,
}

impl Transform {
    /// True for the four variants that swap width and height (the odd ones).
    pub const fn swaps_wh(self) -> bool {
        matches!(
            self,
            Self::Rotated90 | Self::Rotated270 | Self::Flipped90 | Self::Flipped270
        )
    }

    /// The transform that undoes this one.
    pub const fn invert(self) -> Self {
        match self {
            Self::Rotated90 => Self::Rotated270,
            Self::Rotated270 => Self::Rotated90,
            Self::Normal
            | Self::Rotated180
            | Self::Flipped
            | Self::Flipped90
            | Self::Flipped180
            | Self::Flipped270 => self,
        }
    }
}

/// Rotate/flip `box` by `transform` within a `width` x `height` bound.
///
/// `width`/`height` describe the untransformed space `box` lives in; the
/// returned box lives in the transformed space (swapped if `transform`
/// swaps width/height).
pub fn transform_box(b: Box, transform: Transform, width: i32, height: i32) -> Box {
    let (out_w, out_h) = if transform.swaps_wh() {
        (b.height, b.width)
    } else {
        (b.width, b.height)
    };
    let (x, y) = match transform {
        Transform::Normal => (b.x, b.y),
        Transform::Rotated90 => (b.y, width - b.x - b.width),
        Transform::Rotated180 => (width - b.x - b.width, height - b.y - b.height),
        Transform::Rotated270 => (height - b.y - b.height, b.x),
        Transform::Flipped => (width - b.x - b.width, b.y),
        Transform::Flipped90 => (height - b.y - b.height, width - b.x - b.width),
        Transform::Flipped180 => (b.x, height - b.y - b.height),
        Transform::Flipped270 => (b.y, b.x),
    };
    Box::new(x, y, out_w, out_h)
}

/// `round((offset + length) * scale) - round(offset * scale)`.
///
/// This is the width/height half of [`scale_box`]: computing the new extent
/// this way (rather than `round(length * scale)`) keeps adjacent scaled boxes
/// from leaving 1-pixel cracks at fractional scales, since two boxes sharing
/// an edge at `offset` still share a rounded edge after scaling.
pub fn scale_length(length: i32, offset: i32, scale: f64) -> i32 {
    let end = ((offset + length) as f64 * scale).round();
    let start = (offset as f64 * scale).round();
    (end - start) as i32
}

/// Scale an integer box by a uniform factor, preserving the crack-free
/// rounding invariant documented on [`scale_length`].
pub fn scale_box(b: Box, scale: f64) -> Box {
    Box {
        x: (b.x as f64 * scale).round() as i32,
        y: (b.y as f64 * scale).round() as i32,
        width: scale_length(b.width, b.x, scale),
        height: scale_length(b.height, b.y, scale),
    }
}

/// Scale an integer box by independent x/y factors, e.g. when a buffer's
/// destination size differs from its source size on one axis only.
pub fn scale_box_xy(b: Box, scale_x: f64, scale_y: f64) -> Box {
    Box {
        x: (b.x as f64 * scale_x).round() as i32,
        y: (b.y as f64 * scale_y).round() as i32,
        width: scale_length(b.width, b.x, scale_x),
        height: scale_length(b.height, b.y, scale_y),
    }
}

/// Construct a [`kurbo::Point`] from integer scene coordinates, for
/// collaborators that want kurbo's vocabulary (e.g. hit-test callers).
pub fn point(x: i32, y: i32) -> Point {
    Point::new(f64::from(x), f64::from(y))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_length_avoids_cracks_at_fractional_scale() {
        // Two adjacent 10px boxes at x=0 and x=10, scale 1.5: the shared edge
        // at x=10 must map to the same rounded pixel from both sides.
        let left = scale_box(Box::new(0, 0, 10, 10), 1.5);
        let right = scale_box(Box::new(10, 0, 10, 10), 1.5);
        assert_eq!(left.x + left.width, right.x);
    }

    #[test]
    fn scale_box_matches_scenario_s4() {
        // S4: rect 10x10 at (5,5), scale 2. Old box (5,5,10,10) -> (10,10,20,20).
        let old = scale_box(Box::new(5, 5, 10, 10), 2.0);
        assert_eq!(old, Box::new(10, 10, 20, 20));
        // New position (6,5) -> (12,10,20,20).
        let new = scale_box(Box::new(6, 5, 10, 10), 2.0);
        assert_eq!(new, Box::new(12, 10, 20, 20));
    }

    #[test]
    fn transform_box_90_swaps_and_rotates() {
        let b = Box::new(0, 0, 4, 2);
        let t = transform_box(b, Transform::Rotated90, 10, 20);
        // width/height swap; x becomes old y, y becomes width - x - w.
        assert_eq!(t, Box::new(0, 10 - 0 - 4, 2, 4));
    }

    #[test]
    fn transform_box_normal_is_identity() {
        let b = Box::new(3, 4, 5, 6);
        assert_eq!(transform_box(b, Transform::Normal, 100, 100), b);
    }

    #[test]
    fn invert_is_involutive() {
        for t in [
            Transform::Normal,
            Transform::Rotated90,
            Transform::Rotated180,
            Transform::Rotated270,
            Transform::Flipped,
            Transform::Flipped90,
            Transform::Flipped180,
            Transform::Flipped270,
        ] {
            assert_eq!(t.invert().invert(), t);
        }
    }

    #[test]
    fn box_intersection_and_area() {
        let a = Box::new(0, 0, 100, 100);
        let b = Box::new(50, 50, 100, 100);
        let i = a.intersection(&b).unwrap();
        assert_eq!(i, Box::new(50, 50, 50, 50));
        assert_eq!(i.area(), 2500);
        assert!(Box::new(0, 0, 10, 10)
            .intersection(&Box::new(20, 20, 10, 10))
            .is_none());
    }
}
