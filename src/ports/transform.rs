// Copyright 2025 the Formpane Authors
// SPDX-License-Identifier: Apache-2.0

//! Default coordinate transform.
//!
//! Source boxes use a y-up coordinate space anchored at the page's crop
//! box. Percent boxes are y-down, relative to the unrotated page. Pixel
//! boxes are y-down in the viewport, after the viewport's rotation.

use kurbo::{Point, Rect};

use super::{CoordinateTransform, PageMeta, TransformError};
use crate::model::{Rotation, Viewport};

/// Crop-box relative percent mapping with quarter-turn rotation
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardTransform;

fn is_finite(rect: Rect) -> bool {
    [rect.x0, rect.y0, rect.x1, rect.y1].iter().all(|v| v.is_finite())
}

/// Rotate a point in the unit square clockwise about the page.
fn rotate_unit(point: Point, rotation: Rotation) -> Point {
    match rotation {
        Rotation::Deg0 => point,
        Rotation::Deg90 => Point::new(1.0 - point.y, point.x),
        Rotation::Deg180 => Point::new(1.0 - point.x, 1.0 - point.y),
        Rotation::Deg270 => Point::new(point.y, 1.0 - point.x),
    }
}

impl CoordinateTransform for StandardTransform {
    fn to_percent_rect(&self, raw_box: Rect, page: &PageMeta) -> Result<Rect, TransformError> {
        let crop = page.crop_box.abs();
        if !is_finite(crop) || crop.width() <= 0.0 || crop.height() <= 0.0 {
            return Err(TransformError::DegeneratePage);
        }
        if !is_finite(raw_box) {
            return Err(TransformError::DegenerateBox);
        }
        let raw = raw_box.abs();

        // Flip y: the top edge of the box is its largest source y.
        Ok(Rect::new(
            (raw.x0 - crop.x0) / crop.width(),
            (crop.y1 - raw.y1) / crop.height(),
            (raw.x1 - crop.x0) / crop.width(),
            (crop.y1 - raw.y0) / crop.height(),
        ))
    }

    fn to_pixel_rect(&self, percent_box: Rect, viewport: &Viewport) -> Result<Rect, TransformError> {
        if !viewport.is_usable() {
            return Err(TransformError::UnusableViewport);
        }
        if !is_finite(percent_box) {
            return Err(TransformError::DegenerateBox);
        }
        let rotation = viewport.rotation_or_default();
        let a = rotate_unit(Point::new(percent_box.x0, percent_box.y0), rotation);
        let b = rotate_unit(Point::new(percent_box.x1, percent_box.y1), rotation);
        let unit = Rect::from_points(a, b);

        Ok(Rect::new(
            unit.x0 * viewport.width,
            unit.y0 * viewport.height,
            unit.x1 * viewport.width,
            unit.y1 * viewport.height,
        ))
    }

    fn hit_test(&self, point: Point, pixel_box: Rect, padding: f64) -> bool {
        let padding = if padding.is_finite() { padding.max(0.0) } else { 0.0 };
        pixel_box.abs().inflate(padding, padding).contains(point)
    }
}
