//! Clipping whole-image boxes to tiles and re-normalizing them in tile space.

use crate::types::{AnnotationBox, TileRect};

/// A box in absolute pixel coordinates of the source image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl PixelBox {
    /// Convert a normalized center/size box to pixel corners.
    ///
    /// Returns `None` for a box with non-positive width or height, or with any
    /// non-finite coordinate.
    pub fn from_normalized(b: &AnnotationBox, image_width: u32, image_height: u32) -> Option<Self> {
        let width = b.w * image_width as f64;
        let height = b.h * image_height as f64;
        let x_center = b.xc * image_width as f64;
        let y_center = b.yc * image_height as f64;
        if !(width > 0.0 && height > 0.0) || !(width.is_finite() && height.is_finite()) {
            return None;
        }
        if !(x_center.is_finite() && y_center.is_finite()) {
            return None;
        }
        Some(Self {
            x1: x_center - width / 2.0,
            y1: y_center - height / 2.0,
            x2: x_center + width / 2.0,
            y2: y_center + height / 2.0,
        })
    }

    pub fn area(&self) -> f64 {
        (self.x2 - self.x1) * (self.y2 - self.y1)
    }

    /// Axis-aligned intersection with a tile, `None` when empty.
    pub fn intersect(&self, rect: &TileRect) -> Option<PixelBox> {
        let x1 = self.x1.max(rect.x_start as f64);
        let y1 = self.y1.max(rect.y_start as f64);
        let x2 = self.x2.min(rect.x_end as f64);
        let y2 = self.y2.min(rect.y_end as f64);
        if x2 > x1 && y2 > y1 {
            Some(PixelBox { x1, y1, x2, y2 })
        } else {
            None
        }
    }
}

/// Clip `pixel_box` to `rect` and express it normalized to the tile.
///
/// The box is dropped when it misses the tile or when less than
/// `min_area_threshold` of its own area is visible. Normalization uses the
/// tile's actual size, which is smaller than nominal near image edges.
pub fn reproject_box(
    class_id: u32,
    pixel_box: &PixelBox,
    rect: &TileRect,
    min_area_threshold: f64,
) -> Option<AnnotationBox> {
    let visible = pixel_box.intersect(rect)?;
    let box_area = pixel_box.area();
    if box_area <= 0.0 || visible.area() / box_area < min_area_threshold {
        return None;
    }

    let tile_w = rect.width() as f64;
    let tile_h = rect.height() as f64;
    let x1 = visible.x1 - rect.x_start as f64;
    let y1 = visible.y1 - rect.y_start as f64;
    let w = visible.x2 - visible.x1;
    let h = visible.y2 - visible.y1;

    Some(AnnotationBox {
        class_id,
        xc: ((x1 + w / 2.0) / tile_w).clamp(0.0, 1.0),
        yc: ((y1 + h / 2.0) / tile_h).clamp(0.0, 1.0),
        w: (w / tile_w).clamp(0.0, 1.0),
        h: (h / tile_h).clamp(0.0, 1.0),
    })
}

/// Reproject every box of an image onto one tile, keeping input order.
///
/// Degenerate source boxes never reach the clipping step.
pub fn reproject_annotation(
    boxes: &[AnnotationBox],
    image_width: u32,
    image_height: u32,
    rect: &TileRect,
    min_area_threshold: f64,
) -> Vec<AnnotationBox> {
    boxes
        .iter()
        .filter_map(|b| {
            let pixel_box = PixelBox::from_normalized(b, image_width, image_height)?;
            reproject_box(b.class_id, &pixel_box, rect, min_area_threshold)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLD: f64 = 0.002;

    fn rect(x_start: u32, y_start: u32, x_end: u32, y_end: u32) -> TileRect {
        TileRect {
            row: 0,
            col: 0,
            x_start,
            y_start,
            x_end,
            y_end,
        }
    }

    fn norm(class_id: u32, xc: f64, yc: f64, w: f64, h: f64) -> AnnotationBox {
        AnnotationBox {
            class_id,
            xc,
            yc,
            w,
            h,
        }
    }

    #[test]
    fn test_pixel_box_from_normalized() {
        let pb = PixelBox::from_normalized(&norm(0, 0.5, 0.5, 0.5, 0.25), 1000, 800).unwrap();
        assert_eq!(pb, PixelBox { x1: 250.0, y1: 300.0, x2: 750.0, y2: 500.0 });
    }

    #[test]
    fn test_non_finite_box_is_rejected() {
        assert!(PixelBox::from_normalized(&norm(0, f64::NAN, 0.1, 0.1, 0.1), 100, 100).is_none());
        assert!(PixelBox::from_normalized(&norm(0, 0.5, 0.5, f64::INFINITY, 0.1), 100, 100).is_none());
        let boxes = [norm(0, f64::NAN, 0.1, 0.1, 0.1)];
        assert!(reproject_annotation(&boxes, 1200, 1600, &rect(0, 0, 460, 460), THRESHOLD).is_empty());
    }

    #[test]
    fn test_degenerate_box_is_rejected() {
        assert!(PixelBox::from_normalized(&norm(0, 0.5, 0.5, 0.0, 0.2), 100, 100).is_none());
        assert!(PixelBox::from_normalized(&norm(0, 0.5, 0.5, 0.2, -0.1), 100, 100).is_none());
        let kept = reproject_annotation(&[norm(0, 0.5, 0.5, 0.0, 0.2)], 100, 100, &rect(0, 0, 100, 100), THRESHOLD);
        assert!(kept.is_empty());
    }

    #[test]
    fn test_contained_box_round_trips() {
        // 1200x1600 image, box at pixels (500, 520)-(600, 640), inside tile (400,400)-(860,860)
        let image_w = 1200;
        let image_h = 1600;
        let source = norm(1, 550.0 / 1200.0, 580.0 / 1600.0, 100.0 / 1200.0, 120.0 / 1600.0);
        let tile = rect(400, 400, 860, 860);
        let out = reproject_annotation(&[source], image_w, image_h, &tile, THRESHOLD);
        assert_eq!(out.len(), 1);
        let b = out[0];
        assert_eq!(b.class_id, 1);

        let tw = tile.width() as f64;
        let th = tile.height() as f64;
        let x1 = (b.xc - b.w / 2.0) * tw + tile.x_start as f64;
        let y1 = (b.yc - b.h / 2.0) * th + tile.y_start as f64;
        let x2 = (b.xc + b.w / 2.0) * tw + tile.x_start as f64;
        let y2 = (b.yc + b.h / 2.0) * th + tile.y_start as f64;
        assert!((x1 - 500.0).abs() < 1e-3);
        assert!((y1 - 520.0).abs() < 1e-3);
        assert!((x2 - 600.0).abs() < 1e-3);
        assert!((y2 - 640.0).abs() < 1e-3);
    }

    #[test]
    fn test_box_outside_tile_is_dropped() {
        let pb = PixelBox { x1: 0.0, y1: 0.0, x2: 50.0, y2: 50.0 };
        assert!(reproject_box(0, &pb, &rect(100, 100, 200, 200), THRESHOLD).is_none());
        // touching edges only is an empty intersection
        assert!(reproject_box(0, &pb, &rect(50, 0, 150, 100), THRESHOLD).is_none());
    }

    #[test]
    fn test_visible_ratio_threshold() {
        // 100x100 box, tile sees a 1x10 strip (0.1%) and then a 1x30 strip (0.3%)
        let pb = PixelBox { x1: 0.0, y1: 0.0, x2: 100.0, y2: 100.0 };
        assert!(reproject_box(0, &pb, &rect(99, 90, 200, 200), THRESHOLD).is_none());
        assert!(reproject_box(0, &pb, &rect(99, 70, 200, 200), THRESHOLD).is_some());
    }

    #[test]
    fn test_clipped_box_normalized_to_actual_tile_size() {
        // edge tile narrower than nominal: 60x100 pixels
        let tile = rect(940, 0, 1000, 100);
        let pb = PixelBox { x1: 900.0, y1: 20.0, x2: 1000.0, y2: 60.0 };
        let b = reproject_box(2, &pb, &tile, THRESHOLD).unwrap();
        assert!((b.xc - 0.5).abs() < 1e-9);
        assert!((b.w - 1.0).abs() < 1e-9);
        assert!((b.yc - 0.4).abs() < 1e-9);
        assert!((b.h - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_outputs_stay_normalized() {
        let tiles = [rect(0, 0, 460, 460), rect(400, 400, 860, 860), rect(740, 1140, 1200, 1600)];
        let boxes = [
            norm(0, 0.5, 0.5, 0.9, 0.9),
            norm(1, 0.02, 0.98, 0.1, 0.1),
            norm(0, 0.99, 0.99, 0.05, 0.05),
            norm(1, 0.4, 0.3, 1.2, 0.8),
        ];
        for tile in &tiles {
            for b in reproject_annotation(&boxes, 1200, 1600, tile, THRESHOLD) {
                for v in [b.xc, b.yc, b.w, b.h] {
                    assert!((0.0..=1.0).contains(&v), "value {v} outside [0, 1]");
                }
            }
        }
    }
}
