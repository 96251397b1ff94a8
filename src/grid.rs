//! Overlapping, edge-clamped tile grids.

use crate::types::TileRect;

/// Grid layout and the pixel rectangle of every cell for one image.
#[derive(Debug, Clone, PartialEq)]
pub struct TileGrid {
    pub rows: u32,
    pub cols: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub stride_x: u32,
    pub stride_y: u32,
    pub image_width: u32,
    pub image_height: u32,
    /// Row-major, `rows * cols` entries.
    pub rects: Vec<TileRect>,
}

impl TileGrid {
    /// The image is no larger than one tile along some axis, so the grid cells
    /// collapse onto the same rectangle(s).
    pub fn is_degenerate(&self) -> bool {
        self.tile_width >= self.image_width || self.tile_height >= self.image_height
    }

    /// Name fragment shared by every tile of this grid, e.g. `grid3x4`.
    pub fn label(&self) -> String {
        format!("grid{}x{}", self.rows, self.cols)
    }
}

/// Portrait images get 4 rows x 3 columns, everything else 3 x 4.
pub fn grid_shape(width: u32, height: u32) -> (u32, u32) {
    if height > width {
        (4, 3)
    } else {
        (3, 4)
    }
}

// Tile size and stride along one axis. The tile is widened when flooring
// would leave the last cell short of the far border.
fn axis_layout(dim: u32, cells: u32, overlap: f64) -> (u32, u32) {
    let base = dim as f64 / cells as f64;
    let stride = base.floor() as u32;
    let nominal = (base * (1.0 + overlap)).floor() as u32;
    let reach = dim.saturating_sub((cells - 1) * stride);
    let tile = nominal.max(reach).clamp(1, dim);
    (tile, stride)
}

fn axis_span(index: u32, stride: u32, tile: u32, dim: u32) -> (u32, u32) {
    let start = (index as u64 * stride as u64).min((dim - tile) as u64) as u32;
    let end = (start + tile).min(dim);
    (start, end)
}

/// Plan the tile grid of a `width x height` image.
///
/// `width` and `height` must be positive.
pub fn plan_grid(width: u32, height: u32, overlap: f64) -> TileGrid {
    debug_assert!(width > 0 && height > 0);
    let (rows, cols) = grid_shape(width, height);
    let (tile_width, stride_x) = axis_layout(width, cols, overlap);
    let (tile_height, stride_y) = axis_layout(height, rows, overlap);

    let mut rects = Vec::with_capacity((rows * cols) as usize);
    for row in 0..rows {
        let (y_start, y_end) = axis_span(row, stride_y, tile_height, height);
        for col in 0..cols {
            let (x_start, x_end) = axis_span(col, stride_x, tile_width, width);
            rects.push(TileRect {
                row,
                col,
                x_start,
                y_start,
                x_end,
                y_end,
            });
        }
    }

    TileGrid {
        rows,
        cols,
        tile_width,
        tile_height,
        stride_x,
        stride_y,
        image_width: width,
        image_height: height,
        rects,
    }
}
