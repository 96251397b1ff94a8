use indicatif::ProgressBar;
use log::{debug, warn};
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::annotation::format_label_file;
use crate::config::TilingConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::grid::{plan_grid, TileGrid};
use crate::reproject::reproject_annotation;
use crate::types::{MaterializedTile, ProcessingStats, SourceImage, TileRect};

/// `{prefix}_grid{rows}x{cols}_r{row}c{col}`
pub fn tile_id(prefix: &str, grid: &TileGrid, rect: &TileRect) -> String {
    format!("{}_{}_r{}c{}", prefix, grid.label(), rect.row, rect.col)
}

pub struct TilingOutcome {
    /// `None` when the image was skipped.
    pub tiles: Option<Vec<MaterializedTile>>,
    pub stats: ProcessingStats,
}

fn write_label_file(path: &Path, contents: &str) -> PipelineResult<()> {
    let file = File::create(path).map_err(|e| PipelineError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(contents.as_bytes())
        .and_then(|_| writer.flush())
        .map_err(|e| PipelineError::io(path, e))
}

/// Cut one source image into its grid tiles and write them out.
///
/// An image that cannot be decoded is skipped (`tiles: None`). Any failure to
/// write a tile or label aborts with an error. With `label_dir` set, every
/// tile gets a label file, empty for background tiles.
pub fn materialize_tiles(
    source: &SourceImage,
    image_dir: &Path,
    label_dir: Option<&Path>,
    config: &TilingConfig,
) -> PipelineResult<TilingOutcome> {
    let mut stats = ProcessingStats::new();
    stats.total_images_processed = 1;

    let img = match image::open(&source.path) {
        Ok(img) => img,
        Err(e) => {
            warn!("Skipping undecodable image {}: {}", source.path.display(), e);
            stats.skipped_undecodable = 1;
            return Ok(TilingOutcome { tiles: None, stats });
        }
    };

    // Grid follows the decoded raster, not the header read at discovery
    let (width, height) = (img.width(), img.height());
    if width == 0 || height == 0 {
        warn!("Skipping empty image {}", source.path.display());
        stats.skipped_undecodable = 1;
        return Ok(TilingOutcome { tiles: None, stats });
    }

    let grid = plan_grid(width, height, config.overlap);
    if grid.is_degenerate() {
        warn!(
            "Degenerate {} grid for {} ({}x{}): tiles repeat the whole image",
            grid.label(),
            source.path.display(),
            width,
            height
        );
        stats.degenerate_grids = 1;
    }

    let extension = source
        .path
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned())
        .unwrap_or_else(|| "png".to_string());

    let mut tiles = Vec::with_capacity(grid.rects.len());
    for rect in &grid.rects {
        let id = tile_id(&source.prefix, &grid, rect);
        let image_path = image_dir.join(format!("{}.{}", id, extension));
        let crop = img.crop_imm(rect.x_start, rect.y_start, rect.width(), rect.height());
        crop.save(&image_path).map_err(|e| PipelineError::ImageWrite {
            path: image_path.clone(),
            source: e,
        })?;

        let label_path = match label_dir {
            Some(label_dir) => {
                let boxes = reproject_annotation(
                    source.boxes(),
                    width,
                    height,
                    rect,
                    config.min_area_threshold,
                );
                debug!("{}: {} box(es) kept", id, boxes.len());
                let label_path: PathBuf = label_dir.join(format!("{}.txt", id));
                write_label_file(&label_path, &format_label_file(&boxes))?;
                if boxes.is_empty() {
                    stats.background_tiles += 1;
                }
                stats.boxes_written += boxes.len();
                Some(label_path)
            }
            None => None,
        };

        stats.tiles_written += 1;
        tiles.push(MaterializedTile {
            tile_id: id,
            image_path,
            label_path,
            rect: *rect,
        });
    }

    stats.tiled_images = 1;
    Ok(TilingOutcome {
        tiles: Some(tiles),
        stats,
    })
}

/// Tile a batch of images in parallel.
///
/// Tiles come back in input order regardless of scheduling. The first write
/// failure aborts the batch.
pub fn materialize_batch(
    sources: &[SourceImage],
    image_dir: &Path,
    label_dir: Option<&Path>,
    config: &TilingConfig,
    pb: &ProgressBar,
) -> PipelineResult<(Vec<MaterializedTile>, ProcessingStats)> {
    let outcomes: Vec<TilingOutcome> = sources
        .par_iter()
        .map(|source| {
            let outcome = materialize_tiles(source, image_dir, label_dir, config);
            pb.inc(1);
            outcome
        })
        .collect::<PipelineResult<_>>()?;

    let mut stats = ProcessingStats::new();
    let mut tiles = Vec::new();
    for outcome in outcomes {
        stats.merge(&outcome.stats);
        if let Some(batch) = outcome.tiles {
            tiles.extend(batch);
        }
    }
    Ok((tiles, stats))
}
