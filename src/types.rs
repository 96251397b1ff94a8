use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// Supported source image formats
pub const IMG_FORMATS: &[&str] = &["bmp", "jpeg", "jpg", "png", "tif", "tiff", "webp"];

// Precomputed HashSet of image extensions for fast lookup
pub static IMAGE_EXTENSIONS_SET: OnceLock<HashSet<String>> = OnceLock::new();

/// Get the image extensions set
pub fn get_image_extensions_set() -> &'static HashSet<String> {
    IMAGE_EXTENSIONS_SET.get_or_init(|| IMG_FORMATS.iter().map(|ext| ext.to_lowercase()).collect())
}

/// Check whether a path carries one of the supported image extensions
pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| get_image_extensions_set().contains(&ext.to_lowercase()))
}

/// A YOLO box normalized to the image (or tile) it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnnotationBox {
    pub class_id: u32,
    pub xc: f64,
    pub yc: f64,
    pub w: f64,
    pub h: f64,
}

impl AnnotationBox {
    /// Render as a YOLO label line with six decimal digits.
    pub fn to_label_line(&self) -> String {
        format!(
            "{} {:.6} {:.6} {:.6} {:.6}",
            self.class_id, self.xc, self.yc, self.w, self.h
        )
    }
}

/// Parsed contents of one source annotation file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Annotation {
    pub boxes: Vec<AnnotationBox>,
    /// Lines dropped for a wrong token count or unparsable numbers.
    pub skipped_lines: usize,
    /// True when the file holds at least one non-blank line.
    pub has_content: bool,
}

/// A pixel rectangle of one grid cell, clamped to the image bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileRect {
    pub row: u32,
    pub col: u32,
    pub x_start: u32,
    pub y_start: u32,
    pub x_end: u32,
    pub y_end: u32,
}

impl TileRect {
    pub fn width(&self) -> u32 {
        self.x_end - self.x_start
    }

    pub fn height(&self) -> u32 {
        self.y_end - self.y_start
    }
}

/// A raw image found during discovery, with its dimensions and labels.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub path: PathBuf,
    /// Sanitized, collision-free file name prefix used for tile names.
    pub prefix: String,
    pub width: u32,
    pub height: u32,
    pub annotation_path: Option<PathBuf>,
    pub annotation: Option<Annotation>,
}

impl SourceImage {
    /// An image counts as populated when its annotation file has any content.
    pub fn is_populated(&self) -> bool {
        self.annotation.as_ref().is_some_and(|a| a.has_content)
    }

    pub fn boxes(&self) -> &[AnnotationBox] {
        self.annotation
            .as_ref()
            .map(|a| a.boxes.as_slice())
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    pub const ALL: [Split; 3] = [Split::Train, Split::Val, Split::Test];

    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Source images assigned to train/val/test, fixed before tiling starts
#[derive(Debug, Clone, Default)]
pub struct SplitAssignment {
    pub train: Vec<SourceImage>,
    pub val: Vec<SourceImage>,
    pub test: Vec<SourceImage>,
}

impl SplitAssignment {
    pub fn get(&self, split: Split) -> &[SourceImage] {
        match split {
            Split::Train => &self.train,
            Split::Val => &self.val,
            Split::Test => &self.test,
        }
    }

    pub fn len(&self) -> usize {
        self.train.len() + self.val.len() + self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// Struct to hold the paths to the output directories for train/val/test splits
#[derive(Debug, Clone)]
pub struct OutputDirs {
    pub root: PathBuf,
    pub train_labels_dir: PathBuf,
    pub val_labels_dir: PathBuf,
    pub test_labels_dir: PathBuf,
    pub train_images_dir: PathBuf,
    pub val_images_dir: PathBuf,
    pub test_images_dir: PathBuf,
}

impl OutputDirs {
    pub fn images_dir(&self, split: Split) -> &Path {
        match split {
            Split::Train => &self.train_images_dir,
            Split::Val => &self.val_images_dir,
            Split::Test => &self.test_images_dir,
        }
    }

    pub fn labels_dir(&self, split: Split) -> &Path {
        match split {
            Split::Train => &self.train_labels_dir,
            Split::Val => &self.val_labels_dir,
            Split::Test => &self.test_labels_dir,
        }
    }
}

/// One tile written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterializedTile {
    pub tile_id: String,
    pub image_path: PathBuf,
    pub label_path: Option<PathBuf>,
    pub rect: TileRect,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub split: Split,
    pub tile_id: String,
    pub image_path: PathBuf,
    pub label_path: Option<PathBuf>,
    /// Tile id this entry was copied from by oversampling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicate_of: Option<String>,
}

/// Every generated tile of a run, each tagged with its split.
///
/// Balancing reads and edits this list instead of re-scanning directories.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetManifest {
    pub entries: Vec<ManifestEntry>,
}

impl DatasetManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend_split(&mut self, split: Split, tiles: impl IntoIterator<Item = MaterializedTile>) {
        self.entries
            .extend(tiles.into_iter().map(|tile| ManifestEntry {
                split,
                tile_id: tile.tile_id,
                image_path: tile.image_path,
                label_path: tile.label_path,
                duplicate_of: None,
            }));
    }

    pub fn split_entries(&self, split: Split) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter().filter(move |entry| entry.split == split)
    }

    pub fn count(&self, split: Split) -> usize {
        self.split_entries(split).count()
    }

    /// Drop the entries of `split` whose tile id is in `tile_ids`.
    pub fn remove_tiles(&mut self, split: Split, tile_ids: &HashSet<String>) {
        self.entries
            .retain(|entry| entry.split != split || !tile_ids.contains(&entry.tile_id));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// Struct to hold processing statistics
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub total_images_processed: usize,
    pub tiled_images: usize,
    pub skipped_undecodable: usize,
    pub degenerate_grids: usize,
    pub tiles_written: usize,
    pub background_tiles: usize,
    pub boxes_written: usize,
}

impl ProcessingStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, other: &ProcessingStats) {
        self.total_images_processed += other.total_images_processed;
        self.tiled_images += other.tiled_images;
        self.skipped_undecodable += other.skipped_undecodable;
        self.degenerate_grids += other.degenerate_grids;
        self.tiles_written += other.tiles_written;
        self.background_tiles += other.background_tiles;
        self.boxes_written += other.boxes_written;
    }

    pub fn print_summary(&self) {
        log::info!("=== Tiling Summary ===");
        log::info!("Total images processed: {}", self.total_images_processed);
        log::info!("Images tiled: {}", self.tiled_images);
        log::info!("Tiles written: {}", self.tiles_written);
        log::info!(
            "Background tiles (empty label): {}",
            self.background_tiles
        );
        log::info!("Boxes written: {}", self.boxes_written);

        if self.skipped_undecodable > 0 {
            log::warn!(
                "Skipped (undecodable image): {}",
                self.skipped_undecodable
            );
        }
        if self.degenerate_grids > 0 {
            log::warn!(
                "Degenerate grids (image smaller than one tile): {}",
                self.degenerate_grids
            );
        }
    }
}
