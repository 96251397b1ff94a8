//! Field photo tiler for YOLO training
//!
//! This library cuts large photographs into overlapping tiles, re-derives the
//! YOLO box labels of every tile, allocates train/val/test splits and
//! rebalances the train split by trimming background tiles and duplicating
//! flower-dominated tiles.

pub mod annotation;
pub mod balance;
pub mod config;
pub mod error;
pub mod grid;
pub mod io;
pub mod pipeline;
pub mod reproject;
pub mod split;
pub mod tiling;
pub mod types;
pub mod utils;

// Re-export commonly used types and functions
pub use balance::{balance_train_split, oversample_class, trim_background, BalanceReport};
pub use config::{Args, BalanceConfig, PipelineConfig, SplitConfig, TilingConfig};
pub use error::{PipelineError, PipelineResult};
pub use grid::{plan_grid, TileGrid};
pub use pipeline::{process_dataset, process_inference, DatasetOutput};
pub use reproject::{reproject_annotation, reproject_box, PixelBox};
pub use split::allocate_splits;
pub use tiling::materialize_tiles;
pub use types::{
    AnnotationBox, DatasetManifest, ManifestEntry, MaterializedTile, SourceImage, Split,
    SplitAssignment, TileRect,
};
