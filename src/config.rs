use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use crate::error::{PipelineError, PipelineResult};

pub const DEFAULT_OVERLAP: f64 = 0.15;
// Fraction of a box's own area that must survive clipping to a tile (0.2%).
pub const DEFAULT_MIN_AREA_THRESHOLD: f64 = 0.002;
pub const DEFAULT_TRAIN_SIZE: f64 = 0.8;
pub const DEFAULT_VAL_SIZE: f64 = 0.1;
pub const DEFAULT_BACKGROUND_RATIO: f64 = 0.15;
pub const DEFAULT_MIN_FLOWER_RATIO: f64 = 0.8;
pub const DEFAULT_OVERSAMPLE_FACTOR: usize = 10;
pub const DEFAULT_FLOWER_CLASS_ID: u32 = 0;
pub const DEFAULT_SEED: u64 = 42;

/// Command-line arguments for tiling a photo collection into a YOLO dataset.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Directory holding the source images (and optional labels/ and classes.txt)
    #[arg(short = 'i', long = "input_dir")]
    pub input_dir: String,

    /// Output directory, wiped on every run. Defaults to <input_dir>/TiledDataset
    #[arg(short = 'o', long = "output_dir")]
    pub output_dir: Option<String>,

    /// Fraction by which each tile extends past its grid cell
    #[arg(long = "overlap", default_value_t = DEFAULT_OVERLAP, value_parser = validate_overlap)]
    pub overlap: f64,

    /// Minimum visible fraction of a box's area for it to be kept in a tile
    #[arg(long = "min_area_threshold", default_value_t = DEFAULT_MIN_AREA_THRESHOLD, value_parser = validate_size)]
    pub min_area_threshold: f64,

    /// Proportion of source images assigned to training
    #[arg(long = "train_size", default_value_t = DEFAULT_TRAIN_SIZE, value_parser = validate_size)]
    pub train_size: f64,

    /// Proportion of source images assigned to validation; the rest is test
    #[arg(long = "val_size", default_value_t = DEFAULT_VAL_SIZE, value_parser = validate_size)]
    pub val_size: f64,

    /// Target share of background tiles in the train split
    #[arg(long = "background_ratio", default_value_t = DEFAULT_BACKGROUND_RATIO, value_parser = validate_size)]
    pub background_ratio: f64,

    /// Minimum share of flower boxes for a train tile to be oversampled
    #[arg(long = "min_flower_ratio", default_value_t = DEFAULT_MIN_FLOWER_RATIO, value_parser = validate_size)]
    pub min_flower_ratio: f64,

    /// Number of copies made of each oversampled tile
    #[arg(long = "oversample_factor", default_value_t = DEFAULT_OVERSAMPLE_FACTOR)]
    pub oversample_factor: usize,

    /// Class id treated as the minority (flower) class
    #[arg(long = "flower_class_id", default_value_t = DEFAULT_FLOWER_CLASS_ID)]
    pub flower_class_id: u32,

    /// Seed for split shuffling and background trimming
    #[arg(long = "seed", default_value_t = DEFAULT_SEED)]
    pub seed: u64,

    /// Skip background trimming and oversampling of the train split
    #[arg(long = "skip_balance")]
    pub skip_balance: bool,

    /// Only cut tiles, without labels, splits or balancing
    #[arg(long = "inference")]
    pub inference: bool,

    /// Class names in id order
    #[arg(use_value_delimiter = true)]
    pub label_list: Vec<String>,
}

// Validate that the size is between 0.0 and 1.0
fn validate_size(s: &str) -> Result<f64, String> {
    match f64::from_str(s) {
        Ok(val) if (0.0..=1.0).contains(&val) => Ok(val),
        _ => Err("SIZE must be between 0.0 and 1.0".to_string()),
    }
}

fn validate_overlap(s: &str) -> Result<f64, String> {
    match f64::from_str(s) {
        Ok(val) if (0.0..1.0).contains(&val) => Ok(val),
        _ => Err("OVERLAP must be in [0.0, 1.0)".to_string()),
    }
}

/// Absolute form of `path` with symlinks and `..` resolved, for paths that
/// may not exist yet: the deepest existing ancestor is canonicalized and the
/// rest is appended lexically.
fn resolve_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut existing = absolute.as_path();
    let mut rest = Vec::new();
    let mut resolved = loop {
        if let Ok(canonical) = existing.canonicalize() {
            break canonical;
        }
        match (existing.parent(), existing.components().next_back()) {
            (Some(parent), Some(last)) => {
                rest.push(last);
                existing = parent;
            }
            _ => break existing.to_path_buf(),
        }
    };

    for component in rest.into_iter().rev() {
        match component {
            Component::ParentDir => {
                resolved.pop();
            }
            Component::CurDir => {}
            other => resolved.push(other),
        }
    }
    resolved
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TilingConfig {
    pub overlap: f64,
    pub min_area_threshold: f64,
    /// Write a label file per tile. Off in inference mode.
    pub write_labels: bool,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            overlap: DEFAULT_OVERLAP,
            min_area_threshold: DEFAULT_MIN_AREA_THRESHOLD,
            write_labels: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitConfig {
    pub train_size: f64,
    pub val_size: f64,
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            train_size: DEFAULT_TRAIN_SIZE,
            val_size: DEFAULT_VAL_SIZE,
            seed: DEFAULT_SEED,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BalanceConfig {
    pub enabled: bool,
    pub background_ratio: f64,
    pub min_flower_ratio: f64,
    pub oversample_factor: usize,
    pub flower_class_id: u32,
    pub seed: u64,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            background_ratio: DEFAULT_BACKGROUND_RATIO,
            min_flower_ratio: DEFAULT_MIN_FLOWER_RATIO,
            oversample_factor: DEFAULT_OVERSAMPLE_FACTOR,
            flower_class_id: DEFAULT_FLOWER_CLASS_ID,
            seed: DEFAULT_SEED,
        }
    }
}

/// Immutable settings of one run, handed to every stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub inference: bool,
    pub label_list: Vec<String>,
    pub tiling: TilingConfig,
    pub split: SplitConfig,
    pub balance: BalanceConfig,
}

impl PipelineConfig {
    /// A config with default settings for the given directories.
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            inference: false,
            label_list: Vec::new(),
            tiling: TilingConfig::default(),
            split: SplitConfig::default(),
            balance: BalanceConfig::default(),
        }
    }

    pub fn from_args(args: &Args) -> PipelineResult<Self> {
        let input_dir = PathBuf::from(&args.input_dir);
        let output_dir = args
            .output_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| input_dir.join("TiledDataset"));

        let config = Self {
            input_dir,
            output_dir,
            inference: args.inference,
            label_list: args.label_list.clone(),
            tiling: TilingConfig {
                overlap: args.overlap,
                min_area_threshold: args.min_area_threshold,
                write_labels: !args.inference,
            },
            split: SplitConfig {
                train_size: args.train_size,
                val_size: args.val_size,
                seed: args.seed,
            },
            balance: BalanceConfig {
                enabled: !args.skip_balance && !args.inference,
                background_ratio: args.background_ratio,
                min_flower_ratio: args.min_flower_ratio,
                oversample_factor: args.oversample_factor,
                flower_class_id: args.flower_class_id,
                seed: args.seed,
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.split.train_size + self.split.val_size > 1.0 + f64::EPSILON {
            return Err(PipelineError::InvalidConfig(format!(
                "train_size ({}) + val_size ({}) exceeds 1.0",
                self.split.train_size, self.split.val_size
            )));
        }
        if !(0.0..1.0).contains(&self.tiling.overlap) {
            return Err(PipelineError::InvalidConfig(format!(
                "overlap {} outside [0.0, 1.0)",
                self.tiling.overlap
            )));
        }
        if resolve_path(&self.input_dir).starts_with(resolve_path(&self.output_dir)) {
            return Err(PipelineError::InvalidConfig(format!(
                "output_dir {} is wiped on every run and must not contain input_dir",
                self.output_dir.display()
            )));
        }
        Ok(())
    }
}
