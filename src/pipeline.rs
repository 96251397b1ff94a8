use log::info;
use rayon::prelude::*;
use serde::Serialize;
use std::fs;

use crate::balance::{balance_train_split, BalanceReport};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::io::{
    create_dataset_yaml, discover_source_images, resolve_class_names, setup_output_directories,
    write_json,
};
use crate::split::allocate_splits;
use crate::tiling::{materialize_batch, materialize_tiles};
use crate::types::{
    DatasetManifest, ManifestEntry, MaterializedTile, OutputDirs, ProcessingStats, Split,
    SplitAssignment,
};
use crate::utils::{create_output_directory, create_progress_bar};

/// Everything a training run produced, as handed to the trainer.
#[derive(Debug, Clone)]
pub struct DatasetOutput {
    pub output_dirs: OutputDirs,
    pub class_names: Vec<String>,
    pub manifest: DatasetManifest,
    pub stats: ProcessingStats,
    pub balance: Option<BalanceReport>,
}

#[derive(Serialize)]
struct ManifestFile<'a> {
    created_at: String,
    config: &'a PipelineConfig,
    class_names: &'a [String],
    stats: &'a ProcessingStats,
    balance: Option<&'a BalanceReport>,
    entries: &'a [ManifestEntry],
}

/// Tile every split into its own directories. Directories must already exist.
pub fn tile_splits(
    assignment: &SplitAssignment,
    output_dirs: &OutputDirs,
    config: &PipelineConfig,
) -> PipelineResult<(DatasetManifest, ProcessingStats)> {
    let mut manifest = DatasetManifest::new();
    let mut stats = ProcessingStats::new();

    for split in Split::ALL {
        let sources = assignment.get(split);
        if sources.is_empty() {
            continue;
        }
        let label = split.as_str();
        let pb = create_progress_bar(sources.len() as u64, label);
        let label_dir = config
            .tiling
            .write_labels
            .then(|| output_dirs.labels_dir(split));
        let (tiles, split_stats) = materialize_batch(
            sources,
            output_dirs.images_dir(split),
            label_dir,
            &config.tiling,
            &pb,
        )?;
        pb.finish_with_message(format!("{} tiling complete", label));
        info!("{}: {} tiles from {} images.", label, tiles.len(), sources.len());

        manifest.extend_split(split, tiles);
        stats.merge(&split_stats);
    }

    Ok((manifest, stats))
}

/// Main dataset pipeline: discover, split, tile, balance, describe.
pub fn process_dataset(config: &PipelineConfig) -> PipelineResult<DatasetOutput> {
    config.validate()?;
    if !config.input_dir.is_dir() {
        return Err(PipelineError::InputNotFound(config.input_dir.clone()));
    }

    let output_dirs = setup_output_directories(&config.output_dir)?;

    let sources = discover_source_images(&config.input_dir, &config.output_dir);
    info!("Discovered {} readable source images.", sources.len());
    let class_names = resolve_class_names(&config.label_list, &config.input_dir, &sources);

    let assignment = allocate_splits(sources, &config.split);

    let (mut manifest, stats) = tile_splits(&assignment, &output_dirs, config)?;
    stats.print_summary();

    let balance = if config.balance.enabled {
        info!("Balancing train split...");
        Some(balance_train_split(&mut manifest, &config.balance)?)
    } else {
        info!("Balancing disabled, train split left as tiled.");
        None
    };

    info!("Creating dataset.yaml file...");
    create_dataset_yaml(&output_dirs, &class_names)?;

    let manifest_path = output_dirs.root.join("manifest.json");
    write_json(
        &manifest_path,
        &ManifestFile {
            created_at: chrono::Utc::now().to_rfc3339(),
            config,
            class_names: &class_names,
            stats: &stats,
            balance: balance.as_ref(),
            entries: &manifest.entries,
        },
    )?;
    info!(
        "Dataset ready in {} ({} tiles).",
        output_dirs.root.display(),
        manifest.len()
    );

    Ok(DatasetOutput {
        output_dirs,
        class_names,
        manifest,
        stats,
        balance,
    })
}

/// Inference mode: cut every image into `tiles/<prefix>/`, no labels, no splits.
pub fn process_inference(config: &PipelineConfig) -> PipelineResult<Vec<MaterializedTile>> {
    config.validate()?;
    if !config.input_dir.is_dir() {
        return Err(PipelineError::InputNotFound(config.input_dir.clone()));
    }

    let root = create_output_directory(&config.output_dir)?;
    let sources = discover_source_images(&config.input_dir, &config.output_dir);

    let tiles_root = root.join("tiles");
    let mut tile_dirs = Vec::with_capacity(sources.len());
    for source in &sources {
        let dir = tiles_root.join(&source.prefix);
        fs::create_dir_all(&dir).map_err(|e| PipelineError::io(&dir, e))?;
        tile_dirs.push(dir);
    }

    let pb = create_progress_bar(sources.len() as u64, "Tiles");
    let outcomes = sources
        .par_iter()
        .zip(tile_dirs.par_iter())
        .map(|(source, dir)| {
            let outcome = materialize_tiles(source, dir, None, &config.tiling);
            pb.inc(1);
            outcome
        })
        .collect::<PipelineResult<Vec<_>>>()?;
    pb.finish_with_message("Tiling complete");

    let mut stats = ProcessingStats::new();
    let mut tiles = Vec::new();
    for outcome in outcomes {
        stats.merge(&outcome.stats);
        tiles.extend(outcome.tiles.unwrap_or_default());
    }
    stats.print_summary();

    write_json(&root.join("tiles.json"), &tiles)?;
    info!("Wrote {} tiles to {}.", tiles.len(), tiles_root.display());
    Ok(tiles)
}
