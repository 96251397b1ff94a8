//! Post-tiling correction of the train split.
//!
//! Two phases, always in this order: background tiles are trimmed to a target
//! share, then tiles dominated by the flower class are duplicated. Copies
//! never count toward the background ratio and a copied tile is never deleted.

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::annotation::parse_annotation;
use crate::config::BalanceConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::types::{DatasetManifest, ManifestEntry, Split};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrimReport {
    /// Train tiles whose label file could be read.
    pub total_tiles: usize,
    pub empty_tiles: usize,
    pub unreadable_labels: usize,
    pub target_empty: usize,
    pub removed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OversampleReport {
    pub eligible_tiles: usize,
    pub copies: usize,
    pub unreadable_labels: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BalanceReport {
    pub trim: TrimReport,
    pub oversample: OversampleReport,
    pub counts_before_oversampling: BTreeMap<u32, usize>,
    pub counts_after_oversampling: BTreeMap<u32, usize>,
}

fn read_label(entry: &ManifestEntry) -> Option<String> {
    let label_path = entry.label_path.as_ref()?;
    match fs::read_to_string(label_path) {
        Ok(content) => Some(content),
        Err(e) => {
            warn!("Skipping unreadable label {}: {}", label_path.display(), e);
            None
        }
    }
}

fn remove_file(path: &Path) -> PipelineResult<()> {
    fs::remove_file(path).map_err(|e| PipelineError::io(path, e))
}

fn copy_file(from: &Path, to: &Path) -> PipelineResult<()> {
    fs::copy(from, to)
        .map(|_| ())
        .map_err(|e| PipelineError::io(to, e))
}

/// Delete background train tiles until they make up at most
/// `floor(total * background_ratio)` of the split.
///
/// Only removes tiles. When there are already too few empty tiles nothing
/// happens. Which tiles go is decided by a shuffle seeded with `config.seed`
/// over the manifest order.
pub fn trim_background(
    manifest: &mut DatasetManifest,
    config: &BalanceConfig,
) -> PipelineResult<TrimReport> {
    let mut report = TrimReport::default();
    let mut empty_tiles: Vec<&ManifestEntry> = Vec::new();

    for entry in manifest.split_entries(Split::Train) {
        match read_label(entry) {
            Some(content) => {
                report.total_tiles += 1;
                if content.trim().is_empty() {
                    empty_tiles.push(entry);
                }
            }
            None => report.unreadable_labels += 1,
        }
    }

    report.empty_tiles = empty_tiles.len();
    if report.total_tiles == 0 {
        info!("Background trim: no readable train tiles, nothing to do.");
        return Ok(report);
    }

    report.target_empty = (report.total_tiles as f64 * config.background_ratio).floor() as usize;
    info!(
        "Background trim: total={}, empty={}, target={}",
        report.total_tiles, report.empty_tiles, report.target_empty
    );

    if report.empty_tiles <= report.target_empty {
        info!(
            "Background share {:.1}% is at or below the {:.1}% target, keeping all empty tiles.",
            100.0 * report.empty_tiles as f64 / report.total_tiles as f64,
            100.0 * config.background_ratio
        );
        return Ok(report);
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    empty_tiles.shuffle(&mut rng);
    let to_remove: Vec<(String, PathBuf, Option<PathBuf>)> = empty_tiles[report.target_empty..]
        .iter()
        .map(|entry| {
            (
                entry.tile_id.clone(),
                entry.image_path.clone(),
                entry.label_path.clone(),
            )
        })
        .collect();

    to_remove
        .par_iter()
        .try_for_each(|(tile_id, image_path, label_path)| {
            debug!("Removing background tile {}", tile_id);
            remove_file(image_path)?;
            match label_path {
                Some(label_path) => remove_file(label_path),
                None => Ok(()),
            }
        })?;

    let removed_ids: HashSet<String> = to_remove.into_iter().map(|(id, _, _)| id).collect();
    report.removed = removed_ids.len();
    manifest.remove_tiles(Split::Train, &removed_ids);
    info!("Removed {} surplus empty tiles.", report.removed);
    Ok(report)
}

/// Share of `flower_class_id` boxes among all boxes of a label file, `None`
/// for a background label.
pub fn flower_ratio(label_content: &str, flower_class_id: u32) -> Option<f64> {
    let boxes = parse_annotation(label_content).boxes;
    if boxes.is_empty() {
        return None;
    }
    let flowers = boxes
        .iter()
        .filter(|b| b.class_id == flower_class_id)
        .count();
    Some(flowers as f64 / boxes.len() as f64)
}

fn duplicate_path(path: &Path, new_stem: &str) -> PathBuf {
    let file_name = match path.extension() {
        Some(ext) => format!("{}.{}", new_stem, ext.to_string_lossy()),
        None => new_stem.to_string(),
    };
    path.with_file_name(file_name)
}

/// Copy every train tile whose flower ratio reaches `min_flower_ratio`
/// `oversample_factor` times, as `<tile_id>_aug_<i>`.
///
/// Copies are byte-identical and are appended to the manifest. Tiles that are
/// themselves copies are never duplicated again.
pub fn oversample_class(
    manifest: &mut DatasetManifest,
    config: &BalanceConfig,
) -> PipelineResult<OversampleReport> {
    let mut report = OversampleReport::default();
    let mut duplicates: Vec<(ManifestEntry, PathBuf, PathBuf)> = Vec::new();

    for entry in manifest
        .split_entries(Split::Train)
        .filter(|entry| entry.duplicate_of.is_none())
    {
        let (Some(label_path), Some(content)) = (entry.label_path.as_ref(), read_label(entry))
        else {
            report.unreadable_labels += 1;
            continue;
        };
        // background tiles are never eligible, whatever the threshold
        match flower_ratio(&content, config.flower_class_id) {
            Some(ratio) if ratio >= config.min_flower_ratio => {}
            _ => continue,
        }

        report.eligible_tiles += 1;
        for i in 0..config.oversample_factor {
            let new_id = format!("{}_aug_{}", entry.tile_id, i);
            let duplicate = ManifestEntry {
                split: Split::Train,
                image_path: duplicate_path(&entry.image_path, &new_id),
                label_path: Some(duplicate_path(label_path, &new_id)),
                tile_id: new_id,
                duplicate_of: Some(entry.tile_id.clone()),
            };
            duplicates.push((duplicate, entry.image_path.clone(), label_path.clone()));
        }
    }

    duplicates
        .par_iter()
        .try_for_each(|(duplicate, image_src, label_src)| {
            copy_file(image_src, &duplicate.image_path)?;
            match &duplicate.label_path {
                Some(label_dst) => copy_file(label_src, label_dst),
                None => Ok(()),
            }
        })?;

    report.copies = duplicates.len();
    manifest
        .entries
        .extend(duplicates.into_iter().map(|(duplicate, _, _)| duplicate));
    info!(
        "Oversampled {} flower tiles, {} copies written.",
        report.eligible_tiles, report.copies
    );
    Ok(report)
}

/// Boxes per class over the label files of one split.
pub fn class_counts(manifest: &DatasetManifest, split: Split) -> BTreeMap<u32, usize> {
    let mut counts = BTreeMap::new();
    for content in manifest.split_entries(split).filter_map(read_label) {
        for b in parse_annotation(&content).boxes {
            *counts.entry(b.class_id).or_insert(0) += 1;
        }
    }
    counts
}

pub fn report_class_counts(name: &str, counts: &BTreeMap<u32, usize>) {
    let total: usize = counts.values().sum();
    if total == 0 {
        info!("{}: no objects", name);
        return;
    }
    let shares: Vec<String> = counts
        .iter()
        .map(|(class_id, count)| {
            format!(
                "class {}={} ({:.1}%)",
                class_id,
                count,
                100.0 * *count as f64 / total as f64
            )
        })
        .collect();
    info!("{}: {} | total={}", name, shares.join(" | "), total);
}

/// Trim background tiles, then oversample flower tiles, on the train split.
pub fn balance_train_split(
    manifest: &mut DatasetManifest,
    config: &BalanceConfig,
) -> PipelineResult<BalanceReport> {
    let trim = trim_background(manifest, config)?;

    let counts_before_oversampling = class_counts(manifest, Split::Train);
    report_class_counts("Train before oversampling", &counts_before_oversampling);

    let oversample = oversample_class(manifest, config)?;

    let counts_after_oversampling = class_counts(manifest, Split::Train);
    report_class_counts("Train after oversampling", &counts_after_oversampling);

    Ok(BalanceReport {
        trim,
        oversample,
        counts_before_oversampling,
        counts_after_oversampling,
    })
}
