use jwalk::WalkDir;
use log::{info, warn};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::annotation::read_annotation_file;
use crate::error::{PipelineError, PipelineResult};
use crate::types::{is_image_path, OutputDirs, SourceImage, Split};
use crate::utils::{create_output_directory, dedupe_prefixes, tile_prefix};

/// Wipe the output root and create `images/<split>` and `labels/<split>` for
/// every split, before any parallel work starts.
pub fn setup_output_directories(output_dir: &Path) -> PipelineResult<OutputDirs> {
    let root = create_output_directory(output_dir)?;
    let labels_dir = create_output_directory(&root.join("labels"))?;
    let images_dir = create_output_directory(&root.join("images"))?;

    Ok(OutputDirs {
        train_labels_dir: create_output_directory(&labels_dir.join("train"))?,
        val_labels_dir: create_output_directory(&labels_dir.join("val"))?,
        test_labels_dir: create_output_directory(&labels_dir.join("test"))?,
        train_images_dir: create_output_directory(&images_dir.join("train"))?,
        val_images_dir: create_output_directory(&images_dir.join("val"))?,
        test_images_dir: create_output_directory(&images_dir.join("test"))?,
        root,
    })
}

/// Where source images live: `<input>/images` when present, else `<input>`.
pub fn source_images_root(input_dir: &Path) -> PathBuf {
    let images = input_dir.join("images");
    if images.is_dir() {
        images
    } else {
        input_dir.to_path_buf()
    }
}

/// Label file for an image: `<input>/labels/<stem>.txt` if that directory
/// exists, otherwise `<stem>.txt` next to the image.
pub fn annotation_path_for(input_dir: &Path, image_path: &Path) -> Option<PathBuf> {
    let stem = image_path.file_stem()?;
    let labels_dir = input_dir.join("labels");
    let file_name = Path::new(stem).with_extension("txt");
    if labels_dir.is_dir() {
        Some(labels_dir.join(file_name))
    } else {
        image_path.parent().map(|parent| parent.join(file_name))
    }
}

/// Find every source image under the input directory, skipping `exclude`
/// (the output directory when it is nested in the input).
pub fn find_image_files(input_dir: &Path, exclude: &Path) -> Vec<PathBuf> {
    let root = source_images_root(input_dir);
    let exclude_name = exclude.file_name().map(|n| n.to_os_string());
    let mut files: Vec<PathBuf> = WalkDir::new(&root)
        .sort(true)
        .process_read_dir(move |_, _, _, children| {
            children.retain(|entry| match entry {
                Ok(entry) if entry.file_type().is_dir() => {
                    Some(entry.file_name().to_os_string()) != exclude_name
                }
                _ => true,
            });
        })
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path())
        .filter(|path| is_image_path(path) && !path.starts_with(exclude))
        .collect();
    files.sort();
    files
}

/// Discover source images with their dimensions and annotations.
///
/// Images whose header cannot be read are skipped with a warning. Missing
/// annotation files mean background images.
pub fn discover_source_images(input_dir: &Path, exclude: &Path) -> Vec<SourceImage> {
    let image_paths = find_image_files(input_dir, exclude);
    info!("Found {} candidate images.", image_paths.len());

    let mut sources: Vec<SourceImage> = image_paths
        .into_par_iter()
        .filter_map(|path| {
            let (width, height) = match image::image_dimensions(&path) {
                Ok(dims) => dims,
                Err(e) => {
                    warn!("Skipping unreadable image {}: {}", path.display(), e);
                    return None;
                }
            };
            if width == 0 || height == 0 {
                warn!("Skipping empty image {}", path.display());
                return None;
            }
            let annotation_path = annotation_path_for(input_dir, &path);
            let annotation = annotation_path.as_deref().and_then(|lbl| {
                read_annotation_file(lbl).unwrap_or_else(|e| {
                    warn!(
                        "Failed to read annotation {}, treating as background: {}",
                        lbl.display(),
                        e
                    );
                    None
                })
            });
            Some(SourceImage {
                prefix: tile_prefix(&path),
                path,
                width,
                height,
                annotation_path,
                annotation,
            })
        })
        .collect();

    let mut prefixes: Vec<String> = sources.iter().map(|s| s.prefix.clone()).collect();
    dedupe_prefixes(&mut prefixes);
    for (source, prefix) in sources.iter_mut().zip(prefixes) {
        if source.prefix != prefix {
            warn!(
                "Duplicate file name {}, tiles will use prefix {}",
                source.path.display(),
                prefix
            );
            source.prefix = prefix;
        }
    }
    sources
}

/// Class names in id order: the CLI list, else `classes.txt` in the input
/// directory, else the observed class ids named by number.
pub fn resolve_class_names(
    label_list: &[String],
    input_dir: &Path,
    sources: &[SourceImage],
) -> Vec<String> {
    if !label_list.is_empty() {
        return label_list.to_vec();
    }

    let classes_path = input_dir.join("classes.txt");
    if let Ok(content) = fs::read_to_string(&classes_path) {
        let names: Vec<String> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        if !names.is_empty() {
            info!("Read {} class names from {}", names.len(), classes_path.display());
            return names;
        }
    }

    let observed: BTreeSet<u32> = sources
        .iter()
        .flat_map(|s| s.boxes().iter().map(|b| b.class_id))
        .collect();
    match observed.last() {
        Some(&max_id) => (0..=max_id).map(|id| id.to_string()).collect(),
        None => Vec::new(),
    }
}

/// Create the dataset.yaml file consumed by the YOLO trainer
pub fn create_dataset_yaml(output_dirs: &OutputDirs, class_names: &[String]) -> PipelineResult<()> {
    let dataset_yaml_path = output_dirs.root.join("dataset.yaml");
    let absolute_path =
        fs::canonicalize(&output_dirs.root).map_err(|e| PipelineError::io(&output_dirs.root, e))?;

    let mut yaml_content = format!("path: {}\n", absolute_path.to_string_lossy());
    for split in Split::ALL {
        yaml_content.push_str(&format!("{}: images/{}\n", split, split));
    }
    yaml_content.push_str("\nnames:\n");
    for (id, name) in class_names.iter().enumerate() {
        yaml_content.push_str(&format!("    {}: {}\n", id, name));
    }

    let file =
        File::create(&dataset_yaml_path).map_err(|e| PipelineError::io(&dataset_yaml_path, e))?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(yaml_content.as_bytes())
        .and_then(|_| writer.flush())
        .map_err(|e| PipelineError::io(&dataset_yaml_path, e))
}

/// Serialize `value` as pretty JSON to `path`.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> PipelineResult<()> {
    let file = File::create(path).map_err(|e| PipelineError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value).map_err(|e| PipelineError::Json {
        path: path.to_path_buf(),
        source: e,
    })?;
    writer.flush().map_err(|e| PipelineError::io(path, e))
}
