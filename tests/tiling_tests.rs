use image::{Rgb, RgbImage};
use std::fs;
use std::path::{Path, PathBuf};

use phenotile::annotation::parse_annotation;
use phenotile::types::Annotation;
use phenotile::{
    materialize_tiles, plan_grid, AnnotationBox, PipelineError, SourceImage, TilingConfig,
};

fn write_image(path: &Path, width: u32, height: u32) {
    let img = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
    img.save(path).unwrap();
}

fn source(path: PathBuf, width: u32, height: u32, boxes: Vec<AnnotationBox>) -> SourceImage {
    let has_content = !boxes.is_empty();
    SourceImage {
        prefix: "plot.7".to_string(),
        path,
        width,
        height,
        annotation_path: None,
        annotation: Some(Annotation {
            boxes,
            skipped_lines: 0,
            has_content,
        }),
    }
}

#[test]
fn test_tiles_written_with_grid_names_and_sizes() {
    let dir = tempfile::tempdir().unwrap();
    let image_path = dir.path().join("plot.7.png");
    write_image(&image_path, 120, 160);
    let images_out = dir.path().join("images");
    let labels_out = dir.path().join("labels");
    fs::create_dir_all(&images_out).unwrap();
    fs::create_dir_all(&labels_out).unwrap();

    let src = source(image_path, 120, 160, Vec::new());
    let outcome =
        materialize_tiles(&src, &images_out, Some(&labels_out), &TilingConfig::default()).unwrap();
    let tiles = outcome.tiles.unwrap();
    assert_eq!(tiles.len(), 12);
    assert_eq!(outcome.stats.tiles_written, 12);
    assert_eq!(outcome.stats.background_tiles, 12);

    let grid = plan_grid(120, 160, 0.15);
    for (tile, rect) in tiles.iter().zip(&grid.rects) {
        let expected = format!("plot.7_grid4x3_r{}c{}", rect.row, rect.col);
        assert_eq!(tile.tile_id, expected);
        assert_eq!(tile.image_path, images_out.join(format!("{expected}.png")));

        let (w, h) = image::image_dimensions(&tile.image_path).unwrap();
        assert_eq!((w, h), (rect.width(), rect.height()));

        // background tiles still get a zero-byte label file
        let label_path = tile.label_path.as_ref().unwrap();
        assert_eq!(label_path, &labels_out.join(format!("{expected}.txt")));
        assert_eq!(fs::metadata(label_path).unwrap().len(), 0);
    }
}

#[test]
fn test_crop_matches_source_pixels() {
    let dir = tempfile::tempdir().unwrap();
    let image_path = dir.path().join("field.png");
    write_image(&image_path, 200, 100);
    let src = source(image_path, 200, 100, Vec::new());

    let tiles = materialize_tiles(&src, dir.path(), None, &TilingConfig::default())
        .unwrap()
        .tiles
        .unwrap();
    let last = tiles.last().unwrap();
    let crop = image::open(&last.image_path).unwrap().to_rgb8();
    let pixel = crop.get_pixel(0, 0);
    assert_eq!(pixel[0], last.rect.x_start as u8);
    assert_eq!(pixel[1], last.rect.y_start as u8);
}

#[test]
fn test_labels_reprojected_per_tile() {
    let dir = tempfile::tempdir().unwrap();
    let image_path = dir.path().join("plot.png");
    write_image(&image_path, 120, 160);
    let labels_out = dir.path().join("labels");
    fs::create_dir_all(&labels_out).unwrap();

    // a small box fully inside the top-left cell: pixels (5,5)-(25,25)
    let boxes = vec![AnnotationBox {
        class_id: 1,
        xc: 15.0 / 120.0,
        yc: 15.0 / 160.0,
        w: 20.0 / 120.0,
        h: 20.0 / 160.0,
    }];
    let src = source(image_path, 120, 160, boxes);
    let outcome =
        materialize_tiles(&src, dir.path(), Some(&labels_out), &TilingConfig::default()).unwrap();
    let tiles = outcome.tiles.unwrap();
    assert_eq!(outcome.stats.boxes_written, 1);
    assert_eq!(outcome.stats.background_tiles, 11);

    let first = fs::read_to_string(tiles[0].label_path.as_ref().unwrap()).unwrap();
    let parsed = parse_annotation(&first);
    assert_eq!(parsed.boxes.len(), 1);
    let b = parsed.boxes[0];
    let tile_w = tiles[0].rect.width() as f64;
    assert_eq!(b.class_id, 1);
    assert!((b.xc * tile_w - 15.0).abs() < 1e-3);
    assert!((b.w * tile_w - 20.0).abs() < 1e-3);
    assert!(!first.ends_with('\n'));
}

#[test]
fn test_no_label_files_in_inference_mode() {
    let dir = tempfile::tempdir().unwrap();
    let image_path = dir.path().join("plot.png");
    write_image(&image_path, 64, 48);
    let out = dir.path().join("tiles");
    fs::create_dir_all(&out).unwrap();

    let src = source(image_path, 64, 48, Vec::new());
    let tiles = materialize_tiles(&src, &out, None, &TilingConfig::default())
        .unwrap()
        .tiles
        .unwrap();
    assert!(tiles.iter().all(|t| t.label_path.is_none()));
    let txt_files = fs::read_dir(&out)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "txt"))
        .count();
    assert_eq!(txt_files, 0);
}

#[test]
fn test_undecodable_image_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let image_path = dir.path().join("broken.jpg");
    fs::write(&image_path, b"not an image").unwrap();

    let src = source(image_path, 100, 100, Vec::new());
    let outcome = materialize_tiles(&src, dir.path(), None, &TilingConfig::default()).unwrap();
    assert!(outcome.tiles.is_none());
    assert_eq!(outcome.stats.skipped_undecodable, 1);
}

#[test]
fn test_tiny_image_reports_degenerate_grid() {
    let dir = tempfile::tempdir().unwrap();
    let image_path = dir.path().join("tiny.png");
    write_image(&image_path, 3, 2);

    let src = source(image_path, 3, 2, Vec::new());
    let outcome = materialize_tiles(&src, dir.path(), None, &TilingConfig::default()).unwrap();
    assert_eq!(outcome.stats.degenerate_grids, 1);
    assert_eq!(outcome.tiles.unwrap().len(), 12);
}

#[test]
fn test_tile_write_failure_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let image_path = dir.path().join("plot.png");
    write_image(&image_path, 120, 160);
    let src = source(image_path, 120, 160, Vec::new());

    let missing = dir.path().join("not_created");
    let result = materialize_tiles(&src, &missing, None, &TilingConfig::default());
    assert!(matches!(result, Err(PipelineError::ImageWrite { .. })));
}

#[test]
fn test_label_write_failure_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let image_path = dir.path().join("plot.png");
    write_image(&image_path, 120, 160);
    let src = source(image_path, 120, 160, Vec::new());
    let images_out = dir.path().join("images");
    fs::create_dir_all(&images_out).unwrap();

    let missing_labels = dir.path().join("labels_not_created");
    let result = materialize_tiles(
        &src,
        &images_out,
        Some(&missing_labels),
        &TilingConfig::default(),
    );
    match result {
        Err(PipelineError::Io { path, .. }) => assert!(path.starts_with(&missing_labels)),
        other => panic!("expected a label write error, got {:?}", other.map(|o| o.stats)),
    }
}
