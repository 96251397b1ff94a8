//! YOLO label file parsing and formatting.

use log::{debug, warn};
use std::fs;
use std::io;
use std::path::Path;

use crate::types::{Annotation, AnnotationBox};

/// Parse one `"<class_id> <xc> <yc> <w> <h>"` line.
///
/// Returns `None` for a wrong token count or any unparsable or non-finite
/// field.
pub fn parse_annotation_line(line: &str) -> Option<AnnotationBox> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() != 5 {
        return None;
    }
    let class_id = parts[0].parse::<u32>().ok()?;
    let xc = parse_coordinate(parts[1])?;
    let yc = parse_coordinate(parts[2])?;
    let w = parse_coordinate(parts[3])?;
    let h = parse_coordinate(parts[4])?;
    Some(AnnotationBox {
        class_id,
        xc,
        yc,
        w,
        h,
    })
}

// `f64::from_str` accepts "nan" and "inf"
fn parse_coordinate(token: &str) -> Option<f64> {
    token.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse the contents of a label file, skipping malformed lines one by one.
pub fn parse_annotation(content: &str) -> Annotation {
    let mut annotation = Annotation::default();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        annotation.has_content = true;
        match parse_annotation_line(line) {
            Some(parsed) => annotation.boxes.push(parsed),
            None => {
                debug!("Skipping malformed annotation line: {:?}", line);
                annotation.skipped_lines += 1;
            }
        }
    }
    annotation
}

/// Read a label file. A missing file is `Ok(None)`, i.e. a background image.
pub fn read_annotation_file(path: &Path) -> io::Result<Option<Annotation>> {
    match fs::read_to_string(path) {
        Ok(content) => {
            let annotation = parse_annotation(&content);
            if annotation.skipped_lines > 0 {
                warn!(
                    "Skipped {} malformed line(s) in {}",
                    annotation.skipped_lines,
                    path.display()
                );
            }
            Ok(Some(annotation))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Join boxes into label file contents: one line each, no trailing newline.
pub fn format_label_file(boxes: &[AnnotationBox]) -> String {
    boxes
        .iter()
        .map(AnnotationBox::to_label_line)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_annotation_line() {
        let parsed = parse_annotation_line("1 0.5 0.25 0.1 0.2").unwrap();
        assert_eq!(parsed.class_id, 1);
        assert_eq!(parsed.xc, 0.5);
        assert_eq!(parsed.yc, 0.25);
        assert_eq!(parsed.w, 0.1);
        assert_eq!(parsed.h, 0.2);
    }

    #[test]
    fn test_parse_annotation_line_rejects_wrong_token_count() {
        assert!(parse_annotation_line("1 0.5 0.25 0.1").is_none());
        assert!(parse_annotation_line("1 0.5 0.25 0.1 0.2 0.3").is_none());
        assert!(parse_annotation_line("x 0.5 0.25 0.1 0.2").is_none());
    }

    #[test]
    fn test_non_finite_fields_are_malformed() {
        assert!(parse_annotation_line("0 nan 0.1 0.1 0.1").is_none());
        assert!(parse_annotation_line("0 0.5 inf 0.1 0.1").is_none());
        assert!(parse_annotation_line("0 0.5 0.5 -infinity 0.1").is_none());
        assert!(parse_annotation_line("0 0.5 0.5 0.1 NaN").is_none());

        let annotation = parse_annotation("0 nan 0.1 0.1 0.1\n0 0.5 0.5 0.2 0.2");
        assert_eq!(annotation.boxes.len(), 1);
        assert_eq!(annotation.skipped_lines, 1);
    }

    #[test]
    fn test_parse_annotation_skips_bad_lines_and_keeps_going() {
        let content = "0 0.5 0.5 0.2 0.2\nbroken line\n\n1 0.1 0.1 0.05 0.05\n";
        let annotation = parse_annotation(content);
        assert_eq!(annotation.boxes.len(), 2);
        assert_eq!(annotation.skipped_lines, 1);
        assert!(annotation.has_content);
    }

    #[test]
    fn test_blank_file_has_no_content() {
        let annotation = parse_annotation("  \n\n");
        assert!(annotation.boxes.is_empty());
        assert!(!annotation.has_content);
    }

    #[test]
    fn test_missing_file_is_background() {
        let dir = tempfile::tempdir().unwrap();
        let result = read_annotation_file(&dir.path().join("nope.txt")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_format_label_file() {
        let boxes = [
            AnnotationBox {
                class_id: 0,
                xc: 0.5,
                yc: 0.5,
                w: 0.25,
                h: 0.125,
            },
            AnnotationBox {
                class_id: 1,
                xc: 0.1,
                yc: 0.2,
                w: 0.3,
                h: 0.4,
            },
        ];
        assert_eq!(
            format_label_file(&boxes),
            "0 0.500000 0.500000 0.250000 0.125000\n1 0.100000 0.200000 0.300000 0.400000"
        );
        assert_eq!(format_label_file(&[]), "");
    }
}
