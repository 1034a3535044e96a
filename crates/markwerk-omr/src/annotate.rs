// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Review overlays: the scan with every option box drawn by its outcome.
//
// Template boxes are mapped back into scan space through the inverse of the
// page transform, so the overlay lines up with what was sampled.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;
use markwerk_core::error::{MarkwerkError, Result};
use markwerk_core::geometry::{BoundingBox, Transform};
use markwerk_core::key::AnswerKey;
use markwerk_core::template::Template;
use markwerk_core::types::{AlignmentSummary, PageRef, PageResult};
use markwerk_document::PageSource;
use tracing::{debug, info, instrument, warn};

const OUTLINE: Rgb<u8> = Rgb([0, 100, 255]);
const CHOSEN: Rgb<u8> = Rgb([0, 160, 0]);
const WRONG: Rgb<u8> = Rgb([220, 0, 0]);
const AMBIGUOUS: Rgb<u8> = Rgb([255, 140, 0]);
const KEY_MARK: Rgb<u8> = Rgb([220, 0, 0]);

const MARK_THICKNESS: i32 = 3;
const KEY_MARK_RADIUS: i32 = 5;
const CROSS_HALF: f32 = 6.0;

/// Draw the recognition outcome of `result` over its scan.
///
/// Unmarked options get a thin outline. Marked options are outlined green,
/// or red when an answer key says they are wrong, with a cross through them.
/// Marks in an ambiguous question are orange. The keyed answer gets a red dot.
pub fn annotate_page(
    scan: &DynamicImage,
    template: &Template,
    result: &PageResult,
    key: Option<&AnswerKey>,
) -> RgbImage {
    let mut canvas = scan.to_rgb8();
    let to_scan = result
        .alignment
        .as_ref()
        .map(AlignmentSummary::transform)
        .and_then(|t| t.inverse())
        .unwrap_or_default();

    // Marked boxes are thicker and go on top.
    let (marked, unmarked): (Vec<_>, Vec<_>) = result
        .decisions
        .iter()
        .partition(|d| d.filled);

    for decision in unmarked.into_iter().chain(marked) {
        let Some(rect) = template
            .region(&decision.region_id)
            .and_then(|region| scan_rect(&to_scan, &region.bbox, canvas.dimensions()))
        else {
            continue;
        };
        let keyed = key.and_then(|k| k.get(decision.group_id)).is_some();
        let is_key = key.is_some_and(|k| k.is_correct(decision.group_id, &decision.option_label));
        let colour = match (decision.filled, decision.ambiguous) {
            (false, _) => OUTLINE,
            (true, true) => AMBIGUOUS,
            (true, false) if keyed && !is_key => WRONG,
            (true, false) => CHOSEN,
        };
        let thickness = if decision.filled { MARK_THICKNESS } else { 1 };
        draw_box(&mut canvas, rect, colour, thickness);

        let (cx, cy) = rect_center(rect);
        if decision.filled && keyed && !is_key {
            draw_line_segment_mut(&mut canvas, (cx - CROSS_HALF, cy - CROSS_HALF), (cx + CROSS_HALF, cy + CROSS_HALF), WRONG);
            draw_line_segment_mut(&mut canvas, (cx + CROSS_HALF, cy - CROSS_HALF), (cx - CROSS_HALF, cy + CROSS_HALF), WRONG);
        }
        if is_key {
            draw_filled_circle_mut(&mut canvas, (cx.round() as i32, cy.round() as i32), KEY_MARK_RADIUS, KEY_MARK);
        }
    }
    canvas
}

/// File name for a page overlay. Path separators and other characters that
/// do not belong in a file name become `_`.
pub fn annotation_file_name(page: &PageRef) -> String {
    let stem: String = page
        .source
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    format!("{}-p{:03}.png", stem.trim_start_matches('.'), page.page_index + 1)
}

/// Render each recognised page again and save its overlay under `dir`.
///
/// Pages without decisions (failed or skipped) are left out. Returns the
/// paths written.
#[instrument(skip_all, fields(dir = %dir.display(), pages = pages.len()))]
pub fn write_annotations(
    dir: &Path,
    sources: &[Arc<dyn PageSource>],
    pages: &[PageResult],
    template: &Template,
    key: Option<&AnswerKey>,
    dpi: u32,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let mut written = Vec::new();
    for result in pages.iter().filter(|r| !r.decisions.is_empty()) {
        let Some(source) = sources.iter().find(|s| s.name() == result.page.source) else {
            debug!(page = %result.page, "No open source for page, not annotated");
            continue;
        };
        let scan = match source.render_page(result.page.page_index, dpi) {
            Ok(scan) => scan,
            Err(err) => {
                warn!(page = %result.page, error = %err, "Page could not be rendered for annotation");
                continue;
            }
        };
        let path = dir.join(annotation_file_name(&result.page));
        annotate_page(&scan, template, result, key)
            .save(&path)
            .map_err(|err| MarkwerkError::ImageError(format!("failed to write {}: {err}", path.display())))?;
        written.push(path);
    }
    info!(written = written.len(), "Annotated pages saved");
    Ok(written)
}

fn scan_rect(to_scan: &Transform, bbox: &BoundingBox, (width, height): (u32, u32)) -> Option<Rect> {
    let corners = bbox.corners().map(|p| to_scan.apply(p));
    let mapped = BoundingBox::enclosing(&corners)?;
    let page = BoundingBox::new(0.0, 0.0, f64::from(width), f64::from(height));
    let clipped = mapped.intersect(&page)?;
    let (w, h) = (clipped.width.round() as u32, clipped.height.round() as u32);
    (w > 0 && h > 0).then(|| Rect::at(clipped.x.round() as i32, clipped.y.round() as i32).of_size(w, h))
}

fn rect_center(rect: Rect) -> (f32, f32) {
    (
        rect.left() as f32 + rect.width() as f32 / 2.0,
        rect.top() as f32 + rect.height() as f32 / 2.0,
    )
}

/// Outline `rect`, growing outwards for thicker lines.
fn draw_box(canvas: &mut RgbImage, rect: Rect, colour: Rgb<u8>, thickness: i32) {
    for t in 0..thickness {
        let grown = Rect::at(rect.left() - t, rect.top() - t)
            .of_size(rect.width() + 2 * t as u32, rect.height() + 2 * t as u32);
        draw_hollow_rect_mut(canvas, grown, colour);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::tests::{PAPER, filled_sheet, recognizer, sheet_template};
    use markwerk_core::types::{FailureKind, PageFailure, PageStage};
    use markwerk_document::scan::DisabledRecognizer;

    fn key() -> AnswerKey {
        AnswerKey::new([(1, "C".to_string()), (2, "A".to_string())]).unwrap()
    }

    fn recognised(marks: &[(u32, u32)]) -> (DynamicImage, PageResult) {
        let scan = filled_sheet(marks);
        let result = recognizer(Arc::new(DisabledRecognizer)).recognize(PageRef::new("scan.png", 0), "hash", &scan);
        assert!(result.is_finalized(), "{:?}", result.status);
        (scan, result)
    }

    /// A horizontal edge drawn near `y`, allowing for a pixel of alignment slack.
    fn edge_near(canvas: &RgbImage, x: u32, y: u32, colour: Rgb<u8>) -> bool {
        (y - 2..=y + 2).any(|yy| *canvas.get_pixel(x, yy) == colour)
    }

    #[test]
    fn wrong_mark_and_keyed_answer_are_drawn() {
        // Question 1: B marked, C expected. Question 2: blank, A expected.
        let (scan, result) = recognised(&[(1, 1)]);
        let canvas = annotate_page(&scan, &sheet_template(), &result, Some(&key()));

        assert_eq!(canvas.dimensions(), (300, 400));
        assert!(edge_near(&canvas, 90, 100, WRONG));
        assert_eq!(*canvas.get_pixel(110, 110), KEY_MARK);
        assert_eq!(*canvas.get_pixel(70, 170), KEY_MARK);
        assert!(edge_near(&canvas, 130, 100, OUTLINE));
        assert_eq!(*canvas.get_pixel(250, 350), PAPER);
    }

    #[test]
    fn marks_are_green_without_a_key() {
        let (scan, result) = recognised(&[(1, 1)]);
        let canvas = annotate_page(&scan, &sheet_template(), &result, None);
        assert!(edge_near(&canvas, 90, 100, CHOSEN));
        assert_ne!(*canvas.get_pixel(110, 110), KEY_MARK);
    }

    #[test]
    fn ambiguous_marks_are_orange() {
        let (scan, result) = recognised(&[(2, 0), (2, 3)]);
        let canvas = annotate_page(&scan, &sheet_template(), &result, None);
        assert!(edge_near(&canvas, 70, 160, AMBIGUOUS));
        assert!(edge_near(&canvas, 130, 160, AMBIGUOUS));
        assert!(edge_near(&canvas, 90, 160, OUTLINE));
    }

    #[test]
    fn file_names_are_flat() {
        assert_eq!(annotation_file_name(&PageRef::new("scan.pdf", 0)), "scan.pdf-p001.png");
        assert_eq!(
            annotation_file_name(&PageRef::new("/class 1/scan.png#2", 11)),
            "_class_1_scan.png_2-p012.png"
        );
    }

    struct SheetSource(DynamicImage);

    impl PageSource for SheetSource {
        fn name(&self) -> &str {
            "scan.png"
        }

        fn source_hash(&self) -> &str {
            "hash"
        }

        fn page_count(&self) -> usize {
            1
        }

        fn render_page(&self, _index: usize, _dpi: u32) -> Result<DynamicImage> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn overlays_are_written_for_recognised_pages() {
        let dir = tempfile::tempdir().unwrap();
        let (scan, result) = recognised(&[(1, 2)]);
        let failed = PageResult::failed(
            PageRef::new("other.png", 0),
            "h2",
            PageStage::Loaded,
            PageFailure::new(FailureKind::Alignment, "blank"),
        );
        let sources: Vec<Arc<dyn PageSource>> = vec![Arc::new(SheetSource(scan))];

        let out = dir.path().join("overlays");
        let written =
            write_annotations(&out, &sources, &[result, failed], &sheet_template(), Some(&key()), 72).unwrap();
        assert_eq!(written, vec![out.join("scan.png-p001.png")]);
        let saved = image::open(&written[0]).unwrap().to_rgb8();
        assert_eq!(*saved.get_pixel(110, 110), KEY_MARK);
    }
}
