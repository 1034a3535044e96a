// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Alignment estimation: computes the transform that maps scanned-page pixels
// onto template pixels, with a confidence for how trustworthy it is.

use std::borrow::Cow;
use std::collections::BTreeMap;

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Luma};
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::hough::{LineDetectionOptions, detect_lines};
use imageproc::region_labelling::{Connectivity, connected_components};
use markwerk_core::config::{AlignmentConfig, RecognitionConfig};
use markwerk_core::error::{MarkwerkError, Result};
use markwerk_core::geometry::{BoundingBox, Point, Transform};
use markwerk_core::template::{Region, Template};
use markwerk_core::types::{AlignmentMethod, AlignmentSummary};
use tracing::{debug, info, instrument, warn};

use crate::image::pixels::{
    column_profile, ink_fraction, otsu_threshold, percentile, profile_extent, row_profile,
};

/// Skew analysis runs on a copy at most this wide.
const SKEW_ANALYSIS_WIDTH: u32 = 1000;

/// Upper bound on ink points fed to the projection-profile search.
const MAX_SKEW_POINTS: usize = 100_000;

/// Rows/columns count as content when their ink exceeds this share of the peak.
const PROFILE_CONTENT_FRACTION: f64 = 0.1;

/// Detected content must span at least this share of the page on each axis.
const MIN_CONTENT_COVERAGE: f64 = 0.3;

/// Relative x/y (or reference/coarse) scale mismatch beyond which a
/// measurement is not trusted.
const MAX_SCALE_DISAGREEMENT: f64 = 0.3;

/// Smallest ink component accepted as the alignment reference.
const MIN_REFERENCE_PIXELS: u64 = 9;

/// Components filling less of their bounding box than this look less like a
/// printed fiducial.
const MIN_PLAUSIBLE_FILL: f64 = 0.25;

/// Confidence multiplier when the template has a reference but it was not found.
const MISSING_REFERENCE_PENALTY: f64 = 0.75;

/// Result of aligning one page.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentOutcome {
    /// Scan → template map.
    pub transform: Transform,
    /// 0..=1.
    pub confidence: f64,
    /// Best-effort transform; callers should widen sampling tolerance.
    pub low_confidence: bool,
    pub method: AlignmentMethod,
    /// Detected page skew that was corrected (0 when none).
    pub skew_degrees: f64,
}

impl AlignmentOutcome {
    fn identity() -> Self {
        Self {
            transform: Transform::identity(),
            confidence: 1.0,
            low_confidence: false,
            method: AlignmentMethod::Identity,
            skew_degrees: 0.0,
        }
    }

    /// Serializable summary stored on the page result.
    pub fn summary(&self) -> AlignmentSummary {
        AlignmentSummary {
            method: self.method,
            scale: self.transform.scale(),
            rotation_degrees: self.transform.rotation_degrees(),
            translation: (self.transform.e, self.transform.f),
            confidence: self.confidence,
            low_confidence: self.low_confidence,
        }
    }
}

/// Estimates the scan → template transform for one page at a time.
///
/// ## Pipeline
///
/// 1. Reject blank or zero-sized pages.
/// 2. Deskew: Hough lines on a Canny edge map give a coarse angle, refined by
///    a projection-profile search over ±1° in 0.1° steps.
/// 3. Coarse frame from content bounds (when the template records its content
///    box) or from the page-size ratio.
/// 4. Snap onto the template's alignment reference when one is present.
/// 5. Apply the confidence policy (failure floor, low-confidence flag).
#[derive(Debug, Clone)]
pub struct AlignmentEstimator {
    enable_deskew: bool,
    enable_align_ref: bool,
    config: AlignmentConfig,
}

impl AlignmentEstimator {
    pub fn new(recognition: &RecognitionConfig) -> Self {
        Self {
            enable_deskew: recognition.enable_deskew,
            enable_align_ref: recognition.enable_align_ref,
            config: recognition.alignment.clone(),
        }
    }

    /// Compute the transform for `page` against `template`.
    ///
    /// Fails with [`MarkwerkError::AlignmentFailure`] for blank pages and for
    /// transforms whose confidence is below the configured floor.
    #[instrument(skip_all, fields(width = page.width(), height = page.height()))]
    pub fn estimate(&self, page: &DynamicImage, template: &Template) -> Result<AlignmentOutcome> {
        let gray = page.to_luma8();
        let (width, height) = gray.dimensions();
        if width == 0 || height == 0 {
            return Err(MarkwerkError::AlignmentFailure(
                "page has zero size".into(),
            ));
        }

        let ink = ink_fraction(&gray, self.config.ink_threshold);
        if ink < self.config.min_ink_fraction {
            return Err(MarkwerkError::AlignmentFailure(format!(
                "page is blank (no ink: {:.3}% dark pixels)",
                ink * 100.0
            )));
        }

        if !self.enable_deskew && !self.enable_align_ref {
            debug!("Alignment disabled; using identity transform");
            return Ok(AlignmentOutcome::identity());
        }

        let skew = if self.enable_deskew {
            self.detect_skew(&gray)
        } else {
            0.0
        };

        let coarse = self.coarse_frame(&gray, template, skew);
        debug!(
            method = ?coarse.method,
            confidence = coarse.confidence,
            scale = coarse.transform.scale(),
            "Coarse frame estimated"
        );

        let outcome = match template.alignment_reference() {
            Some(reference) if self.enable_align_ref => {
                match self.locate_reference(&gray, reference, &coarse) {
                    Some(located) => located,
                    None => {
                        warn!(
                            region = %reference.id,
                            "Alignment reference not found; falling back to coarse frame"
                        );
                        AlignmentOutcome {
                            confidence: coarse.confidence * MISSING_REFERENCE_PENALTY,
                            ..coarse
                        }
                    }
                }
            }
            _ => coarse,
        };

        self.apply_policy(outcome)
    }

    // -- Deskew ---------------------------------------------------------------

    /// Page skew in degrees (positive = content slopes down to the right),
    /// or 0 when below the correction threshold or implausibly large.
    fn detect_skew(&self, gray: &GrayImage) -> f64 {
        let small = downscale(gray, SKEW_ANALYSIS_WIDTH);
        let points = ink_points(&small, self.config.ink_threshold);
        if points.is_empty() {
            return 0.0;
        }

        let max = self.config.max_skew_degrees;
        let (w, h) = small.dimensions();
        let coarse = match hough_skew(&small, max) {
            Some(angle) => {
                debug!(angle, "Hough skew estimate");
                angle
            }
            None => {
                debug!("No near-horizontal Hough lines; scanning projection profiles");
                best_projection_angle(&points, w, h, -max, max, 0.5)
            }
        };
        let refined = best_projection_angle(&points, w, h, coarse - 1.0, coarse + 1.0, 0.1);

        if refined.abs() > max {
            warn!(
                skew = refined,
                max_skew = max,
                "Detected skew beyond the plausible range; ignoring"
            );
            0.0
        } else if refined.abs() < self.config.min_skew_degrees {
            debug!(skew = refined, "Skew below correction threshold");
            0.0
        } else {
            debug!(skew = refined, "Skew detected");
            refined
        }
    }

    // -- Coarse frame ---------------------------------------------------------

    fn coarse_frame(&self, gray: &GrayImage, template: &Template, skew: f64) -> AlignmentOutcome {
        let (w, h) = (f64::from(gray.width()), f64::from(gray.height()));
        let page_center = Point::new(w / 2.0, h / 2.0);
        let theta = skew.to_radians();

        if self.enable_align_ref
            && let Some(template_box) = template.page.content_box
        {
            match content_bounds(gray, self.config.ink_threshold, theta, page_center) {
                Some(scan_box) => {
                    let sx = template_box.width / scan_box.width;
                    let sy = template_box.height / scan_box.height;
                    let disagreement = scale_disagreement(sx, sy);
                    if disagreement <= MAX_SCALE_DISAGREEMENT {
                        let from = rotate_about(scan_box.center(), page_center, theta);
                        return AlignmentOutcome {
                            transform: Transform::similarity(
                                (sx + sy) / 2.0,
                                -theta,
                                from,
                                template_box.center(),
                            ),
                            confidence: 1.0 - disagreement,
                            low_confidence: false,
                            method: AlignmentMethod::ContentBounds,
                            skew_degrees: skew,
                        };
                    }
                    debug!(sx, sy, "Content extents disagree; using page size");
                }
                None => debug!("No usable content bounds; using page size"),
            }
        }

        let sx = template.page.width / w;
        let sy = template.page.height / h;
        let disagreement = scale_disagreement(sx, sy);
        AlignmentOutcome {
            transform: Transform::similarity(
                (sx + sy) / 2.0,
                -theta,
                page_center,
                Point::new(template.page.width / 2.0, template.page.height / 2.0),
            ),
            confidence: (1.0 - disagreement).max(0.0),
            low_confidence: false,
            method: AlignmentMethod::PageSize,
            skew_degrees: skew,
        }
    }

    // -- Reference ------------------------------------------------------------

    fn locate_reference(
        &self,
        gray: &GrayImage,
        reference: &Region,
        coarse: &AlignmentOutcome,
    ) -> Option<AlignmentOutcome> {
        let (w, h) = (f64::from(gray.width()), f64::from(gray.height()));
        let inverse = coarse.transform.inverse()?;
        let predicted = BoundingBox::enclosing(&reference.bbox.corners().map(|c| inverse.apply(c)))?;
        let diagonal = w.hypot(h);
        let window = predicted
            .grow(self.config.search_radius * diagonal)
            .intersect(&BoundingBox::new(0.0, 0.0, w, h))?;

        let x0 = window.x.floor().max(0.0) as u32;
        let y0 = window.y.floor().max(0.0) as u32;
        let x1 = (window.right().ceil() as u32).min(gray.width());
        let y1 = (window.bottom().ceil() as u32).min(gray.height());
        if x1 <= x0 + 1 || y1 <= y0 + 1 {
            return None;
        }

        let crop = image::imageops::crop_imm(gray, x0, y0, x1 - x0, y1 - y0).to_image();
        if ink_fraction(&crop, self.config.ink_threshold) == 0.0 {
            return None;
        }
        let threshold = otsu_threshold(&crop);
        let binary = GrayImage::from_fn(crop.width(), crop.height(), |x, y| {
            if crop.get_pixel(x, y).0[0] <= threshold {
                Luma([255u8])
            } else {
                Luma([0u8])
            }
        });

        let labels = connected_components(&binary, Connectivity::Eight, Luma([0u8]));
        let mut components: BTreeMap<u32, Component> = BTreeMap::new();
        for (x, y, label) in labels.enumerate_pixels() {
            if label.0[0] != 0 {
                components.entry(label.0[0]).or_default().add(x, y);
            }
        }
        let best = components
            .into_values()
            .filter(|c| c.count >= MIN_REFERENCE_PIXELS)
            .fold(None::<Component>, |best, c| match best {
                Some(b) if b.count >= c.count => Some(b),
                _ => Some(c),
            })?;

        let count = best.count as f64;
        let centroid = Point::new(
            f64::from(x0) + best.sum_x / count + 0.5,
            f64::from(y0) + best.sum_y / count + 0.5,
        );
        let comp_w = f64::from(best.max_x - best.min_x + 1);
        let comp_h = f64::from(best.max_y - best.min_y + 1);

        let coarse_scale = coarse.transform.scale();
        let measured_scale =
            (reference.bbox.width / comp_w + reference.bbox.height / comp_h) / 2.0;
        let scale = if (measured_scale - coarse_scale).abs() / coarse_scale > MAX_SCALE_DISAGREEMENT
        {
            debug!(
                measured_scale,
                coarse_scale, "Reference extent disagrees with coarse scale"
            );
            coarse_scale
        } else {
            measured_scale
        };

        let agreement =
            |expected: f64, measured: f64| (1.0 - (measured * scale - expected).abs() / expected).clamp(0.0, 1.0);
        let extent_agreement =
            (agreement(reference.bbox.width, comp_w) + agreement(reference.bbox.height, comp_h)) / 2.0;
        let fill = count / (comp_w * comp_h);
        let fill_plausibility = (fill / MIN_PLAUSIBLE_FILL).min(1.0);

        debug!(
            centroid_x = centroid.x,
            centroid_y = centroid.y,
            pixels = best.count,
            extent_agreement,
            fill,
            "Alignment reference located"
        );

        Some(AlignmentOutcome {
            transform: Transform::similarity(
                scale,
                -coarse.skew_degrees.to_radians(),
                centroid,
                reference.bbox.center(),
            ),
            confidence: extent_agreement * fill_plausibility,
            low_confidence: false,
            method: AlignmentMethod::Reference,
            skew_degrees: coarse.skew_degrees,
        })
    }

    // -- Policy ---------------------------------------------------------------

    fn apply_policy(&self, mut outcome: AlignmentOutcome) -> Result<AlignmentOutcome> {
        if !outcome.confidence.is_finite() || outcome.transform.inverse().is_none() {
            return Err(MarkwerkError::AlignmentFailure(
                "degenerate page transform".into(),
            ));
        }
        outcome.confidence = outcome.confidence.clamp(0.0, 1.0);

        if outcome.confidence < self.config.failure_floor {
            return Err(MarkwerkError::AlignmentFailure(format!(
                "alignment confidence {:.2} is below the floor {:.2} ({:?})",
                outcome.confidence, self.config.failure_floor, outcome.method
            )));
        }

        outcome.low_confidence = outcome.confidence < self.config.low_confidence_threshold;
        if outcome.low_confidence {
            warn!(
                confidence = outcome.confidence,
                method = ?outcome.method,
                "Low alignment confidence; sampling tolerance will be widened"
            );
        }

        info!(
            method = ?outcome.method,
            confidence = outcome.confidence,
            skew = outcome.skew_degrees,
            "Page aligned"
        );
        Ok(outcome)
    }
}

// -- Helpers ------------------------------------------------------------------

/// Running statistics of one connected ink component.
#[derive(Debug, Clone, Copy)]
struct Component {
    count: u64,
    sum_x: f64,
    sum_y: f64,
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
}

impl Default for Component {
    fn default() -> Self {
        Self {
            count: 0,
            sum_x: 0.0,
            sum_y: 0.0,
            min_x: u32::MAX,
            min_y: u32::MAX,
            max_x: 0,
            max_y: 0,
        }
    }
}

impl Component {
    fn add(&mut self, x: u32, y: u32) {
        self.count += 1;
        self.sum_x += f64::from(x);
        self.sum_y += f64::from(y);
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }
}

fn scale_disagreement(sx: f64, sy: f64) -> f64 {
    let max = sx.abs().max(sy.abs());
    if max == 0.0 || !max.is_finite() {
        return 1.0;
    }
    (sx - sy).abs() / max
}

/// Rotate `p` by `angle` radians about `center` (y-down image frame).
fn rotate_about(p: Point, center: Point, angle: f64) -> Point {
    let (sin, cos) = angle.sin_cos();
    let (dx, dy) = (p.x - center.x, p.y - center.y);
    Point::new(
        center.x + dx * cos - dy * sin,
        center.y + dx * sin + dy * cos,
    )
}

fn downscale(gray: &GrayImage, max_width: u32) -> Cow<'_, GrayImage> {
    if gray.width() <= max_width {
        return Cow::Borrowed(gray);
    }
    let factor = f64::from(max_width) / f64::from(gray.width());
    let height = (f64::from(gray.height()) * factor).round().max(1.0) as u32;
    Cow::Owned(image::imageops::resize(gray, max_width, height, FilterType::Triangle))
}

fn ink_points(gray: &GrayImage, ink_threshold: u8) -> Vec<(f64, f64)> {
    let all: Vec<(f64, f64)> = gray
        .enumerate_pixels()
        .filter(|(_, _, p)| p.0[0] < ink_threshold)
        .map(|(x, y, _)| (f64::from(x), f64::from(y)))
        .collect();
    if all.len() <= MAX_SKEW_POINTS {
        return all;
    }
    let step = all.len() / MAX_SKEW_POINTS + 1;
    all.into_iter().step_by(step).collect()
}

/// Median angle of near-horizontal Hough lines, in degrees.
fn hough_skew(gray: &GrayImage, max_skew: f64) -> Option<f64> {
    let blurred = gaussian_blur_f32(gray, 1.5);
    let edges = canny(&blurred, 50.0, 150.0);
    // Lines must span a good part of the page width to count.
    let vote_threshold = (f64::from(gray.width()) * 0.3).max(40.0) as u32;
    let lines = detect_lines(
        &edges,
        LineDetectionOptions {
            vote_threshold,
            suppression_radius: 8,
        },
    );

    // A horizontal line has its normal at 90°.
    let mut angles: Vec<f64> = lines
        .iter()
        .map(|line| f64::from(line.angle_in_degrees) - 90.0)
        .filter(|angle| angle.abs() <= max_skew)
        .collect();
    debug!(lines = lines.len(), near_horizontal = angles.len(), "Hough lines detected");
    percentile(&mut angles, 0.5)
}

/// Angle in `[from, to]` (degrees, stepped) whose de-rotated row profile has
/// the highest energy. Ties keep the first angle.
fn best_projection_angle(
    points: &[(f64, f64)],
    width: u32,
    height: u32,
    from: f64,
    to: f64,
    step: f64,
) -> f64 {
    let steps = ((to - from) / step).round().max(0.0) as i64;
    let offset = f64::from(width);
    let bins = (height + 2 * width) as usize + 1;
    let mut best_angle = 0.0;
    let mut best_score = f64::MIN;
    let mut rows = vec![0u32; bins];

    for i in 0..=steps {
        let angle = ((from + i as f64 * step) * 100.0).round() / 100.0;
        let (sin, cos) = angle.to_radians().sin_cos();
        rows.iter_mut().for_each(|r| *r = 0);
        for &(x, y) in points {
            let row = (-x * sin + y * cos + offset).round();
            if row >= 0.0 && (row as usize) < bins {
                rows[row as usize] += 1;
            }
        }
        let score: f64 = rows.iter().map(|&c| f64::from(c) * f64::from(c)).sum();
        if score > best_score {
            best_score = score;
            best_angle = angle;
        }
    }
    best_angle
}

/// Content extent of the de-skewed page, in de-skewed page coordinates.
fn content_bounds(gray: &GrayImage, ink_threshold: u8, theta: f64, center: Point) -> Option<BoundingBox> {
    let (w, h) = gray.dimensions();
    let (rows, cols) = if theta == 0.0 {
        (row_profile(gray, ink_threshold), column_profile(gray, ink_threshold))
    } else {
        let mut rows = vec![0u32; h as usize];
        let mut cols = vec![0u32; w as usize];
        for (x, y, pixel) in gray.enumerate_pixels() {
            if pixel.0[0] >= ink_threshold {
                continue;
            }
            let q = rotate_about(
                Point::new(f64::from(x) + 0.5, f64::from(y) + 0.5),
                center,
                -theta,
            );
            let (qx, qy) = (q.x.floor(), q.y.floor());
            if qx >= 0.0 && qy >= 0.0 && (qx as u32) < w && (qy as u32) < h {
                cols[qx as usize] += 1;
                rows[qy as usize] += 1;
            }
        }
        (rows, cols)
    };

    let (top, bottom) = profile_extent(&rows, PROFILE_CONTENT_FRACTION)?;
    let (left, right) = profile_extent(&cols, PROFILE_CONTENT_FRACTION)?;
    let bbox = BoundingBox::new(
        left as f64,
        top as f64,
        (right - left + 1) as f64,
        (bottom - top + 1) as f64,
    );
    if bbox.width < f64::from(w) * MIN_CONTENT_COVERAGE
        || bbox.height < f64::from(h) * MIN_CONTENT_COVERAGE
    {
        debug!(
            content_width = bbox.width,
            content_height = bbox.height,
            "Content too small to anchor alignment"
        );
        return None;
    }
    Some(bbox)
}
