// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Region sampling: renders each template region out of the scanned page into
// a template-aligned pixel patch.

use image::{Rgb, RgbImage, Rgba, RgbaImage};
use imageproc::geometric_transformations::{Interpolation, Projection, warp_into};
use markwerk_core::error::{MarkwerkError, Result};
use markwerk_core::geometry::{BoundingBox, Transform};
use markwerk_core::template::Region;
use markwerk_core::types::SampleQuality;
use tracing::debug;

use crate::image::pixels::{luma, percentile};

/// Below this visible share of its footprint a region is out of bounds.
const MIN_VISIBLE_FRACTION: f64 = 0.5;

/// Ring pixels need at least this alpha after warping to count as on-page.
const ON_PAGE_ALPHA: u8 = 250;

/// Pixel patch for one region on one page.
#[derive(Debug, Clone)]
pub struct RegionSample {
    pub region_id: String,
    /// Region box grown by the padding, in template pixels. Empty when
    /// `quality` is `OutOfBounds`.
    pub patch: RgbImage,
    /// Local paper brightness (0..=255) around the region.
    pub background_luma: f64,
    pub quality: SampleQuality,
    /// Share of the region footprint that lies on the page.
    pub visible_fraction: f64,
}

impl RegionSample {
    pub fn is_usable(&self) -> bool {
        self.quality != SampleQuality::OutOfBounds
    }
}

/// Samples regions from one page through one transform.
///
/// Built once per page so the transform is inverted and the page is converted
/// once, then reused for every region.
pub struct RegionSampler<'a> {
    page: RgbaImage,
    page_bounds: BoundingBox,
    transform: &'a Transform,
    inverse: Transform,
    padding: f64,
    ring: f64,
    page_background: f64,
}

impl<'a> RegionSampler<'a> {
    /// `padding` and `ring` are in template pixels; `page_background` is the
    /// fallback paper luma when the ring around a region is unusable.
    pub fn new(
        page: &image::DynamicImage,
        transform: &'a Transform,
        padding: f64,
        ring: f64,
        page_background: f64,
    ) -> Result<Self> {
        let inverse = transform.inverse().ok_or_else(|| {
            MarkwerkError::AlignmentFailure("page transform is not invertible".into())
        })?;
        Ok(Self {
            page_bounds: BoundingBox::new(0.0, 0.0, f64::from(page.width()), f64::from(page.height())),
            page: page.to_rgba8(),
            transform,
            inverse,
            padding: padding.max(0.0),
            ring: ring.max(0.0),
            page_background,
        })
    }

    /// Render `region` into a template-aligned patch.
    ///
    /// Every patch pixel is inverse-mapped into the scan and bilinearly
    /// interpolated; pixels that land off the page are white.
    pub fn sample(&self, region: &Region) -> RegionSample {
        let out_of_bounds = |visible_fraction: f64| RegionSample {
            region_id: region.id.clone(),
            patch: RgbImage::new(0, 0),
            background_luma: self.page_background,
            quality: SampleQuality::OutOfBounds,
            visible_fraction,
        };

        if region.bbox.is_degenerate() {
            return out_of_bounds(0.0);
        }

        let footprint = match BoundingBox::enclosing(&region.bbox.corners().map(|c| self.inverse.apply(c))) {
            Some(fp) if fp.area() > 0.0 => fp,
            _ => return out_of_bounds(0.0),
        };
        let visible_fraction = footprint
            .intersect(&self.page_bounds)
            .map_or(0.0, |v| v.area() / footprint.area());
        if visible_fraction < MIN_VISIBLE_FRACTION {
            debug!(region = %region.id, visible_fraction, "Region outside the page");
            return out_of_bounds(visible_fraction);
        }
        let quality = if visible_fraction < 1.0 - 1e-9 {
            SampleQuality::Clipped
        } else {
            SampleQuality::Ok
        };

        // Render the padded box plus the background ring in one warp.
        let outer = region.bbox.grow(self.padding + self.ring);
        let Some(rendered) = self.render(&outer) else {
            return out_of_bounds(visible_fraction);
        };

        let ring_px = self.ring.round() as u32;
        let inner_w = rendered.width().saturating_sub(2 * ring_px).max(1);
        let inner_h = rendered.height().saturating_sub(2 * ring_px).max(1);

        let mut patch = RgbImage::new(inner_w, inner_h);
        let mut ring_lumas = Vec::new();
        for (x, y, px) in rendered.enumerate_pixels() {
            let inside = x >= ring_px && y >= ring_px && x < ring_px + inner_w && y < ring_px + inner_h;
            let rgb = Rgb([px.0[0], px.0[1], px.0[2]]);
            if inside {
                patch.put_pixel(x - ring_px, y - ring_px, rgb);
            } else if px.0[3] >= ON_PAGE_ALPHA {
                ring_lumas.push(luma(&rgb));
            }
        }

        let background_luma = percentile(&mut ring_lumas, 0.9).unwrap_or(self.page_background);

        RegionSample {
            region_id: region.id.clone(),
            patch,
            background_luma,
            quality,
            visible_fraction,
        }
    }

    /// Warp the template-space box `area` out of the page. Off-page pixels
    /// come back transparent white.
    fn render(&self, area: &BoundingBox) -> Option<RgbaImage> {
        let width = area.width.ceil().max(1.0) as u32;
        let height = area.height.ceil().max(1.0) as u32;

        // scan -> template -> patch (translate so `area` starts at 0,0).
        let t = self.transform;
        let matrix = [
            t.a as f32,
            t.b as f32,
            (t.e - area.x) as f32,
            t.c as f32,
            t.d as f32,
            (t.f - area.y) as f32,
            0.0,
            0.0,
            1.0,
        ];
        let projection = Projection::from_matrix(matrix)?;

        let mut out = RgbaImage::new(width, height);
        warp_into(
            &self.page,
            &projection,
            Interpolation::Bilinear,
            Rgba([255u8, 255, 255, 0]),
            &mut out,
        );
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::DynamicImage;
    use markwerk_core::geometry::Point;

    fn page_with_dark_square(x: u32, y: u32, size: u32) -> DynamicImage {
        let mut img = RgbImage::from_pixel(200, 200, Rgb([240, 240, 240]));
        for yy in y..y + size {
            for xx in x..x + size {
                img.put_pixel(xx, yy, Rgb([10, 10, 10]));
            }
        }
        DynamicImage::ImageRgb8(img)
    }

    fn mean_luma(patch: &RgbImage) -> f64 {
        patch.pixels().map(luma).sum::<f64>() / f64::from(patch.width() * patch.height())
    }

    #[test]
    fn identity_sample_reads_region_pixels() {
        let page = page_with_dark_square(50, 50, 20);
        let transform = Transform::identity();
        let sampler = RegionSampler::new(&page, &transform, 0.0, 4.0, 240.0).unwrap();
        let region = Region::option("q1-a", BoundingBox::new(50.0, 50.0, 20.0, 20.0), 1, "A");

        let sample = sampler.sample(&region);
        assert_eq!(sample.quality, SampleQuality::Ok);
        assert_eq!((sample.patch.width(), sample.patch.height()), (20, 20));
        assert!(mean_luma(&sample.patch) < 40.0);
        assert!((sample.background_luma - 240.0).abs() < 1.0);
    }

    #[test]
    fn transform_is_applied() {
        // Scan is the template shifted by (+10, +5).
        let page = page_with_dark_square(60, 55, 20);
        let transform = Transform::similarity(1.0, 0.0, Point::new(10.0, 5.0), Point::new(0.0, 0.0));
        let sampler = RegionSampler::new(&page, &transform, 0.0, 4.0, 240.0).unwrap();
        let region = Region::option("q1-a", BoundingBox::new(50.0, 50.0, 20.0, 20.0), 1, "A");
        assert!(mean_luma(&sampler.sample(&region).patch) < 40.0);
    }

    #[test]
    fn partially_visible_region_is_clipped() {
        let page = page_with_dark_square(0, 0, 1);
        let transform = Transform::identity();
        let sampler = RegionSampler::new(&page, &transform, 0.0, 2.0, 240.0).unwrap();
        let region = Region::option("q1-a", BoundingBox::new(190.0, 50.0, 16.0, 10.0), 1, "A");
        let sample = sampler.sample(&region);
        assert_eq!(sample.quality, SampleQuality::Clipped);
        assert!((sample.visible_fraction - 10.0 / 16.0).abs() < 1e-9);
    }

    #[test]
    fn region_off_the_page_is_out_of_bounds() {
        let page = page_with_dark_square(0, 0, 1);
        let transform = Transform::identity();
        let sampler = RegionSampler::new(&page, &transform, 2.0, 2.0, 231.0).unwrap();
        let region = Region::option("q9-d", BoundingBox::new(195.0, 50.0, 20.0, 10.0), 9, "D");
        let sample = sampler.sample(&region);
        assert_eq!(sample.quality, SampleQuality::OutOfBounds);
        assert!(!sample.is_usable());
        assert_eq!(sample.patch.width(), 0);
        assert_eq!(sample.background_luma, 231.0);
    }

    #[test]
    fn singular_transform_is_rejected() {
        let page = page_with_dark_square(0, 0, 1);
        let singular = Transform {
            a: 0.0,
            b: 0.0,
            c: 0.0,
            d: 0.0,
            e: 0.0,
            f: 0.0,
        };
        assert!(RegionSampler::new(&page, &singular, 0.0, 0.0, 255.0).is_err());
    }
}
