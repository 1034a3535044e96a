// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pixel statistics shared by the alignment, sampling and classification
// stages: luma, histograms, ink profiles and the Otsu threshold.

use image::{GrayImage, Rgb};

/// Luminance as the plain channel mean, in 0..=255.
pub fn luma(px: &Rgb<u8>) -> f64 {
    let [r, g, b] = px.0;
    (f64::from(r) + f64::from(g) + f64::from(b)) / 3.0
}

/// 256-bin histogram of a grayscale image.
pub fn histogram(gray: &GrayImage) -> [u64; 256] {
    let mut bins = [0u64; 256];
    for pixel in gray.pixels() {
        bins[pixel.0[0] as usize] += 1;
    }
    bins
}

/// Smallest value `v` such that at least `p` (0..=1) of the histogram mass is
/// at or below `v`. `None` for an empty histogram.
pub fn histogram_percentile(bins: &[u64; 256], p: f64) -> Option<u8> {
    let total: u64 = bins.iter().sum();
    if total == 0 {
        return None;
    }
    let target = (p.clamp(0.0, 1.0) * total as f64).ceil().max(1.0) as u64;
    let mut seen = 0u64;
    for (value, &count) in bins.iter().enumerate() {
        seen += count;
        if seen >= target {
            return Some(value as u8);
        }
    }
    Some(255)
}

/// Percentile of a list of samples (nearest-rank). Sorts in place.
pub fn percentile(values: &mut [f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let rank = (p.clamp(0.0, 1.0) * values.len() as f64).ceil() as usize;
    Some(values[rank.clamp(1, values.len()) - 1])
}

/// Paper brightness: the 90th-percentile luma of the whole page.
pub fn page_background(gray: &GrayImage) -> f64 {
    histogram_percentile(&histogram(gray), 0.9)
        .map(f64::from)
        .unwrap_or(255.0)
}

/// Fraction of pixels darker than `ink_threshold`.
pub fn ink_fraction(gray: &GrayImage, ink_threshold: u8) -> f64 {
    let total = u64::from(gray.width()) * u64::from(gray.height());
    if total == 0 {
        return 0.0;
    }
    let ink = gray.pixels().filter(|p| p.0[0] < ink_threshold).count();
    ink as f64 / total as f64
}

/// Ink pixel count per row.
pub fn row_profile(gray: &GrayImage, ink_threshold: u8) -> Vec<u32> {
    let mut rows = vec![0u32; gray.height() as usize];
    for (_, y, pixel) in gray.enumerate_pixels() {
        if pixel.0[0] < ink_threshold {
            rows[y as usize] += 1;
        }
    }
    rows
}

/// Ink pixel count per column.
pub fn column_profile(gray: &GrayImage, ink_threshold: u8) -> Vec<u32> {
    let mut cols = vec![0u32; gray.width() as usize];
    for (x, _, pixel) in gray.enumerate_pixels() {
        if pixel.0[0] < ink_threshold {
            cols[x as usize] += 1;
        }
    }
    cols
}

/// First and last index whose count exceeds `fraction` of the profile maximum.
pub fn profile_extent(profile: &[u32], fraction: f64) -> Option<(usize, usize)> {
    let max = *profile.iter().max()?;
    if max == 0 {
        return None;
    }
    let cutoff = f64::from(max) * fraction;
    let first = profile.iter().position(|&c| f64::from(c) > cutoff)?;
    let last = profile.iter().rposition(|&c| f64::from(c) > cutoff)?;
    Some((first, last))
}

/// Compute the Otsu threshold for a grayscale image.
///
/// Finds the threshold value that maximises the between-class variance of the
/// dark and light pixel groups.
pub fn otsu_threshold(gray: &GrayImage) -> u8 {
    let bins = histogram(gray);
    let total_pixels: u64 = bins.iter().sum();
    if total_pixels == 0 {
        return 128;
    }

    let sum_total: f64 = bins
        .iter()
        .enumerate()
        .map(|(i, &count)| i as f64 * count as f64)
        .sum();

    let mut sum_background = 0.0f64;
    let mut weight_background = 0u64;
    let mut max_variance = 0.0f64;
    let mut best_threshold = 0u8;

    for (t, &count) in bins.iter().enumerate() {
        weight_background += count;
        if weight_background == 0 {
            continue;
        }
        let weight_foreground = total_pixels - weight_background;
        if weight_foreground == 0 {
            break;
        }

        sum_background += t as f64 * count as f64;
        let mean_background = sum_background / weight_background as f64;
        let mean_foreground = (sum_total - sum_background) / weight_foreground as f64;

        let between_variance = weight_background as f64
            * weight_foreground as f64
            * (mean_background - mean_foreground).powi(2);

        if between_variance > max_variance {
            max_variance = between_variance;
            best_threshold = t as u8;
        }
    }

    best_threshold
}
