// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// markwerk-document — Page handling for Markwerk.
//
// Turns scanned PDFs and image files into page rasters, aligns each page to
// the template, samples template regions, classifies bubble marks and hands
// text fields to an OCR backend.

pub mod image;
pub mod integrity;
pub mod pdf;
pub mod scan;
pub mod source;

pub use self::image::ImageFileSource;
pub use pdf::PdfPageSource;
pub use scan::{
    AlignmentEstimator, AlignmentOutcome, MarkClassifier, RegionSample, RegionSampler,
    TextRecognizer,
};
pub use source::{PageSource, display_name, open_source, open_source_named, source_names};
