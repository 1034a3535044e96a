// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Application configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Which text recogniser handles text regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrBackendKind {
    /// Neural engine (`ocrs`), the EasyOCR-equivalent backend.
    Ocrs,
    /// External `tesseract` executable.
    Tesseract,
    /// Text regions get empty, zero-confidence results.
    None,
}

/// How exact ties between the top-scoring options of a group are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// The tied option that comes first in the template wins.
    TemplateOrder,
    /// The group stays ambiguous with no chosen answer.
    NoAnswer,
}

/// Denominator of the per-question "% correct" statistic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Denominator {
    /// Pages with a non-blank answer for the question.
    Answered,
    /// Every scored page.
    AllPages,
}

/// Alignment estimator tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    /// Luma below which a pixel counts as ink for content detection.
    pub ink_threshold: u8,
    /// Minimum fraction of ink pixels for a page to be considered non-blank.
    pub min_ink_fraction: f64,
    /// Reference search window, as a fraction of the page diagonal.
    pub search_radius: f64,
    /// Skew angles beyond this are rejected as detection errors.
    pub max_skew_degrees: f64,
    /// Skew angles below this are not corrected.
    pub min_skew_degrees: f64,
    /// Below this confidence the page fails alignment.
    pub failure_floor: f64,
    /// Below this confidence the transform is flagged low-confidence.
    pub low_confidence_threshold: f64,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            ink_threshold: 200,
            min_ink_fraction: 0.002,
            search_radius: 0.05,
            max_skew_degrees: 15.0,
            min_skew_degrees: 0.3,
            failure_floor: 0.2,
            low_confidence_threshold: 0.6,
        }
    }
}

/// Per-page recognition settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Correct page rotation.
    pub enable_deskew: bool,
    /// Locate the alignment reference (or fall back to content bounds).
    /// When both this and `enable_deskew` are off the identity transform is used.
    pub enable_align_ref: bool,
    /// Combined score above which an option counts as filled.
    pub darkness_threshold: f64,
    pub tie_break: TieBreak,
    /// Extra template pixels sampled around each region.
    pub sampling_padding: f64,
    /// Width of the ring (template pixels) used to estimate local background.
    pub background_ring: f64,
    /// Padding multiplier on pages with low alignment confidence.
    pub low_confidence_padding_factor: f64,
    pub alignment: AlignmentConfig,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            enable_deskew: true,
            enable_align_ref: true,
            darkness_threshold: 0.35,
            tie_break: TieBreak::TemplateOrder,
            sampling_padding: 2.0,
            background_ring: 6.0,
            low_confidence_padding_factor: 2.0,
            alignment: AlignmentConfig::default(),
        }
    }
}

/// Scoring policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringOptions {
    pub denominator: Denominator,
    /// Leave this page (the key sheet) out of the statistics.
    pub exclude_key_page: Option<crate::types::PageRef>,
}

impl Default for ScoringOptions {
    fn default() -> Self {
        Self {
            denominator: Denominator::Answered,
            exclude_key_page: None,
        }
    }
}

/// OCR backend settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    pub backend: OcrBackendKind,
    /// Upper bound for one recogniser call.
    pub timeout_secs: u64,
    /// `tesseract` executable (looked up on `PATH` when relative).
    pub tesseract_path: PathBuf,
    /// Tesseract language string, e.g. `"eng+chi_tra"`.
    pub tesseract_lang: String,
    /// Directory holding the `ocrs` models; the default cache when unset.
    pub model_dir: Option<PathBuf>,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            backend: OcrBackendKind::Tesseract,
            timeout_secs: 20,
            tesseract_path: PathBuf::from("tesseract"),
            tesseract_lang: "eng".into(),
            model_dir: None,
        }
    }
}

/// Batch execution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Pages processed concurrently.
    pub workers: usize,
    /// Upper bound for rendering + recognising one page.
    pub page_timeout_secs: u64,
    /// Resolution pages are rasterised at. 144 dpi is twice PDF user space.
    pub render_dpi: u32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            page_timeout_secs: 120,
            render_dpi: 144,
        }
    }
}

/// Persistent application settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub recognition: RecognitionConfig,
    pub scoring: ScoringOptions,
    pub ocr: OcrSettings,
    pub batch: BatchConfig,
}
